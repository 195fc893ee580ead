use num_traits::Num;

/// A bounding rectangle, usually in slide coordinates (μm).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox<T> {
    /// Minimum x coordinate of the rectangle
    pub min_x: T,
    /// Minimum y coordinate of the rectangle
    pub min_y: T,
    /// Width of the rectangle
    pub width: T,
    /// Height of the rectangle
    pub height: T,
}

impl<T: Num + PartialOrd + Copy> BoundingBox<T> {
    /// Maximum x coordinate of the rectangle
    pub fn max_x(&self) -> T {
        self.min_x + self.width
    }

    /// Maximum y coordinate of the rectangle
    pub fn max_y(&self) -> T {
        self.min_y + self.height
    }

    /// Whether this rectangle and `other` share any area
    pub fn intersects(&self, other: &BoundingBox<T>) -> bool {
        self.min_x < other.max_x()
            && self.max_x() > other.min_x
            && self.min_y < other.max_y()
            && self.max_y() > other.min_y
    }
}

impl BoundingBox<f64> {
    /// The smallest rectangle covering both `self` and `other`
    pub fn union(&self, other: &BoundingBox<f64>) -> BoundingBox<f64> {
        let min_x = self.min_x.min(other.min_x);
        let min_y = self.min_y.min(other.min_y);
        let max_x = self.max_x().max(other.max_x());
        let max_y = self.max_y().max(other.max_y());

        BoundingBox {
            min_x,
            min_y,
            width: max_x - min_x,
            height: max_y - min_y,
        }
    }
}

/// An axis-aligned affine mapping between the pixel space of an image
/// (panorama or acquisition raster) and slide coordinates (μm).
///
/// Pixel (0, 0) maps to the top-left corner of the region; y grows
/// downwards in pixel space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SlideTransform {
    origin_x: f64,
    origin_y: f64,
    step_x: f64,
    step_y: f64,
}

impl SlideTransform {
    pub(crate) fn new(bounds: BoundingBox<f64>, width_px: u32, height_px: u32) -> SlideTransform {
        let step_x = if width_px > 0 {
            bounds.width / width_px as f64
        } else {
            1.0
        };
        let step_y = if height_px > 0 {
            bounds.height / height_px as f64
        } else {
            1.0
        };

        SlideTransform {
            origin_x: bounds.min_x,
            origin_y: bounds.min_y,
            step_x,
            step_y,
        }
    }

    /// Maps a pixel coordinate to slide coordinates (μm)
    pub fn to_slide(&self, x: f64, y: f64) -> (f64, f64) {
        (
            self.origin_x + x * self.step_x,
            self.origin_y + y * self.step_y,
        )
    }

    /// Maps a slide coordinate (μm) to pixel coordinates
    pub fn from_slide(&self, x_um: f64, y_um: f64) -> (f64, f64) {
        (
            (x_um - self.origin_x) / self.step_x,
            (y_um - self.origin_y) / self.step_y,
        )
    }

    /// Size of one pixel in μm along each axis
    pub fn pixel_size(&self) -> (f64, f64) {
        (self.step_x, self.step_y)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn bounding_box_union_and_extents() {
        let a = BoundingBox {
            min_x: 0.0,
            min_y: 0.0,
            width: 10.0,
            height: 5.0,
        };
        let b = BoundingBox {
            min_x: 8.0,
            min_y: 2.0,
            width: 10.0,
            height: 10.0,
        };

        assert!(a.intersects(&b));
        let u = a.union(&b);
        assert_eq!(u.min_x, 0.0);
        assert_eq!(u.min_y, 0.0);
        assert_eq!(u.width, 18.0);
        assert_eq!(u.height, 12.0);
    }

    #[test]
    fn transform_round_trip() {
        let bounds = BoundingBox {
            min_x: 100.0,
            min_y: 200.0,
            width: 600.0,
            height: 300.0,
        };
        let t = SlideTransform::new(bounds, 600, 300);

        assert_eq!(t.to_slide(0.0, 0.0), (100.0, 200.0));
        assert_eq!(t.to_slide(600.0, 300.0), (700.0, 500.0));

        let (px, py) = t.from_slide(400.0, 350.0);
        assert!((px - 300.0).abs() < 1e-9);
        assert!((py - 150.0).abs() < 1e-9);
    }
}
