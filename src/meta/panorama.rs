use crate::geom::{BoundingBox, SlideTransform};

use super::{ByteSpan, ImageKind};

/// A coarse preview scan image over part of a slide.
#[derive(Debug, Clone)]
pub struct Panorama {
    pub(crate) id: u16,
    pub(crate) slide_id: u16,
    pub(crate) description: String,
    /// Slide-space positions (μm) of the four image corners, in document order
    pub(crate) corners: [(f64, f64); 4],
    pub(crate) pixel_width: u32,
    pub(crate) pixel_height: u32,
    pub(crate) image: Option<ByteSpan>,
    pub(crate) image_format: ImageKind,
    pub(crate) pixel_scale_coef: f64,
}

impl Panorama {
    /// Returns the unique id of the panorama
    #[inline]
    pub fn id(&self) -> u16 {
        self.id
    }

    /// Returns the id of the slide this panorama was scanned on
    #[inline]
    pub fn slide_id(&self) -> u16 {
        self.slide_id
    }

    /// Returns the operator-supplied description
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Returns the dimensions in pixels (width, height) of the panorama image
    pub fn dimensions(&self) -> (u32, u32) {
        (self.pixel_width, self.pixel_height)
    }

    /// Returns the scaling coefficient relating pixel pitch to μm
    pub fn pixel_scale_coef(&self) -> f64 {
        self.pixel_scale_coef
    }

    /// Returns whether a preview image is embedded for this panorama.
    /// Imported panoramas may declare none.
    pub fn has_image(&self) -> bool {
        self.image.is_some()
    }

    /// Format of the embedded preview image
    pub fn image_format(&self) -> ImageKind {
        self.image_format
    }

    /// Returns the bounding box of the panorama on the slide (μm)
    pub fn bounding_box(&self) -> BoundingBox<f64> {
        let min_x = self
            .corners
            .iter()
            .map(|c| c.0)
            .fold(f64::INFINITY, f64::min);
        let max_x = self
            .corners
            .iter()
            .map(|c| c.0)
            .fold(f64::NEG_INFINITY, f64::max);
        let min_y = self
            .corners
            .iter()
            .map(|c| c.1)
            .fold(f64::INFINITY, f64::min);
        let max_y = self
            .corners
            .iter()
            .map(|c| c.1)
            .fold(f64::NEG_INFINITY, f64::max);

        BoundingBox {
            min_x,
            min_y,
            width: max_x - min_x,
            height: max_y - min_y,
        }
    }

    /// Returns the mapping from panorama pixel coordinates to slide
    /// coordinates (μm)
    pub fn to_slide_transform(&self) -> SlideTransform {
        SlideTransform::new(self.bounding_box(), self.pixel_width, self.pixel_height)
    }

    pub(crate) fn image_span(&self) -> Option<ByteSpan> {
        self.image
    }
}
