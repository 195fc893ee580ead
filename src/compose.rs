//! Synthesis of contrast-normalized overview images from channel rasters.
//!
//! Overviews downsample with an area-averaging box filter rather than
//! nearest-neighbour sampling, which would alias badly on the sparse,
//! spiky intensity data a mass cytometer produces. Values are rescaled
//! linearly from `[0, contrast_max]` to the 8-bit display range and
//! clamped at both ends.

use image::GrayImage;

use crate::error::DecodeError;
use crate::geom::BoundingBox;
use crate::raster::ChannelRaster;

/// One decoded channel raster with its placement on the slide (μm).
pub(crate) struct OverlayPlane<'a> {
    pub raster: &'a ChannelRaster,
    pub bounds: BoundingBox<f64>,
}

const DISPLAY_MAX: f32 = 255.0;

/// Renders `planes` onto a single-channel canvas whose longest side is
/// `target_size`, capped so that no plane is sampled beyond its native
/// resolution.
pub(crate) fn compose_overview(
    planes: &[OverlayPlane<'_>],
    target_size: u32,
    contrast_max: f32,
) -> Result<GrayImage, DecodeError> {
    if target_size == 0 {
        return Err(DecodeError::InvalidArgument("target_size must be positive"));
    }
    if !(contrast_max > 0.0) {
        return Err(DecodeError::InvalidArgument(
            "contrast_max must be positive",
        ));
    }
    debug_assert!(!planes.is_empty());

    // Degenerate μm extents (imported or unplaced regions) fall back to
    // one μm per pixel so the raster still has a well-defined footprint
    let bounds: Vec<BoundingBox<f64>> = planes
        .iter()
        .map(|plane| {
            let mut b = plane.bounds;
            if !(b.width > 0.0) || !(b.height > 0.0) {
                b.width = plane.raster.width() as f64;
                b.height = plane.raster.height() as f64;
            }
            b
        })
        .collect();

    let union = bounds
        .iter()
        .skip(1)
        .fold(bounds[0], |acc, b| acc.union(b));

    // Finest native pixel pitch (px/μm) across the planes; the canvas
    // never exceeds it, so downsampling never turns into upsampling
    let native_pitch = planes
        .iter()
        .zip(&bounds)
        .map(|(plane, b)| {
            (plane.raster.width() as f64 / b.width).max(plane.raster.height() as f64 / b.height)
        })
        .fold(f64::MIN, f64::max);

    let long_side_um = union.width.max(union.height);
    let pitch = (target_size as f64 / long_side_um).min(native_pitch);

    let out_width = ((union.width * pitch).round() as u32).max(1);
    let out_height = ((union.height * pitch).round() as u32).max(1);

    let mut sums = vec![0f64; out_width as usize * out_height as usize];
    let mut weights = vec![0u32; out_width as usize * out_height as usize];

    for (plane, b) in planes.iter().zip(&bounds) {
        let raster = plane.raster;
        let step_x = b.width / raster.width() as f64;
        let step_y = b.height / raster.height() as f64;

        let mut index = 0;
        'rows: for y in 0..raster.height() {
            for x in 0..raster.width() {
                if index >= raster.valid_pixels() {
                    break 'rows;
                }
                let value = raster.samples()[index];
                index += 1;

                let um_x = b.min_x - union.min_x + (x as f64 + 0.5) * step_x;
                let um_y = b.min_y - union.min_y + (y as f64 + 0.5) * step_y;

                let out_x = ((um_x * pitch) as u32).min(out_width - 1);
                let out_y = ((um_y * pitch) as u32).min(out_height - 1);

                let bin = out_y as usize * out_width as usize + out_x as usize;
                sums[bin] += value as f64;
                weights[bin] += 1;
            }
        }
    }

    let pixels: Vec<u8> = sums
        .iter()
        .zip(&weights)
        .map(|(&sum, &weight)| {
            if weight == 0 {
                return 0;
            }
            let mean = (sum / weight as f64) as f32;
            ((mean / contrast_max) * DISPLAY_MAX).clamp(0.0, DISPLAY_MAX) as u8
        })
        .collect();

    Ok(GrayImage::from_raw(out_width, out_height, pixels)
        .expect("overview buffer matches its dimensions"))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::raster::Raster;

    fn plane(raster: &ChannelRaster, width_um: f64, height_um: f64) -> OverlayPlane<'_> {
        OverlayPlane {
            raster,
            bounds: BoundingBox {
                min_x: 0.0,
                min_y: 0.0,
                width: width_um,
                height: height_um,
            },
        }
    }

    fn uniform_raster(width: u32, height: u32, value: f32) -> ChannelRaster {
        let pixels = width as usize * height as usize;
        Raster::new(width, height, pixels, vec![value; pixels])
    }

    #[test]
    fn zero_target_size_is_invalid() {
        let raster = uniform_raster(4, 4, 1.0);
        match compose_overview(&[plane(&raster, 4.0, 4.0)], 0, 10.0) {
            Err(DecodeError::InvalidArgument(_)) => {}
            other => panic!("unexpected result: {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn non_positive_contrast_is_invalid() {
        let raster = uniform_raster(4, 4, 1.0);
        for contrast in [0.0, -1.0, f32::NAN] {
            match compose_overview(&[plane(&raster, 4.0, 4.0)], 4, contrast) {
                Err(DecodeError::InvalidArgument(_)) => {}
                other => panic!("unexpected result: {:?}", other.map(|_| ())),
            }
        }
    }

    #[test]
    fn downsamples_with_box_average() {
        // 4x4 checkerboard of 0 and 100 averages to 50 at 2x2
        let mut data = Vec::new();
        for y in 0..4 {
            for x in 0..4 {
                data.push(if (x + y) % 2 == 0 { 100.0 } else { 0.0 });
            }
        }
        let raster = Raster::new(4, 4, 16, data);

        let overview = compose_overview(&[plane(&raster, 4.0, 4.0)], 2, 100.0).unwrap();
        assert_eq!(overview.dimensions(), (2, 2));
        for pixel in overview.pixels() {
            assert_eq!(pixel.0[0], 127);
        }
    }

    #[test]
    fn never_upsamples_beyond_native_resolution() {
        let raster = uniform_raster(600, 600, 1.0);
        let overview = compose_overview(&[plane(&raster, 600.0, 600.0)], 7500, 100.0).unwrap();
        assert_eq!(overview.dimensions(), (600, 600));
    }

    #[test]
    fn target_size_is_met_within_rounding() {
        let raster = uniform_raster(601, 300, 1.0);
        let overview = compose_overview(&[plane(&raster, 601.0, 300.0)], 150, 10.0).unwrap();
        let (w, h) = overview.dimensions();
        assert!(w.max(h) >= 149 && w.max(h) <= 151, "got {}x{}", w, h);
    }

    #[test]
    fn values_saturate_and_clamp() {
        let raster = Raster::new(2, 1, 2, vec![1_000.0, -50.0]);
        let overview = compose_overview(&[plane(&raster, 2.0, 1.0)], 2, 100.0).unwrap();
        assert_eq!(overview.get_pixel(0, 0).0[0], 255);
        assert_eq!(overview.get_pixel(1, 0).0[0], 0);
    }

    #[test]
    fn unmeasured_tail_renders_black() {
        let raster = Raster::new(2, 2, 2, vec![100.0, 100.0, 0.0, 0.0]);
        let overview = compose_overview(&[plane(&raster, 2.0, 2.0)], 2, 100.0).unwrap();
        assert_eq!(overview.get_pixel(0, 0).0[0], 255);
        assert_eq!(overview.get_pixel(0, 1).0[0], 0);
    }

    #[test]
    fn degenerate_bounds_fall_back_to_pixel_extents() {
        let raster = uniform_raster(8, 4, 10.0);
        let overview = compose_overview(&[plane(&raster, 0.0, 0.0)], 4, 10.0).unwrap();
        assert_eq!(overview.dimensions(), (4, 2));
    }

    #[test]
    fn two_planes_compose_side_by_side() {
        let left = uniform_raster(4, 4, 100.0);
        let right = uniform_raster(4, 4, 50.0);
        let planes = [
            OverlayPlane {
                raster: &left,
                bounds: BoundingBox {
                    min_x: 0.0,
                    min_y: 0.0,
                    width: 4.0,
                    height: 4.0,
                },
            },
            OverlayPlane {
                raster: &right,
                bounds: BoundingBox {
                    min_x: 4.0,
                    min_y: 0.0,
                    width: 4.0,
                    height: 4.0,
                },
            },
        ];

        let overview = compose_overview(&planes, 8, 100.0).unwrap();
        assert_eq!(overview.dimensions(), (8, 4));
        assert_eq!(overview.get_pixel(0, 0).0[0], 255);
        assert_eq!(overview.get_pixel(7, 0).0[0], 127);
    }
}
