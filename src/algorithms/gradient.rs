//! Per-level image gradients, memoized on the frame.
//!
//! Derivatives use the Scharr kernels and are normalised by 32 so that the
//! fields are in intensity units per pixel. Border pixels replicate their
//! neighbours (the filter clamps), so magnitudes there are not reliable and
//! the candidate selector keeps a margin.
use image::{GrayImage, ImageBuffer, Luma};
use imageproc::gradients::{horizontal_scharr, vertical_scharr};
use rayon::prelude::*;

use crate::frame::{Frame, GradientLevel, GrayF32};

/// Sum of the absolute Scharr weights on one side, times the two pixel spacing.
const SCHARR_NORMALISATION: f32 = 32.0;

#[derive(Debug, Default, Clone, Copy)]
pub struct GradientExtractor;

impl GradientExtractor {
    pub fn new() -> Self {
        Self
    }

    /// Gradient fields of every level of `frame`, computed on first use.
    ///
    /// Repeated calls return the stored fields without recomputation.
    pub fn extract<'f>(&self, frame: &'f Frame) -> &'f [GradientLevel] {
        frame.gradients.get_or_init(|| {
            log::trace!("computing gradients of frame {}", frame.id());
            frame.pyramid().par_iter().map(level_gradients).collect()
        })
    }
}

fn level_gradients(image: &GrayImage) -> GradientLevel {
    let gx = normalised(&horizontal_scharr(image));
    let gy = normalised(&vertical_scharr(image));
    let magnitude = GrayF32::from_fn(image.width(), image.height(), |x, y| {
        let (dx, dy) = (gx.get_pixel(x, y)[0], gy.get_pixel(x, y)[0]);
        Luma([(dx * dx + dy * dy).sqrt()])
    });
    GradientLevel { gx, gy, magnitude }
}

fn normalised(raw: &ImageBuffer<Luma<i16>, Vec<i16>>) -> GrayF32 {
    GrayF32::from_fn(raw.width(), raw.height(), |x, y| {
        Luma([raw.get_pixel(x, y)[0] as f32 / SCHARR_NORMALISATION])
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{algorithms::pyramid::PyramidBuilder, config::PyramidConfig};
    use approx::assert_relative_eq;

    fn ramp_frame() -> Frame {
        // intensity grows by 3 per column
        let image = GrayImage::from_fn(64, 32, |x, _| Luma([(3 * x) as u8]));
        let builder = PyramidBuilder::new(&PyramidConfig { levels: 3 });
        Frame::new(0, 0.0, image, &builder).unwrap()
    }

    #[test]
    fn ramp_has_unit_scaled_gradient() {
        let frame = ramp_frame();
        let levels = GradientExtractor::new().extract(&frame);
        assert_eq!(levels.len(), 3);
        let level0 = &levels[0];
        assert_relative_eq!(level0.gx.get_pixel(10, 10)[0], 3.0);
        assert_relative_eq!(level0.gy.get_pixel(10, 10)[0], 0.0);
        assert_relative_eq!(level0.magnitude.get_pixel(10, 10)[0], 3.0);
        // one level down a pixel spans two columns
        assert_relative_eq!(levels[1].gx.get_pixel(8, 8)[0], 6.0);
    }

    #[test]
    fn extraction_is_memoized() {
        let frame = ramp_frame();
        let extractor = GradientExtractor::new();
        assert!(!frame.has_gradients());
        let first = extractor.extract(&frame);
        let second = extractor.extract(&frame);
        assert!(std::ptr::eq(first, second));
        assert!(frame.has_gradients());
    }

    #[test]
    fn flat_image_has_zero_gradient() {
        let builder = PyramidBuilder::new(&PyramidConfig { levels: 2 });
        let frame = Frame::new(0, 0.0, GrayImage::from_pixel(32, 32, Luma([90])), &builder).unwrap();
        let levels = GradientExtractor::new().extract(&frame);
        assert!(levels
            .iter()
            .all(|level| level.magnitude.pixels().all(|p| p[0] == 0.0)));
    }
}
