//! Multi-resolution image pyramid by 2×2 area averaging.
//!
//! Level 0 is the input image, level k has exactly half the width and height
//! of level k-1. The resolution must allow `levels - 1` halvings without a
//! remainder, otherwise the configuration is rejected.
use image::{GrayImage, Luma};

use crate::{camera::check_halvings, config::PyramidConfig, error::Result};

#[derive(Debug, Clone)]
pub struct PyramidBuilder {
    levels: usize,
}

impl PyramidBuilder {
    pub fn new(config: &PyramidConfig) -> Self {
        Self {
            levels: config.levels,
        }
    }

    pub fn levels(&self) -> usize {
        self.levels
    }

    pub fn build(&self, image: GrayImage) -> Result<Vec<GrayImage>> {
        check_halvings(image.width(), image.height(), self.levels)?;

        let mut pyramid = Vec::with_capacity(self.levels);
        pyramid.push(image);
        for level in 1..self.levels {
            let halved = halve(&pyramid[level - 1]);
            pyramid.push(halved);
        }
        Ok(pyramid)
    }
}

/// Averages each 2×2 block into one pixel, rounding to nearest.
fn halve(image: &GrayImage) -> GrayImage {
    let (w, h) = (image.width() / 2, image.height() / 2);
    GrayImage::from_fn(w, h, |x, y| {
        let (x0, y0) = (2 * x, 2 * y);
        let sum = image.get_pixel(x0, y0)[0] as u16
            + image.get_pixel(x0 + 1, y0)[0] as u16
            + image.get_pixel(x0, y0 + 1)[0] as u16
            + image.get_pixel(x0 + 1, y0 + 1)[0] as u16;
        Luma([((sum + 2) / 4) as u8])
    })
}
