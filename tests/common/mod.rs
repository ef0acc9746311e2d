#![allow(dead_code)]

use image::{GrayImage, Luma};
use rand::{rngs::StdRng, SeedableRng};
use rand_distr::{Distribution, Normal};
use uwslam::{CameraIntrinsics, TrackerConfig};

pub const WIDTH: u32 = 128;
pub const HEIGHT: u32 = 96;
pub const FOCAL: f64 = 100.0;

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn intrinsics() -> CameraIntrinsics {
    CameraIntrinsics::from_focal(FOCAL, WIDTH, HEIGHT).unwrap()
}

pub fn config() -> TrackerConfig {
    let mut config = TrackerConfig::default();
    config.pyramid.levels = 3;
    config.candidates.min_per_level = 8;
    config
}

/// Smooth texture seen by a camera shifted `shift` pixels to the right.
pub fn texture(shift: f64) -> GrayImage {
    GrayImage::from_fn(WIDTH, HEIGHT, |x, y| {
        let (x, y) = (x as f64 + shift, y as f64);
        let v = 128.0 + 50.0 * (x / 6.0).sin() * (y / 8.0).cos() + 35.0 * ((x + 0.5 * y) / 10.0).cos();
        Luma([v.round().clamp(0.0, 255.0) as u8])
    })
}

pub fn flat(value: u8) -> GrayImage {
    GrayImage::from_pixel(WIDTH, HEIGHT, Luma([value]))
}

/// Adds zero mean gaussian noise, reproducible through `seed`.
pub fn noisy(image: &GrayImage, sigma: f64, seed: u64) -> GrayImage {
    let mut rng = StdRng::seed_from_u64(seed);
    let normal = Normal::new(0.0, sigma).unwrap();
    let mut noisy = image.clone();
    for pixel in noisy.pixels_mut() {
        let v = pixel[0] as f64 + normal.sample(&mut rng);
        pixel[0] = v.round().clamp(0.0, 255.0) as u8;
    }
    noisy
}
