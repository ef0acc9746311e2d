use image::{DynamicImage, GrayImage, Pixel, Rgba, RgbaImage};
use imageproc::drawing;
use nalgebra::Isometry3;
use once_cell::sync::Lazy;

use crate::{
    camera::CameraIntrinsics,
    config::TrackerConfig,
    dataset::ImageSequence,
    error::Result,
    frame::FrameId,
    keyframes::KeyframeManager,
    tracker::{Tracker, TrackingReport, TrackingState},
};

/// Entry point for monocular sequences.
pub struct System {
    tracker: Tracker,
}

impl System {
    pub fn new(config: TrackerConfig, intrinsics: CameraIntrinsics) -> Result<Self> {
        log::info!(
            "monocular system {}x{}, {} pyramid levels, window of {}",
            intrinsics.width,
            intrinsics.height,
            config.pyramid.levels,
            config.window_capacity
        );
        Ok(Self {
            tracker: Tracker::new(&config, intrinsics)?,
        })
    }

    /// Tracks one image of any color type, converting it to 8-bit grayscale first.
    pub fn track_monocular(&mut self, image: &DynamicImage, timestamp: f64) -> Result<TrackingReport> {
        self.tracker.track(image.to_luma8(), timestamp)
    }

    pub fn track_gray(&mut self, image: GrayImage, timestamp: f64) -> Result<TrackingReport> {
        self.tracker.track(image, timestamp)
    }

    /// Tracks a whole sequence, using the image index as timestamp.
    ///
    /// Unreadable images end the run; tracking failures only show up in the reports.
    pub fn run(&mut self, sequence: &ImageSequence) -> Result<Vec<TrackingReport>> {
        let mut reports = Vec::with_capacity(sequence.len());
        for (index, path) in sequence.iter() {
            log::debug!("tracking {}", path.display());
            let image = sequence.load(index)?;
            reports.push(self.tracker.track(image, index as f64)?);
        }
        let lost = reports
            .iter()
            .filter(|report| report.state == TrackingState::Lost)
            .count();
        log::info!(
            "tracked {} images, {} lost, {} keyframes",
            reports.len(),
            lost,
            self.tracker.keyframes().len()
        );
        Ok(reports)
    }

    pub fn tracker(&self) -> &Tracker {
        &self.tracker
    }

    pub fn keyframes(&self) -> &KeyframeManager {
        self.tracker.keyframes()
    }

    pub fn tracking_state(&self) -> TrackingState {
        self.tracker.state()
    }

    /// Draws the level 0 candidates of the latest frame over its image.
    /// Keyframe candidates are blue, the others green.
    pub fn overlay(&self) -> Option<RgbaImage> {
        let frame = self.tracker.window().latest()?;
        let mut canvas = DynamicImage::ImageLuma8(frame.image(0).clone()).to_rgba8();
        let color = if frame.is_keyframe() { *BLUE } else { *GREEN };
        for candidate in frame.candidates().and_then(|levels| levels.first())? {
            drawing::draw_hollow_circle_mut(
                &mut canvas,
                (candidate.x as i32, candidate.y as i32),
                1,
                color,
            );
        }
        Some(canvas)
    }

    /// Stops tracking and returns the keyframe trajectory.
    pub fn shutdown(self) -> Vec<(FrameId, Isometry3<f64>)> {
        let trajectory = self.tracker.keyframes().trajectory();
        log::info!("shutting down with {} keyframes", trajectory.len());
        trajectory
    }
}

static GREEN: Lazy<Rgba<u8>> = Lazy::new(|| *Rgba::from_slice(&[0, 255, 0, 255]));
static BLUE: Lazy<Rgba<u8>> = Lazy::new(|| *Rgba::from_slice(&[0, 0, 255, 255]));

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    fn system() -> System {
        let mut config = TrackerConfig::default();
        config.pyramid.levels = 3;
        config.candidates.min_per_level = 8;
        System::new(config, CameraIntrinsics::from_focal(100.0, 128, 96).unwrap()).unwrap()
    }

    fn texture() -> GrayImage {
        GrayImage::from_fn(128, 96, |x, y| {
            let (x, y) = (x as f64, y as f64);
            Luma([(128.0 + 60.0 * (x / 6.0).sin() * (y / 8.0).cos()).round() as u8])
        })
    }

    #[test]
    fn color_images_are_converted() {
        let mut system = system();
        let color = DynamicImage::ImageLuma8(texture()).to_rgb8();
        let report = system
            .track_monocular(&DynamicImage::ImageRgb8(color), 0.5)
            .unwrap();
        assert_eq!(report.frame_id, 0);
        assert_eq!(report.timestamp, 0.5);
        assert_eq!(system.tracking_state(), TrackingState::NotInitialized);
    }

    #[test]
    fn overlay_marks_keyframe_candidates() {
        let mut system = system();
        assert!(system.overlay().is_none());
        system.track_gray(texture(), 0.0).unwrap();
        let overlay = system.overlay().unwrap();
        assert_eq!(overlay.dimensions(), (128, 96));
        assert!(overlay.pixels().any(|pixel| *pixel == *BLUE));
    }

    #[test]
    fn shutdown_returns_keyframe_trajectory() {
        let mut system = system();
        for i in 0..4 {
            system.track_gray(texture(), i as f64).unwrap();
        }
        let trajectory = system.shutdown();
        assert_eq!(trajectory.len(), 1);
        assert_eq!(trajectory[0].0, 0);
        assert_eq!(trajectory[0].1, Isometry3::identity());
    }
}
