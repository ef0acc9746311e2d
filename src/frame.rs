use std::sync::atomic::{AtomicBool, Ordering};

use image::{GrayImage, ImageBuffer, Luma};
use nalgebra::Isometry3;
use once_cell::sync::OnceCell;

use crate::{algorithms::pyramid::PyramidBuilder, error::Result};

/// Monotonic frame identifier, assigned in ingestion order.
pub type FrameId = u64;

/// Single channel float image, used for gradient fields.
pub type GrayF32 = ImageBuffer<Luma<f32>, Vec<f32>>;

/// Gradient fields of one pyramid level, in intensity units per pixel.
#[derive(Debug, Clone)]
pub struct GradientLevel {
    pub gx: GrayF32,
    pub gy: GrayF32,
    pub magnitude: GrayF32,
}

/// Sparse high-gradient pixel used as a photometric residual in alignment.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candidate {
    pub x: u32,
    pub y: u32,
    /// Intensity of the pixel in its own level image.
    pub intensity: f32,
    pub magnitude: f32,
    pub inverse_depth: f64,
}

/// Candidates of every pyramid level, index 0 being full resolution.
pub type CandidateLevels = Vec<Vec<Candidate>>;

/// One ingested image with its pyramid and lazily derived data.
///
/// Gradients and candidates are write-once: the first computation wins and
/// later requests return the stored value. The poses are set by the tracker
/// before the frame is shared with the window.
#[derive(Debug)]
pub struct Frame {
    id: FrameId,
    timestamp: f64,
    pyramid: Vec<GrayImage>,
    pub(crate) gradients: OnceCell<Vec<GradientLevel>>,
    pub(crate) candidates: OnceCell<CandidateLevels>,
    /// Maps reference-frame coordinates into this frame.
    relative_pose: Isometry3<f64>,
    /// Camera to world.
    world_pose: Isometry3<f64>,
    keyframe: AtomicBool,
}

impl Frame {
    pub fn new(id: FrameId, timestamp: f64, image: GrayImage, builder: &PyramidBuilder) -> Result<Self> {
        Ok(Self::from_pyramid(id, timestamp, builder.build(image)?))
    }

    pub(crate) fn from_pyramid(id: FrameId, timestamp: f64, pyramid: Vec<GrayImage>) -> Self {
        Self {
            id,
            timestamp,
            pyramid,
            gradients: OnceCell::new(),
            candidates: OnceCell::new(),
            relative_pose: Isometry3::identity(),
            world_pose: Isometry3::identity(),
            keyframe: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> FrameId {
        self.id
    }

    pub fn timestamp(&self) -> f64 {
        self.timestamp
    }

    pub fn levels(&self) -> usize {
        self.pyramid.len()
    }

    pub fn pyramid(&self) -> &[GrayImage] {
        &self.pyramid
    }

    pub fn image(&self, level: usize) -> &GrayImage {
        &self.pyramid[level]
    }

    /// `None` until the gradient extractor ran on this frame.
    pub fn gradients(&self) -> Option<&[GradientLevel]> {
        self.gradients.get().map(Vec::as_slice)
    }

    /// `None` until the candidate selector ran on this frame.
    pub fn candidates(&self) -> Option<&CandidateLevels> {
        self.candidates.get()
    }

    pub fn has_gradients(&self) -> bool {
        self.gradients.get().is_some()
    }

    pub fn has_candidates(&self) -> bool {
        self.candidates.get().is_some()
    }

    pub fn relative_pose(&self) -> &Isometry3<f64> {
        &self.relative_pose
    }

    pub fn world_pose(&self) -> &Isometry3<f64> {
        &self.world_pose
    }

    /// Sets the motion from the reference frame and the resulting camera-to-world pose.
    pub fn set_pose(&mut self, relative: Isometry3<f64>, world: Isometry3<f64>) {
        self.relative_pose = relative;
        self.world_pose = world;
    }

    pub fn is_keyframe(&self) -> bool {
        self.keyframe.load(Ordering::Acquire)
    }

    pub(crate) fn mark_keyframe(&self) {
        self.keyframe.store(true, Ordering::Release);
    }
}
