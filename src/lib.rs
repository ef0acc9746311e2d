//! Monocular direct visual odometry.
//!
//! Frames are tracked against their predecessor by minimizing the
//! photometric error of sparse high-gradient pixels over an image pyramid.

pub mod algorithms;
pub mod camera;
pub mod config;
pub mod dataset;
pub mod error;
pub mod frame;
pub mod frame_store;
pub mod keyframes;
pub mod system;
pub mod tracker;

pub use algorithms::alignment::{DirectAligner, PoseEstimate};
pub use camera::CameraIntrinsics;
pub use config::{FailurePolicy, TrackerConfig};
pub use dataset::ImageSequence;
pub use error::{Error, Result};
pub use frame::{Frame, FrameId};
pub use frame_store::FrameStore;
pub use keyframes::{KeyframeManager, PromotionReason};
pub use system::System;
pub use tracker::{Tracker, TrackingReport, TrackingState};
