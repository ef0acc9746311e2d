//! Tracker configuration, built once at startup and passed by reference.
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    pub pyramid: PyramidConfig,
    pub candidates: CandidateConfig,
    pub alignment: AlignmentConfig,
    pub keyframes: KeyframeConfig,
    /// Sliding-window capacity C.
    pub window_capacity: usize,
    pub failure_policy: FailurePolicy,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            pyramid: PyramidConfig::default(),
            candidates: CandidateConfig::default(),
            alignment: AlignmentConfig::default(),
            keyframes: KeyframeConfig::default(),
            window_capacity: 10,
            failure_policy: FailurePolicy::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PyramidConfig {
    /// Number of levels L, level 0 being the full resolution.
    pub levels: usize,
}

impl Default for PyramidConfig {
    fn default() -> Self {
        Self { levels: 5 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CandidateConfig {
    /// Minimum gradient magnitude, in intensity units per pixel.
    pub gradient_threshold: f32,
    /// Bucket edge at level 0 in pixels; halved per level down to 2.
    pub bucket_size: u32,
    pub max_per_level: usize,
    /// Fewer candidates than this at any level is degenerate.
    pub min_per_level: usize,
    /// Pixels closer than this to the border are never selected.
    pub border: u32,
    /// Inverse depth assigned when nothing better is known.
    pub prior_inverse_depth: f64,
}

impl Default for CandidateConfig {
    fn default() -> Self {
        Self {
            gradient_threshold: 5.0,
            bucket_size: 8,
            max_per_level: 2000,
            min_per_level: 12,
            border: 2,
            prior_inverse_depth: 1.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlignmentConfig {
    pub max_iterations: usize,
    /// Relative cost reduction below which a level is converged.
    pub epsilon: f64,
    /// Huber threshold on the photometric residual (intensity units).
    pub huber_delta: f64,
    pub initial_damping: f64,
    /// Damping above this ends a level without further attempts.
    pub max_damping: f64,
    /// Fewer valid residuals than this at any level is degenerate.
    pub min_valid_residuals: usize,
    /// Seed each alignment with the previous relative motion.
    pub constant_velocity: bool,
}

impl Default for AlignmentConfig {
    fn default() -> Self {
        Self {
            max_iterations: 50,
            epsilon: 1e-4,
            huber_delta: 10.0,
            initial_damping: 1e-4,
            max_damping: 1e6,
            min_valid_residuals: 12,
            constant_velocity: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeyframeConfig {
    /// Promote when fewer than this share of the reference candidates track.
    pub min_tracked_ratio: f64,
    /// Rotation angle since the last keyframe, radians.
    pub max_rotation: f64,
    /// Translation norm since the last keyframe, scene units.
    pub max_translation: f64,
}

impl Default for KeyframeConfig {
    fn default() -> Self {
        Self {
            min_tracked_ratio: 0.7,
            max_rotation: 0.15,
            max_translation: 0.2,
        }
    }
}

/// What the tracker does with a frame whose alignment failed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Keep the frame and assume it did not move.
    #[default]
    IdentityMotion,
    /// Drop the frame, the reference stays in place.
    SkipFrame,
    /// Assume no motion and promote the frame to a fresh keyframe.
    ResetKeyframe,
}

impl TrackerConfig {
    /// Reads a JSON configuration file; missing fields take their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let data = fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read {}: {e}", path.display())))?;
        Self::from_json(&data)
    }

    pub fn from_json(data: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(data).map_err(|e| Error::Config(format!("bad config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        fn ensure(ok: bool, msg: &str) -> Result<()> {
            if ok {
                Ok(())
            } else {
                Err(Error::Config(msg.to_string()))
            }
        }

        ensure(
            (1..=16).contains(&self.pyramid.levels),
            "pyramid.levels must be within 1..=16",
        )?;
        ensure(self.window_capacity >= 1, "window_capacity must be at least 1")?;

        let c = &self.candidates;
        ensure(
            c.gradient_threshold >= 0.0,
            "candidates.gradient_threshold must be non-negative",
        )?;
        ensure(c.bucket_size >= 1, "candidates.bucket_size must be at least 1")?;
        ensure(
            c.max_per_level >= c.min_per_level && c.max_per_level > 0,
            "candidates.max_per_level must be positive and >= min_per_level",
        )?;
        ensure(
            c.prior_inverse_depth > 0.0 && c.prior_inverse_depth.is_finite(),
            "candidates.prior_inverse_depth must be positive",
        )?;

        let a = &self.alignment;
        ensure(a.max_iterations >= 1, "alignment.max_iterations must be at least 1")?;
        ensure(a.epsilon > 0.0, "alignment.epsilon must be positive")?;
        ensure(a.huber_delta > 0.0, "alignment.huber_delta must be positive")?;
        ensure(
            a.initial_damping >= 0.0 && a.max_damping > a.initial_damping,
            "alignment damping range is empty",
        )?;

        let k = &self.keyframes;
        ensure(
            (0.0..=1.0).contains(&k.min_tracked_ratio),
            "keyframes.min_tracked_ratio must be within [0, 1]",
        )?;
        ensure(
            k.max_rotation > 0.0 && k.max_translation > 0.0,
            "keyframe motion bounds must be positive",
        )?;
        Ok(())
    }
}
