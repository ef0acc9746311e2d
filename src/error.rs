//! Error taxonomy of the tracking core.
//!
//! Setup failures (`Config`, `Dataset`, I/O) are fatal for a run, tracking
//! failures are reported per frame and never abort the pipeline.

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Incompatible resolution, pyramid mismatch or invalid option value
    #[error("configuration error: {0}")]
    Config(String),

    /// Missing, unreadable or too small image sequence
    #[error("dataset error: {0}")]
    Dataset(String),

    /// Not enough texture (candidates or valid residuals) to constrain a pose
    #[error("tracking degenerate at level {level}: {found} usable points, {required} required")]
    TrackingDegenerate {
        level: usize,
        found: usize,
        required: usize,
    },

    /// The refined pose explains the target worse than the initial hypothesis
    #[error("tracking diverged: cost rose from {initial_cost:.4} to {final_cost:.4}")]
    TrackingDiverged { initial_cost: f64, final_cost: f64 },

    /// Caller broke a precondition of the core API
    #[error("contract violation: {0}")]
    ContractViolation(String),

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Tracking failures can be absorbed by a fallback policy, everything else
    /// ends the run.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::TrackingDegenerate { .. } | Self::TrackingDiverged { .. }
        )
    }
}
