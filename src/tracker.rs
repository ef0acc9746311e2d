use std::sync::Arc;

use image::GrayImage;
use nalgebra::Isometry3;

use crate::{
    algorithms::{
        alignment::{DirectAligner, PoseEstimate},
        candidates::{CandidateSelector, DepthPrior},
        gradient::GradientExtractor,
        pyramid::PyramidBuilder,
    },
    camera::CameraIntrinsics,
    config::{FailurePolicy, TrackerConfig},
    error::{Error, Result},
    frame::{Frame, FrameId},
    frame_store::FrameStore,
    keyframes::{KeyframeManager, PromotionReason},
};

/// Tracking states
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TrackingState {
    #[default]
    NoImagesYet,
    /// The first frame is in, no motion has been estimated yet.
    NotInitialized,
    Ok,
    /// The last alignment failed and a fallback was applied.
    Lost,
}

/// What happened to one incoming image.
#[derive(Debug)]
pub struct TrackingReport {
    pub frame_id: FrameId,
    pub timestamp: f64,
    pub state: TrackingState,
    /// Motion from the reference frame; a fallback estimate is marked invalid.
    pub estimate: PoseEstimate,
    /// The recoverable error behind a fallback, or degenerate candidates on the
    /// first frame.
    pub failure: Option<Error>,
    pub fallback: Option<FailurePolicy>,
    pub promoted: Option<PromotionReason>,
    /// Frame that left the sliding window while this one was ingested.
    pub evicted: Option<FrameId>,
    /// False when the failure policy dropped the frame.
    pub ingested: bool,
}

/// Per-frame pipeline: pyramid, gradients, candidates, alignment against
/// the previous frame, keyframe and window bookkeeping.
pub struct Tracker {
    config: TrackerConfig,
    intrinsics: CameraIntrinsics,
    pyramid: PyramidBuilder,
    gradients: GradientExtractor,
    selector: CandidateSelector,
    aligner: DirectAligner,
    window: FrameStore,
    keyframes: KeyframeManager,
    tracking_state: TrackingState,
    last_tracking_state: TrackingState,
    /// Last estimated reference → current motion, the constant velocity prior.
    last_motion: Isometry3<f64>,
    next_id: FrameId,
}

impl Tracker {
    pub fn new(config: &TrackerConfig, intrinsics: CameraIntrinsics) -> Result<Self> {
        config.validate()?;
        intrinsics.validate()?;
        let aligner = DirectAligner::new(&config.alignment, &intrinsics, config.pyramid.levels)?;
        Ok(Self {
            config: config.clone(),
            intrinsics,
            pyramid: PyramidBuilder::new(&config.pyramid),
            gradients: GradientExtractor::new(),
            selector: CandidateSelector::new(&config.candidates),
            aligner,
            window: FrameStore::new(config.window_capacity),
            keyframes: KeyframeManager::new(&config.keyframes),
            tracking_state: TrackingState::default(),
            last_tracking_state: TrackingState::default(),
            last_motion: Isometry3::identity(),
            next_id: 0,
        })
    }

    pub fn state(&self) -> TrackingState {
        self.tracking_state
    }

    pub fn last_state(&self) -> TrackingState {
        self.last_tracking_state
    }

    pub fn window(&self) -> &FrameStore {
        &self.window
    }

    pub fn keyframes(&self) -> &KeyframeManager {
        &self.keyframes
    }

    pub fn intrinsics(&self) -> &CameraIntrinsics {
        &self.intrinsics
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    /// Tracks one rectified grayscale image.
    ///
    /// Tracking failures are absorbed according to the failure policy and
    /// reported; only setup or contract errors are returned as `Err`.
    pub fn track(&mut self, image: GrayImage, timestamp: f64) -> Result<TrackingReport> {
        let expected = (self.intrinsics.width, self.intrinsics.height);
        if image.dimensions() != expected {
            return Err(Error::Config(format!(
                "image is {}x{}, calibration expects {}x{}",
                image.width(),
                image.height(),
                expected.0,
                expected.1
            )));
        }

        let id = self.next_id;
        self.next_id += 1;
        let frame = Frame::new(id, timestamp, image, &self.pyramid)?;
        self.gradients.extract(&frame);
        log::trace!("ingesting frame {id} at {timestamp:.3}");

        self.last_tracking_state = self.tracking_state;
        match self.window.latest().cloned() {
            None => self.initialize(frame),
            Some(reference) => self.track_against(&reference, frame),
        }
    }

    fn initialize(&mut self, frame: Frame) -> Result<TrackingReport> {
        let failure = self
            .selector
            .select(&frame, self.selector.default_prior())
            .err();
        if let Some(err) = &failure {
            log::warn!("first frame {} has too little texture: {err}", frame.id());
        }
        self.tracking_state = TrackingState::NotInitialized;
        let estimate = PoseEstimate::origin();
        let promoted = self.keyframes.evaluate(&estimate, frame.world_pose());
        self.commit(frame, estimate, failure, None, promoted)
    }

    fn track_against(&mut self, reference: &Arc<Frame>, mut frame: Frame) -> Result<TrackingReport> {
        let initial = if self.config.alignment.constant_velocity {
            self.last_motion
        } else {
            Isometry3::identity()
        };

        let aligned = self
            .selector
            .select(reference, self.selector.default_prior())
            .and_then(|_| self.aligner.align(reference, &frame, &initial));

        match aligned {
            Ok(estimate) => {
                let relative = estimate.transform;
                let world = reference.world_pose() * relative.inverse();
                frame.set_pose(relative, world);
                let prior = DepthPrior::Inherited {
                    reference,
                    transform: &relative,
                    intrinsics: self.aligner.intrinsics(),
                    fallback: self.config.candidates.prior_inverse_depth,
                };
                if let Err(err) = self.selector.select(&frame, prior) {
                    log::debug!("frame {} will be a weak reference: {err}", frame.id());
                }

                self.last_motion = relative;
                self.tracking_state = TrackingState::Ok;
                let promoted = self.keyframes.evaluate(&estimate, &world);
                self.commit(frame, estimate, None, None, promoted)
            }
            Err(err) if err.is_recoverable() => self.recover(reference, frame, err),
            Err(err) => Err(err),
        }
    }

    fn recover(&mut self, reference: &Arc<Frame>, mut frame: Frame, failure: Error) -> Result<TrackingReport> {
        let policy = self.config.failure_policy;
        log::warn!(
            "frame {} lost against frame {}: {failure}; applying {policy:?}",
            frame.id(),
            reference.id()
        );
        self.tracking_state = TrackingState::Lost;
        self.last_motion = Isometry3::identity();
        let estimate = PoseEstimate::fallback(Isometry3::identity());

        if policy == FailurePolicy::SkipFrame {
            return Ok(TrackingReport {
                frame_id: frame.id(),
                timestamp: frame.timestamp(),
                state: self.tracking_state,
                estimate,
                failure: Some(failure),
                fallback: Some(policy),
                promoted: None,
                evicted: None,
                ingested: false,
            });
        }

        frame.set_pose(Isometry3::identity(), *reference.world_pose());
        if let Err(err) = self.selector.select(&frame, self.selector.default_prior()) {
            log::debug!("frame {} will be a weak reference: {err}", frame.id());
        }
        let promoted = (policy == FailurePolicy::ResetKeyframe).then_some(PromotionReason::Reset);
        self.commit(frame, estimate, Some(failure), Some(policy), promoted)
    }

    /// Hands `frame` to the window, promotes it if asked and evicts the oldest entry.
    fn commit(
        &mut self,
        frame: Frame,
        estimate: PoseEstimate,
        failure: Option<Error>,
        fallback: Option<FailurePolicy>,
        promoted: Option<PromotionReason>,
    ) -> Result<TrackingReport> {
        let (frame_id, timestamp) = (frame.id(), frame.timestamp());
        self.window.ingest(frame)?;
        if let Some(reason) = promoted {
            self.keyframes.promote(&self.window, frame_id, reason)?;
        }
        let evicted = self.window.evict().map(|evicted| evicted.id());

        Ok(TrackingReport {
            frame_id,
            timestamp,
            state: self.tracking_state,
            estimate,
            failure,
            fallback,
            promoted,
            evicted,
            ingested: true,
        })
    }
}
