//! Keyframe promotion policy and the append-only keyframe list.
use std::sync::Arc;

use nalgebra::Isometry3;

use crate::{
    algorithms::{alignment::PoseEstimate, se3::motion_magnitude},
    config::KeyframeConfig,
    error::{Error, Result},
    frame::{Frame, FrameId},
    frame_store::FrameStore,
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum KeyframeState {
    #[default]
    NoKeyframe,
    HasKeyframe,
}

/// Why a frame became a keyframe.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PromotionReason {
    /// The first tracked frame anchors the trajectory.
    First,
    /// Too few reference candidates survived the warp.
    LowTrackedRatio(f64),
    /// The camera moved too far from the active keyframe.
    Motion { rotation: f64, translation: f64 },
    /// Tracking failed and the failure policy asked for a fresh reference.
    Reset,
}

/// Keeps keyframes alive independently of the sliding window.
#[derive(Debug)]
pub struct KeyframeManager {
    config: KeyframeConfig,
    keyframes: Vec<Arc<Frame>>,
}

impl KeyframeManager {
    pub fn new(config: &KeyframeConfig) -> Self {
        Self {
            config: config.clone(),
            keyframes: Vec::new(),
        }
    }

    pub fn state(&self) -> KeyframeState {
        if self.keyframes.is_empty() {
            KeyframeState::NoKeyframe
        } else {
            KeyframeState::HasKeyframe
        }
    }

    /// The most recently promoted keyframe.
    pub fn active(&self) -> Option<&Arc<Frame>> {
        self.keyframes.last()
    }

    pub fn keyframes(&self) -> &[Arc<Frame>] {
        &self.keyframes
    }

    pub fn len(&self) -> usize {
        self.keyframes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keyframes.is_empty()
    }

    /// Ids and camera-to-world poses of all keyframes, oldest first.
    pub fn trajectory(&self) -> Vec<(FrameId, Isometry3<f64>)> {
        self.keyframes
            .iter()
            .map(|frame| (frame.id(), *frame.world_pose()))
            .collect()
    }

    /// Decides whether a frame tracked with `estimate`, now at `world_pose`,
    /// should become a keyframe.
    ///
    /// Invalid estimates never promote on their own; the tracker's failure
    /// policy handles them.
    pub fn evaluate(&self, estimate: &PoseEstimate, world_pose: &Isometry3<f64>) -> Option<PromotionReason> {
        let Some(active) = self.active() else {
            return Some(PromotionReason::First);
        };
        if !estimate.valid {
            return None;
        }
        if estimate.tracked_ratio < self.config.min_tracked_ratio {
            return Some(PromotionReason::LowTrackedRatio(estimate.tracked_ratio));
        }
        let since_keyframe = active.world_pose().inverse() * world_pose;
        let (rotation, translation) = motion_magnitude(&since_keyframe);
        if rotation > self.config.max_rotation || translation > self.config.max_translation {
            return Some(PromotionReason::Motion {
                rotation,
                translation,
            });
        }
        None
    }

    /// Promotes frame `id`, which must be in the active window.
    pub fn promote(&mut self, store: &FrameStore, id: FrameId, reason: PromotionReason) -> Result<&Arc<Frame>> {
        let frame = store.get(id).ok_or_else(|| {
            Error::ContractViolation(format!(
                "frame {id} is not in the active window {:?}",
                store.ids()
            ))
        })?;
        if frame.is_keyframe() {
            return Err(Error::ContractViolation(format!(
                "frame {id} is already a keyframe"
            )));
        }
        frame.mark_keyframe();
        log::info!("frame {id} promoted to keyframe #{} ({reason:?})", self.keyframes.len());
        self.keyframes.push(Arc::clone(frame));
        Ok(&self.keyframes[self.keyframes.len() - 1])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::GrayImage;
    use nalgebra::{Translation3, UnitQuaternion, Vector3};

    fn frame(id: FrameId, world: Isometry3<f64>) -> Frame {
        let mut frame = Frame::from_pyramid(id, 0.0, vec![GrayImage::new(16, 16)]);
        frame.set_pose(Isometry3::identity(), world);
        frame
    }

    fn tracked(ratio: f64) -> PoseEstimate {
        PoseEstimate {
            tracked_ratio: ratio,
            ..PoseEstimate::origin()
        }
    }

    fn manager() -> KeyframeManager {
        KeyframeManager::new(&KeyframeConfig::default())
    }

    #[test]
    fn first_frame_is_promoted() {
        let manager = manager();
        assert_eq!(manager.state(), KeyframeState::NoKeyframe);
        assert_eq!(
            manager.evaluate(&tracked(1.0), &Isometry3::identity()),
            Some(PromotionReason::First)
        );
    }

    #[test]
    fn promotion_policy() {
        let mut store = FrameStore::new(4);
        store.ingest(frame(0, Isometry3::identity())).unwrap();
        let mut manager = manager();
        manager.promote(&store, 0, PromotionReason::First).unwrap();
        assert_eq!(manager.state(), KeyframeState::HasKeyframe);

        let still = Isometry3::identity();
        assert_eq!(manager.evaluate(&tracked(0.95), &still), None);
        assert!(matches!(
            manager.evaluate(&tracked(0.5), &still),
            Some(PromotionReason::LowTrackedRatio(_))
        ));

        let moved = Isometry3::from_parts(Translation3::new(0.0, 0.0, 0.5), UnitQuaternion::identity());
        assert!(matches!(
            manager.evaluate(&tracked(1.0), &moved),
            Some(PromotionReason::Motion { .. })
        ));

        let turned = Isometry3::from_parts(
            Translation3::identity(),
            UnitQuaternion::from_scaled_axis(Vector3::new(0.0, 0.3, 0.0)),
        );
        assert!(manager.evaluate(&tracked(1.0), &turned).is_some());

        assert_eq!(
            manager.evaluate(&PoseEstimate::fallback(Isometry3::identity()), &moved),
            None
        );
    }

    #[test]
    fn promoting_outside_window_is_rejected() {
        let mut store = FrameStore::new(2);
        store.ingest(frame(3, Isometry3::identity())).unwrap();
        let mut manager = manager();
        let err = manager.promote(&store, 7, PromotionReason::First).unwrap_err();
        assert!(matches!(err, Error::ContractViolation(_)));
        assert!(manager.is_empty());
    }

    #[test]
    fn double_promotion_is_rejected() {
        let mut store = FrameStore::new(2);
        store.ingest(frame(0, Isometry3::identity())).unwrap();
        let mut manager = manager();
        manager.promote(&store, 0, PromotionReason::First).unwrap();
        assert!(manager.promote(&store, 0, PromotionReason::Reset).is_err());
        assert_eq!(manager.len(), 1);
    }

    #[test]
    fn keyframes_survive_eviction() {
        let mut store = FrameStore::new(1);
        store.ingest(frame(0, Isometry3::translation(1.0, 2.0, 3.0))).unwrap();
        let mut manager = manager();
        manager.promote(&store, 0, PromotionReason::First).unwrap();
        store.ingest(frame(1, Isometry3::identity())).unwrap();
        let evicted = store.evict().unwrap();
        drop(evicted);

        assert!(!store.contains(0));
        let keyframe = manager.active().unwrap();
        assert_eq!(keyframe.id(), 0);
        assert!(keyframe.is_keyframe());
        assert_eq!(keyframe.image(0).dimensions(), (16, 16));
        assert_eq!(manager.trajectory()[0].1.translation.vector, Vector3::new(1.0, 2.0, 3.0));
    }
}
