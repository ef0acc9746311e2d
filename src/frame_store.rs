use std::collections::VecDeque;
use std::sync::Arc;

use crate::{
    error::{Error, Result},
    frame::{Frame, FrameId},
};

/// Sliding window over the most recent frames.
///
/// The window is the owner of every frame it holds. A frame promoted to
/// keyframe is shared with the keyframe list, so evicting it from the window
/// only drops the window's handle.
#[derive(Debug)]
pub struct FrameStore {
    capacity: usize,
    frames: VecDeque<Arc<Frame>>,
}

impl FrameStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            frames: VecDeque::with_capacity(capacity + 1),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Appends `frame`; ids must increase strictly.
    ///
    /// The window may hold `capacity + 1` frames until [`FrameStore::evict`] runs.
    pub fn ingest(&mut self, frame: Frame) -> Result<Arc<Frame>> {
        if let Some(latest) = self.latest() {
            if frame.id() <= latest.id() {
                return Err(Error::ContractViolation(format!(
                    "frame {} ingested after frame {}",
                    frame.id(),
                    latest.id()
                )));
            }
        }
        if self.frames.len() > self.capacity {
            return Err(Error::ContractViolation(format!(
                "window already holds {} frames, evict before ingesting",
                self.frames.len()
            )));
        }
        let frame = Arc::new(frame);
        self.frames.push_back(Arc::clone(&frame));
        Ok(frame)
    }

    /// Removes the oldest frame once the window holds more than `capacity`.
    pub fn evict(&mut self) -> Option<Arc<Frame>> {
        if self.frames.len() <= self.capacity {
            return None;
        }
        let evicted = self.frames.pop_front()?;
        log::debug!(
            "evicted frame {} from the window (keyframe: {})",
            evicted.id(),
            evicted.is_keyframe()
        );
        Some(evicted)
    }

    pub fn latest(&self) -> Option<&Arc<Frame>> {
        self.frames.back()
    }

    pub fn oldest(&self) -> Option<&Arc<Frame>> {
        self.frames.front()
    }

    pub fn get(&self, id: FrameId) -> Option<&Arc<Frame>> {
        // ids are sorted
        self.frames
            .binary_search_by_key(&id, |frame| frame.id())
            .ok()
            .map(|index| &self.frames[index])
    }

    pub fn contains(&self, id: FrameId) -> bool {
        self.get(id).is_some()
    }

    pub fn ids(&self) -> Vec<FrameId> {
        self.frames.iter().map(|frame| frame.id()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Frame>> {
        self.frames.iter()
    }
}
