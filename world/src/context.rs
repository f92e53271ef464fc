use std::{num::NonZeroUsize, sync::Arc};

use dreamflap_core::{Action, Frame, CONTEXT_LEN, FRAME_LEN};

use crate::buffer::RollingBuffer;

// CONTEXT_LEN is a non-zero compile-time constant.
const CAPACITY: NonZeroUsize = match NonZeroUsize::new(CONTEXT_LEN) {
    Some(capacity) => capacity,
    None => panic!("context length must be non-zero"),
};

/// Rolling window of the last `T` frames and the actions taken at them.
///
/// Frames are held behind [`Arc`] so rolling only moves handles; a reader
/// that cloned a frame handle keeps a complete frame regardless of later
/// rolls.
#[derive(Clone, Debug, PartialEq)]
pub struct TemporalContext {
    frames: RollingBuffer<Arc<Frame>>,
    actions: RollingBuffer<Action>,
}

impl TemporalContext {
    /// `T` zero frames paired with `T` no-op actions.
    #[must_use]
    pub fn zeroed() -> Self {
        Self {
            frames: RollingBuffer::filled(CAPACITY, Arc::new(Frame::zeroed())),
            actions: RollingBuffer::filled(CAPACITY, Action::Noop),
        }
    }

    /// Builds a context from exactly `T` frames and `T` actions.
    pub(crate) fn from_parts(frames: Vec<Frame>, actions: Vec<Action>) -> Option<Self> {
        if frames.len() != CONTEXT_LEN || actions.len() != CONTEXT_LEN {
            return None;
        }
        Some(Self {
            frames: RollingBuffer::from_vec(frames.into_iter().map(Arc::new).collect())?,
            actions: RollingBuffer::from_vec(actions)?,
        })
    }

    /// Number of frames held; always `T`.
    #[must_use]
    pub fn len(&self) -> usize {
        self.frames.capacity()
    }

    /// Always `false`; the window is created full.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Most recent frame.
    #[must_use]
    pub fn newest_frame(&self) -> &Arc<Frame> {
        self.frames.newest()
    }

    /// Frames oldest-first.
    pub fn frames(&self) -> impl Iterator<Item = &Frame> {
        self.frames.iter().map(|frame| frame.as_ref())
    }

    /// Actions oldest-first.
    #[must_use]
    pub fn actions(&self) -> &[Action] {
        self.actions.as_slice()
    }

    /// Copies the frames into one `[T * C, H, W]` buffer.
    #[must_use]
    pub fn stacked_frames(&self) -> Vec<f32> {
        let mut stacked = Vec::with_capacity(CONTEXT_LEN * FRAME_LEN);
        for frame in self.frames() {
            stacked.extend_from_slice(frame.as_slice());
        }
        stacked
    }

    /// Copy of the context for conditioning a step whose input is `action`.
    ///
    /// The newest action slot is overwritten with `action` in the copy only.
    pub(crate) fn conditioning(&self, action: Action) -> (Vec<f32>, Vec<Action>) {
        let mut actions = self.actions().to_vec();
        if let Some(newest) = actions.last_mut() {
            *newest = action;
        }
        (self.stacked_frames(), actions)
    }

    /// Records `action` as the input taken at the newest frame.
    pub(crate) fn record_action(&mut self, action: Action) {
        self.actions.replace_newest(action);
    }

    /// Appends a frame and the action paired with it, evicting the oldest.
    pub(crate) fn append(&mut self, frame: Arc<Frame>, action: Action) {
        self.frames.push(frame);
        self.actions.push(action);
    }
}

impl Default for TemporalContext {
    fn default() -> Self {
        Self::zeroed()
    }
}
