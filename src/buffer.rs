use crate::frame::Frame;
use std::collections::VecDeque;

#[derive(Debug, Clone)]
pub struct Buffered {
    pub index: u64,
    pub frame: Frame,
    /// Tracking failed on this frame.
    pub stalled: bool,
}

/// Frames read but not yet compensated, in arrival order. Only ever emptied
/// as a whole, so emission order always matches input order.
#[derive(Debug, Default)]
pub struct FrameBuffer {
    frames: VecDeque<Buffered>,
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn push(&mut self, index: u64, frame: Frame) {
        debug_assert!(self.frames.back().map_or(true, |b| b.index < index));
        self.frames.push_back(Buffered {
            index,
            frame,
            stalled: false,
        });
    }

    /// Flags the newest frame as one tracking failed on.
    #[inline]
    pub fn mark_stalled(&mut self) {
        if let Some(last) = self.frames.back_mut() {
            last.stalled = true;
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Index of the oldest buffered frame.
    #[inline]
    pub fn first_index(&self) -> Option<u64> {
        self.frames.front().map(|b| b.index)
    }

    /// Takes every buffered frame, oldest first, leaving the buffer empty.
    pub fn drain(&mut self) -> impl Iterator<Item = Buffered> + '_ {
        self.frames.drain(..)
    }
}
