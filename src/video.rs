use crate::error::{Error, Result};
use crate::frame::Frame;
use std::collections::VecDeque;

/// Sequential frame decoder.
pub trait VideoSource {
    /// Next frame, `None` once the stream is exhausted.
    fn read(&mut self) -> Result<Option<Frame>>;

    fn fps(&self) -> f64;

    /// Total frame count if the container reports one.
    fn frame_count(&self) -> Option<u64>;
}

/// Sequential frame encoder. Frames arrive in presentation order.
pub trait VideoSink {
    fn write(&mut self, frame: &Frame) -> Result<()>;

    /// Flushes and closes the output. Writing afterwards is an error.
    fn finish(&mut self) -> Result<()>;
}

impl<T: VideoSource + ?Sized> VideoSource for Box<T> {
    fn read(&mut self) -> Result<Option<Frame>> {
        (**self).read()
    }

    fn fps(&self) -> f64 {
        (**self).fps()
    }

    fn frame_count(&self) -> Option<u64> {
        (**self).frame_count()
    }
}

impl<T: VideoSink + ?Sized> VideoSink for Box<T> {
    fn write(&mut self, frame: &Frame) -> Result<()> {
        (**self).write(frame)
    }

    fn finish(&mut self) -> Result<()> {
        (**self).finish()
    }
}

impl<T: VideoSink + ?Sized> VideoSink for &mut T {
    fn write(&mut self, frame: &Frame) -> Result<()> {
        (**self).write(frame)
    }

    fn finish(&mut self) -> Result<()> {
        (**self).finish()
    }
}

/// Plays back frames held in memory.
#[derive(Debug, Clone)]
pub struct MemorySource {
    frames: VecDeque<Frame>,
    fps: f64,
    total: u64,
}

impl MemorySource {
    pub fn new(frames: Vec<Frame>, fps: f64) -> Self {
        let total = frames.len() as u64;

        Self {
            frames: frames.into(),
            fps,
            total,
        }
    }
}

impl VideoSource for MemorySource {
    fn read(&mut self) -> Result<Option<Frame>> {
        Ok(self.frames.pop_front())
    }

    fn fps(&self) -> f64 {
        self.fps
    }

    fn frame_count(&self) -> Option<u64> {
        Some(self.total)
    }
}

/// Collects written frames in memory.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    frames: Vec<Frame>,
    finished: bool,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    #[inline]
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn into_frames(self) -> Vec<Frame> {
        self.frames
    }
}

impl VideoSink for MemorySink {
    fn write(&mut self, frame: &Frame) -> Result<()> {
        if self.finished {
            return Err(Error::Sink("write after finish".into()));
        }

        self.frames.push(frame.clone());
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        self.finished = true;
        Ok(())
    }
}
