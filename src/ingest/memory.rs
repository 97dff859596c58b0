use std::collections::VecDeque;

use crate::error::{VisionError, VisionResult};
use crate::frame::Frame;

use super::FrameSource;

/// Frame source over frames already held in memory.
pub struct MemorySource {
    frames: VecDeque<Frame>,
    width: u32,
    height: u32,
    released: bool,
}

impl MemorySource {
    /// All frames must share the first frame's dimensions.
    pub fn new(frames: Vec<Frame>) -> VisionResult<Self> {
        let (width, height) = frames
            .first()
            .map(Frame::dimensions)
            .ok_or_else(|| VisionError::SourceUnavailable("video contains no frames".into()))?;
        if frames.iter().any(|f| f.dimensions() != (width, height)) {
            return Err(VisionError::invalid_input(
                "all frames of a video must share the same dimensions",
            ));
        }
        Ok(Self {
            frames: frames.into(),
            width,
            height,
            released: false,
        })
    }

    /// `count` black frames of the given size.
    pub fn blank(count: usize, width: u32, height: u32) -> Self {
        Self {
            frames: (0..count).map(|_| Frame::blank(width, height)).collect(),
            width,
            height,
            released: false,
        }
    }

    pub fn remaining(&self) -> usize {
        self.frames.len()
    }
}

impl FrameSource for MemorySource {
    fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn read_frame(&mut self) -> VisionResult<Option<Frame>> {
        if self.released {
            return Ok(None);
        }
        Ok(self.frames.pop_front())
    }

    fn release(&mut self) {
        self.released = true;
        self.frames.clear();
    }
}
