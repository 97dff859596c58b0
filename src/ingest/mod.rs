//! Frame ingestion sources.
//!
//! This module provides sources of decoded frames for video runs:
//! - Local video files (feature: ingest-file-ffmpeg)
//! - In-memory frame lists (tests, pre-decoded clips)
//!
//! and `FrameSampler`, which drives a source at a fixed stride.
//!
//! A source owns an open decoder handle. `release` frees it; `FrameSampler`
//! guarantees it is called exactly once per source, however the run ends.

pub mod file;
#[cfg(feature = "ingest-file-ffmpeg")]
pub(crate) mod file_ffmpeg;
pub mod memory;
pub mod sampler;

pub use file::FileSource;
pub use memory::MemorySource;
pub use sampler::{FrameSampler, SampledFrame, DEFAULT_SAMPLE_STRIDE};

use crate::error::VisionResult;
use crate::frame::Frame;

/// A finite stream of decoded frames of fixed dimensions.
pub trait FrameSource: Send {
    /// Frame dimensions reported by the source at open time.
    fn dimensions(&self) -> (u32, u32);

    /// Decode the next frame. `Ok(None)` marks normal end of stream.
    fn read_frame(&mut self) -> VisionResult<Option<Frame>>;

    /// Advance past the next frame without producing pixels.
    ///
    /// Returns `false` at end of stream. Sources override this when skipping is
    /// cheaper than a full read.
    fn skip_frame(&mut self) -> VisionResult<bool> {
        Ok(self.read_frame()?.is_some())
    }

    /// Free the underlying decoder handle. Reads after release return end of stream.
    fn release(&mut self) {}
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    fn dimensions(&self) -> (u32, u32) {
        (**self).dimensions()
    }

    fn read_frame(&mut self) -> VisionResult<Option<Frame>> {
        (**self).read_frame()
    }

    fn skip_frame(&mut self) -> VisionResult<bool> {
        (**self).skip_frame()
    }

    fn release(&mut self) {
        (**self).release()
    }
}
