use std::path::Path;

use crate::error::{VisionError, VisionResult};
use crate::frame::Frame;

use super::{FileSource, FrameSource};

/// Default stride: one frame per second of 30 fps video.
pub const DEFAULT_SAMPLE_STRIDE: u32 = 30;

/// A frame selected by the sampler, tagged with its index in the full stream.
#[derive(Debug)]
pub struct SampledFrame {
    pub index: u64,
    pub frame: Frame,
}

/// Drives a `FrameSource` at a fixed stride.
///
/// Every frame advances the index; only frames with `index % stride == 0` are
/// yielded. Iteration ends at end of stream, or after yielding the first error.
/// The source is released exactly once: when iteration ends, or when the
/// sampler is dropped mid-stream.
pub struct FrameSampler<S: FrameSource> {
    source: S,
    stride: u64,
    next_index: u64,
    sampled: u64,
    finished: bool,
}

impl FrameSampler<FileSource> {
    /// Open a local video file for sampling.
    pub fn open<P: AsRef<Path>>(path: P, stride: u32) -> VisionResult<Self> {
        check_stride(stride)?;
        FrameSampler::new(FileSource::open(path)?, stride)
    }
}

impl<S: FrameSource> FrameSampler<S> {
    pub fn new(source: S, stride: u32) -> VisionResult<Self> {
        if let Err(err) = check_stride(stride) {
            let mut source = source;
            source.release();
            return Err(err);
        }
        Ok(Self {
            source,
            stride: u64::from(stride),
            next_index: 0,
            sampled: 0,
            finished: false,
        })
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.source.dimensions()
    }

    /// Frames consumed from the source so far, sampled or not.
    pub fn frames_read(&self) -> u64 {
        self.next_index
    }

    /// Frames yielded so far.
    pub fn frames_sampled(&self) -> u64 {
        self.sampled
    }

    fn finish(&mut self) {
        if !self.finished {
            self.finished = true;
            self.source.release();
        }
    }

    fn advance(&mut self) -> VisionResult<Option<SampledFrame>> {
        loop {
            let index = self.next_index;
            if index % self.stride == 0 {
                let Some(frame) = self.source.read_frame()? else {
                    return Ok(None);
                };
                self.next_index += 1;
                self.sampled += 1;
                return Ok(Some(SampledFrame { index, frame }));
            }
            if !self.source.skip_frame()? {
                return Ok(None);
            }
            self.next_index += 1;
        }
    }
}

impl<S: FrameSource> Iterator for FrameSampler<S> {
    type Item = VisionResult<SampledFrame>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        match self.advance() {
            Ok(Some(sampled)) => Some(Ok(sampled)),
            Ok(None) => {
                self.finish();
                None
            }
            Err(err) => {
                self.finish();
                Some(Err(err))
            }
        }
    }
}

impl<S: FrameSource> Drop for FrameSampler<S> {
    fn drop(&mut self) {
        self.finish();
    }
}

fn check_stride(stride: u32) -> VisionResult<()> {
    if stride == 0 {
        return Err(VisionError::invalid_input("sample stride must be >= 1"));
    }
    Ok(())
}
