//! Local video file source.
//!
//! `FileSource` decodes frames from a local video file in-memory. Decoding is
//! provided by FFmpeg behind the `ingest-file-ffmpeg` feature; without it every
//! open fails with `SourceUnavailable`.
//!
//! The file source only accepts local paths. URL schemes are rejected so that
//! an uploaded name can never make the decoder fetch remote content.

use std::path::Path;

use crate::error::{VisionError, VisionResult};
use crate::frame::Frame;

#[cfg(feature = "ingest-file-ffmpeg")]
use super::file_ffmpeg::FfmpegFileSource;
use super::FrameSource;

/// Message returned to clients when an uploaded video cannot be opened.
pub const UNOPENABLE_VIDEO: &str = "Could not open video file";

/// Local file frame source.
pub struct FileSource {
    backend: FileBackend,
}

enum FileBackend {
    #[cfg(feature = "ingest-file-ffmpeg")]
    Ffmpeg(FfmpegFileSource),
    #[cfg(not(feature = "ingest-file-ffmpeg"))]
    Unavailable(std::convert::Infallible),
}

impl FileSource {
    pub fn open<P: AsRef<Path>>(path: P) -> VisionResult<Self> {
        let path = path.as_ref();
        if !is_local_file_path(path) {
            return Err(VisionError::SourceUnavailable(
                "file ingestion only supports local paths (no URL schemes)".into(),
            ));
        }
        #[cfg(feature = "ingest-file-ffmpeg")]
        {
            let source = FfmpegFileSource::open(path).map_err(|err| {
                log::warn!("FileSource: failed to open {}: {:#}", path.display(), err);
                VisionError::SourceUnavailable(UNOPENABLE_VIDEO.into())
            })?;
            Ok(Self {
                backend: FileBackend::Ffmpeg(source),
            })
        }
        #[cfg(not(feature = "ingest-file-ffmpeg"))]
        {
            log::warn!(
                "FileSource: cannot open {} (built without ingest-file-ffmpeg)",
                path.display()
            );
            Err(VisionError::SourceUnavailable(UNOPENABLE_VIDEO.into()))
        }
    }
}

impl FrameSource for FileSource {
    fn dimensions(&self) -> (u32, u32) {
        match &self.backend {
            #[cfg(feature = "ingest-file-ffmpeg")]
            FileBackend::Ffmpeg(source) => source.dimensions(),
            #[cfg(not(feature = "ingest-file-ffmpeg"))]
            FileBackend::Unavailable(never) => match *never {},
        }
    }

    fn read_frame(&mut self) -> VisionResult<Option<Frame>> {
        match &mut self.backend {
            #[cfg(feature = "ingest-file-ffmpeg")]
            FileBackend::Ffmpeg(source) => source.read_frame(),
            #[cfg(not(feature = "ingest-file-ffmpeg"))]
            FileBackend::Unavailable(never) => match *never {},
        }
    }

    fn skip_frame(&mut self) -> VisionResult<bool> {
        match &mut self.backend {
            #[cfg(feature = "ingest-file-ffmpeg")]
            FileBackend::Ffmpeg(source) => source.skip_frame(),
            #[cfg(not(feature = "ingest-file-ffmpeg"))]
            FileBackend::Unavailable(never) => match *never {},
        }
    }

    fn release(&mut self) {
        match &mut self.backend {
            #[cfg(feature = "ingest-file-ffmpeg")]
            FileBackend::Ffmpeg(source) => source.release(),
            #[cfg(not(feature = "ingest-file-ffmpeg"))]
            FileBackend::Unavailable(never) => match *never {},
        }
    }
}

fn is_local_file_path(path: &Path) -> bool {
    let text = path.to_string_lossy();
    !text.trim().is_empty() && !text.contains("://")
}
