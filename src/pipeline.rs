//! Detection-to-report orchestration.
//!
//! Video runs move through `Init -> Sampling -> (Detect -> Resolve)* -> Finalize
//! -> Done`, where `Resolve` classifies each detection's zone and merges it into
//! the run's tracks. Any failure moves to `Error`, and the frame source is
//! released before the error propagates (the sampler owns it and releases on
//! drop). Image runs detect once and emit one entry per detection.
//!
//! Every call owns its sampler, resolver and report. The only shared object is
//! the detector pool.

use std::path::Path;
use std::sync::Arc;

use crate::detect::DetectorPool;
use crate::error::VisionResult;
use crate::frame::Frame;
use crate::ingest::{FrameSampler, FrameSource, DEFAULT_SAMPLE_STRIDE};
use crate::report::Report;
use crate::tracker::IdentityResolver;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunState {
    Init,
    Sampling,
    Detect,
    Resolve,
    Finalize,
    Done,
    Error,
}

/// Counters for one finished video run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct VideoRun {
    pub frames_read: u64,
    pub frames_sampled: u64,
    pub detections: u64,
    pub tracks: usize,
}

#[derive(Clone)]
pub struct Pipeline {
    detectors: Arc<DetectorPool>,
    sample_stride: u32,
}

impl Pipeline {
    pub fn new(detectors: Arc<DetectorPool>) -> Self {
        Self {
            detectors,
            sample_stride: DEFAULT_SAMPLE_STRIDE,
        }
    }

    /// Default stride for video runs that do not pass one.
    pub fn with_sample_stride(mut self, stride: u32) -> Self {
        self.sample_stride = stride;
        self
    }

    pub fn sample_stride(&self) -> u32 {
        self.sample_stride
    }

    pub fn detectors(&self) -> &DetectorPool {
        &self.detectors
    }

    /// Image mode: detect once, classify, emit. No merging.
    pub fn process_image(&self, frame: &Frame) -> VisionResult<Report> {
        let detections = self.detectors.detect(frame)?;
        log::debug!(
            "image {}x{}: {} detections",
            frame.width,
            frame.height,
            detections.len()
        );
        Ok(Report::from_detections(
            &detections,
            frame.width,
            frame.height,
        ))
    }

    /// Decode an encoded image and run image mode on it.
    pub fn process_image_bytes(&self, bytes: &[u8]) -> VisionResult<Report> {
        let frame = Frame::decode_image(bytes)?;
        self.process_image(&frame)
    }

    /// Video mode over a local file.
    pub fn process_video_file<P: AsRef<Path>>(
        &self,
        path: P,
        stride: Option<u32>,
    ) -> VisionResult<Report> {
        let sampler = FrameSampler::open(path, stride.unwrap_or(self.sample_stride))?;
        self.run_video(sampler).map(|(report, _)| report)
    }

    /// Video mode over any frame source.
    pub fn process_video<S: FrameSource>(
        &self,
        source: S,
        stride: Option<u32>,
    ) -> VisionResult<Report> {
        self.process_video_with_stats(source, stride)
            .map(|(report, _)| report)
    }

    pub fn process_video_with_stats<S: FrameSource>(
        &self,
        source: S,
        stride: Option<u32>,
    ) -> VisionResult<(Report, VideoRun)> {
        let sampler = FrameSampler::new(source, stride.unwrap_or(self.sample_stride))?;
        self.run_video(sampler)
    }

    fn run_video<S: FrameSource>(
        &self,
        mut sampler: FrameSampler<S>,
    ) -> VisionResult<(Report, VideoRun)> {
        let mut state = RunState::Init;
        let (width, height) = sampler.dimensions();
        let mut resolver = IdentityResolver::new();
        let mut detections_seen = 0u64;
        log::debug!("video run {:?}: {}x{}", state, width, height);

        state = RunState::Sampling;
        for sampled in sampler.by_ref() {
            let sampled = sampled.inspect_err(|err| {
                log::warn!("video run {:?} -> {:?}: {}", state, RunState::Error, err);
            })?;

            state = RunState::Detect;
            let detections = self.detectors.detect(&sampled.frame).inspect_err(|err| {
                log::warn!("video run {:?} -> {:?}: {}", state, RunState::Error, err);
            })?;
            detections_seen += detections.len() as u64;

            state = RunState::Resolve;
            resolver.observe_frame(&detections, width, height);
            log::trace!(
                "frame {}: {} detections, {} tracks",
                sampled.index,
                detections.len(),
                resolver.tracks().len()
            );
            state = RunState::Sampling;
        }

        state = RunState::Finalize;
        log::debug!("video run {:?}: {} tracks", state, resolver.tracks().len());
        let store = resolver.finish();
        let report = Report::from_tracks(&store);
        let run = VideoRun {
            frames_read: sampler.frames_read(),
            frames_sampled: sampler.frames_sampled(),
            detections: detections_seen,
            tracks: store.len(),
        };
        drop(sampler);

        state = RunState::Done;
        log::info!(
            "video run {:?}: {} frames read, {} sampled, {} detections, {} tracks",
            state,
            run.frames_read,
            run.frames_sampled,
            run.detections,
            run.tracks
        );
        Ok((report, run))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::{BoundingBox, Detection, StubBackend};
    use crate::error::VisionError;
    use crate::ingest::MemorySource;
    use crate::position::PositionZone;

    fn det(label: &str, cx: f32, cy: f32, confidence: f32) -> Detection {
        Detection::new(label, confidence, BoundingBox::around(cx, cy, 20.0, 20.0))
    }

    fn pipeline(script: Vec<Vec<Detection>>) -> Pipeline {
        Pipeline::new(Arc::new(DetectorPool::single(StubBackend::scripted(script))))
    }

    #[test]
    fn image_mode_reports_every_detection() {
        let p = pipeline(vec![vec![
            det("person", 100.0, 100.0, 0.9),
            det("person", 105.0, 100.0, 0.8),
        ]]);
        let report = p.process_image(&Frame::blank(640, 480)).unwrap();
        assert_eq!(report.get("person").unwrap().len(), 2);
    }

    #[test]
    fn video_mode_detects_only_sampled_frames() {
        // three sampled frames out of 61; the script has one entry per detect call
        let p = pipeline(vec![
            vec![det("person", 100.0, 100.0, 0.6)],
            vec![det("person", 110.0, 105.0, 0.8)],
            vec![det("person", 500.0, 400.0, 0.7)],
        ]);
        let (report, run) = p
            .process_video_with_stats(MemorySource::blank(61, 640, 480), Some(30))
            .unwrap();

        assert_eq!(run.frames_read, 61);
        assert_eq!(run.frames_sampled, 3);
        assert_eq!(run.detections, 3);
        assert_eq!(run.tracks, 2);
        let people = report.get("person").unwrap();
        assert_eq!(people[0].position, PositionZone::TopLeft);
        assert_eq!(people[1].position, PositionZone::BottomRight);
    }

    #[test]
    fn detector_failure_aborts_run() {
        struct Broken;
        impl crate::detect::DetectorBackend for Broken {
            fn name(&self) -> &'static str {
                "broken"
            }
            fn detect(&mut self, _frame: &Frame) -> anyhow::Result<Vec<Detection>> {
                anyhow::bail!("gpu fell off")
            }
        }
        let p = Pipeline::new(Arc::new(DetectorPool::single(Broken)));
        let err = p
            .process_video(MemorySource::blank(5, 8, 8), None)
            .unwrap_err();
        assert!(matches!(err, VisionError::ProcessingFailure(_)));
    }

    #[test]
    fn zero_stride_is_invalid_input() {
        let p = pipeline(Vec::new());
        let err = p
            .process_video(MemorySource::blank(5, 8, 8), Some(0))
            .unwrap_err();
        assert_eq!(err.status_code(), 400);
    }

    #[test]
    fn undecodable_image_bytes_are_invalid_input() {
        let p = pipeline(Vec::new());
        let err = p.process_image_bytes(b"\x00\x01garbage").unwrap_err();
        assert!(matches!(err, VisionError::InvalidInput(_)));
    }
}
