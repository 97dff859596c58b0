//! VIOR: visual object reporting.
//!
//! Turns object detections into position zones, per-label object identities
//! and label-grouped reports, for single images and sampled video.
//!
//! # Flow
//!
//! 1. A `FrameSource` yields decoded frames; `FrameSampler` keeps every Nth.
//! 2. A `DetectorPool` runs a `DetectorBackend` on each sampled frame.
//! 3. `PositionZone::classify` maps each detection center to one of nine zones.
//! 4. `IdentityResolver` merges nearby same-label detections into tracks
//!    (video only).
//! 5. `Report` groups the result by label.
//!
//! # Module Structure
//!
//! - `frame`: decoded RGB frames and image decoding
//! - `ingest`: frame sources (local files, in-memory) and the stride sampler
//! - `detect`: detection types, backends, YOLOv8 decoding, the detector pool
//! - `position`, `tracker`, `report`: the core classification pipeline
//! - `pipeline`: image and video orchestration
//! - `api`: HTTP upload surface
//! - `config`: service configuration

pub mod api;
pub mod config;
pub mod detect;
pub mod error;
pub mod frame;
pub mod ingest;
pub mod pipeline;
pub mod position;
pub mod report;
pub mod tracker;

pub use config::{DetectorSettings, ViorConfig};
pub use detect::{BoundingBox, Detection, DetectorBackend, DetectorPool, StubBackend};
#[cfg(feature = "backend-tract")]
pub use detect::TractBackend;
pub use error::{VisionError, VisionResult};
pub use frame::Frame;
pub use ingest::{FileSource, FrameSampler, FrameSource, MemorySource, SampledFrame};
pub use pipeline::{Pipeline, VideoRun};
pub use position::PositionZone;
pub use report::{Report, ReportEntry};
pub use tracker::{IdentityResolver, Resolution, Track, TrackStore};
