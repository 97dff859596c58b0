//! Cross-frame identity resolution.
//!
//! `IdentityResolver` folds the detections of sampled video frames into
//! deduplicated tracks. Matching is deliberately simple:
//!
//! - only tracks with the same label are candidates;
//! - a candidate matches when its stored center lies within 10% of the frame
//!   width on x AND 10% of the frame height on y (axis-aligned box test, not
//!   radial distance, not IoU);
//! - candidates are scanned in insertion order and the first match wins, even
//!   when a later track would be closer.
//!
//! Two nearby same-label objects inside that window merge into one track, and
//! an object that jumps past the window between samples splits into two.
//! Both are accepted behaviour.
//!
//! Cost is O(existing same-label tracks) per observation; there is no spatial
//! index.

use std::collections::HashMap;

use crate::detect::Detection;
use crate::position::PositionZone;

/// Match window: strictly less than one tenth of the frame extent per axis.
fn within_tenth(a: f32, b: f32, extent: u32) -> bool {
    (f64::from(a) - f64::from(b)).abs() * 10.0 < f64::from(extent)
}

/// A deduplicated object instance accumulated over one video run.
///
/// `position`, `confidence` and `center` always come from the same detection:
/// the highest-confidence one merged so far.
#[derive(Clone, Debug, PartialEq)]
pub struct Track {
    pub object_id: String,
    pub label: String,
    /// 1-based per-label sequence number, the numeric suffix of `object_id`.
    pub sequence: u32,
    pub position: PositionZone,
    pub confidence: f32,
    pub center: (f32, f32),
}

impl Track {
    fn is_near(&self, center: (f32, f32), width: u32, height: u32) -> bool {
        within_tenth(self.center.0, center.0, width)
            && within_tenth(self.center.1, center.1, height)
    }
}

/// Insertion-ordered tracks of one finished run. Read-only.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TrackStore {
    tracks: Vec<Track>,
}

impl TrackStore {
    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn get(&self, object_id: &str) -> Option<&Track> {
        self.tracks.iter().find(|track| track.object_id == object_id)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Track> {
        self.tracks.iter()
    }
}

impl<'a> IntoIterator for &'a TrackStore {
    type Item = &'a Track;
    type IntoIter = std::slice::Iter<'a, Track>;

    fn into_iter(self) -> Self::IntoIter {
        self.tracks.iter()
    }
}

/// What `observe` did with a detection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Resolution {
    /// A new track was opened under this id.
    Created(String),
    /// Merged into an existing track and replaced its winning detection.
    Updated(String),
    /// Merged into an existing track with no better confidence; track unchanged.
    Unchanged(String),
}

impl Resolution {
    pub fn object_id(&self) -> &str {
        match self {
            Resolution::Created(id) | Resolution::Updated(id) | Resolution::Unchanged(id) => id,
        }
    }
}

/// Per-run tracker state: the growing track store plus per-label counters.
///
/// One resolver belongs to exactly one processing run; nothing is shared
/// between runs.
#[derive(Debug, Default)]
pub struct IdentityResolver {
    store: TrackStore,
    counters: HashMap<String, u32>,
}

impl IdentityResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one detection from a `width` x `height` frame into the store.
    pub fn observe(&mut self, detection: &Detection, width: u32, height: u32) -> Resolution {
        let center = detection.center();
        let position = PositionZone::classify(center.0, center.1, width, height);

        let matched = self
            .store
            .tracks
            .iter_mut()
            .find(|track| track.label == detection.label && track.is_near(center, width, height));

        if let Some(track) = matched {
            if detection.confidence > track.confidence {
                track.position = position;
                track.confidence = detection.confidence;
                track.center = center;
                return Resolution::Updated(track.object_id.clone());
            }
            return Resolution::Unchanged(track.object_id.clone());
        }

        let counter = self.counters.entry(detection.label.clone()).or_insert(0);
        *counter += 1;
        let object_id = format!("{}_{}", detection.label, counter);
        self.store.tracks.push(Track {
            object_id: object_id.clone(),
            label: detection.label.clone(),
            sequence: *counter,
            position,
            confidence: detection.confidence,
            center,
        });
        Resolution::Created(object_id)
    }

    /// Fold every detection of one frame, in order.
    pub fn observe_frame(&mut self, detections: &[Detection], width: u32, height: u32) {
        for detection in detections {
            let resolution = self.observe(detection, width, height);
            log::trace!("{} -> {:?}", detection.label, resolution);
        }
    }

    pub fn tracks(&self) -> &[Track] {
        self.store.tracks()
    }

    /// Freeze the run and hand back its tracks.
    pub fn finish(self) -> TrackStore {
        self.store
    }
}
