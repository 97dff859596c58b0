//! Label-grouped reports.
//!
//! Labels are ordered lexicographically and entries within a label by the
//! numeric suffix of `object_id`, so identical runs serialize identically.
//! Confidences are rounded to three decimals on emission.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::detect::Detection;
use crate::position::PositionZone;
use crate::tracker::TrackStore;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReportEntry {
    pub object_id: String,
    pub position: PositionZone,
    pub confidence: f64,
    #[serde(skip)]
    sequence: u32,
}

impl ReportEntry {
    fn new(object_id: String, sequence: u32, position: PositionZone, confidence: f32) -> Self {
        Self {
            object_id,
            position,
            confidence: round_confidence(confidence),
            sequence,
        }
    }
}

/// Mapping from label to that label's entries.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Report {
    groups: BTreeMap<String, Vec<ReportEntry>>,
}

impl Report {
    /// Video mode: one entry per finalized track.
    pub fn from_tracks(store: &TrackStore) -> Self {
        let mut report = Report::default();
        for track in store {
            report.push(
                &track.label,
                ReportEntry::new(
                    track.object_id.clone(),
                    track.sequence,
                    track.position,
                    track.confidence,
                ),
            );
        }
        report.sort();
        report
    }

    /// Image mode: every detection becomes its own entry, numbered per label in
    /// detector order. Nothing is merged, however close two detections are.
    pub fn from_detections(detections: &[Detection], width: u32, height: u32) -> Self {
        let mut counters: HashMap<&str, u32> = HashMap::new();
        let mut report = Report::default();
        for detection in detections {
            let counter = counters.entry(detection.label.as_str()).or_insert(0);
            *counter += 1;
            let (cx, cy) = detection.center();
            report.push(
                &detection.label,
                ReportEntry::new(
                    format!("{}_{}", detection.label, counter),
                    *counter,
                    PositionZone::classify(cx, cy, width, height),
                    detection.confidence,
                ),
            );
        }
        report.sort();
        report
    }

    fn push(&mut self, label: &str, entry: ReportEntry) {
        self.groups.entry(label.to_string()).or_default().push(entry);
    }

    fn sort(&mut self) {
        for entries in self.groups.values_mut() {
            entries.sort_by_key(|entry| entry.sequence);
        }
    }

    pub fn get(&self, label: &str) -> Option<&[ReportEntry]> {
        self.groups.get(label).map(Vec::as_slice)
    }

    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.groups.keys().map(String::as_str)
    }

    /// Total entries across all labels.
    pub fn len(&self) -> usize {
        self.groups.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}

fn round_confidence(confidence: f32) -> f64 {
    (f64::from(confidence) * 1000.0).round() / 1000.0
}
