//! YOLOv8 head decoding.
//!
//! The detection head emits a `[1, 4 + nc, anchors]` tensor: per anchor a
//! `cx, cy, w, h` box in model-input pixels followed by `nc` class scores.
//! Decoding keeps the best class per anchor, drops anchors under the
//! confidence threshold, rescales boxes into frame pixels, and runs per-class
//! non-max suppression.

use std::cmp::Ordering;

use anyhow::{anyhow, Result};

use crate::detect::result::{BoundingBox, Detection};

const BOX_CHANNELS: usize = 4;

#[derive(Clone, Copy, Debug)]
pub struct DecodeParams {
    pub confidence_threshold: f32,
    pub iou_threshold: f32,
    pub input_width: u32,
    pub input_height: u32,
    pub frame_width: u32,
    pub frame_height: u32,
}

impl DecodeParams {
    fn scale(&self) -> (f32, f32) {
        (
            self.frame_width as f32 / self.input_width as f32,
            self.frame_height as f32 / self.input_height as f32,
        )
    }
}

/// Decode a channel-major prediction buffer of `channels x anchors` floats.
pub fn decode_predictions(
    preds: &[f32],
    channels: usize,
    anchors: usize,
    labels: &[String],
    params: &DecodeParams,
) -> Result<Vec<Detection>> {
    if channels <= BOX_CHANNELS {
        return Err(anyhow!(
            "prediction tensor has {} channels, expected more than {}",
            channels,
            BOX_CHANNELS
        ));
    }
    if preds.len() != channels * anchors {
        return Err(anyhow!(
            "prediction tensor length {} does not match {}x{}",
            preds.len(),
            channels,
            anchors
        ));
    }

    let at = |channel: usize, anchor: usize| preds[channel * anchors + anchor];
    let (sx, sy) = params.scale();
    let fw = params.frame_width as f32;
    let fh = params.frame_height as f32;

    let mut candidates = Vec::new();
    for anchor in 0..anchors {
        let mut best_class = 0usize;
        let mut best_score = f32::NEG_INFINITY;
        for class in 0..channels - BOX_CHANNELS {
            let score = at(BOX_CHANNELS + class, anchor);
            if score > best_score {
                best_score = score;
                best_class = class;
            }
        }
        if !best_score.is_finite() || best_score < params.confidence_threshold {
            continue;
        }

        let cx = at(0, anchor) * sx;
        let cy = at(1, anchor) * sy;
        let w = at(2, anchor) * sx;
        let h = at(3, anchor) * sy;
        let bbox = BoundingBox::new(
            (cx - w / 2.0).clamp(0.0, fw),
            (cy - h / 2.0).clamp(0.0, fh),
            (cx + w / 2.0).clamp(0.0, fw),
            (cy + h / 2.0).clamp(0.0, fh),
        );
        let label = labels
            .get(best_class)
            .cloned()
            .unwrap_or_else(|| format!("class_{}", best_class));
        candidates.push(
            Detection::new(label, best_score.min(1.0), bbox).with_class_index(best_class),
        );
    }

    non_max_suppression(&mut candidates, params.iou_threshold);
    Ok(candidates)
}

/// Greedy per-class NMS. Leaves survivors sorted by descending confidence.
pub fn non_max_suppression(detections: &mut Vec<Detection>, iou_threshold: f32) {
    detections.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(Ordering::Equal)
    });

    let mut kept = 0;
    for index in 0..detections.len() {
        let suppressed = (0..kept).any(|prev| {
            detections[prev].class_index == detections[index].class_index
                && detections[prev].bbox.iou(&detections[index].bbox) > iou_threshold
        });
        if !suppressed {
            detections.swap(kept, index);
            kept += 1;
        }
    }
    detections.truncate(kept);
}
