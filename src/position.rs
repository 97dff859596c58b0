//! Coarse spatial zones.
//!
//! A frame is cut into a 3x3 grid at 30% and 70% of each dimension. Points
//! exactly on a cut line belong to the middle band; only strict inequalities
//! move a point into an outer band. Centers outside the frame are classified
//! with the same thresholds, without clamping.

use serde::{Deserialize, Serialize};
use std::fmt;

// Cut lines in tenths of the frame extent. Compared as `value * 10` against
// `extent * tenths` in f64 so a point exactly on a cut line stays in the middle.
const NEAR_EDGE_TENTHS: f64 = 3.0;
const FAR_EDGE_TENTHS: f64 = 7.0;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PositionZone {
    #[serde(rename = "top-left")]
    TopLeft,
    #[serde(rename = "top")]
    Top,
    #[serde(rename = "top-right")]
    TopRight,
    #[serde(rename = "centre-left")]
    CentreLeft,
    #[serde(rename = "centre")]
    Centre,
    #[serde(rename = "centre-right")]
    CentreRight,
    #[serde(rename = "bottom-left")]
    BottomLeft,
    #[serde(rename = "bottom")]
    Bottom,
    #[serde(rename = "bottom-right")]
    BottomRight,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Band {
    Near,
    Middle,
    Far,
}

fn band(value: f32, extent: u32) -> Band {
    let scaled = f64::from(value) * 10.0;
    let extent = f64::from(extent);
    if scaled < extent * NEAR_EDGE_TENTHS {
        Band::Near
    } else if scaled > extent * FAR_EDGE_TENTHS {
        Band::Far
    } else {
        Band::Middle
    }
}

impl PositionZone {
    pub const ALL: [PositionZone; 9] = [
        PositionZone::TopLeft,
        PositionZone::Top,
        PositionZone::TopRight,
        PositionZone::CentreLeft,
        PositionZone::Centre,
        PositionZone::CentreRight,
        PositionZone::BottomLeft,
        PositionZone::Bottom,
        PositionZone::BottomRight,
    ];

    /// Classify a point against frame dimensions (`width`, `height` > 0).
    pub fn classify(center_x: f32, center_y: f32, width: u32, height: u32) -> Self {
        let horizontal = band(center_x, width);
        let vertical = band(center_y, height);
        match (vertical, horizontal) {
            (Band::Near, Band::Near) => PositionZone::TopLeft,
            (Band::Near, Band::Middle) => PositionZone::Top,
            (Band::Near, Band::Far) => PositionZone::TopRight,
            (Band::Middle, Band::Near) => PositionZone::CentreLeft,
            (Band::Middle, Band::Middle) => PositionZone::Centre,
            (Band::Middle, Band::Far) => PositionZone::CentreRight,
            (Band::Far, Band::Near) => PositionZone::BottomLeft,
            (Band::Far, Band::Middle) => PositionZone::Bottom,
            (Band::Far, Band::Far) => PositionZone::BottomRight,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PositionZone::TopLeft => "top-left",
            PositionZone::Top => "top",
            PositionZone::TopRight => "top-right",
            PositionZone::CentreLeft => "centre-left",
            PositionZone::Centre => "centre",
            PositionZone::CentreRight => "centre-right",
            PositionZone::BottomLeft => "bottom-left",
            PositionZone::Bottom => "bottom",
            PositionZone::BottomRight => "bottom-right",
        }
    }
}

impl fmt::Display for PositionZone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
