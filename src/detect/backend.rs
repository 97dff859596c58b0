use anyhow::Result;

use crate::detect::result::Detection;
use crate::frame::Frame;

/// Detector backend trait.
///
/// A backend is the black-box model: one decoded frame in, an ordered list of
/// detections out. Ordering is only meaningful within a single call.
///
/// `detect` takes `&mut self`, so a backend instance never serves two frames at
/// once. Sharing across requests goes through [`crate::detect::DetectorPool`].
pub trait DetectorBackend: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Run detection on a frame. Coordinates are in the frame's pixel space.
    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>>;

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}
