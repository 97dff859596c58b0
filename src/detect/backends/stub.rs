use std::collections::VecDeque;
use std::path::Path;

use anyhow::{Context, Result};

use crate::detect::backend::DetectorBackend;
use crate::detect::result::Detection;
use crate::frame::Frame;

/// Stub backend for tests and demos.
///
/// Replays a script: the Nth call to `detect` returns the Nth entry. Once the
/// script is exhausted every call returns no detections.
#[derive(Clone, Debug, Default)]
pub struct StubBackend {
    script: VecDeque<Vec<Detection>>,
    calls: u64,
}

impl StubBackend {
    /// Backend that never detects anything.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn scripted(script: Vec<Vec<Detection>>) -> Self {
        Self {
            script: script.into(),
            calls: 0,
        }
    }

    /// Load a script from a JSON file holding an array of per-call detection arrays.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read stub script {}", path.display()))?;
        let script: Vec<Vec<Detection>> = serde_json::from_str(&raw)
            .with_context(|| format!("invalid stub script {}", path.display()))?;
        Ok(Self::scripted(script))
    }

    /// Number of `detect` calls served so far.
    pub fn calls(&self) -> u64 {
        self.calls
    }
}

impl DetectorBackend for StubBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn detect(&mut self, _frame: &Frame) -> Result<Vec<Detection>> {
        self.calls += 1;
        Ok(self.script.pop_front().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::BoundingBox;
    use std::io::Write;

    #[test]
    fn replays_script_then_goes_quiet() {
        let person = Detection::new("person", 0.9, BoundingBox::new(0.0, 0.0, 10.0, 10.0));
        let mut backend = StubBackend::scripted(vec![vec![person.clone()], vec![]]);
        let frame = Frame::blank(4, 4);

        assert_eq!(backend.detect(&frame).unwrap(), vec![person]);
        assert!(backend.detect(&frame).unwrap().is_empty());
        assert!(backend.detect(&frame).unwrap().is_empty());
        assert_eq!(backend.calls(), 3);
    }

    #[test]
    fn loads_script_from_json() {
        let mut file = tempfile::NamedTempFile::new().expect("temp script");
        let json = r#"[
            [{"label": "dog", "confidence": 0.7, "bbox": {"x1": 1.0, "y1": 2.0, "x2": 3.0, "y2": 4.0}, "class_index": 16}],
            []
        ]"#;
        file.write_all(json.as_bytes()).expect("write script");

        let mut backend = StubBackend::from_json_file(file.path()).expect("load script");
        let first = backend.detect(&Frame::blank(4, 4)).unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].label, "dog");
        assert_eq!(first[0].class_index, 16);
        assert_eq!(first[0].center(), (2.0, 3.0));
    }

    #[test]
    fn rejects_malformed_script() {
        let mut file = tempfile::NamedTempFile::new().expect("temp script");
        file.write_all(b"{\"not\": \"a script\"}").expect("write");
        assert!(StubBackend::from_json_file(file.path()).is_err());
    }
}
