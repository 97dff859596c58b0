use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::detect::{DetectorBackend, DetectorPool, StubBackend};
use crate::ingest::DEFAULT_SAMPLE_STRIDE;

const DEFAULT_API_ADDR: &str = "127.0.0.1:8000";
const DEFAULT_MAX_UPLOAD_BYTES: u64 = 50 * 1024 * 1024;
const DEFAULT_MAX_CONNECTIONS: usize = 16;
const DEFAULT_BACKEND: &str = "stub";
const DEFAULT_INPUT_SIZE: u32 = 640;
const DEFAULT_CONFIDENCE: f32 = 0.25;
const DEFAULT_IOU: f32 = 0.45;
const DEFAULT_POOL_SIZE: usize = 1;
const MAX_POOL_SIZE: usize = 64;

#[derive(Debug, Deserialize, Default)]
struct ViorConfigFile {
    api: Option<ApiConfigFile>,
    video: Option<VideoConfigFile>,
    detector: Option<DetectorConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct ApiConfigFile {
    addr: Option<String>,
    max_upload_bytes: Option<u64>,
    max_connections: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
struct VideoConfigFile {
    sample_stride: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectorConfigFile {
    backend: Option<String>,
    model_path: Option<PathBuf>,
    script_path: Option<PathBuf>,
    input_width: Option<u32>,
    input_height: Option<u32>,
    confidence_threshold: Option<f32>,
    iou_threshold: Option<f32>,
    labels: Option<Vec<String>>,
    pool_size: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct ViorConfig {
    pub api_addr: String,
    pub max_upload_bytes: u64,
    /// Requests served at once; further connections get 503.
    pub max_connections: usize,
    pub sample_stride: u32,
    pub detector: DetectorSettings,
}

/// Which inference engine backs the detector pool, and how it is loaded.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectorSettings {
    pub backend: String,
    pub model_path: Option<PathBuf>,
    /// JSON script for the stub backend; empty detections when unset.
    pub script_path: Option<PathBuf>,
    pub input_width: u32,
    pub input_height: u32,
    pub confidence_threshold: f32,
    pub iou_threshold: f32,
    /// Class names by index. Empty means the COCO-80 list.
    pub labels: Vec<String>,
    pub pool_size: usize,
}

impl Default for ViorConfig {
    fn default() -> Self {
        Self {
            api_addr: DEFAULT_API_ADDR.to_string(),
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            sample_stride: DEFAULT_SAMPLE_STRIDE,
            detector: DetectorSettings::default(),
        }
    }
}

impl Default for DetectorSettings {
    fn default() -> Self {
        Self {
            backend: DEFAULT_BACKEND.to_string(),
            model_path: None,
            script_path: None,
            input_width: DEFAULT_INPUT_SIZE,
            input_height: DEFAULT_INPUT_SIZE,
            confidence_threshold: DEFAULT_CONFIDENCE,
            iou_threshold: DEFAULT_IOU,
            labels: Vec::new(),
            pool_size: DEFAULT_POOL_SIZE,
        }
    }
}

impl ViorConfig {
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("VIOR_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) if !path.trim().is_empty() => Some(read_config_file(Path::new(path))?),
            _ => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: ViorConfigFile) -> Self {
        let defaults = Self::default();
        let api = file.api.unwrap_or_default();
        let detector = file.detector.unwrap_or_default();
        let base = defaults.detector;
        Self {
            api_addr: api.addr.unwrap_or(defaults.api_addr),
            max_upload_bytes: api.max_upload_bytes.unwrap_or(defaults.max_upload_bytes),
            max_connections: api.max_connections.unwrap_or(defaults.max_connections),
            sample_stride: file
                .video
                .and_then(|video| video.sample_stride)
                .unwrap_or(defaults.sample_stride),
            detector: DetectorSettings {
                backend: detector.backend.unwrap_or(base.backend),
                model_path: detector.model_path,
                script_path: detector.script_path,
                input_width: detector.input_width.unwrap_or(base.input_width),
                input_height: detector.input_height.unwrap_or(base.input_height),
                confidence_threshold: detector
                    .confidence_threshold
                    .unwrap_or(base.confidence_threshold),
                iou_threshold: detector.iou_threshold.unwrap_or(base.iou_threshold),
                labels: detector.labels.unwrap_or_default(),
                pool_size: detector.pool_size.unwrap_or(base.pool_size),
            },
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(addr) = std::env::var("VIOR_API_ADDR") {
            if !addr.trim().is_empty() {
                self.api_addr = addr;
            }
        }
        if let Ok(backend) = std::env::var("VIOR_BACKEND") {
            if !backend.trim().is_empty() {
                self.detector.backend = backend.trim().to_string();
            }
        }
        if let Ok(path) = std::env::var("VIOR_MODEL_PATH") {
            if !path.trim().is_empty() {
                self.detector.model_path = Some(PathBuf::from(path));
            }
        }
        if let Ok(path) = std::env::var("VIOR_STUB_SCRIPT") {
            if !path.trim().is_empty() {
                self.detector.script_path = Some(PathBuf::from(path));
            }
        }
        if let Ok(labels) = std::env::var("VIOR_LABELS") {
            let parsed = split_csv(&labels);
            if !parsed.is_empty() {
                self.detector.labels = parsed;
            }
        }
        if let Ok(stride) = std::env::var("VIOR_SAMPLE_STRIDE") {
            self.sample_stride = stride
                .trim()
                .parse()
                .map_err(|_| anyhow!("VIOR_SAMPLE_STRIDE must be a positive integer"))?;
        }
        if let Ok(size) = std::env::var("VIOR_POOL_SIZE") {
            self.detector.pool_size = size
                .trim()
                .parse()
                .map_err(|_| anyhow!("VIOR_POOL_SIZE must be a positive integer"))?;
        }
        if let Ok(bytes) = std::env::var("VIOR_MAX_UPLOAD_BYTES") {
            self.max_upload_bytes = bytes
                .trim()
                .parse()
                .map_err(|_| anyhow!("VIOR_MAX_UPLOAD_BYTES must be an integer number of bytes"))?;
        }
        if let Ok(count) = std::env::var("VIOR_MAX_CONNECTIONS") {
            self.max_connections = count
                .trim()
                .parse()
                .map_err(|_| anyhow!("VIOR_MAX_CONNECTIONS must be a positive integer"))?;
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        if self.sample_stride == 0 {
            return Err(anyhow!("sample stride must be greater than zero"));
        }
        if self.max_upload_bytes == 0 {
            return Err(anyhow!("max upload size must be greater than zero"));
        }
        if self.max_connections == 0 {
            return Err(anyhow!("max connections must be greater than zero"));
        }
        self.detector.validate()
    }
}

impl DetectorSettings {
    fn validate(&mut self) -> Result<()> {
        self.backend = self.backend.to_lowercase();
        match self.backend.as_str() {
            "stub" => {}
            "tract" => {
                if self.model_path.is_none() {
                    return Err(anyhow!("tract backend requires a model path"));
                }
            }
            other => return Err(anyhow!("unknown detector backend '{}'", other)),
        }
        if self.pool_size == 0 || self.pool_size > MAX_POOL_SIZE {
            return Err(anyhow!(
                "detector pool size must be between 1 and {}",
                MAX_POOL_SIZE
            ));
        }
        if self.input_width == 0 || self.input_height == 0 {
            return Err(anyhow!("detector input size must be non-zero"));
        }
        for (name, value) in [
            ("confidence threshold", self.confidence_threshold),
            ("IoU threshold", self.iou_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(anyhow!("{} must be within [0, 1], got {}", name, value));
            }
        }
        Ok(())
    }

    /// Build `pool_size` equivalent backend instances.
    pub fn build_pool(&self) -> Result<DetectorPool> {
        let mut backends: Vec<Box<dyn DetectorBackend>> = Vec::with_capacity(self.pool_size);
        for _ in 0..self.pool_size {
            backends.push(self.build_backend()?);
        }
        let pool = DetectorPool::new(backends)?;
        pool.warm_up().context("detector warm-up failed")?;
        log::info!(
            "detector pool ready: backend={}, instances={}",
            pool.name(),
            pool.len()
        );
        Ok(pool)
    }

    fn build_backend(&self) -> Result<Box<dyn DetectorBackend>> {
        match self.backend.as_str() {
            "stub" => {
                let backend = match &self.script_path {
                    Some(path) => StubBackend::from_json_file(path)?,
                    None => StubBackend::new(),
                };
                Ok(Box::new(backend))
            }
            "tract" => self.build_tract(),
            other => Err(anyhow!("unknown detector backend '{}'", other)),
        }
    }

    #[cfg(feature = "backend-tract")]
    fn build_tract(&self) -> Result<Box<dyn DetectorBackend>> {
        let model_path = self
            .model_path
            .as_ref()
            .ok_or_else(|| anyhow!("tract backend requires a model path"))?;
        let labels = if self.labels.is_empty() {
            crate::detect::labels::coco_labels()
        } else {
            self.labels.clone()
        };
        let backend = crate::detect::TractBackend::new(
            model_path,
            self.input_width,
            self.input_height,
            labels,
        )?
        .with_thresholds(self.confidence_threshold, self.iou_threshold);
        Ok(Box::new(backend))
    }

    #[cfg(not(feature = "backend-tract"))]
    fn build_tract(&self) -> Result<Box<dyn DetectorBackend>> {
        Err(anyhow!(
            "tract backend requested but this build lacks the backend-tract feature"
        ))
    }
}

fn read_config_file(path: &Path) -> Result<ViorConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}

fn split_csv(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|entry| entry.trim())
        .filter(|entry| !entry.is_empty())
        .map(|entry| entry.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_values_fill_missing_fields_with_defaults() {
        let file: ViorConfigFile = serde_json::from_str(
            r#"{"api":{"addr":"0.0.0.0:9000"},"detector":{"pool_size":3,"labels":["cat"]}}"#,
        )
        .unwrap();
        let mut cfg = ViorConfig::from_file(file);
        cfg.validate().unwrap();
        assert_eq!(cfg.api_addr, "0.0.0.0:9000");
        assert_eq!(cfg.max_upload_bytes, DEFAULT_MAX_UPLOAD_BYTES);
        assert_eq!(cfg.max_connections, DEFAULT_MAX_CONNECTIONS);
        assert_eq!(cfg.sample_stride, 30);
        assert_eq!(cfg.detector.pool_size, 3);
        assert_eq!(cfg.detector.labels, vec!["cat".to_string()]);
        assert_eq!(cfg.detector.backend, "stub");
    }

    #[test]
    fn zero_connection_cap_is_rejected() {
        let file: ViorConfigFile =
            serde_json::from_str(r#"{"api":{"max_connections":0}}"#).unwrap();
        let mut cfg = ViorConfig::from_file(file);
        assert!(cfg.validate().is_err());

        let file: ViorConfigFile =
            serde_json::from_str(r#"{"api":{"max_connections":4}}"#).unwrap();
        let mut cfg = ViorConfig::from_file(file);
        cfg.validate().unwrap();
        assert_eq!(cfg.max_connections, 4);
    }

    #[test]
    fn unknown_backend_and_bad_thresholds_are_rejected() {
        let mut settings = DetectorSettings {
            backend: "opencv".into(),
            ..DetectorSettings::default()
        };
        assert!(settings.validate().is_err());

        let mut settings = DetectorSettings {
            confidence_threshold: 1.5,
            ..DetectorSettings::default()
        };
        assert!(settings.validate().is_err());

        let mut settings = DetectorSettings {
            backend: "TRACT".into(),
            ..DetectorSettings::default()
        };
        assert!(settings.validate().is_err(), "tract without model path");
    }

    #[test]
    fn stub_pool_has_requested_size() {
        let settings = DetectorSettings {
            pool_size: 4,
            ..DetectorSettings::default()
        };
        let pool = settings.build_pool().unwrap();
        assert_eq!(pool.len(), 4);
        assert_eq!(pool.name(), "stub");
    }

    #[test]
    fn split_csv_drops_blanks() {
        assert_eq!(split_csv(" a, ,b ,"), vec!["a".to_string(), "b".to_string()]);
    }
}
