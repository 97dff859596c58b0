use std::sync::Mutex;

use tempfile::NamedTempFile;

use vior::config::ViorConfig;

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "VIOR_CONFIG",
        "VIOR_API_ADDR",
        "VIOR_BACKEND",
        "VIOR_MODEL_PATH",
        "VIOR_STUB_SCRIPT",
        "VIOR_LABELS",
        "VIOR_SAMPLE_STRIDE",
        "VIOR_POOL_SIZE",
        "VIOR_MAX_UPLOAD_BYTES",
        "VIOR_MAX_CONNECTIONS",
    ] {
        std::env::remove_var(key);
    }
}

#[test]
fn defaults_without_file_or_env() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let cfg = ViorConfig::load().expect("load defaults");
    assert_eq!(cfg.api_addr, "127.0.0.1:8000");
    assert_eq!(cfg.sample_stride, 30);
    assert_eq!(cfg.max_upload_bytes, 50 * 1024 * 1024);
    assert_eq!(cfg.max_connections, 16);
    assert_eq!(cfg.detector.backend, "stub");
    assert_eq!(cfg.detector.pool_size, 1);
    assert_eq!((cfg.detector.input_width, cfg.detector.input_height), (640, 640));
    assert!(cfg.detector.labels.is_empty());
}

#[test]
fn loads_config_from_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    let json = r#"{
        "api": { "addr": "0.0.0.0:9000", "max_upload_bytes": 1048576 },
        "video": { "sample_stride": 15 },
        "detector": {
            "backend": "stub",
            "confidence_threshold": 0.4,
            "iou_threshold": 0.5,
            "labels": ["person", "car"],
            "pool_size": 2
        }
    }"#;
    std::io::Write::write_all(&mut file, json.as_bytes()).expect("write config");

    std::env::set_var("VIOR_CONFIG", file.path());
    std::env::set_var("VIOR_SAMPLE_STRIDE", "10");
    std::env::set_var("VIOR_LABELS", "dog, cat");

    let cfg = ViorConfig::load().expect("load config");

    assert_eq!(cfg.api_addr, "0.0.0.0:9000");
    assert_eq!(cfg.max_upload_bytes, 1_048_576);
    assert_eq!(cfg.sample_stride, 10);
    assert_eq!(cfg.detector.confidence_threshold, 0.4);
    assert_eq!(cfg.detector.iou_threshold, 0.5);
    assert_eq!(cfg.detector.labels, vec!["dog", "cat"]);
    assert_eq!(cfg.detector.pool_size, 2);

    clear_env();
}

#[test]
fn rejects_zero_stride_and_bad_numbers() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("VIOR_SAMPLE_STRIDE", "0");
    assert!(ViorConfig::load().is_err());

    std::env::set_var("VIOR_SAMPLE_STRIDE", "thirty");
    assert!(ViorConfig::load().is_err());
    std::env::remove_var("VIOR_SAMPLE_STRIDE");

    std::env::set_var("VIOR_POOL_SIZE", "0");
    assert!(ViorConfig::load().is_err());

    clear_env();
}

#[test]
fn rejects_unknown_backend_and_missing_file() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("VIOR_BACKEND", "darknet");
    assert!(ViorConfig::load().is_err());
    std::env::remove_var("VIOR_BACKEND");

    std::env::set_var("VIOR_CONFIG", "/nonexistent/vior.json");
    assert!(ViorConfig::load().is_err());

    clear_env();
}

#[test]
fn stub_script_builds_a_scripted_pool() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut script = NamedTempFile::new().expect("temp script");
    let json = r#"[[{"label":"person","confidence":0.9,"bbox":{"x1":0,"y1":0,"x2":10,"y2":10}}]]"#;
    std::io::Write::write_all(&mut script, json.as_bytes()).expect("write script");
    std::env::set_var("VIOR_STUB_SCRIPT", script.path());
    std::env::set_var("VIOR_POOL_SIZE", "1");

    let cfg = ViorConfig::load().expect("load config");
    let pool = cfg.detector.build_pool().expect("build pool");
    let first = pool.detect(&vior::Frame::blank(32, 32)).unwrap();
    assert_eq!(first.len(), 1);
    assert_eq!(first[0].label, "person");
    assert!(pool.detect(&vior::Frame::blank(32, 32)).unwrap().is_empty());

    clear_env();
}
