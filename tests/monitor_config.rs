use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use tempfile::NamedTempFile;

use headcount::config::{MonitorConfig, Sensitivity};
use headcount::detect::{ExecutionTarget, OutputLayout, OutputOrder};
use headcount::ingest::{CameraId, Resolution};

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "HEADCOUNT_CONFIG",
        "HEADCOUNT_API_ADDR",
        "HEADCOUNT_CAMERA",
        "HEADCOUNT_RESOLUTION",
        "HEADCOUNT_FRAME_RATE",
        "HEADCOUNT_MODEL",
        "HEADCOUNT_SENSITIVITY",
        "HEADCOUNT_LOG_CAPACITY",
    ] {
        std::env::remove_var(key);
    }
}

#[test]
fn defaults_without_file_or_env() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let cfg = MonitorConfig::load().expect("load defaults");

    assert_eq!(cfg.api_addr, "127.0.0.1:5000");
    assert_eq!(cfg.stream.capture.camera, CameraId::Index(0));
    assert_eq!(cfg.stream.capture.resolution, Resolution::new(640, 480));
    assert_eq!(cfg.stream.capture.frame_rate, 30);
    assert_eq!(cfg.stream.sensitivity, Sensitivity::Medium);
    assert!((cfg.stream.confidence_threshold - 0.5).abs() < 1e-6);
    assert!((cfg.detection.nms_threshold - 0.4).abs() < 1e-6);
    assert!(cfg.stream.logging_enabled);
    assert_eq!(cfg.stream.log_frequency_seconds, 60);
    assert_eq!(cfg.log_capacity, 1000);
    assert_eq!(cfg.history_limit, 1000);
    assert_eq!(cfg.stream.jpeg_quality, 90);
    assert!(cfg.detection.model.is_none());
}

#[test]
fn loads_toml_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    let toml = r#"
        [api]
        addr = "0.0.0.0:8080"

        [camera]
        id = "/dev/video2"
        resolution = "1280x720"
        frame_rate = 15
        reconnect_interval_ms = 2500

        [detection]
        model = "/opt/models/person.onnx"
        input_width = 320
        input_height = 320
        layout = "anchorless"
        output_order = "channels_first"
        execution_target = "gpu"
        sensitivity = "high"
        nms_threshold = 0.45
        infer_every = 2
        max_staleness_ms = 250

        [logging]
        enabled = false
        frequency_seconds = 30
        log_events = false
        capacity = 5000

        [stream]
        jpeg_quality = 75
        show_fps = false
        history_limit = 200
    "#;
    std::io::Write::write_all(&mut file, toml.as_bytes()).expect("write config");

    std::env::set_var("HEADCOUNT_CONFIG", file.path());
    std::env::set_var("HEADCOUNT_CAMERA", "stub://lobby");
    std::env::set_var("HEADCOUNT_FRAME_RATE", "10");

    let cfg = MonitorConfig::load().expect("load config");

    assert_eq!(cfg.api_addr, "0.0.0.0:8080");
    assert_eq!(cfg.stream.capture.camera, CameraId::Synthetic("lobby".into()));
    assert_eq!(cfg.stream.capture.resolution, Resolution::new(1280, 720));
    assert_eq!(cfg.stream.capture.frame_rate, 10);
    assert_eq!(cfg.stream.reconnect_interval, Duration::from_millis(2500));
    assert_eq!(cfg.detection.model, Some(PathBuf::from("/opt/models/person.onnx")));
    assert_eq!((cfg.detection.input_width, cfg.detection.input_height), (320, 320));
    assert_eq!(cfg.detection.layout, OutputLayout::Anchorless);
    assert_eq!(cfg.detection.output_order, OutputOrder::ChannelsFirst);
    assert_eq!(cfg.detection.execution_target, ExecutionTarget::Gpu);
    assert_eq!(cfg.stream.sensitivity, Sensitivity::High);
    assert!((cfg.stream.confidence_threshold - 0.7).abs() < 1e-6);
    assert_eq!(cfg.detection.skip.infer_every, 2);
    assert_eq!(cfg.detection.skip.max_staleness, Duration::from_millis(250));
    assert!(!cfg.stream.logging_enabled);
    assert_eq!(cfg.stream.log_frequency_seconds, 30);
    assert!(!cfg.stream.log_events);
    assert!(cfg.stream.log_errors);
    assert_eq!(cfg.log_capacity, 5000);
    assert_eq!(cfg.stream.jpeg_quality, 75);
    assert!(!cfg.stream.show_fps);
    assert_eq!(cfg.history_limit, 200);

    let spec = cfg.backend_spec();
    assert_eq!(spec.input_size, (320, 320));
    let detector = cfg.detector_settings();
    assert!((detector.confidence_threshold - 0.7).abs() < 1e-6);

    clear_env();
}

#[test]
fn loads_json_file_by_extension() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = tempfile::Builder::new()
        .suffix(".json")
        .tempfile()
        .expect("temp config");
    let json = r#"{
        "camera": { "id": 1, "resolution": "320x240" },
        "detection": { "sensitivity": 1, "confidence_threshold": 0.42 }
    }"#;
    std::io::Write::write_all(&mut file, json.as_bytes()).expect("write config");

    let cfg = MonitorConfig::load_from(Some(file.path())).expect("load config");

    assert_eq!(cfg.stream.capture.camera, CameraId::Index(1));
    assert_eq!(cfg.stream.capture.resolution, Resolution::new(320, 240));
    assert_eq!(cfg.stream.sensitivity, Sensitivity::Low);
    assert!((cfg.stream.confidence_threshold - 0.42).abs() < 1e-6);
}

#[test]
fn env_sensitivity_sets_preset_threshold() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("HEADCOUNT_SENSITIVITY", "low");
    let cfg = MonitorConfig::load().expect("load config");
    assert_eq!(cfg.stream.sensitivity, Sensitivity::Low);
    assert!((cfg.stream.confidence_threshold - 0.3).abs() < 1e-6);

    clear_env();
}

#[test]
fn rejects_invalid_values() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("HEADCOUNT_LOG_CAPACITY", "50");
    assert!(MonitorConfig::load().is_err());
    clear_env();

    std::env::set_var("HEADCOUNT_RESOLUTION", "wide");
    assert!(MonitorConfig::load().is_err());
    clear_env();

    std::env::set_var("HEADCOUNT_CAMERA", "-1");
    assert!(MonitorConfig::load().is_err());
    clear_env();

    std::env::set_var("HEADCOUNT_FRAME_RATE", "0");
    assert!(MonitorConfig::load().is_err());
    clear_env();

    std::env::set_var("HEADCOUNT_API_ADDR", "not-an-addr");
    assert!(MonitorConfig::load().is_err());
    clear_env();
}

#[test]
fn rejects_unknown_file_keys() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    std::io::Write::write_all(&mut file, b"[camera]\nzoom = 2\n").expect("write config");
    let err = MonitorConfig::load_from(Some(file.path())).unwrap_err();
    assert!(err.to_string().contains("invalid config file"));
}
