use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use tempfile::NamedTempFile;

use opencam::config::OpencamConfig;

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "OPENCAM_CONFIG",
        "OPENCAM_CAMERA_INDEX",
        "OPENCAM_MODEL_DIR",
        "OPENCAM_CONFIDENCE",
        "OPENCAM_NMS",
        "OPENCAM_TICK_MS",
        "OPENCAM_RECONNECT_MS",
        "OPENCAM_SNAPSHOT_PATH",
    ] {
        std::env::remove_var(key);
    }
}

#[test]
fn loads_config_from_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    let json = r#"{
        "camera_index": 1,
        "tick_ms": 50,
        "capture": { "width": 640, "height": 480, "fps": 15 },
        "detection": { "confidence_threshold": 0.6, "input_width": 608, "input_height": 608 },
        "model": { "dir": "/var/lib/opencam", "allow_download": false },
        "snapshot": { "path": "/tmp/from-file.jpg", "every": 3 }
    }"#;
    std::io::Write::write_all(&mut file, json.as_bytes()).expect("write config");

    std::env::set_var("OPENCAM_CONFIG", file.path());
    std::env::set_var("OPENCAM_CAMERA_INDEX", "2");
    std::env::set_var("OPENCAM_NMS", "0.3");
    std::env::set_var("OPENCAM_SNAPSHOT_PATH", "/tmp/from-env.jpg");

    let cfg = OpencamConfig::load().expect("load config");
    clear_env();

    assert_eq!(cfg.camera_index, 2);
    assert_eq!(cfg.tick, Duration::from_millis(50));
    assert_eq!((cfg.capture.width, cfg.capture.height, cfg.capture.fps), (640, 480, 15));
    assert_eq!(cfg.detection.params.confidence_threshold, 0.6);
    assert_eq!(cfg.detection.params.nms_threshold, 0.3);
    assert_eq!(cfg.input_size(), (608, 608));
    assert!(!cfg.model.allow_download);
    assert_eq!(cfg.snapshot.path, PathBuf::from("/tmp/from-env.jpg"));
    assert_eq!(cfg.snapshot.every, 3);
    assert_eq!(
        cfg.model_files().weights.path,
        PathBuf::from("/var/lib/opencam/yolov3.weights")
    );
}

#[test]
fn defaults_apply_without_file() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let cfg = OpencamConfig::load().expect("load defaults");
    assert_eq!(cfg.camera_index, 0);
    assert_eq!(cfg.tick, Duration::from_millis(30));
    assert_eq!(cfg.detection.params.confidence_threshold, 0.5);
    assert_eq!(cfg.detection.params.nms_threshold, 0.4);
    assert_eq!(cfg.input_size(), (416, 416));
    assert_eq!(cfg.max_read_failures, 3);
}

#[test]
fn model_dir_env_moves_every_model_file() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("OPENCAM_MODEL_DIR", "/opt/yolo");
    let cfg = OpencamConfig::load().expect("load config");
    clear_env();

    let files = cfg.model_files();
    assert_eq!(files.weights.path, PathBuf::from("/opt/yolo/yolov3.weights"));
    assert_eq!(files.config.path, PathBuf::from("/opt/yolo/yolov3.cfg"));
    assert_eq!(files.labels.path, PathBuf::from("/opt/yolo/coco.names"));
}

#[test]
fn rejects_invalid_env_values() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("OPENCAM_CONFIDENCE", "1.5");
    assert!(OpencamConfig::load().is_err());
    clear_env();

    std::env::set_var("OPENCAM_TICK_MS", "soon");
    let err = OpencamConfig::load().expect_err("non-numeric tick");
    assert!(err.to_string().contains("OPENCAM_TICK_MS"), "{}", err);
    clear_env();

    std::env::set_var("OPENCAM_TICK_MS", "0");
    assert!(OpencamConfig::load().is_err());
    clear_env();
}

#[test]
fn missing_config_file_is_an_error() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("OPENCAM_CONFIG", "/nonexistent/opencam.json");
    let err = OpencamConfig::load().expect_err("missing file");
    clear_env();
    assert!(err.to_string().contains("/nonexistent/opencam.json"), "{}", err);
}
