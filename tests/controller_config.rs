use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use tempfile::NamedTempFile;

use stopsign_controller::config::{ControllerConfig, DetectorKind, LogDestination};
use stopsign_controller::detect::ChromaModel;

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "STOPSIGN_CAMERA_DEVICE",
        "STOPSIGN_CAMERA_INDEX",
        "STOPSIGN_MODEL_PATH",
        "STOPSIGN_SERIAL_PORT",
        "STOPSIGN_BAUD_RATE",
        "STOPSIGN_STOP_DURATION_SECS",
        "STOPSIGN_LOG_LEVEL",
        "STOPSIGN_LOG_FILE",
    ] {
        std::env::remove_var(key);
    }
}

fn write_config(raw: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("temp config");
    std::io::Write::write_all(&mut file, raw.as_bytes()).expect("write config");
    file
}

#[test]
fn loads_config_from_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    clear_env();

    let file = write_config(
        r#"
        [camera]
        index = 1
        frame_width = 800
        frame_height = 600
        target_fps = 15
        read_retry_delay_ms = 250

        [detection]
        backend = "chroma"
        model_path = "/etc/stopsign/model.toml"
        scale_factor = 1.2
        min_neighbors = 4

        [serial]
        port = "/dev/ttyACM0"
        baud_rate = 115200

        [control]
        stop_duration_secs = 2

        [logging]
        level = "debug"
        file = "/var/log/stopsignd.log"
        "#,
    );

    std::env::set_var("STOPSIGN_SERIAL_PORT", "/dev/ttyUSB3");
    std::env::set_var("STOPSIGN_STOP_DURATION_SECS", "4.5");

    let cfg = ControllerConfig::load(Some(file.path())).expect("load config");

    assert_eq!(cfg.camera.device_path(), "/dev/video1");
    assert_eq!(cfg.camera.width, 800);
    assert_eq!(cfg.camera.height, 600);
    assert_eq!(cfg.camera.target_fps, 15);
    assert_eq!(cfg.camera.read_retry_delay, Duration::from_millis(250));
    assert_eq!(cfg.detection.backend, DetectorKind::Chroma);
    assert_eq!(cfg.detection.model_path, PathBuf::from("/etc/stopsign/model.toml"));
    assert_eq!(cfg.detection.scale_factor, 1.2);
    assert_eq!(cfg.detection.min_neighbors, 4);
    assert_eq!(cfg.serial.port, "/dev/ttyUSB3");
    assert_eq!(cfg.serial.baud_rate, 115200);
    assert_eq!(cfg.control.stop_duration, Duration::from_millis(4500));
    assert_eq!(cfg.logging.level, log::LevelFilter::Debug);
    assert_eq!(
        cfg.logging.destination,
        LogDestination::File(PathBuf::from("/var/log/stopsignd.log"))
    );

    clear_env();
}

#[test]
fn missing_config_file_is_fatal() {
    let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    clear_env();

    let err = ControllerConfig::load(Some(std::path::Path::new("/nonexistent/stopsignd.toml")))
        .unwrap_err();
    assert!(err.to_string().contains("failed to read config file"));
}

#[test]
fn malformed_env_override_is_fatal() {
    let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    clear_env();

    std::env::set_var("STOPSIGN_BAUD_RATE", "fast");
    assert!(ControllerConfig::load(None).is_err());
    clear_env();

    std::env::set_var("STOPSIGN_STOP_DURATION_SECS", "-2");
    assert!(ControllerConfig::load(None).is_err());
    clear_env();
}

#[test]
fn shipped_config_and_model_are_valid() {
    let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    clear_env();

    let root = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    let cfg = ControllerConfig::load(Some(&root.join("config/stopsignd.toml"))).expect("config");
    assert_eq!(cfg.camera.device_path(), "stub://front_camera");

    let model_path = root.join(&cfg.detection.model_path);
    let model = ChromaModel::load(&model_path).expect("model");
    assert_eq!(model.name, "stop-sign-red");
}
