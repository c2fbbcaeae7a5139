use anyhow::{anyhow, Result};
use log::LevelFilter;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

const DEFAULT_CAMERA_INDEX: u32 = 0;
const DEFAULT_FRAME_WIDTH: u32 = 640;
const DEFAULT_FRAME_HEIGHT: u32 = 480;
const DEFAULT_TARGET_FPS: u32 = 30;
const DEFAULT_READ_RETRY_DELAY_MS: u64 = 500;
const DEFAULT_JOIN_TIMEOUT_MS: u64 = 2_000;
const DEFAULT_MODEL_PATH: &str = "models/stop_sign.toml";
const DEFAULT_SCALE_FACTOR: f64 = 1.1;
const DEFAULT_MIN_NEIGHBORS: u32 = 5;
const DEFAULT_SERIAL_PORT: &str = "/dev/ttyUSB0";
const DEFAULT_BAUD_RATE: u32 = 9600;
const DEFAULT_STOP_DURATION_SECS: f64 = 3.0;
const DEFAULT_IDLE_DELAY_MS: u64 = 5;
const DEFAULT_STATUS_INTERVAL_SECS: u64 = 5;

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct ControllerConfigFile {
    camera: Option<CameraConfigFile>,
    detection: Option<DetectionConfigFile>,
    serial: Option<SerialConfigFile>,
    control: Option<ControlConfigFile>,
    logging: Option<LoggingConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct CameraConfigFile {
    index: Option<u32>,
    device: Option<String>,
    frame_width: Option<u32>,
    frame_height: Option<u32>,
    target_fps: Option<u32>,
    read_retry_delay_ms: Option<u64>,
    join_timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct DetectionConfigFile {
    backend: Option<String>,
    model_path: Option<PathBuf>,
    scale_factor: Option<f64>,
    min_neighbors: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct SerialConfigFile {
    port: Option<String>,
    baud_rate: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct ControlConfigFile {
    stop_duration_secs: Option<f64>,
    idle_delay_ms: Option<u64>,
    status_interval_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct LoggingConfigFile {
    level: Option<String>,
    file: Option<PathBuf>,
}

/// Validated controller configuration, built once at startup.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    pub camera: CameraSettings,
    pub detection: DetectionSettings,
    pub serial: SerialSettings,
    pub control: ControlSettings,
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone)]
pub struct CameraSettings {
    pub index: u32,
    /// Explicit device path; overrides `index` when set.
    pub device: Option<String>,
    pub width: u32,
    pub height: u32,
    pub target_fps: u32,
    pub read_retry_delay: Duration,
    pub join_timeout: Duration,
}

impl CameraSettings {
    /// Device the frame source opens: the explicit path, or `/dev/video<index>`.
    pub fn device_path(&self) -> String {
        match &self.device {
            Some(device) => device.clone(),
            None => format!("/dev/video{}", self.index),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DetectorKind {
    /// Sliding-window red-region detector driven by a model file.
    Chroma,
    /// Never reports a detection.
    Stub,
}

impl FromStr for DetectorKind {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "chroma" => Ok(Self::Chroma),
            "stub" => Ok(Self::Stub),
            other => Err(anyhow!("unknown detector backend '{}'", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DetectionSettings {
    pub backend: DetectorKind,
    pub model_path: PathBuf,
    pub scale_factor: f64,
    pub min_neighbors: u32,
}

#[derive(Debug, Clone)]
pub struct SerialSettings {
    pub port: String,
    pub baud_rate: u32,
}

#[derive(Debug, Clone)]
pub struct ControlSettings {
    pub stop_duration: Duration,
    pub idle_delay: Duration,
    pub status_interval: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogDestination {
    Stderr,
    /// Append to this file and mirror to stderr.
    File(PathBuf),
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub destination: LogDestination,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            camera: CameraSettings {
                index: DEFAULT_CAMERA_INDEX,
                device: None,
                width: DEFAULT_FRAME_WIDTH,
                height: DEFAULT_FRAME_HEIGHT,
                target_fps: DEFAULT_TARGET_FPS,
                read_retry_delay: Duration::from_millis(DEFAULT_READ_RETRY_DELAY_MS),
                join_timeout: Duration::from_millis(DEFAULT_JOIN_TIMEOUT_MS),
            },
            detection: DetectionSettings {
                backend: DetectorKind::Chroma,
                model_path: PathBuf::from(DEFAULT_MODEL_PATH),
                scale_factor: DEFAULT_SCALE_FACTOR,
                min_neighbors: DEFAULT_MIN_NEIGHBORS,
            },
            serial: SerialSettings {
                port: DEFAULT_SERIAL_PORT.to_string(),
                baud_rate: DEFAULT_BAUD_RATE,
            },
            control: ControlSettings {
                stop_duration: Duration::from_secs_f64(DEFAULT_STOP_DURATION_SECS),
                idle_delay: Duration::from_millis(DEFAULT_IDLE_DELAY_MS),
                status_interval: Duration::from_secs(DEFAULT_STATUS_INTERVAL_SECS),
            },
            logging: LoggingSettings {
                level: LevelFilter::Info,
                destination: LogDestination::Stderr,
            },
        }
    }
}

impl ControllerConfig {
    /// Load from an optional TOML file, apply `STOPSIGN_*` overrides, validate.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => read_config_file(path)?,
            None => ControllerConfigFile::default(),
        };
        let mut cfg = Self::from_file(file_cfg)?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Parse and validate TOML text without consulting the environment.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let file: ControllerConfigFile =
            toml::from_str(raw).map_err(|e| anyhow!("invalid config: {}", e))?;
        let mut cfg = Self::from_file(file)?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: ControllerConfigFile) -> Result<Self> {
        let defaults = Self::default();
        let camera = file.camera.unwrap_or_default();
        let detection = file.detection.unwrap_or_default();
        let serial = file.serial.unwrap_or_default();
        let control = file.control.unwrap_or_default();
        let logging = file.logging.unwrap_or_default();

        let backend = match detection.backend {
            Some(name) => name.parse()?,
            None => defaults.detection.backend,
        };
        let stop_duration = match control.stop_duration_secs {
            Some(secs) => parse_stop_duration(secs)?,
            None => defaults.control.stop_duration,
        };
        let level = match logging.level {
            Some(level) => parse_level(&level)?,
            None => defaults.logging.level,
        };

        Ok(Self {
            camera: CameraSettings {
                index: camera.index.unwrap_or(defaults.camera.index),
                device: camera.device,
                width: camera.frame_width.unwrap_or(defaults.camera.width),
                height: camera.frame_height.unwrap_or(defaults.camera.height),
                target_fps: camera.target_fps.unwrap_or(defaults.camera.target_fps),
                read_retry_delay: camera
                    .read_retry_delay_ms
                    .map(Duration::from_millis)
                    .unwrap_or(defaults.camera.read_retry_delay),
                join_timeout: camera
                    .join_timeout_ms
                    .map(Duration::from_millis)
                    .unwrap_or(defaults.camera.join_timeout),
            },
            detection: DetectionSettings {
                backend,
                model_path: detection
                    .model_path
                    .unwrap_or(defaults.detection.model_path),
                scale_factor: detection
                    .scale_factor
                    .unwrap_or(defaults.detection.scale_factor),
                min_neighbors: detection
                    .min_neighbors
                    .unwrap_or(defaults.detection.min_neighbors),
            },
            serial: SerialSettings {
                port: serial.port.unwrap_or(defaults.serial.port),
                baud_rate: serial.baud_rate.unwrap_or(defaults.serial.baud_rate),
            },
            control: ControlSettings {
                stop_duration,
                idle_delay: control
                    .idle_delay_ms
                    .map(Duration::from_millis)
                    .unwrap_or(defaults.control.idle_delay),
                status_interval: control
                    .status_interval_secs
                    .map(Duration::from_secs)
                    .unwrap_or(defaults.control.status_interval),
            },
            logging: LoggingSettings {
                level,
                destination: match logging.file {
                    Some(path) => LogDestination::File(path),
                    None => LogDestination::Stderr,
                },
            },
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(device) = non_empty_env("STOPSIGN_CAMERA_DEVICE") {
            self.camera.device = Some(device);
        }
        if let Some(index) = non_empty_env("STOPSIGN_CAMERA_INDEX") {
            self.camera.index = index
                .parse()
                .map_err(|_| anyhow!("STOPSIGN_CAMERA_INDEX must be a non-negative integer"))?;
        }
        if let Some(path) = non_empty_env("STOPSIGN_MODEL_PATH") {
            self.detection.model_path = PathBuf::from(path);
        }
        if let Some(port) = non_empty_env("STOPSIGN_SERIAL_PORT") {
            self.serial.port = port;
        }
        if let Some(baud) = non_empty_env("STOPSIGN_BAUD_RATE") {
            self.serial.baud_rate = baud
                .parse()
                .map_err(|_| anyhow!("STOPSIGN_BAUD_RATE must be an integer"))?;
        }
        if let Some(secs) = non_empty_env("STOPSIGN_STOP_DURATION_SECS") {
            let secs: f64 = secs
                .parse()
                .map_err(|_| anyhow!("STOPSIGN_STOP_DURATION_SECS must be a number of seconds"))?;
            self.control.stop_duration = parse_stop_duration(secs)?;
        }
        if let Some(level) = non_empty_env("STOPSIGN_LOG_LEVEL") {
            self.logging.level = parse_level(&level)?;
        }
        if let Some(path) = non_empty_env("STOPSIGN_LOG_FILE") {
            self.logging.destination = LogDestination::File(PathBuf::from(path));
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        if self.camera.width == 0 || self.camera.height == 0 {
            return Err(anyhow!("camera frame_width and frame_height must be non-zero"));
        }
        if let Some(device) = &self.camera.device {
            if device.trim().is_empty() {
                return Err(anyhow!("camera device must not be empty"));
            }
        }
        if !self.detection.scale_factor.is_finite() || self.detection.scale_factor <= 1.0 {
            return Err(anyhow!(
                "detection scale_factor must be greater than 1.0 (got {})",
                self.detection.scale_factor
            ));
        }
        if self.detection.backend == DetectorKind::Chroma
            && self.detection.model_path.as_os_str().is_empty()
        {
            return Err(anyhow!("detection model_path must be set"));
        }
        self.serial.port = self.serial.port.trim().to_string();
        if self.serial.port.is_empty() {
            return Err(anyhow!("serial port must not be empty"));
        }
        if self.serial.baud_rate == 0 {
            return Err(anyhow!("serial baud_rate must be greater than zero"));
        }
        if self.camera.read_retry_delay.is_zero() {
            return Err(anyhow!("camera read_retry_delay_ms must be greater than zero"));
        }
        if self.camera.join_timeout.is_zero() {
            return Err(anyhow!("camera join_timeout_ms must be greater than zero"));
        }
        if self.control.status_interval.is_zero() {
            return Err(anyhow!("control status_interval_secs must be greater than zero"));
        }
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<ControllerConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = toml::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}

fn parse_stop_duration(secs: f64) -> Result<Duration> {
    Duration::try_from_secs_f64(secs).map_err(|_| {
        anyhow!(
            "stop_duration_secs must be a finite, non-negative number (got {})",
            secs
        )
    })
}

fn parse_level(value: &str) -> Result<LevelFilter> {
    value
        .trim()
        .parse()
        .map_err(|_| anyhow!("unknown log level '{}'", value))
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|value| !value.trim().is_empty())
}
