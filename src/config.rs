use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::capture::{CaptureRequest, DEFAULT_PROBE_LIMIT};
use crate::detect::DetectParams;
use crate::model_files::ModelFiles;

const DEFAULT_TICK_MS: u64 = 30;
const DEFAULT_INPUT_SIZE: u32 = 416;
const DEFAULT_MAX_READ_FAILURES: u32 = 3;
const DEFAULT_MODEL_DIR: &str = ".";
const DEFAULT_SNAPSHOT_PATH: &str = "opencam-live.jpg";
const DEFAULT_SNAPSHOT_EVERY: u64 = 10;
const DEFAULT_HEALTH_SECS: u64 = 5;
const DEFAULT_RECONNECT_MS: u64 = 2000;

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct OpencamConfigFile {
    camera_index: Option<u32>,
    probe_limit: Option<u32>,
    tick_ms: Option<u64>,
    max_read_failures: Option<u32>,
    health_interval_secs: Option<u64>,
    reconnect_ms: Option<u64>,
    capture: Option<CaptureConfigFile>,
    detection: Option<DetectionConfigFile>,
    model: Option<ModelConfigFile>,
    snapshot: Option<SnapshotConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct CaptureConfigFile {
    width: Option<u32>,
    height: Option<u32>,
    fps: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct DetectionConfigFile {
    confidence_threshold: Option<f32>,
    nms_threshold: Option<f32>,
    input_width: Option<u32>,
    input_height: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct ModelConfigFile {
    dir: Option<PathBuf>,
    weights_url: Option<String>,
    config_url: Option<String>,
    labels_url: Option<String>,
    weights_sha256: Option<String>,
    allow_download: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct SnapshotConfigFile {
    path: Option<PathBuf>,
    every: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct OpencamConfig {
    pub camera_index: u32,
    pub probe_limit: u32,
    pub tick: Duration,
    pub max_read_failures: u32,
    pub health_interval: Duration,
    /// Retry interval for reopening a lost or unavailable camera; `None` disables it.
    pub reconnect: Option<Duration>,
    pub capture: CaptureRequest,
    pub detection: DetectionSettings,
    pub model: ModelSettings,
    pub snapshot: SnapshotSettings,
}

#[derive(Debug, Clone)]
pub struct DetectionSettings {
    pub params: DetectParams,
    pub input_width: u32,
    pub input_height: u32,
}

#[derive(Debug, Clone)]
pub struct ModelSettings {
    pub dir: PathBuf,
    pub weights_url: Option<String>,
    pub config_url: Option<String>,
    pub labels_url: Option<String>,
    pub weights_sha256: Option<String>,
    pub allow_download: bool,
}

#[derive(Debug, Clone)]
pub struct SnapshotSettings {
    pub path: PathBuf,
    pub every: u64,
}

impl OpencamConfig {
    /// Defaults, then the JSON file named by `OPENCAM_CONFIG`, then env overrides.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("OPENCAM_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) if !path.trim().is_empty() => Some(read_config_file(Path::new(path))?),
            _ => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Parse a JSON document with the same layout as the config file.
    pub fn from_json(raw: &str) -> Result<Self> {
        let file: OpencamConfigFile =
            serde_json::from_str(raw).map_err(|e| anyhow!("invalid config: {}", e))?;
        let mut cfg = Self::from_file(file);
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: OpencamConfigFile) -> Self {
        let defaults = CaptureRequest::default();
        let capture = file.capture.unwrap_or_default();
        let detection = file.detection.unwrap_or_default();
        let model = file.model.unwrap_or_default();
        let snapshot = file.snapshot.unwrap_or_default();
        let params = DetectParams::default();

        Self {
            camera_index: file.camera_index.unwrap_or(0),
            probe_limit: file.probe_limit.unwrap_or(DEFAULT_PROBE_LIMIT),
            tick: Duration::from_millis(file.tick_ms.unwrap_or(DEFAULT_TICK_MS)),
            max_read_failures: file.max_read_failures.unwrap_or(DEFAULT_MAX_READ_FAILURES),
            health_interval: Duration::from_secs(
                file.health_interval_secs.unwrap_or(DEFAULT_HEALTH_SECS),
            ),
            reconnect: reconnect_interval(file.reconnect_ms.unwrap_or(DEFAULT_RECONNECT_MS)),
            capture: CaptureRequest {
                width: capture.width.unwrap_or(defaults.width),
                height: capture.height.unwrap_or(defaults.height),
                fps: capture.fps.unwrap_or(defaults.fps),
            },
            detection: DetectionSettings {
                params: DetectParams {
                    confidence_threshold: detection
                        .confidence_threshold
                        .unwrap_or(params.confidence_threshold),
                    nms_threshold: detection.nms_threshold.unwrap_or(params.nms_threshold),
                },
                input_width: detection.input_width.unwrap_or(DEFAULT_INPUT_SIZE),
                input_height: detection.input_height.unwrap_or(DEFAULT_INPUT_SIZE),
            },
            model: ModelSettings {
                dir: model.dir.unwrap_or_else(|| PathBuf::from(DEFAULT_MODEL_DIR)),
                weights_url: model.weights_url,
                config_url: model.config_url,
                labels_url: model.labels_url,
                weights_sha256: model.weights_sha256,
                allow_download: model.allow_download.unwrap_or(true),
            },
            snapshot: SnapshotSettings {
                path: snapshot
                    .path
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_SNAPSHOT_PATH)),
                every: snapshot.every.unwrap_or(DEFAULT_SNAPSHOT_EVERY),
            },
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(index) = env_parse::<u32>("OPENCAM_CAMERA_INDEX", "a camera index")? {
            self.camera_index = index;
        }
        if let Ok(dir) = std::env::var("OPENCAM_MODEL_DIR") {
            if !dir.trim().is_empty() {
                self.model.dir = PathBuf::from(dir);
            }
        }
        if let Some(value) = env_parse::<f32>("OPENCAM_CONFIDENCE", "a number")? {
            self.detection.params.confidence_threshold = value;
        }
        if let Some(value) = env_parse::<f32>("OPENCAM_NMS", "a number")? {
            self.detection.params.nms_threshold = value;
        }
        if let Some(ms) = env_parse::<u64>("OPENCAM_TICK_MS", "an integer number of milliseconds")? {
            self.tick = Duration::from_millis(ms);
        }
        if let Some(ms) = env_parse::<u64>("OPENCAM_RECONNECT_MS", "an integer number of milliseconds")? {
            self.reconnect = reconnect_interval(ms);
        }
        if let Ok(path) = std::env::var("OPENCAM_SNAPSHOT_PATH") {
            if !path.trim().is_empty() {
                self.snapshot.path = PathBuf::from(path);
            }
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        check_unit("confidence_threshold", self.detection.params.confidence_threshold)?;
        check_unit("nms_threshold", self.detection.params.nms_threshold)?;
        if self.tick.is_zero() {
            return Err(anyhow!("tick interval must be greater than zero"));
        }
        if self.max_read_failures == 0 {
            return Err(anyhow!("max_read_failures must be at least 1"));
        }
        if self.probe_limit == 0 {
            return Err(anyhow!("probe_limit must be at least 1"));
        }
        for (name, value) in [
            ("input_width", self.detection.input_width),
            ("input_height", self.detection.input_height),
        ] {
            if value == 0 || value % 32 != 0 {
                return Err(anyhow!("{} must be a positive multiple of 32, got {}", name, value));
            }
        }
        if self.capture.width == 0 || self.capture.height == 0 || self.capture.fps == 0 {
            return Err(anyhow!("capture width, height and fps must be greater than zero"));
        }
        if self.snapshot.every == 0 {
            return Err(anyhow!("snapshot.every must be at least 1"));
        }
        if let Some(digest) = &self.model.weights_sha256 {
            let digest = digest.trim().to_lowercase();
            if !matches!(hex::decode(&digest), Ok(bytes) if bytes.len() == 32) {
                return Err(anyhow!("model.weights_sha256 must be 64 hex characters"));
            }
            self.model.weights_sha256 = Some(digest);
        }
        Ok(())
    }

    /// The model file set described by this config.
    pub fn model_files(&self) -> ModelFiles {
        let mut files = ModelFiles::in_dir(&self.model.dir);
        if let Some(url) = &self.model.weights_url {
            files.weights.url = url.clone();
        }
        if let Some(url) = &self.model.config_url {
            files.config.url = url.clone();
        }
        if let Some(url) = &self.model.labels_url {
            files.labels.url = url.clone();
        }
        if let Some(digest) = &self.model.weights_sha256 {
            files.weights = files.weights.with_sha256(digest);
        }
        files
    }

    pub fn input_size(&self) -> (u32, u32) {
        (self.detection.input_width, self.detection.input_height)
    }
}

impl Default for OpencamConfig {
    fn default() -> Self {
        Self::from_file(OpencamConfigFile::default())
    }
}

/// Zero disables reconnecting.
fn reconnect_interval(ms: u64) -> Option<Duration> {
    (ms > 0).then(|| Duration::from_millis(ms))
}

fn read_config_file(path: &Path) -> Result<OpencamConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}

fn env_parse<T: std::str::FromStr>(name: &str, what: &str) -> Result<Option<T>> {
    match std::env::var(name) {
        Ok(value) if !value.trim().is_empty() => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| anyhow!("{} must be {}", name, what)),
        _ => Ok(None),
    }
}

fn check_unit(name: &str, value: f32) -> Result<()> {
    if !(0.0..=1.0).contains(&value) {
        return Err(anyhow!("{} must be within [0, 1], got {}", name, value));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = OpencamConfig::default();
        assert_eq!(cfg.tick, Duration::from_millis(30));
        assert_eq!(cfg.detection.params, DetectParams::default());
        assert_eq!(cfg.input_size(), (416, 416));
        assert_eq!(cfg.max_read_failures, 3);
        assert_eq!(cfg.probe_limit, 10);
        assert_eq!(cfg.reconnect, Some(Duration::from_secs(2)));
        assert_eq!((cfg.capture.width, cfg.capture.height, cfg.capture.fps), (1280, 720, 30));
        assert!(cfg.model.allow_download);
    }

    #[test]
    fn json_overrides_nested_sections() -> Result<()> {
        let cfg = OpencamConfig::from_json(
            r#"{"camera_index": 2, "detection": {"confidence_threshold": 0.25, "input_width": 320, "input_height": 320}}"#,
        )?;
        assert_eq!(cfg.camera_index, 2);
        assert_eq!(cfg.detection.params.confidence_threshold, 0.25);
        assert_eq!(cfg.detection.params.nms_threshold, 0.4);
        assert_eq!(cfg.input_size(), (320, 320));
        Ok(())
    }

    #[test]
    fn zero_reconnect_interval_disables_reconnecting() -> Result<()> {
        let cfg = OpencamConfig::from_json(r#"{"reconnect_ms": 0}"#)?;
        assert_eq!(cfg.reconnect, None);
        let cfg = OpencamConfig::from_json(r#"{"reconnect_ms": 250}"#)?;
        assert_eq!(cfg.reconnect, Some(Duration::from_millis(250)));
        Ok(())
    }

    #[test]
    fn rejects_out_of_range_values() {
        assert!(OpencamConfig::from_json(r#"{"detection": {"nms_threshold": 1.5}}"#).is_err());
        assert!(OpencamConfig::from_json(r#"{"detection": {"input_width": 400}}"#).is_err());
        assert!(OpencamConfig::from_json(r#"{"tick_ms": 0}"#).is_err());
        assert!(OpencamConfig::from_json(r#"{"max_read_failures": 0}"#).is_err());
        assert!(OpencamConfig::from_json(r#"{"model": {"weights_sha256": "abc"}}"#).is_err());
        assert!(OpencamConfig::from_json(r#"{"unknown": 1}"#).is_err());
    }

    #[test]
    fn model_files_follow_model_settings() -> Result<()> {
        let digest = "AB".repeat(32);
        let cfg = OpencamConfig::from_json(&format!(
            r#"{{"model": {{"dir": "/srv/models", "labels_url": "https://mirror.example/coco.names", "weights_sha256": "{}"}}}}"#,
            digest
        ))?;
        let files = cfg.model_files();
        assert_eq!(files.config.path, PathBuf::from("/srv/models/yolov3.cfg"));
        assert_eq!(files.labels.url, "https://mirror.example/coco.names");
        assert_eq!(files.weights.sha256, Some("ab".repeat(32)));
        Ok(())
    }
}
