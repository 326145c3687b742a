use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Deserializer, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::detect::{
    BackendSpec, DetectorSettings, ExecutionTarget, OutputLayout, OutputOrder, SkipPolicy,
    DEFAULT_CONFIDENCE_THRESHOLD, DEFAULT_NMS_THRESHOLD,
};
use crate::error::ConfigurationError;
use crate::frame::DEFAULT_JPEG_QUALITY;
use crate::ingest::{CameraId, CaptureSettings, Resolution, SourceOptions};
use crate::logbook::{DEFAULT_LOG_CAPACITY, MAX_LOG_CAPACITY, MIN_LOG_CAPACITY};
use crate::orchestrator::OrchestratorOptions;
use crate::stats::DEFAULT_HISTORY_LIMIT;

const DEFAULT_API_ADDR: &str = "127.0.0.1:5000";
const DEFAULT_FRAME_RATE: u32 = 30;
const MAX_FRAME_RATE: u32 = 120;
const DEFAULT_LOG_FREQUENCY_SECS: u64 = 60;
const DEFAULT_RECONNECT_INTERVAL_MS: u64 = 5_000;
const DEFAULT_INPUT_SIZE: u32 = 416;

/// Detection sensitivity preset.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub enum Sensitivity {
    Low,
    #[default]
    Medium,
    High,
}

impl Sensitivity {
    pub fn threshold(self) -> f32 {
        match self {
            Sensitivity::Low => 0.3,
            Sensitivity::Medium => 0.5,
            Sensitivity::High => 0.7,
        }
    }
}

impl FromStr for Sensitivity {
    type Err = ConfigurationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "low" | "1" => Ok(Sensitivity::Low),
            "medium" | "2" => Ok(Sensitivity::Medium),
            "high" | "3" => Ok(Sensitivity::High),
            other => Err(ConfigurationError::new(
                "sensitivity",
                format!("expected Low, Medium or High, got {:?}", other),
            )),
        }
    }
}

impl<'de> Deserialize<'de> for Sensitivity {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Level(i64),
            Name(String),
        }
        let text = match Raw::deserialize(deserializer)? {
            Raw::Level(level) => level.to_string(),
            Raw::Name(name) => name,
        };
        text.parse().map_err(serde::de::Error::custom)
    }
}

/// Runtime settings of one stream. Replaced as a whole on update.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StreamSettings {
    pub capture: CaptureSettings,
    pub sensitivity: Sensitivity,
    pub confidence_threshold: f32,
    pub logging_enabled: bool,
    pub log_frequency_seconds: u64,
    pub log_events: bool,
    pub log_errors: bool,
    pub jpeg_quality: u8,
    pub show_fps: bool,
    #[serde(skip)]
    pub reconnect_interval: Duration,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            capture: CaptureSettings {
                camera: CameraId::default(),
                resolution: Resolution::default(),
                frame_rate: DEFAULT_FRAME_RATE,
            },
            sensitivity: Sensitivity::Medium,
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            logging_enabled: true,
            log_frequency_seconds: DEFAULT_LOG_FREQUENCY_SECS,
            log_events: true,
            log_errors: true,
            jpeg_quality: DEFAULT_JPEG_QUALITY,
            show_fps: true,
            reconnect_interval: Duration::from_millis(DEFAULT_RECONNECT_INTERVAL_MS),
        }
    }
}

impl StreamSettings {
    pub fn log_frequency(&self) -> Duration {
        Duration::from_secs(self.log_frequency_seconds)
    }

    /// Target interval between cycles.
    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(1000 / u64::from(self.capture.frame_rate.max(1)))
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        let rate = self.capture.frame_rate;
        if rate == 0 || rate > MAX_FRAME_RATE {
            return Err(ConfigurationError::new(
                "frame_rate",
                format!("must be between 1 and {}, got {}", MAX_FRAME_RATE, rate),
            ));
        }
        let res = self.capture.resolution;
        if res.width == 0 || res.height == 0 {
            return Err(ConfigurationError::new(
                "resolution",
                "width and height must be positive",
            ));
        }
        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            return Err(ConfigurationError::new(
                "confidence_threshold",
                format!("must be within [0, 1], got {}", self.confidence_threshold),
            ));
        }
        if self.log_frequency_seconds == 0 {
            return Err(ConfigurationError::new(
                "log_frequency",
                "must be at least one second",
            ));
        }
        if self.jpeg_quality == 0 || self.jpeg_quality > 100 {
            return Err(ConfigurationError::new(
                "jpeg_quality",
                format!("must be between 1 and 100, got {}", self.jpeg_quality),
            ));
        }
        Ok(())
    }

    /// Compute the settings resulting from `update` without touching `self`.
    ///
    /// Every field is validated before anything is returned, so a rejected
    /// update leaves no partial change behind. A sensitivity change resets the
    /// threshold to its preset; an explicit threshold in the same update wins.
    pub fn apply(&self, update: &SettingsUpdate) -> Result<AppliedUpdate, ConfigurationError> {
        let mut next = self.clone();

        if let Some(camera) = &update.camera {
            if let Some(id) = &camera.id {
                next.capture.camera = id.clone();
            }
            if let Some(resolution) = &camera.resolution {
                next.capture.resolution = resolution.parse()?;
            }
            if let Some(rate) = camera.frame_rate {
                next.capture.frame_rate = rate;
            }
        }

        if let Some(detection) = &update.detection {
            if let Some(level) = detection.sensitivity {
                next.sensitivity = level;
                next.confidence_threshold = level.threshold();
            }
            if let Some(percent) = detection.confidence_threshold {
                if !percent.is_finite() || !(0.0..=100.0).contains(&percent) {
                    return Err(ConfigurationError::new(
                        "confidenceThreshold",
                        format!("must be a percentage within [0, 100], got {}", percent),
                    ));
                }
                next.confidence_threshold = percent / 100.0;
            }
        }

        if let Some(logging) = &update.logging {
            if let Some(enabled) = logging.enabled {
                next.logging_enabled = enabled;
            }
            if let Some(frequency) = logging.frequency {
                next.log_frequency_seconds = frequency;
            }
            if let Some(events) = logging.log_events {
                next.log_events = events;
            }
            if let Some(errors) = logging.log_errors {
                next.log_errors = errors;
            }
        }

        next.validate()?;
        Ok(AppliedUpdate {
            camera_changed: next.capture != self.capture,
            detection_changed: next.sensitivity != self.sensitivity
                || next.confidence_threshold != self.confidence_threshold,
            logging_changed: update.logging.is_some(),
            settings: next,
        })
    }
}

/// Result of `StreamSettings::apply`.
#[derive(Debug, Clone, PartialEq)]
pub struct AppliedUpdate {
    pub settings: StreamSettings,
    pub camera_changed: bool,
    pub detection_changed: bool,
    pub logging_changed: bool,
}

/// Partial settings update as sent by the dashboard.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SettingsUpdate {
    pub camera: Option<CameraUpdate>,
    pub detection: Option<DetectionUpdate>,
    pub logging: Option<LoggingUpdate>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CameraUpdate {
    pub id: Option<CameraId>,
    pub resolution: Option<String>,
    pub frame_rate: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct DetectionUpdate {
    pub sensitivity: Option<Sensitivity>,
    /// Percentage, 0 to 100.
    pub confidence_threshold: Option<f32>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct LoggingUpdate {
    pub enabled: Option<bool>,
    pub frequency: Option<u64>,
    pub log_events: Option<bool>,
    pub log_errors: Option<bool>,
}

/// Detector construction settings. Fixed for the life of the process.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectionSettings {
    pub model: Option<PathBuf>,
    pub input_width: u32,
    pub input_height: u32,
    pub layout: OutputLayout,
    pub output_order: OutputOrder,
    pub execution_target: ExecutionTarget,
    pub nms_threshold: f32,
    pub skip: SkipPolicy,
}

impl Default for DetectionSettings {
    fn default() -> Self {
        Self {
            model: None,
            input_width: DEFAULT_INPUT_SIZE,
            input_height: DEFAULT_INPUT_SIZE,
            layout: OutputLayout::default(),
            output_order: OutputOrder::default(),
            execution_target: ExecutionTarget::default(),
            nms_threshold: DEFAULT_NMS_THRESHOLD,
            skip: SkipPolicy::default(),
        }
    }
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct MonitorConfigFile {
    api: Option<ApiConfigFile>,
    camera: Option<CameraConfigFile>,
    detection: Option<DetectionConfigFile>,
    logging: Option<LoggingConfigFile>,
    stream: Option<StreamConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct ApiConfigFile {
    addr: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct CameraConfigFile {
    id: Option<CameraId>,
    resolution: Option<String>,
    frame_rate: Option<u32>,
    require_device: Option<bool>,
    reconnect_interval_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct DetectionConfigFile {
    model: Option<PathBuf>,
    input_width: Option<u32>,
    input_height: Option<u32>,
    layout: Option<OutputLayout>,
    output_order: Option<OutputOrder>,
    execution_target: Option<ExecutionTarget>,
    sensitivity: Option<Sensitivity>,
    confidence_threshold: Option<f32>,
    nms_threshold: Option<f32>,
    infer_every: Option<u32>,
    max_staleness_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct LoggingConfigFile {
    enabled: Option<bool>,
    frequency_seconds: Option<u64>,
    log_events: Option<bool>,
    log_errors: Option<bool>,
    capacity: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct StreamConfigFile {
    jpeg_quality: Option<u8>,
    show_fps: Option<bool>,
    history_limit: Option<usize>,
}

/// Process configuration: file, then `HEADCOUNT_*` environment, then
/// validation.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub api_addr: String,
    pub stream: StreamSettings,
    pub detection: DetectionSettings,
    pub require_device: bool,
    pub log_capacity: usize,
    pub history_limit: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            api_addr: DEFAULT_API_ADDR.to_string(),
            stream: StreamSettings::default(),
            detection: DetectionSettings::default(),
            require_device: false,
            log_capacity: DEFAULT_LOG_CAPACITY,
            history_limit: DEFAULT_HISTORY_LIMIT,
        }
    }
}

impl MonitorConfig {
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("HEADCOUNT_CONFIG").ok();
        Self::load_from(config_path.as_deref().map(Path::new))
    }

    /// Like `load`, with an explicit file in place of `HEADCOUNT_CONFIG`.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => Some(read_config_file(path)?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: MonitorConfigFile) -> Result<Self> {
        let mut cfg = Self::default();

        if let Some(addr) = file.api.and_then(|api| api.addr) {
            cfg.api_addr = addr;
        }

        let camera = file.camera.unwrap_or_default();
        if let Some(id) = camera.id {
            cfg.stream.capture.camera = id;
        }
        if let Some(resolution) = camera.resolution {
            cfg.stream.capture.resolution = resolution.parse()?;
        }
        if let Some(rate) = camera.frame_rate {
            cfg.stream.capture.frame_rate = rate;
        }
        cfg.require_device = camera.require_device.unwrap_or(false);
        if let Some(ms) = camera.reconnect_interval_ms {
            cfg.stream.reconnect_interval = Duration::from_millis(ms);
        }

        let detection = file.detection.unwrap_or_default();
        cfg.detection.model = detection.model;
        if let Some(width) = detection.input_width {
            cfg.detection.input_width = width;
        }
        if let Some(height) = detection.input_height {
            cfg.detection.input_height = height;
        }
        if let Some(layout) = detection.layout {
            cfg.detection.layout = layout;
        }
        if let Some(order) = detection.output_order {
            cfg.detection.output_order = order;
        }
        if let Some(target) = detection.execution_target {
            cfg.detection.execution_target = target;
        }
        if let Some(level) = detection.sensitivity {
            cfg.stream.sensitivity = level;
            cfg.stream.confidence_threshold = level.threshold();
        }
        if let Some(threshold) = detection.confidence_threshold {
            cfg.stream.confidence_threshold = threshold;
        }
        if let Some(nms) = detection.nms_threshold {
            cfg.detection.nms_threshold = nms;
        }
        if let Some(every) = detection.infer_every {
            cfg.detection.skip.infer_every = every;
        }
        if let Some(ms) = detection.max_staleness_ms {
            cfg.detection.skip.max_staleness = Duration::from_millis(ms);
        }

        let logging = file.logging.unwrap_or_default();
        cfg.stream.logging_enabled = logging.enabled.unwrap_or(true);
        if let Some(secs) = logging.frequency_seconds {
            cfg.stream.log_frequency_seconds = secs;
        }
        cfg.stream.log_events = logging.log_events.unwrap_or(true);
        cfg.stream.log_errors = logging.log_errors.unwrap_or(true);
        if let Some(capacity) = logging.capacity {
            cfg.log_capacity = capacity;
        }

        let stream = file.stream.unwrap_or_default();
        if let Some(quality) = stream.jpeg_quality {
            cfg.stream.jpeg_quality = quality;
        }
        cfg.stream.show_fps = stream.show_fps.unwrap_or(true);
        if let Some(limit) = stream.history_limit {
            cfg.history_limit = limit;
        }

        Ok(cfg)
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(addr) = env_value("HEADCOUNT_API_ADDR") {
            self.api_addr = addr;
        }
        if let Some(camera) = env_value("HEADCOUNT_CAMERA") {
            self.stream.capture.camera = camera
                .parse()
                .map_err(|e| anyhow!("HEADCOUNT_CAMERA: {}", e))?;
        }
        if let Some(resolution) = env_value("HEADCOUNT_RESOLUTION") {
            self.stream.capture.resolution = resolution
                .parse()
                .map_err(|e| anyhow!("HEADCOUNT_RESOLUTION: {}", e))?;
        }
        if let Some(rate) = env_value("HEADCOUNT_FRAME_RATE") {
            self.stream.capture.frame_rate = rate
                .parse()
                .map_err(|_| anyhow!("HEADCOUNT_FRAME_RATE must be an integer"))?;
        }
        if let Some(model) = env_value("HEADCOUNT_MODEL") {
            self.detection.model = Some(PathBuf::from(model));
        }
        if let Some(level) = env_value("HEADCOUNT_SENSITIVITY") {
            let level: Sensitivity = level
                .parse()
                .map_err(|e| anyhow!("HEADCOUNT_SENSITIVITY: {}", e))?;
            self.stream.sensitivity = level;
            self.stream.confidence_threshold = level.threshold();
        }
        if let Some(capacity) = env_value("HEADCOUNT_LOG_CAPACITY") {
            self.log_capacity = capacity
                .parse()
                .map_err(|_| anyhow!("HEADCOUNT_LOG_CAPACITY must be an integer"))?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        self.api_addr
            .parse::<SocketAddr>()
            .map_err(|_| anyhow!("api addr {:?} is not a socket address", self.api_addr))?;
        self.stream.validate()?;
        if !(MIN_LOG_CAPACITY..=MAX_LOG_CAPACITY).contains(&self.log_capacity) {
            return Err(ConfigurationError::new(
                "log_capacity",
                format!(
                    "must be between {} and {}, got {}",
                    MIN_LOG_CAPACITY, MAX_LOG_CAPACITY, self.log_capacity
                ),
            )
            .into());
        }
        if self.history_limit == 0 {
            return Err(ConfigurationError::new("history_limit", "must be positive").into());
        }
        let det = &self.detection;
        if det.input_width == 0 || det.input_height == 0 {
            return Err(ConfigurationError::new("input size", "must be positive").into());
        }
        if !(det.nms_threshold > 0.0 && det.nms_threshold <= 1.0) {
            return Err(ConfigurationError::new(
                "nms_threshold",
                format!("must be within (0, 1], got {}", det.nms_threshold),
            )
            .into());
        }
        if det.skip.infer_every == 0 {
            return Err(ConfigurationError::new("infer_every", "must be at least 1").into());
        }
        Ok(())
    }
}

impl MonitorConfig {
    pub fn backend_spec(&self) -> BackendSpec {
        BackendSpec {
            model: self.detection.model.clone(),
            input_size: (self.detection.input_width, self.detection.input_height),
            target: self.detection.execution_target,
        }
    }

    pub fn detector_settings(&self) -> DetectorSettings {
        DetectorSettings {
            confidence_threshold: self.stream.confidence_threshold,
            nms_threshold: self.detection.nms_threshold,
            layout: self.detection.layout,
            order: self.detection.output_order,
            skip: self.detection.skip,
        }
    }

    pub fn orchestrator_options(&self) -> OrchestratorOptions {
        OrchestratorOptions {
            source: SourceOptions {
                require_device: self.require_device,
                ..SourceOptions::default()
            },
            log_capacity: self.log_capacity,
            history_limit: self.history_limit,
        }
    }
}

fn env_value(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn read_config_file(path: &Path) -> Result<MonitorConfigFile> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    let is_json = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
    if is_json {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))
    } else {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sensitivity_maps_to_threshold() {
        assert_eq!(Sensitivity::Low.threshold(), 0.3);
        assert_eq!(Sensitivity::Medium.threshold(), 0.5);
        assert_eq!(Sensitivity::High.threshold(), 0.7);
        assert_eq!("high".parse::<Sensitivity>().unwrap(), Sensitivity::High);
        assert_eq!(serde_json::from_str::<Sensitivity>("1").unwrap(), Sensitivity::Low);
        assert!("extreme".parse::<Sensitivity>().is_err());
    }

    #[test]
    fn update_applies_every_section() {
        let current = StreamSettings::default();
        let update: SettingsUpdate = serde_json::from_str(
            r#"{
                "camera": {"id": 2, "resolution": "1280x720", "frameRate": 15},
                "detection": {"sensitivity": "High"},
                "logging": {"frequency": 30, "logEvents": false}
            }"#,
        )
        .unwrap();
        let applied = current.apply(&update).unwrap();
        assert!(applied.camera_changed);
        assert!(applied.detection_changed);
        assert_eq!(applied.settings.capture.camera, CameraId::Index(2));
        assert_eq!(applied.settings.capture.resolution, Resolution::new(1280, 720));
        assert_eq!(applied.settings.capture.frame_rate, 15);
        assert_eq!(applied.settings.confidence_threshold, 0.7);
        assert_eq!(applied.settings.log_frequency_seconds, 30);
        assert!(!applied.settings.log_events);
    }

    #[test]
    fn explicit_threshold_wins_over_sensitivity() {
        let update = SettingsUpdate {
            detection: Some(DetectionUpdate {
                sensitivity: Some(Sensitivity::Low),
                confidence_threshold: Some(65.0),
            }),
            ..SettingsUpdate::default()
        };
        let applied = StreamSettings::default().apply(&update).unwrap();
        assert_eq!(applied.settings.sensitivity, Sensitivity::Low);
        assert!((applied.settings.confidence_threshold - 0.65).abs() < 1e-6);
        assert!(!applied.camera_changed);
    }

    #[test]
    fn invalid_field_rejects_whole_update() {
        let update: SettingsUpdate = serde_json::from_str(
            r#"{"camera": {"frameRate": 0}, "detection": {"sensitivity": "High"}}"#,
        )
        .unwrap();
        let err = StreamSettings::default().apply(&update).unwrap_err();
        assert_eq!(err.field, "frame_rate");

        let update: SettingsUpdate =
            serde_json::from_str(r#"{"camera": {"resolution": "wide"}}"#).unwrap();
        assert!(StreamSettings::default().apply(&update).is_err());
    }

    #[test]
    fn unknown_update_fields_are_rejected() {
        assert!(serde_json::from_str::<SettingsUpdate>(r#"{"colour": "red"}"#).is_err());
    }

    #[test]
    fn frame_interval_follows_rate() {
        let settings = StreamSettings::default();
        assert_eq!(settings.frame_interval(), Duration::from_millis(33));
    }
}
