//! Camera acquisition.
//!
//! - `FrameSource`: the one live camera of a stream, with bounded reconnect and
//!   synthetic fallback.
//! - `DeviceOpener` / `CameraDevice`: the seam to real hardware (V4L2 behind
//!   feature `ingest-v4l2`).
//! - `SyntheticScene`: labelled test pattern used for `stub://` cameras and
//!   whenever the device is unavailable.

#[cfg(feature = "ingest-v4l2")]
mod normalize;
mod source;
mod synthetic;
#[cfg(feature = "ingest-v4l2")]
pub mod v4l2;

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::ConfigurationError;
use crate::frame::Frame;

pub use source::{
    probe_camera, FrameSource, SourceMode, SourceOptions, DEFAULT_RECONNECT_BACKOFF,
};
pub use synthetic::SyntheticScene;
#[cfg(feature = "ingest-v4l2")]
pub use v4l2::V4l2Opener;

const SYNTHETIC_SCHEME: &str = "stub://";

/// Camera identity as given by the operator.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum CameraId {
    /// Numeric device index (`/dev/video<N>`).
    Index(u32),
    /// Explicit device node.
    Path(PathBuf),
    /// `stub://<name>`: a configured synthetic source.
    Synthetic(String),
}

impl Default for CameraId {
    fn default() -> Self {
        CameraId::Index(0)
    }
}

impl CameraId {
    pub fn is_synthetic(&self) -> bool {
        matches!(self, CameraId::Synthetic(_))
    }

    /// Ordered open plan for this camera. At most four strategies, each
    /// appearing once.
    pub fn open_plan(&self) -> Vec<OpenStrategy> {
        let mut plan = match self {
            CameraId::Synthetic(_) => return Vec::new(),
            CameraId::Index(index) => vec![
                OpenStrategy::DevicePath(PathBuf::from(format!("/dev/video{}", index))),
                OpenStrategy::Index(*index),
                OpenStrategy::PlatformBackend(*index),
            ],
            CameraId::Path(path) => vec![OpenStrategy::DevicePath(path.clone())],
        };
        if *self != CameraId::Index(0) {
            plan.push(OpenStrategy::FallbackIndex0);
        }
        plan
    }
}

impl fmt::Display for CameraId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CameraId::Index(index) => write!(f, "{}", index),
            CameraId::Path(path) => write!(f, "{}", path.display()),
            CameraId::Synthetic(name) => write!(f, "{}{}", SYNTHETIC_SCHEME, name),
        }
    }
}

impl FromStr for CameraId {
    type Err = ConfigurationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let value = value.trim();
        if value.is_empty() {
            return Err(ConfigurationError::new("camera", "camera id is empty"));
        }
        if let Some(name) = value.strip_prefix(SYNTHETIC_SCHEME) {
            return Ok(CameraId::Synthetic(name.to_string()));
        }
        if let Ok(index) = value.parse::<u32>() {
            return Ok(CameraId::Index(index));
        }
        if value.starts_with('-') && value[1..].chars().all(|c| c.is_ascii_digit()) {
            return Err(ConfigurationError::new(
                "camera",
                format!("camera index must not be negative: {}", value),
            ));
        }
        Ok(CameraId::Path(PathBuf::from(value)))
    }
}

impl Serialize for CameraId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            CameraId::Index(index) => serializer.serialize_u32(*index),
            other => serializer.serialize_str(&other.to_string()),
        }
    }
}

impl<'de> Deserialize<'de> for CameraId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Index(i64),
            Text(String),
        }
        match Raw::deserialize(deserializer)? {
            Raw::Index(index) => u32::try_from(index)
                .map(CameraId::Index)
                .map_err(|_| serde::de::Error::custom(format!("invalid camera index {}", index))),
            Raw::Text(text) => text.parse().map_err(serde::de::Error::custom),
        }
    }
}

/// Frame size as `WIDTHxHEIGHT`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl Default for Resolution {
    fn default() -> Self {
        Self::new(640, 480)
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

impl FromStr for Resolution {
    type Err = ConfigurationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let invalid = || {
            ConfigurationError::new(
                "resolution",
                format!("expected WIDTHxHEIGHT, got {:?}", value),
            )
        };
        let (w, h) = value
            .trim()
            .split_once(['x', 'X'])
            .ok_or_else(invalid)?;
        let width: u32 = w.trim().parse().map_err(|_| invalid())?;
        let height: u32 = h.trim().parse().map_err(|_| invalid())?;
        if width == 0 || height == 0 {
            return Err(ConfigurationError::new(
                "resolution",
                "width and height must be positive",
            ));
        }
        Ok(Self { width, height })
    }
}

impl Serialize for Resolution {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Resolution {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer)?
            .parse()
            .map_err(serde::de::Error::custom)
    }
}

/// What to open and how to configure it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CaptureSettings {
    pub camera: CameraId,
    pub resolution: Resolution,
    pub frame_rate: u32,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            camera: CameraId::default(),
            resolution: Resolution::default(),
            frame_rate: 30,
        }
    }
}

/// One way of reaching a camera.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OpenStrategy {
    DevicePath(PathBuf),
    Index(u32),
    /// Platform capture backend for the index (MJPEG on V4L2).
    PlatformBackend(u32),
    FallbackIndex0,
}

impl fmt::Display for OpenStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OpenStrategy::DevicePath(path) => write!(f, "device path {}", path.display()),
            OpenStrategy::Index(index) => write!(f, "index {}", index),
            OpenStrategy::PlatformBackend(index) => write!(f, "platform backend {}", index),
            OpenStrategy::FallbackIndex0 => write!(f, "fallback index 0"),
        }
    }
}

/// An open camera handle. Dropping it releases the device.
pub trait CameraDevice: Send {
    fn read_frame(&mut self) -> Result<Frame>;

    /// Resolution negotiated with the device.
    fn resolution(&self) -> Resolution;

    fn label(&self) -> String;
}

/// Turns an open strategy into a device handle.
pub trait DeviceOpener: Send + Sync {
    fn open(
        &self,
        strategy: &OpenStrategy,
        settings: &CaptureSettings,
    ) -> Result<Box<dyn CameraDevice>>;
}

/// Opener for builds without capture support; every strategy fails.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoDeviceOpener;

impl DeviceOpener for NoDeviceOpener {
    fn open(
        &self,
        strategy: &OpenStrategy,
        _settings: &CaptureSettings,
    ) -> Result<Box<dyn CameraDevice>> {
        Err(anyhow!(
            "{}: camera capture not compiled in (enable `ingest-v4l2`)",
            strategy
        ))
    }
}

/// Opener for real devices in this build.
pub fn default_opener() -> Arc<dyn DeviceOpener> {
    #[cfg(feature = "ingest-v4l2")]
    {
        Arc::new(V4l2Opener)
    }
    #[cfg(not(feature = "ingest-v4l2"))]
    {
        Arc::new(NoDeviceOpener)
    }
}
