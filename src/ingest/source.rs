use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use super::synthetic::SyntheticScene;
use super::{CameraDevice, CaptureSettings, DeviceOpener, OpenStrategy, Resolution};
use crate::error::CameraError;
use crate::frame::Frame;

/// Pause between closing a failed device and reopening it.
pub const DEFAULT_RECONNECT_BACKOFF: Duration = Duration::from_secs(1);

const FALLBACK_LABEL: &str = "NO CAMERA - SYNTHETIC FEED";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceMode {
    /// A real device is open.
    Device,
    /// `stub://` camera; synthetic frames by configuration.
    Synthetic,
    /// The device is unreachable; synthetic frames until restored.
    Fallback,
}

#[derive(Clone, Debug)]
pub struct SourceOptions {
    /// Fail `open` instead of degrading to synthetic frames.
    pub require_device: bool,
    pub reconnect_backoff: Duration,
}

impl Default for SourceOptions {
    fn default() -> Self {
        Self {
            require_device: false,
            reconnect_backoff: DEFAULT_RECONNECT_BACKOFF,
        }
    }
}

/// The live camera of a stream.
///
/// Holds at most one device handle. The handle is released by `close` or on
/// drop, whichever comes first.
pub struct FrameSource {
    settings: CaptureSettings,
    opener: Arc<dyn DeviceOpener>,
    options: SourceOptions,
    device: Option<Box<dyn CameraDevice>>,
    mode: SourceMode,
    scene: SyntheticScene,
    last_error: Option<String>,
}

impl FrameSource {
    /// Open the camera named in `settings` by walking its open plan.
    pub fn open(
        settings: CaptureSettings,
        opener: Arc<dyn DeviceOpener>,
        options: SourceOptions,
    ) -> Result<Self, CameraError> {
        let label = match &settings.camera {
            super::CameraId::Synthetic(name) if !name.is_empty() => {
                format!("SYNTHETIC {}", name)
            }
            super::CameraId::Synthetic(_) => "SYNTHETIC FEED".to_string(),
            _ => FALLBACK_LABEL.to_string(),
        };
        let scene = SyntheticScene::new(
            settings.resolution.width,
            settings.resolution.height,
            label,
        );
        let mut source = Self {
            settings,
            opener,
            options,
            device: None,
            mode: SourceMode::Fallback,
            scene,
            last_error: None,
        };

        if source.settings.camera.is_synthetic() {
            source.mode = SourceMode::Synthetic;
            log::info!("camera {}: synthetic source", source.settings.camera);
            return Ok(source);
        }

        match source.open_device() {
            Ok(()) => Ok(source),
            Err(reason) if source.options.require_device => Err(CameraError::Open {
                camera: source.settings.camera.to_string(),
                reason,
            }),
            Err(reason) => {
                log::warn!(
                    "camera {}: no device reachable ({}); using synthetic frames",
                    source.settings.camera,
                    reason
                );
                source.last_error = Some(reason);
                Ok(source)
            }
        }
    }

    /// Walk the open plan once. Each strategy is tried at most once and a
    /// failed strategy leaves no handle behind.
    fn open_device(&mut self) -> Result<(), String> {
        let plan = self.settings.camera.open_plan();
        let mut failures = Vec::with_capacity(plan.len());
        for strategy in &plan {
            match self.opener.open(strategy, &self.settings) {
                Ok(device) => {
                    log::info!(
                        "camera {}: opened {} via {} ({})",
                        self.settings.camera,
                        device.label(),
                        strategy,
                        device.resolution()
                    );
                    self.device = Some(device);
                    self.mode = SourceMode::Device;
                    self.last_error = None;
                    return Ok(());
                }
                Err(err) => {
                    log::debug!("camera {}: {} failed: {:#}", self.settings.camera, strategy, err);
                    failures.push(format!("{}: {:#}", strategy, err));
                }
            }
        }
        self.mode = SourceMode::Fallback;
        if failures.is_empty() {
            Err("empty open plan".to_string())
        } else {
            Err(failures.join("; "))
        }
    }

    /// Next frame.
    ///
    /// A failed device read gets one bounded reconnect: close, sleep the
    /// backoff, reopen, read once more. If that fails too the source switches
    /// to synthetic fallback and the error is returned; later calls yield
    /// synthetic frames until `try_restore` succeeds.
    pub fn capture_frame(&mut self) -> Result<Frame, CameraError> {
        let Some(device) = self.device.as_mut() else {
            return Ok(self.scene.next_frame());
        };
        let first = match device.read_frame() {
            Ok(frame) => return Ok(frame),
            Err(err) => format!("{:#}", err),
        };
        log::warn!(
            "camera {}: read failed ({}); reconnecting",
            self.settings.camera,
            first
        );

        self.close();
        std::thread::sleep(self.options.reconnect_backoff);
        let retry = match self.open_device() {
            Ok(()) => match self.device.as_mut().map(|device| device.read_frame()) {
                Some(Ok(frame)) => return Ok(frame),
                Some(Err(err)) => format!("{:#}", err),
                None => "device vanished".to_string(),
            },
            Err(reason) => reason,
        };

        self.close();
        self.mode = SourceMode::Fallback;
        let message = format!("{} (after reconnect: {})", first, retry);
        self.last_error = Some(message.clone());
        Err(CameraError::Read(message))
    }

    /// One pass over the open plan while degraded. Returns whether a device
    /// is open afterwards.
    pub fn try_restore(&mut self) -> bool {
        match self.mode {
            SourceMode::Device => true,
            SourceMode::Synthetic => false,
            SourceMode::Fallback => match self.open_device() {
                Ok(()) => {
                    log::info!("camera {}: restored", self.settings.camera);
                    true
                }
                Err(reason) => {
                    self.last_error = Some(reason);
                    false
                }
            },
        }
    }

    /// A labelled synthetic frame at the configured resolution.
    pub fn synthesize(&mut self) -> Frame {
        self.scene.next_frame()
    }

    /// Release the device handle. Safe to call repeatedly.
    pub fn close(&mut self) {
        if let Some(device) = self.device.take() {
            log::info!("camera {}: released {}", self.settings.camera, device.label());
            drop(device);
        }
    }

    pub fn mode(&self) -> SourceMode {
        self.mode
    }

    pub fn is_degraded(&self) -> bool {
        self.mode == SourceMode::Fallback
    }

    pub fn has_device(&self) -> bool {
        self.device.is_some()
    }

    pub fn settings(&self) -> &CaptureSettings {
        &self.settings
    }

    /// Resolution negotiated by the open device.
    pub fn negotiated_resolution(&self) -> Option<Resolution> {
        self.device.as_ref().map(|device| device.resolution())
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }
}

/// Check that `settings.camera` can be opened and read, without touching any
/// live source. The index-0 fallback is skipped so a probe only ever reaches
/// the camera it names. The handle is released before returning.
pub fn probe_camera(
    opener: &dyn DeviceOpener,
    settings: &CaptureSettings,
) -> Result<Resolution, CameraError> {
    if settings.camera.is_synthetic() {
        return Ok(settings.resolution);
    }
    let mut failures = Vec::new();
    for strategy in settings.camera.open_plan() {
        if strategy == OpenStrategy::FallbackIndex0 {
            continue;
        }
        match opener.open(&strategy, settings) {
            Ok(mut device) => match device.read_frame() {
                Ok(frame) => return Ok(Resolution::new(frame.width, frame.height)),
                Err(err) => failures.push(format!("{}: read: {:#}", strategy, err)),
            },
            Err(err) => failures.push(format!("{}: {:#}", strategy, err)),
        }
    }
    Err(CameraError::Open {
        camera: settings.camera.to_string(),
        reason: if failures.is_empty() {
            "empty open plan".to_string()
        } else {
            failures.join("; ")
        },
    })
}

impl Drop for FrameSource {
    fn drop(&mut self) {
        self.close();
    }
}
