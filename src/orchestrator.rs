//! Per-stream frame loop and the state it owns.
//!
//! `StreamOrchestrator` is the only writer of counts, statistics, the log book
//! and the error board. One call to `run_cycle` captures, optionally detects,
//! annotates and encodes exactly one frame; every anomaly met on the way is
//! turned into a log entry or an error record and the cycle still yields a
//! frame.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::NaiveDateTime;
use serde::Serialize;

use crate::alerts::{
    Anomaly, ErrorBoard, ErrorDetails, ErrorRecord, ErrorSource, Severity, SystemStatus,
};
use crate::annotate::{render_placeholder, FrameAnnotator};
use crate::config::{
    AppliedUpdate, CameraUpdate, DetectionUpdate, Sensitivity, SettingsUpdate, StreamSettings,
};
use crate::counter::OccupancyCounter;
use crate::detect::{DetectionSet, Detector, ExecutionTarget};
use crate::error::{CameraError, ControlError};
use crate::events::{Event, EventBus};
use crate::frame::{encode_jpeg, EncodedFrame, FrameOrigin};
use crate::ingest::{
    probe_camera, CameraId, CaptureSettings, DeviceOpener, FrameSource, Resolution, SourceMode,
    SourceOptions,
};
use crate::logbook::{LogBook, LogEntry, LogLevel, LogPage, LogQuery};
use crate::stats::{OccupancyStats, StatsSnapshot};

/// Measured FPS below this share of the target counts as a slow window.
pub const LOW_FPS_RATIO: f32 = 0.7;
/// Below this share a slow window also signals high system load.
pub const HIGH_LOAD_RATIO: f32 = 0.5;
/// Consecutive slow windows before a `low-fps` record is raised.
pub const LOW_FPS_WINDOWS: u32 = 3;

const FPS_WINDOW: Duration = Duration::from_secs(1);

pub const CODE_CAMERA_DISCONNECTED: &str = "camera-disconnected";
pub const CODE_CAMERA_UNAVAILABLE: &str = "camera-unavailable";
pub const CODE_DETECTION_ERROR: &str = "detection-error";
pub const CODE_LOW_FPS: &str = "low-fps";
pub const CODE_HIGH_SYSTEM_LOAD: &str = "high-system-load";
pub const CODE_RESOLUTION_MISMATCH: &str = "resolution-mismatch";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum StreamState {
    Disconnected,
    Connecting,
    Streaming { tracking: bool },
    Error,
}

impl StreamState {
    pub fn name(&self) -> &'static str {
        match self {
            StreamState::Disconnected => "disconnected",
            StreamState::Connecting => "connecting",
            StreamState::Streaming { .. } => "streaming",
            StreamState::Error => "error",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorScope {
    Active,
    All,
}

/// Read-only view of the stream for the control surface.
#[derive(Clone, Debug, Serialize)]
pub struct StreamStatus {
    pub state: StreamState,
    pub system_status: SystemStatus,
    pub tracking: bool,
    pub paused: bool,
    pub source_mode: Option<SourceMode>,
    pub detector_backend: &'static str,
    pub execution_target: ExecutionTarget,
    pub settings: StreamSettings,
}

/// Outcome of a camera test.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CameraProbe {
    pub camera: String,
    pub success: bool,
    /// The candidate is the live camera; no second handle was opened.
    pub live: bool,
    pub resolution: Option<Resolution>,
    pub message: String,
}

/// Result of [`StreamOrchestrator::begin_camera_test`].
pub enum CameraTest {
    Finished(CameraProbe),
    Pending(PendingCameraTest),
}

/// A camera check that still has to open the device.
///
/// Holds its own opener handle, so it runs without the orchestrator.
pub struct PendingCameraTest {
    capture: CaptureSettings,
    opener: Arc<dyn DeviceOpener>,
}

impl PendingCameraTest {
    pub fn camera(&self) -> &CameraId {
        &self.capture.camera
    }

    /// Open the candidate, read one frame and release it.
    pub fn run(&self) -> Result<Resolution, CameraError> {
        probe_camera(self.opener.as_ref(), &self.capture)
    }
}

/// Sizing of the orchestrator's bounded stores plus source behaviour.
#[derive(Clone, Debug)]
pub struct OrchestratorOptions {
    pub source: SourceOptions,
    pub log_capacity: usize,
    pub history_limit: usize,
}

impl Default for OrchestratorOptions {
    fn default() -> Self {
        Self {
            source: SourceOptions::default(),
            log_capacity: crate::logbook::DEFAULT_LOG_CAPACITY,
            history_limit: crate::stats::DEFAULT_HISTORY_LIMIT,
        }
    }
}

pub struct StreamOrchestrator {
    settings: StreamSettings,
    source_options: SourceOptions,
    opener: Arc<dyn DeviceOpener>,
    source: Option<FrameSource>,
    detector: Detector,
    counter: OccupancyCounter,
    annotator: FrameAnnotator,
    stats: OccupancyStats,
    logbook: LogBook,
    errors: ErrorBoard,
    events: Arc<EventBus>,
    state: StreamState,
    tracking: bool,
    paused: bool,
    last_frame: Option<EncodedFrame>,
    fps_window_start: Instant,
    fps_frames: u32,
    slow_windows: u32,
    last_count_log: Option<Instant>,
    last_restore_attempt: Option<Instant>,
    published_status: (SystemStatus, StreamState),
    stopped: bool,
}

impl StreamOrchestrator {
    /// Build the orchestrator and open the configured camera.
    ///
    /// Fails only when `options.source.require_device` is set and no device
    /// opens. Otherwise an unreachable camera degrades to synthetic frames and
    /// a `camera-unavailable` warning is raised.
    pub fn new(
        settings: StreamSettings,
        detector: Detector,
        opener: Arc<dyn DeviceOpener>,
        options: OrchestratorOptions,
        events: Arc<EventBus>,
    ) -> Result<Self, CameraError> {
        let mut logbook = LogBook::new(options.log_capacity);
        logbook.set_enabled(settings.logging_enabled);
        let mut orchestrator = Self {
            annotator: FrameAnnotator::new(settings.show_fps),
            settings,
            source_options: options.source,
            opener,
            source: None,
            detector,
            counter: OccupancyCounter::new(),
            stats: OccupancyStats::new(options.history_limit),
            logbook,
            errors: ErrorBoard::new(),
            events,
            state: StreamState::Disconnected,
            tracking: false,
            paused: false,
            last_frame: None,
            fps_window_start: Instant::now(),
            fps_frames: 0,
            slow_windows: 0,
            last_count_log: None,
            last_restore_attempt: None,
            published_status: (SystemStatus::Normal, StreamState::Disconnected),
            stopped: false,
        };
        let capture = orchestrator.settings.capture.clone();
        orchestrator.connect(capture)?;
        Ok(orchestrator)
    }

    // ------------------------------------------------------------------
    // cycle
    // ------------------------------------------------------------------

    /// Produce the next encoded frame. Never fails.
    pub fn run_cycle(&mut self) -> EncodedFrame {
        if self.paused {
            return self.last_or_placeholder("PAUSED");
        }

        self.maybe_restore();

        let captured = match self.source.as_mut() {
            None => return self.last_or_placeholder("NO CAMERA"),
            Some(source) => source.capture_frame(),
        };
        let frame = match captured {
            Ok(frame) => frame,
            Err(err) => {
                self.on_camera_failure(&err);
                match self.source.as_mut() {
                    Some(source) => source.synthesize(),
                    None => return self.last_or_placeholder("NO CAMERA"),
                }
            }
        };
        self.sync_state();
        self.tick_fps();

        let analyzable = frame.origin == FrameOrigin::Device
            || self.source.as_ref().map(FrameSource::mode) == Some(SourceMode::Synthetic);
        let track = self.tracking && analyzable;

        let mut detections = DetectionSet::new();
        if track {
            let started = Instant::now();
            match self
                .detector
                .try_detect(&frame, Some(self.settings.confidence_threshold))
            {
                Ok(set) => {
                    self.stats.record_detection_latency(started.elapsed());
                    let count = self.counter.update(Some(&set));
                    self.stats.record_count(count);
                    self.maybe_log_count(count);
                    detections = set;
                }
                Err(err) => {
                    self.counter.reset();
                    self.stats.set_current(0);
                    self.log_event(LogLevel::Error, format!("Error during detection: {}", err));
                    self.raise(Anomaly::new(
                        CODE_DETECTION_ERROR,
                        Severity::High,
                        ErrorSource::Detection,
                        "Detection error",
                        err.to_string(),
                    ));
                }
            }
            self.events
                .publish(Event::StatsUpdate(self.stats.snapshot()));
        }

        let mut image = frame.into_image();
        if track {
            let fps = Some(self.stats.frame_rate()).filter(|fps| *fps > 0.0);
            self.annotator
                .annotate(&mut image, &detections, self.counter.count(), fps);
        }

        match encode_jpeg(&image, self.settings.jpeg_quality) {
            Ok(bytes) => {
                let encoded: EncodedFrame = Arc::new(bytes);
                self.last_frame = Some(encoded.clone());
                encoded
            }
            Err(err) => {
                log::error!("frame encode failed: {:#}", err);
                self.last_or_placeholder("ENCODE ERROR")
            }
        }
    }

    fn last_or_placeholder(&mut self, message: &str) -> EncodedFrame {
        if let Some(frame) = &self.last_frame {
            return frame.clone();
        }
        let res = self.settings.capture.resolution;
        let image = render_placeholder(res.width, res.height, message);
        match encode_jpeg(&image, self.settings.jpeg_quality) {
            Ok(bytes) => Arc::new(bytes),
            Err(err) => {
                log::error!("placeholder encode failed: {:#}", err);
                Arc::new(Vec::new())
            }
        }
    }

    fn on_camera_failure(&mut self, err: &CameraError) {
        self.log_event(
            LogLevel::Error,
            format!("Failed to read frame from camera: {}", err),
        );
        self.raise(Anomaly::new(
            CODE_CAMERA_DISCONNECTED,
            Severity::High,
            ErrorSource::Camera,
            "Camera disconnected",
            format!("Camera {} stopped delivering frames: {}", self.settings.capture.camera, err),
        ));
        // the source already spent its reconnect on this failure
        self.last_restore_attempt = Some(Instant::now());
        self.state = StreamState::Error;
    }

    /// At most one restore attempt per `reconnect_interval` while degraded
    /// or while no source is open.
    fn maybe_restore(&mut self) {
        if self.stopped {
            return;
        }
        let degraded = self.source.as_ref().map_or(true, FrameSource::is_degraded);
        if !degraded {
            return;
        }
        let due = self
            .last_restore_attempt
            .map_or(true, |at| at.elapsed() >= self.settings.reconnect_interval);
        if !due {
            return;
        }
        self.last_restore_attempt = Some(Instant::now());
        let camera = self.settings.capture.camera.to_string();
        match self.source.as_mut() {
            Some(source) => {
                if source.try_restore() {
                    self.log_event(LogLevel::Info, format!("Camera {} reconnected", camera));
                    self.check_resolution();
                }
            }
            None => {
                let capture = self.settings.capture.clone();
                if self.connect(capture).is_ok() {
                    self.log_event(LogLevel::Info, format!("Camera {} reconnected", camera));
                }
            }
        }
    }

    fn sync_state(&mut self) {
        self.state = match &self.source {
            None => StreamState::Disconnected,
            Some(source) if source.is_degraded() => StreamState::Error,
            Some(_) => StreamState::Streaming {
                tracking: self.tracking,
            },
        };
        self.publish_status();
    }

    fn tick_fps(&mut self) {
        self.fps_frames += 1;
        let elapsed = self.fps_window_start.elapsed();
        if elapsed < FPS_WINDOW {
            return;
        }
        let fps = self.fps_frames as f32 / elapsed.as_secs_f32();
        self.fps_frames = 0;
        self.fps_window_start = Instant::now();
        self.stats.set_frame_rate(fps);
        self.check_frame_rate(fps);
    }

    fn check_frame_rate(&mut self, fps: f32) {
        let target = self.settings.capture.frame_rate as f32;
        if fps <= 0.0 || fps >= target * LOW_FPS_RATIO {
            self.slow_windows = 0;
            return;
        }
        self.slow_windows += 1;
        if self.slow_windows < LOW_FPS_WINDOWS {
            return;
        }
        let raised = self.raise(Anomaly::new(
            CODE_LOW_FPS,
            Severity::Medium,
            ErrorSource::System,
            "Low frame rate",
            format!("Low frame rate detected ({:.1} FPS, target {})", fps, target),
        ));
        if raised.is_some() {
            self.log_event(
                LogLevel::Warning,
                format!("Warning: Low frame rate detected ({:.1} FPS)", fps),
            );
        }
        if fps < target * HIGH_LOAD_RATIO {
            let raised = self.raise(Anomaly::new(
                CODE_HIGH_SYSTEM_LOAD,
                Severity::Medium,
                ErrorSource::System,
                "High system load",
                format!(
                    "Frame rate {:.1} FPS is below half the {} FPS target",
                    fps, target
                ),
            ));
            if raised.is_some() {
                self.log_event(LogLevel::Warning, "Warning: High system load detected".into());
            }
        }
    }

    fn maybe_log_count(&mut self, count: usize) {
        if !self.settings.log_events {
            return;
        }
        let due = self
            .last_count_log
            .map_or(true, |at| at.elapsed() >= self.settings.log_frequency());
        if due {
            self.last_count_log = Some(Instant::now());
            self.log_event(
                LogLevel::Info,
                format!("Current count: {} people detected", count),
            );
        }
    }

    // ------------------------------------------------------------------
    // camera lifecycle
    // ------------------------------------------------------------------

    /// Close the current source, then open one for `capture`.
    fn connect(&mut self, capture: CaptureSettings) -> Result<(), CameraError> {
        if let Some(mut old) = self.source.take() {
            old.close();
        }
        self.state = StreamState::Connecting;
        self.detector.reset_cache();
        self.fps_frames = 0;
        self.fps_window_start = Instant::now();
        self.slow_windows = 0;

        let opened = FrameSource::open(
            capture.clone(),
            self.opener.clone(),
            self.source_options.clone(),
        );
        let source = match opened {
            Ok(source) => source,
            Err(err) => {
                self.state = StreamState::Disconnected;
                self.last_restore_attempt = Some(Instant::now());
                self.log_event(LogLevel::Error, format!("Error opening camera: {}", err));
                self.raise(Anomaly::new(
                    CODE_CAMERA_UNAVAILABLE,
                    Severity::High,
                    ErrorSource::Camera,
                    "Camera unavailable",
                    err.to_string(),
                ));
                self.publish_status();
                return Err(err);
            }
        };

        let degraded = source.is_degraded();
        let reason = source.last_error().unwrap_or("no device").to_string();
        self.source = Some(source);
        self.last_restore_attempt = Some(Instant::now());

        if degraded {
            self.log_event(
                LogLevel::Warning,
                format!("Warning: camera {} unavailable, using synthetic frames", capture.camera),
            );
            self.raise(Anomaly::new(
                CODE_CAMERA_UNAVAILABLE,
                Severity::Medium,
                ErrorSource::Camera,
                "Camera unavailable",
                format!("Camera {} could not be opened: {}", capture.camera, reason),
            ));
        } else {
            self.check_resolution();
        }
        self.sync_state();
        Ok(())
    }

    fn check_resolution(&mut self) {
        let Some(actual) = self.source.as_ref().and_then(FrameSource::negotiated_resolution) else {
            return;
        };
        let expected = self.settings.capture.resolution;
        if actual == expected {
            return;
        }
        let message = format!(
            "Camera resolution mismatch. Expected: {}, Got: {}",
            expected, actual
        );
        self.log_event(LogLevel::Warning, format!("Warning: {}", message));
        self.raise(Anomaly::new(
            CODE_RESOLUTION_MISMATCH,
            Severity::Medium,
            ErrorSource::Camera,
            "Resolution mismatch",
            message,
        ));
    }

    // ------------------------------------------------------------------
    // logging and records
    // ------------------------------------------------------------------

    fn log_event(&mut self, level: LogLevel, message: String) {
        match level {
            LogLevel::Info => log::info!("{}", message),
            LogLevel::Warning => log::warn!("{}", message),
            LogLevel::Error => log::error!("{}", message),
        }
        let entry = LogEntry::new(message, level, self.counter.count());
        if let Some(entry) = self.logbook.append(entry) {
            self.events.publish(Event::LogUpdate(entry));
        }
    }

    fn raise(&mut self, anomaly: Anomaly) -> Option<ErrorRecord> {
        if !self.settings.log_errors {
            return None;
        }
        let details = ErrorDetails {
            count: self.counter.count(),
            frame_rate: self.stats.frame_rate(),
            system_load: self.stats.system_load(),
        };
        let record = self.errors.raise(anomaly, details)?;
        self.events.publish(Event::NewError(record.clone()));
        self.publish_status();
        Some(record)
    }

    fn publish_status(&mut self) {
        let current = (self.errors.system_status(), self.state);
        if current == self.published_status {
            return;
        }
        self.published_status = current;
        self.events.publish(Event::StatusChange {
            system_status: current.0,
            stream_state: current.1.name().to_string(),
        });
    }

    // ------------------------------------------------------------------
    // controls
    // ------------------------------------------------------------------

    pub fn set_tracking(&mut self, tracking: bool) {
        if self.tracking == tracking {
            return;
        }
        self.tracking = tracking;
        if !tracking {
            self.counter.reset();
            self.stats.set_current(0);
        }
        self.log_event(
            LogLevel::Info,
            format!("Tracking {}", if tracking { "started" } else { "stopped" }),
        );
        if let StreamState::Streaming { .. } = self.state {
            self.state = StreamState::Streaming { tracking };
        }
        self.publish_status();
    }

    pub fn set_paused(&mut self, paused: bool) {
        if self.paused == paused {
            return;
        }
        self.paused = paused;
        if !paused {
            self.fps_frames = 0;
            self.fps_window_start = Instant::now();
        }
        self.log_event(
            LogLevel::Info,
            format!("Stream {}", if paused { "paused" } else { "resumed" }),
        );
    }

    /// Change camera identity, resolution or frame rate.
    pub fn switch_camera(&mut self, update: CameraUpdate) -> Result<AppliedUpdate, ControlError> {
        self.apply_update(&SettingsUpdate {
            camera: Some(update),
            ..SettingsUpdate::default()
        })
    }

    pub fn set_sensitivity(&mut self, level: Sensitivity) -> Result<AppliedUpdate, ControlError> {
        self.apply_update(&SettingsUpdate {
            detection: Some(DetectionUpdate {
                sensitivity: Some(level),
                confidence_threshold: None,
            }),
            ..SettingsUpdate::default()
        })
    }

    /// Apply a partial settings update.
    ///
    /// The whole update is validated first; on a validation error nothing
    /// changes. A camera change tears the current source down before the new
    /// one is opened.
    pub fn apply_update(&mut self, update: &SettingsUpdate) -> Result<AppliedUpdate, ControlError> {
        let applied = match self.settings.apply(update) {
            Ok(applied) => applied,
            Err(err) => {
                self.log_event(
                    LogLevel::Warning,
                    format!("Warning: rejected configuration update: {}", err),
                );
                return Err(err.into());
            }
        };
        let previous = std::mem::replace(&mut self.settings, applied.settings.clone());

        if applied.logging_changed {
            self.logbook.set_enabled(self.settings.logging_enabled);
            self.log_event(
                LogLevel::Info,
                format!(
                    "Logging preferences updated: enabled={}, frequency={}s",
                    self.settings.logging_enabled, self.settings.log_frequency_seconds
                ),
            );
        }
        if applied.detection_changed {
            self.detector
                .set_confidence_threshold(self.settings.confidence_threshold);
            if self.settings.sensitivity != previous.sensitivity {
                self.log_event(
                    LogLevel::Info,
                    format!("Detection sensitivity set to {:?}", self.settings.sensitivity),
                );
            }
            self.log_event(
                LogLevel::Info,
                format!(
                    "Detection confidence threshold set to {:.2}",
                    self.settings.confidence_threshold
                ),
            );
        }
        if applied.camera_changed {
            let capture = self.settings.capture.clone();
            self.connect(capture.clone())?;
            self.log_event(
                LogLevel::Info,
                format!(
                    "Camera configuration updated: Camera {}, {} @ {}fps",
                    capture.camera, capture.resolution, capture.frame_rate
                ),
            );
        }
        Ok(applied)
    }

    /// Check a candidate camera in one call.
    ///
    /// Equivalent to [`begin_camera_test`](Self::begin_camera_test), running
    /// the pending check and [`finish_camera_test`](Self::finish_camera_test).
    /// Callers that share the orchestrator behind a lock should use the split
    /// form so the device is never touched while the lock is held.
    pub fn test_camera(&mut self, camera: CameraId) -> CameraProbe {
        match self.begin_camera_test(camera) {
            CameraTest::Finished(probe) => probe,
            CameraTest::Pending(pending) => {
                let outcome = pending.run();
                self.finish_camera_test(&pending, outcome)
            }
        }
    }

    /// First half of a camera check.
    ///
    /// The live camera is reported from the running source right away. Any
    /// other candidate comes back as a [`PendingCameraTest`] that opens, reads
    /// once and releases the device on its own, without this orchestrator.
    pub fn begin_camera_test(&mut self, camera: CameraId) -> CameraTest {
        self.log_event(LogLevel::Info, format!("Testing camera {}", camera));
        if camera != self.settings.capture.camera {
            return CameraTest::Pending(PendingCameraTest {
                capture: CaptureSettings {
                    camera,
                    ..self.settings.capture.clone()
                },
                opener: self.opener.clone(),
            });
        }

        let (success, resolution, message) = match &self.source {
            Some(source) if !source.is_degraded() => (
                true,
                source
                    .negotiated_resolution()
                    .or(Some(self.settings.capture.resolution)),
                "camera is live".to_string(),
            ),
            Some(source) => (
                false,
                None,
                source.last_error().unwrap_or("camera degraded").to_string(),
            ),
            None => (false, None, "camera not connected".to_string()),
        };
        CameraTest::Finished(CameraProbe {
            camera: camera.to_string(),
            success,
            live: true,
            resolution,
            message,
        })
    }

    /// Second half of a camera check: record the outcome.
    pub fn finish_camera_test(
        &mut self,
        pending: &PendingCameraTest,
        outcome: Result<Resolution, CameraError>,
    ) -> CameraProbe {
        let camera = pending.camera();
        match outcome {
            Ok(resolution) => CameraProbe {
                camera: camera.to_string(),
                success: true,
                live: false,
                resolution: Some(resolution),
                message: "camera reachable".to_string(),
            },
            Err(err) => {
                self.log_event(
                    LogLevel::Warning,
                    format!("Warning: camera test failed for {}: {}", camera, err),
                );
                CameraProbe {
                    camera: camera.to_string(),
                    success: false,
                    live: false,
                    resolution: None,
                    message: err.to_string(),
                }
            }
        }
    }

    pub fn logs(&self, query: &LogQuery) -> LogPage {
        self.logbook.query(query)
    }

    pub fn export_logs(
        &self,
        start: Option<NaiveDateTime>,
        end: Option<NaiveDateTime>,
    ) -> Result<Vec<u8>, ControlError> {
        self.logbook
            .export_csv(start, end)
            .map_err(|err| ControlError::Export(format!("{:#}", err)))
    }

    pub fn errors(&self, scope: ErrorScope) -> Vec<ErrorRecord> {
        match scope {
            ErrorScope::Active => self.errors.active(),
            ErrorScope::All => self.errors.all(),
        }
    }

    /// Resolve a record and run its remediation: camera records rebuild the
    /// frame source, detection records reset the detector cache.
    pub fn resolve_error(&mut self, id: u64) -> Result<ErrorRecord, ControlError> {
        let record = self.errors.resolve(id)?;
        self.events.publish(Event::ErrorUpdate(record.clone()));
        self.log_event(LogLevel::Info, format!("Resolved error #{} ({})", id, record.code));
        match record.source {
            ErrorSource::Camera => {
                let capture = self.settings.capture.clone();
                if let Err(err) = self.connect(capture) {
                    log::warn!("camera remediation for #{} failed: {}", id, err);
                }
            }
            ErrorSource::Detection => self.detector.reset_cache(),
            ErrorSource::System => {}
        }
        self.publish_status();
        Ok(record)
    }

    pub fn dismiss_error(&mut self, id: u64) -> Result<ErrorRecord, ControlError> {
        let record = self.errors.dismiss(id)?;
        self.events.publish(Event::ErrorUpdate(record.clone()));
        self.log_event(LogLevel::Info, format!("Dismissed error #{}", id));
        self.publish_status();
        Ok(record)
    }

    pub fn clear_errors(&mut self) -> usize {
        let removed = self.errors.clear();
        self.log_event(LogLevel::Info, format!("Cleared {} error records", removed));
        self.publish_status();
        removed
    }

    // ------------------------------------------------------------------
    // accessors
    // ------------------------------------------------------------------

    pub fn snapshot(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn status(&self) -> StreamStatus {
        StreamStatus {
            state: self.state,
            system_status: self.errors.system_status(),
            tracking: self.tracking,
            paused: self.paused,
            source_mode: self.source.as_ref().map(FrameSource::mode),
            detector_backend: self.detector.backend_name(),
            execution_target: self.detector.execution_target(),
            settings: self.settings.clone(),
        }
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    pub fn system_status(&self) -> SystemStatus {
        self.errors.system_status()
    }

    pub fn settings(&self) -> &StreamSettings {
        &self.settings
    }

    pub fn is_tracking(&self) -> bool {
        self.tracking
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn current_count(&self) -> usize {
        self.counter.count()
    }

    pub fn source_mode(&self) -> Option<SourceMode> {
        self.source.as_ref().map(FrameSource::mode)
    }

    pub fn history_len(&self) -> usize {
        self.stats.history_len()
    }

    /// Release the camera. The orchestrator yields cached frames afterwards.
    pub fn shutdown(&mut self) {
        self.stopped = true;
        if let Some(mut source) = self.source.take() {
            source.close();
        }
        self.state = StreamState::Disconnected;
        self.log_event(LogLevel::Info, "Stream stopped".to_string());
        self.publish_status();
    }
}
