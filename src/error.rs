//! Error taxonomy surfaced by the pipeline and the control interface.
//!
//! Anomalies inside a stream cycle are converted into log entries and error
//! records; these types exist so callers at the control boundary can match on
//! the kind of failure instead of parsing messages.

use thiserror::Error;

/// Camera acquisition failures.
#[derive(Debug, Error)]
pub enum CameraError {
    /// No strategy in the open plan produced a device handle.
    #[error("no camera reachable for {camera}: {reason}")]
    Open { camera: String, reason: String },

    /// A read failed and the bounded reconnect did not recover it.
    #[error("camera read failed: {0}")]
    Read(String),
}

/// Inference failures. The detector never propagates these past
/// `Detector::detect`; `Detector::try_detect` exposes them to the orchestrator.
#[derive(Debug, Error)]
pub enum DetectionError {
    #[error("invalid frame: {0}")]
    InvalidFrame(String),

    #[error("inference failed: {0}")]
    Inference(String),

    #[error("unexpected model output: {0}")]
    Output(String),
}

/// Detections arrived in a form that is not a sequence.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("malformed detection input: {0}")]
pub struct MalformedInputError(pub String);

/// An invalid control payload. Prior state is left intact.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("invalid {field}: {message}")]
pub struct ConfigurationError {
    pub field: String,
    pub message: String,
}

impl ConfigurationError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Failures of operator actions on the control interface.
#[derive(Debug, Error)]
pub enum ControlError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error("error record {0} not found")]
    UnknownRecord(u64),

    #[error("error record {0} is not active")]
    RecordNotActive(u64),

    #[error(transparent)]
    Camera(#[from] CameraError),

    #[error("export failed: {0}")]
    Export(String),
}
