//! Headcount occupancy monitor
//!
//! Counts the people visible to a single camera and serves an annotated live
//! view plus statistics, logs and error records to a dashboard.
//!
//! # Architecture
//!
//! One stream worker owns the camera and runs the cycle
//! acquire → detect → count → stats → annotate → encode at the configured
//! frame rate. Everything else reads published state:
//!
//! 1. **Never blank**: every cycle yields an encodable frame; an unreachable
//!    camera degrades to synthetic frames instead of failing.
//! 2. **One camera handle**: a camera switch closes the old handle before the
//!    new one opens.
//! 3. **Bounded stores**: count history and the log book are FIFO-bounded.
//! 4. **Deduplicated alerts**: an anomaly code has at most one active record.
//!
//! # Module Structure
//!
//! - `ingest`: camera identifiers, open plans, device and synthetic sources
//! - `detect`: inference backends, output decoding, NMS, the `Detector`
//! - `counter`, `stats`: occupancy count and rolling statistics
//! - `logbook`, `alerts`: operator log and error records
//! - `annotate`, `frame`: overlays and JPEG encoding
//! - `orchestrator`, `worker`: the stream cycle and the thread that drives it
//! - `feed`, `events`: fan-out of frames and dashboard events
//! - `api`: HTTP control and streaming surface
//! - `config`: file, environment and runtime settings

pub mod alerts;
pub mod annotate;
pub mod api;
pub mod config;
pub mod counter;
pub mod detect;
pub mod error;
pub mod events;
pub mod feed;
pub mod frame;
pub mod ingest;
pub mod logbook;
pub mod orchestrator;
pub mod stats;
pub mod ui;
pub mod worker;

pub use alerts::{ErrorRecord, ErrorStatus, Severity, SystemStatus};
pub use config::{MonitorConfig, SettingsUpdate, StreamSettings};
pub use detect::{Detector, DetectionSet};
pub use error::{CameraError, ConfigurationError, ControlError, DetectionError};
pub use orchestrator::{StreamOrchestrator, StreamState};
pub use stats::StatsSnapshot;
pub use worker::Monitor;
