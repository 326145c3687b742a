//! Error records and the derived system status.
//!
//! Records are keyed by a stable anomaly code. While a record with a given
//! code is active, raising the same code again is a no-op, so a persistent
//! fault shows up once instead of once per frame.

use chrono::Local;
use serde::Serialize;

use crate::error::ControlError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Medium,
    High,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorStatus {
    Active,
    Resolved,
    Dismissed,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorSource {
    Camera,
    Detection,
    System,
}

/// Overall health, ordered by severity.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SystemStatus {
    #[default]
    Normal,
    Warning,
    Error,
}

impl From<Severity> for SystemStatus {
    fn from(severity: Severity) -> Self {
        match severity {
            Severity::Medium => SystemStatus::Warning,
            Severity::High => SystemStatus::Error,
        }
    }
}

/// Figures captured when a record is raised.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct ErrorDetails {
    pub count: usize,
    pub frame_rate: f32,
    pub system_load: f32,
}

/// What to raise.
#[derive(Clone, Debug, PartialEq)]
pub struct Anomaly {
    pub code: &'static str,
    pub title: String,
    pub message: String,
    pub severity: Severity,
    pub source: ErrorSource,
}

impl Anomaly {
    pub fn new(
        code: &'static str,
        severity: Severity,
        source: ErrorSource,
        title: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            code,
            title: title.into(),
            message: message.into(),
            severity,
            source,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ErrorRecord {
    pub id: u64,
    pub code: String,
    pub timestamp: String,
    pub title: String,
    pub message: String,
    pub severity: Severity,
    pub status: ErrorStatus,
    pub source: ErrorSource,
    pub details: ErrorDetails,
}

impl ErrorRecord {
    pub fn is_active(&self) -> bool {
        self.status == ErrorStatus::Active
    }
}

#[derive(Debug)]
pub struct ErrorBoard {
    records: Vec<ErrorRecord>,
    next_id: u64,
    status: SystemStatus,
}

impl Default for ErrorBoard {
    fn default() -> Self {
        Self::new()
    }
}

impl ErrorBoard {
    pub fn new() -> Self {
        Self {
            records: Vec::new(),
            next_id: 1,
            status: SystemStatus::Normal,
        }
    }

    /// Create a record unless one with the same code is already active.
    pub fn raise(&mut self, anomaly: Anomaly, details: ErrorDetails) -> Option<ErrorRecord> {
        if self
            .records
            .iter()
            .any(|r| r.is_active() && r.code == anomaly.code)
        {
            return None;
        }
        let record = ErrorRecord {
            id: self.next_id,
            code: anomaly.code.to_string(),
            timestamp: Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
            title: anomaly.title,
            message: anomaly.message,
            severity: anomaly.severity,
            status: ErrorStatus::Active,
            source: anomaly.source,
            details,
        };
        self.next_id += 1;
        self.records.push(record.clone());
        self.recompute();
        Some(record)
    }

    pub fn resolve(&mut self, id: u64) -> Result<ErrorRecord, ControlError> {
        self.transition(id, ErrorStatus::Resolved)
    }

    pub fn dismiss(&mut self, id: u64) -> Result<ErrorRecord, ControlError> {
        self.transition(id, ErrorStatus::Dismissed)
    }

    fn transition(&mut self, id: u64, to: ErrorStatus) -> Result<ErrorRecord, ControlError> {
        let record = self
            .records
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or(ControlError::UnknownRecord(id))?;
        if !record.is_active() {
            return Err(ControlError::RecordNotActive(id));
        }
        record.status = to;
        let updated = record.clone();
        self.recompute();
        Ok(updated)
    }

    /// Drop every record. Returns how many were removed.
    pub fn clear(&mut self) -> usize {
        let removed = self.records.len();
        self.records.clear();
        self.recompute();
        removed
    }

    pub fn get(&self, id: u64) -> Option<&ErrorRecord> {
        self.records.iter().find(|r| r.id == id)
    }

    pub fn active(&self) -> Vec<ErrorRecord> {
        self.records.iter().filter(|r| r.is_active()).cloned().collect()
    }

    pub fn all(&self) -> Vec<ErrorRecord> {
        self.records.clone()
    }

    pub fn is_active(&self, code: &str) -> bool {
        self.records.iter().any(|r| r.is_active() && r.code == code)
    }

    pub fn system_status(&self) -> SystemStatus {
        self.status
    }

    fn recompute(&mut self) {
        self.status = self
            .records
            .iter()
            .filter(|r| r.is_active())
            .map(|r| SystemStatus::from(r.severity))
            .max()
            .unwrap_or(SystemStatus::Normal);
    }
}
