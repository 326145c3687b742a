//! Bounded operator log with query and CSV export.

use std::collections::VecDeque;

use anyhow::{Context, Result};
use chrono::{DateTime, Local, NaiveDate, NaiveDateTime, SubsecRound};
use serde::{Deserialize, Serialize};

use crate::error::ConfigurationError;

pub const DEFAULT_LOG_CAPACITY: usize = 1000;
pub const MIN_LOG_CAPACITY: usize = 1000;
pub const MAX_LOG_CAPACITY: usize = 10_000;
pub const DEFAULT_PAGE_SIZE: usize = 20;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warning,
    Error,
}

/// Row status shown in log listings and exports.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RowStatus {
    Normal,
    Warning,
    Error,
}

impl From<LogLevel> for RowStatus {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Info => RowStatus::Normal,
            LogLevel::Warning => RowStatus::Warning,
            LogLevel::Error => RowStatus::Error,
        }
    }
}

impl RowStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RowStatus::Normal => "normal",
            RowStatus::Warning => "warning",
            RowStatus::Error => "error",
        }
    }
}

impl std::str::FromStr for RowStatus {
    type Err = ConfigurationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "normal" | "info" => Ok(RowStatus::Normal),
            "warning" | "warn" => Ok(RowStatus::Warning),
            "error" => Ok(RowStatus::Error),
            other => Err(ConfigurationError::new(
                "status",
                format!("unknown status {:?}", other),
            )),
        }
    }
}

/// One operator-visible log line.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct LogEntry {
    pub timestamp: String,
    pub message: String,
    pub level: LogLevel,
    pub count: usize,
    #[serde(skip)]
    recorded_at: NaiveDateTime,
}

impl LogEntry {
    pub fn new(message: impl Into<String>, level: LogLevel, count: usize) -> Self {
        Self::at(Local::now(), message, level, count)
    }

    pub fn at(
        when: DateTime<Local>,
        message: impl Into<String>,
        level: LogLevel,
        count: usize,
    ) -> Self {
        // query bounds have whole-second precision
        let recorded_at = when.naive_local().trunc_subsecs(0);
        Self {
            timestamp: recorded_at.format(TIMESTAMP_FORMAT).to_string(),
            message: message.into(),
            level,
            count,
            recorded_at,
        }
    }

    pub fn recorded_at(&self) -> NaiveDateTime {
        self.recorded_at
    }
}

/// A listed log line.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct LogRow {
    pub id: u64,
    pub timestamp: String,
    pub count: usize,
    pub status: RowStatus,
    pub level: LogLevel,
    pub message: String,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct LogPage {
    pub rows: Vec<LogRow>,
    pub total: usize,
    pub page: usize,
    pub page_size: usize,
    pub pages: usize,
}

/// Filter for log listings. Time bounds are inclusive.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LogQuery {
    pub search: Option<String>,
    pub start: Option<NaiveDateTime>,
    pub end: Option<NaiveDateTime>,
    pub status: Option<RowStatus>,
    /// 1-based.
    pub page: usize,
    pub page_size: usize,
}

/// Parse a time bound: `YYYY-MM-DD`, `YYYY-MM-DD HH:MM:SS`, or
/// `YYYY-MM-DDTHH:MM[:SS]`. A bare date as an end bound covers the whole day.
pub fn parse_time_bound(value: &str, is_end: bool) -> Result<NaiveDateTime, ConfigurationError> {
    let value = value.trim();
    for format in [TIMESTAMP_FORMAT, "%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M"] {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(value, format) {
            return Ok(parsed);
        }
    }
    let date = NaiveDate::parse_from_str(value, "%Y-%m-%d").map_err(|_| {
        ConfigurationError::new(
            if is_end { "end" } else { "start" },
            format!("unrecognised time {:?}", value),
        )
    })?;
    let time = if is_end {
        date.and_hms_opt(23, 59, 59)
    } else {
        date.and_hms_opt(0, 0, 0)
    };
    time.ok_or_else(|| ConfigurationError::new("time", "out of range"))
}

/// Append-only ring of log entries.
#[derive(Debug)]
pub struct LogBook {
    entries: VecDeque<(u64, LogEntry)>,
    capacity: usize,
    next_id: u64,
    enabled: bool,
}

impl Default for LogBook {
    fn default() -> Self {
        Self::new(DEFAULT_LOG_CAPACITY)
    }
}

impl LogBook {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity.min(MAX_LOG_CAPACITY)),
            capacity,
            next_id: 1,
            enabled: true,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Shrink or grow the ring, dropping the oldest entries if needed.
    pub fn set_capacity(&mut self, capacity: usize) {
        self.capacity = capacity.max(1);
        while self.entries.len() > self.capacity {
            self.entries.pop_front();
        }
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Append an entry. While disabled only error-level entries are kept;
    /// returns `None` for a dropped entry.
    pub fn append(&mut self, entry: LogEntry) -> Option<LogEntry> {
        if !self.enabled && entry.level != LogLevel::Error {
            return None;
        }
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        let id = self.next_id;
        self.next_id += 1;
        self.entries.push_back((id, entry.clone()));
        Some(entry)
    }

    pub fn entries(&self) -> impl Iterator<Item = &LogEntry> + '_ {
        self.entries.iter().map(|(_, entry)| entry)
    }

    fn in_range(entry: &LogEntry, start: Option<NaiveDateTime>, end: Option<NaiveDateTime>) -> bool {
        start.map_or(true, |s| entry.recorded_at >= s) && end.map_or(true, |e| entry.recorded_at <= e)
    }

    /// Filtered, paginated listing in insertion order.
    pub fn query(&self, query: &LogQuery) -> LogPage {
        let needle = query
            .search
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_lowercase);

        let matching: Vec<LogRow> = self
            .entries
            .iter()
            .filter(|(_, entry)| Self::in_range(entry, query.start, query.end))
            .filter(|(_, entry)| {
                query
                    .status
                    .map_or(true, |status| RowStatus::from(entry.level) == status)
            })
            .filter(|(_, entry)| {
                needle
                    .as_ref()
                    .map_or(true, |n| entry.message.to_lowercase().contains(n))
            })
            .map(|(id, entry)| LogRow {
                id: *id,
                timestamp: entry.timestamp.clone(),
                count: entry.count,
                status: entry.level.into(),
                level: entry.level,
                message: entry.message.clone(),
            })
            .collect();

        let page_size = if query.page_size == 0 {
            DEFAULT_PAGE_SIZE
        } else {
            query.page_size
        };
        let total = matching.len();
        let pages = total.div_ceil(page_size).max(1);
        let page = query.page.clamp(1, pages);
        let rows = matching
            .into_iter()
            .skip((page - 1) * page_size)
            .take(page_size)
            .collect();

        LogPage {
            rows,
            total,
            page,
            page_size,
            pages,
        }
    }

    /// CSV with header `timestamp,count,status` for entries inside the
    /// inclusive range.
    pub fn export_csv(
        &self,
        start: Option<NaiveDateTime>,
        end: Option<NaiveDateTime>,
    ) -> Result<Vec<u8>> {
        let mut writer = csv::Writer::from_writer(Vec::new());
        writer
            .write_record(["timestamp", "count", "status"])
            .context("write csv header")?;
        for entry in self.entries().filter(|e| Self::in_range(e, start, end)) {
            let count = entry.count.to_string();
            writer
                .write_record([
                    entry.timestamp.as_str(),
                    count.as_str(),
                    RowStatus::from(entry.level).as_str(),
                ])
                .context("write csv row")?;
        }
        writer.into_inner().context("flush csv")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32, m: u32) -> DateTime<Local> {
        Local
            .with_ymd_and_hms(2024, 5, 1, h, m, 0)
            .single()
            .unwrap()
    }

    fn sample() -> LogBook {
        let mut book = LogBook::new(1000);
        book.append(LogEntry::at(at(9, 0), "Tracking started", LogLevel::Info, 0));
        book.append(LogEntry::at(at(9, 5), "Current count: 2 people detected", LogLevel::Info, 2));
        book.append(LogEntry::at(at(9, 10), "Low frame rate detected (12.0 FPS)", LogLevel::Warning, 2));
        book.append(LogEntry::at(at(9, 15), "Failed to read frame from camera", LogLevel::Error, 2));
        book
    }

    #[test]
    fn ring_evicts_oldest() {
        let mut book = LogBook::new(2);
        for i in 0..3 {
            book.append(LogEntry::new(format!("m{}", i), LogLevel::Info, 0));
        }
        let messages: Vec<_> = book.entries().map(|e| e.message.clone()).collect();
        assert_eq!(messages, vec!["m1", "m2"]);
    }

    #[test]
    fn disabled_book_keeps_errors_only() {
        let mut book = LogBook::default();
        book.set_enabled(false);
        assert!(book.append(LogEntry::new("info", LogLevel::Info, 0)).is_none());
        assert!(book.append(LogEntry::new("warn", LogLevel::Warning, 0)).is_none());
        assert!(book.append(LogEntry::new("boom", LogLevel::Error, 0)).is_some());
        assert_eq!(book.len(), 1);
    }

    #[test]
    fn query_filters_and_paginates() {
        let book = sample();

        let page = book.query(&LogQuery {
            search: Some("COUNT".into()),
            ..LogQuery::default()
        });
        assert_eq!(page.total, 1);
        assert_eq!(page.rows[0].id, 2);

        let page = book.query(&LogQuery {
            status: Some(RowStatus::Warning),
            ..LogQuery::default()
        });
        assert_eq!(page.rows.len(), 1);
        assert_eq!(page.rows[0].status, RowStatus::Warning);

        let page = book.query(&LogQuery {
            page: 2,
            page_size: 3,
            ..LogQuery::default()
        });
        assert_eq!(page.pages, 2);
        assert_eq!(page.rows.len(), 1);
        assert_eq!(page.rows[0].id, 4);
    }

    #[test]
    fn time_bounds_are_inclusive() {
        let book = sample();
        let page = book.query(&LogQuery {
            start: Some(parse_time_bound("2024-05-01 09:05:00", false).unwrap()),
            end: Some(parse_time_bound("2024-05-01 09:10:00", true).unwrap()),
            ..LogQuery::default()
        });
        assert_eq!(page.total, 2);
    }

    #[test]
    fn bare_end_date_covers_the_day() {
        let end = parse_time_bound("2024-05-01", true).unwrap();
        assert_eq!(end.format(TIMESTAMP_FORMAT).to_string(), "2024-05-01 23:59:59");
        assert!(parse_time_bound("yesterday", false).is_err());
    }

    #[test]
    fn sub_second_entries_match_whole_second_bounds() {
        let late = Local
            .with_ymd_and_hms(2024, 5, 1, 23, 59, 59)
            .single()
            .unwrap()
            + chrono::Duration::milliseconds(500);
        let mut book = LogBook::new(1000);
        book.append(LogEntry::at(late, "Stream stopped", LogLevel::Info, 0));

        let end = parse_time_bound("2024-05-01", true).unwrap();
        let page = book.query(&LogQuery {
            end: Some(end),
            ..LogQuery::default()
        });
        assert_eq!(page.total, 1);

        let exact = parse_time_bound("2024-05-01 23:59:59", false).unwrap();
        let page = book.query(&LogQuery {
            start: Some(exact),
            end: Some(exact),
            ..LogQuery::default()
        });
        assert_eq!(page.total, 1);

        let csv = String::from_utf8(book.export_csv(None, Some(end)).unwrap()).unwrap();
        assert_eq!(csv.lines().nth(1), Some("2024-05-01 23:59:59,0,normal"));
    }

    #[test]
    fn export_writes_header_and_range() {
        let book = sample();
        let csv = book
            .export_csv(Some(parse_time_bound("2024-05-01T09:10", false).unwrap()), None)
            .unwrap();
        let text = String::from_utf8(csv).unwrap();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines[0], "timestamp,count,status");
        assert_eq!(lines[1], "2024-05-01 09:10:00,2,warning");
        assert_eq!(lines[2], "2024-05-01 09:15:00,2,error");
        assert_eq!(lines.len(), 3);
    }
}
