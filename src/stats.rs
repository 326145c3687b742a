//! Rolling occupancy statistics.

use std::collections::VecDeque;
use std::time::Duration;

use serde::Serialize;

/// Default bound of the count history.
pub const DEFAULT_HISTORY_LIMIT: usize = 1000;

/// Ceiling of the load proxy.
pub const MAX_SYSTEM_LOAD: f32 = 90.0;

/// Statistics as published to subscribers.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct StatsSnapshot {
    pub current_count: usize,
    pub average: f64,
    pub minimum: usize,
    pub peak: usize,
    pub frame_rate: f32,
    pub detection_time: f32,
    pub system_load: f32,
}

/// Owned, mutable statistics. Only the orchestrator writes to this.
#[derive(Debug)]
pub struct OccupancyStats {
    current_count: usize,
    history: VecDeque<usize>,
    limit: usize,
    frame_rate: f32,
    detection_time_ms: f32,
    system_load: f32,
}

impl Default for OccupancyStats {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_LIMIT)
    }
}

impl OccupancyStats {
    pub fn new(limit: usize) -> Self {
        let limit = limit.max(1);
        Self {
            current_count: 0,
            history: VecDeque::with_capacity(limit),
            limit,
            frame_rate: 0.0,
            detection_time_ms: 0.0,
            system_load: 0.0,
        }
    }

    /// Record a tracked count: sets the current value and appends to history,
    /// evicting the oldest entry at the bound.
    pub fn record_count(&mut self, count: usize) {
        self.current_count = count;
        if self.history.len() == self.limit {
            self.history.pop_front();
        }
        self.history.push_back(count);
    }

    /// Set the current count without touching history.
    pub fn set_current(&mut self, count: usize) {
        self.current_count = count;
    }

    pub fn set_frame_rate(&mut self, fps: f32) {
        self.frame_rate = round1(fps);
    }

    /// Record inference latency and derive the load proxy
    /// `min(90, detection_ms / 10)`.
    pub fn record_detection_latency(&mut self, elapsed: Duration) {
        let ms = elapsed.as_secs_f32() * 1000.0;
        self.detection_time_ms = round1(ms);
        self.system_load = (self.detection_time_ms / 10.0).min(MAX_SYSTEM_LOAD);
    }

    pub fn current_count(&self) -> usize {
        self.current_count
    }

    pub fn frame_rate(&self) -> f32 {
        self.frame_rate
    }

    pub fn system_load(&self) -> f32 {
        self.system_load
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    pub fn history(&self) -> impl Iterator<Item = usize> + '_ {
        self.history.iter().copied()
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let (average, minimum, peak) = if self.history.is_empty() {
            (0.0, 0, 0)
        } else {
            let sum: usize = self.history.iter().sum();
            (
                sum as f64 / self.history.len() as f64,
                self.history.iter().copied().min().unwrap_or(0),
                self.history.iter().copied().max().unwrap_or(0),
            )
        };
        StatsSnapshot {
            current_count: self.current_count,
            average,
            minimum,
            peak,
            frame_rate: self.frame_rate,
            detection_time: self.detection_time_ms,
            system_load: self.system_load,
        }
    }
}

fn round1(value: f32) -> f32 {
    (value * 10.0).round() / 10.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn history_is_bounded_fifo() {
        let mut stats = OccupancyStats::new(3);
        for count in [5, 1, 2, 3] {
            stats.record_count(count);
        }
        assert_eq!(stats.history_len(), 3);
        assert_eq!(stats.history().collect::<Vec<_>>(), vec![1, 2, 3]);
        let snap = stats.snapshot();
        assert_eq!(snap.peak, 3);
        assert_eq!(snap.minimum, 1);
    }

    #[test]
    fn default_bound_keeps_the_latest_thousand() {
        let mut stats = OccupancyStats::default();
        stats.record_count(9);
        for count in 0..DEFAULT_HISTORY_LIMIT {
            stats.record_count(count % 5);
        }
        assert_eq!(stats.history_len(), DEFAULT_HISTORY_LIMIT);
        assert_eq!(stats.history().next(), Some(0));
        assert_eq!(stats.snapshot().peak, 4);

        stats.record_count(7);
        assert_eq!(stats.history_len(), DEFAULT_HISTORY_LIMIT);
        assert_eq!(stats.history().next(), Some(1));
        assert_eq!(stats.snapshot().peak, 7);
    }

    #[test]
    fn snapshot_derives_aggregates() {
        let mut stats = OccupancyStats::default();
        for count in [2, 3, 1] {
            stats.record_count(count);
        }
        let snap = stats.snapshot();
        assert_eq!(snap.current_count, 1);
        assert!((snap.average - 2.0).abs() < 1e-9);
        assert_eq!(snap.minimum, 1);
        assert_eq!(snap.peak, 3);
    }

    #[test]
    fn set_current_leaves_history_alone() {
        let mut stats = OccupancyStats::default();
        stats.record_count(4);
        stats.set_current(0);
        let snap = stats.snapshot();
        assert_eq!(snap.current_count, 0);
        assert_eq!(snap.peak, 4);
        assert_eq!(stats.history_len(), 1);
    }

    #[test]
    fn load_proxy_is_capped() {
        let mut stats = OccupancyStats::default();
        stats.record_detection_latency(Duration::from_millis(250));
        assert!((stats.system_load() - 25.0).abs() < 1e-4);
        stats.record_detection_latency(Duration::from_secs(5));
        assert_eq!(stats.system_load(), MAX_SYSTEM_LOAD);
    }

    #[test]
    fn empty_history_snapshot_is_zeroed() {
        let snap = OccupancyStats::default().snapshot();
        assert_eq!(snap, StatsSnapshot::default());
    }
}
