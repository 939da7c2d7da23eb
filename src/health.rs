//! # Health monitor (C10)
//!
//! Periodically samples per-channel metrics against the configured
//! [`HealthConfig`] thresholds, classifies each channel's status, and rolls
//! the per-channel statuses up into a system-wide status the host can poll
//! or subscribe to via `HealthChanged` events.

use crate::config::HealthConfig;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Per-channel or system-wide health classification, worst metric wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum HealthStatus {
    Unknown,
    Healthy,
    Warning,
    Critical,
    Failed,
}

/// One sampled metric and the status it alone would imply.
#[derive(Debug, Clone, Copy)]
pub struct MetricSample {
    pub name: &'static str,
    pub value: f32,
    pub status: HealthStatus,
}

/// The four named anomaly shapes the monitor runs on every health-check tick
/// (spec §4.10) — combinations over a short window of samples rather than a
/// single-sample threshold breach.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnomalyPattern {
    /// `(peak_fps - min_fps) / avg_fps > 0.5`.
    FrameRateFluctuation,
    /// `peak_latency > 3 * avg_latency`.
    LatencySpike,
    /// `reconnect_count > 5`.
    ConnectionInstability,
    /// Memory usage trending over the configured threshold.
    MemoryTrend,
}

/// Rolling per-channel metrics the health monitor samples from.
#[derive(Debug, Clone, Default)]
pub struct ChannelMetrics {
    pub fps: f32,
    pub drop_rate: f32,
    pub latency_ms: f32,
    pub error_rate: f32,
    pub connected: bool,
    pub cpu_percent: f32,
    pub memory_mb: f32,
    pub consecutive_failures: u32,
    pub no_update_for: Duration,

    pub peak_fps: f32,
    pub min_fps: f32,
    pub avg_fps: f32,
    pub peak_latency_ms: f32,
    pub avg_latency_ms: f32,
    pub reconnect_count: u32,
    pub memory_trending_up: bool,
}

/// Evaluates one channel's current metrics against `cfg`, returning the
/// per-metric samples, the rolled-up status, and any anomaly patterns found.
///
/// Overall status is the worst per-metric status, with two rollup-level
/// overrides that force `Failed` regardless of individual metrics:
/// `consecutive_failures` at or past the configured max, and no metric
/// update for longer than `critical_threshold_ms`.
pub fn evaluate_channel(metrics: &ChannelMetrics, cfg: &HealthConfig) -> (Vec<MetricSample>, HealthStatus, Vec<AnomalyPattern>) {
    let mut samples = Vec::with_capacity(7);

    samples.push(MetricSample {
        name: "fps",
        value: metrics.fps,
        status: if metrics.fps <= 0.0 {
            HealthStatus::Failed
        } else if metrics.fps < cfg.min_fps * 0.5 {
            HealthStatus::Critical
        } else if metrics.fps < cfg.min_fps {
            HealthStatus::Warning
        } else {
            HealthStatus::Healthy
        },
    });

    samples.push(MetricSample {
        name: "drop_rate",
        value: metrics.drop_rate,
        status: if metrics.drop_rate > cfg.max_drop_rate * 2.0 {
            HealthStatus::Critical
        } else if metrics.drop_rate > cfg.max_drop_rate {
            HealthStatus::Warning
        } else {
            HealthStatus::Healthy
        },
    });

    samples.push(MetricSample {
        name: "latency_ms",
        value: metrics.latency_ms,
        status: if metrics.latency_ms > cfg.max_latency_ms * 2.0 {
            HealthStatus::Critical
        } else if metrics.latency_ms > cfg.max_latency_ms {
            HealthStatus::Warning
        } else {
            HealthStatus::Healthy
        },
    });

    samples.push(MetricSample {
        name: "error_rate",
        value: metrics.error_rate,
        status: if metrics.error_rate > cfg.max_error_rate * 2.0 {
            HealthStatus::Critical
        } else if metrics.error_rate > cfg.max_error_rate {
            HealthStatus::Warning
        } else {
            HealthStatus::Healthy
        },
    });

    samples.push(MetricSample {
        name: "connection",
        value: if metrics.connected { 1.0 } else { 0.0 },
        status: if metrics.connected { HealthStatus::Healthy } else { HealthStatus::Critical },
    });

    samples.push(MetricSample {
        name: "cpu",
        value: metrics.cpu_percent,
        status: if metrics.cpu_percent > 80.0 { HealthStatus::Warning } else { HealthStatus::Healthy },
    });

    samples.push(MetricSample {
        name: "memory",
        value: metrics.memory_mb,
        status: if metrics.memory_mb > 100.0 { HealthStatus::Warning } else { HealthStatus::Healthy },
    });

    let mut rolled = samples.iter().map(|s| s.status).max().unwrap_or(HealthStatus::Unknown);

    if metrics.consecutive_failures >= cfg.max_consecutive_failures {
        rolled = HealthStatus::Failed;
    }
    if metrics.no_update_for > Duration::from_millis(cfg.critical_threshold_ms) {
        rolled = HealthStatus::Failed;
    }

    let mut anomalies = Vec::new();
    if metrics.avg_fps > 0.0 && (metrics.peak_fps - metrics.min_fps) / metrics.avg_fps > 0.5 {
        anomalies.push(AnomalyPattern::FrameRateFluctuation);
    }
    if metrics.avg_latency_ms > 0.0 && metrics.peak_latency_ms > metrics.avg_latency_ms * 3.0 {
        anomalies.push(AnomalyPattern::LatencySpike);
    }
    if metrics.reconnect_count > 5 {
        anomalies.push(AnomalyPattern::ConnectionInstability);
    }
    if metrics.memory_trending_up {
        anomalies.push(AnomalyPattern::MemoryTrend);
    }

    (samples, rolled, anomalies)
}

/// Rolls a set of per-channel statuses into one system-wide status by
/// percentage band (spec §4.10): `Failed` if more than half the channels are
/// `Failed`, `Critical` if more than 30% are `Critical`, `Warning` if more
/// than half are `Warning`, else `Healthy`.
pub fn system_status(channel_statuses: &HashMap<u8, HealthStatus>) -> HealthStatus {
    if channel_statuses.is_empty() {
        return HealthStatus::Unknown;
    }
    let total = channel_statuses.len() as f32;
    let fraction = |status: HealthStatus| channel_statuses.values().filter(|s| **s == status).count() as f32 / total;

    if fraction(HealthStatus::Failed) > 0.5 {
        HealthStatus::Failed
    } else if fraction(HealthStatus::Critical) > 0.3 {
        HealthStatus::Critical
    } else if fraction(HealthStatus::Warning) > 0.5 {
        HealthStatus::Warning
    } else {
        HealthStatus::Healthy
    }
}

/// Tracks when a channel last changed health status, for dedup of
/// `HealthChanged` events (only emitted on an actual transition).
pub struct HealthTracker {
    last_status: HashMap<u8, HealthStatus>,
    last_sampled_at: HashMap<u8, Instant>,
}

impl HealthTracker {
    pub fn new() -> Self {
        Self { last_status: HashMap::new(), last_sampled_at: HashMap::new() }
    }

    /// Records a new sample for `channel_id`; returns `Some(status)` only if
    /// it differs from the previously recorded status for that channel.
    pub fn record(&mut self, channel_id: u8, status: HealthStatus) -> Option<HealthStatus> {
        self.last_sampled_at.insert(channel_id, Instant::now());
        let changed = self.last_status.get(&channel_id) != Some(&status);
        self.last_status.insert(channel_id, status);
        changed.then_some(status)
    }

    pub fn age_since_last_sample(&self, channel_id: u8) -> Option<Duration> {
        self.last_sampled_at.get(&channel_id).map(|t| t.elapsed())
    }

    pub fn remove(&mut self, channel_id: u8) {
        self.last_status.remove(&channel_id);
        self.last_sampled_at.remove(&channel_id);
    }

    pub fn snapshot(&self) -> HashMap<u8, HealthStatus> {
        self.last_status.clone()
    }
}

impl Default for HealthTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn healthy_metrics() -> ChannelMetrics {
        ChannelMetrics { fps: 30.0, connected: true, ..Default::default() }
    }

    #[test]
    fn healthy_metrics_roll_up_to_healthy() {
        let cfg = HealthConfig::default();
        let m = healthy_metrics();
        let (_, status, _) = evaluate_channel(&m, &cfg);
        assert_eq!(status, HealthStatus::Healthy);
    }

    #[test]
    fn low_fps_trips_warning_then_critical() {
        let cfg = HealthConfig::default();
        let warn = ChannelMetrics { fps: cfg.min_fps - 1.0, connected: true, ..Default::default() };
        let (_, status, _) = evaluate_channel(&warn, &cfg);
        assert_eq!(status, HealthStatus::Warning);

        let crit = ChannelMetrics { fps: cfg.min_fps * 0.4, connected: true, ..Default::default() };
        let (_, status, _) = evaluate_channel(&crit, &cfg);
        assert_eq!(status, HealthStatus::Critical);
    }

    #[test]
    fn drop_rate_critical_is_double_the_max() {
        let cfg = HealthConfig::default();
        let m = ChannelMetrics { fps: 30.0, connected: true, drop_rate: cfg.max_drop_rate * 2.1, ..Default::default() };
        let (_, status, _) = evaluate_channel(&m, &cfg);
        assert_eq!(status, HealthStatus::Critical);
    }

    #[test]
    fn latency_critical_is_double_the_max_not_the_no_update_window() {
        let cfg = HealthConfig::default();
        // critical_threshold_ms (5000) is far larger than max_latency_ms * 2
        // (1000); latency must not borrow the no-update window as its bound.
        let m = ChannelMetrics { fps: 30.0, connected: true, latency_ms: cfg.max_latency_ms * 2.1, ..Default::default() };
        let (_, status, _) = evaluate_channel(&m, &cfg);
        assert_eq!(status, HealthStatus::Critical);
    }

    #[test]
    fn error_rate_has_its_own_critical_tier() {
        let cfg = HealthConfig::default();
        let m = ChannelMetrics { fps: 30.0, connected: true, error_rate: cfg.max_error_rate * 2.1, ..Default::default() };
        let (_, status, _) = evaluate_channel(&m, &cfg);
        assert_eq!(status, HealthStatus::Critical);
    }

    #[test]
    fn consecutive_failures_at_threshold_overrides_to_failed() {
        let cfg = HealthConfig::default();
        let m = ChannelMetrics { fps: 30.0, connected: true, consecutive_failures: cfg.max_consecutive_failures, ..Default::default() };
        let (_, status, _) = evaluate_channel(&m, &cfg);
        assert_eq!(status, HealthStatus::Failed);
    }

    #[test]
    fn no_update_past_critical_threshold_overrides_to_failed() {
        let cfg = HealthConfig::default();
        let m = ChannelMetrics { fps: 30.0, connected: true, no_update_for: Duration::from_millis(cfg.critical_threshold_ms + 1), ..Default::default() };
        let (_, status, _) = evaluate_channel(&m, &cfg);
        assert_eq!(status, HealthStatus::Failed);
    }

    #[test]
    fn disconnected_channel_is_critical() {
        let cfg = HealthConfig::default();
        let m = ChannelMetrics { fps: 30.0, connected: false, ..Default::default() };
        let (_, status, _) = evaluate_channel(&m, &cfg);
        assert_eq!(status, HealthStatus::Critical);
    }

    #[test]
    fn frame_rate_fluctuation_anomaly() {
        let cfg = HealthConfig::default();
        let m = ChannelMetrics { fps: 30.0, connected: true, peak_fps: 30.0, min_fps: 10.0, avg_fps: 20.0, ..Default::default() };
        let (_, _, anomalies) = evaluate_channel(&m, &cfg);
        assert!(anomalies.contains(&AnomalyPattern::FrameRateFluctuation));
    }

    #[test]
    fn latency_spike_anomaly() {
        let cfg = HealthConfig::default();
        let m = ChannelMetrics { fps: 30.0, connected: true, peak_latency_ms: 400.0, avg_latency_ms: 100.0, ..Default::default() };
        let (_, _, anomalies) = evaluate_channel(&m, &cfg);
        assert!(anomalies.contains(&AnomalyPattern::LatencySpike));
    }

    #[test]
    fn connection_instability_anomaly() {
        let cfg = HealthConfig::default();
        let m = ChannelMetrics { fps: 30.0, connected: true, reconnect_count: 6, ..Default::default() };
        let (_, _, anomalies) = evaluate_channel(&m, &cfg);
        assert!(anomalies.contains(&AnomalyPattern::ConnectionInstability));
    }

    #[test]
    fn system_status_two_of_three_failed_is_failed() {
        let mut statuses = HashMap::new();
        statuses.insert(0, HealthStatus::Healthy);
        statuses.insert(1, HealthStatus::Failed);
        statuses.insert(2, HealthStatus::Failed);
        assert_eq!(system_status(&statuses), HealthStatus::Failed);
    }

    #[test]
    fn system_status_minority_failed_is_not_failed() {
        let mut statuses = HashMap::new();
        statuses.insert(0, HealthStatus::Healthy);
        statuses.insert(1, HealthStatus::Healthy);
        statuses.insert(2, HealthStatus::Failed);
        assert_ne!(system_status(&statuses), HealthStatus::Failed);
    }

    #[test]
    fn system_status_all_failed_is_failed() {
        let mut statuses = HashMap::new();
        statuses.insert(0, HealthStatus::Failed);
        statuses.insert(1, HealthStatus::Failed);
        assert_eq!(system_status(&statuses), HealthStatus::Failed);
    }

    #[test]
    fn health_tracker_only_reports_on_change() {
        let mut tracker = HealthTracker::new();
        assert_eq!(tracker.record(0, HealthStatus::Healthy), Some(HealthStatus::Healthy));
        assert_eq!(tracker.record(0, HealthStatus::Healthy), None);
        assert_eq!(tracker.record(0, HealthStatus::Warning), Some(HealthStatus::Warning));
    }
}
