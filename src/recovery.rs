//! # Recovery manager (C11)
//!
//! Maps a channel's overall health verdict (plus whichever anomaly pattern
//! triggered it) into one of a fixed set of remediation actions, tracks how
//! many attempts a channel has burned, and gates re-attempts by both a
//! budget and a cooldown so a channel stuck in Critical doesn't get hammered
//! with the same action every tick.

use crate::health::{AnomalyPattern, HealthStatus};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::warn;

/// The fixed remediation action set (spec §4.11). `ResetChannel` is a
/// composite: tear everything down and rebuild as if the channel were newly
/// created, used only once the narrower actions are exhausted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryAction {
    ReconnectStream,
    RestartDecoder,
    ReduceQuality,
    IncreaseBuffer,
    ResetChannel,
    ThrottleProcessing,
    ClearQueues,
    RestartThreadPool,
}

impl RecoveryAction {
    /// The ordered steps `ResetChannel` expands into, each separated by a
    /// brief (0.5s) gap: stop ingestor, reset decoder, stop and restart the
    /// detection pipeline, reconnect ingestor.
    pub fn reset_channel_sequence() -> [RecoveryAction; 4] {
        [RecoveryAction::ReconnectStream, RecoveryAction::RestartDecoder, RecoveryAction::ClearQueues, RecoveryAction::RestartThreadPool]
    }
}

/// Gap between `ResetChannel`'s composite steps (spec §4.11).
pub const RESET_CHANNEL_STEP_GAP: Duration = Duration::from_millis(500);

/// Selects a remediation action from the channel's overall health status and
/// a set of lowercase keyword `reasons` (spec §4.11) — the anomaly pattern
/// names that fired plus the name of any metric sampled at Critical or
/// worse. Returns `None` when the channel isn't in a state that warrants
/// recovery (Healthy/Unknown).
pub fn select_action(status: HealthStatus, reasons: &[&str]) -> Option<RecoveryAction> {
    let mentions = |keyword: &str| reasons.iter().any(|r| r.contains(keyword));
    match status {
        HealthStatus::Failed => Some(RecoveryAction::ReconnectStream),
        HealthStatus::Critical => {
            if mentions("connection") {
                Some(RecoveryAction::ReconnectStream)
            } else if mentions("decoder") {
                Some(RecoveryAction::RestartDecoder)
            } else if mentions("memory") {
                Some(RecoveryAction::ClearQueues)
            } else if mentions("cpu") {
                Some(RecoveryAction::ThrottleProcessing)
            } else {
                Some(RecoveryAction::ResetChannel)
            }
        }
        HealthStatus::Warning => Some(RecoveryAction::ClearQueues),
        HealthStatus::Healthy | HealthStatus::Unknown => None,
    }
}

/// The keyword reasons `select_action` matches against for a given anomaly.
pub fn anomaly_reason(anomaly: AnomalyPattern) -> &'static str {
    match anomaly {
        AnomalyPattern::FrameRateFluctuation => "frame_rate_fluctuation",
        AnomalyPattern::LatencySpike => "latency_spike",
        AnomalyPattern::ConnectionInstability => "connection_instability",
        AnomalyPattern::MemoryTrend => "memory_trend",
    }
}

struct ChannelAttempts {
    count: u32,
    last_action: Option<RecoveryAction>,
    last_attempt_at: Instant,
}

/// Per-channel attempt counters plus the recovery-delay cooldown. Exceeding
/// the configured budget for the narrow action currently being tried
/// escalates to `ResetChannel`; exceeding the budget for `ResetChannel`
/// itself means the channel needs host intervention (the caller should
/// surface `RecoveryExhausted` upward).
pub struct RecoveryManager {
    attempts: Mutex<HashMap<u8, ChannelAttempts>>,
    max_attempts: u32,
    recovery_delay: Duration,
    successes: std::sync::atomic::AtomicU64,
    failures: std::sync::atomic::AtomicU64,
}

impl RecoveryManager {
    pub fn new(max_attempts: u32) -> Self {
        Self::with_delay(max_attempts, Duration::from_secs(5))
    }

    pub fn with_delay(max_attempts: u32, recovery_delay: Duration) -> Self {
        Self {
            attempts: Mutex::new(HashMap::new()),
            max_attempts: max_attempts.max(1),
            recovery_delay,
            successes: std::sync::atomic::AtomicU64::new(0),
            failures: std::sync::atomic::AtomicU64::new(0),
        }
    }

    /// True once `channel_id` is eligible for another recovery attempt:
    /// attempts remain under budget for `ResetChannel` and enough time has
    /// passed since the last attempt.
    pub fn should_attempt_recovery(&self, channel_id: u8) -> bool {
        if self.is_exhausted(channel_id) {
            return false;
        }
        let guard = self.attempts.lock();
        match guard.get(&channel_id) {
            Some(entry) => entry.last_attempt_at.elapsed() >= self.recovery_delay,
            None => true,
        }
    }

    pub fn recovery_delay(&self) -> Duration {
        self.recovery_delay
    }

    /// Decides the next action for `channel_id` given the channel's overall
    /// status and keyword `reasons` (see [`select_action`]), bumping the
    /// per-channel attempt count. Escalates to `ResetChannel` once the same
    /// narrow action has been retried past `max_attempts` without success.
    /// Returns `None` if `status`/`reasons` don't warrant recovery, or if
    /// `should_attempt_recovery` would refuse.
    pub fn next_action(&self, channel_id: u8, status: HealthStatus, reasons: &[&str]) -> Option<RecoveryAction> {
        if !self.should_attempt_recovery(channel_id) {
            return None;
        }
        let proposed = select_action(status, reasons)?;
        let mut guard = self.attempts.lock();
        let entry = guard
            .entry(channel_id)
            .or_insert(ChannelAttempts { count: 0, last_action: None, last_attempt_at: Instant::now() });

        if entry.last_action == Some(proposed) {
            entry.count += 1;
        } else {
            entry.last_action = Some(proposed);
            entry.count = 1;
        }
        entry.last_attempt_at = Instant::now();

        if entry.count > self.max_attempts && proposed != RecoveryAction::ResetChannel {
            entry.last_action = Some(RecoveryAction::ResetChannel);
            entry.count = 1;
            warn!(channel_id, ?proposed, "recovery action exhausted, escalating to reset_channel");
            Some(RecoveryAction::ResetChannel)
        } else {
            Some(proposed)
        }
    }

    /// True once `ResetChannel` itself has been retried past budget — the
    /// recovery manager has nothing left to try.
    pub fn is_exhausted(&self, channel_id: u8) -> bool {
        let guard = self.attempts.lock();
        matches!(
            guard.get(&channel_id),
            Some(ChannelAttempts { count, last_action: Some(RecoveryAction::ResetChannel), .. }) if *count > self.max_attempts
        )
    }

    /// Clears a channel's attempt history after a successful recovery and
    /// bumps the global success counter.
    pub fn on_recovered(&self, channel_id: u8) {
        if self.attempts.lock().remove(&channel_id).is_some() {
            self.successes.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        }
    }

    pub fn on_failed(&self, channel_id: u8) {
        let _ = channel_id;
        self.failures.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
    }

    pub fn attempt_count(&self, channel_id: u8) -> u32 {
        self.attempts.lock().get(&channel_id).map(|a| a.count).unwrap_or(0)
    }

    /// `(successful, failed)` totals across every channel (spec §8 invariant 8).
    pub fn totals(&self) -> (u64, u64) {
        (self.successes.load(std::sync::atomic::Ordering::Relaxed), self.failures.load(std::sync::atomic::Ordering::Relaxed))
    }
}

impl Default for RecoveryManager {
    fn default() -> Self {
        Self::new(crate::config::MAX_RECONNECT_ATTEMPTS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failed_status_maps_to_reconnect() {
        assert_eq!(select_action(HealthStatus::Failed, &[]), Some(RecoveryAction::ReconnectStream));
    }

    #[test]
    fn critical_connection_anomaly_maps_to_reconnect() {
        let action = select_action(HealthStatus::Critical, &[anomaly_reason(AnomalyPattern::ConnectionInstability)]);
        assert_eq!(action, Some(RecoveryAction::ReconnectStream));
    }

    #[test]
    fn critical_memory_anomaly_maps_to_clear_queues() {
        let action = select_action(HealthStatus::Critical, &[anomaly_reason(AnomalyPattern::MemoryTrend)]);
        assert_eq!(action, Some(RecoveryAction::ClearQueues));
    }

    #[test]
    fn critical_with_no_anomaly_falls_back_to_reset_channel() {
        assert_eq!(select_action(HealthStatus::Critical, &[]), Some(RecoveryAction::ResetChannel));
    }

    #[test]
    fn warning_maps_to_clear_queues() {
        assert_eq!(select_action(HealthStatus::Warning, &[]), Some(RecoveryAction::ClearQueues));
    }

    #[test]
    fn healthy_has_no_recovery_action() {
        assert_eq!(select_action(HealthStatus::Healthy, &[]), None);
    }

    #[test]
    fn repeated_same_failure_escalates_to_reset_channel() {
        let mgr = RecoveryManager::with_delay(2, Duration::ZERO);
        let reasons = [anomaly_reason(AnomalyPattern::ConnectionInstability)];
        assert_eq!(mgr.next_action(0, HealthStatus::Critical, &reasons), Some(RecoveryAction::ReconnectStream));
        assert_eq!(mgr.next_action(0, HealthStatus::Critical, &reasons), Some(RecoveryAction::ReconnectStream));
        assert_eq!(mgr.next_action(0, HealthStatus::Critical, &reasons), Some(RecoveryAction::ResetChannel));
    }

    #[test]
    fn recovery_delay_blocks_immediate_reattempt() {
        let mgr = RecoveryManager::with_delay(5, Duration::from_secs(60));
        assert!(mgr.should_attempt_recovery(0));
        mgr.next_action(0, HealthStatus::Critical, &[]);
        assert!(!mgr.should_attempt_recovery(0));
    }

    #[test]
    fn recovered_channel_clears_history_and_counts_success() {
        let mgr = RecoveryManager::with_delay(2, Duration::ZERO);
        mgr.next_action(1, HealthStatus::Critical, &[]);
        mgr.on_recovered(1);
        assert_eq!(mgr.attempt_count(1), 0);
        assert_eq!(mgr.totals(), (1, 0));
    }
}
