//! # Per-channel detection pipeline (C7)
//!
//! Owns the channel-level state machine, post-processes raw detector output
//! (confidence filtering, class filtering, NMS, `max_detections` capping),
//! and adaptively throttles how many of the incoming frames are actually
//! submitted for inference when the channel's inference queue is backing up.

use crate::config::ChannelPolicy;
use crate::frame::Detection;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

/// Channel-visible lifecycle, spanning both the ingestor's connection state
/// and the pipeline's detection-activity state into one state machine a host
/// observer can watch end to end. `Reconnecting` is entered from `Error` when
/// auto-reconnect is enabled and exited back to `Connecting`; `Paused` and
/// `Active` are driven by the pipeline independently of the connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Inactive,
    Initializing,
    Connecting,
    Streaming,
    Paused,
    Error,
    Reconnecting,
    Destroyed,
}

impl ChannelState {
    /// Whether `self -> next` is a legal transition. `Destroyed` is terminal;
    /// every other state can fall back to `Error`.
    pub fn can_transition_to(self, next: ChannelState) -> bool {
        use ChannelState::*;
        if self == Destroyed {
            return false;
        }
        if next == Error || next == Destroyed {
            return true;
        }
        matches!(
            (self, next),
            (Inactive, Initializing)
                | (Initializing, Connecting)
                | (Connecting, Streaming)
                | (Streaming, Paused)
                | (Paused, Streaming)
                | (Error, Reconnecting)
                | (Reconnecting, Connecting)
        )
    }
}

/// Greedy, class-agnostic non-maximum suppression ordered by descending
/// confidence. Two boxes of different classes are still suppressed against
/// each other — the detector is expected to have already resolved
/// class-exclusive candidates upstream.
pub fn apply_nms(mut detections: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
    detections.sort_by(|a, b| b.confidence.partial_cmp(&a.confidence).unwrap_or(std::cmp::Ordering::Equal));
    let mut kept: Vec<Detection> = Vec::with_capacity(detections.len());
    'outer: for candidate in detections {
        for existing in &kept {
            if iou(&candidate, existing) > iou_threshold {
                continue 'outer;
            }
        }
        kept.push(candidate);
    }
    kept
}

fn iou(a: &Detection, b: &Detection) -> f32 {
    let ax2 = a.x + a.w;
    let ay2 = a.y + a.h;
    let bx2 = b.x + b.w;
    let by2 = b.y + b.h;
    let ix1 = a.x.max(b.x);
    let iy1 = a.y.max(b.y);
    let ix2 = ax2.min(bx2);
    let iy2 = ay2.min(by2);
    let iw = (ix2 - ix1).max(0);
    let ih = (iy2 - iy1).max(0);
    let intersection = (iw * ih) as f32;
    if intersection == 0.0 {
        return 0.0;
    }
    let area_a = (a.w * a.h) as f32;
    let area_b = (b.w * b.h) as f32;
    intersection / (area_a + area_b - intersection)
}

/// Filters by confidence threshold and `enabled_classes`, runs NMS if
/// enabled, then caps at `max_detections` keeping the highest-confidence
/// survivors.
pub fn post_process(raw: Vec<Detection>, policy: &ChannelPolicy) -> Vec<Detection> {
    let mut filtered: Vec<Detection> = raw
        .into_iter()
        .filter(|d| d.confidence >= policy.confidence_threshold && policy.class_enabled(d.class_id))
        .collect();
    if policy.enable_nms {
        filtered = apply_nms(filtered, policy.nms_threshold);
    }
    filtered.sort_by(|a, b| b.confidence.partial_cmp(&a.confidence).unwrap_or(std::cmp::Ordering::Equal));
    filtered.truncate(policy.max_detections as usize);
    filtered
}

/// Decides, frame by frame, whether the pipeline should submit the current
/// frame for inference or skip it — backpressure-aware frame skipping rather
/// than an unconditional fixed-rate divider, so a channel that temporarily
/// catches up resumes full-rate detection immediately.
pub struct AdaptiveRateController {
    pending: AtomicU32,
    high_watermark: u32,
    submitted: AtomicU64,
    skipped: AtomicU64,
}

impl AdaptiveRateController {
    pub fn new(high_watermark: u32) -> Self {
        Self { pending: AtomicU32::new(0), high_watermark, submitted: AtomicU64::new(0), skipped: AtomicU64::new(0) }
    }

    /// Call once per incoming frame. Returns `true` if the frame should be
    /// submitted for detection now.
    pub fn should_submit(&self) -> bool {
        if self.pending.load(Ordering::Acquire) >= self.high_watermark {
            self.skipped.fetch_add(1, Ordering::Relaxed);
            return false;
        }
        self.pending.fetch_add(1, Ordering::AcqRel);
        self.submitted.fetch_add(1, Ordering::Relaxed);
        true
    }

    /// Call when a previously-submitted frame's detection result arrives.
    pub fn on_result(&self) {
        self.pending.fetch_sub(1, Ordering::AcqRel);
    }

    pub fn submitted_count(&self) -> u64 {
        self.submitted.load(Ordering::Relaxed)
    }

    pub fn skipped_count(&self) -> u64 {
        self.skipped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn det(class_id: u32, confidence: f32, x: i32, y: i32, w: i32, h: i32) -> Detection {
        Detection { class_id, class_name: "x".into(), confidence, x, y, w, h }
    }

    #[test]
    fn state_machine_rejects_illegal_jumps_but_allows_error_from_anywhere() {
        assert!(ChannelState::Inactive.can_transition_to(ChannelState::Initializing));
        assert!(!ChannelState::Inactive.can_transition_to(ChannelState::Streaming));
        assert!(ChannelState::Streaming.can_transition_to(ChannelState::Error));
        assert!(!ChannelState::Destroyed.can_transition_to(ChannelState::Initializing));
    }

    #[test]
    fn nms_suppresses_heavily_overlapping_lower_confidence_box() {
        let boxes = vec![det(0, 0.9, 10, 10, 20, 20), det(0, 0.8, 12, 12, 20, 20)];
        let kept = apply_nms(boxes, 0.3);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].confidence, 0.9);
    }

    #[test]
    fn nms_keeps_disjoint_boxes() {
        let boxes = vec![det(0, 0.9, 0, 0, 10, 10), det(1, 0.8, 100, 100, 10, 10)];
        let kept = apply_nms(boxes, 0.3);
        assert_eq!(kept.len(), 2);
    }

    #[test]
    fn post_process_drops_low_confidence_and_disabled_classes() {
        let mut policy = ChannelPolicy { confidence_threshold: 0.6, enable_nms: false, ..ChannelPolicy::default() };
        policy.enabled_classes.insert(1);
        let raw = vec![det(1, 0.9, 0, 0, 5, 5), det(2, 0.95, 0, 0, 5, 5), det(1, 0.4, 0, 0, 5, 5)];
        let kept = post_process(raw, &policy);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].class_id, 1);
    }

    #[test]
    fn post_process_caps_at_max_detections() {
        let policy = ChannelPolicy { max_detections: 2, enable_nms: false, confidence_threshold: 0.0, ..ChannelPolicy::default() };
        let raw = vec![det(0, 0.5, 0, 0, 1, 1), det(0, 0.9, 10, 10, 1, 1), det(0, 0.7, 20, 20, 1, 1)];
        let kept = post_process(raw, &policy);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].confidence, 0.9);
        assert_eq!(kept[1].confidence, 0.7);
    }

    #[test]
    fn adaptive_rate_controller_skips_once_watermark_reached() {
        let ctrl = AdaptiveRateController::new(2);
        assert!(ctrl.should_submit());
        assert!(ctrl.should_submit());
        assert!(!ctrl.should_submit());
        assert_eq!(ctrl.skipped_count(), 1);
        ctrl.on_result();
        assert!(ctrl.should_submit());
        assert_eq!(ctrl.submitted_count(), 3);
    }
}
