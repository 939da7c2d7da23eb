//! # Configuration
//!
//! Every tunable enumerated in the design's configuration section (§6.4),
//! expressed as `serde`-deserializable structs with defaults matching the
//! spec exactly. A host may hand the channel manager a JSON blob at
//! `initialize`/`create_channel` time; any field left out takes its default.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Per-channel detection and resource policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelPolicy {
    pub detection_enabled: bool,
    pub confidence_threshold: f32,
    pub max_detections: u32,
    pub enable_nms: bool,
    pub nms_threshold: f32,
    pub enabled_classes: HashSet<u32>,
    pub thread_pool_size: u32,
    pub max_queue_size: u32,
    pub priority: u8,
    pub target_fps: f32,
    pub auto_reconnect: bool,
    pub max_reconnect_attempts: u32,
}

impl Default for ChannelPolicy {
    fn default() -> Self {
        Self {
            detection_enabled: true,
            confidence_threshold: 0.5,
            max_detections: 100,
            enable_nms: true,
            nms_threshold: 0.4,
            enabled_classes: HashSet::new(),
            thread_pool_size: 3,
            max_queue_size: 50,
            priority: 1,
            target_fps: 30.0,
            auto_reconnect: true,
            max_reconnect_attempts: 5,
        }
    }
}

impl ChannelPolicy {
    /// An empty `enabled_classes` set means "all classes enabled".
    pub fn class_enabled(&self, class_id: u32) -> bool {
        self.enabled_classes.is_empty() || self.enabled_classes.contains(&class_id)
    }

    pub fn priority_clamped(&self) -> u8 {
        self.priority.clamp(1, 3)
    }
}

/// Sharing strategy for the decoder resource pool (C5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DecoderPoolStrategy {
    Exclusive,
    SharedPool,
    Adaptive,
    PriorityBased,
    LoadBalanced,
}

impl Default for DecoderPoolStrategy {
    fn default() -> Self {
        Self::Adaptive
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecoderPoolConfig {
    pub strategy: DecoderPoolStrategy,
    pub max_decoders_per_type: u32,
    pub max_shared_decoders: u32,
    pub min_decoders_per_channel: u32,
    pub max_decoders_per_channel: u32,
    pub enable_dynamic_allocation: bool,
    pub enable_resource_preemption: bool,
    pub resource_utilization_threshold: f32,
    pub idle_timeout_ms: u64,
}

impl Default for DecoderPoolConfig {
    fn default() -> Self {
        Self {
            strategy: DecoderPoolStrategy::Adaptive,
            max_decoders_per_type: 8,
            max_shared_decoders: 16,
            min_decoders_per_channel: 1,
            max_decoders_per_channel: 4,
            enable_dynamic_allocation: true,
            enable_resource_preemption: false,
            resource_utilization_threshold: 0.8,
            idle_timeout_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    pub min_fps: f32,
    pub max_drop_rate: f32,
    pub max_latency_ms: f32,
    pub max_error_rate: f32,
    pub max_consecutive_failures: u32,
    pub health_check_interval_ms: u64,
    pub critical_threshold_ms: u64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            min_fps: 15.0,
            max_drop_rate: 0.05,
            max_latency_ms: 500.0,
            max_error_rate: 0.02,
            max_consecutive_failures: 3,
            health_check_interval_ms: 1_000,
            critical_threshold_ms: 5_000,
        }
    }
}

/// Tiling layout for the optional multi-surface compositor mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompositorLayout {
    Single = 1,
    Quad = 4,
    Nine = 9,
    Sixteen = 16,
}

impl Default for CompositorLayout {
    fn default() -> Self {
        Self::Quad
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RenderMode {
    IndividualSurfaces,
    UnifiedComposition,
    HybridComposition,
}

impl Default for RenderMode {
    fn default() -> Self {
        Self::IndividualSurfaces
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RendererConfig {
    pub layout: CompositorLayout,
    pub mode: RenderMode,
    pub buffer_pool_size: usize,
    pub max_render_load: f32,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self { layout: CompositorLayout::Quad, mode: RenderMode::IndividualSurfaces, buffer_pool_size: 8, max_render_load: 0.8 }
    }
}

/// Reference viewport area a channel's draw scale factor is computed
/// against — a full single-pane 640x480 view (spec §3).
pub const REFERENCE_VIEWPORT_AREA: f32 = 640.0 * 480.0;

/// Below this on either axis, or for an inactive compositor sub-window, a
/// channel is treated as a small viewport and the detection-drawing filter
/// in §4.9 applies.
pub const SMALL_VIEWPORT_DIM: u32 = 240;

/// Per-channel, viewport-adaptive drawing parameters (spec §3). C9 consults
/// this instead of deriving thickness/text scale from the raw frame size, so
/// a channel squeezed into a compositor quad draws thinner boxes and smaller
/// text than the same channel shown full-screen.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewportRenderConfig {
    pub width: u32,
    pub height: u32,
    pub scale_factor: f32,
    pub is_small_viewport: bool,
    pub min_box_thickness: u32,
    pub max_box_thickness: u32,
    pub min_text_scale: f32,
    pub max_text_scale: f32,
    pub show_class_names: bool,
    pub show_confidence: bool,
}

impl ViewportRenderConfig {
    /// Derives a config for a channel rendered into a `width`x`height`
    /// viewport. `is_active_channel` is false for compositor sub-windows
    /// that aren't the currently focused pane.
    pub fn for_viewport(width: u32, height: u32, is_active_channel: bool) -> Self {
        let area = width.max(1) as f32 * height.max(1) as f32;
        let scale_factor = (area / REFERENCE_VIEWPORT_AREA).sqrt();
        let is_small_viewport = width.min(height) < SMALL_VIEWPORT_DIM || !is_active_channel;
        Self { width, height, scale_factor, is_small_viewport, ..Self::default() }
    }
}

impl Default for ViewportRenderConfig {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
            scale_factor: 1.0,
            is_small_viewport: false,
            min_box_thickness: 1,
            max_box_thickness: 6,
            min_text_scale: 0.5,
            max_text_scale: 2.0,
            show_class_names: true,
            show_confidence: true,
        }
    }
}

/// Top-level configuration bundle the host may pass to `initialize`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub decoder_pool: DecoderPoolConfig,
    pub health: HealthConfig,
    pub renderer: RendererConfig,
}

impl EngineConfig {
    pub fn from_json(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

/// Maximum number of concurrently addressable channels (spec §3).
pub const MAX_CHANNELS: u8 = 16;

pub const FRAME_TIMEOUT_MS: u64 = 10_000;
pub const RECONNECT_DELAY_MS: u64 = 5_000;
pub const MAX_RECONNECT_ATTEMPTS: u32 = 5;
pub const DECODER_STALL_TIMEOUT_MS: u64 = 30_000;
pub const SURFACE_RECOVERY_TIMEOUT_MS: u64 = 10_000;
pub const MAX_SURFACE_RECOVERY_ATTEMPTS: u32 = 3;
pub const PERFORMANCE_UPDATE_INTERVAL_MS: u64 = 1_000;
pub const MIN_FPS_THRESHOLD: f32 = 25.0;
pub const TARGET_FPS: f32 = 30.0;
pub const MAX_TASK_QUEUE: usize = 200;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_policy_defaults_match_spec() {
        let p = ChannelPolicy::default();
        assert_eq!(p.confidence_threshold, 0.5);
        assert_eq!(p.max_detections, 100);
        assert_eq!(p.thread_pool_size, 3);
        assert_eq!(p.max_queue_size, 50);
        assert_eq!(p.max_reconnect_attempts, 5);
        assert!(p.class_enabled(7), "empty set enables every class");
    }

    #[test]
    fn priority_is_clamped_to_1_3() {
        let mut p = ChannelPolicy { priority: 9, ..ChannelPolicy::default() };
        assert_eq!(p.priority_clamped(), 3);
        p.priority = 0;
        assert_eq!(p.priority_clamped(), 1);
    }

    #[test]
    fn viewport_scale_factor_grows_with_area() {
        let full = ViewportRenderConfig::for_viewport(640, 480, true);
        assert_eq!(full.scale_factor, 1.0);
        let quad = ViewportRenderConfig::for_viewport(320, 240, true);
        assert!(quad.scale_factor < 1.0);
    }

    #[test]
    fn inactive_sub_window_is_always_a_small_viewport() {
        let cfg = ViewportRenderConfig::for_viewport(640, 480, false);
        assert!(cfg.is_small_viewport);
    }

    #[test]
    fn engine_config_roundtrips_through_json() {
        let cfg = EngineConfig::default();
        let bytes = serde_json::to_vec(&cfg).unwrap();
        let back = EngineConfig::from_json(&bytes).unwrap();
        assert_eq!(cfg.decoder_pool.strategy, back.decoder_pool.strategy);
    }
}
