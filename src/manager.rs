//! # Channel manager (C12)
//!
//! The top-level, host-facing owner of every channel (the JNI-equivalent
//! surface from spec §6.1). Holds one entry per active channel, runs the
//! event-dispatch thread that fans [`Event`]s out to host callbacks, and
//! periodically sweeps health and the decoder pool. Construction is a
//! builder-style two-step: configure fully, then call `start`, rather than
//! doing I/O in the constructor.

use crate::collab::{DetectorFactory, HardwareDecoderFactory, RtspSession, Surface};
use crate::config::{ChannelPolicy, EngineConfig, ViewportRenderConfig, PERFORMANCE_UPDATE_INTERVAL_MS, TARGET_FPS};
use crate::decoder::DecoderSession;
use crate::decoder_pool::DecoderPool;
use crate::error::{AnalyticsError, Result};
use crate::events::{event_channel, Event, EventSink, EventSource};
use crate::health::{evaluate_channel, system_status, ChannelMetrics, HealthStatus, HealthTracker};
use crate::ingest::{self, Ingestor};
use crate::inference::InferenceWorkerPool;
use crate::pipeline::ChannelState;
use crate::queue::FrameQueue;
use crate::recovery::{anomaly_reason, RecoveryAction, RecoveryManager};
use crate::renderer::ChannelRenderer;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{info, warn};

/// Everything the manager owns for one active channel.
struct ChannelHandle {
    ingestor: Arc<Ingestor>,
    ingest_thread: Option<JoinHandle<()>>,
    input_queue: Arc<FrameQueue>,
    inference: InferenceWorkerPool,
    renderer: Option<ChannelRenderer>,
    decoder: Arc<DecoderSession>,
    policy: ChannelPolicy,
}

/// Host-visible snapshot of one channel, returned by `channel_status`.
#[derive(Debug, Clone)]
pub struct ChannelStatus {
    pub channel_id: u8,
    pub state: ChannelState,
    pub fps: f32,
    pub health: HealthStatus,
    pub frames_decoded: u64,
    pub reconnect_count: u32,
}

/// Top-level engine. A host constructs one instance, calls `initialize`
/// once, then `create_channel`/`destroy_channel` as cameras come and go.
pub struct ChannelManager {
    config: EngineConfig,
    channels: RwLock<HashMap<u8, ChannelHandle>>,
    decoder_pool: Arc<DecoderPool>,
    recovery: RecoveryManager,
    health: Mutex<HealthTracker>,
    events: EventSink,
    event_source: Mutex<Option<EventSource>>,
    dispatch_thread: Mutex<Option<JoinHandle<()>>>,
    running: Arc<AtomicBool>,
    detector_factory: Arc<dyn DetectorFactory>,
    model_bytes: Arc<Vec<u8>>,
}

impl ChannelManager {
    /// Constructs the manager. `detector_factory`/`model_bytes` are shared
    /// across every channel's inference workers; `decoder_factory` backs the
    /// shared decoder pool.
    pub fn new(
        config: EngineConfig,
        decoder_factory: Box<dyn HardwareDecoderFactory>,
        detector_factory: Arc<dyn DetectorFactory>,
        model_bytes: Vec<u8>,
    ) -> Self {
        let (events, event_source) = event_channel();
        let decoder_pool = Arc::new(DecoderPool::new(config.decoder_pool.clone(), decoder_factory, events.clone()));
        Self {
            config,
            channels: RwLock::new(HashMap::new()),
            decoder_pool,
            recovery: RecoveryManager::default(),
            health: Mutex::new(HealthTracker::new()),
            events,
            event_source: Mutex::new(Some(event_source)),
            dispatch_thread: Mutex::new(None),
            running: Arc::new(AtomicBool::new(false)),
            detector_factory,
            model_bytes: Arc::new(model_bytes),
        }
    }

    /// Starts the event-dispatch thread. `on_event` runs on that dedicated
    /// thread and must not block for long — it is the host's non-blocking
    /// listener callback (spec §6.1).
    pub fn start<F>(&self, mut on_event: F)
    where
        F: FnMut(Event) + Send + 'static,
    {
        self.running.store(true, Ordering::Release);
        let source = self.event_source.lock().take().expect("start called once");
        let running = Arc::clone(&self.running);
        let handle = std::thread::Builder::new()
            .name("channel-manager-dispatch".into())
            .spawn(move || {
                while running.load(Ordering::Acquire) {
                    match source.recv() {
                        Some(event) => on_event(event),
                        None => break,
                    }
                }
            })
            .expect("spawn dispatch thread");
        *self.dispatch_thread.lock() = Some(handle);
    }

    pub fn event_sink(&self) -> EventSink {
        self.events.clone()
    }

    /// Adds and starts a new channel. `channel_id` must be free and within
    /// `MAX_CHANNELS`; `url` is the RTSP source.
    pub fn create_channel(
        &self,
        channel_id: u8,
        url: String,
        session: Box<dyn RtspSession>,
        surface: Option<Box<dyn Surface>>,
        policy: ChannelPolicy,
    ) -> Result<()> {
        if channel_id as usize >= crate::config::MAX_CHANNELS as usize {
            return Err(AnalyticsError::invalid_argument(format!("channel_id {channel_id} exceeds MAX_CHANNELS")));
        }
        if self.channels.read().contains_key(&channel_id) {
            return Err(AnalyticsError::invalid_argument(format!("channel {channel_id} already exists")));
        }

        let codec = crate::collab::CodecType::H264;
        let decoder = self.decoder_pool.acquire(channel_id, codec, policy.priority_clamped())?;

        let input_queue = Arc::new(FrameQueue::new(policy.max_queue_size as usize));
        let inference = InferenceWorkerPool::new(channel_id, &policy, Arc::clone(&self.detector_factory), Arc::clone(&self.model_bytes), self.events.clone());
        let is_active = policy.priority_clamped() == 3;
        let renderer = surface.map(|s| {
            let (width, height) = (s.width(), s.height());
            let renderer = ChannelRenderer::new(channel_id, s, policy.target_fps);
            renderer.set_viewport_config(ViewportRenderConfig::for_viewport(width, height, is_active));
            renderer
        });

        let (ingestor, ingest_thread) =
            ingest::spawn(channel_id, url, session, Arc::clone(&decoder), Arc::clone(&input_queue), policy.clone(), self.events.clone());

        self.channels.write().insert(
            channel_id,
            ChannelHandle { ingestor, ingest_thread: Some(ingest_thread), input_queue, inference, renderer, decoder, policy },
        );
        Ok(())
    }

    /// Pops the next input frame for `channel_id` (if any arrives within
    /// `timeout`), submits it for detection, and — if the channel has a
    /// bound surface — renders it immediately with whatever detections are
    /// already attached. Low-latency display does not wait on inference;
    /// a frame rendered before its detections land simply shows no boxes yet.
    pub fn pump_channel(&self, channel_id: u8, timeout: Duration) -> bool {
        let channels = self.channels.read();
        let Some(handle) = channels.get(&channel_id) else { return false };
        let Some(frame) = handle.input_queue.pop_timeout(timeout) else { return false };

        if let Err(e) = handle.inference.submit(Arc::clone(&frame)) {
            self.events.emit(Event::Error { channel_id, message: e.to_string() });
        }
        if let Some(renderer) = &handle.renderer {
            if renderer.should_render_now() {
                if let Err(e) = renderer.render(&frame, &self.events) {
                    self.events.emit(Event::Error { channel_id, message: e.to_string() });
                }
            }
        }
        true
    }

    /// Stops and removes a channel, releasing its decoder back to the pool.
    pub fn destroy_channel(&self, channel_id: u8) -> Result<()> {
        let handle = self
            .channels
            .write()
            .remove(&channel_id)
            .ok_or_else(|| AnalyticsError::invalid_argument(format!("no such channel {channel_id}")))?;
        handle.ingestor.request_stop();
        if let Some(join) = handle.ingest_thread {
            let _ = join.join();
        }
        handle.inference.shutdown();
        self.decoder_pool.release(channel_id, crate::collab::CodecType::H264);
        self.health.lock().remove(channel_id);
        self.recovery.on_recovered(channel_id);
        Ok(())
    }

    pub fn channel_count(&self) -> usize {
        self.channels.read().len()
    }

    /// Pulls the next frame queued for this channel's input (for host-driven
    /// pipelines that feed inference manually rather than relying solely on
    /// the pool's own worker loop; most callers won't need this directly).
    pub fn pop_input_frame(&self, channel_id: u8, timeout: Duration) -> Option<Arc<crate::frame::Frame>> {
        self.channels.read().get(&channel_id).and_then(|h| h.input_queue.pop_timeout(timeout))
    }

    /// Snapshots one channel's host-visible status.
    pub fn channel_status(&self, channel_id: u8) -> Option<ChannelStatus> {
        let channels = self.channels.read();
        let handle = channels.get(&channel_id)?;
        let status = self.health.lock().snapshot().get(&channel_id).copied().unwrap_or(HealthStatus::Unknown);
        Some(ChannelStatus {
            channel_id,
            state: handle.ingestor.state(),
            fps: handle.ingestor.current_fps(),
            health: status,
            frames_decoded: handle.ingestor.stats.frames_decoded.load(Ordering::Relaxed),
            reconnect_count: handle.ingestor.stats.reconnect_count.load(Ordering::Relaxed),
        })
    }

    pub fn system_health(&self) -> HealthStatus {
        system_status(&self.health.lock().snapshot())
    }

    /// One round of health sampling across every channel; intended to be
    /// called on a `PERFORMANCE_UPDATE_INTERVAL_MS` cadence by the host or a
    /// timer thread the host owns. Emits `HealthChanged` only on transitions,
    /// and on a transition to Critical or Failed asks the recovery manager
    /// for a remediation action (spec §4.11).
    pub fn sample_health(&self) {
        let channels = self.channels.read();
        for (channel_id, handle) in channels.iter() {
            let frames_decoded = handle.ingestor.stats.frames_decoded.load(Ordering::Relaxed);
            let fps = handle.ingestor.current_fps();
            let metrics = ChannelMetrics {
                fps,
                drop_rate: if frames_decoded == 0 {
                    0.0
                } else {
                    handle.ingestor.stats.frames_dropped.load(Ordering::Relaxed) as f32 / frames_decoded as f32
                },
                latency_ms: 0.0,
                error_rate: handle.decoder.error_rate() as f32,
                connected: handle.ingestor.state() == ChannelState::Streaming,
                cpu_percent: 0.0,
                memory_mb: 0.0,
                consecutive_failures: 0,
                no_update_for: Duration::ZERO,
                peak_fps: fps,
                min_fps: fps,
                avg_fps: fps,
                peak_latency_ms: 0.0,
                avg_latency_ms: 0.0,
                reconnect_count: handle.ingestor.stats.reconnect_count.load(Ordering::Relaxed),
                memory_trending_up: false,
            };
            let (_, status, anomalies) = evaluate_channel(&metrics, &self.config.health);
            if let Some(changed) = self.health.lock().record(*channel_id, status) {
                if changed >= HealthStatus::Critical {
                    warn!(channel_id = *channel_id, ?changed, "channel health degraded");
                } else {
                    info!(channel_id = *channel_id, ?changed, "channel health changed");
                }
                self.events.emit(Event::HealthChanged { channel_id: *channel_id, status: changed });
            }
            if status >= HealthStatus::Critical {
                let reasons: Vec<&str> = anomalies.iter().map(|a| anomaly_reason(*a)).collect();
                self.recovery_action_for(*channel_id, status, &reasons);
            }
        }
    }

    /// Asks the recovery manager for a remediation action given `channel_id`'s
    /// overall health status and anomaly reasons; the caller (typically
    /// `sample_health`, or a host dispatch loop reacting to `HealthChanged`)
    /// is responsible for actually executing the action against the
    /// channel's ingestor/decoder/renderer.
    pub fn recovery_action_for(&self, channel_id: u8, status: HealthStatus, reasons: &[&str]) -> Option<RecoveryAction> {
        let action = self.recovery.next_action(channel_id, status, reasons);
        if let Some(action) = action {
            self.events.emit(Event::RecoveryAttempted { channel_id, action: action_label(action), succeeded: false });
        }
        action
    }

    pub fn mark_recovered(&self, channel_id: u8) {
        self.recovery.on_recovered(channel_id);
    }

    /// Sweeps the shared decoder pool's idle slots; the host should call this
    /// on the same cadence as `sample_health`.
    pub fn sweep_decoder_pool(&self) {
        self.decoder_pool.sweep_idle();
    }

    /// Performance-monitor task (C12, spec §4.12): grades system load from
    /// the average FPS across active channels against `TARGET_FPS`, then
    /// throttles detection-drawing detail for every channel accordingly.
    /// Non-active channels (lower priority than the host's focused pane) are
    /// throttled first and hardest.
    pub fn run_performance_monitor(&self) {
        let channels = self.channels.read();
        if channels.is_empty() {
            return;
        }
        let avg_fps: f32 = channels.values().map(|h| h.ingestor.current_fps()).sum::<f32>() / channels.len() as f32;
        let load = (1.0 - avg_fps / TARGET_FPS).clamp(0.0, 1.0);

        for handle in channels.values() {
            let Some(renderer) = &handle.renderer else { continue };
            let is_active = handle.policy.priority_clamped() == 3;
            let mut cfg = renderer.viewport_config();
            if load > 0.8 {
                if !is_active {
                    cfg.show_confidence = false;
                }
                cfg.max_box_thickness = 3;
                cfg.max_text_scale = 0.6;
            } else if load > 0.6 {
                cfg.max_box_thickness = 3;
                cfg.max_text_scale = 0.6;
                if is_active {
                    cfg.show_class_names = true;
                }
            } else {
                cfg = ViewportRenderConfig::for_viewport(cfg.width, cfg.height, is_active);
            }
            renderer.set_viewport_config(cfg);
        }
    }

    pub fn performance_update_interval() -> Duration {
        Duration::from_millis(PERFORMANCE_UPDATE_INTERVAL_MS)
    }

    pub fn shutdown(&self) {
        self.running.store(false, Ordering::Release);
        let ids: Vec<u8> = self.channels.read().keys().copied().collect();
        for id in ids {
            let _ = self.destroy_channel(id);
        }
        if let Some(handle) = self.dispatch_thread.lock().take() {
            let _ = handle.join();
        }
    }
}

fn action_label(action: RecoveryAction) -> &'static str {
    match action {
        RecoveryAction::ReconnectStream => "reconnect_stream",
        RecoveryAction::RestartDecoder => "restart_decoder",
        RecoveryAction::ReduceQuality => "reduce_quality",
        RecoveryAction::IncreaseBuffer => "increase_buffer",
        RecoveryAction::ResetChannel => "reset_channel",
        RecoveryAction::ThrottleProcessing => "throttle_processing",
        RecoveryAction::ClearQueues => "clear_queues",
        RecoveryAction::RestartThreadPool => "restart_thread_pool",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collab::mocks::{ScriptedDetectorFactory, ScriptedRtspSession, SolidColorDecoderFactory};
    use crate::collab::EncodedPacket;
    use std::collections::VecDeque;

    fn mk_manager() -> ChannelManager {
        let config = EngineConfig::default();
        let decoder_factory = Box::new(SolidColorDecoderFactory { width: 4, height: 4 });
        let detector_factory: Arc<dyn DetectorFactory> = Arc::new(ScriptedDetectorFactory { detections: vec![] });
        ChannelManager::new(config, decoder_factory, detector_factory, vec![])
    }

    #[test]
    fn create_and_destroy_channel_round_trips() {
        let manager = mk_manager();
        let session = Box::new(ScriptedRtspSession { connect_failures_remaining: 0, packets: VecDeque::new() });
        manager.create_channel(0, "rtsp://mock".into(), session, None, ChannelPolicy::default()).unwrap();
        assert_eq!(manager.channel_count(), 1);
        manager.destroy_channel(0).unwrap();
        assert_eq!(manager.channel_count(), 0);
    }

    #[test]
    fn duplicate_channel_id_is_rejected() {
        let manager = mk_manager();
        let session1 = Box::new(ScriptedRtspSession { connect_failures_remaining: 0, packets: VecDeque::new() });
        let session2 = Box::new(ScriptedRtspSession { connect_failures_remaining: 0, packets: VecDeque::new() });
        manager.create_channel(0, "rtsp://mock".into(), session1, None, ChannelPolicy::default()).unwrap();
        let err = manager.create_channel(0, "rtsp://mock".into(), session2, None, ChannelPolicy::default()).unwrap_err();
        assert_eq!(err.category(), "invalid_argument");
        manager.destroy_channel(0).unwrap();
    }

    #[test]
    fn channel_id_beyond_max_channels_is_rejected() {
        let manager = mk_manager();
        let session = Box::new(ScriptedRtspSession { connect_failures_remaining: 0, packets: VecDeque::new() });
        let err = manager.create_channel(200, "rtsp://mock".into(), session, None, ChannelPolicy::default()).unwrap_err();
        assert_eq!(err.category(), "invalid_argument");
    }

    #[test]
    fn ingested_frames_are_observable_through_status_after_a_moment() {
        let manager = mk_manager();
        let session = Box::new(ScriptedRtspSession {
            connect_failures_remaining: 0,
            packets: (0..3).map(|i| EncodedPacket { track_id: 0, pts: i, bytes: vec![] }).collect(),
        });
        manager.create_channel(0, "rtsp://mock".into(), session, None, ChannelPolicy::default()).unwrap();
        std::thread::sleep(Duration::from_millis(150));
        let status = manager.channel_status(0).unwrap();
        assert!(status.frames_decoded >= 3);
        manager.destroy_channel(0).unwrap();
    }
}
