//! # Renderer & surface recovery (C8)
//!
//! Binds one channel to one display [`Surface`], converts a decoded frame
//! (with whatever detections have landed so far) into the surface's pixel
//! buffer, and posts it. A surface can be lost mid-stream (geometry change
//! the backend rejects, repeated lock failure); [`SurfaceRecovery`] tracks
//! that independently of the channel's connection state so a flaky display
//! does not tear down the RTSP session.

use crate::collab::Surface;
use crate::config::{ViewportRenderConfig, MAX_SURFACE_RECOVERY_ATTEMPTS, SURFACE_RECOVERY_TIMEOUT_MS};
use crate::draw::draw_detections;
use crate::error::{AnalyticsError, Result};
use crate::events::{Event, EventSink};
use crate::frame::Frame;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurfaceHealth {
    Healthy,
    RecoveryRequested,
    ForceReset,
}

/// Surface-side failure tracking, independent of the channel's own FSM.
pub struct SurfaceRecovery {
    health: parking_lot::Mutex<SurfaceHealth>,
    attempts: AtomicU32,
    requested_at: parking_lot::Mutex<Option<Instant>>,
}

impl SurfaceRecovery {
    pub fn new() -> Self {
        Self { health: parking_lot::Mutex::new(SurfaceHealth::Healthy), attempts: AtomicU32::new(0), requested_at: parking_lot::Mutex::new(None) }
    }

    pub fn health(&self) -> SurfaceHealth {
        *self.health.lock()
    }

    /// Called on a surface operation failure. Escalates Healthy ->
    /// RecoveryRequested -> ForceReset as attempts exhaust or the recovery
    /// window (`SURFACE_RECOVERY_TIMEOUT_MS`) elapses without success.
    pub fn on_failure(&self, events: &EventSink, channel_id: u8) {
        let mut health = self.health.lock();
        match *health {
            SurfaceHealth::Healthy => {
                *health = SurfaceHealth::RecoveryRequested;
                *self.requested_at.lock() = Some(Instant::now());
                self.attempts.store(1, Ordering::Relaxed);
                events.emit(Event::SurfaceRecoveryRequested { channel_id });
            }
            SurfaceHealth::RecoveryRequested => {
                let attempts = self.attempts.fetch_add(1, Ordering::Relaxed) + 1;
                let elapsed = self.requested_at.lock().map(|t| t.elapsed()).unwrap_or_default();
                if attempts >= MAX_SURFACE_RECOVERY_ATTEMPTS || elapsed > Duration::from_millis(SURFACE_RECOVERY_TIMEOUT_MS) {
                    *health = SurfaceHealth::ForceReset;
                    events.emit(Event::Error { channel_id, message: "surface recovery attempts exhausted, forcing reset".into() });
                }
            }
            SurfaceHealth::ForceReset => {}
        }
    }

    pub fn on_success(&self) {
        *self.health.lock() = SurfaceHealth::Healthy;
        self.attempts.store(0, Ordering::Relaxed);
        *self.requested_at.lock() = None;
    }

    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::Relaxed)
    }
}

impl Default for SurfaceRecovery {
    fn default() -> Self {
        Self::new()
    }
}

/// Binds a channel to a surface and renders frames onto it, tracking an
/// adaptive render cadence: if the renderer falls behind the incoming frame
/// rate it skips frames rather than building an unbounded backlog.
pub struct ChannelRenderer {
    channel_id: u8,
    surface: parking_lot::Mutex<Box<dyn Surface>>,
    recovery: SurfaceRecovery,
    last_rendered_at: parking_lot::Mutex<Instant>,
    min_frame_interval: parking_lot::Mutex<Duration>,
    viewport: parking_lot::Mutex<ViewportRenderConfig>,
}

impl ChannelRenderer {
    pub fn new(channel_id: u8, surface: Box<dyn Surface>, target_fps: f32) -> Self {
        Self {
            channel_id,
            surface: parking_lot::Mutex::new(surface),
            recovery: SurfaceRecovery::new(),
            last_rendered_at: parking_lot::Mutex::new(Instant::now() - Duration::from_secs(1)),
            min_frame_interval: parking_lot::Mutex::new(Duration::from_secs_f32(1.0 / target_fps.max(1.0))),
            viewport: parking_lot::Mutex::new(ViewportRenderConfig::default()),
        }
    }

    /// Replaces the viewport-adaptive drawing config the next `render` call
    /// will use — called whenever the host resizes the channel's pane or the
    /// performance monitor (C12) grades the system load.
    pub fn set_viewport_config(&self, cfg: ViewportRenderConfig) {
        *self.viewport.lock() = cfg;
    }

    pub fn viewport_config(&self) -> ViewportRenderConfig {
        *self.viewport.lock()
    }

    pub fn recovery(&self) -> &SurfaceRecovery {
        &self.recovery
    }

    /// True if enough time has passed since the last render to honor the
    /// adaptive cadence; callers should skip the frame otherwise.
    pub fn should_render_now(&self) -> bool {
        self.last_rendered_at.lock().elapsed() >= *self.min_frame_interval.lock()
    }

    /// Narrows the render cadence under load (renderer falling behind);
    /// widening back to `target_fps` happens by constructing a fresh
    /// interval once load subsides, via [`Self::reset_cadence`].
    pub fn throttle_cadence(&self, factor: f32) {
        let mut interval = self.min_frame_interval.lock();
        *interval = Duration::from_secs_f32(interval.as_secs_f32() * factor.max(1.0));
    }

    pub fn reset_cadence(&self, target_fps: f32) {
        *self.min_frame_interval.lock() = Duration::from_secs_f32(1.0 / target_fps.max(1.0));
    }

    /// Renders one frame: reconfigures geometry if needed, draws detection
    /// overlays, and posts. Surface failures are routed to [`SurfaceRecovery`]
    /// rather than bubbled as a channel-fatal error.
    pub fn render(&self, frame: &Arc<Frame>, events: &EventSink) -> Result<()> {
        let mut surface = self.surface.lock();
        if surface.width() != frame.width || surface.height() != frame.height {
            if let Err(e) = surface.set_buffers_geometry(frame.width, frame.height) {
                self.recovery.on_failure(events, self.channel_id);
                return Err(e);
            }
        }

        let lock_result = surface.lock();
        match lock_result {
            Ok((buffer, stride)) => {
                copy_and_draw(frame, buffer, stride, &self.viewport.lock());
                surface.unlock_and_post();
                drop(surface);
                self.recovery.on_success();
                *self.last_rendered_at.lock() = Instant::now();
                events.emit(Event::FrameRendered { channel_id: self.channel_id });
                Ok(())
            }
            Err(e) => {
                drop(surface);
                self.recovery.on_failure(events, self.channel_id);
                Err(e)
            }
        }
    }

    /// Replaces the bound surface after a `ForceReset`; the host is
    /// responsible for supplying a fresh surface instance.
    pub fn reset_surface(&self, surface: Box<dyn Surface>) {
        *self.surface.lock() = surface;
        self.recovery.on_success();
    }
}

fn copy_and_draw(frame: &Arc<Frame>, buffer: &mut [u8], stride: u32, viewport: &ViewportRenderConfig) {
    let row_bytes = (frame.width as usize) * 4;
    for row in 0..frame.height as usize {
        let src_start = row * frame.stride as usize;
        let dst_start = row * stride as usize;
        if src_start + row_bytes <= frame.pixels.len() && dst_start + row_bytes <= buffer.len() {
            buffer[dst_start..dst_start + row_bytes].copy_from_slice(&frame.pixels[src_start..src_start + row_bytes]);
        }
    }
    draw_detections(buffer, frame.width, frame.height, stride, &frame.detections(), viewport);
}

pub fn surface_lost_error(channel_id: u8, reason: impl Into<String>) -> AnalyticsError {
    AnalyticsError::surface_lost(channel_id, reason)
}
