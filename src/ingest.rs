//! # Stream ingestor (C3)
//!
//! One thread per channel drives the RTSP session: connect, poll packets,
//! decode them inline (the decoder callback is short and non-blocking, so it
//! runs on the ingest thread rather than a separate one), and push the
//! resulting frames onto the channel's input queue. Reconnection on
//! transient failure and the frame-arrival timeout both live here.

use crate::collab::RtspSession;
use crate::config::{ChannelPolicy, FRAME_TIMEOUT_MS, MAX_RECONNECT_ATTEMPTS, RECONNECT_DELAY_MS};
use crate::decoder::DecoderSession;
use crate::error::AnalyticsError;
use crate::events::{Event, EventSink};
use crate::frame::{Frame, FrameIdAllocator};
use crate::pipeline::ChannelState;
use crate::queue::{FrameQueue, PushOutcome};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// 1-second sliding window frame-rate estimator.
struct FpsWindow {
    timestamps: VecDeque<Instant>,
}

impl FpsWindow {
    fn new() -> Self {
        Self { timestamps: VecDeque::new() }
    }

    fn record(&mut self) {
        let now = Instant::now();
        self.timestamps.push_back(now);
        while let Some(front) = self.timestamps.front() {
            if now.duration_since(*front) > Duration::from_secs(1) {
                self.timestamps.pop_front();
            } else {
                break;
            }
        }
    }

    fn fps(&self) -> f32 {
        self.timestamps.len() as f32
    }
}

#[derive(Default)]
pub struct IngestStats {
    pub frames_decoded: AtomicU64,
    pub frames_dropped: AtomicU64,
    pub reconnect_count: AtomicU32,
    pub decode_errors: AtomicU64,
}

/// Handle to a running ingestor thread. Shared state (current FSM state,
/// counters, current fps) is readable from any thread; `request_stop` asks
/// the worker loop to exit at its next poll boundary.
pub struct Ingestor {
    pub channel_id: u8,
    state: Mutex<ChannelState>,
    fps: Mutex<FpsWindow>,
    pub stats: IngestStats,
    stop: Arc<AtomicBool>,
}

impl Ingestor {
    pub fn state(&self) -> ChannelState {
        *self.state.lock()
    }

    pub fn current_fps(&self) -> f32 {
        self.fps.lock().fps()
    }

    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::Release);
    }

    fn set_state(&self, next: ChannelState, events: &EventSink) {
        let mut guard = self.state.lock();
        if guard.can_transition_to(next) {
            *guard = next;
            drop(guard);
            info!(channel_id = self.channel_id, ?next, "channel state transition");
            events.emit(Event::StateChanged { channel_id: self.channel_id, new_state: next });
        } else {
            debug!(channel_id = self.channel_id, from = ?*guard, ?next, "rejected illegal state transition");
        }
    }
}

/// Spawns the ingest thread and returns the shared handle plus its
/// `JoinHandle`. `decoder` and `output` are shared with the rest of the
/// channel's pipeline; `url` is the RTSP source to connect to.
pub fn spawn(
    channel_id: u8,
    url: String,
    session: Box<dyn RtspSession>,
    decoder: Arc<DecoderSession>,
    output: Arc<FrameQueue>,
    policy: ChannelPolicy,
    events: EventSink,
) -> (Arc<Ingestor>, JoinHandle<()>) {
    spawn_with_reconnect_delay(channel_id, url, session, decoder, output, policy, events, Duration::from_millis(RECONNECT_DELAY_MS))
}

/// Same as [`spawn`] but with an overridable reconnect delay, so tests that
/// exercise the retry path don't pay the production 5-second backoff.
pub fn spawn_with_reconnect_delay(
    channel_id: u8,
    url: String,
    mut session: Box<dyn RtspSession>,
    decoder: Arc<DecoderSession>,
    output: Arc<FrameQueue>,
    policy: ChannelPolicy,
    events: EventSink,
    reconnect_delay: Duration,
) -> (Arc<Ingestor>, JoinHandle<()>) {
    let ingestor = Arc::new(Ingestor {
        channel_id,
        state: Mutex::new(ChannelState::Inactive),
        fps: Mutex::new(FpsWindow::new()),
        stats: IngestStats::default(),
        stop: Arc::new(AtomicBool::new(false)),
    });
    let worker = Arc::clone(&ingestor);
    let handle = std::thread::Builder::new()
        .name(format!("ingest-{channel_id}"))
        .spawn(move || run(worker, url, session.as_mut(), decoder, output, policy, events, reconnect_delay))
        .expect("spawn ingest thread");
    (ingestor, handle)
}

fn run(
    ingestor: Arc<Ingestor>,
    url: String,
    session: &mut dyn RtspSession,
    decoder: Arc<DecoderSession>,
    output: Arc<FrameQueue>,
    policy: ChannelPolicy,
    events: EventSink,
    reconnect_delay: Duration,
) {
    let channel_id = ingestor.channel_id;
    let mut frame_ids = FrameIdAllocator::default();
    ingestor.set_state(ChannelState::Initializing, &events);
    if let Err(e) = decoder.init(policy.target_fps) {
        events.emit(Event::Error { channel_id, message: e.to_string() });
        ingestor.set_state(ChannelState::Error, &events);
        return;
    }

    'reconnect: loop {
        if ingestor.stop.load(Ordering::Acquire) {
            break;
        }
        ingestor.set_state(ChannelState::Connecting, &events);
        if !connect_with_retries(&ingestor, session, &url, &policy, &events, reconnect_delay) {
            ingestor.set_state(ChannelState::Error, &events);
            break;
        }
        ingestor.set_state(ChannelState::Streaming, &events);

        let mut last_frame_at = Instant::now();
        loop {
            if ingestor.stop.load(Ordering::Acquire) {
                session.shutdown();
                ingestor.set_state(ChannelState::Destroyed, &events);
                return;
            }
            match session.poll_packet(Duration::from_millis(250)) {
                Ok(Some(packet)) => match decoder.decode(&packet) {
                    Ok(Some(image)) => {
                        last_frame_at = Instant::now();
                        let frame_id = frame_ids.next();
                        let frame = Frame::new(channel_id, frame_id, image.width, image.height, image.stride, image.pixels);
                        ingestor.stats.frames_decoded.fetch_add(1, Ordering::Relaxed);
                        ingestor.fps.lock().record();
                        if output.push(frame) == PushOutcome::Dropped {
                            ingestor.stats.frames_dropped.fetch_add(1, Ordering::Relaxed);
                            events.emit(Event::QueueOverflow { channel_id, queue: "input" });
                        }
                        events.emit(Event::FrameReceived { channel_id });
                    }
                    Ok(None) => {}
                    Err(e) => {
                        ingestor.stats.decode_errors.fetch_add(1, Ordering::Relaxed);
                        warn!(channel_id, error = %e, "decode failed");
                        events.emit(Event::Error { channel_id, message: e.to_string() });
                    }
                },
                Ok(None) => {
                    if last_frame_at.elapsed() > Duration::from_millis(FRAME_TIMEOUT_MS) {
                        events.emit(Event::Error {
                            channel_id,
                            message: AnalyticsError::stream_timeout(channel_id, FRAME_TIMEOUT_MS).to_string(),
                        });
                        break;
                    }
                }
                Err(e) => {
                    events.emit(Event::Error { channel_id, message: e.to_string() });
                    break;
                }
            }
        }

        session.shutdown();
        if !policy.auto_reconnect {
            ingestor.set_state(ChannelState::Error, &events);
            break 'reconnect;
        }
        ingestor.set_state(ChannelState::Error, &events);
        ingestor.set_state(ChannelState::Reconnecting, &events);
        ingestor.stats.reconnect_count.fetch_add(1, Ordering::Relaxed);
    }
}

/// Attempts `session.play` up to `policy.max_reconnect_attempts` times, with
/// `RECONNECT_DELAY_MS` between attempts. Returns `false` once the budget is
/// exhausted.
fn connect_with_retries(
    ingestor: &Ingestor,
    session: &mut dyn RtspSession,
    url: &str,
    policy: &ChannelPolicy,
    events: &EventSink,
    reconnect_delay: Duration,
) -> bool {
    let max_attempts = policy.max_reconnect_attempts.max(1).min(MAX_RECONNECT_ATTEMPTS.max(policy.max_reconnect_attempts));
    for attempt in 0..max_attempts {
        if ingestor.stop.load(Ordering::Acquire) {
            return false;
        }
        match session.play(url) {
            Ok(_tracks) => return true,
            Err(e) => {
                events.emit(Event::Error { channel_id: ingestor.channel_id, message: e.to_string() });
                if attempt + 1 < max_attempts {
                    std::thread::sleep(reconnect_delay);
                }
            }
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collab::mocks::{ScriptedRtspSession, SolidColorDecoder};
    use crate::collab::{CodecType, EncodedPacket};
    use std::time::Duration as StdDuration;

    #[test]
    fn ingests_scripted_packets_into_output_queue() {
        let session = Box::new(ScriptedRtspSession {
            connect_failures_remaining: 0,
            packets: (0..5).map(|i| EncodedPacket { track_id: 0, pts: i, bytes: vec![] }).collect(),
        });
        let decoder = Arc::new(DecoderSession::new(CodecType::H264, Box::new(SolidColorDecoder { width: 4, height: 4 })));
        let output = Arc::new(FrameQueue::new(16));
        let (sink, source) = crate::events::event_channel();
        let policy = ChannelPolicy { auto_reconnect: false, ..ChannelPolicy::default() };
        let (ingestor, handle) = spawn(0, "rtsp://mock".into(), session, decoder, Arc::clone(&output), policy, sink);

        std::thread::sleep(StdDuration::from_millis(200));
        ingestor.request_stop();
        let _ = handle.join();

        assert!(ingestor.stats.frames_decoded.load(Ordering::Relaxed) >= 5);
        assert!(output.size() >= 1);
        let mut saw_frame_received = false;
        while let Some(ev) = source.try_recv() {
            if matches!(ev, Event::FrameReceived { .. }) {
                saw_frame_received = true;
            }
        }
        assert!(saw_frame_received);
    }

    #[test]
    fn exhausting_reconnect_attempts_settles_in_error_state() {
        let session = Box::new(ScriptedRtspSession { connect_failures_remaining: 10, packets: VecDeque::new() });
        let decoder = Arc::new(DecoderSession::new(CodecType::H264, Box::new(SolidColorDecoder { width: 2, height: 2 })));
        let output = Arc::new(FrameQueue::new(4));
        let (sink, _source) = crate::events::event_channel();
        let policy = ChannelPolicy { max_reconnect_attempts: 2, auto_reconnect: false, ..ChannelPolicy::default() };
        let (ingestor, handle) =
            spawn_with_reconnect_delay(0, "rtsp://mock".into(), session, decoder, output, policy, sink, Duration::from_millis(5));
        let _ = handle.join();
        assert_eq!(ingestor.state(), ChannelState::Error);
    }
}
