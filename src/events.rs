//! # Event emission
//!
//! Narrow per-subsystem event types plus a sink the channel manager
//! subscribes to and fans out into the host-facing callback surface (§6.1).
//! Listeners must never block the publishing thread — `EventSink::emit`
//! pushes onto an unbounded `crossbeam_channel` and returns immediately; a
//! dedicated dispatch thread owned by the channel manager drains it and
//! invokes host callbacks.

use crate::health::HealthStatus;
use crate::pipeline::ChannelState;
use crossbeam_channel::{unbounded, Receiver, Sender};

/// One host-visible occurrence, tagged with the channel it concerns where applicable.
#[derive(Debug, Clone)]
pub enum Event {
    FrameReceived { channel_id: u8 },
    DetectionReceived { channel_id: u8, count: usize },
    FrameRendered { channel_id: u8 },
    QueueOverflow { channel_id: u8, queue: &'static str },
    StateChanged { channel_id: u8, new_state: ChannelState },
    HealthChanged { channel_id: u8, status: HealthStatus },
    RecoveryAttempted { channel_id: u8, action: &'static str, succeeded: bool },
    SurfaceRecoveryRequested { channel_id: u8 },
    Error { channel_id: u8, message: String },
}

/// Producer half, cloned into every worker thread that raises events.
#[derive(Clone)]
pub struct EventSink {
    tx: Sender<Event>,
}

impl EventSink {
    pub fn emit(&self, event: Event) {
        // An unbounded channel never blocks the caller; the dispatch thread
        // is the only consumer and a disconnected receiver (shutdown mid-flight)
        // is not an error the emitting thread needs to act on.
        let _ = self.tx.send(event);
    }
}

/// Consumer half, owned by the channel manager's dispatch thread.
pub struct EventSource {
    rx: Receiver<Event>,
}

impl EventSource {
    pub fn recv(&self) -> Option<Event> {
        self.rx.recv().ok()
    }

    pub fn try_recv(&self) -> Option<Event> {
        self.rx.try_recv().ok()
    }
}

pub fn event_channel() -> (EventSink, EventSource) {
    let (tx, rx) = unbounded();
    (EventSink { tx }, EventSource { rx })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emit_never_blocks_and_source_receives_in_order() {
        let (sink, source) = event_channel();
        sink.emit(Event::FrameReceived { channel_id: 0 });
        sink.emit(Event::FrameReceived { channel_id: 1 });
        match source.try_recv() {
            Some(Event::FrameReceived { channel_id }) => assert_eq!(channel_id, 0),
            other => panic!("unexpected {other:?}"),
        }
        match source.try_recv() {
            Some(Event::FrameReceived { channel_id }) => assert_eq!(channel_id, 1),
            other => panic!("unexpected {other:?}"),
        }
    }
}
