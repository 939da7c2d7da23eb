//! # Decoder session (C4)
//!
//! Wraps a single hardware decoder instance (behind the [`HardwareDecoder`]
//! trait). A session has at most one inflight decode — callers own the
//! serialization since the ingestor thread drives `decode` synchronously —
//! and tracks a consecutive-error counter and a last-decoded-frame
//! timestamp so the resource pool and health monitor can observe stalls.

use crate::collab::{CodecType, DecodedImage, EncodedPacket, HardwareDecoder};
use crate::error::{AnalyticsError, Result};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, Instant};

pub const DECODER_STALL_TIMEOUT: Duration = Duration::from_secs(30);
/// Error rate above which the resource pool is notified (spec §4.4).
pub const ERROR_RATE_NOTIFY_THRESHOLD: f64 = 0.10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecoderState {
    Idle,
    Initializing,
    Ready,
    Decoding,
    Error,
    Destroyed,
}

struct Counters {
    processed: AtomicU64,
    errors: AtomicU64,
    consecutive_errors: AtomicU32,
}

impl Default for Counters {
    fn default() -> Self {
        Self { processed: AtomicU64::new(0), errors: AtomicU64::new(0), consecutive_errors: AtomicU32::new(0) }
    }
}

/// A single decoder instance bound to one codec type, owned exclusively by
/// whichever channel currently holds it (assignment is the resource pool's job).
pub struct DecoderSession {
    pub codec: CodecType,
    backend: Mutex<Box<dyn HardwareDecoder>>,
    state: Mutex<DecoderState>,
    counters: Counters,
    last_decoded_at: Mutex<Instant>,
}

impl DecoderSession {
    pub fn new(codec: CodecType, backend: Box<dyn HardwareDecoder>) -> Self {
        Self {
            codec,
            backend: Mutex::new(backend),
            state: Mutex::new(DecoderState::Idle),
            counters: Counters::default(),
            last_decoded_at: Mutex::new(Instant::now()),
        }
    }

    pub fn init(&self, target_fps: f32) -> Result<()> {
        *self.state.lock() = DecoderState::Initializing;
        self.backend.lock().init(self.codec, target_fps)?;
        *self.state.lock() = DecoderState::Ready;
        Ok(())
    }

    pub fn state(&self) -> DecoderState {
        *self.state.lock()
    }

    /// Decodes one packet. On success, resets the consecutive-error counter
    /// and bumps `last_decoded_at`; on failure, increments both the total
    /// and consecutive error counters and returns the error to the caller
    /// (the ingestor), which surfaces it as `TransientIO`.
    pub fn decode(&self, packet: &EncodedPacket) -> Result<Option<DecodedImage>> {
        *self.state.lock() = DecoderState::Decoding;
        self.counters.processed.fetch_add(1, Ordering::Relaxed);
        let result = self.backend.lock().decode(packet);
        match &result {
            Ok(Some(_)) => {
                self.counters.consecutive_errors.store(0, Ordering::Relaxed);
                *self.last_decoded_at.lock() = Instant::now();
                *self.state.lock() = DecoderState::Ready;
            }
            Ok(None) => {
                *self.state.lock() = DecoderState::Ready;
            }
            Err(_) => {
                self.counters.errors.fetch_add(1, Ordering::Relaxed);
                self.counters.consecutive_errors.fetch_add(1, Ordering::Relaxed);
                *self.state.lock() = DecoderState::Error;
            }
        }
        result
    }

    /// Fraction of processed packets that produced a decode error.
    pub fn error_rate(&self) -> f64 {
        let processed = self.counters.processed.load(Ordering::Relaxed);
        if processed == 0 {
            return 0.0;
        }
        self.counters.errors.load(Ordering::Relaxed) as f64 / processed as f64
    }

    /// True once the error rate crosses the pool-notification threshold.
    pub fn should_notify_pool(&self) -> bool {
        self.error_rate() > ERROR_RATE_NOTIFY_THRESHOLD
    }

    /// True once no frame has been decoded for longer than the stall window.
    pub fn is_timed_out(&self) -> bool {
        self.last_decoded_at.lock().elapsed() > DECODER_STALL_TIMEOUT
    }

    pub fn destroy(&self) {
        *self.state.lock() = DecoderState::Destroyed;
    }
}

pub fn timeout_error(channel_id: u8, elapsed: Duration) -> AnalyticsError {
    AnalyticsError::decoder_timeout(channel_id, elapsed.as_millis() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collab::mocks::SolidColorDecoder;

    fn mk_session() -> DecoderSession {
        DecoderSession::new(CodecType::H264, Box::new(SolidColorDecoder { width: 4, height: 4 }))
    }

    #[test]
    fn successful_decode_resets_consecutive_errors() {
        let s = mk_session();
        s.init(30.0).unwrap();
        let pkt = EncodedPacket { track_id: 0, pts: 0, bytes: vec![] };
        s.decode(&pkt).unwrap();
        assert_eq!(s.error_rate(), 0.0);
        assert!(!s.should_notify_pool());
    }

    #[test]
    fn error_rate_crosses_notify_threshold() {
        struct FlakyDecoder {
            calls: u32,
        }
        impl HardwareDecoder for FlakyDecoder {
            fn init(&mut self, _c: CodecType, _f: f32) -> Result<()> {
                Ok(())
            }
            fn decode(&mut self, _p: &EncodedPacket) -> Result<Option<crate::collab::DecodedImage>> {
                self.calls += 1;
                if self.calls % 2 == 0 {
                    Err(AnalyticsError::transient_io("decode", "bitstream error"))
                } else {
                    Ok(Some(crate::collab::DecodedImage { width: 2, height: 2, stride: 8, pixels: vec![0; 16], presentation_ts: None }))
                }
            }
        }
        let s = DecoderSession::new(CodecType::H264, Box::new(FlakyDecoder { calls: 0 }));
        s.init(30.0).unwrap();
        let pkt = EncodedPacket { track_id: 0, pts: 0, bytes: vec![] };
        for _ in 0..10 {
            let _ = s.decode(&pkt);
        }
        assert!(s.error_rate() > ERROR_RATE_NOTIFY_THRESHOLD);
        assert!(s.should_notify_pool());
    }

    #[test]
    fn fresh_session_is_not_timed_out() {
        let s = mk_session();
        s.init(30.0).unwrap();
        assert!(!s.is_timed_out());
    }
}
