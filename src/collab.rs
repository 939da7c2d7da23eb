//! # External collaborator interfaces
//!
//! The hardware decoder, the RTSP client, the inference runtime, and the
//! display surface binding are explicitly out of scope for this crate (see
//! spec §1 "External collaborators"). Each is modeled here as a narrow trait
//! the core calls; a host links a concrete implementation (or, in tests, a
//! mock) against these traits. None of the traits assume a particular codec,
//! model format, or GUI toolkit.

use crate::error::Result;
use crate::frame::Detection;
use std::time::Duration;

/// Codec family a decoder session is configured for (spec §3 "Decoder pool entry").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CodecType {
    H264,
    H265,
    Generic,
}

/// One RTSP media track as reported by the play-event callback (spec §4.3).
#[derive(Debug, Clone)]
pub struct TrackInfo {
    pub codec: CodecType,
    pub track_id: u32,
}

/// An encoded packet handed from the RTSP session to a decoder session.
#[derive(Debug, Clone)]
pub struct EncodedPacket {
    pub track_id: u32,
    pub pts: i64,
    pub bytes: Vec<u8>,
}

/// Abstraction over an RTSP client session bound to one channel (MediaKit-equivalent).
///
/// The real implementation wraps a native RTSP client; `play` performs the
/// handshake and returns the negotiated tracks, and `poll_packet` is called
/// in a loop by the ingestor thread (spec §4.3) rather than delivering
/// packets through a callback, since a blocking poll maps more directly
/// onto this crate's one-thread-per-role model.
pub trait RtspSession: Send {
    /// Connects to `url` and returns the negotiated tracks, or a
    /// `TransientIO` error if the connection is refused or times out.
    fn play(&mut self, url: &str) -> Result<Vec<TrackInfo>>;

    /// Waits up to `timeout` for the next encoded packet. `Ok(None)` means
    /// the wait elapsed with nothing delivered (not an error); ingest uses
    /// this to drive its frame-timeout clock.
    fn poll_packet(&mut self, timeout: Duration) -> Result<Option<EncodedPacket>>;

    /// Tears the session down; idempotent.
    fn shutdown(&mut self);
}

/// Pixel data for one decoded picture before it is wrapped in a [`crate::frame::Frame`].
pub struct DecodedImage {
    pub width: u32,
    pub height: u32,
    pub stride: u32,
    pub pixels: Vec<u8>,
    pub presentation_ts: Option<i64>,
}

/// Abstraction over one hardware decoder instance (spec §4.4). A session
/// owns at most one inflight decode at a time; the converted pixels are
/// always RGBA — a software-fallback converter lives behind the same
/// interface on the host side and is invisible to this crate.
pub trait HardwareDecoder: Send {
    fn init(&mut self, codec: CodecType, target_fps: f32) -> Result<()>;

    /// Decodes one packet. Returns `Ok(None)` when the packet produced no
    /// displayable picture yet (e.g. it was a reference frame); returns an
    /// error for a hard decode failure.
    fn decode(&mut self, packet: &EncodedPacket) -> Result<Option<DecodedImage>>;
}

/// Constructs one [`HardwareDecoder`] instance per decoder-pool slot. Mirrors
/// [`DetectorFactory`] — the pool creates and destroys backend instances as
/// it grows and shrinks, so it needs a factory rather than a single shared one.
pub trait HardwareDecoderFactory: Send + Sync {
    fn build(&self) -> Box<dyn HardwareDecoder>;
}

/// The object-detection neural runtime (spec §4.6). One instance is owned
/// per inference worker thread; instances are constructed from shared,
/// read-only model bytes.
pub trait Detector: Send {
    fn detect(&mut self, pixels: &[u8], width: u32, height: u32, stride: u32) -> Result<Vec<Detection>>;
}

/// Constructs one [`Detector`] per inference worker from the shared model blob.
pub trait DetectorFactory: Send + Sync {
    fn build(&self, model_bytes: &[u8]) -> Result<Box<dyn Detector>>;
}

/// Abstraction over the display surface binding (spec §4.8, §6.3). Mirrors
/// the observed `Surface.set_buffers_geometry/lock/unlock_and_post` shape.
pub trait Surface: Send {
    fn width(&self) -> u32;
    fn height(&self) -> u32;

    /// Reconfigures the surface's buffer geometry; called whenever the
    /// incoming frame's dimensions differ from the surface's current ones.
    fn set_buffers_geometry(&mut self, width: u32, height: u32) -> Result<()>;

    /// Locks the surface for writing and returns a mutable view of the
    /// mapped buffer plus its row stride in bytes.
    fn lock(&mut self) -> Result<(&mut [u8], u32)>;

    /// Commits the locked buffer to the display.
    fn unlock_and_post(&mut self);
}

#[cfg(test)]
pub(crate) mod mocks {
    use super::*;
    use std::collections::VecDeque;

    /// Deterministic RTSP session: yields a fixed script of packets/failures.
    pub struct ScriptedRtspSession {
        pub connect_failures_remaining: u32,
        pub packets: VecDeque<EncodedPacket>,
    }

    impl RtspSession for ScriptedRtspSession {
        fn play(&mut self, _url: &str) -> Result<Vec<TrackInfo>> {
            if self.connect_failures_remaining > 0 {
                self.connect_failures_remaining -= 1;
                return Err(crate::error::AnalyticsError::transient_io("rtsp_connect", "refused"));
            }
            Ok(vec![TrackInfo { codec: CodecType::H264, track_id: 0 }])
        }

        fn poll_packet(&mut self, _timeout: Duration) -> Result<Option<EncodedPacket>> {
            Ok(self.packets.pop_front())
        }

        fn shutdown(&mut self) {}
    }

    /// Decoder that turns every packet into a solid-color frame of fixed size.
    pub struct SolidColorDecoder {
        pub width: u32,
        pub height: u32,
    }

    impl HardwareDecoder for SolidColorDecoder {
        fn init(&mut self, _codec: CodecType, _target_fps: f32) -> Result<()> {
            Ok(())
        }

        fn decode(&mut self, packet: &EncodedPacket) -> Result<Option<DecodedImage>> {
            let stride = self.width * 4;
            Ok(Some(DecodedImage {
                width: self.width,
                height: self.height,
                stride,
                pixels: vec![0u8; (stride * self.height) as usize],
                presentation_ts: Some(packet.pts),
            }))
        }
    }

    /// Builds [`SolidColorDecoder`] instances of a fixed size.
    pub struct SolidColorDecoderFactory {
        pub width: u32,
        pub height: u32,
    }

    impl HardwareDecoderFactory for SolidColorDecoderFactory {
        fn build(&self) -> Box<dyn HardwareDecoder> {
            Box::new(SolidColorDecoder { width: self.width, height: self.height })
        }
    }

    /// Detector returning a fixed, scripted set of detections for every frame.
    pub struct ScriptedDetector {
        pub detections: Vec<Detection>,
    }

    impl Detector for ScriptedDetector {
        fn detect(&mut self, _pixels: &[u8], _w: u32, _h: u32, _stride: u32) -> Result<Vec<Detection>> {
            Ok(self.detections.clone())
        }
    }

    pub struct ScriptedDetectorFactory {
        pub detections: Vec<Detection>,
    }

    impl DetectorFactory for ScriptedDetectorFactory {
        fn build(&self, _model_bytes: &[u8]) -> Result<Box<dyn Detector>> {
            Ok(Box::new(ScriptedDetector { detections: self.detections.clone() }))
        }
    }

    /// In-memory surface that just records the last posted buffer's size.
    pub struct MemorySurface {
        pub width: u32,
        pub height: u32,
        buffer: Vec<u8>,
        pub posts: u32,
        pub fail_lock: bool,
    }

    impl MemorySurface {
        pub fn new(width: u32, height: u32) -> Self {
            Self { width, height, buffer: vec![0u8; (width * height * 4) as usize], posts: 0, fail_lock: false }
        }
    }

    impl Surface for MemorySurface {
        fn width(&self) -> u32 {
            self.width
        }

        fn height(&self) -> u32 {
            self.height
        }

        fn set_buffers_geometry(&mut self, width: u32, height: u32) -> Result<()> {
            self.width = width;
            self.height = height;
            self.buffer = vec![0u8; (width * height * 4) as usize];
            Ok(())
        }

        fn lock(&mut self) -> Result<(&mut [u8], u32)> {
            if self.fail_lock {
                return Err(crate::error::AnalyticsError::transient_io("surface_lock", "locked elsewhere"));
            }
            let stride = self.width * 4;
            Ok((&mut self.buffer, stride))
        }

        fn unlock_and_post(&mut self) {
            self.posts += 1;
        }
    }
}
