// SPDX-License-Identifier: MIT
//! Demo: runs a handful of synthetic RTSP channels through the full engine.
//!
//! Run: cargo run --bin vision-demo -- --channels 2 --seconds 5
//!
//! Each channel is backed by an in-process synthetic RTSP source (a moving
//! solid-color frame) rather than a real camera, so the demo has no external
//! dependencies. In a real deployment, swap in a host's concrete
//! `RtspSession`/`HardwareDecoder`/`Detector` implementations.

use anyhow::{Context, Result};
use clap::Parser;
use rtsp_vision_core::collab::{
    CodecType, DecodedImage, Detector, DetectorFactory, EncodedPacket, HardwareDecoder, HardwareDecoderFactory, RtspSession, TrackInfo,
};
use rtsp_vision_core::config::{ChannelPolicy, EngineConfig};
use rtsp_vision_core::frame::Detection;
use rtsp_vision_core::manager::ChannelManager;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Parser)]
struct Args {
    /// Number of synthetic channels to run.
    #[arg(long, default_value = "2")]
    channels: u8,
    /// How long to run the demo for, in seconds.
    #[arg(long, default_value = "5")]
    seconds: u64,
    /// Synthetic frame width/height.
    #[arg(long, default_value = "320")]
    width: u32,
    #[arg(long, default_value = "240")]
    height: u32,
}

/// Synthetic RTSP session: connects instantly and yields one packet per poll.
struct SyntheticRtspSession {
    pts: i64,
}

impl RtspSession for SyntheticRtspSession {
    fn play(&mut self, url: &str) -> rtsp_vision_core::Result<Vec<TrackInfo>> {
        println!("connected to {url}");
        Ok(vec![TrackInfo { codec: CodecType::H264, track_id: 0 }])
    }

    fn poll_packet(&mut self, timeout: Duration) -> rtsp_vision_core::Result<Option<EncodedPacket>> {
        std::thread::sleep(timeout.min(Duration::from_millis(33)));
        self.pts += 1;
        Ok(Some(EncodedPacket { track_id: 0, pts: self.pts, bytes: vec![0u8; 16] }))
    }

    fn shutdown(&mut self) {}
}

/// Synthetic decoder: produces a solid-color frame whose color shifts with pts.
struct SyntheticDecoder {
    width: u32,
    height: u32,
}

impl HardwareDecoder for SyntheticDecoder {
    fn init(&mut self, _codec: CodecType, _target_fps: f32) -> rtsp_vision_core::Result<()> {
        Ok(())
    }

    fn decode(&mut self, packet: &EncodedPacket) -> rtsp_vision_core::Result<Option<DecodedImage>> {
        let stride = self.width * 4;
        let shade = ((packet.pts * 7) % 255) as u8;
        let mut pixels = vec![0u8; (stride * self.height) as usize];
        for px in pixels.chunks_mut(4) {
            px[0] = shade;
            px[1] = 60;
            px[2] = 200u8.saturating_sub(shade);
            px[3] = 255;
        }
        Ok(Some(DecodedImage { width: self.width, height: self.height, stride, pixels, presentation_ts: Some(packet.pts) }))
    }
}

struct SyntheticDecoderFactory {
    width: u32,
    height: u32,
}

impl HardwareDecoderFactory for SyntheticDecoderFactory {
    fn build(&self) -> Box<dyn HardwareDecoder> {
        Box::new(SyntheticDecoder { width: self.width, height: self.height })
    }
}

/// Synthetic detector: reports a single centered "object" detection per frame.
struct SyntheticDetector;

impl Detector for SyntheticDetector {
    fn detect(&mut self, _pixels: &[u8], width: u32, height: u32, _stride: u32) -> rtsp_vision_core::Result<Vec<Detection>> {
        let w = (width / 4) as i32;
        let h = (height / 4) as i32;
        Ok(vec![Detection {
            class_id: 0,
            class_name: "object".to_string(),
            confidence: 0.87,
            x: (width as i32 - w) / 2,
            y: (height as i32 - h) / 2,
            w,
            h,
        }])
    }
}

struct SyntheticDetectorFactory;

impl DetectorFactory for SyntheticDetectorFactory {
    fn build(&self, _model_bytes: &[u8]) -> rtsp_vision_core::Result<Box<dyn Detector>> {
        Ok(Box::new(SyntheticDetector))
    }
}

fn main() -> Result<()> {
    rtsp_vision_core::init_tracing();
    let args = Args::parse();

    let manager = ChannelManager::new(
        EngineConfig::default(),
        Box::new(SyntheticDecoderFactory { width: args.width, height: args.height }),
        Arc::new(SyntheticDetectorFactory),
        vec![],
    );

    manager.start(|event| {
        println!("event: {event:?}");
    });

    for id in 0..args.channels {
        let session = Box::new(SyntheticRtspSession { pts: 0 });
        manager
            .create_channel(id, format!("rtsp://synthetic/{id}"), session, None, ChannelPolicy::default())
            .with_context(|| format!("failed to create channel {id}"))?;
    }

    let deadline = Instant::now() + Duration::from_secs(args.seconds);
    while Instant::now() < deadline {
        for id in 0..args.channels {
            manager.pump_channel(id, Duration::from_millis(50));
        }
        manager.sample_health();
    }

    for id in 0..args.channels {
        if let Some(status) = manager.channel_status(id) {
            println!("channel {id}: {status:?}");
        }
    }

    manager.shutdown();
    Ok(())
}
