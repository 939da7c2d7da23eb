//! # RTSP Vision Core
//!
//! A multi-channel RTSP video analytics engine: per-channel ingest,
//! hardware-decoder pooling, per-channel object-detection inference, and
//! optional display rendering, all driven from one host-facing
//! [`manager::ChannelManager`].
//!
//! ## Architecture
//!
//! Each channel is an independent pipeline running on its own threads:
//!
//! - **Ingest** ([`ingest`]): one thread per channel drives the RTSP session
//!   and decodes packets inline, pushing decoded frames onto a bounded,
//!   drop-oldest [`queue::FrameQueue`].
//! - **Decoder pool** ([`decoder_pool`]): hardware decoder instances are
//!   shared across channels under a configurable strategy — exclusive,
//!   shared, adaptive, priority-based, or load-balanced — with optional
//!   preemption.
//! - **Inference** ([`inference`]): each channel owns its own worker pool of
//!   detector instances built from shared model bytes; results correlate
//!   back to frames by frame id.
//! - **Pipeline** ([`pipeline`]): owns the channel's lifecycle state machine
//!   and post-processes raw detections (confidence/class filtering, NMS,
//!   adaptive submission throttling).
//! - **Rendering** ([`renderer`], [`draw`]): optionally composites detections
//!   onto a bound display surface, with its own recovery state machine for
//!   surface loss independent of the channel's connection state.
//! - **Health & recovery** ([`health`], [`recovery`]): periodic per-channel
//!   metric sampling rolls up into a system-wide status; failures route
//!   through a fixed, escalating set of remediation actions.
//!
//! Collaborators outside this crate's scope — the RTSP client, the hardware
//! decoder, the detection runtime, the display surface — are modeled as
//! narrow traits in [`collab`]; a host links concrete implementations
//! against them.
//!
//! ## Logging
//!
//! This crate emits structured [`tracing`] events rather than bare
//! `println!` — channel state transitions, recovery attempts, and decoder
//! pool pressure are all worth correlating by `channel_id` in a production
//! deployment, which `tracing`'s span/field model supports directly.

pub mod collab;
pub mod config;
pub mod decoder;
pub mod decoder_pool;
pub mod draw;
pub mod error;
pub mod events;
pub mod frame;
pub mod health;
pub mod inference;
pub mod ingest;
pub mod manager;
pub mod pipeline;
pub mod queue;
pub mod recovery;
pub mod renderer;

pub use config::EngineConfig;
pub use error::{AnalyticsError, Result};
pub use events::Event;
pub use frame::Frame;
pub use manager::ChannelManager;
pub use pipeline::ChannelState;

/// Installs a `tracing-subscriber` formatter reading its filter from
/// `RUST_LOG` (defaulting to `info`). Hosts embedding this crate are free to
/// install their own subscriber instead; this is a convenience for the demo
/// binary and for tests that want visible output.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
