//! # Frame buffer & ownership (C1)
//!
//! A decoded frame is reference-counted: the decoder callback allocates the
//! converted RGBA buffer once, wraps it in a [`Frame`], and every downstream
//! stage (inference queue, render queue) holds a clone of the `Arc` rather
//! than the pixels themselves. The last holder to drop its reference frees
//! the buffer. `Frame` does not implement `Copy`, and cloning a `Frame`
//! clones the `Arc` — never the pixel bytes.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// RGBA pixel format tag. The decoder is responsible for conversion from its
/// native YUV layout before a `Frame` is ever constructed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    Rgba8888,
}

/// An axis-aligned detection box in frame pixel coordinates, plus class and
/// confidence metadata (spec §3 "Detection").
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub class_id: u32,
    pub class_name: String,
    pub confidence: f32,
    pub x: i32,
    pub y: i32,
    pub w: i32,
    pub h: i32,
}

/// Fixed 10-color palette; a detection's draw color is always
/// `palette[class_id % 10]` (spec §4.9).
pub const PALETTE: [(u8, u8, u8); 10] = [
    (0, 200, 0),   // green
    (220, 20, 20), // red
    (20, 90, 220), // blue
    (230, 210, 0), // yellow
    (200, 0, 200), // magenta
    (0, 200, 200), // cyan
    (255, 140, 0), // orange
    (140, 0, 200), // purple
    (255, 105, 180), // pink
    (128, 128, 128), // gray
];

impl Detection {
    pub fn color(&self) -> (u8, u8, u8) {
        PALETTE[(self.class_id as usize) % PALETTE.len()]
    }

    /// Clip this detection's box to `0..=w, 0..=h`; used before a detection
    /// is attached to a frame so the testable-property bound
    /// `x + w <= frame.w, y + h <= frame.h` always holds.
    pub fn clip_to(&mut self, frame_w: i32, frame_h: i32) {
        self.x = self.x.max(0).min(frame_w);
        self.y = self.y.max(0).min(frame_h);
        let max_w = (frame_w - self.x).max(0);
        let max_h = (frame_h - self.y).max(0);
        self.w = self.w.clamp(0, max_w);
        self.h = self.h.clamp(0, max_h);
    }
}

/// A decoded RGBA image plus metadata and (after inference) detections.
///
/// The pixel buffer is owned by this struct and shared by reference —
/// [`Frame`] is always handed around behind an `Arc<Frame>`; interior
/// mutability for the detections is confined to the single writer (the
/// inference worker) via the `detections` field, written exactly once before
/// the frame is published to the render queue.
#[derive(Debug)]
pub struct Frame {
    pub channel_id: u8,
    pub frame_id: u64,
    pub width: u32,
    pub height: u32,
    pub stride: u32,
    pub format: PixelFormat,
    pub pixels: Vec<u8>,
    pub decoded_at: Instant,
    pub presentation_ts: Option<i64>,
    detections: Mutex<Vec<Detection>>,
    has_detections: AtomicBool,
}

impl Frame {
    pub fn new(channel_id: u8, frame_id: u64, width: u32, height: u32, stride: u32, pixels: Vec<u8>) -> Arc<Self> {
        Arc::new(Self {
            channel_id,
            frame_id,
            width,
            height,
            stride,
            format: PixelFormat::Rgba8888,
            pixels,
            decoded_at: Instant::now(),
            presentation_ts: None,
            detections: Mutex::new(Vec::new()),
            has_detections: AtomicBool::new(false),
        })
    }

    pub fn bytes_len(&self) -> usize {
        self.stride as usize * self.height as usize
    }

    /// Attaches the inference result for this frame. Called exactly once,
    /// by whichever inference worker finishes this frame's detection.
    pub fn attach_detections(&self, detections: Vec<Detection>) {
        *self.detections.lock() = detections;
        self.has_detections.store(true, Ordering::Release);
    }

    pub fn has_detections(&self) -> bool {
        self.has_detections.load(Ordering::Acquire)
    }

    /// Snapshot of the currently attached detections (empty before `attach_detections`).
    pub fn detections(&self) -> Vec<Detection> {
        self.detections.lock().clone()
    }
}

/// Monotonic per-channel frame id generator. `frame_id` strictly increases
/// within a channel and is never reused — it is the correlation key between
/// the inference queue and its result map.
#[derive(Debug, Default)]
pub struct FrameIdAllocator {
    next: u64,
}

impl FrameIdAllocator {
    pub fn next(&mut self) -> u64 {
        let id = self.next;
        self.next += 1;
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn color_wraps_through_the_10_color_palette() {
        let d = |class_id| Detection { class_id, class_name: "x".into(), confidence: 0.9, x: 0, y: 0, w: 1, h: 1 };
        assert_eq!(d(0).color(), PALETTE[0]);
        assert_eq!(d(10).color(), PALETTE[0]);
        assert_eq!(d(13).color(), PALETTE[3]);
    }

    #[test]
    fn clip_to_keeps_box_within_frame_bounds() {
        let mut d = Detection { class_id: 1, class_name: "x".into(), confidence: 0.9, x: 90, y: 90, w: 50, h: 50 };
        d.clip_to(100, 100);
        assert!(d.x + d.w <= 100);
        assert!(d.y + d.h <= 100);
    }

    #[test]
    fn frame_id_allocator_is_strictly_increasing() {
        let mut alloc = FrameIdAllocator::default();
        let a = alloc.next();
        let b = alloc.next();
        assert!(b > a);
    }

    #[test]
    fn frame_is_shared_not_copied() {
        let f = Frame::new(0, 0, 4, 2, 16, vec![0u8; 32]);
        let g = Arc::clone(&f);
        assert_eq!(Arc::strong_count(&f), 2);
        drop(g);
        assert_eq!(Arc::strong_count(&f), 1);
    }
}
