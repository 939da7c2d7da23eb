//! # Bounded frame queue (C2)
//!
//! A single-producer/multi-consumer queue of `Arc<Frame>` with drop-oldest
//! overflow and a blocking `pop_timeout`. Built on `parking_lot`'s
//! `Mutex`/`Condvar` rather than a channel because the drop-oldest-on-full
//! semantics (spec §4.2) need to inspect and mutate the front of the queue
//! on a full push, which `crossbeam_channel`'s bounded channel does not
//! expose.

use crate::frame::Frame;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Result of a [`FrameQueue::push`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Accepted,
    Dropped,
}

struct Inner {
    items: VecDeque<Arc<Frame>>,
}

/// Thread-safe bounded FIFO of frames. Overflow drops the oldest entry and
/// increments `dropped`; non-dropped frames are delivered in push order.
pub struct FrameQueue {
    capacity: usize,
    inner: Mutex<Inner>,
    not_empty: Condvar,
    dropped: AtomicU64,
}

impl FrameQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: Mutex::new(Inner { items: VecDeque::with_capacity(capacity) }),
            not_empty: Condvar::new(),
            dropped: AtomicU64::new(0),
        }
    }

    /// Appends `frame`. If the queue is already at capacity the oldest entry
    /// is dropped first (its `Arc` reference is released) and `Dropped` is
    /// returned; the new frame is still appended, keeping the queue full
    /// rather than momentarily empty.
    pub fn push(&self, frame: Arc<Frame>) -> PushOutcome {
        let mut guard = self.inner.lock();
        let outcome = if guard.items.len() >= self.capacity {
            guard.items.pop_front();
            self.dropped.fetch_add(1, Ordering::Relaxed);
            PushOutcome::Dropped
        } else {
            PushOutcome::Accepted
        };
        guard.items.push_back(frame);
        self.not_empty.notify_one();
        outcome
    }

    /// Blocks up to `timeout` waiting for an entry; returns `None` on
    /// timeout. Multiple consumers may call this concurrently — each popped
    /// frame goes to exactly one caller.
    pub fn pop_timeout(&self, timeout: Duration) -> Option<Arc<Frame>> {
        let mut guard = self.inner.lock();
        if guard.items.is_empty() {
            let result = self.not_empty.wait_for(&mut guard, timeout);
            if result.timed_out() && guard.items.is_empty() {
                return None;
            }
        }
        guard.items.pop_front()
    }

    /// Non-blocking pop for callers on a strict internal cadence (the
    /// compositor, the renderer's per-tick scan).
    pub fn try_pop(&self) -> Option<Arc<Frame>> {
        self.inner.lock().items.pop_front()
    }

    pub fn size(&self) -> usize {
        self.inner.lock().items.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Releases every held frame reference synchronously.
    pub fn clear(&self) {
        self.inner.lock().items.clear();
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mk_frame(id: u64) -> Arc<Frame> {
        Frame::new(0, id, 2, 2, 8, vec![0u8; 16])
    }

    #[test]
    fn push_past_capacity_drops_oldest_and_reports_dropped() {
        let q = FrameQueue::new(2);
        assert_eq!(q.push(mk_frame(0)), PushOutcome::Accepted);
        assert_eq!(q.push(mk_frame(1)), PushOutcome::Accepted);
        assert_eq!(q.push(mk_frame(2)), PushOutcome::Dropped);
        assert_eq!(q.size(), 2);
        assert_eq!(q.dropped_count(), 1);
        // oldest (id 0) should be gone, leaving 1 then 2 in FIFO order.
        let first = q.try_pop().unwrap();
        assert_eq!(first.frame_id, 1);
        let second = q.try_pop().unwrap();
        assert_eq!(second.frame_id, 2);
    }

    #[test]
    fn pop_timeout_returns_none_when_empty() {
        let q = FrameQueue::new(4);
        assert!(q.pop_timeout(Duration::from_millis(20)).is_none());
    }

    #[test]
    fn pop_timeout_wakes_on_push_from_another_thread() {
        let q = Arc::new(FrameQueue::new(4));
        let q2 = Arc::clone(&q);
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            q2.push(mk_frame(42));
        });
        let got = q.pop_timeout(Duration::from_secs(2));
        handle.join().unwrap();
        assert_eq!(got.unwrap().frame_id, 42);
    }

    #[test]
    fn clear_releases_all_frames() {
        let q = FrameQueue::new(4);
        q.push(mk_frame(0));
        q.push(mk_frame(1));
        q.clear();
        assert_eq!(q.size(), 0);
    }

    #[test]
    fn never_exceeds_capacity() {
        let q = FrameQueue::new(3);
        for i in 0..10 {
            q.push(mk_frame(i));
            assert!(q.size() <= q.capacity());
        }
    }
}
