//! # Per-channel inference worker pool (C6)
//!
//! Each channel owns its own pool of inference workers — never a global
//! pool — so one channel's detector backlog cannot starve another's.  Each
//! worker builds its own [`Detector`] from the same shared, read-only model
//! bytes via a [`DetectorFactory`]. Results are correlated back to frames by
//! `frame_id` through a bounded result map; callers can poll it without
//! blocking or wait up to a timeout.

use crate::collab::{Detector, DetectorFactory};
use crate::config::{ChannelPolicy, MAX_TASK_QUEUE};
use crate::error::{AnalyticsError, Result};
use crate::events::{Event, EventSink};
use crate::frame::Frame;
use crate::pipeline::post_process;
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Outcome of one frame's detection, keyed by `frame_id` in the result map.
#[derive(Debug, Clone)]
pub struct DetectionResult {
    pub channel_id: u8,
    pub frame_id: u64,
    pub latency: Duration,
}

struct ResultMap {
    entries: HashMap<u64, DetectionResult>,
    capacity: usize,
    insertion_order: std::collections::VecDeque<u64>,
}

impl ResultMap {
    fn insert(&mut self, result: DetectionResult) {
        let id = result.frame_id;
        self.entries.insert(id, result);
        self.insertion_order.push_back(id);
        while self.insertion_order.len() > self.capacity {
            if let Some(oldest) = self.insertion_order.pop_front() {
                self.entries.remove(&oldest);
            }
        }
    }
}

/// Submits frames to the channel's inference workers and exposes their
/// results. Backpressure on submission: if the task queue is momentarily
/// full, the caller retries with a short sleep up to a fixed budget before
/// giving up with `ResourceExhausted`, rather than blocking indefinitely.
pub struct InferenceWorkerPool {
    channel_id: u8,
    task_tx: Sender<Arc<Frame>>,
    results: Arc<Mutex<ResultMap>>,
    workers: Vec<JoinHandle<()>>,
    stop: Arc<AtomicBool>,
}

const SUBMIT_RETRY_BUDGET: Duration = Duration::from_millis(200);
const SUBMIT_RETRY_INTERVAL: Duration = Duration::from_millis(5);

impl InferenceWorkerPool {
    pub fn new(channel_id: u8, policy: &ChannelPolicy, factory: Arc<dyn DetectorFactory>, model_bytes: Arc<Vec<u8>>, events: EventSink) -> Self {
        let queue_cap = (policy.max_queue_size as usize).min(MAX_TASK_QUEUE).max(1);
        let (task_tx, task_rx) = bounded::<Arc<Frame>>(queue_cap);
        let results = Arc::new(Mutex::new(ResultMap {
            entries: HashMap::new(),
            capacity: queue_cap.max(1) * 4,
            insertion_order: std::collections::VecDeque::new(),
        }));
        let stop = Arc::new(AtomicBool::new(false));

        let mut workers = Vec::with_capacity(policy.thread_pool_size as usize);
        for worker_idx in 0..policy.thread_pool_size.max(1) {
            let detector = match factory.build(&model_bytes) {
                Ok(d) => d,
                Err(e) => {
                    events.emit(Event::Error { channel_id, message: format!("detector init failed: {e}") });
                    continue;
                }
            };
            let rx: Receiver<Arc<Frame>> = task_rx.clone();
            let results = Arc::clone(&results);
            let stop = Arc::clone(&stop);
            let events = events.clone();
            let policy = policy.clone();
            let handle = std::thread::Builder::new()
                .name(format!("inference-{channel_id}-{worker_idx}"))
                .spawn(move || worker_loop(channel_id, detector, rx, results, stop, events, policy))
                .expect("spawn inference worker");
            workers.push(handle);
        }

        Self { channel_id, task_tx, results, workers, stop }
    }

    /// Submits `frame` for detection, retrying briefly against backpressure.
    pub fn submit(&self, frame: Arc<Frame>) -> Result<()> {
        let deadline = Instant::now() + SUBMIT_RETRY_BUDGET;
        loop {
            match self.task_tx.try_send(frame.clone()) {
                Ok(()) => return Ok(()),
                Err(crossbeam_channel::TrySendError::Full(_)) => {
                    if Instant::now() >= deadline {
                        return Err(AnalyticsError::resource_exhausted("inference_queue", "channel task queue full"));
                    }
                    std::thread::sleep(SUBMIT_RETRY_INTERVAL);
                }
                Err(crossbeam_channel::TrySendError::Disconnected(_)) => {
                    return Err(AnalyticsError::fatal("inference worker pool shut down"));
                }
            }
        }
    }

    /// Non-blocking lookup; `None` if the result isn't ready (or never will be).
    pub fn try_result(&self, frame_id: u64) -> Option<DetectionResult> {
        self.results.lock().entries.get(&frame_id).cloned()
    }

    /// Polls for `frame_id`'s result up to `timeout`.
    pub fn wait_result(&self, frame_id: u64, timeout: Duration) -> Option<DetectionResult> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(result) = self.try_result(frame_id) {
                return Some(result);
            }
            if Instant::now() >= deadline {
                return None;
            }
            std::thread::sleep(Duration::from_millis(2));
        }
    }

    pub fn channel_id(&self) -> u8 {
        self.channel_id
    }

    pub fn pending_results(&self) -> usize {
        self.results.lock().entries.len()
    }

    pub fn shutdown(mut self) {
        self.stop.store(true, Ordering::Release);
        drop(self.task_tx);
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
    }
}

fn worker_loop(
    channel_id: u8,
    mut detector: Box<dyn Detector>,
    rx: Receiver<Arc<Frame>>,
    results: Arc<Mutex<ResultMap>>,
    stop: Arc<AtomicBool>,
    events: EventSink,
    policy: ChannelPolicy,
) {
    while !stop.load(Ordering::Acquire) {
        match rx.recv_timeout(Duration::from_millis(200)) {
            Ok(frame) => {
                let started = Instant::now();
                match detector.detect(&frame.pixels, frame.width, frame.height, frame.stride) {
                    Ok(raw) => {
                        let processed = post_process(raw, &policy);
                        let count = processed.len();
                        frame.attach_detections(processed);
                        let result = DetectionResult { channel_id, frame_id: frame.frame_id, latency: started.elapsed() };
                        results.lock().insert(result);
                        events.emit(Event::DetectionReceived { channel_id, count });
                    }
                    Err(e) => {
                        events.emit(Event::Error { channel_id, message: e.to_string() });
                    }
                }
            }
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collab::mocks::ScriptedDetectorFactory;
    use crate::frame::Detection;

    fn det() -> Detection {
        Detection { class_id: 0, class_name: "person".into(), confidence: 0.9, x: 0, y: 0, w: 5, h: 5 }
    }

    #[test]
    fn submitted_frame_produces_a_result_attached_to_the_frame() {
        let (sink, _src) = crate::events::event_channel();
        let factory: Arc<dyn DetectorFactory> = Arc::new(ScriptedDetectorFactory { detections: vec![det()] });
        let policy = ChannelPolicy { thread_pool_size: 1, ..ChannelPolicy::default() };
        let pool = InferenceWorkerPool::new(0, &policy, factory, Arc::new(vec![]), sink);

        let frame = Frame::new(0, 7, 4, 4, 16, vec![0u8; 64]);
        pool.submit(Arc::clone(&frame)).unwrap();
        let result = pool.wait_result(7, Duration::from_secs(2)).expect("result within timeout");
        assert_eq!(result.frame_id, 7);
        assert!(frame.has_detections());
        assert_eq!(frame.detections().len(), 1);
        pool.shutdown();
    }

    #[test]
    fn try_result_is_none_before_detection_completes() {
        let (sink, _src) = crate::events::event_channel();
        let factory: Arc<dyn DetectorFactory> = Arc::new(ScriptedDetectorFactory { detections: vec![] });
        let policy = ChannelPolicy { thread_pool_size: 0, ..ChannelPolicy::default() };
        let pool = InferenceWorkerPool::new(0, &policy, factory, Arc::new(vec![]), sink);
        assert!(pool.try_result(99).is_none());
        pool.shutdown();
    }
}
