//! Bounded, drop-when-full delivery from the capture thread to a consumer
//!
//! Producers never block: a full queue drops the newest item. The consumer
//! polls with [`BoundedQueue::drain_all`], which never blocks either.

use crate::audio::SpectrumFrame;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Capacity of each delivery queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// Lifecycle and error notifications for the consumer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StatusEvent {
    /// Capture began on a device
    Started { device_id: String, sample_rate: u32 },

    /// Capture ended because the pipeline was stopped
    Stopped,

    /// Frames are being dropped because the consumer is not keeping up
    QueueOverflow,

    /// Capture ended because the device failed
    DeviceLost { reason: String },
}

/// Fixed-capacity FIFO.
#[derive(Debug)]
pub struct BoundedQueue<T> {
    items: Mutex<VecDeque<T>>,
    capacity: usize,
}

impl<T> BoundedQueue<T> {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "BoundedQueue capacity must be greater than zero");
        Self {
            items: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    /// Enqueues `item` unless the queue is full, in which case it is dropped
    /// and `false` is returned.
    pub fn try_push(&self, item: T) -> bool {
        let mut items = self.items.lock();
        if items.len() >= self.capacity {
            return false;
        }
        items.push_back(item);
        true
    }

    /// Removes and returns everything queued, oldest first.
    pub fn drain_all(&self) -> Vec<T> {
        self.items.lock().drain(..).collect()
    }
}

/// The frame and status queues shared by a pipeline and its consumer.
#[derive(Debug)]
pub struct DeliveryQueues {
    frames: BoundedQueue<SpectrumFrame>,
    status: BoundedQueue<StatusEvent>,
    overflowing: AtomicBool,
    dropped_frames: AtomicU64,
}

impl Default for DeliveryQueues {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_CAPACITY)
    }
}

impl DeliveryQueues {
    /// Frame and status queues of the same capacity.
    pub fn new(capacity: usize) -> Self {
        Self::with_capacities(capacity, capacity)
    }

    pub fn with_capacities(frame_capacity: usize, status_capacity: usize) -> Self {
        Self {
            frames: BoundedQueue::new(frame_capacity),
            status: BoundedQueue::new(status_capacity),
            overflowing: AtomicBool::new(false),
            dropped_frames: AtomicU64::new(0),
        }
    }

    pub fn frames(&self) -> &BoundedQueue<SpectrumFrame> {
        &self.frames
    }

    pub fn status(&self) -> &BoundedQueue<StatusEvent> {
        &self.status
    }

    /// Enqueues a frame. The first drop of an overflow episode raises one
    /// [`StatusEvent::QueueOverflow`]; the episode ends at the next
    /// successful push.
    pub fn push_frame(&self, frame: SpectrumFrame) -> bool {
        if self.frames.try_push(frame) {
            if self.overflowing.swap(false, Ordering::AcqRel) {
                log::info!(
                    "Spectrum queue recovered ({} frames dropped in total)",
                    self.dropped_frames()
                );
            }
            return true;
        }

        let dropped = self.dropped_frames.fetch_add(1, Ordering::Relaxed) + 1;
        if !self.overflowing.swap(true, Ordering::AcqRel) {
            log::warn!("Spectrum queue full, dropping frames ({} so far)", dropped);
            self.push_status(StatusEvent::QueueOverflow);
        }
        false
    }

    pub fn push_status(&self, event: StatusEvent) -> bool {
        if self.status.try_push(event) {
            true
        } else {
            log::warn!("Status queue full, dropping event");
            false
        }
    }

    pub fn drain_frames(&self) -> Vec<SpectrumFrame> {
        self.frames.drain_all()
    }

    pub fn drain_status(&self) -> Vec<StatusEvent> {
        self.status.drain_all()
    }

    /// Frames dropped because the frame queue was full.
    pub fn dropped_frames(&self) -> u64 {
        self.dropped_frames.load(Ordering::Relaxed)
    }

    pub fn is_overflowing(&self) -> bool {
        self.overflowing.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    fn frame(tag: f32) -> SpectrumFrame {
        SpectrumFrame {
            scale: vec![0.0, 1.0],
            magnitude: vec![tag, tag],
            window_start: Duration::ZERO,
            peak_dbfs: tag,
        }
    }

    #[test]
    fn drain_all_returns_items_in_push_order() {
        let queue = BoundedQueue::new(8);
        for i in 0..5 {
            assert!(queue.try_push(i));
        }

        assert_eq!(queue.drain_all(), vec![0, 1, 2, 3, 4]);
        assert!(queue.is_empty());
        assert!(queue.drain_all().is_empty());
    }

    #[test]
    fn try_push_on_full_queue_leaves_contents_unchanged() {
        let queue = BoundedQueue::new(2);
        assert!(queue.try_push("a"));
        assert!(queue.try_push("b"));

        assert!(!queue.try_push("c"));
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.drain_all(), vec!["a", "b"]);
    }

    #[test]
    fn overflow_episode_raises_single_status_event() {
        let queues = DeliveryQueues::new(4);

        let accepted = (0..10)
            .filter(|i| queues.push_frame(frame(*i as f32)))
            .count();

        assert_eq!(accepted, 4);
        assert_eq!(queues.dropped_frames(), 6);
        assert_eq!(queues.drain_status(), vec![StatusEvent::QueueOverflow]);

        let kept: Vec<f32> = queues.drain_frames().iter().map(|f| f.peak_dbfs).collect();
        assert_eq!(kept, vec![0.0, 1.0, 2.0, 3.0]);
    }

    #[test]
    fn new_overflow_episode_after_recovery_reports_again() {
        let queues = DeliveryQueues::with_capacities(1, 4);
        assert!(queues.push_frame(frame(0.0)));
        assert!(!queues.push_frame(frame(1.0)));
        assert!(queues.is_overflowing());

        queues.drain_frames();
        assert!(queues.push_frame(frame(2.0)));
        assert!(!queues.is_overflowing());
        assert!(!queues.push_frame(frame(3.0)));

        assert_eq!(
            queues.drain_status(),
            vec![StatusEvent::QueueOverflow, StatusEvent::QueueOverflow]
        );
    }

    #[test]
    fn overflow_events_are_lost_when_status_queue_is_full() {
        let queues = DeliveryQueues::new(1);
        queues.push_frame(frame(0.0));
        queues.push_frame(frame(1.0));
        queues.drain_frames();
        queues.push_frame(frame(2.0));
        queues.push_frame(frame(3.0));

        assert_eq!(queues.status().capacity(), 1);
        assert_eq!(queues.drain_status(), vec![StatusEvent::QueueOverflow]);
    }

    #[test]
    fn with_capacities_sizes_queues_independently() {
        let queues = DeliveryQueues::with_capacities(2, 8);

        assert_eq!(queues.frames().capacity(), 2);
        assert_eq!(queues.status().capacity(), 8);
    }

    #[test]
    fn full_status_queue_drops_events() {
        let queues = DeliveryQueues::new(1);

        assert!(queues.push_status(StatusEvent::Stopped));
        assert!(!queues.push_status(StatusEvent::QueueOverflow));
        assert_eq!(queues.drain_status(), vec![StatusEvent::Stopped]);
    }

    #[test]
    fn concurrent_producer_and_consumer_preserve_order() {
        let queue = Arc::new(BoundedQueue::new(DEFAULT_QUEUE_CAPACITY));
        let producer_queue = queue.clone();

        let producer = thread::spawn(move || {
            let mut pushed = Vec::new();
            for i in 0..10_000u32 {
                if producer_queue.try_push(i) {
                    pushed.push(i);
                }
            }
            pushed
        });

        let mut received = Vec::new();
        while !producer.is_finished() {
            received.extend(queue.drain_all());
        }
        let pushed = producer.join().unwrap();
        received.extend(queue.drain_all());

        assert_eq!(received, pushed);
    }

    #[test]
    fn status_event_serializes_with_type_tag() {
        let json = serde_json::to_string(&StatusEvent::DeviceLost {
            reason: "unplugged".to_string(),
        })
        .unwrap();

        assert_eq!(json, r#"{"type":"device_lost","reason":"unplugged"}"#);
    }
}
