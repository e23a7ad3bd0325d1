//! Bounded, thread-safe FIFO of captured PCM chunks

use crate::config::OverflowPolicy;
use parking_lot::Mutex;
use std::collections::VecDeque;

/// One burst of raw PCM samples from a single poll of the audio source.
///
/// A chunk with no samples marks a poll where the device produced no frames;
/// it is a valid queue entry and distinct from an empty queue.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PcmChunk {
    samples: Vec<i16>,
}

impl PcmChunk {
    pub fn new(samples: Vec<i16>) -> Self {
        Self { samples }
    }

    /// Zero-length marker for "device returned no data this poll"
    pub fn empty_marker() -> Self {
        Self::default()
    }

    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty_marker(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn into_samples(self) -> Vec<i16> {
        self.samples
    }
}

/// Result of an enqueue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// Chunk stored, nothing evicted
    Queued,

    /// Chunk stored after evicting the oldest pending chunk
    DroppedOldest,

    /// Queue full, chunk rejected
    DroppedNewest,
}

impl EnqueueOutcome {
    pub fn is_backpressure(&self) -> bool {
        !matches!(self, EnqueueOutcome::Queued)
    }
}

struct QueueInner {
    chunks: VecDeque<PcmChunk>,
    dropped: u64,
    /// Set while the queue sits at capacity so we only warn once per episode
    saturated: bool,
}

/// Capture queue shared by the capture thread and consumer threads.
///
/// Every operation takes the same lock; chunks leave the queue by value so
/// the queue never keeps a reference to a dequeued chunk.
pub struct CaptureQueue {
    inner: Mutex<QueueInner>,
    capacity: usize,
    policy: OverflowPolicy,
}

impl CaptureQueue {
    pub fn new(capacity: usize, policy: OverflowPolicy) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Mutex::new(QueueInner {
                chunks: VecDeque::with_capacity(capacity.min(64)),
                dropped: 0,
                saturated: false,
            }),
            capacity,
            policy,
        }
    }

    pub fn enqueue(&self, chunk: PcmChunk) -> EnqueueOutcome {
        let mut inner = self.inner.lock();

        if inner.chunks.len() < self.capacity {
            inner.saturated = false;
            inner.chunks.push_back(chunk);
            return EnqueueOutcome::Queued;
        }

        inner.dropped += 1;
        if !inner.saturated {
            inner.saturated = true;
            log::warn!(
                "Capture queue full ({} chunks), applying {:?}; consumer is not keeping up",
                self.capacity,
                self.policy
            );
        }

        match self.policy {
            OverflowPolicy::DropOldest => {
                inner.chunks.pop_front();
                inner.chunks.push_back(chunk);
                EnqueueOutcome::DroppedOldest
            }
            OverflowPolicy::DropNewest => EnqueueOutcome::DroppedNewest,
        }
    }

    /// Pop the oldest pending chunk, or `None` if the queue is empty
    pub fn dequeue_one(&self) -> Option<PcmChunk> {
        self.inner.lock().chunks.pop_front()
    }

    /// Pop every pending chunk in FIFO order under a single lock
    pub fn dequeue_all(&self) -> Vec<PcmChunk> {
        let mut inner = self.inner.lock();
        inner.saturated = false;
        inner.chunks.drain(..).collect()
    }

    /// Release every pending chunk. Returns how many chunks were freed.
    pub fn drain_all(&self) -> usize {
        let released = {
            let mut inner = self.inner.lock();
            inner.saturated = false;
            std::mem::take(&mut inner.chunks)
        };
        // Dropped outside the lock
        released.len()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().chunks.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Total chunks lost to overflow since creation
    pub fn dropped_count(&self) -> u64 {
        self.inner.lock().dropped
    }

    /// True when pending chunks have reached the high-water mark
    pub fn is_backpressured(&self) -> bool {
        self.inner.lock().chunks.len() >= self.capacity
    }
}

impl Drop for CaptureQueue {
    fn drop(&mut self) {
        let released = self.drain_all();
        if released > 0 {
            log::debug!("Capture queue released {} pending chunks on teardown", released);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn chunk(tag: i16) -> PcmChunk {
        PcmChunk::new(vec![tag, tag])
    }

    #[test]
    fn dequeue_returns_chunks_in_insertion_order() {
        let queue = CaptureQueue::new(8, OverflowPolicy::DropOldest);
        queue.enqueue(chunk(1));
        queue.enqueue(chunk(2));
        queue.enqueue(chunk(3));

        assert_eq!(queue.dequeue_one(), Some(chunk(1)));
        assert_eq!(queue.dequeue_one(), Some(chunk(2)));
        assert_eq!(queue.dequeue_one(), Some(chunk(3)));
        assert_eq!(queue.dequeue_one(), None);
    }

    #[test]
    fn empty_marker_is_distinct_from_empty_queue() {
        let queue = CaptureQueue::new(4, OverflowPolicy::DropOldest);
        assert_eq!(queue.dequeue_one(), None);

        queue.enqueue(PcmChunk::empty_marker());
        let marker = queue.dequeue_one().expect("marker should be queued");
        assert!(marker.is_empty_marker());
        assert_eq!(marker.len(), 0);
    }

    #[test]
    fn drain_all_releases_every_chunk_and_is_idempotent() {
        let queue = CaptureQueue::new(16, OverflowPolicy::DropOldest);
        for i in 0..5 {
            queue.enqueue(chunk(i));
        }

        assert_eq!(queue.drain_all(), 5);
        assert!(queue.is_empty());
        assert_eq!(queue.drain_all(), 0);
    }

    #[test]
    fn drop_oldest_keeps_most_recent_chunks() {
        let queue = CaptureQueue::new(2, OverflowPolicy::DropOldest);
        assert_eq!(queue.enqueue(chunk(1)), EnqueueOutcome::Queued);
        assert_eq!(queue.enqueue(chunk(2)), EnqueueOutcome::Queued);
        assert_eq!(queue.enqueue(chunk(3)), EnqueueOutcome::DroppedOldest);

        assert!(queue.is_backpressured());
        assert_eq!(queue.dropped_count(), 1);
        assert_eq!(queue.dequeue_all(), vec![chunk(2), chunk(3)]);
    }

    #[test]
    fn drop_newest_rejects_incoming_chunk() {
        let queue = CaptureQueue::new(2, OverflowPolicy::DropNewest);
        queue.enqueue(chunk(1));
        queue.enqueue(chunk(2));
        let outcome = queue.enqueue(chunk(3));

        assert!(outcome.is_backpressure());
        assert_eq!(outcome, EnqueueOutcome::DroppedNewest);
        assert_eq!(queue.dequeue_all(), vec![chunk(1), chunk(2)]);
    }

    #[test]
    fn fifo_order_holds_across_threads() {
        let queue = Arc::new(CaptureQueue::new(100_000, OverflowPolicy::DropNewest));
        let producer_queue = queue.clone();

        let producer = thread::spawn(move || {
            for i in 0..2_000i16 {
                producer_queue.enqueue(PcmChunk::new(vec![i]));
            }
        });

        let mut received = Vec::new();
        while received.len() < 2_000 {
            match queue.dequeue_one() {
                Some(c) => received.push(c.samples()[0]),
                None => thread::yield_now(),
            }
        }
        producer.join().unwrap();

        let expected: Vec<i16> = (0..2_000).collect();
        assert_eq!(received, expected);
    }
}
