//! Consumer side of the capture queue

use super::queue::CaptureQueue;
use std::sync::Arc;

/// Drains the capture queue into a working buffer.
pub struct FrameSink {
    queue: Arc<CaptureQueue>,
}

impl FrameSink {
    pub fn new(queue: Arc<CaptureQueue>) -> Self {
        Self { queue }
    }

    pub fn queue(&self) -> &Arc<CaptureQueue> {
        &self.queue
    }

    /// Replace `working` with every chunk queued since the last drain, in
    /// capture order. Each chunk is freed right after its samples are copied.
    ///
    /// Returns the number of chunks drained. When nothing is pending the
    /// working buffer is left untouched and 0 is returned.
    pub fn drain_into(&self, working: &mut Vec<i16>) -> usize {
        let chunks = self.queue.dequeue_all();
        if chunks.is_empty() {
            return 0;
        }

        let count = chunks.len();
        working.clear();
        for chunk in chunks {
            working.extend_from_slice(chunk.samples());
        }
        count
    }
}
