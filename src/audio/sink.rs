//! Sinks that receive captured chunks from the capture driver

use super::queue::{CaptureQueue, EnqueueOutcome, PcmChunk};
use super::source::DeviceError;
use parking_lot::Mutex;
use std::sync::Arc;

/// Narrow capability for anything that accepts captured PCM.
///
/// The capture driver hands over sanitized chunks (or zero-length markers)
/// through `accept` and reports device failures through `on_error`.
pub trait AudioSink: Send + Sync {
    fn accept(&self, chunk: PcmChunk) -> EnqueueOutcome;

    fn on_error(&self, _error: &DeviceError) {}
}

impl AudioSink for CaptureQueue {
    fn accept(&self, chunk: PcmChunk) -> EnqueueOutcome {
        self.enqueue(chunk)
    }
}

impl<T: AudioSink + ?Sized> AudioSink for Arc<T> {
    fn accept(&self, chunk: PcmChunk) -> EnqueueOutcome {
        (**self).accept(chunk)
    }

    fn on_error(&self, error: &DeviceError) {
        (**self).on_error(error)
    }
}

/// Discards everything
#[derive(Debug, Default)]
pub struct NullSink;

impl AudioSink for NullSink {
    fn accept(&self, _chunk: PcmChunk) -> EnqueueOutcome {
        EnqueueOutcome::Queued
    }
}

/// Keeps every chunk and error it receives, in order
#[derive(Debug, Default)]
pub struct RecordingSink {
    chunks: Mutex<Vec<PcmChunk>>,
    errors: Mutex<Vec<DeviceError>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn chunks(&self) -> Vec<PcmChunk> {
        self.chunks.lock().clone()
    }

    pub fn errors(&self) -> Vec<DeviceError> {
        self.errors.lock().clone()
    }

    /// All recorded samples concatenated
    pub fn samples(&self) -> Vec<i16> {
        self.chunks
            .lock()
            .iter()
            .flat_map(|c| c.samples().iter().copied())
            .collect()
    }
}

impl AudioSink for RecordingSink {
    fn accept(&self, chunk: PcmChunk) -> EnqueueOutcome {
        self.chunks.lock().push(chunk);
        EnqueueOutcome::Queued
    }

    fn on_error(&self, error: &DeviceError) {
        self.errors.lock().push(error.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OverflowPolicy;

    #[test]
    fn queue_sink_enqueues_chunk() {
        let queue = Arc::new(CaptureQueue::new(4, OverflowPolicy::DropOldest));
        let sink: Arc<dyn AudioSink> = queue.clone();

        sink.accept(PcmChunk::new(vec![5, 6]));
        assert_eq!(queue.dequeue_one(), Some(PcmChunk::new(vec![5, 6])));
    }

    #[test]
    fn recording_sink_keeps_chunks_and_errors() {
        let sink = RecordingSink::new();
        sink.accept(PcmChunk::new(vec![1, 2]));
        sink.accept(PcmChunk::new(vec![3]));
        sink.on_error(&DeviceError::DeviceLost);

        assert_eq!(sink.chunks().len(), 2);
        assert_eq!(sink.samples(), vec![1, 2, 3]);
        assert_eq!(sink.errors(), vec![DeviceError::DeviceLost]);
    }

    #[test]
    fn null_sink_accepts_everything() {
        let sink = NullSink;
        assert_eq!(sink.accept(PcmChunk::new(vec![1])), EnqueueOutcome::Queued);
    }
}
