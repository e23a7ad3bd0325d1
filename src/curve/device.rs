//! Device-resident buffer backend and the serialized command stream that writes it

use std::sync::mpsc;
use std::thread::{self, JoinHandle};
use thiserror::Error;

/// Device buffer errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeviceBufferError {
    #[error("Failed to allocate device buffer of {len} elements")]
    AllocationFailed { len: usize },

    #[error("Failed to map device buffer: {0}")]
    MapFailed(String),

    #[error("Device command stream unavailable: {0}")]
    StreamUnavailable(String),
}

/// A float buffer living on the compute device.
///
/// Allocated once, then mapped, written and unmapped on every publish.
pub trait DeviceBuffer: Send + 'static {
    fn allocate(&mut self, len: usize) -> Result<(), DeviceBufferError>;

    /// Allocated length in elements (0 before allocation)
    fn len(&self) -> usize;

    fn is_allocated(&self) -> bool {
        self.len() > 0
    }

    fn map_for_write(&mut self) -> Result<&mut [f32], DeviceBufferError>;

    fn unmap(&mut self);

    fn release(&mut self);
}

/// Device buffer kept in host memory, for headless runs and tests
#[derive(Debug, Default)]
pub struct HostBuffer {
    data: Vec<f32>,
    mapped: bool,
    allocations: usize,
    fail_allocation: bool,
}

impl HostBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// A buffer whose allocation always fails
    pub fn failing() -> Self {
        Self {
            fail_allocation: true,
            ..Default::default()
        }
    }

    pub fn contents(&self) -> &[f32] {
        &self.data
    }

    /// Contents as raw little-endian bytes
    pub fn bytes(&self) -> Vec<u8> {
        self.data.iter().flat_map(|v| v.to_le_bytes()).collect()
    }

    pub fn allocation_count(&self) -> usize {
        self.allocations
    }

    pub fn is_mapped(&self) -> bool {
        self.mapped
    }
}

impl DeviceBuffer for HostBuffer {
    fn allocate(&mut self, len: usize) -> Result<(), DeviceBufferError> {
        if self.fail_allocation || len == 0 {
            return Err(DeviceBufferError::AllocationFailed { len });
        }
        self.data = vec![0.0; len];
        self.allocations += 1;
        Ok(())
    }

    fn len(&self) -> usize {
        self.data.len()
    }

    fn map_for_write(&mut self) -> Result<&mut [f32], DeviceBufferError> {
        if self.mapped {
            return Err(DeviceBufferError::MapFailed("already mapped".to_string()));
        }
        self.mapped = true;
        Ok(&mut self.data)
    }

    fn unmap(&mut self) {
        self.mapped = false;
    }

    fn release(&mut self) {
        self.data = Vec::new();
        self.mapped = false;
    }
}

type DeviceTask = Box<dyn FnOnce() + Send + 'static>;

/// Commands sent to the device thread
enum StreamCommand {
    Run(DeviceTask),
    Flush(mpsc::Sender<()>),
    Stop,
}

/// Single-threaded, in-order executor for device work.
pub struct DeviceCommandStream {
    command_tx: mpsc::Sender<StreamCommand>,
    thread_handle: Option<JoinHandle<()>>,
}

impl DeviceCommandStream {
    pub fn new() -> Result<Self, DeviceBufferError> {
        let (command_tx, command_rx) = mpsc::channel::<StreamCommand>();

        let thread_handle = thread::Builder::new()
            .name("device-commands".to_string())
            .spawn(move || {
                while let Ok(command) = command_rx.recv() {
                    match command {
                        StreamCommand::Run(task) => task(),
                        StreamCommand::Flush(done) => {
                            let _ = done.send(());
                        }
                        StreamCommand::Stop => break,
                    }
                }
                log::debug!("Device command stream stopped");
            })
            .map_err(|e| DeviceBufferError::StreamUnavailable(e.to_string()))?;

        Ok(Self {
            command_tx,
            thread_handle: Some(thread_handle),
        })
    }

    /// Queue a task behind everything posted before it
    pub fn post(&self, task: impl FnOnce() + Send + 'static) -> Result<(), DeviceBufferError> {
        self.command_tx
            .send(StreamCommand::Run(Box::new(task)))
            .map_err(|_| DeviceBufferError::StreamUnavailable("stream stopped".to_string()))
    }

    /// Block until every previously posted task has run
    pub fn flush(&self) -> Result<(), DeviceBufferError> {
        let (done_tx, done_rx) = mpsc::channel();
        self.command_tx
            .send(StreamCommand::Flush(done_tx))
            .map_err(|_| DeviceBufferError::StreamUnavailable("stream stopped".to_string()))?;
        done_rx
            .recv()
            .map_err(|_| DeviceBufferError::StreamUnavailable("stream stopped".to_string()))
    }

    pub fn stop(&mut self) {
        let _ = self.command_tx.send(StreamCommand::Stop);
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for DeviceCommandStream {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[test]
    fn host_buffer_allocates_maps_and_releases() {
        let mut buffer = HostBuffer::new();
        assert!(!buffer.is_allocated());

        buffer.allocate(3).unwrap();
        assert_eq!(buffer.len(), 3);

        buffer.map_for_write().unwrap().copy_from_slice(&[0.1, 0.2, 0.3]);
        assert!(buffer.is_mapped());
        assert!(buffer.map_for_write().is_err());
        buffer.unmap();

        assert_eq!(buffer.contents(), &[0.1, 0.2, 0.3]);
        buffer.release();
        assert_eq!(buffer.len(), 0);
    }

    #[test]
    fn failing_host_buffer_reports_allocation_failure() {
        let mut buffer = HostBuffer::failing();
        assert_eq!(
            buffer.allocate(4),
            Err(DeviceBufferError::AllocationFailed { len: 4 })
        );
    }

    #[test]
    fn command_stream_runs_tasks_in_order() {
        let stream = DeviceCommandStream::new().unwrap();
        let log = Arc::new(Mutex::new(Vec::new()));

        for i in 0..10 {
            let log = log.clone();
            stream.post(move || log.lock().push(i)).unwrap();
        }
        stream.flush().unwrap();

        assert_eq!(*log.lock(), (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn post_after_stop_fails() {
        let mut stream = DeviceCommandStream::new().unwrap();
        stream.stop();

        assert!(stream.post(|| {}).is_err());
        assert!(stream.flush().is_err());
    }
}
