//! Capture driver and the session thread that runs it

use super::queue::{EnqueueOutcome, PcmChunk};
use super::sink::AudioSink;
use super::source::{DeviceError, RawAudioSource, WaveFormat, BYTES_PER_SAMPLE};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use thiserror::Error;

/// Audio capture errors
#[derive(Error, Debug)]
pub enum CaptureError {
    #[error(transparent)]
    Device(#[from] DeviceError),

    #[error("Thread error: {0}")]
    ThreadError(String),
}

/// What a successful poll did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// No frames were available
    Empty,

    /// Every sample was silent after sanitizing; nothing was enqueued
    Silent,

    /// A chunk of `samples` samples was handed to the sink
    Delivered {
        samples: usize,
        enqueue: EnqueueOutcome,
    },
}

/// Force the digital noise floor (+1/-1) to true silence
pub fn sanitize_sample(sample: i16) -> i16 {
    if sample == -1 || sample == 1 {
        0
    } else {
        sample
    }
}

/// Decode little-endian i16 samples, sanitize them in place and report
/// whether any sample is non-zero.
pub fn decode_and_sanitize(bytes: &[u8], sample_count: usize) -> (Vec<i16>, bool) {
    let sample_count = sample_count.min(bytes.len() / BYTES_PER_SAMPLE);
    let mut non_zero = false;
    let samples = bytes
        .chunks_exact(BYTES_PER_SAMPLE)
        .take(sample_count)
        .map(|pair| {
            let sample = sanitize_sample(i16::from_le_bytes([pair[0], pair[1]]));
            non_zero |= sample != 0;
            sample
        })
        .collect();
    (samples, non_zero)
}

/// Owns a raw audio source and turns each poll into at most one chunk.
pub struct CaptureDriver<S: RawAudioSource> {
    source: S,
    enqueue_empty_markers: bool,
}

impl<S: RawAudioSource> CaptureDriver<S> {
    pub fn new(source: S) -> Self {
        Self {
            source,
            enqueue_empty_markers: false,
        }
    }

    /// Push a zero-length chunk to the sink when a poll finds no frames
    pub fn with_empty_markers(mut self, enabled: bool) -> Self {
        self.enqueue_empty_markers = enabled;
        self
    }

    pub fn format(&self) -> WaveFormat {
        self.source.format()
    }

    /// Poll the source once. Device errors are reported to the sink and
    /// returned; there is no retry here.
    pub fn poll_once(&mut self, sink: &dyn AudioSink) -> Result<PollOutcome, DeviceError> {
        let frames = match self.source.poll_frames() {
            Ok(frames) => frames,
            Err(e) => {
                sink.on_error(&e);
                return Err(e);
            }
        };

        if frames.frame_count == 0 {
            if self.enqueue_empty_markers {
                sink.accept(PcmChunk::empty_marker());
            }
            return Ok(PollOutcome::Empty);
        }

        let channels = self.source.format().channels.max(1) as usize;
        let (samples, non_zero) = decode_and_sanitize(&frames.bytes, frames.frame_count * channels);

        if !non_zero {
            return Ok(PollOutcome::Silent);
        }

        let count = samples.len();
        let enqueue = sink.accept(PcmChunk::new(samples));
        Ok(PollOutcome::Delivered {
            samples: count,
            enqueue,
        })
    }
}

/// Commands sent to the capture thread
enum CaptureCommand {
    Stop,
}

/// Explicitly owned capture session.
///
/// Runs a `CaptureDriver` on a dedicated thread and feeds a sink until
/// stopped or until the device fails. A failed session stays stopped; the
/// owner decides whether to start a new one.
pub struct CaptureSession {
    command_tx: mpsc::Sender<CaptureCommand>,
    thread_handle: Option<JoinHandle<()>>,
    running: Arc<AtomicBool>,
    last_error: Arc<Mutex<Option<DeviceError>>>,
    format: WaveFormat,
}

impl CaptureSession {
    /// Start capturing. `open_source` runs on the capture thread so sources
    /// that are not `Send` can be used; its error is returned from here.
    pub fn start<S, F, K>(
        open_source: F,
        sink: K,
        poll_interval: Duration,
        enqueue_empty_markers: bool,
    ) -> Result<Self, CaptureError>
    where
        S: RawAudioSource + 'static,
        F: FnOnce() -> Result<S, DeviceError> + Send + 'static,
        K: AudioSink + 'static,
    {
        let (command_tx, command_rx) = mpsc::channel();
        let (ready_tx, ready_rx) = mpsc::channel::<Result<WaveFormat, DeviceError>>();
        let running = Arc::new(AtomicBool::new(true));
        let last_error = Arc::new(Mutex::new(None));

        let running_clone = running.clone();
        let error_clone = last_error.clone();

        let thread_handle = thread::Builder::new()
            .name("audio-capture".to_string())
            .spawn(move || {
                let source = match open_source() {
                    Ok(source) => source,
                    Err(e) => {
                        running_clone.store(false, Ordering::Release);
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                let mut driver = CaptureDriver::new(source).with_empty_markers(enqueue_empty_markers);
                let _ = ready_tx.send(Ok(driver.format()));

                if let Err(e) = run_capture_loop(&mut driver, &sink, &command_rx, poll_interval) {
                    log::error!("Audio capture stopped: {}", e);
                    *error_clone.lock() = Some(e);
                }
                running_clone.store(false, Ordering::Release);
            })
            .map_err(|e| CaptureError::ThreadError(e.to_string()))?;

        let format = match ready_rx.recv() {
            Ok(Ok(format)) => format,
            Ok(Err(e)) => {
                let _ = thread_handle.join();
                return Err(e.into());
            }
            Err(_) => {
                let _ = thread_handle.join();
                return Err(CaptureError::ThreadError(
                    "capture thread exited during startup".to_string(),
                ));
            }
        };

        log::info!("Audio capture session started");

        Ok(Self {
            command_tx,
            thread_handle: Some(thread_handle),
            running,
            last_error,
            format,
        })
    }

    pub fn format(&self) -> WaveFormat {
        self.format
    }

    /// False once stopped or after a device error
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Device error that ended the session, if any
    pub fn last_error(&self) -> Option<DeviceError> {
        self.last_error.lock().clone()
    }

    pub fn stop(&mut self) {
        let _ = self.command_tx.send(CaptureCommand::Stop);
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
            log::info!("Audio capture session stopped");
        }
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_capture_loop<S: RawAudioSource, K: AudioSink>(
    driver: &mut CaptureDriver<S>,
    sink: &K,
    command_rx: &mpsc::Receiver<CaptureCommand>,
    poll_interval: Duration,
) -> Result<(), DeviceError> {
    loop {
        match command_rx.try_recv() {
            Ok(CaptureCommand::Stop) => {
                log::info!("Audio capture stopping");
                return Ok(());
            }
            Err(mpsc::TryRecvError::Disconnected) => {
                log::info!("Audio capture channel disconnected");
                return Ok(());
            }
            Err(mpsc::TryRecvError::Empty) => {}
        }

        if let PollOutcome::Delivered { samples, enqueue } = driver.poll_once(sink)? {
            log::trace!("Captured {} samples ({:?})", samples, enqueue);
        }

        thread::sleep(poll_interval);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::fft::{remap_log_frequency, FrequencyCurve};
    use crate::audio::frames::FrameSink;
    use crate::audio::queue::CaptureQueue;
    use crate::audio::sink::RecordingSink;
    use crate::audio::source::RawFrames;
    use crate::config::OverflowPolicy;
    use std::collections::VecDeque;

    /// Source that replays a fixed list of poll results
    struct ScriptedSource {
        format: WaveFormat,
        polls: VecDeque<Result<RawFrames, DeviceError>>,
    }

    impl ScriptedSource {
        fn new(channels: u16, polls: Vec<Result<RawFrames, DeviceError>>) -> Self {
            Self {
                format: WaveFormat {
                    channels,
                    sample_rate: 48000,
                },
                polls: polls.into(),
            }
        }
    }

    impl RawAudioSource for ScriptedSource {
        fn format(&self) -> WaveFormat {
            self.format
        }

        fn poll_frames(&mut self) -> Result<RawFrames, DeviceError> {
            self.polls.pop_front().unwrap_or_else(|| Ok(RawFrames::default()))
        }
    }

    fn frames(samples: &[i16], frame_count: usize) -> Result<RawFrames, DeviceError> {
        let bytes = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
        Ok(RawFrames { bytes, frame_count })
    }

    #[test]
    fn sanitize_zeroes_noise_floor_only() {
        assert_eq!(sanitize_sample(-1), 0);
        assert_eq!(sanitize_sample(1), 0);
        assert_eq!(sanitize_sample(2), 2);
        assert_eq!(sanitize_sample(0), 0);
        assert_eq!(sanitize_sample(-2), -2);
    }

    #[test]
    fn all_silent_chunk_is_dropped() {
        let mut driver = CaptureDriver::new(ScriptedSource::new(1, vec![frames(&[-1, 1, 0], 3)]));
        let sink = RecordingSink::new();

        assert_eq!(driver.poll_once(&sink).unwrap(), PollOutcome::Silent);
        assert!(sink.chunks().is_empty());
    }

    #[test]
    fn chunk_with_signal_is_enqueued_sanitized() {
        let mut driver =
            CaptureDriver::new(ScriptedSource::new(1, vec![frames(&[100, -1, 1, -50], 4)]));
        let queue = CaptureQueue::new(4, OverflowPolicy::DropOldest);

        let outcome = driver.poll_once(&queue).unwrap();
        assert_eq!(
            outcome,
            PollOutcome::Delivered {
                samples: 4,
                enqueue: EnqueueOutcome::Queued
            }
        );

        let chunk = queue.dequeue_one().unwrap();
        assert_eq!(chunk.len(), 4);
        assert_eq!(chunk.samples(), &[100, 0, 0, -50]);
    }

    #[test]
    fn captured_chunk_flows_through_drain_and_remap() {
        let queue = Arc::new(CaptureQueue::new(4, OverflowPolicy::DropOldest));
        let mut driver =
            CaptureDriver::new(ScriptedSource::new(1, vec![frames(&[100, -1, 1, -50], 4)]));
        driver.poll_once(&queue).unwrap();

        let frame_sink = FrameSink::new(queue.clone());
        let mut working = Vec::new();
        assert_eq!(frame_sink.drain_into(&mut working), 1);
        assert_eq!(working, vec![100, 0, 0, -50]);
        assert!(queue.is_empty());

        let input: Vec<f32> = working.iter().map(|&s| s as f32).collect();
        let output = remap_log_frequency(&input, &FrequencyCurve::default());
        assert_eq!(output.len(), 4);
        assert_eq!(output[1], input[0]);
    }

    #[test]
    fn stereo_frames_double_the_sample_count() {
        let mut driver =
            CaptureDriver::new(ScriptedSource::new(2, vec![frames(&[10, 20, 30, 40], 2)]));
        let sink = RecordingSink::new();

        driver.poll_once(&sink).unwrap();
        assert_eq!(sink.samples(), vec![10, 20, 30, 40]);
    }

    #[test]
    fn short_byte_buffer_is_truncated_to_whole_samples() {
        let mut bytes: Vec<u8> = [7i16, 8].iter().flat_map(|s| s.to_le_bytes()).collect();
        bytes.push(0xff);
        let poll = Ok(RawFrames {
            bytes,
            frame_count: 4,
        });
        let mut driver = CaptureDriver::new(ScriptedSource::new(1, vec![poll]));
        let sink = RecordingSink::new();

        driver.poll_once(&sink).unwrap();
        assert_eq!(sink.samples(), vec![7, 8]);
    }

    #[test]
    fn empty_poll_is_a_no_op_by_default() {
        let mut driver = CaptureDriver::new(ScriptedSource::new(2, vec![frames(&[], 0)]));
        let sink = RecordingSink::new();

        assert_eq!(driver.poll_once(&sink).unwrap(), PollOutcome::Empty);
        assert!(sink.chunks().is_empty());
    }

    #[test]
    fn empty_poll_pushes_marker_when_enabled() {
        let mut driver =
            CaptureDriver::new(ScriptedSource::new(2, vec![frames(&[], 0)])).with_empty_markers(true);
        let sink = RecordingSink::new();

        assert_eq!(driver.poll_once(&sink).unwrap(), PollOutcome::Empty);
        let chunks = sink.chunks();
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].is_empty_marker());
    }

    #[test]
    fn device_errors_are_reported_and_returned() {
        let mut driver = CaptureDriver::new(ScriptedSource::new(
            2,
            vec![Err(DeviceError::PermissionDenied)],
        ));
        let sink = RecordingSink::new();

        assert_eq!(driver.poll_once(&sink), Err(DeviceError::PermissionDenied));
        assert_eq!(sink.errors(), vec![DeviceError::PermissionDenied]);
        assert!(sink.chunks().is_empty());
    }

    #[test]
    fn session_feeds_queue_then_stops() {
        let queue = Arc::new(CaptureQueue::new(16, OverflowPolicy::DropOldest));
        let mut session = CaptureSession::start(
            || Ok(ScriptedSource::new(1, vec![frames(&[5, 6], 2), frames(&[7], 1)])),
            queue.clone(),
            Duration::from_millis(1),
            false,
        )
        .unwrap();

        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while queue.len() < 2 && std::time::Instant::now() < deadline {
            thread::sleep(Duration::from_millis(1));
        }
        session.stop();

        assert!(!session.is_running());
        assert!(session.last_error().is_none());
        assert_eq!(queue.dequeue_one().unwrap().samples(), &[5, 6]);
        assert_eq!(queue.dequeue_one().unwrap().samples(), &[7]);
    }

    #[test]
    fn session_stops_on_device_loss() {
        let queue = Arc::new(CaptureQueue::new(16, OverflowPolicy::DropOldest));
        let session = CaptureSession::start(
            || Ok(ScriptedSource::new(1, vec![Err(DeviceError::DeviceLost)])),
            queue,
            Duration::from_millis(1),
            false,
        )
        .unwrap();

        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while session.is_running() && std::time::Instant::now() < deadline {
            thread::sleep(Duration::from_millis(1));
        }

        assert!(!session.is_running());
        assert_eq!(session.last_error(), Some(DeviceError::DeviceLost));
    }

    #[test]
    fn session_start_surfaces_open_failure() {
        let queue = Arc::new(CaptureQueue::new(16, OverflowPolicy::DropOldest));
        let result = CaptureSession::start(
            || Err::<ScriptedSource, _>(DeviceError::FormatUnsupported("U8".to_string())),
            queue,
            Duration::from_millis(1),
            false,
        );

        assert!(matches!(
            result,
            Err(CaptureError::Device(DeviceError::FormatUnsupported(_)))
        ));
    }
}
