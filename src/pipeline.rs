//! Per-tick orchestration: drain, transform, publish, broadcast

use crate::audio::{
    bass_average, sub_bass_average, CaptureQueue, FrameSink, FrequencyCurve,
    FrequencySnapshot, FrequencyTransform, WaveFormat,
};
use crate::broadcast::Broadcaster;
use crate::config::SpectrumConfig;
use crate::curve::{CurveBufferProxy, DeviceBuffer};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use thiserror::Error;

/// Pipeline errors
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Failed to start tick thread: {0}")]
    ThreadError(String),
}

type SnapshotConsumer = Box<dyn Fn(&[f32]) + Send + Sync + 'static>;

/// What one tick produced
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TickReport {
    /// Length of the computed frequency array (0 when nothing new was captured)
    pub frequencies: usize,

    /// Average over 20-60 Hz
    pub sub_bass: f32,

    /// Average over 60-250 Hz
    pub bass: f32,

    /// Listeners that received the array
    pub listeners: usize,
}

/// Drains captured PCM each tick and pushes the resulting frequency array
/// to attached curve proxies and registered listeners.
pub struct SpectrumPipeline {
    frames: FrameSink,
    transform: FrequencyTransform,
    broadcaster: Arc<Broadcaster>,
    consumers: Vec<SnapshotConsumer>,
}

impl SpectrumPipeline {
    pub fn new(config: &SpectrumConfig, queue: Arc<CaptureQueue>, format: WaveFormat) -> Self {
        Self {
            frames: FrameSink::new(queue),
            transform: FrequencyTransform::new(config, format.channels, format.sample_rate),
            broadcaster: Arc::new(Broadcaster::new()),
            consumers: Vec::new(),
        }
    }

    pub fn broadcaster(&self) -> &Arc<Broadcaster> {
        &self.broadcaster
    }

    pub fn snapshot(&self) -> &FrequencySnapshot {
        self.transform.snapshot()
    }

    pub fn set_curve(&mut self, curve: FrequencyCurve) {
        self.transform.set_curve(curve);
    }

    /// Feed every non-empty frequency array into `proxy` as live data
    pub fn attach_proxy<B: DeviceBuffer>(&mut self, proxy: Arc<CurveBufferProxy<B>>) {
        self.consumers
            .push(Box::new(move |frequencies| proxy.update_frequencies(frequencies)));
    }

    /// Run one tick. Ticks must not run concurrently with each other.
    pub fn on_tick(&mut self) -> TickReport {
        let frequencies = self.transform.frequency_array(&self.frames);
        if frequencies.is_empty() {
            return TickReport::default();
        }

        for consumer in &self.consumers {
            consumer(&frequencies);
        }

        let nyquist = self.transform.nyquist_hz();
        let sub_bass = sub_bass_average(&frequencies, nyquist);
        let bass = bass_average(&frequencies, nyquist);

        // Listeners get the lower half of the spectrum
        let half = &frequencies[..frequencies.len() / 2];
        let listeners = self.broadcaster.broadcast(half);

        log::trace!(
            "Tick: {} bins, sub-bass {:.3}, bass {:.3}, {} listeners",
            frequencies.len(),
            sub_bass,
            bass,
            listeners
        );

        TickReport {
            frequencies: frequencies.len(),
            sub_bass,
            bass,
            listeners,
        }
    }
}

/// Commands sent to the tick thread
enum TickCommand {
    Stop,
}

/// Calls `SpectrumPipeline::on_tick` on a dedicated thread at a fixed period.
pub struct TickDriver {
    command_tx: mpsc::Sender<TickCommand>,
    thread_handle: Option<JoinHandle<SpectrumPipeline>>,
}

impl TickDriver {
    pub fn start(mut pipeline: SpectrumPipeline, period: Duration) -> Result<Self, PipelineError> {
        let (command_tx, command_rx) = mpsc::channel();

        let thread_handle = thread::Builder::new()
            .name("spectrum-tick".to_string())
            .spawn(move || {
                log::info!("Tick driver started ({:?} period)", period);
                loop {
                    match command_rx.try_recv() {
                        Ok(TickCommand::Stop) | Err(mpsc::TryRecvError::Disconnected) => break,
                        Err(mpsc::TryRecvError::Empty) => {}
                    }

                    let started = Instant::now();
                    pipeline.on_tick();
                    thread::sleep(period.saturating_sub(started.elapsed()));
                }
                log::info!("Tick driver stopped");
                pipeline
            })
            .map_err(|e| PipelineError::ThreadError(e.to_string()))?;

        Ok(Self {
            command_tx,
            thread_handle: Some(thread_handle),
        })
    }

    /// Stop ticking and hand the pipeline back
    pub fn stop(&mut self) -> Option<SpectrumPipeline> {
        let _ = self.command_tx.send(TickCommand::Stop);
        self.thread_handle.take().and_then(|handle| handle.join().ok())
    }
}

impl Drop for TickDriver {
    fn drop(&mut self) {
        self.stop();
    }
}
