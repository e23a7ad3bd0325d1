//! CPU read buffer plus device mirror of the current frequency curve

use super::device::{DeviceBuffer, DeviceBufferError, DeviceCommandStream};
use crate::audio::resample_evenly;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// One authored point of a float curve
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CurveKey {
    pub time: f32,
    pub value: f32,
}

/// Keys ordered by time
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FloatCurve {
    keys: Vec<CurveKey>,
}

impl FloatCurve {
    pub fn new(mut keys: Vec<CurveKey>) -> Self {
        keys.sort_by(|a, b| a.time.total_cmp(&b.time));
        Self { keys }
    }

    /// Keys at times 0, 1, 2, ... holding `values`
    pub fn from_values(values: &[f32]) -> Self {
        Self {
            keys: values
                .iter()
                .enumerate()
                .map(|(i, &value)| CurveKey {
                    time: i as f32,
                    value,
                })
                .collect(),
        }
    }

    pub fn keys(&self) -> &[CurveKey] {
        &self.keys
    }

    pub fn num_keys(&self) -> usize {
        self.keys.len()
    }
}

/// What the downsample step reads from
#[derive(Debug, Clone, Default)]
enum DownsampleSource {
    #[default]
    Unset,
    Curve(FloatCurve),
    Frequencies(Vec<f32>),
}

/// Everything guarded by the downsample lock
struct DownsampleState<B> {
    source: DownsampleSource,
    downsampled: Vec<f32>,
    device: B,
    /// Warn once when the device buffer is smaller than the payload
    warned_truncation: bool,
    /// Set on teardown; device tasks still queued must not reallocate
    released: bool,
}

/// Published read buffer and its channel count, swapped as a unit
struct Published {
    buffer: Arc<[f32]>,
    num_channels: i32,
}

/// Double-buffered curve data sampled by many workers at once.
///
/// Rebuilds happen under the downsample lock into a private vector that is
/// then swapped into the published buffer. Samplers only clone the published
/// `Arc` and never observe a partial rebuild.
pub struct CurveBufferProxy<B: DeviceBuffer> {
    max_resolution: usize,
    state: Arc<Mutex<DownsampleState<B>>>,
    published: RwLock<Published>,
}

impl<B: DeviceBuffer> CurveBufferProxy<B> {
    pub fn new(max_resolution: usize, device: B) -> Self {
        Self {
            max_resolution: max_resolution.max(1),
            state: Arc::new(Mutex::new(DownsampleState {
                source: DownsampleSource::Unset,
                downsampled: Vec::new(),
                device,
                warned_truncation: false,
                released: false,
            })),
            published: RwLock::new(Published {
                buffer: Arc::from(Vec::new()),
                num_channels: 0,
            }),
        }
    }

    pub fn max_resolution(&self) -> usize {
        self.max_resolution
    }

    /// Register a new curve (or none). Resizes the read buffer to the
    /// curve's bounded key count, zero-filled until the next downsample.
    pub fn set_curve(&self, curve: Option<FloatCurve>) {
        let mut state = self.state.lock();
        let len = match &curve {
            Some(c) => c.num_keys().min(self.max_resolution),
            None => 0,
        };
        log::debug!(
            "Curve updated: {} keys, read buffer {} entries",
            curve.as_ref().map_or(0, |c| c.num_keys()),
            len
        );

        state.source = match curve {
            Some(c) => DownsampleSource::Curve(c),
            None => DownsampleSource::Unset,
        };
        state.downsampled = vec![0.0; len];

        let mut published = self.published.write();
        published.buffer = Arc::from(vec![0.0; len]);
        published.num_channels = 0;
    }

    /// Feed the latest live frequency array as the downsample source
    pub fn update_frequencies(&self, frequencies: &[f32]) {
        let mut state = self.state.lock();
        match &mut state.source {
            DownsampleSource::Frequencies(current) => {
                current.clear();
                current.extend_from_slice(frequencies);
            }
            source => *source = DownsampleSource::Frequencies(frequencies.to_vec()),
        }
    }

    /// Rebuild the downsampled buffer from the current source and publish
    /// it. Returns the number of entries in the downsampled buffer.
    pub fn downsample(&self) -> usize {
        let mut state = self.state.lock();
        self.downsample_locked(&mut state)
    }

    fn downsample_locked(&self, state: &mut DownsampleState<B>) -> usize {
        let values: Vec<f32> = match &state.source {
            DownsampleSource::Unset => return state.downsampled.len(),
            DownsampleSource::Curve(curve) => {
                let raw: Vec<f32> = curve.keys().iter().map(|k| k.value).collect();
                resample_evenly(&raw, self.max_resolution)
            }
            DownsampleSource::Frequencies(frequencies) => {
                resample_evenly(frequencies, self.max_resolution)
            }
        };
        let values: Vec<f32> = values
            .into_iter()
            .map(|v| if v.is_finite() { v.clamp(0.0, 1.0) } else { 0.0 })
            .collect();

        state.downsampled.clear();
        state.downsampled.extend_from_slice(&values);

        let num_channels = if values.is_empty() { 0 } else { 1 };
        let mut published = self.published.write();
        published.buffer = Arc::from(values);
        published.num_channels = num_channels;

        state.downsampled.len()
    }

    /// The currently published buffer
    pub fn snapshot(&self) -> Arc<[f32]> {
        self.published.read().buffer.clone()
    }

    /// Sample at a normalized position. Positions outside [0, 1] are
    /// clamped; an empty buffer samples as 0.0.
    pub fn sample(&self, normalized_position: f32) -> f32 {
        let buffer = self.snapshot();
        sample_buffer(&buffer, normalized_position)
    }

    /// Sample many positions against one snapshot
    pub fn sample_batch(&self, positions: &[f32]) -> Vec<f32> {
        let buffer = self.snapshot();
        positions
            .iter()
            .map(|&p| sample_buffer(&buffer, p))
            .collect()
    }

    /// Channels in the published buffer (0 until data has been published)
    pub fn num_channels(&self) -> i32 {
        self.published.read().num_channels
    }

    /// Downsample, then post a copy of the result to the device stream.
    ///
    /// The posted task owns its copy of the data and takes the downsample
    /// lock while the device buffer is mapped, so it never races a rebuild.
    pub fn compute_and_post(&self, stream: &DeviceCommandStream) -> Result<(), DeviceBufferError> {
        let payload = {
            let mut state = self.state.lock();
            self.downsample_locked(&mut state);
            state.downsampled.clone()
        };

        let state = self.state.clone();
        stream.post(move || {
            let mut state = state.lock();
            if state.released {
                log::debug!("Skipping device publish after teardown");
                return;
            }
            if let Err(e) = write_device_buffer(&mut state, &payload) {
                log::error!("Device buffer publish failed: {}", e);
            }
        })
    }

    /// Inspect the device buffer under the downsample lock
    pub fn with_device<R>(&self, f: impl FnOnce(&B) -> R) -> R {
        f(&self.state.lock().device)
    }
}

impl<B: DeviceBuffer> Drop for CurveBufferProxy<B> {
    fn drop(&mut self) {
        let mut state = self.state.lock();
        state.released = true;
        state.device.release();
    }
}

/// `buffer[ceil(lerp(0, len - 1, clamp(position, 0, 1)))]`
fn sample_buffer(buffer: &[f32], normalized_position: f32) -> f32 {
    if buffer.is_empty() {
        return 0.0;
    }
    let position = if normalized_position.is_nan() {
        0.0
    } else {
        normalized_position.clamp(0.0, 1.0)
    };
    let frame_index = (position * (buffer.len() - 1) as f32).ceil() as usize;
    buffer[frame_index.min(buffer.len() - 1)]
}

/// Allocate on the first non-empty payload, then overwrite in place.
/// A failed publish leaves the previous device contents untouched.
fn write_device_buffer<B: DeviceBuffer>(
    state: &mut DownsampleState<B>,
    payload: &[f32],
) -> Result<(), DeviceBufferError> {
    if payload.is_empty() {
        return Ok(());
    }
    if !state.device.is_allocated() {
        state.device.allocate(payload.len())?;
        log::debug!("Allocated device buffer of {} elements", payload.len());
    }

    let capacity = state.device.len();
    if payload.len() > capacity && !state.warned_truncation {
        state.warned_truncation = true;
        log::warn!(
            "Curve grew to {} entries but device buffer holds {}; extra entries are not published",
            payload.len(),
            capacity
        );
    }

    let count = payload.len().min(capacity);
    let mapped = state.device.map_for_write()?;
    mapped[..count].copy_from_slice(&payload[..count]);
    // A shorter payload must not leave the previous publish in the tail
    mapped[count..].fill(0.0);
    state.device.unmap();
    Ok(())
}
