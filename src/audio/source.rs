//! Raw PCM sources the capture driver polls

use super::sources::SourceSelector;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleFormat, StreamConfig};
use parking_lot::Mutex;
use std::sync::Arc;
use thiserror::Error;

/// Bytes per sample of the PCM handed to the driver (signed 16-bit)
pub const BYTES_PER_SAMPLE: usize = 2;

/// Capture device errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeviceError {
    #[error("Audio device lost")]
    DeviceLost,

    #[error("Audio format unsupported: {0}")]
    FormatUnsupported(String),

    #[error("Permission to capture audio denied")]
    PermissionDenied,

    #[error("Audio capture initialization failed: {0}")]
    InitializationFailed(String),
}

/// Negotiated capture format. Samples are little-endian i16, interleaved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaveFormat {
    pub channels: u16,
    pub sample_rate: u32,
}

impl WaveFormat {
    pub fn block_align(&self) -> usize {
        self.channels.max(1) as usize * BYTES_PER_SAMPLE
    }
}

impl Default for WaveFormat {
    fn default() -> Self {
        Self {
            channels: 2,
            sample_rate: 48000,
        }
    }
}

/// Frames returned by one poll
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawFrames {
    pub bytes: Vec<u8>,
    pub frame_count: usize,
}

/// "Give me raw PCM frames on demand"
pub trait RawAudioSource {
    fn format(&self) -> WaveFormat;

    /// Return whatever frames are currently available (possibly none)
    fn poll_frames(&mut self) -> Result<RawFrames, DeviceError>;
}

impl<S: RawAudioSource + ?Sized> RawAudioSource for Box<S> {
    fn format(&self) -> WaveFormat {
        (**self).format()
    }

    fn poll_frames(&mut self) -> Result<RawFrames, DeviceError> {
        (**self).poll_frames()
    }
}

/// Bytes written by the stream callback, waiting for the next poll
struct PendingAudio {
    bytes: Vec<u8>,
    lost: bool,
}

/// Loopback or input capture through cpal.
///
/// The cpal stream pushes converted i16 bytes into a pending buffer from its
/// own callback; `poll_frames` takes everything accumulated since the last poll.
/// Must be created on the thread that polls it since `cpal::Stream` is not
/// `Send` on every platform.
pub struct CpalSource {
    _stream: cpal::Stream,
    pending: Arc<Mutex<PendingAudio>>,
    format: WaveFormat,
}

impl CpalSource {
    /// Open a source by ID (`system_audio`, `output:<name>`, `input:<name>`).
    /// `None` means system audio loopback.
    pub fn open(source_id: Option<&str>) -> Result<Self, DeviceError> {
        let host = cpal::default_host();
        let (device, is_loopback) = select_device(&host, source_id)?;

        // For loopback, query the output config (what the device is producing)
        let supported = if is_loopback {
            device.default_output_config()
        } else {
            device.default_input_config()
        }
        .map_err(map_default_config_error)?;

        let format = WaveFormat {
            channels: supported.channels(),
            sample_rate: supported.sample_rate().0,
        };
        log::info!(
            "Audio capture: {} Hz, {} channels, {:?}",
            format.sample_rate,
            format.channels,
            supported.sample_format()
        );

        let pending = Arc::new(Mutex::new(PendingAudio {
            bytes: Vec::new(),
            lost: false,
        }));
        // Keep at most ~2 seconds between polls
        let max_pending = format.sample_rate as usize * format.block_align() * 2;

        let config: StreamConfig = supported.config();
        let stream = match supported.sample_format() {
            SampleFormat::F32 => build_stream::<f32>(&device, &config, pending.clone(), max_pending),
            SampleFormat::I16 => build_stream::<i16>(&device, &config, pending.clone(), max_pending),
            SampleFormat::U16 => build_stream::<u16>(&device, &config, pending.clone(), max_pending),
            other => {
                return Err(DeviceError::FormatUnsupported(format!("{:?}", other)));
            }
        }
        .map_err(map_build_error)?;

        stream.play().map_err(|e| match e {
            cpal::PlayStreamError::DeviceNotAvailable => DeviceError::DeviceLost,
            other => classify_backend_message(other.to_string()),
        })?;

        log::info!("Audio capture stream started");

        Ok(Self {
            _stream: stream,
            pending,
            format,
        })
    }
}

impl RawAudioSource for CpalSource {
    fn format(&self) -> WaveFormat {
        self.format
    }

    fn poll_frames(&mut self) -> Result<RawFrames, DeviceError> {
        let mut pending = self.pending.lock();
        if pending.lost {
            return Err(DeviceError::DeviceLost);
        }
        let bytes = std::mem::take(&mut pending.bytes);
        drop(pending);

        let frame_count = bytes.len() / self.format.block_align();
        Ok(RawFrames { bytes, frame_count })
    }
}

fn select_device(
    host: &cpal::Host,
    source_id: Option<&str>,
) -> Result<(Device, bool), DeviceError> {
    let selector = match source_id {
        Some(id) => id
            .parse::<SourceSelector>()
            .map_err(|e| DeviceError::InitializationFailed(e.to_string()))?,
        None => SourceSelector::SystemAudio,
    };

    let device = match &selector {
        SourceSelector::SystemAudio => {
            log::info!("Using default output device for system audio loopback");
            host.default_output_device().ok_or_else(|| {
                DeviceError::InitializationFailed("No output device found".to_string())
            })?
        }
        SourceSelector::Output(name) => {
            log::info!("Using output device for loopback: {}", name);
            let devices = host
                .output_devices()
                .map_err(|e| DeviceError::InitializationFailed(e.to_string()))?;
            find_by_name(devices, name)?
        }
        SourceSelector::Input(name) => {
            log::info!("Using input device: {}", name);
            let devices = host
                .input_devices()
                .map_err(|e| DeviceError::InitializationFailed(e.to_string()))?;
            find_by_name(devices, name)?
        }
    };
    Ok((device, selector.is_loopback()))
}

fn find_by_name(
    mut devices: impl Iterator<Item = Device>,
    name: &str,
) -> Result<Device, DeviceError> {
    devices
        .find(|d| d.name().map(|n| n == name).unwrap_or(false))
        .ok_or_else(|| DeviceError::InitializationFailed(format!("Source not found: {}", name)))
}

fn build_stream<T: cpal::Sample + cpal::SizedSample>(
    device: &Device,
    config: &StreamConfig,
    pending: Arc<Mutex<PendingAudio>>,
    max_pending: usize,
) -> Result<cpal::Stream, cpal::BuildStreamError>
where
    i16: cpal::FromSample<T>,
{
    let error_pending = pending.clone();
    let block_align = config.channels.max(1) as usize * BYTES_PER_SAMPLE;

    device.build_input_stream(
        config,
        move |data: &[T], _: &cpal::InputCallbackInfo| {
            let mut pending = pending.lock();
            pending.bytes.reserve(data.len() * BYTES_PER_SAMPLE);
            for &sample in data {
                let value: i16 = cpal::Sample::from_sample(sample);
                pending.bytes.extend_from_slice(&value.to_le_bytes());
            }

            // Nobody is polling; keep the newest audio, frame-aligned
            if pending.bytes.len() > max_pending {
                let excess = pending.bytes.len() - max_pending;
                let excess = excess.div_ceil(block_align) * block_align;
                let excess = excess.min(pending.bytes.len());
                pending.bytes.drain(..excess);
            }
        },
        move |err| {
            log::error!("Audio stream error: {}", err);
            if matches!(err, cpal::StreamError::DeviceNotAvailable) {
                error_pending.lock().lost = true;
            }
        },
        None,
    )
}

fn map_default_config_error(e: cpal::DefaultStreamConfigError) -> DeviceError {
    match e {
        cpal::DefaultStreamConfigError::DeviceNotAvailable => DeviceError::DeviceLost,
        cpal::DefaultStreamConfigError::StreamTypeNotSupported => {
            DeviceError::FormatUnsupported("stream type not supported".to_string())
        }
        other => classify_backend_message(other.to_string()),
    }
}

fn map_build_error(e: cpal::BuildStreamError) -> DeviceError {
    match e {
        cpal::BuildStreamError::DeviceNotAvailable => DeviceError::DeviceLost,
        cpal::BuildStreamError::StreamConfigNotSupported => {
            DeviceError::FormatUnsupported("stream config not supported".to_string())
        }
        other => classify_backend_message(other.to_string()),
    }
}

/// Backends report access problems as free-form text
fn classify_backend_message(message: String) -> DeviceError {
    let lower = message.to_lowercase();
    if lower.contains("denied") || lower.contains("permission") {
        DeviceError::PermissionDenied
    } else {
        DeviceError::InitializationFailed(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_align_is_two_bytes_per_channel() {
        let stereo = WaveFormat::default();
        assert_eq!(stereo.block_align(), 4);

        let mono = WaveFormat {
            channels: 1,
            sample_rate: 44100,
        };
        assert_eq!(mono.block_align(), 2);
    }

    #[test]
    fn backend_messages_mentioning_access_map_to_permission_denied() {
        assert_eq!(
            classify_backend_message("Access is denied.".to_string()),
            DeviceError::PermissionDenied
        );
        assert!(matches!(
            classify_backend_message("something else".to_string()),
            DeviceError::InitializationFailed(_)
        ));
    }
}
