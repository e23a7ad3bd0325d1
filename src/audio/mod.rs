//! Audio capture and analysis module

mod capture;
mod fft;
mod frames;
mod queue;
mod sink;
mod source;
mod sources;

pub use capture::{
    decode_and_sanitize, sanitize_sample, CaptureDriver, CaptureError, CaptureSession,
    PollOutcome,
};
pub use fft::{
    average_in_range, bass_average, frequency_to_index, remap_log_frequency, resample_evenly,
    sub_bass_average, value_at_frequency, FrequencyCurve, FrequencySnapshot, FrequencyTransform,
    SpectrumAnalyzer, BASS_RANGE, SUB_BASS_RANGE,
};
pub use frames::FrameSink;
pub use queue::{CaptureQueue, EnqueueOutcome, PcmChunk};
pub use sink::{AudioSink, NullSink, RecordingSink};
pub use source::{CpalSource, DeviceError, RawAudioSource, RawFrames, WaveFormat, BYTES_PER_SAMPLE};
pub use sources::{list_sources, AudioSource, SourceError, SourceSelector, SourceType};
