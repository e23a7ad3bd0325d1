//! Spectral Capture Library
//!
//! Captures system audio on a background thread, turns it into a
//! log-frequency spectrum once per tick, and publishes the result as a
//! curve that many workers (and a device buffer) can sample at once.

pub mod audio;
pub mod broadcast;
pub mod config;
pub mod curve;
pub mod pipeline;

pub use audio::{CaptureQueue, CaptureSession, CpalSource, FrequencyCurve, FrequencyTransform};
pub use broadcast::{Broadcaster, ListenerHandle};
pub use config::{ConfigError, OverflowPolicy, SpectrumConfig};
pub use curve::{CurveBufferProxy, DeviceCommandStream, FloatCurve, HostBuffer};
pub use pipeline::{PipelineError, SpectrumPipeline, TickDriver, TickReport};
