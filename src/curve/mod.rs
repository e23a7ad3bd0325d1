//! Sampleable frequency curves for parallel workers and device buffers

mod device;
mod proxy;

pub use device::{DeviceBuffer, DeviceBufferError, DeviceCommandStream, HostBuffer};
pub use proxy::{CurveBufferProxy, CurveKey, FloatCurve};
