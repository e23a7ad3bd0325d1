//! Run-time configuration

use crate::audio::FrequencyCurve;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// What to do with a new chunk when the capture queue is full
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Evict the oldest pending chunk to make room
    #[default]
    DropOldest,

    /// Reject the incoming chunk
    DropNewest,
}

/// Spectrum pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SpectrumConfig {
    /// Log base of the frequency remap
    pub freq_log_base: f32,

    /// Multiplier of the frequency remap
    pub freq_multiplier: f32,

    /// Power of the frequency remap
    pub freq_power: f32,

    /// Offset of the frequency remap
    pub freq_offset: f32,

    /// Period between ticks of the spectrum pipeline
    pub tick_period_secs: f32,

    /// Upper bound for published frequency and curve buffers
    pub max_buffer_resolution: usize,

    /// FFT window size
    pub fft_size: usize,

    /// Sample rate used when the source does not report one
    pub sample_rate: u32,

    /// Maximum number of pending chunks in the capture queue
    pub queue_capacity: usize,

    /// Capture queue overflow behaviour
    pub overflow_policy: OverflowPolicy,

    /// Enqueue zero-length chunks for polls that returned no frames
    pub enqueue_empty_markers: bool,

    /// Sleep between capture polls
    pub poll_interval_ms: u64,

    /// Capture source ID (`system_audio`, `output:<name>`, `input:<name>`)
    pub source_id: Option<String>,
}

impl Default for SpectrumConfig {
    fn default() -> Self {
        Self {
            freq_log_base: 10.0,
            freq_multiplier: 0.25,
            freq_power: 6.0,
            freq_offset: 0.0,
            tick_period_secs: 0.01,
            max_buffer_resolution: 255,
            fft_size: 1024,
            sample_rate: 48000,
            queue_capacity: 512,
            overflow_policy: OverflowPolicy::DropOldest,
            enqueue_empty_markers: false,
            poll_interval_ms: 5,
            source_id: None,
        }
    }
}

impl SpectrumConfig {
    /// Parse and validate a JSON config. Missing fields keep their defaults.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a JSON config file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.freq_log_base > 0.0) || self.freq_log_base == 1.0 {
            return Err(ConfigError::Invalid(format!(
                "freq_log_base must be positive and not 1, got {}",
                self.freq_log_base
            )));
        }
        if self.fft_size < 2 || !self.fft_size.is_power_of_two() {
            return Err(ConfigError::Invalid(format!(
                "fft_size must be a power of two >= 2, got {}",
                self.fft_size
            )));
        }
        if self.max_buffer_resolution == 0 {
            return Err(ConfigError::Invalid(
                "max_buffer_resolution must be greater than 0".to_string(),
            ));
        }
        if self.queue_capacity == 0 {
            return Err(ConfigError::Invalid(
                "queue_capacity must be greater than 0".to_string(),
            ));
        }
        if !(self.tick_period_secs > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "tick_period_secs must be positive, got {}",
                self.tick_period_secs
            )));
        }
        if self.sample_rate == 0 {
            return Err(ConfigError::Invalid(
                "sample_rate must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    /// The four remap constants as a curve
    pub fn frequency_curve(&self) -> FrequencyCurve {
        FrequencyCurve {
            log_base: self.freq_log_base,
            multiplier: self.freq_multiplier,
            power: self.freq_power,
            offset: self.freq_offset,
        }
    }

    pub fn tick_period(&self) -> Duration {
        Duration::from_secs_f32(self.tick_period_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_constants() {
        let config = SpectrumConfig::default();

        assert_eq!(config.freq_log_base, 10.0);
        assert_eq!(config.freq_multiplier, 0.25);
        assert_eq!(config.freq_power, 6.0);
        assert_eq!(config.freq_offset, 0.0);
        assert_eq!(config.tick_period_secs, 0.01);
        assert_eq!(config.max_buffer_resolution, 255);
        assert_eq!(config.overflow_policy, OverflowPolicy::DropOldest);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config =
            SpectrumConfig::from_json_str(r#"{ "freq_power": 2.0, "overflow_policy": "drop_newest" }"#)
                .unwrap();

        assert_eq!(config.freq_power, 2.0);
        assert_eq!(config.overflow_policy, OverflowPolicy::DropNewest);
        assert_eq!(config.freq_log_base, 10.0);
        assert_eq!(config.fft_size, 1024);
    }

    #[test]
    fn rejects_unit_log_base() {
        let err = SpectrumConfig::from_json_str(r#"{ "freq_log_base": 1.0 }"#).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn rejects_non_power_of_two_fft() {
        let err = SpectrumConfig::from_json_str(r#"{ "fft_size": 1000 }"#).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn rejects_malformed_json() {
        let err = SpectrumConfig::from_json_str("{ not json").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn frequency_curve_copies_remap_constants() {
        let config = SpectrumConfig {
            freq_log_base: 2.0,
            freq_multiplier: 0.5,
            freq_power: 3.0,
            freq_offset: 1.0,
            ..Default::default()
        };

        let curve = config.frequency_curve();
        assert_eq!(curve.log_base, 2.0);
        assert_eq!(curve.multiplier, 0.5);
        assert_eq!(curve.power, 3.0);
        assert_eq!(curve.offset, 1.0);
    }
}
