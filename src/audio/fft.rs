//! Frequency transform: PCM to a normalized, log-remapped magnitude array

use super::frames::FrameSink;
use crate::config::SpectrumConfig;
use rustfft::{num_complex::Complex, FftPlanner};
use serde::{Deserialize, Serialize};

/// Sub-bass band in Hz
pub const SUB_BASS_RANGE: (f32, f32) = (20.0, 60.0);

/// Bass band in Hz
pub const BASS_RANGE: (f32, f32) = (60.0, 250.0);

/// Remap from output index to input index:
/// `f(i) = (log_base(i) * multiplier) ^ power + offset`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FrequencyCurve {
    pub log_base: f32,
    pub multiplier: f32,
    pub power: f32,
    pub offset: f32,
}

impl Default for FrequencyCurve {
    fn default() -> Self {
        Self {
            log_base: 10.0,
            multiplier: 0.25,
            power: 6.0,
            offset: 0.0,
        }
    }
}

impl FrequencyCurve {
    /// Input index read by output index `i`, clamped to `0..len`.
    ///
    /// `log(0)` and other non-finite results read input 0.
    pub fn source_index(&self, i: usize, len: usize) -> usize {
        if len == 0 {
            return 0;
        }
        let mapped = ((i as f32).log(self.log_base) * self.multiplier).powf(self.power) + self.offset;
        if !mapped.is_finite() || mapped <= 0.0 {
            return 0;
        }
        (mapped as usize).min(len - 1)
    }
}

/// Remap `input` through `curve`. The output has the same length as the input.
pub fn remap_log_frequency(input: &[f32], curve: &FrequencyCurve) -> Vec<f32> {
    (0..input.len())
        .map(|i| input[curve.source_index(i, input.len())])
        .collect()
}

/// Resample to exactly `len` entries by picking evenly spaced source entries.
/// Returns the input unchanged when it already fits.
pub fn resample_evenly(values: &[f32], len: usize) -> Vec<f32> {
    if values.len() <= len {
        return values.to_vec();
    }
    if len == 0 {
        return Vec::new();
    }
    if len == 1 {
        return vec![values[0]];
    }
    let last = (values.len() - 1) as f32;
    (0..len)
        .map(|i| {
            let src = (i as f32 * last / (len - 1) as f32).round() as usize;
            values[src.min(values.len() - 1)]
        })
        .collect()
}

/// Array index holding frequency `hz`, for an array spanning `0..nyquist_hz`
pub fn frequency_to_index(hz: f32, len: usize, nyquist_hz: f32) -> usize {
    if len == 0 || !(nyquist_hz > 0.0) {
        return 0;
    }
    let index = (hz.max(0.0) / nyquist_hz * len as f32) as usize;
    index.min(len - 1)
}

/// Value of a specific frequency in a frequency array (0 for an empty array)
pub fn value_at_frequency(frequencies: &[f32], hz: f32, nyquist_hz: f32) -> f32 {
    if frequencies.is_empty() {
        return 0.0;
    }
    frequencies[frequency_to_index(hz, frequencies.len(), nyquist_hz)]
}

/// Average value over `low_hz..=high_hz` (0 for an empty array)
pub fn average_in_range(frequencies: &[f32], low_hz: f32, high_hz: f32, nyquist_hz: f32) -> f32 {
    if frequencies.is_empty() {
        return 0.0;
    }
    let a = frequency_to_index(low_hz, frequencies.len(), nyquist_hz);
    let b = frequency_to_index(high_hz, frequencies.len(), nyquist_hz);
    let (start, end) = if a <= b { (a, b) } else { (b, a) };
    let range = &frequencies[start..=end];
    range.iter().sum::<f32>() / range.len() as f32
}

pub fn sub_bass_average(frequencies: &[f32], nyquist_hz: f32) -> f32 {
    average_in_range(frequencies, SUB_BASS_RANGE.0, SUB_BASS_RANGE.1, nyquist_hz)
}

pub fn bass_average(frequencies: &[f32], nyquist_hz: f32) -> f32 {
    average_in_range(frequencies, BASS_RANGE.0, BASS_RANGE.1, nyquist_hz)
}

/// Windowed FFT producing normalized magnitudes
pub struct SpectrumAnalyzer {
    planner: FftPlanner<f32>,
    fft_size: usize,
    window: Vec<f32>,
    /// Scales a full-scale sine to magnitude 1.0
    amplitude_scale: f32,
}

impl SpectrumAnalyzer {
    pub fn new(fft_size: usize) -> Self {
        let fft_size = fft_size.max(2);

        // Hann window
        let window: Vec<f32> = (0..fft_size)
            .map(|i| {
                0.5 * (1.0 - (2.0 * std::f32::consts::PI * i as f32 / (fft_size - 1) as f32).cos())
            })
            .collect();
        let window_sum: f32 = window.iter().sum();

        Self {
            planner: FftPlanner::new(),
            fft_size,
            window,
            amplitude_scale: 2.0 / window_sum.max(f32::EPSILON),
        }
    }

    pub fn fft_size(&self) -> usize {
        self.fft_size
    }

    /// Number of magnitude bins produced (`fft_size / 2`)
    pub fn bin_count(&self) -> usize {
        self.fft_size / 2
    }

    /// Magnitudes in [0, 1] of the most recent `fft_size` frames of
    /// interleaved PCM. Shorter input is zero-padded.
    pub fn magnitudes(&mut self, samples: &[i16], channels: usize) -> Vec<f32> {
        let channels = channels.max(1);

        // Down-mix to mono f32
        let mono: Vec<f32> = samples
            .chunks(channels)
            .map(|frame| {
                let sum: f32 = frame.iter().map(|&s| s as f32 / 32768.0).sum();
                sum / frame.len() as f32
            })
            .collect();
        let recent = &mono[mono.len().saturating_sub(self.fft_size)..];

        let mut buffer: Vec<Complex<f32>> = self
            .window
            .iter()
            .enumerate()
            .map(|(i, &w)| Complex::new(recent.get(i).copied().unwrap_or(0.0) * w, 0.0))
            .collect();

        let fft = self.planner.plan_fft_forward(self.fft_size);
        fft.process(&mut buffer);

        buffer
            .iter()
            .take(self.bin_count())
            .map(|c| (c.norm() * self.amplitude_scale).clamp(0.0, 1.0))
            .collect()
    }
}

/// The transform's current output
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrequencySnapshot {
    pub magnitudes: Vec<f32>,
}

impl FrequencySnapshot {
    pub fn is_empty(&self) -> bool {
        self.magnitudes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.magnitudes.len()
    }
}

/// Owns the working PCM buffer and the current frequency snapshot.
pub struct FrequencyTransform {
    analyzer: SpectrumAnalyzer,
    curve: FrequencyCurve,
    max_resolution: usize,
    channels: u16,
    sample_rate: u32,
    working: Vec<i16>,
    snapshot: FrequencySnapshot,
}

impl FrequencyTransform {
    pub fn new(config: &SpectrumConfig, channels: u16, sample_rate: u32) -> Self {
        Self {
            analyzer: SpectrumAnalyzer::new(config.fft_size),
            curve: config.frequency_curve(),
            max_resolution: config.max_buffer_resolution.max(1),
            channels: channels.max(1),
            sample_rate: if sample_rate > 0 {
                sample_rate
            } else {
                config.sample_rate
            },
            working: Vec::new(),
            snapshot: FrequencySnapshot::default(),
        }
    }

    pub fn curve(&self) -> FrequencyCurve {
        self.curve
    }

    /// Retune the remap at run time
    pub fn set_curve(&mut self, curve: FrequencyCurve) {
        self.curve = curve;
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    /// Highest frequency represented by the last snapshot entry
    pub fn nyquist_hz(&self) -> f32 {
        self.sample_rate as f32 / 2.0
    }

    pub fn snapshot(&self) -> &FrequencySnapshot {
        &self.snapshot
    }

    /// Drain new PCM and rebuild the snapshot with the configured curve.
    ///
    /// Returns an empty array when nothing new was captured since the last
    /// call; the previous snapshot stays available through `snapshot()`.
    pub fn frequency_array(&mut self, frames: &FrameSink) -> Vec<f32> {
        let curve = self.curve;
        self.frequency_array_with(frames, &curve)
    }

    /// Same as `frequency_array` with explicit remap constants
    pub fn frequency_array_with(&mut self, frames: &FrameSink, curve: &FrequencyCurve) -> Vec<f32> {
        if frames.drain_into(&mut self.working) == 0 || self.working.is_empty() {
            return Vec::new();
        }
        let working = std::mem::take(&mut self.working);
        let result = self.transform(&working, curve);
        self.working = working;
        result
    }

    /// Spectrum of `samples`, remapped, bounded to the max resolution and
    /// clamped to [0, 1]. Becomes the current snapshot.
    pub fn transform(&mut self, samples: &[i16], curve: &FrequencyCurve) -> Vec<f32> {
        let bins = self.analyzer.magnitudes(samples, self.channels as usize);
        let remapped = remap_log_frequency(&bins, curve);
        let magnitudes: Vec<f32> = resample_evenly(&remapped, self.max_resolution)
            .into_iter()
            .map(|v| if v.is_finite() { v.clamp(0.0, 1.0) } else { 0.0 })
            .collect();

        self.snapshot.magnitudes.clear();
        self.snapshot.magnitudes.extend_from_slice(&magnitudes);
        magnitudes
    }
}
