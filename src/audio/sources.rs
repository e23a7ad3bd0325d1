//! Capture source IDs and enumeration

use cpal::traits::{DeviceTrait, HostTrait};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

const SYSTEM_AUDIO_ID: &str = "system_audio";
const OUTPUT_PREFIX: &str = "output:";
const INPUT_PREFIX: &str = "input:";

/// A capture source as shown by `--list`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioSource {
    /// Value to pass as `source_id`
    pub id: String,

    /// Display name
    pub name: String,

    pub source_type: SourceType,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    /// Loopback of an output device
    SystemAudio,

    /// Input device (microphone, line in)
    InputDevice,
}

/// Source enumeration errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SourceError {
    #[error("Failed to enumerate devices: {0}")]
    EnumerationError(String),

    #[error("Unknown source id: {0}")]
    UnknownId(String),
}

/// Parsed form of a source ID
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SourceSelector {
    /// Loopback of the default output device
    #[default]
    SystemAudio,

    /// Loopback of a named output device
    Output(String),

    /// A named input device
    Input(String),
}

impl SourceSelector {
    /// Loopback selectors capture what an output device is playing
    pub fn is_loopback(&self) -> bool {
        !matches!(self, SourceSelector::Input(_))
    }
}

impl FromStr for SourceSelector {
    type Err = SourceError;

    fn from_str(id: &str) -> Result<Self, Self::Err> {
        if id == SYSTEM_AUDIO_ID {
            Ok(SourceSelector::SystemAudio)
        } else if let Some(name) = id.strip_prefix(OUTPUT_PREFIX) {
            Ok(SourceSelector::Output(name.to_string()))
        } else if let Some(name) = id.strip_prefix(INPUT_PREFIX) {
            Ok(SourceSelector::Input(name.to_string()))
        } else {
            Err(SourceError::UnknownId(id.to_string()))
        }
    }
}

impl fmt::Display for SourceSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceSelector::SystemAudio => f.write_str(SYSTEM_AUDIO_ID),
            SourceSelector::Output(name) => write!(f, "{}{}", OUTPUT_PREFIX, name),
            SourceSelector::Input(name) => write!(f, "{}{}", INPUT_PREFIX, name),
        }
    }
}

/// List the sources of the default host, system audio first
pub fn list_sources() -> Result<Vec<AudioSource>, SourceError> {
    let host = cpal::default_host();
    let default_output = host.default_output_device().and_then(|d| d.name().ok());

    let mut sources = Vec::new();
    if let Some(name) = &default_output {
        sources.push(AudioSource {
            id: SourceSelector::SystemAudio.to_string(),
            name: format!("System Audio ({})", name),
            source_type: SourceType::SystemAudio,
        });
    }

    let outputs = host
        .output_devices()
        .map_err(|e| SourceError::EnumerationError(e.to_string()))?;
    for name in outputs.filter_map(|d| d.name().ok()) {
        if default_output.as_deref() == Some(name.as_str()) {
            continue;
        }
        sources.push(AudioSource {
            id: SourceSelector::Output(name.clone()).to_string(),
            name: format!("Loopback: {}", name),
            source_type: SourceType::SystemAudio,
        });
    }

    match host.input_devices() {
        Ok(inputs) => {
            for name in inputs.filter_map(|d| d.name().ok()) {
                sources.push(AudioSource {
                    id: SourceSelector::Input(name.clone()).to_string(),
                    name: format!("Input: {}", name),
                    source_type: SourceType::InputDevice,
                });
            }
        }
        Err(e) => log::warn!("Failed to enumerate input devices: {}", e),
    }

    log::debug!("Found {} audio sources", sources.len());
    Ok(sources)
}
