use std::{collections::BTreeMap, fs, path::Path};

use serde::{Deserialize, Serialize};

use crate::{FileType, Result, SettingValue};

/// Top-level configuration structure for the application.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub synth: SynthConfig,
    pub sequencer: SequencerConfig,
    pub render: RenderConfig,
}

impl AppConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }
}

/// Settings applied when a synth is constructed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SynthConfig {
    pub gain: f64,
    pub sample_rate: f64,
    pub midi_channels: i32,
    /// Extra engine settings, written after the three above.
    pub settings: BTreeMap<String, SettingValue>,
}

impl Default for SynthConfig {
    fn default() -> Self {
        Self {
            gain: 0.2,
            sample_rate: 44_100.0,
            midi_channels: 256,
            settings: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SequencerConfig {
    /// Ticks per second.
    pub time_scale: f64,
    pub use_system_timer: bool,
}

impl Default for SequencerConfig {
    fn default() -> Self {
        Self {
            time_scale: 1000.0,
            use_system_timer: true,
        }
    }
}

/// Defaults for offline rendering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    pub file_type: FileType,
    pub quality: f64,
    pub period_size: Option<i32>,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            file_type: FileType::Auto,
            quality: 0.5,
            period_size: None,
        }
    }
}
