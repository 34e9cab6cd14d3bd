//! Safe owning facades over the FluidSynth C library.
//!
//! The library is loaded at runtime (see [`engine::native`]) and every
//! native resource is wrapped in a facade that releases it exactly once, in
//! dependency order. [`Synth`] owns the settings, the synthesizer and any
//! attached drivers; [`Sequencer`] and [`Player`] borrow a `Synth`;
//! [`RouterRule`] stages MIDI remaps until a router takes it over.

pub mod audio;
pub mod config;
pub mod engine;
pub mod error;
pub mod handle;
pub mod player;
pub mod router;
pub mod sequencer;
pub mod settings;
pub mod synth;

use std::{ffi::CString, path::Path};

pub use audio::{raw_audio_bytes, samples_from_bytes, AudioDriver, FileType, MidiDriver};
pub use config::{AppConfig, RenderConfig, SequencerConfig, SynthConfig};
pub use engine::{AbiGeneration, Capabilities, ChannelInfo, Engine, EngineVersion};
pub use error::{FluidError, Result, FLUID_FAILED, FLUID_OK};
pub use player::{Player, PlayerStatus, RenderOptions, RenderProgress};
pub use router::{RouterRule, RuleRange, RuleType};
pub use sequencer::{ClientId, Route, Sequencer, Tick};
pub use settings::{SettingType, SettingValue, Settings};
pub use synth::{ChorusParams, ReverbParams, StartOptions, Synth};

pub(crate) fn c_path(path: &Path) -> Result<CString> {
    Ok(CString::new(path.to_string_lossy().as_bytes())?)
}
