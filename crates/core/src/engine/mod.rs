//! The boundary with the native synthesis engine.
//!
//! Facades never call the C ABI directly. They talk to an [`Engine`], which
//! exposes one method per native entry point. Entry points that only exist on
//! some engine builds return [`Result`] and report
//! [`FluidError::Unsupported`](crate::FluidError::Unsupported) when absent.
//! What a build offers is probed once, when the engine is loaded, and recorded
//! in [`Capabilities`].

use std::ffi::{c_uint, c_void, CStr};

use serde::{Deserialize, Serialize};

use crate::{handle::HandleKind, handle::RawHandle, Result, FLUID_FAILED, FLUID_OK};

#[cfg(test)]
pub(crate) mod fake;
pub mod native;
mod symbols;

/// C signature of a sequencer client callback:
/// `(time, event, sequencer, data)`.
pub type SequencerCallback =
    unsafe extern "C" fn(time: c_uint, event: *mut c_void, seq: *mut c_void, data: *mut c_void);

/// Version triple reported by `fluid_version`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EngineVersion {
    pub major: i32,
    pub minor: i32,
    pub micro: i32,
}

impl std::fmt::Display for EngineVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.micro)
    }
}

/// The two ABI generations the binding understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AbiGeneration {
    /// 1.x: combined reverb/chorus setters, channel-info struct, synth-level
    /// router accessor.
    Legacy,
    /// 2.x and later: per-parameter setters, router owned by the caller.
    Current,
}

impl AbiGeneration {
    /// Maps a settings accessor return onto `FLUID_OK`/`FLUID_FAILED`.
    /// 1.x accessors return TRUE on success and FALSE on failure.
    pub fn settings_code(self, code: i32) -> i32 {
        let ok = match self {
            AbiGeneration::Legacy => code != 0,
            AbiGeneration::Current => code == FLUID_OK,
        };
        if ok {
            FLUID_OK
        } else {
            FLUID_FAILED
        }
    }

    /// Event type tag of `FLUID_SEQ_UNREGISTERING`, which moved when 2.x
    /// inserted the key pressure event.
    pub fn unregistering_event(self) -> i32 {
        match self {
            AbiGeneration::Legacy => 21,
            AbiGeneration::Current => 22,
        }
    }
}

/// Optional entry points present in the loaded engine build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    pub version: EngineVersion,
    pub sequencer: bool,
    pub player: bool,
    pub player_seek: bool,
    pub player_ticks: bool,
    pub player_bpm: bool,
    pub file_renderer: bool,
    pub reverb_full: bool,
    pub chorus_full: bool,
    pub reverb_params: bool,
    pub chorus_params: bool,
    pub effect_getters: bool,
    pub channel_info_struct: bool,
    pub program_info: bool,
    pub preset_name: bool,
    pub synth_midi_router: bool,
    pub cmd_handler: bool,
    pub active_voice_count: bool,
    pub key_pressure: bool,
    pub tuning: bool,
    pub settings_str: bool,
}

impl Capabilities {
    pub fn generation(&self) -> AbiGeneration {
        if self.version.major < 2 {
            AbiGeneration::Legacy
        } else {
            AbiGeneration::Current
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReverbParam {
    RoomSize,
    Damp,
    Width,
    Level,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChorusParam {
    Nr,
    Level,
    Speed,
    Depth,
    Type,
}

/// Which range of a router rule a remap applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RuleField {
    Chan,
    Param1,
    Param2,
}

/// Per-channel program state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelInfo {
    pub sfont_id: i32,
    pub bank: i32,
    pub program: i32,
    /// Preset name, absent when the engine cannot resolve it.
    pub name: Option<String>,
}

/// Payload of a sequencer event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventPayload {
    Note {
        channel: i32,
        key: i16,
        velocity: i16,
        duration: u32,
    },
    NoteOn {
        channel: i32,
        key: i16,
        velocity: i16,
    },
    NoteOff {
        channel: i32,
        key: i16,
    },
    Timer,
    ControlChange {
        channel: i32,
        control: i16,
        value: i32,
    },
    ProgramChange {
        channel: i32,
        program: i32,
    },
    PitchBend {
        channel: i32,
        value: i32,
    },
}

/// Native entry points grouped by resource family.
///
/// Integer returns are the engine's raw codes (`0` success, `-1` failure)
/// unless documented otherwise.
pub trait Engine: Send + Sync {
    fn capabilities(&self) -> &Capabilities;

    /// Calls the destructor matching `kind`.
    fn release(&self, kind: HandleKind, handle: RawHandle);

    // settings
    fn new_settings(&self) -> Option<RawHandle>;
    /// Setters return `FLUID_OK`/`FLUID_FAILED` on every generation.
    fn settings_setstr(&self, settings: RawHandle, name: &CStr, value: &CStr) -> i32;
    fn settings_setint(&self, settings: RawHandle, name: &CStr, value: i32) -> i32;
    fn settings_setnum(&self, settings: RawHandle, name: &CStr, value: f64) -> i32;
    /// Raw type tag: `-1` undefined, `0` numeric, `1` integer, `2` string,
    /// `3` set.
    fn settings_get_type(&self, settings: RawHandle, name: &CStr) -> i32;
    fn settings_getint(&self, settings: RawHandle, name: &CStr) -> Option<i32>;
    fn settings_getnum(&self, settings: RawHandle, name: &CStr) -> Option<f64>;
    fn settings_getstr(&self, settings: RawHandle, name: &CStr) -> Result<Option<String>>;

    // synth
    fn new_synth(&self, settings: RawHandle) -> Option<RawHandle>;
    fn synth_sfload(&self, synth: RawHandle, path: &CStr, update_presets: bool) -> i32;
    fn synth_sfunload(&self, synth: RawHandle, sfid: i32, update_presets: bool) -> i32;
    fn synth_program_select(&self, synth: RawHandle, chan: i32, sfid: i32, bank: i32, preset: i32)
        -> i32;
    fn synth_program_change(&self, synth: RawHandle, chan: i32, program: i32) -> i32;
    fn synth_bank_select(&self, synth: RawHandle, chan: i32, bank: i32) -> i32;
    fn synth_sfont_select(&self, synth: RawHandle, chan: i32, sfid: i32) -> i32;
    fn synth_program_reset(&self, synth: RawHandle) -> i32;
    fn synth_system_reset(&self, synth: RawHandle) -> i32;
    fn synth_all_notes_off(&self, synth: RawHandle, chan: i32) -> i32;
    fn synth_all_sounds_off(&self, synth: RawHandle, chan: i32) -> i32;
    fn synth_noteon(&self, synth: RawHandle, chan: i32, key: i32, vel: i32) -> i32;
    fn synth_noteoff(&self, synth: RawHandle, chan: i32, key: i32) -> i32;
    fn synth_pitch_bend(&self, synth: RawHandle, chan: i32, value: i32) -> i32;
    fn synth_cc(&self, synth: RawHandle, chan: i32, ctrl: i32, value: i32) -> i32;
    fn synth_get_cc(&self, synth: RawHandle, chan: i32, num: i32) -> Option<i32>;
    fn synth_channel_pressure(&self, synth: RawHandle, chan: i32, value: i32) -> i32;
    fn synth_key_pressure(&self, synth: RawHandle, chan: i32, key: i32, value: i32)
        -> Result<i32>;
    fn synth_set_gain(&self, synth: RawHandle, gain: f32);
    fn synth_get_gain(&self, synth: RawHandle) -> f32;
    fn synth_active_voice_count(&self, synth: RawHandle) -> Result<i32>;
    /// Writes `frames` interleaved stereo frames into `out`, which holds at
    /// least `2 * frames` samples.
    fn synth_write_s16(&self, synth: RawHandle, frames: usize, out: &mut [i16]) -> i32;

    // effects
    fn synth_set_reverb_full(
        &self,
        synth: RawHandle,
        mask: i32,
        roomsize: f64,
        damping: f64,
        width: f64,
        level: f64,
    ) -> Result<i32>;
    fn synth_set_reverb_param(&self, synth: RawHandle, param: ReverbParam, value: f64)
        -> Result<i32>;
    fn synth_get_reverb_param(&self, synth: RawHandle, param: ReverbParam) -> Result<f64>;
    #[allow(clippy::too_many_arguments)]
    fn synth_set_chorus_full(
        &self,
        synth: RawHandle,
        mask: i32,
        nr: i32,
        level: f64,
        speed: f64,
        depth: f64,
        kind: i32,
    ) -> Result<i32>;
    fn synth_set_chorus_param(&self, synth: RawHandle, param: ChorusParam, value: f64)
        -> Result<i32>;
    fn synth_get_chorus_param(&self, synth: RawHandle, param: ChorusParam) -> Result<f64>;

    // program inspection
    /// Legacy struct-based query. `Ok(None)` when the engine reports failure.
    fn synth_channel_info(&self, synth: RawHandle, chan: i32) -> Result<Option<ChannelInfo>>;
    /// `(sfont_id, bank, program)` of a channel.
    fn synth_program_info(&self, synth: RawHandle, chan: i32) -> Result<Option<(i32, i32, i32)>>;
    fn synth_preset_name(&self, synth: RawHandle, sfid: i32, bank: i32, preset: i32)
        -> Result<Option<String>>;
    /// 128 key pitches in cents, `Ok(None)` when no such tuning exists.
    fn synth_tuning_dump(&self, synth: RawHandle, bank: i32, program: i32)
        -> Result<Option<Vec<f64>>>;

    // drivers, router, command handler
    fn new_audio_driver(&self, settings: RawHandle, synth: RawHandle) -> Option<RawHandle>;
    /// Router whose output is handed to the synth's MIDI event handler.
    fn new_midi_router(&self, settings: RawHandle, synth: RawHandle) -> Option<RawHandle>;
    /// MIDI driver whose input is handed to the router.
    fn new_midi_driver(&self, settings: RawHandle, router: RawHandle) -> Option<RawHandle>;
    fn new_cmd_handler(&self, synth: RawHandle, router: Option<RawHandle>)
        -> Result<Option<RawHandle>>;
    /// Legacy synth-level router registration.
    fn synth_set_midi_router(&self, synth: RawHandle, router: RawHandle) -> Result<()>;
    fn router_clear_rules(&self, router: RawHandle) -> i32;
    fn router_set_default_rules(&self, router: RawHandle) -> i32;
    fn router_add_rule(&self, router: RawHandle, rule: RawHandle, kind: i32) -> i32;
    fn new_router_rule(&self) -> Option<RawHandle>;
    fn router_rule_set(&self, rule: RawHandle, field: RuleField, min: i32, max: i32, mul: f32, add: i32);

    // sequencer
    fn new_sequencer(&self, use_system_timer: bool) -> Result<Option<RawHandle>>;
    fn sequencer_register_fluidsynth(&self, seq: RawHandle, synth: RawHandle) -> i16;
    /// Registers `callback` with `data` passed back verbatim. The engine keeps
    /// only the raw pointer.
    fn sequencer_register_client(
        &self,
        seq: RawHandle,
        name: &CStr,
        callback: SequencerCallback,
        data: *mut c_void,
    ) -> i16;
    fn sequencer_unregister_client(&self, seq: RawHandle, id: i16);
    fn sequencer_get_tick(&self, seq: RawHandle) -> u32;
    fn sequencer_set_time_scale(&self, seq: RawHandle, scale: f64);
    fn sequencer_get_time_scale(&self, seq: RawHandle) -> f64;
    fn sequencer_send_at(&self, seq: RawHandle, event: RawHandle, time: u32, absolute: bool) -> i32;
    fn sequencer_process(&self, seq: RawHandle, msec: u32);
    fn new_event(&self) -> Option<RawHandle>;
    fn event_set_source(&self, event: RawHandle, client: i16);
    fn event_set_dest(&self, event: RawHandle, client: i16);
    fn event_set_payload(&self, event: RawHandle, payload: EventPayload);
    /// Raw `fluid_seq_event_type` tag of a delivered event.
    fn event_get_type(&self, event: RawHandle) -> i32;

    // player
    fn new_player(&self, synth: RawHandle) -> Result<Option<RawHandle>>;
    fn player_add(&self, player: RawHandle, path: &CStr) -> i32;
    fn player_add_mem(&self, player: RawHandle, data: &[u8]) -> i32;
    fn player_play(&self, player: RawHandle) -> i32;
    fn player_stop(&self, player: RawHandle) -> i32;
    fn player_join(&self, player: RawHandle) -> i32;
    fn player_get_status(&self, player: RawHandle) -> i32;
    fn player_set_loop(&self, player: RawHandle, loops: i32) -> i32;
    fn player_seek(&self, player: RawHandle, tick: i32) -> Result<i32>;
    fn player_get_current_tick(&self, player: RawHandle) -> Result<i32>;
    fn player_get_total_ticks(&self, player: RawHandle) -> Result<i32>;
    fn player_set_bpm(&self, player: RawHandle, bpm: i32) -> Result<i32>;
    fn player_get_bpm(&self, player: RawHandle) -> Result<i32>;

    // file renderer
    fn new_file_renderer(&self, synth: RawHandle) -> Result<Option<RawHandle>>;
    fn file_renderer_process_block(&self, renderer: RawHandle) -> i32;
}
