//! [`Engine`] implementation backed by the shared FluidSynth library.
//!
//! The library is located once per process (see [`shared`]). Its exports are
//! resolved into function-pointer tables and summarized in a
//! [`Capabilities`] record at the same time, so no facade ever probes for a
//! symbol itself.

use std::{
    ffi::{c_char, c_int, c_void, CStr, OsStr, OsString},
    ptr,
    sync::{Arc, OnceLock},
};

use libloading::Library;

use super::{
    symbols::{
        ChannelInfoRaw, CoreApi, ExtraApi, LegacyCmdHandlerCtor, PlayerApi, RendererApi,
        SequencerApi,
    },
    AbiGeneration, Capabilities, ChannelInfo, ChorusParam, Engine, EngineVersion, EventPayload,
    ReverbParam, RuleField, SequencerCallback,
};
use crate::{
    handle::{HandleKind, RawHandle},
    FluidError, Result, FLUID_FAILED, FLUID_OK,
};

/// Environment variable holding an explicit library path. Checked before
/// the platform search list.
pub const LIBRARY_ENV: &str = "FLUIDSYNTH_LIBRARY";

const STRING_SETTING_CAPACITY: usize = 256;

#[cfg(target_os = "windows")]
const PLATFORM_CANDIDATES: &[&str] = &[
    "libfluidsynth-3.dll",
    "libfluidsynth-2.dll",
    "libfluidsynth.dll",
    "fluidsynth.dll",
    "libfluidsynth-1.dll",
];

#[cfg(target_os = "macos")]
const PLATFORM_CANDIDATES: &[&str] = &[
    "libfluidsynth.dylib",
    "libfluidsynth.3.dylib",
    "/opt/homebrew/lib/libfluidsynth.dylib",
    "/usr/local/lib/libfluidsynth.dylib",
];

#[cfg(not(any(target_os = "windows", target_os = "macos")))]
const PLATFORM_CANDIDATES: &[&str] = &[
    "libfluidsynth.so.3",
    "libfluidsynth.so.2",
    "libfluidsynth.so.1",
    "libfluidsynth.so",
];

static SHARED: OnceLock<Arc<NativeEngine>> = OnceLock::new();

/// Returns the process-wide engine, loading the library on first use.
///
/// A failed load is not cached; the next call searches again.
pub fn shared() -> Result<Arc<dyn Engine>> {
    if let Some(engine) = SHARED.get() {
        return Ok(engine.clone());
    }
    let loaded = Arc::new(NativeEngine::load()?);
    let engine = SHARED.get_or_init(|| loaded);
    Ok(engine.clone())
}

/// Library names tried in order: the explicit path, then the platform list.
pub fn search_order(explicit: Option<OsString>) -> Vec<OsString> {
    explicit
        .into_iter()
        .chain(PLATFORM_CANDIDATES.iter().map(OsString::from))
        .collect()
}

fn find_library() -> Result<(String, Library)> {
    let explicit = std::env::var_os(LIBRARY_ENV);
    if let Some(path) = &explicit {
        // An explicit path that fails to open is reported as such.
        let library = open_library(path)?;
        return Ok((path.to_string_lossy().into_owned(), library));
    }

    let candidates = search_order(None);
    for candidate in &candidates {
        match open_library(candidate) {
            Ok(library) => return Ok((candidate.to_string_lossy().into_owned(), library)),
            Err(err) => tracing::debug!(candidate = ?candidate, %err, "library candidate rejected"),
        }
    }

    Err(FluidError::LibraryNotFound {
        tried: candidates
            .iter()
            .map(|candidate| candidate.to_string_lossy())
            .collect::<Vec<_>>()
            .join(", "),
    })
}

fn open_library(path: &OsStr) -> Result<Library> {
    // SAFETY: loading runs the library's initializers; libfluidsynth has no
    // initialization side effects beyond its own globals.
    unsafe { Library::new(path) }.map_err(|source| FluidError::LibraryLoad {
        path: path.to_string_lossy().into_owned(),
        source,
    })
}

fn probe_family<T>(family: &'static str, loaded: std::result::Result<T, &'static str>) -> Option<T> {
    match loaded {
        Ok(api) => Some(api),
        Err(symbol) => {
            tracing::debug!(family, symbol, "optional family unavailable");
            None
        }
    }
}

fn optional<F>(entry: Option<F>, symbol: &'static str) -> Result<F> {
    entry.ok_or(FluidError::Unsupported(symbol))
}

fn fixed_str(raw: &[c_char]) -> String {
    let bytes: Vec<u8> = raw
        .iter()
        .take_while(|byte| **byte != 0)
        .map(|byte| *byte as u8)
        .collect();
    String::from_utf8_lossy(&bytes).into_owned()
}

/// FluidSynth loaded through `libloading`.
pub struct NativeEngine {
    core: CoreApi,
    extra: ExtraApi,
    sequencer: Option<SequencerApi>,
    player: Option<PlayerApi>,
    renderer: Option<RendererApi>,
    capabilities: Capabilities,
    path: String,
    // Keeps every function pointer above valid.
    _library: Library,
}

impl NativeEngine {
    /// Searches for the library and loads it.
    pub fn load() -> Result<Self> {
        let (path, library) = find_library()?;
        Self::from_library(path, library)
    }

    /// Loads the library at an explicit path, bypassing the search.
    pub fn open(path: impl AsRef<OsStr>) -> Result<Self> {
        let path = path.as_ref();
        let library = open_library(path)?;
        Self::from_library(path.to_string_lossy().into_owned(), library)
    }

    fn from_library(path: String, library: Library) -> Result<Self> {
        // SAFETY: the tables mirror the public FluidSynth headers.
        let core = unsafe { CoreApi::load(&library) }.map_err(FluidError::MissingSymbol)?;
        let extra = unsafe { ExtraApi::load(&library) };
        let sequencer = probe_family("sequencer", unsafe { SequencerApi::load(&library) });
        let player = probe_family("player", unsafe { PlayerApi::load(&library) });
        let renderer = probe_family("file renderer", unsafe { RendererApi::load(&library) });

        let (mut major, mut minor, mut micro): (c_int, c_int, c_int) = (0, 0, 0);
        unsafe { (core.fluid_version)(&mut major, &mut minor, &mut micro) };
        let version = EngineVersion {
            major,
            minor,
            micro,
        };

        let capabilities = probe_capabilities(
            version,
            &extra,
            sequencer.is_some(),
            player.is_some(),
            renderer.is_some(),
        );
        tracing::info!(%path, %version, "loaded FluidSynth");
        tracing::debug!(?capabilities, "probed engine capabilities");

        Ok(Self {
            core,
            extra,
            sequencer,
            player,
            renderer,
            capabilities,
            path,
            _library: library,
        })
    }

    /// Path or name the library was loaded from.
    pub fn path(&self) -> &str {
        &self.path
    }

    fn settings_ok(&self, code: c_int) -> bool {
        self.capabilities.generation().settings_code(code) == FLUID_OK
    }
}

fn probe_capabilities(
    version: EngineVersion,
    extra: &ExtraApi,
    sequencer: bool,
    player: bool,
    file_renderer: bool,
) -> Capabilities {
    Capabilities {
        version,
        sequencer,
        player,
        player_seek: player && extra.fluid_player_seek.is_some(),
        player_ticks: player
            && extra.fluid_player_get_current_tick.is_some()
            && extra.fluid_player_get_total_ticks.is_some(),
        player_bpm: player && extra.fluid_player_set_bpm.is_some() && extra.fluid_player_get_bpm.is_some(),
        file_renderer,
        reverb_full: extra.fluid_synth_set_reverb_full.is_some(),
        chorus_full: extra.fluid_synth_set_chorus_full.is_some(),
        reverb_params: extra.fluid_synth_set_reverb_roomsize.is_some()
            && extra.fluid_synth_set_reverb_damp.is_some()
            && extra.fluid_synth_set_reverb_width.is_some()
            && extra.fluid_synth_set_reverb_level.is_some(),
        chorus_params: extra.fluid_synth_set_chorus_nr.is_some()
            && extra.fluid_synth_set_chorus_level.is_some()
            && extra.fluid_synth_set_chorus_speed.is_some()
            && extra.fluid_synth_set_chorus_depth.is_some()
            && extra.fluid_synth_set_chorus_type.is_some(),
        effect_getters: extra.fluid_synth_get_reverb_roomsize.is_some()
            && extra.fluid_synth_get_chorus_nr.is_some()
            && (extra.fluid_synth_get_chorus_speed.is_some()
                || extra.fluid_synth_get_chorus_speed_Hz.is_some()),
        channel_info_struct: extra.fluid_synth_get_channel_info.is_some(),
        program_info: extra.fluid_synth_get_program.is_some(),
        preset_name: extra.fluid_synth_get_sfont_by_id.is_some()
            && extra.fluid_sfont_get_preset.is_some()
            && extra.fluid_preset_get_name.is_some(),
        synth_midi_router: extra.fluid_synth_set_midi_router.is_some(),
        cmd_handler: extra.new_fluid_cmd_handler.is_some() && extra.delete_fluid_cmd_handler.is_some(),
        active_voice_count: extra.fluid_synth_get_active_voice_count.is_some(),
        key_pressure: extra.fluid_synth_key_pressure.is_some(),
        tuning: extra.fluid_synth_tuning_dump.is_some(),
        settings_str: extra.fluid_settings_copystr.is_some() || extra.fluid_settings_getstr.is_some(),
    }
}

// SAFETY (applies to every `unsafe` block below): handles passed in were
// produced by this engine and are still owned by a live `OwnedHandle`, and
// the function pointers match the library's exported signatures.
impl Engine for NativeEngine {
    fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    fn release(&self, kind: HandleKind, handle: RawHandle) {
        let raw = handle.as_ptr();
        unsafe {
            match kind {
                HandleKind::Settings => (self.core.delete_fluid_settings)(raw),
                HandleKind::Synth => (self.core.delete_fluid_synth)(raw),
                HandleKind::AudioDriver => (self.core.delete_fluid_audio_driver)(raw),
                HandleKind::MidiDriver => (self.core.delete_fluid_midi_driver)(raw),
                HandleKind::Router => (self.core.delete_fluid_midi_router)(raw),
                HandleKind::RouterRule => (self.core.delete_fluid_midi_router_rule)(raw),
                HandleKind::CmdHandler => match self.extra.delete_fluid_cmd_handler {
                    Some(delete) => delete(raw),
                    None => tracing::warn!("no destructor for command handler, leaking it"),
                },
                HandleKind::Sequencer | HandleKind::Event => match &self.sequencer {
                    Some(api) if kind == HandleKind::Sequencer => (api.delete_fluid_sequencer)(raw),
                    Some(api) => (api.delete_fluid_event)(raw),
                    None => tracing::warn!(?kind, "sequencer family missing at release"),
                },
                HandleKind::Player => match &self.player {
                    Some(api) => (api.delete_fluid_player)(raw),
                    None => tracing::warn!("player family missing at release"),
                },
                HandleKind::FileRenderer => match &self.renderer {
                    Some(api) => (api.delete_fluid_file_renderer)(raw),
                    None => tracing::warn!("file renderer family missing at release"),
                },
            }
        }
    }

    fn new_settings(&self) -> Option<RawHandle> {
        RawHandle::from_ptr(unsafe { (self.core.new_fluid_settings)() })
    }

    fn settings_setstr(&self, settings: RawHandle, name: &CStr, value: &CStr) -> i32 {
        let code = unsafe { (self.core.fluid_settings_setstr)(settings.as_ptr(), name.as_ptr(), value.as_ptr()) };
        self.capabilities.generation().settings_code(code)
    }

    fn settings_setint(&self, settings: RawHandle, name: &CStr, value: i32) -> i32 {
        let code = unsafe { (self.core.fluid_settings_setint)(settings.as_ptr(), name.as_ptr(), value) };
        self.capabilities.generation().settings_code(code)
    }

    fn settings_setnum(&self, settings: RawHandle, name: &CStr, value: f64) -> i32 {
        let code = unsafe { (self.core.fluid_settings_setnum)(settings.as_ptr(), name.as_ptr(), value) };
        self.capabilities.generation().settings_code(code)
    }

    fn settings_get_type(&self, settings: RawHandle, name: &CStr) -> i32 {
        unsafe { (self.core.fluid_settings_get_type)(settings.as_ptr(), name.as_ptr()) }
    }

    fn settings_getint(&self, settings: RawHandle, name: &CStr) -> Option<i32> {
        let mut value: c_int = 0;
        let code = unsafe { (self.core.fluid_settings_getint)(settings.as_ptr(), name.as_ptr(), &mut value) };
        self.settings_ok(code).then_some(value)
    }

    fn settings_getnum(&self, settings: RawHandle, name: &CStr) -> Option<f64> {
        let mut value = 0.0;
        let code = unsafe { (self.core.fluid_settings_getnum)(settings.as_ptr(), name.as_ptr(), &mut value) };
        self.settings_ok(code).then_some(value)
    }

    fn settings_getstr(&self, settings: RawHandle, name: &CStr) -> Result<Option<String>> {
        if let Some(copystr) = self.extra.fluid_settings_copystr {
            let mut buf = vec![0 as c_char; STRING_SETTING_CAPACITY];
            let code = unsafe {
                copystr(
                    settings.as_ptr(),
                    name.as_ptr(),
                    buf.as_mut_ptr(),
                    STRING_SETTING_CAPACITY as c_int,
                )
            };
            return Ok(self.settings_ok(code).then(|| fixed_str(&buf)));
        }

        let getstr = optional(self.extra.fluid_settings_getstr, "fluid_settings_copystr")?;
        let mut value: *mut c_char = ptr::null_mut();
        let code = unsafe { getstr(settings.as_ptr(), name.as_ptr(), &mut value) };
        if !self.settings_ok(code) || value.is_null() {
            return Ok(None);
        }
        // The string stays owned by the settings object.
        Ok(Some(unsafe { CStr::from_ptr(value) }.to_string_lossy().into_owned()))
    }

    fn new_synth(&self, settings: RawHandle) -> Option<RawHandle> {
        RawHandle::from_ptr(unsafe { (self.core.new_fluid_synth)(settings.as_ptr()) })
    }

    fn synth_sfload(&self, synth: RawHandle, path: &CStr, update_presets: bool) -> i32 {
        unsafe { (self.core.fluid_synth_sfload)(synth.as_ptr(), path.as_ptr(), c_int::from(update_presets)) }
    }

    fn synth_sfunload(&self, synth: RawHandle, sfid: i32, update_presets: bool) -> i32 {
        unsafe { (self.core.fluid_synth_sfunload)(synth.as_ptr(), sfid, c_int::from(update_presets)) }
    }

    fn synth_program_select(&self, synth: RawHandle, chan: i32, sfid: i32, bank: i32, preset: i32) -> i32 {
        unsafe { (self.core.fluid_synth_program_select)(synth.as_ptr(), chan, sfid, bank, preset) }
    }

    fn synth_program_change(&self, synth: RawHandle, chan: i32, program: i32) -> i32 {
        unsafe { (self.core.fluid_synth_program_change)(synth.as_ptr(), chan, program) }
    }

    fn synth_bank_select(&self, synth: RawHandle, chan: i32, bank: i32) -> i32 {
        unsafe { (self.core.fluid_synth_bank_select)(synth.as_ptr(), chan, bank) }
    }

    fn synth_sfont_select(&self, synth: RawHandle, chan: i32, sfid: i32) -> i32 {
        unsafe { (self.core.fluid_synth_sfont_select)(synth.as_ptr(), chan, sfid) }
    }

    fn synth_program_reset(&self, synth: RawHandle) -> i32 {
        unsafe { (self.core.fluid_synth_program_reset)(synth.as_ptr()) }
    }

    fn synth_system_reset(&self, synth: RawHandle) -> i32 {
        unsafe { (self.core.fluid_synth_system_reset)(synth.as_ptr()) }
    }

    fn synth_all_notes_off(&self, synth: RawHandle, chan: i32) -> i32 {
        match self.extra.fluid_synth_all_notes_off {
            Some(all_notes_off) => unsafe { all_notes_off(synth.as_ptr(), chan) },
            // CC 123: all notes off.
            None => self.synth_cc(synth, chan, 123, 0),
        }
    }

    fn synth_all_sounds_off(&self, synth: RawHandle, chan: i32) -> i32 {
        match self.extra.fluid_synth_all_sounds_off {
            Some(all_sounds_off) => unsafe { all_sounds_off(synth.as_ptr(), chan) },
            // CC 120: all sound off.
            None => self.synth_cc(synth, chan, 120, 0),
        }
    }

    fn synth_noteon(&self, synth: RawHandle, chan: i32, key: i32, vel: i32) -> i32 {
        unsafe { (self.core.fluid_synth_noteon)(synth.as_ptr(), chan, key, vel) }
    }

    fn synth_noteoff(&self, synth: RawHandle, chan: i32, key: i32) -> i32 {
        unsafe { (self.core.fluid_synth_noteoff)(synth.as_ptr(), chan, key) }
    }

    fn synth_pitch_bend(&self, synth: RawHandle, chan: i32, value: i32) -> i32 {
        unsafe { (self.core.fluid_synth_pitch_bend)(synth.as_ptr(), chan, value) }
    }

    fn synth_cc(&self, synth: RawHandle, chan: i32, ctrl: i32, value: i32) -> i32 {
        unsafe { (self.core.fluid_synth_cc)(synth.as_ptr(), chan, ctrl, value) }
    }

    fn synth_get_cc(&self, synth: RawHandle, chan: i32, num: i32) -> Option<i32> {
        let mut value: c_int = 0;
        let code = unsafe { (self.core.fluid_synth_get_cc)(synth.as_ptr(), chan, num, &mut value) };
        (code == FLUID_OK).then_some(value)
    }

    fn synth_channel_pressure(&self, synth: RawHandle, chan: i32, value: i32) -> i32 {
        unsafe { (self.core.fluid_synth_channel_pressure)(synth.as_ptr(), chan, value) }
    }

    fn synth_key_pressure(&self, synth: RawHandle, chan: i32, key: i32, value: i32) -> Result<i32> {
        let key_pressure = optional(self.extra.fluid_synth_key_pressure, "fluid_synth_key_pressure")?;
        Ok(unsafe { key_pressure(synth.as_ptr(), chan, key, value) })
    }

    fn synth_set_gain(&self, synth: RawHandle, gain: f32) {
        unsafe { (self.core.fluid_synth_set_gain)(synth.as_ptr(), gain) }
    }

    fn synth_get_gain(&self, synth: RawHandle) -> f32 {
        unsafe { (self.core.fluid_synth_get_gain)(synth.as_ptr()) }
    }

    fn synth_active_voice_count(&self, synth: RawHandle) -> Result<i32> {
        let count = optional(
            self.extra.fluid_synth_get_active_voice_count,
            "fluid_synth_get_active_voice_count",
        )?;
        Ok(unsafe { count(synth.as_ptr()) })
    }

    fn synth_write_s16(&self, synth: RawHandle, frames: usize, out: &mut [i16]) -> i32 {
        let Ok(len) = c_int::try_from(frames) else {
            return FLUID_FAILED;
        };
        if out.len() < frames * 2 {
            return FLUID_FAILED;
        }
        let buf = out.as_mut_ptr().cast::<c_void>();
        // Left samples at even offsets, right samples at odd offsets.
        unsafe { (self.core.fluid_synth_write_s16)(synth.as_ptr(), len, buf, 0, 2, buf, 1, 2) }
    }

    fn synth_set_reverb_full(
        &self,
        synth: RawHandle,
        mask: i32,
        roomsize: f64,
        damping: f64,
        width: f64,
        level: f64,
    ) -> Result<i32> {
        let set = optional(self.extra.fluid_synth_set_reverb_full, "fluid_synth_set_reverb_full")?;
        Ok(unsafe { set(synth.as_ptr(), mask, roomsize, damping, width, level) })
    }

    fn synth_set_reverb_param(&self, synth: RawHandle, param: ReverbParam, value: f64) -> Result<i32> {
        let set = match param {
            ReverbParam::RoomSize => optional(self.extra.fluid_synth_set_reverb_roomsize, "fluid_synth_set_reverb_roomsize"),
            ReverbParam::Damp => optional(self.extra.fluid_synth_set_reverb_damp, "fluid_synth_set_reverb_damp"),
            ReverbParam::Width => optional(self.extra.fluid_synth_set_reverb_width, "fluid_synth_set_reverb_width"),
            ReverbParam::Level => optional(self.extra.fluid_synth_set_reverb_level, "fluid_synth_set_reverb_level"),
        }?;
        Ok(unsafe { set(synth.as_ptr(), value) })
    }

    fn synth_get_reverb_param(&self, synth: RawHandle, param: ReverbParam) -> Result<f64> {
        let get = match param {
            ReverbParam::RoomSize => optional(self.extra.fluid_synth_get_reverb_roomsize, "fluid_synth_get_reverb_roomsize"),
            ReverbParam::Damp => optional(self.extra.fluid_synth_get_reverb_damp, "fluid_synth_get_reverb_damp"),
            ReverbParam::Width => optional(self.extra.fluid_synth_get_reverb_width, "fluid_synth_get_reverb_width"),
            ReverbParam::Level => optional(self.extra.fluid_synth_get_reverb_level, "fluid_synth_get_reverb_level"),
        }?;
        Ok(unsafe { get(synth.as_ptr()) })
    }

    fn synth_set_chorus_full(
        &self,
        synth: RawHandle,
        mask: i32,
        nr: i32,
        level: f64,
        speed: f64,
        depth: f64,
        kind: i32,
    ) -> Result<i32> {
        let set = optional(self.extra.fluid_synth_set_chorus_full, "fluid_synth_set_chorus_full")?;
        Ok(unsafe { set(synth.as_ptr(), mask, nr, level, speed, depth, kind) })
    }

    fn synth_set_chorus_param(&self, synth: RawHandle, param: ChorusParam, value: f64) -> Result<i32> {
        let raw = synth.as_ptr();
        let code = match param {
            ChorusParam::Nr => {
                let set = optional(self.extra.fluid_synth_set_chorus_nr, "fluid_synth_set_chorus_nr")?;
                unsafe { set(raw, value as c_int) }
            }
            ChorusParam::Type => {
                let set = optional(self.extra.fluid_synth_set_chorus_type, "fluid_synth_set_chorus_type")?;
                unsafe { set(raw, value as c_int) }
            }
            ChorusParam::Level => {
                let set = optional(self.extra.fluid_synth_set_chorus_level, "fluid_synth_set_chorus_level")?;
                unsafe { set(raw, value) }
            }
            ChorusParam::Speed => {
                let set = optional(self.extra.fluid_synth_set_chorus_speed, "fluid_synth_set_chorus_speed")?;
                unsafe { set(raw, value) }
            }
            ChorusParam::Depth => {
                let set = optional(self.extra.fluid_synth_set_chorus_depth, "fluid_synth_set_chorus_depth")?;
                unsafe { set(raw, value) }
            }
        };
        Ok(code)
    }

    fn synth_get_chorus_param(&self, synth: RawHandle, param: ChorusParam) -> Result<f64> {
        let raw = synth.as_ptr();
        let value = match param {
            ChorusParam::Nr => {
                let get = optional(self.extra.fluid_synth_get_chorus_nr, "fluid_synth_get_chorus_nr")?;
                f64::from(unsafe { get(raw) })
            }
            ChorusParam::Type => {
                let get = optional(self.extra.fluid_synth_get_chorus_type, "fluid_synth_get_chorus_type")?;
                f64::from(unsafe { get(raw) })
            }
            ChorusParam::Level => {
                let get = optional(self.extra.fluid_synth_get_chorus_level, "fluid_synth_get_chorus_level")?;
                unsafe { get(raw) }
            }
            ChorusParam::Speed => {
                let get = optional(
                    self.extra
                        .fluid_synth_get_chorus_speed
                        .or(self.extra.fluid_synth_get_chorus_speed_Hz),
                    "fluid_synth_get_chorus_speed",
                )?;
                unsafe { get(raw) }
            }
            ChorusParam::Depth => {
                let get = optional(
                    self.extra
                        .fluid_synth_get_chorus_depth
                        .or(self.extra.fluid_synth_get_chorus_depth_ms),
                    "fluid_synth_get_chorus_depth",
                )?;
                unsafe { get(raw) }
            }
        };
        Ok(value)
    }

    fn synth_channel_info(&self, synth: RawHandle, chan: i32) -> Result<Option<ChannelInfo>> {
        let get = optional(self.extra.fluid_synth_get_channel_info, "fluid_synth_get_channel_info")?;
        let mut info = ChannelInfoRaw {
            assigned: 0,
            sfont_id: 0,
            bank: 0,
            program: 0,
            name: [0; 32],
            reserved: [0; 32],
        };
        let code = unsafe { get(synth.as_ptr(), chan, &mut info) };
        if code != FLUID_OK {
            return Ok(None);
        }
        Ok(Some(ChannelInfo {
            sfont_id: info.sfont_id,
            bank: info.bank,
            program: info.program,
            name: Some(fixed_str(&info.name)),
        }))
    }

    fn synth_program_info(&self, synth: RawHandle, chan: i32) -> Result<Option<(i32, i32, i32)>> {
        let get = optional(self.extra.fluid_synth_get_program, "fluid_synth_get_program")?;
        let (mut sfid, mut bank, mut preset): (c_int, c_int, c_int) = (0, 0, 0);
        let code = unsafe { get(synth.as_ptr(), chan, &mut sfid, &mut bank, &mut preset) };
        Ok((code == FLUID_OK).then_some((sfid, bank, preset)))
    }

    fn synth_preset_name(&self, synth: RawHandle, sfid: i32, bank: i32, preset: i32) -> Result<Option<String>> {
        let sfont_by_id = optional(self.extra.fluid_synth_get_sfont_by_id, "fluid_synth_get_sfont_by_id")?;
        let sfont_preset = optional(self.extra.fluid_sfont_get_preset, "fluid_sfont_get_preset")?;
        let preset_name = optional(self.extra.fluid_preset_get_name, "fluid_preset_get_name")?;

        let sfont = unsafe { sfont_by_id(synth.as_ptr(), sfid) };
        if sfont.is_null() {
            return Ok(None);
        }
        let found = unsafe { sfont_preset(sfont, bank, preset) };
        if found.is_null() {
            return Ok(None);
        }
        let name = unsafe { preset_name(found) };
        if name.is_null() {
            return Ok(None);
        }
        Ok(Some(unsafe { CStr::from_ptr(name) }.to_string_lossy().into_owned()))
    }

    fn synth_tuning_dump(&self, synth: RawHandle, bank: i32, program: i32) -> Result<Option<Vec<f64>>> {
        let dump = optional(self.extra.fluid_synth_tuning_dump, "fluid_synth_tuning_dump")?;
        let mut pitch = [0.0; 128];
        let code = unsafe { dump(synth.as_ptr(), bank, program, ptr::null_mut(), 0, pitch.as_mut_ptr()) };
        Ok((code == FLUID_OK).then(|| pitch.to_vec()))
    }

    fn new_audio_driver(&self, settings: RawHandle, synth: RawHandle) -> Option<RawHandle> {
        RawHandle::from_ptr(unsafe { (self.core.new_fluid_audio_driver)(settings.as_ptr(), synth.as_ptr()) })
    }

    fn new_midi_router(&self, settings: RawHandle, synth: RawHandle) -> Option<RawHandle> {
        RawHandle::from_ptr(unsafe {
            (self.core.new_fluid_midi_router)(
                settings.as_ptr(),
                self.core.fluid_synth_handle_midi_event,
                synth.as_ptr(),
            )
        })
    }

    fn new_midi_driver(&self, settings: RawHandle, router: RawHandle) -> Option<RawHandle> {
        RawHandle::from_ptr(unsafe {
            (self.core.new_fluid_midi_driver)(
                settings.as_ptr(),
                self.core.fluid_midi_router_handle_midi_event,
                router.as_ptr(),
            )
        })
    }

    fn new_cmd_handler(&self, synth: RawHandle, router: Option<RawHandle>) -> Result<Option<RawHandle>> {
        let ctor = optional(self.extra.new_fluid_cmd_handler, "new_fluid_cmd_handler")?;
        let handler = match self.capabilities.generation() {
            AbiGeneration::Legacy => {
                // SAFETY: 1.x exports the single-argument form under this name.
                let legacy: LegacyCmdHandlerCtor = unsafe { std::mem::transmute(ctor) };
                unsafe { legacy(synth.as_ptr()) }
            }
            AbiGeneration::Current => {
                let router = router.map_or(ptr::null_mut(), RawHandle::as_ptr);
                unsafe { ctor(synth.as_ptr(), router) }
            }
        };
        Ok(RawHandle::from_ptr(handler))
    }

    fn synth_set_midi_router(&self, synth: RawHandle, router: RawHandle) -> Result<()> {
        let set = optional(self.extra.fluid_synth_set_midi_router, "fluid_synth_set_midi_router")?;
        unsafe { set(synth.as_ptr(), router.as_ptr()) };
        Ok(())
    }

    fn router_clear_rules(&self, router: RawHandle) -> i32 {
        unsafe { (self.core.fluid_midi_router_clear_rules)(router.as_ptr()) }
    }

    fn router_set_default_rules(&self, router: RawHandle) -> i32 {
        unsafe { (self.core.fluid_midi_router_set_default_rules)(router.as_ptr()) }
    }

    fn router_add_rule(&self, router: RawHandle, rule: RawHandle, kind: i32) -> i32 {
        unsafe { (self.core.fluid_midi_router_add_rule)(router.as_ptr(), rule.as_ptr(), kind) }
    }

    fn new_router_rule(&self) -> Option<RawHandle> {
        RawHandle::from_ptr(unsafe { (self.core.new_fluid_midi_router_rule)() })
    }

    fn router_rule_set(&self, rule: RawHandle, field: RuleField, min: i32, max: i32, mul: f32, add: i32) {
        let set = match field {
            RuleField::Chan => self.core.fluid_midi_router_rule_set_chan,
            RuleField::Param1 => self.core.fluid_midi_router_rule_set_param1,
            RuleField::Param2 => self.core.fluid_midi_router_rule_set_param2,
        };
        unsafe { set(rule.as_ptr(), min, max, mul, add) }
    }

    fn new_sequencer(&self, use_system_timer: bool) -> Result<Option<RawHandle>> {
        let api = self.sequencer.as_ref().ok_or(FluidError::Unsupported("new_fluid_sequencer2"))?;
        Ok(RawHandle::from_ptr(unsafe { (api.new_fluid_sequencer2)(c_int::from(use_system_timer)) }))
    }

    fn sequencer_register_fluidsynth(&self, seq: RawHandle, synth: RawHandle) -> i16 {
        match &self.sequencer {
            Some(api) => unsafe { (api.fluid_sequencer_register_fluidsynth)(seq.as_ptr(), synth.as_ptr()) },
            None => FLUID_FAILED as i16,
        }
    }

    fn sequencer_register_client(
        &self,
        seq: RawHandle,
        name: &CStr,
        callback: SequencerCallback,
        data: *mut c_void,
    ) -> i16 {
        match &self.sequencer {
            Some(api) => unsafe {
                (api.fluid_sequencer_register_client)(seq.as_ptr(), name.as_ptr(), callback, data)
            },
            None => FLUID_FAILED as i16,
        }
    }

    fn sequencer_unregister_client(&self, seq: RawHandle, id: i16) {
        if let Some(api) = &self.sequencer {
            unsafe { (api.fluid_sequencer_unregister_client)(seq.as_ptr(), id) }
        }
    }

    fn sequencer_get_tick(&self, seq: RawHandle) -> u32 {
        self.sequencer
            .as_ref()
            .map_or(0, |api| unsafe { (api.fluid_sequencer_get_tick)(seq.as_ptr()) })
    }

    fn sequencer_set_time_scale(&self, seq: RawHandle, scale: f64) {
        if let Some(api) = &self.sequencer {
            unsafe { (api.fluid_sequencer_set_time_scale)(seq.as_ptr(), scale) }
        }
    }

    fn sequencer_get_time_scale(&self, seq: RawHandle) -> f64 {
        self.sequencer
            .as_ref()
            .map_or(0.0, |api| unsafe { (api.fluid_sequencer_get_time_scale)(seq.as_ptr()) })
    }

    fn sequencer_send_at(&self, seq: RawHandle, event: RawHandle, time: u32, absolute: bool) -> i32 {
        match &self.sequencer {
            Some(api) => unsafe {
                (api.fluid_sequencer_send_at)(seq.as_ptr(), event.as_ptr(), time, c_int::from(absolute))
            },
            None => FLUID_FAILED,
        }
    }

    fn sequencer_process(&self, seq: RawHandle, msec: u32) {
        if let Some(api) = &self.sequencer {
            unsafe { (api.fluid_sequencer_process)(seq.as_ptr(), msec) }
        }
    }

    fn new_event(&self) -> Option<RawHandle> {
        let api = self.sequencer.as_ref()?;
        RawHandle::from_ptr(unsafe { (api.new_fluid_event)() })
    }

    fn event_set_source(&self, event: RawHandle, client: i16) {
        if let Some(api) = &self.sequencer {
            unsafe { (api.fluid_event_set_source)(event.as_ptr(), client) }
        }
    }

    fn event_set_dest(&self, event: RawHandle, client: i16) {
        if let Some(api) = &self.sequencer {
            unsafe { (api.fluid_event_set_dest)(event.as_ptr(), client) }
        }
    }

    fn event_get_type(&self, event: RawHandle) -> i32 {
        self.sequencer
            .as_ref()
            .map_or(FLUID_FAILED, |api| unsafe { (api.fluid_event_get_type)(event.as_ptr()) })
    }

    fn event_set_payload(&self, event: RawHandle, payload: EventPayload) {
        let Some(api) = &self.sequencer else {
            return;
        };
        let evt = event.as_ptr();
        unsafe {
            match payload {
                EventPayload::Note {
                    channel,
                    key,
                    velocity,
                    duration,
                } => (api.fluid_event_note)(evt, channel, key, velocity, duration),
                EventPayload::NoteOn {
                    channel,
                    key,
                    velocity,
                } => (api.fluid_event_noteon)(evt, channel, key, velocity),
                EventPayload::NoteOff { channel, key } => (api.fluid_event_noteoff)(evt, channel, key),
                EventPayload::Timer => (api.fluid_event_timer)(evt, ptr::null_mut()),
                EventPayload::ControlChange {
                    channel,
                    control,
                    value,
                } => (api.fluid_event_control_change)(evt, channel, control, value),
                EventPayload::ProgramChange { channel, program } => {
                    (api.fluid_event_program_change)(evt, channel, program)
                }
                EventPayload::PitchBend { channel, value } => (api.fluid_event_pitch_bend)(evt, channel, value),
            }
        }
    }

    fn new_player(&self, synth: RawHandle) -> Result<Option<RawHandle>> {
        let api = self.player.as_ref().ok_or(FluidError::Unsupported("new_fluid_player"))?;
        Ok(RawHandle::from_ptr(unsafe { (api.new_fluid_player)(synth.as_ptr()) }))
    }

    fn player_add(&self, player: RawHandle, path: &CStr) -> i32 {
        self.player
            .as_ref()
            .map_or(FLUID_FAILED, |api| unsafe { (api.fluid_player_add)(player.as_ptr(), path.as_ptr()) })
    }

    fn player_add_mem(&self, player: RawHandle, data: &[u8]) -> i32 {
        self.player.as_ref().map_or(FLUID_FAILED, |api| unsafe {
            (api.fluid_player_add_mem)(player.as_ptr(), data.as_ptr().cast::<c_void>(), data.len())
        })
    }

    fn player_play(&self, player: RawHandle) -> i32 {
        self.player
            .as_ref()
            .map_or(FLUID_FAILED, |api| unsafe { (api.fluid_player_play)(player.as_ptr()) })
    }

    fn player_stop(&self, player: RawHandle) -> i32 {
        self.player
            .as_ref()
            .map_or(FLUID_FAILED, |api| unsafe { (api.fluid_player_stop)(player.as_ptr()) })
    }

    fn player_join(&self, player: RawHandle) -> i32 {
        self.player
            .as_ref()
            .map_or(FLUID_FAILED, |api| unsafe { (api.fluid_player_join)(player.as_ptr()) })
    }

    fn player_get_status(&self, player: RawHandle) -> i32 {
        self.player
            .as_ref()
            .map_or(FLUID_FAILED, |api| unsafe { (api.fluid_player_get_status)(player.as_ptr()) })
    }

    fn player_set_loop(&self, player: RawHandle, loops: i32) -> i32 {
        self.player
            .as_ref()
            .map_or(FLUID_FAILED, |api| unsafe { (api.fluid_player_set_loop)(player.as_ptr(), loops) })
    }

    fn player_seek(&self, player: RawHandle, tick: i32) -> Result<i32> {
        let seek = optional(self.extra.fluid_player_seek, "fluid_player_seek")?;
        Ok(unsafe { seek(player.as_ptr(), tick) })
    }

    fn player_get_current_tick(&self, player: RawHandle) -> Result<i32> {
        let get = optional(self.extra.fluid_player_get_current_tick, "fluid_player_get_current_tick")?;
        Ok(unsafe { get(player.as_ptr()) })
    }

    fn player_get_total_ticks(&self, player: RawHandle) -> Result<i32> {
        let get = optional(self.extra.fluid_player_get_total_ticks, "fluid_player_get_total_ticks")?;
        Ok(unsafe { get(player.as_ptr()) })
    }

    fn player_set_bpm(&self, player: RawHandle, bpm: i32) -> Result<i32> {
        let set = optional(self.extra.fluid_player_set_bpm, "fluid_player_set_bpm")?;
        Ok(unsafe { set(player.as_ptr(), bpm) })
    }

    fn player_get_bpm(&self, player: RawHandle) -> Result<i32> {
        let get = optional(self.extra.fluid_player_get_bpm, "fluid_player_get_bpm")?;
        Ok(unsafe { get(player.as_ptr()) })
    }

    fn new_file_renderer(&self, synth: RawHandle) -> Result<Option<RawHandle>> {
        let api = self
            .renderer
            .as_ref()
            .ok_or(FluidError::Unsupported("new_fluid_file_renderer"))?;
        Ok(RawHandle::from_ptr(unsafe { (api.new_fluid_file_renderer)(synth.as_ptr()) }))
    }

    fn file_renderer_process_block(&self, renderer: RawHandle) -> i32 {
        self.renderer.as_ref().map_or(FLUID_FAILED, |api| unsafe {
            (api.fluid_file_renderer_process_block)(renderer.as_ptr())
        })
    }
}

impl std::fmt::Debug for NativeEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeEngine")
            .field("path", &self.path)
            .field("capabilities", &self.capabilities)
            .finish()
    }
}
