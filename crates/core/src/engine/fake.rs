//! Recording [`Engine`] used by the unit tests.
//!
//! Hands out synthetic handles, logs every entry point by its native symbol
//! name and keeps just enough state (settings, voices, rules, events, player
//! transport) for the facades' contracts to be observable.

use std::{
    collections::{BTreeMap, HashMap, HashSet},
    ffi::{c_void, CStr},
    ptr,
    sync::{Arc, Mutex, MutexGuard},
};

use super::{
    Capabilities, ChannelInfo, ChorusParam, Engine, EngineVersion, EventPayload, ReverbParam,
    RuleField, SequencerCallback,
};
use crate::{
    handle::{HandleKind, RawHandle},
    FluidError, Result, FLUID_FAILED, FLUID_OK,
};

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum FakeSetting {
    Num(f64),
    Int(i32),
    Str(String),
    Set,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct RuleRange {
    pub min: i32,
    pub max: i32,
    pub mul: f32,
    pub add: i32,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct FakeRule {
    pub chan: Option<RuleRange>,
    pub param1: Option<RuleRange>,
    pub param2: Option<RuleRange>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct FakeEvent {
    pub source: i16,
    pub dest: i16,
    pub payload: Option<EventPayload>,
    /// Set on the notice delivered to a client being unregistered.
    pub unregistering: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct SentEvent {
    pub event: FakeEvent,
    pub time: u32,
    pub absolute: bool,
}

struct Client {
    id: i16,
    callback: SequencerCallback,
    data: usize,
}

struct State {
    calls: Vec<&'static str>,
    failing: HashSet<&'static str>,
    next_handle: usize,
    live: HashMap<RawHandle, HandleKind>,
    stale_releases: usize,
    settings: BTreeMap<String, FakeSetting>,
    gain: f32,
    voices: i32,
    next_sfid: i32,
    programs: HashMap<i32, (i32, i32, i32)>,
    controllers: HashMap<(i32, i32), i32>,
    pitch_bends: HashMap<i32, i32>,
    reverb: [f64; 4],
    chorus: [f64; 5],
    last_mask: Option<i32>,
    rules: HashMap<RawHandle, FakeRule>,
    committed: Vec<(i32, FakeRule)>,
    next_client: i16,
    clients: Vec<Client>,
    events: HashMap<RawHandle, FakeEvent>,
    sent: Vec<SentEvent>,
    tick: u32,
    time_scale: f64,
    playlist: Vec<String>,
    player_status: i32,
    player_tick: i32,
    bpm: i32,
    render_blocks: u32,
    remaining_blocks: u32,
    processed_blocks: u32,
    fail_block_at: Option<u32>,
}

fn default_settings() -> BTreeMap<String, FakeSetting> {
    let mut settings = BTreeMap::new();
    let mut put = |name: &str, value: FakeSetting| {
        settings.insert(name.to_string(), value);
    };
    put("audio", FakeSetting::Set);
    put("audio.driver", FakeSetting::Str("alsa".into()));
    put("audio.alsa.device", FakeSetting::Str("default".into()));
    put("audio.pulseaudio.device", FakeSetting::Str("default".into()));
    put("audio.file.name", FakeSetting::Str("fluidsynth.wav".into()));
    put("audio.file.type", FakeSetting::Str("auto".into()));
    put("audio.file.quality", FakeSetting::Num(0.5));
    put("audio.period-size", FakeSetting::Int(64));
    put("midi.driver", FakeSetting::Str("alsa_seq".into()));
    put("player.timing-source", FakeSetting::Str("system".into()));
    put("synth.gain", FakeSetting::Num(0.2));
    put("synth.sample-rate", FakeSetting::Num(44100.0));
    put("synth.midi-channels", FakeSetting::Int(16));
    put("synth.lock-memory", FakeSetting::Int(1));
    put("synth.reverb.active", FakeSetting::Int(1));
    put("synth.polyphony", FakeSetting::Int(256));
    settings
}

/// `Capabilities` of a current-generation build with every optional entry
/// point available.
pub(crate) fn current_capabilities() -> Capabilities {
    Capabilities {
        version: EngineVersion {
            major: 2,
            minor: 3,
            micro: 4,
        },
        sequencer: true,
        player: true,
        player_seek: true,
        player_ticks: true,
        player_bpm: true,
        file_renderer: true,
        reverb_full: false,
        chorus_full: false,
        reverb_params: true,
        chorus_params: true,
        effect_getters: true,
        channel_info_struct: false,
        program_info: true,
        preset_name: true,
        synth_midi_router: false,
        cmd_handler: true,
        active_voice_count: true,
        key_pressure: true,
        tuning: true,
        settings_str: true,
    }
}

/// `Capabilities` of a 1.x build.
pub(crate) fn legacy_capabilities() -> Capabilities {
    Capabilities {
        version: EngineVersion {
            major: 1,
            minor: 1,
            micro: 11,
        },
        sequencer: true,
        player: true,
        player_seek: false,
        player_ticks: false,
        player_bpm: false,
        file_renderer: true,
        reverb_full: true,
        chorus_full: true,
        reverb_params: false,
        chorus_params: false,
        effect_getters: true,
        channel_info_struct: true,
        program_info: false,
        preset_name: false,
        synth_midi_router: true,
        cmd_handler: true,
        active_voice_count: true,
        key_pressure: false,
        tuning: true,
        settings_str: true,
    }
}

pub(crate) struct FakeEngine {
    capabilities: Capabilities,
    state: Mutex<State>,
}

impl FakeEngine {
    pub fn new() -> Arc<Self> {
        Self::with_capabilities(current_capabilities())
    }

    pub fn legacy() -> Arc<Self> {
        Self::with_capabilities(legacy_capabilities())
    }

    pub fn with_capabilities(capabilities: Capabilities) -> Arc<Self> {
        Arc::new(Self {
            capabilities,
            state: Mutex::new(State {
                calls: Vec::new(),
                failing: HashSet::new(),
                next_handle: 0x1000,
                live: HashMap::new(),
                stale_releases: 0,
                settings: default_settings(),
                gain: 0.2,
                voices: 0,
                next_sfid: 0,
                programs: HashMap::new(),
                controllers: HashMap::new(),
                pitch_bends: HashMap::new(),
                reverb: [0.2, 0.0, 0.5, 0.9],
                chorus: [3.0, 2.0, 0.3, 8.0, 0.0],
                last_mask: None,
                rules: HashMap::new(),
                committed: Vec::new(),
                next_client: 0,
                clients: Vec::new(),
                events: HashMap::new(),
                sent: Vec::new(),
                tick: 0,
                time_scale: 1000.0,
                playlist: Vec::new(),
                player_status: 0,
                player_tick: 0,
                bpm: 120,
                render_blocks: 4,
                remaining_blocks: 0,
                processed_blocks: 0,
                fail_block_at: None,
            }),
        })
    }

    pub fn engine(self: &Arc<Self>) -> Arc<dyn Engine> {
        self.clone()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn call(&self, symbol: &'static str) -> MutexGuard<'_, State> {
        let mut state = self.state();
        state.calls.push(symbol);
        state
    }

    /// Every logged call, in order.
    pub fn calls(&self) -> Vec<&'static str> {
        self.state().calls.clone()
    }

    pub fn count(&self, symbol: &str) -> usize {
        self.state().calls.iter().filter(|call| **call == symbol).count()
    }

    /// Destructor calls, in order.
    pub fn releases(&self) -> Vec<&'static str> {
        self.calls()
            .into_iter()
            .filter(|call| call.starts_with("delete_"))
            .collect()
    }

    pub fn clear_calls(&self) {
        self.state().calls.clear();
    }

    /// Makes `symbol` report failure (null handle or `-1`) from now on.
    pub fn fail(&self, symbol: &'static str) {
        self.state().failing.insert(symbol);
    }

    pub fn live_handles(&self) -> usize {
        self.state().live.len()
    }

    pub fn stale_releases(&self) -> usize {
        self.state().stale_releases
    }

    pub fn setting(&self, name: &str) -> Option<FakeSetting> {
        self.state().settings.get(name).cloned()
    }

    /// Last pitch bend written to `chan`.
    pub fn pitch_bend(&self, chan: i32) -> Option<i32> {
        self.state().pitch_bends.get(&chan).copied()
    }

    pub fn last_effect_mask(&self) -> Option<i32> {
        self.state().last_mask
    }

    pub fn committed_rules(&self) -> Vec<(i32, FakeRule)> {
        self.state().committed.clone()
    }

    pub fn sent_events(&self) -> Vec<SentEvent> {
        self.state().sent.clone()
    }

    pub fn registered_clients(&self) -> usize {
        self.state().clients.len()
    }

    pub fn playlist(&self) -> Vec<String> {
        self.state().playlist.clone()
    }

    /// Number of blocks a render lasts before the transport reports done.
    pub fn set_render_blocks(&self, blocks: u32) {
        self.state().render_blocks = blocks;
    }

    /// Makes the `index`-th block (zero based) of a render fail.
    pub fn fail_block_at(&self, index: u32) {
        self.state().fail_block_at = Some(index);
    }

    /// Delivers a timer tick to every registered client, the way the
    /// engine's scheduler thread would.
    pub fn fire_clients(&self, time: u32) {
        let clients: Vec<_> = self.state().clients.iter().map(Client::target).collect();
        self.deliver(clients, time, false);
    }

    /// Calls each client with a transient event, without holding the state
    /// lock so callbacks may call back into the engine.
    fn deliver(&self, clients: Vec<(SequencerCallback, usize)>, time: u32, unregistering: bool) {
        for (callback, data) in clients {
            let event = {
                let mut state = self.state();
                let Some(event) = state.alloc(HandleKind::Event) else {
                    continue;
                };
                let staged = FakeEvent {
                    unregistering,
                    ..FakeEvent::default()
                };
                state.events.insert(event, staged);
                event
            };
            unsafe { callback(time, event.as_ptr(), ptr::null_mut(), data as *mut c_void) };
            let mut state = self.state();
            state.live.remove(&event);
            state.events.remove(&event);
        }
    }

    fn done_status(&self) -> i32 {
        match self.capabilities.generation() {
            super::AbiGeneration::Legacy => 2,
            super::AbiGeneration::Current => 3,
        }
    }

    /// Produces the generation's native setter return, normalized the way
    /// the native engine does it.
    fn setter_code(&self, accepted: bool) -> i32 {
        let generation = self.capabilities.generation();
        let raw = match (generation, accepted) {
            (super::AbiGeneration::Legacy, accepted) => i32::from(accepted),
            (super::AbiGeneration::Current, true) => FLUID_OK,
            (super::AbiGeneration::Current, false) => FLUID_FAILED,
        };
        generation.settings_code(raw)
    }

    fn unsupported_unless(&self, available: bool, symbol: &'static str) -> Result<()> {
        if available {
            Ok(())
        } else {
            Err(FluidError::Unsupported(symbol))
        }
    }
}

impl Client {
    fn target(&self) -> (SequencerCallback, usize) {
        (self.callback, self.data)
    }
}

impl State {
    fn alloc(&mut self, kind: HandleKind) -> Option<RawHandle> {
        if self.failing.contains(kind.constructor()) {
            return None;
        }
        self.next_handle += 0x10;
        let raw = RawHandle::from_ptr(self.next_handle as *mut c_void)?;
        self.live.insert(raw, kind);
        Some(raw)
    }

    fn code(&self, symbol: &'static str) -> i32 {
        if self.failing.contains(symbol) {
            FLUID_FAILED
        } else {
            FLUID_OK
        }
    }

    /// Whether the write was accepted.
    fn set(&mut self, symbol: &'static str, name: &CStr, value: FakeSetting) -> bool {
        if self.failing.contains(symbol) {
            return false;
        }
        let name = name.to_string_lossy().into_owned();
        let matches = matches!(
            (self.settings.get(&name), &value),
            (Some(FakeSetting::Num(_)), FakeSetting::Num(_))
                | (Some(FakeSetting::Int(_)), FakeSetting::Int(_))
                | (Some(FakeSetting::Str(_)), FakeSetting::Str(_))
        );
        if matches {
            self.settings.insert(name, value);
        }
        matches
    }

    fn get(&self, name: &CStr) -> Option<&FakeSetting> {
        self.settings.get(name.to_string_lossy().as_ref())
    }
}

impl Engine for FakeEngine {
    fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    fn release(&self, kind: HandleKind, handle: RawHandle) {
        let mut state = self.call(kind.destructor());
        if state.live.remove(&handle).is_none() {
            state.stale_releases += 1;
        }
        match kind {
            HandleKind::Sequencer => {
                // Deleting a sequencer unregisters every remaining client.
                let clients = std::mem::take(&mut state.clients);
                let tick = state.tick;
                drop(state);
                self.deliver(clients.iter().map(Client::target).collect(), tick, true);
            }
            HandleKind::Event => {
                state.events.remove(&handle);
            }
            HandleKind::RouterRule => {
                state.rules.remove(&handle);
            }
            _ => {}
        }
    }

    fn new_settings(&self) -> Option<RawHandle> {
        self.call("new_fluid_settings").alloc(HandleKind::Settings)
    }

    fn settings_setstr(&self, _settings: RawHandle, name: &CStr, value: &CStr) -> i32 {
        let value = FakeSetting::Str(value.to_string_lossy().into_owned());
        let accepted = self
            .call("fluid_settings_setstr")
            .set("fluid_settings_setstr", name, value);
        self.setter_code(accepted)
    }

    fn settings_setint(&self, _settings: RawHandle, name: &CStr, value: i32) -> i32 {
        let accepted = self
            .call("fluid_settings_setint")
            .set("fluid_settings_setint", name, FakeSetting::Int(value));
        self.setter_code(accepted)
    }

    fn settings_setnum(&self, _settings: RawHandle, name: &CStr, value: f64) -> i32 {
        let accepted = self
            .call("fluid_settings_setnum")
            .set("fluid_settings_setnum", name, FakeSetting::Num(value));
        self.setter_code(accepted)
    }

    fn settings_get_type(&self, _settings: RawHandle, name: &CStr) -> i32 {
        match self.call("fluid_settings_get_type").get(name) {
            Some(FakeSetting::Num(_)) => 0,
            Some(FakeSetting::Int(_)) => 1,
            Some(FakeSetting::Str(_)) => 2,
            Some(FakeSetting::Set) => 3,
            None => -1,
        }
    }

    fn settings_getint(&self, _settings: RawHandle, name: &CStr) -> Option<i32> {
        match self.call("fluid_settings_getint").get(name) {
            Some(FakeSetting::Int(value)) => Some(*value),
            _ => None,
        }
    }

    fn settings_getnum(&self, _settings: RawHandle, name: &CStr) -> Option<f64> {
        match self.call("fluid_settings_getnum").get(name) {
            Some(FakeSetting::Num(value)) => Some(*value),
            _ => None,
        }
    }

    fn settings_getstr(&self, _settings: RawHandle, name: &CStr) -> Result<Option<String>> {
        self.unsupported_unless(self.capabilities.settings_str, "fluid_settings_copystr")?;
        match self.call("fluid_settings_copystr").get(name) {
            Some(FakeSetting::Str(value)) => Ok(Some(value.clone())),
            _ => Ok(None),
        }
    }

    fn new_synth(&self, _settings: RawHandle) -> Option<RawHandle> {
        self.call("new_fluid_synth").alloc(HandleKind::Synth)
    }

    fn synth_sfload(&self, _synth: RawHandle, path: &CStr, _update_presets: bool) -> i32 {
        let mut state = self.call("fluid_synth_sfload");
        if state.failing.contains("fluid_synth_sfload") || path.to_bytes().is_empty() {
            return FLUID_FAILED;
        }
        state.next_sfid += 1;
        state.next_sfid
    }

    fn synth_sfunload(&self, _synth: RawHandle, sfid: i32, _update_presets: bool) -> i32 {
        let state = self.call("fluid_synth_sfunload");
        if sfid < 1 || sfid > state.next_sfid {
            return FLUID_FAILED;
        }
        state.code("fluid_synth_sfunload")
    }

    fn synth_program_select(&self, _synth: RawHandle, chan: i32, sfid: i32, bank: i32, preset: i32) -> i32 {
        let mut state = self.call("fluid_synth_program_select");
        if sfid < 1 || sfid > state.next_sfid {
            return FLUID_FAILED;
        }
        state.programs.insert(chan, (sfid, bank, preset));
        FLUID_OK
    }

    fn synth_program_change(&self, _synth: RawHandle, chan: i32, program: i32) -> i32 {
        let mut state = self.call("fluid_synth_program_change");
        let entry = state.programs.entry(chan).or_insert((1, 0, 0));
        entry.2 = program;
        FLUID_OK
    }

    fn synth_bank_select(&self, _synth: RawHandle, chan: i32, bank: i32) -> i32 {
        let mut state = self.call("fluid_synth_bank_select");
        let entry = state.programs.entry(chan).or_insert((1, 0, 0));
        entry.1 = bank;
        FLUID_OK
    }

    fn synth_sfont_select(&self, _synth: RawHandle, chan: i32, sfid: i32) -> i32 {
        let mut state = self.call("fluid_synth_sfont_select");
        let entry = state.programs.entry(chan).or_insert((1, 0, 0));
        entry.0 = sfid;
        FLUID_OK
    }

    fn synth_program_reset(&self, _synth: RawHandle) -> i32 {
        self.call("fluid_synth_program_reset").code("fluid_synth_program_reset")
    }

    fn synth_system_reset(&self, _synth: RawHandle) -> i32 {
        let mut state = self.call("fluid_synth_system_reset");
        state.voices = 0;
        state.code("fluid_synth_system_reset")
    }

    fn synth_all_notes_off(&self, _synth: RawHandle, _chan: i32) -> i32 {
        let mut state = self.call("fluid_synth_all_notes_off");
        state.voices = 0;
        FLUID_OK
    }

    fn synth_all_sounds_off(&self, _synth: RawHandle, _chan: i32) -> i32 {
        let mut state = self.call("fluid_synth_all_sounds_off");
        state.voices = 0;
        FLUID_OK
    }

    fn synth_noteon(&self, _synth: RawHandle, _chan: i32, key: i32, vel: i32) -> i32 {
        let mut state = self.call("fluid_synth_noteon");
        if key > 127 || vel > 127 {
            return FLUID_FAILED;
        }
        if vel > 0 {
            state.voices += 2;
        }
        FLUID_OK
    }

    fn synth_noteoff(&self, _synth: RawHandle, _chan: i32, key: i32) -> i32 {
        let mut state = self.call("fluid_synth_noteoff");
        if key > 127 {
            return FLUID_FAILED;
        }
        state.voices = (state.voices - 2).max(0);
        FLUID_OK
    }

    fn synth_pitch_bend(&self, _synth: RawHandle, chan: i32, value: i32) -> i32 {
        let mut state = self.call("fluid_synth_pitch_bend");
        state.pitch_bends.insert(chan, value);
        FLUID_OK
    }

    fn synth_cc(&self, _synth: RawHandle, chan: i32, ctrl: i32, value: i32) -> i32 {
        let mut state = self.call("fluid_synth_cc");
        if !(0..128).contains(&ctrl) {
            return FLUID_FAILED;
        }
        state.controllers.insert((chan, ctrl), value);
        FLUID_OK
    }

    fn synth_get_cc(&self, _synth: RawHandle, chan: i32, num: i32) -> Option<i32> {
        let state = self.call("fluid_synth_get_cc");
        (0..128)
            .contains(&num)
            .then(|| state.controllers.get(&(chan, num)).copied().unwrap_or(0))
    }

    fn synth_channel_pressure(&self, _synth: RawHandle, _chan: i32, _value: i32) -> i32 {
        self.call("fluid_synth_channel_pressure").code("fluid_synth_channel_pressure")
    }

    fn synth_key_pressure(&self, _synth: RawHandle, _chan: i32, _key: i32, _value: i32) -> Result<i32> {
        self.unsupported_unless(self.capabilities.key_pressure, "fluid_synth_key_pressure")?;
        Ok(self.call("fluid_synth_key_pressure").code("fluid_synth_key_pressure"))
    }

    fn synth_set_gain(&self, _synth: RawHandle, gain: f32) {
        self.call("fluid_synth_set_gain").gain = gain;
    }

    fn synth_get_gain(&self, _synth: RawHandle) -> f32 {
        self.call("fluid_synth_get_gain").gain
    }

    fn synth_active_voice_count(&self, _synth: RawHandle) -> Result<i32> {
        self.unsupported_unless(self.capabilities.active_voice_count, "fluid_synth_get_active_voice_count")?;
        Ok(self.call("fluid_synth_get_active_voice_count").voices)
    }

    fn synth_write_s16(&self, _synth: RawHandle, frames: usize, out: &mut [i16]) -> i32 {
        let state = self.call("fluid_synth_write_s16");
        if state.failing.contains("fluid_synth_write_s16") || out.len() < frames * 2 {
            return FLUID_FAILED;
        }
        for (index, sample) in out[..frames * 2].iter_mut().enumerate() {
            *sample = (index % 100) as i16 - 50;
        }
        FLUID_OK
    }

    fn synth_set_reverb_full(
        &self,
        _synth: RawHandle,
        mask: i32,
        roomsize: f64,
        damping: f64,
        width: f64,
        level: f64,
    ) -> Result<i32> {
        self.unsupported_unless(self.capabilities.reverb_full, "fluid_synth_set_reverb_full")?;
        let mut state = self.call("fluid_synth_set_reverb_full");
        for (bit, value) in [roomsize, damping, width, level].into_iter().enumerate() {
            if mask & (1 << bit) != 0 {
                state.reverb[bit] = value;
            }
        }
        state.last_mask = Some(mask);
        Ok(FLUID_OK)
    }

    fn synth_set_reverb_param(&self, _synth: RawHandle, param: ReverbParam, value: f64) -> Result<i32> {
        self.unsupported_unless(self.capabilities.reverb_params, "fluid_synth_set_reverb_roomsize")?;
        let symbol = match param {
            ReverbParam::RoomSize => "fluid_synth_set_reverb_roomsize",
            ReverbParam::Damp => "fluid_synth_set_reverb_damp",
            ReverbParam::Width => "fluid_synth_set_reverb_width",
            ReverbParam::Level => "fluid_synth_set_reverb_level",
        };
        let mut state = self.call(symbol);
        if state.failing.contains(symbol) {
            return Ok(FLUID_FAILED);
        }
        state.reverb[param as usize] = value;
        Ok(FLUID_OK)
    }

    fn synth_get_reverb_param(&self, _synth: RawHandle, param: ReverbParam) -> Result<f64> {
        self.unsupported_unless(self.capabilities.effect_getters, "fluid_synth_get_reverb_roomsize")?;
        Ok(self.call("fluid_synth_get_reverb_param").reverb[param as usize])
    }

    fn synth_set_chorus_full(
        &self,
        _synth: RawHandle,
        mask: i32,
        nr: i32,
        level: f64,
        speed: f64,
        depth: f64,
        kind: i32,
    ) -> Result<i32> {
        self.unsupported_unless(self.capabilities.chorus_full, "fluid_synth_set_chorus_full")?;
        let mut state = self.call("fluid_synth_set_chorus_full");
        let values = [f64::from(nr), level, speed, depth, f64::from(kind)];
        for (bit, value) in values.into_iter().enumerate() {
            if mask & (1 << bit) != 0 {
                state.chorus[bit] = value;
            }
        }
        state.last_mask = Some(mask);
        Ok(FLUID_OK)
    }

    fn synth_set_chorus_param(&self, _synth: RawHandle, param: ChorusParam, value: f64) -> Result<i32> {
        self.unsupported_unless(self.capabilities.chorus_params, "fluid_synth_set_chorus_nr")?;
        let symbol = match param {
            ChorusParam::Nr => "fluid_synth_set_chorus_nr",
            ChorusParam::Level => "fluid_synth_set_chorus_level",
            ChorusParam::Speed => "fluid_synth_set_chorus_speed",
            ChorusParam::Depth => "fluid_synth_set_chorus_depth",
            ChorusParam::Type => "fluid_synth_set_chorus_type",
        };
        let mut state = self.call(symbol);
        if state.failing.contains(symbol) {
            return Ok(FLUID_FAILED);
        }
        state.chorus[param as usize] = value;
        Ok(FLUID_OK)
    }

    fn synth_get_chorus_param(&self, _synth: RawHandle, param: ChorusParam) -> Result<f64> {
        self.unsupported_unless(self.capabilities.effect_getters, "fluid_synth_get_chorus_nr")?;
        Ok(self.call("fluid_synth_get_chorus_param").chorus[param as usize])
    }

    fn synth_channel_info(&self, _synth: RawHandle, chan: i32) -> Result<Option<ChannelInfo>> {
        self.unsupported_unless(self.capabilities.channel_info_struct, "fluid_synth_get_channel_info")?;
        let state = self.call("fluid_synth_get_channel_info");
        Ok(state.programs.get(&chan).map(|&(sfont_id, bank, program)| ChannelInfo {
            sfont_id,
            bank,
            program,
            name: Some(format!("Preset {bank}:{program}")),
        }))
    }

    fn synth_program_info(&self, _synth: RawHandle, chan: i32) -> Result<Option<(i32, i32, i32)>> {
        self.unsupported_unless(self.capabilities.program_info, "fluid_synth_get_program")?;
        let state = self.call("fluid_synth_get_program");
        if chan < 0 {
            return Ok(None);
        }
        Ok(Some(state.programs.get(&chan).copied().unwrap_or((0, 0, 0))))
    }

    fn synth_preset_name(&self, _synth: RawHandle, sfid: i32, bank: i32, preset: i32) -> Result<Option<String>> {
        self.unsupported_unless(self.capabilities.preset_name, "fluid_synth_get_sfont_by_id")?;
        let state = self.call("fluid_preset_get_name");
        Ok((sfid >= 1 && sfid <= state.next_sfid).then(|| format!("Preset {bank}:{preset}")))
    }

    fn synth_tuning_dump(&self, _synth: RawHandle, bank: i32, program: i32) -> Result<Option<Vec<f64>>> {
        self.unsupported_unless(self.capabilities.tuning, "fluid_synth_tuning_dump")?;
        let _state = self.call("fluid_synth_tuning_dump");
        Ok((bank == 0 && program == 0).then(|| (0..128).map(|key| f64::from(key) * 100.0).collect()))
    }

    fn new_audio_driver(&self, _settings: RawHandle, _synth: RawHandle) -> Option<RawHandle> {
        self.call("new_fluid_audio_driver").alloc(HandleKind::AudioDriver)
    }

    fn new_midi_router(&self, _settings: RawHandle, _synth: RawHandle) -> Option<RawHandle> {
        self.call("new_fluid_midi_router").alloc(HandleKind::Router)
    }

    fn new_midi_driver(&self, _settings: RawHandle, _router: RawHandle) -> Option<RawHandle> {
        self.call("new_fluid_midi_driver").alloc(HandleKind::MidiDriver)
    }

    fn new_cmd_handler(&self, _synth: RawHandle, _router: Option<RawHandle>) -> Result<Option<RawHandle>> {
        self.unsupported_unless(self.capabilities.cmd_handler, "new_fluid_cmd_handler")?;
        Ok(self.call("new_fluid_cmd_handler").alloc(HandleKind::CmdHandler))
    }

    fn synth_set_midi_router(&self, _synth: RawHandle, _router: RawHandle) -> Result<()> {
        self.unsupported_unless(self.capabilities.synth_midi_router, "fluid_synth_set_midi_router")?;
        let _state = self.call("fluid_synth_set_midi_router");
        Ok(())
    }

    fn router_clear_rules(&self, _router: RawHandle) -> i32 {
        let mut state = self.call("fluid_midi_router_clear_rules");
        state.committed.clear();
        FLUID_OK
    }

    fn router_set_default_rules(&self, _router: RawHandle) -> i32 {
        let mut state = self.call("fluid_midi_router_set_default_rules");
        state.committed = (0..6).map(|kind| (kind, FakeRule::default())).collect();
        FLUID_OK
    }

    fn router_add_rule(&self, _router: RawHandle, rule: RawHandle, kind: i32) -> i32 {
        let mut state = self.call("fluid_midi_router_add_rule");
        if state.failing.contains("fluid_midi_router_add_rule") || !(0..6).contains(&kind) {
            return FLUID_FAILED;
        }
        // The router now owns the rule.
        state.live.remove(&rule);
        let staged = state.rules.remove(&rule).unwrap_or_default();
        state.committed.push((kind, staged));
        FLUID_OK
    }

    fn new_router_rule(&self) -> Option<RawHandle> {
        let mut state = self.call("new_fluid_midi_router_rule");
        let rule = state.alloc(HandleKind::RouterRule)?;
        state.rules.insert(rule, FakeRule::default());
        Some(rule)
    }

    fn router_rule_set(&self, rule: RawHandle, field: RuleField, min: i32, max: i32, mul: f32, add: i32) {
        let symbol = match field {
            RuleField::Chan => "fluid_midi_router_rule_set_chan",
            RuleField::Param1 => "fluid_midi_router_rule_set_param1",
            RuleField::Param2 => "fluid_midi_router_rule_set_param2",
        };
        let mut state = self.call(symbol);
        let range = Some(RuleRange { min, max, mul, add });
        if let Some(staged) = state.rules.get_mut(&rule) {
            match field {
                RuleField::Chan => staged.chan = range,
                RuleField::Param1 => staged.param1 = range,
                RuleField::Param2 => staged.param2 = range,
            }
        }
    }

    fn new_sequencer(&self, _use_system_timer: bool) -> Result<Option<RawHandle>> {
        self.unsupported_unless(self.capabilities.sequencer, "new_fluid_sequencer2")?;
        Ok(self.call("new_fluid_sequencer2").alloc(HandleKind::Sequencer))
    }

    fn sequencer_register_fluidsynth(&self, _seq: RawHandle, _synth: RawHandle) -> i16 {
        let mut state = self.call("fluid_sequencer_register_fluidsynth");
        if state.failing.contains("fluid_sequencer_register_fluidsynth") {
            return -1;
        }
        state.next_client += 1;
        state.next_client
    }

    fn sequencer_register_client(
        &self,
        _seq: RawHandle,
        _name: &CStr,
        callback: SequencerCallback,
        data: *mut c_void,
    ) -> i16 {
        let mut state = self.call("fluid_sequencer_register_client");
        if state.failing.contains("fluid_sequencer_register_client") {
            return -1;
        }
        state.next_client += 1;
        let id = state.next_client;
        state.clients.push(Client {
            id,
            callback,
            data: data as usize,
        });
        id
    }

    fn sequencer_unregister_client(&self, _seq: RawHandle, id: i16) {
        let mut state = self.call("fluid_sequencer_unregister_client");
        let (removed, kept): (Vec<Client>, Vec<Client>) = std::mem::take(&mut state.clients)
            .into_iter()
            .partition(|client| client.id == id);
        state.clients = kept;
        let tick = state.tick;
        drop(state);
        self.deliver(removed.iter().map(Client::target).collect(), tick, true);
    }

    fn sequencer_get_tick(&self, _seq: RawHandle) -> u32 {
        self.call("fluid_sequencer_get_tick").tick
    }

    fn sequencer_set_time_scale(&self, _seq: RawHandle, scale: f64) {
        self.call("fluid_sequencer_set_time_scale").time_scale = scale;
    }

    fn sequencer_get_time_scale(&self, _seq: RawHandle) -> f64 {
        self.call("fluid_sequencer_get_time_scale").time_scale
    }

    fn sequencer_send_at(&self, _seq: RawHandle, event: RawHandle, time: u32, absolute: bool) -> i32 {
        let mut state = self.call("fluid_sequencer_send_at");
        if state.failing.contains("fluid_sequencer_send_at") {
            return FLUID_FAILED;
        }
        let event = state.events.get(&event).cloned().unwrap_or_default();
        state.sent.push(SentEvent {
            event,
            time,
            absolute,
        });
        FLUID_OK
    }

    fn sequencer_process(&self, _seq: RawHandle, msec: u32) {
        let mut state = self.call("fluid_sequencer_process");
        state.tick = state.tick.max(msec);
    }

    fn new_event(&self) -> Option<RawHandle> {
        let mut state = self.call("new_fluid_event");
        let event = state.alloc(HandleKind::Event)?;
        state.events.insert(
            event,
            FakeEvent {
                source: -1,
                dest: -1,
                payload: None,
                unregistering: false,
            },
        );
        Some(event)
    }

    fn event_set_source(&self, event: RawHandle, client: i16) {
        if let Some(staged) = self.call("fluid_event_set_source").events.get_mut(&event) {
            staged.source = client;
        }
    }

    fn event_set_dest(&self, event: RawHandle, client: i16) {
        if let Some(staged) = self.call("fluid_event_set_dest").events.get_mut(&event) {
            staged.dest = client;
        }
    }

    fn event_set_payload(&self, event: RawHandle, payload: EventPayload) {
        let symbol = match payload {
            EventPayload::Note { .. } => "fluid_event_note",
            EventPayload::NoteOn { .. } => "fluid_event_noteon",
            EventPayload::NoteOff { .. } => "fluid_event_noteoff",
            EventPayload::Timer => "fluid_event_timer",
            EventPayload::ControlChange { .. } => "fluid_event_control_change",
            EventPayload::ProgramChange { .. } => "fluid_event_program_change",
            EventPayload::PitchBend { .. } => "fluid_event_pitch_bend",
        };
        if let Some(staged) = self.call(symbol).events.get_mut(&event) {
            staged.payload = Some(payload);
        }
    }

    fn event_get_type(&self, event: RawHandle) -> i32 {
        let state = self.call("fluid_event_get_type");
        match state.events.get(&event) {
            Some(staged) if staged.unregistering => self.capabilities.generation().unregistering_event(),
            // FLUID_SEQ_TIMER
            Some(_) => 17,
            None => FLUID_FAILED,
        }
    }

    fn new_player(&self, _synth: RawHandle) -> Result<Option<RawHandle>> {
        self.unsupported_unless(self.capabilities.player, "new_fluid_player")?;
        let mut state = self.call("new_fluid_player");
        state.player_status = 0;
        Ok(state.alloc(HandleKind::Player))
    }

    fn player_add(&self, _player: RawHandle, path: &CStr) -> i32 {
        let mut state = self.call("fluid_player_add");
        if state.failing.contains("fluid_player_add") {
            return FLUID_FAILED;
        }
        state.playlist.push(path.to_string_lossy().into_owned());
        FLUID_OK
    }

    fn player_add_mem(&self, _player: RawHandle, data: &[u8]) -> i32 {
        let mut state = self.call("fluid_player_add_mem");
        if state.failing.contains("fluid_player_add_mem") || data.is_empty() {
            return FLUID_FAILED;
        }
        state.playlist.push(format!("<memory:{}>", data.len()));
        FLUID_OK
    }

    fn player_play(&self, _player: RawHandle) -> i32 {
        let mut state = self.call("fluid_player_play");
        if state.failing.contains("fluid_player_play") {
            return FLUID_FAILED;
        }
        state.player_status = 1;
        state.remaining_blocks = state.render_blocks;
        state.processed_blocks = 0;
        FLUID_OK
    }

    fn player_stop(&self, _player: RawHandle) -> i32 {
        let mut state = self.call("fluid_player_stop");
        state.player_status = self.done_status();
        FLUID_OK
    }

    fn player_join(&self, _player: RawHandle) -> i32 {
        let mut state = self.call("fluid_player_join");
        state.player_status = self.done_status();
        FLUID_OK
    }

    fn player_get_status(&self, _player: RawHandle) -> i32 {
        self.call("fluid_player_get_status").player_status
    }

    fn player_set_loop(&self, _player: RawHandle, _loops: i32) -> i32 {
        self.call("fluid_player_set_loop").code("fluid_player_set_loop")
    }

    fn player_seek(&self, _player: RawHandle, tick: i32) -> Result<i32> {
        self.unsupported_unless(self.capabilities.player_seek, "fluid_player_seek")?;
        let mut state = self.call("fluid_player_seek");
        if tick < 0 {
            return Ok(FLUID_FAILED);
        }
        state.player_tick = tick;
        Ok(FLUID_OK)
    }

    fn player_get_current_tick(&self, _player: RawHandle) -> Result<i32> {
        self.unsupported_unless(self.capabilities.player_ticks, "fluid_player_get_current_tick")?;
        Ok(self.call("fluid_player_get_current_tick").player_tick)
    }

    fn player_get_total_ticks(&self, _player: RawHandle) -> Result<i32> {
        self.unsupported_unless(self.capabilities.player_ticks, "fluid_player_get_total_ticks")?;
        let _state = self.call("fluid_player_get_total_ticks");
        Ok(1920)
    }

    fn player_set_bpm(&self, _player: RawHandle, bpm: i32) -> Result<i32> {
        self.unsupported_unless(self.capabilities.player_bpm, "fluid_player_set_bpm")?;
        self.call("fluid_player_set_bpm").bpm = bpm;
        Ok(FLUID_OK)
    }

    fn player_get_bpm(&self, _player: RawHandle) -> Result<i32> {
        self.unsupported_unless(self.capabilities.player_bpm, "fluid_player_get_bpm")?;
        Ok(self.call("fluid_player_get_bpm").bpm)
    }

    fn new_file_renderer(&self, _synth: RawHandle) -> Result<Option<RawHandle>> {
        self.unsupported_unless(self.capabilities.file_renderer, "new_fluid_file_renderer")?;
        Ok(self.call("new_fluid_file_renderer").alloc(HandleKind::FileRenderer))
    }

    fn file_renderer_process_block(&self, _renderer: RawHandle) -> i32 {
        let mut state = self.call("fluid_file_renderer_process_block");
        if state.fail_block_at == Some(state.processed_blocks) {
            return FLUID_FAILED;
        }
        state.processed_blocks += 1;
        state.remaining_blocks = state.remaining_blocks.saturating_sub(1);
        if state.remaining_blocks == 0 {
            state.player_status = self.done_status();
        }
        FLUID_OK
    }
}
