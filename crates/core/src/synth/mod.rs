//! The synthesizer facade.
//!
//! A [`Synth`] owns a settings object and a synthesizer, and optionally the
//! audio driver, MIDI router, MIDI driver and command handler attached by a
//! single [`Synth::start`]. Its fields are declared in teardown order, so
//! dropping it releases every dependent handle before the handles it
//! depends on.

use std::{fmt, path::Path, sync::Arc};

use crate::{
    c_path,
    config::SynthConfig,
    engine::{native, Capabilities, ChannelInfo, ChorusParam, Engine, ReverbParam},
    handle::{HandleKind, OwnedHandle, RawHandle},
    player::{Player, RenderOptions},
    router::{RouterRule, RuleType},
    settings::{SettingValue, Settings},
    AudioDriver, FluidError, MidiDriver, Result, FLUID_FAILED, FLUID_OK,
};

/// Center of the engine's 14-bit pitch wheel range.
const PITCH_BEND_CENTER: i32 = 8192;

/// What [`Synth::start`] attaches.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StartOptions {
    /// Written to `audio.driver` when set; the engine default otherwise.
    pub driver: Option<AudioDriver>,
    /// Written to `audio.<driver>.device`. Ignored without `driver`.
    pub device: Option<String>,
    /// Creates a MIDI router and driver when set.
    pub midi_driver: Option<MidiDriver>,
    /// Binds a command handler to the router.
    pub cmd_handler: bool,
}

impl StartOptions {
    /// Builds options from driver names, rejecting unknown names.
    pub fn parse(
        driver: Option<&str>,
        device: Option<&str>,
        midi_driver: Option<&str>,
        cmd_handler: bool,
    ) -> Result<Self> {
        Ok(Self {
            driver: driver.map(str::parse).transpose()?,
            device: device.map(str::to_string),
            midi_driver: midi_driver.map(str::parse).transpose()?,
            cmd_handler,
        })
    }
}

/// Reverb parameters; `None` leaves the current value unchanged.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ReverbParams {
    pub roomsize: Option<f64>,
    pub damping: Option<f64>,
    pub width: Option<f64>,
    pub level: Option<f64>,
}

impl ReverbParams {
    /// Presence bitmask understood by `fluid_synth_set_reverb_full`.
    pub fn mask(&self) -> i32 {
        [self.roomsize, self.damping, self.width, self.level]
            .iter()
            .enumerate()
            .filter(|(_, value)| value.is_some())
            .fold(0, |mask, (bit, _)| mask | 1 << bit)
    }

    fn present(&self) -> impl Iterator<Item = (ReverbParam, f64)> {
        [
            (ReverbParam::RoomSize, self.roomsize),
            (ReverbParam::Damp, self.damping),
            (ReverbParam::Width, self.width),
            (ReverbParam::Level, self.level),
        ]
        .into_iter()
        .filter_map(|(param, value)| value.map(|value| (param, value)))
    }
}

/// Chorus parameters; `None` leaves the current value unchanged.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ChorusParams {
    pub nr: Option<i32>,
    pub level: Option<f64>,
    pub speed: Option<f64>,
    pub depth: Option<f64>,
    /// Waveform: `0` sine, `1` triangle.
    pub kind: Option<i32>,
}

impl ChorusParams {
    /// Presence bitmask understood by `fluid_synth_set_chorus_full`.
    pub fn mask(&self) -> i32 {
        [
            self.nr.is_some(),
            self.level.is_some(),
            self.speed.is_some(),
            self.depth.is_some(),
            self.kind.is_some(),
        ]
        .iter()
        .enumerate()
        .filter(|(_, present)| **present)
        .fold(0, |mask, (bit, _)| mask | 1 << bit)
    }

    fn present(&self) -> impl Iterator<Item = (ChorusParam, f64)> {
        [
            (ChorusParam::Nr, self.nr.map(f64::from)),
            (ChorusParam::Level, self.level),
            (ChorusParam::Speed, self.speed),
            (ChorusParam::Depth, self.depth),
            (ChorusParam::Type, self.kind.map(f64::from)),
        ]
        .into_iter()
        .filter_map(|(param, value)| value.map(|value| (param, value)))
    }
}

fn first_failure(codes: impl IntoIterator<Item = Result<i32>>) -> Result<i32> {
    let mut result = FLUID_OK;
    for code in codes {
        let code = code?;
        if code != FLUID_OK && result == FLUID_OK {
            result = code;
        }
    }
    Ok(result)
}

/// Handles created by a MIDI-enabled start, in teardown order.
struct MidiStack {
    cmd_handler: Option<OwnedHandle>,
    driver: OwnedHandle,
    router: OwnedHandle,
}

/// Owned synthesizer with the drivers and router attached by [`Synth::start`].
pub struct Synth {
    staged_rule: Option<(RuleType, RouterRule)>,
    cmd_handler: Option<OwnedHandle>,
    midi_driver: Option<OwnedHandle>,
    router: Option<OwnedHandle>,
    audio_driver: Option<OwnedHandle>,
    synth: OwnedHandle,
    settings: Settings,
    started: bool,
}

impl Synth {
    /// Creates a synth on the process-wide native engine.
    pub fn new(config: &SynthConfig) -> Result<Self> {
        Self::with_engine(native::shared()?, config)
    }

    pub fn with_engine(engine: Arc<dyn Engine>, config: &SynthConfig) -> Result<Self> {
        let settings = Settings::new(&engine)?;
        settings.set("synth.gain", config.gain)?;
        settings.set("synth.sample-rate", config.sample_rate)?;
        settings.set("synth.midi-channels", config.midi_channels)?;
        for (name, value) in &config.settings {
            let code = settings.set(name, value.clone())?;
            if code != FLUID_OK {
                tracing::warn!(name = name.as_str(), %value, "engine rejected setting");
            }
        }

        let synth = OwnedHandle::new(&engine, HandleKind::Synth, engine.new_synth(settings.raw()))?;
        tracing::debug!(gain = config.gain, sample_rate = config.sample_rate, "created synth");
        Ok(Self {
            staged_rule: None,
            cmd_handler: None,
            midi_driver: None,
            router: None,
            audio_driver: None,
            synth,
            settings,
            started: false,
        })
    }

    pub fn engine(&self) -> &Arc<dyn Engine> {
        self.synth.engine()
    }

    pub fn capabilities(&self) -> &Capabilities {
        self.engine().capabilities()
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub(crate) fn raw(&self) -> RawHandle {
        self.synth.raw()
    }

    pub fn setting(&self, name: &str) -> Result<SettingValue> {
        self.settings.get(name)
    }

    pub fn set_setting(&self, name: &str, value: impl Into<SettingValue>) -> Result<i32> {
        self.settings.set(name, value)
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    /// Attaches the audio driver and, when requested, the MIDI stack.
    ///
    /// May be called once. A failure part way leaves nothing new attached.
    pub fn start(&mut self, options: &StartOptions) -> Result<()> {
        if self.started {
            return Err(FluidError::InvalidState("synth already started"));
        }
        let engine = Arc::clone(self.engine());

        if let Some(driver) = options.driver {
            self.settings.set("audio.driver", driver.as_str())?;
            if let Some(device) = &options.device {
                self.settings
                    .set(&format!("audio.{driver}.device"), device.as_str())?;
            }
        }
        let audio_driver = OwnedHandle::new(
            &engine,
            HandleKind::AudioDriver,
            engine.new_audio_driver(self.settings.raw(), self.raw()),
        )?;
        tracing::debug!(driver = ?options.driver, "attached audio driver");

        let midi = match options.midi_driver {
            Some(midi) => Some(self.attach_midi(&engine, midi, options.cmd_handler)?),
            None => None,
        };

        self.audio_driver = Some(audio_driver);
        if let Some(attached) = midi {
            self.router = Some(attached.router);
            self.cmd_handler = attached.cmd_handler;
            self.midi_driver = Some(attached.driver);
        }
        self.started = true;
        Ok(())
    }

    /// Router, optional command handler and MIDI driver, created in that
    /// order. On failure the locals drop in reverse, so nothing leaks.
    fn attach_midi(&self, engine: &Arc<dyn Engine>, midi: MidiDriver, with_cmd_handler: bool) -> Result<MidiStack> {
        self.settings.set("midi.driver", midi.as_str())?;
        let router = OwnedHandle::new(
            engine,
            HandleKind::Router,
            engine.new_midi_router(self.settings.raw(), self.raw()),
        )?;

        let capabilities = engine.capabilities();
        let mut cmd_handler = None;
        if with_cmd_handler && capabilities.cmd_handler {
            let handler = engine.new_cmd_handler(self.raw(), Some(router.raw()))?;
            cmd_handler = Some(OwnedHandle::new(engine, HandleKind::CmdHandler, handler)?);
        } else if capabilities.synth_midi_router {
            engine.synth_set_midi_router(self.raw(), router.raw())?;
        }

        let driver = OwnedHandle::new(
            engine,
            HandleKind::MidiDriver,
            engine.new_midi_driver(self.settings.raw(), router.raw()),
        )?;
        tracing::debug!(driver = %midi, cmd_handler = cmd_handler.is_some(), "attached MIDI input");
        Ok(MidiStack {
            cmd_handler,
            driver,
            router,
        })
    }

    /// Loads a SoundFont, returning its id or `-1`.
    pub fn sfload(&self, path: impl AsRef<Path>, update_presets: bool) -> Result<i32> {
        let path = c_path(path.as_ref())?;
        Ok(self.engine().synth_sfload(self.raw(), &path, update_presets))
    }

    pub fn sfunload(&self, sfid: i32, update_presets: bool) -> i32 {
        self.engine().synth_sfunload(self.raw(), sfid, update_presets)
    }

    pub fn program_select(&self, chan: i32, sfid: i32, bank: i32, preset: i32) -> i32 {
        self.engine()
            .synth_program_select(self.raw(), chan, sfid, bank, preset)
    }

    pub fn program_change(&self, chan: i32, program: i32) -> i32 {
        self.engine().synth_program_change(self.raw(), chan, program)
    }

    pub fn bank_select(&self, chan: i32, bank: i32) -> i32 {
        self.engine().synth_bank_select(self.raw(), chan, bank)
    }

    pub fn sfont_select(&self, chan: i32, sfid: i32) -> i32 {
        self.engine().synth_sfont_select(self.raw(), chan, sfid)
    }

    pub fn program_reset(&self) -> i32 {
        self.engine().synth_program_reset(self.raw())
    }

    pub fn system_reset(&self) -> i32 {
        self.engine().synth_system_reset(self.raw())
    }

    /// `chan == -1` addresses every channel.
    pub fn all_notes_off(&self, chan: i32) -> i32 {
        self.engine().synth_all_notes_off(self.raw(), chan)
    }

    pub fn all_sounds_off(&self, chan: i32) -> i32 {
        self.engine().synth_all_sounds_off(self.raw(), chan)
    }

    /// `None` when an argument is out of range, without calling the engine.
    pub fn noteon(&self, chan: i32, key: i32, vel: i32) -> Option<i32> {
        if !(0..=128).contains(&key) || !(0..=128).contains(&vel) || chan < 0 {
            return None;
        }
        Some(self.engine().synth_noteon(self.raw(), chan, key, vel))
    }

    /// `None` when an argument is out of range, without calling the engine.
    pub fn noteoff(&self, chan: i32, key: i32) -> Option<i32> {
        if !(0..=128).contains(&key) || chan < 0 {
            return None;
        }
        Some(self.engine().synth_noteoff(self.raw(), chan, key))
    }

    /// `value` is relative to the wheel center, so `0` means no bend.
    pub fn pitch_bend(&self, chan: i32, value: i32) -> i32 {
        self.engine()
            .synth_pitch_bend(self.raw(), chan, value.saturating_add(PITCH_BEND_CENTER))
    }

    pub fn cc(&self, chan: i32, ctrl: i32, value: i32) -> i32 {
        self.engine().synth_cc(self.raw(), chan, ctrl, value)
    }

    pub fn get_cc(&self, chan: i32, num: i32) -> Option<i32> {
        self.engine().synth_get_cc(self.raw(), chan, num)
    }

    pub fn channel_pressure(&self, chan: i32, value: i32) -> i32 {
        self.engine().synth_channel_pressure(self.raw(), chan, value)
    }

    pub fn key_pressure(&self, chan: i32, key: i32, value: i32) -> Result<i32> {
        self.engine().synth_key_pressure(self.raw(), chan, key, value)
    }

    pub fn set_gain(&self, gain: f32) {
        self.engine().synth_set_gain(self.raw(), gain);
    }

    pub fn gain(&self) -> f32 {
        self.engine().synth_get_gain(self.raw())
    }

    pub fn active_voice_count(&self) -> Result<i32> {
        self.engine().synth_active_voice_count(self.raw())
    }

    pub fn set_reverb(&self, params: ReverbParams) -> Result<i32> {
        let engine = self.engine();
        let capabilities = engine.capabilities();
        if capabilities.reverb_full {
            let unset = -1.0;
            engine.synth_set_reverb_full(
                self.raw(),
                params.mask(),
                params.roomsize.unwrap_or(unset),
                params.damping.unwrap_or(unset),
                params.width.unwrap_or(unset),
                params.level.unwrap_or(unset),
            )
        } else if capabilities.reverb_params {
            first_failure(
                params
                    .present()
                    .map(|(param, value)| engine.synth_set_reverb_param(self.raw(), param, value)),
            )
        } else {
            Err(FluidError::Unsupported("fluid_synth_set_reverb"))
        }
    }

    pub fn set_chorus(&self, params: ChorusParams) -> Result<i32> {
        let engine = self.engine();
        let capabilities = engine.capabilities();
        if capabilities.chorus_full {
            engine.synth_set_chorus_full(
                self.raw(),
                params.mask(),
                params.nr.unwrap_or(-1),
                params.level.unwrap_or(-1.0),
                params.speed.unwrap_or(-1.0),
                params.depth.unwrap_or(-1.0),
                params.kind.unwrap_or(-1),
            )
        } else if capabilities.chorus_params {
            first_failure(
                params
                    .present()
                    .map(|(param, value)| engine.synth_set_chorus_param(self.raw(), param, value)),
            )
        } else {
            Err(FluidError::Unsupported("fluid_synth_set_chorus"))
        }
    }

    pub fn set_reverb_roomsize(&self, roomsize: f64) -> Result<i32> {
        self.set_reverb(ReverbParams {
            roomsize: Some(roomsize),
            ..ReverbParams::default()
        })
    }

    pub fn set_reverb_damp(&self, damping: f64) -> Result<i32> {
        self.set_reverb(ReverbParams {
            damping: Some(damping),
            ..ReverbParams::default()
        })
    }

    pub fn set_reverb_width(&self, width: f64) -> Result<i32> {
        self.set_reverb(ReverbParams {
            width: Some(width),
            ..ReverbParams::default()
        })
    }

    pub fn set_reverb_level(&self, level: f64) -> Result<i32> {
        self.set_reverb(ReverbParams {
            level: Some(level),
            ..ReverbParams::default()
        })
    }

    pub fn set_chorus_nr(&self, nr: i32) -> Result<i32> {
        self.set_chorus(ChorusParams {
            nr: Some(nr),
            ..ChorusParams::default()
        })
    }

    pub fn set_chorus_level(&self, level: f64) -> Result<i32> {
        self.set_chorus(ChorusParams {
            level: Some(level),
            ..ChorusParams::default()
        })
    }

    pub fn set_chorus_speed(&self, speed: f64) -> Result<i32> {
        self.set_chorus(ChorusParams {
            speed: Some(speed),
            ..ChorusParams::default()
        })
    }

    pub fn set_chorus_depth(&self, depth: f64) -> Result<i32> {
        self.set_chorus(ChorusParams {
            depth: Some(depth),
            ..ChorusParams::default()
        })
    }

    pub fn set_chorus_type(&self, kind: i32) -> Result<i32> {
        self.set_chorus(ChorusParams {
            kind: Some(kind),
            ..ChorusParams::default()
        })
    }

    pub fn reverb_roomsize(&self) -> Result<f64> {
        self.engine().synth_get_reverb_param(self.raw(), ReverbParam::RoomSize)
    }

    pub fn reverb_damp(&self) -> Result<f64> {
        self.engine().synth_get_reverb_param(self.raw(), ReverbParam::Damp)
    }

    pub fn reverb_level(&self) -> Result<f64> {
        self.engine().synth_get_reverb_param(self.raw(), ReverbParam::Level)
    }

    pub fn reverb_width(&self) -> Result<f64> {
        self.engine().synth_get_reverb_param(self.raw(), ReverbParam::Width)
    }

    pub fn chorus_nr(&self) -> Result<i32> {
        let nr = self.engine().synth_get_chorus_param(self.raw(), ChorusParam::Nr)?;
        Ok(nr as i32)
    }

    pub fn chorus_level(&self) -> Result<f64> {
        self.engine().synth_get_chorus_param(self.raw(), ChorusParam::Level)
    }

    pub fn chorus_speed(&self) -> Result<f64> {
        self.engine().synth_get_chorus_param(self.raw(), ChorusParam::Speed)
    }

    pub fn chorus_depth(&self) -> Result<f64> {
        self.engine().synth_get_chorus_param(self.raw(), ChorusParam::Depth)
    }

    pub fn chorus_type(&self) -> Result<i32> {
        let kind = self.engine().synth_get_chorus_param(self.raw(), ChorusParam::Type)?;
        Ok(kind as i32)
    }

    /// SoundFont, bank, program and preset name of a channel.
    pub fn channel_info(&self, chan: i32) -> Result<ChannelInfo> {
        let engine = self.engine();
        if engine.capabilities().channel_info_struct {
            return engine
                .synth_channel_info(self.raw(), chan)?
                .ok_or(FluidError::EngineFailure("fluid_synth_get_channel_info"));
        }
        let (sfont_id, bank, program) = self.program_info(chan)?;
        let name = self.sfpreset_name(sfont_id, bank, program)?;
        Ok(ChannelInfo {
            sfont_id,
            bank,
            program,
            name,
        })
    }

    /// `(sfont_id, bank, program)` selected on a channel.
    pub fn program_info(&self, chan: i32) -> Result<(i32, i32, i32)> {
        self.engine()
            .synth_program_info(self.raw(), chan)?
            .ok_or(FluidError::EngineFailure("fluid_synth_get_program"))
    }

    /// Name of a preset, `None` when the SoundFont or preset does not exist.
    pub fn sfpreset_name(&self, sfid: i32, bank: i32, preset: i32) -> Result<Option<String>> {
        self.engine().synth_preset_name(self.raw(), sfid, bank, preset)
    }

    /// Pitch of each of the 128 keys, in cents, for a tuning.
    pub fn tuning_dump(&self, bank: i32, program: i32) -> Result<Vec<f64>> {
        self.engine()
            .synth_tuning_dump(self.raw(), bank, program)?
            .ok_or(FluidError::EngineFailure("fluid_synth_tuning_dump"))
    }

    /// Synthesizes `frames` stereo frames, interleaved left/right.
    ///
    /// Always returns `2 * frames` samples; they are silent if the engine
    /// reported a failure.
    pub fn get_samples(&self, frames: usize) -> Vec<i16> {
        let mut samples = vec![0; frames * crate::audio::STEREO];
        if frames == 0 {
            return samples;
        }
        let code = self.engine().synth_write_s16(self.raw(), frames, &mut samples);
        if code != FLUID_OK {
            tracing::warn!(frames, code, "fluid_synth_write_s16 failed");
            samples.fill(0);
        }
        samples
    }

    fn router(&self) -> Result<RawHandle> {
        self.router
            .as_ref()
            .map(OwnedHandle::raw)
            .ok_or(FluidError::InvalidState("no MIDI router attached"))
    }

    pub fn router_clear(&self) -> Result<i32> {
        let router = self.router()?;
        Ok(self.engine().router_clear_rules(router))
    }

    pub fn router_default(&self) -> Result<i32> {
        let router = self.router()?;
        Ok(self.engine().router_set_default_rules(router))
    }

    /// Commits `rule` to the router. On success the router owns it and the
    /// facade is left released; on failure it stays with the caller.
    pub fn router_add_rule(&self, rule: &mut RouterRule, kind: RuleType) -> Result<i32> {
        let router = self.router()?;
        let code = self.engine().router_add_rule(router, rule.raw()?, kind.as_raw());
        if code == FLUID_OK {
            rule.transfer();
        }
        Ok(code)
    }

    /// Starts staging a rule of `kind`, discarding one staged earlier.
    pub fn router_begin(&mut self, kind: RuleType) -> Result<()> {
        self.router()?;
        let rule = RouterRule::new(self.engine())?;
        if self.staged_rule.replace((kind, rule)).is_some() {
            tracing::debug!("discarded previously staged router rule");
        }
        Ok(())
    }

    pub fn router_chan(&mut self, min: i32, max: i32, mul: f32, add: i32) -> Result<()> {
        self.staged()?.set_chan(min, max, mul, add)
    }

    pub fn router_par1(&mut self, min: i32, max: i32, mul: f32, add: i32) -> Result<()> {
        self.staged()?.set_param1(min, max, mul, add)
    }

    pub fn router_par2(&mut self, min: i32, max: i32, mul: f32, add: i32) -> Result<()> {
        self.staged()?.set_param2(min, max, mul, add)
    }

    /// Commits the staged rule. A rule the router rejects is released.
    pub fn router_end(&mut self) -> Result<i32> {
        let (kind, mut rule) = self
            .staged_rule
            .take()
            .ok_or(FluidError::InvalidState("no router rule staged"))?;
        let code = self.router_add_rule(&mut rule, kind)?;
        if code != FLUID_OK {
            tracing::warn!(%kind, code, "router rejected staged rule");
        }
        Ok(code)
    }

    fn staged(&mut self) -> Result<&mut RouterRule> {
        self.router()?;
        self.staged_rule
            .as_mut()
            .map(|(_, rule)| rule)
            .ok_or(FluidError::InvalidState("no router rule staged"))
    }

    /// Renders a MIDI file to an audio file through a temporary player.
    /// Returns the number of frames written.
    pub fn midi2audio(&self, midi: impl AsRef<Path>, audio: impl AsRef<Path>) -> Result<u64> {
        let player = Player::new(self)?;
        if player.add(midi)? == FLUID_FAILED {
            return Err(FluidError::EngineFailure("fluid_player_add"));
        }
        if player.play(0)? == FLUID_FAILED {
            return Err(FluidError::EngineFailure("fluid_player_play"));
        }
        player.render(audio, &RenderOptions::default(), |_| {})
    }

    /// Releases every handle, dependents first.
    pub fn delete(self) {
        tracing::debug!(started = self.started, "deleting synth");
        drop(self);
    }
}

impl fmt::Debug for Synth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Synth")
            .field("synth", &self.synth)
            .field("audio_driver", &self.audio_driver)
            .field("router", &self.router)
            .field("midi_driver", &self.midi_driver)
            .field("cmd_handler", &self.cmd_handler)
            .finish()
    }
}
