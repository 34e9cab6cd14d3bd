//! MIDI file playback and offline rendering.

use std::{fmt, path::Path};

use crate::{
    c_path,
    config::RenderConfig,
    engine::AbiGeneration,
    handle::{HandleKind, OwnedHandle},
    synth::Synth,
    FileType, FluidError, Result, FLUID_FAILED, FLUID_OK,
};

/// Transport state reported by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerStatus {
    Ready,
    Playing,
    /// Current engines only: stop requested, playback thread still running.
    Stopping,
    Done,
}

impl PlayerStatus {
    pub fn from_raw(code: i32, generation: AbiGeneration) -> Self {
        match (code, generation) {
            (0, _) => PlayerStatus::Ready,
            (1, _) => PlayerStatus::Playing,
            (2, AbiGeneration::Current) => PlayerStatus::Stopping,
            _ => PlayerStatus::Done,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RenderOptions {
    pub file_type: FileType,
    /// Encoder quality in `[0, 1]`, used by lossy formats.
    pub quality: f64,
    /// Written to `audio.period-size` when set.
    pub period_size: Option<i32>,
}

impl Default for RenderOptions {
    fn default() -> Self {
        RenderConfig::default().into()
    }
}

impl From<RenderConfig> for RenderOptions {
    fn from(config: RenderConfig) -> Self {
        Self {
            file_type: config.file_type,
            quality: config.quality,
            period_size: config.period_size,
        }
    }
}

/// Passed to the render progress callback after every block.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderProgress<'a> {
    pub filename: &'a str,
    pub file_type: FileType,
    /// Frames written so far.
    pub frames: u64,
    pub period_size: i32,
}

/// A MIDI file player bound to a [`Synth`].
pub struct Player<'s> {
    handle: OwnedHandle,
    synth: &'s Synth,
}

impl<'s> Player<'s> {
    pub fn new(synth: &'s Synth) -> Result<Self> {
        let engine = synth.engine();
        let handle = OwnedHandle::new(engine, HandleKind::Player, engine.new_player(synth.raw())?)?;
        Ok(Self { handle, synth })
    }

    pub fn synth(&self) -> &'s Synth {
        self.synth
    }

    /// Appends a MIDI file to the playlist.
    pub fn add(&self, path: impl AsRef<Path>) -> Result<i32> {
        let path = c_path(path.as_ref())?;
        Ok(self.handle.engine().player_add(self.handle.raw(), &path))
    }

    /// Appends an in-memory MIDI file.
    pub fn add_mem(&self, data: &[u8]) -> i32 {
        self.handle.engine().player_add_mem(self.handle.raw(), data)
    }

    /// Starts playback at `offset` ticks, seeking first if the player is
    /// elsewhere.
    pub fn play(&self, offset: i32) -> Result<i32> {
        let capabilities = self.handle.engine().capabilities();
        let current = if capabilities.player_ticks {
            self.current_tick()?
        } else {
            0
        };
        if offset != current && self.seek(offset)? == FLUID_FAILED {
            return Ok(FLUID_FAILED);
        }
        Ok(self.handle.engine().player_play(self.handle.raw()))
    }

    pub fn play_from_start(&self) -> Result<i32> {
        self.play(0)
    }

    pub fn stop(&self) -> i32 {
        self.handle.engine().player_stop(self.handle.raw())
    }

    /// Blocks until the engine's playback thread exits.
    pub fn join(&self) -> i32 {
        self.handle.engine().player_join(self.handle.raw())
    }

    pub fn status(&self) -> PlayerStatus {
        let engine = self.handle.engine();
        PlayerStatus::from_raw(
            engine.player_get_status(self.handle.raw()),
            engine.capabilities().generation(),
        )
    }

    pub fn seek(&self, tick: i32) -> Result<i32> {
        self.handle.engine().player_seek(self.handle.raw(), tick)
    }

    /// `-1` loops forever.
    pub fn set_loop(&self, loops: i32) -> i32 {
        self.handle.engine().player_set_loop(self.handle.raw(), loops)
    }

    pub fn set_bpm(&self, bpm: i32) -> Result<i32> {
        self.handle.engine().player_set_bpm(self.handle.raw(), bpm)
    }

    pub fn bpm(&self) -> Result<i32> {
        self.handle.engine().player_get_bpm(self.handle.raw())
    }

    pub fn current_tick(&self) -> Result<i32> {
        self.handle.engine().player_get_current_tick(self.handle.raw())
    }

    pub fn total_ticks(&self) -> Result<i32> {
        self.handle.engine().player_get_total_ticks(self.handle.raw())
    }

    /// Renders the playing transport to `filename` as fast as the engine
    /// can, returning the number of frames written.
    ///
    /// `progress` runs after every block. Whatever the outcome, playback is
    /// stopped and joined and the real-time settings are restored before
    /// this returns.
    pub fn render(
        &self,
        filename: impl AsRef<Path>,
        options: &RenderOptions,
        mut progress: impl FnMut(&RenderProgress<'_>),
    ) -> Result<u64> {
        let filename = filename.as_ref().to_string_lossy().into_owned();
        let settings = self.synth.settings();
        let engine = self.handle.engine();

        settings.set("audio.file.name", filename.as_str())?;
        settings.set("audio.file.type", options.file_type.as_str())?;
        settings.set("audio.file.quality", options.quality)?;
        if let Some(period_size) = options.period_size {
            settings.set("audio.period-size", period_size)?;
        }

        let mut guard = RenderGuard {
            player: self,
            renderer: None,
        };
        settings.set("player.timing-source", "sample")?;
        settings.set("synth.lock-memory", 0)?;

        let renderer = OwnedHandle::new(
            engine,
            HandleKind::FileRenderer,
            engine.new_file_renderer(self.synth.raw())?,
        )?;
        let raw_renderer = renderer.raw();
        guard.renderer = Some(renderer);

        let period_size = settings.get_int("audio.period-size")?;
        tracing::debug!(%filename, file_type = %options.file_type, period_size, "rendering");

        let mut frames = 0u64;
        while self.status() == PlayerStatus::Playing {
            if engine.file_renderer_process_block(raw_renderer) != FLUID_OK {
                return Err(FluidError::EngineFailure("fluid_file_renderer_process_block"));
            }
            frames += u64::try_from(period_size).unwrap_or(0);
            progress(&RenderProgress {
                filename: &filename,
                file_type: options.file_type,
                frames,
                period_size,
            });
        }

        drop(guard);
        tracing::debug!(%filename, frames, "render finished");
        Ok(frames)
    }

    pub fn delete(self) {
        drop(self);
    }
}

impl fmt::Debug for Player<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Player").field("handle", &self.handle).finish()
    }
}

/// Restores real-time operation when a render ends, however it ends.
struct RenderGuard<'p, 's> {
    player: &'p Player<'s>,
    renderer: Option<OwnedHandle>,
}

impl Drop for RenderGuard<'_, '_> {
    fn drop(&mut self) {
        self.player.stop();
        self.player.join();
        let settings = self.player.synth.settings();
        let restored = [
            settings.set("player.timing-source", "system"),
            settings.set("synth.lock-memory", 1),
        ];
        if restored.iter().any(|code| !matches!(code, Ok(FLUID_OK))) {
            tracing::warn!("failed to restore real-time settings after render");
        }
        self.renderer = None;
    }
}
