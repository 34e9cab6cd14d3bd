use std::{
    fs,
    path::{Path, PathBuf},
    sync::mpsc,
    thread,
    time::Duration,
};

use clap::{Args, Parser, Subcommand};
use fluidsynth_facade_core::{
    audio::STEREO, engine::native, raw_audio_bytes, AppConfig, FileType, FluidError, Player,
    RenderOptions, Route, Sequencer, SettingValue, StartOptions, Synth, Tick, FLUID_FAILED,
};
use tracing_subscriber::EnvFilter;

/// Render progress is logged once per this many periods.
const PROGRESS_PERIODS: u64 = 16;

fn main() -> fluidsynth_facade_core::Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => AppConfig::from_json_file(path)?,
        None => AppConfig::default(),
    };

    match cli.command {
        Commands::Info => run_info(),
        Commands::Render {
            soundfont,
            midi,
            output,
            file_type,
            quality,
        } => run_render(&config, &soundfont, &midi, output.as_deref(), file_type, quality),
        Commands::Play { soundfont, midi, output } => run_play(&config, &soundfont, &midi, &output),
        Commands::Chord { soundfont, output } => run_chord(&config, &soundfont, &output),
        Commands::Sequence {
            soundfont,
            seconds,
            output,
        } => run_sequence(&config, &soundfont, seconds, &output),
        Commands::Setting { name, value } => run_setting(&config, &name, value.as_deref()),
    }
}

fn run_info() -> fluidsynth_facade_core::Result<()> {
    let engine = native::shared()?;
    let capabilities = engine.capabilities();
    tracing::info!(version = %capabilities.version, generation = ?capabilities.generation(), "engine loaded");
    println!("{}", serde_json::to_string_pretty(capabilities)?);
    Ok(())
}

fn run_render(
    config: &AppConfig,
    soundfont: &Path,
    midi: &Path,
    output: Option<&Path>,
    file_type: Option<FileType>,
    quality: Option<f64>,
) -> fluidsynth_facade_core::Result<()> {
    let synth = Synth::new(&config.synth)?;
    load_soundfont(&synth, soundfont)?;

    let mut options = RenderOptions::from(config.render.clone());
    if let Some(file_type) = file_type {
        options.file_type = file_type;
    }
    if let Some(quality) = quality {
        options.quality = quality;
    }
    let output = output.map_or_else(|| midi.with_extension("wav"), Path::to_path_buf);

    let song = fs::read(midi)?;
    let player = Player::new(&synth)?;
    if player.add_mem(&song) == FLUID_FAILED {
        return Err(FluidError::EngineFailure("fluid_player_add_mem"));
    }
    player.play(0)?;
    let frames = player.render(&output, &options, |progress| {
        let periods = progress.frames / u64::try_from(progress.period_size.max(1)).unwrap_or(1);
        if periods % PROGRESS_PERIODS == 0 {
            tracing::info!(file = progress.filename, frames = progress.frames, "rendering");
        }
    })?;
    tracing::info!(?output, frames, file_type = %options.file_type, "render finished");
    Ok(())
}

fn start_synth(
    config: &AppConfig,
    soundfont: &Path,
    output: &OutputArgs,
) -> fluidsynth_facade_core::Result<Synth> {
    let options = StartOptions::parse(
        output.driver.as_deref(),
        output.device.as_deref(),
        output.midi_driver.as_deref(),
        output.cmd_handler,
    )?;
    let mut synth = Synth::new(&config.synth)?;
    synth.start(&options)?;
    load_soundfont(&synth, soundfont)?;
    Ok(synth)
}

fn load_soundfont(synth: &Synth, soundfont: &Path) -> fluidsynth_facade_core::Result<i32> {
    let sfid = synth.sfload(soundfont, true)?;
    if sfid == FLUID_FAILED {
        return Err(FluidError::EngineFailure("fluid_synth_sfload"));
    }
    tracing::info!(?soundfont, sfid, "soundfont loaded");
    Ok(sfid)
}

fn run_play(
    config: &AppConfig,
    soundfont: &Path,
    midi: &Path,
    output: &OutputArgs,
) -> fluidsynth_facade_core::Result<()> {
    let synth = start_synth(config, soundfont, output)?;
    let player = Player::new(&synth)?;
    player.add(midi)?;
    player.play_from_start()?;
    tracing::info!(?midi, "playing");
    player.join();
    tracing::info!(status = ?player.status(), "playback finished");
    Ok(())
}

fn run_chord(config: &AppConfig, soundfont: &Path, output: &Path) -> fluidsynth_facade_core::Result<()> {
    const CHORD: [i32; 3] = [60, 67, 76];

    let synth = Synth::new(&config.synth)?;
    let sfid = load_soundfont(&synth, soundfont)?;
    synth.program_select(0, sfid, 0, 0);
    let second = config.synth.sample_rate as usize;

    let mut samples = synth.get_samples(second);
    for key in CHORD {
        synth
            .noteon(0, key, 30)
            .ok_or(FluidError::InvalidState("note outside MIDI range"))?;
    }
    samples.extend(synth.get_samples(2 * second));
    for key in CHORD {
        synth.noteoff(0, key);
    }
    samples.extend(synth.get_samples(second));

    fs::write(output, raw_audio_bytes(&samples))?;
    tracing::info!(?output, frames = samples.len() / STEREO, "wrote raw 16-bit stereo PCM");
    Ok(())
}

fn run_sequence(
    config: &AppConfig,
    soundfont: &Path,
    seconds: u32,
    output: &OutputArgs,
) -> fluidsynth_facade_core::Result<()> {
    const MELODY: [i16; 4] = [60, 64, 67, 72];
    const BASS: i16 = 36;

    let synth = start_synth(config, soundfont, output)?;
    let mut sequencer = Sequencer::new(&config.sequencer)?;
    let synth_id = sequencer.register_fluidsynth(&synth)?;

    let (bar_tx, bar_rx) = mpsc::channel();
    let clock_id = sequencer.register_client("bar-clock", move |time| {
        // The receiver is gone once the run is over.
        let _ = bar_tx.send(time);
    })?;

    let beat = (sequencer.time_scale() / 2.0).max(1.0) as u32;
    let bar_len = beat * MELODY.len() as u32;
    let start = sequencer.tick();
    let end = start.saturating_add((sequencer.time_scale() * f64::from(seconds)) as u32);
    let to_synth = Route::to(synth_id);

    let mut bar_start = start;
    while bar_start < end {
        for (step, key) in (0u32..).zip(MELODY) {
            let at = Tick::Absolute(bar_start + step * beat);
            sequencer.note(at, 0, key, 90, beat - beat / 10, to_synth)?;
        }
        sequencer.note(Tick::Absolute(bar_start), 1, BASS, 100, bar_len, to_synth)?;

        let next = bar_start + bar_len;
        // Wake up half a beat early so the next bar is queued in time.
        sequencer.timer(Tick::Absolute(next - beat / 2), Route::to(clock_id))?;
        tracing::debug!(bar_start, next, "scheduled bar");

        bar_rx
            .recv_timeout(Duration::from_secs(10))
            .map_err(|_| FluidError::InvalidState("sequencer timer did not fire"))?;
        bar_start = next;
    }

    // Let the last bar play out before tearing down.
    thread::sleep(Duration::from_secs_f64(f64::from(bar_len) / sequencer.time_scale()));
    sequencer.delete();
    Ok(())
}

fn run_setting(
    config: &AppConfig,
    name: &str,
    value: Option<&str>,
) -> fluidsynth_facade_core::Result<()> {
    let synth = Synth::new(&config.synth)?;
    if let Some(raw) = value {
        // Bare words are string settings.
        let value = serde_json::from_str::<SettingValue>(raw)
            .unwrap_or_else(|_| SettingValue::Str(raw.to_string()));
        let code = synth.set_setting(name, value)?;
        tracing::info!(name, code, "setting written");
    }
    println!("{name} = {}", synth.setting(name)?);
    Ok(())
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .try_init();
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Drive FluidSynth through its safe facades", long_about = None)]
struct Cli {
    /// JSON configuration file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Real-time output selection.
#[derive(Args, Debug)]
struct OutputArgs {
    /// Audio driver name, e.g. `alsa` or `pulseaudio`.
    #[arg(short, long)]
    driver: Option<String>,
    /// Output device for the chosen driver.
    #[arg(long)]
    device: Option<String>,
    /// Also listen on this MIDI driver.
    #[arg(long)]
    midi_driver: Option<String>,
    /// Attach a command handler to the MIDI router.
    #[arg(long, requires = "midi_driver")]
    cmd_handler: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the loaded engine's version and capabilities as JSON.
    Info,
    /// Render a MIDI file to an audio file without real-time output.
    Render {
        soundfont: PathBuf,
        midi: PathBuf,
        /// Defaults to the MIDI file name with a `.wav` extension.
        output: Option<PathBuf>,
        #[arg(short = 't', long)]
        file_type: Option<FileType>,
        #[arg(short, long)]
        quality: Option<f64>,
    },
    /// Play a MIDI file through an audio driver until it ends.
    Play {
        soundfont: PathBuf,
        midi: PathBuf,
        #[command(flatten)]
        output: OutputArgs,
    },
    /// Synthesize a held C major chord into a raw PCM file.
    Chord { soundfont: PathBuf, output: PathBuf },
    /// Play a two-voice pattern scheduled through the sequencer.
    Sequence {
        soundfont: PathBuf,
        #[arg(short, long, default_value_t = 8)]
        seconds: u32,
        #[command(flatten)]
        output: OutputArgs,
    },
    /// Read a setting, writing it first when a value is given.
    Setting {
        name: String,
        /// JSON scalar (`0.5`, `1`, `true`) or a bare string.
        value: Option<String>,
    },
}
