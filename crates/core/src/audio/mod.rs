//! Recognized driver and file-type names, plus 16-bit sample conversions.
//!
//! Every name accepted by the engine facades is one of the enumerations
//! below. Parsing happens before any native call, so an unknown name never
//! reaches the engine.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::FluidError;

macro_rules! name_enum {
    (
        $(#[$meta:meta])*
        $name:ident, $kind:literal {
            $( $variant:ident => $text:literal, )*
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $(
                #[serde(rename = $text)]
                $variant,
            )*
        }

        impl $name {
            /// Every recognized value, in alphabetical order of its name.
            pub const ALL: &'static [$name] = &[$($name::$variant),*];

            /// Name understood by the engine's settings.
            pub fn as_str(self) -> &'static str {
                match self {
                    $($name::$variant => $text,)*
                }
            }
        }

        impl FromStr for $name {
            type Err = FluidError;

            fn from_str(value: &str) -> Result<Self, Self::Err> {
                match value {
                    $($text => Ok($name::$variant),)*
                    other => Err(FluidError::unknown_name($kind, other)),
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

name_enum! {
    /// Audio output drivers the engine can be asked to attach.
    AudioDriver, "audio driver" {
        Alsa => "alsa",
        CoreAudio => "coreaudio",
        Dart => "dart",
        DSound => "dsound",
        File => "file",
        Jack => "jack",
        Oss => "oss",
        PortAudio => "portaudio",
        PulseAudio => "pulseaudio",
        Sdl2 => "sdl2",
        SndMan => "sndman",
        WaveOut => "waveout",
    }
}

name_enum! {
    /// MIDI input drivers.
    MidiDriver, "MIDI driver" {
        AlsaRaw => "alsa_raw",
        AlsaSeq => "alsa_seq",
        CoreMidi => "coremidi",
        Jack => "jack",
        MidiShare => "midishare",
        Oss => "oss",
        WinMidi => "winmidi",
    }
}

name_enum! {
    /// Container formats for offline rendering. `Auto` lets the engine pick
    /// from the output file extension.
    FileType, "file type" {
        Aiff => "aiff",
        Au => "au",
        Auto => "auto",
        Avr => "avr",
        Caf => "caf",
        Flac => "flac",
        Htk => "htk",
        Iff => "iff",
        Mat => "mat",
        Oga => "oga",
        Paf => "paf",
        Pvf => "pvf",
        Raw => "raw",
        Sd2 => "sd2",
        Sds => "sds",
        Sf => "sf",
        Voc => "voc",
        W64 => "w64",
        Wav => "wav",
        Xi => "xi",
    }
}

impl Default for FileType {
    fn default() -> Self {
        FileType::Auto
    }
}

/// Number of interleaved channels produced by [`crate::Synth::get_samples`].
pub const STEREO: usize = 2;

/// Serializes signed 16-bit samples into the byte layout expected by a sound
/// card (native endianness).
pub fn raw_audio_bytes(samples: &[i16]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for sample in samples {
        bytes.extend_from_slice(&sample.to_ne_bytes());
    }
    bytes
}

/// Inverse of [`raw_audio_bytes`]. A trailing odd byte is ignored.
pub fn samples_from_bytes(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(2)
        .map(|pair| i16::from_ne_bytes([pair[0], pair[1]]))
        .collect()
}
