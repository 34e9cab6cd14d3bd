//! C signatures of the engine's exported symbols.
//!
//! Each table is declared once; the macro generates the struct of function
//! pointers and its loader. A `required` table fails with the name of the
//! first missing symbol, an `optional` table keeps `None` for every symbol
//! the library does not export.

use std::ffi::{c_char, c_double, c_float, c_int, c_short, c_uint, c_void};

use libloading::Library;

use super::SequencerCallback;

type Ptr = *mut c_void;

/// `int (*handle_midi_event_func_t)(void *data, fluid_midi_event_t *event)`
pub(crate) type MidiEventHandler = unsafe extern "C" fn(Ptr, Ptr) -> c_int;

/// Legacy single-argument `new_fluid_cmd_handler(synth)`.
pub(crate) type LegacyCmdHandlerCtor = unsafe extern "C" fn(Ptr) -> Ptr;

/// Fixed layout of `fluid_synth_channel_info_t` (1.x only).
#[repr(C)]
pub(crate) struct ChannelInfoRaw {
    pub assigned: c_int,
    pub sfont_id: c_int,
    pub bank: c_int,
    pub program: c_int,
    pub name: [c_char; 32],
    pub reserved: [c_char; 32],
}

macro_rules! symbol_table {
    (
        $(#[$meta:meta])*
        required struct $name:ident {
            $( fn $sym:ident( $( $arg:ty ),* ) $( -> $ret:ty )?; )*
        }
    ) => {
        $(#[$meta])*
        pub(crate) struct $name {
            $( pub(crate) $sym: unsafe extern "C" fn($($arg),*) $(-> $ret)?, )*
        }

        impl $name {
            /// # Safety
            /// The declared signatures must match the library's exports.
            pub(crate) unsafe fn load(lib: &Library) -> Result<Self, &'static str> {
                Ok(Self {
                    $(
                        $sym: *lib
                            .get::<unsafe extern "C" fn($($arg),*) $(-> $ret)?>(
                                concat!(stringify!($sym), "\0").as_bytes(),
                            )
                            .map_err(|_| stringify!($sym))?,
                    )*
                })
            }
        }
    };
    (
        $(#[$meta:meta])*
        optional struct $name:ident {
            $( fn $sym:ident( $( $arg:ty ),* ) $( -> $ret:ty )?; )*
        }
    ) => {
        $(#[$meta])*
        pub(crate) struct $name {
            $( pub(crate) $sym: Option<unsafe extern "C" fn($($arg),*) $(-> $ret)?>, )*
        }

        impl $name {
            /// # Safety
            /// The declared signatures must match the library's exports.
            pub(crate) unsafe fn load(lib: &Library) -> Self {
                Self {
                    $(
                        $sym: lib
                            .get::<unsafe extern "C" fn($($arg),*) $(-> $ret)?>(
                                concat!(stringify!($sym), "\0").as_bytes(),
                            )
                            .ok()
                            .map(|symbol| *symbol),
                    )*
                }
            }
        }
    };
}

symbol_table! {
    /// Entry points present in every supported engine build.
    required struct CoreApi {
        fn fluid_version(*mut c_int, *mut c_int, *mut c_int);

        fn new_fluid_settings() -> Ptr;
        fn delete_fluid_settings(Ptr);
        fn fluid_settings_setstr(Ptr, *const c_char, *const c_char) -> c_int;
        fn fluid_settings_setint(Ptr, *const c_char, c_int) -> c_int;
        fn fluid_settings_setnum(Ptr, *const c_char, c_double) -> c_int;
        fn fluid_settings_get_type(Ptr, *const c_char) -> c_int;
        fn fluid_settings_getint(Ptr, *const c_char, *mut c_int) -> c_int;
        fn fluid_settings_getnum(Ptr, *const c_char, *mut c_double) -> c_int;

        fn new_fluid_synth(Ptr) -> Ptr;
        fn delete_fluid_synth(Ptr);
        fn fluid_synth_sfload(Ptr, *const c_char, c_int) -> c_int;
        fn fluid_synth_sfunload(Ptr, c_int, c_int) -> c_int;
        fn fluid_synth_program_select(Ptr, c_int, c_int, c_int, c_int) -> c_int;
        fn fluid_synth_program_change(Ptr, c_int, c_int) -> c_int;
        fn fluid_synth_bank_select(Ptr, c_int, c_int) -> c_int;
        fn fluid_synth_sfont_select(Ptr, c_int, c_int) -> c_int;
        fn fluid_synth_program_reset(Ptr) -> c_int;
        fn fluid_synth_system_reset(Ptr) -> c_int;
        fn fluid_synth_noteon(Ptr, c_int, c_int, c_int) -> c_int;
        fn fluid_synth_noteoff(Ptr, c_int, c_int) -> c_int;
        fn fluid_synth_pitch_bend(Ptr, c_int, c_int) -> c_int;
        fn fluid_synth_cc(Ptr, c_int, c_int, c_int) -> c_int;
        fn fluid_synth_get_cc(Ptr, c_int, c_int, *mut c_int) -> c_int;
        fn fluid_synth_channel_pressure(Ptr, c_int, c_int) -> c_int;
        fn fluid_synth_set_gain(Ptr, c_float);
        fn fluid_synth_get_gain(Ptr) -> c_float;
        fn fluid_synth_write_s16(Ptr, c_int, Ptr, c_int, c_int, Ptr, c_int, c_int) -> c_int;
        fn fluid_synth_handle_midi_event(Ptr, Ptr) -> c_int;

        fn new_fluid_audio_driver(Ptr, Ptr) -> Ptr;
        fn delete_fluid_audio_driver(Ptr);
        fn new_fluid_midi_driver(Ptr, MidiEventHandler, Ptr) -> Ptr;
        fn delete_fluid_midi_driver(Ptr);

        fn new_fluid_midi_router(Ptr, MidiEventHandler, Ptr) -> Ptr;
        fn delete_fluid_midi_router(Ptr);
        fn fluid_midi_router_handle_midi_event(Ptr, Ptr) -> c_int;
        fn fluid_midi_router_clear_rules(Ptr) -> c_int;
        fn fluid_midi_router_set_default_rules(Ptr) -> c_int;
        fn fluid_midi_router_add_rule(Ptr, Ptr, c_int) -> c_int;
        fn new_fluid_midi_router_rule() -> Ptr;
        fn delete_fluid_midi_router_rule(Ptr);
        fn fluid_midi_router_rule_set_chan(Ptr, c_int, c_int, c_float, c_int);
        fn fluid_midi_router_rule_set_param1(Ptr, c_int, c_int, c_float, c_int);
        fn fluid_midi_router_rule_set_param2(Ptr, c_int, c_int, c_float, c_int);
    }
}

symbol_table! {
    /// Entry points that differ between engine generations or builds.
    #[allow(non_snake_case)]
    optional struct ExtraApi {
        fn fluid_settings_copystr(Ptr, *const c_char, *mut c_char, c_int) -> c_int;
        fn fluid_settings_getstr(Ptr, *const c_char, *mut *mut c_char) -> c_int;

        fn fluid_synth_all_notes_off(Ptr, c_int) -> c_int;
        fn fluid_synth_all_sounds_off(Ptr, c_int) -> c_int;
        fn fluid_synth_key_pressure(Ptr, c_int, c_int, c_int) -> c_int;
        fn fluid_synth_get_active_voice_count(Ptr) -> c_int;

        fn fluid_synth_set_reverb_full(Ptr, c_int, c_double, c_double, c_double, c_double) -> c_int;
        fn fluid_synth_set_chorus_full(Ptr, c_int, c_int, c_double, c_double, c_double, c_int) -> c_int;
        fn fluid_synth_set_reverb_roomsize(Ptr, c_double) -> c_int;
        fn fluid_synth_set_reverb_damp(Ptr, c_double) -> c_int;
        fn fluid_synth_set_reverb_width(Ptr, c_double) -> c_int;
        fn fluid_synth_set_reverb_level(Ptr, c_double) -> c_int;
        fn fluid_synth_set_chorus_nr(Ptr, c_int) -> c_int;
        fn fluid_synth_set_chorus_level(Ptr, c_double) -> c_int;
        fn fluid_synth_set_chorus_speed(Ptr, c_double) -> c_int;
        fn fluid_synth_set_chorus_depth(Ptr, c_double) -> c_int;
        fn fluid_synth_set_chorus_type(Ptr, c_int) -> c_int;
        fn fluid_synth_get_reverb_roomsize(Ptr) -> c_double;
        fn fluid_synth_get_reverb_damp(Ptr) -> c_double;
        fn fluid_synth_get_reverb_width(Ptr) -> c_double;
        fn fluid_synth_get_reverb_level(Ptr) -> c_double;
        fn fluid_synth_get_chorus_nr(Ptr) -> c_int;
        fn fluid_synth_get_chorus_level(Ptr) -> c_double;
        fn fluid_synth_get_chorus_speed(Ptr) -> c_double;
        fn fluid_synth_get_chorus_speed_Hz(Ptr) -> c_double;
        fn fluid_synth_get_chorus_depth(Ptr) -> c_double;
        fn fluid_synth_get_chorus_depth_ms(Ptr) -> c_double;
        fn fluid_synth_get_chorus_type(Ptr) -> c_int;

        fn fluid_synth_get_channel_info(Ptr, c_int, *mut ChannelInfoRaw) -> c_int;
        fn fluid_synth_get_program(Ptr, c_int, *mut c_int, *mut c_int, *mut c_int) -> c_int;
        fn fluid_synth_get_sfont_by_id(Ptr, c_int) -> Ptr;
        fn fluid_sfont_get_preset(Ptr, c_int, c_int) -> Ptr;
        fn fluid_preset_get_name(Ptr) -> *const c_char;
        fn fluid_synth_tuning_dump(Ptr, c_int, c_int, *mut c_char, c_int, *mut c_double) -> c_int;

        fn fluid_synth_set_midi_router(Ptr, Ptr);
        fn new_fluid_cmd_handler(Ptr, Ptr) -> Ptr;
        fn delete_fluid_cmd_handler(Ptr);

        fn fluid_player_seek(Ptr, c_int) -> c_int;
        fn fluid_player_get_current_tick(Ptr) -> c_int;
        fn fluid_player_get_total_ticks(Ptr) -> c_int;
        fn fluid_player_set_bpm(Ptr, c_int) -> c_int;
        fn fluid_player_get_bpm(Ptr) -> c_int;
    }
}

symbol_table! {
    /// Sequencer and event families, loaded all-or-nothing.
    required struct SequencerApi {
        fn new_fluid_sequencer2(c_int) -> Ptr;
        fn delete_fluid_sequencer(Ptr);
        fn fluid_sequencer_register_fluidsynth(Ptr, Ptr) -> c_short;
        fn fluid_sequencer_register_client(Ptr, *const c_char, SequencerCallback, Ptr) -> c_short;
        fn fluid_sequencer_unregister_client(Ptr, c_short);
        fn fluid_sequencer_get_tick(Ptr) -> c_uint;
        fn fluid_sequencer_set_time_scale(Ptr, c_double);
        fn fluid_sequencer_get_time_scale(Ptr) -> c_double;
        fn fluid_sequencer_send_at(Ptr, Ptr, c_uint, c_int) -> c_int;
        fn fluid_sequencer_process(Ptr, c_uint);

        fn new_fluid_event() -> Ptr;
        fn delete_fluid_event(Ptr);
        fn fluid_event_set_source(Ptr, c_short);
        fn fluid_event_set_dest(Ptr, c_short);
        fn fluid_event_get_type(Ptr) -> c_int;
        fn fluid_event_timer(Ptr, Ptr);
        fn fluid_event_note(Ptr, c_int, c_short, c_short, c_uint);
        fn fluid_event_noteon(Ptr, c_int, c_short, c_short);
        fn fluid_event_noteoff(Ptr, c_int, c_short);
        fn fluid_event_control_change(Ptr, c_int, c_short, c_int);
        fn fluid_event_program_change(Ptr, c_int, c_int);
        fn fluid_event_pitch_bend(Ptr, c_int, c_int);
    }
}

symbol_table! {
    /// MIDI file player family, loaded all-or-nothing.
    required struct PlayerApi {
        fn new_fluid_player(Ptr) -> Ptr;
        fn delete_fluid_player(Ptr);
        fn fluid_player_add(Ptr, *const c_char) -> c_int;
        fn fluid_player_add_mem(Ptr, *const c_void, usize) -> c_int;
        fn fluid_player_play(Ptr) -> c_int;
        fn fluid_player_stop(Ptr) -> c_int;
        fn fluid_player_join(Ptr) -> c_int;
        fn fluid_player_get_status(Ptr) -> c_int;
        fn fluid_player_set_loop(Ptr, c_int) -> c_int;
    }
}

symbol_table! {
    /// Offline file renderer family, loaded all-or-nothing.
    required struct RendererApi {
        fn new_fluid_file_renderer(Ptr) -> Ptr;
        fn delete_fluid_file_renderer(Ptr);
        fn fluid_file_renderer_process_block(Ptr) -> c_int;
    }
}
