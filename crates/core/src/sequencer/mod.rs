//! Timed event scheduling.
//!
//! The engine keeps only a raw pointer to a client callback, so every
//! callback registered through [`Sequencer::register_client`] is owned by
//! the facade until the sequencer handle itself has been deleted.

use std::{
    ffi::{c_uint, c_void, CString},
    fmt,
    panic::{self, AssertUnwindSafe},
    ptr::NonNull,
    sync::Arc,
};

use crate::{
    config::SequencerConfig,
    engine::{native, Engine, EventPayload},
    handle::{HandleKind, OwnedHandle, RawHandle},
    synth::Synth,
    FluidError, Result, FLUID_FAILED,
};

/// Sequencer client id, as returned by registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId(pub i16);

/// When an event fires, in sequencer ticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    Absolute(u32),
    /// Ticks from now.
    Relative(u32),
}

impl Tick {
    fn split(self) -> (u32, bool) {
        match self {
            Tick::Absolute(time) => (time, true),
            Tick::Relative(time) => (time, false),
        }
    }
}

/// Source and destination clients of an event. `None` is the engine's
/// "unset" (`-1`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Route {
    pub source: Option<ClientId>,
    pub dest: Option<ClientId>,
}

impl Route {
    pub fn to(dest: ClientId) -> Self {
        Self {
            source: None,
            dest: Some(dest),
        }
    }

    pub fn between(source: ClientId, dest: ClientId) -> Self {
        Self {
            source: Some(source),
            dest: Some(dest),
        }
    }

    fn raw(id: Option<ClientId>) -> i16 {
        id.map_or(-1, |ClientId(id)| id)
    }
}

type Callback = Box<dyn FnMut(u32) + Send>;

struct ClientSlot {
    engine: Arc<dyn Engine>,
    callback: Callback,
}

/// Heap slot whose address is handed to the engine as callback data.
struct RetainedCallback(NonNull<ClientSlot>);

// The slot is only touched by the engine's timer thread through the
// trampoline, and freed after the sequencer handle is gone.
unsafe impl Send for RetainedCallback {}

impl RetainedCallback {
    fn new(engine: &Arc<dyn Engine>, callback: Callback) -> Self {
        let slot = ClientSlot {
            engine: Arc::clone(engine),
            callback,
        };
        Self(NonNull::from(Box::leak(Box::new(slot))))
    }

    fn data(&self) -> *mut c_void {
        self.0.as_ptr().cast()
    }
}

impl Drop for RetainedCallback {
    fn drop(&mut self) {
        // SAFETY: created by `Box::leak` in `new` and dropped exactly once.
        drop(unsafe { Box::from_raw(self.0.as_ptr()) });
    }
}

unsafe extern "C" fn client_trampoline(
    time: c_uint,
    event: *mut c_void,
    _seq: *mut c_void,
    data: *mut c_void,
) {
    if data.is_null() {
        return;
    }
    // SAFETY: `data` is a `RetainedCallback` slot kept alive by the owning
    // sequencer for as long as the engine may call back.
    let slot = unsafe { &mut *data.cast::<ClientSlot>() };
    // The notice sent on unregistration and on delete is not a tick.
    if let Some(event) = RawHandle::from_ptr(event) {
        let unregistering = slot.engine.capabilities().generation().unregistering_event();
        if slot.engine.event_get_type(event) == unregistering {
            tracing::trace!(time, "sequencer client unregistered");
            return;
        }
    }
    let callback = &mut slot.callback;
    if panic::catch_unwind(AssertUnwindSafe(|| callback(time))).is_err() {
        tracing::error!(time, "sequencer client callback panicked");
    }
}

/// Owned engine sequencer with the synths and client callbacks it routes to.
pub struct Sequencer<'s> {
    handle: OwnedHandle,
    callbacks: Vec<RetainedCallback>,
    synths: Vec<&'s Synth>,
}

impl<'s> Sequencer<'s> {
    /// Creates a sequencer on the process-wide native engine.
    pub fn new(config: &SequencerConfig) -> Result<Self> {
        Self::with_engine(native::shared()?, config)
    }

    pub fn with_engine(engine: Arc<dyn Engine>, config: &SequencerConfig) -> Result<Self> {
        let raw = engine.new_sequencer(config.use_system_timer)?;
        let handle = OwnedHandle::new(&engine, HandleKind::Sequencer, raw)?;
        engine.sequencer_set_time_scale(handle.raw(), config.time_scale);
        tracing::debug!(time_scale = config.time_scale, "created sequencer");
        Ok(Self {
            handle,
            callbacks: Vec::new(),
            synths: Vec::new(),
        })
    }

    fn engine(&self) -> &Arc<dyn Engine> {
        self.handle.engine()
    }

    /// Registers `synth` as a destination. It must outlive the sequencer.
    pub fn register_fluidsynth(&mut self, synth: &'s Synth) -> Result<ClientId> {
        let id = self
            .engine()
            .sequencer_register_fluidsynth(self.handle.raw(), synth.raw());
        if i32::from(id) == FLUID_FAILED {
            return Err(FluidError::EngineFailure("fluid_sequencer_register_fluidsynth"));
        }
        self.synths.push(synth);
        Ok(ClientId(id))
    }

    /// Registers a client whose callback runs on the engine's timer thread
    /// with the tick of each event delivered to it. Unregistration is not
    /// delivered as a tick.
    pub fn register_client<F>(&mut self, name: &str, callback: F) -> Result<ClientId>
    where
        F: FnMut(u32) + Send + 'static,
    {
        let name = CString::new(name)?;
        let retained = RetainedCallback::new(self.engine(), Box::new(callback));
        let id = self.engine().sequencer_register_client(
            self.handle.raw(),
            &name,
            client_trampoline,
            retained.data(),
        );
        if i32::from(id) == FLUID_FAILED {
            return Err(FluidError::EngineFailure("fluid_sequencer_register_client"));
        }
        self.callbacks.push(retained);
        tracing::debug!(client = id, name = ?name, "registered sequencer client");
        Ok(ClientId(id))
    }

    /// The callback stays retained until the sequencer is deleted.
    pub fn unregister_client(&self, id: ClientId) {
        self.engine()
            .sequencer_unregister_client(self.handle.raw(), id.0);
    }

    pub fn note(
        &self,
        at: Tick,
        channel: i32,
        key: i16,
        velocity: i16,
        duration: u32,
        route: Route,
    ) -> Result<()> {
        self.send(
            at,
            route,
            EventPayload::Note {
                channel,
                key,
                velocity,
                duration,
            },
        )
    }

    pub fn note_on(&self, at: Tick, channel: i32, key: i16, velocity: i16, route: Route) -> Result<()> {
        self.send(
            at,
            route,
            EventPayload::NoteOn {
                channel,
                key,
                velocity,
            },
        )
    }

    pub fn note_off(&self, at: Tick, channel: i32, key: i16, route: Route) -> Result<()> {
        self.send(at, route, EventPayload::NoteOff { channel, key })
    }

    /// Schedules a wake-up for the destination client.
    pub fn timer(&self, at: Tick, route: Route) -> Result<()> {
        self.send(at, route, EventPayload::Timer)
    }

    pub fn control_change(
        &self,
        at: Tick,
        channel: i32,
        control: i16,
        value: i32,
        route: Route,
    ) -> Result<()> {
        self.send(
            at,
            route,
            EventPayload::ControlChange {
                channel,
                control,
                value,
            },
        )
    }

    pub fn program_change(&self, at: Tick, channel: i32, program: i32, route: Route) -> Result<()> {
        self.send(at, route, EventPayload::ProgramChange { channel, program })
    }

    pub fn pitch_bend(&self, at: Tick, channel: i32, value: i32, route: Route) -> Result<()> {
        self.send(at, route, EventPayload::PitchBend { channel, value })
    }

    fn send(&self, at: Tick, route: Route, payload: EventPayload) -> Result<()> {
        let engine = self.engine();
        let event = OwnedHandle::new(engine, HandleKind::Event, engine.new_event())?;
        engine.event_set_source(event.raw(), Route::raw(route.source));
        engine.event_set_dest(event.raw(), Route::raw(route.dest));
        engine.event_set_payload(event.raw(), payload);

        let (time, absolute) = at.split();
        let code = engine.sequencer_send_at(self.handle.raw(), event.raw(), time, absolute);
        drop(event);
        if code == FLUID_FAILED {
            return Err(FluidError::EngineFailure("fluid_sequencer_send_at"));
        }
        Ok(())
    }

    /// Current time in ticks.
    pub fn tick(&self) -> u32 {
        self.engine().sequencer_get_tick(self.handle.raw())
    }

    /// Ticks per second.
    pub fn time_scale(&self) -> f64 {
        self.engine().sequencer_get_time_scale(self.handle.raw())
    }

    pub fn set_time_scale(&self, scale: f64) {
        self.engine()
            .sequencer_set_time_scale(self.handle.raw(), scale);
    }

    /// Advances a sequencer created without the system timer to `msec`.
    pub fn process(&self, msec: u32) {
        self.engine().sequencer_process(self.handle.raw(), msec);
    }

    pub fn delete(self) {
        tracing::debug!(clients = self.callbacks.len(), "deleting sequencer");
        drop(self);
    }
}

impl fmt::Debug for Sequencer<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sequencer")
            .field("handle", &self.handle)
            .field("callbacks", &self.callbacks.len())
            .field("synths", &self.synths.len())
            .finish()
    }
}
