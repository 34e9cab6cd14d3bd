//! Ownership of opaque engine handles.
//!
//! Every resource the engine hands out is wrapped in an [`OwnedHandle`]
//! which releases it exactly once. Facades hold their handles in struct
//! fields declared in teardown order, so dropping a facade releases
//! dependents before the handles they depend on.

use std::{ffi::c_void, fmt, ptr::NonNull, sync::Arc};

use crate::{engine::Engine, FluidError, Result};

/// Opaque, pointer-sized identifier for an engine resource.
///
/// Only meaningful when passed back into the engine that produced it.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct RawHandle(NonNull<c_void>);

// The engine synchronizes access to its own objects.
unsafe impl Send for RawHandle {}
unsafe impl Sync for RawHandle {}

impl RawHandle {
    /// Wraps a pointer returned by the engine, `None` for null.
    pub fn from_ptr(ptr: *mut c_void) -> Option<Self> {
        NonNull::new(ptr).map(Self)
    }

    pub fn as_ptr(self) -> *mut c_void {
        self.0.as_ptr()
    }
}

impl fmt::Debug for RawHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RawHandle({:p})", self.0)
    }
}

/// The resource families of the engine ABI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandleKind {
    Settings,
    Synth,
    AudioDriver,
    MidiDriver,
    Router,
    RouterRule,
    CmdHandler,
    Sequencer,
    Event,
    Player,
    FileRenderer,
}

impl HandleKind {
    /// The kind this handle must never outlive.
    pub fn depends_on(self) -> Option<HandleKind> {
        match self {
            HandleKind::Settings | HandleKind::Sequencer | HandleKind::RouterRule => None,
            HandleKind::Synth => Some(HandleKind::Settings),
            HandleKind::AudioDriver
            | HandleKind::Router
            | HandleKind::CmdHandler
            | HandleKind::Player
            | HandleKind::FileRenderer => Some(HandleKind::Synth),
            HandleKind::MidiDriver => Some(HandleKind::Router),
            HandleKind::Event => Some(HandleKind::Sequencer),
        }
    }

    /// Native constructor symbol.
    pub fn constructor(self) -> &'static str {
        match self {
            HandleKind::Settings => "new_fluid_settings",
            HandleKind::Synth => "new_fluid_synth",
            HandleKind::AudioDriver => "new_fluid_audio_driver",
            HandleKind::MidiDriver => "new_fluid_midi_driver",
            HandleKind::Router => "new_fluid_midi_router",
            HandleKind::RouterRule => "new_fluid_midi_router_rule",
            HandleKind::CmdHandler => "new_fluid_cmd_handler",
            HandleKind::Sequencer => "new_fluid_sequencer2",
            HandleKind::Event => "new_fluid_event",
            HandleKind::Player => "new_fluid_player",
            HandleKind::FileRenderer => "new_fluid_file_renderer",
        }
    }

    /// Native destructor symbol.
    pub fn destructor(self) -> &'static str {
        match self {
            HandleKind::Settings => "delete_fluid_settings",
            HandleKind::Synth => "delete_fluid_synth",
            HandleKind::AudioDriver => "delete_fluid_audio_driver",
            HandleKind::MidiDriver => "delete_fluid_midi_driver",
            HandleKind::Router => "delete_fluid_midi_router",
            HandleKind::RouterRule => "delete_fluid_midi_router_rule",
            HandleKind::CmdHandler => "delete_fluid_cmd_handler",
            HandleKind::Sequencer => "delete_fluid_sequencer",
            HandleKind::Event => "delete_fluid_event",
            HandleKind::Player => "delete_fluid_player",
            HandleKind::FileRenderer => "delete_fluid_file_renderer",
        }
    }
}

/// Move-only owner of a single engine handle.
pub struct OwnedHandle {
    engine: Arc<dyn Engine>,
    kind: HandleKind,
    raw: RawHandle,
}

impl OwnedHandle {
    /// Takes ownership of a constructor result. A null result becomes an
    /// [`FluidError::EngineFailure`] naming the constructor.
    pub fn new(engine: &Arc<dyn Engine>, kind: HandleKind, raw: Option<RawHandle>) -> Result<Self> {
        let raw = raw.ok_or(FluidError::EngineFailure(kind.constructor()))?;
        tracing::trace!(?kind, ?raw, "acquired handle");
        Ok(Self {
            engine: Arc::clone(engine),
            kind,
            raw,
        })
    }

    pub fn raw(&self) -> RawHandle {
        self.raw
    }

    pub fn kind(&self) -> HandleKind {
        self.kind
    }

    pub fn engine(&self) -> &Arc<dyn Engine> {
        &self.engine
    }

    /// Gives up ownership without releasing. Used when another engine
    /// object (a router taking a rule) becomes the owner.
    pub fn into_raw(self) -> RawHandle {
        tracing::trace!(kind = ?self.kind, raw = ?self.raw, "transferred handle ownership");
        let this = std::mem::ManuallyDrop::new(self);
        // SAFETY: `this` is never touched again, so the engine reference is
        // dropped exactly once and the handle itself is not released.
        drop(unsafe { std::ptr::read(&this.engine) });
        this.raw
    }
}

impl Drop for OwnedHandle {
    fn drop(&mut self) {
        tracing::trace!(kind = ?self.kind, raw = ?self.raw, "releasing handle");
        self.engine.release(self.kind, self.raw);
    }
}

impl fmt::Debug for OwnedHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OwnedHandle")
            .field("kind", &self.kind)
            .field("raw", &self.raw)
            .finish()
    }
}
