/// Result alias that carries the custom [`FluidError`] type.
pub type Result<T> = std::result::Result<T, FluidError>;

/// Success code returned by most engine entry points.
pub const FLUID_OK: i32 = 0;
/// Failure sentinel returned by most engine entry points.
pub const FLUID_FAILED: i32 = -1;

/// Common error type for the core crate.
///
/// Engine calls that wrap a single native function keep returning the raw
/// integer code; this enum covers the raising paths only.
#[derive(Debug, thiserror::Error)]
pub enum FluidError {
    /// Every candidate in the library search order was tried without success.
    #[error("could not locate the FluidSynth library (tried: {tried})")]
    LibraryNotFound { tried: String },
    /// A candidate library exists but the dynamic loader rejected it.
    #[error("failed to open `{path}`: {source}")]
    LibraryLoad {
        path: String,
        #[source]
        source: libloading::Error,
    },
    /// A required entry point is absent from the loaded library.
    #[error("required entry point `{0}` is missing from the loaded library")]
    MissingSymbol(&'static str),
    /// An optional entry point is absent from this engine build.
    #[error("`{0}` is not supported by this engine build")]
    Unsupported(&'static str),
    /// A driver, file type or rule type name outside its enumeration.
    #[error("unknown {kind} `{name}`")]
    UnknownName { kind: &'static str, name: String },
    #[error("setting `{0}` not found")]
    SettingNotFound(String),
    #[error("setting `{0}` is a set node and has no scalar value")]
    NotScalar(String),
    /// The facade's owned handle has already been released.
    #[error("{0} has already been released")]
    Released(&'static str),
    #[error("invalid state: {0}")]
    InvalidState(&'static str),
    /// The engine reported a failure on a path that raises instead of
    /// returning the raw code.
    #[error("`{0}` reported a failure")]
    EngineFailure(&'static str),
    #[error("string argument contains an interior NUL byte: {0}")]
    Nul(#[from] std::ffi::NulError),
    #[error("{0}")]
    Config(#[from] serde_json::Error),
    /// Wrapper around standard IO errors.
    #[error("{0}")]
    Io(#[from] std::io::Error),
}

impl FluidError {
    pub(crate) fn unknown_name(kind: &'static str, name: &str) -> Self {
        Self::UnknownName {
            kind,
            name: name.to_string(),
        }
    }
}
