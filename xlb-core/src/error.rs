use thiserror::Error;

/// Structured detail attached to a failed config validation.
#[derive(Debug, Clone)]
pub struct ValidationFailure {
    pub path: String,
    pub reason: String,
}

impl std::fmt::Display for ValidationFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.path, self.reason)
    }
}

/// Top-level error type for the control plane.
///
/// User-initiated calls surface these directly; background tasks log and
/// continue instead of propagating. Nothing here unwinds the process except
/// an unrecoverable map-backend failure during [`crate::lifecycle::Lifecycle::start`].
#[derive(Debug, Error)]
pub enum XlbError {
    #[error("configuration validation failed: {0}")]
    ValidationFailed(ValidationFailure),

    #[error("configuration file not found: {0}")]
    ConfigFileNotFound(String),

    #[error("failed to parse configuration: {0}")]
    ConfigParseFailed(String),

    #[error("codec error: {0}")]
    Codec(#[from] xlb_wire::CodecError),

    #[error("map backend error: {0}")]
    MapBackend(String),

    #[error("metrics pipeline error: {0}")]
    Metrics(String),

    #[error("a drain is already in progress for this target")]
    DrainAlreadyDraining,

    #[error("target not found for drain request")]
    DrainTargetNotFound,

    #[error("a reload is already in progress")]
    ReloadAlreadyInProgress,

    #[error("network interface not found: {0}")]
    InterfaceNotFound(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, XlbError>;
