//! Stable error domain shared by every machine, filter and segment.

use std::io;

use crate::handle::Handle;

/// The seven error kinds from the engine's error-handling design.
#[derive(Debug, thiserror::Error)]
pub enum ConduitError {
    /// An unknown handle or machine-kind name was looked up.
    #[error("handle or kind not found: {0}")]
    NotFound(String),

    /// A caller supplied a bad argument (zero alignment, zero-size buffer, ...).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Arena/backing allocation failed.
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    /// A non-blocking call found no data or no space; not really a failure.
    #[error("would block on handle {handle:?}")]
    WouldBlock { handle: Handle },

    /// The endpoint has been disabled via `stop()`.
    #[error("endpoint stopped: {handle:?}")]
    Stopped { handle: Handle },

    /// The underlying file/socket/device returned an I/O error.
    #[error("io failed on handle {handle:?}: {source}")]
    IoFailed {
        handle: Handle,
        #[source]
        source: io::Error,
    },

    /// The source end of a pipe has no more data to produce.
    #[error("complete")]
    Complete,
}

impl ConduitError {
    pub fn not_found(what: impl Into<String>) -> Self {
        ConduitError::NotFound(what.into())
    }

    pub fn invalid_argument(what: impl Into<String>) -> Self {
        ConduitError::InvalidArgument(what.into())
    }

    pub fn io_failed(handle: Handle, source: io::Error) -> Self {
        ConduitError::IoFailed { handle, source }
    }
}

pub type Result<T> = std::result::Result<T, ConduitError>;

/// Display helper mirroring the enum tag, used in a couple of trace spans
/// where the full error display would be too noisy.
impl ConduitError {
    pub fn kind_name(&self) -> &'static str {
        match self {
            ConduitError::NotFound(_) => "not_found",
            ConduitError::InvalidArgument(_) => "invalid_argument",
            ConduitError::ResourceExhausted(_) => "resource_exhausted",
            ConduitError::WouldBlock { .. } => "would_block",
            ConduitError::Stopped { .. } => "stopped",
            ConduitError::IoFailed { .. } => "io_failed",
            ConduitError::Complete => "complete",
        }
    }
}
