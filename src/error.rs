//! Error types for the caching engine

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the caching engine
///
/// Backend-level failures are normally swallowed into miss/`false` results
/// and recorded as the engine's last error; these variants surface only
/// through the async facade's futures and the warming API.
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Networked-tier transport failure
    #[error("Transport error ({backend}): {reason}")]
    Transport { backend: String, reason: String },

    /// Wire-protocol violation from a networked store
    #[error("Protocol error ({backend}): {reason}")]
    Protocol { backend: String, reason: String },

    /// No usable cache directory after exhausting every candidate
    #[error("Resource initialization failed: {0}")]
    ResourceInit(String),

    /// A cache warmer failed
    #[error("Warmer '{name}' failed: {reason}")]
    Warming { name: String, reason: String },

    /// Deferred task failed to complete
    #[error("Task error: {0}")]
    Task(String),
}

impl Error {
    /// Shorthand for a transport failure scoped to one backend
    pub fn transport(backend: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Error::Transport {
            backend: backend.into(),
            reason: reason.to_string(),
        }
    }

    /// Shorthand for a protocol violation scoped to one backend
    pub fn protocol(backend: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Error::Protocol {
            backend: backend.into(),
            reason: reason.to_string(),
        }
    }
}
