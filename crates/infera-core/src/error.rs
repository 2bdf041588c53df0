//! Error types for the supervisors.
//!
//! Every public operation returns one of these. Variants carry owned strings
//! rather than source errors so they stay `Clone` and can be surfaced on
//! records and events unchanged.

use thiserror::Error;

/// A request was rejected before any resource was touched.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("invalid {field}: {message}")]
pub struct ValidationError {
    /// Name of the offending field (wire casing).
    pub field: String,
    pub message: String,
}

impl ValidationError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Port allocation failures.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PortError {
    /// Every port in the range is held.
    #[error("no free port in range {base}-{max}")]
    Exhausted { base: u16, max: u16 },
}

/// Errors returned by the process supervisor.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProcessError {
    #[error("process {0} not found")]
    NotFound(String),

    #[error(transparent)]
    PortsExhausted(#[from] PortError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("artifact {0} not found")]
    ArtifactNotFound(String),

    /// The executable could not be launched at all.
    #[error("failed to spawn server: {0}")]
    SpawnFailed(String),

    /// The child failed inside the post-spawn grace window.
    #[error("server exited during startup: {0}")]
    EarlyExit(String),

    /// The operation requires a terminal record.
    #[error("process {id} is still {status}")]
    StillActive { id: String, status: String },

    #[error("artifact registry error: {0}")]
    Registry(String),

    #[error("failed to persist process state: {0}")]
    Persistence(String),
}

/// Errors returned by the download coordinator.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DownloadError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Object-store transfer requested without credentials or client.
    #[error("object store credentials missing: {0}")]
    MissingCredentials(String),

    #[error("download {0} not found")]
    NotFound(String),

    #[error("download {id} is still {status}")]
    StillActive { id: String, status: String },

    /// Another active download writes to the same destination.
    #[error("destination {0} is already being downloaded")]
    DestinationBusy(String),

    /// Network, store or fetch-tool failure.
    #[error("transfer failed: {0}")]
    Transfer(String),

    #[error("download cancelled")]
    Cancelled,

    #[error("artifact registration failed: {0}")]
    Registry(String),

    #[error("I/O error: {0}")]
    Io(String),
}

impl DownloadError {
    pub fn transfer(message: impl Into<String>) -> Self {
        Self::Transfer(message.into())
    }

    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

impl From<std::io::Error> for DownloadError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}
