//! Crate-level error types.

use thiserror::Error;

use crate::scheduler::SchedulerError;
use crate::storage::migrate::MigrationError;
use crate::storage::script::ParseError;
use crate::storage::StorageError;

/// Misconfiguration detected before any work is scheduled.
///
/// Always returned to the caller directly, never through a listener.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("no accessor factory registered for {entity}")]
    MissingFactory { entity: &'static str },

    #[error("failed to construct accessor for {entity}: {source}")]
    Construction {
        entity: &'static str,
        #[source]
        source: anyhow::Error,
    },

    #[error("accessor cached for {entity} has an unexpected type")]
    TypeMismatch { entity: &'static str },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Any error surfaced by the public API.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Migration(#[from] MigrationError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Scheduler(#[from] SchedulerError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Self::Storage(StorageError::Database(err))
    }
}

/// Result alias for the public API.
pub type Result<T, E = Error> = std::result::Result<T, E>;
