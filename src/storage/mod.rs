//! SQLite storage layer for Runnel.
//!
//! Provides:
//! - Script parsing and script sources for schema files
//! - Connection pragmas, WAL activation and schema versioning
//! - Versioned migrations applied in one transaction
//! - Per-table record accessors
//! - Read connection pool for concurrent readers

pub mod accessor;
pub mod migrate;
pub mod reader;
pub mod schema;
pub mod script;
pub mod source;

use thiserror::Error;

/// Error type for storage engine operations.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("no values to write into {table}")]
    EmptyValues { table: String },
}
