//! Configuration for opening a database.
//!
//! Supports:
//! - CLI arguments via clap
//! - Environment variable overrides
//! - Defaults matching the conventional `db/` script layout

use clap::Parser;
use std::path::PathBuf;

use crate::error::ConfigurationError;
use crate::storage::schema::MAX_SCHEMA_VERSION;

/// Database name, schema version and script locations.
///
/// Embedded in the admin CLI via `#[command(flatten)]`; hosts with their
/// own argument parsing can do the same.
#[derive(Parser, Debug, Clone)]
pub struct Config {
    /// Directory holding the database file; omit for an in-memory database
    #[arg(short, long, env = "RUNNEL_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// Database file name inside the data directory
    #[arg(long, env = "RUNNEL_DB_NAME", default_value = "runnel.db")]
    pub db_name: String,

    /// Schema version the application expects
    #[arg(long, env = "RUNNEL_DB_VERSION", default_value_t = 1)]
    pub db_version: u32,

    /// Root of the SQL script source
    #[arg(long, env = "RUNNEL_SCRIPTS_DIR", default_value = "./db")]
    pub scripts_dir: PathBuf,

    /// Script creating the schema from scratch
    #[arg(long, env = "RUNNEL_CREATE_SCRIPT", default_value = "create.sql")]
    pub create_script: String,

    /// Script emptying every table
    #[arg(long, env = "RUNNEL_CLEAN_SCRIPT", default_value = "clean.sql")]
    pub clean_script: String,

    /// Directory of numbered upgrade scripts
    #[arg(long, env = "RUNNEL_MIGRATIONS_DIR", default_value = "migrations")]
    pub migrations_dir: String,

    /// Number of reader threads (and pooled connections) when WAL is on
    #[arg(long, env = "RUNNEL_READER_POOL_SIZE", default_value_t = 2)]
    pub reader_pool_size: u32,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "RUST_LOG", default_value = "info")]
    pub log_level: String,
}

impl Config {
    /// Parse configuration from CLI arguments and environment.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Configuration for a file database under `data_dir`.
    pub fn file(data_dir: impl Into<PathBuf>, scripts_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: Some(data_dir.into()),
            scripts_dir: scripts_dir.into(),
            ..Self::default()
        }
    }

    /// Configuration for an in-memory database.
    pub fn in_memory(scripts_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: None,
            scripts_dir: scripts_dir.into(),
            ..Self::default()
        }
    }

    /// Set the expected schema version.
    #[must_use]
    pub fn with_version(mut self, version: u32) -> Self {
        self.db_version = version;
        self
    }

    /// Full path of the database file, `None` when in memory.
    pub fn db_path(&self) -> Option<PathBuf> {
        self.data_dir.as_ref().map(|dir| dir.join(&self.db_name))
    }

    /// Reject settings no database can open with.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.db_version == 0 {
            return Err(ConfigurationError::Invalid(
                "db_version must be at least 1".into(),
            ));
        }
        if self.db_version > MAX_SCHEMA_VERSION {
            return Err(ConfigurationError::Invalid(format!(
                "db_version must be at most {MAX_SCHEMA_VERSION}"
            )));
        }
        if self.data_dir.is_some() && self.db_name.trim().is_empty() {
            return Err(ConfigurationError::Invalid("db_name is empty".into()));
        }
        if self.create_script.trim().is_empty() {
            return Err(ConfigurationError::Invalid("create_script is empty".into()));
        }
        if self.migrations_dir.trim().is_empty() {
            return Err(ConfigurationError::Invalid("migrations_dir is empty".into()));
        }
        if self.reader_pool_size == 0 {
            return Err(ConfigurationError::Invalid(
                "reader_pool_size must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Create a configuration for testing.
    #[cfg(test)]
    pub fn test_config(data_dir: PathBuf, scripts_dir: PathBuf) -> Self {
        Self {
            data_dir: Some(data_dir),
            scripts_dir,
            log_level: "debug".into(),
            ..Self::default()
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: None,
            db_name: "runnel.db".into(),
            db_version: 1,
            scripts_dir: PathBuf::from("./db"),
            create_script: "create.sql".into(),
            clean_script: "clean.sql".into(),
            migrations_dir: "migrations".into(),
            reader_pool_size: 2,
            log_level: "info".into(),
        }
    }
}
