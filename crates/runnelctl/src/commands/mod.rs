//! Subcommand implementations.

pub mod clean;
pub mod migrate;
pub mod split;
pub mod status;

use anyhow::{Context, Result};
use runnel::{Config, Database, DirSource, Immediate};
use std::sync::Arc;

/// Open the configured database, migrating it to the configured version.
pub fn open_database(config: &Config) -> Result<Database> {
    let source = Arc::new(DirSource::new(&config.scripts_dir));
    Database::open(config, source, Arc::new(Immediate)).with_context(|| {
        format!(
            "failed to open database {}",
            config
                .db_path()
                .map_or_else(|| ":memory:".to_string(), |p| p.display().to_string())
        )
    })
}
