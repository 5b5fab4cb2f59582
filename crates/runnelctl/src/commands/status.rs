//! Status command implementation.

use anyhow::{bail, Context, Result};
use rusqlite::Connection;
use runnel::storage::schema::schema_version;
use runnel::{Config, DirSource, MigrationEngine};
use serde::Serialize;
use std::sync::Arc;

use crate::OutputFormat;

#[derive(Serialize)]
struct StatusOutput {
    path: String,
    schema_version: u32,
    target_version: u32,
    journal_mode: String,
    pending: Vec<String>,
}

/// Report schema state without changing anything.
pub fn run(config: &Config, format: OutputFormat) -> Result<()> {
    let Some(path) = config.db_path() else {
        bail!("status needs --data-dir; an in-memory database has no state to inspect");
    };

    let (current, journal_mode) = if path.exists() {
        let conn = Connection::open(&path)
            .with_context(|| format!("failed to open {}", path.display()))?;
        let mode: String = conn.query_row("PRAGMA journal_mode", [], |row| row.get(0))?;
        (schema_version(&conn)?, mode)
    } else {
        (0, "none".to_string())
    };

    let engine = MigrationEngine::new(
        Arc::new(DirSource::new(&config.scripts_dir)),
        &config.create_script,
        &config.migrations_dir,
    );
    let pending = if current == 0 {
        vec![config.create_script.clone()]
    } else if current < config.db_version {
        engine
            .pending(current, config.db_version)?
            .into_iter()
            .map(|script| script.path)
            .collect()
    } else {
        Vec::new()
    };

    let output = StatusOutput {
        path: path.display().to_string(),
        schema_version: current,
        target_version: config.db_version,
        journal_mode,
        pending,
    };

    match format {
        OutputFormat::Text => {
            println!("Database:        {}", output.path);
            println!("Schema version:  {}", output.schema_version);
            println!("Target version:  {}", output.target_version);
            println!("Journal mode:    {}", output.journal_mode);
            if output.pending.is_empty() {
                println!("Pending:         none");
            } else {
                println!("Pending:");
                for script in &output.pending {
                    println!("  {script}");
                }
            }
            if output.schema_version > output.target_version {
                println!();
                println!("Warning: database is newer than the target version.");
            }
        }
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    Ok(())
}
