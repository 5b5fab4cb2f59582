//! Migrate command implementation.

use anyhow::Result;
use runnel::{Config, SchemaChange};
use serde::Serialize;

use super::open_database;
use crate::OutputFormat;

#[derive(Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
enum MigrateOutput {
    Created { version: u32 },
    Upgraded { from: u32, to: u32, applied: Vec<u32> },
    Unchanged { version: u32 },
}

impl From<&SchemaChange> for MigrateOutput {
    fn from(change: &SchemaChange) -> Self {
        match change {
            SchemaChange::Created { version } => Self::Created { version: *version },
            SchemaChange::Upgraded { from, to, applied } => Self::Upgraded {
                from: *from,
                to: *to,
                applied: applied.clone(),
            },
            SchemaChange::Unchanged { version } => Self::Unchanged { version: *version },
        }
    }
}

/// Open the database, which creates or upgrades the schema as needed.
pub fn run(config: &Config, format: OutputFormat) -> Result<()> {
    let db = open_database(config)?;
    let output = MigrateOutput::from(db.schema_change());
    db.shutdown()?;

    match format {
        OutputFormat::Text => match &output {
            MigrateOutput::Created { version } => {
                println!("Created schema at version {version}");
            }
            MigrateOutput::Upgraded { from, to, applied } => {
                println!("Upgraded schema from version {from} to {to}");
                for version in applied {
                    println!("  applied {version}.sql");
                }
            }
            MigrateOutput::Unchanged { version } => {
                println!("Schema already at version {version}");
            }
        },
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    Ok(())
}
