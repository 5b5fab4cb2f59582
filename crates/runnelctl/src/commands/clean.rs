//! Clean command implementation.

use anyhow::{Context, Result};
use runnel::Config;
use serde::Serialize;

use super::open_database;
use crate::OutputFormat;

#[derive(Serialize)]
struct CleanOutput {
    script: String,
    statements: usize,
}

pub fn run(config: &Config, format: OutputFormat) -> Result<()> {
    let db = open_database(config)?;
    let statements = db
        .clean_all_tables()
        .with_context(|| format!("failed to run {}", config.clean_script))?;
    db.shutdown()?;

    let output = CleanOutput {
        script: config.clean_script.clone(),
        statements,
    };

    match format {
        OutputFormat::Text => {
            println!(
                "Ran {} ({} statement(s))",
                output.script, output.statements
            );
        }
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    Ok(())
}
