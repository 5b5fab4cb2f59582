//! Split command implementation.

use anyhow::{Context, Result};
use runnel::parse_script;
use serde::Serialize;
use std::fs::File;
use std::path::Path;

use crate::OutputFormat;

#[derive(Serialize)]
struct SplitOutput {
    file: String,
    statements: Vec<String>,
    total: usize,
}

/// Print the statements `file` splits into.
pub fn run(file: &Path, format: OutputFormat) -> Result<()> {
    let reader = File::open(file).with_context(|| format!("failed to open {}", file.display()))?;
    let statements =
        parse_script(reader).with_context(|| format!("failed to parse {}", file.display()))?;

    let output = SplitOutput {
        file: file.display().to_string(),
        total: statements.len(),
        statements,
    };

    match format {
        OutputFormat::Text => {
            for (index, statement) in output.statements.iter().enumerate() {
                println!("-- [{}]", index + 1);
                println!("{statement};");
            }
            println!();
            println!("Total: {} statement(s)", output.total);
        }
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    Ok(())
}
