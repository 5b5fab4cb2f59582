//! runnelctl: Command-line administration for Runnel databases.
//!
//! Inspects schema state, applies migrations, runs the clean script and
//! shows how a SQL script splits into statements.

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use runnel::observability::tracing::init_tracing;
use runnel::Config;
use std::path::PathBuf;

/// Command-line administration for Runnel databases.
#[derive(Parser)]
#[command(name = "runnelctl")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(flatten)]
    config: Config,

    /// Output format (text, json)
    #[arg(short, long, default_value = "text")]
    output: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            _ => Err(format!("unknown output format: {s}")),
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Show schema version, journal mode and pending migrations
    Status,
    /// Create or upgrade the schema to the configured version
    Migrate,
    /// Run the clean script, emptying every table
    Clean,
    /// Print the statements a SQL script splits into
    Split {
        /// Script file
        file: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    init_tracing("runnelctl", Some(cli.config.log_level.as_str()));

    match cli.command {
        Commands::Status => commands::status::run(&cli.config, cli.output)?,
        Commands::Migrate => commands::migrate::run(&cli.config, cli.output)?,
        Commands::Clean => commands::clean::run(&cli.config, cli.output)?,
        Commands::Split { file } => commands::split::run(&file, cli.output)?,
    }

    Ok(())
}
