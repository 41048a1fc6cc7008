//! CatalogDB CLI
//!
//! Command-line tools for CatalogDB catalog directories.
//!
//! # Commands
//!
//! - `inspect` - Display the catalog header and collection statistics
//! - `verify` - Re-read and checksum every record the catalog references
//! - `version` - Show version information

mod commands;

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// CatalogDB command-line tools.
#[derive(Parser)]
#[command(name = "catalogdb")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the catalog directory
    #[arg(global = true, short, long)]
    path: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Output format of `inspect`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text.
    Text,
    /// Pretty-printed JSON.
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Display the catalog header and collection statistics
    Inspect {
        /// Output format
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },

    /// Verify every record the catalog references
    Verify,

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // RUST_LOG wins over -v
    let default = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Inspect { format } => {
            let path = cli.path.ok_or("Catalog path required for inspect")?;
            commands::inspect::run(&path, format)?;
        }
        Commands::Verify => {
            let path = cli.path.ok_or("Catalog path required for verify")?;
            commands::verify::run(&path)?;
        }
        Commands::Version => {
            println!("CatalogDB CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("CatalogDB Core v{}", catalogdb_core::VERSION);
            println!("Catalog header format {}", catalogdb_core::FORMAT_VERSION);
        }
    }

    Ok(())
}
