//! # skymatch CLI Module
//!
//! This module implements the CLI interface for skymatch.
//!
//! ## Available Commands
//!
//! - `init` - Initialize a new catalog database
//! - `ingest` - Load detections, entries and edges from a JSON batch
//! - `resolve` - Resolve ambiguous groups for one image or all images
//! - `status` - Show catalog statistics
//! - `entry` - Show one catalog entry
//! - `config` - Show the effective matching configuration

mod commands;

use clap::{Parser, Subcommand};
use skymatch_core::SkymatchError;
use std::path::PathBuf;

pub use commands::*;

// =============================================================================
// CLI STRUCTURE
// =============================================================================

/// skymatch - running-catalog cross-matching
///
/// Pairs ambiguous detection groups with catalog entries one-to-one,
/// or refuses the whole group.
#[derive(Parser, Debug)]
#[command(name = "skymatch")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress banner output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Path to the catalog database
    #[arg(short = 'D', long, global = true, default_value = "skymatch.db")]
    pub database: PathBuf,

    /// Storage backend: "file" (snapshot file) or "redb" (ACID database)
    #[arg(short = 'B', long, global = true, default_value = "redb")]
    pub backend: String,

    /// Path to a TOML matching configuration
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Output in JSON format (for programmatic access)
    #[arg(long, global = true)]
    pub json_mode: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Initialize a new empty database
    Init {
        /// Force initialization even if database exists
        #[arg(short, long)]
        force: bool,
    },

    /// Ingest a JSON batch of detections, entries and edges
    Ingest {
        /// Path to the batch file
        #[arg(short, long)]
        file: PathBuf,
    },

    /// Resolve ambiguous groups
    Resolve {
        /// Image to resolve; all images in ascending order when omitted
        #[arg(short, long)]
        image: Option<u64>,
    },

    /// Show catalog status
    Status,

    /// Show one catalog entry
    Entry {
        /// Catalog entry ID
        #[arg(long)]
        id: u64,
    },

    /// Show the effective matching configuration
    Config,
}

// =============================================================================
// COMMAND EXECUTION
// =============================================================================

/// Execute the CLI with parsed arguments.
pub fn execute(cli: Cli) -> Result<(), SkymatchError> {
    let backend = Backend::parse(&cli.backend)?;
    let json_mode = cli.json_mode;
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Some(Commands::Init { force }) => cmd_init(&cli.database, backend, force),
        Some(Commands::Ingest { file }) => cmd_ingest(&cli.database, backend, json_mode, &file),
        Some(Commands::Resolve { image }) => {
            cmd_resolve(&cli.database, backend, json_mode, &config, image)
        }
        Some(Commands::Status) => cmd_status(&cli.database, backend, json_mode),
        Some(Commands::Entry { id }) => cmd_entry(&cli.database, backend, json_mode, id),
        Some(Commands::Config) => cmd_config(&config, json_mode),
        None => {
            // No subcommand - show status by default
            cmd_status(&cli.database, backend, json_mode)
        }
    }
}
