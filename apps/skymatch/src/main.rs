//! # skymatch - Running-Catalog Cross-Matching
//!
//! The main binary for the skymatch disambiguation engine.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │            apps/skymatch (THE BINARY)        │
//! │                                              │
//! │   ┌─────────────┐      ┌──────────────────┐  │
//! │   │    CLI      │      │  JSON batches /  │  │
//! │   │   (clap)    │      │  TOML config     │  │
//! │   └──────┬──────┘      └────────┬─────────┘  │
//! │          └──────────┬───────────┘            │
//! │                     ▼                        │
//! │             ┌───────────────┐                │
//! │             │ skymatch-core │                │
//! │             │  (THE LOGIC)  │                │
//! │             └───────────────┘                │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```bash
//! skymatch init
//! skymatch ingest -f batch.json
//! skymatch resolve --image 42
//! skymatch -c match.toml resolve
//! skymatch status
//! ```

use clap::Parser;
use skymatch::cli;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

// =============================================================================
// APPLICATION ENTRY POINT
// =============================================================================

fn main() {
    // Parse CLI arguments
    let cli = cli::Cli::parse();

    // SKYMATCH_LOG_FORMAT=json enables machine-parseable output.
    let log_format = std::env::var("SKYMATCH_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());

    let default_filter = if cli.verbose {
        "skymatch=debug,skymatch_core=debug"
    } else {
        "skymatch=info,skymatch_core=info"
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| default_filter.into());

    match log_format.as_str() {
        "json" => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }

    // JSON output must stay parseable
    if !cli.quiet && !cli.json_mode {
        print_banner();
    }

    if let Err(e) = cli::execute(cli) {
        tracing::error!("Error: {}", e);
        std::process::exit(1);
    }
}

/// Print the skymatch startup banner.
fn print_banner() {
    println!(
        "skymatch v{} - running-catalog cross-matching\n",
        env!("CARGO_PKG_VERSION")
    );
}
