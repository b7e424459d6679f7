//! # binmeta - Artifact Metadata Server
//!
//! The main binary over the binmeta-core metadata engine.
//!
//! This application provides:
//! - HTTP REST API server (axum-based)
//! - CLI interface for summaries, neighborhoods and log maintenance
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────┐
//! │              apps/binmeta (THE BINARY)           │
//! │                                                  │
//! │    ┌─────────────┐          ┌─────────────┐      │
//! │    │    CLI      │          │  HTTP API   │      │
//! │    │   (clap)    │          │   (axum)    │      │
//! │    └──────┬──────┘          └──────┬──────┘      │
//! │           └────────────┬───────────┘             │
//! │                        ▼                         │
//! │                ┌───────────────┐                 │
//! │                │ binmeta-core  │                 │
//! │                │  (THE LOGIC)  │                 │
//! │                └───────────────┘                 │
//! └──────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```bash
//! # Start the HTTP server
//! binmeta --config binmeta.toml server --port 8080
//!
//! # CLI operations
//! binmeta ingest -f events.json
//! binmeta summary 5f2b... --sections documents,sources,parents
//! binmeta nearby 5f2b... --cousins
//! ```

use binmeta::{AppConfig, cli};
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

// =============================================================================
// APPLICATION ENTRY POINT
// =============================================================================

#[tokio::main]
async fn main() {
    let cli = cli::Cli::parse();
    let config = AppConfig::load(cli.config.as_deref());

    // BINMETA_LOG_FORMAT=json (or server.log_format) enables machine-parseable output.
    let log_format = match &config {
        Ok(config) => config.server.log_format.clone(),
        Err(_) => std::env::var("BINMETA_LOG_FORMAT").unwrap_or_else(|_| "text".to_string()),
    };
    init_tracing(&log_format, cli.verbose);

    let config = match config {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("Error: {}", e);
            std::process::exit(1);
        }
    };

    if !cli.quiet {
        print_banner();
    }

    if let Err(e) = cli::execute(cli, config).await {
        tracing::error!("Error: {}", e);
        std::process::exit(1);
    }
}

fn init_tracing(log_format: &str, verbose: bool) {
    let default_filter = if verbose {
        "binmeta=debug,binmeta_core=debug,tower_http=debug"
    } else {
        "binmeta=info,tower_http=debug"
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| default_filter.into());

    match log_format {
        "json" => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer())
                .init();
        }
    }
}

/// Print the startup banner.
fn print_banner() {
    println!(
        r#"
  _     _                       _
 | |__ (_)_ __  _ __ ___   ___| |_ __ _
 | '_ \| | '_ \| '_ ` _ \ / _ \ __/ _` |
 | |_) | | | | | | | | | |  __/ || (_| |
 |_.__/|_|_| |_|_| |_| |_|\___|\__\__,_|

  Artifact Metadata Server v{}

  Append-only • Deterministic • Provenance-aware
"#,
        env!("CARGO_PKG_VERSION")
    );
}
