//! # binmeta CLI Module
//!
//! This module implements the CLI interface for binmeta.
//!
//! ## Available Commands
//!
//! - `server` - Start the HTTP server
//! - `status` - Show event log status
//! - `ingest` - Ingest events from a file
//! - `summary` - Summarize one entity
//! - `nearby` - Show the provenance neighborhood of one entity
//! - `export` - Export the event log to a file
//! - `import` - Import events from an exported file
//! - `init` - Initialize a new database

mod commands;

use crate::config::AppConfig;
use binmeta_core::MetaError;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

pub use commands::*;

// =============================================================================
// CLI STRUCTURE
// =============================================================================

/// binmeta - artifact metadata server
///
/// Reduces observation events about binary artifacts into entity summaries
/// and provenance neighborhoods.
#[derive(Parser, Debug)]
#[command(name = "binmeta")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress banner output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Path to the event log database
    #[arg(short = 'D', long, global = true, default_value = "binmeta.db")]
    pub database: PathBuf,

    /// Storage backend: "file" (portable event-log file) or "redb" (ACID database)
    #[arg(short = 'B', long, global = true, default_value = "redb")]
    pub backend: String,

    /// Path to a TOML configuration file
    #[arg(short = 'c', long, global = true)]
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
    /// Start HTTP server
    Server {
        /// Host to bind to (overrides the config file)
        #[arg(short = 'H', long)]
        host: Option<String>,

        /// Port to bind to (overrides the config file)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Show event log status
    Status,

    /// Ingest events from a file
    Ingest {
        /// Path to the input file
        #[arg(short, long)]
        file: PathBuf,

        /// Input format: json (array of events) or jsonl (one event per line)
        #[arg(short = 't', long, default_value = "json")]
        format: String,
    },

    /// Summarize one entity
    Summary {
        /// Entity hash
        hash: String,

        /// Comma-separated sections (default: all but total-hits)
        #[arg(short, long)]
        sections: Option<String>,

        /// Only count instances by this author name
        #[arg(short, long)]
        author: Option<String>,
    },

    /// Show the provenance neighborhood of one entity
    Nearby {
        /// Entity hash
        hash: String,

        /// Also discover cousins
        #[arg(long)]
        cousins: bool,

        /// Stop cousin discovery after this many cousins
        #[arg(long)]
        max_cousins: Option<usize>,

        /// Discover cousins only this many rounds out
        #[arg(long)]
        max_distance: Option<usize>,
    },

    /// Export the event log
    Export {
        /// Output file path
        #[arg(short, long)]
        output: PathBuf,

        /// Export format (binary, json)
        #[arg(short = 't', long, default_value = "binary")]
        format: String,
    },

    /// Import events from an exported file
    Import {
        /// Input file path
        #[arg(short, long)]
        input: PathBuf,
    },

    /// Initialize a new empty database
    Init {
        /// Force initialization even if database exists
        #[arg(short, long)]
        force: bool,
    },
}

// =============================================================================
// COMMAND EXECUTION
// =============================================================================

/// Execute the CLI with parsed arguments.
pub async fn execute(cli: Cli, config: AppConfig) -> Result<(), MetaError> {
    let store = Store::new(cli.database, &cli.backend, config.core)?;
    let json_mode = cli.json_mode;

    match cli.command {
        Some(Commands::Server { host, port }) => {
            let mut server = config.server;
            if let Some(host) = host {
                server.host = host;
            }
            if let Some(port) = port {
                server.port = port;
            }
            cmd_server(&store, &server).await
        }
        Some(Commands::Status) | None => cmd_status(&store, json_mode),
        Some(Commands::Ingest { file, format }) => cmd_ingest(&store, &file, &format),
        Some(Commands::Summary {
            hash,
            sections,
            author,
        }) => cmd_summary(&store, json_mode, &hash, sections.as_deref(), author),
        Some(Commands::Nearby {
            hash,
            cousins,
            max_cousins,
            max_distance,
        }) => cmd_nearby(
            &store,
            json_mode,
            &hash,
            cousins,
            max_cousins,
            max_distance,
        ),
        Some(Commands::Export { output, format }) => cmd_export(&store, &output, &format),
        Some(Commands::Import { input }) => cmd_import(&store, &input),
        Some(Commands::Init { force }) => cmd_init(&store, force),
    }
}
