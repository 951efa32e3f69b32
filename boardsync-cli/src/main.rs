//! # boardsync
//!
//! Command line client for boardsync whiteboard sessions.
//!
//! ## Commands
//!
//! - `watch`: Join a board and log the live session until Ctrl-C
//! - `config`: Print the effective session configuration
//!
//! ## Example
//!
//! ```bash
//! # Follow a board, with debug logs from the engine
//! RUST_LOG=boardsync_client=debug boardsync watch --endpoint 127.0.0.1:9000 --token s3cret
//!
//! # Check what a config file resolves to
//! boardsync config --config boardsync.toml
//! ```

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;

use commands::{config, watch};

/// Command line client for boardsync whiteboard sessions.
#[derive(Parser, Debug)]
#[command(name = "boardsync")]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Connect to a board server and log the session until Ctrl-C
    Watch {
        /// Board server address (host:port)
        #[arg(long, short)]
        endpoint: String,

        /// Credential token sent in the handshake
        #[arg(long, env = "BOARDSYNC_TOKEN", hide_env_values = true)]
        token: Option<String>,

        /// Session configuration file (TOML)
        #[arg(long, short)]
        config: Option<PathBuf>,

        /// Write the board as JSON to this file when the session ends
        #[arg(long)]
        export: Option<PathBuf>,
    },

    /// Print the effective session configuration
    Config {
        /// Session configuration file (TOML); defaults are used without one
        #[arg(long, short)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Watch {
            endpoint,
            token,
            config,
            export,
        } => {
            watch::run(&endpoint, token, config.as_deref(), export.as_deref()).await?;
        }
        Commands::Config { config } => {
            config::run(config.as_deref())?;
        }
    }

    Ok(())
}
