//! CLI command implementations.

pub mod config;
pub mod watch;

use anyhow::{Context, Result};
use boardsync_client::SessionConfig;
use std::path::Path;

/// Load the session configuration, or the defaults when no file is given.
pub fn load_config(path: Option<&Path>) -> Result<SessionConfig> {
    match path {
        Some(path) => SessionConfig::from_file(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display())),
        None => Ok(SessionConfig::default()),
    }
}
