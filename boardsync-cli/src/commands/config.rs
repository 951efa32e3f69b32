//! Print the effective configuration.

use anyhow::Result;
use std::path::Path;

use super::load_config;

/// Run the config command.
pub fn run(path: Option<&Path>) -> Result<()> {
    let config = load_config(path)?;
    print!("{}", config.to_toml_string()?);
    Ok(())
}
