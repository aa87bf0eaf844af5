// src/config.rs

//! Configuration loading utilities.
//!
//! This module provides convenience functions for loading the
//! application configuration from disk.

use std::path::Path;

use crate::error::Result;
use crate::models::Config;

/// Load configuration from a TOML file, falling back to defaults if the
/// file is absent or malformed.
pub fn load_config(path: &Path) -> Config {
    Config::load_or_default(path)
}

/// Load and validate configuration, refusing to start on invalid values.
pub fn load_validated(path: &Path) -> Result<Config> {
    let config = Config::load_or_default(path);
    config.validate()?;
    Ok(config)
}
