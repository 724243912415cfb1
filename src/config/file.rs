//! Configuration file loading

use super::Config;
use anyhow::{Context, Result};
use std::path::Path;
use tracing::debug;

/// Default config file locations
const CONFIG_PATHS: &[&str] = &["/etc/tornet/config.toml", "./tornet.toml"];

/// Load configuration from an explicit path, a default location, or built-in defaults
pub fn load_config(explicit: Option<&Path>) -> Result<Config> {
    if let Some(path) = explicit {
        return load_from_path(path);
    }

    match find_config_file() {
        Some(path) => load_from_path(Path::new(path)),
        None => {
            debug!("No configuration file found, using defaults");
            let config = Config::default();
            super::validate(&config)?;
            Ok(config)
        },
    }
}

/// Find first existing config file
fn find_config_file() -> Option<&'static str> {
    CONFIG_PATHS
        .iter()
        .copied()
        .find(|path| Path::new(path).exists())
}

/// Load and parse config from path
pub fn load_from_path(path: &Path) -> Result<Config> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&contents)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

    super::validate(&config)?;

    debug!("Loaded configuration from {}", path.display());
    Ok(config)
}
