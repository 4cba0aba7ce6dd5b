//! Config file discovery and parsing.
//!
//! An explicit `--config` path wins. Otherwise the first readable file among
//! [`candidate_paths`] is used, and when none exists the defaults apply (which
//! then fail validation because `upstream_url` has no default).

use std::fs;
use std::path::{Path, PathBuf};

use super::error::ConfigError;
use super::types::{Config, Settings};

pub const CONFIG_FILE_NAME: &str = "config.toml";

/// Locations searched when no explicit path is given, in priority order.
pub fn candidate_paths() -> Vec<PathBuf> {
    let mut paths = vec![
        PathBuf::from(".").join(CONFIG_FILE_NAME),
        PathBuf::from("/etc/llm-proxy").join(CONFIG_FILE_NAME),
    ];
    if let Some(home) = dirs::home_dir() {
        paths.push(home.join(".llm-proxy").join(CONFIG_FILE_NAME));
    }
    paths
}

/// Load and validate settings.
pub fn load(explicit: Option<&Path>) -> Result<Settings, ConfigError> {
    let config = match explicit {
        Some(path) => read_config(path)?,
        None => discover(&candidate_paths())?,
    };
    config.validate()
}

/// Parse the first readable file in `paths`, or return defaults.
pub fn discover(paths: &[PathBuf]) -> Result<Config, ConfigError> {
    for path in paths {
        let Ok(raw) = fs::read_to_string(path) else {
            continue;
        };
        return parse(&raw, path);
    }
    Ok(Config::default())
}

pub fn read_config(path: &Path) -> Result<Config, ConfigError> {
    let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    parse(&raw, path)
}

fn parse(raw: &str, path: &Path) -> Result<Config, ConfigError> {
    toml::from_str(raw).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}
