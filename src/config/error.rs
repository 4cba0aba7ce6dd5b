//! Startup configuration errors.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that stop the proxy before it opens a listener.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An explicitly requested config file could not be read
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The config file is not valid TOML for the expected shape
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("upstream_url is required")]
    MissingUpstreamUrl,

    #[error("invalid upstream URL '{url}': {reason}")]
    InvalidUpstreamUrl { url: String, reason: String },

    #[error("invalid log level '{0}' (expected debug, info, warn or error)")]
    InvalidLogLevel(String),

    #[error("invalid port '{0}'")]
    InvalidPort(String),

    /// The key contains bytes that cannot appear in an HTTP header
    #[error("upstream_api_key is not a valid header value")]
    InvalidApiKey,
}
