use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use axum::http::HeaderValue;
use serde::{Deserialize, Serialize};
use url::Url;

use super::error::ConfigError;

/// Raw configuration as read from `config.toml`.
///
/// The camelCase key spellings of the older YAML layout are accepted too.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Listening port (default: "4000").
    #[serde(default = "default_port")]
    pub port: String,
    /// Base URL of the upstream API (e.g., "https://api.openai.com").
    #[serde(default, alias = "upstreamURL")]
    pub upstream_url: String,
    /// Credential sent upstream as `Authorization: Bearer <key>`.
    #[serde(default, alias = "upstreamAPIKey")]
    pub upstream_api_key: Option<String>,
    /// Local alias -> upstream model identifier.
    #[serde(default, alias = "modelMappings")]
    pub model_mappings: HashMap<String, String>,
    /// One of "debug", "info", "warn", "error" (default: "info").
    #[serde(default, alias = "logLevel")]
    pub log_level: Option<String>,
}

fn default_port() -> String {
    "4000".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: default_port(),
            upstream_url: String::new(),
            upstream_api_key: None,
            model_mappings: HashMap::new(),
            log_level: None,
        }
    }
}

impl Config {
    /// Check every field and produce the settings the proxy runs with.
    pub fn validate(self) -> Result<Settings, ConfigError> {
        let raw_url = self.upstream_url.trim();
        if raw_url.is_empty() {
            return Err(ConfigError::MissingUpstreamUrl);
        }

        let upstream_url = Url::parse(raw_url).map_err(|e| ConfigError::InvalidUpstreamUrl {
            url: raw_url.to_string(),
            reason: e.to_string(),
        })?;
        if !upstream_url.has_host() {
            return Err(ConfigError::InvalidUpstreamUrl {
                url: raw_url.to_string(),
                reason: "URL has no host".to_string(),
            });
        }

        let port = self
            .port
            .trim()
            .parse::<u16>()
            .map_err(|_| ConfigError::InvalidPort(self.port.clone()))?;

        let log_level = match self.log_level.as_deref().map(str::trim) {
            None | Some("") => LogLevel::default(),
            Some(raw) => raw.parse()?,
        };

        let upstream_api_key = self.upstream_api_key.filter(|key| !key.is_empty());
        if let Some(key) = upstream_api_key.as_deref() {
            if HeaderValue::from_str(&format!("Bearer {key}")).is_err() {
                return Err(ConfigError::InvalidApiKey);
            }
        }

        Ok(Settings {
            port,
            upstream_url,
            upstream_api_key,
            model_mappings: self.model_mappings,
            log_level,
        })
    }
}

/// Validated settings consumed by the proxy.
#[derive(Clone)]
pub struct Settings {
    pub port: u16,
    pub upstream_url: Url,
    pub upstream_api_key: Option<String>,
    pub model_mappings: HashMap<String, String>,
    pub log_level: LogLevel,
}

impl fmt::Debug for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Settings")
            .field("port", &self.port)
            .field("upstream_url", &self.upstream_url.as_str())
            .field(
                "upstream_api_key",
                &self.upstream_api_key.as_ref().map(|_| "<redacted>"),
            )
            .field("model_mappings", &self.model_mappings)
            .field("log_level", &self.log_level)
            .finish()
    }
}

/// Log verbosity accepted in `log_level`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl FromStr for LogLevel {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            _ => Err(ConfigError::InvalidLogLevel(s.to_string())),
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
