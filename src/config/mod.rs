//! Configuration management for ClipRelay
//!
//! This module handles loading, validating, and managing configuration
//! for the ClipRelay client.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::auth::{SharedKey, KEY_HEX_LEN};
use crate::transport::{TransportConfig, TransportKind};

/// Environment variable naming an explicit config file
pub const CONFIG_ENV: &str = "CLIPRELAY_CONFIG";

const MIN_WATCH_INTERVAL_MS: u64 = 10;
const MAX_WATCH_INTERVAL_MS: u64 = 60_000;
const MIN_REQUEST_TIMEOUT_SECS: u64 = 1;
const MAX_REQUEST_TIMEOUT_SECS: u64 = 300;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// IO error reading config file
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parsing error
    #[error("Failed to parse TOML: {0}")]
    Toml(#[from] toml::de::Error),

    /// TOML rendering error
    #[error("Failed to render TOML: {0}")]
    Render(#[from] toml::ser::Error),

    /// Validation error
    #[error("Config validation failed: {0}")]
    Validation(String),
}

/// Main configuration structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Relay URL (http, https, ws or wss)
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Shared key, 16 hex characters
    #[serde(default)]
    pub shared_key: String,

    /// Short client id; a random one is generated per run when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,

    /// Transport to use
    #[serde(default)]
    pub transport: TransportKind,

    /// Clipboard watch interval in milliseconds
    #[serde(default = "default_watch_interval_ms")]
    pub watch_interval_ms: u64,

    /// HTTP request timeout in seconds
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Log level
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

// Default value functions
fn default_endpoint() -> String {
    "http://localhost:5002/clip".to_string()
}

fn default_watch_interval_ms() -> u64 {
    200
}

fn default_request_timeout_secs() -> u64 {
    15
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            shared_key: String::new(),
            device_id: None,
            transport: TransportKind::default(),
            watch_interval_ms: default_watch_interval_ms(),
            request_timeout_secs: default_request_timeout_secs(),
            log_level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from default locations
    ///
    /// Checks in order:
    /// 1. Path from CLIPRELAY_CONFIG environment variable
    /// 2. ~/.config/cliprelay/config.toml
    /// 3. Falls back to defaults
    ///
    pub fn load() -> Result<Self, ConfigError> {
        match Self::find_config_path() {
            Some(path) => Self::load_from_path(&path),
            None => Ok(Self::default()),
        }
    }

    /// Load configuration with optional custom path
    pub fn load_config(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        match config_path {
            Some(path) => Self::load_from_path(path),
            None => Self::load(),
        }
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    /// Load `path` and require it to be complete on its own
    pub fn load_validated(path: &Path) -> Result<Self, ConfigError> {
        let config = Self::load_from_path(path)?;
        config.validate_config()?;
        Ok(config)
    }

    /// Parse configuration from TOML string.
    ///
    /// Not validated: command-line overrides may still fill in or replace
    /// values, so callers validate the final result.
    pub fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(toml_str)?)
    }

    /// Default config file location
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("cliprelay").join("config.toml"))
    }

    /// Find configuration file path
    fn find_config_path() -> Option<PathBuf> {
        if let Ok(path) = std::env::var(CONFIG_ENV) {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        Self::default_path().filter(|p| p.exists())
    }

    /// Validate configuration values
    pub fn validate_config(&self) -> Result<(), ConfigError> {
        if self.shared_key.is_empty() {
            return Err(ConfigError::Validation(
                "shared_key is not set; every client of one relay needs the same 16 hex character key"
                    .to_string(),
            ));
        }
        if self.shared_key.len() != KEY_HEX_LEN || SharedKey::from_hex(&self.shared_key).is_err() {
            return Err(ConfigError::Validation(format!(
                "shared_key must be exactly {KEY_HEX_LEN} hex characters"
            )));
        }

        let url = reqwest::Url::parse(&self.endpoint).map_err(|e| {
            ConfigError::Validation(format!("endpoint '{}' is not a URL: {e}", self.endpoint))
        })?;
        if !matches!(url.scheme(), "http" | "https" | "ws" | "wss") {
            return Err(ConfigError::Validation(format!(
                "endpoint scheme '{}' must be http, https, ws or wss",
                url.scheme()
            )));
        }
        if url.host_str().is_none() {
            return Err(ConfigError::Validation(format!(
                "endpoint '{}' has no host",
                self.endpoint
            )));
        }

        if !(MIN_WATCH_INTERVAL_MS..=MAX_WATCH_INTERVAL_MS).contains(&self.watch_interval_ms) {
            return Err(ConfigError::Validation(format!(
                "watch_interval_ms must be between {MIN_WATCH_INTERVAL_MS} and {MAX_WATCH_INTERVAL_MS}"
            )));
        }

        if !(MIN_REQUEST_TIMEOUT_SECS..=MAX_REQUEST_TIMEOUT_SECS)
            .contains(&self.request_timeout_secs)
        {
            return Err(ConfigError::Validation(format!(
                "request_timeout_secs must be between {MIN_REQUEST_TIMEOUT_SECS} and {MAX_REQUEST_TIMEOUT_SECS}"
            )));
        }

        if let Some(id) = &self.device_id {
            if id.trim().is_empty() {
                return Err(ConfigError::Validation(
                    "device_id must not be blank".to_string(),
                ));
            }
        }

        Ok(())
    }

    /// Clipboard watch interval
    pub fn watch_interval(&self) -> Duration {
        Duration::from_millis(self.watch_interval_ms)
    }

    /// Transport tunables derived from this config
    pub fn transport_config(&self) -> TransportConfig {
        TransportConfig {
            request_timeout: Duration::from_secs(self.request_timeout_secs),
            ..TransportConfig::default()
        }
    }

    /// Save configuration to the default location
    pub fn save(&self) -> Result<PathBuf, ConfigError> {
        let path = Self::default_path().ok_or_else(|| {
            ConfigError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "Could not find config directory",
            ))
        })?;
        self.save_to(&path)?;
        Ok(path)
    }

    /// Save configuration to `path`, creating parent directories
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, toml::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Write the example config to `path` unless one exists
    pub fn generate_example_config(path: &Path, force: bool) -> Result<(), ConfigError> {
        if !force && path.exists() {
            return Err(ConfigError::Validation(format!(
                "Config file {} already exists. Use --force to overwrite.",
                path.display()
            )));
        }

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, Self::generate_example())?;
        Ok(())
    }

    /// Generate example configuration file with a fresh random shared key
    pub fn generate_example() -> String {
        let config = Config::default();
        let key = hex::encode(rand::random::<[u8; KEY_HEX_LEN / 2]>());

        format!(
            r#"# ClipRelay Configuration File
# Location: ~/.config/cliprelay/config.toml

# Relay URL. http(s) endpoints work for both transports.
endpoint = "{}"

# Shared key (16 hex characters). Copy this file to every machine
# that should share a clipboard.
shared_key = "{}"

# Short id of this machine; random per run when unset
# device_id = "laptop01"

# Transport: "poll" (chunked HTTP) or "stream" (WebSocket)
transport = "{}"

# How often the local clipboard is checked, in milliseconds
watch_interval_ms = {}

# HTTP request timeout in seconds
request_timeout_secs = {}

# Logging level (trace, debug, info, warn, error)
log_level = "{}"
"#,
            config.endpoint,
            key,
            config.transport,
            config.watch_interval_ms,
            config.request_timeout_secs,
            config.log_level
        )
    }
}
