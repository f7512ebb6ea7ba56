//! EditorLink bridge configuration
//!
//! Defines the `editorlink.toml` format. Every field has a default, so an
//! empty file (or no file at all) yields a working configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// File name looked up in the working directory and the user config dir
pub const CONFIG_FILE_NAME: &str = "editorlink.toml";

/// Error types for configuration loading
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// The main configuration file (editorlink.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct BridgeConfig {
    #[serde(default)]
    pub server: ServerSection,

    #[serde(default)]
    pub coalescing: CoalescingConfig,

    #[serde(default)]
    pub bridge: BridgeSection,
}

/// Listen address
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerSection {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    44780
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Single-flight coalescing settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CoalescingConfig {
    /// Collapse duplicate concurrent requests into one editor operation
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Age after which an unfinished in-flight entry is evicted.
    /// Must cover the slowest legitimate editor operation.
    #[serde(default = "default_stale_timeout_secs")]
    pub stale_timeout_secs: u64,

    /// How often the sweeper looks for stale entries
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

fn default_true() -> bool {
    true
}

fn default_stale_timeout_secs() -> u64 {
    60
}

fn default_sweep_interval_secs() -> u64 {
    5
}

impl Default for CoalescingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            stale_timeout_secs: default_stale_timeout_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

impl CoalescingConfig {
    pub fn stale_timeout(&self) -> Duration {
        Duration::from_secs(self.stale_timeout_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

/// Editor plugin link settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BridgeSection {
    /// Default time a client waits for an editor result
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Long-poll duration for the editor plugin
    #[serde(default = "default_poll_timeout_secs")]
    pub poll_timeout_secs: u64,

    /// Maximum editor requests awaiting a plugin response
    #[serde(default = "default_max_pending_requests")]
    pub max_pending_requests: usize,
}

fn default_request_timeout_secs() -> u64 {
    60
}

fn default_poll_timeout_secs() -> u64 {
    15
}

fn default_max_pending_requests() -> usize {
    256
}

impl Default for BridgeSection {
    fn default() -> Self {
        Self {
            request_timeout_secs: default_request_timeout_secs(),
            poll_timeout_secs: default_poll_timeout_secs(),
            max_pending_requests: default_max_pending_requests(),
        }
    }
}

impl BridgeSection {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_secs(self.poll_timeout_secs)
    }
}

impl BridgeConfig {
    /// Parse a TOML document
    pub fn from_toml_str(content: &str, path: &Path) -> Result<Self, ConfigError> {
        let config: BridgeConfig = toml::from_str(content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a config file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content, path)
    }

    /// Load from an explicit path, else the first config file found, else defaults
    pub fn discover(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = explicit {
            return Self::load(path);
        }
        match find_config_file(Path::new(".")) {
            Some(path) => {
                tracing::info!("Using config {}", path.display());
                Self::load(&path)
            }
            None => Ok(Self::default()),
        }
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.coalescing.stale_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "coalescing.stale_timeout_secs must be greater than 0".to_string(),
            ));
        }
        if self.coalescing.sweep_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "coalescing.sweep_interval_secs must be greater than 0".to_string(),
            ));
        }
        if self.bridge.max_pending_requests == 0 {
            return Err(ConfigError::Invalid(
                "bridge.max_pending_requests must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Find a config file
///
/// Searches for:
/// 1. `editorlink.toml` in `dir`
/// 2. `editorlink/editorlink.toml` in the user config directory
pub fn find_config_file(dir: &Path) -> Option<PathBuf> {
    let local = dir.join(CONFIG_FILE_NAME);
    if local.is_file() {
        return Some(local);
    }
    dirs::config_dir()
        .map(|d| d.join("editorlink").join(CONFIG_FILE_NAME))
        .filter(|p| p.is_file())
}
