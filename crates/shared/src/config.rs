//! Configuration management for site autoconfiguration.
//!
//! This module handles loading and parsing configuration from TOML files,
//! with sensible defaults for all settings.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Data directory settings
    pub data: DataConfig,

    /// Logging settings
    pub logging: LoggingConfig,

    /// Outbound HTTP settings
    #[serde(default)]
    pub http: HttpConfig,

    /// Endpoint discovery settings
    #[serde(default)]
    pub discovery: DiscoveryConfig,

    /// Analysis run settings
    #[serde(default)]
    pub autoconfig: AutoconfigConfig,
}

/// Data directory configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataConfig {
    /// Root data directory path
    pub root_dir: String,

    /// Provider store directory (relative to data directory or absolute)
    #[serde(default = "default_providers_dir")]
    pub providers_dir: String,
}

fn default_providers_dir() -> String {
    "providers".to_string()
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log directory path (relative to data directory or absolute)
    pub log_dir: String,

    /// Default log level (trace, debug, info, warn, error)
    pub default_level: String,

    /// Enable console output
    pub console: bool,

    /// Enable file output
    pub file: bool,

    /// Enable JSON formatting for file logs
    pub json_format: bool,
}

/// Outbound HTTP configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// User agent sent with every request
    pub user_agent: String,

    /// Per-request timeout in seconds
    pub request_timeout_secs: u64,

    /// Maximum retries for transient failures (429, 5xx, transport)
    pub max_retries: u32,

    /// Base delay for retry (exponential backoff)
    pub retry_delay_ms: u64,

    /// Politeness limit: requests per second against a single host
    pub requests_per_second: f64,

    /// Response bodies are truncated to this many bytes
    pub max_body_bytes: usize,
}

/// Endpoint discovery configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    /// Worker cap for concurrent endpoint probes
    pub max_concurrent_probes: usize,

    /// Maximum JSON depth walked by the pattern matcher
    pub max_json_depth: usize,

    /// Number of array elements sampled per candidate entity list
    pub sample_size: usize,

    /// Extra REST path templates to probe (use `{query}` for the test term)
    #[serde(default)]
    pub extra_rest_paths: Vec<String>,

    /// Search term used when probing and validating
    pub default_test_query: String,
}

/// Analysis run configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutoconfigConfig {
    /// Whole-run timeout in seconds
    pub default_timeout_secs: u64,

    /// Minimum score a specialised template needs before it is tried
    pub template_threshold: u8,

    /// Persist configs whose validation failed
    pub save_partial: bool,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            user_agent: "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36".to_string(),
            request_timeout_secs: 15,
            max_retries: 1,
            retry_delay_ms: 500,
            requests_per_second: 4.0,
            max_body_bytes: 2 * 1024 * 1024,
        }
    }
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            max_concurrent_probes: 6,
            max_json_depth: 8,
            sample_size: 20,
            extra_rest_paths: Vec::new(),
            default_test_query: "test".to_string(),
        }
    }
}

impl Default for AutoconfigConfig {
    fn default() -> Self {
        Self {
            default_timeout_secs: 60,
            template_threshold: 40,
            save_partial: false,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data: DataConfig {
                root_dir: "data".to_string(),
                providers_dir: default_providers_dir(),
            },
            logging: LoggingConfig {
                log_dir: "logs".to_string(),
                default_level: "info".to_string(),
                console: true,
                file: true,
                json_format: false,
            },
            http: HttpConfig::default(),
            discovery: DiscoveryConfig::default(),
            autoconfig: AutoconfigConfig::default(),
        }
    }
}

impl HttpConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl AutoconfigConfig {
    pub fn default_timeout(&self) -> Duration {
        Duration::from_secs(self.default_timeout_secs)
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// If the file doesn't exist, returns the default configuration.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            tracing::warn!(
                path = %path.display(),
                "Config file not found, using defaults"
            );
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        tracing::info!(
            path = %path.display(),
            "Configuration loaded successfully"
        );

        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        let content = toml::to_string_pretty(self)
            .context("Failed to serialize configuration")?;

        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        tracing::info!(
            path = %path.display(),
            "Configuration saved successfully"
        );

        Ok(())
    }

    /// Get the path for the data directory
    pub fn data_dir(&self) -> PathBuf {
        PathBuf::from(&self.data.root_dir)
    }

    /// Get the absolute path for the log directory
    pub fn log_dir(&self) -> PathBuf {
        self.resolve(&self.logging.log_dir)
    }

    /// Get the path for the provider store directory
    pub fn providers_dir(&self) -> PathBuf {
        self.resolve(&self.data.providers_dir)
    }

    fn resolve(&self, value: &str) -> PathBuf {
        let path = Path::new(value);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.data_dir().join(path)
        }
    }
}
