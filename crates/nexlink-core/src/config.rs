/*!
 * Configuration management for Nexlink.
 *
 * Library-level defaults for the device session layer: query and discovery
 * timeouts, discovery port and broadcast address, and the concurrency limit
 * applied during broadcast discovery. Values can be overridden from a file
 * and from `NEXLINK__`-prefixed environment variables.
 */
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use config::{Config as ConfigLib, Environment, File};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Error, Result};

/// Core configuration for Nexlink
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Network configuration
    #[serde(default)]
    pub network: NetworkConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Network configuration for device sessions and discovery
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Timeout for a single batched query in milliseconds
    #[serde(default = "default_query_timeout_ms")]
    pub query_timeout_ms: u64,

    /// Timeout for a single connection-negotiation attempt in milliseconds
    #[serde(default = "default_attempt_timeout_ms")]
    pub attempt_timeout_ms: u64,

    /// Length of the discovery listening window in milliseconds
    #[serde(default = "default_discovery_timeout_ms")]
    pub discovery_timeout_ms: u64,

    /// UDP port that discovery probes are sent to
    #[serde(default = "default_discovery_port")]
    pub discovery_port: u16,

    /// Broadcast address used for network-wide discovery
    #[serde(default = "default_broadcast_address")]
    pub broadcast_address: String,

    /// Maximum number of hosts being connected/updated concurrently
    /// during broadcast discovery
    #[serde(default = "default_discovery_concurrency")]
    pub discovery_concurrency: usize,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Whether to log to stdout
    #[serde(default = "default_log_stdout")]
    pub stdout: bool,
}

impl NetworkConfig {
    /// Query timeout as a `Duration`
    pub fn query_timeout(&self) -> Duration {
        Duration::from_millis(self.query_timeout_ms)
    }

    /// Negotiation attempt timeout as a `Duration`
    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_millis(self.attempt_timeout_ms)
    }

    /// Discovery window as a `Duration`
    pub fn discovery_timeout(&self) -> Duration {
        Duration::from_millis(self.discovery_timeout_ms)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            network: NetworkConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            query_timeout_ms: default_query_timeout_ms(),
            attempt_timeout_ms: default_attempt_timeout_ms(),
            discovery_timeout_ms: default_discovery_timeout_ms(),
            discovery_port: default_discovery_port(),
            broadcast_address: default_broadcast_address(),
            discovery_concurrency: default_discovery_concurrency(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            stdout: default_log_stdout(),
        }
    }
}

fn default_query_timeout_ms() -> u64 {
    5_000
}

fn default_attempt_timeout_ms() -> u64 {
    5_000
}

fn default_discovery_timeout_ms() -> u64 {
    5_000
}

fn default_discovery_port() -> u16 {
    20002
}

fn default_broadcast_address() -> String {
    "255.255.255.255".to_string()
}

fn default_discovery_concurrency() -> usize {
    8
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_stdout() -> bool {
    true
}

/// A builder for creating a configuration
#[derive(Debug, Default)]
pub struct ConfigBuilder {
    config_file: Option<String>,
    environment_prefix: Option<String>,
}

impl ConfigBuilder {
    /// Create a new ConfigBuilder
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the config file path
    pub fn with_config_file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_file = Some(path.as_ref().to_string_lossy().to_string());
        self
    }

    /// Set the environment variable prefix for configuration
    pub fn with_environment_prefix<S: AsRef<str>>(mut self, prefix: S) -> Self {
        self.environment_prefix = Some(prefix.as_ref().to_string());
        self
    }

    /// Build the configuration
    pub fn build(self) -> Result<Config> {
        let mut config_builder = ConfigLib::builder();

        // Start with default values
        let default_config = Config::default();
        config_builder = config_builder.add_source(
            config::Config::try_from(&default_config)
                .map_err(|e| Error::config(format!("Failed to create default config: {}", e)))?,
        );

        // Add configuration from file if specified
        if let Some(config_file) = self.config_file {
            let path = Path::new(&config_file);
            if path.exists() {
                debug!("Loading configuration from {}", config_file);
                config_builder = config_builder.add_source(File::with_name(&config_file));
            } else {
                debug!("Configuration file {} does not exist, using defaults", config_file);
            }
        }

        // Add configuration from environment variables if prefix is specified
        if let Some(prefix) = self.environment_prefix {
            debug!("Loading configuration from environment variables with prefix {}", prefix);
            config_builder = config_builder.add_source(
                Environment::with_prefix(&prefix)
                    .separator("__")
                    .try_parsing(true),
            );
        }

        let config_lib = config_builder
            .build()
            .map_err(|e| Error::config(format!("Failed to build configuration: {}", e)))?;

        let config: Config = config_lib
            .try_deserialize()
            .map_err(|e| Error::config(format!("Failed to deserialize configuration: {}", e)))?;

        info!("Configuration loaded successfully");
        Ok(config)
    }
}

/// A thread-safe reference to a configuration
#[derive(Debug, Clone)]
pub struct SharedConfig(Arc<Config>);

impl SharedConfig {
    /// Create a new SharedConfig
    pub fn new(config: Config) -> Self {
        Self(Arc::new(config))
    }

    /// Get a reference to the config
    pub fn get(&self) -> &Config {
        &self.0
    }
}

impl From<Config> for SharedConfig {
    fn from(config: Config) -> Self {
        Self::new(config)
    }
}

impl AsRef<Config> for SharedConfig {
    fn as_ref(&self) -> &Config {
        self.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::fs::File;
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.network.query_timeout_ms, 5_000);
        assert_eq!(config.network.discovery_port, 20002);
        assert_eq!(config.network.broadcast_address, "255.255.255.255");
        assert_eq!(config.network.discovery_concurrency, 8);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_duration_accessors() {
        let config = Config::default();
        assert_eq!(config.network.query_timeout(), Duration::from_secs(5));
        assert_eq!(config.network.discovery_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_config_builder_defaults() {
        let config = ConfigBuilder::new().build().unwrap();
        assert_eq!(config.network.discovery_port, 20002);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_config_builder_with_file() -> Result<()> {
        let dir = tempdir().map_err(|e| Error::other(e.to_string()))?;
        let file_path = dir.path().join("config.toml");

        {
            let mut file = File::create(&file_path).map_err(|e| Error::other(e.to_string()))?;
            file.write_all(
                br#"
                [network]
                query_timeout_ms = 1500
                discovery_port = 9999

                [logging]
                level = "debug"
            "#,
            )
            .map_err(|e| Error::other(e.to_string()))?;
        }

        let config = ConfigBuilder::new().with_config_file(file_path).build()?;

        assert_eq!(config.network.query_timeout_ms, 1500);
        assert_eq!(config.network.discovery_port, 9999);
        assert_eq!(config.logging.level, "debug");
        // Untouched fields keep their defaults
        assert_eq!(config.network.discovery_concurrency, 8);

        Ok(())
    }

    #[test]
    fn test_config_builder_with_env() -> Result<()> {
        env::set_var("NEXLINK__NETWORK__DISCOVERY_PORT", "7654");
        env::set_var("NEXLINK__LOGGING__LEVEL", "trace");

        let config = ConfigBuilder::new()
            .with_environment_prefix("nexlink")
            .build()?;

        assert_eq!(config.network.discovery_port, 7654);
        assert_eq!(config.logging.level, "trace");

        env::remove_var("NEXLINK__NETWORK__DISCOVERY_PORT");
        env::remove_var("NEXLINK__LOGGING__LEVEL");

        Ok(())
    }

    #[test]
    fn test_shared_config() {
        let shared = SharedConfig::new(Config::default());
        assert_eq!(shared.get().network.discovery_port, 20002);

        let shared2 = shared.clone();
        assert_eq!(shared2.get().network.discovery_port, 20002);
    }
}
