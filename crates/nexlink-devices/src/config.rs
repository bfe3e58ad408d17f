/*!
 * Per-device configuration.
 *
 * A [`DeviceConfig`] names the target host, the credentials to present,
 * timeouts, and optionally a fixed [`ConnectionRecipe`]. It is created by
 * the caller or by discovery, owned by the device it configures, and never
 * mutated after device construction.
 */
use std::time::Duration;

use crate::credentials::{Credentials, CredentialsHash};
use crate::error::{DeviceError, Result};
use crate::recipe::ConnectionRecipe;

/// Default timeout for one batched query
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default discovery window
pub const DEFAULT_DISCOVERY_TIMEOUT: Duration = Duration::from_secs(5);

/// Configuration for one device session
#[derive(Debug, Clone)]
pub struct DeviceConfig {
    /// Target hostname or IP address
    pub host: String,
    /// Target port, when it differs from the recipe's default
    pub port: Option<u16>,
    /// Credentials for the authentication handshake, if required
    pub credentials: Option<Credentials>,
    /// Precomputed credential hash, for firmwares that accept one
    pub credentials_hash: Option<CredentialsHash>,
    /// Timeout for one batched query
    pub timeout: Duration,
    /// Timeout for the discovery probe targeting this host
    pub discovery_timeout: Duration,
    /// A fixed recipe, skipping negotiation when known in advance
    pub connection: Option<ConnectionRecipe>,
}

impl DeviceConfig {
    /// Start building a config for the given host
    pub fn builder<S: Into<String>>(host: S) -> DeviceConfigBuilder {
        DeviceConfigBuilder::new(host)
    }

    /// Create a config with defaults for the given host
    pub fn new<S: Into<String>>(host: S) -> Result<Self> {
        Self::builder(host).build()
    }
}

/// Builder for [`DeviceConfig`]
#[derive(Debug, Clone)]
pub struct DeviceConfigBuilder {
    host: String,
    port: Option<u16>,
    credentials: Option<Credentials>,
    credentials_hash: Option<CredentialsHash>,
    timeout: Duration,
    discovery_timeout: Duration,
    connection: Option<ConnectionRecipe>,
}

impl DeviceConfigBuilder {
    /// Create a new builder for the given host
    pub fn new<S: Into<String>>(host: S) -> Self {
        Self {
            host: host.into(),
            port: None,
            credentials: None,
            credentials_hash: None,
            timeout: DEFAULT_TIMEOUT,
            discovery_timeout: DEFAULT_DISCOVERY_TIMEOUT,
            connection: None,
        }
    }

    /// Set an explicit port
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Set the credentials
    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// Set a precomputed credential hash
    pub fn with_credentials_hash(mut self, hash: CredentialsHash) -> Self {
        self.credentials_hash = Some(hash);
        self
    }

    /// Set the query timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the discovery timeout
    pub fn with_discovery_timeout(mut self, timeout: Duration) -> Self {
        self.discovery_timeout = timeout;
        self
    }

    /// Fix the connection recipe, skipping negotiation
    pub fn with_connection(mut self, recipe: ConnectionRecipe) -> Self {
        self.connection = Some(recipe);
        self
    }

    /// Validate and build the config
    pub fn build(self) -> Result<DeviceConfig> {
        if self.host.trim().is_empty() {
            return Err(DeviceError::configuration("Device host must not be empty"));
        }
        if self.port == Some(0) {
            return Err(DeviceError::configuration("Device port must not be 0"));
        }
        if self.timeout.is_zero() {
            return Err(DeviceError::configuration("Query timeout must not be zero"));
        }

        Ok(DeviceConfig {
            host: self.host,
            port: self.port,
            credentials: self.credentials,
            credentials_hash: self.credentials_hash,
            timeout: self.timeout,
            discovery_timeout: self.discovery_timeout,
            connection: self.connection,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recipe::ConnectionRecipe;

    #[test]
    fn test_defaults() {
        let config = DeviceConfig::new("10.0.0.5").unwrap();
        assert_eq!(config.host, "10.0.0.5");
        assert_eq!(config.port, None);
        assert_eq!(config.timeout, DEFAULT_TIMEOUT);
        assert!(config.connection.is_none());
    }

    #[test]
    fn test_builder() {
        let recipe = ConnectionRecipe::candidates()[0];
        let config = DeviceConfig::builder("hub.local")
            .with_port(8443)
            .with_credentials(Credentials::new("admin", "secret"))
            .with_timeout(Duration::from_secs(2))
            .with_connection(recipe)
            .build()
            .unwrap();

        assert_eq!(config.port, Some(8443));
        assert_eq!(config.timeout, Duration::from_secs(2));
        assert_eq!(config.connection, Some(recipe));
        assert_eq!(config.credentials.as_ref().unwrap().username, "admin");
    }

    #[test]
    fn test_empty_host_rejected() {
        let err = DeviceConfig::new("  ").unwrap_err();
        assert!(matches!(err, DeviceError::Configuration(_)));
    }

    #[test]
    fn test_zero_port_rejected() {
        let err = DeviceConfig::builder("host").with_port(0).build().unwrap_err();
        assert!(matches!(err, DeviceError::Configuration(_)));
    }

    #[test]
    fn test_credentials_not_leaked_by_debug() {
        let config = DeviceConfig::builder("host")
            .with_credentials(Credentials::new("admin", "hunter2"))
            .build()
            .unwrap();
        let dump = format!("{:?}", config);
        assert!(!dump.contains("hunter2"));
    }
}
