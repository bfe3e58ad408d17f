/*!
 * Error types for the Nexlink devices crate.
 */
use thiserror::Error;

use crate::discovery::DiscoveryResult;
use crate::recipe::ConnectionRecipe;

/// One failed connection-negotiation attempt
#[derive(Debug, Clone)]
pub struct AttemptFailure {
    /// The candidate that was tried
    pub recipe: ConnectionRecipe,
    /// Why the attempt failed
    pub reason: String,
    /// Whether the failure was a credential rejection
    pub authentication: bool,
}

impl std::fmt::Display for AttemptFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.recipe, self.reason)
    }
}

/// Error type for Nexlink device operations
#[derive(Error, Debug)]
pub enum DeviceError {
    /// The transport is unreachable or the connection was lost
    #[error("Connection error: {0}")]
    Connection(String),

    /// A network operation exceeded its deadline
    #[error("Timeout: {0}")]
    Timeout(String),

    /// The device rejected the supplied credentials
    #[error("Authentication error: {0}")]
    Authentication(String),

    /// The device responded but no known recipe or module set matches
    #[error("Unsupported device: {message}")]
    UnsupportedDevice {
        /// Human-readable reason
        message: String,
        /// Raw discovery data, when a reply could be decoded
        discovery: Option<Box<DiscoveryResult>>,
    },

    /// A device-side application error code for one query key
    #[error("Device error for '{key}': code {code}")]
    Device {
        /// The query key the device rejected
        key: String,
        /// The device-reported error code
        code: i64,
    },

    /// Duplicate module query keys, malformed device config, and similar
    /// caller mistakes
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Every negotiation candidate was tried and none produced a working
    /// device session
    #[error("No working connection ({} candidates tried)", attempts.len())]
    NoWorkingConnection {
        /// Per-candidate diagnostics, in the order the candidates were tried
        attempts: Vec<AttemptFailure>,
    },

    /// A refresh was requested on a child device outside a delegation scope
    #[error("Refresh not delegated: {0}")]
    NotDelegated(String),

    /// Wire payload could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Core error
    #[error("Core error: {0}")]
    Core(#[from] nexlink_core::error::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for Nexlink device operations
pub type Result<T> = std::result::Result<T, DeviceError>;

impl DeviceError {
    /// Create a new connection error
    pub fn connection<S: AsRef<str>>(msg: S) -> Self {
        DeviceError::Connection(msg.as_ref().to_string())
    }

    /// Create a new timeout error
    pub fn timeout<S: AsRef<str>>(msg: S) -> Self {
        DeviceError::Timeout(msg.as_ref().to_string())
    }

    /// Create a new authentication error
    pub fn authentication<S: AsRef<str>>(msg: S) -> Self {
        DeviceError::Authentication(msg.as_ref().to_string())
    }

    /// Create a new unsupported-device error without discovery data
    pub fn unsupported<S: AsRef<str>>(msg: S) -> Self {
        DeviceError::UnsupportedDevice {
            message: msg.as_ref().to_string(),
            discovery: None,
        }
    }

    /// Create a new unsupported-device error carrying the decoded reply
    pub fn unsupported_with<S: AsRef<str>>(msg: S, discovery: DiscoveryResult) -> Self {
        DeviceError::UnsupportedDevice {
            message: msg.as_ref().to_string(),
            discovery: Some(Box::new(discovery)),
        }
    }

    /// Create a new configuration error
    pub fn configuration<S: AsRef<str>>(msg: S) -> Self {
        DeviceError::Configuration(msg.as_ref().to_string())
    }

    /// Create a new serialization error
    pub fn serialization<S: AsRef<str>>(msg: S) -> Self {
        DeviceError::Serialization(msg.as_ref().to_string())
    }

    /// Whether the error indicates rejected credentials
    pub fn is_authentication(&self) -> bool {
        matches!(self, DeviceError::Authentication(_))
    }
}

impl From<serde_json::Error> for DeviceError {
    fn from(err: serde_json::Error) -> Self {
        DeviceError::Serialization(err.to_string())
    }
}
