/*!
 * Credential types for device authentication.
 *
 * Credentials are opaque to this crate: they are handed to the transport
 * performing the authentication handshake and are never logged in
 * cleartext. Diagnostic output goes through [`Redacted`].
 */
use serde::Serialize;

use nexlink_core::logging::Redacted;

/// Username/password credentials for a device
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Credentials {
    /// The account username
    pub username: String,
    /// The account password, redacted in all diagnostic output
    pub password: Redacted<String>,
}

impl Credentials {
    /// Create a new set of credentials
    pub fn new<U: Into<String>, P: Into<String>>(username: U, password: P) -> Self {
        Self {
            username: username.into(),
            password: Redacted::new(password.into()),
        }
    }

    /// Get the password in cleartext
    ///
    /// Only transports performing an authentication handshake should
    /// call this.
    pub fn password(&self) -> &str {
        self.password.expose()
    }
}

/// A precomputed, caller-supplied credential hash
///
/// Some device firmwares authenticate against a hash rather than the raw
/// credentials. The hash algorithm is device-specific and not fixed by
/// this crate; the value is treated as opaque.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CredentialsHash(Redacted<String>);

impl CredentialsHash {
    /// Wrap a precomputed credential hash
    pub fn new<S: Into<String>>(hash: S) -> Self {
        Self(Redacted::new(hash.into()))
    }

    /// Get the hash value
    pub fn as_str(&self) -> &str {
        self.0.expose()
    }
}
