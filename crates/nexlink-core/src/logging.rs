/*!
 * Logging functionality for Nexlink.
 *
 * Tracing setup plus the `Redacted` marker used to keep credential
 * material out of diagnostic output.
 */
use std::fmt;

use serde::Serialize;
use tracing_subscriber::{fmt as tracing_fmt, prelude::*, EnvFilter};

use crate::error::{Error, Result};

/// Initialize the logging system with default configuration
pub fn init() -> Result<()> {
    init_with_filter("info")
}

/// Initialize the logging system with a specific filter
///
/// # Arguments
///
/// * `filter` - The log filter string (e.g., "info", "debug", "nexlink=trace")
pub fn init_with_filter(filter: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    tracing_subscriber::registry()
        .with(tracing_fmt::layer().with_target(true))
        .with(filter)
        .try_init()
        .map_err(|e| Error::logging(format!("Failed to initialize logging: {}", e)))?;

    Ok(())
}

/// A wrapper that hides its contents from all diagnostic output
///
/// Credentials and other sensitive fields are stored behind `Redacted` so
/// that `Debug`/`Display` dumps of configs and errors never leak them.
/// The wrapped value is only reachable through [`Redacted::expose`].
#[derive(Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Redacted<T>(T);

impl<T> Redacted<T> {
    /// Wrap a sensitive value
    pub fn new(value: T) -> Self {
        Self(value)
    }

    /// Get the wrapped value
    pub fn expose(&self) -> &T {
        &self.0
    }

    /// Consume the wrapper and return the value
    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T> fmt::Debug for Redacted<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("***")
    }
}

impl<T> fmt::Display for Redacted<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("***")
    }
}

impl<T> From<T> for Redacted<T> {
    fn from(value: T) -> Self {
        Self::new(value)
    }
}
