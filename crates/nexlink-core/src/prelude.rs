/*!
 * Prelude module for Nexlink Core.
 *
 * Re-exports commonly used types and functions from the Nexlink Core crate
 * to make them easier to import.
 */

// Re-export error types
pub use crate::error::{Error, Result};

// Re-export core types
pub use crate::types::{Id, Metadata, SharedValue, Value};

// Re-export event types
pub use crate::event::{EventBus, EventReceiver, SharedEventBus};

// Re-export config types
pub use crate::config::{Config, ConfigBuilder, NetworkConfig, SharedConfig};

// Re-export logging helpers
pub use crate::logging::Redacted;

// Re-export utility functions
pub use crate::utils::{spawn_and_log, with_retry, with_timeout};

// Re-export logging macros
pub use tracing::{debug, error, info, trace, warn};

// Re-export core initialization
pub use crate::init;
