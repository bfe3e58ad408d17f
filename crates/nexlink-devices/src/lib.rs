/*!
 * Nexlink Devices
 *
 * This crate is the device session layer of the Nexlink client:
 * connection-recipe negotiation, transports and wire protocols, the
 * module/feature composition over one batched query cycle, child-device
 * delegation, and discovery.
 */

#![warn(missing_docs)]

// Re-export core types
pub use nexlink_core::prelude;

pub mod child;
pub mod config;
pub mod connect;
pub mod credentials;
pub mod device;
pub mod discovery;
pub mod error;
pub mod feature;
pub mod module;
pub mod modules;
pub mod protocol;
pub mod protocols;
pub mod recipe;
pub mod transport;
pub mod transports;

pub use child::{ChildDevice, DelegatedRefresh};
pub use config::{DeviceConfig, DeviceConfigBuilder};
pub use connect::{connect, try_connect_all, Connector, TcpConnector};
pub use credentials::{Credentials, CredentialsHash};
pub use device::{Device, DeviceEvent};
pub use discovery::{
    BroadcastDiscovery, Discoverer, DiscoveryEvent, DiscoveryOptions, DiscoveryResult,
    SingleDiscovery,
};
pub use error::{DeviceError, Result};
pub use feature::{Feature, FeatureCategory, FeatureKind};
pub use module::{Module, ModuleCatalog};
pub use recipe::{ConnectionRecipe, DeviceFamily, ProtocolKind, TransportKind};

/// Nexlink devices crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize the device session layer
pub fn init() -> Result<()> {
    tracing::info!("Nexlink Devices {} initialized", VERSION);
    Ok(())
}
