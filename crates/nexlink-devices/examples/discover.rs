//! Broadcast-discover devices on the local network, connect to each one
//! and print its features.
//!
//! Usage: `cargo run --example discover [broadcast-address]`

use std::sync::Arc;

use nexlink_devices::discovery::{Discoverer, DiscoveryOptions};
use nexlink_devices::TcpConnector;

use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    nexlink_core::logging::init()?;

    let mut options = DiscoveryOptions::default();
    if let Some(address) = std::env::args().nth(1) {
        options.broadcast_address = address;
    }
    info!(
        "Discovering on {}:{} for {:?}",
        options.broadcast_address, options.port, options.timeout
    );

    let connector = Arc::new(TcpConnector::new());
    let discoverer = Discoverer::new(connector).with_options(options);
    let sweep = discoverer.discover().await;

    for (host, device) in &sweep.devices {
        println!("{} ({})", host, device.recipe().await);
        for feature in device.features().await {
            let value = device.feature_value(feature.id.as_str()).await;
            match value {
                Ok(value) => println!("  {} = {:?}", feature.name, value),
                Err(e) => println!("  {} = <{}>", feature.name, e),
            }
        }
        device.disconnect().await?;
    }
    for unsupported in &sweep.unsupported {
        println!("{}: unsupported ({})", unsupported.host, unsupported.reason);
    }
    for auth in &sweep.auth_failed {
        println!("{}: authentication failed", auth.host);
    }

    if sweep.devices.is_empty() && sweep.unsupported.is_empty() && sweep.auth_failed.is_empty() {
        println!("No devices answered");
    }
    Ok(())
}
