/*!
 * Connection negotiation.
 *
 * Negotiation walks the fixed candidate list from
 * [`ConnectionRecipe::candidates`] in order, attempts each recipe the
 * connector supports, and settles on the first one that yields a device
 * whose initial refresh succeeds. Every failed attempt is recorded; when
 * the whole list is exhausted the caller gets
 * [`DeviceError::NoWorkingConnection`] carrying per-attempt diagnostics.
 */
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use nexlink_core::event::SharedEventBus;

use crate::config::DeviceConfig;
use crate::device::Device;
use crate::error::{AttemptFailure, DeviceError, Result};
use crate::module::ModuleCatalog;
use crate::protocol::Protocol;
use crate::protocols::{CompositeProtocol, LegacyProtocol};
use crate::recipe::{ConnectionRecipe, ProtocolKind, TransportKind};
use crate::transport::Transport;
use crate::transports::tcp::{TcpTransport, DEFAULT_PORT};
use crate::transports::xor::XorCipher;

/// Builds device sessions for the recipes it supports
#[async_trait]
pub trait Connector: Send + Sync {
    /// Whether this connector can attempt the recipe at all
    fn supports(&self, recipe: &ConnectionRecipe) -> bool;

    /// Attempt one recipe end to end
    ///
    /// A successful attempt returns a device whose first refresh has
    /// already completed; anything short of that is a failure and must
    /// leave no half-open transport behind.
    async fn try_connect(
        &self,
        config: &DeviceConfig,
        recipe: ConnectionRecipe,
    ) -> Result<Arc<Device>>;
}

/// Walk the candidate list and settle on the first working recipe
///
/// The observer is invoked once per candidate, in order, with the attempt
/// outcome; callers use it to surface negotiation progress.
pub async fn try_connect_all<C, F>(
    connector: &C,
    config: &DeviceConfig,
    candidates: &[ConnectionRecipe],
    mut observer: F,
) -> Result<Arc<Device>>
where
    C: Connector + ?Sized,
    F: FnMut(&ConnectionRecipe, bool),
{
    let mut attempts = Vec::with_capacity(candidates.len());

    for recipe in candidates {
        if !connector.supports(recipe) {
            debug!(host = %config.host, recipe = %recipe, "Recipe not supported, skipping");
            attempts.push(AttemptFailure {
                recipe: *recipe,
                reason: "Recipe not supported by this connector".to_string(),
                authentication: false,
            });
            observer(recipe, false);
            continue;
        }

        debug!(host = %config.host, recipe = %recipe, "Attempting recipe");
        match connector.try_connect(config, *recipe).await {
            Ok(device) => {
                info!(host = %config.host, recipe = %recipe, "Connection negotiated");
                observer(recipe, true);
                return Ok(device);
            }
            Err(e) => {
                warn!(host = %config.host, recipe = %recipe, error = %e, "Recipe attempt failed");
                attempts.push(AttemptFailure {
                    recipe: *recipe,
                    reason: e.to_string(),
                    authentication: e.is_authentication(),
                });
                observer(recipe, false);
            }
        }
    }

    Err(DeviceError::NoWorkingConnection { attempts })
}

/// Connector building XOR-obfuscated TCP sessions
///
/// Supports the plain XOR transport recipes; HTTPS and handshake-session
/// recipes are reported as unsupported attempts so that negotiation
/// diagnostics stay complete.
pub struct TcpConnector {
    catalog: Arc<ModuleCatalog>,
    events: SharedEventBus,
}

impl TcpConnector {
    /// Create a connector with the standard module catalog
    pub fn new() -> Self {
        Self::with_catalog(Arc::new(ModuleCatalog::standard()))
    }

    /// Create a connector with a custom module catalog
    pub fn with_catalog(catalog: Arc<ModuleCatalog>) -> Self {
        Self {
            catalog,
            events: SharedEventBus::new(),
        }
    }

    /// Use a shared event bus for the devices this connector builds
    pub fn with_events(mut self, events: SharedEventBus) -> Self {
        self.events = events;
        self
    }
}

impl Default for TcpConnector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Connector for TcpConnector {
    fn supports(&self, recipe: &ConnectionRecipe) -> bool {
        !recipe.https && recipe.transport == TransportKind::Xor
    }

    async fn try_connect(
        &self,
        config: &DeviceConfig,
        recipe: ConnectionRecipe,
    ) -> Result<Arc<Device>> {
        let port = config.port.unwrap_or(DEFAULT_PORT);
        let mut transport = TcpTransport::new(
            config.host.clone(),
            port,
            config.timeout,
            Box::new(XorCipher::new()),
            recipe.transport,
        );
        if let Err(e) = transport.connect().await {
            let _ = transport.close().await;
            return Err(e);
        }

        let protocol: Box<dyn Protocol> = match recipe.protocol {
            ProtocolKind::Composite => Box::new(CompositeProtocol::new(Box::new(transport))),
            ProtocolKind::Legacy => Box::new(LegacyProtocol::new(Box::new(transport))),
        };

        let device = Device::new(
            config.clone(),
            recipe,
            protocol,
            self.catalog.clone(),
            self.events.clone(),
        );

        // The recipe only counts once a full refresh cycle works over it
        if let Err(e) = device.refresh().await {
            let _ = device.disconnect().await;
            return Err(e);
        }
        Ok(device)
    }
}

/// Negotiate and connect to a device with the stock connector
///
/// A fixed recipe in the config skips negotiation and is the only
/// candidate tried.
pub async fn connect(config: &DeviceConfig) -> Result<Arc<Device>> {
    let connector = TcpConnector::new();
    let candidates = match config.connection {
        Some(recipe) => vec![recipe],
        None => ConnectionRecipe::candidates(),
    };
    try_connect_all(&connector, config, &candidates, |_, _| {}).await
}
