/*!
 * Device discovery.
 *
 * Discovery probes the dedicated UDP discovery port. A decodable reply is
 * classified and, when it does not pin a working recipe outright, handed
 * to connection negotiation; every probed host resolves to exactly one of
 * three outcomes: a connected device, an unsupported-device record, or an
 * authentication failure. Undecodable replies surface as raw events so
 * that unknown firmwares stay observable.
 *
 * Broadcast discovery pushes [`DiscoveryEvent`]s through an `mpsc`
 * channel as hosts resolve; a slow or dropped consumer never aborts the
 * sweep for other hosts.
 */
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tokio::time::{timeout, Instant};
use tracing::{debug, info, warn};

use nexlink_core::config::NetworkConfig;
use nexlink_core::utils::spawn_and_log;

use crate::config::DeviceConfig;
use crate::connect::{try_connect_all, Connector};
use crate::credentials::Credentials;
use crate::device::Device;
use crate::error::{DeviceError, Result};
use crate::recipe::{ConnectionRecipe, DeviceFamily, ProtocolKind, TransportKind};

/// Size of the UDP receive buffer for discovery replies
const RECV_BUFFER: usize = 64 * 1024;

/// Capacity of the broadcast event channel
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Tunables for one discovery run
#[derive(Debug, Clone)]
pub struct DiscoveryOptions {
    /// UDP port the probe targets
    pub port: u16,
    /// Address a broadcast sweep probes
    pub broadcast_address: String,
    /// How long to wait for replies
    pub timeout: Duration,
    /// Upper bound on concurrent per-host classification
    pub concurrency: usize,
}

impl Default for DiscoveryOptions {
    fn default() -> Self {
        Self::from_network(&NetworkConfig::default())
    }
}

impl DiscoveryOptions {
    /// Derive options from the library network configuration
    pub fn from_network(network: &NetworkConfig) -> Self {
        Self {
            port: network.discovery_port,
            broadcast_address: network.broadcast_address.clone(),
            timeout: network.discovery_timeout(),
            concurrency: network.discovery_concurrency.max(1),
        }
    }
}

/// The encryption scheme a device announced in its discovery reply
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptionDescriptor {
    /// Scheme name as announced by the device
    pub scheme: String,
    /// Whether the device wants HTTPS/TLS
    pub https: bool,
}

impl EncryptionDescriptor {
    /// Resolve the announced scheme to a recipe, when it maps to one
    pub fn to_recipe(&self) -> Option<ConnectionRecipe> {
        let (protocol, transport) = match self.scheme.to_ascii_uppercase().as_str() {
            "KLAP" | "SESSION" => (ProtocolKind::Composite, TransportKind::Session),
            "AES" => (ProtocolKind::Composite, TransportKind::Aes),
            "XOR" => (ProtocolKind::Legacy, TransportKind::Xor),
            _ => return None,
        };
        Some(ConnectionRecipe::new(
            protocol,
            transport,
            DeviceFamily::Unknown,
            self.https,
        ))
    }
}

/// One decoded discovery reply
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryResult {
    /// Announced device type string, e.g. `SMART.HUB`
    pub device_type: Option<String>,
    /// Announced model
    pub model: Option<String>,
    /// Announced device id
    pub device_id: Option<String>,
    /// Announced MAC address
    pub mac: Option<String>,
    /// Announced firmware version
    pub firmware_version: Option<String>,
    /// Announced hardware version
    pub hardware_version: Option<String>,
    /// Announced encryption scheme, when present
    pub encryption: Option<EncryptionDescriptor>,
    /// When the reply was received
    pub seen_at: DateTime<Utc>,
}

impl DiscoveryResult {
    /// The device family implied by the announced type
    pub fn family(&self) -> DeviceFamily {
        match self.device_type.as_deref() {
            Some(t) if t.to_ascii_uppercase().contains("HUB") => DeviceFamily::Hub,
            Some(t) if t.to_ascii_uppercase().contains("CAM") => DeviceFamily::Camera,
            Some(_) => DeviceFamily::Plug,
            None => DeviceFamily::Unknown,
        }
    }
}

/// Decodes probe payloads and discovery replies
pub trait ProbeCodec: Send + Sync {
    /// The probe payload to put on the wire
    fn probe(&self) -> Vec<u8>;

    /// Decode one reply payload
    fn decode(&self, payload: &[u8]) -> Result<DiscoveryResult>;
}

/// Reference codec: JSON probe, JSON reply
///
/// The reply may wrap its fields in a `result` object; the encryption
/// scheme is announced under `mgt_encrypt_schm`.
#[derive(Debug, Default)]
pub struct JsonProbeCodec;

impl ProbeCodec for JsonProbeCodec {
    fn probe(&self) -> Vec<u8> {
        br#"{"method":"get_device_info","params":{}}"#.to_vec()
    }

    fn decode(&self, payload: &[u8]) -> Result<DiscoveryResult> {
        let body: serde_json::Value = serde_json::from_slice(payload)?;
        let result = body.get("result").unwrap_or(&body);
        let fields = result
            .as_object()
            .ok_or_else(|| DeviceError::serialization("Discovery reply is not a JSON object"))?;

        let text = |key: &str| {
            fields
                .get(key)
                .and_then(|v| v.as_str())
                .map(str::to_string)
        };
        let encryption = fields.get("mgt_encrypt_schm").map(|schm| EncryptionDescriptor {
            scheme: schm
                .get("encrypt_type")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string(),
            https: schm
                .get("is_support_https")
                .and_then(|v| v.as_bool())
                .unwrap_or(false),
        });

        Ok(DiscoveryResult {
            device_type: text("device_type"),
            model: text("device_model"),
            device_id: text("device_id"),
            mac: text("mac"),
            firmware_version: text("fw_ver"),
            hardware_version: text("hw_ver"),
            encryption,
            seen_at: Utc::now(),
        })
    }
}

/// Outcome of targeted discovery against one host
#[derive(Debug)]
pub enum SingleDiscovery {
    /// The host answered and a session was negotiated
    Device(Arc<Device>),
    /// The host answered but no working session could be built
    Unsupported {
        /// Why the host is unsupported
        reason: String,
        /// The decoded reply, when there was one
        result: Option<DiscoveryResult>,
    },
    /// The host answered but rejected the credentials
    AuthFailed {
        /// The decoded reply
        result: DiscoveryResult,
    },
}

/// Events emitted while a broadcast sweep is running
#[derive(Debug, Clone)]
pub enum DiscoveryEvent {
    /// A host resolved to a connected device
    Discovered {
        /// The replying host
        host: String,
        /// The connected device
        device: Arc<Device>,
    },
    /// A host replied but could not be turned into a device
    Unsupported {
        /// The replying host
        host: String,
        /// Why the host is unsupported
        reason: String,
        /// The decoded reply, when there was one
        result: Option<DiscoveryResult>,
    },
    /// A host replied but rejected the credentials
    AuthFailed {
        /// The replying host
        host: String,
        /// The decoded reply
        result: DiscoveryResult,
    },
    /// A host replied with a payload the codec cannot decode
    Raw {
        /// The replying host
        host: String,
        /// The undecoded payload
        payload: Vec<u8>,
    },
}

/// Everything a finished broadcast sweep accumulated
#[derive(Debug, Default)]
pub struct BroadcastDiscovery {
    /// Connected devices, keyed by host
    pub devices: HashMap<String, Arc<Device>>,
    /// Hosts that replied but yielded no device
    pub unsupported: Vec<UnsupportedHost>,
    /// Hosts that rejected the credentials
    pub auth_failed: Vec<AuthFailedHost>,
}

/// One host a sweep could not turn into a device
#[derive(Debug, Clone)]
pub struct UnsupportedHost {
    /// The replying host
    pub host: String,
    /// Why the host is unsupported
    pub reason: String,
    /// The decoded reply, when there was one
    pub result: Option<DiscoveryResult>,
}

/// One host that rejected the credentials during a sweep
#[derive(Debug, Clone)]
pub struct AuthFailedHost {
    /// The replying host
    pub host: String,
    /// The decoded reply
    pub result: DiscoveryResult,
}

/// Probes for devices and negotiates sessions for the ones that answer
pub struct Discoverer<C: Connector> {
    connector: Arc<C>,
    codec: Arc<dyn ProbeCodec>,
    options: DiscoveryOptions,
    credentials: Option<Credentials>,
}

impl<C: Connector + 'static> Discoverer<C> {
    /// Create a discoverer over the given connector with default options
    pub fn new(connector: Arc<C>) -> Self {
        Self {
            connector,
            codec: Arc::new(JsonProbeCodec),
            options: DiscoveryOptions::default(),
            credentials: None,
        }
    }

    /// Use custom discovery options
    pub fn with_options(mut self, options: DiscoveryOptions) -> Self {
        self.options = options;
        self
    }

    /// Use a custom probe codec
    pub fn with_codec(mut self, codec: Arc<dyn ProbeCodec>) -> Self {
        self.codec = codec;
        self
    }

    /// Present these credentials to discovered devices
    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// Probe a single host and negotiate a session if it answers
    ///
    /// Never blocks past the discovery timeout; a host that does not
    /// answer at all resolves to [`SingleDiscovery::Unsupported`] with
    /// no decoded reply attached.
    pub async fn discover_single(&self, host: &str) -> Result<SingleDiscovery> {
        probe_host(
            self.connector.clone(),
            self.codec.clone(),
            self.options.clone(),
            self.credentials.clone(),
            host.to_string(),
        )
        .await
    }

    /// Probe a list of hosts, bounded by the concurrency limit
    ///
    /// Hosts are deduplicated; per-host failures are recorded and never
    /// abort the sweep.
    pub async fn discover_many(&self, hosts: &[String]) -> BroadcastDiscovery {
        let semaphore = Arc::new(Semaphore::new(self.options.concurrency));
        let mut seen = HashSet::new();
        let mut tasks = JoinSet::new();

        for host in hosts {
            if !seen.insert(host.clone()) {
                continue;
            }
            let connector = self.connector.clone();
            let codec = self.codec.clone();
            let options = self.options.clone();
            let credentials = self.credentials.clone();
            let semaphore = semaphore.clone();
            let host = host.clone();
            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                let outcome = probe_host(connector, codec, options, credentials, host.clone()).await;
                (host, outcome)
            });
        }

        let mut sweep = BroadcastDiscovery::default();
        while let Some(joined) = tasks.join_next().await {
            let Ok((host, outcome)) = joined else {
                continue;
            };
            match outcome {
                Ok(SingleDiscovery::Device(device)) => {
                    sweep.devices.insert(host, device);
                }
                Ok(SingleDiscovery::Unsupported { reason, result }) => {
                    sweep.unsupported.push(UnsupportedHost {
                        host,
                        reason,
                        result,
                    });
                }
                Ok(SingleDiscovery::AuthFailed { result }) => {
                    sweep.auth_failed.push(AuthFailedHost { host, result });
                }
                Err(e) => {
                    sweep.unsupported.push(UnsupportedHost {
                        host,
                        reason: e.to_string(),
                        result: None,
                    });
                }
            }
        }
        sweep
    }

    /// Start a broadcast sweep, streaming events as hosts resolve
    ///
    /// The sweep runs until the discovery window closes; dropping the
    /// receiver does not abort hosts that are still being classified.
    pub fn discover_events(&self) -> mpsc::Receiver<DiscoveryEvent> {
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let connector = self.connector.clone();
        let codec = self.codec.clone();
        let options = self.options.clone();
        let credentials = self.credentials.clone();
        spawn_and_log(
            "discovery-broadcast",
            run_broadcast(connector, codec, options, credentials, tx),
        );
        rx
    }

    /// Run a broadcast sweep to completion and collect the outcome
    pub async fn discover(&self) -> BroadcastDiscovery {
        let mut rx = self.discover_events();
        let mut sweep = BroadcastDiscovery::default();

        while let Some(event) = rx.recv().await {
            match event {
                DiscoveryEvent::Discovered { host, device } => {
                    sweep.devices.insert(host, device);
                }
                DiscoveryEvent::Unsupported {
                    host,
                    reason,
                    result,
                } => {
                    sweep.unsupported.push(UnsupportedHost {
                        host,
                        reason,
                        result,
                    });
                }
                DiscoveryEvent::AuthFailed { host, result } => {
                    sweep.auth_failed.push(AuthFailedHost { host, result });
                }
                DiscoveryEvent::Raw { host, .. } => {
                    sweep.unsupported.push(UnsupportedHost {
                        host,
                        reason: "Undecodable discovery reply".to_string(),
                        result: None,
                    });
                }
            }
        }
        sweep
    }
}

/// Probe one host: send, wait for the reply, classify
async fn probe_host<C: Connector>(
    connector: Arc<C>,
    codec: Arc<dyn ProbeCodec>,
    options: DiscoveryOptions,
    credentials: Option<Credentials>,
    host: String,
) -> Result<SingleDiscovery> {
    let socket = UdpSocket::bind(("0.0.0.0", 0)).await?;
    let target = target_addr(&host, options.port);
    debug!(host = %host, "Sending discovery probe to {}", target);
    socket.send_to(&codec.probe(), &target).await?;

    let mut buf = vec![0u8; RECV_BUFFER];
    let (len, _) = match timeout(options.timeout, socket.recv_from(&mut buf)).await {
        Ok(received) => received?,
        Err(_) => {
            debug!(host = %host, "No discovery reply within {:?}", options.timeout);
            return Ok(SingleDiscovery::Unsupported {
                reason: format!("No discovery reply within {:?}", options.timeout),
                result: None,
            });
        }
    };

    let result = match codec.decode(&buf[..len]) {
        Ok(result) => result,
        Err(e) => {
            debug!(host = %host, error = %e, "Undecodable discovery reply");
            return Ok(SingleDiscovery::Unsupported {
                reason: format!("Undecodable discovery reply: {}", e),
                result: None,
            });
        }
    };

    match classify(connector.as_ref(), &options, credentials, strip_port(&host), result).await {
        Err(DeviceError::UnsupportedDevice { message, discovery }) => {
            Ok(SingleDiscovery::Unsupported {
                reason: message,
                result: discovery.map(|d| *d),
            })
        }
        other => other,
    }
}

/// Turn a decoded reply into a device, an auth rejection, or an
/// [`DeviceError::UnsupportedDevice`] carrying the decoded reply
async fn classify<C: Connector + ?Sized>(
    connector: &C,
    options: &DiscoveryOptions,
    credentials: Option<Credentials>,
    host: &str,
    result: DiscoveryResult,
) -> Result<SingleDiscovery> {
    let mut builder = DeviceConfig::builder(host).with_discovery_timeout(options.timeout);
    if let Some(credentials) = credentials {
        builder = builder.with_credentials(credentials);
    }
    let config = builder.build()?;

    // A reply that pins a scheme gets only that candidate; otherwise the
    // full negotiation list runs.
    let candidates = match result.encryption.as_ref().and_then(|e| e.to_recipe()) {
        Some(recipe) => vec![recipe.with_family(result.family())],
        None => ConnectionRecipe::candidates(),
    };

    match try_connect_all(connector, &config, &candidates, |_, _| {}).await {
        Ok(device) => {
            info!(host = %host, "Discovered device");
            Ok(SingleDiscovery::Device(device))
        }
        Err(DeviceError::NoWorkingConnection { attempts }) => {
            if attempts.iter().any(|a| a.authentication) {
                Ok(SingleDiscovery::AuthFailed { result })
            } else {
                let reason = attempts
                    .iter()
                    .map(|a| a.to_string())
                    .collect::<Vec<_>>()
                    .join("; ");
                Err(DeviceError::unsupported_with(reason, result))
            }
        }
        Err(e) if e.is_authentication() => Ok(SingleDiscovery::AuthFailed { result }),
        Err(e) => Err(DeviceError::unsupported_with(e.to_string(), result)),
    }
}

/// The broadcast sweep task behind [`Discoverer::discover_events`]
async fn run_broadcast<C: Connector + 'static>(
    connector: Arc<C>,
    codec: Arc<dyn ProbeCodec>,
    options: DiscoveryOptions,
    credentials: Option<Credentials>,
    tx: mpsc::Sender<DiscoveryEvent>,
) -> Result<()> {
    let socket = UdpSocket::bind(("0.0.0.0", 0)).await?;
    socket.set_broadcast(true)?;
    let target = (options.broadcast_address.as_str(), options.port);
    socket.send_to(&codec.probe(), target).await?;
    debug!(
        "Discovery broadcast sent to {}:{}, window {:?}",
        options.broadcast_address, options.port, options.timeout
    );

    let deadline = Instant::now() + options.timeout;
    let semaphore = Arc::new(Semaphore::new(options.concurrency));
    let mut seen: HashSet<String> = HashSet::new();
    let mut tasks = JoinSet::new();
    let mut buf = vec![0u8; RECV_BUFFER];

    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }
        let (len, addr) = match timeout(remaining, socket.recv_from(&mut buf)).await {
            Err(_) => break,
            Ok(Err(e)) => {
                warn!(error = %e, "Discovery receive failed");
                break;
            }
            Ok(Ok(received)) => received,
        };

        let host = addr.ip().to_string();
        if !seen.insert(host.clone()) {
            continue;
        }
        let payload = buf[..len].to_vec();
        let connector = connector.clone();
        let codec = codec.clone();
        let options = options.clone();
        let credentials = credentials.clone();
        let semaphore = semaphore.clone();
        let tx = tx.clone();
        tasks.spawn(async move {
            let _permit = semaphore.acquire_owned().await;
            let event = match codec.decode(&payload) {
                Err(_) => DiscoveryEvent::Raw {
                    host: host.clone(),
                    payload,
                },
                Ok(result) => {
                    match classify(connector.as_ref(), &options, credentials, &host, result).await {
                        Ok(SingleDiscovery::Device(device)) => DiscoveryEvent::Discovered {
                            host: host.clone(),
                            device,
                        },
                        Ok(SingleDiscovery::Unsupported { reason, result }) => {
                            DiscoveryEvent::Unsupported {
                                host: host.clone(),
                                reason,
                                result,
                            }
                        }
                        Ok(SingleDiscovery::AuthFailed { result }) => DiscoveryEvent::AuthFailed {
                            host: host.clone(),
                            result,
                        },
                        Err(DeviceError::UnsupportedDevice { message, discovery }) => {
                            DiscoveryEvent::Unsupported {
                                host: host.clone(),
                                reason: message,
                                result: discovery.map(|d| *d),
                            }
                        }
                        Err(e) => DiscoveryEvent::Unsupported {
                            host: host.clone(),
                            reason: e.to_string(),
                            result: None,
                        },
                    }
                }
            };
            // A dropped consumer must not fail the host
            let _ = tx.send(event).await;
        });
    }

    // The window closed; whatever is still mid-classification is abandoned
    tasks.shutdown().await;
    Ok(())
}

/// Resolve a targeted host spec to a socket address string
///
/// A host may carry an explicit `host:port` override for the probe.
fn target_addr(host: &str, default_port: u16) -> String {
    if host.contains(':') {
        host.to_string()
    } else {
        format!("{}:{}", host, default_port)
    }
}

/// The bare host, with any probe port override removed
fn strip_port(host: &str) -> &str {
    host.split(':').next().unwrap_or(host)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::COMPONENTS_KEY;
    use crate::module::ModuleCatalog;
    use crate::protocol::{Protocol, QueryEntry, QueryRequest, QueryResponse};
    use async_trait::async_trait;
    use nexlink_core::event::SharedEventBus;
    use nexlink_core::types::Value;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn reply_payload() -> Vec<u8> {
        serde_json::to_vec(&json!({
            "error_code": 0,
            "result": {
                "device_id": "dev-1",
                "device_model": "NX100",
                "device_type": "SMART.PLUG",
                "mac": "AA:BB:CC:DD:EE:FF",
                "fw_ver": "1.2.3",
                "hw_ver": "2.0",
                "mgt_encrypt_schm": { "encrypt_type": "XOR", "is_support_https": false },
            },
        }))
        .unwrap()
    }

    /// UDP fake that answers every probe with a fixed payload
    async fn udp_responder(payload: Vec<u8>) -> u16 {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = socket.local_addr().unwrap().port();
        tokio::spawn(async move {
            let mut buf = vec![0u8; RECV_BUFFER];
            while let Ok((_, addr)) = socket.recv_from(&mut buf).await {
                let _ = socket.send_to(&payload, addr).await;
            }
        });
        port
    }

    #[derive(Debug)]
    struct StubProtocol;

    #[async_trait]
    impl Protocol for StubProtocol {
        fn kind(&self) -> ProtocolKind {
            ProtocolKind::Composite
        }

        async fn query(&mut self, request: &QueryRequest) -> Result<QueryResponse> {
            let mut response = QueryResponse::new();
            for key in request.keys() {
                let entry = if key == COMPONENTS_KEY {
                    QueryEntry::Data(Value::from(json!({ "component_list": ["info"] })))
                } else {
                    QueryEntry::Data(Value::from(json!({})))
                };
                response.insert(key, entry);
            }
            Ok(response)
        }

        async fn close(&mut self) -> Result<()> {
            Ok(())
        }
    }

    /// Connector fake: scripted outcome, concurrency accounting
    struct StubConnector {
        fail_with: Option<fn() -> DeviceError>,
        delay: Option<Duration>,
        active: AtomicUsize,
        max_active: AtomicUsize,
        attempts: AtomicUsize,
    }

    impl StubConnector {
        fn working() -> Self {
            Self {
                fail_with: None,
                delay: None,
                active: AtomicUsize::new(0),
                max_active: AtomicUsize::new(0),
                attempts: AtomicUsize::new(0),
            }
        }

        fn failing(fail_with: fn() -> DeviceError) -> Self {
            Self {
                fail_with: Some(fail_with),
                ..Self::working()
            }
        }
    }

    #[async_trait]
    impl Connector for StubConnector {
        fn supports(&self, _recipe: &ConnectionRecipe) -> bool {
            true
        }

        async fn try_connect(
            &self,
            config: &DeviceConfig,
            recipe: ConnectionRecipe,
        ) -> Result<Arc<Device>> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_active.fetch_max(now, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.active.fetch_sub(1, Ordering::SeqCst);

            if let Some(fail) = self.fail_with {
                return Err(fail());
            }
            let device = Device::new(
                config.clone(),
                recipe,
                Box::new(StubProtocol),
                Arc::new(ModuleCatalog::standard()),
                SharedEventBus::new(),
            );
            device.refresh().await?;
            Ok(device)
        }
    }

    fn options_for(port: u16) -> DiscoveryOptions {
        DiscoveryOptions {
            port,
            broadcast_address: "127.0.0.1".to_string(),
            timeout: Duration::from_millis(500),
            concurrency: 2,
        }
    }

    #[test]
    fn test_codec_decodes_reply() {
        let codec = JsonProbeCodec;
        let result = codec.decode(&reply_payload()).unwrap();

        assert_eq!(result.model.as_deref(), Some("NX100"));
        assert_eq!(result.device_type.as_deref(), Some("SMART.PLUG"));
        assert_eq!(result.family(), DeviceFamily::Plug);

        let encryption = result.encryption.unwrap();
        let recipe = encryption.to_recipe().unwrap();
        assert_eq!(recipe.protocol, ProtocolKind::Legacy);
        assert_eq!(recipe.transport, TransportKind::Xor);
        assert!(!recipe.https);
    }

    #[test]
    fn test_codec_rejects_garbage() {
        let codec = JsonProbeCodec;
        assert!(codec.decode(b"\x02\x00\x00\x01garbage").is_err());
        assert!(codec.decode(b"[1,2,3]").is_err());
    }

    #[test]
    fn test_unknown_scheme_has_no_recipe() {
        let descriptor = EncryptionDescriptor {
            scheme: "QUANTUM".to_string(),
            https: false,
        };
        assert!(descriptor.to_recipe().is_none());
    }

    #[tokio::test]
    async fn test_discover_single_negotiates_device() {
        let port = udp_responder(reply_payload()).await;
        let discoverer = Discoverer::new(Arc::new(StubConnector::working()))
            .with_options(options_for(port));

        let outcome = discoverer.discover_single("127.0.0.1").await.unwrap();
        match outcome {
            SingleDiscovery::Device(device) => assert_eq!(device.host(), "127.0.0.1"),
            other => panic!("Unexpected outcome: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_discover_single_without_reply_is_unsupported() {
        // Bind-and-drop to get a quiet port
        let port = {
            let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
            socket.local_addr().unwrap().port()
        };
        let mut options = options_for(port);
        options.timeout = Duration::from_millis(100);
        let discoverer =
            Discoverer::new(Arc::new(StubConnector::working())).with_options(options);

        let started = std::time::Instant::now();
        let outcome = discoverer.discover_single("127.0.0.1").await.unwrap();
        assert!(started.elapsed() < Duration::from_secs(2));
        match outcome {
            SingleDiscovery::Unsupported { result, .. } => assert!(result.is_none()),
            other => panic!("Unexpected outcome: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_auth_rejection_classified() {
        let port = udp_responder(reply_payload()).await;
        let connector = StubConnector::failing(|| {
            DeviceError::authentication("Device rejected session (code -1501)")
        });
        let discoverer =
            Discoverer::new(Arc::new(connector)).with_options(options_for(port));

        let outcome = discoverer.discover_single("127.0.0.1").await.unwrap();
        match outcome {
            SingleDiscovery::AuthFailed { result } => {
                assert_eq!(result.model.as_deref(), Some("NX100"));
            }
            other => panic!("Unexpected outcome: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_pinned_scheme_tries_single_candidate() {
        let port = udp_responder(reply_payload()).await;
        let connector = Arc::new(StubConnector::failing(|| {
            DeviceError::connection("Refused")
        }));
        let discoverer =
            Discoverer::new(connector.clone()).with_options(options_for(port));

        let outcome = discoverer.discover_single("127.0.0.1").await.unwrap();
        match outcome {
            // The decoded reply rides along with the unsupported outcome
            SingleDiscovery::Unsupported { result, .. } => {
                assert_eq!(result.and_then(|r| r.model).as_deref(), Some("NX100"));
            }
            other => panic!("Unexpected outcome: {:?}", other),
        }
        // The XOR announcement pins one recipe; negotiation does not fall
        // back to the full candidate list
        assert_eq!(connector.attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_discover_many_respects_concurrency_limit() {
        let mut ports = Vec::new();
        for _ in 0..4 {
            ports.push(udp_responder(reply_payload()).await);
        }
        let hosts: Vec<String> = ports.iter().map(|p| format!("127.0.0.1:{}", p)).collect();

        let mut connector = StubConnector::working();
        connector.delay = Some(Duration::from_millis(50));
        let connector = Arc::new(connector);
        // Port 0 is unused: every host carries its own probe port
        let discoverer = Discoverer::new(connector.clone()).with_options(options_for(0));

        let sweep = discoverer.discover_many(&hosts).await;
        assert_eq!(sweep.devices.len(), 4);
        assert!(connector.max_active.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_discover_many_dedups_hosts() {
        let port = udp_responder(reply_payload()).await;
        let host = format!("127.0.0.1:{}", port);
        let hosts = vec![host.clone(), host.clone(), host];

        let connector = Arc::new(StubConnector::working());
        let discoverer = Discoverer::new(connector.clone()).with_options(options_for(port));

        let sweep = discoverer.discover_many(&hosts).await;
        assert_eq!(sweep.devices.len(), 1);
        assert_eq!(connector.attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_broadcast_sweep_on_loopback() {
        let port = udp_responder(reply_payload()).await;
        let discoverer = Discoverer::new(Arc::new(StubConnector::working()))
            .with_options(options_for(port));

        let sweep = discoverer.discover().await;
        assert_eq!(sweep.devices.len(), 1);
        assert!(sweep.devices.contains_key("127.0.0.1"));
        assert!(sweep.unsupported.is_empty());
        assert!(sweep.auth_failed.is_empty());
    }

    #[tokio::test]
    async fn test_undecodable_broadcast_reply_surfaces_as_raw() {
        let port = udp_responder(b"\x00\x01\x02not json".to_vec()).await;
        let discoverer = Discoverer::new(Arc::new(StubConnector::working()))
            .with_options(options_for(port));

        let mut rx = discoverer.discover_events();
        let event = rx.recv().await.expect("one event before window close");
        match event {
            DiscoveryEvent::Raw { host, payload } => {
                assert_eq!(host, "127.0.0.1");
                assert!(!payload.is_empty());
            }
            other => panic!("Unexpected event: {:?}", other),
        }
    }
}
