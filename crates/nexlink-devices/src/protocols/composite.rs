/*!
 * Composite envelope protocol.
 *
 * The request framing spoken by newer firmwares: all query fragments
 * travel inside a single `multiple_request` envelope and the reply carries
 * one `responses` entry per fragment, each with its own error code. An
 * envelope-level error code fails the whole query; authentication codes
 * map to [`DeviceError::Authentication`].
 */
use serde_json::json;
use tracing::{trace, warn};

use nexlink_core::types::Value;

use crate::error::{DeviceError, Result};
use crate::protocol::{Protocol, QueryEntry, QueryRequest, QueryResponse};
use crate::recipe::ProtocolKind;
use crate::transport::Transport;

use async_trait::async_trait;

/// Envelope-level code: login rejected
const CODE_LOGIN_FAILED: i64 = -1501;

/// Envelope-level code: session handshake expired
const CODE_SESSION_EXPIRED: i64 = 9999;

/// Composite `multiple_request` protocol
#[derive(Debug)]
pub struct CompositeProtocol {
    transport: Box<dyn Transport>,
}

impl CompositeProtocol {
    /// Create a protocol instance over the given transport
    pub fn new(transport: Box<dyn Transport>) -> Self {
        Self { transport }
    }

    fn encode(request: &QueryRequest) -> Result<Vec<u8>> {
        let requests: Vec<serde_json::Value> = request
            .iter()
            .map(|(key, params)| {
                json!({
                    "method": key,
                    "params": serde_json::Value::from(params.clone()),
                })
            })
            .collect();

        let envelope = json!({
            "method": "multiple_request",
            "params": { "requests": requests },
        });
        Ok(serde_json::to_vec(&envelope)?)
    }

    fn decode(request: &QueryRequest, reply: &[u8]) -> Result<QueryResponse> {
        let envelope: serde_json::Value = serde_json::from_slice(reply)?;

        let code = envelope
            .get("error_code")
            .and_then(|c| c.as_i64())
            .ok_or_else(|| DeviceError::serialization("Reply envelope missing error_code"))?;
        match code {
            0 => {}
            CODE_LOGIN_FAILED | CODE_SESSION_EXPIRED => {
                return Err(DeviceError::authentication(format!(
                    "Device rejected session (code {})",
                    code
                )));
            }
            other => {
                return Err(DeviceError::connection(format!(
                    "Device rejected request envelope (code {})",
                    other
                )));
            }
        }

        let mut response = QueryResponse::new();
        let responses = envelope
            .get("result")
            .and_then(|r| r.get("responses"))
            .and_then(|r| r.as_array())
            .ok_or_else(|| DeviceError::serialization("Reply envelope missing responses"))?;

        for item in responses {
            let Some(method) = item.get("method").and_then(|m| m.as_str()) else {
                warn!("Reply entry without method, skipping");
                continue;
            };
            if !request.contains(method) {
                warn!("Reply entry for unrequested key '{}', skipping", method);
                continue;
            }

            let code = item.get("error_code").and_then(|c| c.as_i64()).unwrap_or(0);
            if code != 0 {
                response.insert(method, QueryEntry::Error(code));
                continue;
            }

            let result = item
                .get("result")
                .cloned()
                .unwrap_or(serde_json::Value::Null);
            response.insert(method, QueryEntry::Data(Value::from(result)));
        }

        Ok(response)
    }
}

#[async_trait]
impl Protocol for CompositeProtocol {
    fn kind(&self) -> ProtocolKind {
        ProtocolKind::Composite
    }

    async fn query(&mut self, request: &QueryRequest) -> Result<QueryResponse> {
        if request.is_empty() {
            return Ok(QueryResponse::new());
        }

        let wire = Self::encode(request)?;
        trace!("Dispatching {} batched fragments", request.len());
        let reply = self.transport.send(&wire).await?;
        Self::decode(request, &reply)
    }

    async fn close(&mut self) -> Result<()> {
        self.transport.close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recipe::TransportKind;
    use serde_json::json;

    /// Transport fake that records requests and returns a scripted reply
    #[derive(Debug)]
    struct ScriptedTransport {
        reply: Vec<u8>,
        sent: Vec<Vec<u8>>,
        closed: bool,
    }

    impl ScriptedTransport {
        fn new(reply: serde_json::Value) -> Self {
            Self {
                reply: serde_json::to_vec(&reply).unwrap(),
                sent: Vec::new(),
                closed: false,
            }
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        fn kind(&self) -> TransportKind {
            TransportKind::Session
        }

        async fn connect(&mut self) -> Result<()> {
            Ok(())
        }

        async fn send(&mut self, request: &[u8]) -> Result<Vec<u8>> {
            self.sent.push(request.to_vec());
            Ok(self.reply.clone())
        }

        async fn close(&mut self) -> Result<()> {
            self.closed = true;
            Ok(())
        }
    }

    fn request_for(keys: &[&str]) -> QueryRequest {
        let mut request = QueryRequest::new();
        for key in keys {
            request.push(*key, Value::Null).unwrap();
        }
        request
    }

    #[tokio::test]
    async fn test_batched_query_demultiplexes_by_key() {
        let reply = json!({
            "error_code": 0,
            "result": { "responses": [
                { "method": "get_device_info", "error_code": 0,
                  "result": { "model": "NX100" } },
                { "method": "get_battery_info", "error_code": -2 },
            ]},
        });
        let mut protocol = CompositeProtocol::new(Box::new(ScriptedTransport::new(reply)));

        let request = request_for(&["get_device_info", "get_battery_info"]);
        let response = protocol.query(&request).await.unwrap();

        let info = response.get("get_device_info").unwrap();
        assert_eq!(
            info.data().unwrap().get("model").and_then(|v| v.as_str()),
            Some("NX100")
        );
        assert_eq!(
            response.get("get_battery_info").unwrap().error_code(),
            Some(-2)
        );
    }

    #[tokio::test]
    async fn test_single_envelope_per_query() {
        let reply = json!({
            "error_code": 0,
            "result": { "responses": [] },
        });
        let transport = ScriptedTransport::new(reply);
        let mut protocol = CompositeProtocol::new(Box::new(transport));

        let request = request_for(&["a", "b", "c"]);
        protocol.query(&request).await.unwrap();

        // All three fragments travel in one wire request
        let encoded = CompositeProtocol::encode(&request).unwrap();
        let envelope: serde_json::Value = serde_json::from_slice(&encoded).unwrap();
        assert_eq!(envelope["method"], "multiple_request");
        assert_eq!(envelope["params"]["requests"].as_array().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_auth_code_maps_to_authentication_error() {
        let reply = json!({ "error_code": -1501 });
        let mut protocol = CompositeProtocol::new(Box::new(ScriptedTransport::new(reply)));

        let err = protocol
            .query(&request_for(&["get_device_info"]))
            .await
            .unwrap_err();
        assert!(err.is_authentication());
    }

    #[tokio::test]
    async fn test_envelope_error_fails_whole_query() {
        let reply = json!({ "error_code": -1 });
        let mut protocol = CompositeProtocol::new(Box::new(ScriptedTransport::new(reply)));

        let err = protocol
            .query(&request_for(&["get_device_info"]))
            .await
            .unwrap_err();
        assert!(matches!(err, DeviceError::Connection(_)));
    }

    #[tokio::test]
    async fn test_unrequested_reply_keys_are_dropped() {
        let reply = json!({
            "error_code": 0,
            "result": { "responses": [
                { "method": "get_device_info", "error_code": 0, "result": {} },
                { "method": "surprise", "error_code": 0, "result": {} },
            ]},
        });
        let mut protocol = CompositeProtocol::new(Box::new(ScriptedTransport::new(reply)));

        let response = protocol
            .query(&request_for(&["get_device_info"]))
            .await
            .unwrap();
        assert!(response.contains("get_device_info"));
        assert!(!response.contains("surprise"));
    }

    #[tokio::test]
    async fn test_empty_request_skips_wire() {
        let reply = json!({ "error_code": 0, "result": { "responses": [] } });
        let mut protocol = CompositeProtocol::new(Box::new(ScriptedTransport::new(reply)));

        let response = protocol.query(&QueryRequest::new()).await.unwrap();
        assert!(response.is_empty());
    }
}
