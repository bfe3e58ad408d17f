/*!
 * Legacy merged-object protocol.
 *
 * The framing spoken by the oldest firmwares: query fragments merge into
 * one nested JSON object keyed by fragment key, and the reply mirrors that
 * shape. A per-key `err_code` inside a reply section becomes an error
 * entry for that key alone.
 */
use serde_json::Map;
use tracing::trace;

use nexlink_core::types::Value;

use crate::error::{DeviceError, Result};
use crate::protocol::{Protocol, QueryEntry, QueryRequest, QueryResponse};
use crate::recipe::ProtocolKind;
use crate::transport::Transport;

use async_trait::async_trait;

/// Legacy merged-object protocol
#[derive(Debug)]
pub struct LegacyProtocol {
    transport: Box<dyn Transport>,
}

impl LegacyProtocol {
    /// Create a protocol instance over the given transport
    pub fn new(transport: Box<dyn Transport>) -> Self {
        Self { transport }
    }

    fn encode(request: &QueryRequest) -> Result<Vec<u8>> {
        let mut merged = Map::new();
        for (key, params) in request.iter() {
            merged.insert(key.clone(), serde_json::Value::from(params.clone()));
        }
        Ok(serde_json::to_vec(&serde_json::Value::Object(merged))?)
    }

    fn decode(request: &QueryRequest, reply: &[u8]) -> Result<QueryResponse> {
        let body: serde_json::Value = serde_json::from_slice(reply)?;
        let sections = body
            .as_object()
            .ok_or_else(|| DeviceError::serialization("Reply is not a JSON object"))?;

        let mut response = QueryResponse::new();
        for key in request.keys() {
            let Some(section) = sections.get(key) else {
                // Absent keys are left to the caller to mark as errors
                continue;
            };

            let code = section.get("err_code").and_then(|c| c.as_i64()).unwrap_or(0);
            if code != 0 {
                response.insert(key, QueryEntry::Error(code));
            } else {
                response.insert(key, QueryEntry::Data(Value::from(section.clone())));
            }
        }

        Ok(response)
    }
}

#[async_trait]
impl Protocol for LegacyProtocol {
    fn kind(&self) -> ProtocolKind {
        ProtocolKind::Legacy
    }

    async fn query(&mut self, request: &QueryRequest) -> Result<QueryResponse> {
        if request.is_empty() {
            return Ok(QueryResponse::new());
        }

        let wire = Self::encode(request)?;
        trace!("Dispatching {} merged fragments", request.len());
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

    #[derive(Debug)]
    struct ScriptedTransport {
        reply: Vec<u8>,
    }

    impl ScriptedTransport {
        fn new(reply: serde_json::Value) -> Self {
            Self {
                reply: serde_json::to_vec(&reply).unwrap(),
            }
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        fn kind(&self) -> TransportKind {
            TransportKind::Xor
        }

        async fn connect(&mut self) -> Result<()> {
            Ok(())
        }

        async fn send(&mut self, _request: &[u8]) -> Result<Vec<u8>> {
            Ok(self.reply.clone())
        }

        async fn close(&mut self) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_fragments_merge_into_one_object() {
        let mut request = QueryRequest::new();
        request
            .push("system", Value::from(json!({"get_sysinfo": {}})))
            .unwrap();
        request.push("emeter", Value::Null).unwrap();

        let encoded = LegacyProtocol::encode(&request).unwrap();
        let body: serde_json::Value = serde_json::from_slice(&encoded).unwrap();
        assert!(body.get("system").and_then(|s| s.get("get_sysinfo")).is_some());
        assert!(body.get("emeter").is_some());
    }

    #[tokio::test]
    async fn test_per_key_err_code() {
        let reply = json!({
            "system": { "model": "NX10", "err_code": 0 },
            "emeter": { "err_code": -1 },
        });
        let mut protocol = LegacyProtocol::new(Box::new(ScriptedTransport::new(reply)));

        let mut request = QueryRequest::new();
        request.push("system", Value::Null).unwrap();
        request.push("emeter", Value::Null).unwrap();

        let response = protocol.query(&request).await.unwrap();
        assert!(response.get("system").unwrap().data().is_some());
        assert_eq!(response.get("emeter").unwrap().error_code(), Some(-1));
    }

    #[tokio::test]
    async fn test_missing_key_left_absent() {
        let reply = json!({ "system": { "err_code": 0 } });
        let mut protocol = LegacyProtocol::new(Box::new(ScriptedTransport::new(reply)));

        let mut request = QueryRequest::new();
        request.push("system", Value::Null).unwrap();
        request.push("schedule", Value::Null).unwrap();

        let response = protocol.query(&request).await.unwrap();
        assert!(response.contains("system"));
        // The refresh cycle turns absent keys into explicit error markers
        assert!(!response.contains("schedule"));
    }
}
