/*!
 * Protocol abstraction.
 *
 * A protocol frames application queries over a [`Transport`](crate::transport::Transport):
 * it batches the logical query fragments contributed by the active modules
 * into one wire request and demultiplexes the reply back into per-key
 * entries. Every key that went out comes back as either data or an explicit
 * error entry; nothing is silently dropped.
 */
use std::collections::HashMap;
use std::fmt::Debug;

use async_trait::async_trait;

use nexlink_core::types::Value;

use crate::error::{DeviceError, Result};
use crate::recipe::ProtocolKind;

/// A batched outbound request: ordered `(query key, params)` fragments
///
/// Fragment order is preserved so that requests are byte-identical across
/// refresh cycles with the same module set. Duplicate keys are rejected on
/// insertion.
#[derive(Debug, Clone, Default)]
pub struct QueryRequest {
    fragments: Vec<(String, Value)>,
}

impl QueryRequest {
    /// Create an empty request
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a request with a single fragment
    pub fn single<K: Into<String>>(key: K, params: Value) -> Self {
        Self {
            fragments: vec![(key.into(), params)],
        }
    }

    /// Append a fragment
    ///
    /// Returns a configuration error if the key is already claimed.
    pub fn push<K: Into<String>>(&mut self, key: K, params: Value) -> Result<()> {
        let key = key.into();
        if self.contains(&key) {
            return Err(DeviceError::configuration(format!(
                "Duplicate query key '{}'",
                key
            )));
        }
        self.fragments.push((key, params));
        Ok(())
    }

    /// Whether a key is already present
    pub fn contains(&self, key: &str) -> bool {
        self.fragments.iter().any(|(k, _)| k == key)
    }

    /// Number of fragments
    pub fn len(&self) -> usize {
        self.fragments.len()
    }

    /// Whether the request has no fragments
    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }

    /// Iterate over the fragments in insertion order
    pub fn iter(&self) -> impl Iterator<Item = &(String, Value)> {
        self.fragments.iter()
    }

    /// The keys in insertion order
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.fragments.iter().map(|(k, _)| k.as_str())
    }
}

/// One demultiplexed reply entry for a query key
#[derive(Debug, Clone, PartialEq)]
pub enum QueryEntry {
    /// The device answered the query
    Data(Value),
    /// The device reported an application error code for this key
    Error(i64),
}

impl QueryEntry {
    /// The data value, if the entry is not an error
    pub fn data(&self) -> Option<&Value> {
        match self {
            QueryEntry::Data(v) => Some(v),
            QueryEntry::Error(_) => None,
        }
    }

    /// The error code, if the entry is an error
    pub fn error_code(&self) -> Option<i64> {
        match self {
            QueryEntry::Data(_) => None,
            QueryEntry::Error(code) => Some(*code),
        }
    }
}

/// The demultiplexed reply to one batched request
#[derive(Debug, Clone, Default)]
pub struct QueryResponse {
    entries: HashMap<String, QueryEntry>,
}

impl QueryResponse {
    /// Create an empty response
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an entry for a key
    pub fn insert<K: Into<String>>(&mut self, key: K, entry: QueryEntry) {
        self.entries.insert(key.into(), entry);
    }

    /// Look up the entry for a key
    pub fn get(&self, key: &str) -> Option<&QueryEntry> {
        self.entries.get(key)
    }

    /// Whether the response has an entry for a key
    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Consume the response into its entry map
    pub fn into_entries(self) -> HashMap<String, QueryEntry> {
        self.entries
    }

    /// Iterate over all entries
    pub fn iter(&self) -> impl Iterator<Item = (&String, &QueryEntry)> {
        self.entries.iter()
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the response is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Request/response framing and batching above a transport
#[async_trait]
pub trait Protocol: Send + Sync + Debug {
    /// The protocol kind this instance implements
    fn kind(&self) -> ProtocolKind;

    /// Dispatch one batched request and demultiplex the reply
    ///
    /// Fails as a whole only on transport/protocol-level errors (network,
    /// authentication, malformed envelope). Per-key device errors come
    /// back as [`QueryEntry::Error`].
    async fn query(&mut self, request: &QueryRequest) -> Result<QueryResponse>;

    /// Close the underlying transport
    async fn close(&mut self) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_preserves_order() {
        let mut request = QueryRequest::new();
        request.push("b", Value::Null).unwrap();
        request.push("a", Value::Null).unwrap();
        request.push("c", Value::Null).unwrap();

        let keys: Vec<&str> = request.keys().collect();
        assert_eq!(keys, vec!["b", "a", "c"]);
    }

    #[test]
    fn test_request_rejects_duplicate_key() {
        let mut request = QueryRequest::new();
        request.push("info", Value::Null).unwrap();
        let err = request.push("info", Value::Null).unwrap_err();
        assert!(matches!(err, DeviceError::Configuration(_)));
        assert_eq!(request.len(), 1);
    }

    #[test]
    fn test_entry_accessors() {
        let data = QueryEntry::Data(Value::Integer(7));
        assert_eq!(data.data(), Some(&Value::Integer(7)));
        assert_eq!(data.error_code(), None);

        let error = QueryEntry::Error(-1001);
        assert_eq!(error.data(), None);
        assert_eq!(error.error_code(), Some(-1001));
    }

    #[test]
    fn test_response_lookup() {
        let mut response = QueryResponse::new();
        response.insert("info", QueryEntry::Data(Value::Bool(true)));
        response.insert("battery", QueryEntry::Error(-2));

        assert!(response.contains("info"));
        assert_eq!(response.get("battery").unwrap().error_code(), Some(-2));
        assert!(response.get("missing").is_none());
    }
}
