/*!
 * Core data types for Nexlink.
 *
 * This module defines the identifier and dynamic value types shared by the
 * device session layer and the wire protocols built on top of it.
 */
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A unique identifier for Nexlink resources
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Id(String);

impl Id {
    /// Create a new ID with a random UUID
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create an ID from a string
    pub fn from_string<S: AsRef<str>>(s: S) -> Self {
        Self(s.as_ref().to_string())
    }

    /// Get the string representation of the ID
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Default for Id {
    fn default() -> Self {
        Self::new()
    }
}

impl From<&str> for Id {
    fn from(s: &str) -> Self {
        Self::from_string(s)
    }
}

impl From<String> for Id {
    fn from(s: String) -> Self {
        Self::from_string(s)
    }
}

impl From<Uuid> for Id {
    fn from(uuid: Uuid) -> Self {
        Self::from_string(uuid.to_string())
    }
}

/// A dynamically typed value exchanged with devices
///
/// Query fragments, reply fragments and feature values are all `Value`s;
/// the protocol layer converts between `Value` and wire-level JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// Null value
    Null,
    /// Boolean value
    Bool(bool),
    /// Integer value
    Integer(i64),
    /// Floating-point value
    Float(f64),
    /// String value
    String(String),
    /// Array of values
    Array(Vec<Value>),
    /// Map of string keys to values
    Object(HashMap<String, Value>),
    /// Binary data
    Binary(Vec<u8>),
}

impl Value {
    /// Check if the value is null
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Check if the value is a boolean
    pub fn is_bool(&self) -> bool {
        matches!(self, Value::Bool(_))
    }

    /// Check if the value is an integer
    pub fn is_integer(&self) -> bool {
        matches!(self, Value::Integer(_))
    }

    /// Check if the value is a float
    pub fn is_float(&self) -> bool {
        matches!(self, Value::Float(_))
    }

    /// Check if the value is numeric (integer or float)
    pub fn is_numeric(&self) -> bool {
        self.is_integer() || self.is_float()
    }

    /// Check if the value is a string
    pub fn is_string(&self) -> bool {
        matches!(self, Value::String(_))
    }

    /// Check if the value is an array
    pub fn is_array(&self) -> bool {
        matches!(self, Value::Array(_))
    }

    /// Check if the value is an object
    pub fn is_object(&self) -> bool {
        matches!(self, Value::Object(_))
    }

    /// Try to get a boolean value
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Try to get an integer value
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            Value::Float(f) if *f == (*f as i64) as f64 => Some(*f as i64),
            _ => None,
        }
    }

    /// Try to get a float value
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }

    /// Try to get a string value
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Try to get an array value
    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(a) => Some(a),
            _ => None,
        }
    }

    /// Try to get an object value
    pub fn as_object(&self) -> Option<&HashMap<String, Value>> {
        match self {
            Value::Object(o) => Some(o),
            _ => None,
        }
    }

    /// Try to get binary data
    pub fn as_binary(&self) -> Option<&[u8]> {
        match self {
            Value::Binary(b) => Some(b),
            _ => None,
        }
    }

    /// Look up a key in an object value
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.as_object().and_then(|o| o.get(key))
    }
}

impl Default for Value {
    fn default() -> Self {
        Value::Null
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Integer(i as i64)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Integer(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<Vec<u8>> for Value {
    fn from(b: Vec<u8>) -> Self {
        Value::Binary(b)
    }
}

impl From<Vec<Value>> for Value {
    fn from(a: Vec<Value>) -> Self {
        Value::Array(a)
    }
}

impl From<HashMap<String, Value>> for Value {
    fn from(o: HashMap<String, Value>) -> Self {
        Value::Object(o)
    }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        match v {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Integer(i)
                } else {
                    Value::Float(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(a) => {
                Value::Array(a.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(o) => Value::Object(
                o.into_iter().map(|(k, v)| (k, Value::from(v))).collect(),
            ),
        }
    }
}

impl From<Value> for serde_json::Value {
    fn from(v: Value) -> Self {
        match v {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(b),
            Value::Integer(i) => serde_json::Value::from(i),
            Value::Float(f) => serde_json::Number::from_f64(f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::String(s) => serde_json::Value::String(s),
            Value::Array(a) => {
                serde_json::Value::Array(a.into_iter().map(serde_json::Value::from).collect())
            }
            Value::Object(o) => serde_json::Value::Object(
                o.into_iter()
                    .map(|(k, v)| (k, serde_json::Value::from(v)))
                    .collect(),
            ),
            // Binary has no JSON counterpart; encode as an integer array
            Value::Binary(b) => serde_json::Value::Array(
                b.into_iter().map(|byte| serde_json::Value::from(byte)).collect(),
            ),
        }
    }
}

/// A key-value pair of metadata
pub type Metadata = HashMap<String, Value>;

/// A reference-counted value
pub type SharedValue = Arc<Value>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_creation() {
        let id = Id::new();
        assert!(!id.as_str().is_empty());

        let id = Id::from_string("test-id");
        assert_eq!(id.as_str(), "test-id");

        let id: Id = "another-id".into();
        assert_eq!(id.as_str(), "another-id");
    }

    #[test]
    fn test_id_display() {
        let id = Id::from_string("test-id");
        assert_eq!(format!("{}", id), "test-id");
    }

    #[test]
    fn test_value_type_checks() {
        assert!(Value::Null.is_null());
        assert!(Value::Bool(true).is_bool());
        assert!(Value::Integer(42).is_integer());
        assert!(Value::Integer(42).is_numeric());
        assert!(Value::Float(3.14).is_float());
        assert!(Value::String("hello".to_string()).is_string());
        assert!(Value::Array(vec![Value::Integer(1)]).is_array());

        let mut map = HashMap::new();
        map.insert("key".to_string(), Value::String("value".to_string()));
        assert!(Value::Object(map).is_object());
    }

    #[test]
    fn test_value_conversions() {
        let v: Value = true.into();
        assert_eq!(v.as_bool(), Some(true));

        let v: Value = 42i64.into();
        assert_eq!(v.as_integer(), Some(42));

        let v: Value = 3.14f64.into();
        assert_eq!(v.as_float(), Some(3.14));

        let v: Value = "hello".into();
        assert_eq!(v.as_str(), Some("hello"));

        let binary = vec![1u8, 2, 3];
        let v: Value = binary.clone().into();
        assert_eq!(v.as_binary(), Some(&binary[..]));
    }

    #[test]
    fn test_value_numeric_coercion() {
        let v = Value::Integer(42);
        assert_eq!(v.as_float(), Some(42.0));

        let v = Value::Float(3.0);
        assert_eq!(v.as_integer(), Some(3));

        let v = Value::Float(3.14);
        assert_eq!(v.as_integer(), None); // Not an exact integer
    }

    #[test]
    fn test_object_get() {
        let mut map = HashMap::new();
        map.insert("model".to_string(), Value::String("NX100".to_string()));
        let v = Value::Object(map);

        assert_eq!(v.get("model").and_then(|m| m.as_str()), Some("NX100"));
        assert!(v.get("missing").is_none());
        assert!(Value::Integer(1).get("model").is_none());
    }

    #[test]
    fn test_json_round_trip() {
        let json: serde_json::Value = serde_json::json!({
            "device_id": "abc",
            "on": true,
            "rssi": -61,
            "signal": 2.5,
            "tags": ["a", "b"],
            "nested": { "x": null }
        });

        let value = Value::from(json.clone());
        assert_eq!(value.get("device_id").and_then(|v| v.as_str()), Some("abc"));
        assert_eq!(value.get("on").and_then(|v| v.as_bool()), Some(true));
        assert_eq!(value.get("rssi").and_then(|v| v.as_integer()), Some(-61));
        assert_eq!(value.get("signal").and_then(|v| v.as_float()), Some(2.5));

        let back: serde_json::Value = value.into();
        assert_eq!(back, json);
    }

    #[test]
    fn test_binary_to_json() {
        let v = Value::Binary(vec![1, 2, 3]);
        let json: serde_json::Value = v.into();
        assert_eq!(json, serde_json::json!([1, 2, 3]));
    }
}
