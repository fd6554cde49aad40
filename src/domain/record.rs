//! Catalog record model
//!
//! Remote payloads are loosely shaped JSON objects. Only scalar attributes
//! (numbers, text, booleans, null) are persisted; nested arrays and objects
//! such as image lists or constituent records are dropped.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::ObjectId;

/// A decoded object body exactly as the remote API returned it.
pub type RecordPayload = serde_json::Map<String, Value>;

/// A persistable attribute value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ScalarValue {
    Null,
    Boolean(bool),
    Integer(i64),
    Float(f64),
    Text(String),
}

impl ScalarValue {
    /// Converts a JSON value, returning `None` for nested structures.
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Null => Some(Self::Null),
            Value::Bool(b) => Some(Self::Boolean(*b)),
            Value::Number(n) => n
                .as_i64()
                .map(Self::Integer)
                .or_else(|| n.as_f64().map(Self::Float)),
            Value::String(s) => Some(Self::Text(s.clone())),
            Value::Array(_) | Value::Object(_) => None,
        }
    }

    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// SQL column affinity used when a new attribute column is created.
    pub const fn sql_affinity(&self) -> Option<&'static str> {
        match self {
            Self::Null => None,
            Self::Boolean(_) | Self::Integer(_) => Some("INTEGER"),
            Self::Float(_) => Some("REAL"),
            Self::Text(_) => Some("TEXT"),
        }
    }
}

impl fmt::Display for ScalarValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "NULL"),
            Self::Boolean(b) => write!(f, "{b}"),
            Self::Integer(i) => write!(f, "{i}"),
            Self::Float(x) => write!(f, "{x}"),
            Self::Text(s) => write!(f, "{s}"),
        }
    }
}

/// A typed catalog record: a required identifier plus scalar attributes.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CatalogRecord {
    pub id: ObjectId,
    pub attributes: BTreeMap<String, ScalarValue>,
}

impl CatalogRecord {
    /// Builds a record from a payload.
    ///
    /// Returns `None` when `id_field` is missing, null or not an integer.
    /// The identifier is not repeated inside `attributes`.
    pub fn from_payload(id_field: &str, payload: &RecordPayload) -> Option<Self> {
        let id = payload.get(id_field)?.as_i64()?;
        let attributes = payload
            .iter()
            .filter(|(key, _)| key.as_str() != id_field)
            .filter_map(|(key, value)| ScalarValue::from_json(value).map(|v| (key.clone(), v)))
            .collect();

        Some(Self { id, attributes })
    }
}
