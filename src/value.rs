//! Cache values, check-and-set tokens and item metadata

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::SystemTime;

/// A value stored in (or read from) a storage adapter
///
/// The representation is externally tagged so every codec (including
/// non-self-describing ones like bincode) round-trips it exactly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CacheValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Bytes(#[serde(with = "serde_bytes")] Vec<u8>),
    List(Vec<CacheValue>),
    Map(BTreeMap<String, CacheValue>),
}

impl CacheValue {
    /// Short name of the variant, used in logs and error messages
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::String(_) => "string",
            Self::Bytes(_) => "bytes",
            Self::List(_) => "list",
            Self::Map(_) => "map",
        }
    }

    #[must_use]
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(n) => Some(*n),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Bytes(b) => Some(b),
            _ => None,
        }
    }

    /// Rough in-memory footprint, reported through item metadata
    #[must_use]
    pub fn approximate_size(&self) -> u64 {
        match self {
            Self::Null | Self::Bool(_) => 1,
            Self::Int(_) | Self::Float(_) => 8,
            Self::String(s) => s.len() as u64,
            Self::Bytes(b) => b.len() as u64,
            Self::List(items) => items.iter().map(Self::approximate_size).sum(),
            Self::Map(map) => map
                .iter()
                .map(|(k, v)| k.len() as u64 + v.approximate_size())
                .sum(),
        }
    }
}

impl From<bool> for CacheValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for CacheValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<i32> for CacheValue {
    fn from(v: i32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<f64> for CacheValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for CacheValue {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<String> for CacheValue {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<Vec<u8>> for CacheValue {
    fn from(v: Vec<u8>) -> Self {
        Self::Bytes(v)
    }
}

impl From<serde_json::Value> for CacheValue {
    fn from(v: serde_json::Value) -> Self {
        match v {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(b) => Self::Bool(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Self::Int(i),
                None => Self::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            serde_json::Value::String(s) => Self::String(s),
            serde_json::Value::Array(items) => {
                Self::List(items.into_iter().map(Self::from).collect())
            }
            serde_json::Value::Object(map) => {
                Self::Map(map.into_iter().map(|(k, v)| (k, Self::from(v))).collect())
            }
        }
    }
}

/// Token handed back to `check_and_set_item`
///
/// Holds the value the caller observed. The write only goes through while
/// the stored value is still equal to it.
#[derive(Debug, Clone, PartialEq)]
pub struct CasToken(CacheValue);

impl CasToken {
    #[must_use]
    pub fn new(observed: CacheValue) -> Self {
        Self(observed)
    }

    #[must_use]
    pub fn value(&self) -> &CacheValue {
        &self.0
    }

    #[must_use]
    pub fn into_value(self) -> CacheValue {
        self.0
    }
}

impl From<CacheValue> for CasToken {
    fn from(v: CacheValue) -> Self {
        Self(v)
    }
}

/// Metadata about a stored item
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Metadata {
    /// Last write or touch
    pub mtime: SystemTime,
    /// When the item stops being visible, `None` if it never expires
    pub expires_at: Option<SystemTime>,
    /// Stored size in bytes, when the backend can tell
    pub size: Option<u64>,
}
