//! JSON Codec using `serde_json`
//!
//! JSON has no encoding for NaN or infinities, so values containing them are
//! refused on the way in instead of failing to decode later.

use crate::traits::CacheCodec;
use crate::value::CacheValue;
use anyhow::{Result, bail};

/// JSON Codec using `serde_json`
#[derive(Debug, Default, Clone)]
pub struct JsonCodec;

impl CacheCodec for JsonCodec {
    fn serialize(&self, value: &CacheValue) -> Result<Vec<u8>> {
        if let Some(f) = first_non_finite(value) {
            bail!("JSON cannot represent the float {f}");
        }
        Ok(serde_json::to_vec(value)?)
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<CacheValue> {
        Ok(serde_json::from_slice(bytes)?)
    }

    fn name(&self) -> &'static str {
        "serde_json"
    }
}

fn first_non_finite(value: &CacheValue) -> Option<f64> {
    match value {
        CacheValue::Float(f) if !f.is_finite() => Some(*f),
        CacheValue::List(items) => items.iter().find_map(first_non_finite),
        CacheValue::Map(map) => map.values().find_map(first_non_finite),
        _ => None,
    }
}
