//! Bincode Codec (feature `bincode`)

use crate::traits::CacheCodec;
use crate::value::CacheValue;
use anyhow::Result;

/// Compact binary codec using `bincode`
#[derive(Debug, Default, Clone)]
pub struct BincodeCodec;

impl CacheCodec for BincodeCodec {
    fn serialize(&self, value: &CacheValue) -> Result<Vec<u8>> {
        Ok(bincode::serialize(value)?)
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<CacheValue> {
        Ok(bincode::deserialize(bytes)?)
    }

    fn name(&self) -> &'static str {
        "bincode"
    }
}
