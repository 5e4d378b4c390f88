//! MessagePack Codec (feature `msgpack`)

use crate::traits::CacheCodec;
use crate::value::CacheValue;
use anyhow::Result;

/// MessagePack codec using `rmp-serde`
#[derive(Debug, Default, Clone)]
pub struct MsgPackCodec;

impl CacheCodec for MsgPackCodec {
    fn serialize(&self, value: &CacheValue) -> Result<Vec<u8>> {
        Ok(rmp_serde::to_vec(value)?)
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<CacheValue> {
        Ok(rmp_serde::from_slice(bytes)?)
    }

    fn name(&self) -> &'static str {
        "msgpack"
    }
}
