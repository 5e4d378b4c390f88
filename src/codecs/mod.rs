//! Cache Codec Implementations
//!
//! This module provides built-in implementations of the
//! [`CacheCodec`](crate::traits::CacheCodec) trait for different serialization
//! backends. The `Serializer` plugin picks one by name through
//! [`codec_by_name`].

use std::sync::Arc;

use crate::traits::CacheCodec;

mod json;
pub use json::JsonCodec;

#[cfg(feature = "bincode")]
mod bincode;
#[cfg(feature = "bincode")]
#[cfg_attr(docsrs, doc(cfg(feature = "bincode")))]
pub use self::bincode::BincodeCodec;

#[cfg(feature = "msgpack")]
mod msgpack;
#[cfg(feature = "msgpack")]
#[cfg_attr(docsrs, doc(cfg(feature = "msgpack")))]
pub use msgpack::MsgPackCodec;

/// Codec names accepted by the `serializer` option
pub const CODEC_NAMES: &[&str] = &["json", "bincode", "msgpack"];

/// Resolve a (lower-cased) codec name
///
/// Returns `None` for unknown names and for codecs whose cargo feature is
/// disabled.
#[must_use]
pub fn codec_by_name(name: &str) -> Option<Arc<dyn CacheCodec>> {
    match name {
        "json" => Some(Arc::new(JsonCodec)),
        #[cfg(feature = "bincode")]
        "bincode" => Some(Arc::new(BincodeCodec)),
        #[cfg(feature = "msgpack")]
        "msgpack" => Some(Arc::new(MsgPackCodec)),
        _ => None,
    }
}
