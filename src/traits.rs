//! Storage Backend Traits
//!
//! This module defines the trait abstractions that allow users to implement
//! custom storage backends and serialization codecs.
//!
//! # Architecture
//!
//! - `CacheCodec`: Trait for pluggable serialization backends (used by the
//!   `Serializer` plugin)
//! - `StorageBackend`: The opaque storage implementation wrapped by a
//!   `StorageAdapter`
//!
//! Backends never see events or plugins. They receive already-namespaced
//! keys plus an [`ItemContext`] derived from the adapter's options, and
//! report failures as `anyhow::Error`, which the adapter routes through the
//! exception phase untouched.
//!
//! # Example: Custom Backend
//!
//! ```rust,ignore
//! use pluggable_cache::{CacheValue, Capabilities, ItemContext, Metadata, StorageBackend};
//! use anyhow::Result;
//!
//! struct MyBackend {
//!     // Your implementation
//! }
//!
//! impl StorageBackend for MyBackend {
//!     fn get(&self, key: &str, ctx: &ItemContext) -> Result<Option<CacheValue>> {
//!         // Your implementation
//!     }
//!
//!     fn set(&self, key: &str, value: CacheValue, ctx: &ItemContext) -> Result<bool> {
//!         // Your implementation
//!     }
//!
//!     // metadata, touch, remove, flush, capabilities ...
//! }
//! ```

use anyhow::{Result, bail};
use std::fmt::Debug;
use std::time::{Duration, SystemTime};

use crate::options::OptionValue;
use crate::value::{CacheValue, CasToken, Metadata};

/// Trait for cache value serialization/deserialization
///
/// The `Serializer` plugin turns every value into `CacheValue::Bytes` with a
/// codec before it reaches the backend, and turns bytes back into values on
/// the way out.
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync + Debug` so a single codec can be
/// shared by every adapter the plugin is attached to.
///
/// # Example: Custom Codec
///
/// ```rust,ignore
/// use pluggable_cache::{CacheCodec, CacheValue};
/// use anyhow::Result;
///
/// #[derive(Debug)]
/// struct MyCustomCodec;
///
/// impl CacheCodec for MyCustomCodec {
///     fn serialize(&self, value: &CacheValue) -> Result<Vec<u8>> {
///         Ok(mycodec::serialize(value)?)
///     }
///
///     fn deserialize(&self, bytes: &[u8]) -> Result<CacheValue> {
///         Ok(mycodec::deserialize(bytes)?)
///     }
///
///     fn name(&self) -> &'static str {
///         "mycodec"
///     }
/// }
/// ```
pub trait CacheCodec: Send + Sync + Debug {
    /// Serialize a value to bytes
    ///
    /// # Errors
    ///
    /// Returns an error if the value cannot be encoded.
    fn serialize(&self, value: &CacheValue) -> Result<Vec<u8>>;

    /// Deserialize bytes to a value
    ///
    /// # Errors
    ///
    /// Returns an error if `bytes` is not a valid encoding.
    fn deserialize(&self, bytes: &[u8]) -> Result<CacheValue>;

    /// Get the name of the codec
    ///
    /// This is used for logging and debugging purposes.
    fn name(&self) -> &'static str;
}

/// Per-call context derived from the adapter's current options
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ItemContext {
    /// Lifetime of items measured from their last write or touch; `None` = never expire
    pub ttl: Option<Duration>,
}

impl ItemContext {
    #[must_use]
    pub fn with_ttl(ttl: Option<Duration>) -> Self {
        Self { ttl }
    }

    /// When an item written at `mtime` stops being visible
    #[must_use]
    pub fn expires_at(&self, mtime: SystemTime) -> Option<SystemTime> {
        self.ttl.and_then(|ttl| mtime.checked_add(ttl))
    }

    /// Whether an item written at `mtime` is expired at `now`
    #[must_use]
    pub fn is_expired(&self, mtime: SystemTime, now: SystemTime) -> bool {
        self.expires_at(mtime).is_some_and(|at| now >= at)
    }
}

/// What a backend can do, reported through `StorageAdapter::capabilities`
#[derive(Debug, Clone, PartialEq, Eq)]
#[allow(clippy::struct_excessive_bools)]
pub struct Capabilities {
    /// Stores any `CacheValue`; `false` means only strings and bytes
    pub structured_values: bool,
    /// `clear_expired` is implemented
    pub clear_expired: bool,
    /// `optimize` does useful work
    pub optimize: bool,
    /// Expiry is evaluated at read time against the current `ttl`
    pub read_time_expiry: bool,
    /// Longest accepted (namespaced) key, if limited
    pub max_key_length: Option<usize>,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            structured_values: true,
            clear_expired: false,
            optimize: false,
            read_time_expiry: true,
            max_key_length: None,
        }
    }
}

/// Opaque storage implementation behind a `StorageAdapter`
///
/// Only the singular primitives are required; every batch method and the
/// conditional writes have default implementations built on them, which
/// backends override when the store offers something better.
///
/// Keys passed in are already namespaced. An expired item must behave
/// exactly like a missing one.
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync`; adapters are shared across threads.
pub trait StorageBackend: Send + Sync {
    /// Get the name of this backend
    ///
    /// This is used for logging and debugging purposes.
    fn name(&self) -> &'static str {
        "unknown"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::default()
    }

    /// Read an item
    ///
    /// # Errors
    ///
    /// Returns an error if the store could not be read.
    fn get(&self, key: &str, ctx: &ItemContext) -> Result<Option<CacheValue>>;

    /// Read metadata of an item
    ///
    /// # Errors
    ///
    /// Returns an error if the store could not be read.
    fn metadata(&self, key: &str, ctx: &ItemContext) -> Result<Option<Metadata>>;

    /// Store an item; `Ok(false)` means the store declined it
    ///
    /// # Errors
    ///
    /// Returns an error if the write failed.
    fn set(&self, key: &str, value: CacheValue, ctx: &ItemContext) -> Result<bool>;

    /// Reset the modification time of an item; `Ok(false)` if missing
    ///
    /// # Errors
    ///
    /// Returns an error if the write failed.
    fn touch(&self, key: &str, ctx: &ItemContext) -> Result<bool>;

    /// Delete an item; `Ok(false)` if it did not exist
    ///
    /// # Errors
    ///
    /// Returns an error if the write failed.
    fn remove(&self, key: &str) -> Result<bool>;

    /// Delete everything this backend stores
    ///
    /// # Errors
    ///
    /// Returns an error if the store could not be cleared.
    fn flush(&self) -> Result<()>;

    /// # Errors
    ///
    /// Returns an error if the store could not be read.
    fn has(&self, key: &str, ctx: &ItemContext) -> Result<bool> {
        Ok(self.get(key, ctx)?.is_some())
    }

    /// Store only if no live item exists
    ///
    /// # Errors
    ///
    /// Returns an error if the store could not be read or written.
    fn add(&self, key: &str, value: CacheValue, ctx: &ItemContext) -> Result<bool> {
        if self.has(key, ctx)? {
            return Ok(false);
        }
        self.set(key, value, ctx)
    }

    /// Store only if a live item exists
    ///
    /// # Errors
    ///
    /// Returns an error if the store could not be read or written.
    fn replace(&self, key: &str, value: CacheValue, ctx: &ItemContext) -> Result<bool> {
        if !self.has(key, ctx)? {
            return Ok(false);
        }
        self.set(key, value, ctx)
    }

    /// Store only if the current value still equals the token
    ///
    /// # Errors
    ///
    /// Returns an error if the store could not be read or written.
    fn check_and_set(
        &self,
        token: &CasToken,
        key: &str,
        value: CacheValue,
        ctx: &ItemContext,
    ) -> Result<bool> {
        match self.get(key, ctx)? {
            Some(current) if &current == token.value() => self.set(key, value, ctx),
            _ => Ok(false),
        }
    }

    /// Add `delta` to an integer item, creating it with `delta` if missing
    ///
    /// # Errors
    ///
    /// Returns an error for non-integer items, on overflow, or if the store
    /// could not be read or written.
    fn increment(&self, key: &str, delta: i64, ctx: &ItemContext) -> Result<i64> {
        let next = match self.get(key, ctx)? {
            None => delta,
            Some(CacheValue::Int(current)) => match current.checked_add(delta) {
                Some(next) => next,
                None => bail!("incrementing '{key}' by {delta} overflows"),
            },
            Some(other) => bail!("cannot increment {} item '{key}'", other.kind()),
        };
        if !self.set(key, CacheValue::Int(next), ctx)? {
            bail!("backend declined to store incremented value of '{key}'");
        }
        Ok(next)
    }

    /// # Errors
    ///
    /// Returns the first read error.
    fn get_many(&self, keys: &[String], ctx: &ItemContext) -> Result<Vec<(String, CacheValue)>> {
        let mut found = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some(value) = self.get(key, ctx)? {
                found.push((key.clone(), value));
            }
        }
        Ok(found)
    }

    /// Keys among `keys` with a live item
    ///
    /// # Errors
    ///
    /// Returns the first read error.
    fn has_many(&self, keys: &[String], ctx: &ItemContext) -> Result<Vec<String>> {
        let mut found = Vec::new();
        for key in keys {
            if self.has(key, ctx)? {
                found.push(key.clone());
            }
        }
        Ok(found)
    }

    /// # Errors
    ///
    /// Returns the first read error.
    fn metadata_many(&self, keys: &[String], ctx: &ItemContext) -> Result<Vec<(String, Metadata)>> {
        let mut found = Vec::new();
        for key in keys {
            if let Some(meta) = self.metadata(key, ctx)? {
                found.push((key.clone(), meta));
            }
        }
        Ok(found)
    }

    /// Returns the keys that were not stored
    ///
    /// # Errors
    ///
    /// Returns the first write error.
    fn set_many(&self, items: Vec<(String, CacheValue)>, ctx: &ItemContext) -> Result<Vec<String>> {
        let mut failed = Vec::new();
        for (key, value) in items {
            if !self.set(&key, value, ctx)? {
                failed.push(key);
            }
        }
        Ok(failed)
    }

    /// Returns the keys that were not stored
    ///
    /// # Errors
    ///
    /// Returns the first read or write error.
    fn add_many(&self, items: Vec<(String, CacheValue)>, ctx: &ItemContext) -> Result<Vec<String>> {
        let mut failed = Vec::new();
        for (key, value) in items {
            if !self.add(&key, value, ctx)? {
                failed.push(key);
            }
        }
        Ok(failed)
    }

    /// Returns the keys that were not stored
    ///
    /// # Errors
    ///
    /// Returns the first read or write error.
    fn replace_many(
        &self,
        items: Vec<(String, CacheValue)>,
        ctx: &ItemContext,
    ) -> Result<Vec<String>> {
        let mut failed = Vec::new();
        for (key, value) in items {
            if !self.replace(&key, value, ctx)? {
                failed.push(key);
            }
        }
        Ok(failed)
    }

    /// Returns the keys that were not touched
    ///
    /// # Errors
    ///
    /// Returns the first write error.
    fn touch_many(&self, keys: &[String], ctx: &ItemContext) -> Result<Vec<String>> {
        let mut failed = Vec::new();
        for key in keys {
            if !self.touch(key, ctx)? {
                failed.push(key.clone());
            }
        }
        Ok(failed)
    }

    /// Returns the keys that did not exist
    ///
    /// # Errors
    ///
    /// Returns the first write error.
    fn remove_many(&self, keys: &[String]) -> Result<Vec<String>> {
        let mut missing = Vec::new();
        for key in keys {
            if !self.remove(key)? {
                missing.push(key.clone());
            }
        }
        Ok(missing)
    }

    /// # Errors
    ///
    /// Returns the first failing increment.
    fn increment_many(
        &self,
        items: &[(String, i64)],
        ctx: &ItemContext,
    ) -> Result<Vec<(String, i64)>> {
        let mut values = Vec::with_capacity(items.len());
        for (key, delta) in items {
            values.push((key.clone(), self.increment(key, *delta, ctx)?));
        }
        Ok(values)
    }

    /// Drop every item that is expired under `ctx`
    ///
    /// # Errors
    ///
    /// The default implementation always fails; backends advertising
    /// `Capabilities::clear_expired` override it.
    fn clear_expired(&self, _ctx: &ItemContext) -> Result<()> {
        bail!("{} backend cannot clear expired items", self.name())
    }

    /// Reclaim space (compaction, empty directory removal, ...)
    ///
    /// # Errors
    ///
    /// Returns an error if the maintenance work failed.
    fn optimize(&self) -> Result<()> {
        Ok(())
    }

    /// Apply a changed adapter option, e.g. a new capacity limit
    fn configure(&self, _name: &str, _value: &OptionValue) {}
}
