//! Pluggable Cache
//!
//! A uniform, event-driven caching layer over interchangeable storage
//! backends, featuring:
//! - **Storage Adapters**: one operation surface (get/set/add/replace/touch/
//!   remove/check-and-set/increment/decrement, singular and batched) over any backend
//! - **Lifecycle Events**: every operation emits `<op>.pre`, then `<op>.post`
//!   or `<op>.exception`; listeners can rewrite params, short-circuit, replace
//!   results or suppress errors
//! - **Plugins**: serialization, exception handling, probabilistic expiry
//!   sweeps and optimization, shutdown protection
//! - **Backends**: `DashMap` memory, Moka, filesystem, Redis
//!
//! # Quick Start
//!
//! ```rust
//! use pluggable_cache::{CacheError, CacheValue, StorageAdapter};
//! use pluggable_cache::backends::MemoryBackend;
//! use pluggable_cache::plugins::ExceptionHandler;
//! use std::sync::Arc;
//!
//! # fn main() -> pluggable_cache::Result<()> {
//! let cache = StorageAdapter::new(Arc::new(MemoryBackend::new()));
//! cache.options().set("ttl", 300)?;
//!
//! // Errors are logged and swallowed instead of propagated
//! let handler = ExceptionHandler::with_callback(
//!     Arc::new(|err: &CacheError| tracing::warn!(error = %err, "cache failure")),
//!     false,
//! )?;
//! cache.add_plugin(Arc::new(handler))?;
//!
//! cache.set_item("user:1", "alice")?;
//! assert_eq!(cache.get_item("user:1")?, Some(CacheValue::from("alice")));
//! # Ok(())
//! # }
//! ```
//!
//! # Architecture
//!
//! ```text
//! caller → StorageAdapter ─▶ <op>.pre ──stopped──▶ listener result
//!                               │
//!                               ▼
//!                        StorageBackend ─Ok─▶ <op>.post ─▶ result
//!                               │
//!                              Err
//!                               ▼
//!                         <op>.exception ─▶ error, or fallback if suppressed
//! ```

pub mod adapter;
pub mod backends;
pub mod codecs;
pub mod config;
pub mod error;
pub mod event;
pub mod event_bus;
pub mod factory;
pub mod options;
pub mod plugins;
pub mod traits;
pub mod value;

pub use adapter::{AdapterId, MAX_TTL_SECONDS, StorageAdapter, adapter_schema};
pub use config::{CachesConfig, PluginConfig, StorageConfig};
pub use error::{CacheError, Result};
pub use event::{Event, EventName, EventResult, Operation, Params, Phase};
pub use event_bus::{DEFAULT_PRIORITY, EventBus, ListenerHandle, OwnerId};
pub use factory::{AdapterRegistry, CacheRegistry, PluginRegistry, StorageFactory};
pub use options::{OptionValue, Options};
pub use plugins::Plugin;
pub use traits::{CacheCodec, Capabilities, ItemContext, StorageBackend};
pub use value::{CacheValue, CasToken, Metadata};
