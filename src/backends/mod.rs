//! Storage Backend Implementations
//!
//! Opaque stores wrapped by a [`StorageAdapter`](crate::StorageAdapter).
//!
//! # Available Backends
//!
//! ## In-Memory
//! - **Memory** - `DashMap`-based store with optional `max_items` bound
//! - **Moka** - Bounded concurrent cache with automatic eviction (feature: `moka`, default)
//!
//! ## On-Disk
//! - **Filesystem** - One file per item; stores strings and bytes only
//!
//! ## Remote
//! - **Redis** - Items as hashes with native expiry (feature: `redis`)
//!
//! # Usage
//!
//! ```rust
//! use pluggable_cache::StorageAdapter;
//! use pluggable_cache::backends::MemoryBackend;
//! use std::sync::Arc;
//!
//! let cache = StorageAdapter::new(Arc::new(MemoryBackend::with_max_items(1000)));
//! assert_eq!(cache.backend_name(), "memory");
//! ```

// Core backends (always available)
pub mod filesystem;
pub mod memory;

// Optional backends (feature-gated)
#[cfg(feature = "moka")]
pub mod moka_backend;

#[cfg(feature = "redis")]
pub mod redis_backend;

// Re-export backend types
pub use filesystem::FilesystemBackend;
pub use memory::{MemoryBackend, MemoryStats};

#[cfg(feature = "moka")]
pub use moka_backend::{MokaBackend, MokaBackendConfig};

#[cfg(feature = "redis")]
pub use redis_backend::RedisBackend;
