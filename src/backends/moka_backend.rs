//! Moka Backend - Bounded In-Memory Storage (feature `moka`)
//!
//! High-performance in-memory store using Moka's synchronous cache with
//! size-based eviction. Expiry is tracked per entry from its modification
//! time so the adapter's `ttl` can change at any moment.

use anyhow::Result;
use moka::sync::Cache;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;
use tracing::{debug, info, warn};

use crate::options::{OptionRule, OptionSpec, OptionValue, OptionsSchema};
use crate::traits::{Capabilities, ItemContext, StorageBackend};
use crate::value::{CacheValue, Metadata};

/// Cache entry with its modification time
#[derive(Debug, Clone)]
struct MokaEntry {
    value: CacheValue,
    mtime: SystemTime,
}

impl MokaEntry {
    fn new(value: CacheValue) -> Self {
        Self {
            value,
            mtime: SystemTime::now(),
        }
    }

    fn is_expired(&self, ctx: &ItemContext) -> bool {
        ctx.is_expired(self.mtime, SystemTime::now())
    }
}

/// Configuration for `MokaBackend`
#[derive(Debug, Clone, Copy)]
pub struct MokaBackendConfig {
    /// Max number of entries
    pub max_capacity: u64,
}

impl Default for MokaBackendConfig {
    fn default() -> Self {
        Self { max_capacity: 2000 }
    }
}

/// Moka in-memory backend
///
/// - Fast in-memory access
/// - Automatic eviction once `max_capacity` is reached
/// - Read-time expiry against the adapter's `ttl`
pub struct MokaBackend {
    cache: Cache<String, MokaEntry>,
    hits: AtomicU64,
    misses: AtomicU64,
    sets: AtomicU64,
}

impl MokaBackend {
    /// Backend-specific settings: `max_capacity` (default 2000)
    #[must_use]
    pub fn schema() -> OptionsSchema {
        OptionsSchema::new()
            .with(OptionSpec::with_default("max_capacity", OptionRule::int(1, i64::MAX), 2000))
    }

    /// Create new Moka backend
    #[must_use]
    pub fn new(config: MokaBackendConfig) -> Self {
        let cache = Cache::builder().max_capacity(config.max_capacity).build();

        info!(capacity = config.max_capacity, "Moka backend initialized");

        Self {
            cache,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            sets: AtomicU64::new(0),
        }
    }

    /// Approximate number of entries (Moka applies writes lazily)
    #[must_use]
    pub fn entry_count(&self) -> u64 {
        self.cache.run_pending_tasks();
        self.cache.entry_count()
    }

    /// `(hits, misses, sets)`
    #[must_use]
    pub fn stats(&self) -> (u64, u64, u64) {
        (
            self.hits.load(Ordering::Relaxed),
            self.misses.load(Ordering::Relaxed),
            self.sets.load(Ordering::Relaxed),
        )
    }

    fn live(&self, key: &str, ctx: &ItemContext) -> Option<MokaEntry> {
        let entry = self.cache.get(key)?;
        if entry.is_expired(ctx) {
            self.cache.invalidate(key);
            return None;
        }
        Some(entry)
    }
}

impl Default for MokaBackend {
    fn default() -> Self {
        Self::new(MokaBackendConfig::default())
    }
}

// ===== Trait Implementations =====

impl StorageBackend for MokaBackend {
    fn name(&self) -> &'static str {
        "moka"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            clear_expired: true,
            ..Capabilities::default()
        }
    }

    fn get(&self, key: &str, ctx: &ItemContext) -> Result<Option<CacheValue>> {
        if let Some(entry) = self.live(key, ctx) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            Ok(Some(entry.value))
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            Ok(None)
        }
    }

    fn metadata(&self, key: &str, ctx: &ItemContext) -> Result<Option<Metadata>> {
        Ok(self.live(key, ctx).map(|entry| Metadata {
            mtime: entry.mtime,
            expires_at: ctx.expires_at(entry.mtime),
            size: Some(entry.value.approximate_size()),
        }))
    }

    fn set(&self, key: &str, value: CacheValue, _ctx: &ItemContext) -> Result<bool> {
        self.cache.insert(key.to_string(), MokaEntry::new(value));
        self.sets.fetch_add(1, Ordering::Relaxed);
        debug!(key = %key, "[Moka] Stored item");
        Ok(true)
    }

    fn touch(&self, key: &str, ctx: &ItemContext) -> Result<bool> {
        match self.live(key, ctx) {
            Some(entry) => {
                self.cache.insert(key.to_string(), MokaEntry::new(entry.value));
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn remove(&self, key: &str) -> Result<bool> {
        Ok(self.cache.remove(key).is_some())
    }

    fn flush(&self) -> Result<()> {
        self.cache.invalidate_all();
        debug!("[Moka] Flushed");
        Ok(())
    }

    fn clear_expired(&self, ctx: &ItemContext) -> Result<()> {
        let expired: Vec<String> = self
            .cache
            .iter()
            .filter(|(_, entry)| entry.is_expired(ctx))
            .map(|(key, _)| key.as_ref().clone())
            .collect();
        for key in &expired {
            self.cache.invalidate(key);
        }
        if !expired.is_empty() {
            debug!(count = expired.len(), "[Moka] Cleaned up expired entries");
        }
        Ok(())
    }

    fn optimize(&self) -> Result<()> {
        self.cache.run_pending_tasks();
        Ok(())
    }

    fn configure(&self, name: &str, value: &OptionValue) {
        if name == "max_capacity" {
            warn!(
                value = ?value,
                "[Moka] max_capacity is fixed once built, rebuild the adapter to apply it"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_touch_refreshes_mtime() {
        let backend = MokaBackend::default();
        let ctx = ItemContext::default();
        backend.set("k", CacheValue::Int(1), &ctx).unwrap();
        let before = backend.metadata("k", &ctx).unwrap().unwrap().mtime;

        std::thread::sleep(std::time::Duration::from_millis(5));
        assert!(backend.touch("k", &ctx).unwrap());
        let after = backend.metadata("k", &ctx).unwrap().unwrap().mtime;
        assert!(after > before);
        assert!(!backend.touch("missing", &ctx).unwrap());
    }

    #[test]
    fn test_remove_reports_existence() {
        let backend = MokaBackend::default();
        let ctx = ItemContext::default();
        backend.set("k", CacheValue::from("v"), &ctx).unwrap();
        assert!(backend.remove("k").unwrap());
        assert!(!backend.remove("k").unwrap());
    }
}
