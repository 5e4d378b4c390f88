//! Memory Backend - `DashMap` Storage
//!
//! A concurrent in-process store. Items keep their modification time and
//! expiry is evaluated at read time against the adapter's current `ttl`, so
//! raising or lowering `ttl` applies to items that are already stored.
//!
//! `max_items` bounds the number of entries. When a new key would exceed
//! the bound, expired entries go first, then the least recently written.
//! Lowering `max_items` on a live adapter evicts immediately.

use anyhow::{Result, bail};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::SystemTime;
use tracing::{debug, info, warn};

use crate::options::{OptionRule, OptionSpec, OptionValue, OptionsSchema};
use crate::traits::{Capabilities, ItemContext, StorageBackend};
use crate::value::{CacheValue, Metadata};

/// Stored entry with its last write/touch time
#[derive(Debug, Clone)]
struct MemoryEntry {
    value: CacheValue,
    mtime: SystemTime,
}

impl MemoryEntry {
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

/// Counters exposed by [`MemoryBackend::stats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryStats {
    pub hits: u64,
    pub misses: u64,
    pub sets: u64,
    pub evictions: u64,
}

/// Concurrent in-memory backend using `DashMap`
///
/// **Features**:
/// - Lock-free concurrent reads/writes
/// - Read-time expiry against the adapter's `ttl`
/// - Optional `max_items` bound with oldest-first eviction
/// - Atomic `add` and `increment`
///
/// **Example**:
/// ```rust
/// use pluggable_cache::backends::MemoryBackend;
/// use pluggable_cache::{CacheValue, ItemContext, StorageBackend};
///
/// let backend = MemoryBackend::new();
/// let ctx = ItemContext::default();
/// backend.set("user:1", CacheValue::from("alice"), &ctx).unwrap();
/// assert_eq!(backend.get("user:1", &ctx).unwrap(), Some(CacheValue::from("alice")));
/// ```
pub struct MemoryBackend {
    map: Arc<DashMap<String, MemoryEntry>>,
    max_items: AtomicUsize,
    hits: AtomicU64,
    misses: AtomicU64,
    sets: AtomicU64,
    evictions: AtomicU64,
}

impl MemoryBackend {
    /// Backend-specific settings: `max_items` (`0` = unlimited)
    #[must_use]
    pub fn schema() -> OptionsSchema {
        OptionsSchema::new()
            .with(OptionSpec::with_default("max_items", OptionRule::int(0, i64::MAX), 0))
    }

    /// Create an unbounded memory backend
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_items(0)
    }

    /// Create a memory backend holding at most `max_items` entries (`0` = unlimited)
    #[must_use]
    pub fn with_max_items(max_items: usize) -> Self {
        info!(max_items, "Initializing memory backend (DashMap)");

        Self {
            map: Arc::new(DashMap::new()),
            max_items: AtomicUsize::new(max_items),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            sets: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Current number of stored entries, including expired ones not yet swept
    #[must_use]
    pub fn len(&self) -> usize {
        self.map.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    #[must_use]
    pub fn max_items(&self) -> usize {
        self.max_items.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn stats(&self) -> MemoryStats {
        MemoryStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            sets: self.sets.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }

    /// Read a live entry, dropping it if expired
    fn live(&self, key: &str, ctx: &ItemContext) -> Option<MemoryEntry> {
        let entry = self.map.get(key)?;
        if entry.is_expired(ctx) {
            drop(entry); // Release read lock
            self.map.remove(key);
            return None;
        }
        Some(entry.clone())
    }

    /// Make room for `incoming` new entries under the current bound
    fn evict(&self, incoming: usize, ctx: Option<&ItemContext>) {
        let max = self.max_items();
        if max == 0 || self.map.len() + incoming <= max {
            return;
        }

        if let Some(ctx) = ctx {
            self.map.retain(|_, entry| !entry.is_expired(ctx));
        }

        let excess = (self.map.len() + incoming).saturating_sub(max);
        if excess == 0 {
            return;
        }

        let mut by_age: Vec<(SystemTime, String)> = self
            .map
            .iter()
            .map(|e| (e.value().mtime, e.key().clone()))
            .collect();
        by_age.sort();
        for (_, key) in by_age.into_iter().take(excess) {
            self.map.remove(&key);
        }
        self.evictions.fetch_add(excess as u64, Ordering::Relaxed);
        debug!(evicted = excess, max_items = max, "[Memory] Evicted oldest entries");
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

// ===== Trait Implementations =====

impl StorageBackend for MemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
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

    fn set(&self, key: &str, value: CacheValue, ctx: &ItemContext) -> Result<bool> {
        if !self.map.contains_key(key) {
            self.evict(1, Some(ctx));
        }
        self.map.insert(key.to_string(), MemoryEntry::new(value));
        self.sets.fetch_add(1, Ordering::Relaxed);
        debug!(key = %key, "[Memory] Stored item");
        Ok(true)
    }

    fn add(&self, key: &str, value: CacheValue, ctx: &ItemContext) -> Result<bool> {
        let stored = match self.map.entry(key.to_string()) {
            Entry::Occupied(mut occupied) if occupied.get().is_expired(ctx) => {
                occupied.insert(MemoryEntry::new(value));
                true
            }
            Entry::Occupied(_) => false,
            Entry::Vacant(vacant) => {
                vacant.insert(MemoryEntry::new(value));
                true
            }
        };
        if stored {
            self.sets.fetch_add(1, Ordering::Relaxed);
            self.evict(0, Some(ctx));
        }
        Ok(stored)
    }

    fn touch(&self, key: &str, ctx: &ItemContext) -> Result<bool> {
        match self.map.get_mut(key) {
            Some(mut entry) if !entry.is_expired(ctx) => {
                entry.mtime = SystemTime::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn remove(&self, key: &str) -> Result<bool> {
        Ok(self.map.remove(key).is_some())
    }

    fn increment(&self, key: &str, delta: i64, ctx: &ItemContext) -> Result<i64> {
        let next = match self.map.entry(key.to_string()) {
            Entry::Occupied(mut occupied) if !occupied.get().is_expired(ctx) => {
                let next = match occupied.get().value {
                    CacheValue::Int(current) => match current.checked_add(delta) {
                        Some(next) => next,
                        None => bail!("incrementing '{key}' by {delta} overflows"),
                    },
                    ref other => bail!("cannot increment {} item '{key}'", other.kind()),
                };
                occupied.insert(MemoryEntry::new(CacheValue::Int(next)));
                next
            }
            Entry::Occupied(mut expired) => {
                expired.insert(MemoryEntry::new(CacheValue::Int(delta)));
                delta
            }
            Entry::Vacant(vacant) => {
                vacant.insert(MemoryEntry::new(CacheValue::Int(delta)));
                delta
            }
        };
        self.evict(0, Some(ctx));
        Ok(next)
    }

    fn flush(&self) -> Result<()> {
        self.map.clear();
        debug!("[Memory] Flushed");
        Ok(())
    }

    fn clear_expired(&self, ctx: &ItemContext) -> Result<()> {
        let before = self.map.len();
        self.map.retain(|_, entry| !entry.is_expired(ctx));
        let removed = before.saturating_sub(self.map.len());
        if removed > 0 {
            debug!(count = removed, "[Memory] Cleaned up expired entries");
        }
        Ok(())
    }

    fn configure(&self, name: &str, value: &OptionValue) {
        if name != "max_items" {
            return;
        }
        match value {
            OptionValue::Int(n) => {
                let max = usize::try_from(*n).unwrap_or(usize::MAX);
                self.max_items.store(max, Ordering::Relaxed);
                info!(max_items = max, "[Memory] Capacity changed");
                self.evict(0, None);
            }
            other => warn!(value = ?other, "[Memory] Ignoring non-integer max_items"),
        }
    }
}
