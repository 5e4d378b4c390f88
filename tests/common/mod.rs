//! Common utilities for integration tests
//!
//! This module provides shared test infrastructure including:
//! - A recording backend that counts calls and can be told to fail
//! - Adapter constructors
//! - A listener that logs event names

#![allow(dead_code)]

use anyhow::{Result, anyhow};
use parking_lot::Mutex;
use pluggable_cache::backends::MemoryBackend;
use pluggable_cache::{
    CacheValue, Capabilities, Event, ItemContext, Metadata, StorageAdapter, StorageBackend,
};
use std::collections::HashMap;
use std::sync::Arc;

/// Message carried by every failure of a failing [`RecordingBackend`]
pub const BACKEND_FAILURE: &str = "backend unavailable";

/// Memory backend wrapper that records every call it receives
#[derive(Default)]
pub struct RecordingBackend {
    inner: MemoryBackend,
    calls: Mutex<HashMap<&'static str, usize>>,
    failing: Mutex<bool>,
}

impl RecordingBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// A backend whose every operation fails with [`BACKEND_FAILURE`]
    pub fn failing() -> Arc<Self> {
        let backend = Self::new();
        backend.set_failing(true);
        backend
    }

    pub fn set_failing(&self, failing: bool) {
        *self.failing.lock() = failing;
    }

    /// How many times `method` was called
    pub fn calls(&self, method: &str) -> usize {
        self.calls.lock().get(method).copied().unwrap_or(0)
    }

    /// Total calls across every method
    pub fn total_calls(&self) -> usize {
        self.calls.lock().values().sum()
    }

    fn record(&self, method: &'static str) -> Result<()> {
        *self.calls.lock().entry(method).or_insert(0) += 1;
        if *self.failing.lock() {
            return Err(anyhow!(BACKEND_FAILURE));
        }
        Ok(())
    }
}

impl StorageBackend for RecordingBackend {
    fn name(&self) -> &'static str {
        "recording"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            clear_expired: true,
            optimize: true,
            ..Capabilities::default()
        }
    }

    fn get(&self, key: &str, ctx: &ItemContext) -> Result<Option<CacheValue>> {
        self.record("get")?;
        self.inner.get(key, ctx)
    }

    fn metadata(&self, key: &str, ctx: &ItemContext) -> Result<Option<Metadata>> {
        self.record("metadata")?;
        self.inner.metadata(key, ctx)
    }

    fn set(&self, key: &str, value: CacheValue, ctx: &ItemContext) -> Result<bool> {
        self.record("set")?;
        self.inner.set(key, value, ctx)
    }

    fn touch(&self, key: &str, ctx: &ItemContext) -> Result<bool> {
        self.record("touch")?;
        self.inner.touch(key, ctx)
    }

    fn remove(&self, key: &str) -> Result<bool> {
        self.record("remove")?;
        self.inner.remove(key)
    }

    fn flush(&self) -> Result<()> {
        self.record("flush")?;
        self.inner.flush()
    }

    fn clear_expired(&self, ctx: &ItemContext) -> Result<()> {
        self.record("clear_expired")?;
        self.inner.clear_expired(ctx)
    }

    fn optimize(&self) -> Result<()> {
        self.record("optimize")?;
        self.inner.optimize()
    }
}

/// Adapter over a fresh memory backend
pub fn memory_adapter() -> StorageAdapter {
    StorageAdapter::new(Arc::new(MemoryBackend::new()))
}

/// Adapter over `backend`, keeping a handle to inspect it
pub fn recording_adapter(backend: &Arc<RecordingBackend>) -> StorageAdapter {
    StorageAdapter::new(Arc::clone(backend) as Arc<dyn StorageBackend>)
}

/// Shared log of event names, in the order listeners saw them
pub type EventLog = Arc<Mutex<Vec<String>>>;

pub fn event_log() -> EventLog {
    Arc::new(Mutex::new(Vec::new()))
}

/// Listener that appends `<tag>` (or the event name if `tag` is empty) to `log`
pub fn log_listener(
    log: &EventLog,
    tag: &'static str,
) -> impl Fn(&mut Event<'_>) -> pluggable_cache::Result<()> + Send + Sync + 'static {
    let log = Arc::clone(log);
    move |event: &mut Event<'_>| {
        let entry = if tag.is_empty() {
            event.name().to_string()
        } else {
            tag.to_string()
        };
        log.lock().push(entry);
        Ok(())
    }
}
