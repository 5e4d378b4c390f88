//! Storage Adapter - Operation Wrapping Protocol
//!
//! A [`StorageAdapter`] is the uniform operation surface over one
//! [`StorageBackend`]. Every evented operation runs the same protocol:
//!
//! 1. Key validation and the `readable`/`writable` gates run before any
//!    event; a rejected key is returned to the caller as `InvalidKey`.
//! 2. `<op>.pre` fires. A listener that stops the event supplies the final
//!    result and the backend is never called.
//! 3. The backend runs with the (possibly rewritten) params.
//! 4. On success `<op>.post` fires and may rewrite the result. On failure,
//!    including failures of pre/post listeners, `<op>.exception` fires with
//!    the error and an operation-specific fallback result. The error
//!    propagates unchanged unless a listener clears `throw_exception`.
//!
//! With no listeners attached the adapter is a plain pass-through to the
//! backend: the event bus is only created when someone asks for it.
//!
//! # Example
//!
//! ```rust
//! use pluggable_cache::{CacheValue, StorageAdapter};
//! use pluggable_cache::backends::MemoryBackend;
//! use std::sync::Arc;
//!
//! # fn main() -> pluggable_cache::Result<()> {
//! let cache = StorageAdapter::new(Arc::new(MemoryBackend::new()));
//! cache.set_item("user:1", "alice")?;
//! assert_eq!(cache.get_item("user:1")?, Some(CacheValue::from("alice")));
//! # Ok(())
//! # }
//! ```

use parking_lot::RwLock;
use regex::Regex;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{CacheError, Result};
use crate::event::{Event, EventResult, Operation, Params};
use crate::event_bus::{DEFAULT_PRIORITY, EventBus, OwnerId};
use crate::options::{OptionRule, OptionSpec, OptionValue, Options, OptionsSchema};
use crate::plugins::Plugin;
use crate::traits::{Capabilities, ItemContext, StorageBackend};
use crate::value::{CacheValue, CasToken, Metadata};

/// Largest accepted `ttl` in seconds, well inside what a `Duration` holds
pub const MAX_TTL_SECONDS: f64 = 1.0e15;

/// Settings every adapter recognizes
///
/// - `ttl`: seconds an item lives after its last write or touch, `0` = forever
/// - `namespace` / `namespace_separator`: prefix applied to every stored key
/// - `key_pattern`: regex keys must match (empty = any non-empty key)
/// - `readable` / `writable`: turn reads or writes into no-ops
#[must_use]
pub fn adapter_schema() -> OptionsSchema {
    OptionsSchema::new()
        .with(OptionSpec::with_default("ttl", OptionRule::float(0.0, MAX_TTL_SECONDS), 0.0))
        .with(OptionSpec::with_default("namespace", OptionRule::string(), "cache"))
        .with(OptionSpec::with_default("namespace_separator", OptionRule::string(), ":"))
        .with(OptionSpec::with_default("key_pattern", OptionRule::Regex, ""))
        .with(OptionSpec::with_default("readable", OptionRule::Bool, true))
        .with(OptionSpec::with_default("writable", OptionRule::Bool, true))
}

fn compile_pattern(pattern: &str) -> Option<Regex> {
    if pattern.is_empty() {
        return None;
    }
    // Validated by the option rule already
    Regex::new(pattern).ok()
}

/// Identity of one adapter instance, never reused
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AdapterId(Uuid);

impl fmt::Display for AdapterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Uniform operation surface over one storage backend
pub struct StorageAdapter {
    id: AdapterId,
    backend: Arc<dyn StorageBackend>,
    options: Arc<Options>,
    events: OnceLock<EventBus>,
    plugins: RwLock<Vec<(Arc<dyn Plugin>, i32)>>,
    key_pattern: Arc<RwLock<Option<Regex>>>,
}

impl StorageAdapter {
    /// Wrap `backend` with default adapter options
    #[must_use]
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        let options = Arc::new(Options::new(adapter_schema()));
        Self::assemble(backend, options, None)
    }

    /// Wrap `backend` with an existing options container
    ///
    /// The container must recognize every setting of [`adapter_schema`];
    /// backend-specific settings may be added on top. Later changes are
    /// forwarded to [`StorageBackend::configure`].
    ///
    /// # Errors
    ///
    /// Returns `InvalidOption` if `options` lacks an adapter setting.
    pub fn with_options(backend: Arc<dyn StorageBackend>, options: Arc<Options>) -> Result<Self> {
        for name in adapter_schema().names() {
            if !options.recognizes(name) {
                return Err(CacheError::invalid_option(
                    name,
                    "adapter options must include every adapter setting",
                ));
            }
        }
        let pattern = compile_pattern(&options.get_str("key_pattern")?);
        Ok(Self::assemble(backend, options, pattern))
    }

    fn assemble(
        backend: Arc<dyn StorageBackend>,
        options: Arc<Options>,
        pattern: Option<Regex>,
    ) -> Self {
        let key_pattern = Arc::new(RwLock::new(pattern));

        let backend_ref = Arc::clone(&backend);
        let pattern_ref = Arc::clone(&key_pattern);
        options.on_change(Arc::new(move |name, value| {
            if name == "key_pattern" {
                if let OptionValue::Str(pattern) = value {
                    *pattern_ref.write() = compile_pattern(pattern);
                }
            }
            backend_ref.configure(name, value);
        }));

        debug!(backend = backend.name(), "Storage adapter created");

        Self {
            id: AdapterId(Uuid::new_v4()),
            backend,
            options,
            events: OnceLock::new(),
            plugins: RwLock::new(Vec::new()),
            key_pattern,
        }
    }

    /// The options container; changes apply to the next operation
    #[must_use]
    pub fn options(&self) -> &Arc<Options> {
        &self.options
    }

    /// The adapter's event bus, created on first use
    pub fn events(&self) -> &EventBus {
        self.events.get_or_init(EventBus::new)
    }

    #[must_use]
    pub fn id(&self) -> AdapterId {
        self.id
    }

    #[must_use]
    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    #[must_use]
    pub fn capabilities(&self) -> Capabilities {
        self.backend.capabilities()
    }

    // ===== Plugins =====

    /// Attach a plugin with the default priority
    ///
    /// # Errors
    ///
    /// Returns whatever the plugin's `attach` returns.
    pub fn add_plugin(&self, plugin: Arc<dyn Plugin>) -> Result<()> {
        self.add_plugin_with_priority(plugin, DEFAULT_PRIORITY)
    }

    /// Attach a plugin; attaching an already attached plugin is a no-op
    ///
    /// # Errors
    ///
    /// Returns whatever the plugin's `attach` returns.
    pub fn add_plugin_with_priority(&self, plugin: Arc<dyn Plugin>, priority: i32) -> Result<()> {
        let id = plugin.id();
        if self.has_plugin(id) {
            debug!(plugin = plugin.name(), "Plugin already attached");
            return Ok(());
        }
        Arc::clone(&plugin).attach(self.events(), priority)?;
        debug!(plugin = plugin.name(), priority, "Plugin attached");
        self.plugins.write().push((plugin, priority));
        Ok(())
    }

    /// Detach a plugin, removing exactly the listeners it registered
    ///
    /// Returns `false` if the plugin was not attached.
    pub fn remove_plugin(&self, id: OwnerId) -> bool {
        let removed = {
            let mut plugins = self.plugins.write();
            plugins
                .iter()
                .position(|(p, _)| p.id() == id)
                .map(|pos| plugins.remove(pos).0)
        };
        match removed {
            Some(plugin) => {
                plugin.detach(self.events());
                debug!(plugin = plugin.name(), "Plugin detached");
                true
            }
            None => false,
        }
    }

    #[must_use]
    pub fn has_plugin(&self, id: OwnerId) -> bool {
        self.plugins.read().iter().any(|(p, _)| p.id() == id)
    }

    /// Attached plugins in attach order
    #[must_use]
    pub fn plugins(&self) -> Vec<Arc<dyn Plugin>> {
        self.plugins
            .read()
            .iter()
            .map(|(p, _)| Arc::clone(p))
            .collect()
    }

    // ===== Internals =====

    fn context(&self) -> Result<ItemContext> {
        let ttl = self.options.get_float("ttl")?;
        if ttl <= 0.0 {
            return Ok(ItemContext::with_ttl(None));
        }
        let ttl = Duration::try_from_secs_f64(ttl)
            .map_err(|e| CacheError::invalid_option("ttl", e.to_string()))?;
        Ok(ItemContext::with_ttl(Some(ttl)))
    }

    fn readable(&self) -> Result<bool> {
        self.options.get_bool("readable")
    }

    fn writable(&self) -> Result<bool> {
        self.options.get_bool("writable")
    }

    fn check_key(&self, key: &str) -> Result<()> {
        if key.is_empty() {
            return Err(CacheError::invalid_key(key, "empty keys are not allowed"));
        }
        if let Some(pattern) = self.key_pattern.read().as_ref() {
            if !pattern.is_match(key) {
                return Err(CacheError::invalid_key(
                    key,
                    format!("does not match pattern '{}'", pattern.as_str()),
                ));
            }
        }
        Ok(())
    }

    fn check_keys<K: AsRef<str>>(&self, keys: &[K]) -> Result<Vec<String>> {
        if keys.is_empty() {
            return Err(CacheError::InvalidArgument(
                "an empty list of keys isn't allowed".into(),
            ));
        }
        keys.iter()
            .map(|k| {
                self.check_key(k.as_ref())?;
                Ok(k.as_ref().to_string())
            })
            .collect()
    }

    fn prefix(&self) -> Result<String> {
        let namespace = self.options.get_str("namespace")?;
        if namespace.is_empty() {
            return Ok(String::new());
        }
        Ok(namespace + &self.options.get_str("namespace_separator")?)
    }

    fn namespaced(&self, prefix: &str, key: &str) -> Result<String> {
        let full = format!("{prefix}{key}");
        if let Some(max) = self.backend.capabilities().max_key_length {
            if full.len() > max {
                return Err(CacheError::invalid_key(
                    key,
                    format!("longer than {max} bytes once namespaced"),
                ));
            }
        }
        Ok(full)
    }

    fn namespaced_all(&self, keys: &[String]) -> Result<(String, Vec<String>)> {
        let prefix = self.prefix()?;
        let full = keys
            .iter()
            .map(|k| self.namespaced(&prefix, k))
            .collect::<Result<_>>()?;
        Ok((prefix, full))
    }

    fn strip(prefix: &str, key: String) -> String {
        match key.strip_prefix(prefix) {
            Some(stripped) => stripped.to_string(),
            None => key,
        }
    }

    fn strip_all(prefix: &str, keys: Vec<String>) -> Vec<String> {
        keys.into_iter().map(|k| Self::strip(prefix, k)).collect()
    }

    /// Result reported by the exception phase unless a listener replaces it
    fn fallback(op: Operation, params: &Params) -> EventResult {
        match op {
            Operation::GetItem => EventResult::Item(None),
            Operation::GetItems => EventResult::Items(HashMap::new()),
            Operation::HasItems => EventResult::Keys(Vec::new()),
            Operation::GetMetadata => EventResult::Metadata(None),
            Operation::GetMetadatas => EventResult::Metadatas(HashMap::new()),
            Operation::IncrementItem | Operation::DecrementItem => EventResult::Number(None),
            Operation::IncrementItems | Operation::DecrementItems => {
                EventResult::Numbers(HashMap::new())
            }
            Operation::SetItems
            | Operation::AddItems
            | Operation::ReplaceItems
            | Operation::TouchItems
            | Operation::RemoveItems => EventResult::Keys(params.keys()),
            Operation::HasItem
            | Operation::SetItem
            | Operation::AddItem
            | Operation::ReplaceItem
            | Operation::TouchItem
            | Operation::RemoveItem
            | Operation::CheckAndSetItem
            | Operation::ClearExpired => EventResult::Bool(false),
        }
    }

    /// Run one operation through the pre → backend → post/exception protocol
    fn run<F>(&self, op: Operation, params: Params, call: F) -> Result<EventResult>
    where
        F: FnOnce(&Params) -> Result<EventResult>,
    {
        let Some(events) = self.events.get() else {
            return call(&params);
        };

        let mut pre = Event::new(op.pre(), self, params);
        if let Err(error) = events.trigger(&mut pre) {
            let (params, _, _) = pre.into_parts();
            return self.raise(events, op, params, error);
        }
        if pre.is_stopped() {
            debug!(operation = %op, "Operation short-circuited by pre listener");
            let (_, result, _) = pre.into_parts();
            return Ok(result);
        }

        let (params, _, _) = pre.into_parts();
        match call(&params) {
            Ok(result) => {
                let mut post = Event::new(op.post(), self, params);
                post.set_result(result);
                match events.trigger(&mut post) {
                    Ok(()) => Ok(post.into_parts().1),
                    Err(error) => {
                        let (params, _, _) = post.into_parts();
                        self.raise(events, op, params, error)
                    }
                }
            }
            Err(error) => self.raise(events, op, params, error),
        }
    }

    fn raise(
        &self,
        events: &EventBus,
        op: Operation,
        params: Params,
        error: CacheError,
    ) -> Result<EventResult> {
        debug!(operation = %op, error = %error, "Operation failed");
        let fallback = Self::fallback(op, &params);
        let mut event = Event::with_exception(op, self, params, error, fallback);
        events.trigger(&mut event)?;

        let throw = event.throw_exception();
        let (_, result, exception) = event.into_parts();
        match exception {
            Some(error) if throw => Err(error),
            Some(error) => {
                warn!(operation = %op, error = %error, "Operation error suppressed by listener");
                Ok(result)
            }
            None => Ok(result),
        }
    }

    fn mismatch(op: Operation, params: &Params) -> CacheError {
        CacheError::InvalidArgument(format!("{op} cannot run with {} params", params.kind()))
    }

    fn unexpected(op: Operation, result: &EventResult) -> CacheError {
        CacheError::UnexpectedResult {
            event: op.to_string(),
            found: result.kind(),
        }
    }

    fn into_bool(op: Operation, result: EventResult) -> Result<bool> {
        match result {
            EventResult::Null => Ok(false),
            EventResult::Bool(b) => Ok(b),
            other => Err(Self::unexpected(op, &other)),
        }
    }

    fn into_keys(op: Operation, result: EventResult, empty: Vec<String>) -> Result<Vec<String>> {
        match result {
            EventResult::Null => Ok(empty),
            EventResult::Keys(keys) => Ok(keys),
            other => Err(Self::unexpected(op, &other)),
        }
    }

    fn into_number(op: Operation, result: EventResult) -> Result<Option<i64>> {
        match result {
            EventResult::Null => Ok(None),
            EventResult::Number(n) => Ok(n),
            other => Err(Self::unexpected(op, &other)),
        }
    }

    fn into_numbers(op: Operation, result: EventResult) -> Result<HashMap<String, i64>> {
        match result {
            EventResult::Null => Ok(HashMap::new()),
            EventResult::Numbers(n) => Ok(n),
            other => Err(Self::unexpected(op, &other)),
        }
    }

    // ===== Reads =====

    /// Read an item; `None` if missing or expired
    ///
    /// # Errors
    ///
    /// `InvalidKey` for rejected keys; backend and listener errors unless
    /// suppressed by an exception listener.
    pub fn get_item(&self, key: &str) -> Result<Option<CacheValue>> {
        let op = Operation::GetItem;
        self.check_key(key)?;
        if !self.readable()? {
            return Ok(None);
        }
        let result = self.run(op, Params::for_key(key), |params| {
            let key = params.key().ok_or_else(|| Self::mismatch(op, params))?;
            let ctx = self.context()?;
            let full = self.namespaced(&self.prefix()?, key)?;
            Ok(EventResult::Item(self.backend.get(&full, &ctx)?))
        })?;
        match result {
            EventResult::Null => Ok(None),
            EventResult::Item(value) => Ok(value),
            other => Err(Self::unexpected(op, &other)),
        }
    }

    /// Read several items; only found keys appear in the result
    ///
    /// # Errors
    ///
    /// `InvalidKey`/`InvalidArgument` for rejected keys; backend and
    /// listener errors unless suppressed.
    pub fn get_items<K: AsRef<str>>(&self, keys: &[K]) -> Result<HashMap<String, CacheValue>> {
        let op = Operation::GetItems;
        let keys = self.check_keys(keys)?;
        if !self.readable()? {
            return Ok(HashMap::new());
        }
        let result = self.run(op, Params::Keys { keys }, |params| {
            let Params::Keys { keys } = params else {
                return Err(Self::mismatch(op, params));
            };
            let ctx = self.context()?;
            let (prefix, full) = self.namespaced_all(keys)?;
            let found = self.backend.get_many(&full, &ctx)?;
            Ok(EventResult::Items(
                found
                    .into_iter()
                    .map(|(k, v)| (Self::strip(&prefix, k), v))
                    .collect(),
            ))
        })?;
        match result {
            EventResult::Null => Ok(HashMap::new()),
            EventResult::Items(items) => Ok(items),
            other => Err(Self::unexpected(op, &other)),
        }
    }

    /// # Errors
    ///
    /// `InvalidKey` for rejected keys; backend and listener errors unless
    /// suppressed.
    pub fn has_item(&self, key: &str) -> Result<bool> {
        let op = Operation::HasItem;
        self.check_key(key)?;
        if !self.readable()? {
            return Ok(false);
        }
        let result = self.run(op, Params::for_key(key), |params| {
            let key = params.key().ok_or_else(|| Self::mismatch(op, params))?;
            let ctx = self.context()?;
            let full = self.namespaced(&self.prefix()?, key)?;
            Ok(EventResult::Bool(self.backend.has(&full, &ctx)?))
        })?;
        Self::into_bool(op, result)
    }

    /// Keys among `keys` that currently hold a live item
    ///
    /// # Errors
    ///
    /// `InvalidKey`/`InvalidArgument` for rejected keys; backend and
    /// listener errors unless suppressed.
    pub fn has_items<K: AsRef<str>>(&self, keys: &[K]) -> Result<Vec<String>> {
        let op = Operation::HasItems;
        let keys = self.check_keys(keys)?;
        if !self.readable()? {
            return Ok(Vec::new());
        }
        let result = self.run(op, Params::Keys { keys }, |params| {
            let Params::Keys { keys } = params else {
                return Err(Self::mismatch(op, params));
            };
            let ctx = self.context()?;
            let (prefix, full) = self.namespaced_all(keys)?;
            let found = self.backend.has_many(&full, &ctx)?;
            Ok(EventResult::Keys(Self::strip_all(&prefix, found)))
        })?;
        Self::into_keys(op, result, Vec::new())
    }

    /// # Errors
    ///
    /// `InvalidKey` for rejected keys; backend and listener errors unless
    /// suppressed.
    pub fn get_metadata(&self, key: &str) -> Result<Option<Metadata>> {
        let op = Operation::GetMetadata;
        self.check_key(key)?;
        if !self.readable()? {
            return Ok(None);
        }
        let result = self.run(op, Params::for_key(key), |params| {
            let key = params.key().ok_or_else(|| Self::mismatch(op, params))?;
            let ctx = self.context()?;
            let full = self.namespaced(&self.prefix()?, key)?;
            Ok(EventResult::Metadata(self.backend.metadata(&full, &ctx)?))
        })?;
        match result {
            EventResult::Null => Ok(None),
            EventResult::Metadata(meta) => Ok(meta),
            other => Err(Self::unexpected(op, &other)),
        }
    }

    /// # Errors
    ///
    /// `InvalidKey`/`InvalidArgument` for rejected keys; backend and
    /// listener errors unless suppressed.
    pub fn get_metadatas<K: AsRef<str>>(&self, keys: &[K]) -> Result<HashMap<String, Metadata>> {
        let op = Operation::GetMetadatas;
        let keys = self.check_keys(keys)?;
        if !self.readable()? {
            return Ok(HashMap::new());
        }
        let result = self.run(op, Params::Keys { keys }, |params| {
            let Params::Keys { keys } = params else {
                return Err(Self::mismatch(op, params));
            };
            let ctx = self.context()?;
            let (prefix, full) = self.namespaced_all(keys)?;
            let found = self.backend.metadata_many(&full, &ctx)?;
            Ok(EventResult::Metadatas(
                found
                    .into_iter()
                    .map(|(k, m)| (Self::strip(&prefix, k), m))
                    .collect(),
            ))
        })?;
        match result {
            EventResult::Null => Ok(HashMap::new()),
            EventResult::Metadatas(meta) => Ok(meta),
            other => Err(Self::unexpected(op, &other)),
        }
    }

    // ===== Writes =====

    fn write_one(
        &self,
        op: Operation,
        key: &str,
        value: CacheValue,
        write: impl FnOnce(&str, CacheValue, &ItemContext) -> anyhow::Result<bool>,
    ) -> Result<bool> {
        self.check_key(key)?;
        if !self.writable()? {
            return Ok(false);
        }
        let params = Params::KeyValue {
            key: key.to_string(),
            value,
        };
        let result = self.run(op, params, |params| {
            let Params::KeyValue { key, value } = params else {
                return Err(Self::mismatch(op, params));
            };
            let ctx = self.context()?;
            let full = self.namespaced(&self.prefix()?, key)?;
            Ok(EventResult::Bool(write(&full, value.clone(), &ctx)?))
        })?;
        Self::into_bool(op, result)
    }

    fn write_many<K, V>(
        &self,
        op: Operation,
        items: impl IntoIterator<Item = (K, V)>,
        write: impl FnOnce(Vec<(String, CacheValue)>, &ItemContext) -> anyhow::Result<Vec<String>>,
    ) -> Result<Vec<String>>
    where
        K: Into<String>,
        V: Into<CacheValue>,
    {
        let items: Vec<(String, CacheValue)> = items
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        let keys = self.check_keys(&items.iter().map(|(k, _)| k.as_str()).collect::<Vec<_>>())?;
        if !self.writable()? {
            return Ok(keys);
        }
        let result = self.run(op, Params::KeyValuePairs { items }, |params| {
            let Params::KeyValuePairs { items } = params else {
                return Err(Self::mismatch(op, params));
            };
            let ctx = self.context()?;
            let prefix = self.prefix()?;
            let full = items
                .iter()
                .map(|(k, v)| Ok((self.namespaced(&prefix, k)?, v.clone())))
                .collect::<Result<Vec<_>>>()?;
            let failed = write(full, &ctx)?;
            Ok(EventResult::Keys(Self::strip_all(&prefix, failed)))
        })?;
        Self::into_keys(op, result, Vec::new())
    }

    /// Store an item, overwriting any existing one
    ///
    /// # Errors
    ///
    /// `InvalidKey` for rejected keys; backend and listener errors unless
    /// suppressed.
    pub fn set_item(&self, key: &str, value: impl Into<CacheValue>) -> Result<bool> {
        self.write_one(Operation::SetItem, key, value.into(), |k, v, ctx| {
            self.backend.set(k, v, ctx)
        })
    }

    /// Store several items; returns the keys that were not stored
    ///
    /// # Errors
    ///
    /// `InvalidKey`/`InvalidArgument` for rejected keys; backend and
    /// listener errors unless suppressed.
    pub fn set_items<K, V>(&self, items: impl IntoIterator<Item = (K, V)>) -> Result<Vec<String>>
    where
        K: Into<String>,
        V: Into<CacheValue>,
    {
        self.write_many(Operation::SetItems, items, |items, ctx| {
            self.backend.set_many(items, ctx)
        })
    }

    /// Store an item only if no live item exists under `key`
    ///
    /// # Errors
    ///
    /// `InvalidKey` for rejected keys; backend and listener errors unless
    /// suppressed.
    pub fn add_item(&self, key: &str, value: impl Into<CacheValue>) -> Result<bool> {
        self.write_one(Operation::AddItem, key, value.into(), |k, v, ctx| {
            self.backend.add(k, v, ctx)
        })
    }

    /// # Errors
    ///
    /// `InvalidKey`/`InvalidArgument` for rejected keys; backend and
    /// listener errors unless suppressed.
    pub fn add_items<K, V>(&self, items: impl IntoIterator<Item = (K, V)>) -> Result<Vec<String>>
    where
        K: Into<String>,
        V: Into<CacheValue>,
    {
        self.write_many(Operation::AddItems, items, |items, ctx| {
            self.backend.add_many(items, ctx)
        })
    }

    /// Store an item only if a live item already exists under `key`
    ///
    /// # Errors
    ///
    /// `InvalidKey` for rejected keys; backend and listener errors unless
    /// suppressed.
    pub fn replace_item(&self, key: &str, value: impl Into<CacheValue>) -> Result<bool> {
        self.write_one(Operation::ReplaceItem, key, value.into(), |k, v, ctx| {
            self.backend.replace(k, v, ctx)
        })
    }

    /// # Errors
    ///
    /// `InvalidKey`/`InvalidArgument` for rejected keys; backend and
    /// listener errors unless suppressed.
    pub fn replace_items<K, V>(
        &self,
        items: impl IntoIterator<Item = (K, V)>,
    ) -> Result<Vec<String>>
    where
        K: Into<String>,
        V: Into<CacheValue>,
    {
        self.write_many(Operation::ReplaceItems, items, |items, ctx| {
            self.backend.replace_many(items, ctx)
        })
    }

    /// Store `value` only if the current value still equals the token
    ///
    /// # Errors
    ///
    /// `InvalidKey` for rejected keys; backend and listener errors unless
    /// suppressed.
    pub fn check_and_set_item(
        &self,
        token: &CasToken,
        key: &str,
        value: impl Into<CacheValue>,
    ) -> Result<bool> {
        let op = Operation::CheckAndSetItem;
        self.check_key(key)?;
        if !self.writable()? {
            return Ok(false);
        }
        let params = Params::CheckAndSet {
            token: token.clone(),
            key: key.to_string(),
            value: value.into(),
        };
        let result = self.run(op, params, |params| {
            let Params::CheckAndSet { token, key, value } = params else {
                return Err(Self::mismatch(op, params));
            };
            let ctx = self.context()?;
            let full = self.namespaced(&self.prefix()?, key)?;
            Ok(EventResult::Bool(self.backend.check_and_set(
                token,
                &full,
                value.clone(),
                &ctx,
            )?))
        })?;
        Self::into_bool(op, result)
    }

    /// Reset an item's modification time, extending its life by `ttl`
    ///
    /// # Errors
    ///
    /// `InvalidKey` for rejected keys; backend and listener errors unless
    /// suppressed.
    pub fn touch_item(&self, key: &str) -> Result<bool> {
        let op = Operation::TouchItem;
        self.check_key(key)?;
        if !self.writable()? {
            return Ok(false);
        }
        let result = self.run(op, Params::for_key(key), |params| {
            let key = params.key().ok_or_else(|| Self::mismatch(op, params))?;
            let ctx = self.context()?;
            let full = self.namespaced(&self.prefix()?, key)?;
            Ok(EventResult::Bool(self.backend.touch(&full, &ctx)?))
        })?;
        Self::into_bool(op, result)
    }

    /// Returns the keys that could not be touched
    ///
    /// # Errors
    ///
    /// `InvalidKey`/`InvalidArgument` for rejected keys; backend and
    /// listener errors unless suppressed.
    pub fn touch_items<K: AsRef<str>>(&self, keys: &[K]) -> Result<Vec<String>> {
        let op = Operation::TouchItems;
        let keys = self.check_keys(keys)?;
        if !self.writable()? {
            return Ok(keys);
        }
        let result = self.run(op, Params::Keys { keys }, |params| {
            let Params::Keys { keys } = params else {
                return Err(Self::mismatch(op, params));
            };
            let ctx = self.context()?;
            let (prefix, full) = self.namespaced_all(keys)?;
            let failed = self.backend.touch_many(&full, &ctx)?;
            Ok(EventResult::Keys(Self::strip_all(&prefix, failed)))
        })?;
        Self::into_keys(op, result, Vec::new())
    }

    /// Delete an item; `false` if it did not exist
    ///
    /// # Errors
    ///
    /// `InvalidKey` for rejected keys; backend and listener errors unless
    /// suppressed.
    pub fn remove_item(&self, key: &str) -> Result<bool> {
        let op = Operation::RemoveItem;
        self.check_key(key)?;
        if !self.writable()? {
            return Ok(false);
        }
        let result = self.run(op, Params::for_key(key), |params| {
            let key = params.key().ok_or_else(|| Self::mismatch(op, params))?;
            let full = self.namespaced(&self.prefix()?, key)?;
            Ok(EventResult::Bool(self.backend.remove(&full)?))
        })?;
        Self::into_bool(op, result)
    }

    /// Returns the keys that did not exist
    ///
    /// # Errors
    ///
    /// `InvalidKey`/`InvalidArgument` for rejected keys; backend and
    /// listener errors unless suppressed.
    pub fn remove_items<K: AsRef<str>>(&self, keys: &[K]) -> Result<Vec<String>> {
        let op = Operation::RemoveItems;
        let keys = self.check_keys(keys)?;
        if !self.writable()? {
            return Ok(keys);
        }
        let result = self.run(op, Params::Keys { keys }, |params| {
            let Params::Keys { keys } = params else {
                return Err(Self::mismatch(op, params));
            };
            let (prefix, full) = self.namespaced_all(keys)?;
            let missing = self.backend.remove_many(&full)?;
            Ok(EventResult::Keys(Self::strip_all(&prefix, missing)))
        })?;
        Self::into_keys(op, result, Vec::new())
    }

    fn increment_one(&self, op: Operation, key: &str, delta: i64) -> Result<Option<i64>> {
        self.check_key(key)?;
        if !self.writable()? {
            return Ok(None);
        }
        let params = Params::KeyDelta {
            key: key.to_string(),
            delta,
        };
        let result = self.run(op, params, |params| {
            let Params::KeyDelta { key, delta } = params else {
                return Err(Self::mismatch(op, params));
            };
            let delta = Self::signed_delta(op, *delta)?;
            let ctx = self.context()?;
            let full = self.namespaced(&self.prefix()?, key)?;
            Ok(EventResult::Number(Some(self.backend.increment(&full, delta, &ctx)?)))
        })?;
        Self::into_number(op, result)
    }

    fn increment_many(
        &self,
        op: Operation,
        items: Vec<(String, i64)>,
    ) -> Result<HashMap<String, i64>> {
        self.check_keys(&items.iter().map(|(k, _)| k.as_str()).collect::<Vec<_>>())?;
        if !self.writable()? {
            return Ok(HashMap::new());
        }
        let result = self.run(op, Params::KeyDeltas { items }, |params| {
            let Params::KeyDeltas { items } = params else {
                return Err(Self::mismatch(op, params));
            };
            let ctx = self.context()?;
            let prefix = self.prefix()?;
            let full = items
                .iter()
                .map(|(k, d)| Ok((self.namespaced(&prefix, k)?, Self::signed_delta(op, *d)?)))
                .collect::<Result<Vec<_>>>()?;
            let values = self.backend.increment_many(&full, &ctx)?;
            Ok(EventResult::Numbers(
                values
                    .into_iter()
                    .map(|(k, v)| (Self::strip(&prefix, k), v))
                    .collect(),
            ))
        })?;
        Self::into_numbers(op, result)
    }

    fn signed_delta(op: Operation, delta: i64) -> Result<i64> {
        match op {
            Operation::DecrementItem | Operation::DecrementItems => delta
                .checked_neg()
                .ok_or_else(|| CacheError::InvalidArgument(format!("cannot decrement by {delta}"))),
            _ => Ok(delta),
        }
    }

    /// Add `delta` to an integer item (created with `delta` if missing)
    ///
    /// Returns the new value, or `None` if nothing was written.
    ///
    /// # Errors
    ///
    /// `InvalidKey` for rejected keys; backend errors (non-integer item,
    /// overflow) and listener errors unless suppressed.
    pub fn increment_item(&self, key: &str, delta: i64) -> Result<Option<i64>> {
        self.increment_one(Operation::IncrementItem, key, delta)
    }

    /// # Errors
    ///
    /// `InvalidKey`/`InvalidArgument` for rejected keys; backend and
    /// listener errors unless suppressed.
    pub fn increment_items<K: Into<String>>(
        &self,
        items: impl IntoIterator<Item = (K, i64)>,
    ) -> Result<HashMap<String, i64>> {
        let items = items.into_iter().map(|(k, d)| (k.into(), d)).collect();
        self.increment_many(Operation::IncrementItems, items)
    }

    /// Subtract `delta` from an integer item (created with `-delta` if missing)
    ///
    /// # Errors
    ///
    /// `InvalidKey` for rejected keys; backend errors and listener errors
    /// unless suppressed.
    pub fn decrement_item(&self, key: &str, delta: i64) -> Result<Option<i64>> {
        self.increment_one(Operation::DecrementItem, key, delta)
    }

    /// # Errors
    ///
    /// `InvalidKey`/`InvalidArgument` for rejected keys; backend and
    /// listener errors unless suppressed.
    pub fn decrement_items<K: Into<String>>(
        &self,
        items: impl IntoIterator<Item = (K, i64)>,
    ) -> Result<HashMap<String, i64>> {
        let items = items.into_iter().map(|(k, d)| (k.into(), d)).collect();
        self.increment_many(Operation::DecrementItems, items)
    }

    /// Drop every item that is expired under the current `ttl`
    ///
    /// # Errors
    ///
    /// Backend errors (including "not supported") and listener errors
    /// unless suppressed.
    pub fn clear_expired(&self) -> Result<bool> {
        let op = Operation::ClearExpired;
        let result = self.run(op, Params::None, |_| {
            let ctx = self.context()?;
            self.backend.clear_expired(&ctx)?;
            Ok(EventResult::Bool(true))
        })?;
        Self::into_bool(op, result)
    }

    // ===== Maintenance (not evented) =====

    /// Remove everything the backend stores, across all namespaces
    ///
    /// # Errors
    ///
    /// Returns the backend error.
    pub fn flush(&self) -> Result<()> {
        self.backend.flush()?;
        debug!(backend = self.backend.name(), "Storage flushed");
        Ok(())
    }

    /// Ask the backend to reclaim space
    ///
    /// # Errors
    ///
    /// Returns the backend error.
    pub fn optimize(&self) -> Result<()> {
        self.backend.optimize()?;
        debug!(backend = self.backend.name(), "Storage optimized");
        Ok(())
    }
}

impl fmt::Debug for StorageAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageAdapter")
            .field("id", &self.id)
            .field("backend", &self.backend.name())
            .field("options", &self.options)
            .field("events", &self.events.get())
            .field("plugins", &self.plugins.read().len())
            .finish_non_exhaustive()
    }
}
