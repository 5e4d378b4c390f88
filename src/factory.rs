//! Construction Boundary
//!
//! Turns names and option payloads into adapters and plugins.
//!
//! - [`AdapterRegistry`]: backend name → constructor plus its option schema
//! - [`PluginRegistry`]: plugin name → constructor
//! - [`StorageFactory`]: builds a fully configured adapter from a [`StorageConfig`]
//! - [`CacheRegistry`]: named caches; every lookup builds a new, independent adapter
//!
//! Names are matched case-insensitively with `_`, `-` and spaces ignored, so
//! `exception_handler`, `ExceptionHandler` and `exceptionhandler` are the
//! same plugin.
//!
//! # Example
//!
//! ```rust
//! use pluggable_cache::config::{PluginConfig, StorageConfig};
//! use pluggable_cache::factory::StorageFactory;
//!
//! # fn main() -> pluggable_cache::Result<()> {
//! let config = StorageConfig::new("memory")
//!     .option("namespace", "app")
//!     .plugin(PluginConfig::from("Serializer"));
//!
//! let cache = StorageFactory::new().build(&config)?;
//! cache.set_item("answer", 42)?;
//! assert_eq!(cache.get_item("answer")?.and_then(|v| v.as_int()), Some(42));
//! # Ok(())
//! # }
//! ```

use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

use crate::adapter::{StorageAdapter, adapter_schema};
use crate::backends::{FilesystemBackend, MemoryBackend};
use crate::config::{CachesConfig, StorageConfig};
use crate::error::{CacheError, Result};
use crate::event_bus::DEFAULT_PRIORITY;
use crate::options::{Options, OptionsSchema};
use crate::plugins::{
    AbortSignal, ClearExpiredByFactor, ExceptionHandler, IgnoreUserAbort, OptimizeByFactor,
    Plugin, Serializer,
};
use crate::traits::StorageBackend;

/// Builds a backend from the adapter's fully validated options
pub type BackendConstructor =
    Arc<dyn Fn(&Options) -> Result<Arc<dyn StorageBackend>> + Send + Sync>;

/// Builds a fresh plugin with default options
pub type PluginConstructor = Arc<dyn Fn() -> Arc<dyn Plugin> + Send + Sync>;

/// Canonical form of an adapter or plugin identifier
#[must_use]
pub fn normalize_name(name: &str) -> String {
    name.chars()
        .filter(|c| !matches!(c, '_' | '-' | ' '))
        .flat_map(char::to_lowercase)
        .collect()
}

fn usize_option(options: &Options, name: &str) -> Result<usize> {
    let n = options.get_int(name)?;
    usize::try_from(n).map_err(|_| CacheError::invalid_option(name, format!("{n} is negative")))
}

#[derive(Clone)]
struct BackendEntry {
    schema: OptionsSchema,
    build: BackendConstructor,
}

/// Backend name → constructor
#[derive(Clone, Default)]
pub struct AdapterRegistry {
    entries: HashMap<String, BackendEntry>,
}

impl AdapterRegistry {
    /// An empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// `memory`, `filesystem`, plus `moka` and `redis` when their features are enabled
    #[must_use]
    pub fn with_builtins() -> Self {
        let registry = Self::new()
            .register(
                "memory",
                MemoryBackend::schema(),
                Arc::new(|options: &Options| -> Result<Arc<dyn StorageBackend>> {
                    let max_items = usize_option(options, "max_items")?;
                    Ok(Arc::new(MemoryBackend::with_max_items(max_items))
                        as Arc<dyn StorageBackend>)
                }),
            )
            .register(
                "filesystem",
                FilesystemBackend::schema(),
                Arc::new(|options: &Options| -> Result<Arc<dyn StorageBackend>> {
                    let backend = FilesystemBackend::new(options.get_str("cache_dir")?)?;
                    Ok(Arc::new(backend) as Arc<dyn StorageBackend>)
                }),
            );

        #[cfg(feature = "moka")]
        let registry = registry.register(
            "moka",
            crate::backends::MokaBackend::schema(),
            Arc::new(|options: &Options| -> Result<Arc<dyn StorageBackend>> {
                let config = crate::backends::MokaBackendConfig {
                    max_capacity: usize_option(options, "max_capacity")? as u64,
                };
                Ok(Arc::new(crate::backends::MokaBackend::new(config)) as Arc<dyn StorageBackend>)
            }),
        );

        #[cfg(feature = "redis")]
        let registry = registry.register(
            "redis",
            crate::backends::RedisBackend::schema(),
            Arc::new(|options: &Options| -> Result<Arc<dyn StorageBackend>> {
                let backend = crate::backends::RedisBackend::with_url(&options.get_str("server")?)?;
                Ok(Arc::new(backend) as Arc<dyn StorageBackend>)
            }),
        );

        registry
    }

    /// Register (or replace) a backend
    ///
    /// `schema` lists the backend's own settings; the adapter settings are
    /// always added on top.
    #[must_use]
    pub fn register(
        mut self,
        name: &str,
        schema: OptionsSchema,
        build: BackendConstructor,
    ) -> Self {
        self.entries
            .insert(normalize_name(name), BackendEntry { schema, build });
        self
    }

    #[must_use]
    pub fn has(&self, name: &str) -> bool {
        self.entries.contains_key(&normalize_name(name))
    }

    /// Registered names, normalized and sorted
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.entries.keys().cloned().collect();
        names.sort();
        names
    }

    /// Build an adapter for `name` configured from `payload`
    ///
    /// # Errors
    ///
    /// `UnknownAdapter` for unregistered names, `InvalidOption` for payload
    /// entries the adapter or backend does not recognize, and whatever the
    /// backend constructor returns.
    pub fn create(&self, name: &str, payload: &Map<String, Value>) -> Result<StorageAdapter> {
        let entry = self
            .entries
            .get(&normalize_name(name))
            .ok_or_else(|| CacheError::UnknownAdapter(name.to_string()))?;

        let options = Arc::new(Options::new(adapter_schema().extend(entry.schema.clone())));
        options.set_json(payload)?;
        let backend = (entry.build)(options.as_ref())?;
        StorageAdapter::with_options(backend, options)
    }
}

impl fmt::Debug for AdapterRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdapterRegistry")
            .field("names", &self.names())
            .finish()
    }
}

/// Plugin name → constructor
#[derive(Clone, Default)]
pub struct PluginRegistry {
    entries: HashMap<String, PluginConstructor>,
}

impl PluginRegistry {
    /// An empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Every built-in plugin; `IgnoreUserAbort` instances share `signal`
    #[must_use]
    pub fn with_builtins(signal: AbortSignal) -> Self {
        Self::new()
            .register(
                "exception_handler",
                Arc::new(|| Arc::new(ExceptionHandler::new()) as Arc<dyn Plugin>),
            )
            .register(
                "serializer",
                Arc::new(|| Arc::new(Serializer::new()) as Arc<dyn Plugin>),
            )
            .register(
                "clear_expired_by_factor",
                Arc::new(|| Arc::new(ClearExpiredByFactor::new()) as Arc<dyn Plugin>),
            )
            .register(
                "optimize_by_factor",
                Arc::new(|| Arc::new(OptimizeByFactor::new()) as Arc<dyn Plugin>),
            )
            .register(
                "ignore_user_abort",
                Arc::new(move || Arc::new(IgnoreUserAbort::new(signal.clone())) as Arc<dyn Plugin>),
            )
    }

    #[must_use]
    pub fn register(mut self, name: &str, build: PluginConstructor) -> Self {
        self.entries.insert(normalize_name(name), build);
        self
    }

    #[must_use]
    pub fn has(&self, name: &str) -> bool {
        self.entries.contains_key(&normalize_name(name))
    }

    /// Build a plugin for `name` configured from `payload`
    ///
    /// # Errors
    ///
    /// `UnknownPlugin` for unregistered names, `InvalidOption` for payload
    /// entries the plugin does not recognize.
    pub fn create(&self, name: &str, payload: &Map<String, Value>) -> Result<Arc<dyn Plugin>> {
        let build = self
            .entries
            .get(&normalize_name(name))
            .ok_or_else(|| CacheError::UnknownPlugin(name.to_string()))?;
        let plugin = build();
        plugin.options().set_json(payload)?;
        Ok(plugin)
    }
}

impl fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&String> = self.entries.keys().collect();
        names.sort();
        f.debug_struct("PluginRegistry")
            .field("names", &names)
            .finish()
    }
}

/// Builds configured adapters from [`StorageConfig`]s
#[derive(Debug, Clone)]
pub struct StorageFactory {
    adapters: AdapterRegistry,
    plugins: PluginRegistry,
    signal: AbortSignal,
}

impl StorageFactory {
    /// Factory over every built-in backend and plugin
    #[must_use]
    pub fn new() -> Self {
        let signal = AbortSignal::new();
        Self {
            adapters: AdapterRegistry::with_builtins(),
            plugins: PluginRegistry::with_builtins(signal.clone()),
            signal,
        }
    }

    /// Factory over custom registries
    #[must_use]
    pub fn with_registries(adapters: AdapterRegistry, plugins: PluginRegistry) -> Self {
        Self {
            adapters,
            plugins,
            signal: AbortSignal::new(),
        }
    }

    #[must_use]
    pub fn adapters(&self) -> &AdapterRegistry {
        &self.adapters
    }

    #[must_use]
    pub fn plugins(&self) -> &PluginRegistry {
        &self.plugins
    }

    /// Signal shared by every built-in `IgnoreUserAbort` this factory creates
    #[must_use]
    pub fn abort_signal(&self) -> &AbortSignal {
        &self.signal
    }

    /// Build a new adapter and attach its plugins in order
    ///
    /// # Errors
    ///
    /// Any construction error from the adapter or plugin registries.
    pub fn build(&self, config: &StorageConfig) -> Result<StorageAdapter> {
        let adapter = self.adapters.create(&config.adapter, &config.options)?;
        for plugin_config in &config.plugins {
            let plugin = self
                .plugins
                .create(plugin_config.name(), &plugin_config.options())?;
            let priority = plugin_config.priority().unwrap_or(DEFAULT_PRIORITY);
            adapter.add_plugin_with_priority(plugin, priority)?;
        }
        info!(
            adapter = %config.adapter,
            plugins = config.plugins.len(),
            "Storage adapter built"
        );
        Ok(adapter)
    }
}

impl Default for StorageFactory {
    fn default() -> Self {
        Self::new()
    }
}

/// Named caches built on demand
///
/// Every `build` call returns a new adapter with its own backend, bus and
/// plugins; nothing is shared between two builds of the same name.
#[derive(Debug, Clone)]
pub struct CacheRegistry {
    factory: StorageFactory,
    caches: HashMap<String, StorageConfig>,
}

impl CacheRegistry {
    #[must_use]
    pub fn new(factory: StorageFactory, config: CachesConfig) -> Self {
        debug!(caches = config.caches.len(), "Cache registry configured");
        Self {
            factory,
            caches: config.caches,
        }
    }

    /// Whether `name` is configured
    #[must_use]
    pub fn has(&self, name: &str) -> bool {
        self.caches.contains_key(name)
    }

    /// Configured names, sorted
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.caches.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Build a fresh adapter for `name`
    ///
    /// # Errors
    ///
    /// `UnknownCache` if `name` is not configured, otherwise any
    /// construction error.
    pub fn build(&self, name: &str) -> Result<StorageAdapter> {
        let config = self
            .caches
            .get(name)
            .ok_or_else(|| CacheError::UnknownCache(name.to_string()))?;
        self.factory.build(config)
    }

    #[must_use]
    pub fn factory(&self) -> &StorageFactory {
        &self.factory
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_name() {
        for name in [
            "exception_handler",
            "ExceptionHandler",
            "exceptionHandler",
            "exception-handler",
        ] {
            assert_eq!(normalize_name(name), "exceptionhandler");
        }
    }

    #[test]
    fn test_unknown_names() {
        let factory = StorageFactory::new();
        let err = factory.build(&StorageConfig::new("nope")).unwrap_err();
        assert!(matches!(err, CacheError::UnknownAdapter(ref n) if n == "nope"));

        let err = factory
            .plugins()
            .create("nope", &Map::new())
            .unwrap_err();
        assert!(matches!(err, CacheError::UnknownPlugin(_)));
    }

    #[test]
    fn test_unknown_option_fails_at_build() {
        let config = StorageConfig::new("memory").option("max_itemz", 3);
        let err = StorageFactory::new().build(&config).unwrap_err();
        assert!(matches!(
            err,
            CacheError::InvalidOption { ref name, .. } if name == "max_itemz"
        ));
    }

    #[test]
    fn test_builtin_names() {
        let adapters = AdapterRegistry::with_builtins();
        assert!(adapters.has("Memory"));
        assert!(adapters.has("file-system"));
        let plugins = PluginRegistry::with_builtins(AbortSignal::new());
        for name in [
            "ExceptionHandler",
            "serializer",
            "ClearExpiredByFactor",
            "optimize_by_factor",
            "IgnoreUserAbort",
        ] {
            assert!(plugins.has(name), "{name}");
        }
    }
}
