//! Integration tests for the construction boundary
//!
//! These tests build adapters from declarative configuration and check that
//! options, plugins and named caches end up wired the way they were described.

mod common;

use pluggable_cache::config::{CachesConfig, PluginConfig, StorageConfig};
use pluggable_cache::factory::{AdapterRegistry, CacheRegistry, PluginRegistry, StorageFactory};
use pluggable_cache::options::OptionsSchema;
use pluggable_cache::plugins::AbortSignal;
use pluggable_cache::{CacheError, CacheValue, Operation, Options, StorageBackend};
use serde_json::json;
use std::sync::Arc;

fn caches_config() -> CachesConfig {
    serde_json::from_value(json!({
        "caches": {
            "sessions": {
                "adapter": "memory",
                "options": { "namespace": "sess", "ttl": 1800 },
                "plugins": [
                    "Serializer",
                    { "name": "exception-handler", "options": { "throw_exceptions": false } }
                ]
            },
            "pages": { "adapter": "Memory" }
        }
    }))
    .unwrap()
}

/// Test building a configured adapter with plugins
#[test]
fn test_factory_builds_configured_adapter() {
    let config = StorageConfig::new("memory")
        .option("namespace", "app")
        .option("ttl", 60)
        .plugin(PluginConfig::from("serializer"))
        .plugin(PluginConfig::from("ClearExpiredByFactor"));
    let cache = StorageFactory::new().build(&config).unwrap();

    assert_eq!(cache.backend_name(), "memory");
    assert_eq!(cache.options().get_str("namespace").unwrap(), "app");
    assert_eq!(cache.options().get_float("ttl").unwrap(), 60.0);
    let names: Vec<&str> = cache.plugins().iter().map(|p| p.name()).collect();
    assert_eq!(names, vec!["serializer", "clear_expired_by_factor"]);

    cache
        .set_item("k", CacheValue::from(json!([1, 2])))
        .unwrap();
    assert_eq!(
        cache.get_item("k").unwrap(),
        Some(CacheValue::from(json!([1, 2])))
    );
}

/// Test that plugin options and priority from configuration are applied
#[test]
fn test_plugin_options_and_priority() {
    let plugin: PluginConfig = serde_json::from_value(json!({
        "name": "Exception_Handler",
        "options": { "throw_exceptions": false },
        "priority": 7
    }))
    .unwrap();
    let config = StorageConfig::new("memory").plugin(plugin);
    let cache = StorageFactory::new().build(&config).unwrap();

    let plugins = cache.plugins();
    assert_eq!(plugins.len(), 1);
    assert!(!plugins[0].options().get_bool("throw_exceptions").unwrap());

    let listeners = cache.events().listeners(Operation::SetItem.exception());
    assert_eq!(listeners.len(), 1);
    assert_eq!(listeners[0].priority, 7);
    assert_eq!(listeners[0].method, Some("on_exception"));
}

/// Test that configuration mistakes fail at build time
#[test]
fn test_invalid_configuration_fails_fast() {
    let factory = StorageFactory::new();

    let err = factory.build(&StorageConfig::new("tape")).unwrap_err();
    assert!(matches!(err, CacheError::UnknownAdapter(_)));

    let err = factory
        .build(&StorageConfig::new("memory").plugin(PluginConfig::from("compressor")))
        .unwrap_err();
    assert!(matches!(err, CacheError::UnknownPlugin(ref n) if n == "compressor"));

    let err = factory
        .build(&StorageConfig::new("memory").option("ttl", -5))
        .unwrap_err();
    assert!(matches!(
        err,
        CacheError::InvalidOption { ref name, .. } if name == "ttl"
    ));

    let err = factory
        .build(&StorageConfig::new("memory").option("max_items", json!([1])))
        .unwrap_err();
    assert!(matches!(err, CacheError::InvalidOption { .. }));

    let bad_codec: PluginConfig =
        serde_json::from_value(json!({"name": "serializer", "options": {"serializer": "xml"}}))
            .unwrap();
    let err = factory
        .build(&StorageConfig::new("memory").plugin(bad_codec))
        .unwrap_err();
    assert!(matches!(
        err,
        CacheError::InvalidOption { ref name, .. } if name == "serializer"
    ));
}

/// Test that every lookup of a named cache yields an independent adapter
#[test]
fn test_cache_registry_builds_independent_adapters() {
    let registry = CacheRegistry::new(StorageFactory::new(), caches_config());
    assert_eq!(registry.names(), vec!["pages", "sessions"]);
    assert!(registry.has("sessions"));

    let first = registry.build("sessions").unwrap();
    let second = registry.build("sessions").unwrap();
    first.set_item("user", CacheValue::from(json!({"id": 1}))).unwrap();
    assert_eq!(second.get_item("user").unwrap(), None);

    assert_eq!(first.plugins().len(), 2);
    assert_ne!(first.plugins()[0].id(), second.plugins()[0].id());
    assert_eq!(first.options().get_str("namespace").unwrap(), "sess");

    let pages = registry.build("pages").unwrap();
    assert!(pages.plugins().is_empty());
    assert_eq!(pages.options().get_str("namespace").unwrap(), "cache");

    let err = registry.build("missing").unwrap_err();
    assert!(matches!(err, CacheError::UnknownCache(ref n) if n == "missing"));
}

/// Test that lowering `max_items` on a live adapter evicts immediately
#[test]
fn test_max_items_reconfiguration() {
    let cache = StorageFactory::new()
        .build(&StorageConfig::new("memory").option("max_items", 10))
        .unwrap();
    for i in 0..5 {
        cache.set_item(&format!("k{i}"), i).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(2));
    }

    cache.options().set("max_items", 2).unwrap();
    let keys: Vec<String> = (0..5).map(|i| format!("k{i}")).collect();
    let mut present = cache.has_items(&keys).unwrap();
    present.sort();
    assert_eq!(present, vec!["k3", "k4"]);

    cache.set_item("k5", 5).unwrap();
    assert_eq!(cache.has_items(&keys).unwrap(), vec!["k4"]);
}

/// Test the filesystem backend through the factory
#[test]
fn test_filesystem_adapter_from_config() {
    let dir = tempfile::tempdir().unwrap();
    let config = StorageConfig::new("filesystem")
        .option("cache_dir", dir.path().to_string_lossy().into_owned())
        .option("namespace", "fs")
        .plugin(PluginConfig::from("serializer"))
        .plugin(PluginConfig::from("optimize_by_factor"));
    let cache = StorageFactory::new().build(&config).unwrap();

    assert_eq!(cache.backend_name(), "filesystem");
    assert!(!cache.capabilities().structured_values);
    cache.set_item("n", 41).unwrap();
    assert_eq!(cache.increment_item("n", 1).unwrap(), Some(42));
    assert!(cache.remove_item("n").unwrap());

    // Keys are limited by what fits in a file name
    let long_key = "x".repeat(200);
    assert!(matches!(
        cache.set_item(&long_key, 1).unwrap_err(),
        CacheError::InvalidKey { .. }
    ));
}

#[cfg(feature = "moka")]
#[test]
fn test_moka_adapter_from_config() {
    let cache = StorageFactory::new()
        .build(&StorageConfig::new("moka").option("max_capacity", 100))
        .unwrap();
    assert_eq!(cache.backend_name(), "moka");
    cache.set_item("k", "v").unwrap();
    assert_eq!(cache.get_item("k").unwrap(), Some(CacheValue::from("v")));
}

/// Test registering a custom backend and plugin
#[test]
fn test_custom_registrations() {
    let build = |_: &Options| -> pluggable_cache::Result<Arc<dyn StorageBackend>> {
        Ok(common::RecordingBackend::new() as Arc<dyn StorageBackend>)
    };
    let adapters =
        AdapterRegistry::new().register("Recording", OptionsSchema::new(), Arc::new(build));
    let signal = AbortSignal::new();
    let plugins = PluginRegistry::with_builtins(signal.clone());
    let factory = StorageFactory::with_registries(adapters, plugins);

    assert!(factory.adapters().has("recording"));
    assert!(!factory.adapters().has("memory"));
    assert_eq!(factory.adapters().names(), vec!["recording"]);

    let cache = factory
        .build(&StorageConfig::new("recording").plugin(PluginConfig::from("ignore_user_abort")))
        .unwrap();
    assert_eq!(cache.backend_name(), "recording");

    // The registry's plugins observe the signal they were built with
    signal.request_abort();
    assert!(!cache.set_item("k", 1).unwrap());
}
