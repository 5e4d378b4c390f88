//! Basic Usage Example
//!
//! Demonstrates an adapter built from configuration, a serializer over a
//! string-only backend, suppressed failures and a graceful shutdown.
//!
//! Run with: cargo run --example basic_usage

use pluggable_cache::config::{PluginConfig, StorageConfig};
use pluggable_cache::factory::StorageFactory;
use pluggable_cache::{CacheValue, Operation};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    println!("=== Pluggable Cache: Basic Usage ===\n");

    // 1. Filesystem adapter with a serializer in front and shutdown protection
    let cache_dir = std::env::temp_dir().join("pluggable-cache-demo");
    let factory = StorageFactory::new();
    let config = StorageConfig::new("filesystem")
        .option("cache_dir", cache_dir.to_string_lossy().into_owned())
        .option("namespace", "demo")
        .option("ttl", 300)
        .plugin(PluginConfig::from("serializer"))
        .plugin(PluginConfig::from("clear_expired_by_factor"))
        .plugin(PluginConfig::from("ignore_user_abort"));
    let cache = factory.build(&config)?;
    println!(
        "Built '{}' adapter in {}\n",
        cache.backend_name(),
        cache_dir.display()
    );

    // 2. Structured values round-trip through the serializer
    let user = CacheValue::from(serde_json::json!({
        "id": 1,
        "name": "Alice",
        "roles": ["admin", "ops"]
    }));
    cache.set_item("user:1", user)?;
    if let Some(cached) = cache.get_item("user:1")? {
        println!("✅ Retrieved user:1 = {cached:?}");
    }

    // 3. Counters work even though the backend only stores bytes
    cache.increment_item("visits", 1)?;
    let visits = cache.increment_item("visits", 1)?;
    println!("✅ visits = {visits:?}\n");

    // 4. A listener observing every write
    cache.events().on(Operation::SetItem.post(), 0, |event| {
        tracing::info!(key = ?event.params().key(), result = ?event.result(), "write finished");
        Ok(())
    });
    cache.set_item("greeting", "hello")?;

    // 5. Shutdown: stop admitting writes, let running ones finish
    let signal = factory.abort_signal();
    signal.request_abort();
    let drained = signal.wait_for_writes(Duration::from_secs(1));
    println!("\nAbort requested, writes drained: {drained}");
    println!("Write after abort stored: {}", cache.set_item("late", "x")?);

    cache.flush()?;
    println!("\n=== Done ===");
    Ok(())
}
