//! Integration tests for the built-in plugins
//!
//! Covers attach/detach bookkeeping, exception handling, serialization over
//! a string-only backend, the factor plugins and shutdown protection.

mod common;

use common::*;
use parking_lot::Mutex;
use pluggable_cache::backends::{FilesystemBackend, MemoryBackend};
use pluggable_cache::plugins::{
    AbortSignal, ClearExpiredByFactor, ExceptionHandler, IgnoreUserAbort, OptimizeByFactor,
    Plugin, Serializer,
};
use pluggable_cache::{
    CacheError, CacheValue, ItemContext, Metadata, Operation, StorageAdapter,
    StorageBackend,
};
use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

fn filesystem_adapter(dir: &tempfile::TempDir) -> (Arc<FilesystemBackend>, StorageAdapter) {
    let backend = Arc::new(FilesystemBackend::new(dir.path()).unwrap());
    let cache = StorageAdapter::new(Arc::clone(&backend) as Arc<dyn StorageBackend>);
    (backend, cache)
}

// ===== Attach / Detach =====

/// Test that attaching the same plugin twice registers nothing new
#[test]
fn test_attach_is_idempotent() {
    let cache = memory_adapter();
    let plugin = Arc::new(Serializer::new());

    cache
        .add_plugin(Arc::clone(&plugin) as Arc<dyn Plugin>)
        .unwrap();
    let bindings = cache.events().len();
    assert!(bindings > 0);

    cache
        .add_plugin(Arc::clone(&plugin) as Arc<dyn Plugin>)
        .unwrap();
    Arc::clone(&plugin).attach(cache.events(), 5).unwrap();
    assert_eq!(cache.events().len(), bindings);
    assert_eq!(cache.plugins().len(), 1);
}

/// Test that detaching removes exactly the plugin's own listeners
#[test]
fn test_remove_plugin_removes_its_listeners() {
    let cache = memory_adapter();
    let handler = Arc::new(ExceptionHandler::new());
    let serializer = Arc::new(Serializer::new());
    cache
        .add_plugin(Arc::clone(&handler) as Arc<dyn Plugin>)
        .unwrap();
    cache
        .add_plugin(Arc::clone(&serializer) as Arc<dyn Plugin>)
        .unwrap();
    cache
        .events()
        .on(Operation::GetItem.pre(), 1, |_| Ok(()));

    assert!(cache.remove_plugin(serializer.id()));
    assert!(!cache.remove_plugin(serializer.id()));
    assert!(!cache.has_plugin(serializer.id()));
    assert_eq!(cache.events().len(), Operation::ALL.len() + 1);

    assert!(cache.remove_plugin(handler.id()));
    assert_eq!(cache.events().len(), 1);
    assert_eq!(cache.events().events(), vec![Operation::GetItem.pre()]);
}

/// Test that one plugin instance can serve several adapters independently
#[test]
fn test_plugin_shared_between_adapters() {
    let a = memory_adapter();
    let b = memory_adapter();
    let plugin: Arc<dyn Plugin> = Arc::new(ClearExpiredByFactor::new());
    a.add_plugin(Arc::clone(&plugin)).unwrap();
    b.add_plugin(Arc::clone(&plugin)).unwrap();

    assert!(a.remove_plugin(plugin.id()));
    assert!(a.events().is_empty());
    assert!(b.has_plugin(plugin.id()));
    assert_eq!(b.events().len(), 4);
}

// ===== ExceptionHandler =====

/// Test that a suppressed failure reports once and returns the fallback
#[test]
fn test_exception_handler_suppresses_and_reports() {
    let backend = RecordingBackend::failing();
    let cache = recording_adapter(&backend);
    let reported = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&reported);

    let handler = ExceptionHandler::with_callback(
        Arc::new(move |err: &CacheError| {
            assert_eq!(
                err.backend_error().map(ToString::to_string).as_deref(),
                Some(BACKEND_FAILURE)
            );
            counter.fetch_add(1, Ordering::SeqCst);
        }),
        false,
    )
    .unwrap();
    cache.add_plugin(Arc::new(handler)).unwrap();

    assert!(!cache.set_item("k", 1).unwrap());
    assert_eq!(reported.load(Ordering::SeqCst), 1);

    assert_eq!(cache.get_item("k").unwrap(), None);
    assert_eq!(
        cache.set_items([("a", 1), ("b", 2)]).unwrap(),
        vec!["a", "b"]
    );
    assert_eq!(cache.increment_item("n", 1).unwrap(), None);
    assert!(cache.get_items(&["a"]).unwrap().is_empty());
    assert_eq!(reported.load(Ordering::SeqCst), 5);
}

/// Test that the default handler reports but still propagates
#[test]
fn test_exception_handler_rethrows_by_default() {
    let cache = recording_adapter(&RecordingBackend::failing());
    let reported = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&reported);
    let handler = Arc::new(ExceptionHandler::new());
    handler
        .options()
        .set(
            "exception_callback",
            Arc::new(move |_: &CacheError| {
                counter.fetch_add(1, Ordering::SeqCst);
            }) as pluggable_cache::options::ExceptionCallback,
        )
        .unwrap();
    cache
        .add_plugin(Arc::clone(&handler) as Arc<dyn Plugin>)
        .unwrap();

    let err = cache.remove_item("k").unwrap_err();
    assert_eq!(err.to_string(), BACKEND_FAILURE);
    assert_eq!(reported.load(Ordering::SeqCst), 1);

    // Option changes apply to the next event
    handler.options().set("throw_exceptions", false).unwrap();
    assert!(!cache.remove_item("k").unwrap());
}

// ===== Serializer =====

/// Test that structured values survive a string-only backend
#[test]
fn test_serializer_over_filesystem() {
    let dir = tempfile::tempdir().unwrap();
    let (backend, cache) = filesystem_adapter(&dir);
    let user = CacheValue::from(json!({"name": "alice", "age": 30, "tags": ["a", "b"]}));

    // Without the plugin the backend refuses structured values
    assert!(cache.set_item("user", user.clone()).is_err());

    cache.add_plugin(Arc::new(Serializer::new())).unwrap();
    assert!(cache.set_item("user", user.clone()).unwrap());
    assert_eq!(cache.get_item("user").unwrap(), Some(user.clone()));

    let raw = backend.get("cache:user", &ItemContext::default()).unwrap();
    assert!(matches!(raw, Some(CacheValue::Bytes(_))));

    cache
        .set_items([("n", CacheValue::Int(1)), ("f", CacheValue::Float(2.5))])
        .unwrap();
    let items = cache.get_items(&["n", "f", "user"]).unwrap();
    assert_eq!(items["n"], CacheValue::Int(1));
    assert_eq!(items["f"], CacheValue::Float(2.5));
    assert_eq!(items["user"], user);
}

/// Test that the default codec keeps floats exact and refuses non-finite ones
#[test]
fn test_serializer_float_round_trip() {
    let cache = memory_adapter();
    cache.add_plugin(Arc::new(Serializer::new())).unwrap();

    let mut checked = 0;
    while checked < 2000 {
        let f = f64::from_bits(rand::random::<u64>());
        if !f.is_finite() {
            continue;
        }
        cache.set_item("f", f).unwrap();
        match cache.get_item("f").unwrap() {
            Some(CacheValue::Float(back)) => assert_eq!(back.to_bits(), f.to_bits()),
            other => panic!("{f:e} came back as {other:?}"),
        }
        checked += 1;
    }

    // A float-holding value still matches its own token
    let value = CacheValue::from(json!({"ratio": 0.1 + 0.2, "tiny": 1.947_700_395_895_162e-169}));
    cache.set_item("v", value.clone()).unwrap();
    let token = pluggable_cache::CasToken::new(value);
    assert!(cache.check_and_set_item(&token, "v", 1).unwrap());

    for bad in [f64::NAN, f64::INFINITY] {
        let err = cache.set_item("bad", bad).unwrap_err();
        assert!(matches!(err, CacheError::Serialization(_)));
    }
    let nested = CacheValue::List(vec![CacheValue::Float(f64::NEG_INFINITY)]);
    assert!(matches!(
        cache.set_item("bad", nested).unwrap_err(),
        CacheError::Serialization(_)
    ));
    assert_eq!(cache.get_item("bad").unwrap(), None);
}

/// Test that check-and-set compares against the encoded token
#[test]
fn test_serializer_check_and_set() {
    let dir = tempfile::tempdir().unwrap();
    let (_backend, cache) = filesystem_adapter(&dir);
    cache.add_plugin(Arc::new(Serializer::new())).unwrap();

    let value = CacheValue::from(json!({"v": 1}));
    cache.set_item("k", value.clone()).unwrap();
    let token = pluggable_cache::CasToken::new(value);
    assert!(cache.check_and_set_item(&token, "k", 2).unwrap());
    assert!(!cache.check_and_set_item(&token, "k", 3).unwrap());
    assert_eq!(cache.get_item("k").unwrap(), Some(CacheValue::Int(2)));
}

/// Test counters on a backend that only holds encoded bytes
#[test]
fn test_serializer_increment_and_decrement() {
    let dir = tempfile::tempdir().unwrap();
    let (_backend, cache) = filesystem_adapter(&dir);
    cache.add_plugin(Arc::new(Serializer::new())).unwrap();

    assert_eq!(cache.increment_item("n", 5).unwrap(), Some(5));
    assert_eq!(cache.increment_item("n", 3).unwrap(), Some(8));
    assert_eq!(cache.decrement_item("n", 2).unwrap(), Some(6));
    assert_eq!(cache.get_item("n").unwrap(), Some(CacheValue::Int(6)));

    let values = cache.increment_items([("n", 4), ("m", 1)]).unwrap();
    assert_eq!(values["n"], 10);
    assert_eq!(values["m"], 1);
    assert_eq!(cache.decrement_items([("m", 3)]).unwrap()["m"], -2);

    cache.set_item("s", "text").unwrap();
    assert!(matches!(
        cache.increment_item("s", 1).unwrap_err(),
        CacheError::InvalidArgument(_)
    ));
}

/// Test codec selection and values written before the plugin was attached
#[test]
fn test_serializer_codec_option() {
    assert!(Serializer::with_codec("JSON").is_ok());
    assert!(matches!(
        Serializer::with_codec("xml").unwrap_err(),
        CacheError::InvalidOption { .. }
    ));

    let cache = memory_adapter();
    cache.set_item("plain", "left alone").unwrap();
    cache.add_plugin(Arc::new(Serializer::new())).unwrap();
    assert_eq!(
        cache.get_item("plain").unwrap(),
        Some(CacheValue::from("left alone"))
    );
}

#[cfg(feature = "msgpack")]
#[test]
fn test_serializer_msgpack_codec() {
    let cache = memory_adapter();
    cache
        .add_plugin(Arc::new(Serializer::with_codec("msgpack").unwrap()))
        .unwrap();
    let value = CacheValue::from(json!({"list": [1, 2, 3]}));
    cache.set_item("k", value.clone()).unwrap();
    assert_eq!(cache.get_item("k").unwrap(), Some(value));
}

// ===== Factor plugins =====

/// Test that factor 1 sweeps after every insert
#[test]
fn test_clear_expired_by_factor_one() {
    let backend = RecordingBackend::new();
    let cache = recording_adapter(&backend);
    cache
        .add_plugin(Arc::new(ClearExpiredByFactor::with_factor(1).unwrap()))
        .unwrap();

    cache.set_item("a", 1).unwrap();
    cache.add_item("b", 2).unwrap();
    cache.set_items([("c", 3), ("d", 4)]).unwrap();
    assert_eq!(backend.calls("clear_expired"), 3);

    // Not an insert
    cache.replace_item("a", 5).unwrap();
    assert_eq!(backend.calls("clear_expired"), 3);
}

/// Test that factor 0 never sweeps
#[test]
fn test_clear_expired_by_factor_zero() {
    let backend = RecordingBackend::new();
    let cache = recording_adapter(&backend);
    let plugin = Arc::new(ClearExpiredByFactor::with_factor(0).unwrap());
    cache
        .add_plugin(Arc::clone(&plugin) as Arc<dyn Plugin>)
        .unwrap();

    for i in 0..20 {
        cache.set_item(&format!("k{i}"), i).unwrap();
    }
    assert_eq!(backend.calls("clear_expired"), 0);

    plugin.options().set("clearing_factor", 1).unwrap();
    cache.set_item("k", 1).unwrap();
    assert_eq!(backend.calls("clear_expired"), 1);
}

/// Test that factor 1 optimizes after every removal
#[test]
fn test_optimize_by_factor_one() {
    let backend = RecordingBackend::new();
    let cache = recording_adapter(&backend);
    cache
        .add_plugin(Arc::new(OptimizeByFactor::with_factor(1).unwrap()))
        .unwrap();

    cache.set_items([("a", 1), ("b", 2), ("c", 3)]).unwrap();
    assert_eq!(backend.calls("optimize"), 0);
    cache.remove_item("a").unwrap();
    cache.remove_items(&["b", "c"]).unwrap();
    assert_eq!(backend.calls("optimize"), 2);
}

// ===== IgnoreUserAbort =====

/// Memory backend that notes the in-flight count while it writes
struct ObservingBackend {
    inner: MemoryBackend,
    signal: AbortSignal,
    delay: Duration,
    observed: Mutex<Vec<usize>>,
}

impl ObservingBackend {
    fn new(signal: &AbortSignal, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            inner: MemoryBackend::new(),
            signal: signal.clone(),
            delay,
            observed: Mutex::new(Vec::new()),
        })
    }
}

impl StorageBackend for ObservingBackend {
    fn get(&self, key: &str, ctx: &ItemContext) -> anyhow::Result<Option<CacheValue>> {
        self.inner.get(key, ctx)
    }

    fn metadata(&self, key: &str, ctx: &ItemContext) -> anyhow::Result<Option<Metadata>> {
        self.inner.metadata(key, ctx)
    }

    fn set(&self, key: &str, value: CacheValue, ctx: &ItemContext) -> anyhow::Result<bool> {
        self.observed.lock().push(self.signal.in_flight());
        thread::sleep(self.delay);
        self.inner.set(key, value, ctx)
    }

    fn touch(&self, key: &str, ctx: &ItemContext) -> anyhow::Result<bool> {
        self.inner.touch(key, ctx)
    }

    fn remove(&self, key: &str) -> anyhow::Result<bool> {
        self.inner.remove(key)
    }

    fn flush(&self) -> anyhow::Result<()> {
        self.inner.flush()
    }
}

/// Test that writes are counted in flight only while they run
#[test]
fn test_ignore_user_abort_tracks_in_flight() {
    let signal = AbortSignal::new();
    let backend = ObservingBackend::new(&signal, Duration::ZERO);
    let cache = StorageAdapter::new(Arc::clone(&backend) as Arc<dyn StorageBackend>);
    cache
        .add_plugin(Arc::new(IgnoreUserAbort::new(signal.clone())))
        .unwrap();

    cache.set_item("a", 1).unwrap();
    cache.set_items([("b", 2), ("c", 3)]).unwrap();
    assert_eq!(*backend.observed.lock(), vec![1, 1, 1]);
    assert_eq!(signal.in_flight(), 0);
    assert!(signal.wait_for_writes(Duration::from_millis(10)));
}

/// Test that writes are refused once abort is requested
#[test]
fn test_ignore_user_abort_refuses_new_writes() {
    let backend = RecordingBackend::new();
    let cache = recording_adapter(&backend);
    let plugin = Arc::new(IgnoreUserAbort::new(AbortSignal::new()));
    cache
        .add_plugin(Arc::clone(&plugin) as Arc<dyn Plugin>)
        .unwrap();
    cache.set_item("kept", 1).unwrap();

    plugin.signal().request_abort();
    assert!(!cache.set_item("k", 1).unwrap());
    assert_eq!(
        cache.set_items([("a", 1), ("b", 2)]).unwrap(),
        vec!["a", "b"]
    );
    assert_eq!(cache.increment_item("n", 1).unwrap(), None);
    assert!(cache.increment_items([("n", 1)]).unwrap().is_empty());
    assert!(!cache.remove_item("kept").unwrap());
    assert_eq!(backend.calls("set"), 1);

    // Reads are unaffected
    assert_eq!(cache.get_item("kept").unwrap(), Some(CacheValue::Int(1)));

    // With exit_on_abort off the plugin only shields
    plugin.options().set("exit_on_abort", false).unwrap();
    assert!(cache.set_item("k", 1).unwrap());
}

/// Test that a host can wait for a running write to finish
#[test]
fn test_ignore_user_abort_drains_running_write() {
    let signal = AbortSignal::new();
    let backend = ObservingBackend::new(&signal, Duration::from_millis(150));
    let cache = Arc::new(StorageAdapter::new(
        Arc::clone(&backend) as Arc<dyn StorageBackend>
    ));
    cache
        .add_plugin(Arc::new(IgnoreUserAbort::new(signal.clone())))
        .unwrap();

    let writer = {
        let cache = Arc::clone(&cache);
        thread::spawn(move || cache.set_item("slow", "value").unwrap())
    };

    let mut waited = Duration::ZERO;
    while signal.in_flight() == 0 && waited < Duration::from_secs(2) {
        thread::sleep(Duration::from_millis(5));
        waited += Duration::from_millis(5);
    }
    assert_eq!(signal.in_flight(), 1);

    signal.request_abort();
    assert!(signal.wait_for_writes(Duration::from_secs(5)));
    assert!(writer.join().unwrap());
    assert_eq!(
        cache.get_item("slow").unwrap(),
        Some(CacheValue::from("value"))
    );
    assert!(!cache.set_item("after", 1).unwrap());
}

/// Test that writes issued inside a shielded write are never refused
#[test]
fn test_ignore_user_abort_nested_write() {
    let cache = memory_adapter();
    let signal = AbortSignal::new();
    let nested = Arc::new(Mutex::new(None));

    {
        let signal = signal.clone();
        let nested = Arc::clone(&nested);
        // Same priority as the plugin's release listener, registered first
        cache.events().on(Operation::SetItem.post(), i32::MAX, move |event| {
            if event.params().key() == Some("outer") {
                signal.request_abort();
                *nested.lock() = Some(event.target().set_item("inner", 1)?);
            }
            Ok(())
        });
    }
    cache
        .add_plugin(Arc::new(IgnoreUserAbort::new(signal.clone())))
        .unwrap();

    assert!(cache.set_item("outer", 1).unwrap());
    assert_eq!(*nested.lock(), Some(true));
    assert_eq!(signal.in_flight(), 0);
    assert!(!cache.set_item("later", 1).unwrap());
}

/// Test that a refused write never reaches the post phase
#[test]
fn test_ignore_user_abort_refused_write_skips_post() {
    let backend = RecordingBackend::new();
    let cache = recording_adapter(&backend);
    let plugin = Arc::new(IgnoreUserAbort::new(AbortSignal::new()));
    cache
        .add_plugin(Arc::clone(&plugin) as Arc<dyn Plugin>)
        .unwrap();
    let log = event_log();
    cache
        .events()
        .on(Operation::TouchItem.post(), 1, log_listener(&log, ""));

    plugin.signal().request_abort();
    assert!(!cache.touch_item("k").unwrap());
    assert!(log.lock().is_empty());
    assert_eq!(backend.calls("touch"), 0);
    assert_eq!(plugin.signal().in_flight(), 0);
}

/// Test one plugin shared by adapters that come and go
#[test]
fn test_ignore_user_abort_across_rebuilt_adapters() {
    let plugin = Arc::new(IgnoreUserAbort::new(AbortSignal::new()));
    let mut ids = std::collections::HashSet::new();

    for i in 0..20 {
        let cache = memory_adapter();
        cache
            .add_plugin(Arc::clone(&plugin) as Arc<dyn Plugin>)
            .unwrap();
        assert!(ids.insert(cache.id()));
        assert!(cache.set_item(&format!("k{i}"), i).unwrap());
        assert_eq!(plugin.signal().in_flight(), 0);
    }

    plugin.signal().request_abort();
    for i in 0..20 {
        let cache = memory_adapter();
        cache
            .add_plugin(Arc::clone(&plugin) as Arc<dyn Plugin>)
            .unwrap();
        assert!(ids.insert(cache.id()));
        assert!(!cache.set_item(&format!("k{i}"), i).unwrap());
    }
}
