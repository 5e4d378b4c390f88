//! Event Bus
//!
//! Per-adapter registry of `(event name → listener)` bindings.
//!
//! Ordering is the central guarantee: listeners for one event run in
//! descending priority, and listeners with equal priority run in the order
//! they were registered. `trigger` works on a snapshot of the bindings taken
//! when it starts and holds no lock while listeners run, so a listener may
//! call back into the adapter (triggering nested events), attach or detach
//! listeners, or reconfigure options. Nested triggers never share iteration
//! state with the outer one.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, trace};
use uuid::Uuid;

use crate::error::{CacheError, Result};
use crate::event::{Event, EventName};

/// Priority used when callers do not care
pub const DEFAULT_PRIORITY: i32 = 1;

/// A listener callback
pub type Listener = Arc<dyn Fn(&mut Event<'_>) -> Result<()> + Send + Sync>;

/// Identity of whoever owns a set of bindings (normally a plugin)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OwnerId(Uuid);

impl OwnerId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for OwnerId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Handle returned by `on`, used to remove that one binding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerHandle {
    event: EventName,
    id: u64,
}

impl ListenerHandle {
    #[must_use]
    pub fn event(&self) -> EventName {
        self.event
    }
}

/// Description of a binding, in invocation order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenerInfo {
    pub priority: i32,
    pub owner: Option<OwnerId>,
    pub method: Option<&'static str>,
}

#[derive(Clone)]
struct Binding {
    id: u64,
    priority: i32,
    owner: Option<OwnerId>,
    method: Option<&'static str>,
    callback: Listener,
}

/// Ordered listener registry for one adapter
pub struct EventBus {
    bindings: RwLock<HashMap<EventName, Vec<Binding>>>,
    next_id: AtomicU64,
}

impl EventBus {
    #[must_use]
    pub fn new() -> Self {
        Self {
            bindings: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(0),
        }
    }

    fn insert(
        &self,
        event: EventName,
        mut binding: Binding,
        list: &mut Vec<Binding>,
    ) -> ListenerHandle {
        binding.id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let id = binding.id;
        // After every binding with priority >= ours: equal priorities keep registration order
        let pos = list.partition_point(|b| b.priority >= binding.priority);
        list.insert(pos, binding);
        ListenerHandle { event, id }
    }

    /// Register an anonymous listener
    pub fn on<F>(&self, event: EventName, priority: i32, callback: F) -> ListenerHandle
    where
        F: Fn(&mut Event<'_>) -> Result<()> + Send + Sync + 'static,
    {
        let binding = Binding {
            id: 0,
            priority,
            owner: None,
            method: None,
            callback: Arc::new(callback),
        };
        let mut bindings = self.bindings.write();
        let handle = self.insert(event, binding, bindings.entry(event).or_default());
        trace!(event = %event, priority, "Listener attached");
        handle
    }

    /// Register a listener on behalf of `owner`
    ///
    /// `method` names the owner's callback; together with `owner` and
    /// `event` it identifies the binding.
    ///
    /// # Errors
    ///
    /// Returns `DuplicateListener` if the same owner already bound `method`
    /// to `event`.
    pub fn on_owned<F>(
        &self,
        owner: OwnerId,
        method: &'static str,
        event: EventName,
        priority: i32,
        callback: F,
    ) -> Result<ListenerHandle>
    where
        F: Fn(&mut Event<'_>) -> Result<()> + Send + Sync + 'static,
    {
        let mut bindings = self.bindings.write();
        let list = bindings.entry(event).or_default();
        if list
            .iter()
            .any(|b| b.owner == Some(owner) && b.method == Some(method))
        {
            return Err(CacheError::DuplicateListener {
                event: event.to_string(),
                method: method.to_string(),
            });
        }
        let binding = Binding {
            id: 0,
            priority,
            owner: Some(owner),
            method: Some(method),
            callback: Arc::new(callback),
        };
        let handle = self.insert(event, binding, list);
        trace!(event = %event, owner = %owner, method, priority, "Listener attached");
        Ok(handle)
    }

    /// Remove one binding; returns whether it was still registered
    pub fn off(&self, handle: ListenerHandle) -> bool {
        let mut bindings = self.bindings.write();
        let Some(list) = bindings.get_mut(&handle.event) else {
            return false;
        };
        let before = list.len();
        list.retain(|b| b.id != handle.id);
        let removed = list.len() != before;
        if list.is_empty() {
            bindings.remove(&handle.event);
        }
        removed
    }

    /// Remove every binding created by `owner`; returns how many were removed
    pub fn off_by_owner(&self, owner: OwnerId) -> usize {
        let mut bindings = self.bindings.write();
        let mut removed = 0;
        bindings.retain(|_, list| {
            let before = list.len();
            list.retain(|b| b.owner != Some(owner));
            removed += before - list.len();
            !list.is_empty()
        });
        debug!(owner = %owner, removed, "Listeners detached by owner");
        removed
    }

    /// Whether `owner` has `method` bound to `event`
    #[must_use]
    pub fn has_binding(&self, owner: OwnerId, method: &'static str, event: EventName) -> bool {
        self.bindings.read().get(&event).is_some_and(|list| {
            list.iter()
                .any(|b| b.owner == Some(owner) && b.method == Some(method))
        })
    }

    /// Bindings for `event`, in the order `trigger` would run them
    #[must_use]
    pub fn listeners(&self, event: EventName) -> Vec<ListenerInfo> {
        self.bindings
            .read()
            .get(&event)
            .map(|list| {
                list.iter()
                    .map(|b| ListenerInfo {
                        priority: b.priority,
                        owner: b.owner,
                        method: b.method,
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Event names with at least one binding
    #[must_use]
    pub fn events(&self) -> Vec<EventName> {
        self.bindings.read().keys().copied().collect()
    }

    /// Total number of bindings
    #[must_use]
    pub fn len(&self) -> usize {
        self.bindings.read().values().map(Vec::len).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bindings.read().is_empty()
    }

    /// Run every listener bound to `event.name()` in order
    ///
    /// Stops early once a listener stops the event.
    ///
    /// # Errors
    ///
    /// Returns the first error a listener returns; later listeners do not run.
    pub fn trigger(&self, event: &mut Event<'_>) -> Result<()> {
        let snapshot: Vec<Listener> = match self.bindings.read().get(&event.name()) {
            Some(list) => list.iter().map(|b| Arc::clone(&b.callback)).collect(),
            None => return Ok(()),
        };

        trace!(event = %event.name(), listeners = snapshot.len(), "Triggering event");
        for listener in snapshot {
            listener(event)?;
            if event.is_stopped() {
                debug!(event = %event.name(), "Event propagation stopped by listener");
                break;
            }
        }
        Ok(())
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("bindings", &self.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::StorageAdapter;
    use crate::backends::MemoryBackend;
    use crate::event::{Operation, Params};
    use parking_lot::Mutex;

    fn adapter() -> StorageAdapter {
        StorageAdapter::new(Arc::new(MemoryBackend::new()))
    }

    fn recorder(
        log: &Arc<Mutex<Vec<&'static str>>>,
        tag: &'static str,
    ) -> impl Fn(&mut Event<'_>) -> Result<()> + Send + Sync + 'static {
        let log = Arc::clone(log);
        move |_: &mut Event<'_>| {
            log.lock().push(tag);
            Ok(())
        }
    }

    #[test]
    fn test_priority_then_registration_order() {
        let bus = EventBus::new();
        let target = adapter();
        let log = Arc::new(Mutex::new(Vec::new()));
        let name = Operation::GetItem.pre();

        bus.on(name, 1, recorder(&log, "a1"));
        bus.on(name, 10, recorder(&log, "b10"));
        bus.on(name, 1, recorder(&log, "c1"));
        bus.on(name, -5, recorder(&log, "d-5"));
        bus.on(name, 10, recorder(&log, "e10"));
        bus.on(name, 1, recorder(&log, "f1"));

        let mut event = Event::new(name, &target, Params::Key { key: "k".into() });
        bus.trigger(&mut event).unwrap();

        assert_eq!(*log.lock(), vec!["b10", "e10", "a1", "c1", "f1", "d-5"]);
    }

    #[test]
    fn test_only_matching_event_runs() {
        let bus = EventBus::new();
        let target = adapter();
        let log = Arc::new(Mutex::new(Vec::new()));
        bus.on(Operation::GetItem.pre(), 1, recorder(&log, "get"));
        bus.on(Operation::GetItems.pre(), 1, recorder(&log, "gets"));

        let mut event = Event::new(Operation::GetItems.pre(), &target, Params::None);
        bus.trigger(&mut event).unwrap();
        assert_eq!(*log.lock(), vec!["gets"]);
    }

    #[test]
    fn test_stop_halts_remaining_listeners() {
        let bus = EventBus::new();
        let target = adapter();
        let log = Arc::new(Mutex::new(Vec::new()));
        let name = Operation::SetItem.pre();

        bus.on(name, 5, recorder(&log, "first"));
        let stop_log = Arc::clone(&log);
        bus.on(name, 3, move |event| {
            stop_log.lock().push("stopper");
            event.stop();
            Ok(())
        });
        bus.on(name, 1, recorder(&log, "never"));

        let mut event = Event::new(name, &target, Params::None);
        bus.trigger(&mut event).unwrap();
        assert!(event.is_stopped());
        assert_eq!(*log.lock(), vec!["first", "stopper"]);
    }

    #[test]
    fn test_listener_error_aborts_trigger() {
        let bus = EventBus::new();
        let target = adapter();
        let log = Arc::new(Mutex::new(Vec::new()));
        let name = Operation::SetItem.post();

        bus.on(name, 2, |_| Err(CacheError::UnknownPlugin("boom".into())));
        bus.on(name, 1, recorder(&log, "after"));

        let mut event = Event::new(name, &target, Params::None);
        assert!(bus.trigger(&mut event).is_err());
        assert!(log.lock().is_empty());
    }

    #[test]
    fn test_duplicate_owned_binding_rejected() {
        let bus = EventBus::new();
        let owner = OwnerId::new();
        let name = Operation::GetItem.exception();

        bus.on_owned(owner, "on_exception", name, 1, |_| Ok(()))
            .unwrap();
        let err = bus
            .on_owned(owner, "on_exception", name, 1, |_| Ok(()))
            .unwrap_err();
        assert!(matches!(err, CacheError::DuplicateListener { .. }));

        // A different owner, or a different method, is a different binding
        bus.on_owned(OwnerId::new(), "on_exception", name, 1, |_| Ok(()))
            .unwrap();
        bus.on_owned(owner, "on_other", name, 1, |_| Ok(()))
            .unwrap();
        assert_eq!(bus.listeners(name).len(), 3);
    }

    #[test]
    fn test_off_and_off_by_owner() {
        let bus = EventBus::new();
        let owner = OwnerId::new();
        let anon = bus.on(Operation::GetItem.pre(), 1, |_| Ok(()));
        bus.on_owned(owner, "a", Operation::GetItem.pre(), 1, |_| Ok(()))
            .unwrap();
        bus.on_owned(owner, "a", Operation::SetItem.post(), 1, |_| Ok(()))
            .unwrap();

        assert_eq!(bus.off_by_owner(owner), 2);
        assert_eq!(bus.len(), 1);
        assert_eq!(bus.events(), vec![Operation::GetItem.pre()]);

        assert!(bus.off(anon));
        assert!(!bus.off(anon));
        assert!(bus.is_empty());
    }

    #[test]
    fn test_detach_during_trigger_uses_snapshot() {
        let bus = Arc::new(EventBus::new());
        let target = adapter();
        let log = Arc::new(Mutex::new(Vec::new()));
        let name = Operation::RemoveItem.post();

        let late = bus.on(name, 1, recorder(&log, "late"));
        let bus_ref = Arc::downgrade(&bus);
        bus.on(name, 2, move |_| {
            if let Some(bus) = bus_ref.upgrade() {
                bus.off(late);
            }
            Ok(())
        });

        let mut event = Event::new(name, &target, Params::None);
        bus.trigger(&mut event).unwrap();
        // Removed mid-trigger, but the running trigger still sees it
        assert_eq!(*log.lock(), vec!["late"]);

        log.lock().clear();
        let mut event = Event::new(name, &target, Params::None);
        bus.trigger(&mut event).unwrap();
        assert!(log.lock().is_empty());
    }
}
