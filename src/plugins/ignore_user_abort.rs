//! Ignore User Abort Plugin
//!
//! Shields writes from host shutdown. The host owns an [`AbortSignal`]; when
//! it wants to stop it calls [`AbortSignal::request_abort`] and then
//! [`AbortSignal::wait_for_writes`] to let writes that already started
//! finish. With `exit_on_abort` set, writes that have not started yet are
//! refused (their pre event is stopped with a "not written" result).
//!
//! A write counts as in flight from the last pre listener of the outermost
//! write on a thread until that write's post or exception phase. Writes
//! issued by listeners inside it (e.g. the serializer's increments) share the
//! outer activation.

use parking_lot::{Condvar, Mutex};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, ThreadId};
use std::time::Duration;
use tracing::{debug, info};

use crate::adapter::AdapterId;
use crate::error::Result;
use crate::event::{Event, EventResult, Operation};
use crate::event_bus::{EventBus, OwnerId};
use crate::options::{OptionRule, OptionSpec, Options, OptionsSchema};
use crate::plugins::{Plugin, bind};

#[derive(Debug, Default)]
struct AbortState {
    requested: AtomicBool,
    in_flight: Mutex<usize>,
    drained: Condvar,
}

/// Shutdown handshake shared between a host and its `IgnoreUserAbort` plugins
#[derive(Debug, Clone, Default)]
pub struct AbortSignal {
    state: Arc<AbortState>,
}

impl AbortSignal {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask attached plugins to stop admitting new writes
    pub fn request_abort(&self) {
        self.state.requested.store(true, Ordering::SeqCst);
        info!(in_flight = self.in_flight(), "Abort requested");
    }

    #[must_use]
    pub fn is_abort_requested(&self) -> bool {
        self.state.requested.load(Ordering::SeqCst)
    }

    /// Writes currently shielded
    #[must_use]
    pub fn in_flight(&self) -> usize {
        *self.state.in_flight.lock()
    }

    /// Block until no write is in flight or `timeout` elapses
    ///
    /// Returns `true` if every write drained.
    pub fn wait_for_writes(&self, timeout: Duration) -> bool {
        let mut in_flight = self.state.in_flight.lock();
        self.state
            .drained
            .wait_while_for(&mut in_flight, |n| *n > 0, timeout);
        *in_flight == 0
    }

    fn begin(&self) {
        *self.state.in_flight.lock() += 1;
    }

    fn end(&self) {
        let mut in_flight = self.state.in_flight.lock();
        *in_flight = in_flight.saturating_sub(1);
        if *in_flight == 0 {
            self.state.drained.notify_all();
        }
    }
}

/// (target adapter, nesting depth) of the active write per thread
type Activations = HashMap<ThreadId, (AdapterId, usize)>;

/// Keep writes that already started from being cut off by host shutdown
#[derive(Debug)]
pub struct IgnoreUserAbort {
    id: OwnerId,
    options: Arc<Options>,
    signal: AbortSignal,
    active: Mutex<Activations>,
}

const WRITE_OPERATIONS: [Operation; 16] = [
    Operation::SetItem,
    Operation::SetItems,
    Operation::AddItem,
    Operation::AddItems,
    Operation::ReplaceItem,
    Operation::ReplaceItems,
    Operation::CheckAndSetItem,
    Operation::TouchItem,
    Operation::TouchItems,
    Operation::RemoveItem,
    Operation::RemoveItems,
    Operation::IncrementItem,
    Operation::IncrementItems,
    Operation::DecrementItem,
    Operation::DecrementItems,
    Operation::ClearExpired,
];

impl IgnoreUserAbort {
    /// Settings: `exit_on_abort` (default `true`)
    #[must_use]
    pub fn schema() -> OptionsSchema {
        OptionsSchema::new()
            .with(OptionSpec::with_default("exit_on_abort", OptionRule::Bool, true))
    }

    #[must_use]
    pub fn new(signal: AbortSignal) -> Self {
        Self {
            id: OwnerId::new(),
            options: Arc::new(Options::new(Self::schema())),
            signal,
            active: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn signal(&self) -> &AbortSignal {
        &self.signal
    }

    /// Pre listener: refuse the write or mark it in flight
    ///
    /// # Errors
    ///
    /// Returns an error only if the plugin's own options are unreadable.
    pub fn on_before(&self, event: &mut Event<'_>) -> Result<()> {
        let target = event.target().id();
        let thread = thread::current().id();
        let mut active = self.active.lock();
        match active.get_mut(&thread) {
            // Nested in a write that is already shielded
            Some((adapter, depth)) if *adapter == target => {
                *depth += 1;
                return Ok(());
            }
            Some(_) => return Ok(()),
            None => {}
        }

        if self.signal.is_abort_requested() && self.options.get_bool("exit_on_abort")? {
            debug!(event = %event.name(), "Write refused after abort request");
            let refused = match event.operation() {
                Operation::SetItems
                | Operation::AddItems
                | Operation::ReplaceItems
                | Operation::TouchItems
                | Operation::RemoveItems => EventResult::Keys(event.params().keys()),
                Operation::IncrementItem | Operation::DecrementItem => EventResult::Number(None),
                Operation::IncrementItems | Operation::DecrementItems => EventResult::Null,
                _ => EventResult::Bool(false),
            };
            event.set_result(refused);
            event.stop();
            return Ok(());
        }

        active.insert(thread, (target, 1));
        self.signal.begin();
        Ok(())
    }

    /// Post and exception listener: release the write once the outermost completes
    ///
    /// # Errors
    ///
    /// Never fails.
    pub fn on_after(&self, event: &mut Event<'_>) -> Result<()> {
        let target = event.target().id();
        let thread = thread::current().id();
        let mut active = self.active.lock();
        let finished = match active.get_mut(&thread) {
            Some((adapter, depth)) if *adapter == target => {
                *depth -= 1;
                *depth == 0
            }
            _ => false,
        };
        if finished {
            active.remove(&thread);
            self.signal.end();
        }
        Ok(())
    }
}

impl Plugin for IgnoreUserAbort {
    fn id(&self) -> OwnerId {
        self.id
    }

    fn name(&self) -> &'static str {
        "ignore_user_abort"
    }

    fn options(&self) -> &Arc<Options> {
        &self.options
    }

    /// The pre listener always runs last and the release listeners first,
    /// whatever `priority` says, so short-circuited writes are never counted.
    fn attach(self: Arc<Self>, events: &EventBus, _priority: i32) -> Result<()> {
        for op in WRITE_OPERATIONS {
            bind(
                &self,
                events,
                "on_before",
                op.pre(),
                i32::MIN,
                Self::on_before,
            )?;
            bind(
                &self,
                events,
                "on_after",
                op.post(),
                i32::MAX,
                Self::on_after,
            )?;
            bind(
                &self,
                events,
                "on_after",
                op.exception(),
                i32::MAX,
                Self::on_after,
            )?;
        }
        Ok(())
    }
}
