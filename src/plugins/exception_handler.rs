//! Exception Handler Plugin
//!
//! Binds `on_exception` to the exception phase of every operation. It hands
//! the error to an optional callback, then decides whether the error keeps
//! propagating. With `throw_exceptions = false` the caller receives the
//! operation's fallback result instead of the error.

use std::sync::Arc;
use tracing::debug;

use crate::error::Result;
use crate::event::{Event, Operation};
use crate::event_bus::{EventBus, OwnerId};
use crate::options::{ExceptionCallback, OptionRule, OptionSpec, Options, OptionsSchema};
use crate::plugins::{Plugin, bind};

/// Observe operation errors and optionally swallow them
#[derive(Debug)]
pub struct ExceptionHandler {
    id: OwnerId,
    options: Arc<Options>,
}

impl ExceptionHandler {
    /// Settings: `throw_exceptions` (default `true`), `exception_callback`
    #[must_use]
    pub fn schema() -> OptionsSchema {
        OptionsSchema::new()
            .with(OptionSpec::with_default("throw_exceptions", OptionRule::Bool, true))
            .with(OptionSpec::new("exception_callback", OptionRule::Callback))
    }

    #[must_use]
    pub fn new() -> Self {
        Self {
            id: OwnerId::new(),
            options: Arc::new(Options::new(Self::schema())),
        }
    }

    /// Convenience for the common "call me and keep going" setup
    ///
    /// # Errors
    ///
    /// Never fails for the built-in schema; kept fallible for symmetry with
    /// `Options::set`.
    pub fn with_callback(callback: ExceptionCallback, throw_exceptions: bool) -> Result<Self> {
        let plugin = Self::new();
        plugin.options.set("exception_callback", callback)?;
        plugin.options.set("throw_exceptions", throw_exceptions)?;
        Ok(plugin)
    }

    /// Listener for every `<op>.exception` event
    ///
    /// # Errors
    ///
    /// Returns an error only if the plugin's own options are unreadable.
    pub fn on_exception(&self, event: &mut Event<'_>) -> Result<()> {
        if let Some(callback) = self.options.get_callback("exception_callback")? {
            if let Some(error) = event.exception() {
                callback(error);
            }
        }

        let throw = self.options.get_bool("throw_exceptions")?;
        if !throw {
            debug!(event = %event.name(), "Exception suppressed");
        }
        event.set_throw_exception(throw);
        Ok(())
    }
}

impl Default for ExceptionHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl Plugin for ExceptionHandler {
    fn id(&self) -> OwnerId {
        self.id
    }

    fn name(&self) -> &'static str {
        "exception_handler"
    }

    fn options(&self) -> &Arc<Options> {
        &self.options
    }

    fn attach(self: Arc<Self>, events: &EventBus, priority: i32) -> Result<()> {
        for op in Operation::ALL {
            bind(
                &self,
                events,
                "on_exception",
                op.exception(),
                priority,
                Self::on_exception,
            )?;
        }
        Ok(())
    }
}
