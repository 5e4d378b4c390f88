//! Clear Expired By Factor Plugin
//!
//! Probabilistic garbage collection: after roughly one in `clearing_factor`
//! successful writes, sweep expired items from the backend.

use std::sync::Arc;
use tracing::debug;

use crate::error::Result;
use crate::event::{Event, Operation};
use crate::event_bus::{EventBus, OwnerId};
use crate::options::{OptionRule, OptionSpec, Options, OptionsSchema};
use crate::plugins::{Plugin, bind, roll};

/// Sweep expired items after 1 in N `setItem(s)`/`addItem(s)`
#[derive(Debug)]
pub struct ClearExpiredByFactor {
    id: OwnerId,
    options: Arc<Options>,
}

impl ClearExpiredByFactor {
    /// Settings: `clearing_factor` (default `100`; `0` disables, `1` always)
    #[must_use]
    pub fn schema() -> OptionsSchema {
        OptionsSchema::new()
            .with(OptionSpec::with_default("clearing_factor", OptionRule::int(0, i64::MAX), 100))
    }

    #[must_use]
    pub fn new() -> Self {
        Self {
            id: OwnerId::new(),
            options: Arc::new(Options::new(Self::schema())),
        }
    }

    /// # Errors
    ///
    /// Returns `InvalidOption` for a negative factor.
    pub fn with_factor(factor: i64) -> Result<Self> {
        let plugin = Self::new();
        plugin.options.set("clearing_factor", factor)?;
        Ok(plugin)
    }

    /// Listener for the post phase of every insert
    ///
    /// # Errors
    ///
    /// Propagates errors from the triggered `clear_expired` operation.
    pub fn clear_expired_by_factor(&self, event: &mut Event<'_>) -> Result<()> {
        let target = event.target();
        if !target.capabilities().clear_expired {
            return Ok(());
        }
        if roll(self.options.get_int("clearing_factor")?) {
            debug!(event = %event.name(), "Clearing expired items");
            target.clear_expired()?;
        }
        Ok(())
    }
}

impl Default for ClearExpiredByFactor {
    fn default() -> Self {
        Self::new()
    }
}

impl Plugin for ClearExpiredByFactor {
    fn id(&self) -> OwnerId {
        self.id
    }

    fn name(&self) -> &'static str {
        "clear_expired_by_factor"
    }

    fn options(&self) -> &Arc<Options> {
        &self.options
    }

    fn attach(self: Arc<Self>, events: &EventBus, priority: i32) -> Result<()> {
        for op in [
            Operation::SetItem,
            Operation::SetItems,
            Operation::AddItem,
            Operation::AddItems,
        ] {
            bind(
                &self,
                events,
                "clear_expired_by_factor",
                op.post(),
                priority,
                Self::clear_expired_by_factor,
            )?;
        }
        Ok(())
    }
}
