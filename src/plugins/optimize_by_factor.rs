//! Optimize By Factor Plugin

use std::sync::Arc;
use tracing::debug;

use crate::error::Result;
use crate::event::{Event, Operation};
use crate::event_bus::{EventBus, OwnerId};
use crate::options::{OptionRule, OptionSpec, Options, OptionsSchema};
use crate::plugins::{Plugin, bind, roll};

/// Optimize the backend after 1 in N removals or expiry sweeps
#[derive(Debug)]
pub struct OptimizeByFactor {
    id: OwnerId,
    options: Arc<Options>,
}

impl OptimizeByFactor {
    /// Settings: `optimizing_factor` (default `100`; `0` disables, `1` always)
    #[must_use]
    pub fn schema() -> OptionsSchema {
        OptionsSchema::new()
            .with(OptionSpec::with_default("optimizing_factor", OptionRule::int(0, i64::MAX), 100))
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
        plugin.options.set("optimizing_factor", factor)?;
        Ok(plugin)
    }

    /// # Errors
    ///
    /// Propagates the backend's optimize error.
    pub fn optimize_by_factor(&self, event: &mut Event<'_>) -> Result<()> {
        if roll(self.options.get_int("optimizing_factor")?) {
            debug!(event = %event.name(), "Optimizing storage");
            event.target().optimize()?;
        }
        Ok(())
    }
}

impl Default for OptimizeByFactor {
    fn default() -> Self {
        Self::new()
    }
}

impl Plugin for OptimizeByFactor {
    fn id(&self) -> OwnerId {
        self.id
    }

    fn name(&self) -> &'static str {
        "optimize_by_factor"
    }

    fn options(&self) -> &Arc<Options> {
        &self.options
    }

    fn attach(self: Arc<Self>, events: &EventBus, priority: i32) -> Result<()> {
        for op in [
            Operation::RemoveItem,
            Operation::RemoveItems,
            Operation::ClearExpired,
        ] {
            bind(
                &self,
                events,
                "optimize_by_factor",
                op.post(),
                priority,
                Self::optimize_by_factor,
            )?;
        }
        Ok(())
    }
}
