//! Storage Plugins
//!
//! A plugin is a reusable bundle of listeners plus its own options. Plugins
//! never touch backends directly: they observe and rewrite events, and may
//! call back into the adapter carried by the event.
//!
//! Attaching registers the plugin's bindings on an adapter's event bus under
//! the plugin's [`OwnerId`]; attaching again registers nothing new, and
//! detaching removes exactly the bindings that plugin created.
//!
//! # Built-in plugins
//!
//! - [`ExceptionHandler`]: observe or suppress operation errors
//! - [`Serializer`]: encode values with a codec before they reach the backend
//! - [`ClearExpiredByFactor`]: sweep expired items after 1 in N writes
//! - [`OptimizeByFactor`]: optimize the backend after 1 in N removals
//! - [`IgnoreUserAbort`]: keep writes from starting or being lost during shutdown

use std::fmt::Debug;
use std::sync::Arc;

use crate::error::{CacheError, Result};
use crate::event::{Event, EventName};
use crate::event_bus::{EventBus, OwnerId};
use crate::options::Options;

mod clear_expired_by_factor;
mod exception_handler;
mod ignore_user_abort;
mod optimize_by_factor;
mod serializer;

pub use clear_expired_by_factor::ClearExpiredByFactor;
pub use exception_handler::ExceptionHandler;
pub use ignore_user_abort::{AbortSignal, IgnoreUserAbort};
pub use optimize_by_factor::OptimizeByFactor;
pub use serializer::Serializer;

/// A bundle of listeners that can be attached to storage adapters
///
/// # Example: Custom Plugin
///
/// ```rust,ignore
/// use pluggable_cache::plugins::{Plugin, bind};
///
/// #[derive(Debug)]
/// struct HitLogger { id: OwnerId, options: Arc<Options> }
///
/// impl Plugin for HitLogger {
///     fn id(&self) -> OwnerId { self.id }
///     fn name(&self) -> &'static str { "hit_logger" }
///     fn options(&self) -> &Arc<Options> { &self.options }
///
///     fn attach(self: Arc<Self>, events: &EventBus, priority: i32) -> Result<()> {
///         bind(&self, events, "on_get", Operation::GetItem.post(), priority, Self::on_get)
///     }
/// }
/// ```
pub trait Plugin: Send + Sync + Debug {
    /// Identity under which the plugin's bindings are registered
    fn id(&self) -> OwnerId;

    /// Canonical plugin name, used in logs and by the plugin registry
    fn name(&self) -> &'static str;

    /// The plugin's own settings; changes apply to the next event
    fn options(&self) -> &Arc<Options>;

    /// Register the plugin's listeners on `events`
    ///
    /// Must be idempotent: bindings that already exist are left alone.
    ///
    /// # Errors
    ///
    /// Returns an error if a binding could not be registered.
    fn attach(self: Arc<Self>, events: &EventBus, priority: i32) -> Result<()>;

    /// Remove every listener this plugin registered on `events`
    fn detach(&self, events: &EventBus) -> usize {
        events.off_by_owner(self.id())
    }
}

/// Bind one plugin method to one event, skipping bindings that already exist
///
/// # Errors
///
/// Returns any bus error other than `DuplicateListener`.
pub fn bind<P, F>(
    plugin: &Arc<P>,
    events: &EventBus,
    method: &'static str,
    event: EventName,
    priority: i32,
    handler: F,
) -> Result<()>
where
    P: Plugin + 'static,
    F: Fn(&P, &mut Event<'_>) -> Result<()> + Send + Sync + 'static,
{
    let this = Arc::clone(plugin);
    let bound = events.on_owned(plugin.id(), method, event, priority, move |e: &mut Event<'_>| {
        handler(&*this, e)
    });
    match bound {
        Ok(_) | Err(CacheError::DuplicateListener { .. }) => Ok(()),
        Err(e) => Err(e),
    }
}

/// 1-in-`factor` coin flip shared by the factor plugins; `0` never fires
pub(crate) fn roll(factor: i64) -> bool {
    match factor {
        i64::MIN..=0 => false,
        1 => true,
        n => rand::random::<u64>() % n.unsigned_abs() == 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roll_bounds() {
        assert!(!roll(0));
        assert!(roll(1));
        // Any factor above one eventually fires and eventually misses
        let hits = (0..2000).filter(|_| roll(2)).count();
        assert!(hits > 0 && hits < 2000);
    }
}
