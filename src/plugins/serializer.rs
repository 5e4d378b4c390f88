//! Serializer Plugin
//!
//! Lets backends that only store strings or bytes hold any [`CacheValue`].
//! Values are encoded with the configured codec on the way in and decoded on
//! the way out; the backend only ever sees `CacheValue::Bytes`.
//!
//! Arithmetic cannot be delegated to a backend that holds encoded bytes, so
//! `increment`/`decrement` are taken over entirely: the pre listener stops the
//! event and performs a read followed by a check-and-set (or an add for
//! missing items) on the same adapter.

use anyhow::anyhow;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use crate::adapter::StorageAdapter;
use crate::codecs::{CODEC_NAMES, codec_by_name};
use crate::error::{CacheError, Result};
use crate::event::{Event, EventResult, Operation, Params};
use crate::event_bus::{EventBus, OwnerId};
use crate::options::{OptionRule, OptionSpec, Options, OptionsSchema, lowercase};
use crate::plugins::{Plugin, bind};
use crate::traits::CacheCodec;
use crate::value::{CacheValue, CasToken};

/// Encode values with a codec before they reach the backend
#[derive(Debug)]
pub struct Serializer {
    id: OwnerId,
    options: Arc<Options>,
}

impl Serializer {
    /// Settings: `serializer` (`json`, `bincode` or `msgpack`, case-insensitive, default `json`)
    #[must_use]
    pub fn schema() -> OptionsSchema {
        OptionsSchema::new().with(
            OptionSpec::new("serializer", OptionRule::one_of(CODEC_NAMES))
                .default_value("json")
                .normalizer(lowercase),
        )
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
    /// Returns `InvalidOption` for an unknown codec name.
    pub fn with_codec(name: &str) -> Result<Self> {
        let plugin = Self::new();
        plugin.options.set("serializer", name)?;
        Ok(plugin)
    }

    /// The codec currently selected by the `serializer` option
    ///
    /// # Errors
    ///
    /// Returns `Serialization` if the codec's cargo feature is disabled.
    pub fn codec(&self) -> Result<Arc<dyn CacheCodec>> {
        let name = self.options.get_str("serializer")?;
        codec_by_name(&name).ok_or_else(|| {
            CacheError::Serialization(anyhow!("codec '{name}' is not compiled into this build"))
        })
    }

    fn encode(codec: &dyn CacheCodec, value: &CacheValue) -> Result<CacheValue> {
        codec
            .serialize(value)
            .map(CacheValue::Bytes)
            .map_err(CacheError::Serialization)
    }

    fn decode(codec: &dyn CacheCodec, value: CacheValue) -> Result<CacheValue> {
        match value {
            CacheValue::Bytes(bytes) => codec
                .deserialize(&bytes)
                .map_err(CacheError::Serialization),
            // Written without this plugin; hand it back untouched
            other => Ok(other),
        }
    }

    /// Pre listener for every write that carries values
    ///
    /// # Errors
    ///
    /// Returns `Serialization` if a value cannot be encoded.
    pub fn on_write_item_pre(&self, event: &mut Event<'_>) -> Result<()> {
        let codec = self.codec()?;
        for value in event.params_mut().values_mut() {
            *value = Self::encode(codec.as_ref(), value)?;
        }
        if let Params::CheckAndSet { token, .. } = event.params_mut() {
            *token = CasToken::new(Self::encode(codec.as_ref(), token.value())?);
        }
        Ok(())
    }

    /// Post listener for `getItem`/`getItems`
    ///
    /// # Errors
    ///
    /// Returns `Serialization` if stored bytes cannot be decoded.
    pub fn on_read_item_post(&self, event: &mut Event<'_>) -> Result<()> {
        let codec = self.codec()?;
        match std::mem::take(event.result_mut()) {
            EventResult::Item(Some(value)) => {
                event.set_result(EventResult::Item(Some(Self::decode(codec.as_ref(), value)?)));
            }
            EventResult::Items(items) => {
                let decoded = items
                    .into_iter()
                    .map(|(k, v)| Ok((k, Self::decode(codec.as_ref(), v)?)))
                    .collect::<Result<HashMap<_, _>>>()?;
                event.set_result(EventResult::Items(decoded));
            }
            other => event.set_result(other),
        }
        Ok(())
    }

    /// Pre listener for increment/decrement: do the arithmetic here
    ///
    /// # Errors
    ///
    /// Returns an error for non-integer items, overflow, or any error of the
    /// nested read/write operations.
    pub fn on_increment_pre(&self, event: &mut Event<'_>) -> Result<()> {
        let target = event.target();
        let negate = matches!(
            event.operation(),
            Operation::DecrementItem | Operation::DecrementItems
        );
        event.stop();

        let result = match event.params() {
            Params::KeyDelta { key, delta } => {
                EventResult::Number(Self::apply_delta(target, key, *delta, negate)?)
            }
            Params::KeyDeltas { items } => {
                let mut values = HashMap::with_capacity(items.len());
                for (key, delta) in items {
                    if let Some(value) = Self::apply_delta(target, key, *delta, negate)? {
                        values.insert(key.clone(), value);
                    }
                }
                EventResult::Numbers(values)
            }
            other => {
                return Err(CacheError::InvalidArgument(format!(
                    "{} cannot run with {} params",
                    event.operation(),
                    other.kind()
                )));
            }
        };
        event.set_result(result);
        Ok(())
    }

    fn apply_delta(
        target: &StorageAdapter,
        key: &str,
        delta: i64,
        negate: bool,
    ) -> Result<Option<i64>> {
        let delta = if negate {
            delta
                .checked_neg()
                .ok_or_else(|| CacheError::InvalidArgument(format!("cannot decrement by {delta}")))?
        } else {
            delta
        };

        let Some(current) = target.get_item(key)? else {
            debug!(key = %key, delta, "Creating counter");
            return Ok(target.add_item(key, delta)?.then_some(delta));
        };

        let Some(old) = current.as_int() else {
            return Err(CacheError::InvalidArgument(format!(
                "cannot increment {} item '{key}'",
                current.kind()
            )));
        };
        let next = old.checked_add(delta).ok_or_else(|| {
            CacheError::InvalidArgument(format!("incrementing '{key}' by {delta} overflows"))
        })?;

        let token = CasToken::new(current);
        Ok(target.check_and_set_item(&token, key, next)?.then_some(next))
    }
}

impl Default for Serializer {
    fn default() -> Self {
        Self::new()
    }
}

impl Plugin for Serializer {
    fn id(&self) -> OwnerId {
        self.id
    }

    fn name(&self) -> &'static str {
        "serializer"
    }

    fn options(&self) -> &Arc<Options> {
        &self.options
    }

    /// Pre listeners run at `priority`, post listeners at `-priority`
    fn attach(self: Arc<Self>, events: &EventBus, priority: i32) -> Result<()> {
        let post_priority = priority.saturating_neg();

        for op in [Operation::GetItem, Operation::GetItems] {
            bind(
                &self,
                events,
                "on_read_item_post",
                op.post(),
                post_priority,
                Self::on_read_item_post,
            )?;
        }

        for op in [
            Operation::SetItem,
            Operation::SetItems,
            Operation::AddItem,
            Operation::AddItems,
            Operation::ReplaceItem,
            Operation::ReplaceItems,
            Operation::CheckAndSetItem,
        ] {
            bind(
                &self,
                events,
                "on_write_item_pre",
                op.pre(),
                priority,
                Self::on_write_item_pre,
            )?;
        }

        for op in [
            Operation::IncrementItem,
            Operation::IncrementItems,
            Operation::DecrementItem,
            Operation::DecrementItems,
        ] {
            bind(
                &self,
                events,
                "on_increment_pre",
                op.pre(),
                priority,
                Self::on_increment_pre,
            )?;
        }
        Ok(())
    }
}
