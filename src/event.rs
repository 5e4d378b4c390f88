//! Operation events
//!
//! Every adapter operation runs through up to two phases, each represented
//! by one [`Event`] passed by `&mut` to the listeners bound to its name:
//!
//! ```text
//! <op>.pre  ──stopped──▶ return event.result
//!    │
//!    ▼ backend call
//! <op>.post (Ok)  |  <op>.exception (Err)
//! ```
//!
//! Event names are the compatibility surface plugins are written against,
//! e.g. `getItem.pre`, `setItems.post`, `clearExpired.exception`. Batched
//! operations (`*Items`) fire one event per phase for the whole batch; they
//! never fire the singular events for their elements.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::adapter::StorageAdapter;
use crate::error::CacheError;
use crate::value::{CacheValue, CasToken, Metadata};

/// Every evented operation family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    GetItem,
    GetItems,
    HasItem,
    HasItems,
    GetMetadata,
    GetMetadatas,
    SetItem,
    SetItems,
    AddItem,
    AddItems,
    ReplaceItem,
    ReplaceItems,
    TouchItem,
    TouchItems,
    RemoveItem,
    RemoveItems,
    CheckAndSetItem,
    IncrementItem,
    IncrementItems,
    DecrementItem,
    DecrementItems,
    ClearExpired,
}

impl Operation {
    pub const ALL: [Operation; 22] = [
        Self::GetItem,
        Self::GetItems,
        Self::HasItem,
        Self::HasItems,
        Self::GetMetadata,
        Self::GetMetadatas,
        Self::SetItem,
        Self::SetItems,
        Self::AddItem,
        Self::AddItems,
        Self::ReplaceItem,
        Self::ReplaceItems,
        Self::TouchItem,
        Self::TouchItems,
        Self::RemoveItem,
        Self::RemoveItems,
        Self::CheckAndSetItem,
        Self::IncrementItem,
        Self::IncrementItems,
        Self::DecrementItem,
        Self::DecrementItems,
        Self::ClearExpired,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::GetItem => "getItem",
            Self::GetItems => "getItems",
            Self::HasItem => "hasItem",
            Self::HasItems => "hasItems",
            Self::GetMetadata => "getMetadata",
            Self::GetMetadatas => "getMetadatas",
            Self::SetItem => "setItem",
            Self::SetItems => "setItems",
            Self::AddItem => "addItem",
            Self::AddItems => "addItems",
            Self::ReplaceItem => "replaceItem",
            Self::ReplaceItems => "replaceItems",
            Self::TouchItem => "touchItem",
            Self::TouchItems => "touchItems",
            Self::RemoveItem => "removeItem",
            Self::RemoveItems => "removeItems",
            Self::CheckAndSetItem => "checkAndSetItem",
            Self::IncrementItem => "incrementItem",
            Self::IncrementItems => "incrementItems",
            Self::DecrementItem => "decrementItem",
            Self::DecrementItems => "decrementItems",
            Self::ClearExpired => "clearExpired",
        }
    }

    /// Operations that modify stored items
    #[must_use]
    pub fn is_write(self) -> bool {
        !matches!(
            self,
            Self::GetItem
                | Self::GetItems
                | Self::HasItem
                | Self::HasItems
                | Self::GetMetadata
                | Self::GetMetadatas
        )
    }

    /// Event name for one phase of this operation
    #[must_use]
    pub fn event(self, phase: Phase) -> EventName {
        EventName {
            operation: self,
            phase,
        }
    }

    #[must_use]
    pub fn pre(self) -> EventName {
        self.event(Phase::Pre)
    }

    #[must_use]
    pub fn post(self) -> EventName {
        self.event(Phase::Post)
    }

    #[must_use]
    pub fn exception(self) -> EventName {
        self.event(Phase::Exception)
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Phase of an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    /// Before the backend call; listeners may rewrite params or short-circuit
    Pre,
    /// After a successful backend call; listeners may rewrite the result
    Post,
    /// After a failure; listeners may suppress the error
    Exception,
}

impl Phase {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pre => "pre",
            Self::Post => "post",
            Self::Exception => "exception",
        }
    }
}

/// `<operation>.<phase>`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EventName {
    pub operation: Operation,
    pub phase: Phase,
}

impl fmt::Display for EventName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.operation.as_str(), self.phase.as_str())
    }
}

/// Returned when parsing a string that is not part of the event namespace
#[derive(Debug, Error, PartialEq, Eq)]
#[error("'{0}' is not a storage event name")]
pub struct UnknownEventName(pub String);

impl FromStr for EventName {
    type Err = UnknownEventName;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let unknown = || UnknownEventName(s.to_string());
        let (op, phase) = s.rsplit_once('.').ok_or_else(unknown)?;
        let operation = Operation::ALL
            .into_iter()
            .find(|o| o.as_str() == op)
            .ok_or_else(unknown)?;
        let phase = match phase {
            "pre" => Phase::Pre,
            "post" => Phase::Post,
            "exception" => Phase::Exception,
            _ => return Err(unknown()),
        };
        Ok(operation.event(phase))
    }
}

/// Arguments of an operation, in call order
///
/// Pre listeners may rewrite them; the backend sees the rewritten version.
#[derive(Debug, Clone, PartialEq)]
pub enum Params {
    None,
    Key { key: String },
    Keys { keys: Vec<String> },
    KeyValue { key: String, value: CacheValue },
    KeyValuePairs { items: Vec<(String, CacheValue)> },
    CheckAndSet {
        token: CasToken,
        key: String,
        value: CacheValue,
    },
    KeyDelta { key: String, delta: i64 },
    KeyDeltas { items: Vec<(String, i64)> },
}

impl Params {
    #[must_use]
    pub fn for_key(key: &str) -> Self {
        Self::Key {
            key: key.to_string(),
        }
    }

    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Key { .. } => "key",
            Self::Keys { .. } => "keys",
            Self::KeyValue { .. } => "key/value",
            Self::KeyValuePairs { .. } => "key/value pairs",
            Self::CheckAndSet { .. } => "check-and-set",
            Self::KeyDelta { .. } => "key/delta",
            Self::KeyDeltas { .. } => "key/delta pairs",
        }
    }

    /// Key of a singular operation
    #[must_use]
    pub fn key(&self) -> Option<&str> {
        match self {
            Self::Key { key }
            | Self::KeyValue { key, .. }
            | Self::CheckAndSet { key, .. }
            | Self::KeyDelta { key, .. } => Some(key),
            _ => None,
        }
    }

    /// Every key the operation touches
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        match self {
            Self::None => Vec::new(),
            Self::Keys { keys } => keys.clone(),
            Self::KeyValuePairs { items } => items.iter().map(|(k, _)| k.clone()).collect(),
            Self::KeyDeltas { items } => items.iter().map(|(k, _)| k.clone()).collect(),
            other => other.key().map(str::to_string).into_iter().collect(),
        }
    }

    /// Mutable access to every value about to be written
    pub fn values_mut(&mut self) -> Vec<&mut CacheValue> {
        match self {
            Self::KeyValue { value, .. } | Self::CheckAndSet { value, .. } => vec![value],
            Self::KeyValuePairs { items } => items.iter_mut().map(|(_, v)| v).collect(),
            _ => Vec::new(),
        }
    }
}

/// The in-flight result of an operation
#[derive(Debug, Clone, PartialEq, Default)]
pub enum EventResult {
    /// Nothing supplied yet; the adapter substitutes the operation's empty result
    #[default]
    Null,
    Bool(bool),
    Item(Option<CacheValue>),
    Items(HashMap<String, CacheValue>),
    Keys(Vec<String>),
    Metadata(Option<Metadata>),
    Metadatas(HashMap<String, Metadata>),
    Number(Option<i64>),
    Numbers(HashMap<String, i64>),
}

impl EventResult {
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Item(_) => "item",
            Self::Items(_) => "items",
            Self::Keys(_) => "keys",
            Self::Metadata(_) => "metadata",
            Self::Metadatas(_) => "metadatas",
            Self::Number(_) => "number",
            Self::Numbers(_) => "numbers",
        }
    }
}

/// One phase of one operation invocation
///
/// Created by the adapter, handed by exclusive reference to each listener
/// in turn, dropped when the phase completes.
pub struct Event<'a> {
    name: EventName,
    target: &'a StorageAdapter,
    params: Params,
    result: EventResult,
    exception: Option<CacheError>,
    stopped: bool,
    throw_exception: bool,
}

impl<'a> Event<'a> {
    /// A fresh event for `name`; mostly useful for driving listeners in tests
    #[must_use]
    pub fn new(name: EventName, target: &'a StorageAdapter, params: Params) -> Self {
        Self {
            name,
            target,
            params,
            result: EventResult::Null,
            exception: None,
            stopped: false,
            throw_exception: true,
        }
    }

    /// An exception-phase event carrying `error` and the caller-visible fallback
    #[must_use]
    pub fn with_exception(
        operation: Operation,
        target: &'a StorageAdapter,
        params: Params,
        error: CacheError,
        fallback: EventResult,
    ) -> Self {
        let mut event = Self::new(operation.exception(), target, params);
        event.exception = Some(error);
        event.result = fallback;
        event
    }

    #[must_use]
    pub fn name(&self) -> EventName {
        self.name
    }

    #[must_use]
    pub fn operation(&self) -> Operation {
        self.name.operation
    }

    #[must_use]
    pub fn phase(&self) -> Phase {
        self.name.phase
    }

    /// The adapter running the operation; listeners may call back into it
    #[must_use]
    pub fn target(&self) -> &'a StorageAdapter {
        self.target
    }

    #[must_use]
    pub fn params(&self) -> &Params {
        &self.params
    }

    pub fn params_mut(&mut self) -> &mut Params {
        &mut self.params
    }

    #[must_use]
    pub fn result(&self) -> &EventResult {
        &self.result
    }

    pub fn result_mut(&mut self) -> &mut EventResult {
        &mut self.result
    }

    pub fn set_result(&mut self, result: EventResult) {
        self.result = result;
    }

    /// The error being handled (exception phase only)
    #[must_use]
    pub fn exception(&self) -> Option<&CacheError> {
        self.exception.as_ref()
    }

    pub fn set_exception(&mut self, error: CacheError) {
        self.exception = Some(error);
    }

    /// Stop further listeners; in the pre phase this also skips the backend
    pub fn stop(&mut self) {
        self.stopped = true;
    }

    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    /// Whether the exception will propagate once listeners are done
    #[must_use]
    pub fn throw_exception(&self) -> bool {
        self.throw_exception
    }

    pub fn set_throw_exception(&mut self, throw: bool) {
        self.throw_exception = throw;
    }

    pub(crate) fn into_parts(self) -> (Params, EventResult, Option<CacheError>) {
        (self.params, self.result, self.exception)
    }
}

impl fmt::Debug for Event<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Event")
            .field("name", &self.name.to_string())
            .field("params", &self.params)
            .field("result", &self.result)
            .field("exception", &self.exception)
            .field("stopped", &self.stopped)
            .field("throw_exception", &self.throw_exception)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_namespace_is_exact() {
        let names: Vec<String> = Operation::ALL.iter().map(|o| o.pre().to_string()).collect();
        assert_eq!(
            names,
            [
                "getItem.pre",
                "getItems.pre",
                "hasItem.pre",
                "hasItems.pre",
                "getMetadata.pre",
                "getMetadatas.pre",
                "setItem.pre",
                "setItems.pre",
                "addItem.pre",
                "addItems.pre",
                "replaceItem.pre",
                "replaceItems.pre",
                "touchItem.pre",
                "touchItems.pre",
                "removeItem.pre",
                "removeItems.pre",
                "checkAndSetItem.pre",
                "incrementItem.pre",
                "incrementItems.pre",
                "decrementItem.pre",
                "decrementItems.pre",
                "clearExpired.pre",
            ]
        );
        assert_eq!(
            Operation::ClearExpired.exception().to_string(),
            "clearExpired.exception"
        );
        assert_eq!(Operation::SetItems.post().to_string(), "setItems.post");
    }

    #[test]
    fn test_parse_event_name() {
        let parsed: EventName = "checkAndSetItem.exception".parse().unwrap();
        assert_eq!(parsed, Operation::CheckAndSetItem.exception());
        assert!("getItem.during".parse::<EventName>().is_err());
        assert!("flush.pre".parse::<EventName>().is_err());
        assert!("getItem".parse::<EventName>().is_err());
    }

    #[test]
    fn test_params_keys() {
        let params = Params::KeyValuePairs {
            items: vec![("a".into(), CacheValue::Int(1)), ("b".into(), CacheValue::Int(2))],
        };
        assert_eq!(params.keys(), vec!["a".to_string(), "b".to_string()]);
        assert_eq!(params.key(), None);

        let params = Params::KeyDelta {
            key: "n".into(),
            delta: 2,
        };
        assert_eq!(params.key(), Some("n"));
    }
}
