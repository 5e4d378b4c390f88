//! Error taxonomy
//!
//! Configuration problems (`InvalidOption`, `UnknownAdapter`, `UnknownPlugin`)
//! surface straight to whoever is constructing things. Everything that goes
//! wrong while an operation runs is delivered through the `<op>.exception`
//! event first, and only reaches the caller if no listener suppresses it.

use thiserror::Error;

/// Result alias used across the public API
pub type Result<T, E = CacheError> = std::result::Result<T, E>;

/// Errors raised by adapters, plugins, options and the construction boundary
#[derive(Debug, Error)]
pub enum CacheError {
    /// Unknown setting name or value outside the setting's domain
    #[error("invalid option '{name}': {reason}")]
    InvalidOption { name: String, reason: String },

    /// No adapter is registered under the given identifier
    #[error("unknown storage adapter '{0}'")]
    UnknownAdapter(String),

    /// No named cache is configured under the given identifier
    #[error("no cache configured as '{0}'")]
    UnknownCache(String),

    /// No plugin is registered under the given identifier
    #[error("unknown storage plugin '{0}'")]
    UnknownPlugin(String),

    /// Key rejected before the operation started (empty or pattern mismatch)
    #[error("invalid key '{key}': {reason}")]
    InvalidKey { key: String, reason: String },

    /// Malformed operation arguments (empty key list, params rewritten to the wrong shape, ...)
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The same owner tried to bind the same method to the same event twice
    #[error("listener '{method}' already bound to '{event}' for this owner")]
    DuplicateListener { event: String, method: String },

    /// A listener left a result of the wrong kind in the event's result slot
    #[error("unexpected result for '{event}': got {found}")]
    UnexpectedResult {
        event: String,
        found: &'static str,
    },

    /// Encoding or decoding a cache value failed
    #[error("serialization failed: {0}")]
    Serialization(#[source] anyhow::Error),

    /// Failure reported by the storage backend, kept exactly as raised
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

impl CacheError {
    pub(crate) fn invalid_option(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidOption {
            name: name.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn invalid_key(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidKey {
            key: key.into(),
            reason: reason.into(),
        }
    }

    /// Borrow the original backend error, if this is one
    #[must_use]
    pub fn backend_error(&self) -> Option<&anyhow::Error> {
        match self {
            Self::Backend(e) => Some(e),
            _ => None,
        }
    }
}
