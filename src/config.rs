//! Declarative Configuration
//!
//! Serde shapes for describing adapters, their plugins, and sets of named
//! caches. The [`StorageFactory`](crate::factory::StorageFactory) and
//! [`CacheRegistry`](crate::factory::CacheRegistry) turn them into adapters.
//!
//! ```rust
//! use pluggable_cache::config::CachesConfig;
//!
//! let config: CachesConfig = serde_json::from_str(r#"{
//!     "caches": {
//!         "sessions": {
//!             "adapter": "memory",
//!             "options": { "ttl": 1800, "namespace": "sess" },
//!             "plugins": [
//!                 "serializer",
//!                 { "name": "exception_handler", "options": { "throw_exceptions": false } }
//!             ]
//!         }
//!     }
//! }"#).unwrap();
//!
//! let sessions = &config.caches["sessions"];
//! assert_eq!(sessions.plugins[1].name(), "exception_handler");
//! ```

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;

/// One adapter: backend name, option payload, plugins in attach order
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Backend identifier, e.g. `memory`, `filesystem`
    pub adapter: String,
    /// Adapter plus backend settings
    #[serde(default)]
    pub options: Map<String, Value>,
    #[serde(default)]
    pub plugins: Vec<PluginConfig>,
}

impl StorageConfig {
    #[must_use]
    pub fn new(adapter: impl Into<String>) -> Self {
        Self {
            adapter: adapter.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn option(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.options.insert(name.into(), value.into());
        self
    }

    #[must_use]
    pub fn plugin(mut self, plugin: PluginConfig) -> Self {
        self.plugins.push(plugin);
        self
    }
}

/// A plugin reference: just a name, or a name with options and priority
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PluginConfig {
    Name(String),
    Detailed {
        name: String,
        #[serde(default)]
        options: Map<String, Value>,
        #[serde(default)]
        priority: Option<i32>,
    },
}

impl PluginConfig {
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Name(name) | Self::Detailed { name, .. } => name,
        }
    }

    /// Option payload (empty for the short form)
    #[must_use]
    pub fn options(&self) -> Map<String, Value> {
        match self {
            Self::Name(_) => Map::new(),
            Self::Detailed { options, .. } => options.clone(),
        }
    }

    #[must_use]
    pub fn priority(&self) -> Option<i32> {
        match self {
            Self::Name(_) => None,
            Self::Detailed { priority, .. } => *priority,
        }
    }
}

impl From<&str> for PluginConfig {
    fn from(name: &str) -> Self {
        Self::Name(name.to_string())
    }
}

/// Named caches, each built on demand into an independent adapter
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CachesConfig {
    #[serde(default)]
    pub caches: HashMap<String, StorageConfig>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plugin_short_and_long_forms() {
        let plugins: Vec<PluginConfig> = serde_json::from_str(
            r#"["serializer", {
                "name": "clear_expired_by_factor",
                "options": {"clearing_factor": 1},
                "priority": 5
            }]"#,
        )
        .unwrap();

        assert_eq!(plugins[0], PluginConfig::from("serializer"));
        assert!(plugins[0].options().is_empty());
        assert_eq!(plugins[1].name(), "clear_expired_by_factor");
        assert_eq!(plugins[1].priority(), Some(5));
        assert_eq!(plugins[1].options()["clearing_factor"], 1);
    }

    #[test]
    fn test_missing_sections_default() {
        let config: StorageConfig = serde_json::from_str(r#"{"adapter": "memory"}"#).unwrap();
        assert_eq!(config, StorageConfig::new("memory"));
    }
}
