//! Options Container
//!
//! A validated bag of named settings. Every adapter and plugin declares the
//! settings it understands as an [`OptionsSchema`]; anything outside that
//! schema is rejected when it is set, never later when it is used.
//!
//! ```rust
//! use pluggable_cache::options::{OptionRule, OptionSpec, Options, OptionsSchema};
//!
//! let schema = OptionsSchema::new()
//!     .with(OptionSpec::new("max_items", OptionRule::int(0, i64::MAX)).default_value(0));
//! let options = Options::new(schema);
//!
//! options.set("max_items", 10).unwrap();
//! assert_eq!(options.get_int("max_items").unwrap(), 10);
//! assert!(options.set("max_items", -1).is_err());
//! assert!(options.set("nope", 1).is_err());
//! ```

use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

use crate::error::{CacheError, Result};

/// Callback invoked with an operation error (see `ExceptionHandler`)
pub type ExceptionCallback = Arc<dyn Fn(&CacheError) + Send + Sync>;

/// Observer notified after a setting changed: `(name, new value)`
pub type ChangeObserver = Arc<dyn Fn(&str, &OptionValue) + Send + Sync>;

/// Value of a single setting
#[derive(Clone)]
pub enum OptionValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Callback(ExceptionCallback),
}

impl OptionValue {
    fn kind(&self) -> &'static str {
        match self {
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Str(_) => "string",
            Self::Callback(_) => "callback",
        }
    }

    /// Convert a configuration payload entry
    ///
    /// # Errors
    ///
    /// Returns `InvalidOption` for arrays, objects and null, which no
    /// setting accepts.
    pub fn from_json(name: &str, value: &serde_json::Value) -> Result<Self> {
        match value {
            serde_json::Value::Bool(b) => Ok(Self::Bool(*b)),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Ok(Self::Int(i)),
                None => n
                    .as_f64()
                    .map(Self::Float)
                    .ok_or_else(|| CacheError::invalid_option(name, "number out of range")),
            },
            serde_json::Value::String(s) => Ok(Self::Str(s.clone())),
            other => Err(CacheError::invalid_option(
                name,
                format!("unsupported configuration value {other}"),
            )),
        }
    }
}

impl fmt::Debug for OptionValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(v) => write!(f, "Bool({v})"),
            Self::Int(v) => write!(f, "Int({v})"),
            Self::Float(v) => write!(f, "Float({v})"),
            Self::Str(v) => write!(f, "Str({v:?})"),
            Self::Callback(_) => f.write_str("Callback(..)"),
        }
    }
}

impl From<bool> for OptionValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for OptionValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<i32> for OptionValue {
    fn from(v: i32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<u32> for OptionValue {
    fn from(v: u32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<f64> for OptionValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for OptionValue {
    fn from(v: &str) -> Self {
        Self::Str(v.to_string())
    }
}

impl From<String> for OptionValue {
    fn from(v: String) -> Self {
        Self::Str(v)
    }
}

impl From<ExceptionCallback> for OptionValue {
    fn from(v: ExceptionCallback) -> Self {
        Self::Callback(v)
    }
}

/// Domain of a setting
#[derive(Debug, Clone, Copy)]
pub enum OptionRule {
    Bool,
    /// Inclusive range; integral floats are accepted
    Int { min: i64, max: i64 },
    /// Inclusive range; integers are accepted
    Float { min: f64, max: f64 },
    /// Any string, or one of a fixed set
    Str {
        one_of: Option<&'static [&'static str]>,
    },
    /// A regular expression; the empty string disables it
    Regex,
    Callback,
}

impl OptionRule {
    #[must_use]
    pub fn int(min: i64, max: i64) -> Self {
        Self::Int { min, max }
    }

    #[must_use]
    pub fn float(min: f64, max: f64) -> Self {
        Self::Float { min, max }
    }

    #[must_use]
    pub fn string() -> Self {
        Self::Str { one_of: None }
    }

    #[must_use]
    pub fn one_of(values: &'static [&'static str]) -> Self {
        Self::Str {
            one_of: Some(values),
        }
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
    fn check(self, name: &str, value: OptionValue) -> Result<OptionValue> {
        let mismatch = |expected: &str, got: &OptionValue| {
            CacheError::invalid_option(name, format!("expected {expected}, got {}", got.kind()))
        };

        match (self, value) {
            (Self::Bool, v @ OptionValue::Bool(_))
            | (Self::Callback, v @ OptionValue::Callback(_)) => Ok(v),
            (Self::Int { min, max }, OptionValue::Int(n)) => {
                if n < min || n > max {
                    return Err(CacheError::invalid_option(
                        name,
                        format!("{n} is outside {min}..={max}"),
                    ));
                }
                Ok(OptionValue::Int(n))
            }
            (rule @ Self::Int { .. }, OptionValue::Float(f))
                if f.fract() == 0.0 && f.is_finite() =>
            {
                rule.check(name, OptionValue::Int(f as i64))
            }
            (Self::Float { min, max }, OptionValue::Float(f)) => {
                if !f.is_finite() || f < min || f > max {
                    return Err(CacheError::invalid_option(
                        name,
                        format!("{f} is outside {min}..={max}"),
                    ));
                }
                Ok(OptionValue::Float(f))
            }
            (rule @ Self::Float { .. }, OptionValue::Int(n)) => {
                rule.check(name, OptionValue::Float(n as f64))
            }
            (Self::Str { one_of }, OptionValue::Str(s)) => match one_of {
                Some(allowed) if !allowed.contains(&s.as_str()) => Err(CacheError::invalid_option(
                    name,
                    format!("'{s}' is not one of {allowed:?}"),
                )),
                _ => Ok(OptionValue::Str(s)),
            },
            (Self::Regex, OptionValue::Str(s)) => {
                if !s.is_empty() {
                    regex::Regex::new(&s)
                        .map_err(|e| CacheError::invalid_option(name, e.to_string()))?;
                }
                Ok(OptionValue::Str(s))
            }
            (Self::Bool, v) => Err(mismatch("bool", &v)),
            (Self::Int { .. }, v) => Err(mismatch("int", &v)),
            (Self::Float { .. }, v) => Err(mismatch("float", &v)),
            (Self::Str { .. } | Self::Regex, v) => Err(mismatch("string", &v)),
            (Self::Callback, v) => Err(mismatch("callback", &v)),
        }
    }
}

/// Declaration of one recognized setting
#[derive(Clone)]
pub struct OptionSpec {
    name: &'static str,
    rule: OptionRule,
    default: Option<OptionValue>,
    normalize: Option<fn(OptionValue) -> OptionValue>,
}

impl OptionSpec {
    #[must_use]
    pub fn new(name: &'static str, rule: OptionRule) -> Self {
        Self {
            name,
            rule,
            default: None,
            normalize: None,
        }
    }

    /// Shorthand for `new(name, rule).default_value(default)`
    #[must_use]
    pub fn with_default(
        name: &'static str,
        rule: OptionRule,
        default: impl Into<OptionValue>,
    ) -> Self {
        Self::new(name, rule).default_value(default)
    }

    /// Value reported by `get` until the setting is explicitly set
    #[must_use]
    pub fn default_value(mut self, value: impl Into<OptionValue>) -> Self {
        self.default = Some(value.into());
        self
    }

    /// Normalizer applied before validation
    #[must_use]
    pub fn normalizer(mut self, normalize: fn(OptionValue) -> OptionValue) -> Self {
        self.normalize = Some(normalize);
        self
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }
}

/// The set of settings a component recognizes
#[derive(Clone, Default)]
pub struct OptionsSchema {
    specs: Vec<OptionSpec>,
}

impl OptionsSchema {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a setting, replacing an earlier declaration with the same name
    #[must_use]
    pub fn with(mut self, spec: OptionSpec) -> Self {
        self.specs.retain(|s| s.name != spec.name);
        self.specs.push(spec);
        self
    }

    /// Merge another schema into this one
    #[must_use]
    pub fn extend(self, other: OptionsSchema) -> Self {
        other.specs.into_iter().fold(self, Self::with)
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.specs.iter().map(|s| s.name)
    }
}

/// Mutable, validated settings with synchronous change notification
pub struct Options {
    specs: HashMap<&'static str, OptionSpec>,
    values: RwLock<HashMap<&'static str, OptionValue>>,
    observers: RwLock<Vec<ChangeObserver>>,
}

impl Options {
    #[must_use]
    pub fn new(schema: OptionsSchema) -> Self {
        Self {
            specs: schema.specs.into_iter().map(|s| (s.name, s)).collect(),
            values: RwLock::new(HashMap::new()),
            observers: RwLock::new(Vec::new()),
        }
    }

    fn spec(&self, name: &str) -> Result<&OptionSpec> {
        self.specs
            .get(name)
            .ok_or_else(|| CacheError::invalid_option(name, "unknown option"))
    }

    /// Whether `name` is a recognized setting
    #[must_use]
    pub fn recognizes(&self, name: &str) -> bool {
        self.specs.contains_key(name)
    }

    /// Validate, normalize and store a setting, then notify observers
    ///
    /// Observers run synchronously, after the new value is visible and with
    /// no lock held, so they may read or set options themselves.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOption` if `name` is not part of the schema or the
    /// value falls outside its rule.
    pub fn set(&self, name: &str, value: impl Into<OptionValue>) -> Result<()> {
        let spec = self.spec(name)?;
        let mut value = value.into();
        if let Some(normalize) = spec.normalize {
            value = normalize(value);
        }
        let value = spec.rule.check(name, value)?;

        self.values.write().insert(spec.name, value.clone());
        debug!(option = %name, value = ?value, "Option changed");

        let observers: Vec<ChangeObserver> = self.observers.read().clone();
        for observer in observers {
            observer(name, &value);
        }
        Ok(())
    }

    /// Apply several settings in order, stopping at the first invalid one
    ///
    /// # Errors
    ///
    /// Returns the first `InvalidOption` encountered.
    pub fn set_many<I, K, V>(&self, settings: I) -> Result<()>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<OptionValue>,
    {
        for (name, value) in settings {
            self.set(name.as_ref(), value)?;
        }
        Ok(())
    }

    /// Apply a configuration payload
    ///
    /// # Errors
    ///
    /// Returns `InvalidOption` for unknown names or unusable values.
    pub fn set_json(&self, payload: &serde_json::Map<String, serde_json::Value>) -> Result<()> {
        for (name, value) in payload {
            self.set(name, OptionValue::from_json(name, value)?)?;
        }
        Ok(())
    }

    /// Current value, or the declared default, or `None` if neither exists
    ///
    /// # Errors
    ///
    /// Returns `InvalidOption` if `name` is not part of the schema.
    pub fn get(&self, name: &str) -> Result<Option<OptionValue>> {
        let spec = self.spec(name)?;
        Ok(self
            .values
            .read()
            .get(name)
            .cloned()
            .or_else(|| spec.default.clone()))
    }

    fn require(&self, name: &str) -> Result<OptionValue> {
        self.get(name)?
            .ok_or_else(|| CacheError::invalid_option(name, "no value and no default"))
    }

    /// # Errors
    ///
    /// Returns `InvalidOption` for unknown names or non-bool settings.
    pub fn get_bool(&self, name: &str) -> Result<bool> {
        match self.require(name)? {
            OptionValue::Bool(b) => Ok(b),
            other => Err(CacheError::invalid_option(name, format!("is {}", other.kind()))),
        }
    }

    /// # Errors
    ///
    /// Returns `InvalidOption` for unknown names or non-int settings.
    pub fn get_int(&self, name: &str) -> Result<i64> {
        match self.require(name)? {
            OptionValue::Int(n) => Ok(n),
            other => Err(CacheError::invalid_option(name, format!("is {}", other.kind()))),
        }
    }

    /// # Errors
    ///
    /// Returns `InvalidOption` for unknown names or non-numeric settings.
    #[allow(clippy::cast_precision_loss)]
    pub fn get_float(&self, name: &str) -> Result<f64> {
        match self.require(name)? {
            OptionValue::Float(f) => Ok(f),
            OptionValue::Int(n) => Ok(n as f64),
            other => Err(CacheError::invalid_option(name, format!("is {}", other.kind()))),
        }
    }

    /// # Errors
    ///
    /// Returns `InvalidOption` for unknown names or non-string settings.
    pub fn get_str(&self, name: &str) -> Result<String> {
        match self.require(name)? {
            OptionValue::Str(s) => Ok(s),
            other => Err(CacheError::invalid_option(name, format!("is {}", other.kind()))),
        }
    }

    /// # Errors
    ///
    /// Returns `InvalidOption` if `name` is not part of the schema.
    pub fn get_callback(&self, name: &str) -> Result<Option<ExceptionCallback>> {
        Ok(match self.get(name)? {
            Some(OptionValue::Callback(cb)) => Some(cb),
            _ => None,
        })
    }

    /// Register an observer for every subsequent successful `set`
    pub fn on_change(&self, observer: ChangeObserver) {
        self.observers.write().push(observer);
    }
}

impl fmt::Debug for Options {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Options")
            .field("values", &*self.values.read())
            .field("observers", &self.observers.read().len())
            .finish_non_exhaustive()
    }
}

/// Lower-cases string values; used for identifiers like codec names
#[must_use]
pub fn lowercase(value: OptionValue) -> OptionValue {
    match value {
        OptionValue::Str(s) => OptionValue::Str(s.to_ascii_lowercase()),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn schema() -> OptionsSchema {
        OptionsSchema::new()
            .with(OptionSpec::with_default("factor", OptionRule::int(0, 1000), 100))
            .with(OptionSpec::with_default("ttl", OptionRule::float(0.0, f64::MAX), 0.0))
            .with(OptionSpec::with_default("enabled", OptionRule::Bool, true))
            .with(
                OptionSpec::new("codec", OptionRule::one_of(&["json", "bincode"]))
                    .default_value("json")
                    .normalizer(lowercase),
            )
            .with(OptionSpec::with_default("pattern", OptionRule::Regex, ""))
            .with(OptionSpec::new("callback", OptionRule::Callback))
    }

    #[test]
    fn test_defaults_are_reported() {
        let options = Options::new(schema());
        assert_eq!(options.get_int("factor").unwrap(), 100);
        assert!(options.get_bool("enabled").unwrap());
        assert_eq!(options.get_str("codec").unwrap(), "json");
        assert!(options.get_callback("callback").unwrap().is_none());
    }

    #[test]
    fn test_unknown_name_fails_fast() {
        let options = Options::new(schema());
        let err = options.set("unknown", 1).unwrap_err();
        assert!(matches!(
            err,
            CacheError::InvalidOption { ref name, .. } if name == "unknown"
        ));
        assert!(options.get("unknown").is_err());
    }

    #[test]
    fn test_out_of_domain_values_fail_fast() {
        let options = Options::new(schema());
        assert!(options.set("factor", 1001).is_err());
        assert!(options.set("factor", "ten").is_err());
        assert!(options.set("ttl", -1.0).is_err());
        assert!(options.set("codec", "xml").is_err());
        assert!(options.set("pattern", "([").is_err());
        // Failed sets leave the previous value untouched
        assert_eq!(options.get_int("factor").unwrap(), 100);
    }

    #[test]
    fn test_numeric_coercion_and_normalizer() {
        let options = Options::new(schema());
        options.set("ttl", 5).unwrap();
        assert!((options.get_float("ttl").unwrap() - 5.0).abs() < f64::EPSILON);
        options.set("factor", 3.0).unwrap();
        assert_eq!(options.get_int("factor").unwrap(), 3);
        options.set("codec", "BINCODE").unwrap();
        assert_eq!(options.get_str("codec").unwrap(), "bincode");
    }

    #[test]
    fn test_change_notification_is_synchronous() {
        let options = Arc::new(Options::new(schema()));
        let seen = Arc::new(AtomicUsize::new(0));
        let seen_clone = Arc::clone(&seen);
        options.on_change(Arc::new(move |name, value| {
            if name == "factor" {
                if let OptionValue::Int(n) = value {
                    seen_clone.store(usize::try_from(*n).unwrap(), Ordering::SeqCst);
                }
            }
        }));

        options.set("factor", 7).unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 7);
    }

    #[test]
    fn test_observer_may_reconfigure() {
        let options = Arc::new(Options::new(schema()));
        let weak = Arc::downgrade(&options);
        options.on_change(Arc::new(move |name, _| {
            if name == "factor" {
                if let Some(options) = weak.upgrade() {
                    options.set("enabled", false).unwrap();
                }
            }
        }));

        options.set("factor", 1).unwrap();
        assert!(!options.get_bool("enabled").unwrap());
    }

    #[test]
    fn test_set_json_payload() {
        let options = Options::new(schema());
        let payload = serde_json::json!({"factor": 2, "enabled": false});
        options
            .set_json(payload.as_object().unwrap())
            .unwrap();
        assert_eq!(options.get_int("factor").unwrap(), 2);
        assert!(!options.get_bool("enabled").unwrap());

        let bad = serde_json::json!({"factor": [1]});
        assert!(options.set_json(bad.as_object().unwrap()).is_err());
    }
}
