//! Builder registry for configuration-driven middleware.
//!
//! A [`Builder`] knows how to turn a name and a configuration record into a
//! [`Middleware`]. The [`BuilderRegistry`] maps a type string (`"cors"`,
//! `"logger"`, ...) to one builder, so a stack can be described as a list of
//! `{type, name, config}` entries instead of code.
//!
//! # Example
//!
//! ```
//! use strata_middleware::{BuildError, BuilderConfig, BuilderRegistry, Middleware};
//!
//! let registry = BuilderRegistry::new();
//! registry
//!     .add_builder("noop", |name, _config| Ok(Middleware::new(name, 0, |next| next)))
//!     .unwrap();
//!
//! let unit = registry.build("noop", "first", &BuilderConfig::new()).unwrap();
//! assert_eq!(unit.name(), "first");
//!
//! let err = registry.build("gzip", "x", &BuilderConfig::new()).unwrap_err();
//! assert_eq!(err, BuildError::unknown_type("gzip"));
//! ```

use crate::error::BuildError;
use crate::middleware::Middleware;
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Open-ended configuration record handed to a builder.
pub type BuilderConfig = Map<String, Value>;

/// Configuration key holding a unit's priority.
pub const PRIORITY_KEY: &str = "priority";

type Constructor =
    dyn Fn(&str, &BuilderConfig) -> Result<Middleware, BuildError> + Send + Sync;

/// A registered middleware constructor.
#[derive(Clone)]
pub struct Builder {
    kind: String,
    constructor: Arc<Constructor>,
}

impl Builder {
    /// Creates a builder for `kind`.
    pub fn new<F>(kind: impl Into<String>, constructor: F) -> Self
    where
        F: Fn(&str, &BuilderConfig) -> Result<Middleware, BuildError> + Send + Sync + 'static,
    {
        Self {
            kind: kind.into(),
            constructor: Arc::new(constructor),
        }
    }

    /// Returns the type this builder is registered under.
    #[must_use]
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Builds a unit named `name` from `config`.
    pub fn build(&self, name: &str, config: &BuilderConfig) -> Result<Middleware, BuildError> {
        (self.constructor)(name, config)
    }
}

impl fmt::Debug for Builder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Builder")
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

/// Concurrency-safe map from type string to [`Builder`].
///
/// Lookups take a shared read lock and never contend with each other.
/// Registration takes the write lock only long enough to touch the map;
/// constructors always run outside the lock.
#[derive(Default)]
pub struct BuilderRegistry {
    builders: RwLock<HashMap<String, Builder>>,
}

impl BuilderRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry holding the built-in stage builders.
    #[must_use]
    pub fn with_defaults() -> Self {
        let builders = crate::stages::default_builders()
            .into_iter()
            .map(|builder| (builder.kind().to_owned(), builder))
            .collect();
        Self {
            builders: RwLock::new(builders),
        }
    }

    /// Registers a constructor under `kind`.
    ///
    /// Fails with [`BuildError::AlreadyRegistered`] if `kind` is taken; the
    /// existing builder is left in place.
    pub fn add_builder<F>(&self, kind: impl Into<String>, constructor: F) -> Result<(), BuildError>
    where
        F: Fn(&str, &BuilderConfig) -> Result<Middleware, BuildError> + Send + Sync + 'static,
    {
        self.register(Builder::new(kind, constructor))
    }

    /// Registers a prepared [`Builder`].
    pub fn register(&self, builder: Builder) -> Result<(), BuildError> {
        let mut builders = self.builders.write();
        if builders.contains_key(builder.kind()) {
            tracing::warn!(kind = builder.kind(), "middleware builder already registered");
            return Err(BuildError::already_registered(builder.kind()));
        }
        tracing::debug!(kind = builder.kind(), "middleware builder registered");
        builders.insert(builder.kind().to_owned(), builder);
        Ok(())
    }

    /// Removes and returns the builder registered under `kind`.
    pub fn remove_builder(&self, kind: &str) -> Option<Builder> {
        let removed = self.builders.write().remove(kind);
        if removed.is_some() {
            tracing::debug!(kind, "middleware builder removed");
        }
        removed
    }

    /// Returns the builder registered under `kind`.
    #[must_use]
    pub fn get_builder(&self, kind: &str) -> Option<Builder> {
        self.builders.read().get(kind).cloned()
    }

    /// Returns all builders, ordered by type.
    #[must_use]
    pub fn list_builders(&self) -> Vec<Builder> {
        let mut builders: Vec<Builder> = self.builders.read().values().cloned().collect();
        builders.sort_by(|a, b| a.kind.cmp(&b.kind));
        builders
    }

    /// Returns all registered types, sorted.
    #[must_use]
    pub fn kinds(&self) -> Vec<String> {
        self.list_builders()
            .into_iter()
            .map(|builder| builder.kind)
            .collect()
    }

    /// Returns true if a builder is registered under `kind`.
    #[must_use]
    pub fn contains(&self, kind: &str) -> bool {
        self.builders.read().contains_key(kind)
    }

    /// Builds a unit of type `kind` named `name`.
    ///
    /// Fails with [`BuildError::UnknownType`] if no builder is registered;
    /// otherwise returns whatever the constructor returns.
    pub fn build(
        &self,
        kind: &str,
        name: &str,
        config: &BuilderConfig,
    ) -> Result<Middleware, BuildError> {
        let builder = self
            .get_builder(kind)
            .ok_or_else(|| BuildError::unknown_type(kind))?;
        builder.build(name, config)
    }
}

impl fmt::Debug for BuilderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BuilderRegistry")
            .field("kinds", &self.kinds())
            .finish()
    }
}

/// Splits the `priority` key out of `config`.
///
/// Returns `default` when the key is absent, and the remaining entries so the
/// caller can deserialize them strictly.
pub fn split_priority(
    kind: &str,
    config: &BuilderConfig,
    default: i32,
) -> Result<(i32, BuilderConfig), BuildError> {
    let mut rest = config.clone();
    let priority = match rest.remove(PRIORITY_KEY) {
        None => default,
        Some(value) => value
            .as_i64()
            .and_then(|p| i32::try_from(p).ok())
            .ok_or_else(|| {
                BuildError::invalid_config(
                    kind,
                    format!("`{PRIORITY_KEY}` must be a 32-bit integer, got {value}"),
                )
            })?,
    };
    Ok((priority, rest))
}

/// Deserializes `config` into a typed configuration struct.
pub fn parse_config<T: DeserializeOwned>(
    kind: &str,
    config: BuilderConfig,
) -> Result<T, BuildError> {
    serde_json::from_value(Value::Object(config))
        .map_err(|e| BuildError::invalid_config(kind, e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    fn noop_builder(
        priority: i32,
    ) -> impl Fn(&str, &BuilderConfig) -> Result<Middleware, BuildError> {
        move |name, _config| Ok(Middleware::new(name, priority, |next| next))
    }

    fn config(value: Value) -> BuilderConfig {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn test_duplicate_registration_keeps_original() {
        let registry = BuilderRegistry::new();
        registry.add_builder("noop", noop_builder(1)).unwrap();

        let err = registry.add_builder("noop", noop_builder(2)).unwrap_err();
        assert_eq!(err, BuildError::already_registered("noop"));

        let unit = registry.build("noop", "n", &BuilderConfig::new()).unwrap();
        assert_eq!(unit.priority(), 1);
    }

    #[test]
    fn test_remove_builder() {
        let registry = BuilderRegistry::new();
        registry.add_builder("noop", noop_builder(1)).unwrap();

        let removed = registry.remove_builder("noop").unwrap();
        assert_eq!(removed.kind(), "noop");
        assert!(registry.remove_builder("noop").is_none());
        assert!(registry.get_builder("noop").is_none());

        // The type can be registered again once removed.
        registry.add_builder("noop", noop_builder(3)).unwrap();
        assert!(registry.contains("noop"));
    }

    #[test]
    fn test_list_builders_sorted() {
        let registry = BuilderRegistry::new();
        registry.add_builder("b", noop_builder(0)).unwrap();
        registry.add_builder("a", noop_builder(0)).unwrap();
        registry.add_builder("c", noop_builder(0)).unwrap();

        let kinds: Vec<_> = registry
            .list_builders()
            .iter()
            .map(|b| b.kind().to_owned())
            .collect();
        assert_eq!(kinds, ["a", "b", "c"]);
        assert_eq!(registry.kinds(), ["a", "b", "c"]);
    }

    #[test]
    fn test_build_unknown_type() {
        let registry = BuilderRegistry::new();
        let err = registry.build("nope", "x", &BuilderConfig::new()).unwrap_err();
        assert_eq!(err, BuildError::unknown_type("nope"));
    }

    #[test]
    fn test_build_propagates_constructor_error() {
        let registry = BuilderRegistry::new();
        registry
            .add_builder("strict", |_name, _config| {
                Err(BuildError::invalid_config("strict", "always fails"))
            })
            .unwrap();

        let err = registry.build("strict", "x", &BuilderConfig::new()).unwrap_err();
        assert_eq!(err, BuildError::invalid_config("strict", "always fails"));
    }

    #[test]
    fn test_build_passes_name_and_config() {
        let registry = BuilderRegistry::new();
        registry
            .add_builder("prio", |name, config| {
                let (priority, _rest) = split_priority("prio", config, 7)?;
                Ok(Middleware::new(name, priority, |next| next))
            })
            .unwrap();

        let unit = registry
            .build("prio", "custom", &config(json!({ "priority": -3 })))
            .unwrap();
        assert_eq!(unit.name(), "custom");
        assert_eq!(unit.priority(), -3);

        let unit = registry.build("prio", "default", &BuilderConfig::new()).unwrap();
        assert_eq!(unit.priority(), 7);
    }

    #[test]
    fn test_split_priority_rejects_non_integer() {
        let err = split_priority("x", &config(json!({ "priority": "high" })), 0).unwrap_err();
        assert!(matches!(err, BuildError::InvalidConfig { .. }));

        let err = split_priority("x", &config(json!({ "priority": 1u64 << 40 })), 0).unwrap_err();
        assert!(matches!(err, BuildError::InvalidConfig { .. }));
    }

    #[test]
    fn test_parse_config() {
        #[derive(Debug, Deserialize, PartialEq)]
        #[serde(deny_unknown_fields)]
        struct Settings {
            level: String,
        }

        let settings: Settings =
            parse_config("logger", config(json!({ "level": "debug" }))).unwrap();
        assert_eq!(settings.level, "debug");

        let err =
            parse_config::<Settings>("logger", config(json!({ "colour": true }))).unwrap_err();
        assert_eq!(err.kind(), "logger");
    }

    #[test]
    fn test_with_defaults_registers_stages() {
        let registry = BuilderRegistry::with_defaults();
        assert_eq!(
            registry.kinds(),
            ["context", "cors", "logger", "recoverer", "request_id"]
        );
    }
}
