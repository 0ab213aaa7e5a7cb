//! Declarative middleware stacks.
//!
//! A [`StackConfig`] lists middleware entries by builder type. Each entry is
//! built through a [`BuilderRegistry`], and the resulting units can be
//! installed into a [`Manager`] in one step.

use crate::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use strata_middleware::{BuilderConfig, BuilderRegistry, Manager, Middleware, PRIORITY_KEY};

/// A list of middleware entries.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StackConfig {
    /// Entries, in declaration order.
    #[serde(default)]
    pub middleware: Vec<MiddlewareSpec>,
}

/// One middleware entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MiddlewareSpec {
    /// Builder type, e.g. `"cors"`.
    #[serde(rename = "type")]
    pub kind: String,

    /// Unit name; must be unique within the stack.
    pub name: String,

    /// Priority override. The builder's default applies when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<i32>,

    /// Disabled entries are kept in the file but not built.
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Builder-specific settings.
    #[serde(default, skip_serializing_if = "BuilderConfig::is_empty")]
    pub config: BuilderConfig,
}

const fn default_enabled() -> bool {
    true
}

impl MiddlewareSpec {
    /// Creates an enabled entry with no priority override or settings.
    pub fn new(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            name: name.into(),
            priority: None,
            enabled: true,
            config: BuilderConfig::new(),
        }
    }

    /// Sets the priority override.
    #[must_use]
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = Some(priority);
        self
    }

    /// Sets a builder setting.
    #[must_use]
    pub fn with_setting(
        mut self,
        key: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        self.config.insert(key.into(), value.into());
        self
    }

    /// Enables or disables the entry.
    #[must_use]
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Returns the record handed to the builder, with the priority override
    /// stored under `priority`.
    #[must_use]
    pub fn builder_config(&self) -> BuilderConfig {
        let mut config = self.config.clone();
        if let Some(priority) = self.priority {
            config.insert(PRIORITY_KEY.to_owned(), priority.into());
        }
        config
    }

    /// Builds the unit through `registry`.
    pub fn build(&self, registry: &BuilderRegistry) -> Result<Middleware, ConfigError> {
        registry
            .build(&self.kind, &self.name, &self.builder_config())
            .map_err(|e| ConfigError::build(&self.name, e))
    }
}

impl StackConfig {
    /// Creates an empty stack.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an entry.
    #[must_use]
    pub fn with(mut self, spec: MiddlewareSpec) -> Self {
        self.middleware.push(spec);
        self
    }

    /// Returns the entry named `name`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&MiddlewareSpec> {
        self.middleware.iter().find(|spec| spec.name == name)
    }

    /// Returns the entry named `name` for modification.
    pub fn get_mut(&mut self, name: &str) -> Option<&mut MiddlewareSpec> {
        self.middleware.iter_mut().find(|spec| spec.name == name)
    }

    /// Returns the enabled entries.
    pub fn enabled(&self) -> impl Iterator<Item = &MiddlewareSpec> {
        self.middleware.iter().filter(|spec| spec.enabled)
    }

    /// Merges `other` into this stack.
    ///
    /// Entries of `other` replace same-named entries in place; new names are
    /// appended.
    pub fn merge(&mut self, other: Self) {
        for spec in other.middleware {
            match self.get_mut(&spec.name) {
                Some(existing) => *existing = spec,
                None => self.middleware.push(spec),
            }
        }
    }

    /// Checks that every entry has a type and a unique, non-empty name.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = HashSet::new();
        for (index, spec) in self.middleware.iter().enumerate() {
            if spec.kind.trim().is_empty() {
                return Err(ConfigError::validation_error(format!(
                    "middleware[{index}]: `type` must not be empty"
                )));
            }
            if spec.name.trim().is_empty() {
                return Err(ConfigError::validation_error(format!(
                    "middleware[{index}]: `name` must not be empty"
                )));
            }
            if !seen.insert(spec.name.as_str()) {
                return Err(ConfigError::validation_error(format!(
                    "middleware[{index}]: duplicate name `{}`",
                    spec.name
                )));
            }
        }
        Ok(())
    }

    /// Builds every enabled entry.
    ///
    /// Stops at the first entry that fails to build.
    pub fn build(&self, registry: &BuilderRegistry) -> Result<Vec<Middleware>, ConfigError> {
        self.validate()?;
        self.enabled().map(|spec| spec.build(registry)).collect()
    }

    /// Builds every enabled entry and installs the result as the manager's
    /// whole middleware set.
    ///
    /// Nothing is installed unless every entry builds. Returns the number of
    /// installed units.
    pub fn apply(
        &self,
        registry: &BuilderRegistry,
        manager: &Manager,
    ) -> Result<usize, ConfigError> {
        let units = self.build(registry)?;
        let count = units.len();
        manager.replace(units);
        tracing::info!(
            count,
            skipped = self.middleware.len() - count,
            "middleware stack applied"
        );
        Ok(count)
    }
}
