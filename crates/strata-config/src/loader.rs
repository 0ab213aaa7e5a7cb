//! Layered stack configuration loader.
//!
//! This module provides the [`ConfigLoader`] for loading a [`StackConfig`]
//! from files, strings and environment variables.

use std::env;
use std::fs;
use std::path::Path;

use crate::{ConfigError, StackConfig};

/// Source format of a configuration document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    /// TOML.
    Toml,
    /// JSON.
    Json,
}

impl Format {
    /// Picks the format from a file extension (`.toml` or `.json`).
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_lowercase);

        match extension.as_deref() {
            Some("toml") => Ok(Self::Toml),
            Some("json") => Ok(Self::Json),
            _ => Err(ConfigError::unsupported_format(path.display().to_string())),
        }
    }

    fn parse(self, content: &str) -> Result<StackConfig, ConfigError> {
        match self {
            Self::Toml => Ok(toml::from_str(content)?),
            Self::Json => Ok(serde_json::from_str(content)?),
        }
    }
}

/// Layered loader for a [`StackConfig`].
///
/// Layers are applied in call order; later layers win:
/// 1. Files and strings, merged entry by entry (same name replaces)
/// 2. Environment variables, applied by [`load`](Self::load)
///
/// Environment variables use the format `PREFIX__<NAME>__<FIELD>`, where
/// `<NAME>` is the entry name upper-cased with every non-alphanumeric
/// character replaced by `_`, and `<FIELD>` is `PRIORITY` or `ENABLED`:
///
/// - `STRATA__ACCESS_LOG__ENABLED=false`
/// - `STRATA__CORS__PRIORITY=5`
///
/// # Example
///
/// ```no_run
/// use strata_config::ConfigLoader;
///
/// # fn main() -> Result<(), strata_config::ConfigError> {
/// let stack = ConfigLoader::new()
///     .with_file("stack.toml")?
///     .with_env_prefix("STRATA")
///     .load()?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Default)]
pub struct ConfigLoader {
    config: StackConfig,
    env_prefix: Option<String>,
}

impl ConfigLoader {
    /// Create a new loader holding an empty stack.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing stack.
    #[must_use]
    pub fn with_stack(mut self, stack: StackConfig) -> Self {
        self.config = stack;
        self
    }

    /// Merge a configuration file.
    ///
    /// The format is picked from the file extension.
    pub fn with_file<P: AsRef<Path>>(mut self, path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(ConfigError::file_not_found(path));
        }

        let format = Format::from_path(path)?;
        let content = fs::read_to_string(path).map_err(|e| ConfigError::read_error(path, e))?;

        let file_config = format.parse(&content)?;
        tracing::debug!(
            path = %path.display(),
            entries = file_config.middleware.len(),
            "stack configuration file loaded"
        );
        self.config.merge(file_config);
        Ok(self)
    }

    /// Merge a configuration file if it exists.
    pub fn with_optional_file<P: AsRef<Path>>(self, path: P) -> Result<Self, ConfigError> {
        if path.as_ref().exists() {
            self.with_file(path)
        } else {
            Ok(self)
        }
    }

    /// Merge a configuration document held in memory.
    ///
    /// # Example
    ///
    /// ```
    /// use strata_config::{ConfigLoader, Format};
    ///
    /// let toml = r#"
    ///     [[middleware]]
    ///     type = "logger"
    ///     name = "access-log"
    /// "#;
    ///
    /// let stack = ConfigLoader::new()
    ///     .with_str(toml, Format::Toml)
    ///     .unwrap()
    ///     .load()
    ///     .unwrap();
    ///
    /// assert_eq!(stack.middleware[0].name, "access-log");
    /// ```
    pub fn with_str(mut self, content: &str, format: Format) -> Result<Self, ConfigError> {
        let config = format.parse(content)?;
        self.config.merge(config);
        Ok(self)
    }

    /// Set environment variable prefix for overrides.
    #[must_use]
    pub fn with_env_prefix(mut self, prefix: &str) -> Self {
        self.env_prefix = Some(prefix.to_uppercase());
        self
    }

    /// Finalize and return the loaded stack.
    ///
    /// Applies environment variable overrides (if a prefix was set) and
    /// validates the result.
    pub fn load(mut self) -> Result<StackConfig, ConfigError> {
        if let Some(prefix) = self.env_prefix.take() {
            self.apply_env_overrides(&prefix, env::vars())?;
        }

        self.config.validate()?;
        Ok(self.config)
    }

    /// Finalize without environment overrides or validation.
    #[must_use]
    pub fn load_unvalidated(self) -> StackConfig {
        self.config
    }

    fn apply_env_overrides<I>(&mut self, prefix: &str, vars: I) -> Result<(), ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let marker = format!("{prefix}__");
        for (key, value) in vars.into_iter().filter(|(k, _)| k.starts_with(&marker)) {
            self.apply_env_var(&key, &value, prefix)?;
        }
        Ok(())
    }

    fn apply_env_var(&mut self, key: &str, value: &str, prefix: &str) -> Result<(), ConfigError> {
        let key_without_prefix = key
            .strip_prefix(prefix)
            .and_then(|k| k.strip_prefix("__"))
            .ok_or_else(|| ConfigError::env_parse_error(key, "invalid key format"))?;

        let Some((name, field)) = key_without_prefix.rsplit_once("__") else {
            return Err(ConfigError::env_parse_error(key, "expected PREFIX__<NAME>__<FIELD>"));
        };

        let Some(spec) = self
            .config
            .middleware
            .iter_mut()
            .find(|spec| env_name(&spec.name) == name)
        else {
            tracing::debug!(var = key, "environment override matches no middleware entry");
            return Ok(());
        };

        match field {
            "PRIORITY" => {
                spec.priority = Some(
                    value
                        .trim()
                        .parse()
                        .map_err(|_| ConfigError::env_parse_error(key, "expected integer"))?,
                );
            }
            "ENABLED" => {
                spec.enabled = parse_bool(value)
                    .ok_or_else(|| ConfigError::env_parse_error(key, "expected boolean"))?;
            }
            // Unknown field - ignore
            _ => {
                tracing::debug!(var = key, "unknown environment override field");
            }
        }

        Ok(())
    }
}

/// Environment form of an entry name: `access-log` becomes `ACCESS_LOG`.
fn env_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect()
}

/// Parse a boolean from a string.
fn parse_bool(s: &str) -> Option<bool> {
    match s.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}
