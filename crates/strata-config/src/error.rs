//! Configuration error types.

use std::path::PathBuf;
use strata_middleware::BuildError;
use thiserror::Error;

/// Errors that can occur while loading or applying a stack configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Configuration file not found.
    #[error("configuration file not found: {path}")]
    FileNotFound {
        /// Path to the missing file.
        path: PathBuf,
    },

    /// Failed to read configuration file.
    #[error("failed to read configuration file: {path}")]
    ReadError {
        /// Path to the file.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The file extension or format name is not supported.
    #[error("unsupported configuration format: {format}")]
    UnsupportedFormat {
        /// The offending extension, format name or path.
        format: String,
    },

    /// TOML parsing error.
    #[error("failed to parse TOML configuration: {0}")]
    TomlError(#[from] toml::de::Error),

    /// JSON parsing error.
    #[error("failed to parse JSON configuration: {0}")]
    JsonError(#[from] serde_json::Error),

    /// Environment variable parsing error.
    #[error("failed to parse environment variable {var}: {reason}")]
    EnvParseError {
        /// The environment variable name.
        var: String,
        /// Explanation of the parsing error.
        reason: String,
    },

    /// Validation error after loading.
    #[error("configuration validation failed: {0}")]
    ValidationError(String),

    /// A middleware entry could not be built.
    #[error("failed to build middleware `{name}`: {source}")]
    Build {
        /// Name of the entry that failed.
        name: String,
        /// The registry error.
        #[source]
        source: BuildError,
    },
}

impl ConfigError {
    /// Create a new file not found error.
    pub fn file_not_found(path: impl Into<PathBuf>) -> Self {
        Self::FileNotFound { path: path.into() }
    }

    /// Create a new read error.
    pub fn read_error(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::ReadError {
            path: path.into(),
            source,
        }
    }

    /// Create a new unsupported format error.
    pub fn unsupported_format(format: impl Into<String>) -> Self {
        Self::UnsupportedFormat {
            format: format.into(),
        }
    }

    /// Create a new environment variable parse error.
    pub fn env_parse_error(var: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::EnvParseError {
            var: var.into(),
            reason: reason.into(),
        }
    }

    /// Create a new validation error.
    pub fn validation_error(message: impl Into<String>) -> Self {
        Self::ValidationError(message.into())
    }

    /// Create a new build error for the entry `name`.
    pub fn build(name: impl Into<String>, source: BuildError) -> Self {
        Self::Build {
            name: name.into(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_file_not_found_error() {
        let err = ConfigError::file_not_found("/path/to/stack.toml");
        assert!(err.to_string().contains("/path/to/stack.toml"));
    }

    #[test]
    fn test_env_parse_error() {
        let err = ConfigError::env_parse_error("STRATA__CORS__PRIORITY", "expected integer");
        assert!(err.to_string().contains("STRATA__CORS__PRIORITY"));
        assert!(err.to_string().contains("expected integer"));
    }

    #[test]
    fn test_build_error_keeps_source() {
        let err = ConfigError::build("edge-cors", BuildError::unknown_type("corz"));
        assert!(err.to_string().contains("edge-cors"));

        let source = err.source().unwrap();
        assert!(source.to_string().contains("corz"));
    }
}
