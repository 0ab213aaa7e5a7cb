//! Builder registry error types.

use thiserror::Error;

/// Errors raised while registering builders or building units from them.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BuildError {
    /// A builder is already registered under this type.
    #[error("middleware builder type `{kind}` is already registered")]
    AlreadyRegistered {
        /// The duplicate type name.
        kind: String,
    },

    /// No builder is registered under this type.
    #[error("no middleware builder registered for type `{kind}`")]
    UnknownType {
        /// The requested type name.
        kind: String,
    },

    /// The configuration record was rejected by the constructor.
    #[error("invalid configuration for middleware type `{kind}`: {reason}")]
    InvalidConfig {
        /// The type whose constructor rejected the configuration.
        kind: String,
        /// Explanation of the problem.
        reason: String,
    },
}

impl BuildError {
    /// Creates an already-registered error.
    pub fn already_registered(kind: impl Into<String>) -> Self {
        Self::AlreadyRegistered { kind: kind.into() }
    }

    /// Creates an unknown-type error.
    pub fn unknown_type(kind: impl Into<String>) -> Self {
        Self::UnknownType { kind: kind.into() }
    }

    /// Creates an invalid-configuration error.
    pub fn invalid_config(kind: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            kind: kind.into(),
            reason: reason.into(),
        }
    }

    /// Returns the builder type this error refers to.
    #[must_use]
    pub fn kind(&self) -> &str {
        match self {
            Self::AlreadyRegistered { kind }
            | Self::UnknownType { kind }
            | Self::InvalidConfig { kind, .. } => kind,
        }
    }
}
