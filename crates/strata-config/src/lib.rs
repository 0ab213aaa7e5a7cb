//! Declarative middleware stack configuration for Strata.
//!
//! This crate describes a middleware stack as data and turns it into units
//! through a [`BuilderRegistry`](strata_middleware::BuilderRegistry):
//! - TOML and JSON configuration files
//! - Environment variable overrides of priority and enablement
//! - Strict validation (fails on unknown fields and duplicate names)
//! - All-or-nothing application to a [`Manager`](strata_middleware::Manager)
//!
//! # Example
//!
//! ```
//! use strata_config::{ConfigLoader, Format};
//! use strata_middleware::{BuilderRegistry, Manager};
//!
//! # fn main() -> Result<(), strata_config::ConfigError> {
//! let stack = ConfigLoader::new()
//!     .with_str(
//!         r#"
//!         [[middleware]]
//!         type = "recoverer"
//!         name = "recover"
//!
//!         [[middleware]]
//!         type = "cors"
//!         name = "cors"
//!         priority = 5
//!         [middleware.config]
//!         allowed_origins = ["https://app.example.com"]
//!         "#,
//!         Format::Toml,
//!     )?
//!     .with_env_prefix("STRATA")
//!     .load()?;
//!
//! let manager = Manager::new();
//! stack.apply(&BuilderRegistry::with_defaults(), &manager)?;
//! assert_eq!(manager.names(), ["cors", "recover"]);
//! # Ok(())
//! # }
//! ```
//!
//! # Configuration File Format
//!
//! ```toml
//! [[middleware]]
//! type = "request_id"      # builder type
//! name = "request-id"      # unique unit name
//! priority = 20            # optional; builder default otherwise
//! enabled = true           # optional; defaults to true
//! [middleware.config]      # optional; builder-specific settings
//! trust_incoming = true
//! ```

#![doc(html_root_url = "https://docs.rs/strata-config/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod error;
mod loader;
mod stack;

pub use error::ConfigError;
pub use loader::{ConfigLoader, Format};
pub use stack::{MiddlewareSpec, StackConfig};
