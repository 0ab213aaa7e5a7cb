//! Logging setup for services built on Strata.
//!
//! The middleware crates only emit `tracing` events; this crate installs the
//! subscriber that renders them. Output is structured JSON in production and
//! human-readable while developing.
//!
//! | Event | Level | Fields |
//! |-------|-------|--------|
//! | `middleware added` / `removed` / `replaced` | debug | `middleware`, `count` |
//! | `builder registered` | debug | `kind` |
//! | `request completed` | configurable | `request_id`, `http.status_code`, `latency_ms` |
//! | `handler panicked` | error | `http.method`, `http.path`, `panic` |
//!
//! # Example
//!
//! ```rust,no_run
//! use strata_telemetry::{init_logging, LogConfig, LogFormat};
//!
//! # fn main() -> Result<(), strata_telemetry::TelemetryError> {
//! init_logging(&LogConfig::development().with_format(LogFormat::Compact))?;
//! # Ok(())
//! # }
//! ```

#![doc(html_root_url = "https://docs.rs/strata-telemetry/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod error;
pub mod logging;

pub use error::TelemetryError;
pub use logging::{create_env_filter, init_logging, LogConfig, LogFormat};

/// Result type for telemetry operations.
pub type TelemetryResult<T> = Result<T, TelemetryError>;
