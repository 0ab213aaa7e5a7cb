//! Built-in middleware stages.
//!
//! Each stage can be constructed directly or through its registered builder
//! type. Default priorities leave gaps so application units can be slotted in
//! between them.
//!
//! | Type | Default priority | Stage |
//! |------|------------------|-------|
//! | `context` | 0 | [`ContextMiddleware`] - allocate the request context |
//! | `recoverer` | 10 | [`RecovererMiddleware`] - turn panics into `500` |
//! | `request_id` | 20 | [`RequestIdMiddleware`] - assign a request ID |
//! | `logger` | 30 | [`LoggerMiddleware`] - per-request structured log |
//! | `cors` | 40 | [`CorsMiddleware`] - CORS preflight and headers |

pub mod context;
pub mod cors;
pub mod logger;
pub mod recoverer;
pub mod request_id;

pub use context::ContextMiddleware;
pub use cors::CorsMiddleware;
pub use logger::LoggerMiddleware;
pub use recoverer::RecovererMiddleware;
pub use request_id::RequestIdMiddleware;

use crate::builder::{Builder, BuilderRegistry};
use crate::error::BuildError;

/// Returns a builder for every built-in stage.
#[must_use]
pub fn default_builders() -> Vec<Builder> {
    vec![
        context::builder(),
        recoverer::builder(),
        request_id::builder(),
        logger::builder(),
        cors::builder(),
    ]
}

/// Registers every built-in stage builder in `registry`.
///
/// Stops at the first type that is already registered.
pub fn register_defaults(registry: &BuilderRegistry) -> Result<(), BuildError> {
    default_builders()
        .into_iter()
        .try_for_each(|builder| registry.register(builder))
}
