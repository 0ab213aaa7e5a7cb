//! Panic recovery.
//!
//! A panic anywhere below this stage is caught and answered with a `500`
//! JSON error instead of tearing down the task serving the connection.

use crate::builder::{parse_config, split_priority, Builder, BuilderConfig};
use crate::error::BuildError;
use crate::middleware::Middleware;
use futures_util::FutureExt;
use http::StatusCode;
use serde::Deserialize;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use strata_core::{ErrorCategory, Handler, Request, Response, ResponseExt};

/// Builder type name.
pub const KIND: &str = "recoverer";

/// Default priority.
pub const DEFAULT_PRIORITY: i32 = 10;

/// Middleware that converts panics into `500 Internal Server Error`.
#[derive(Debug, Clone, Copy, Default)]
pub struct RecovererMiddleware;

impl RecovererMiddleware {
    /// Creates the stage.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Converts the stage into a unit with the default name and priority.
    #[must_use]
    pub fn middleware(self) -> Middleware {
        self.into_middleware(KIND, DEFAULT_PRIORITY)
    }

    /// Converts the stage into a unit.
    #[must_use]
    pub fn into_middleware(self, name: impl Into<String>, priority: i32) -> Middleware {
        Middleware::from_fn(name, priority, process)
    }
}

async fn process(request: Request, next: Handler) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_owned();

    let outcome = AssertUnwindSafe(async move { next.call(request).await })
        .catch_unwind()
        .await;

    match outcome {
        Ok(response) => response,
        Err(panic) => {
            tracing::error!(
                http.method = %method,
                http.path = %path,
                panic = panic_message(panic.as_ref()),
                "handler panicked"
            );
            Response::json_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorCategory::Internal.code(),
                "internal server error",
            )
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message
    } else {
        "<non-string panic payload>"
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct RecovererSettings {}

/// Returns the registry builder for this stage.
pub fn builder() -> Builder {
    Builder::new(KIND, build)
}

fn build(name: &str, config: &BuilderConfig) -> Result<Middleware, BuildError> {
    let (priority, rest) = split_priority(KIND, config, DEFAULT_PRIORITY)?;
    let RecovererSettings {} = parse_config(KIND, rest)?;
    Ok(RecovererMiddleware::new().into_middleware(name, priority))
}
