//! Request context allocation.
//!
//! This stage allocates a fresh [`RequestContext`] for every request, installs
//! it in the request's extensions and, once the rest of the chain has
//! returned, renders any error recorded in it.
//!
//! It must run before (at a lower priority than) every unit that reads the
//! context, in particular the [`combinator`](crate::combinator) units.

use crate::builder::{parse_config, split_priority, Builder, BuilderConfig};
use crate::error::BuildError;
use crate::middleware::Middleware;
use http::header;
use serde::Deserialize;
use strata_core::{Handler, Request, RequestContext, Response, SharedContext};

/// Builder type name.
pub const KIND: &str = "context";

/// Default priority.
pub const DEFAULT_PRIORITY: i32 = 0;

/// Middleware that allocates the per-request context.
#[derive(Debug, Clone, Copy, Default)]
pub struct ContextMiddleware;

impl ContextMiddleware {
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

async fn process(mut request: Request, next: Handler) -> Response {
    let shared = SharedContext::new(RequestContext::from_request(&request));
    shared.install(&mut request);

    let response = next.call(request).await;

    let error = shared.lock().error().cloned();
    match error {
        Some(err) => {
            tracing::debug!(
                error = %err,
                status = err.status_code().as_u16(),
                "rendering request context error"
            );
            render_error(&err.to_response(), response)
        }
        None => response,
    }
}

/// Replaces the body and status of `response` with `rendered`, keeping the
/// headers set by inner stages.
fn render_error(rendered: &Response, response: Response) -> Response {
    let (parts, _body) = response.into_parts();
    let mut headers = parts.headers;
    headers.remove(header::CONTENT_TYPE);
    headers.remove(header::CONTENT_LENGTH);

    let mut out = http::Response::new(rendered.body().clone());
    *out.status_mut() = rendered.status();
    *out.headers_mut() = rendered.headers().clone();
    out.headers_mut().extend(headers);
    out
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct ContextSettings {}

/// Returns the registry builder for this stage.
pub fn builder() -> Builder {
    Builder::new(KIND, build)
}

fn build(name: &str, config: &BuilderConfig) -> Result<Middleware, BuildError> {
    let (priority, rest) = split_priority(KIND, config, DEFAULT_PRIORITY)?;
    let ContextSettings {} = parse_config(KIND, rest)?;
    Ok(ContextMiddleware::new().into_middleware(name, priority))
}
