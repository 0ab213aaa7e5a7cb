//! AND / OR combinators over context handlers.
//!
//! A [`ContextHandler`] is a fallible function over the per-request
//! [`RequestContext`]: validation, authentication and authorization checks are
//! typically written this way. [`and`] and [`or`] fold a list of them into a
//! single [`Middleware`]:
//!
//! | Mode | Stops at | Outcome when stopped | Calls next |
//! |------|----------|----------------------|------------|
//! | [`Mode::All`] (AND) | first error | that error recorded | no |
//! | [`Mode::Any`] (OR) | first success | nothing recorded | yes |
//!
//! If every handler fails under [`Mode::Any`], the *last* error is recorded
//! and next is not called. An empty list passes straight through to next.
//!
//! The context must have been installed by the
//! [`ContextMiddleware`](crate::stages::ContextMiddleware) at a lower priority.
//! When it is missing, the unit answers `500` with the body
//! [`MISSING_CONTEXT_BODY`] and runs none of its handlers.
//!
//! # Example
//!
//! ```
//! use strata_core::{ContextError, RequestContext};
//! use strata_middleware::combinator::{self, context_handler};
//!
//! let has_token = context_handler(|ctx: &mut RequestContext| {
//!     match ctx.header("authorization") {
//!         Some(_) => Ok(()),
//!         None => Err(ContextError::unauthorized("missing token")),
//!     }
//! });
//! let is_internal = context_handler(|ctx: &mut RequestContext| {
//!     if ctx.path().starts_with("/internal") {
//!         Ok(())
//!     } else {
//!         Err(ContextError::forbidden("not an internal route"))
//!     }
//! });
//!
//! let auth = combinator::and("auth", 50, [has_token, is_internal]);
//! assert_eq!(auth.name(), "auth");
//! ```

use crate::middleware::Middleware;
use http::StatusCode;
use std::sync::Arc;
use strata_core::{
    ContextError, Handler, Request, RequestContext, Response, ResponseExt, SharedContext,
};

/// Body of the response sent when no request context is installed.
pub const MISSING_CONTEXT_BODY: &str = "missing request context";

/// A fallible function over the request context.
pub type ContextHandler =
    Arc<dyn Fn(&mut RequestContext) -> Result<(), ContextError> + Send + Sync>;

/// Wraps a closure as a [`ContextHandler`].
pub fn context_handler<F>(func: F) -> ContextHandler
where
    F: Fn(&mut RequestContext) -> Result<(), ContextError> + Send + Sync + 'static,
{
    Arc::new(func)
}

/// How a combinator folds its handlers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mode {
    /// Every handler must succeed (logical AND).
    All,
    /// One successful handler suffices (logical OR).
    Any,
}

/// Builds a unit that requires every handler to succeed.
pub fn and<I>(name: impl Into<String>, priority: i32, handlers: I) -> Middleware
where
    I: IntoIterator<Item = ContextHandler>,
{
    combine(name, priority, Mode::All, handlers)
}

/// Builds a unit that requires one handler to succeed.
pub fn or<I>(name: impl Into<String>, priority: i32, handlers: I) -> Middleware
where
    I: IntoIterator<Item = ContextHandler>,
{
    combine(name, priority, Mode::Any, handlers)
}

/// Builds a combinator unit with an explicit [`Mode`].
pub fn combine<I>(name: impl Into<String>, priority: i32, mode: Mode, handlers: I) -> Middleware
where
    I: IntoIterator<Item = ContextHandler>,
{
    let name = name.into();
    let handlers: Arc<[ContextHandler]> = handlers.into_iter().collect();
    let unit_name = name.clone();

    Middleware::new(name, priority, move |next: Handler| {
        if handlers.is_empty() {
            return next;
        }

        let handlers = Arc::clone(&handlers);
        let name = unit_name.clone();
        Handler::new(move |request: Request| {
            let handlers = Arc::clone(&handlers);
            let name = name.clone();
            let next = next.clone();
            async move { run(&name, mode, &handlers, request, next).await }
        })
    })
}

async fn run(
    name: &str,
    mode: Mode,
    handlers: &[ContextHandler],
    request: Request,
    next: Handler,
) -> Response {
    let Some(shared) = SharedContext::from_request(&request) else {
        tracing::error!(
            middleware = name,
            http.path = %request.uri().path(),
            "request context missing; is the context middleware installed at a lower priority?"
        );
        return Response::error(StatusCode::INTERNAL_SERVER_ERROR, MISSING_CONTEXT_BODY);
    };

    // The guard is dropped before `next` is awaited.
    let outcome = evaluate(mode, handlers, &mut shared.lock());

    match outcome {
        Ok(()) => next.call(request).await,
        Err(err) => {
            tracing::debug!(middleware = name, error = %err, "context handler rejected request");
            let response = err.to_response();
            shared.lock().set_error(err);
            response
        }
    }
}

fn evaluate(
    mode: Mode,
    handlers: &[ContextHandler],
    ctx: &mut RequestContext,
) -> Result<(), ContextError> {
    if let [only] = handlers {
        return only(ctx);
    }

    match mode {
        Mode::All => {
            for handler in handlers {
                handler(ctx)?;
            }
            Ok(())
        }
        Mode::Any => {
            let mut last = None;
            for handler in handlers {
                match handler(ctx) {
                    Ok(()) => return Ok(()),
                    Err(err) => last = Some(err),
                }
            }
            last.map_or(Ok(()), Err)
        }
    }
}
