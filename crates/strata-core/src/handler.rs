//! Type-erased request handlers.
//!
//! A [`Handler`] is the unit every middleware wraps: an async function from
//! [`Request`] to [`Response`]. Handlers are stored behind an `Arc`, so cloning
//! one is a reference count increment and a single handler value can serve any
//! number of concurrent requests.
//!
//! # Example
//!
//! ```
//! use strata_core::{Handler, Request, Response, ResponseExt};
//! use http::StatusCode;
//!
//! let handler = Handler::new(|_req: Request| async {
//!     Response::empty(StatusCode::OK)
//! });
//!
//! let cloned = handler.clone();
//! # let _ = cloned;
//! ```

use crate::types::{Request, Response, ResponseExt};
use http::StatusCode;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// A boxed future that can be moved across threads.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

type HandlerFn = dyn Fn(Request) -> BoxFuture<'static, Response> + Send + Sync;

/// A clonable, type-erased async request handler.
///
/// Handlers never inspect each other: a middleware receives the next handler,
/// wraps it, and returns a new one.
#[derive(Clone)]
pub struct Handler {
    inner: Arc<HandlerFn>,
}

impl Handler {
    /// Creates a handler from an async function.
    pub fn new<F, Fut>(func: F) -> Self
    where
        F: Fn(Request) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Response> + Send + 'static,
    {
        Self {
            inner: Arc::new(move |request: Request| -> BoxFuture<'static, Response> {
                Box::pin(func(request))
            }),
        }
    }

    /// Creates a handler that ignores the request and answers with an empty
    /// `200 OK`.
    #[must_use]
    pub fn noop() -> Self {
        Self::new(|_request| async { Response::empty(StatusCode::OK) })
    }

    /// Invokes the handler.
    pub fn call(&self, request: Request) -> BoxFuture<'static, Response> {
        (self.inner)(request)
    }

    /// Returns true if both values share the same underlying function.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handler").finish_non_exhaustive()
    }
}
