//! Per-request context.
//!
//! The [`RequestContext`] is the mutable record context handlers read and
//! write. It is allocated once per request by the context stage and travels in
//! the request's `http::Extensions` as a [`SharedContext`], so every later
//! middleware (and the terminal handler) can find it without changing the
//! handler signature.
//!
//! # Example
//!
//! ```
//! use strata_core::{ContextError, RequestContext, SharedContext};
//!
//! let mut request = http::Request::builder()
//!     .uri("/users/42")
//!     .body(http_body_util::Full::new(bytes::Bytes::new()))
//!     .unwrap();
//!
//! let shared = SharedContext::new(RequestContext::from_request(&request));
//! shared.install(&mut request);
//!
//! let found = SharedContext::from_request(&request).unwrap();
//! found.lock().set_value("user_id", 42);
//! assert_eq!(shared.lock().value("user_id"), Some(&serde_json::json!(42)));
//! ```

use crate::error::ContextError;
use crate::types::Request;
use http::{HeaderMap, Method, Uri};
use parking_lot::{Mutex, MutexGuard};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Mutable per-request record shared by context handlers.
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Request identifier, once one has been assigned.
    request_id: Option<String>,

    /// Request method at allocation time.
    method: Method,

    /// Request URI at allocation time.
    uri: Uri,

    /// Request headers at allocation time.
    headers: HeaderMap,

    /// Outcome recorded by context handlers.
    error: Option<ContextError>,

    /// Open key/value payload for handler-to-handler communication.
    values: HashMap<String, Value>,

    /// When the context was allocated.
    started_at: Instant,
}

impl RequestContext {
    /// Creates an empty context for a `GET /` request.
    #[must_use]
    pub fn new() -> Self {
        Self {
            request_id: None,
            method: Method::GET,
            uri: Uri::from_static("/"),
            headers: HeaderMap::new(),
            error: None,
            values: HashMap::new(),
            started_at: Instant::now(),
        }
    }

    /// Creates a context capturing the method, URI and headers of `request`.
    #[must_use]
    pub fn from_request(request: &Request) -> Self {
        Self {
            method: request.method().clone(),
            uri: request.uri().clone(),
            headers: request.headers().clone(),
            ..Self::new()
        }
    }

    /// Returns the request ID, if one has been assigned.
    #[must_use]
    pub fn request_id(&self) -> Option<&str> {
        self.request_id.as_deref()
    }

    /// Sets the request ID.
    pub fn set_request_id(&mut self, request_id: impl Into<String>) {
        self.request_id = Some(request_id.into());
    }

    /// Returns the request method.
    #[must_use]
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Returns the request URI.
    #[must_use]
    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    /// Returns the request path.
    #[must_use]
    pub fn path(&self) -> &str {
        self.uri.path()
    }

    /// Returns the request headers.
    #[must_use]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Returns a header value as a string, if present and valid UTF-8.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|value| value.to_str().ok())
    }

    /// Returns the recorded error, if any.
    #[must_use]
    pub fn error(&self) -> Option<&ContextError> {
        self.error.as_ref()
    }

    /// Records an error as the request outcome, replacing any previous one.
    pub fn set_error(&mut self, error: ContextError) {
        self.error = Some(error);
    }

    /// Clears and returns the recorded error.
    pub fn take_error(&mut self) -> Option<ContextError> {
        self.error.take()
    }

    /// Returns true if an error has been recorded.
    #[must_use]
    pub fn has_error(&self) -> bool {
        self.error.is_some()
    }

    /// Stores a value under `key`.
    pub fn set_value(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.values.insert(key.into(), value.into());
    }

    /// Returns the value stored under `key`.
    #[must_use]
    pub fn value(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    /// Removes and returns the value stored under `key`.
    pub fn remove_value(&mut self, key: &str) -> Option<Value> {
        self.values.remove(key)
    }

    /// Returns when the context was allocated.
    #[must_use]
    pub fn started_at(&self) -> Instant {
        self.started_at
    }

    /// Returns the time elapsed since the context was allocated.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle to a [`RequestContext`] stored in request extensions.
///
/// Clones share the same record. The lock is only ever held while context
/// handlers run synchronously; it must not be held across an `.await`.
#[derive(Debug, Clone, Default)]
pub struct SharedContext(Arc<Mutex<RequestContext>>);

impl SharedContext {
    /// Wraps a context for sharing.
    #[must_use]
    pub fn new(context: RequestContext) -> Self {
        Self(Arc::new(Mutex::new(context)))
    }

    /// Locks the context for reading or writing.
    pub fn lock(&self) -> MutexGuard<'_, RequestContext> {
        self.0.lock()
    }

    /// Stores this handle in the request's extensions.
    pub fn install(&self, request: &mut Request) {
        request.extensions_mut().insert(self.clone());
    }

    /// Returns the handle installed in `request`, if any.
    #[must_use]
    pub fn from_request(request: &Request) -> Option<Self> {
        request.extensions().get::<Self>().cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use http_body_util::Full;

    fn request() -> Request {
        http::Request::builder()
            .method(Method::POST)
            .uri("/orders?limit=1")
            .header("authorization", "Bearer abc")
            .body(Full::new(Bytes::new()))
            .unwrap()
    }

    #[test]
    fn test_from_request_captures_metadata() {
        let ctx = RequestContext::from_request(&request());
        assert_eq!(ctx.method(), Method::POST);
        assert_eq!(ctx.path(), "/orders");
        assert_eq!(ctx.header("authorization"), Some("Bearer abc"));
        assert!(ctx.request_id().is_none());
        assert!(!ctx.has_error());
    }

    #[test]
    fn test_error_field() {
        let mut ctx = RequestContext::new();
        ctx.set_error(ContextError::bad_request("first"));
        ctx.set_error(ContextError::forbidden("second"));
        assert_eq!(ctx.error(), Some(&ContextError::forbidden("second")));

        assert_eq!(ctx.take_error(), Some(ContextError::forbidden("second")));
        assert!(ctx.error().is_none());
    }

    #[test]
    fn test_values() {
        let mut ctx = RequestContext::new();
        assert!(ctx.value("tenant").is_none());

        ctx.set_value("tenant", "acme");
        assert_eq!(ctx.value("tenant"), Some(&Value::from("acme")));

        assert_eq!(ctx.remove_value("tenant"), Some(Value::from("acme")));
        assert!(ctx.value("tenant").is_none());
    }

    #[test]
    fn test_shared_context_install() {
        let mut req = request();
        assert!(SharedContext::from_request(&req).is_none());

        let shared = SharedContext::new(RequestContext::from_request(&req));
        shared.install(&mut req);

        let found = SharedContext::from_request(&req).unwrap();
        found.lock().set_request_id("req-1");
        assert_eq!(shared.lock().request_id(), Some("req-1"));
    }

    #[test]
    fn test_elapsed_time() {
        let ctx = RequestContext::new();
        std::thread::sleep(Duration::from_millis(5));
        assert!(ctx.elapsed() >= Duration::from_millis(5));
    }
}
