//! Request ID middleware.
//!
//! Assigns every request a unique identifier used for log correlation and
//! support references.
//!
//! ## Request ID Sources
//!
//! 1. **Incoming header**: used only when `trust_incoming` is enabled and the
//!    value is a well-formed ID
//! 2. **Generated UUID v7**: otherwise (time-ordered, no coordination needed)
//!
//! The ID is written to the request context (when one is installed), to the
//! request headers seen by inner stages, and to the response headers.

use crate::builder::{parse_config, split_priority, Builder, BuilderConfig};
use crate::error::BuildError;
use crate::middleware::Middleware;
use http::header::{HeaderName, HeaderValue};
use serde::Deserialize;
use std::fmt;
use std::sync::Arc;
use strata_core::{Handler, Request, Response, SharedContext};
use uuid::Uuid;

/// Builder type name.
pub const KIND: &str = "request_id";

/// Default priority.
pub const DEFAULT_PRIORITY: i32 = 20;

/// The default header name for request ID propagation.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Longest incoming ID accepted when incoming IDs are trusted.
const MAX_INCOMING_LEN: usize = 128;

/// Produces fresh request IDs.
pub type IdGenerator = Arc<dyn Fn() -> String + Send + Sync>;

/// Middleware that generates or propagates request IDs.
#[derive(Clone)]
pub struct RequestIdMiddleware {
    header: HeaderName,
    trust_incoming: bool,
    generator: IdGenerator,
}

impl RequestIdMiddleware {
    /// Creates a middleware that always generates new IDs.
    #[must_use]
    pub fn new() -> Self {
        Self {
            header: HeaderName::from_static(REQUEST_ID_HEADER),
            trust_incoming: false,
            generator: Arc::new(|| Uuid::now_v7().to_string()),
        }
    }

    /// Reuses well-formed incoming IDs instead of generating new ones.
    ///
    /// Enable this only for traffic from trusted upstream services.
    #[must_use]
    pub fn trust_incoming(mut self, trust: bool) -> Self {
        self.trust_incoming = trust;
        self
    }

    /// Uses `header` instead of `x-request-id`.
    #[must_use]
    pub fn header(mut self, header: HeaderName) -> Self {
        self.header = header;
        self
    }

    /// Replaces the ID generator.
    #[must_use]
    pub fn generator<F>(mut self, generator: F) -> Self
    where
        F: Fn() -> String + Send + Sync + 'static,
    {
        self.generator = Arc::new(generator);
        self
    }

    /// Converts the stage into a unit with the default name and priority.
    #[must_use]
    pub fn middleware(self) -> Middleware {
        self.into_middleware(KIND, DEFAULT_PRIORITY)
    }

    /// Converts the stage into a unit.
    #[must_use]
    pub fn into_middleware(self, name: impl Into<String>, priority: i32) -> Middleware {
        let stage = Arc::new(self);
        Middleware::from_fn(name, priority, move |request, next| {
            let stage = Arc::clone(&stage);
            async move { stage.process(request, next).await }
        })
    }

    fn incoming(&self, request: &Request) -> Option<String> {
        if !self.trust_incoming {
            return None;
        }

        request
            .headers()
            .get(&self.header)
            .and_then(|value| value.to_str().ok())
            .filter(|id| is_well_formed(id))
            .map(str::to_owned)
    }

    async fn process(&self, mut request: Request, next: Handler) -> Response {
        let request_id = self
            .incoming(&request)
            .unwrap_or_else(|| (self.generator)());

        if let Some(shared) = SharedContext::from_request(&request) {
            shared.lock().set_request_id(request_id.clone());
        }

        let value = match HeaderValue::from_str(&request_id) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(
                    request_id = %request_id,
                    "generated request ID is not a valid header value"
                );
                None
            }
        };

        if let Some(value) = &value {
            request.headers_mut().insert(self.header.clone(), value.clone());
        }

        let mut response = next.call(request).await;

        if let Some(value) = value {
            response.headers_mut().insert(self.header.clone(), value);
        }
        response
    }
}

impl Default for RequestIdMiddleware {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for RequestIdMiddleware {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestIdMiddleware")
            .field("header", &self.header)
            .field("trust_incoming", &self.trust_incoming)
            .finish_non_exhaustive()
    }
}

fn is_well_formed(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= MAX_INCOMING_LEN
        && id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.'))
}

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct RequestIdSettings {
    trust_incoming: bool,
    header: String,
}

impl Default for RequestIdSettings {
    fn default() -> Self {
        Self {
            trust_incoming: false,
            header: REQUEST_ID_HEADER.to_owned(),
        }
    }
}

/// Returns the registry builder for this stage.
pub fn builder() -> Builder {
    Builder::new(KIND, build)
}

fn build(name: &str, config: &BuilderConfig) -> Result<Middleware, BuildError> {
    let (priority, rest) = split_priority(KIND, config, DEFAULT_PRIORITY)?;
    let settings: RequestIdSettings = parse_config(KIND, rest)?;
    let header = HeaderName::from_bytes(settings.header.as_bytes()).map_err(|e| {
        BuildError::invalid_config(KIND, format!("invalid header `{}`: {e}", settings.header))
    })?;

    Ok(RequestIdMiddleware::new()
        .trust_incoming(settings.trust_incoming)
        .header(header)
        .into_middleware(name, priority))
}
