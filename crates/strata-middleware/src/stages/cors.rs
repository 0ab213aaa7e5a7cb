//! CORS (Cross-Origin Resource Sharing) middleware.
//!
//! Answers preflight requests directly and adds CORS headers to the
//! responses of allowed cross-origin requests.
//!
//! ## Preflight Requests
//!
//! An `OPTIONS` request carrying both `Origin` and
//! `Access-Control-Request-Method` is a preflight. It never reaches inner
//! stages: an allowed origin, method and header set gets `204 No Content`
//! with the allow headers, anything else gets `403 Forbidden`.
//!
//! ## Example
//!
//! ```
//! use http::Method;
//! use std::time::Duration;
//! use strata_middleware::stages::CorsMiddleware;
//!
//! let cors = CorsMiddleware::new()
//!     .allow_origin("https://app.example.com")
//!     .allow_methods([Method::GET, Method::POST])
//!     .allow_headers(["Content-Type", "Authorization"])
//!     .allow_credentials(true)
//!     .max_age(Duration::from_secs(3600))
//!     .middleware();
//! assert_eq!(cors.priority(), 40);
//! ```

use crate::builder::{parse_config, split_priority, Builder, BuilderConfig};
use crate::error::BuildError;
use crate::middleware::Middleware;
use http::{HeaderValue, Method, StatusCode};
use indexmap::IndexSet;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use strata_core::{Handler, Request, Response, ResponseExt};

/// Builder type name.
pub const KIND: &str = "cors";

/// Default priority.
pub const DEFAULT_PRIORITY: i32 = 40;

/// CORS header names.
pub mod headers {
    /// `Access-Control-Allow-Origin` header.
    pub const ALLOW_ORIGIN: &str = "access-control-allow-origin";
    /// `Access-Control-Allow-Methods` header.
    pub const ALLOW_METHODS: &str = "access-control-allow-methods";
    /// `Access-Control-Allow-Headers` header.
    pub const ALLOW_HEADERS: &str = "access-control-allow-headers";
    /// `Access-Control-Allow-Credentials` header.
    pub const ALLOW_CREDENTIALS: &str = "access-control-allow-credentials";
    /// `Access-Control-Max-Age` header.
    pub const MAX_AGE: &str = "access-control-max-age";
    /// `Access-Control-Expose-Headers` header.
    pub const EXPOSE_HEADERS: &str = "access-control-expose-headers";
    /// `Access-Control-Request-Method` header (preflight).
    pub const REQUEST_METHOD: &str = "access-control-request-method";
    /// `Access-Control-Request-Headers` header (preflight).
    pub const REQUEST_HEADERS: &str = "access-control-request-headers";
    /// `Origin` header.
    pub const ORIGIN: &str = "origin";
    /// `Vary` header.
    pub const VARY: &str = "vary";
}

const PREFLIGHT_VARY: &str =
    "Origin, Access-Control-Request-Method, Access-Control-Request-Headers";

/// The set of allowed origins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AllowedOrigins {
    /// Any origin (`*`).
    Any,
    /// Exactly these origins.
    List(IndexSet<String>),
}

impl AllowedOrigins {
    /// Returns true if `origin` is allowed.
    pub fn is_allowed(&self, origin: &str) -> bool {
        match self {
            Self::Any => true,
            Self::List(origins) => origins.contains(origin),
        }
    }
}

/// Serializable CORS settings, as accepted by the `cors` builder type.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CorsConfig {
    /// Allowed origins; `"*"` allows any.
    pub allowed_origins: Vec<String>,
    /// Allowed methods.
    pub allowed_methods: Vec<String>,
    /// Allowed request headers; `"*"` allows any.
    pub allowed_headers: Vec<String>,
    /// Response headers exposed to scripts.
    pub expose_headers: Vec<String>,
    /// Whether credentials are allowed.
    pub allow_credentials: bool,
    /// Preflight cache lifetime in seconds.
    pub max_age_secs: Option<u64>,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: Vec::new(),
            allowed_methods: ["GET", "HEAD", "POST", "PUT", "DELETE", "PATCH"]
                .map(str::to_owned)
                .to_vec(),
            allowed_headers: ["content-type", "authorization", "x-request-id"]
                .map(str::to_owned)
                .to_vec(),
            expose_headers: Vec::new(),
            allow_credentials: false,
            max_age_secs: Some(86_400),
        }
    }
}

/// Middleware that handles CORS preflight requests and headers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorsMiddleware {
    allowed_origins: AllowedOrigins,
    allowed_methods: IndexSet<Method>,
    allowed_headers: IndexSet<String>,
    expose_headers: IndexSet<String>,
    allow_credentials: bool,
    max_age: Option<Duration>,
}

impl CorsMiddleware {
    /// Creates a middleware with the default settings and no allowed origins.
    #[must_use]
    pub fn new() -> Self {
        Self {
            allowed_origins: AllowedOrigins::List(IndexSet::new()),
            allowed_methods: IndexSet::from([
                Method::GET,
                Method::HEAD,
                Method::POST,
                Method::PUT,
                Method::DELETE,
                Method::PATCH,
            ]),
            allowed_headers: ["content-type", "authorization", "x-request-id"]
                .into_iter()
                .map(str::to_owned)
                .collect(),
            expose_headers: IndexSet::new(),
            allow_credentials: false,
            max_age: Some(Duration::from_secs(86_400)),
        }
    }

    /// Creates a middleware that allows any origin, method and header.
    ///
    /// Meant for development only.
    #[must_use]
    pub fn permissive() -> Self {
        Self::new()
            .allow_any_origin()
            .allow_methods([
                Method::GET,
                Method::HEAD,
                Method::POST,
                Method::PUT,
                Method::DELETE,
                Method::PATCH,
                Method::OPTIONS,
            ])
            .allow_headers(["*"])
    }

    /// Builds a middleware from deserialized settings.
    pub fn from_config(config: CorsConfig) -> Result<Self, BuildError> {
        let allowed_methods = config
            .allowed_methods
            .iter()
            .map(|m| {
                Method::from_bytes(m.to_ascii_uppercase().as_bytes())
                    .map_err(|_| BuildError::invalid_config(KIND, format!("invalid method `{m}`")))
            })
            .collect::<Result<IndexSet<_>, _>>()?;

        let mut cors = Self::new()
            .allow_methods(allowed_methods)
            .allow_headers(config.allowed_headers)
            .expose_headers(config.expose_headers)
            .allow_credentials(config.allow_credentials);

        cors.max_age = config.max_age_secs.map(Duration::from_secs);
        cors = if config.allowed_origins.iter().any(|o| o == "*") {
            cors.allow_any_origin()
        } else {
            cors.allow_origins(config.allowed_origins)
        };
        Ok(cors)
    }

    /// Allows any origin.
    ///
    /// With credentials enabled, the request origin is echoed back instead of
    /// `*`, which browsers reject in that combination.
    #[must_use]
    pub fn allow_any_origin(mut self) -> Self {
        self.allowed_origins = AllowedOrigins::Any;
        self
    }

    /// Adds an allowed origin. Has no effect once any origin is allowed.
    #[must_use]
    pub fn allow_origin(mut self, origin: impl Into<String>) -> Self {
        if let AllowedOrigins::List(origins) = &mut self.allowed_origins {
            origins.insert(origin.into());
        }
        self
    }

    /// Replaces the allowed origins.
    #[must_use]
    pub fn allow_origins<I, S>(mut self, origins: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_origins = AllowedOrigins::List(origins.into_iter().map(Into::into).collect());
        self
    }

    /// Replaces the allowed methods.
    #[must_use]
    pub fn allow_methods<I>(mut self, methods: I) -> Self
    where
        I: IntoIterator<Item = Method>,
    {
        self.allowed_methods = methods.into_iter().collect();
        self
    }

    /// Replaces the allowed request headers. `"*"` allows any header.
    #[must_use]
    pub fn allow_headers<I, S>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_headers = lowercase(headers);
        self
    }

    /// Replaces the headers exposed to scripts.
    #[must_use]
    pub fn expose_headers<I, S>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.expose_headers = lowercase(headers);
        self
    }

    /// Sets whether credentials are allowed.
    #[must_use]
    pub fn allow_credentials(mut self, allow: bool) -> Self {
        self.allow_credentials = allow;
        self
    }

    /// Sets the preflight cache lifetime.
    #[must_use]
    pub fn max_age(mut self, duration: Duration) -> Self {
        self.max_age = Some(duration);
        self
    }

    /// Omits `Access-Control-Max-Age` from preflight responses.
    #[must_use]
    pub fn no_max_age(mut self) -> Self {
        self.max_age = None;
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
        let cors = Arc::new(self);
        Middleware::from_fn(name, priority, move |request, next| {
            let cors = Arc::clone(&cors);
            async move { cors.process(request, next).await }
        })
    }

    async fn process(&self, request: Request, next: Handler) -> Response {
        if is_preflight(&request) {
            return self.preflight(&request);
        }

        let origin = origin(&request).map(str::to_owned);
        let mut response = next.call(request).await;

        if let Some(origin) = origin.filter(|o| self.allowed_origins.is_allowed(o)) {
            self.add_cors_headers(&mut response, &origin);
        }
        response
    }

    fn preflight(&self, request: &Request) -> Response {
        let Some(origin) = origin(request) else {
            return forbidden("missing Origin header");
        };
        if !self.allowed_origins.is_allowed(origin) {
            tracing::debug!(origin, "CORS preflight rejected: origin not allowed");
            return forbidden("origin not allowed");
        }

        let method = request
            .headers()
            .get(headers::REQUEST_METHOD)
            .and_then(|v| v.to_str().ok())
            .and_then(|m| m.parse::<Method>().ok());
        match method {
            Some(method) if self.allowed_methods.contains(&method) => {}
            _ => {
                tracing::debug!(origin, "CORS preflight rejected: method not allowed");
                return forbidden("method not allowed");
            }
        }

        if !self.allowed_headers.contains("*") {
            let requested = request
                .headers()
                .get(headers::REQUEST_HEADERS)
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default();
            let denied = requested
                .split(',')
                .map(|h| h.trim().to_ascii_lowercase())
                .find(|h| !h.is_empty() && !self.allowed_headers.contains(h));
            if let Some(header) = denied {
                tracing::debug!(
                    origin,
                    header = %header,
                    "CORS preflight rejected: header not allowed"
                );
                return forbidden(&format!("header `{header}` not allowed"));
            }
        }

        self.preflight_response(origin)
    }

    fn preflight_response(&self, origin: &str) -> Response {
        let mut response = Response::empty(StatusCode::NO_CONTENT);
        self.add_cors_headers(&mut response, origin);

        let headers = response.headers_mut();
        insert_joined(
            headers,
            headers::ALLOW_METHODS,
            self.allowed_methods.iter().map(Method::as_str),
        );
        insert_joined(
            headers,
            headers::ALLOW_HEADERS,
            self.allowed_headers.iter().map(String::as_str),
        );
        if let Some(max_age) = self.max_age {
            headers.insert(headers::MAX_AGE, HeaderValue::from(max_age.as_secs()));
        }
        headers.insert(headers::VARY, HeaderValue::from_static(PREFLIGHT_VARY));
        response
    }

    fn add_cors_headers(&self, response: &mut Response, origin: &str) {
        let headers = response.headers_mut();

        if let Some(value) = self.allow_origin_value(origin) {
            headers.insert(headers::ALLOW_ORIGIN, value);
        }
        if self.allow_credentials {
            headers.insert(headers::ALLOW_CREDENTIALS, HeaderValue::from_static("true"));
        }
        insert_joined(
            headers,
            headers::EXPOSE_HEADERS,
            self.expose_headers.iter().map(String::as_str),
        );
        append_vary(headers, "Origin");
    }

    fn allow_origin_value(&self, origin: &str) -> Option<HeaderValue> {
        match &self.allowed_origins {
            AllowedOrigins::Any if !self.allow_credentials => Some(HeaderValue::from_static("*")),
            AllowedOrigins::Any => HeaderValue::from_str(origin).ok(),
            AllowedOrigins::List(origins) if origins.contains(origin) => {
                HeaderValue::from_str(origin).ok()
            }
            AllowedOrigins::List(_) => None,
        }
    }
}

impl Default for CorsMiddleware {
    fn default() -> Self {
        Self::new()
    }
}

fn is_preflight(request: &Request) -> bool {
    request.method() == Method::OPTIONS
        && request.headers().contains_key(headers::ORIGIN)
        && request.headers().contains_key(headers::REQUEST_METHOD)
}

fn origin(request: &Request) -> Option<&str> {
    request
        .headers()
        .get(headers::ORIGIN)
        .and_then(|v| v.to_str().ok())
}

fn forbidden(message: &str) -> Response {
    Response::error(StatusCode::FORBIDDEN, message)
}

fn lowercase<I, S>(headers: I) -> IndexSet<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    headers
        .into_iter()
        .map(|h| h.into().to_ascii_lowercase())
        .collect()
}

fn insert_joined<'a>(
    headers: &mut http::HeaderMap,
    name: &'static str,
    values: impl Iterator<Item = &'a str>,
) {
    let joined = values.collect::<Vec<_>>().join(", ");
    if joined.is_empty() {
        return;
    }
    if let Ok(value) = HeaderValue::from_str(&joined) {
        headers.insert(name, value);
    }
}

/// Adds `token` to `Vary` unless an existing value already lists it.
fn append_vary(headers: &mut http::HeaderMap, token: &'static str) {
    let listed = headers
        .get_all(headers::VARY)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .any(|t| t.trim() == "*" || t.trim().eq_ignore_ascii_case(token));
    if !listed {
        headers.append(headers::VARY, HeaderValue::from_static(token));
    }
}

/// Returns the registry builder for this stage.
pub fn builder() -> Builder {
    Builder::new(KIND, build)
}

fn build(name: &str, config: &BuilderConfig) -> Result<Middleware, BuildError> {
    let (priority, rest) = split_priority(KIND, config, DEFAULT_PRIORITY)?;
    let config: CorsConfig = parse_config(KIND, rest)?;
    Ok(CorsMiddleware::from_config(config)?.into_middleware(name, priority))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use http_body_util::Full;
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, Ordering};

    const APP: &str = "https://app.example.com";

    fn request_with_origin(method: Method, origin: &str) -> Request {
        http::Request::builder()
            .method(method)
            .uri("/test")
            .header(headers::ORIGIN, origin)
            .body(Full::new(Bytes::new()))
            .unwrap()
    }

    fn preflight_request(origin: &str, method: &str, request_headers: Option<&str>) -> Request {
        let mut builder = http::Request::builder()
            .method(Method::OPTIONS)
            .uri("/test")
            .header(headers::ORIGIN, origin)
            .header(headers::REQUEST_METHOD, method);
        if let Some(h) = request_headers {
            builder = builder.header(headers::REQUEST_HEADERS, h);
        }
        builder.body(Full::new(Bytes::new())).unwrap()
    }

    fn serve(cors: CorsMiddleware) -> (Handler, Arc<AtomicBool>) {
        let called = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&called);
        let terminal = Handler::new(move |_req| {
            let flag = Arc::clone(&flag);
            async move {
                flag.store(true, Ordering::SeqCst);
                Response::empty(StatusCode::OK)
            }
        });
        (cors.middleware().decorate(terminal), called)
    }

    #[test]
    fn test_defaults() {
        let cors = CorsMiddleware::new();
        assert_eq!(cors.allowed_origins, AllowedOrigins::List(IndexSet::new()));
        assert!(cors.allowed_methods.contains(&Method::GET));
        assert!(cors.allowed_headers.contains("authorization"));
        assert!(!cors.allow_credentials);
        assert_eq!(cors.max_age, Some(Duration::from_secs(86_400)));
    }

    #[test]
    fn test_allow_origin_after_any_is_ignored() {
        let cors = CorsMiddleware::new().allow_any_origin().allow_origin(APP);
        assert_eq!(cors.allowed_origins, AllowedOrigins::Any);
    }

    #[tokio::test]
    async fn test_preflight_allowed() {
        let (handler, called) = serve(
            CorsMiddleware::new()
                .allow_origin(APP)
                .allow_methods([Method::GET, Method::POST]),
        );

        let response = handler
            .call(preflight_request(APP, "POST", Some("Content-Type, X-Request-ID")))
            .await;

        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert!(!called.load(Ordering::SeqCst));
        let h = response.headers();
        assert_eq!(h.get(headers::ALLOW_ORIGIN).unwrap(), APP);
        assert_eq!(h.get(headers::ALLOW_METHODS).unwrap(), "GET, POST");
        assert_eq!(h.get(headers::MAX_AGE).unwrap(), "86400");
        assert_eq!(h.get(headers::VARY).unwrap(), PREFLIGHT_VARY);
    }

    #[tokio::test]
    async fn test_preflight_rejections() {
        let (handler, called) = serve(
            CorsMiddleware::new()
                .allow_origin(APP)
                .allow_methods([Method::GET]),
        );

        let cases = [
            preflight_request("https://evil.example.com", "GET", None),
            preflight_request(APP, "DELETE", None),
            preflight_request(APP, "GET", Some("x-secret")),
        ];
        for request in cases {
            let response = handler.call(request).await;
            assert_eq!(response.status(), StatusCode::FORBIDDEN);
            assert!(response.headers().get(headers::ALLOW_ORIGIN).is_none());
        }
        assert!(!called.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_wildcard_headers_accept_anything() {
        let (handler, _) = serve(CorsMiddleware::permissive());
        let response = handler
            .call(preflight_request(APP, "PATCH", Some("x-anything")))
            .await;
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert_eq!(response.headers().get(headers::ALLOW_ORIGIN).unwrap(), "*");
    }

    #[tokio::test]
    async fn test_any_origin_with_credentials_echoes_origin() {
        let (handler, _) = serve(
            CorsMiddleware::new()
                .allow_any_origin()
                .allow_credentials(true),
        );
        let response = handler.call(request_with_origin(Method::GET, APP)).await;
        let h = response.headers();
        assert_eq!(h.get(headers::ALLOW_ORIGIN).unwrap(), APP);
        assert_eq!(h.get(headers::ALLOW_CREDENTIALS).unwrap(), "true");
    }

    #[tokio::test]
    async fn test_simple_request_adds_headers() {
        let (handler, called) = serve(
            CorsMiddleware::new()
                .allow_origin(APP)
                .expose_headers(["X-Request-ID", "X-Total-Count"]),
        );

        let response = handler.call(request_with_origin(Method::GET, APP)).await;

        assert!(called.load(Ordering::SeqCst));
        assert_eq!(response.status(), StatusCode::OK);
        let h = response.headers();
        assert_eq!(h.get(headers::ALLOW_ORIGIN).unwrap(), APP);
        assert_eq!(
            h.get(headers::EXPOSE_HEADERS).unwrap(),
            "x-request-id, x-total-count"
        );
        assert_eq!(h.get(headers::VARY).unwrap(), "Origin");
    }

    #[tokio::test]
    async fn test_inner_vary_is_kept() {
        let terminal = Handler::new(|_req| async {
            let mut response = Response::empty(StatusCode::OK);
            response
                .headers_mut()
                .insert(headers::VARY, HeaderValue::from_static("Accept-Encoding"));
            response
        });
        let handler = CorsMiddleware::new()
            .allow_origin(APP)
            .middleware()
            .decorate(terminal);

        let response = handler.call(request_with_origin(Method::GET, APP)).await;

        let vary: Vec<_> = response
            .headers()
            .get_all(headers::VARY)
            .iter()
            .map(|v| v.to_str().unwrap())
            .collect();
        assert_eq!(vary, ["Accept-Encoding", "Origin"]);
    }

    #[test]
    fn test_append_vary_skips_listed_token() {
        let mut h = http::HeaderMap::new();
        h.insert(headers::VARY, HeaderValue::from_static("accept-encoding, origin"));
        append_vary(&mut h, "Origin");
        assert_eq!(h.get_all(headers::VARY).iter().count(), 1);

        let mut h = http::HeaderMap::new();
        h.insert(headers::VARY, HeaderValue::from_static("*"));
        append_vary(&mut h, "Origin");
        assert_eq!(h.get(headers::VARY).unwrap(), "*");
    }

    #[tokio::test]
    async fn test_disallowed_origin_gets_no_headers() {
        let (handler, called) = serve(CorsMiddleware::new().allow_origin(APP));
        let response = handler
            .call(request_with_origin(Method::GET, "https://evil.example.com"))
            .await;

        // The request is still served; the browser enforces the policy.
        assert!(called.load(Ordering::SeqCst));
        assert!(response.headers().get(headers::ALLOW_ORIGIN).is_none());
    }

    #[tokio::test]
    async fn test_options_without_request_method_is_not_preflight() {
        let (handler, called) = serve(CorsMiddleware::new().allow_origin(APP));
        let response = handler.call(request_with_origin(Method::OPTIONS, APP)).await;
        assert!(called.load(Ordering::SeqCst));
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[test]
    fn test_from_config() {
        let config: CorsConfig = serde_json::from_value(json!({
            "allowed_origins": ["*"],
            "allowed_methods": ["get", "post"],
            "allow_credentials": true,
            "max_age_secs": null
        }))
        .unwrap();

        let cors = CorsMiddleware::from_config(config).unwrap();
        assert_eq!(cors.allowed_origins, AllowedOrigins::Any);
        assert_eq!(
            cors.allowed_methods,
            IndexSet::from([Method::GET, Method::POST])
        );
        assert!(cors.allow_credentials);
        assert_eq!(cors.max_age, None);
    }

    #[test]
    fn test_builder_rejects_bad_settings() {
        let bad_method = match json!({ "allowed_methods": ["GE T"] }) {
            serde_json::Value::Object(map) => map,
            _ => unreachable!(),
        };
        assert!(matches!(
            build("cors", &bad_method),
            Err(BuildError::InvalidConfig { .. })
        ));

        let unknown_key = match json!({ "origins": ["*"] }) {
            serde_json::Value::Object(map) => map,
            _ => unreachable!(),
        };
        assert!(build("cors", &unknown_key).is_err());
    }
}
