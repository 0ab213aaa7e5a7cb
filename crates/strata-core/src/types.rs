//! HTTP exchange types used throughout a middleware chain.

use bytes::Bytes;
use http::{header, HeaderValue, StatusCode};
use http_body_util::Full;

/// The HTTP request type flowing through a chain.
///
/// This is a standard `http::Request` with a `Full<Bytes>` body. Per-request
/// state such as the [`SharedContext`](crate::SharedContext) travels in the
/// request's extensions.
pub type Request = http::Request<Full<Bytes>>;

/// The HTTP response type produced by a chain.
pub type Response = http::Response<Full<Bytes>>;

/// Extension trait for building common responses.
pub trait ResponseExt {
    /// Creates an empty response with the given status code.
    fn empty(status: StatusCode) -> Response;

    /// Creates a plain-text response with the given status code and message.
    fn error(status: StatusCode, message: &str) -> Response;

    /// Creates a JSON error envelope `{"error":{"code":..,"message":..}}`.
    fn json_error(status: StatusCode, code: &str, message: &str) -> Response;
}

impl ResponseExt for Response {
    fn empty(status: StatusCode) -> Response {
        let mut response = http::Response::new(Full::new(Bytes::new()));
        *response.status_mut() = status;
        response
    }

    fn error(status: StatusCode, message: &str) -> Response {
        let mut response = http::Response::new(Full::new(Bytes::from(message.to_owned())));
        *response.status_mut() = status;
        response.headers_mut().insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("text/plain; charset=utf-8"),
        );
        response
    }

    fn json_error(status: StatusCode, code: &str, message: &str) -> Response {
        let body = serde_json::json!({
            "error": {
                "code": code,
                "message": message
            }
        });

        let mut response = http::Response::new(Full::new(Bytes::from(body.to_string())));
        *response.status_mut() = status;
        response.headers_mut().insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        response
    }
}
