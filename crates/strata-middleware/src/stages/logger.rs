//! Request logging middleware.
//!
//! Runs the rest of the chain inside a `http.request` span and emits one
//! event per request once the response is ready.
//!
//! ## Fields
//!
//! - `http.method` - request method
//! - `http.path` - request path
//! - `http.status_code` - response status
//! - `latency_ms` - time since the request context was allocated, or since
//!   this stage was entered when no context is installed
//! - `request_id` - taken from the request context, when installed

use crate::builder::{parse_config, split_priority, Builder, BuilderConfig};
use crate::error::BuildError;
use crate::middleware::Middleware;
use serde::Deserialize;
use std::time::{Duration, Instant};
use strata_core::{Handler, Request, Response, SharedContext};
use tracing::{Instrument, Level};

/// Builder type name.
pub const KIND: &str = "logger";

/// Default priority.
pub const DEFAULT_PRIORITY: i32 = 30;

/// Middleware that logs every request.
#[derive(Debug, Clone, Copy)]
pub struct LoggerMiddleware {
    level: Level,
}

impl LoggerMiddleware {
    /// Creates a logger emitting at `INFO`.
    #[must_use]
    pub fn new() -> Self {
        Self { level: Level::INFO }
    }

    /// Sets the level of the per-request event.
    #[must_use]
    pub fn level(mut self, level: Level) -> Self {
        self.level = level;
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
        Middleware::from_fn(name, priority, move |request, next| self.process(request, next))
    }

    async fn process(self, request: Request, next: Handler) -> Response {
        let method = request.method().clone();
        let path = request.uri().path().to_owned();
        let shared = SharedContext::from_request(&request);
        let span = tracing::info_span!(
            "http.request",
            http.method = %method,
            http.path = %path,
        );

        let start = Instant::now();
        let response = next.call(request).instrument(span.clone()).await;
        let (request_id, elapsed) = context_snapshot(shared.as_ref(), start);
        let latency_ms = millis(elapsed);
        let request_id = request_id
            .or_else(|| header_request_id(&response))
            .unwrap_or_default();
        let status = response.status().as_u16();

        macro_rules! emit {
            ($level:expr) => {
                tracing::event!(
                    $level,
                    http.method = %method,
                    http.path = %path,
                    http.status_code = status,
                    latency_ms,
                    request_id = %request_id,
                    "request completed"
                )
            };
        }

        span.in_scope(|| {
            if self.level == Level::TRACE {
                emit!(Level::TRACE);
            } else if self.level == Level::DEBUG {
                emit!(Level::DEBUG);
            } else if self.level == Level::INFO {
                emit!(Level::INFO);
            } else if self.level == Level::WARN {
                emit!(Level::WARN);
            } else {
                emit!(Level::ERROR);
            }
        });

        response
    }
}

impl Default for LoggerMiddleware {
    fn default() -> Self {
        Self::new()
    }
}

fn header_request_id(response: &Response) -> Option<String> {
    response
        .headers()
        .get(super::request_id::REQUEST_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned)
}

/// Parses a level name such as `"debug"` (case-insensitive).
pub fn parse_level(level: &str) -> Option<Level> {
    match level.to_ascii_lowercase().as_str() {
        "trace" => Some(Level::TRACE),
        "debug" => Some(Level::DEBUG),
        "info" => Some(Level::INFO),
        "warn" | "warning" => Some(Level::WARN),
        "error" => Some(Level::ERROR),
        _ => None,
    }
}

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct LoggerSettings {
    level: String,
}

impl Default for LoggerSettings {
    fn default() -> Self {
        Self {
            level: "info".to_owned(),
        }
    }
}

/// Request ID and elapsed time, preferring the installed context.
fn context_snapshot(shared: Option<&SharedContext>, start: Instant) -> (Option<String>, Duration) {
    match shared {
        Some(shared) => {
            let ctx = shared.lock();
            (ctx.request_id().map(str::to_owned), ctx.elapsed())
        }
        None => (None, start.elapsed()),
    }
}

fn millis(elapsed: Duration) -> u64 {
    u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
}

/// Returns the registry builder for this stage.
pub fn builder() -> Builder {
    Builder::new(KIND, build)
}

fn build(name: &str, config: &BuilderConfig) -> Result<Middleware, BuildError> {
    let (priority, rest) = split_priority(KIND, config, DEFAULT_PRIORITY)?;
    let settings: LoggerSettings = parse_config(KIND, rest)?;
    let level = parse_level(&settings.level).ok_or_else(|| {
        BuildError::invalid_config(KIND, format!("unknown level `{}`", settings.level))
    })?;
    Ok(LoggerMiddleware::new().level(level).into_middleware(name, priority))
}
