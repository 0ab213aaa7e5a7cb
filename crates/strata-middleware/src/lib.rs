//! # Strata Middleware
//!
//! Prioritized middleware chains that can be changed while serving traffic.
//!
//! A [`Middleware`] is a named decorator with an integer priority. Units are
//! ordered by ascending priority (ties keep their insertion order) and wrapped
//! around a terminal [`Handler`](strata_core::Handler), so the lowest priority
//! runs first on the way in and last on the way out:
//!
//! ```text
//! Request → recoverer(10) → request_id(20) → logger(30) → Handler
//!                                                            ↓
//! Response ← recoverer(10) ← request_id(20) ← logger(30) ←──┘
//! ```
//!
//! ## Components
//!
//! | Component | Purpose |
//! |-----------|---------|
//! | [`Middleware`], [`sort`] | Units and the ordering policy |
//! | [`compose`], [`Chain`] | Wrap units around a terminal handler |
//! | [`Manager`] | Add, remove and replace units at runtime |
//! | [`BuilderRegistry`] | Build units from `{type, name, config}` records |
//! | [`combinator`] | AND / OR over request-context handlers |
//! | [`stages`] | Built-in context, recoverer, request ID, logger and CORS units |
//!
//! ## Runtime mutation
//!
//! [`Manager`] publishes a new immutable [`Chain`] on every change. Requests
//! already in flight finish on the chain they started with; new requests
//! pick up the latest one without taking a lock.
//!
//! ## Example
//!
//! ```
//! use http::StatusCode;
//! use strata_core::{Handler, Request, Response, ResponseExt};
//! use strata_middleware::stages::{ContextMiddleware, RecovererMiddleware};
//! use strata_middleware::Manager;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let manager = Manager::with_terminal(Handler::new(|_req: Request| async {
//!     Response::empty(StatusCode::NO_CONTENT)
//! }));
//! manager.add([
//!     RecovererMiddleware::new().middleware(),
//!     ContextMiddleware::new().middleware(),
//! ]);
//! assert_eq!(manager.names(), ["context", "recoverer"]);
//!
//! let request = http::Request::new(http_body_util::Full::new(bytes::Bytes::new()));
//! assert_eq!(manager.serve(request).await.status(), StatusCode::NO_CONTENT);
//! # }
//! ```

#![doc(html_root_url = "https://docs.rs/strata-middleware/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod builder;
pub mod chain;
pub mod combinator;
pub mod error;
pub mod manager;
pub mod middleware;
pub mod stages;

pub use builder::{
    parse_config, split_priority, Builder, BuilderConfig, BuilderRegistry, PRIORITY_KEY,
};
pub use chain::{compose, Chain};
pub use combinator::{and, combine, context_handler, or, ContextHandler, Mode, MISSING_CONTEXT_BODY};
pub use error::BuildError;
pub use manager::Manager;
pub use middleware::{sort, Decorator, Middleware};
