//! # Strata Core
//!
//! Core types shared by every Strata crate.
//!
//! This crate provides the vocabulary the middleware engine is written in:
//!
//! - [`Request`] / [`Response`] - HTTP exchange types flowing through a chain
//! - [`Handler`] - Type-erased, clonable async request handler
//! - [`RequestContext`] / [`SharedContext`] - Per-request mutable record
//! - [`ContextError`] - Request-time failure recorded by context handlers

#![doc(html_root_url = "https://docs.rs/strata-core/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod context;
mod error;
mod handler;
mod types;

pub use context::{RequestContext, SharedContext};
pub use error::{ContextError, ErrorCategory};
pub use handler::{BoxFuture, Handler};
pub use types::{Request, Response, ResponseExt};
