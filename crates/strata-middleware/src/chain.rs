//! Chain composition.
//!
//! [`compose`] turns an ordered slice of units and a terminal handler into a
//! single handler. [`Chain`] bundles that handler with the units it was built
//! from, which is the snapshot the [`Manager`](crate::Manager) publishes.
//!
//! ## Execution order
//!
//! ```text
//! units = [A(10), B(20)]
//!
//! A.pre → B.pre → terminal → B.post → A.post
//! ```

use crate::middleware::{sort, Middleware};
use http::StatusCode;
use strata_core::{BoxFuture, Handler, Request, Response, ResponseExt};

/// Builds a handler from `units` (already ordered) around `terminal`.
///
/// Wrapping runs from the last unit to the first, so the first unit ends up
/// outermost. With no units the terminal is returned unchanged. Without a
/// terminal the innermost handler answers with an empty `200 OK`.
#[must_use]
pub fn compose(units: &[Middleware], terminal: Option<Handler>) -> Handler {
    let mut handler = terminal.unwrap_or_else(missing_terminal);
    for unit in units.iter().rev() {
        handler = unit.decorate(handler);
    }
    handler
}

fn missing_terminal() -> Handler {
    Handler::new(|request: Request| async move {
        tracing::debug!(
            http.method = %request.method(),
            http.path = %request.uri().path(),
            "no terminal handler installed; returning empty response"
        );
        Response::empty(StatusCode::OK)
    })
}

/// An ordered set of units together with the handler composed from them.
///
/// A `Chain` is immutable: mutating a chain means building a new one.
#[derive(Debug, Clone)]
pub struct Chain {
    units: Vec<Middleware>,
    handler: Handler,
}

impl Chain {
    /// Sorts `units` by priority and composes them around `terminal`.
    #[must_use]
    pub fn new(mut units: Vec<Middleware>, terminal: Option<Handler>) -> Self {
        sort(&mut units);
        let handler = compose(&units, terminal);
        Self { units, handler }
    }

    /// Returns a chain with no units and no terminal handler.
    #[must_use]
    pub fn empty() -> Self {
        Self::new(Vec::new(), None)
    }

    /// Returns the units in execution order.
    #[must_use]
    pub fn units(&self) -> &[Middleware] {
        &self.units
    }

    /// Returns the composed handler.
    #[must_use]
    pub fn handler(&self) -> &Handler {
        &self.handler
    }

    /// Returns the unit names in execution order.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.units.iter().map(Middleware::name).collect()
    }

    /// Returns the number of units.
    #[must_use]
    pub fn len(&self) -> usize {
        self.units.len()
    }

    /// Returns true if the chain has no units.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    /// Invokes the composed handler.
    pub fn serve(&self, request: Request) -> BoxFuture<'static, Response> {
        self.handler.call(request)
    }
}

impl Default for Chain {
    fn default() -> Self {
        Self::empty()
    }
}
