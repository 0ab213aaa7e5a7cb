//! Middleware units and the ordering policy.
//!
//! A [`Middleware`] is a plain value: a name, an integer priority and a
//! decorator that turns the next [`Handler`] into a new one. Units carry no
//! mutable state and are cheap to clone, so the same unit can sit in many
//! chains at once.
//!
//! # Ordering
//!
//! Lower priorities run first (outermost). [`sort`] orders a slice by
//! ascending priority with a stable sort, so units sharing a priority keep the
//! order in which they were supplied.
//!
//! # Example
//!
//! ```
//! use strata_middleware::{Middleware, sort};
//!
//! let mut units = vec![
//!     Middleware::new("cors", 40, |next| next),
//!     Middleware::new("recoverer", 10, |next| next),
//!     Middleware::new("logger", 40, |next| next),
//! ];
//! sort(&mut units);
//!
//! let names: Vec<_> = units.iter().map(Middleware::name).collect();
//! assert_eq!(names, ["recoverer", "cors", "logger"]);
//! ```

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use strata_core::{Handler, Request, Response};

/// A function that wraps the next handler.
pub type Decorator = Arc<dyn Fn(Handler) -> Handler + Send + Sync>;

/// A named, prioritized decorator.
///
/// The decorator is a required argument of every constructor, so a unit
/// without one cannot be built.
#[derive(Clone)]
pub struct Middleware {
    name: String,
    priority: i32,
    decorate: Decorator,
}

impl Middleware {
    /// Creates a unit from a decorator.
    pub fn new<F>(name: impl Into<String>, priority: i32, decorate: F) -> Self
    where
        F: Fn(Handler) -> Handler + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            priority,
            decorate: Arc::new(decorate),
        }
    }

    /// Creates a unit from an async "around" function.
    ///
    /// The function receives the request and the next handler, and decides
    /// whether and how to call it.
    ///
    /// # Example
    ///
    /// ```
    /// use strata_middleware::Middleware;
    ///
    /// let timing = Middleware::from_fn("timing", 30, |req, next| async move {
    ///     let start = std::time::Instant::now();
    ///     let response = next.call(req).await;
    ///     tracing::debug!(elapsed = ?start.elapsed(), "request finished");
    ///     response
    /// });
    /// assert_eq!(timing.priority(), 30);
    /// ```
    pub fn from_fn<F, Fut>(name: impl Into<String>, priority: i32, func: F) -> Self
    where
        F: Fn(Request, Handler) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Response> + Send + 'static,
    {
        let func = Arc::new(func);
        Self::new(name, priority, move |next: Handler| {
            let func = Arc::clone(&func);
            Handler::new(move |request| func(request, next.clone()))
        })
    }

    /// Returns the unit's name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the unit's priority.
    #[must_use]
    pub fn priority(&self) -> i32 {
        self.priority
    }

    /// Wraps `next` with this unit's decorator.
    #[must_use]
    pub fn decorate(&self, next: Handler) -> Handler {
        (self.decorate)(next)
    }
}

impl fmt::Debug for Middleware {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Middleware")
            .field("name", &self.name)
            .field("priority", &self.priority)
            .finish_non_exhaustive()
    }
}

/// Sorts units by ascending priority, keeping the relative order of equal
/// priorities.
pub fn sort(units: &mut [Middleware]) {
    units.sort_by_key(Middleware::priority);
}
