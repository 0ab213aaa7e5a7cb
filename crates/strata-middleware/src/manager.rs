//! Runtime-mutable middleware manager.
//!
//! The [`Manager`] owns a terminal handler and a set of units keyed by name,
//! and publishes the [`Chain`] composed from them.
//!
//! ## Publication
//!
//! Every mutation is copy-on-write:
//!
//! ```text
//! writer: lock state → mutate → sort + compose new Chain → store(Arc<Chain>) → unlock
//! reader: load Arc<Chain> (lock-free) → serve request with that snapshot
//! ```
//!
//! Writers are serialized by a mutex that is never held while a request runs.
//! Readers never block: each request loads the snapshot current at call time
//! and keeps it until it completes, so a concurrent mutation only affects
//! requests that start after it has been published. [`Manager::list`] reads
//! the same snapshot, so the units it reports are exactly the ones the next
//! request will run through.

use crate::chain::Chain;
use crate::middleware::Middleware;
use arc_swap::ArcSwap;
use indexmap::IndexMap;
use parking_lot::Mutex;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use strata_core::{BoxFuture, Handler, Request, Response};

/// Mutable state guarded by the writer lock.
#[derive(Default)]
struct State {
    terminal: Option<Handler>,
    units: IndexMap<String, Middleware>,
}

impl State {
    fn insert(&mut self, unit: Middleware) {
        // Re-adding a name moves it to the end of the insertion order.
        self.units.shift_remove(unit.name());
        self.units.insert(unit.name().to_owned(), unit);
    }

    fn compose(&self) -> Chain {
        Chain::new(self.units.values().cloned().collect(), self.terminal.clone())
    }
}

/// Concurrency-safe holder of a terminal handler and its middleware.
///
/// # Example
///
/// ```
/// use strata_core::{Handler, Request, Response, ResponseExt};
/// use strata_middleware::{Manager, Middleware};
/// use http::StatusCode;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let manager = Manager::with_terminal(Handler::new(|_req: Request| async {
///     Response::empty(StatusCode::OK)
/// }));
///
/// manager.add([Middleware::new("noop", 10, |next| next)]);
/// assert_eq!(manager.names(), ["noop"]);
///
/// let request = http::Request::new(http_body_util::Full::new(bytes::Bytes::new()));
/// assert_eq!(manager.serve(request).await.status(), StatusCode::OK);
/// # }
/// ```
pub struct Manager {
    state: Mutex<State>,
    chain: ArcSwap<Chain>,
}

impl Manager {
    /// Creates a manager with no terminal handler and no units.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            chain: ArcSwap::from_pointee(Chain::empty()),
        }
    }

    /// Creates a manager serving `terminal`.
    #[must_use]
    pub fn with_terminal(terminal: Handler) -> Self {
        let manager = Self::new();
        manager.set_terminal(terminal);
        manager
    }

    /// Replaces the terminal handler. `None` removes it.
    pub fn set_terminal(&self, terminal: impl Into<Option<Handler>>) {
        let mut state = self.state.lock();
        state.terminal = terminal.into();
        tracing::debug!(
            installed = state.terminal.is_some(),
            "terminal handler replaced"
        );
        self.publish(&state);
    }

    /// Replaces the terminal handler with an async function.
    pub fn set_terminal_fn<F, Fut>(&self, func: F)
    where
        F: Fn(Request) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Response> + Send + 'static,
    {
        self.set_terminal(Handler::new(func));
    }

    /// Adds units. A unit whose name is already present replaces the earlier
    /// one and moves to the end of the insertion order.
    pub fn add<I>(&self, units: I)
    where
        I: IntoIterator<Item = Middleware>,
    {
        let mut state = self.state.lock();
        let mut added = Vec::new();
        for unit in units {
            added.push(unit.name().to_owned());
            state.insert(unit);
        }
        tracing::debug!(middleware = ?added, count = state.units.len(), "middleware added");
        self.publish(&state);
    }

    /// Removes units by name. Names that are not present are ignored.
    pub fn remove<I, S>(&self, names: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut state = self.state.lock();
        let mut removed = Vec::new();
        for name in names {
            if state.units.shift_remove(name.as_ref()).is_some() {
                removed.push(name.as_ref().to_owned());
            }
        }
        tracing::debug!(middleware = ?removed, count = state.units.len(), "middleware removed");
        self.publish(&state);
    }

    /// Replaces the whole set of units in one publication.
    pub fn replace<I>(&self, units: I)
    where
        I: IntoIterator<Item = Middleware>,
    {
        let mut state = self.state.lock();
        state.units.clear();
        for unit in units {
            state.insert(unit);
        }
        tracing::debug!(count = state.units.len(), "middleware replaced");
        self.publish(&state);
    }

    /// Returns a copy of the units in execution order.
    #[must_use]
    pub fn list(&self) -> Vec<Middleware> {
        self.chain.load().units().to_vec()
    }

    /// Returns the unit names in execution order.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.chain
            .load()
            .units()
            .iter()
            .map(|unit| unit.name().to_owned())
            .collect()
    }

    /// Returns true if a unit with `name` is installed.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.chain.load().units().iter().any(|unit| unit.name() == name)
    }

    /// Returns the number of installed units.
    #[must_use]
    pub fn len(&self) -> usize {
        self.chain.load().len()
    }

    /// Returns true if no units are installed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.chain.load().is_empty()
    }

    /// Returns the currently published chain.
    #[must_use]
    pub fn chain(&self) -> Arc<Chain> {
        self.chain.load_full()
    }

    /// Serves `request` through the chain published at call time.
    pub fn serve(&self, request: Request) -> BoxFuture<'static, Response> {
        self.chain.load().serve(request)
    }

    /// Returns a handler that serves every request through this manager's
    /// current chain.
    #[must_use]
    pub fn handler(self: &Arc<Self>) -> Handler {
        let manager = Arc::clone(self);
        Handler::new(move |request| manager.serve(request))
    }

    fn publish(&self, state: &State) {
        self.chain.store(Arc::new(state.compose()));
    }
}

impl Default for Manager {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Manager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Manager")
            .field("middleware", &self.names())
            .finish_non_exhaustive()
    }
}
