//! # sagaflow
//!
//! A redux-style saga effect runtime: a composable algebra of asynchronous
//! behavior ([`Effect`]) reacting to a dispatched action stream, executed as
//! live [`SagaOutput`]s, with blocking/timeout retrieval bridged over the
//! async machinery by [`Awaitable`].
//!
//! The store itself (reducer, subscriptions) is an external collaborator:
//! this crate only consumes a `dispatch` function and a state snapshot
//! accessor, and plugs into the store's dispatch pipeline through
//! [`SagaMiddleware`].
//!
//! ## Core Systems
//!
//! - **[`action`]** — Object-safe `Action` trait with typed downcast matching
//! - **[`awaitable`]** — Single-result future/promise pair with blocking waits and timeouts
//! - **[`monitor`]** — Dispatcher registry fanning actions out to all live effects
//! - **[`effect`]** / **[`effects`]** — Effect descriptions, composition operators, and leaf builders
//! - **[`output`]** — Running effect instances: subscription, action notifications, blocking retrieval
//! - **[`middleware`]** — The store integration seam
//!
//! ## Example
//!
//! ```
//! use std::any::Any;
//! use std::sync::Arc;
//! use sagaflow::{action, effects, Action, SagaMiddleware};
//!
//! #[derive(Debug, Clone)]
//! struct Search(String);
//!
//! impl Action for Search {
//!     fn as_any(&self) -> &dyn Any { self }
//!     fn action_name(&self) -> &str { "Search" }
//! }
//!
//! #[derive(Debug, Clone)]
//! struct SearchDone(String);
//!
//! impl Action for SearchDone {
//!     fn as_any(&self) -> &dyn Any { self }
//!     fn action_name(&self) -> &str { "SearchDone" }
//! }
//!
//! let saga = effects::take_latest(
//!     action::extractor(|s: &Search| Some(s.0.clone())),
//!     |query: String| {
//!         effects::just::<(), _>(query)
//!             .map(|q| format!("results for {q}"))
//!             .put(SearchDone)
//!             .discard()
//!     },
//! );
//!
//! let middleware = SagaMiddleware::new(vec![saga]);
//! let dispatch = middleware.apply(|| (), Arc::new(|_a| sagaflow::Awaitable::just(())));
//! dispatch(action::arc(Search("rust".into()))).wait().unwrap();
//! ```

// Foundation
pub mod action;
pub mod awaitable;
pub mod error;

// Execution
pub mod monitor;
pub(crate) mod runtime;
pub(crate) mod stream;

// Effects
pub mod effect;
pub mod effects;
pub mod input;
pub mod output;

// Store integration
pub mod middleware;

pub use action::{Action, ArcAction};
pub use awaitable::{Awaitable, Promise};
pub use effect::Effect;
pub use error::SagaError;
pub use input::{SagaInput, StateReader};
pub use middleware::SagaMiddleware;
pub use monitor::{Dispatcher, SagaMonitor};
pub use output::SagaOutput;

/// Lock a mutex, recovering the guard if a panicking holder poisoned it.
/// Every lock in this crate protects state that stays consistent across
/// panics (registries, slots, teardown lists).
pub(crate) fn lock<T>(mutex: &std::sync::Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}
