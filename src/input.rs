//! Execution context handed to an effect at invocation.
//!
//! A [`SagaInput`] bundles the three collaborators an effect may touch: the
//! dispatcher [`SagaMonitor`](crate::monitor::SagaMonitor), a synchronous
//! state snapshot accessor, and the store's dispatch function. Its lifetime
//! is one invocation of one effect subtree.

use std::sync::Arc;

use crate::action::{Action, ArcAction};
use crate::awaitable::Awaitable;
use crate::monitor::{Dispatcher, SagaMonitor};

/// Zero-argument accessor returning the current store state.
pub type StateReader<S> = Arc<dyn Fn() -> S + Send + Sync>;

pub struct SagaInput<S> {
    monitor: Arc<SagaMonitor>,
    last_state: StateReader<S>,
    dispatcher: Dispatcher,
}

impl<S> Clone for SagaInput<S> {
    fn clone(&self) -> Self {
        Self {
            monitor: self.monitor.clone(),
            last_state: self.last_state.clone(),
            dispatcher: self.dispatcher.clone(),
        }
    }
}

impl<S> SagaInput<S> {
    pub fn new(
        monitor: Arc<SagaMonitor>,
        last_state: impl Fn() -> S + Send + Sync + 'static,
        dispatcher: impl Fn(ArcAction) -> Awaitable<()> + Send + Sync + 'static,
    ) -> Self {
        Self {
            monitor,
            last_state: Arc::new(last_state),
            dispatcher: Arc::new(dispatcher),
        }
    }

    /// An input that drops every dispatched action. Useful for effects that
    /// only read state.
    pub fn without_dispatch(
        monitor: Arc<SagaMonitor>,
        last_state: impl Fn() -> S + Send + Sync + 'static,
    ) -> Self {
        Self::new(monitor, last_state, |_action| Awaitable::just(()))
    }

    pub fn monitor(&self) -> &Arc<SagaMonitor> {
        &self.monitor
    }

    /// Current state snapshot. No side effects, no caching.
    pub fn state(&self) -> S {
        (self.last_state)()
    }

    pub fn state_reader(&self) -> StateReader<S> {
        self.last_state.clone()
    }

    /// Send an action into the store's dispatch pipeline.
    pub fn dispatch(&self, action: ArcAction) -> Awaitable<()> {
        (self.dispatcher)(action)
    }

    /// Convenience for dispatching a concrete action value.
    pub fn dispatch_action(&self, action: impl Action) -> Awaitable<()> {
        self.dispatch(Arc::new(action))
    }
}

// ===========================================================================
// Tests
// ===========================================================================
