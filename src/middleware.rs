//! Store integration seam.
//!
//! [`SagaMiddleware`] is the only point where the (external) store layer
//! meets the effect runtime: [`apply`](SagaMiddleware::apply) wraps the
//! store's "next dispatcher" function and returns a new dispatcher that
//! forwards every action both to the wrapped function and to the monitor's
//! fan-out, resolving once both have completed.
//!
//! Effects are invoked once, at wrap time, with a shared [`SagaInput`]; the
//! resulting outputs are kept alive (with a draining subscription) for as
//! long as the returned dispatcher exists. The input's own `dispatch` is
//! late-bound to that same returned dispatcher, so an action a saga `put`s
//! re-enters the full pipeline and other sagas can react to it.

use std::sync::{Arc, OnceLock, Weak};

use crate::action::ArcAction;
use crate::awaitable::Awaitable;
use crate::effect::Effect;
use crate::input::SagaInput;
use crate::monitor::{Dispatcher, SagaMonitor};
use crate::output::SagaOutput;
use crate::runtime;

/// Weak handle to the composite dispatcher: sagas must be able to re-enter
/// it without keeping it (and therefore themselves) alive.
type WeakDispatcher = Weak<dyn Fn(ArcAction) -> Awaitable<()> + Send + Sync>;

pub struct SagaMiddleware<S> {
    monitor: Arc<SagaMonitor>,
    effects: Vec<Effect<S, ()>>,
}

impl<S: 'static> SagaMiddleware<S> {
    pub fn new(effects: Vec<Effect<S, ()>>) -> Self {
        Self::with_monitor(Arc::new(SagaMonitor::new()), effects)
    }

    pub fn with_monitor(monitor: Arc<SagaMonitor>, effects: Vec<Effect<S, ()>>) -> Self {
        Self { monitor, effects }
    }

    pub fn monitor(&self) -> &Arc<SagaMonitor> {
        &self.monitor
    }

    /// Wrap `next`, producing the dispatcher the store should call.
    ///
    /// `last_state` must be a synchronous, side-effect-free snapshot
    /// accessor; it becomes the state reader every effect sees.
    pub fn apply(
        &self,
        last_state: impl Fn() -> S + Send + Sync + 'static,
        next: Dispatcher,
    ) -> Dispatcher {
        let composite: Arc<OnceLock<WeakDispatcher>> = Arc::new(OnceLock::new());
        let input = SagaInput::new(self.monitor.clone(), last_state, {
            let composite = composite.clone();
            let next = next.clone();
            move |action| match composite.get().and_then(Weak::upgrade) {
                Some(dispatch) => dispatch(action),
                // Wiring incomplete, or the dispatcher is already gone:
                // the store alone.
                None => next(action),
            }
        });

        let outputs: Vec<SagaOutput<()>> =
            self.effects.iter().map(|effect| effect.invoke(&input)).collect();
        for output in &outputs {
            output.subscribe(|_| {});
        }
        tracing::debug!(effects = outputs.len(), "saga middleware wired");

        let monitor = self.monitor.clone();
        let dispatcher: Dispatcher = Arc::new(move |action| {
            // The outputs live exactly as long as this dispatcher.
            let _ = outputs.len();

            let store_done = next(action.clone());
            let sagas_done = monitor.dispatch(action);
            if store_done.is_settled() && sagas_done.is_settled() {
                return Awaitable::just(());
            }

            let (awaitable, promise) = Awaitable::pending();
            runtime::shared().spawn(async move {
                let _ = store_done.wait_async().await;
                let _ = sagas_done.wait_async().await;
                promise.resolve(());
            });
            awaitable
        });
        let _ = composite.set(Arc::downgrade(&dispatcher));
        dispatcher
    }
}

// ===========================================================================
// Tests
// ===========================================================================
