//! Effect descriptions and their composition operators.
//!
//! An [`Effect`] is a *description* of a producer of values — nothing runs
//! until [`invoke`](Effect::invoke) turns it into a
//! [`SagaOutput`](crate::output::SagaOutput). Effects are immutable values:
//! composition (`map`, `put`, `call`, `delay`, `debounce`) builds new
//! descriptions, and invoking the same effect twice yields two outputs with
//! fully independent state.
//!
//! Constructors for the leaf variants (`just`, `select`, `take_latest`, ...)
//! live in [`crate::effects`].

use std::sync::Arc;
use std::time::Duration;

use crate::action::{Action, ArcAction};
use crate::awaitable::Awaitable;
use crate::error::SagaError;
use crate::input::SagaInput;
use crate::output::SagaOutput;
use crate::runtime;

pub struct Effect<S, R> {
    create: Arc<dyn Fn(&SagaInput<S>) -> SagaOutput<R> + Send + Sync>,
}

impl<S, R> Clone for Effect<S, R> {
    fn clone(&self) -> Self {
        Self {
            create: self.create.clone(),
        }
    }
}

impl<S: 'static, R: Clone + Send + 'static> Effect<S, R> {
    pub(crate) fn from_fn(
        f: impl Fn(&SagaInput<S>) -> SagaOutput<R> + Send + Sync + 'static,
    ) -> Self {
        Self {
            create: Arc::new(f),
        }
    }

    /// Start this effect. Synchronous and non-blocking; all asynchronous
    /// work happens as the returned output is driven.
    pub fn invoke(&self, input: &SagaInput<S>) -> SagaOutput<R> {
        (self.create)(input)
    }

    /// Transform each produced value.
    pub fn map<R2: Clone + Send + 'static>(
        &self,
        f: impl Fn(R) -> R2 + Send + Sync + 'static,
    ) -> Effect<S, R2> {
        let f = Arc::new(f);
        self.try_map(move |value| Ok(f(value)))
    }

    /// Transform each produced value; a failed transform surfaces as a
    /// failed emission on the output.
    pub fn try_map<R2: Clone + Send + 'static>(
        &self,
        f: impl Fn(R) -> Result<R2, SagaError> + Send + Sync + 'static,
    ) -> Effect<S, R2> {
        let source_effect = self.clone();
        let f = Arc::new(f);
        Effect::from_fn(move |input| {
            let output = source_effect.invoke(input);
            let f = f.clone();
            let mapped = output.source().map(move |value| f(value));
            output.with_source(mapped)
        })
    }

    /// For every produced value, construct an action with `creator` and
    /// dispatch it through the input's dispatcher, then re-emit the value.
    /// The dispatch has completed by the time the value is observable; its
    /// completion is awaited in the stage task rather than blocked on, so a
    /// slow dispatcher delays this effect's stream but never pins a runtime
    /// worker.
    pub fn put<A: Action>(&self, creator: impl Fn(R) -> A + Send + Sync + 'static) -> Effect<S, R> {
        let source_effect = self.clone();
        let creator = Arc::new(creator);
        Effect::from_fn(move |input| {
            let output = source_effect.invoke(input);
            let creator = creator.clone();
            let input = input.clone();
            let dispatched = output.source().via_awaitable(move |value| {
                let action: ArcAction = Arc::new(creator(value.clone()));
                complete_with(input.dispatch(action), value)
            });
            output.with_source(dispatched)
        })
    }

    /// Bridge each produced value through an asynchronous operation: `f`
    /// maps the value to an [`Awaitable`], and the operation's result (or
    /// failure) is emitted once it settles.
    pub fn call<R2: Clone + Send + 'static>(
        &self,
        f: impl Fn(R) -> Awaitable<R2> + Send + Sync + 'static,
    ) -> Effect<S, R2> {
        let source_effect = self.clone();
        let f = Arc::new(f);
        Effect::from_fn(move |input| {
            let output = source_effect.invoke(input);
            let f = f.clone();
            let bridged = output.source().via_awaitable(move |value| f(value));
            output.with_source(bridged)
        })
    }

    /// Shift every produced value later by `interval`.
    pub fn delay(&self, interval: Duration) -> Effect<S, R> {
        let source_effect = self.clone();
        Effect::from_fn(move |input| {
            let output = source_effect.invoke(input);
            let delayed = output.source().delay(interval);
            output.with_source(delayed)
        })
    }

    /// Only the last value of a burst survives; see the runtime's debounce
    /// semantics. A zero interval is a pass-through.
    pub fn debounce(&self, interval: Duration) -> Effect<S, R> {
        let source_effect = self.clone();
        Effect::from_fn(move |input| {
            let output = source_effect.invoke(input);
            let debounced = output.source().debounce(interval);
            output.with_source(debounced)
        })
    }

    /// Recover failed emissions: `f` maps the error to a replacement value,
    /// or to `None` to drop the emission entirely. Values pass through.
    pub fn catch_error(
        &self,
        f: impl Fn(SagaError) -> Option<R> + Send + Sync + 'static,
    ) -> Effect<S, R> {
        let source_effect = self.clone();
        let f = Arc::new(f);
        Effect::from_fn(move |input| {
            let output = source_effect.invoke(input);
            let f = f.clone();
            let recovered = output.source().catch_error(move |error| f(error));
            output.with_source(recovered)
        })
    }

    /// Drop the values, keeping the side effects. This is the shape the
    /// middleware consumes, so heterogeneous effects can share one list.
    pub fn discard(&self) -> Effect<S, ()> {
        self.map(|_| ())
    }

    /// Invoke and block until the first produced value.
    pub fn wait_for(&self, input: &SagaInput<S>) -> Result<R, SagaError> {
        self.invoke(input).wait_for()
    }

    /// Invoke and block until the first produced value or `timeout`.
    pub fn wait_for_timeout(
        &self,
        input: &SagaInput<S>,
        timeout: Duration,
    ) -> Result<R, SagaError> {
        self.invoke(input).wait_for_timeout(timeout)
    }
}

/// An awaitable that yields `value` once `done` settles, carrying a failed
/// dispatch through as a failure.
fn complete_with<R: Clone + Send + 'static>(done: Awaitable<()>, value: R) -> Awaitable<R> {
    if done.is_settled() {
        return match done.wait() {
            Ok(()) => Awaitable::just(value),
            Err(error) => Awaitable::failed(error),
        };
    }
    let (awaitable, promise) = Awaitable::pending();
    runtime::shared().spawn(async move {
        match done.wait_async().await {
            Ok(()) => promise.resolve(value),
            Err(error) => promise.fail(error),
        }
    });
    awaitable
}

// ===========================================================================
// Tests
// ===========================================================================
