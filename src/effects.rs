//! Constructors for the leaf effect variants.
//!
//! Composition operators live on [`Effect`] itself; this module builds the
//! leaves: `base`, `empty`, `just`, `select`, the `put`/`call` shorthands,
//! imperative `script`s, and the two take policies (`take_latest`,
//! `take_every`).
//!
//! Take effects register their own dispatcher with the input's monitor at
//! invoke time, so any action flowing through
//! [`SagaMonitor::dispatch`](crate::monitor::SagaMonitor::dispatch) reaches
//! them; the registration is released when the output is dropped.

use std::sync::{Arc, Mutex};

use crate::action::{Action, ArcAction};
use crate::awaitable::Awaitable;
use crate::effect::Effect;
use crate::error::SagaError;
use crate::input::SagaInput;
use crate::lock;
use crate::monitor::Dispatcher;
use crate::output::SagaOutput;
use crate::stream::subject::Subject;
use crate::stream::{Source, Subscription};

// ---------------------------------------------------------------------------
// Leaf effects
// ---------------------------------------------------------------------------

/// The abstract base case: invoking it yields an output whose every wait
/// fails with [`SagaError::Unimplemented`]. A guard for unreached code paths.
pub fn base<S: 'static, R: Clone + Send + 'static>() -> Effect<S, R> {
    Effect::from_fn(|_input| SagaOutput::new(Source::failed(SagaError::Unimplemented)))
}

/// Produces no values, ever.
pub fn empty<S: 'static, R: Clone + Send + 'static>() -> Effect<S, R> {
    Effect::from_fn(|_input| SagaOutput::new(Source::empty()))
}

/// Immediately produces `value`; waits replay the same value every time.
/// The value sits behind a lock so the description stays shareable without
/// requiring `R: Sync`.
pub fn just<S: 'static, R: Clone + Send + 'static>(value: R) -> Effect<S, R> {
    let value = Mutex::new(value);
    Effect::from_fn(move |_input| SagaOutput::new(Source::just(lock(&value).clone())))
}

/// Applies `selector` to the current state snapshot on every wait — no
/// caching, no subscription to state changes.
pub fn select<S: 'static, R: Clone + Send + 'static>(
    selector: impl Fn(&S) -> R + Send + Sync + 'static,
) -> Effect<S, R> {
    let selector = Arc::new(selector);
    Effect::from_fn(move |input| {
        let reader = input.state_reader();
        let selector = selector.clone();
        SagaOutput::new(Source::defer(move || Ok(selector(&reader()))))
    })
}

/// Dispatch `creator(value)` and emit `value`: shorthand for
/// `just(value).put(creator)`.
pub fn put_value<S, R, A>(value: R, creator: impl Fn(R) -> A + Send + Sync + 'static) -> Effect<S, R>
where
    S: 'static,
    R: Clone + Send + 'static,
    A: Action,
{
    just(value).put(creator)
}

/// Lift an already-running asynchronous operation into an effect.
pub fn from_awaitable<S: 'static, R: Clone + Send + 'static>(
    awaitable: Awaitable<R>,
) -> Effect<S, R> {
    just(()).call(move |_| awaitable.clone())
}

/// Lift an imperative script into an effect: `body` runs once per
/// subscription with the effect's input and may block on nested effects
/// (`Effect::wait_for`) or dispatch along the way.
pub fn script<S: 'static, R: Clone + Send + 'static>(
    body: impl Fn(&SagaInput<S>) -> Result<R, SagaError> + Send + Sync + 'static,
) -> Effect<S, R> {
    let body = Arc::new(body);
    Effect::from_fn(move |input| {
        let body = body.clone();
        let input = input.clone();
        SagaOutput::new(Source::defer(move || body(&input)))
    })
}

// ---------------------------------------------------------------------------
// Take policies
// ---------------------------------------------------------------------------

/// Start `create(param)` for every action matched by `extract`, cancelling
/// any still-running previous instance first.
///
/// Teardown of the superseded instance runs synchronously before the new
/// instance is invoked: its subscriptions and timers are released, so a
/// cancelled instance can never emit or dispatch after its successor starts.
pub fn take_latest<S, P, R>(
    extract: impl Fn(&dyn Action) -> Option<P> + Send + Sync + 'static,
    create: impl Fn(P) -> Effect<S, R> + Send + Sync + 'static,
) -> Effect<S, R>
where
    S: 'static,
    P: 'static,
    R: Clone + Send + 'static,
{
    let extract = Arc::new(extract);
    let create = Arc::new(create);
    Effect::from_fn(move |input| {
        let downstream = Subject::<R>::new();
        let current: Arc<Mutex<Option<SagaOutput<R>>>> = Arc::new(Mutex::new(None));

        let handler: Dispatcher = {
            let extract = extract.clone();
            let create = create.clone();
            let input = input.clone();
            let downstream = downstream.clone();
            let current = current.clone();
            Arc::new(move |action: ArcAction| {
                if let Some(param) = extract(action.as_ref()) {
                    let mut slot = lock(&current);
                    if slot.take().is_some() {
                        tracing::debug!(
                            action = action.action_name(),
                            "take_latest: superseding running instance"
                        );
                    }
                    let instance = create(param).invoke(&input);
                    let sink = downstream.clone();
                    instance.subscribe(move |emission| sink.emit(emission));
                    *slot = Some(instance);
                }
                Awaitable::just(())
            })
        };

        register_with_monitor(input, downstream, handler, move || {
            lock(&current).take();
        })
    })
}

/// Start `create(param)` for every action matched by `extract`, keeping all
/// previous instances running; every instance's values are merged into one
/// output.
pub fn take_every<S, P, R>(
    extract: impl Fn(&dyn Action) -> Option<P> + Send + Sync + 'static,
    create: impl Fn(P) -> Effect<S, R> + Send + Sync + 'static,
) -> Effect<S, R>
where
    S: 'static,
    P: 'static,
    R: Clone + Send + 'static,
{
    let extract = Arc::new(extract);
    let create = Arc::new(create);
    Effect::from_fn(move |input| {
        let downstream = Subject::<R>::new();
        let instances: Arc<Mutex<Vec<SagaOutput<R>>>> = Arc::new(Mutex::new(Vec::new()));

        let handler: Dispatcher = {
            let extract = extract.clone();
            let create = create.clone();
            let input = input.clone();
            let downstream = downstream.clone();
            let instances = instances.clone();
            Arc::new(move |action: ArcAction| {
                if let Some(param) = extract(action.as_ref()) {
                    let instance = create(param).invoke(&input);
                    let sink = downstream.clone();
                    instance.subscribe(move |emission| sink.emit(emission));
                    lock(&instances).push(instance);
                }
                Awaitable::just(())
            })
        };

        register_with_monitor(input, downstream, handler, move || {
            lock(&instances).clear();
        })
    })
}

/// Wire a take handler into the monitor and build the output whose teardown
/// unregisters it and releases the running instances.
fn register_with_monitor<S, R: Clone + Send + 'static>(
    input: &SagaInput<S>,
    downstream: Subject<R>,
    handler: Dispatcher,
    release_instances: impl FnOnce() + Send + 'static,
) -> SagaOutput<R> {
    let monitor = input.monitor().clone();
    let id = monitor.next_id();
    monitor.add_dispatcher(id, handler.clone());

    let root = Subscription::new();
    root.add_teardown(move || {
        monitor.remove_dispatcher(id);
        release_instances();
    });
    SagaOutput::with_parts(downstream.source(), handler, root)
}

// ===========================================================================
// Tests
// ===========================================================================
