//! Internal push-based value streams.
//!
//! `SagaOutput` needs a lazy, cancellable sequence of produced values. Rather
//! than depending on a reactive-streams runtime, this module implements the
//! minimum explicitly: a [`Source`] is a subscribe function, a
//! [`Subscription`] is a cancellation flag plus teardowns that run inline on
//! cancel, and the timed combinator stages in [`stage`] are tokio tasks fed
//! by channels. [`subject::Subject`] provides the hot, multicast case used by
//! the take effects.
//!
//! Emissions carry `Result<R, SagaError>` so user failures flow through the
//! value channel instead of aborting the graph.

pub(crate) mod stage;
pub(crate) mod subject;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::error::SagaError;
use crate::lock;

/// A single produced value or carried failure.
pub(crate) type Emission<R> = Result<R, SagaError>;

/// Push-based listener for one subscription. Never invoked concurrently with
/// itself; multicast sources guard each observer with its own mutex.
pub(crate) type Observer<R> = Box<dyn FnMut(Emission<R>) + Send>;

// ---------------------------------------------------------------------------
// Subscription
// ---------------------------------------------------------------------------

/// Cancellation handle for one subscription.
///
/// Teardowns run inline during `cancel`, on the cancelling thread — callers
/// that must not observe effects from a superseded producer (take-latest)
/// rely on cancellation having fully completed when `cancel` returns.
#[derive(Clone)]
pub(crate) struct Subscription {
    inner: Arc<SubscriptionInner>,
}

struct SubscriptionInner {
    cancelled: AtomicBool,
    teardowns: Mutex<Vec<Box<dyn FnOnce() + Send>>>,
}

impl Subscription {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(SubscriptionInner {
                cancelled: AtomicBool::new(false),
                teardowns: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Cancel and run all teardowns. Idempotent.
    pub fn cancel(&self) {
        let teardowns = {
            let mut guard = lock(&self.inner.teardowns);
            if self.inner.cancelled.swap(true, Ordering::SeqCst) {
                return;
            }
            std::mem::take(&mut *guard)
        };
        for teardown in teardowns {
            teardown();
        }
    }

    /// Attach a teardown; runs immediately if already cancelled.
    pub fn add_teardown(&self, f: impl FnOnce() + Send + 'static) {
        let run_now = {
            let mut guard = lock(&self.inner.teardowns);
            if self.inner.cancelled.load(Ordering::SeqCst) {
                true
            } else {
                guard.push(Box::new(f));
                return;
            }
        };
        if run_now {
            f();
        }
    }
}

// ---------------------------------------------------------------------------
// Source
// ---------------------------------------------------------------------------

/// A lazy producer of emissions: nothing runs until `subscribe`.
///
/// Cold sources (`defer`, `just`) re-run their production per subscription,
/// which is what gives `just`/`select` effects their idempotent-replay
/// semantics. Hot sources come from [`subject::Subject::source`].
pub(crate) struct Source<R> {
    subscribe_fn: Arc<dyn Fn(Observer<R>) -> Subscription + Send + Sync>,
}

impl<R> Clone for Source<R> {
    fn clone(&self) -> Self {
        Self {
            subscribe_fn: self.subscribe_fn.clone(),
        }
    }
}

impl<R: Clone + Send + 'static> Source<R> {
    pub fn new(f: impl Fn(Observer<R>) -> Subscription + Send + Sync + 'static) -> Self {
        Self {
            subscribe_fn: Arc::new(f),
        }
    }

    pub fn subscribe(&self, observer: Observer<R>) -> Subscription {
        (self.subscribe_fn)(observer)
    }

    /// Emit the result of `f` once, synchronously, per subscription.
    pub fn defer(f: impl Fn() -> Emission<R> + Send + Sync + 'static) -> Self {
        Source::new(move |mut observer| {
            observer(f());
            Subscription::new()
        })
    }

    /// Emit `value` once per subscription. The value sits behind a lock so
    /// the subscribe closure stays shareable without requiring `R: Sync`.
    pub fn just(value: R) -> Self {
        let value = Mutex::new(value);
        Source::defer(move || Ok(lock(&value).clone()))
    }

    /// Emit `error` once per subscription.
    pub fn failed(error: SagaError) -> Self {
        Source::defer(move || Err(error.clone()))
    }

    /// Never emits.
    pub fn empty() -> Self {
        Source::new(|_observer| Subscription::new())
    }

    /// Transform each emission; a failed transform becomes a failed emission.
    pub fn map<R2: Clone + Send + 'static>(
        &self,
        f: impl Fn(R) -> Emission<R2> + Send + Sync + 'static,
    ) -> Source<R2> {
        let upstream = self.clone();
        let f = Arc::new(f);
        Source::new(move |mut observer| {
            let f = f.clone();
            upstream.subscribe(Box::new(move |emission| {
                observer(emission.and_then(|value| f(value)));
            }))
        })
    }

    /// Recover failed emissions: `f` maps the error to a replacement value,
    /// or to `None` to drop the emission entirely. Values pass through.
    pub fn catch_error(
        &self,
        f: impl Fn(SagaError) -> Option<R> + Send + Sync + 'static,
    ) -> Source<R> {
        let upstream = self.clone();
        let f = Arc::new(f);
        Source::new(move |mut observer| {
            let f = f.clone();
            upstream.subscribe(Box::new(move |emission| match emission {
                Ok(value) => observer(Ok(value)),
                Err(error) => {
                    if let Some(recovered) = f(error) {
                        observer(Ok(recovered));
                    }
                }
            }))
        })
    }
}

// ===========================================================================
// Tests
// ===========================================================================
