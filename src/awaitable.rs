//! Awaitable: a blocking handle over a value that may arrive asynchronously.
//!
//! An [`Awaitable`] is one half of a single-result future/promise pair. The
//! result slot is a single-writer-wins cell: the first [`Promise`] to resolve
//! or fail it wins, every later attempt is a no-op, and repeated waits after
//! settlement return the same result immediately.
//!
//! Waits come in two flavors over the same cell: blocking ([`Awaitable::wait`]
//! and [`Awaitable::wait_timeout`], condvar-based, for caller threads) and
//! async ([`Awaitable::wait_async`], `Notify`-based, for runtime tasks). A
//! timed-out wait runs the registered canceller so the underlying production
//! can be torn down best-effort.

use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::Notify;

use crate::error::SagaError;
use crate::lock;

// ---------------------------------------------------------------------------
// Result slot
// ---------------------------------------------------------------------------

enum Slot<T> {
    Pending,
    Resolved(T),
    Failed(SagaError),
}

struct Shared<T> {
    slot: Mutex<Slot<T>>,
    cond: Condvar,
    notify: Notify,
    /// Best-effort teardown of the pending production, run once on timeout.
    canceller: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl<T: Clone> Shared<T> {
    fn try_result(&self) -> Option<Result<T, SagaError>> {
        match &*lock(&self.slot) {
            Slot::Pending => None,
            Slot::Resolved(v) => Some(Ok(v.clone())),
            Slot::Failed(e) => Some(Err(e.clone())),
        }
    }

    /// First writer wins. Returns whether this call settled the slot.
    fn settle(&self, result: Result<T, SagaError>) -> bool {
        {
            let mut slot = lock(&self.slot);
            if !matches!(*slot, Slot::Pending) {
                return false;
            }
            *slot = match result {
                Ok(v) => Slot::Resolved(v),
                Err(e) => Slot::Failed(e),
            };
        }
        // The production finished; a canceller would now be a stale no-op.
        lock(&self.canceller).take();
        self.cond.notify_all();
        self.notify.notify_waiters();
        true
    }
}

// ---------------------------------------------------------------------------
// Awaitable
// ---------------------------------------------------------------------------

/// The consumer half: blocks (or suspends) until the slot settles.
pub struct Awaitable<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for Awaitable<T> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<T: Clone + Send + 'static> Awaitable<T> {
    /// Create an unresolved awaitable together with its producer half.
    pub fn pending() -> (Awaitable<T>, Promise<T>) {
        let shared = Arc::new(Shared {
            slot: Mutex::new(Slot::Pending),
            cond: Condvar::new(),
            notify: Notify::new(),
            canceller: Mutex::new(None),
        });
        let awaitable = Awaitable {
            shared: shared.clone(),
        };
        let promise = Promise {
            guard: Arc::new(PromiseGuard {
                shared: shared.clone(),
            }),
            shared,
        };
        (awaitable, promise)
    }

    /// An awaitable already resolved with `value`.
    pub fn just(value: T) -> Awaitable<T> {
        let (awaitable, promise) = Awaitable::pending();
        promise.resolve(value);
        awaitable
    }

    /// An awaitable already failed with `error`.
    pub fn failed(error: SagaError) -> Awaitable<T> {
        let (awaitable, promise) = Awaitable::pending();
        promise.fail(error);
        awaitable
    }

    /// Whether the slot has settled (resolved or failed).
    pub fn is_settled(&self) -> bool {
        !matches!(*lock(&self.shared.slot), Slot::Pending)
    }

    /// Register the teardown to run if a bounded wait expires.
    ///
    /// If the slot has already settled the teardown is dropped unused.
    pub fn set_canceller(&self, f: impl FnOnce() + Send + 'static) {
        if self.is_settled() {
            return;
        }
        *lock(&self.shared.canceller) = Some(Box::new(f));
    }

    /// Block the calling thread until the slot settles.
    pub fn wait(&self) -> Result<T, SagaError> {
        let mut slot = lock(&self.shared.slot);
        loop {
            match &*slot {
                Slot::Resolved(v) => return Ok(v.clone()),
                Slot::Failed(e) => return Err(e.clone()),
                Slot::Pending => {}
            }
            slot = self
                .shared
                .cond
                .wait(slot)
                .unwrap_or_else(std::sync::PoisonError::into_inner);
        }
    }

    /// Block at most `timeout`; on expiry, run the canceller and return
    /// [`SagaError::TimedOut`].
    pub fn wait_timeout(&self, timeout: Duration) -> Result<T, SagaError> {
        let deadline = Instant::now() + timeout;
        let mut slot = lock(&self.shared.slot);
        loop {
            match &*slot {
                Slot::Resolved(v) => return Ok(v.clone()),
                Slot::Failed(e) => return Err(e.clone()),
                Slot::Pending => {}
            }
            let now = Instant::now();
            if now >= deadline {
                drop(slot);
                self.run_canceller();
                tracing::trace!(?timeout, "awaitable wait timed out");
                return Err(SagaError::TimedOut(timeout));
            }
            let (guard, _) = self
                .shared
                .cond
                .wait_timeout(slot, deadline - now)
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            slot = guard;
        }
    }

    /// Suspend the calling task until the slot settles.
    pub async fn wait_async(&self) -> Result<T, SagaError> {
        loop {
            let notified = self.shared.notify.notified();
            tokio::pin!(notified);
            // Register for a wakeup before checking, so a settle racing with
            // this check cannot be missed.
            notified.as_mut().enable();
            if let Some(result) = self.shared.try_result() {
                return result;
            }
            notified.await;
        }
    }

    fn run_canceller(&self) {
        if let Some(cancel) = lock(&self.shared.canceller).take() {
            cancel();
        }
    }
}

// ---------------------------------------------------------------------------
// Promise
// ---------------------------------------------------------------------------

/// The producer half of an [`Awaitable`]. Cloneable: multiple producers may
/// race, the first settlement wins.
///
/// Dropping the last promise while the slot is still pending fails it with
/// [`SagaError::Unavailable`], so an abandoned production cannot strand a
/// waiter forever once its producers are gone.
pub struct Promise<T> {
    shared: Arc<Shared<T>>,
    guard: Arc<PromiseGuard<T>>,
}

impl<T> Clone for Promise<T> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
            guard: self.guard.clone(),
        }
    }
}

impl<T: Clone + Send + 'static> Promise<T> {
    /// Resolve the awaitable. Returns whether this call won the slot.
    pub fn resolve(&self, value: T) -> bool {
        self.shared.settle(Ok(value))
    }

    /// Fail the awaitable. Returns whether this call won the slot.
    pub fn fail(&self, error: SagaError) -> bool {
        self.shared.settle(Err(error))
    }
}

struct PromiseGuard<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Drop for PromiseGuard<T> {
    fn drop(&mut self) {
        {
            let mut slot = lock(&self.shared.slot);
            if !matches!(*slot, Slot::Pending) {
                return;
            }
            *slot = Slot::Failed(SagaError::Unavailable);
        }
        self.shared.cond.notify_all();
        self.shared.notify.notify_waiters();
    }
}

// ===========================================================================
// Tests
// ===========================================================================
