//! Dispatcher registry: fan a dispatched action out to every live effect.
//!
//! [`SagaMonitor`] maps monotonically-assigned ids to dispatch callbacks.
//! `dispatch` takes a point-in-time snapshot of the registry under the lock,
//! then invokes every callback outside it, so a slow callback never blocks
//! unrelated registrations. Callbacks registered during a fan-out are not
//! part of that fan-out's snapshot but are guaranteed visible to the next
//! one.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

use crate::action::ArcAction;
use crate::awaitable::Awaitable;
use crate::lock;
use crate::runtime;

/// A registered dispatch callback. Completion may be asynchronous, so each
/// callback reports it through an [`Awaitable`].
pub type Dispatcher = Arc<dyn Fn(ArcAction) -> Awaitable<()> + Send + Sync>;

// ---------------------------------------------------------------------------
// SagaMonitor
// ---------------------------------------------------------------------------

/// Concurrency-safe registry of active dispatch callbacks.
pub struct SagaMonitor {
    dispatchers: Mutex<BTreeMap<i64, Dispatcher>>,
    next_id: AtomicI64,
}

impl SagaMonitor {
    pub fn new() -> Self {
        Self {
            dispatchers: Mutex::new(BTreeMap::new()),
            next_id: AtomicI64::new(0),
        }
    }

    /// A fresh id, never handed out twice by this monitor.
    pub fn next_id(&self) -> i64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Register `dispatcher` under `id`.
    ///
    /// Ids are expected to come from [`next_id`](Self::next_id); registering
    /// a duplicate id is a caller error and overwrites the older entry.
    pub fn add_dispatcher(&self, id: i64, dispatcher: Dispatcher) {
        tracing::trace!(id, "registering dispatcher");
        lock(&self.dispatchers).insert(id, dispatcher);
    }

    /// Remove the entry under `id`. Idempotent; no-op if absent.
    pub fn remove_dispatcher(&self, id: i64) {
        tracing::trace!(id, "removing dispatcher");
        lock(&self.dispatchers).remove(&id);
    }

    /// Number of currently-registered dispatchers.
    pub fn dispatcher_count(&self) -> usize {
        lock(&self.dispatchers).len()
    }

    /// Invoke every registered callback with `action`.
    ///
    /// The returned awaitable resolves once all invoked callbacks have
    /// completed. A failed callback does not prevent the others from running
    /// nor the fan-out from completing.
    pub fn dispatch(&self, action: ArcAction) -> Awaitable<()> {
        let snapshot: Vec<Dispatcher> = lock(&self.dispatchers).values().cloned().collect();
        tracing::trace!(
            action = action.action_name(),
            dispatchers = snapshot.len(),
            "fanning out action"
        );

        let mut still_running = Vec::new();
        for dispatcher in snapshot {
            let completion = dispatcher(action.clone());
            if !completion.is_settled() {
                still_running.push(completion);
            }
        }
        if still_running.is_empty() {
            return Awaitable::just(());
        }

        let (awaitable, promise) = Awaitable::pending();
        runtime::shared().spawn(async move {
            for completion in still_running {
                // Failures are isolated per callback.
                let _ = completion.wait_async().await;
            }
            promise.resolve(());
        });
        awaitable
    }
}

impl Default for SagaMonitor {
    fn default() -> Self {
        Self::new()
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::{arc, Noop};
    use crate::error::SagaError;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn counting_dispatcher(count: Arc<AtomicUsize>) -> Dispatcher {
        Arc::new(move |_action| {
            count.fetch_add(1, Ordering::SeqCst);
            Awaitable::just(())
        })
    }

    #[test]
    fn next_id_is_monotonic() {
        let monitor = SagaMonitor::new();
        let a = monitor.next_id();
        let b = monitor.next_id();
        assert!(b > a);
    }

    #[test]
    fn dispatch_invokes_every_registered_dispatcher() {
        let monitor = SagaMonitor::new();
        let count = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            monitor.add_dispatcher(monitor.next_id(), counting_dispatcher(count.clone()));
        }

        for _ in 0..5 {
            monitor
                .dispatch(arc(Noop))
                .wait()
                .expect("fan-out should complete");
        }
        assert_eq!(count.load(Ordering::SeqCst), 15);
    }

    #[test]
    fn removed_dispatcher_is_never_invoked_again() {
        let monitor = SagaMonitor::new();
        let count = Arc::new(AtomicUsize::new(0));
        let id = monitor.next_id();
        monitor.add_dispatcher(id, counting_dispatcher(count.clone()));

        monitor.dispatch(arc(Noop)).wait().expect("fan-out");
        monitor.remove_dispatcher(id);
        monitor.dispatch(arc(Noop)).wait().expect("fan-out");

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn remove_is_idempotent() {
        let monitor = SagaMonitor::new();
        monitor.remove_dispatcher(999);
        monitor.remove_dispatcher(999);
        assert_eq!(monitor.dispatcher_count(), 0);
    }

    #[test]
    fn dispatch_with_no_dispatchers_resolves_immediately() {
        let monitor = SagaMonitor::new();
        let done = monitor.dispatch(arc(Noop));
        assert!(done.is_settled());
        assert_eq!(done.wait(), Ok(()));
    }

    #[test]
    fn dispatch_waits_for_asynchronous_completion() {
        let monitor = SagaMonitor::new();
        let finished = Arc::new(AtomicUsize::new(0));
        let marker = finished.clone();
        monitor.add_dispatcher(
            monitor.next_id(),
            Arc::new(move |_action| {
                let (aw, promise) = Awaitable::pending();
                let marker = marker.clone();
                std::thread::spawn(move || {
                    std::thread::sleep(Duration::from_millis(40));
                    marker.fetch_add(1, Ordering::SeqCst);
                    promise.resolve(());
                });
                aw
            }),
        );

        monitor
            .dispatch(arc(Noop))
            .wait_timeout(Duration::from_secs(5))
            .expect("fan-out should resolve after the slow callback");
        assert_eq!(finished.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn failed_callback_does_not_block_fanout_completion() {
        let monitor = SagaMonitor::new();
        let count = Arc::new(AtomicUsize::new(0));
        monitor.add_dispatcher(
            monitor.next_id(),
            Arc::new(|_action| Awaitable::failed(SagaError::external("callback failed"))),
        );
        monitor.add_dispatcher(monitor.next_id(), counting_dispatcher(count.clone()));

        monitor
            .dispatch(arc(Noop))
            .wait_timeout(Duration::from_secs(5))
            .expect("fan-out completes despite the failure");
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn registration_during_dispatch_lands_in_next_snapshot() {
        let monitor = Arc::new(SagaMonitor::new());
        let late_count = Arc::new(AtomicUsize::new(0));

        let registrar = {
            let monitor = monitor.clone();
            let late_count = late_count.clone();
            let registered = Arc::new(AtomicUsize::new(0));
            Arc::new(move |_action: ArcAction| {
                if registered.fetch_add(1, Ordering::SeqCst) == 0 {
                    monitor.add_dispatcher(
                        monitor.next_id(),
                        counting_dispatcher(late_count.clone()),
                    );
                }
                Awaitable::just(())
            }) as Dispatcher
        };
        monitor.add_dispatcher(monitor.next_id(), registrar);

        // First fan-out registers the late dispatcher; its snapshot predates it.
        monitor.dispatch(arc(Noop)).wait().expect("fan-out");
        assert_eq!(late_count.load(Ordering::SeqCst), 0);

        // The next fan-out must include it.
        monitor.dispatch(arc(Noop)).wait().expect("fan-out");
        assert_eq!(late_count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn concurrent_add_dispatch_remove_is_consistent() {
        let monitor = Arc::new(SagaMonitor::new());
        let count = Arc::new(AtomicUsize::new(0));
        let total = 100;

        let add_handles: Vec<_> = (0..total)
            .map(|i| {
                let monitor = monitor.clone();
                let count = count.clone();
                std::thread::spawn(move || {
                    monitor.add_dispatcher(i, counting_dispatcher(count));
                })
            })
            .collect();
        for h in add_handles {
            h.join().expect("adder panicked");
        }

        let remove_handles: Vec<_> = (0..total / 2)
            .map(|i| {
                let monitor = monitor.clone();
                std::thread::spawn(move || monitor.remove_dispatcher(i))
            })
            .collect();
        for h in remove_handles {
            h.join().expect("remover panicked");
        }

        let dispatch_handles: Vec<_> = (0..total)
            .map(|_| {
                let monitor = monitor.clone();
                std::thread::spawn(move || {
                    monitor.dispatch(arc(Noop)).wait().expect("fan-out");
                })
            })
            .collect();
        for h in dispatch_handles {
            h.join().expect("dispatcher panicked");
        }

        let expected = (total as usize / 2) * total as usize;
        assert_eq!(count.load(Ordering::SeqCst), expected);
    }
}
