//! Hot multicast source.
//!
//! A [`Subject`] fans every emission out to all current subscribers. Each
//! observer sits behind its own mutex, so one observer's callbacks are never
//! run concurrently with themselves even when multiple threads emit.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use super::{Emission, Observer, Source, Subscription};
use crate::lock;

type SharedObserver<R> = Arc<Mutex<Observer<R>>>;

struct SubjectSlot<R> {
    id: u64,
    observer: SharedObserver<R>,
}

struct SubjectInner<R> {
    observers: Mutex<Vec<SubjectSlot<R>>>,
    next_id: AtomicU64,
}

pub(crate) struct Subject<R> {
    inner: Arc<SubjectInner<R>>,
}

impl<R> Clone for Subject<R> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<R: Clone + Send + 'static> Subject<R> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(SubjectInner {
                observers: Mutex::new(Vec::new()),
                next_id: AtomicU64::new(0),
            }),
        }
    }

    /// Deliver an emission to a snapshot of the current subscribers.
    ///
    /// The registry lock is released before any observer runs, so observers
    /// may subscribe/unsubscribe without deadlocking the subject.
    pub fn emit(&self, emission: Emission<R>) {
        let snapshot: Vec<SharedObserver<R>> = lock(&self.inner.observers)
            .iter()
            .map(|slot| slot.observer.clone())
            .collect();
        for observer in snapshot {
            (*lock(&observer))(emission.clone());
        }
    }

    /// A source that registers its observer with this subject for the
    /// lifetime of the subscription.
    pub fn source(&self) -> Source<R> {
        let inner = self.inner.clone();
        Source::new(move |observer| {
            let id = inner.next_id.fetch_add(1, Ordering::Relaxed);
            lock(&inner.observers).push(SubjectSlot {
                id,
                observer: Arc::new(Mutex::new(observer)),
            });
            let subscription = Subscription::new();
            let registry = inner.clone();
            subscription.add_teardown(move || {
                lock(&registry.observers).retain(|slot| slot.id != id);
            });
            subscription
        })
    }

    #[cfg(test)]
    fn observer_count(&self) -> usize {
        lock(&self.inner.observers).len()
    }
}

// ===========================================================================
// Tests
// ===========================================================================
