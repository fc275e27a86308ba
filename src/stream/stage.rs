//! Timed and bridging stages.
//!
//! Each stage is a channel feeding a single forwarder task on the shared
//! runtime. One task per subscription keeps downstream delivery serialized
//! and preserves upstream order; cancellation aborts the task and flags the
//! subscription, so a torn-down stage can never deliver a late emission.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use super::{Emission, Observer, Source, Subscription};
use crate::awaitable::Awaitable;
use crate::runtime;

impl<R: Clone + Send + 'static> Source<R> {
    /// Shift every emission later by `interval`. Zero interval is identity.
    pub fn delay(&self, interval: Duration) -> Source<R> {
        if interval.is_zero() {
            return self.clone();
        }
        let upstream = self.clone();
        Source::new(move |observer| {
            let subscription = Subscription::new();
            let (tx, mut rx) = mpsc::unbounded_channel::<(tokio::time::Instant, Emission<R>)>();
            let stage_sub = subscription.clone();
            let mut observer: Observer<R> = observer;
            let task = runtime::shared().spawn(async move {
                while let Some((due, emission)) = rx.recv().await {
                    tokio::time::sleep_until(due).await;
                    if stage_sub.is_cancelled() {
                        break;
                    }
                    observer(emission);
                }
            });
            let upstream_sub = upstream.subscribe(Box::new(move |emission| {
                // Each value is due `interval` after it arrived, not after
                // the previous value was forwarded.
                let _ = tx.send((tokio::time::Instant::now() + interval, emission));
            }));
            subscription.add_teardown(move || {
                upstream_sub.cancel();
                task.abort();
            });
            subscription
        })
    }

    /// Suppress a value if a newer one arrives within `interval`; only the
    /// last value of a burst survives, emitted after the quiet period.
    /// Failures pass through immediately and drop any pending value. Zero
    /// interval is identity.
    pub fn debounce(&self, interval: Duration) -> Source<R> {
        if interval.is_zero() {
            return self.clone();
        }
        let upstream = self.clone();
        Source::new(move |observer| {
            let subscription = Subscription::new();
            let (tx, mut rx) = mpsc::unbounded_channel::<Emission<R>>();
            let stage_sub = subscription.clone();
            let mut observer: Observer<R> = observer;
            let task = runtime::shared().spawn(async move {
                let mut pending: Option<R> = None;
                loop {
                    let next = if pending.is_some() {
                        match tokio::time::timeout(interval, rx.recv()).await {
                            Ok(next) => next,
                            Err(_quiet) => {
                                if let Some(value) = pending.take() {
                                    if !stage_sub.is_cancelled() {
                                        observer(Ok(value));
                                    }
                                }
                                continue;
                            }
                        }
                    } else {
                        rx.recv().await
                    };
                    match next {
                        Some(Ok(value)) => pending = Some(value),
                        Some(Err(error)) => {
                            pending = None;
                            if !stage_sub.is_cancelled() {
                                observer(Err(error));
                            }
                        }
                        // Upstream gone: flush the trailing value.
                        None => {
                            if let Some(value) = pending.take() {
                                if !stage_sub.is_cancelled() {
                                    observer(Ok(value));
                                }
                            }
                            break;
                        }
                    }
                }
            });
            let upstream_sub = upstream.subscribe(Box::new(move |emission| {
                let _ = tx.send(emission);
            }));
            subscription.add_teardown(move || {
                upstream_sub.cancel();
                task.abort();
            });
            subscription
        })
    }

    /// For each value, obtain an [`Awaitable`] via `f` and emit its result
    /// once it settles. Values are bridged one at a time, in upstream order.
    pub fn via_awaitable<R2: Clone + Send + 'static>(
        &self,
        f: impl Fn(R) -> Awaitable<R2> + Send + Sync + 'static,
    ) -> Source<R2> {
        let upstream = self.clone();
        let f = Arc::new(f);
        Source::new(move |observer| {
            let subscription = Subscription::new();
            let (tx, mut rx) = mpsc::unbounded_channel::<Emission<R>>();
            let stage_sub = subscription.clone();
            let f = f.clone();
            let mut observer: Observer<R2> = observer;
            let task = runtime::shared().spawn(async move {
                while let Some(emission) = rx.recv().await {
                    let result = match emission {
                        Ok(value) => f(value).wait_async().await,
                        Err(error) => Err(error),
                    };
                    if stage_sub.is_cancelled() {
                        break;
                    }
                    observer(result);
                }
            });
            let upstream_sub = upstream.subscribe(Box::new(move |emission| {
                let _ = tx.send(emission);
            }));
            subscription.add_teardown(move || {
                upstream_sub.cancel();
                task.abort();
            });
            subscription
        })
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SagaError;
    use crate::lock;
    use crate::stream::subject::Subject;
    use pretty_assertions::assert_eq;
    use std::sync::Mutex;
    use std::thread;

    fn sink<R: Clone + Send + 'static>() -> (Arc<Mutex<Vec<Emission<R>>>>, Observer<R>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let push = seen.clone();
        (seen, Box::new(move |e| lock(&push).push(e)))
    }

    fn wait_for_len<R>(seen: &Arc<Mutex<Vec<Emission<R>>>>, len: usize) {
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while lock(seen).len() < len {
            assert!(std::time::Instant::now() < deadline, "timed out waiting for emissions");
            thread::sleep(Duration::from_millis(5));
        }
    }

    // ── delay ────────────────────────────────────────────────────────

    #[test]
    fn delay_preserves_order() {
        let subject = Subject::new();
        let (seen, observer) = sink();
        let _sub = subject.source().delay(Duration::from_millis(20)).subscribe(observer);

        subject.emit(Ok(1));
        subject.emit(Ok(2));
        subject.emit(Ok(3));

        wait_for_len(&seen, 3);
        assert_eq!(*lock(&seen), vec![Ok(1), Ok(2), Ok(3)]);
    }

    #[test]
    fn delay_shifts_bursts_uniformly() {
        let subject = Subject::new();
        let (seen, observer) = sink();
        let _sub = subject
            .source()
            .delay(Duration::from_millis(60))
            .subscribe(observer);

        let start = std::time::Instant::now();
        subject.emit(Ok(1));
        subject.emit(Ok(2));
        subject.emit(Ok(3));

        // The whole burst arrives one interval later, not spaced out.
        wait_for_len(&seen, 3);
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(55));
        assert!(elapsed < Duration::from_millis(160), "burst was spaced serially: {elapsed:?}");
        assert_eq!(*lock(&seen), vec![Ok(1), Ok(2), Ok(3)]);
    }

    #[test]
    fn delay_zero_is_identity() {
        let source = Source::just(1).delay(Duration::ZERO);
        let (seen, observer) = sink();
        let _sub = source.subscribe(observer);
        assert_eq!(*lock(&seen), vec![Ok(1)]);
    }

    #[test]
    fn cancelled_delay_never_delivers() {
        let subject = Subject::new();
        let (seen, observer) = sink::<i32>();
        let sub = subject.source().delay(Duration::from_millis(50)).subscribe(observer);
        subject.emit(Ok(1));
        sub.cancel();
        thread::sleep(Duration::from_millis(150));
        assert!(lock(&seen).is_empty());
    }

    // ── debounce ─────────────────────────────────────────────────────

    #[test]
    fn debounce_keeps_last_of_burst() {
        let subject = Subject::new();
        let (seen, observer) = sink();
        let _sub = subject
            .source()
            .debounce(Duration::from_millis(60))
            .subscribe(observer);

        subject.emit(Ok(1));
        subject.emit(Ok(2));
        subject.emit(Ok(3));

        wait_for_len(&seen, 1);
        thread::sleep(Duration::from_millis(100));
        assert_eq!(*lock(&seen), vec![Ok(3)]);
    }

    #[test]
    fn debounce_emits_values_separated_by_quiet_gaps() {
        let subject = Subject::new();
        let (seen, observer) = sink();
        let _sub = subject
            .source()
            .debounce(Duration::from_millis(30))
            .subscribe(observer);

        subject.emit(Ok(1));
        thread::sleep(Duration::from_millis(120));
        subject.emit(Ok(2));

        wait_for_len(&seen, 2);
        assert_eq!(*lock(&seen), vec![Ok(1), Ok(2)]);
    }

    #[test]
    fn debounce_zero_is_identity() {
        let source = Source::just(9).debounce(Duration::ZERO);
        let (seen, observer) = sink();
        let _sub = source.subscribe(observer);
        assert_eq!(*lock(&seen), vec![Ok(9)]);
    }

    #[test]
    fn debounce_passes_errors_through() {
        let subject: Subject<i32> = Subject::new();
        let (seen, observer) = sink();
        let _sub = subject
            .source()
            .debounce(Duration::from_millis(40))
            .subscribe(observer);

        subject.emit(Ok(1));
        subject.emit(Err(SagaError::Unimplemented));

        wait_for_len(&seen, 1);
        assert_eq!(*lock(&seen), vec![Err(SagaError::Unimplemented)]);
    }

    // ── via_awaitable ────────────────────────────────────────────────

    #[test]
    fn via_awaitable_bridges_resolution() {
        let source = Source::just(5).via_awaitable(|v| Awaitable::just(v * 2));
        let (seen, observer) = sink();
        let _sub = source.subscribe(observer);
        wait_for_len(&seen, 1);
        assert_eq!(*lock(&seen), vec![Ok(10)]);
    }

    #[test]
    fn via_awaitable_bridges_deferred_resolution() {
        let source = Source::just(5).via_awaitable(|v| {
            let (aw, promise) = Awaitable::pending();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(30));
                promise.resolve(v + 1);
            });
            aw
        });
        let (seen, observer) = sink();
        let _sub = source.subscribe(observer);
        wait_for_len(&seen, 1);
        assert_eq!(*lock(&seen), vec![Ok(6)]);
    }

    #[test]
    fn via_awaitable_propagates_failure() {
        let source: Source<i32> =
            Source::just(5).via_awaitable(|_| Awaitable::<i32>::failed(SagaError::external("boom")));
        let (seen, observer) = sink();
        let _sub = source.subscribe(observer);
        wait_for_len(&seen, 1);
        assert_eq!(*lock(&seen), vec![Err(SagaError::External("boom".into()))]);
    }
}
