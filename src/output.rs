//! SagaOutput: the live, running instance of an invoked effect.
//!
//! An output owns a value [`Source`], an inbound action handler, and every
//! subscription it has started. Values from one output are delivered in a
//! single, consistently ordered stream. When the last handle to an output is
//! dropped its subscriptions are cancelled and any monitor registration it
//! owns is released.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::action::ArcAction;
use crate::awaitable::Awaitable;
use crate::error::SagaError;
use crate::lock;
use crate::monitor::Dispatcher;
use crate::stream::{Emission, Source, Subscription};

// ---------------------------------------------------------------------------
// Lifecycle
// ---------------------------------------------------------------------------

/// Everything an output must release when it goes away: the root teardown
/// (monitor deregistration, supersedable inner instances) plus all consumer
/// subscriptions.
struct Lifecycle {
    root: Subscription,
    subscriptions: Mutex<Vec<Subscription>>,
}

impl Drop for Lifecycle {
    fn drop(&mut self) {
        self.root.cancel();
        let subs = std::mem::take(&mut *lock(&self.subscriptions));
        for sub in subs {
            sub.cancel();
        }
    }
}

// ---------------------------------------------------------------------------
// SagaOutput
// ---------------------------------------------------------------------------

pub struct SagaOutput<R> {
    source: Source<R>,
    handler: Dispatcher,
    lifecycle: Arc<Lifecycle>,
}

fn noop_handler() -> Dispatcher {
    Arc::new(|_action| Awaitable::just(()))
}

impl<R: Clone + Send + 'static> SagaOutput<R> {
    /// An output over `source` with no interest in actions.
    pub(crate) fn new(source: Source<R>) -> Self {
        Self::with_parts(source, noop_handler(), Subscription::new())
    }

    /// An output that reacts to actions through `handler` and releases
    /// `root` on teardown.
    pub(crate) fn with_parts(source: Source<R>, handler: Dispatcher, root: Subscription) -> Self {
        Self {
            source,
            handler,
            lifecycle: Arc::new(Lifecycle {
                root,
                subscriptions: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Same handler and lifecycle, different value source. Used by the
    /// combinators so that transformation never detaches an output from its
    /// action channel or its owned resources.
    pub(crate) fn with_source<R2: Clone + Send + 'static>(
        &self,
        source: Source<R2>,
    ) -> SagaOutput<R2> {
        SagaOutput {
            source,
            handler: self.handler.clone(),
            lifecycle: self.lifecycle.clone(),
        }
    }

    pub(crate) fn source(&self) -> &Source<R> {
        &self.source
    }

    /// Deliver an action notification into this output's reactive graph.
    ///
    /// The returned awaitable settles when the side work triggered by this
    /// notification has settled.
    pub fn on_action(&self, action: ArcAction) -> Awaitable<()> {
        (self.handler)(action)
    }

    /// Attach a push-based listener for every produced value, for the
    /// lifetime of this output.
    pub fn subscribe(&self, callback: impl FnMut(Emission<R>) + Send + 'static) {
        let sub = self.source.subscribe(Box::new(callback));
        lock(&self.lifecycle.subscriptions).push(sub);
    }

    /// Block until the next produced value. Blocks forever if the output
    /// never emits; prefer [`wait_for_timeout`](Self::wait_for_timeout).
    pub fn wait_for(&self) -> Result<R, SagaError> {
        let (awaitable, promise) = Awaitable::pending();
        let sub = self.subscribe_once(promise.clone());
        let result = awaitable.wait();
        sub.cancel();
        drop(promise);
        result
    }

    /// Block until the next produced value or until `timeout` elapses, in
    /// which case the pending subscription is torn down best-effort and
    /// [`SagaError::TimedOut`] is returned.
    pub fn wait_for_timeout(&self, timeout: Duration) -> Result<R, SagaError> {
        let (awaitable, promise) = Awaitable::pending();
        let sub = self.subscribe_once(promise.clone());
        let cancel_sub = sub.clone();
        awaitable.set_canceller(move || cancel_sub.cancel());
        let result = awaitable.wait_timeout(timeout);
        sub.cancel();
        drop(promise);
        result
    }

    /// Alias for [`wait_for_timeout`](Self::wait_for_timeout).
    pub fn next_value(&self, timeout: Duration) -> Result<R, SagaError> {
        self.wait_for_timeout(timeout)
    }

    fn subscribe_once(&self, promise: crate::awaitable::Promise<R>) -> Subscription {
        self.source.subscribe(Box::new(move |emission| {
            match emission {
                Ok(value) => promise.resolve(value),
                Err(error) => promise.fail(error),
            };
        }))
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::{arc, Noop};
    use crate::stream::subject::Subject;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::thread;

    #[test]
    fn subscribe_receives_values_in_order() {
        let subject = Subject::new();
        let output = SagaOutput::new(subject.source());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        output.subscribe(move |e| lock(&sink).push(e));

        subject.emit(Ok(1));
        subject.emit(Ok(2));
        subject.emit(Ok(3));
        assert_eq!(*lock(&seen), vec![Ok(1), Ok(2), Ok(3)]);
    }

    #[test]
    fn wait_for_returns_cold_value_synchronously() {
        let output = SagaOutput::new(Source::just(42));
        assert_eq!(output.wait_for(), Ok(42));
        // Cold source: replay on every wait.
        assert_eq!(output.wait_for(), Ok(42));
    }

    #[test]
    fn wait_for_timeout_times_out_on_silent_source() {
        let output: SagaOutput<i32> = SagaOutput::new(Source::empty());
        let timeout = Duration::from_millis(30);
        assert_eq!(
            output.wait_for_timeout(timeout),
            Err(SagaError::TimedOut(timeout))
        );
    }

    #[test]
    fn wait_for_timeout_picks_up_hot_emission() {
        let subject = Subject::new();
        let output = SagaOutput::new(subject.source());
        let emitter = subject.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            emitter.emit(Ok(7));
        });
        assert_eq!(output.wait_for_timeout(Duration::from_secs(5)), Ok(7));
    }

    #[test]
    fn wait_surfaces_failed_emission() {
        let output: SagaOutput<i32> = SagaOutput::new(Source::failed(SagaError::Unimplemented));
        assert_eq!(output.wait_for(), Err(SagaError::Unimplemented));
    }

    #[test]
    fn default_action_handler_is_noop() {
        let output: SagaOutput<i32> = SagaOutput::new(Source::empty());
        let done = output.on_action(arc(Noop));
        assert_eq!(done.wait(), Ok(()));
    }

    #[test]
    fn drop_cancels_subscriptions_and_root() {
        let subject: Subject<i32> = Subject::new();
        let root = Subscription::new();
        let released = Arc::new(AtomicBool::new(false));
        let flag = released.clone();
        root.add_teardown(move || flag.store(true, Ordering::SeqCst));

        let delivered = Arc::new(AtomicUsize::new(0));
        let counter = delivered.clone();
        let output = SagaOutput::with_parts(subject.source(), noop_handler(), root);
        output.subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        subject.emit(Ok(1));
        drop(output);
        subject.emit(Ok(2));

        assert!(released.load(Ordering::SeqCst));
        assert_eq!(delivered.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn with_source_shares_lifecycle() {
        let subject = Subject::new();
        let output = SagaOutput::new(subject.source());
        let mapped = output.with_source(output.source().map(|v: i32| Ok(v * 2)));

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        mapped.subscribe(move |e| lock(&sink).push(e));
        subject.emit(Ok(4));
        assert_eq!(*lock(&seen), vec![Ok(8)]);
    }
}
