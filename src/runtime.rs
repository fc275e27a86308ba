//! Crate-internal tokio runtime shared by all saga machinery.
//!
//! Timer stages (delay/debounce), call bridging, and fan-out completion joins
//! all run as tasks here rather than on a caller-owned runtime, so the
//! blocking public API can be used from plain threads and can never starve
//! the tasks that would resolve it.

use std::sync::OnceLock;

use tokio::runtime::Runtime;

pub(crate) fn shared() -> &'static Runtime {
    static RUNTIME: OnceLock<Runtime> = OnceLock::new();
    RUNTIME.get_or_init(|| {
        tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("sagaflow-worker")
            .enable_time()
            .build()
            .expect("failed to build the sagaflow runtime")
    })
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shared_runtime_is_reused() {
        let a: *const Runtime = shared();
        let b: *const Runtime = shared();
        assert!(std::ptr::eq(a, b));
    }

    #[test]
    fn spawned_tasks_run() {
        let (tx, rx) = std::sync::mpsc::channel();
        shared().spawn(async move {
            let _ = tx.send(1);
        });
        let got = rx.recv_timeout(std::time::Duration::from_secs(5));
        assert_eq!(got, Ok(1));
    }
}
