//! Error kinds surfaced by the saga runtime.
//!
//! None of these are fatal: every failure is carried as a typed result, either
//! from a blocking wait ([`TimedOut`](SagaError::TimedOut),
//! [`Unavailable`](SagaError::Unavailable)) or as a failed emission flowing
//! through an output's value channel.

use std::fmt;
use std::time::Duration;

/// Errors produced by effects, outputs, and awaitables.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SagaError {
    /// The base (abstract) effect was invoked without an implementation.
    /// Signals a programming error, not a runtime fault.
    #[error("base saga effect invoked without an implementation")]
    Unimplemented,

    /// A bounded wait exceeded its budget. Recoverable; the caller decides
    /// whether to retry or abort.
    #[error("wait timed out after {0:?}")]
    TimedOut(Duration),

    /// An awaitable was abandoned before any producer resolved it.
    #[error("no producer ever resolved this awaitable")]
    Unavailable,

    /// A failure raised by user-supplied code (a `call` async function or a
    /// `map`/`put` transform), carried through the value channel.
    #[error("{0}")]
    External(String),
}

impl SagaError {
    /// Wrap an arbitrary displayable failure as an external error emission.
    pub fn external(err: impl fmt::Display) -> Self {
        SagaError::External(err.to_string())
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn timed_out_display_includes_duration() {
        let err = SagaError::TimedOut(Duration::from_millis(250));
        assert!(err.to_string().contains("250ms"));
    }

    #[test]
    fn external_wraps_display() {
        let err = SagaError::external("connection refused");
        assert_eq!(err, SagaError::External("connection refused".into()));
        assert_eq!(err.to_string(), "connection refused");
    }

    #[test]
    fn variants_compare_by_value() {
        assert_eq!(SagaError::Unimplemented, SagaError::Unimplemented);
        assert_ne!(
            SagaError::TimedOut(Duration::from_millis(1)),
            SagaError::TimedOut(Duration::from_millis(2))
        );
    }
}
