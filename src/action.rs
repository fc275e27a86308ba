//! Action trait and typed matching helpers.
//!
//! An [`Action`] is an opaque, immutable, type-tagged message. The trait is
//! object-safe and supports downcasting via `Any`, so effects that filter by
//! action type hold a typed extractor over the downcast rather than matching
//! on reflection-style metadata.

use std::any::Any;
use std::sync::Arc;

// ---------------------------------------------------------------------------
// Action trait
// ---------------------------------------------------------------------------

/// Object-safe action trait.
///
/// All actions must implement `as_any` for downcasting and `action_name`
/// for debug/logging purposes.
pub trait Action: Send + Sync + 'static {
    /// Upcast to `&dyn Any` for downcasting.
    fn as_any(&self) -> &dyn Any;

    /// Human-readable name for this action type.
    fn action_name(&self) -> &str;
}

/// Shared handle to a dispatched action. Actions fan out to every live
/// dispatcher, so they are reference-counted rather than cloned per callback.
pub type ArcAction = Arc<dyn Action>;

impl dyn Action {
    /// Attempt to downcast the action to a concrete type.
    pub fn downcast_ref<T: Action>(&self) -> Option<&T> {
        self.as_any().downcast_ref::<T>()
    }
}

/// Wrap a concrete action for dispatch.
pub fn arc(action: impl Action) -> ArcAction {
    Arc::new(action)
}

/// Build a `&dyn Action` extractor from a typed one.
///
/// Take effects match actions with a function from `&dyn Action` to an
/// optional parameter; this helper lifts a function over a concrete action
/// type into that shape, returning `None` for every other action type.
pub fn extractor<A, P>(
    f: impl Fn(&A) -> Option<P> + Send + Sync + 'static,
) -> impl Fn(&dyn Action) -> Option<P> + Send + Sync + 'static
where
    A: Action,
{
    move |action| action.downcast_ref::<A>().and_then(&f)
}

// ---------------------------------------------------------------------------
// Built-in actions
// ---------------------------------------------------------------------------

/// Placeholder action that carries no payload and matches no extractor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Noop;

impl Action for Noop {
    fn as_any(&self) -> &dyn Any {
        self
    }
    fn action_name(&self) -> &str {
        "Noop"
    }
}

// ===========================================================================
// Tests
// ===========================================================================
