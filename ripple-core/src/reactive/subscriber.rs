//! Subscriber types for the reactive system.
//!
//! A Subscriber represents any computation that depends on reactive values.
//! This includes computeds, effects, and render functions.

use std::rc::{Rc, Weak};

use crate::graph::SubscriberId;

/// A computation that can be notified when its dependencies change.
///
/// The runtime keeps one handle per subscriber node and calls back into it
/// once the graph borrow has been released.
pub trait Subscriber {
    /// Get the subscriber's node in the dependency graph.
    fn subscriber_id(&self) -> SubscriberId;

    /// Schedule this subscriber for execution (effects only).
    ///
    /// Called once per batch for every notified effect.
    fn schedule(self: Rc<Self>) {}

    /// Bring a cached value up to date (computeds only).
    fn refresh(self: Rc<Self>) {}

    /// Register a callback to run before the next run and on stop.
    ///
    /// Returns `false` if this subscriber does not support cleanups.
    fn add_cleanup(&self, _cleanup: Box<dyn FnOnce()>) -> bool {
        false
    }
}

/// How the runtime holds on to a subscriber.
pub(crate) enum SubscriberHandle {
    /// Effects stay alive for as long as they are active, even when the
    /// caller dropped every handle.
    Owned(Rc<dyn Subscriber>),

    /// Computeds live only as long as someone can read them.
    Observed(Weak<dyn Subscriber>),
}

impl SubscriberHandle {
    pub(crate) fn get(&self) -> Option<Rc<dyn Subscriber>> {
        match self {
            Self::Owned(rc) => Some(Rc::clone(rc)),
            Self::Observed(weak) => weak.upgrade(),
        }
    }

    pub(crate) fn is_owned(&self) -> bool {
        matches!(self, Self::Owned(_))
    }
}
