//! Reactive Context
//!
//! The reactive context tracks which computation is currently running and
//! which effect scope is collecting new effects. This enables automatic
//! dependency tracking: when a ref is read, we can link the current
//! computation to it.
//!
//! # Implementation
//!
//! Both are single thread-local slots. Entering a context swaps the new
//! value in and returns a guard holding the previous one; dropping the guard
//! swaps it back. The guard also runs when the computation panics, so a
//! failing effect never leaves itself installed.

use std::cell::{Cell, RefCell};

use super::runtime::Runtime;
use super::scope::EffectScope;
use crate::graph::{Flags, SubscriberId};

thread_local! {
    static ACTIVE_SUBSCRIBER: Cell<Option<SubscriberId>> = const { Cell::new(None) };
    static ACTIVE_SCOPE: RefCell<Option<EffectScope>> = const { RefCell::new(None) };
}

/// Guard that restores the previous subscriber when dropped.
///
/// While the guard is alive, every tracked read links the subscriber it was
/// entered with.
pub struct ReactiveContext {
    subscriber_id: SubscriberId,
    prev: Option<SubscriberId>,
}

impl ReactiveContext {
    /// Start a tracked run of the given subscriber.
    ///
    /// Marks every existing link as unread; links still unread when the
    /// guard drops are removed.
    pub fn enter(subscriber_id: SubscriberId) -> Self {
        Runtime::update_flags(subscriber_id, |flags| flags.insert(Flags::RUNNING));
        Runtime::prepare(subscriber_id);
        let prev = ACTIVE_SUBSCRIBER.with(|slot| slot.replace(Some(subscriber_id)));

        Self { subscriber_id, prev }
    }

    /// Check if there is an active reactive context.
    pub fn is_active() -> bool {
        Self::current_subscriber().is_some()
    }

    /// Get the current subscriber, if any.
    pub fn current_subscriber() -> Option<SubscriberId> {
        ACTIVE_SUBSCRIBER.with(Cell::get)
    }
}

impl Drop for ReactiveContext {
    fn drop(&mut self) {
        let _ = ACTIVE_SUBSCRIBER.try_with(|slot| slot.set(self.prev));
        Runtime::cleanup(self.subscriber_id);
        Runtime::update_flags(self.subscriber_id, |flags| flags.remove(Flags::RUNNING));
    }
}

/// Guard that suspends tracking until dropped.
struct Untracked {
    prev: Option<SubscriberId>,
}

impl Drop for Untracked {
    fn drop(&mut self) {
        let _ = ACTIVE_SUBSCRIBER.try_with(|slot| slot.set(self.prev));
    }
}

/// Run `f` without linking any reads to the current subscriber.
pub fn untracked<R>(f: impl FnOnce() -> R) -> R {
    let _guard = Untracked {
        prev: ACTIVE_SUBSCRIBER.with(|slot| slot.replace(None)),
    };
    f()
}

/// Guard that restores the previous effect scope when dropped.
pub(crate) struct ScopeContext {
    prev: Option<EffectScope>,
}

impl ScopeContext {
    pub(crate) fn enter(scope: EffectScope) -> Self {
        let prev = ACTIVE_SCOPE.with(|slot| slot.replace(Some(scope)));
        Self { prev }
    }

    pub(crate) fn current() -> Option<EffectScope> {
        ACTIVE_SCOPE.with(|slot| slot.borrow().clone())
    }
}

impl Drop for ScopeContext {
    fn drop(&mut self) {
        let prev = self.prev.take();
        let _ = ACTIVE_SCOPE.try_with(|slot| *slot.borrow_mut() = prev);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::NodeKind;

    #[test]
    fn context_tracks_subscriber() {
        let id = Runtime::create_subscriber(NodeKind::Effect);

        assert!(!ReactiveContext::is_active());
        assert!(ReactiveContext::current_subscriber().is_none());

        {
            let _ctx = ReactiveContext::enter(id);

            assert!(ReactiveContext::is_active());
            assert_eq!(ReactiveContext::current_subscriber(), Some(id));
            assert!(Runtime::flags(id).contains(Flags::RUNNING));
        }

        // Context should be cleaned up after drop
        assert!(!ReactiveContext::is_active());
        assert!(!Runtime::flags(id).contains(Flags::RUNNING));
        Runtime::unregister(id);
    }

    #[test]
    fn nested_contexts() {
        let id1 = Runtime::create_subscriber(NodeKind::Effect);
        let id2 = Runtime::create_subscriber(NodeKind::Effect);

        {
            let _ctx1 = ReactiveContext::enter(id1);
            assert_eq!(ReactiveContext::current_subscriber(), Some(id1));

            {
                let _ctx2 = ReactiveContext::enter(id2);
                assert_eq!(ReactiveContext::current_subscriber(), Some(id2));
            }

            // After inner context drops, outer should be current
            assert_eq!(ReactiveContext::current_subscriber(), Some(id1));
        }

        assert!(ReactiveContext::current_subscriber().is_none());
        Runtime::unregister(id1);
        Runtime::unregister(id2);
    }

    #[test]
    fn context_restored_after_panic() {
        let id = Runtime::create_subscriber(NodeKind::Effect);

        let result = std::panic::catch_unwind(|| {
            let _ctx = ReactiveContext::enter(id);
            panic!("boom");
        });

        assert!(result.is_err());
        assert!(ReactiveContext::current_subscriber().is_none());
        assert!(!Runtime::flags(id).contains(Flags::RUNNING));
        Runtime::unregister(id);
    }

    #[test]
    fn untracked_clears_and_restores() {
        let id = Runtime::create_subscriber(NodeKind::Effect);
        let _ctx = ReactiveContext::enter(id);

        let inner = untracked(ReactiveContext::current_subscriber);
        assert!(inner.is_none());
        assert_eq!(ReactiveContext::current_subscriber(), Some(id));
    }

    #[test]
    fn scope_context_nests() {
        let outer = EffectScope::detached();
        let inner = EffectScope::detached();

        let _a = ScopeContext::enter(outer.clone());
        {
            let _b = ScopeContext::enter(inner.clone());
            assert!(ScopeContext::current().is_some_and(|s| s.ptr_eq(&inner)));
        }
        assert!(ScopeContext::current().is_some_and(|s| s.ptr_eq(&outer)));
    }
}
