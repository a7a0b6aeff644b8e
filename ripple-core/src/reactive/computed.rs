//! Computed Implementation
//!
//! A Computed is a cached derived value that re-evaluates only when its
//! dependencies change.
//!
//! # How Computeds Work
//!
//! 1. On first access, the computed runs its getter and caches the result.
//!
//! 2. When accessed again, if no dependencies have changed, returns the
//!    cached value.
//!
//! 3. When a dependency changes, the computed is marked dirty and its own
//!    readers are notified.
//!
//! 4. On next access, the computed re-checks if inputs actually changed by
//!    comparing dependency versions (refreshing upstream computeds first).
//!
//! 5. If inputs changed, re-evaluate. If the new value equals the old one,
//!    the computed's own version is not bumped and readers stay clean.
//!
//! # Why This Matters
//!
//! This "lazy" approach avoids unnecessary recomputation:
//!
//! - A ref changes
//! - 10 computeds depend on it
//! - Only the computeds actually accessed will re-evaluate
//! - Computeds that are never read stay dirty (no wasted work)

use std::cell::{Cell, RefCell};
use std::fmt::Debug;
use std::mem;
use std::rc::{Rc, Weak};

use tracing::warn;

use super::context::{untracked, ReactiveContext};
use super::runtime::Runtime;
use super::scope;
use super::subscriber::{Subscriber, SubscriberHandle};
use crate::error::ReactiveError;
use crate::graph::{DepId, Flags, SubscriberId};

/// Dirty state for a computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComputedState {
    /// The cached value is up-to-date.
    Clean,

    /// A dependency might have changed. Need to check.
    MaybeDirty,

    /// The computed has never been evaluated.
    Dirty,
}

struct ComputedInner<T: 'static> {
    id: SubscriberId,
    dep: DepId,
    getter: Box<dyn Fn() -> T>,
    setter: Option<Box<dyn Fn(T)>>,
    value: RefCell<Option<T>>,
    evaluations: Cell<usize>,
}

impl<T: Clone + PartialEq + 'static> ComputedInner<T> {
    /// Bring the cached value up to date.
    fn update(&self) {
        let flags = Runtime::flags(self.id);
        if flags.contains(Flags::RUNNING) {
            // Read of itself during evaluation: serve the stale value.
            return;
        }

        let active = flags.contains(Flags::ACTIVE);
        if flags.contains(Flags::EVALUATED) && !flags.contains(Flags::FAILED) {
            if active {
                if !flags.contains(Flags::DIRTY) {
                    return;
                }
                if !Runtime::is_dirty(self.id) {
                    Runtime::update_flags(self.id, |f| f.remove(Flags::DIRTY));
                    return;
                }
            } else if Runtime::is_current(self.id) {
                return;
            }
        }

        let guard = EvalGuard(self.id);
        let value = if active {
            let _ctx = ReactiveContext::enter(self.id);
            (self.getter)()
        } else {
            untracked(|| (self.getter)())
        };
        mem::forget(guard);
        self.evaluations.set(self.evaluations.get() + 1);

        let changed = self.value.borrow().as_ref() != Some(&value);
        if changed {
            let old = self.value.replace(Some(value));
            drop(old);
            Runtime::bump_version(self.dep);
        }
        Runtime::mark_evaluated(self.id);
    }
}

/// Flags a computed as failed if its getter unwinds.
struct EvalGuard(SubscriberId);

impl Drop for EvalGuard {
    fn drop(&mut self) {
        Runtime::update_flags(self.0, |f| f.insert(Flags::DIRTY | Flags::FAILED));
    }
}

impl<T: Clone + PartialEq + 'static> Subscriber for ComputedInner<T> {
    fn subscriber_id(&self) -> SubscriberId {
        self.id
    }

    fn refresh(self: Rc<Self>) {
        self.update();
    }
}

impl<T: 'static> Drop for ComputedInner<T> {
    fn drop(&mut self) {
        Runtime::unregister(self.id);
    }
}

/// A cached derived value that recomputes only when dependencies change.
///
/// # Type Parameters
///
/// - `T`: The type of the computed value. Must be Clone + PartialEq.
///
/// The PartialEq bound is needed to detect when the computed value actually
/// changed (some computeds return the same value even if inputs changed).
///
/// # Example
///
/// ```rust
/// use ripple_core::{Computed, Ref};
///
/// let count = Ref::new(2);
/// let doubled = Computed::new({
///     let count = count.clone();
///     move || count.get() * 2
/// });
///
/// assert_eq!(doubled.get(), 4);
/// count.set(5);
/// assert_eq!(doubled.get(), 10);
/// ```
pub struct Computed<T: 'static>(Rc<ComputedInner<T>>);

impl<T: Clone + PartialEq + 'static> Computed<T> {
    /// Create a new read-only computed.
    ///
    /// The getter is not run immediately. It runs on first access.
    pub fn new<F>(getter: F) -> Self
    where
        F: Fn() -> T + 'static,
    {
        Self::build(Box::new(getter), None)
    }

    /// Create a writable computed. Writes are forwarded to `setter`, which
    /// usually writes the refs the getter reads.
    pub fn with_setter<F, S>(getter: F, setter: S) -> Self
    where
        F: Fn() -> T + 'static,
        S: Fn(T) + 'static,
    {
        Self::build(Box::new(getter), Some(Box::new(setter)))
    }

    fn build(getter: Box<dyn Fn() -> T>, setter: Option<Box<dyn Fn(T)>>) -> Self {
        let (id, dep) = Runtime::create_computed();

        let inner = Rc::new(ComputedInner {
            id,
            dep,
            getter,
            setter,
            value: RefCell::new(None),
            evaluations: Cell::new(0),
        });
        let weak = Rc::downgrade(&inner);
        let weak: Weak<dyn Subscriber> = weak;
        Runtime::attach(id, SubscriberHandle::Observed(weak));
        scope::record_computed(id);

        Self(inner)
    }

    /// Get the current value, re-evaluating if necessary.
    ///
    /// If called within a reactive context, records the dependency.
    pub fn get(&self) -> T {
        let link = Runtime::track(self.0.dep);
        self.0.update();
        if let Some(link) = link {
            Runtime::sync_link(link);
        }
        self.0
            .value
            .borrow()
            .clone()
            .expect("computed read itself before its first evaluation")
    }

    /// Get the current value without recording a dependency.
    pub fn get_untracked(&self) -> T {
        untracked(|| self.get())
    }

    /// Write through the setter.
    pub fn set(&self, value: T) -> Result<(), ReactiveError> {
        match &self.0.setter {
            Some(setter) => {
                setter(value);
                Ok(())
            }
            None => {
                warn!("write operation failed: computed value is readonly");
                Err(ReactiveError::ReadonlyComputed)
            }
        }
    }

    /// Check if the computed has a setter.
    pub fn is_writable(&self) -> bool {
        self.0.setter.is_some()
    }

    /// Stop tracking. The computed still answers reads, re-evaluating
    /// untracked whenever anything was written since its last evaluation.
    pub fn stop(&self) {
        drop(Runtime::deactivate(self.0.id));
    }
}

impl<T: 'static> Computed<T> {
    /// Get the subscriber ID for this computed.
    pub fn subscriber_id(&self) -> SubscriberId {
        self.0.id
    }

    /// The computed's output dep.
    pub fn dep_id(&self) -> DepId {
        self.0.dep
    }

    /// Get the current dirty state.
    pub fn state(&self) -> ComputedState {
        let flags = Runtime::flags(self.0.id);
        if !flags.contains(Flags::EVALUATED) {
            ComputedState::Dirty
        } else if flags.contains(Flags::DIRTY) {
            ComputedState::MaybeDirty
        } else {
            ComputedState::Clean
        }
    }

    /// Get the number of subscribers reading this computed.
    pub fn subscriber_count(&self) -> usize {
        Runtime::subscriber_count(self.0.dep)
    }

    /// Check if the computed has a cached value.
    pub fn has_value(&self) -> bool {
        self.0.value.borrow().is_some()
    }

    /// Number of times the getter has run.
    pub fn evaluations(&self) -> usize {
        self.0.evaluations.get()
    }

    pub fn is_active(&self) -> bool {
        Runtime::flags(self.0.id).contains(Flags::ACTIVE)
    }
}

impl<T: 'static> Clone for Computed<T> {
    fn clone(&self) -> Self {
        Self(Rc::clone(&self.0))
    }
}

impl<T: Debug + 'static> Debug for Computed<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Computed")
            .field("state", &self.state())
            .field("value", &*self.0.value.borrow())
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

// ---- Tests ----
