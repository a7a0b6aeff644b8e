//! Effect Scopes
//!
//! A scope collects the effects, computeds and child scopes created while it
//! is running, so they can be stopped together.
//!
//! # Ownership
//!
//! A scope holds strong handles to its effects and child scopes, and only
//! graph ids for its computeds (a computed lives as long as its readers).
//! Children refer back to their parent weakly.
//!
//! Stopping a scope stops, in order: child scopes, effects, computeds, and
//! then runs the scope's dispose callbacks. A non-detached scope also
//! removes itself from its parent.

use std::cell::{Cell, RefCell};
use std::mem;
use std::rc::{Rc, Weak};

use tracing::{debug, warn};

use super::context::ScopeContext;
use super::effect::Effect;
use super::runtime::Runtime;
use crate::error::ReactiveError;
use crate::graph::SubscriberId;

pub(crate) struct ScopeInner {
    active: Cell<bool>,
    paused: Cell<bool>,
    detached: bool,
    effects: RefCell<Vec<Effect>>,
    computeds: RefCell<Vec<SubscriberId>>,
    scopes: RefCell<Vec<EffectScope>>,
    cleanups: RefCell<Vec<Box<dyn FnOnce()>>>,
    parent: Option<Weak<ScopeInner>>,
}

/// A group of effects that are stopped together.
///
/// # Example
///
/// ```rust
/// use ripple_core::{effect, EffectScope, Ref};
///
/// let count = Ref::new(0);
/// let scope = EffectScope::new();
///
/// scope
///     .run(|| {
///         let count = count.clone();
///         effect(move || println!("{}", count.get()));
///     })
///     .unwrap();
///
/// scope.stop();
/// assert_eq!(count.subscriber_count(), 0);
/// ```
#[derive(Clone)]
pub struct EffectScope(Rc<ScopeInner>);

impl EffectScope {
    /// Create a scope. If another scope is running, the new one becomes its
    /// child and is stopped with it.
    pub fn new() -> Self {
        Self::create(false)
    }

    /// Create a scope that is not collected by the running scope.
    pub fn detached() -> Self {
        Self::create(true)
    }

    fn create(detached: bool) -> Self {
        let parent = if detached { None } else { ScopeContext::current() };
        let scope = Self(Rc::new(ScopeInner {
            active: Cell::new(true),
            paused: Cell::new(false),
            detached,
            effects: RefCell::new(Vec::new()),
            computeds: RefCell::new(Vec::new()),
            scopes: RefCell::new(Vec::new()),
            cleanups: RefCell::new(Vec::new()),
            parent: parent.as_ref().map(|p| Rc::downgrade(&p.0)),
        }));

        if let Some(parent) = parent.filter(EffectScope::is_active) {
            parent.0.scopes.borrow_mut().push(scope.clone());
        }
        scope
    }

    /// Check if the scope has not been stopped.
    pub fn is_active(&self) -> bool {
        self.0.active.get()
    }

    pub fn is_paused(&self) -> bool {
        self.0.paused.get()
    }

    pub fn is_detached(&self) -> bool {
        self.0.detached
    }

    /// Run `f` with this scope collecting whatever it creates.
    pub fn run<R>(&self, f: impl FnOnce() -> R) -> Result<R, ReactiveError> {
        if !self.is_active() {
            warn!("cannot run an inactive effect scope");
            return Err(ReactiveError::InactiveScope);
        }
        let _ctx = ScopeContext::enter(self.clone());
        Ok(f())
    }

    /// Stop everything the scope collected. Idempotent.
    pub fn stop(&self) {
        let inner = &self.0;
        if !inner.active.replace(false) {
            return;
        }

        let scopes = mem::take(&mut *inner.scopes.borrow_mut());
        for scope in scopes {
            scope.stop();
        }

        let effects = mem::take(&mut *inner.effects.borrow_mut());
        let effect_count = effects.len();
        for effect in effects {
            effect.stop();
        }

        let computeds = mem::take(&mut *inner.computeds.borrow_mut());
        for id in computeds {
            drop(Runtime::deactivate(id));
        }

        let cleanups = mem::take(&mut *inner.cleanups.borrow_mut());
        for cleanup in cleanups {
            cleanup();
        }

        if !inner.detached {
            if let Some(parent) = inner.parent.as_ref().and_then(Weak::upgrade) {
                parent.scopes.borrow_mut().retain(|s| !Rc::ptr_eq(&s.0, inner));
            }
        }
        debug!(effects = effect_count, "effect scope stopped");
    }

    /// Pause every effect in the scope and its children.
    pub fn pause(&self) {
        if !self.is_active() || self.0.paused.replace(true) {
            return;
        }
        let scopes = self.0.scopes.borrow().clone();
        for scope in scopes {
            scope.pause();
        }
        let effects = self.0.effects.borrow().clone();
        for effect in effects {
            effect.pause();
        }
    }

    /// Resume the scope and its children. Effects triggered while paused run
    /// once now.
    pub fn resume(&self) {
        if !self.is_active() || !self.0.paused.replace(false) {
            return;
        }
        let scopes = self.0.scopes.borrow().clone();
        for scope in scopes {
            scope.resume();
        }
        let effects = self.0.effects.borrow().clone();
        for effect in effects {
            effect.resume();
        }
    }

    /// Number of live effects collected by this scope.
    pub fn effect_count(&self) -> usize {
        self.0.effects.borrow().len()
    }

    /// Number of live child scopes.
    pub fn child_count(&self) -> usize {
        self.0.scopes.borrow().len()
    }

    /// Check whether two handles point to the same scope.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl Default for EffectScope {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EffectScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EffectScope")
            .field("active", &self.is_active())
            .field("detached", &self.is_detached())
            .field("effects", &self.effect_count())
            .field("scopes", &self.child_count())
            .finish()
    }
}

/// The scope currently collecting effects, if any.
pub fn get_current_scope() -> Option<EffectScope> {
    ScopeContext::current()
}

/// Register a callback to run when the current scope stops.
pub fn on_scope_dispose(f: impl FnOnce() + 'static) -> Result<(), ReactiveError> {
    match ScopeContext::current() {
        Some(scope) => {
            scope.0.cleanups.borrow_mut().push(Box::new(f));
            Ok(())
        }
        None => {
            warn!("on_scope_dispose() called with no active effect scope");
            Err(ReactiveError::NoActiveScope)
        }
    }
}

pub(crate) fn record_effect(effect: &Effect) {
    let Some(scope) = ScopeContext::current().filter(EffectScope::is_active) else {
        return;
    };
    scope.0.effects.borrow_mut().push(effect.clone());
    effect.set_scope(Rc::downgrade(&scope.0));
    if scope.is_paused() {
        effect.pause();
    }
}

pub(crate) fn record_computed(id: SubscriberId) {
    if let Some(scope) = ScopeContext::current().filter(EffectScope::is_active) {
        scope.0.computeds.borrow_mut().push(id);
    }
}

pub(crate) fn forget_effect(scope: &ScopeInner, effect: &Effect) {
    scope.effects.borrow_mut().retain(|e| !e.ptr_eq(effect));
}

// ---- Tests ----

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::computed::Computed;
    use crate::reactive::effect::effect;
    use crate::reactive::signal::Ref;

    #[test]
    fn stop_stops_collected_effects() {
        let count = Ref::new(0);
        let runs = Rc::new(Cell::new(0));
        let scope = EffectScope::new();

        scope
            .run(|| {
                let count = count.clone();
                let runs = runs.clone();
                effect(move || {
                    count.get();
                    runs.set(runs.get() + 1);
                });
            })
            .unwrap();

        assert_eq!(scope.effect_count(), 1);
        count.set(1);
        assert_eq!(runs.get(), 2);

        scope.stop();
        count.set(2);
        assert_eq!(runs.get(), 2);
        assert_eq!(count.subscriber_count(), 0);
        assert_eq!(scope.effect_count(), 0);
    }

    #[test]
    fn run_returns_value() {
        let scope = EffectScope::new();
        assert_eq!(scope.run(|| 7), Ok(7));
    }

    #[test]
    fn inactive_scope_refuses_to_run() {
        let scope = EffectScope::new();
        scope.stop();
        assert_eq!(scope.run(|| ()), Err(ReactiveError::InactiveScope));
    }

    #[test]
    fn nested_scopes_stop_with_parent() {
        let parent = EffectScope::new();
        let child = parent.run(EffectScope::new).unwrap();
        let detached = parent.run(EffectScope::detached).unwrap();

        assert_eq!(parent.child_count(), 1);
        parent.stop();

        assert!(!child.is_active());
        assert!(detached.is_active());
    }

    #[test]
    fn stopped_child_leaves_parent() {
        let parent = EffectScope::new();
        let child = parent.run(EffectScope::new).unwrap();

        child.stop();
        assert_eq!(parent.child_count(), 0);
        assert!(parent.is_active());
    }

    #[test]
    fn dispose_callbacks_run_after_effects() {
        let order = Rc::new(RefCell::new(Vec::new()));
        let scope = EffectScope::new();

        scope
            .run(|| {
                let on_stop = order.clone();
                crate::reactive::effect::effect_with(
                    || {},
                    crate::reactive::effect::EffectOptions {
                        on_stop: Some(Rc::new(move || on_stop.borrow_mut().push("effect"))),
                        ..Default::default()
                    },
                );
                let cleanup = order.clone();
                on_scope_dispose(move || cleanup.borrow_mut().push("scope")).unwrap();
            })
            .unwrap();

        scope.stop();
        assert_eq!(*order.borrow(), vec!["effect", "scope"]);

        // Idempotent.
        scope.stop();
        assert_eq!(order.borrow().len(), 2);
    }

    #[test]
    fn on_scope_dispose_without_scope_fails() {
        assert_eq!(on_scope_dispose(|| {}), Err(ReactiveError::NoActiveScope));
    }

    #[test]
    fn stop_deactivates_computeds() {
        let source = Ref::new(1);
        let scope = EffectScope::new();
        let computed = scope
            .run(|| {
                let source = source.clone();
                Computed::new(move || source.get() * 2)
            })
            .unwrap();

        assert_eq!(computed.get(), 2);
        assert_eq!(source.subscriber_count(), 1);

        scope.stop();
        assert!(!computed.is_active());
        assert_eq!(source.subscriber_count(), 0);
    }

    #[test]
    fn stopped_effect_leaves_scope() {
        let scope = EffectScope::new();
        let e = scope.run(|| effect(|| {})).unwrap();

        e.stop();
        assert_eq!(scope.effect_count(), 0);
    }

    #[test]
    fn current_scope_is_visible_inside_run() {
        let scope = EffectScope::new();
        assert!(get_current_scope().is_none());
        let seen = scope.run(get_current_scope).unwrap();
        assert!(seen.is_some_and(|s| s.ptr_eq(&scope)));
    }

    #[test]
    fn pause_and_resume_cascade() {
        let count = Ref::new(0);
        let runs = Rc::new(Cell::new(0));
        let parent = EffectScope::new();

        parent
            .run(|| {
                EffectScope::new()
                    .run(|| {
                        let count = count.clone();
                        let runs = runs.clone();
                        effect(move || {
                            count.get();
                            runs.set(runs.get() + 1);
                        });
                    })
                    .unwrap();
            })
            .unwrap();

        parent.pause();
        count.set(1);
        count.set(2);
        assert_eq!(runs.get(), 1);

        parent.resume();
        assert_eq!(runs.get(), 2);
    }
}
