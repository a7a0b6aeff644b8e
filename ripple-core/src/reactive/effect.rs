//! Effect Implementation
//!
//! An Effect is a side-effecting computation that runs whenever its
//! dependencies change.
//!
//! # How Effects Work
//!
//! 1. When created, the effect runs its function immediately to establish
//!    initial dependencies (unless it is lazy).
//!
//! 2. When any dependency changes, the effect is triggered at the end of the
//!    current batch. Without a custom scheduler it re-runs right away if a
//!    dependency version actually moved; with one, the scheduler decides.
//!
//! 3. Each run re-tracks its dependencies. Deps that were read last time but
//!    not this time are unlinked when the run ends.
//!
//! # Differences from Computed
//!
//! - Computeds return a value; effects do not.
//! - Computeds are lazy (compute on access); effects are eager (run when deps change).
//! - Computeds cache results; effects just run their side effect.
//!
//! # Cleanup
//!
//! Code running inside an effect can register cleanups with
//! [`on_effect_cleanup`]. They are called before the effect re-runs and when
//! it is stopped. This is useful for cleaning up resources like event
//! listeners or timers.

use std::cell::{Cell, RefCell};
use std::mem;
use std::rc::{Rc, Weak};

use tracing::{debug, warn};

use super::context::{untracked, ReactiveContext};
use super::runtime::Runtime;
use super::scope::{self, ScopeInner};
use super::subscriber::{Subscriber, SubscriberHandle};
use crate::error::ReactiveError;
use crate::graph::{Flags, NodeKind, SubscriberId};

/// Custom scheduler: receives the triggered effect instead of running it.
pub type EffectScheduler = Rc<dyn Fn(&Effect)>;

/// Options for [`effect_with`].
#[derive(Clone, Default)]
pub struct EffectOptions {
    /// Called instead of re-running the effect when it is triggered.
    pub scheduler: Option<EffectScheduler>,

    /// Called once when the effect is stopped.
    pub on_stop: Option<Rc<dyn Fn()>>,

    /// Do not run on creation.
    pub lazy: bool,

    /// Writes made by the effect during its own run trigger it again.
    pub allow_recurse: bool,
}

struct EffectInner {
    id: SubscriberId,
    run: Box<dyn Fn()>,
    scheduler: Option<EffectScheduler>,
    on_stop: RefCell<Option<Rc<dyn Fn()>>>,
    cleanups: RefCell<Vec<Box<dyn FnOnce()>>>,
    scope: RefCell<Option<Weak<ScopeInner>>>,
    /// Triggered while paused.
    pending: Cell<bool>,
    run_count: Cell<usize>,
}

impl EffectInner {
    fn run_cleanups(&self) {
        let cleanups = mem::take(&mut *self.cleanups.borrow_mut());
        if cleanups.is_empty() {
            return;
        }
        untracked(|| {
            for cleanup in cleanups {
                cleanup();
            }
        });
    }
}

impl Subscriber for EffectInner {
    fn subscriber_id(&self) -> SubscriberId {
        self.id
    }

    fn schedule(self: Rc<Self>) {
        if Runtime::flags(self.id).contains(Flags::PAUSED) {
            self.pending.set(true);
            return;
        }
        let effect = Effect(self);
        match effect.0.scheduler.clone() {
            Some(scheduler) => scheduler(&effect),
            None => effect.run_if_dirty(),
        }
    }

    fn add_cleanup(&self, cleanup: Box<dyn FnOnce()>) -> bool {
        self.cleanups.borrow_mut().push(cleanup);
        true
    }
}

impl Drop for EffectInner {
    fn drop(&mut self) {
        Runtime::unregister(self.id);
    }
}

/// A side-effecting computation that runs when dependencies change.
///
/// The runtime keeps an effect alive until it is stopped, so dropping every
/// handle does not stop it.
///
/// # Example
///
/// ```rust
/// use ripple_core::{effect, Ref};
///
/// let count = Ref::new(0);
///
/// let e = effect({
///     let count = count.clone();
///     move || println!("Count is: {}", count.get())
/// });
///
/// count.set(5); // Prints "Count is: 5"
/// e.stop();
/// ```
#[derive(Clone)]
pub struct Effect(Rc<EffectInner>);

/// A non-owning handle to an [`Effect`].
#[derive(Clone)]
pub struct WeakEffect(Weak<EffectInner>);

impl WeakEffect {
    pub fn upgrade(&self) -> Option<Effect> {
        self.0.upgrade().map(Effect)
    }
}

/// Create an effect and run it once.
pub fn effect(f: impl Fn() + 'static) -> Effect {
    Effect::new(f)
}

/// Create an effect with options.
pub fn effect_with(f: impl Fn() + 'static, options: EffectOptions) -> Effect {
    Effect::with_options(f, options)
}

/// Register a cleanup on the effect that is currently running.
///
/// The cleanup runs before the effect's next run, or when it is stopped.
pub fn on_effect_cleanup(cleanup: impl FnOnce() + 'static) -> Result<(), ReactiveError> {
    let accepted = ReactiveContext::current_subscriber()
        .and_then(Runtime::handle)
        .is_some_and(|sub| sub.add_cleanup(Box::new(cleanup)));
    if accepted {
        Ok(())
    } else {
        warn!("on_effect_cleanup() called with no active effect");
        Err(ReactiveError::NoActiveEffect)
    }
}

impl Effect {
    /// Create a new effect.
    ///
    /// The effect runs immediately to establish dependencies.
    pub fn new<F>(run: F) -> Self
    where
        F: Fn() + 'static,
    {
        Self::with_options(run, EffectOptions::default())
    }

    /// Create a new effect without running it immediately.
    pub fn new_lazy<F>(run: F) -> Self
    where
        F: Fn() + 'static,
    {
        Self::with_options(
            run,
            EffectOptions {
                lazy: true,
                ..EffectOptions::default()
            },
        )
    }

    pub fn with_options<F>(run: F, options: EffectOptions) -> Self
    where
        F: Fn() + 'static,
    {
        let id = Runtime::create_subscriber(NodeKind::Effect);
        if options.allow_recurse {
            Runtime::update_flags(id, |flags| flags.insert(Flags::ALLOW_RECURSE));
        }

        let inner = Rc::new(EffectInner {
            id,
            run: Box::new(run),
            scheduler: options.scheduler,
            on_stop: RefCell::new(options.on_stop),
            cleanups: RefCell::new(Vec::new()),
            scope: RefCell::new(None),
            pending: Cell::new(false),
            run_count: Cell::new(0),
        });
        Runtime::attach(id, SubscriberHandle::Owned(inner.clone()));

        let effect = Self(inner);
        scope::record_effect(&effect);

        if !options.lazy {
            effect.run();
        }
        effect
    }

    /// Get the subscriber ID.
    pub fn subscriber_id(&self) -> SubscriberId {
        self.0.id
    }

    /// Run the effect, re-tracking its dependencies.
    ///
    /// A stopped effect still runs its function, without tracking.
    pub fn run(&self) {
        let inner = &self.0;
        if !self.is_active() {
            (inner.run)();
            return;
        }

        inner.run_cleanups();
        {
            let _ctx = ReactiveContext::enter(inner.id);
            (inner.run)();
        }
        inner.run_count.set(inner.run_count.get() + 1);
    }

    /// Run the effect only if a dependency changed since its last run.
    pub fn run_if_dirty(&self) {
        if self.dirty() {
            self.run();
        }
    }

    /// Check whether a dependency changed since the last run.
    pub fn dirty(&self) -> bool {
        Runtime::is_dirty(self.0.id)
    }

    /// Stop the effect: unlink its dependencies, run its cleanups and its
    /// `on_stop` hook. Idempotent.
    pub fn stop(&self) {
        if !self.is_active() {
            return;
        }
        let handle = Runtime::deactivate(self.0.id);

        self.0.run_cleanups();
        let on_stop = self.0.on_stop.borrow_mut().take();
        if let Some(on_stop) = on_stop {
            on_stop();
        }

        let scope = self.0.scope.borrow_mut().take();
        if let Some(scope) = scope.and_then(|s| s.upgrade()) {
            scope::forget_effect(&scope, self);
        }

        debug!(id = ?self.0.id, runs = self.run_count(), "effect stopped");
        drop(handle);
    }

    /// Park notifications until [`Effect::resume`].
    pub fn pause(&self) {
        Runtime::update_flags(self.0.id, |flags| flags.insert(Flags::PAUSED));
    }

    /// Resume a paused effect. If it was triggered while paused, it is
    /// triggered once now.
    pub fn resume(&self) {
        if !self.is_paused() {
            return;
        }
        Runtime::update_flags(self.0.id, |flags| flags.remove(Flags::PAUSED));
        if self.0.pending.replace(false) {
            Rc::clone(&self.0).schedule();
        }
    }

    /// Check if the effect has not been stopped.
    pub fn is_active(&self) -> bool {
        Runtime::flags(self.0.id).contains(Flags::ACTIVE)
    }

    pub fn is_paused(&self) -> bool {
        Runtime::flags(self.0.id).contains(Flags::PAUSED)
    }

    /// Get the number of tracked runs.
    pub fn run_count(&self) -> usize {
        self.0.run_count.get()
    }

    /// Get the number of dependencies from the last run.
    pub fn dependency_count(&self) -> usize {
        Runtime::dependency_count(self.0.id)
    }

    pub fn downgrade(&self) -> WeakEffect {
        WeakEffect(Rc::downgrade(&self.0))
    }

    /// Check whether two handles point to the same effect.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub(crate) fn set_scope(&self, scope: Weak<ScopeInner>) {
        *self.0.scope.borrow_mut() = Some(scope);
    }
}

impl std::fmt::Debug for Effect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Effect")
            .field("id", &self.0.id)
            .field("active", &self.is_active())
            .field("run_count", &self.run_count())
            .finish()
    }
}

// ---- Tests ----
