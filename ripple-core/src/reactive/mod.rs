//! Reactive Primitives
//!
//! This module implements the core reactive system: refs, reactive objects,
//! computeds, effects, scopes and watchers. These primitives form the
//! foundation of Ripple's fine-grained reactivity.
//!
//! # Concepts
//!
//! ## Refs
//!
//! A [`Ref`] is a container for mutable state. When its value is read within
//! a tracking context (such as a computed or effect), the ref registers that
//! context as a dependent. When the value changes, all dependents are
//! notified. [`Reactive`] does the same per property of a JSON-like object
//! or array.
//!
//! ## Computeds
//!
//! A [`Computed`] is a derived value that caches its result. It re-evaluates
//! only when one of its dependencies changed, and only when someone reads it.
//!
//! ## Effects
//!
//! An [`Effect`] is a side-effecting computation that runs whenever its
//! dependencies change. Effects keep reactive state in sync with the outside
//! world, such as the host tree of the renderer.
//!
//! # Implementation Notes
//!
//! The reactive system uses a thread-local tracking context to detect
//! dependencies. When a source is read, we check if there is an active
//! subscriber and, if so, link the two in the [`graph`](crate::graph).
//!
//! Writes bump the source's version and mark subscribers downstream. Effects
//! are notified once the outermost batch ends; computeds only remember that
//! they may be stale and re-check their sources when read.

mod computed;
mod context;
mod effect;
mod object;
mod runtime;
mod scope;
mod signal;
mod subscriber;
mod watch;

pub use computed::{Computed, ComputedState};
pub use context::{untracked, ReactiveContext};
pub use effect::{effect, effect_with, on_effect_cleanup, Effect, EffectOptions, EffectScheduler, WeakEffect};
pub use object::Reactive;
pub use runtime::{batch, Runtime};
pub use scope::{get_current_scope, on_scope_dispose, EffectScope};
pub use signal::{same_value, CustomRef, Ref, Tracker, Trigger};
pub use subscriber::Subscriber;
pub use watch::{
    on_watcher_cleanup, watch, watch_effect, watch_effect_with, watch_reactive, Flush, WatchHandle, WatchOptions,
};

pub(crate) use context::ScopeContext;
