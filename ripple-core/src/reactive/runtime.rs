//! Reactive Runtime
//!
//! The runtime is the central coordinator that connects refs, computeds, and
//! effects. It owns the dependency graph and decides when subscribers run.
//!
//! # How It Works
//!
//! 1. When a ref, reactive key or computed is created, it allocates a dep in
//!    the graph.
//!
//! 2. When a computed or effect reads a dep, the runtime links the running
//!    subscriber to it.
//!
//! 3. When a dep is written, the runtime:
//!    a. Bumps the dep's version and the global version
//!    b. Marks downstream computeds dirty
//!    c. Collects downstream effects into the current batch
//!    d. Triggers the collected effects when the outermost batch ends
//!
//! Computeds are lazy: they are only re-evaluated when read, and only if a
//! dependency version moved since their last evaluation.
//!
//! # Threading
//!
//! All state is thread-local. Reactive values are `!Send`, so everything a
//! computation can reach lives on the thread that created it.

use std::cell::{Cell, RefCell};
use std::mem;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;

use slotmap::SecondaryMap;
use tracing::{error, trace};

use super::context::ReactiveContext;
use super::subscriber::{Subscriber, SubscriberHandle};
use crate::graph::{DepId, Flags, Graph, GraphStats, LinkId, NodeKind, Propagation, SubscriberId};

thread_local! {
    static RUNTIME: RuntimeState = RuntimeState::default();
}

#[derive(Default)]
struct RuntimeState {
    graph: RefCell<Graph>,
    handles: RefCell<SecondaryMap<SubscriberId, SubscriberHandle>>,
    global_version: Cell<u64>,
    batch_depth: Cell<u32>,
    batched: RefCell<Propagation>,
}

/// The thread's reactive runtime.
///
/// A zero-sized facade over thread-local state; every operation is an
/// associated function.
pub struct Runtime;

impl Runtime {
    fn with<R>(f: impl FnOnce(&RuntimeState) -> R) -> R {
        RUNTIME.with(f)
    }

    /// Allocate a dep with no subscribers.
    pub fn create_dep() -> DepId {
        Self::with(|s| s.graph.borrow_mut().add_dep())
    }

    /// Remove a dep and every link into it.
    ///
    /// Safe to call while the thread is shutting down.
    pub fn dispose_dep(dep: DepId) {
        let _ = RUNTIME.try_with(|s| s.graph.borrow_mut().remove_dep(dep));
    }

    /// Allocate a subscriber node. The caller attaches its handle next.
    pub(crate) fn create_subscriber(kind: NodeKind) -> SubscriberId {
        Self::with(|s| s.graph.borrow_mut().add_subscriber(kind))
    }

    /// Allocate a computed node and its output dep.
    pub(crate) fn create_computed() -> (SubscriberId, DepId) {
        Self::with(|s| s.graph.borrow_mut().add_computed())
    }

    pub(crate) fn attach(sub: SubscriberId, handle: SubscriberHandle) {
        let replaced = Self::with(|s| s.handles.borrow_mut().insert(sub, handle));
        drop(replaced);
    }

    /// Remove a subscriber and everything it owns from the graph.
    pub(crate) fn unregister(sub: SubscriberId) {
        let handle = RUNTIME
            .try_with(|s| {
                s.graph.borrow_mut().remove_subscriber(sub);
                s.handles.borrow_mut().remove(sub)
            })
            .ok()
            .flatten();
        drop(handle);
    }

    /// Stop a subscriber: unlink it from its deps and clear ACTIVE.
    ///
    /// Returns the strong handle the runtime held, if any, so the caller can
    /// drop it outside of any runtime borrow.
    pub(crate) fn deactivate(sub: SubscriberId) -> Option<SubscriberHandle> {
        Self::with(|s| {
            {
                let mut graph = s.graph.borrow_mut();
                graph.clear_deps(sub);
                if let Some(node) = graph.sub_mut(sub) {
                    node.flags.remove(Flags::ACTIVE);
                }
            }
            let mut handles = s.handles.borrow_mut();
            if handles.get(sub).is_some_and(SubscriberHandle::is_owned) {
                handles.remove(sub)
            } else {
                None
            }
        })
    }

    pub(crate) fn handle(sub: SubscriberId) -> Option<Rc<dyn Subscriber>> {
        Self::with(|s| s.handles.borrow().get(sub).and_then(SubscriberHandle::get))
    }

    /// Current state bits of a subscriber; empty if it no longer exists.
    pub fn flags(sub: SubscriberId) -> Flags {
        Self::with(|s| s.graph.borrow().sub(sub).map(|node| node.flags).unwrap_or_default())
    }

    pub(crate) fn update_flags(sub: SubscriberId, f: impl FnOnce(&mut Flags)) {
        let _ = RUNTIME.try_with(|s| {
            if let Some(node) = s.graph.borrow_mut().sub_mut(sub) {
                f(&mut node.flags);
            }
        });
    }

    pub(crate) fn prepare(sub: SubscriberId) {
        Self::with(|s| s.graph.borrow_mut().prepare(sub));
    }

    pub(crate) fn cleanup(sub: SubscriberId) {
        let _ = RUNTIME.try_with(|s| s.graph.borrow_mut().cleanup(sub));
    }

    /// Record that the current subscriber read `dep`.
    ///
    /// Does nothing outside a tracking context or when the current
    /// subscriber was stopped.
    pub fn track(dep: DepId) -> Option<LinkId> {
        let sub = ReactiveContext::current_subscriber()?;
        Self::with(|s| {
            let mut graph = s.graph.borrow_mut();
            if !graph.sub(sub)?.flags.contains(Flags::ACTIVE) {
                return None;
            }
            graph.track(dep, sub)
        })
    }

    /// Bring a link's recorded version up to its dep's current version.
    pub(crate) fn sync_link(link: LinkId) {
        Self::with(|s| {
            let mut graph = s.graph.borrow_mut();
            let Some(version) = graph.link(link).and_then(|l| graph.dep(l.dep)).map(|d| d.version) else {
                return;
            };
            if let Some(l) = graph.link_mut(link) {
                l.version = Some(version);
            }
        });
    }

    /// Notify everything downstream of `dep` that it was written.
    pub fn trigger(dep: DepId) {
        let active = ReactiveContext::current_subscriber();
        Self::start_batch();
        Self::with(|s| {
            let mut graph = s.graph.borrow_mut();
            let Some(node) = graph.dep_mut(dep) else {
                return;
            };
            node.version += 1;
            s.global_version.set(s.global_version.get() + 1);
            graph.propagate(dep, active, &mut s.batched.borrow_mut());
        });
        Self::end_batch();
    }

    /// Bump a dep's version without propagating (a computed whose value
    /// changed during re-evaluation).
    pub(crate) fn bump_version(dep: DepId) {
        Self::with(|s| {
            if let Some(node) = s.graph.borrow_mut().dep_mut(dep) {
                node.version += 1;
            }
        });
    }

    /// Global write counter.
    pub fn global_version() -> u64 {
        Self::with(|s| s.global_version.get())
    }

    /// Mark a computed as holding a fresh value.
    pub(crate) fn mark_evaluated(sub: SubscriberId) {
        Self::with(|s| {
            if let Some(node) = s.graph.borrow_mut().sub_mut(sub) {
                node.flags.insert(Flags::EVALUATED);
                node.flags.remove(Flags::DIRTY | Flags::FAILED);
                node.global_version = s.global_version.get();
            }
        });
    }

    /// Check whether nothing was written since the computed last evaluated.
    pub(crate) fn is_current(sub: SubscriberId) -> bool {
        Self::with(|s| {
            s.graph
                .borrow()
                .sub(sub)
                .is_some_and(|node| node.global_version == s.global_version.get())
        })
    }

    /// Check whether any dependency of `sub` moved since it was read.
    ///
    /// Dirty computeds along the way are refreshed first, so a computed that
    /// re-evaluates to an equal value does not make its readers dirty.
    pub fn is_dirty(sub: SubscriberId) -> bool {
        let mut cur = Self::with(|s| s.graph.borrow().sub(sub).and_then(|node| node.deps_head));

        while let Some(link) = cur {
            let Some((dep, next, computed)) = Self::with(|s| {
                let graph = s.graph.borrow();
                let l = graph.link(link)?;
                Some((l.dep, l.next_dep, graph.dep(l.dep)?.computed))
            }) else {
                return true;
            };
            if Self::link_is_stale(link, dep) {
                return true;
            }
            if let Some(computed) = computed {
                Self::refresh_computed(computed);
                if Self::link_is_stale(link, dep) {
                    return true;
                }
            }
            cur = next;
        }
        false
    }

    fn link_is_stale(link: LinkId, dep: DepId) -> bool {
        Self::with(|s| {
            let graph = s.graph.borrow();
            match (graph.link(link), graph.dep(dep)) {
                (Some(l), Some(d)) => l.version != Some(d.version),
                _ => true,
            }
        })
    }

    pub(crate) fn refresh_computed(sub: SubscriberId) {
        if let Some(handle) = Self::handle(sub) {
            handle.refresh();
        }
    }

    /// Open a batch. Effects notified inside it run when the outermost batch
    /// ends.
    pub fn start_batch() {
        Self::with(|s| s.batch_depth.set(s.batch_depth.get() + 1));
    }

    /// Close a batch, triggering collected effects if it was the outermost.
    ///
    /// Every collected effect gets its turn even if an earlier one panics;
    /// the first panic is resumed afterwards.
    pub fn end_batch() {
        if let Some(payload) = Self::finish_batch() {
            panic::resume_unwind(payload);
        }
    }

    /// Close a batch and trigger collected effects, handing back the first
    /// panic raised by one of them.
    fn finish_batch() -> Option<Box<dyn std::any::Any + Send>> {
        let depth = Self::with(|s| {
            let depth = s.batch_depth.get().saturating_sub(1);
            s.batch_depth.set(depth);
            depth
        });
        if depth > 0 {
            return None;
        }

        let mut first_panic = None;
        loop {
            let batch = Self::with(|s| mem::take(&mut *s.batched.borrow_mut()));
            if batch.is_empty() {
                break;
            }
            Self::with(|s| {
                let mut graph = s.graph.borrow_mut();
                for &id in &batch.computeds {
                    if let Some(node) = graph.sub_mut(id) {
                        node.flags.remove(Flags::NOTIFIED);
                    }
                }
            });
            trace!(effects = batch.effects.len(), "triggering batched effects");

            for id in batch.effects {
                let mut flags = Flags::empty();
                Self::update_flags(id, |f| {
                    f.remove(Flags::NOTIFIED);
                    flags = *f;
                });
                if !flags.contains(Flags::ACTIVE) {
                    continue;
                }
                let Some(handle) = Self::handle(id) else {
                    continue;
                };
                if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| handle.schedule())) {
                    first_panic.get_or_insert(payload);
                }
            }
        }

        first_panic
    }

    /// Run `f` inside a batch.
    pub fn batch<R>(f: impl FnOnce() -> R) -> R {
        Self::start_batch();
        let _guard = BatchGuard;
        f()
    }

    /// Number of subscribers linked to `dep`.
    pub fn subscriber_count(dep: DepId) -> usize {
        Self::with(|s| s.graph.borrow().dep(dep).map_or(0, |d| d.subscriber_count()))
    }

    /// Number of deps `sub` read during its last run.
    pub fn dependency_count(sub: SubscriberId) -> usize {
        Self::with(|s| s.graph.borrow().deps_of(sub).len())
    }

    /// Current version of `dep`.
    pub fn dep_version(dep: DepId) -> Option<u64> {
        Self::with(|s| s.graph.borrow().dep(dep).map(|d| d.version()))
    }

    /// Size of this thread's graph.
    pub fn stats() -> GraphStats {
        Self::with(|s| s.graph.borrow().stats())
    }

    /// Get the current subscriber being tracked, if any.
    pub fn current_subscriber() -> Option<SubscriberId> {
        ReactiveContext::current_subscriber()
    }

    /// Check if we're inside a reactive context.
    pub fn is_tracking() -> bool {
        ReactiveContext::is_active()
    }
}

/// Ends a batch opened by [`Runtime::batch`].
struct BatchGuard;

impl Drop for BatchGuard {
    fn drop(&mut self) {
        if std::thread::panicking() {
            // Already unwinding: effects still run, their panics are logged.
            if RUNTIME.try_with(|_| ()).is_ok() && Runtime::finish_batch().is_some() {
                error!("effect panicked while a batch was unwinding");
            }
        } else {
            Runtime::end_batch();
        }
    }
}

/// Run `f` inside a batch: effects notified by its writes run once, after
/// `f` returns.
pub fn batch<R>(f: impl FnOnce() -> R) -> R {
    Runtime::batch(f)
}

// ---- Tests ----
