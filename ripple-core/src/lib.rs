//! Ripple Core
//!
//! This crate provides the core runtime for the Ripple reactive UI framework.
//! It implements:
//!
//! - Reactive primitives (refs, reactive objects, computeds, effects, scopes)
//! - A dependency link graph with push-pull invalidation
//! - A deduplicating job scheduler with `next_tick`
//! - A virtual DOM renderer driven by per-component render effects
//!
//! Everything is single-threaded: each thread has its own graph and
//! scheduler, and reactive handles are `!Send`.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `graph`: Dependency link graph (deps, subscribers, links)
//! - `reactive`: Reactive primitives and dependency tracking
//! - `scheduler`: Job queue, flushing and `next_tick`
//! - `render`: Virtual DOM, diffing and components
//!
//! # Example
//!
//! ```rust
//! use ripple_core::{effect, Computed, Ref};
//!
//! // Create a ref
//! let count = Ref::new(0);
//!
//! // Create a derived value
//! let doubled = Computed::new({
//!     let count = count.clone();
//!     move || count.get() * 2
//! });
//!
//! // Create an effect
//! let e = effect({
//!     let (count, doubled) = (count.clone(), doubled.clone());
//!     move || println!("Count: {}, Doubled: {}", count.get(), doubled.get())
//! });
//!
//! // Update the ref
//! count.set(5);
//! // Effect automatically runs, prints: "Count: 5, Doubled: 10"
//! e.stop();
//! ```

pub mod error;
pub mod graph;
pub mod reactive;
pub mod render;
pub mod scheduler;

pub use error::{ConfigError, ReactiveError, SchedulerError};
pub use graph::GraphStats;
pub use reactive::{
    batch, effect, effect_with, get_current_scope, on_effect_cleanup, on_scope_dispose, on_watcher_cleanup,
    same_value, untracked, watch, watch_effect, watch_effect_with, watch_reactive, Computed, ComputedState, CustomRef,
    Effect, EffectOptions, EffectScope, Flush, Reactive, Ref, Runtime, WatchHandle, WatchOptions,
};
pub use scheduler::{
    configure, flush_jobs, invalidate_job, next_tick, next_tick_then, queue_job, queue_post_flush_cb, run_local, Job,
    SchedulerConfig,
};

/// Size of this thread's dependency graph.
///
/// Once every ref, computed and effect is dropped or stopped, this is back
/// to zero, which makes it handy for leak checks in tests.
pub fn graph_stats() -> GraphStats {
    Runtime::stats()
}
