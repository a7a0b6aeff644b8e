//! Job Scheduler
//!
//! Effects that should not run synchronously (component renders, watcher
//! callbacks) hand a [`Job`] to the scheduler instead. Jobs are deduplicated
//! and run in id order on the next flush, so a burst of writes causes one
//! run per job.
//!
//! # Flushing
//!
//! The scheduler never blocks or spawns threads. A flush happens when:
//!
//! - the host calls [`flush_jobs`];
//! - someone awaits [`next_tick`] while a flush is pending;
//! - inside [`run_local`], the local task spawned by the first queued job
//!   gets polled.

mod config;
mod job;
mod queue;
mod tick;

pub use config::{SchedulerConfig, DEFAULT_RECURSION_LIMIT};
pub use job::{Job, JobFlags};
pub use queue::{
    clear_error_handler, config, configure, flush_jobs, has_pending_flush, invalidate_job, is_flushing,
    queue_job, queue_post_flush_cb, queued_len, set_error_handler, ErrorHandler,
};
pub use tick::{next_tick, next_tick_then, run_local, NextTick};
