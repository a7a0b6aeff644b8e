//! Job Queue
//!
//! The queue collects jobs between flushes and runs them in order.
//!
//! # Algorithm
//!
//! 1. `queue_job` inserts a job at its sorted position (by id, pre jobs
//!    before non-pre jobs with the same id). Positions before the flush
//!    cursor are never touched, so a job queued mid-flush runs later in the
//!    same flush.
//! 2. The first queued job requests a flush. Inside [`run_local`] it wakes
//!    the local flusher task; otherwise the flush runs on the next
//!    `next_tick().await` or explicit [`flush_jobs`].
//! 3. A flush sorts the queue, runs jobs until the cursor reaches the end,
//!    then runs post-flush callbacks, and repeats while either list is
//!    non-empty.
//!
//! A job that panics is reported and the flush continues with the next one.
//!
//! [`run_local`]: super::run_local

use std::cell::{Cell, RefCell};
use std::mem;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;
use std::task::Waker;

use tokio::sync::Notify;
use tracing::{debug, error, trace};

use super::config::SchedulerConfig;
use super::job::{Job, JobFlags};
use crate::error::SchedulerError;

/// Receives every job failure of every flush.
pub type ErrorHandler = Rc<dyn Fn(&SchedulerError)>;

thread_local! {
    static SCHEDULER: SchedulerState = SchedulerState::default();
}

#[derive(Default)]
struct SchedulerState {
    queue: RefCell<Vec<Job>>,
    post: RefCell<Vec<Job>>,
    /// Cursor of the running flush.
    flush_index: Cell<usize>,
    flushing: Cell<bool>,
    /// A flush was requested and has not started yet.
    pending: Cell<bool>,
    /// Number of flushes started so far.
    flush_count: Cell<u64>,
    config: RefCell<SchedulerConfig>,
    error_handler: RefCell<Option<ErrorHandler>>,
    waiters: RefCell<Vec<Waker>>,
    /// Wakes the flusher task of the innermost `run_local`.
    flusher: RefCell<Option<Rc<Notify>>>,
}

/// Queue a job for the next flush. Queuing an already queued job is a
/// no-op, as is queuing a job that already ran in the running flush unless
/// it allows recursion.
pub fn queue_job(job: Job) {
    let queued = SCHEDULER.with(|s| {
        let flags = job.flags();
        if flags.contains(JobFlags::QUEUED) || flags.contains(JobFlags::DISPOSED) {
            return false;
        }
        if s.flushing.get()
            && job.ran_in(s.flush_count.get())
            && !flags.contains(JobFlags::ALLOW_RECURSE)
        {
            trace!(id = ?job.id(), "job already ran in this flush");
            return false;
        }

        let mut queue = s.queue.borrow_mut();
        let start = if s.flushing.get() {
            (s.flush_index.get() + 1).min(queue.len())
        } else {
            0
        };
        let key = job.sort_key();
        let index = start + queue[start..].partition_point(|queued| queued.sort_key() <= key);
        job.update_flags(|f| f.insert(JobFlags::QUEUED));
        queue.insert(index, job);
        true
    });
    if queued {
        queue_flush();
    }
}

/// Queue a callback to run after the main queue of the next flush.
pub fn queue_post_flush_cb(job: Job) {
    let queued = SCHEDULER.with(|s| {
        let flags = job.flags();
        if flags.contains(JobFlags::QUEUED) || flags.contains(JobFlags::DISPOSED) {
            return false;
        }
        job.update_flags(|f| f.insert(JobFlags::QUEUED));
        s.post.borrow_mut().push(job);
        true
    });
    if queued {
        queue_flush();
    }
}

/// Remove a job from the queue if it has not run yet.
pub fn invalidate_job(job: &Job) {
    let removed = SCHEDULER.with(|s| {
        let mut queue = s.queue.borrow_mut();
        let start = if s.flushing.get() {
            (s.flush_index.get() + 1).min(queue.len())
        } else {
            0
        };
        match queue[start..].iter().position(|queued| queued.ptr_eq(job)) {
            Some(offset) => Some(queue.remove(start + offset)),
            None => None,
        }
    });
    if let Some(job) = removed {
        job.update_flags(|f| f.remove(JobFlags::QUEUED));
    }
}

fn queue_flush() {
    let flusher = SCHEDULER.with(|s| {
        if s.pending.get() || s.flushing.get() {
            return None;
        }
        s.pending.set(true);
        if !s.config.borrow().microtasks {
            return None;
        }
        s.flusher.borrow().clone()
    });
    // Notifying is fine from any task, inside the local set or not.
    if let Some(flusher) = flusher {
        flusher.notify_one();
    }
}

/// Run a requested flush, if one is pending.
pub(crate) fn flush_pending() -> Vec<SchedulerError> {
    if has_pending_flush() {
        flush_jobs()
    } else {
        Vec::new()
    }
}

/// Run every queued job and post-flush callback now.
///
/// Returns the failures of this flush (they are also logged and passed to
/// the error handler). Calling this from inside a running flush does
/// nothing.
pub fn flush_jobs() -> Vec<SchedulerError> {
    let flush = SCHEDULER.with(|s| {
        if s.flushing.get() {
            return None;
        }
        s.pending.set(false);
        s.flushing.set(true);
        s.flush_count.set(s.flush_count.get() + 1);
        Some(s.flush_count.get())
    });
    let Some(flush) = flush else {
        return Vec::new();
    };

    let mut errors = Vec::new();
    let mut ran = 0usize;
    loop {
        SCHEDULER.with(|s| {
            s.flush_index.set(0);
            s.queue.borrow_mut().sort_by_key(Job::sort_key);
        });

        loop {
            let next = SCHEDULER.with(|s| s.queue.borrow().get(s.flush_index.get()).cloned());
            let Some(job) = next else {
                break;
            };
            ran += usize::from(run_job(&job, flush, &mut errors));
            SCHEDULER.with(|s| s.flush_index.set(s.flush_index.get() + 1));
        }

        let done = SCHEDULER.with(|s| {
            s.flush_index.set(0);
            mem::take(&mut *s.queue.borrow_mut())
        });
        drop(done);

        let mut post = SCHEDULER.with(|s| mem::take(&mut *s.post.borrow_mut()));
        post.sort_by_key(Job::sort_key);
        for job in post {
            ran += usize::from(run_job(&job, flush, &mut errors));
        }

        let more = SCHEDULER.with(|s| !s.queue.borrow().is_empty() || !s.post.borrow().is_empty());
        if !more {
            break;
        }
    }

    let waiters = SCHEDULER.with(|s| {
        s.flushing.set(false);
        mem::take(&mut *s.waiters.borrow_mut())
    });
    for waker in waiters {
        waker.wake();
    }

    debug!(flush, jobs = ran, errors = errors.len(), "flushed scheduler queue");
    errors
}

/// Run one job. Returns whether it actually ran.
fn run_job(job: &Job, flush: u64, errors: &mut Vec<SchedulerError>) -> bool {
    let flags = job.flags();
    if flags.contains(JobFlags::DISPOSED) {
        job.update_flags(|f| f.remove(JobFlags::QUEUED));
        return false;
    }

    let limit = config().recursion_limit;
    if job.record_run(flush) > limit {
        job.update_flags(|f| f.remove(JobFlags::QUEUED));
        report(SchedulerError::RecursionLimit { id: job.id(), limit }, errors);
        return false;
    }

    let recurse = flags.contains(JobFlags::ALLOW_RECURSE);
    if recurse {
        job.update_flags(|f| f.remove(JobFlags::QUEUED));
    }
    let result = panic::catch_unwind(AssertUnwindSafe(|| job.run()));
    if !recurse {
        job.update_flags(|f| f.remove(JobFlags::QUEUED));
    }

    if let Err(payload) = result {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        report(SchedulerError::JobPanicked { id: job.id(), message }, errors);
    }
    true
}

fn report(err: SchedulerError, errors: &mut Vec<SchedulerError>) {
    error!(error = %err, "scheduler job failed");
    let handler = SCHEDULER.with(|s| s.error_handler.borrow().clone());
    if let Some(handler) = handler {
        handler(&err);
    }
    errors.push(err);
}

/// Install a handler for job failures, replacing any previous one.
pub fn set_error_handler(handler: impl Fn(&SchedulerError) + 'static) {
    SCHEDULER.with(|s| *s.error_handler.borrow_mut() = Some(Rc::new(handler)));
}

/// Remove the job failure handler.
pub fn clear_error_handler() {
    let old = SCHEDULER.with(|s| s.error_handler.borrow_mut().take());
    drop(old);
}

/// Replace this thread's scheduler configuration.
pub fn configure(config: SchedulerConfig) {
    SCHEDULER.with(|s| *s.config.borrow_mut() = config);
}

/// This thread's scheduler configuration.
pub fn config() -> SchedulerConfig {
    SCHEDULER.with(|s| s.config.borrow().clone())
}

/// Check whether a flush was requested and has not started yet.
pub fn has_pending_flush() -> bool {
    SCHEDULER.with(|s| s.pending.get() && !s.flushing.get())
}

/// Check whether a flush is running.
pub fn is_flushing() -> bool {
    SCHEDULER.with(|s| s.flushing.get())
}

/// Number of jobs waiting in the main queue.
pub fn queued_len() -> usize {
    SCHEDULER.with(|s| s.queue.borrow().len())
}

pub(crate) fn add_waiter(waker: Waker) {
    SCHEDULER.with(|s| s.waiters.borrow_mut().push(waker));
}

/// Install the flusher of a `run_local`, returning the one it shadows.
pub(crate) fn set_flusher(flusher: Option<Rc<Notify>>) -> Option<Rc<Notify>> {
    SCHEDULER.with(|s| s.flusher.replace(flusher))
}

pub(crate) fn restore_flusher(flusher: Option<Rc<Notify>>) {
    let _ = SCHEDULER.try_with(|s| s.flusher.replace(flusher));
}

// ---- Tests ----

#[cfg(test)]
mod tests {
    use super::*;

    fn recorder() -> Rc<RefCell<Vec<&'static str>>> {
        Rc::new(RefCell::new(Vec::new()))
    }

    fn push_job(log: &Rc<RefCell<Vec<&'static str>>>, id: Option<u32>, name: &'static str) -> Job {
        let log = log.clone();
        let run = move || log.borrow_mut().push(name);
        match id {
            Some(id) => Job::with_id(id, run),
            None => Job::new(run),
        }
    }

    #[test]
    fn jobs_run_in_id_order() {
        let log = recorder();
        queue_job(push_job(&log, None, "none"));
        queue_job(push_job(&log, Some(3), "three"));
        queue_job(push_job(&log, Some(1), "one"));
        queue_job(push_job(&log, Some(1), "one-b"));
        queue_job(push_job(&log, Some(1), "one-pre").pre());

        assert!(has_pending_flush());
        assert!(flush_jobs().is_empty());
        assert_eq!(*log.borrow(), vec!["one-pre", "one", "one-b", "three", "none"]);
        assert!(!has_pending_flush());
    }

    #[test]
    fn queueing_twice_runs_once() {
        let log = recorder();
        let job = push_job(&log, Some(1), "job");
        queue_job(job.clone());
        queue_job(job.clone());
        assert!(job.is_queued());
        assert_eq!(queued_len(), 1);

        flush_jobs();
        assert_eq!(log.borrow().len(), 1);
        assert!(!job.is_queued());
    }

    #[test]
    fn jobs_queued_mid_flush_run_in_same_flush() {
        let log = recorder();
        let late = push_job(&log, Some(5), "late");
        let early = Job::with_id(1, {
            let log = log.clone();
            let late = late.clone();
            move || {
                log.borrow_mut().push("early");
                queue_job(late.clone());
            }
        });

        queue_job(early);
        flush_jobs();
        assert_eq!(*log.borrow(), vec!["early", "late"]);
    }

    #[test]
    fn rerun_in_same_flush_needs_allow_recurse() {
        let count = Rc::new(Cell::new(0));
        let slot: Rc<RefCell<Option<Job>>> = Rc::new(RefCell::new(None));
        let job = Job::new({
            let count = count.clone();
            let slot = slot.clone();
            move || {
                count.set(count.get() + 1);
                if count.get() < 3 {
                    if let Some(job) = slot.borrow().clone() {
                        queue_job(job);
                    }
                }
            }
        });
        *slot.borrow_mut() = Some(job.clone());

        queue_job(job);
        flush_jobs();
        assert_eq!(count.get(), 1);

        let count = Rc::new(Cell::new(0));
        let slot: Rc<RefCell<Option<Job>>> = Rc::new(RefCell::new(None));
        let job = Job::new({
            let count = count.clone();
            let slot = slot.clone();
            move || {
                count.set(count.get() + 1);
                if count.get() < 3 {
                    if let Some(job) = slot.borrow().clone() {
                        queue_job(job);
                    }
                }
            }
        })
        .allow_recurse();
        *slot.borrow_mut() = Some(job.clone());

        queue_job(job);
        flush_jobs();
        assert_eq!(count.get(), 3);
    }

    #[test]
    fn runaway_job_hits_recursion_limit() {
        configure(SchedulerConfig {
            recursion_limit: 10,
            ..SchedulerConfig::default()
        });
        let count = Rc::new(Cell::new(0));
        let slot: Rc<RefCell<Option<Job>>> = Rc::new(RefCell::new(None));
        let job = Job::with_id(7, {
            let count = count.clone();
            let slot = slot.clone();
            move || {
                count.set(count.get() + 1);
                if let Some(job) = slot.borrow().clone() {
                    queue_job(job);
                }
            }
        })
        .allow_recurse();
        *slot.borrow_mut() = Some(job.clone());

        queue_job(job);
        let errors = flush_jobs();
        assert_eq!(count.get(), 10);
        assert_eq!(errors, vec![SchedulerError::RecursionLimit { id: Some(7), limit: 10 }]);
        slot.borrow_mut().take();
    }

    #[test]
    fn panicking_job_is_reported_and_flush_continues() {
        let log = recorder();
        let seen = Rc::new(RefCell::new(Vec::new()));
        set_error_handler({
            let seen = seen.clone();
            move |err: &SchedulerError| seen.borrow_mut().push(err.clone())
        });

        queue_job(Job::with_id(1, || panic!("job exploded")));
        queue_job(push_job(&log, Some(2), "after"));
        let errors = flush_jobs();

        assert_eq!(*log.borrow(), vec!["after"]);
        assert_eq!(
            errors,
            vec![SchedulerError::JobPanicked {
                id: Some(1),
                message: "job exploded".to_string()
            }]
        );
        assert_eq!(*seen.borrow(), errors);
        clear_error_handler();
    }

    #[test]
    fn post_flush_callbacks_run_after_queue() {
        let log = recorder();
        queue_post_flush_cb(push_job(&log, Some(1), "post"));
        queue_job(push_job(&log, Some(9), "main"));

        flush_jobs();
        assert_eq!(*log.borrow(), vec!["main", "post"]);
    }

    #[test]
    fn invalidated_job_does_not_run() {
        let log = recorder();
        let job = push_job(&log, Some(1), "job");
        queue_job(job.clone());
        invalidate_job(&job);

        assert!(!job.is_queued());
        flush_jobs();
        assert!(log.borrow().is_empty());
    }

    #[test]
    fn disposed_job_is_skipped() {
        let log = recorder();
        let job = push_job(&log, None, "job");
        queue_job(job.clone());
        job.dispose();

        flush_jobs();
        assert!(log.borrow().is_empty());

        queue_job(job.clone());
        assert!(!job.is_queued());
    }

    #[test]
    fn nested_flush_is_ignored() {
        let inner = Rc::new(RefCell::new(None));
        queue_job(Job::new({
            let inner = inner.clone();
            move || *inner.borrow_mut() = Some(flush_jobs().len())
        }));

        flush_jobs();
        assert_eq!(*inner.borrow(), Some(0));
        assert!(!is_flushing());
    }
}
