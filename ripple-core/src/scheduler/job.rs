//! Scheduler jobs.

use std::cell::Cell;
use std::fmt;
use std::rc::Rc;

/// State bits of a [`Job`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct JobFlags(u8);

impl JobFlags {
    /// Sitting in the queue (or the post-flush list).
    pub const QUEUED: JobFlags = JobFlags(1 << 0);
    /// Runs before non-pre jobs with the same id.
    pub const PRE: JobFlags = JobFlags(1 << 1);
    /// May re-enqueue itself while it runs.
    pub const ALLOW_RECURSE: JobFlags = JobFlags(1 << 2);
    /// Skipped by every future flush.
    pub const DISPOSED: JobFlags = JobFlags(1 << 3);

    pub fn contains(self, other: JobFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: JobFlags) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: JobFlags) {
        self.0 &= !other.0;
    }
}

struct JobInner {
    id: Option<u32>,
    flags: Cell<JobFlags>,
    callback: Box<dyn Fn()>,
    /// Flush in which the job last ran.
    last_flush: Cell<u64>,
    /// Runs within `last_flush`.
    runs: Cell<u32>,
}

/// A unit of deferred work.
///
/// Jobs with an id run in ascending id order; jobs without one run after
/// them in insertion order (pre jobs without an id run first). Cloning
/// produces another handle to the same job, and a job is queued at most
/// once at a time.
#[derive(Clone)]
pub struct Job(Rc<JobInner>);

impl Job {
    /// Create a job without an id.
    pub fn new(callback: impl Fn() + 'static) -> Self {
        Self::build(None, Box::new(callback))
    }

    /// Create a job with an ordering id.
    pub fn with_id(id: u32, callback: impl Fn() + 'static) -> Self {
        Self::build(Some(id), Box::new(callback))
    }

    fn build(id: Option<u32>, callback: Box<dyn Fn()>) -> Self {
        Self(Rc::new(JobInner {
            id,
            flags: Cell::new(JobFlags::default()),
            callback,
            last_flush: Cell::new(0),
            runs: Cell::new(0),
        }))
    }

    /// Mark the job as pre-flush.
    pub fn pre(self) -> Self {
        self.update_flags(|f| f.insert(JobFlags::PRE));
        self
    }

    /// Let the job re-enqueue itself while running.
    pub fn allow_recurse(self) -> Self {
        self.update_flags(|f| f.insert(JobFlags::ALLOW_RECURSE));
        self
    }

    pub fn id(&self) -> Option<u32> {
        self.0.id
    }

    pub fn flags(&self) -> JobFlags {
        self.0.flags.get()
    }

    pub(crate) fn update_flags(&self, f: impl FnOnce(&mut JobFlags)) {
        let mut flags = self.0.flags.get();
        f(&mut flags);
        self.0.flags.set(flags);
    }

    /// Call the job directly, outside of any flush.
    pub fn run(&self) {
        (self.0.callback)();
    }

    /// Prevent the job from running again.
    pub fn dispose(&self) {
        self.update_flags(|f| f.insert(JobFlags::DISPOSED));
    }

    pub fn is_disposed(&self) -> bool {
        self.flags().contains(JobFlags::DISPOSED)
    }

    pub fn is_queued(&self) -> bool {
        self.flags().contains(JobFlags::QUEUED)
    }

    /// Check whether two handles point to the same job.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    /// Queue position: by id, pre before non-pre, id-less pre jobs first
    /// and id-less jobs last.
    pub(crate) fn sort_key(&self) -> (u64, u8) {
        let pre = self.flags().contains(JobFlags::PRE);
        match self.0.id {
            Some(id) => (u64::from(id) + 1, u8::from(!pre)),
            None if pre => (0, 0),
            None => (u64::MAX, 1),
        }
    }

    /// Record a run in flush `flush`; returns the run count for that flush.
    pub(crate) fn record_run(&self, flush: u64) -> u32 {
        let runs = if self.0.last_flush.get() == flush {
            self.0.runs.get() + 1
        } else {
            1
        };
        self.0.last_flush.set(flush);
        self.0.runs.set(runs);
        runs
    }

    pub(crate) fn ran_in(&self, flush: u64) -> bool {
        self.0.last_flush.get() == flush && self.0.runs.get() > 0
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.0.id)
            .field("flags", &self.flags())
            .finish()
    }
}
