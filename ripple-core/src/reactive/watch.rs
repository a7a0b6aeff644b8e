//! Watchers
//!
//! A watcher runs a getter as a lazy effect and calls back with the new and
//! old value whenever the getter's result changes. The callback does not run
//! inside the effect, so reads in it are not tracked.
//!
//! When the callback runs is chosen by [`Flush`]:
//!
//! - `Pre` queues a pre job on the scheduler (the default)
//! - `Post` queues a post-flush callback
//! - `Sync` runs as soon as the batch that triggered it ends

use std::cell::{Cell, RefCell};
use std::mem;
use std::rc::Rc;

use tracing::warn;

use super::effect::{Effect, EffectOptions, EffectScheduler, WeakEffect};
use super::object::Reactive;
use crate::error::ReactiveError;
use crate::scheduler::{queue_job, queue_post_flush_cb, Job};

type Cleanups = RefCell<Vec<Box<dyn FnOnce()>>>;

thread_local! {
    static ACTIVE_WATCHER: RefCell<Option<Rc<Cleanups>>> = const { RefCell::new(None) };
}

/// When a watcher's callback runs relative to the scheduler flush.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Flush {
    #[default]
    Pre,
    Post,
    Sync,
}

/// Options for [`watch`].
#[derive(Debug, Clone, Copy, Default)]
pub struct WatchOptions {
    /// Call back once right away with no old value.
    pub immediate: bool,

    /// Stop after the first callback.
    pub once: bool,

    /// Call back on every trigger, even if the value compares equal.
    pub deep: bool,

    pub flush: Flush,
}

/// Handle to a running watcher.
#[derive(Clone)]
pub struct WatchHandle {
    effect: Effect,
    job: Job,
}

impl WatchHandle {
    /// Stop watching. Pending cleanups registered with
    /// [`on_watcher_cleanup`] run now.
    pub fn stop(&self) {
        self.job.dispose();
        self.effect.stop();
    }

    pub fn pause(&self) {
        self.effect.pause();
    }

    pub fn resume(&self) {
        self.effect.resume();
    }

    pub fn is_active(&self) -> bool {
        self.effect.is_active()
    }
}

/// Register a cleanup for the running watcher callback (or watch effect).
/// It runs before the next callback, or when the watcher stops.
pub fn on_watcher_cleanup(cleanup: impl FnOnce() + 'static) -> Result<(), ReactiveError> {
    let watcher = ACTIVE_WATCHER.with(|slot| slot.borrow().clone());
    match watcher {
        Some(cleanups) => {
            cleanups.borrow_mut().push(Box::new(cleanup));
            Ok(())
        }
        None => {
            warn!("on_watcher_cleanup() called outside of a watcher callback");
            Err(ReactiveError::NoActiveWatcher)
        }
    }
}

fn run_cleanups(cleanups: &Cleanups) {
    let pending = mem::take(&mut *cleanups.borrow_mut());
    for cleanup in pending {
        cleanup();
    }
}

/// Run `f` with `cleanups` as the active watcher.
fn with_watcher<R>(cleanups: &Rc<Cleanups>, f: impl FnOnce() -> R) -> R {
    struct Restore(Option<Rc<Cleanups>>);
    impl Drop for Restore {
        fn drop(&mut self) {
            let prev = self.0.take();
            let _ = ACTIVE_WATCHER.try_with(|slot| *slot.borrow_mut() = prev);
        }
    }

    let _restore = Restore(ACTIVE_WATCHER.with(|slot| slot.replace(Some(cleanups.clone()))));
    f()
}

fn job_scheduler(job: &Job, flush: Flush) -> EffectScheduler {
    let job = job.clone();
    match flush {
        Flush::Pre => Rc::new(move |_: &Effect| queue_job(job.clone())),
        Flush::Post => Rc::new(move |_: &Effect| queue_post_flush_cb(job.clone())),
        Flush::Sync => Rc::new(move |_: &Effect| job.run()),
    }
}

fn build_job(flush: Flush, allow_recurse: bool, body: impl Fn() + 'static) -> Job {
    let job = Job::new(body);
    let job = if flush == Flush::Pre { job.pre() } else { job };
    if allow_recurse {
        job.allow_recurse()
    } else {
        job
    }
}

/// Watch the result of `getter`.
///
/// `callback` receives the new value and the previous one (`None` on an
/// immediate first call).
///
/// ```rust
/// use std::cell::Cell;
/// use std::rc::Rc;
/// use ripple_core::{flush_jobs, watch, Ref, WatchOptions};
///
/// let count = Ref::new(0);
/// let last = Rc::new(Cell::new((0, 0)));
///
/// let handle = watch(
///     { let count = count.clone(); move || count.get() },
///     { let last = last.clone(); move |new: &i32, old: Option<&i32>| last.set((*new, *old.unwrap()))},
///     WatchOptions::default(),
/// );
///
/// count.set(1);
/// flush_jobs();
/// assert_eq!(last.get(), (1, 0));
/// handle.stop();
/// ```
pub fn watch<T, G, C>(getter: G, callback: C, options: WatchOptions) -> WatchHandle
where
    T: Clone + PartialEq + 'static,
    G: Fn() -> T + 'static,
    C: Fn(&T, Option<&T>) + 'static,
{
    let latest: Rc<RefCell<Option<T>>> = Rc::new(RefCell::new(None));
    let old: Rc<RefCell<Option<T>>> = Rc::new(RefCell::new(None));
    let cleanups: Rc<Cleanups> = Rc::new(RefCell::new(Vec::new()));
    let first = Rc::new(Cell::new(true));
    let effect_slot: Rc<RefCell<Option<WeakEffect>>> = Rc::new(RefCell::new(None));

    let job = build_job(options.flush, true, {
        let (latest, old, cleanups, first) = (latest.clone(), old.clone(), cleanups.clone(), first.clone());
        let effect_slot = effect_slot.clone();
        move || {
            let Some(effect) = effect_slot.borrow().as_ref().and_then(WeakEffect::upgrade) else {
                return;
            };
            let forced = first.replace(false);
            if !effect.is_active() || (!forced && !effect.dirty()) {
                return;
            }

            effect.run();
            let Some(new) = latest.borrow_mut().take() else {
                return;
            };
            let changed = forced || options.deep || old.borrow().as_ref() != Some(&new);
            if !changed {
                return;
            }

            run_cleanups(&cleanups);
            let prev = old.borrow_mut().take();
            with_watcher(&cleanups, || callback(&new, prev.as_ref()));
            *old.borrow_mut() = Some(new);

            if options.once {
                effect.stop();
            }
        }
    });

    let effect = Effect::with_options(
        {
            let latest = latest.clone();
            move || {
                let value = getter();
                *latest.borrow_mut() = Some(value);
            }
        },
        EffectOptions {
            scheduler: Some(job_scheduler(&job, options.flush)),
            on_stop: Some(Rc::new({
                let cleanups = cleanups.clone();
                move || run_cleanups(&cleanups)
            })),
            lazy: true,
            allow_recurse: false,
        },
    );
    *effect_slot.borrow_mut() = Some(effect.downgrade());

    if options.immediate {
        job.run();
    } else {
        first.set(false);
        effect.run();
        *old.borrow_mut() = latest.borrow_mut().take();
    }

    WatchHandle { effect, job }
}

/// Watch a reactive object at every depth. The callback runs on any nested
/// write and receives the object itself.
pub fn watch_reactive<C>(source: &Reactive, callback: C, options: WatchOptions) -> WatchHandle
where
    C: Fn(&Reactive) + 'static,
{
    let getter = {
        let source = source.clone();
        move || {
            source.traverse();
            source.clone()
        }
    };
    watch(
        getter,
        move |value: &Reactive, _: Option<&Reactive>| callback(value),
        WatchOptions { deep: true, ..options },
    )
}

/// Run `f` now and again whenever what it read changes, on the next flush.
pub fn watch_effect(f: impl Fn() + 'static) -> WatchHandle {
    watch_effect_with(f, Flush::Pre)
}

/// [`watch_effect`] with an explicit flush timing.
pub fn watch_effect_with(f: impl Fn() + 'static, flush: Flush) -> WatchHandle {
    let cleanups: Rc<Cleanups> = Rc::new(RefCell::new(Vec::new()));
    let effect_slot: Rc<RefCell<Option<WeakEffect>>> = Rc::new(RefCell::new(None));

    let job = build_job(flush, false, {
        let effect_slot = effect_slot.clone();
        move || {
            let Some(effect) = effect_slot.borrow().as_ref().and_then(WeakEffect::upgrade) else {
                return;
            };
            if effect.is_active() && effect.dirty() {
                effect.run();
            }
        }
    });

    let effect = Effect::with_options(
        {
            let cleanups = cleanups.clone();
            move || {
                run_cleanups(&cleanups);
                with_watcher(&cleanups, &f);
            }
        },
        EffectOptions {
            scheduler: Some(job_scheduler(&job, flush)),
            on_stop: Some(Rc::new({
                let cleanups = cleanups.clone();
                move || run_cleanups(&cleanups)
            })),
            lazy: true,
            allow_recurse: false,
        },
    );
    *effect_slot.borrow_mut() = Some(effect.downgrade());
    effect.run();

    WatchHandle { effect, job }
}

// ---- Tests ----
