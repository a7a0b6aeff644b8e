//! Awaiting the next flush.

use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};

use tokio::sync::Notify;
use tokio::task::LocalSet;

use super::queue;

/// Future returned by [`next_tick`].
///
/// Resolves once no flush is pending. If a flush was requested but has not
/// started, polling runs it.
#[derive(Debug)]
#[must_use = "futures do nothing unless awaited"]
pub struct NextTick {
    _private: (),
}

/// Wait until the pending flush (if any) has run.
///
/// ```rust
/// use ripple_core::{next_tick, queue_job, Job};
///
/// # tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(async {
/// queue_job(Job::new(|| println!("flushed")));
/// next_tick().await; // Prints "flushed"
/// # });
/// ```
pub fn next_tick() -> NextTick {
    NextTick { _private: () }
}

impl Future for NextTick {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        if queue::is_flushing() {
            // Awaited from inside a job: resolve when the flush ends.
            queue::add_waiter(cx.waker().clone());
            return Poll::Pending;
        }
        if queue::has_pending_flush() {
            queue::flush_pending();
        }
        Poll::Ready(())
    }
}

/// Wait for the next flush, then run `f`.
pub async fn next_tick_then<R>(f: impl FnOnce() -> R) -> R {
    next_tick().await;
    f()
}

/// Drive `future` on a [`LocalSet`] with automatic flushing: every flush
/// request wakes a local flusher task that flushes the queue once the
/// current task yields.
pub async fn run_local<F: Future>(future: F) -> F::Output {
    let flusher = Rc::new(Notify::new());
    let local = LocalSet::new();
    local.spawn_local({
        let flusher = flusher.clone();
        async move {
            loop {
                flusher.notified().await;
                queue::flush_pending();
            }
        }
    });
    let _guard = FlusherGuard::install(flusher);
    local.run_until(future).await
}

/// Restores the shadowed flusher when a `run_local` ends.
struct FlusherGuard {
    prev: Option<Rc<Notify>>,
}

impl FlusherGuard {
    fn install(flusher: Rc<Notify>) -> Self {
        Self {
            prev: queue::set_flusher(Some(flusher)),
        }
    }
}

impl Drop for FlusherGuard {
    fn drop(&mut self) {
        queue::restore_flusher(self.prev.take());
    }
}

// ---- Tests ----

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    use crate::scheduler::{queue_job, Job};

    #[tokio::test]
    async fn next_tick_flushes_pending_jobs() {
        let runs = Rc::new(Cell::new(0));
        queue_job(Job::new({
            let runs = runs.clone();
            move || runs.set(runs.get() + 1)
        }));

        assert_eq!(runs.get(), 0);
        next_tick().await;
        assert_eq!(runs.get(), 1);

        // Nothing pending: resolves immediately.
        next_tick().await;
        assert_eq!(runs.get(), 1);
    }

    #[tokio::test]
    async fn next_tick_then_runs_after_flush() {
        let runs = Rc::new(Cell::new(0));
        queue_job(Job::new({
            let runs = runs.clone();
            move || runs.set(runs.get() + 1)
        }));

        let seen = next_tick_then(|| runs.get()).await;
        assert_eq!(seen, 1);
    }

    #[tokio::test]
    async fn run_local_flushes_on_yield() {
        let runs = Rc::new(Cell::new(0));
        run_local({
            let runs = runs.clone();
            async move {
                queue_job(Job::new({
                    let runs = runs.clone();
                    move || runs.set(runs.get() + 1)
                }));
                assert_eq!(runs.get(), 0);
                tokio::task::yield_now().await;
                assert_eq!(runs.get(), 1);
            }
        })
        .await;
        assert_eq!(runs.get(), 1);
    }

    #[tokio::test]
    async fn queue_next_to_run_local_defers_to_its_flusher() {
        let runs = Rc::new(Cell::new(0));
        let outside = {
            let runs = runs.clone();
            async move {
                // Polled by the outer task, not by the local set.
                queue_job(Job::new({
                    let runs = runs.clone();
                    move || runs.set(runs.get() + 1)
                }));
            }
        };
        let local = run_local(async {
            tokio::task::yield_now().await;
            tokio::task::yield_now().await;
        });

        tokio::join!(local, outside);
        next_tick().await;
        assert_eq!(runs.get(), 1);
    }
}
