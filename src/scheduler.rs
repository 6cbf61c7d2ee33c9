//! Schedulers decide where and when timed work runs.
//!
//! There is no process-wide default scheduler: every timed source and every
//! scheduling operator takes its scheduler explicitly, so tests can inject a
//! [`TestScheduler`] and drive virtual time by hand.
//!
//! | Scheduler | Runs tasks on | Feature |
//! |-----------|---------------|---------|
//! | [`ImmediateScheduler`] | the calling thread, sleeping for delays | - |
//! | [`ThreadPoolScheduler`] | a `futures` thread pool | `thread-pool-scheduler` |
//! | [`TokioScheduler`] | a tokio runtime | `tokio-scheduler` |
//! | [`TestScheduler`] | the thread advancing virtual time | - |

use std::sync::{
  atomic::{AtomicBool, Ordering},
  Arc,
};

pub use std::time::Duration;

mod immediate;
mod test_scheduler;
#[cfg(feature = "thread-pool-scheduler")]
mod thread_pool;
#[cfg(feature = "tokio-scheduler")]
mod tokio_scheduler;

pub use immediate::ImmediateScheduler;
pub use test_scheduler::TestScheduler;
#[cfg(feature = "thread-pool-scheduler")]
pub use thread_pool::{ThreadPoolScheduler, ThreadPoolSchedulerBuilder};
#[cfg(feature = "tokio-scheduler")]
pub use tokio_scheduler::TokioScheduler;

/// A one-shot task.
pub type OnceTask = Box<dyn FnOnce() + Send>;

/// A repeating task. It receives its own handle so that it can stop itself.
pub type PeriodicTask = Box<dyn FnMut(&TaskHandle) + Send>;

/// Orders tasks in time.
///
/// Cancelling a returned [`TaskHandle`] prevents every future run of the
/// task but never interrupts a run already in progress. Runs of one periodic
/// task never overlap and happen in issue order. One scheduler serves any
/// number of unrelated tasks; cancelling one of them leaves the others alone.
pub trait Scheduler: Send + Sync {
  /// Time elapsed since the scheduler's own epoch.
  fn now(&self) -> Duration;

  /// Runs `task` once after `delay`.
  fn schedule_once(&self, delay: Duration, task: OnceTask) -> TaskHandle;

  /// Runs `task` after `initial`, then every `period`. `period` must be
  /// non-zero.
  fn schedule_periodic_at(&self, initial: Duration, period: Duration, task: PeriodicTask)
    -> TaskHandle;

  /// Runs `task` every `period`, first after one full period.
  fn schedule_periodic(&self, period: Duration, task: PeriodicTask) -> TaskHandle {
    self.schedule_periodic_at(period, period, task)
  }
}

/// Shared scheduler handle, as stored by sources and operators.
pub type SchedulerRef = Arc<dyn Scheduler>;

impl<S> Scheduler for Arc<S>
where
  S: Scheduler + ?Sized,
{
  fn now(&self) -> Duration { (**self).now() }

  fn schedule_once(&self, delay: Duration, task: OnceTask) -> TaskHandle {
    (**self).schedule_once(delay, task)
  }

  fn schedule_periodic_at(
    &self, initial: Duration, period: Duration, task: PeriodicTask,
  ) -> TaskHandle {
    (**self).schedule_periodic_at(initial, period, task)
  }
}

/// Cancellation handle of a scheduled task.
#[derive(Clone, Debug, Default)]
pub struct TaskHandle(Arc<AtomicBool>);

impl TaskHandle {
  pub fn new() -> Self { Self::default() }

  /// Stops future runs; idempotent.
  pub fn cancel(&self) { self.0.store(true, Ordering::Release); }

  pub fn is_cancelled(&self) -> bool { self.0.load(Ordering::Acquire) }
}

/// Turns any scheduler value into the shared form used internally.
pub(crate) fn shared<S: Scheduler + 'static>(scheduler: S) -> SchedulerRef { Arc::new(scheduler) }

#[cfg(test)]
mod tests {
  use std::sync::atomic::AtomicUsize;

  use super::*;

  #[test]
  fn task_handle_clones_share_state() {
    let handle = TaskHandle::new();
    let other = handle.clone();
    assert!(!other.is_cancelled());
    handle.cancel();
    handle.cancel();
    assert!(other.is_cancelled());
  }

  #[test]
  fn arc_forwards_to_inner_scheduler() {
    let scheduler: SchedulerRef = Arc::new(TestScheduler::new());
    let runs = Arc::new(AtomicUsize::new(0));
    let c_runs = runs.clone();
    scheduler.schedule_periodic(
      Duration::from_millis(10),
      Box::new(move |_| {
        c_runs.fetch_add(1, Ordering::SeqCst);
      }),
    );
    assert_eq!(scheduler.now(), Duration::ZERO);
    assert_eq!(runs.load(Ordering::SeqCst), 0);
  }
}
