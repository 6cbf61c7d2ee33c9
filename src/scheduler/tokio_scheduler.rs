use std::time::Instant;

use tokio::runtime::Handle;

use super::{Duration, OnceTask, PeriodicTask, Scheduler, TaskHandle};

/// Runs tasks on a tokio runtime through its `Handle`.
#[derive(Clone, Debug)]
pub struct TokioScheduler {
  runtime: Handle,
  epoch: Instant,
}

impl TokioScheduler {
  pub fn new(runtime: Handle) -> Self { Self { runtime, epoch: Instant::now() } }

  /// Uses the runtime the caller is running in.
  ///
  /// Panics outside of a tokio runtime, like `Handle::current`.
  pub fn current() -> Self { Self::new(Handle::current()) }
}

impl Scheduler for TokioScheduler {
  fn now(&self) -> Duration { self.epoch.elapsed() }

  fn schedule_once(&self, delay: Duration, task: OnceTask) -> TaskHandle {
    let handle = TaskHandle::new();
    let c_handle = handle.clone();
    self.runtime.spawn(async move {
      if !delay.is_zero() {
        tokio::time::sleep(delay).await;
      }
      if !c_handle.is_cancelled() {
        task();
      }
    });
    handle
  }

  fn schedule_periodic_at(
    &self, initial: Duration, period: Duration, mut task: PeriodicTask,
  ) -> TaskHandle {
    let handle = TaskHandle::new();
    let c_handle = handle.clone();
    self.runtime.spawn(async move {
      let start = tokio::time::Instant::now();
      let mut due = initial;
      loop {
        tokio::time::sleep_until(start + due).await;
        if c_handle.is_cancelled() {
          break;
        }
        task(&c_handle);
        if period.is_zero() {
          break;
        }
        due += period;
      }
    });
    handle
  }
}

#[cfg(test)]
mod tests {
  use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
  };

  use super::*;

  #[tokio::test(flavor = "multi_thread")]
  async fn periodic_ticks_until_cancelled() {
    let scheduler = TokioScheduler::current();
    let runs = Arc::new(AtomicUsize::new(0));
    let c_runs = runs.clone();
    let handle = scheduler.schedule_periodic(
      Duration::from_millis(2),
      Box::new(move |_| {
        c_runs.fetch_add(1, Ordering::SeqCst);
      }),
    );
    tokio::time::sleep(Duration::from_millis(30)).await;
    handle.cancel();
    let seen = runs.load(Ordering::SeqCst);
    assert!(seen > 0);
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(runs.load(Ordering::SeqCst) <= seen + 1);
  }
}
