use std::time::Instant;

use futures::executor::ThreadPool;
use futures_time::{task::sleep, time::Duration as SleepDuration};

use super::{Duration, OnceTask, PeriodicTask, Scheduler, TaskHandle};
use crate::error::{FlowError, Result};

/// Runs tasks on a `futures` thread pool, timing them with `futures-time`.
///
/// A periodic task is driven by a single future, so its runs never overlap
/// even when a run takes longer than the period; late runs are issued back
/// to back until the schedule catches up.
#[derive(Clone)]
pub struct ThreadPoolScheduler {
  pool: ThreadPool,
  epoch: Instant,
}

impl ThreadPoolScheduler {
  /// A pool with one worker per CPU.
  pub fn new() -> Result<Self> { Self::builder().build() }

  pub fn builder() -> ThreadPoolSchedulerBuilder { ThreadPoolSchedulerBuilder::default() }
}

impl std::fmt::Debug for ThreadPoolScheduler {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("ThreadPoolScheduler").finish_non_exhaustive()
  }
}

/// Builder for [`ThreadPoolScheduler`].
#[derive(Debug, Default, Clone)]
pub struct ThreadPoolSchedulerBuilder {
  pool_size: Option<usize>,
  name_prefix: Option<String>,
}

impl ThreadPoolSchedulerBuilder {
  /// Number of worker threads; must be positive.
  pub fn pool_size(mut self, size: usize) -> Self {
    self.pool_size = Some(size);
    self
  }

  /// Prefix for worker thread names.
  pub fn name_prefix(mut self, prefix: impl Into<String>) -> Self {
    self.name_prefix = Some(prefix.into());
    self
  }

  pub fn build(self) -> Result<ThreadPoolScheduler> {
    let mut builder = ThreadPool::builder();
    if let Some(size) = self.pool_size {
      if size == 0 {
        return Err(FlowError::illegal_argument("thread pool size must be positive"));
      }
      builder.pool_size(size);
    }
    if let Some(prefix) = self.name_prefix {
      builder.name_prefix(prefix);
    }
    let pool = builder.create().map_err(|err| FlowError::Scheduler(err.to_string()))?;
    Ok(ThreadPoolScheduler { pool, epoch: Instant::now() })
  }
}

impl Scheduler for ThreadPoolScheduler {
  fn now(&self) -> Duration { self.epoch.elapsed() }

  fn schedule_once(&self, delay: Duration, task: OnceTask) -> TaskHandle {
    let handle = TaskHandle::new();
    let c_handle = handle.clone();
    self.pool.spawn_ok(async move {
      if !delay.is_zero() {
        sleep(SleepDuration::from(delay)).await;
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
    self.pool.spawn_ok(async move {
      let start = Instant::now();
      let mut due = initial;
      loop {
        let elapsed = start.elapsed();
        if due > elapsed {
          sleep(SleepDuration::from(due - elapsed)).await;
        }
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
