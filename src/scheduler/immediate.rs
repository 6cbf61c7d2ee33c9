use std::time::Instant;

use super::{Duration, OnceTask, PeriodicTask, Scheduler, TaskHandle};

/// Runs every task on the thread that schedules it.
///
/// Delays block the caller with `std::thread::sleep`, and a periodic task
/// keeps the caller busy until the task cancels its own handle. This is the
/// scheduler for simple programs and blocking examples, not for services.
#[derive(Clone, Copy, Debug)]
pub struct ImmediateScheduler {
  epoch: Instant,
}

impl Default for ImmediateScheduler {
  fn default() -> Self { Self { epoch: Instant::now() } }
}

impl ImmediateScheduler {
  pub fn new() -> Self { Self::default() }
}

impl Scheduler for ImmediateScheduler {
  fn now(&self) -> Duration { self.epoch.elapsed() }

  fn schedule_once(&self, delay: Duration, task: OnceTask) -> TaskHandle {
    if !delay.is_zero() {
      std::thread::sleep(delay);
    }
    task();
    TaskHandle::new()
  }

  fn schedule_periodic_at(
    &self, initial: Duration, period: Duration, mut task: PeriodicTask,
  ) -> TaskHandle {
    let handle = TaskHandle::new();
    let start = Instant::now();
    let mut due = initial;
    loop {
      let elapsed = start.elapsed();
      if due > elapsed {
        std::thread::sleep(due - elapsed);
      }
      if handle.is_cancelled() {
        break;
      }
      task(&handle);
      if handle.is_cancelled() || period.is_zero() {
        break;
      }
      due += period;
    }
    handle.cancel();
    handle
  }
}
