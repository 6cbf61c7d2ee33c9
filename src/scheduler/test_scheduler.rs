//! Virtual-time scheduler for deterministic tests of timed operators.
//!
//! Time only moves when the test says so. Advancing runs every task that
//! became due, in due-time order and FIFO among tasks due at the same
//! instant, on the thread that advances.
//!
//! ```rust
//! use rxflow::prelude::*;
//!
//! let scheduler = TestScheduler::new();
//! let ts = TestSubscriber::unbounded();
//! Flow::interval(Duration::from_millis(100), scheduler.clone())
//!   .unwrap()
//!   .take(3)
//!   .subscribe_with(ts.clone());
//!
//! scheduler.advance_by(Duration::from_millis(250));
//! assert_eq!(ts.values(), vec![0, 1]);
//!
//! scheduler.advance_by(Duration::from_millis(50));
//! ts.assert_completed_with(&[0, 1, 2]);
//! ```
//!
//! Unlike a thread-local clock, each `TestScheduler` value owns its clock;
//! clones share it, so a test can hand one clone to the pipeline and keep
//! another to drive time.

use std::{cmp::Ordering, collections::BinaryHeap, sync::Arc};

use parking_lot::Mutex;

use super::{Duration, OnceTask, PeriodicTask, Scheduler, TaskHandle};

// ==================== Internal State ====================

enum Job {
  Once(OnceTask),
  Periodic { period: Duration, task: PeriodicTask },
}

struct ScheduledTask {
  due: Duration,
  seq: u64,
  job: Job,
  handle: TaskHandle,
}

impl PartialEq for ScheduledTask {
  fn eq(&self, other: &Self) -> bool { self.due == other.due && self.seq == other.seq }
}

impl Eq for ScheduledTask {}

impl PartialOrd for ScheduledTask {
  fn partial_cmp(&self, other: &Self) -> Option<Ordering> { Some(self.cmp(other)) }
}

impl Ord for ScheduledTask {
  fn cmp(&self, other: &Self) -> Ordering {
    // Min-heap: earlier times first, then FIFO by sequence number
    other.due.cmp(&self.due).then_with(|| other.seq.cmp(&self.seq))
  }
}

#[derive(Default)]
struct State {
  now: Duration,
  queue: BinaryHeap<ScheduledTask>,
  next_seq: u64,
}

impl State {
  fn push(&mut self, due: Duration, job: Job, handle: TaskHandle) {
    let seq = self.next_seq;
    self.next_seq += 1;
    self.queue.push(ScheduledTask { due, seq, job, handle });
  }
}

// ==================== TestScheduler ====================

/// A virtual time scheduler; clones share one clock and one task queue.
#[derive(Clone, Default)]
pub struct TestScheduler {
  state: Arc<Mutex<State>>,
}

impl TestScheduler {
  pub fn new() -> Self { Self::default() }

  /// Moves the clock forward by `delta`, running everything that falls due.
  pub fn advance_by(&self, delta: Duration) {
    let target = self.state.lock().now + delta;
    self.advance_to(target);
  }

  /// Moves the clock to `target`, running everything due at or before it.
  /// Moving backwards is ignored.
  pub fn advance_to(&self, target: Duration) {
    while let Some(task) = self.pop_due(target) {
      self.run(task);
    }
    let mut state = self.state.lock();
    if state.now < target {
      state.now = target;
    }
  }

  /// Runs the tasks due at the current instant.
  pub fn run_due(&self) {
    let now = self.state.lock().now;
    self.advance_to(now);
  }

  /// Number of tasks still waiting, cancelled ones excluded.
  pub fn pending(&self) -> usize {
    self.state.lock().queue.iter().filter(|task| !task.handle.is_cancelled()).count()
  }

  fn pop_due(&self, target: Duration) -> Option<ScheduledTask> {
    let mut state = self.state.lock();
    loop {
      let due = state.queue.peek()?.due;
      if due > target {
        return None;
      }
      let task = state.queue.pop()?;
      if task.handle.is_cancelled() {
        continue;
      }
      if state.now < due {
        state.now = due;
      }
      return Some(task);
    }
  }

  // Runs outside the lock: tasks may schedule more work or read the clock.
  fn run(&self, task: ScheduledTask) {
    let ScheduledTask { due, job, handle, .. } = task;
    match job {
      Job::Once(task) => task(),
      Job::Periodic { period, mut task } => {
        task(&handle);
        if handle.is_cancelled() {
          return;
        }
        if period.is_zero() {
          tracing::warn!("periodic task with a zero period ran once and was dropped");
          return;
        }
        self.state.lock().push(due + period, Job::Periodic { period, task }, handle);
      }
    }
  }
}

impl Scheduler for TestScheduler {
  fn now(&self) -> Duration { self.state.lock().now }

  fn schedule_once(&self, delay: Duration, task: OnceTask) -> TaskHandle {
    let handle = TaskHandle::new();
    let mut state = self.state.lock();
    let due = state.now + delay;
    state.push(due, Job::Once(task), handle.clone());
    handle
  }

  fn schedule_periodic_at(
    &self, initial: Duration, period: Duration, task: PeriodicTask,
  ) -> TaskHandle {
    let handle = TaskHandle::new();
    let mut state = self.state.lock();
    let due = state.now + initial;
    state.push(due, Job::Periodic { period, task }, handle.clone());
    handle
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn recorder() -> (Arc<Mutex<Vec<&'static str>>>, impl Fn(&'static str) -> OnceTask) {
    let log = Arc::new(Mutex::new(vec![]));
    let c_log = log.clone();
    let make = move |name: &'static str| -> OnceTask {
      let log = c_log.clone();
      Box::new(move || log.lock().push(name))
    };
    (log, make)
  }

  #[test]
  fn runs_in_due_order_then_fifo() {
    let scheduler = TestScheduler::new();
    let (log, task) = recorder();
    scheduler.schedule_once(Duration::from_millis(20), task("late"));
    scheduler.schedule_once(Duration::from_millis(10), task("first"));
    scheduler.schedule_once(Duration::from_millis(10), task("second"));

    scheduler.advance_by(Duration::from_millis(10));
    assert_eq!(*log.lock(), vec!["first", "second"]);
    assert_eq!(scheduler.pending(), 1);

    scheduler.advance_by(Duration::from_millis(10));
    assert_eq!(*log.lock(), vec!["first", "second", "late"]);
    assert_eq!(scheduler.now(), Duration::from_millis(20));
  }

  #[test]
  fn cancelled_task_never_runs() {
    let scheduler = TestScheduler::new();
    let (log, task) = recorder();
    let handle = scheduler.schedule_once(Duration::from_millis(5), task("cancelled"));
    scheduler.schedule_once(Duration::from_millis(5), task("kept"));
    handle.cancel();
    assert_eq!(scheduler.pending(), 1);
    scheduler.advance_by(Duration::from_secs(1));
    assert_eq!(*log.lock(), vec!["kept"]);
  }

  #[test]
  fn periodic_reschedules_until_cancelled() {
    let scheduler = TestScheduler::new();
    let ticks = Arc::new(Mutex::new(vec![]));
    let c_ticks = ticks.clone();
    let clock = scheduler.clone();
    let handle = scheduler.schedule_periodic_at(
      Duration::from_millis(5),
      Duration::from_millis(10),
      Box::new(move |_| c_ticks.lock().push(clock.now().as_millis())),
    );
    scheduler.advance_by(Duration::from_millis(30));
    assert_eq!(*ticks.lock(), vec![5, 15, 25]);

    handle.cancel();
    scheduler.advance_by(Duration::from_millis(30));
    assert_eq!(ticks.lock().len(), 3);
    assert_eq!(scheduler.pending(), 0);
  }

  #[test]
  fn tasks_may_schedule_more_work() {
    let scheduler = TestScheduler::new();
    let (log, task) = recorder();
    let inner = scheduler.clone();
    let follow_up = task("follow-up");
    scheduler.schedule_once(
      Duration::from_millis(1),
      Box::new(move || {
        inner.schedule_once(Duration::ZERO, follow_up);
      }),
    );
    scheduler.advance_by(Duration::from_millis(1));
    assert_eq!(*log.lock(), vec!["follow-up"]);
  }

  #[test]
  fn run_due_keeps_the_clock() {
    let scheduler = TestScheduler::new();
    let (log, task) = recorder();
    scheduler.schedule_once(Duration::ZERO, task("now"));
    scheduler.run_due();
    assert_eq!(*log.lock(), vec!["now"]);
    assert_eq!(scheduler.now(), Duration::ZERO);
  }
}
