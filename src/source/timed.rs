use std::sync::{
  atomic::{AtomicBool, AtomicU64, Ordering},
  Arc,
};

use parking_lot::Mutex;

use crate::{
  drain::{Demand, DownstreamCell},
  error::{FlowError, Result},
  publisher::{Flow, Publisher},
  scheduler::{shared, Duration, Scheduler, SchedulerRef, TaskHandle},
  subscriber::BoxedSubscriber,
  subscription::Subscription,
};

#[derive(Clone, Copy)]
enum Cadence {
  Once { delay: Duration },
  Periodic { initial: Duration, period: Duration },
}

/// Scheduler-driven source behind `interval`, `interval_with_delay` and
/// `timer`.
///
/// Time cannot be slowed down, so a tick that finds no outstanding demand
/// terminates the subscription with `MissingDemand` instead of queueing.
pub struct TimedPublisher {
  cadence: Cadence,
  scheduler: SchedulerRef,
}

struct TimedState {
  downstream: DownstreamCell<u64>,
  demand: Demand,
  cancelled: AtomicBool,
  ticks: AtomicU64,
  task: Mutex<Option<TaskHandle>>,
}

impl TimedState {
  /// Emits the next tick; returns `false` once the subscription is over.
  fn tick(&self, task: &TaskHandle) -> bool {
    if self.cancelled.load(Ordering::Acquire) {
      task.cancel();
      return false;
    }
    let tick = self.ticks.fetch_add(1, Ordering::AcqRel);
    if self.demand.get() == 0 {
      self.cancelled.store(true, Ordering::Release);
      task.cancel();
      self.downstream.error(FlowError::MissingDemand(format!(
        "could not emit tick {tick} due to lack of requests"
      )));
      return false;
    }
    self.demand.produced(1);
    self.downstream.next(tick);
    true
  }
}

impl Subscription for TimedState {
  fn request(&self, n: u64) {
    if n > 0 {
      self.demand.add(n);
    }
  }

  fn cancel(&self) {
    if self.cancelled.swap(true, Ordering::AcqRel) {
      return;
    }
    let task = self.task.lock().take();
    if let Some(task) = task {
      task.cancel();
    }
    self.downstream.release();
  }
}

impl Publisher<u64> for TimedPublisher {
  fn actual_subscribe(&self, subscriber: BoxedSubscriber<u64>) {
    tracing::trace!("timed source subscribed");
    let state = Arc::new(TimedState {
      downstream: DownstreamCell::new(subscriber),
      demand: Demand::default(),
      cancelled: AtomicBool::new(false),
      ticks: AtomicU64::new(0),
      task: Mutex::new(None),
    });
    state.downstream.on_subscribe(state.clone());
    if state.cancelled.load(Ordering::Acquire) {
      return;
    }

    let ticking = state.clone();
    let handle = match self.cadence {
      Cadence::Once { delay } => self.scheduler.schedule_once(
        delay,
        Box::new(move || {
          let task = TaskHandle::new();
          if ticking.tick(&task) {
            ticking.downstream.complete();
          }
        }),
      ),
      Cadence::Periodic { initial, period } => self.scheduler.schedule_periodic_at(
        initial,
        period,
        Box::new(move |task| {
          ticking.tick(task);
        }),
      ),
    };
    if state.cancelled.load(Ordering::Acquire) {
      handle.cancel();
    } else {
      *state.task.lock() = Some(handle);
    }
  }
}

fn check_period(period: Duration) -> Result<()> {
  if period.is_zero() {
    return Err(FlowError::illegal_argument("period must be greater than zero"));
  }
  Ok(())
}

impl Flow<u64> {
  /// Emits `0, 1, 2, ...`, one tick every `period`, starting one period
  /// after subscription.
  pub fn interval<S>(period: Duration, scheduler: S) -> Result<Self>
  where
    S: Scheduler + 'static,
  {
    Self::interval_with_delay(period, period, scheduler)
  }

  /// Like [`Flow::interval`], but the first tick fires after `delay`.
  pub fn interval_with_delay<S>(delay: Duration, period: Duration, scheduler: S) -> Result<Self>
  where
    S: Scheduler + 'static,
  {
    check_period(period)?;
    Ok(Self::from_publisher(TimedPublisher {
      cadence: Cadence::Periodic { initial: delay, period },
      scheduler: shared(scheduler),
    }))
  }

  /// Emits a single `0` after `delay`, then completes.
  pub fn timer<S>(delay: Duration, scheduler: S) -> Self
  where
    S: Scheduler + 'static,
  {
    Self::from_publisher(TimedPublisher {
      cadence: Cadence::Once { delay },
      scheduler: shared(scheduler),
    })
  }
}
