//! `observe_on`: moves delivery onto a scheduler.
//!
//! The upstream runs wherever it runs; its signals are queued and a drain
//! task on the scheduler hands them to the downstream, honouring the
//! downstream's demand. The upstream is prefetched by
//! [`DEFAULT_PREFETCH`](crate::ops::DEFAULT_PREFETCH) items and replenished
//! as the queue is consumed. At most one drain task is in flight, so the
//! downstream never sees two signals at once.

use std::{
  collections::VecDeque,
  sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
  },
};

use parking_lot::Mutex;

use crate::{
  drain::{Demand, DownstreamCell, Wip},
  error::FlowError,
  ops::DEFAULT_PREFETCH,
  publisher::{Flow, Publisher},
  scheduler::{shared, Duration, Scheduler, SchedulerRef},
  subscriber::{BoxedSubscriber, Subscriber},
  subscription::{Subscription, SubscriptionRef},
};

pub struct ObserveOnOp<T> {
  source: Flow<T>,
  scheduler: SchedulerRef,
  prefetch: usize,
}

impl<T: Send + 'static> Publisher<T> for ObserveOnOp<T> {
  fn actual_subscribe(&self, subscriber: BoxedSubscriber<T>) {
    let state = Arc::new(ObserveOnState {
      queue: Mutex::new(Queue { items: VecDeque::new(), terminal: None, consumed: 0 }),
      downstream: DownstreamCell::new(subscriber),
      upstream: Mutex::new(None),
      scheduler: self.scheduler.clone(),
      prefetch: self.prefetch,
      demand: Demand::default(),
      wip: Wip::default(),
      cancelled: AtomicBool::new(false),
    });
    self.source.actual_subscribe(Box::new(ObserveOnSubscriber { state }));
  }
}

struct Queue<T> {
  items: VecDeque<T>,
  terminal: Option<Option<FlowError>>,
  consumed: usize,
}

struct ObserveOnState<T> {
  queue: Mutex<Queue<T>>,
  downstream: DownstreamCell<T>,
  upstream: Mutex<Option<SubscriptionRef>>,
  scheduler: SchedulerRef,
  prefetch: usize,
  demand: Demand,
  wip: Wip,
  cancelled: AtomicBool,
}

enum Step<T> {
  Next(T),
  Error(FlowError),
  Complete,
  Idle,
}

impl<T: Send + 'static> ObserveOnState<T> {
  fn schedule(self: &Arc<Self>) {
    if self.wip.enter() {
      let state = self.clone();
      self
        .scheduler
        .schedule_once(Duration::ZERO, Box::new(move || state.wip.resume(|| state.drain())));
    }
  }

  fn drain(&self) {
    loop {
      if self.cancelled.load(Ordering::Acquire) {
        let mut queue = self.queue.lock();
        queue.items.clear();
        queue.terminal = None;
        drop(queue);
        self.downstream.release();
        return;
      }
      let (step, replenish) = self.next_step();
      if let Some(n) = replenish {
        let upstream = self.upstream.lock().clone();
        if let Some(upstream) = upstream {
          upstream.request(n);
        }
      }
      match step {
        Step::Next(value) => {
          self.demand.produced(1);
          self.downstream.next(value);
        }
        Step::Error(err) => {
          self.downstream.error(err);
          return;
        }
        Step::Complete => {
          self.downstream.complete();
          return;
        }
        Step::Idle => return,
      }
    }
  }

  fn next_step(&self) -> (Step<T>, Option<u64>) {
    let mut queue = self.queue.lock();
    // an error cuts ahead of items still queued
    if matches!(queue.terminal, Some(Some(_))) {
      queue.items.clear();
      if let Some(Some(err)) = queue.terminal.take() {
        return (Step::Error(err), None);
      }
    }
    if queue.items.is_empty() {
      return match queue.terminal.take() {
        Some(_) => (Step::Complete, None),
        None => (Step::Idle, None),
      };
    }
    if self.demand.get() == 0 {
      return (Step::Idle, None);
    }
    let Some(value) = queue.items.pop_front() else { return (Step::Idle, None) };
    queue.consumed += 1;
    let limit = self.prefetch - (self.prefetch >> 2);
    let replenish = if queue.consumed >= limit && queue.terminal.is_none() {
      Some(std::mem::take(&mut queue.consumed) as u64)
    } else {
      None
    };
    (Step::Next(value), replenish)
  }
}

/// What the downstream holds: demand and cancellation both end in a drain
/// task on the scheduler.
struct ObserveOnSubscription<T>(Arc<ObserveOnState<T>>);

impl<T: Send + 'static> Subscription for ObserveOnSubscription<T> {
  fn request(&self, n: u64) {
    if n > 0 {
      self.0.demand.add(n);
      self.0.schedule();
    }
  }

  fn cancel(&self) {
    if self.0.cancelled.swap(true, Ordering::AcqRel) {
      return;
    }
    let upstream = self.0.upstream.lock().take();
    if let Some(upstream) = upstream {
      upstream.cancel();
    }
    self.0.schedule();
  }
}

struct ObserveOnSubscriber<T> {
  state: Arc<ObserveOnState<T>>,
}

impl<T: Send + 'static> Subscriber<T> for ObserveOnSubscriber<T> {
  fn on_subscribe(&mut self, subscription: SubscriptionRef) {
    *self.state.upstream.lock() = Some(subscription.clone());
    self.state.downstream.on_subscribe(Arc::new(ObserveOnSubscription(self.state.clone())));
    if self.state.cancelled.load(Ordering::Acquire) {
      return;
    }
    subscription.request(self.state.prefetch as u64);
  }

  fn on_next(&mut self, value: T) {
    self.state.queue.lock().items.push_back(value);
    self.state.schedule();
  }

  fn on_error(&mut self, err: FlowError) {
    self.state.queue.lock().terminal = Some(Some(err));
    self.state.upstream.lock().take();
    self.state.schedule();
  }

  fn on_complete(&mut self) {
    self.state.queue.lock().terminal = Some(None);
    self.state.upstream.lock().take();
    self.state.schedule();
  }
}

impl<T: Send + 'static> Flow<T> {
  /// Delivers this flow's signals from tasks run on `scheduler`.
  ///
  /// ```rust
  /// use rxflow::prelude::*;
  ///
  /// let scheduler = TestScheduler::new();
  /// let ts = TestSubscriber::unbounded();
  /// Flow::just([1, 2, 3]).observe_on(scheduler.clone()).subscribe_with(ts.clone());
  /// assert!(ts.values().is_empty());
  ///
  /// scheduler.run_due();
  /// ts.assert_completed_with(&[1, 2, 3]);
  /// ```
  pub fn observe_on<S>(&self, scheduler: S) -> Flow<T>
  where
    S: Scheduler + 'static,
  {
    Flow::from_publisher(ObserveOnOp {
      source: self.clone(),
      scheduler: shared(scheduler),
      prefetch: DEFAULT_PREFETCH,
    })
  }
}
