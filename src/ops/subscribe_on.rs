//! `subscribe_on`: runs the subscription to the upstream on a scheduler.
//!
//! The downstream receives its subscription right away and may request or
//! cancel before the upstream exists; the arbiter remembers both and
//! replays them once the scheduled subscribe plugs the upstream in.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::{
  error::FlowError,
  publisher::{Flow, Publisher},
  scheduler::{shared, Duration, Scheduler, SchedulerRef, TaskHandle},
  subscriber::{BoxedSubscriber, Subscriber},
  subscription::{Subscription, SubscriptionArbiter, SubscriptionRef},
};

pub struct SubscribeOnOp<T> {
  source: Flow<T>,
  scheduler: SchedulerRef,
}

impl<T: Send + 'static> Publisher<T> for SubscribeOnOp<T> {
  fn actual_subscribe(&self, mut subscriber: BoxedSubscriber<T>) {
    let subscription = Arc::new(SubscribeOnSubscription {
      arbiter: Arc::new(SubscriptionArbiter::new()),
      task: Mutex::new(None),
    });
    subscriber.on_subscribe(subscription.clone());
    let source = self.source.clone();
    let arbiter = subscription.arbiter.clone();
    let task = self.scheduler.schedule_once(
      Duration::ZERO,
      Box::new(move || {
        if arbiter.is_cancelled() {
          return;
        }
        source.actual_subscribe(Box::new(SubscribeOnSubscriber { downstream: subscriber, arbiter }));
      }),
    );
    *subscription.task.lock() = Some(task);
  }
}

struct SubscribeOnSubscription {
  arbiter: Arc<SubscriptionArbiter>,
  task: Mutex<Option<TaskHandle>>,
}

impl Subscription for SubscribeOnSubscription {
  fn request(&self, n: u64) { self.arbiter.request(n) }

  fn cancel(&self) {
    if let Some(task) = self.task.lock().take() {
      task.cancel();
    }
    self.arbiter.cancel();
  }
}

struct SubscribeOnSubscriber<T> {
  downstream: BoxedSubscriber<T>,
  arbiter: Arc<SubscriptionArbiter>,
}

impl<T: Send> Subscriber<T> for SubscribeOnSubscriber<T> {
  fn on_subscribe(&mut self, subscription: SubscriptionRef) { self.arbiter.set_upstream(subscription); }

  fn on_next(&mut self, value: T) {
    self.arbiter.produced(1);
    self.downstream.on_next(value);
  }

  fn on_error(&mut self, err: FlowError) {
    self.arbiter.clear_upstream();
    self.downstream.on_error(err);
  }

  fn on_complete(&mut self) {
    self.arbiter.clear_upstream();
    self.downstream.on_complete();
  }
}

impl<T: Send + 'static> Flow<T> {
  /// Subscribes to this flow from a task on `scheduler` instead of the
  /// caller's thread.
  pub fn subscribe_on<S>(&self, scheduler: S) -> Flow<T>
  where
    S: Scheduler + 'static,
  {
    Flow::from_publisher(SubscribeOnOp { source: self.clone(), scheduler: shared(scheduler) })
  }
}

#[cfg(test)]
mod tests {
  use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
  };

  use crate::prelude::*;

  #[test]
  fn upstream_subscribed_when_task_runs() {
    let scheduler = TestScheduler::new();
    let subscribed = Arc::new(AtomicUsize::new(0));
    let c_subscribed = subscribed.clone();
    let ts = TestSubscriber::new(2);
    Flow::defer(move || {
      c_subscribed.fetch_add(1, Ordering::SeqCst);
      Flow::just([1, 2, 3])
    })
    .subscribe_on(scheduler.clone())
    .subscribe_with(ts.clone());
    assert!(ts.is_subscribed());
    assert_eq!(subscribed.load(Ordering::SeqCst), 0);

    scheduler.run_due();
    assert_eq!(subscribed.load(Ordering::SeqCst), 1);
    assert_eq!(ts.values(), vec![1, 2]);
    ts.request(1);
    ts.assert_completed_with(&[1, 2, 3]);
  }

  #[test]
  fn cancel_before_task_skips_subscribe() {
    let scheduler = TestScheduler::new();
    let subscribed = Arc::new(AtomicUsize::new(0));
    let c_subscribed = subscribed.clone();
    let ts = TestSubscriber::unbounded();
    let handle = Flow::defer(move || {
      c_subscribed.fetch_add(1, Ordering::SeqCst);
      Flow::just([1])
    })
    .subscribe_on(scheduler.clone())
    .subscribe_with(ts.clone());
    handle.cancel();
    scheduler.run_due();
    assert_eq!(subscribed.load(Ordering::SeqCst), 0);
    assert_eq!(scheduler.pending(), 0);
  }

  #[cfg(feature = "thread-pool-scheduler")]
  #[test]
  fn subscribes_on_pool_thread() {
    let caller = std::thread::current().id();
    let seen = Flow::just([0])
      .map(move |_| std::thread::current().id() != caller)
      .subscribe_on(ThreadPoolScheduler::new().unwrap())
      .blocking_first()
      .unwrap();
    assert!(seen);
  }
}
