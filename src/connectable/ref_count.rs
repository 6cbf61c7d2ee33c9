//! `ref_count` and `auto_connect`: connect a [`ConnectableFlow`]
//! automatically from its subscriber count.
//!
//! `ref_count` connects when the first subscriber arrives and disconnects
//! when the last one leaves, by cancelling or by receiving the terminal
//! signal. A subscriber arriving after that starts a fresh connection, so
//! the upstream runs again. `auto_connect(n)` connects once the `n`-th
//! subscriber arrived and never disconnects.

use std::sync::{
  atomic::{AtomicBool, AtomicUsize, Ordering},
  Arc,
};

use parking_lot::Mutex;

use super::{ConnectableFlow, Connection};
use crate::{
  error::FlowError,
  publisher::{Flow, Publisher},
  subscriber::{BoxedSubscriber, Subscriber},
  subscription::{Subscription, SubscriptionRef},
};

struct Counter {
  subscribers: usize,
  connection: Option<Connection>,
}

struct RefCountShared {
  counter: Mutex<Counter>,
}

impl RefCountShared {
  fn leave(&self) {
    let connection = {
      let mut counter = self.counter.lock();
      counter.subscribers -= 1;
      if counter.subscribers == 0 { counter.connection.take() } else { None }
    };
    if let Some(connection) = connection {
      connection.disconnect();
    }
  }
}

pub struct RefCountOp<T> {
  connectable: ConnectableFlow<T>,
  shared: Arc<RefCountShared>,
}

impl<T: Send + 'static> Publisher<T> for RefCountOp<T> {
  fn actual_subscribe(&self, subscriber: BoxedSubscriber<T>) {
    let first = {
      let mut counter = self.shared.counter.lock();
      counter.subscribers += 1;
      counter.subscribers == 1
    };
    self.connectable.actual_subscribe(Box::new(RefCountSubscriber {
      downstream: subscriber,
      shared: self.shared.clone(),
      left: Arc::new(AtomicBool::new(false)),
    }));
    if first {
      // connect outside the lock: a synchronous upstream may finish, and
      // every subscriber leave, before `connect` returns
      let connection = self.connectable.connect();
      let mut counter = self.shared.counter.lock();
      if counter.subscribers == 0 {
        drop(counter);
        connection.disconnect();
      } else {
        counter.connection = Some(connection);
      }
    }
  }
}

struct RefCountSubscriber<T> {
  downstream: BoxedSubscriber<T>,
  shared: Arc<RefCountShared>,
  left: Arc<AtomicBool>,
}

impl<T> RefCountSubscriber<T> {
  fn leave(&self) {
    if !self.left.swap(true, Ordering::AcqRel) {
      self.shared.leave();
    }
  }
}

impl<T: Send> Subscriber<T> for RefCountSubscriber<T> {
  fn on_subscribe(&mut self, subscription: SubscriptionRef) {
    self.downstream.on_subscribe(Arc::new(RefCountSubscription {
      upstream: subscription,
      shared: self.shared.clone(),
      left: self.left.clone(),
    }));
  }

  fn on_next(&mut self, value: T) { self.downstream.on_next(value) }

  fn on_error(&mut self, err: FlowError) {
    self.downstream.on_error(err);
    self.leave();
  }

  fn on_complete(&mut self) {
    self.downstream.on_complete();
    self.leave();
  }
}

struct RefCountSubscription {
  upstream: SubscriptionRef,
  shared: Arc<RefCountShared>,
  left: Arc<AtomicBool>,
}

impl Subscription for RefCountSubscription {
  fn request(&self, n: u64) { self.upstream.request(n) }

  fn cancel(&self) {
    self.upstream.cancel();
    if !self.left.swap(true, Ordering::AcqRel) {
      self.shared.leave();
    }
  }
}

pub struct AutoConnectOp<T> {
  connectable: ConnectableFlow<T>,
  threshold: usize,
  arrived: AtomicUsize,
}

impl<T: Send + 'static> Publisher<T> for AutoConnectOp<T> {
  fn actual_subscribe(&self, subscriber: BoxedSubscriber<T>) {
    self.connectable.actual_subscribe(subscriber);
    if self.arrived.fetch_add(1, Ordering::AcqRel) + 1 == self.threshold {
      self.connectable.connect();
    }
  }
}

impl<T: Send + 'static> ConnectableFlow<T> {
  /// A flow that stays connected while it has subscribers.
  pub fn ref_count(&self) -> Flow<T> {
    Flow::from_publisher(RefCountOp {
      connectable: self.clone(),
      shared: Arc::new(RefCountShared {
        counter: Mutex::new(Counter { subscribers: 0, connection: None }),
      }),
    })
  }

  /// A flow that connects once `subscribers` subscriptions arrived;
  /// `auto_connect(0)` connects right away.
  pub fn auto_connect(&self, subscribers: usize) -> Flow<T> {
    if subscribers == 0 {
      self.connect();
    }
    Flow::from_publisher(AutoConnectOp {
      connectable: self.clone(),
      threshold: subscribers,
      arrived: AtomicUsize::new(0),
    })
  }
}

#[cfg(test)]
mod tests {
  use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
  };

  use crate::prelude::*;

  fn counted_interval(scheduler: &TestScheduler, subscriptions: &Arc<AtomicUsize>) -> Flow<u64> {
    let scheduler = scheduler.clone();
    let subscriptions = subscriptions.clone();
    Flow::defer(move || {
      subscriptions.fetch_add(1, Ordering::SeqCst);
      Flow::interval(Duration::from_millis(10), scheduler.clone()).unwrap()
    })
  }

  #[test]
  fn connects_on_first_and_disconnects_on_last() {
    let scheduler = TestScheduler::new();
    let subscriptions = Arc::new(AtomicUsize::new(0));
    let shared = counted_interval(&scheduler, &subscriptions).share();

    let a = TestSubscriber::unbounded();
    let b = TestSubscriber::unbounded();
    let handle_a = shared.subscribe_with(a.clone());
    scheduler.advance_by(Duration::from_millis(10));
    let handle_b = shared.subscribe_with(b.clone());
    scheduler.advance_by(Duration::from_millis(10));
    assert_eq!(subscriptions.load(Ordering::SeqCst), 1);
    assert_eq!(a.values(), vec![0, 1]);
    assert_eq!(b.values(), vec![1]);

    handle_a.cancel();
    handle_b.cancel();
    assert_eq!(scheduler.pending(), 0);

    let c = TestSubscriber::unbounded();
    shared.subscribe_with(c.clone());
    scheduler.advance_by(Duration::from_millis(10));
    assert_eq!(subscriptions.load(Ordering::SeqCst), 2);
    assert_eq!(c.values(), vec![0]);
  }

  #[test]
  fn completed_source_reconnects_afresh() {
    let subscriptions = Arc::new(AtomicUsize::new(0));
    let c_subscriptions = subscriptions.clone();
    let shared = Flow::defer(move || {
      c_subscriptions.fetch_add(1, Ordering::SeqCst);
      Flow::just([1, 2])
    })
    .share();
    for _ in 0..2 {
      let ts = TestSubscriber::unbounded();
      shared.subscribe_with(ts.clone());
      ts.assert_completed_with(&[1, 2]);
    }
    assert_eq!(subscriptions.load(Ordering::SeqCst), 2);
  }

  #[test]
  fn auto_connect_waits_for_threshold() {
    let auto = Flow::just([1, 2, 3]).publish().auto_connect(2);
    let a = TestSubscriber::unbounded();
    let b = TestSubscriber::unbounded();
    auto.subscribe_with(a.clone());
    assert!(a.values().is_empty());
    auto.subscribe_with(b.clone());
    a.assert_completed_with(&[1, 2, 3]);
    b.assert_completed_with(&[1, 2, 3]);
  }
}
