//! `skip_last`: holds back the trailing items of a sequence.

use std::{
  collections::VecDeque,
  sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
  },
};

use crate::{
  error::FlowError,
  publisher::{Flow, Publisher},
  subscriber::{BoxedSubscriber, Subscriber},
  subscription::{Subscription, SubscriptionRef},
};

pub struct SkipLastOp<T> {
  source: Flow<T>,
  count: usize,
}

impl<T: Send + 'static> Publisher<T> for SkipLastOp<T> {
  fn actual_subscribe(&self, subscriber: BoxedSubscriber<T>) {
    self.source.actual_subscribe(Box::new(SkipLastSubscriber {
      downstream: subscriber,
      count: self.count,
      held: VecDeque::with_capacity(self.count.min(1024)),
    }))
  }
}

struct SkipLastSubscriber<T> {
  downstream: BoxedSubscriber<T>,
  count: usize,
  held: VecDeque<T>,
}

/// Asks the upstream for `count` extra items with the first request, so
/// every later item pushes exactly one held item out.
struct SkipLastSubscription {
  upstream: SubscriptionRef,
  extra: u64,
  primed: AtomicBool,
}

impl Subscription for SkipLastSubscription {
  fn request(&self, n: u64) {
    if n > 0 && !self.primed.swap(true, Ordering::AcqRel) {
      self.upstream.request(n.saturating_add(self.extra));
    } else {
      self.upstream.request(n);
    }
  }

  fn cancel(&self) { self.upstream.cancel(); }
}

impl<T: Send> Subscriber<T> for SkipLastSubscriber<T> {
  fn on_subscribe(&mut self, subscription: SubscriptionRef) {
    self.downstream.on_subscribe(Arc::new(SkipLastSubscription {
      upstream: subscription,
      extra: self.count as u64,
      primed: AtomicBool::new(false),
    }));
  }

  fn on_next(&mut self, value: T) {
    self.held.push_back(value);
    if self.held.len() > self.count {
      if let Some(oldest) = self.held.pop_front() {
        self.downstream.on_next(oldest);
      }
    }
  }

  fn on_error(&mut self, err: FlowError) {
    self.held.clear();
    self.downstream.on_error(err);
  }

  fn on_complete(&mut self) {
    self.held.clear();
    self.downstream.on_complete();
  }
}

impl<T: Send + 'static> Flow<T> {
  /// Drops the last `count` items; they are only known to be last once the
  /// upstream completes.
  pub fn skip_last(&self, count: usize) -> Flow<T> {
    if count == 0 {
      return self.clone();
    }
    Flow::from_publisher(SkipLastOp { source: self.clone(), count })
  }
}

#[cfg(test)]
mod tests {
  use crate::prelude::*;

  #[test]
  fn drops_trailing_items() {
    let ts = TestSubscriber::unbounded();
    Flow::range(0, 6).unwrap().skip_last(2).subscribe_with(ts.clone());
    ts.assert_completed_with(&[0, 1, 2, 3]);

    let ts = TestSubscriber::unbounded();
    Flow::just([1, 2]).skip_last(5).subscribe_with(ts.clone());
    ts.assert_completed_with(&[]);
  }

  #[test]
  fn first_request_primes_the_window() {
    let ts = TestSubscriber::new(1);
    Flow::range(0, 6).unwrap().skip_last(2).subscribe_with(ts.clone());
    assert_eq!(ts.values(), vec![0]);
    ts.request(2);
    assert_eq!(ts.values(), vec![0, 1, 2]);
    ts.request(10);
    ts.assert_completed_with(&[0, 1, 2, 3]);
  }
}
