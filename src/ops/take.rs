//! `take`, `take_while` and `take_until`.
//!
//! Each of them ends the sequence early: once the limit is reached the
//! upstream is cancelled and the downstream completes, without waiting for
//! the upstream's own terminal signal.

use std::sync::Arc;

use crate::{
  error::FlowError,
  ops::cancel_upstream,
  publisher::{Flow, Publisher},
  subscriber::{BoxedSubscriber, Subscriber},
  subscription::SubscriptionRef,
};

/// What a [`TakeOp`] does with the item it is looking at.
enum Step {
  /// Emit it and keep going.
  Emit,
  /// Emit it, then complete.
  EmitLast,
  /// Complete without emitting it.
  Stop,
}

type Limit<T> = Box<dyn FnMut(&T) -> Step + Send>;

pub struct TakeOp<T> {
  source: Flow<T>,
  factory: Arc<dyn Fn() -> Limit<T> + Send + Sync>,
}

impl<T: Send + 'static> Publisher<T> for TakeOp<T> {
  fn actual_subscribe(&self, subscriber: BoxedSubscriber<T>) {
    self.source.actual_subscribe(Box::new(TakeSubscriber {
      downstream: subscriber,
      limit: (self.factory)(),
      upstream: None,
      done: false,
    }))
  }
}

struct TakeSubscriber<T> {
  downstream: BoxedSubscriber<T>,
  limit: Limit<T>,
  upstream: Option<SubscriptionRef>,
  done: bool,
}

impl<T> TakeSubscriber<T> {
  fn finish(&mut self) {
    self.done = true;
    cancel_upstream(&mut self.upstream);
    self.downstream.on_complete();
  }
}

impl<T: Send> Subscriber<T> for TakeSubscriber<T> {
  fn on_subscribe(&mut self, subscription: SubscriptionRef) {
    self.upstream = Some(subscription.clone());
    self.downstream.on_subscribe(subscription);
  }

  fn on_next(&mut self, value: T) {
    if self.done {
      return;
    }
    match (self.limit)(&value) {
      Step::Emit => self.downstream.on_next(value),
      Step::EmitLast => {
        self.downstream.on_next(value);
        if !self.done {
          self.finish();
        }
      }
      Step::Stop => self.finish(),
    }
  }

  fn on_error(&mut self, err: FlowError) {
    if !std::mem::replace(&mut self.done, true) {
      self.upstream = None;
      self.downstream.on_error(err);
    }
  }

  fn on_complete(&mut self) {
    if !std::mem::replace(&mut self.done, true) {
      self.upstream = None;
      self.downstream.on_complete();
    }
  }
}

impl<T: Send + 'static> Flow<T> {
  fn take_with<F>(&self, factory: F) -> Flow<T>
  where
    F: Fn() -> Limit<T> + Send + Sync + 'static,
  {
    Flow::from_publisher(TakeOp { source: self.clone(), factory: Arc::new(factory) })
  }

  /// Emits only the first `count` items.
  ///
  /// `take(0)` completes right away without subscribing to this flow.
  pub fn take(&self, count: usize) -> Flow<T> {
    if count == 0 {
      return Flow::empty();
    }
    self.take_with(move || {
      let mut remaining = count;
      Box::new(move |_| {
        remaining -= 1;
        if remaining == 0 { Step::EmitLast } else { Step::Emit }
      })
    })
  }

  /// Emits items while `predicate` holds; the first item failing it is
  /// dropped and completes the flow.
  pub fn take_while<P>(&self, predicate: P) -> Flow<T>
  where
    P: Fn(&T) -> bool + Send + Sync + 'static,
  {
    let predicate = Arc::new(predicate);
    self.take_with(move || {
      let predicate = predicate.clone();
      Box::new(move |v| if predicate(v) { Step::Emit } else { Step::Stop })
    })
  }

  /// Emits items up to and including the first one satisfying `predicate`.
  pub fn take_until<P>(&self, predicate: P) -> Flow<T>
  where
    P: Fn(&T) -> bool + Send + Sync + 'static,
  {
    let predicate = Arc::new(predicate);
    self.take_with(move || {
      let predicate = predicate.clone();
      Box::new(move |v| if predicate(v) { Step::EmitLast } else { Step::Emit })
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

  #[test]
  fn take_cancels_after_limit() {
    let pulled = Arc::new(AtomicUsize::new(0));
    let c_pulled = pulled.clone();
    let ts = TestSubscriber::unbounded();
    Flow::range(0, 100)
      .unwrap()
      .do_on_next(move |_| {
        c_pulled.fetch_add(1, Ordering::SeqCst);
      })
      .take(3)
      .subscribe_with(ts.clone());
    ts.assert_completed_with(&[0, 1, 2]);
    assert_eq!(pulled.load(Ordering::SeqCst), 3);
  }

  #[test]
  fn take_zero_and_short_sources() {
    let ts = TestSubscriber::unbounded();
    Flow::<i32>::never().take(0).subscribe_with(ts.clone());
    ts.assert_completed_with(&[]);

    let ts = TestSubscriber::unbounded();
    Flow::just([1, 2]).take(5).subscribe_with(ts.clone());
    ts.assert_completed_with(&[1, 2]);
  }

  #[test]
  fn take_completes_without_further_demand() {
    let ts = TestSubscriber::new(2);
    Flow::just([1, 2, 3]).take(2).subscribe_with(ts.clone());
    ts.assert_completed_with(&[1, 2]);
  }

  #[test]
  fn take_while_and_until() {
    let ts = TestSubscriber::unbounded();
    Flow::just([1, 2, 3, 4, 1]).take_while(|v| *v < 3).subscribe_with(ts.clone());
    ts.assert_completed_with(&[1, 2]);

    let ts = TestSubscriber::unbounded();
    Flow::just([1, 2, 3, 4, 1]).take_until(|v| *v == 3).subscribe_with(ts.clone());
    ts.assert_completed_with(&[1, 2, 3]);
  }

  #[test]
  fn errors_pass_through() {
    let ts = TestSubscriber::<i32>::unbounded();
    Flow::error(FlowError::msg("early")).take(2).subscribe_with(ts.clone());
    assert_eq!(ts.errors(), vec![FlowError::msg("early")]);
  }
}
