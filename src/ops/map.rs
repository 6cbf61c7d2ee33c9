//! `map`, `try_map`, `scan` and `scan_with`.
//!
//! All four are built on [`MapOp`], which creates its mapping closure per
//! subscription, so stateful mappers such as `scan` never share their
//! accumulator between subscribers.

use std::sync::Arc;

use crate::{
  error::{FlowError, Result},
  ops::cancel_upstream,
  publisher::{Flow, Publisher},
  subscriber::{BoxedSubscriber, Subscriber},
  subscription::SubscriptionRef,
};

/// Per-subscription mapping closure of a [`MapOp`].
pub type Mapper<T, R> = Box<dyn FnMut(T) -> Result<R> + Send>;

/// One-to-one transformation with a fallible, per-subscription mapper.
pub struct MapOp<T, R> {
  source: Flow<T>,
  factory: Arc<dyn Fn() -> Mapper<T, R> + Send + Sync>,
}

impl<T, R> Publisher<R> for MapOp<T, R>
where
  T: Send + 'static,
  R: Send + 'static,
{
  fn actual_subscribe(&self, subscriber: BoxedSubscriber<R>) {
    self.source.actual_subscribe(Box::new(MapSubscriber {
      downstream: subscriber,
      mapper: (self.factory)(),
      upstream: None,
      done: false,
    }))
  }
}

struct MapSubscriber<T, R> {
  downstream: BoxedSubscriber<R>,
  mapper: Mapper<T, R>,
  upstream: Option<SubscriptionRef>,
  done: bool,
}

impl<T: Send, R> Subscriber<T> for MapSubscriber<T, R> {
  fn on_subscribe(&mut self, subscription: SubscriptionRef) {
    self.upstream = Some(subscription.clone());
    self.downstream.on_subscribe(subscription);
  }

  fn on_next(&mut self, value: T) {
    if self.done {
      return;
    }
    match (self.mapper)(value) {
      Ok(mapped) => self.downstream.on_next(mapped),
      Err(err) => {
        self.done = true;
        cancel_upstream(&mut self.upstream);
        self.downstream.on_error(err);
      }
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
  /// Builds a [`MapOp`] from a factory creating one mapper per subscription.
  pub fn map_with_state<R, F>(&self, factory: F) -> Flow<R>
  where
    R: Send + 'static,
    F: Fn() -> Mapper<T, R> + Send + Sync + 'static,
  {
    Flow::from_publisher(MapOp { source: self.clone(), factory: Arc::new(factory) })
  }

  /// Applies `f` to every item.
  ///
  /// ```rust
  /// use rxflow::prelude::*;
  ///
  /// let ts = TestSubscriber::unbounded();
  /// Flow::just([1, 2]).map(|i| format!("ws{i}")).subscribe_with(ts.clone());
  /// ts.assert_completed_with(&["ws1".to_string(), "ws2".to_string()]);
  /// ```
  pub fn map<R, F>(&self, f: F) -> Flow<R>
  where
    R: Send + 'static,
    F: Fn(T) -> R + Send + Sync + 'static,
  {
    let f = Arc::new(f);
    self.map_with_state(move || {
      let f = f.clone();
      Box::new(move |v| Ok(f(v)))
    })
  }

  /// Applies a fallible `f`; an `Err` cancels the upstream and terminates
  /// the flow with that error.
  pub fn try_map<R, F>(&self, f: F) -> Flow<R>
  where
    R: Send + 'static,
    F: Fn(T) -> Result<R> + Send + Sync + 'static,
  {
    let f = Arc::new(f);
    self.map_with_state(move || {
      let f = f.clone();
      Box::new(move |v| f(v))
    })
  }

  /// Running fold: the first item passes unmodified, every later item is
  /// combined with the previous emission.
  pub fn scan<F>(&self, f: F) -> Flow<T>
  where
    T: Clone,
    F: Fn(T, T) -> T + Send + Sync + 'static,
  {
    let f = Arc::new(f);
    self.map_with_state(move || {
      let f = f.clone();
      let mut acc: Option<T> = None;
      Box::new(move |v| {
        let next = match acc.take() {
          Some(prev) => f(prev, v),
          None => v,
        };
        acc = Some(next.clone());
        Ok(next)
      })
    })
  }

  /// Running fold from `seed`; the seed itself is emitted first.
  pub fn scan_with<R, F>(&self, seed: R, f: F) -> Flow<R>
  where
    R: Clone + Send + Sync + 'static,
    F: Fn(R, T) -> R + Send + Sync + 'static,
  {
    let f = Arc::new(f);
    let initial = seed.clone();
    self
      .map_with_state(move || {
        let f = f.clone();
        let mut acc = initial.clone();
        Box::new(move |v| {
          acc = f(acc.clone(), v);
          Ok(acc.clone())
        })
      })
      .start_with(seed)
  }
}
