//! Operators that drop items: `filter`, `filter_map`, `distinct`,
//! `distinct_until_changed`, `skip` and `throttle_first`.
//!
//! The downstream counted every dropped item as part of its demand, so each
//! drop is answered with a `request(1)` upstream. Without it a pipeline
//! with bounded demand would stall.

use std::{collections::HashSet, hash::Hash, sync::Arc};

use crate::{
  error::FlowError,
  publisher::{Flow, Publisher},
  scheduler::{shared, Duration, Scheduler},
  subscriber::{BoxedSubscriber, Subscriber},
  subscription::SubscriptionRef,
};

/// Per-subscription selector of a [`FilterMapOp`]; `None` drops the item.
pub type Selector<T, R> = Box<dyn FnMut(T) -> Option<R> + Send>;

pub struct FilterMapOp<T, R> {
  source: Flow<T>,
  factory: Arc<dyn Fn() -> Selector<T, R> + Send + Sync>,
}

impl<T, R> Publisher<R> for FilterMapOp<T, R>
where
  T: Send + 'static,
  R: Send + 'static,
{
  fn actual_subscribe(&self, subscriber: BoxedSubscriber<R>) {
    self.source.actual_subscribe(Box::new(FilterMapSubscriber {
      downstream: subscriber,
      selector: (self.factory)(),
      upstream: None,
    }))
  }
}

struct FilterMapSubscriber<T, R> {
  downstream: BoxedSubscriber<R>,
  selector: Selector<T, R>,
  upstream: Option<SubscriptionRef>,
}

impl<T: Send, R> Subscriber<T> for FilterMapSubscriber<T, R> {
  fn on_subscribe(&mut self, subscription: SubscriptionRef) {
    self.upstream = Some(subscription.clone());
    self.downstream.on_subscribe(subscription);
  }

  fn on_next(&mut self, value: T) {
    match (self.selector)(value) {
      Some(selected) => self.downstream.on_next(selected),
      None => {
        if let Some(upstream) = &self.upstream {
          upstream.request(1);
        }
      }
    }
  }

  fn on_error(&mut self, err: FlowError) {
    self.upstream = None;
    self.downstream.on_error(err);
  }

  fn on_complete(&mut self) {
    self.upstream = None;
    self.downstream.on_complete();
  }
}

impl<T: Send + 'static> Flow<T> {
  /// Builds a [`FilterMapOp`] from a factory creating one selector per
  /// subscription.
  pub fn filter_map_with_state<R, F>(&self, factory: F) -> Flow<R>
  where
    R: Send + 'static,
    F: Fn() -> Selector<T, R> + Send + Sync + 'static,
  {
    Flow::from_publisher(FilterMapOp { source: self.clone(), factory: Arc::new(factory) })
  }

  /// Keeps the items satisfying `predicate`.
  pub fn filter<P>(&self, predicate: P) -> Flow<T>
  where
    P: Fn(&T) -> bool + Send + Sync + 'static,
  {
    let predicate = Arc::new(predicate);
    self.filter_map_with_state(move || {
      let predicate = predicate.clone();
      Box::new(move |v| predicate(&v).then_some(v))
    })
  }

  /// Maps and filters in one step; `None` drops the item.
  pub fn filter_map<R, F>(&self, f: F) -> Flow<R>
  where
    R: Send + 'static,
    F: Fn(T) -> Option<R> + Send + Sync + 'static,
  {
    let f = Arc::new(f);
    self.filter_map_with_state(move || {
      let f = f.clone();
      Box::new(move |v| f(v))
    })
  }

  /// Drops items already seen in this subscription.
  pub fn distinct(&self) -> Flow<T>
  where
    T: Eq + Hash + Clone,
  {
    self.filter_map_with_state(|| {
      let mut seen = HashSet::new();
      Box::new(move |v: T| seen.insert(v.clone()).then_some(v))
    })
  }

  /// Drops items equal to their predecessor.
  pub fn distinct_until_changed(&self) -> Flow<T>
  where
    T: PartialEq + Clone,
  {
    self.filter_map_with_state(|| {
      let mut last: Option<T> = None;
      Box::new(move |v: T| {
        if last.as_ref() == Some(&v) {
          return None;
        }
        last = Some(v.clone());
        Some(v)
      })
    })
  }

  /// Drops the first `count` items.
  pub fn skip(&self, count: usize) -> Flow<T> {
    self.filter_map_with_state(move || {
      let mut remaining = count;
      Box::new(move |v| {
        if remaining == 0 {
          return Some(v);
        }
        remaining -= 1;
        None
      })
    })
  }

  /// Emits an item, then drops everything arriving within `window` of it
  /// according to `scheduler`'s clock.
  pub fn throttle_first<S>(&self, window: Duration, scheduler: S) -> Flow<T>
  where
    S: Scheduler + 'static,
  {
    let scheduler = shared(scheduler);
    self.filter_map_with_state(move || {
      let scheduler = scheduler.clone();
      let mut last: Option<Duration> = None;
      Box::new(move |v| {
        let now = scheduler.now();
        match last {
          Some(at) if now.saturating_sub(at) < window => None,
          _ => {
            last = Some(now);
            Some(v)
          }
        }
      })
    })
  }
}

#[cfg(test)]
mod tests {
  use std::sync::atomic::{AtomicUsize, Ordering};

  use crate::prelude::*;

  #[test]
  fn filter_keeps_matching() {
    let ts = TestSubscriber::unbounded();
    Flow::just([1, 2, 3, 4]).filter(|i| *i > 1).subscribe_with(ts.clone());
    ts.assert_completed_with(&[2, 3, 4]);
  }

  #[test]
  fn filter_rerequests_dropped_items() {
    let ts = TestSubscriber::new(2);
    Flow::range(0, 100).unwrap().filter(|v| v % 10 == 0).subscribe_with(ts.clone());
    assert_eq!(ts.values(), vec![0, 10]);
    ts.request(3);
    assert_eq!(ts.values(), vec![0, 10, 20, 30, 40]);
    assert!(ts.violations().is_empty());
  }

  #[test]
  fn predicate_never_sees_more_than_needed() {
    let calls = std::sync::Arc::new(AtomicUsize::new(0));
    let c_calls = calls.clone();
    let ts = TestSubscriber::new(1);
    Flow::range(0, 100)
      .unwrap()
      .filter(move |v| {
        c_calls.fetch_add(1, Ordering::SeqCst);
        *v >= 5
      })
      .subscribe_with(ts.clone());
    assert_eq!(ts.values(), vec![5]);
    assert_eq!(calls.load(Ordering::SeqCst), 6);
  }

  #[test]
  fn filter_map_parses() {
    let ts = TestSubscriber::unbounded();
    Flow::just(["1", "x", "3"]).filter_map(|s| s.parse::<i32>().ok()).subscribe_with(ts.clone());
    ts.assert_completed_with(&[1, 3]);
  }

  #[test]
  fn distinct_variants() {
    let ts = TestSubscriber::unbounded();
    Flow::just([1, 2, 1, 3, 2]).distinct().subscribe_with(ts.clone());
    ts.assert_completed_with(&[1, 2, 3]);

    let ts = TestSubscriber::unbounded();
    Flow::just([1, 1, 2, 2, 1]).distinct_until_changed().subscribe_with(ts.clone());
    ts.assert_completed_with(&[1, 2, 1]);
  }

  #[test]
  fn skip_first_items() {
    let ts = TestSubscriber::unbounded();
    Flow::just([1, 2, 3, 4]).skip(2).subscribe_with(ts.clone());
    ts.assert_completed_with(&[3, 4]);

    let ts = TestSubscriber::unbounded();
    Flow::just([1, 2]).skip(5).subscribe_with(ts.clone());
    ts.assert_completed_with(&[]);
  }

  #[test]
  fn throttle_first_on_virtual_time() {
    let scheduler = TestScheduler::new();
    let ts = TestSubscriber::unbounded();
    Flow::interval(Duration::from_millis(10), scheduler.clone())
      .unwrap()
      .throttle_first(Duration::from_millis(25), scheduler.clone())
      .subscribe_with(ts.clone());
    scheduler.advance_by(Duration::from_millis(100));
    // ticks at 10..=100; windows open at 10, 40, 70, 100
    assert_eq!(ts.values(), vec![0, 3, 6, 9]);
  }
}
