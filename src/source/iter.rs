use std::{
  iter::Peekable,
  sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
  },
};

use parking_lot::Mutex;

use crate::{
  drain::{Demand, DownstreamCell, Wip},
  error::{FlowError, Result},
  publisher::{Flow, Publisher},
  subscriber::BoxedSubscriber,
  subscription::Subscription,
};

/// Emits the items of a cloneable iterable, one per requested unit.
///
/// Each subscription iterates a fresh clone of the iterable.
#[derive(Clone, Debug)]
pub struct IterPublisher<I> {
  source: I,
}

impl<I> IterPublisher<I> {
  pub fn new(source: I) -> Self { Self { source } }
}

impl<I> Publisher<I::Item> for IterPublisher<I>
where
  I: IntoIterator + Clone + Send + Sync + 'static,
  I::IntoIter: Send + 'static,
  I::Item: Send + 'static,
{
  fn actual_subscribe(&self, subscriber: BoxedSubscriber<I::Item>) {
    tracing::trace!("iterator source subscribed");
    let state = Arc::new(IterSubscription {
      iter: Mutex::new(Some(self.source.clone().into_iter().peekable())),
      downstream: DownstreamCell::new(subscriber),
      demand: Demand::default(),
      wip: Wip::default(),
      cancelled: AtomicBool::new(false),
    });
    // Own the drain while `on_subscribe` runs, so a request made from inside
    // it is served after it returns rather than recursively.
    state.wip.enter();
    state.downstream.on_subscribe(state.clone());
    state.wip.resume(|| state.emit());
  }
}

struct IterSubscription<I: Iterator> {
  iter: Mutex<Option<Peekable<I>>>,
  downstream: DownstreamCell<I::Item>,
  demand: Demand,
  wip: Wip,
  cancelled: AtomicBool,
}

impl<I: Iterator> IterSubscription<I> {
  fn emit(&self) {
    let mut slot = self.iter.lock();
    loop {
      if self.cancelled.load(Ordering::Acquire) {
        slot.take();
        self.downstream.release();
        return;
      }
      let Some(iter) = slot.as_mut() else { return };
      if iter.peek().is_none() {
        slot.take();
        drop(slot);
        self.downstream.complete();
        return;
      }
      if self.demand.get() == 0 {
        return;
      }
      if let Some(value) = iter.next() {
        self.demand.produced(1);
        self.downstream.next(value);
      }
    }
  }
}

impl<I> Subscription for IterSubscription<I>
where
  I: Iterator + Send,
  I::Item: Send,
{
  fn request(&self, n: u64) {
    if n == 0 {
      return;
    }
    self.demand.add(n);
    self.wip.drain(|| self.emit());
  }

  fn cancel(&self) {
    if !self.cancelled.swap(true, Ordering::AcqRel) {
      self.wip.drain(|| self.emit());
    }
  }
}

impl<T: Send + 'static> Flow<T> {
  /// Emits the given values in order, then completes.
  ///
  /// ```rust
  /// use rxflow::prelude::*;
  ///
  /// let ts = TestSubscriber::unbounded();
  /// Flow::just(["a", "b"]).subscribe_with(ts.clone());
  /// ts.assert_completed_with(&["a", "b"]);
  /// ```
  pub fn just<const N: usize>(values: [T; N]) -> Self
  where
    T: Clone + Sync,
  {
    Self::from_publisher(IterPublisher::new(values))
  }

  /// Emits a single value, then completes.
  pub fn of(value: T) -> Self
  where
    T: Clone + Sync,
  {
    Self::just([value])
  }

  /// Emits the items of `iterable`; every subscription iterates a fresh
  /// clone of it.
  pub fn from_iter<I>(iterable: I) -> Self
  where
    I: IntoIterator<Item = T> + Clone + Send + Sync + 'static,
    I::IntoIter: Send + 'static,
  {
    Self::from_publisher(IterPublisher::new(iterable))
  }

  /// Completes immediately without emitting.
  pub fn empty() -> Self { Self::from_publisher(IterPublisher::new(std::iter::empty::<T>())) }
}

impl Flow<i64> {
  /// Emits `count` consecutive integers starting at `start`.
  ///
  /// Fails with `IllegalArgument` when `count` is negative or the last
  /// item would overflow `i64`.
  pub fn range(start: i64, count: i64) -> Result<Self> {
    if count < 0 {
      return Err(FlowError::illegal_argument(format!("count >= 0 required but it was {count}")));
    }
    if count == 0 {
      return Ok(Self::empty());
    }
    let last = start
      .checked_add(count - 1)
      .ok_or_else(|| FlowError::illegal_argument("start + (count - 1) overflows i64"))?;
    Ok(Self::from_publisher(IterPublisher::new(start..=last)))
  }
}

#[cfg(test)]
mod tests {
  use crate::prelude::*;

  #[test]
  fn emits_one_item_per_request() {
    let ts = TestSubscriber::new(0);
    Flow::just([1, 2, 3]).subscribe_with(ts.clone());
    assert!(ts.values().is_empty());

    ts.request(2);
    assert_eq!(ts.values(), vec![1, 2]);
    assert!(!ts.is_terminated());

    ts.request(1);
    ts.assert_completed_with(&[1, 2, 3]);
  }

  #[test]
  fn empty_completes_without_demand() {
    let ts = TestSubscriber::<i32>::new(0);
    Flow::empty().subscribe_with(ts.clone());
    ts.assert_completed_with(&[]);

    let ts = TestSubscriber::<i32>::new(0);
    Flow::from_iter(Vec::new()).subscribe_with(ts.clone());
    assert_eq!(ts.completions(), 1);
  }

  #[test]
  fn range_bounds() {
    let ts = TestSubscriber::unbounded();
    Flow::range(-2, 4).unwrap().subscribe_with(ts.clone());
    ts.assert_completed_with(&[-2, -1, 0, 1]);

    let ts = TestSubscriber::unbounded();
    Flow::range(7, 0).unwrap().subscribe_with(ts.clone());
    ts.assert_completed_with(&[]);
  }

  #[test]
  fn range_may_end_at_i64_max() {
    let ts = TestSubscriber::unbounded();
    Flow::range(i64::MAX, 1).unwrap().subscribe_with(ts.clone());
    ts.assert_completed_with(&[i64::MAX]);

    let ts = TestSubscriber::unbounded();
    Flow::range(i64::MAX - 2, 3).unwrap().subscribe_with(ts.clone());
    ts.assert_completed_with(&[i64::MAX - 2, i64::MAX - 1, i64::MAX]);
  }

  #[test]
  fn range_rejects_bad_arguments() {
    assert!(matches!(Flow::range(0, -1), Err(FlowError::IllegalArgument(_))));
    assert!(matches!(Flow::range(i64::MAX, 2), Err(FlowError::IllegalArgument(_))));
  }

  #[test]
  fn cancel_stops_emission() {
    let ts = TestSubscriber::new(2);
    let handle = Flow::from_iter(0..100).subscribe_with(ts.clone());
    handle.cancel();
    handle.cancel();
    ts.request(10);
    assert_eq!(ts.values(), vec![0, 1]);
    assert!(!ts.is_terminated());
  }

  #[test]
  fn request_from_on_next_does_not_recurse() {
    struct OneByOne {
      depth: usize,
      max_depth: usize,
      seen: Vec<i64>,
      subscription: Option<SubscriptionRef>,
    }

    impl Subscriber<i64> for OneByOne {
      fn on_subscribe(&mut self, subscription: SubscriptionRef) {
        subscription.request(1);
        self.subscription = Some(subscription);
      }

      fn on_next(&mut self, value: i64) {
        self.depth += 1;
        self.max_depth = self.max_depth.max(self.depth);
        self.seen.push(value);
        if let Some(subscription) = &self.subscription {
          subscription.request(1);
        }
        self.depth -= 1;
      }

      fn on_error(&mut self, _err: FlowError) {}

      fn on_complete(&mut self) {
        assert_eq!(self.seen.len(), 10_000);
        assert_eq!(self.max_depth, 1);
      }
    }

    let ts = TestSubscriber::unbounded();
    let flow = Flow::range(0, 10_000).unwrap();
    flow.actual_subscribe(Box::new(OneByOne {
      depth: 0,
      max_depth: 0,
      seen: vec![],
      subscription: None,
    }));
    flow.subscribe_with(ts.clone());
    assert_eq!(ts.value_count(), 10_000);
  }

  #[test]
  fn of_and_from_iter() {
    let ts = TestSubscriber::unbounded();
    Flow::of("hello").subscribe_with(ts.clone());
    ts.assert_completed_with(&["hello"]);

    let ts = TestSubscriber::unbounded();
    Flow::from_iter(vec![String::from("a"), String::from("b")]).subscribe_with(ts.clone());
    ts.assert_completed_with(&["a".to_string(), "b".to_string()]);
  }
}
