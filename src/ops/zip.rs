//! `zip` and `zip_with`: pairs the i-th items of two flows.
//!
//! Items that arrived but have no partner yet wait in a per-side queue; each
//! side is asked for `DEFAULT_PREFETCH` items ahead and every emitted pair
//! replaces one item on both sides. The zip completes as soon as one side
//! has completed and its queue is empty, since no further pair can form,
//! and then cancels the other side.

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
  subscriber::{BoxedSubscriber, Subscriber},
  subscription::{Subscription, SubscriptionRef},
};

pub struct ZipOp<A, B, R> {
  left: Flow<A>,
  right: Flow<B>,
  combiner: Arc<dyn Fn(A, B) -> R + Send + Sync>,
}

impl<A, B, R> Publisher<R> for ZipOp<A, B, R>
where
  A: Send + 'static,
  B: Send + 'static,
  R: Send + 'static,
{
  fn actual_subscribe(&self, subscriber: BoxedSubscriber<R>) {
    let state = Arc::new(ZipState {
      left: ZipSide::default(),
      right: ZipSide::default(),
      combiner: self.combiner.clone(),
      downstream: DownstreamCell::new(subscriber),
      demand: Demand::default(),
      wip: Wip::default(),
      error: Mutex::new(None),
      finished: AtomicBool::new(false),
      cancelled: AtomicBool::new(false),
    });
    state.downstream.on_subscribe(state.clone());
    self.left.actual_subscribe(Box::new(ZipSubscriber { state: state.clone(), side: ZipState::left }));
    self.right.actual_subscribe(Box::new(ZipSubscriber { state, side: ZipState::right }));
  }
}

struct ZipSide<X> {
  queue: Mutex<VecDeque<X>>,
  upstream: Mutex<Option<SubscriptionRef>>,
  done: AtomicBool,
}

impl<X> Default for ZipSide<X> {
  fn default() -> Self {
    Self { queue: Mutex::new(VecDeque::new()), upstream: Mutex::new(None), done: AtomicBool::new(false) }
  }
}

impl<X> ZipSide<X> {
  fn cancel(&self) {
    let upstream = self.upstream.lock().take();
    if let Some(upstream) = upstream {
      upstream.cancel();
    }
  }

  fn replenish(&self) {
    let upstream = self.upstream.lock().clone();
    if let Some(upstream) = upstream {
      upstream.request(1);
    }
  }

  /// Completed with nothing left to pair.
  fn exhausted(&self) -> bool {
    self.done.load(Ordering::Acquire) && self.queue.lock().is_empty()
  }
}

struct ZipState<A, B, R> {
  left: ZipSide<A>,
  right: ZipSide<B>,
  combiner: Arc<dyn Fn(A, B) -> R + Send + Sync>,
  downstream: DownstreamCell<R>,
  demand: Demand,
  wip: Wip,
  error: Mutex<Option<FlowError>>,
  finished: AtomicBool,
  cancelled: AtomicBool,
}

impl<A, B, R> ZipState<A, B, R> {
  fn left(&self) -> &ZipSide<A> { &self.left }

  fn right(&self) -> &ZipSide<B> { &self.right }

  fn cancel_sides(&self) {
    self.left.cancel();
    self.right.cancel();
  }

  fn clear(&self) {
    self.left.queue.lock().clear();
    self.right.queue.lock().clear();
  }

  fn fail(&self, err: FlowError) {
    if self.finished.swap(true, Ordering::AcqRel) {
      return;
    }
    *self.error.lock() = Some(err);
    self.cancel_sides();
    self.drain();
  }

  fn drain(&self) { self.wip.drain(|| self.drain_loop()); }

  fn drain_loop(&self) {
    loop {
      if self.cancelled.load(Ordering::Acquire) {
        self.clear();
        self.downstream.release();
        return;
      }
      let err = self.error.lock().take();
      if let Some(err) = err {
        self.clear();
        self.downstream.error(err);
        return;
      }
      if self.left.exhausted() || self.right.exhausted() {
        if !self.finished.swap(true, Ordering::AcqRel) {
          self.cancel_sides();
          self.clear();
          self.downstream.complete();
        }
        return;
      }
      if self.demand.get() == 0 {
        return;
      }
      if self.left.queue.lock().is_empty() || self.right.queue.lock().is_empty() {
        return;
      }
      let a = self.left.queue.lock().pop_front();
      let b = self.right.queue.lock().pop_front();
      if let (Some(a), Some(b)) = (a, b) {
        self.demand.produced(1);
        self.downstream.next((self.combiner)(a, b));
        self.left.replenish();
        self.right.replenish();
      }
    }
  }
}

impl<A: Send, B: Send, R: Send> Subscription for ZipState<A, B, R> {
  fn request(&self, n: u64) {
    if n > 0 {
      self.demand.add(n);
      self.drain();
    }
  }

  fn cancel(&self) {
    if self.cancelled.swap(true, Ordering::AcqRel) {
      return;
    }
    self.finished.store(true, Ordering::Release);
    self.cancel_sides();
    self.drain();
  }
}

struct ZipSubscriber<A, B, R, X> {
  state: Arc<ZipState<A, B, R>>,
  side: fn(&ZipState<A, B, R>) -> &ZipSide<X>,
}

impl<A, B, R, X> Subscriber<X> for ZipSubscriber<A, B, R, X>
where
  A: Send,
  B: Send,
  R: Send,
  X: Send,
{
  fn on_subscribe(&mut self, subscription: SubscriptionRef) {
    if self.state.finished.load(Ordering::Acquire) {
      subscription.cancel();
      return;
    }
    *(self.side)(&self.state).upstream.lock() = Some(subscription.clone());
    subscription.request(DEFAULT_PREFETCH as u64);
  }

  fn on_next(&mut self, value: X) {
    if self.state.finished.load(Ordering::Acquire) {
      return;
    }
    (self.side)(&self.state).queue.lock().push_back(value);
    self.state.drain();
  }

  fn on_error(&mut self, err: FlowError) {
    (self.side)(&self.state).upstream.lock().take();
    self.state.fail(err);
  }

  fn on_complete(&mut self) {
    let side = (self.side)(&self.state);
    side.upstream.lock().take();
    side.done.store(true, Ordering::Release);
    self.state.drain();
  }
}

impl<A: Send + 'static> Flow<A> {
  /// Combines the i-th items of `left` and `right`, in strict index order.
  /// The output is as long as the shorter input.
  pub fn zip<B, R, F>(left: Flow<A>, right: Flow<B>, combiner: F) -> Flow<R>
  where
    B: Send + 'static,
    R: Send + 'static,
    F: Fn(A, B) -> R + Send + Sync + 'static,
  {
    Flow::from_publisher(ZipOp { left, right, combiner: Arc::new(combiner) })
  }

  /// Zips this flow with `other`.
  pub fn zip_with<B, R, F>(&self, other: Flow<B>, combiner: F) -> Flow<R>
  where
    B: Send + 'static,
    R: Send + 'static,
    F: Fn(A, B) -> R + Send + Sync + 'static,
  {
    Flow::zip(self.clone(), other, combiner)
  }

  /// Emits `true` when both flows emit equal sequences.
  pub fn sequence_equal(left: Flow<A>, right: Flow<A>) -> Flow<bool>
  where
    A: PartialEq,
  {
    Flow::zip(left.to_list(), right.to_list(), |a, b| a == b)
  }
}

#[cfg(test)]
mod tests {
  use std::sync::Arc;

  use parking_lot::Mutex;

  use crate::prelude::*;

  type Slot<T> = Arc<Mutex<Option<BoxedSubscriber<T>>>>;

  /// Keeps its subscriber and ignores cancellation, like a source that is
  /// slow to notice it.
  struct Stubborn<T>(Slot<T>);

  impl<T: Send + 'static> Publisher<T> for Stubborn<T> {
    fn actual_subscribe(&self, mut subscriber: BoxedSubscriber<T>) {
      subscriber.on_subscribe(EmptySubscription::shared());
      *self.0.lock() = Some(subscriber);
    }
  }

  #[test]
  fn pairs_by_index() {
    let ts = TestSubscriber::unbounded();
    Flow::zip(Flow::just([1, 2, 3, 4]), Flow::just([4, 5, 6]), |x, y| x * 10000 + y)
      .subscribe_with(ts.clone());
    ts.assert_completed_with(&[10004, 20005, 30006]);
  }

  #[test]
  fn waits_for_partner_on_virtual_time() {
    let scheduler = TestScheduler::new();
    let fast = Flow::interval(Duration::from_millis(10), scheduler.clone()).unwrap();
    let slow = Flow::interval(Duration::from_millis(30), scheduler.clone()).unwrap();
    let ts = TestSubscriber::unbounded();
    fast.take(10).zip_with(slow.take(2), |a, b| (a, b)).subscribe_with(ts.clone());

    scheduler.advance_by(Duration::from_millis(30));
    assert_eq!(ts.values(), vec![(0, 0)]);
    scheduler.advance_by(Duration::from_millis(30));
    ts.assert_completed_with(&[(0, 0), (1, 1)]);
    assert_eq!(scheduler.pending(), 0);
  }

  #[test]
  fn bounded_demand() {
    let ts = TestSubscriber::new(2);
    Flow::range(0, 100)
      .unwrap()
      .zip_with(Flow::range(0, 100).unwrap(), |a, b| a + b)
      .subscribe_with(ts.clone());
    assert_eq!(ts.values(), vec![0, 2]);
    ts.request(1);
    assert_eq!(ts.values(), vec![0, 2, 4]);
    assert!(ts.violations().is_empty());
  }

  #[test]
  fn items_after_finish_are_not_queued() {
    let slot: Slot<Arc<()>> = Arc::new(Mutex::new(None));
    let ts = TestSubscriber::unbounded();
    Flow::<i32>::empty()
      .zip_with(Flow::from_publisher(Stubborn(slot.clone())), |a, _| a)
      .subscribe_with(ts.clone());
    ts.assert_completed_with(&[]);

    let token = Arc::new(());
    for _ in 0..3 {
      if let Some(subscriber) = slot.lock().as_mut() {
        subscriber.on_next(token.clone());
      }
    }
    assert!(slot.lock().is_some());
    assert_eq!(Arc::strong_count(&token), 1);
  }

  #[test]
  fn error_from_either_side() {
    let ts = TestSubscriber::unbounded();
    Flow::just([1, 2])
      .zip_with(Flow::<i32>::error(FlowError::msg("right")), |a, b| a + b)
      .subscribe_with(ts.clone());
    assert_eq!(ts.errors(), vec![FlowError::msg("right")]);
    assert_eq!(ts.terminal_count(), 1);
  }

  #[test]
  fn sequence_equal_compares_whole_sequences() {
    let ts = TestSubscriber::unbounded();
    Flow::sequence_equal(Flow::just([1, 2, 3]), Flow::from_iter(vec![1, 2, 3])).subscribe_with(ts.clone());
    ts.assert_completed_with(&[true]);

    let ts = TestSubscriber::unbounded();
    Flow::sequence_equal(Flow::just([1, 2]), Flow::just([1, 2, 3])).subscribe_with(ts.clone());
    ts.assert_completed_with(&[false]);
  }
}
