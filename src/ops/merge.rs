//! `merge`, `merge_with`, `merge_with_prefetch`, `flat_map` and
//! `flat_map_with`.
//!
//! `merge` is `flat_map` over a flow of flows. Every inner source is asked
//! for `prefetch` items up front; what arrives is queued and handed to the
//! downstream as its demand allows, and each consumed item is replaced by a
//! `request(1)` to the inner source it came from. The first error cancels
//! every other source and is delivered at once; completion waits for the
//! outer flow and every inner source.

use std::{
  collections::{HashMap, VecDeque},
  sync::{
    atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
    Arc,
  },
};

use parking_lot::Mutex;

use crate::{
  drain::{Demand, DownstreamCell, Wip},
  error::{FlowError, Result},
  ops::DEFAULT_PREFETCH,
  publisher::{Flow, Publisher},
  subscriber::{BoxedSubscriber, Subscriber},
  subscription::{Subscription, SubscriptionRef, UNBOUNDED},
};

pub struct FlatMapOp<T, R> {
  source: Flow<T>,
  mapper: Arc<dyn Fn(T) -> Flow<R> + Send + Sync>,
  max_concurrency: usize,
  prefetch: usize,
}

impl<T, R> Publisher<R> for FlatMapOp<T, R>
where
  T: Send + 'static,
  R: Send + 'static,
{
  fn actual_subscribe(&self, subscriber: BoxedSubscriber<R>) {
    let state = Arc::new(MergeState {
      downstream: DownstreamCell::new(subscriber),
      queue: Mutex::new(VecDeque::new()),
      inners: Mutex::new(HashMap::new()),
      outer: Mutex::new(None),
      next_id: AtomicU64::new(0),
      // the outer flow counts as one active source
      active: AtomicUsize::new(1),
      demand: Demand::default(),
      wip: Wip::default(),
      error: Mutex::new(None),
      done: AtomicBool::new(false),
      cancelled: AtomicBool::new(false),
      prefetch: self.prefetch as u64,
    });
    state.downstream.on_subscribe(state.clone());
    self.source.actual_subscribe(Box::new(OuterSubscriber {
      state,
      mapper: self.mapper.clone(),
      max_concurrency: self.max_concurrency,
    }));
  }
}

struct MergeState<R> {
  downstream: DownstreamCell<R>,
  queue: Mutex<VecDeque<(u64, R)>>,
  inners: Mutex<HashMap<u64, SubscriptionRef>>,
  outer: Mutex<Option<SubscriptionRef>>,
  next_id: AtomicU64,
  active: AtomicUsize,
  demand: Demand,
  wip: Wip,
  error: Mutex<Option<FlowError>>,
  done: AtomicBool,
  cancelled: AtomicBool,
  prefetch: u64,
}

impl<R> MergeState<R> {
  fn fail(&self, err: FlowError) {
    if self.done.swap(true, Ordering::AcqRel) {
      tracing::trace!(error = %err, "merge error dropped after termination");
      return;
    }
    *self.error.lock() = Some(err);
    self.cancel_sources();
    self.drain();
  }

  fn cancel_sources(&self) {
    let outer = self.outer.lock().take();
    let inners: Vec<_> = self.inners.lock().drain().map(|(_, s)| s).collect();
    outer.into_iter().chain(inners).for_each(|s| s.cancel());
  }

  fn source_finished(&self) {
    self.active.fetch_sub(1, Ordering::AcqRel);
    self.drain();
  }

  fn drain(&self) { self.wip.drain(|| self.drain_loop()); }

  fn drain_loop(&self) {
    loop {
      if self.cancelled.load(Ordering::Acquire) {
        self.queue.lock().clear();
        self.downstream.release();
        return;
      }
      let err = self.error.lock().take();
      if let Some(err) = err {
        self.queue.lock().clear();
        self.downstream.error(err);
        return;
      }
      let finished = self.active.load(Ordering::Acquire) == 0;
      if finished && self.queue.lock().is_empty() {
        if !self.done.swap(true, Ordering::AcqRel) {
          self.downstream.complete();
        }
        return;
      }
      if self.demand.get() == 0 {
        return;
      }
      let next = self.queue.lock().pop_front();
      let Some((id, value)) = next else { return };
      self.demand.produced(1);
      self.downstream.next(value);
      let inner = self.inners.lock().get(&id).cloned();
      if let Some(inner) = inner {
        inner.request(1);
      }
    }
  }
}

impl<R: Send> Subscription for MergeState<R> {
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
    self.done.store(true, Ordering::Release);
    self.cancel_sources();
    self.drain();
  }
}

struct OuterSubscriber<T, R> {
  state: Arc<MergeState<R>>,
  mapper: Arc<dyn Fn(T) -> Flow<R> + Send + Sync>,
  max_concurrency: usize,
}

impl<T: Send, R: Send + 'static> Subscriber<T> for OuterSubscriber<T, R> {
  fn on_subscribe(&mut self, subscription: SubscriptionRef) {
    if self.state.done.load(Ordering::Acquire) {
      subscription.cancel();
      return;
    }
    *self.state.outer.lock() = Some(subscription.clone());
    let initial = match self.max_concurrency {
      usize::MAX => UNBOUNDED,
      bounded => bounded as u64,
    };
    subscription.request(initial);
  }

  fn on_next(&mut self, value: T) {
    if self.state.done.load(Ordering::Acquire) {
      return;
    }
    let id = self.state.next_id.fetch_add(1, Ordering::AcqRel);
    self.state.active.fetch_add(1, Ordering::AcqRel);
    let inner = (self.mapper)(value);
    inner.actual_subscribe(Box::new(InnerSubscriber {
      state: self.state.clone(),
      id,
      replenish_outer: self.max_concurrency != usize::MAX,
    }));
  }

  fn on_error(&mut self, err: FlowError) {
    self.state.outer.lock().take();
    self.state.fail(err);
  }

  fn on_complete(&mut self) {
    self.state.outer.lock().take();
    self.state.source_finished();
  }
}

struct InnerSubscriber<R> {
  state: Arc<MergeState<R>>,
  id: u64,
  replenish_outer: bool,
}

impl<R: Send> Subscriber<R> for InnerSubscriber<R> {
  fn on_subscribe(&mut self, subscription: SubscriptionRef) {
    if self.state.done.load(Ordering::Acquire) {
      subscription.cancel();
      return;
    }
    self.state.inners.lock().insert(self.id, subscription.clone());
    subscription.request(self.state.prefetch);
  }

  fn on_next(&mut self, value: R) {
    if self.state.done.load(Ordering::Acquire) {
      return;
    }
    self.state.queue.lock().push_back((self.id, value));
    self.state.drain();
  }

  fn on_error(&mut self, err: FlowError) {
    self.state.inners.lock().remove(&self.id);
    self.state.fail(err);
  }

  fn on_complete(&mut self) {
    self.state.inners.lock().remove(&self.id);
    if self.replenish_outer {
      let outer = self.state.outer.lock().clone();
      if let Some(outer) = outer {
        outer.request(1);
      }
    }
    self.state.source_finished();
  }
}

fn check_positive(name: &str, value: usize) -> Result<()> {
  if value == 0 {
    return Err(FlowError::illegal_argument(format!("{name} > 0 required but it was 0")));
  }
  Ok(())
}

impl<T: Send + 'static> Flow<T> {
  fn flat_map_unchecked<R, F>(&self, f: F, max_concurrency: usize, prefetch: usize) -> Flow<R>
  where
    R: Send + 'static,
    F: Fn(T) -> Flow<R> + Send + Sync + 'static,
  {
    Flow::from_publisher(FlatMapOp {
      source: self.clone(),
      mapper: Arc::new(f),
      max_concurrency,
      prefetch,
    })
  }

  /// Maps every item to a flow and merges all of them.
  pub fn flat_map<R, F>(&self, f: F) -> Flow<R>
  where
    R: Send + 'static,
    F: Fn(T) -> Flow<R> + Send + Sync + 'static,
  {
    self.flat_map_unchecked(f, usize::MAX, DEFAULT_PREFETCH)
  }

  /// Like [`Flow::flat_map`], with at most `max_concurrency` inner flows
  /// subscribed at once (`usize::MAX` for no limit) and `prefetch` items
  /// requested ahead from each.
  pub fn flat_map_with<R, F>(&self, f: F, max_concurrency: usize, prefetch: usize) -> Result<Flow<R>>
  where
    R: Send + 'static,
    F: Fn(T) -> Flow<R> + Send + Sync + 'static,
  {
    check_positive("max_concurrency", max_concurrency)?;
    check_positive("prefetch", prefetch)?;
    Ok(self.flat_map_unchecked(f, max_concurrency, prefetch))
  }

  /// Subscribes to all `sources` at once and emits their items as they
  /// arrive.
  pub fn merge<I>(sources: I) -> Flow<T>
  where
    I: IntoIterator<Item = Flow<T>>,
  {
    let sources: Vec<Flow<T>> = sources.into_iter().collect();
    Flow::from_iter(sources).flat_map_unchecked(|source| source, usize::MAX, DEFAULT_PREFETCH)
  }

  /// [`Flow::merge`] with a custom per-source prefetch.
  pub fn merge_with_prefetch<I>(sources: I, prefetch: usize) -> Result<Flow<T>>
  where
    I: IntoIterator<Item = Flow<T>>,
  {
    check_positive("prefetch", prefetch)?;
    let sources: Vec<Flow<T>> = sources.into_iter().collect();
    Ok(Flow::from_iter(sources).flat_map_unchecked(|source| source, usize::MAX, prefetch))
  }

  /// Merges this flow with `other`.
  pub fn merge_with(&self, other: Flow<T>) -> Flow<T> { Flow::merge([self.clone(), other]) }
}

#[cfg(test)]
mod tests {
  use crate::prelude::*;

  #[test]
  fn merges_in_arrival_order() {
    let scheduler = TestScheduler::new();
    let fast = Flow::interval(Duration::from_millis(10), scheduler.clone()).unwrap().map(|v| v as i64);
    let slow = Flow::interval(Duration::from_millis(25), scheduler.clone())
      .unwrap()
      .map(|v| 100 + v as i64);
    let ts = TestSubscriber::unbounded();
    fast.take(3).merge_with(slow.take(2)).subscribe_with(ts.clone());

    scheduler.advance_by(Duration::from_millis(50));
    // fast: 10, 20, 30; slow: 25, 50
    ts.assert_completed_with(&[0, 1, 100, 2, 101]);
  }

  #[test]
  fn completes_after_all_sources() {
    let ts = TestSubscriber::unbounded();
    Flow::merge([Flow::just([1, 2]), Flow::empty(), Flow::just([3])]).subscribe_with(ts.clone());
    ts.assert_completed_with(&[1, 2, 3]);
  }

  #[test]
  fn honours_downstream_demand() {
    let ts = TestSubscriber::new(3);
    Flow::merge([Flow::range(0, 50).unwrap(), Flow::range(100, 50).unwrap()]).subscribe_with(ts.clone());
    assert_eq!(ts.value_count(), 3);
    assert!(ts.violations().is_empty());
    ts.request(UNBOUNDED);
    assert_eq!(ts.value_count(), 100);
    assert_eq!(ts.completions(), 1);
  }

  #[test]
  fn first_error_cancels_the_rest() {
    let scheduler = TestScheduler::new();
    let ts = TestSubscriber::unbounded();
    let ticking = Flow::interval(Duration::from_millis(10), scheduler.clone()).unwrap();
    ticking.merge_with(Flow::error(FlowError::msg("broken"))).subscribe_with(ts.clone());
    assert_eq!(ts.errors(), vec![FlowError::msg("broken")]);
    assert_eq!(scheduler.pending(), 0);
    scheduler.advance_by(Duration::from_millis(100));
    assert_eq!(ts.terminal_count(), 1);
    assert!(ts.values().is_empty());
  }

  #[test]
  fn flat_map_limits_concurrency() {
    let scheduler = TestScheduler::new();
    let ts = TestSubscriber::unbounded();
    let inner_scheduler = scheduler.clone();
    Flow::just([1u64, 2, 3])
      .flat_map_with(
        move |v| Flow::timer(Duration::from_millis(10 * v), inner_scheduler.clone()).map(move |_| v),
        1,
        DEFAULT_PREFETCH,
      )
      .unwrap()
      .subscribe_with(ts.clone());
    // one timer at a time: 10ms, then 20ms, then 30ms
    scheduler.advance_by(Duration::from_millis(10));
    assert_eq!(ts.values(), vec![1]);
    scheduler.advance_by(Duration::from_millis(20));
    assert_eq!(ts.values(), vec![1, 2]);
    scheduler.advance_by(Duration::from_millis(30));
    ts.assert_completed_with(&[1, 2, 3]);
  }

  #[test]
  fn rejects_zero_configuration() {
    let flow = Flow::just([1]);
    assert!(flow.flat_map_with(Flow::of, 0, 4).is_err());
    assert!(flow.flat_map_with(Flow::of, 4, 0).is_err());
    assert!(Flow::merge_with_prefetch([flow.clone()], 0).is_err());
  }

  #[test]
  fn cancel_is_idempotent() {
    let scheduler = TestScheduler::new();
    let ts = TestSubscriber::unbounded();
    let handle = Flow::merge([
      Flow::interval(Duration::from_millis(5), scheduler.clone()).unwrap(),
      Flow::interval(Duration::from_millis(7), scheduler.clone()).unwrap(),
    ])
    .subscribe_with(ts.clone());
    scheduler.advance_by(Duration::from_millis(10));
    handle.cancel();
    handle.cancel();
    let seen = ts.value_count();
    scheduler.advance_by(Duration::from_millis(100));
    assert_eq!(ts.value_count(), seen);
    assert_eq!(scheduler.pending(), 0);
    assert!(!ts.is_terminated());
  }
}
