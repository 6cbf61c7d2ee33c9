//! Operators that consume the whole upstream before emitting: `reduce`,
//! `reduce_with`, `collect`, `count`, `to_list`, `to_sorted_list`,
//! `to_sorted_list_by`, `to_map`, `take_last`, `all`, `any`, `contains`,
//! `is_empty`, `element_at` and `element_at_or`.
//!
//! They all share [`AggregateOp`]: the upstream is drained with unbounded
//! demand into a per-subscription [`Accumulator`], and the accumulator's
//! final items are handed to the downstream as its demand allows. An
//! accumulator may stop early (`any` finding a match, `element_at`
//! reaching its index), which cancels the upstream.

use std::{
  cmp::Ordering as CmpOrdering,
  collections::{HashMap, VecDeque},
  hash::Hash,
  ops::ControlFlow,
  sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
  },
};

use parking_lot::Mutex;

use crate::{
  drain::{Demand, DownstreamCell, Wip},
  error::FlowError,
  publisher::{Flow, Publisher},
  subscriber::{BoxedSubscriber, Subscriber},
  subscription::{Subscription, SubscriptionRef, UNBOUNDED},
};

/// Per-subscription accumulation state of an [`AggregateOp`].
pub trait Accumulator<T, R>: Send {
  /// Takes one item; `Break` ends the upstream early.
  fn push(&mut self, value: T) -> ControlFlow<()>;

  /// Produces the items to emit once the upstream is done.
  fn finish(&mut self) -> Vec<R>;
}

struct FnAccumulator<S, P, F> {
  state: Option<S>,
  push: Arc<P>,
  finish: Arc<F>,
}

impl<T, R, S, P, F> Accumulator<T, R> for FnAccumulator<S, P, F>
where
  S: Send,
  P: Fn(&mut S, T) -> ControlFlow<()> + Send + Sync,
  F: Fn(S) -> Vec<R> + Send + Sync,
{
  fn push(&mut self, value: T) -> ControlFlow<()> {
    match self.state.as_mut() {
      Some(state) => (self.push)(state, value),
      None => ControlFlow::Break(()),
    }
  }

  fn finish(&mut self) -> Vec<R> {
    self.state.take().map(|state| (self.finish)(state)).unwrap_or_default()
  }
}

type AccumulatorFactory<T, R> = Arc<dyn Fn() -> Box<dyn Accumulator<T, R>> + Send + Sync>;

pub struct AggregateOp<T, R> {
  source: Flow<T>,
  factory: AccumulatorFactory<T, R>,
}

impl<T, R> Publisher<R> for AggregateOp<T, R>
where
  T: Send + 'static,
  R: Send + 'static,
{
  fn actual_subscribe(&self, subscriber: BoxedSubscriber<R>) {
    let state = Arc::new(AggregateState {
      downstream: DownstreamCell::new(subscriber),
      results: Mutex::new(None),
      upstream: Mutex::new(None),
      demand: Demand::default(),
      wip: Wip::default(),
      cancelled: AtomicBool::new(false),
    });
    state.downstream.on_subscribe(state.clone());
    self.source.actual_subscribe(Box::new(AggregateSubscriber {
      state,
      accumulator: (self.factory)(),
      done: false,
    }));
  }
}

struct AggregateState<R> {
  downstream: DownstreamCell<R>,
  results: Mutex<Option<VecDeque<R>>>,
  upstream: Mutex<Option<SubscriptionRef>>,
  demand: Demand,
  wip: Wip,
  cancelled: AtomicBool,
}

impl<R> AggregateState<R> {
  fn drain(&self) { self.wip.drain(|| self.emit()); }

  fn emit(&self) {
    let mut results = self.results.lock();
    loop {
      if self.cancelled.load(Ordering::Acquire) {
        results.take();
        self.downstream.release();
        return;
      }
      let Some(pending) = results.as_mut() else { return };
      if pending.is_empty() {
        results.take();
        drop(results);
        self.downstream.complete();
        return;
      }
      if self.demand.get() == 0 {
        return;
      }
      if let Some(value) = pending.pop_front() {
        self.demand.produced(1);
        self.downstream.next(value);
      }
    }
  }

  fn take_upstream(&self) -> Option<SubscriptionRef> { self.upstream.lock().take() }
}

impl<R: Send> Subscription for AggregateState<R> {
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
    if let Some(upstream) = self.take_upstream() {
      upstream.cancel();
    }
    self.drain();
  }
}

struct AggregateSubscriber<T, R> {
  state: Arc<AggregateState<R>>,
  accumulator: Box<dyn Accumulator<T, R>>,
  done: bool,
}

impl<T, R> AggregateSubscriber<T, R> {
  fn publish(&mut self) {
    let items = self.accumulator.finish();
    *self.state.results.lock() = Some(items.into());
    self.state.drain();
  }
}

impl<T: Send, R: Send> Subscriber<T> for AggregateSubscriber<T, R> {
  fn on_subscribe(&mut self, subscription: SubscriptionRef) {
    if self.state.cancelled.load(Ordering::Acquire) {
      subscription.cancel();
      return;
    }
    *self.state.upstream.lock() = Some(subscription.clone());
    subscription.request(UNBOUNDED);
  }

  fn on_next(&mut self, value: T) {
    if self.done {
      return;
    }
    if self.accumulator.push(value).is_break() {
      self.done = true;
      if let Some(upstream) = self.state.take_upstream() {
        upstream.cancel();
      }
      self.publish();
    }
  }

  fn on_error(&mut self, err: FlowError) {
    if !std::mem::replace(&mut self.done, true) {
      self.state.take_upstream();
      self.state.downstream.error(err);
    }
  }

  fn on_complete(&mut self) {
    if !std::mem::replace(&mut self.done, true) {
      self.state.take_upstream();
      self.publish();
    }
  }
}

impl<T: Send + 'static> Flow<T> {
  /// Builds an [`AggregateOp`] from plain functions: `init` creates the
  /// state of each subscription, `push` folds an item into it and `finish`
  /// turns it into the items to emit.
  pub fn aggregate<S, R, I, P, F>(&self, init: I, push: P, finish: F) -> Flow<R>
  where
    S: Send + 'static,
    R: Send + 'static,
    I: Fn() -> S + Send + Sync + 'static,
    P: Fn(&mut S, T) -> ControlFlow<()> + Send + Sync + 'static,
    F: Fn(S) -> Vec<R> + Send + Sync + 'static,
  {
    let push = Arc::new(push);
    let finish = Arc::new(finish);
    let factory: AccumulatorFactory<T, R> = Arc::new(move || {
      Box::new(FnAccumulator { state: Some(init()), push: push.clone(), finish: finish.clone() })
    });
    Flow::from_publisher(AggregateOp { source: self.clone(), factory })
  }

  /// Folds all items with `f`; emits nothing for an empty upstream.
  pub fn reduce<F>(&self, f: F) -> Flow<T>
  where
    F: Fn(T, T) -> T + Send + Sync + 'static,
  {
    self.aggregate(
      || None,
      move |acc: &mut Option<T>, v| {
        *acc = Some(match acc.take() {
          Some(prev) => f(prev, v),
          None => v,
        });
        ControlFlow::Continue(())
      },
      |acc| acc.into_iter().collect(),
    )
  }

  /// Folds all items into `seed`; an empty upstream yields the seed.
  pub fn reduce_with<R, F>(&self, seed: R, f: F) -> Flow<R>
  where
    R: Clone + Send + Sync + 'static,
    F: Fn(R, T) -> R + Send + Sync + 'static,
  {
    self.aggregate(
      move || Some(seed.clone()),
      move |acc: &mut Option<R>, v| {
        *acc = acc.take().map(|prev| f(prev, v));
        ControlFlow::Continue(())
      },
      |acc| acc.into_iter().collect(),
    )
  }

  /// Collects every item into a container created by `factory`.
  pub fn collect<C, N, A>(&self, factory: N, accumulate: A) -> Flow<C>
  where
    C: Send + 'static,
    N: Fn() -> C + Send + Sync + 'static,
    A: Fn(&mut C, T) + Send + Sync + 'static,
  {
    self.aggregate(
      factory,
      move |container, v| {
        accumulate(container, v);
        ControlFlow::Continue(())
      },
      |container| vec![container],
    )
  }

  /// Emits the number of items.
  pub fn count(&self) -> Flow<u64> {
    self.aggregate(
      || 0u64,
      |count, _| {
        *count += 1;
        ControlFlow::Continue(())
      },
      |count| vec![count],
    )
  }

  /// Emits all items as one `Vec`.
  pub fn to_list(&self) -> Flow<Vec<T>> { self.collect(Vec::new, |list, v| list.push(v)) }

  pub fn to_sorted_list(&self) -> Flow<Vec<T>>
  where
    T: Ord,
  {
    self.to_list().map(|mut list| {
      list.sort();
      list
    })
  }

  pub fn to_sorted_list_by<F>(&self, compare: F) -> Flow<Vec<T>>
  where
    F: Fn(&T, &T) -> CmpOrdering + Send + Sync + 'static,
  {
    self.to_list().map(move |mut list| {
      list.sort_by(&compare);
      list
    })
  }

  /// Emits a map built from every item; later keys replace earlier ones.
  pub fn to_map<K, V, KF, VF>(&self, key: KF, value: VF) -> Flow<HashMap<K, V>>
  where
    K: Eq + Hash + Send + 'static,
    V: Send + 'static,
    KF: Fn(&T) -> K + Send + Sync + 'static,
    VF: Fn(T) -> V + Send + Sync + 'static,
  {
    self.collect(HashMap::new, move |map, v| {
      map.insert(key(&v), value(v));
    })
  }

  /// Emits the last `count` items once the upstream completes.
  pub fn take_last(&self, count: usize) -> Flow<T> {
    self.aggregate(
      move || VecDeque::with_capacity(count.min(1024)),
      move |window: &mut VecDeque<T>, v| {
        if count > 0 {
          if window.len() == count {
            window.pop_front();
          }
          window.push_back(v);
        }
        ControlFlow::Continue(())
      },
      |window| window.into(),
    )
  }

  /// Emits whether every item satisfies `predicate`; stops at the first
  /// that does not.
  pub fn all<P>(&self, predicate: P) -> Flow<bool>
  where
    P: Fn(&T) -> bool + Send + Sync + 'static,
  {
    self.aggregate(
      || true,
      move |all, v| {
        if predicate(&v) {
          ControlFlow::Continue(())
        } else {
          *all = false;
          ControlFlow::Break(())
        }
      },
      |all| vec![all],
    )
  }

  /// Emits whether some item satisfies `predicate`; stops at the first
  /// that does.
  pub fn any<P>(&self, predicate: P) -> Flow<bool>
  where
    P: Fn(&T) -> bool + Send + Sync + 'static,
  {
    self.aggregate(
      || false,
      move |any, v| {
        if predicate(&v) {
          *any = true;
          ControlFlow::Break(())
        } else {
          ControlFlow::Continue(())
        }
      },
      |any| vec![any],
    )
  }

  pub fn contains(&self, item: T) -> Flow<bool>
  where
    T: PartialEq + Sync,
  {
    self.any(move |v| *v == item)
  }

  /// Emits `true` when the upstream completes without items.
  pub fn is_empty(&self) -> Flow<bool> {
    self.aggregate(
      || true,
      |empty, _| {
        *empty = false;
        ControlFlow::Break(())
      },
      |empty| vec![empty],
    )
  }

  /// Emits the item at `index`, or nothing when the upstream is shorter.
  pub fn element_at(&self, index: usize) -> Flow<T> {
    self.aggregate(
      || (0usize, None),
      move |(seen, found): &mut (usize, Option<T>), v| {
        if *seen == index {
          *found = Some(v);
          return ControlFlow::Break(());
        }
        *seen += 1;
        ControlFlow::Continue(())
      },
      |(_, found)| found.into_iter().collect(),
    )
  }

  /// Emits the item at `index`, or `default` when the upstream is shorter.
  pub fn element_at_or(&self, index: usize, default: T) -> Flow<T>
  where
    T: Clone + Sync,
  {
    self.aggregate(
      || (0usize, None),
      move |(seen, found): &mut (usize, Option<T>), v| {
        if *seen == index {
          *found = Some(v);
          return ControlFlow::Break(());
        }
        *seen += 1;
        ControlFlow::Continue(())
      },
      move |(_, found)| vec![found.unwrap_or_else(|| default.clone())],
    )
  }
}
