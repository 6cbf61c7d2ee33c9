//! `concat`, `concat_with`, `start_with` and `start_with_iter`.
//!
//! Sources are subscribed strictly one after another. The downstream holds
//! a single [`SubscriptionArbiter`] for the whole run; each source plugs
//! into it in turn and inherits whatever demand is still outstanding.
//! Subscribing the next source is trampolined through a [`Wip`] counter, so
//! a long chain of synchronously completing sources does not grow the stack.

use std::sync::{
  atomic::{AtomicBool, AtomicUsize, Ordering},
  Arc,
};

use crate::{
  drain::{DownstreamCell, Wip},
  error::FlowError,
  publisher::{Flow, Publisher},
  subscriber::{BoxedSubscriber, Subscriber},
  subscription::{SubscriptionArbiter, SubscriptionRef},
};

pub struct ConcatOp<T> {
  sources: Arc<[Flow<T>]>,
}

impl<T: Send + 'static> Publisher<T> for ConcatOp<T> {
  fn actual_subscribe(&self, subscriber: BoxedSubscriber<T>) {
    let state = Arc::new(ConcatState {
      sources: self.sources.clone(),
      next_index: AtomicUsize::new(0),
      arbiter: Arc::new(SubscriptionArbiter::new()),
      downstream: DownstreamCell::new(subscriber),
      active: AtomicBool::new(false),
      wip: Wip::default(),
    });
    state.downstream.on_subscribe(state.arbiter.clone());
    state.subscribe_next();
  }
}

struct ConcatState<T> {
  sources: Arc<[Flow<T>]>,
  next_index: AtomicUsize,
  arbiter: Arc<SubscriptionArbiter>,
  downstream: DownstreamCell<T>,
  active: AtomicBool,
  wip: Wip,
}

impl<T: Send + 'static> ConcatState<T> {
  fn subscribe_next(self: &Arc<Self>) {
    self.wip.drain(|| {
      if self.arbiter.is_cancelled() {
        self.downstream.release();
        return;
      }
      if self.active.swap(true, Ordering::AcqRel) {
        return;
      }
      let index = self.next_index.fetch_add(1, Ordering::AcqRel);
      match self.sources.get(index) {
        Some(source) => source.actual_subscribe(Box::new(ConcatSubscriber { state: self.clone() })),
        None => {
          self.downstream.complete();
        }
      }
    });
  }
}

struct ConcatSubscriber<T> {
  state: Arc<ConcatState<T>>,
}

impl<T: Send + 'static> Subscriber<T> for ConcatSubscriber<T> {
  fn on_subscribe(&mut self, subscription: SubscriptionRef) {
    self.state.arbiter.set_upstream(subscription);
  }

  fn on_next(&mut self, value: T) {
    self.state.arbiter.produced(1);
    self.state.downstream.next(value);
  }

  fn on_error(&mut self, err: FlowError) {
    self.state.arbiter.clear_upstream();
    self.state.downstream.error(err);
  }

  fn on_complete(&mut self) {
    self.state.arbiter.clear_upstream();
    self.state.active.store(false, Ordering::Release);
    self.state.subscribe_next();
  }
}

impl<T: Send + 'static> Flow<T> {
  /// Emits every item of each source in order, subscribing to a source only
  /// once the previous one completed. An error ends the whole sequence.
  pub fn concat<I>(sources: I) -> Flow<T>
  where
    I: IntoIterator<Item = Flow<T>>,
  {
    let sources: Vec<Flow<T>> = sources.into_iter().collect();
    Flow::from_publisher(ConcatOp { sources: sources.into() })
  }

  /// This flow followed by `other`.
  pub fn concat_with(&self, other: Flow<T>) -> Flow<T> { Flow::concat([self.clone(), other]) }

  /// Emits `value` before this flow's items.
  pub fn start_with(&self, value: T) -> Flow<T>
  where
    T: Clone + Sync,
  {
    Flow::concat([Flow::of(value), self.clone()])
  }

  /// Emits the items of `prefix` before this flow's items.
  pub fn start_with_iter<I>(&self, prefix: I) -> Flow<T>
  where
    I: IntoIterator<Item = T> + Clone + Send + Sync + 'static,
    I::IntoIter: Send + 'static,
  {
    Flow::concat([Flow::from_iter(prefix), self.clone()])
  }
}
