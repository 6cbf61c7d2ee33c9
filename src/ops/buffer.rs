//! `buffer` and `window`: fixed-size batches.
//!
//! A downstream request for `n` batches becomes an upstream request for
//! `n * size` items. That keeps the trailing short batch deliverable: when
//! the upstream completes early the downstream still has demand for it.

use std::sync::Arc;

use crate::{
  error::{FlowError, Result},
  publisher::{Flow, Publisher},
  subscriber::{BoxedSubscriber, Subscriber},
  subscription::{Subscription, SubscriptionRef},
};

pub struct BufferOp<T> {
  source: Flow<T>,
  size: usize,
}

impl<T: Send + 'static> Publisher<Vec<T>> for BufferOp<T> {
  fn actual_subscribe(&self, subscriber: BoxedSubscriber<Vec<T>>) {
    self.source.actual_subscribe(Box::new(BufferSubscriber {
      downstream: subscriber,
      size: self.size,
      batch: Vec::with_capacity(self.size),
    }))
  }
}

struct BufferSubscriber<T> {
  downstream: BoxedSubscriber<Vec<T>>,
  size: usize,
  batch: Vec<T>,
}

impl<T: Send> Subscriber<T> for BufferSubscriber<T> {
  fn on_subscribe(&mut self, subscription: SubscriptionRef) {
    self
      .downstream
      .on_subscribe(Arc::new(BatchSubscription { upstream: subscription, size: self.size as u64 }));
  }

  fn on_next(&mut self, value: T) {
    self.batch.push(value);
    if self.batch.len() == self.size {
      let batch = std::mem::replace(&mut self.batch, Vec::with_capacity(self.size));
      self.downstream.on_next(batch);
    }
  }

  fn on_error(&mut self, err: FlowError) {
    self.batch.clear();
    self.downstream.on_error(err);
  }

  fn on_complete(&mut self) {
    if !self.batch.is_empty() {
      let batch = std::mem::take(&mut self.batch);
      self.downstream.on_next(batch);
    }
    self.downstream.on_complete();
  }
}

/// Scales downstream demand from batches to items.
struct BatchSubscription {
  upstream: SubscriptionRef,
  size: u64,
}

impl Subscription for BatchSubscription {
  fn request(&self, n: u64) { self.upstream.request(n.saturating_mul(self.size)) }

  fn cancel(&self) { self.upstream.cancel() }
}

fn check_size(size: usize) -> Result<()> {
  if size == 0 {
    return Err(FlowError::illegal_argument("batch size > 0 required but it was 0"));
  }
  Ok(())
}

impl<T: Send + 'static> Flow<T> {
  /// Groups items into `Vec`s of `size`; the last one may be shorter.
  pub fn buffer(&self, size: usize) -> Result<Flow<Vec<T>>> {
    check_size(size)?;
    Ok(Flow::from_publisher(BufferOp { source: self.clone(), size }))
  }

  /// Like [`Flow::buffer`], but every batch is delivered as a flow of its
  /// own, which can be subscribed to any number of times.
  ///
  /// A window is not opened while its items arrive: it is emitted only once
  /// its batch is full (or the upstream completed), already holding every
  /// item it will replay.
  pub fn window(&self, size: usize) -> Result<Flow<Flow<T>>>
  where
    T: Clone + Sync,
  {
    Ok(self.buffer(size)?.map(Flow::from_iter))
  }
}
