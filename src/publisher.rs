//! Publisher trait and the `Flow` handle.
//!
//! A [`Publisher`] is a reusable definition of a sequence. Every call to
//! [`Publisher::actual_subscribe`] runs the production logic again with
//! fresh per-subscription state, unless the publisher is explicitly hot (see
//! [`ConnectableFlow`](crate::connectable::ConnectableFlow)).
//!
//! [`Flow`] wraps any publisher behind an `Arc` so that it can be cloned,
//! stored in operators and extended with the operator methods defined in
//! [`ops`](crate::ops).

use std::{fmt::Debug, sync::Arc};

use crate::{
  error::FlowError,
  subscriber::{
    ignore_complete, log_unhandled, BoxedSubscriber, FnSubscriber, StrictSubscriber, Subscriber,
  },
  subscription::SubscriptionHandle,
};

/// A source of a value sequence.
pub trait Publisher<T>: Send + Sync {
  /// Subscribes `subscriber`, which first receives `on_subscribe`.
  ///
  /// This is the raw protocol entry point used by operators; application
  /// code normally goes through [`Flow::subscribe_with`] and friends, which
  /// add protocol enforcement around the subscriber.
  fn actual_subscribe(&self, subscriber: BoxedSubscriber<T>);
}

impl<T, P> Publisher<T> for Arc<P>
where
  P: Publisher<T> + ?Sized,
{
  #[inline]
  fn actual_subscribe(&self, subscriber: BoxedSubscriber<T>) { (**self).actual_subscribe(subscriber) }
}

/// Cheap-to-clone handle over a type-erased publisher.
pub struct Flow<T> {
  source: Arc<dyn Publisher<T>>,
}

impl<T> Clone for Flow<T> {
  fn clone(&self) -> Self { Self { source: self.source.clone() } }
}

impl<T> Debug for Flow<T> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Flow").finish_non_exhaustive()
  }
}

impl<T> Publisher<T> for Flow<T> {
  #[inline]
  fn actual_subscribe(&self, subscriber: BoxedSubscriber<T>) { self.source.actual_subscribe(subscriber) }
}

impl<T: Send + 'static> Flow<T> {
  /// Wraps a publisher implementation.
  pub fn from_publisher<P>(publisher: P) -> Self
  where
    P: Publisher<T> + 'static,
  {
    Self { source: Arc::new(publisher) }
  }

  /// Subscribes a subscriber that manages its own demand.
  ///
  /// The subscriber is wrapped in a protocol boundary: its signals are
  /// serialized and it never observes more items than it requested.
  pub fn subscribe_with<S>(&self, subscriber: S) -> SubscriptionHandle
  where
    S: Subscriber<T> + 'static,
  {
    let strict = StrictSubscriber::new(Box::new(subscriber));
    let handle = SubscriptionHandle::new(strict.handle());
    self.actual_subscribe(Box::new(strict));
    handle
  }

  /// Subscribes with an `on_next` callback and unbounded demand.
  ///
  /// An error reaching this subscriber is logged through `tracing`.
  pub fn subscribe<N>(&self, next: N) -> SubscriptionHandle
  where
    N: FnMut(T) + Send + 'static,
  {
    self.subscribe_with(FnSubscriber::new(next, log_unhandled, ignore_complete))
  }

  /// Subscribes with `on_next` and `on_error` callbacks.
  pub fn subscribe_err<N, E>(&self, next: N, error: E) -> SubscriptionHandle
  where
    N: FnMut(T) + Send + 'static,
    E: FnMut(FlowError) + Send + 'static,
  {
    self.subscribe_with(FnSubscriber::new(next, error, ignore_complete))
  }

  /// Subscribes with all three callbacks.
  pub fn subscribe_all<N, E, C>(&self, next: N, error: E, complete: C) -> SubscriptionHandle
  where
    N: FnMut(T) + Send + 'static,
    E: FnMut(FlowError) + Send + 'static,
    C: FnMut() + Send + 'static,
  {
    self.subscribe_with(FnSubscriber::new(next, error, complete))
  }
}
