//! Subscriber trait and implementations
//!
//! A subscriber receives exactly one `on_subscribe`, then any number of
//! `on_next` calls bounded by the demand it requested, then at most one of
//! `on_error` / `on_complete`.

use std::{
  marker::PhantomData,
  sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc,
  },
};

use parking_lot::Mutex;

use crate::{
  drain::{Demand, Serialized},
  error::FlowError,
  subscription::{Subscription, SubscriptionRef, UNBOUNDED},
};

/// The consumer side of a subscription.
pub trait Subscriber<T>: Send {
  /// Receives the subscription; demand starts at zero until `request`.
  fn on_subscribe(&mut self, subscription: SubscriptionRef);

  fn on_next(&mut self, value: T);

  /// Terminal: nothing follows an error.
  fn on_error(&mut self, err: FlowError);

  /// Terminal: nothing follows completion.
  fn on_complete(&mut self);
}

/// Type-erased subscriber, as accepted by
/// [`Publisher::actual_subscribe`](crate::Publisher::actual_subscribe).
pub type BoxedSubscriber<T> = Box<dyn Subscriber<T>>;

impl<T, S> Subscriber<T> for Box<S>
where
  S: Subscriber<T> + ?Sized,
{
  #[inline]
  fn on_subscribe(&mut self, subscription: SubscriptionRef) { (**self).on_subscribe(subscription) }

  #[inline]
  fn on_next(&mut self, value: T) { (**self).on_next(value) }

  #[inline]
  fn on_error(&mut self, err: FlowError) { (**self).on_error(err) }

  #[inline]
  fn on_complete(&mut self) { (**self).on_complete() }
}

/// One signal of a sequence, as a value.
#[derive(Debug, Clone, PartialEq)]
pub enum Signal<T> {
  Next(T),
  Error(FlowError),
  Complete,
}

impl<T> Signal<T> {
  pub fn is_terminal(&self) -> bool { !matches!(self, Signal::Next(_)) }

  /// Replays this signal onto `subscriber`.
  pub fn dispatch<S>(self, subscriber: &mut S)
  where
    S: Subscriber<T> + ?Sized,
  {
    match self {
      Signal::Next(value) => subscriber.on_next(value),
      Signal::Error(err) => subscriber.on_error(err),
      Signal::Complete => subscriber.on_complete(),
    }
  }
}

// ============================================================================
// FnSubscriber - Closure adapter
// ============================================================================

/// Closure-backed subscriber requesting unbounded demand.
///
/// This backs `Flow::subscribe`, `subscribe_err` and `subscribe_all`.
pub struct FnSubscriber<T, N, E, C> {
  next: N,
  error: E,
  complete: C,
  _item: PhantomData<fn(T)>,
}

impl<T, N, E, C> FnSubscriber<T, N, E, C>
where
  N: FnMut(T) + Send,
  E: FnMut(FlowError) + Send,
  C: FnMut() + Send,
{
  pub fn new(next: N, error: E, complete: C) -> Self {
    Self { next, error, complete, _item: PhantomData }
  }
}

impl<T, N, E, C> Subscriber<T> for FnSubscriber<T, N, E, C>
where
  N: FnMut(T) + Send,
  E: FnMut(FlowError) + Send,
  C: FnMut() + Send,
{
  fn on_subscribe(&mut self, subscription: SubscriptionRef) { subscription.request(UNBOUNDED); }

  #[inline]
  fn on_next(&mut self, value: T) { (self.next)(value) }

  fn on_error(&mut self, err: FlowError) { (self.error)(err) }

  fn on_complete(&mut self) { (self.complete)() }
}

/// Error handler used when the consumer supplied none.
pub(crate) fn log_unhandled(err: FlowError) {
  tracing::error!(error = %err, "unhandled error reached a subscriber without an error handler");
}

pub(crate) fn ignore_complete() {}

// ============================================================================
// StrictSubscriber - protocol boundary for user subscribers
// ============================================================================

/// Wraps a user subscriber, enforcing the subscription protocol around it.
///
/// Signals are serialized, items beyond the requested demand are turned into
/// a `ProtocolViolation` error (the upstream is cancelled), `request(0)` is
/// reported as `IllegalArgument`, and nothing reaches the subscriber after
/// its terminal signal.
pub(crate) struct StrictSubscriber<T> {
  state: Arc<StrictState<T>>,
}

pub(crate) struct StrictState<T> {
  downstream: Serialized<T>,
  upstream: Mutex<Option<SubscriptionRef>>,
  /// Demand requested before the upstream arrived; guarded by `upstream`.
  early: AtomicU64,
  requested: Demand,
  cancelled: AtomicBool,
  subscribed: AtomicBool,
}

impl<T: Send + 'static> StrictSubscriber<T> {
  pub(crate) fn new(subscriber: BoxedSubscriber<T>) -> Self {
    Self {
      state: Arc::new(StrictState {
        downstream: Serialized::new(subscriber),
        upstream: Mutex::new(None),
        early: AtomicU64::new(0),
        requested: Demand::default(),
        cancelled: AtomicBool::new(false),
        subscribed: AtomicBool::new(false),
      }),
    }
  }

  /// The subscription the caller of `subscribe` holds on to.
  pub(crate) fn handle(&self) -> SubscriptionRef { self.state.clone() }
}

impl<T> StrictState<T> {
  fn cancel_upstream(&self) {
    let upstream = self.upstream.lock().take();
    if let Some(upstream) = upstream {
      upstream.cancel();
    }
  }

  fn violation(&self, err: FlowError) {
    tracing::warn!(error = %err, "subscription protocol violated");
    self.cancelled.store(true, Ordering::Release);
    self.cancel_upstream();
    self.downstream.error(err);
  }
}

impl<T: Send + 'static> Subscriber<T> for StrictSubscriber<T> {
  fn on_subscribe(&mut self, subscription: SubscriptionRef) {
    if self.state.subscribed.swap(true, Ordering::AcqRel) {
      tracing::warn!("duplicate on_subscribe, cancelling the second subscription");
      subscription.cancel();
      return;
    }
    let early = {
      let mut upstream = self.state.upstream.lock();
      *upstream = Some(subscription.clone());
      self.state.early.swap(0, Ordering::AcqRel)
    };
    if self.state.cancelled.load(Ordering::Acquire) {
      self.state.cancel_upstream();
      return;
    }
    self.state.downstream.on_subscribe(self.state.clone());
    if early > 0 {
      subscription.request(early);
    }
  }

  fn on_next(&mut self, value: T) {
    if self.state.downstream.is_terminated() {
      return;
    }
    if self.state.requested.get() == 0 {
      self
        .state
        .violation(FlowError::protocol("on_next delivered without outstanding demand"));
      return;
    }
    self.state.requested.produced(1);
    self.state.downstream.next(value);
  }

  fn on_error(&mut self, err: FlowError) {
    if !self.state.downstream.error(err) {
      tracing::trace!("error dropped after terminal signal");
    }
    self.state.upstream.lock().take();
  }

  fn on_complete(&mut self) {
    if !self.state.downstream.complete() {
      tracing::trace!("completion dropped after terminal signal");
    }
    self.state.upstream.lock().take();
  }
}

impl<T: Send + 'static> Subscription for StrictState<T> {
  fn request(&self, n: u64) {
    if self.cancelled.load(Ordering::Acquire) {
      return;
    }
    if n == 0 {
      self.violation(FlowError::illegal_argument("request must be positive"));
      return;
    }
    self.requested.add(n);
    let upstream = {
      let upstream = self.upstream.lock();
      if upstream.is_none() {
        let early = self.early.load(Ordering::Acquire);
        self.early.store(early.saturating_add(n), Ordering::Release);
      }
      upstream.clone()
    };
    if let Some(upstream) = upstream {
      upstream.request(n);
    }
  }

  fn cancel(&self) {
    if !self.cancelled.swap(true, Ordering::AcqRel) {
      self.cancel_upstream();
    }
  }
}

#[cfg(test)]
mod tests {
  use std::sync::atomic::Ordering;

  use super::*;
  use crate::{subscription::test_support::RecordingSubscription, test_subscriber::TestSubscriber};

  #[test]
  fn closure_subscriber_requests_unbounded() {
    let upstream = Arc::new(RecordingSubscription::default());
    let mut seen = vec![];
    {
      let mut subscriber = FnSubscriber::new(|v: i32| seen.push(v), log_unhandled, ignore_complete);
      subscriber.on_subscribe(upstream.clone());
      subscriber.on_next(1);
      subscriber.on_next(2);
    }
    assert_eq!(seen, vec![1, 2]);
    assert_eq!(upstream.requested.load(Ordering::SeqCst), UNBOUNDED);
  }

  #[test]
  fn strict_rejects_items_beyond_demand() {
    let ts = TestSubscriber::<i32>::new(1);
    let upstream = Arc::new(RecordingSubscription::default());
    let mut strict = StrictSubscriber::new(Box::new(ts.clone()));
    strict.on_subscribe(upstream.clone());
    strict.on_next(1);
    strict.on_next(2);
    strict.on_complete();

    assert_eq!(ts.values(), vec![1]);
    assert!(ts.errors()[0].is_protocol_violation());
    assert_eq!(ts.completions(), 0);
    assert_eq!(upstream.cancels.load(Ordering::SeqCst), 1);
  }

  #[test]
  fn strict_rejects_zero_request() {
    let ts = TestSubscriber::<i32>::new(0);
    let upstream = Arc::new(RecordingSubscription::default());
    let mut strict = StrictSubscriber::new(Box::new(ts.clone()));
    strict.on_subscribe(upstream.clone());
    ts.request(0);

    assert!(matches!(ts.errors()[0], FlowError::IllegalArgument(_)));
    assert_eq!(upstream.cancels.load(Ordering::SeqCst), 1);
  }

  #[test]
  fn strict_forwards_demand_requested_before_subscribe() {
    let ts = TestSubscriber::<i32>::new(0);
    let upstream = Arc::new(RecordingSubscription::default());
    let mut strict = StrictSubscriber::new(Box::new(ts.clone()));
    let handle = strict.handle();
    handle.request(3);
    handle.request(2);
    assert_eq!(upstream.requested.load(Ordering::SeqCst), 0);

    strict.on_subscribe(upstream.clone());
    assert_eq!(upstream.requested.load(Ordering::SeqCst), 5);
    assert!(ts.errors().is_empty());

    handle.request(1);
    assert_eq!(upstream.requested.load(Ordering::SeqCst), 6);
  }

  #[test]
  fn strict_cancels_duplicate_subscription() {
    let ts = TestSubscriber::<i32>::new(0);
    let first = Arc::new(RecordingSubscription::default());
    let second = Arc::new(RecordingSubscription::default());
    let mut strict = StrictSubscriber::new(Box::new(ts.clone()));
    strict.on_subscribe(first.clone());
    strict.on_subscribe(second.clone());
    assert_eq!(second.cancels.load(Ordering::SeqCst), 1);
    assert_eq!(first.cancels.load(Ordering::SeqCst), 0);
  }

  #[test]
  fn signal_dispatch() {
    let ts = TestSubscriber::<&str>::unbounded();
    let mut target = ts.clone();
    Signal::Next("a").dispatch(&mut target);
    Signal::<&str>::Complete.dispatch(&mut target);
    assert_eq!(ts.values(), vec!["a"]);
    assert!(Signal::<()>::Complete.is_terminal());
    assert!(!Signal::Next(()).is_terminal());
  }
}
