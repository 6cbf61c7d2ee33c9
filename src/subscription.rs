//! The demand and cancellation channel between a producer and a consumer.

use std::{
  fmt::{Debug, Formatter},
  sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
  },
};

use parking_lot::Mutex;

/// Demand value that means "no limit".
pub const UNBOUNDED: u64 = u64::MAX;

/// Subscription handed to a subscriber in `on_subscribe`.
///
/// `request` is additive: two calls of `request(2)` allow four items.
/// `cancel` is idempotent and may race with in-flight emission; once it
/// returns no new item is produced for this subscription, although a signal
/// that was already being delivered may still arrive.
pub trait Subscription: Send + Sync {
  /// Signals that the consumer can accept `n` more items.
  fn request(&self, n: u64);

  /// Stops future signals and releases producer resources.
  fn cancel(&self);
}

/// Shared handle to a subscription.
pub type SubscriptionRef = Arc<dyn Subscription>;

impl Debug for dyn Subscription {
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("dyn Subscription").finish_non_exhaustive()
  }
}

/// A subscription that ignores everything, for sources that terminate
/// immediately.
#[derive(Debug, Clone, Copy, Default)]
pub struct EmptySubscription;

impl EmptySubscription {
  pub fn shared() -> SubscriptionRef { Arc::new(EmptySubscription) }
}

impl Subscription for EmptySubscription {
  fn request(&self, _n: u64) {}

  fn cancel(&self) {}
}

/// Handle returned by the `subscribe*` family on [`Flow`](crate::Flow).
///
/// It can request more items (for subscribers that manage their own
/// demand) and cancel the whole chain.
#[derive(Clone)]
pub struct SubscriptionHandle {
  inner: SubscriptionRef,
  cancelled: Arc<AtomicBool>,
}

impl SubscriptionHandle {
  pub(crate) fn new(inner: SubscriptionRef) -> Self {
    Self { inner, cancelled: Arc::new(AtomicBool::new(false)) }
  }

  pub fn request(&self, n: u64) { self.inner.request(n) }

  pub fn cancel(&self) {
    if !self.cancelled.swap(true, Ordering::AcqRel) {
      self.inner.cancel();
    }
  }

  pub fn is_cancelled(&self) -> bool { self.cancelled.load(Ordering::Acquire) }
}

impl Debug for SubscriptionHandle {
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("SubscriptionHandle")
      .field("is_cancelled", &self.is_cancelled())
      .finish()
  }
}

/// An RAII guard cancelling the subscription when dropped.
#[derive(Debug)]
#[must_use]
pub struct SubscriptionGuard(SubscriptionHandle);

impl SubscriptionHandle {
  /// Activates "RAII" behavior: the subscription is cancelled as soon as the
  /// returned guard goes out of scope.
  pub fn cancel_when_dropped(self) -> SubscriptionGuard { SubscriptionGuard(self) }
}

impl Drop for SubscriptionGuard {
  fn drop(&mut self) { self.0.cancel() }
}

/// Hands demand over from one upstream to the next.
///
/// Operators that switch sources during a single subscription (`concat`,
/// `retry`, `on_error_resume_next`, `subscribe_on`) give the arbiter to their
/// downstream once and then plug successive upstreams into it. Demand that
/// was requested but not yet produced is replayed onto each new upstream.
pub(crate) struct SubscriptionArbiter {
  state: Mutex<ArbiterState>,
}

struct ArbiterState {
  requested: u64,
  current: Option<SubscriptionRef>,
  cancelled: bool,
}

impl SubscriptionArbiter {
  pub(crate) fn new() -> Self {
    Self {
      state: Mutex::new(ArbiterState { requested: 0, current: None, cancelled: false }),
    }
  }

  /// Plugs in a new upstream, requesting whatever demand is still
  /// outstanding from it.
  pub(crate) fn set_upstream(&self, upstream: SubscriptionRef) {
    let mut state = self.state.lock();
    if state.cancelled {
      drop(state);
      upstream.cancel();
      return;
    }
    state.current = Some(upstream.clone());
    let outstanding = state.requested;
    drop(state);
    if outstanding > 0 {
      upstream.request(outstanding);
    }
  }

  /// Accounts for `n` items delivered downstream.
  pub(crate) fn produced(&self, n: u64) {
    let mut state = self.state.lock();
    if state.requested != UNBOUNDED {
      debug_assert!(state.requested >= n, "more items produced than requested");
      state.requested = state.requested.saturating_sub(n);
    }
  }

  /// Drops the current upstream without cancelling it, once it terminated.
  pub(crate) fn clear_upstream(&self) { self.state.lock().current = None; }

  pub(crate) fn is_cancelled(&self) -> bool { self.state.lock().cancelled }
}

impl Subscription for SubscriptionArbiter {
  fn request(&self, n: u64) {
    let mut state = self.state.lock();
    if state.cancelled {
      return;
    }
    state.requested = state.requested.saturating_add(n);
    let current = state.current.clone();
    drop(state);
    if let Some(current) = current {
      current.request(n);
    }
  }

  fn cancel(&self) {
    let mut state = self.state.lock();
    if state.cancelled {
      return;
    }
    state.cancelled = true;
    let current = state.current.take();
    drop(state);
    if let Some(current) = current {
      current.cancel();
    }
  }
}
