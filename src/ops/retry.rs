//! `retry` and `retry_with`: resubscribe to the upstream after an error.
//!
//! Each attempt subscribes the source again from scratch, so side effects of
//! the source run again. Resubscription happens synchronously inside the
//! error callback, trampolined so that a source failing synchronously does
//! not grow the stack, unless the policy asks for a delay and supplies a
//! scheduler to wait on.
//!
//! ```rust
//! use std::sync::{
//!   atomic::{AtomicUsize, Ordering},
//!   Arc,
//! };
//!
//! use rxflow::prelude::*;
//!
//! let attempts = Arc::new(AtomicUsize::new(0));
//! let c_attempts = attempts.clone();
//! let flaky = Flow::defer(move || {
//!   if c_attempts.fetch_add(1, Ordering::SeqCst) < 2 {
//!     Flow::error(FlowError::msg("connection reset"))
//!   } else {
//!     Flow::just([1, 2])
//!   }
//! });
//!
//! let ts = TestSubscriber::unbounded();
//! flaky.retry(3).subscribe_with(ts.clone());
//! ts.assert_completed_with(&[1, 2]);
//! assert_eq!(attempts.load(Ordering::SeqCst), 3);
//! ```

use std::sync::{
  atomic::{AtomicBool, AtomicUsize, Ordering},
  Arc,
};

use parking_lot::Mutex;

use crate::{
  drain::{DownstreamCell, Wip},
  error::FlowError,
  publisher::{Flow, Publisher},
  scheduler::{shared, Duration, Scheduler, SchedulerRef, TaskHandle},
  subscriber::{BoxedSubscriber, Subscriber},
  subscription::{Subscription, SubscriptionArbiter, SubscriptionRef},
};

/// Decides whether an error is retried.
pub trait RetryPolicy: Send + Sync {
  /// Returns the delay before the next attempt, or `None` to give up and
  /// forward `err`.
  ///
  /// `attempt` counts the retries already made: it is 0 for the first
  /// error.
  fn should_retry(&self, err: &FlowError, attempt: usize) -> Option<Duration>;

  /// Whether an item reaching the downstream resets the attempt count.
  fn reset_on_success(&self) -> bool { false }

  /// Where non-zero delays are waited on. Without a scheduler the
  /// resubscription is immediate.
  fn scheduler(&self) -> Option<SchedulerRef> { None }
}

/// Retries up to this many times, immediately.
impl RetryPolicy for usize {
  fn should_retry(&self, _err: &FlowError, attempt: usize) -> Option<Duration> {
    if attempt < *self { Some(Duration::ZERO) } else { None }
  }
}

/// Builder for the common retry policies.
///
/// ```rust
/// use rxflow::prelude::*;
///
/// let config = RetryConfig::new()
///   .count(5)
///   .delay(Duration::from_millis(100), TestScheduler::new())
///   .reset_on_success();
/// # let _ = config;
/// ```
#[derive(Clone, Default)]
pub struct RetryConfig {
  count: Option<usize>,
  delay: Option<(Duration, SchedulerRef)>,
  reset_on_success: bool,
}

impl RetryConfig {
  /// Retries forever, immediately, until configured otherwise.
  pub fn new() -> Self { Self::default() }

  /// Limits the number of retries: `count(3)` allows four subscriptions in
  /// total.
  pub fn count(mut self, count: usize) -> Self {
    self.count = Some(count);
    self
  }

  /// Waits `delay` on `scheduler` before each resubscription.
  pub fn delay<S>(mut self, delay: Duration, scheduler: S) -> Self
  where
    S: Scheduler + 'static,
  {
    self.delay = Some((delay, shared(scheduler)));
    self
  }

  /// Resets the attempt count whenever an item gets through.
  pub fn reset_on_success(mut self) -> Self {
    self.reset_on_success = true;
    self
  }
}

impl RetryPolicy for RetryConfig {
  fn should_retry(&self, _err: &FlowError, attempt: usize) -> Option<Duration> {
    match self.count {
      Some(count) if attempt >= count => None,
      _ => Some(self.delay.as_ref().map_or(Duration::ZERO, |(delay, _)| *delay)),
    }
  }

  fn reset_on_success(&self) -> bool { self.reset_on_success }

  fn scheduler(&self) -> Option<SchedulerRef> {
    self.delay.as_ref().map(|(_, scheduler)| scheduler.clone())
  }
}

pub struct RetryOp<T> {
  source: Flow<T>,
  policy: Arc<dyn RetryPolicy>,
}

impl<T: Send + 'static> Publisher<T> for RetryOp<T> {
  fn actual_subscribe(&self, subscriber: BoxedSubscriber<T>) {
    let state = Arc::new(RetryState {
      source: self.source.clone(),
      policy: self.policy.clone(),
      arbiter: SubscriptionArbiter::new(),
      downstream: DownstreamCell::new(subscriber),
      attempts: AtomicUsize::new(0),
      pending: AtomicBool::new(true),
      delayed: Mutex::new(None),
      wip: Wip::default(),
    });
    state.downstream.on_subscribe(state.clone());
    state.resubscribe();
  }
}

struct RetryState<T> {
  source: Flow<T>,
  policy: Arc<dyn RetryPolicy>,
  arbiter: SubscriptionArbiter,
  downstream: DownstreamCell<T>,
  attempts: AtomicUsize,
  pending: AtomicBool,
  delayed: Mutex<Option<TaskHandle>>,
  wip: Wip,
}

impl<T: Send + 'static> RetryState<T> {
  fn resubscribe(self: &Arc<Self>) {
    self.wip.drain(|| {
      if self.arbiter.is_cancelled() {
        self.downstream.release();
        return;
      }
      if self.pending.swap(false, Ordering::AcqRel) {
        self.source.actual_subscribe(Box::new(RetrySubscriber { state: self.clone() }));
      }
    });
  }

  fn retry_after(self: &Arc<Self>, delay: Duration) {
    match self.policy.scheduler() {
      Some(scheduler) if !delay.is_zero() => {
        let state = self.clone();
        let handle = scheduler.schedule_once(
          delay,
          Box::new(move || {
            state.pending.store(true, Ordering::Release);
            state.resubscribe();
          }),
        );
        *self.delayed.lock() = Some(handle);
      }
      _ => {
        self.pending.store(true, Ordering::Release);
        self.resubscribe();
      }
    }
  }
}

impl<T: Send + 'static> Subscription for RetryState<T> {
  fn request(&self, n: u64) { self.arbiter.request(n) }

  fn cancel(&self) {
    self.arbiter.cancel();
    if let Some(handle) = self.delayed.lock().take() {
      handle.cancel();
    }
    self.wip.drain(|| self.downstream.release());
  }
}

struct RetrySubscriber<T> {
  state: Arc<RetryState<T>>,
}

impl<T: Send + 'static> Subscriber<T> for RetrySubscriber<T> {
  fn on_subscribe(&mut self, subscription: SubscriptionRef) {
    self.state.arbiter.set_upstream(subscription);
  }

  fn on_next(&mut self, value: T) {
    if self.state.policy.reset_on_success() {
      self.state.attempts.store(0, Ordering::Release);
    }
    self.state.arbiter.produced(1);
    self.state.downstream.next(value);
  }

  fn on_error(&mut self, err: FlowError) {
    self.state.arbiter.clear_upstream();
    let attempt = self.state.attempts.load(Ordering::Acquire);
    match self.state.policy.should_retry(&err, attempt) {
      Some(delay) => {
        self.state.attempts.store(attempt + 1, Ordering::Release);
        tracing::debug!(attempt = attempt + 1, ?delay, error = %err, "retrying after error");
        self.state.retry_after(delay);
      }
      None => {
        self.state.downstream.error(err);
      }
    }
  }

  fn on_complete(&mut self) {
    self.state.arbiter.clear_upstream();
    self.state.downstream.complete();
  }
}

impl<T: Send + 'static> Flow<T> {
  /// Resubscribes up to `count` times after an error; the error of the last
  /// attempt is forwarded.
  pub fn retry(&self, count: usize) -> Flow<T> { self.retry_with(count) }

  /// Resubscribes as long as `policy` allows.
  pub fn retry_with<P>(&self, policy: P) -> Flow<T>
  where
    P: RetryPolicy + 'static,
  {
    Flow::from_publisher(RetryOp { source: self.clone(), policy: Arc::new(policy) })
  }
}

#[cfg(test)]
mod tests {
  use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
  };

  use crate::prelude::*;

  fn counting_failure(attempts: &Arc<AtomicUsize>) -> Flow<i32> {
    let attempts = attempts.clone();
    Flow::defer(move || {
      attempts.fetch_add(1, Ordering::SeqCst);
      Flow::just([1]).concat_with(Flow::error(FlowError::msg("always")))
    })
  }

  #[test]
  fn gives_up_after_count_plus_one_attempts() {
    let attempts = Arc::new(AtomicUsize::new(0));
    let ts = TestSubscriber::unbounded();
    counting_failure(&attempts).retry(3).subscribe_with(ts.clone());
    assert_eq!(attempts.load(Ordering::SeqCst), 4);
    assert_eq!(ts.values(), vec![1, 1, 1, 1]);
    assert_eq!(ts.errors(), vec![FlowError::msg("always")]);
    assert_eq!(ts.completions(), 0);
  }

  #[test]
  fn demand_survives_resubscription() {
    let attempts = Arc::new(AtomicUsize::new(0));
    let ts = TestSubscriber::new(2);
    counting_failure(&attempts).retry(5).subscribe_with(ts.clone());
    assert_eq!(ts.values(), vec![1, 1]);
    ts.request(1);
    assert_eq!(ts.values(), vec![1, 1, 1]);
    assert!(!ts.is_terminated());
  }

  #[test]
  fn synchronous_failures_do_not_recurse() {
    let attempts = Arc::new(AtomicUsize::new(0));
    let c_attempts = attempts.clone();
    let ts = TestSubscriber::<i32>::unbounded();
    Flow::defer(move || {
      c_attempts.fetch_add(1, Ordering::SeqCst);
      Flow::error(FlowError::msg("down"))
    })
    .retry(50_000)
    .subscribe_with(ts.clone());
    assert_eq!(attempts.load(Ordering::SeqCst), 50_001);
    assert_eq!(ts.terminal_count(), 1);
  }

  #[test]
  fn delayed_retry_waits_on_scheduler() {
    let scheduler = TestScheduler::new();
    let attempts = Arc::new(AtomicUsize::new(0));
    let ts = TestSubscriber::unbounded();
    counting_failure(&attempts)
      .retry_with(RetryConfig::new().count(2).delay(Duration::from_secs(1), scheduler.clone()))
      .subscribe_with(ts.clone());
    assert_eq!(attempts.load(Ordering::SeqCst), 1);
    scheduler.advance_by(Duration::from_millis(999));
    assert_eq!(attempts.load(Ordering::SeqCst), 1);
    scheduler.advance_by(Duration::from_millis(1));
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
    scheduler.advance_by(Duration::from_secs(5));
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
    assert_eq!(ts.errors().len(), 1);
  }

  #[test]
  fn cancel_drops_pending_retry() {
    let scheduler = TestScheduler::new();
    let attempts = Arc::new(AtomicUsize::new(0));
    let ts = TestSubscriber::unbounded();
    let handle = counting_failure(&attempts)
      .retry_with(RetryConfig::new().delay(Duration::from_secs(1), scheduler.clone()))
      .subscribe_with(ts.clone());
    handle.cancel();
    scheduler.advance_by(Duration::from_secs(10));
    assert_eq!(attempts.load(Ordering::SeqCst), 1);
    assert_eq!(scheduler.pending(), 0);
  }

  #[test]
  fn reset_on_success_restarts_the_count() {
    let attempts = Arc::new(AtomicUsize::new(0));
    let ts = TestSubscriber::new(10);
    counting_failure(&attempts)
      .retry_with(RetryConfig::new().count(1).reset_on_success())
      .subscribe_with(ts.clone());
    // every attempt emits before failing, so the single retry is never used
    // up; the eleventh attempt waits for demand
    assert_eq!(attempts.load(Ordering::SeqCst), 11);
    assert_eq!(ts.values().len(), 10);
    assert!(!ts.is_terminated());
  }
}
