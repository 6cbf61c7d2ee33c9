//! `on_error_resume_next`, `on_error_resume_with` and `on_error_return`:
//! turn an upstream error into an alternate sequence.
//!
//! The switch happens once: an error raised by the fallback itself reaches
//! the downstream. Demand not yet served by the failed upstream carries over
//! to the fallback.

use std::sync::{
  atomic::{AtomicBool, Ordering},
  Arc,
};

use crate::{
  drain::DownstreamCell,
  error::FlowError,
  publisher::{Flow, Publisher},
  subscriber::{BoxedSubscriber, Subscriber},
  subscription::{Subscription, SubscriptionArbiter, SubscriptionRef},
};

type Fallback<T> = Arc<dyn Fn(FlowError) -> Flow<T> + Send + Sync>;

pub struct OnErrorResumeOp<T> {
  source: Flow<T>,
  fallback: Fallback<T>,
}

impl<T: Send + 'static> Publisher<T> for OnErrorResumeOp<T> {
  fn actual_subscribe(&self, subscriber: BoxedSubscriber<T>) {
    let state = Arc::new(ResumeState {
      fallback: self.fallback.clone(),
      arbiter: SubscriptionArbiter::new(),
      downstream: DownstreamCell::new(subscriber),
      switched: AtomicBool::new(false),
    });
    state.downstream.on_subscribe(state.clone());
    self.source.actual_subscribe(Box::new(ResumeSubscriber { state, fallback: false }));
  }
}

struct ResumeState<T> {
  fallback: Fallback<T>,
  arbiter: SubscriptionArbiter,
  downstream: DownstreamCell<T>,
  switched: AtomicBool,
}

impl<T: Send> Subscription for ResumeState<T> {
  fn request(&self, n: u64) { self.arbiter.request(n) }

  fn cancel(&self) {
    self.arbiter.cancel();
    self.downstream.release();
  }
}

struct ResumeSubscriber<T> {
  state: Arc<ResumeState<T>>,
  fallback: bool,
}

impl<T: Send + 'static> Subscriber<T> for ResumeSubscriber<T> {
  fn on_subscribe(&mut self, subscription: SubscriptionRef) {
    self.state.arbiter.set_upstream(subscription);
  }

  fn on_next(&mut self, value: T) {
    self.state.arbiter.produced(1);
    self.state.downstream.next(value);
  }

  fn on_error(&mut self, err: FlowError) {
    self.state.arbiter.clear_upstream();
    if self.fallback || self.state.switched.swap(true, Ordering::AcqRel) {
      self.state.downstream.error(err);
      return;
    }
    if self.state.arbiter.is_cancelled() {
      return;
    }
    tracing::debug!(error = %err, "switching to fallback after error");
    let next = (self.state.fallback)(err);
    next.actual_subscribe(Box::new(ResumeSubscriber { state: self.state.clone(), fallback: true }));
  }

  fn on_complete(&mut self) {
    self.state.arbiter.clear_upstream();
    self.state.downstream.complete();
  }
}

impl<T: Send + 'static> Flow<T> {
  /// Continues with the flow built by `f` from the upstream error.
  pub fn on_error_resume_with<F>(&self, f: F) -> Flow<T>
  where
    F: Fn(FlowError) -> Flow<T> + Send + Sync + 'static,
  {
    Flow::from_publisher(OnErrorResumeOp { source: self.clone(), fallback: Arc::new(f) })
  }

  /// Continues with `fallback` when the upstream fails.
  ///
  /// ```rust
  /// use rxflow::prelude::*;
  ///
  /// let ts = TestSubscriber::unbounded();
  /// Flow::just([1, 2])
  ///   .concat_with(Flow::error(FlowError::msg("lost")))
  ///   .on_error_resume_next(Flow::just([9]))
  ///   .subscribe_with(ts.clone());
  /// ts.assert_completed_with(&[1, 2, 9]);
  /// ```
  pub fn on_error_resume_next(&self, fallback: Flow<T>) -> Flow<T> {
    self.on_error_resume_with(move |_| fallback.clone())
  }

  /// Replaces an upstream error with one final item built from it.
  pub fn on_error_return<F>(&self, f: F) -> Flow<T>
  where
    T: Clone + Sync,
    F: Fn(FlowError) -> T + Send + Sync + 'static,
  {
    self.on_error_resume_with(move |err| Flow::of(f(err)))
  }
}

#[cfg(test)]
mod tests {
  use crate::prelude::*;

  fn failing() -> Flow<i32> { Flow::just([1, 2]).concat_with(Flow::error(FlowError::msg("boom"))) }

  #[test]
  fn fallback_inherits_outstanding_demand() {
    let ts = TestSubscriber::new(3);
    failing().on_error_resume_next(Flow::just([7, 8])).subscribe_with(ts.clone());
    assert_eq!(ts.values(), vec![1, 2, 7]);
    ts.request(1);
    ts.assert_completed_with(&[1, 2, 7, 8]);
  }

  #[test]
  fn fallback_error_is_forwarded() {
    let ts = TestSubscriber::unbounded();
    failing()
      .on_error_resume_next(Flow::just([3]).concat_with(Flow::error(FlowError::msg("again"))))
      .subscribe_with(ts.clone());
    assert_eq!(ts.values(), vec![1, 2, 3]);
    assert_eq!(ts.errors(), vec![FlowError::msg("again")]);
  }

  #[test]
  fn fallback_sees_the_error() {
    let ts = TestSubscriber::unbounded();
    failing()
      .on_error_return(|err| if err == FlowError::msg("boom") { -1 } else { 0 })
      .subscribe_with(ts.clone());
    ts.assert_completed_with(&[1, 2, -1]);

    let ts = TestSubscriber::unbounded();
    failing()
      .on_error_resume_with(|err| Flow::of(err.to_string().len() as i32))
      .subscribe_with(ts.clone());
    ts.assert_completed_with(&[1, 2, 4]);
  }

  #[test]
  fn completion_without_error_skips_fallback() {
    let ts = TestSubscriber::unbounded();
    Flow::just([5]).on_error_resume_next(Flow::just([6])).subscribe_with(ts.clone());
    ts.assert_completed_with(&[5]);
  }
}
