//! A recording subscriber for tests.
//!
//! `TestSubscriber` keeps every signal it receives and lets the test drive
//! demand by hand. It also watches the protocol from the consumer side:
//! items beyond the requested demand, signals after a terminal and duplicate
//! `on_subscribe` calls are recorded as violations instead of panicking, so
//! a test can assert on them.
//!
//! ```rust
//! use rxflow::prelude::*;
//!
//! let ts = TestSubscriber::new(2);
//! Flow::just([1, 2, 3]).subscribe_with(ts.clone());
//! assert_eq!(ts.values(), vec![1, 2]);
//!
//! ts.request(1);
//! assert_eq!(ts.values(), vec![1, 2, 3]);
//! assert_eq!(ts.completions(), 1);
//! ```

use std::sync::Arc;

use parking_lot::Mutex;

use crate::{
  error::FlowError,
  subscriber::Subscriber,
  subscription::{SubscriptionRef, UNBOUNDED},
};

struct Record<T> {
  subscription: Option<SubscriptionRef>,
  subscribe_calls: usize,
  values: Vec<T>,
  errors: Vec<FlowError>,
  completions: usize,
  outstanding: u64,
  violations: Vec<String>,
}

/// Recording subscriber; clones share the same record.
pub struct TestSubscriber<T> {
  record: Arc<Mutex<Record<T>>>,
  initial_request: u64,
}

impl<T> Clone for TestSubscriber<T> {
  fn clone(&self) -> Self {
    Self { record: self.record.clone(), initial_request: self.initial_request }
  }
}

impl<T> TestSubscriber<T> {
  /// Requests `initial_request` items on subscribe (nothing when zero).
  pub fn new(initial_request: u64) -> Self {
    Self {
      record: Arc::new(Mutex::new(Record {
        subscription: None,
        subscribe_calls: 0,
        values: Vec::new(),
        errors: Vec::new(),
        completions: 0,
        outstanding: 0,
        violations: Vec::new(),
      })),
      initial_request,
    }
  }

  pub fn unbounded() -> Self { Self::new(UNBOUNDED) }

  /// Requests more items from the current subscription.
  pub fn request(&self, n: u64) {
    let subscription = {
      let mut record = self.record.lock();
      record.outstanding = record.outstanding.saturating_add(n);
      record.subscription.clone()
    };
    if let Some(subscription) = subscription {
      subscription.request(n);
    }
  }

  pub fn cancel(&self) {
    let subscription = self.record.lock().subscription.clone();
    if let Some(subscription) = subscription {
      subscription.cancel();
    }
  }

  pub fn values(&self) -> Vec<T>
  where
    T: Clone,
  {
    self.record.lock().values.clone()
  }

  pub fn value_count(&self) -> usize { self.record.lock().values.len() }

  pub fn errors(&self) -> Vec<FlowError> { self.record.lock().errors.clone() }

  pub fn completions(&self) -> usize { self.record.lock().completions }

  /// Number of terminal signals received so far.
  pub fn terminal_count(&self) -> usize {
    let record = self.record.lock();
    record.errors.len() + record.completions
  }

  pub fn is_terminated(&self) -> bool { self.terminal_count() > 0 }

  pub fn is_subscribed(&self) -> bool { self.record.lock().subscribe_calls > 0 }

  /// Protocol violations observed from the consumer side.
  pub fn violations(&self) -> Vec<String> { self.record.lock().violations.clone() }

  /// Asserts the subscriber saw exactly `expected`, one completion and no
  /// protocol violation.
  #[track_caller]
  pub fn assert_completed_with(&self, expected: &[T])
  where
    T: Clone + PartialEq + std::fmt::Debug,
  {
    let record = self.record.lock();
    assert_eq!(record.values, expected);
    assert!(record.errors.is_empty(), "unexpected errors: {:?}", record.errors);
    assert_eq!(record.completions, 1, "expected exactly one completion");
    assert!(record.violations.is_empty(), "violations: {:?}", record.violations);
  }
}

impl<T: Send> Subscriber<T> for TestSubscriber<T> {
  fn on_subscribe(&mut self, subscription: SubscriptionRef) {
    {
      let mut record = self.record.lock();
      record.subscribe_calls += 1;
      if record.subscribe_calls > 1 {
        record.violations.push("on_subscribe called more than once".into());
        drop(record);
        subscription.cancel();
        return;
      }
      record.subscription = Some(subscription);
    }
    if self.initial_request > 0 {
      self.request(self.initial_request);
    }
  }

  fn on_next(&mut self, value: T) {
    let mut record = self.record.lock();
    if record.errors.len() + record.completions > 0 {
      record.violations.push("on_next after terminal signal".into());
    }
    if record.outstanding == 0 {
      record.violations.push("on_next without outstanding demand".into());
    } else if record.outstanding != UNBOUNDED {
      record.outstanding -= 1;
    }
    record.values.push(value);
  }

  fn on_error(&mut self, err: FlowError) {
    let mut record = self.record.lock();
    if record.errors.len() + record.completions > 0 {
      record.violations.push("on_error after terminal signal".into());
    }
    record.errors.push(err);
  }

  fn on_complete(&mut self) {
    let mut record = self.record.lock();
    if record.errors.len() + record.completions > 0 {
      record.violations.push("on_complete after terminal signal".into());
    }
    record.completions += 1;
  }
}
