//! `do_on_next`, `do_on_error` and `do_on_complete`: side effects on the
//! signals passing by, without changing them.

use std::sync::Arc;

use crate::{
  error::FlowError,
  publisher::{Flow, Publisher},
  subscriber::{BoxedSubscriber, Subscriber},
  subscription::SubscriptionRef,
};

type OnNext<T> = Arc<dyn Fn(&T) + Send + Sync>;
type OnError = Arc<dyn Fn(&FlowError) + Send + Sync>;
type OnComplete = Arc<dyn Fn() + Send + Sync>;

pub struct TapOp<T> {
  source: Flow<T>,
  hooks: Hooks<T>,
}

struct Hooks<T> {
  next: Option<OnNext<T>>,
  error: Option<OnError>,
  complete: Option<OnComplete>,
}

impl<T> Clone for Hooks<T> {
  fn clone(&self) -> Self {
    Self { next: self.next.clone(), error: self.error.clone(), complete: self.complete.clone() }
  }
}

impl<T> Default for Hooks<T> {
  fn default() -> Self { Self { next: None, error: None, complete: None } }
}

impl<T: Send + 'static> Publisher<T> for TapOp<T> {
  fn actual_subscribe(&self, subscriber: BoxedSubscriber<T>) {
    self
      .source
      .actual_subscribe(Box::new(TapSubscriber { downstream: subscriber, hooks: self.hooks.clone() }))
  }
}

struct TapSubscriber<T> {
  downstream: BoxedSubscriber<T>,
  hooks: Hooks<T>,
}

impl<T: Send> Subscriber<T> for TapSubscriber<T> {
  fn on_subscribe(&mut self, subscription: SubscriptionRef) {
    self.downstream.on_subscribe(subscription)
  }

  fn on_next(&mut self, value: T) {
    if let Some(hook) = &self.hooks.next {
      hook(&value);
    }
    self.downstream.on_next(value)
  }

  fn on_error(&mut self, err: FlowError) {
    if let Some(hook) = &self.hooks.error {
      hook(&err);
    }
    self.downstream.on_error(err)
  }

  fn on_complete(&mut self) {
    if let Some(hook) = &self.hooks.complete {
      hook();
    }
    self.downstream.on_complete()
  }
}

impl<T: Send + 'static> Flow<T> {
  fn tap_with(&self, hooks: Hooks<T>) -> Flow<T> {
    Flow::from_publisher(TapOp { source: self.clone(), hooks })
  }

  /// Calls `f` with a reference to every item before passing it on.
  pub fn do_on_next<F>(&self, f: F) -> Flow<T>
  where
    F: Fn(&T) + Send + Sync + 'static,
  {
    self.tap_with(Hooks { next: Some(Arc::new(f)), ..Hooks::default() })
  }

  pub fn do_on_error<F>(&self, f: F) -> Flow<T>
  where
    F: Fn(&FlowError) + Send + Sync + 'static,
  {
    self.tap_with(Hooks { error: Some(Arc::new(f)), ..Hooks::default() })
  }

  pub fn do_on_complete<F>(&self, f: F) -> Flow<T>
  where
    F: Fn() + Send + Sync + 'static,
  {
    self.tap_with(Hooks { complete: Some(Arc::new(f)), ..Hooks::default() })
  }
}
