use std::marker::PhantomData;

use crate::{
  error::FlowError,
  publisher::{Flow, Publisher},
  subscriber::BoxedSubscriber,
  subscription::EmptySubscription,
};

/// Terminates every subscriber with a clone of the stored error.
pub struct ErrorPublisher<T> {
  err: FlowError,
  _item: PhantomData<fn() -> T>,
}

impl<T> Publisher<T> for ErrorPublisher<T> {
  fn actual_subscribe(&self, mut subscriber: BoxedSubscriber<T>) {
    subscriber.on_subscribe(EmptySubscription::shared());
    subscriber.on_error(self.err.clone());
  }
}

/// Subscribes and then stays silent forever.
pub struct NeverPublisher<T>(PhantomData<fn() -> T>);

impl<T> Publisher<T> for NeverPublisher<T> {
  fn actual_subscribe(&self, mut subscriber: BoxedSubscriber<T>) {
    subscriber.on_subscribe(EmptySubscription::shared());
  }
}

impl<T: Send + 'static> Flow<T> {
  /// Emits no items and terminates with `err`.
  pub fn error(err: FlowError) -> Self {
    Self::from_publisher(ErrorPublisher { err, _item: PhantomData })
  }

  /// Emits nothing and never terminates.
  pub fn never() -> Self { Self::from_publisher(NeverPublisher(PhantomData)) }
}

#[cfg(test)]
mod tests {
  use crate::prelude::*;

  #[test]
  fn error_is_delivered_without_demand() {
    let ts = TestSubscriber::<u8>::new(0);
    Flow::error(FlowError::msg("boom")).subscribe_with(ts.clone());
    assert_eq!(ts.errors(), vec![FlowError::msg("boom")]);
    assert_eq!(ts.completions(), 0);
  }

  #[test]
  fn never_stays_silent() {
    let ts = TestSubscriber::<u8>::unbounded();
    Flow::never().subscribe_with(ts.clone());
    assert!(ts.is_subscribed());
    assert!(!ts.is_terminated());
  }
}
