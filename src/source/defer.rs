use std::sync::Arc;

use crate::{
  publisher::{Flow, Publisher},
  subscriber::BoxedSubscriber,
};

/// Builds the real publisher at subscribe time.
pub struct DeferPublisher<T> {
  factory: Arc<dyn Fn() -> Flow<T> + Send + Sync>,
}

impl<T> Publisher<T> for DeferPublisher<T> {
  fn actual_subscribe(&self, subscriber: BoxedSubscriber<T>) {
    (self.factory)().actual_subscribe(subscriber)
  }
}

impl<T: Send + 'static> Flow<T> {
  /// Calls `factory` afresh for every subscription and subscribes to the
  /// flow it returns, so no work happens before subscribe time.
  ///
  /// ```rust
  /// use std::sync::atomic::{AtomicUsize, Ordering};
  ///
  /// use rxflow::prelude::*;
  ///
  /// static CALLS: AtomicUsize = AtomicUsize::new(0);
  /// let flow = Flow::defer(|| Flow::of(CALLS.fetch_add(1, Ordering::SeqCst)));
  /// assert_eq!(CALLS.load(Ordering::SeqCst), 0);
  ///
  /// flow.subscribe(|_| {});
  /// flow.subscribe(|_| {});
  /// assert_eq!(CALLS.load(Ordering::SeqCst), 2);
  /// ```
  pub fn defer<F>(factory: F) -> Self
  where
    F: Fn() -> Flow<T> + Send + Sync + 'static,
  {
    Self::from_publisher(DeferPublisher { factory: Arc::new(factory) })
  }
}

#[cfg(test)]
mod tests {
  use std::time::Instant;

  use crate::prelude::*;

  #[test]
  fn each_subscription_computes_afresh() {
    let eager_stamp = Instant::now();
    let eager = Flow::of(eager_stamp);
    let deferred = Flow::defer(|| Flow::of(Instant::now()));

    let first = TestSubscriber::unbounded();
    let second = TestSubscriber::unbounded();
    deferred.subscribe_with(first.clone());
    std::thread::sleep(Duration::from_millis(2));
    deferred.subscribe_with(second.clone());
    assert!(second.values()[0] > first.values()[0]);

    let again = TestSubscriber::unbounded();
    eager.subscribe_with(again.clone());
    assert_eq!(again.values(), vec![eager_stamp]);
  }
}
