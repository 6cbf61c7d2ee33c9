//! Bridges from a `Flow` into `futures`: `into_future`, `into_stream` and
//! the blocking helpers built on them.
//!
//! ## Behavior
//!
//! - **`into_future`**: resolves with the first item, or
//!   `Err(FlowError::NoSuchElement)` when the flow completes empty. The
//!   upstream is cancelled once the item arrived.
//! - **`into_stream`**: yields `Ok(item)` per item and one final `Err` if the
//!   flow fails. Each poll requests a single item, so the stream applies
//!   backpressure to the flow.
//! - **`blocking_*`**: drive the futures on the current thread with
//!   `futures::executor::block_on`; they only make sense when the flow is
//!   produced on another thread or synchronously.
//!
//! Both adapters are lazy: nothing is subscribed until the first poll, and
//! dropping them cancels the subscription.

use std::{
  collections::VecDeque,
  future::Future,
  pin::Pin,
  sync::Arc,
  task::{Context, Poll, Waker},
};

use futures::Stream;
use parking_lot::Mutex;

use crate::{
  error::{FlowError, Result},
  publisher::Flow,
  subscriber::Subscriber,
  subscription::{SubscriptionHandle, SubscriptionRef},
};

// ============================================================================
// FlowFuture
// ============================================================================

struct FutureShared<T> {
  result: Option<Result<T>>,
  waker: Option<Waker>,
}

/// Future resolving with the first item of a flow.
pub struct FlowFuture<T> {
  source: Option<Flow<T>>,
  shared: Arc<Mutex<FutureShared<T>>>,
  handle: Option<SubscriptionHandle>,
}

impl<T: Send + 'static> Future for FlowFuture<T> {
  type Output = Result<T>;

  fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
    let this = self.get_mut();
    if let Some(source) = this.source.take() {
      this.shared.lock().waker = Some(cx.waker().clone());
      this.handle = Some(source.subscribe_with(FirstSubscriber {
        shared: this.shared.clone(),
        upstream: None,
        done: false,
      }));
    }
    let mut shared = this.shared.lock();
    match shared.result.take() {
      Some(result) => {
        this.handle = None;
        Poll::Ready(result)
      }
      None => {
        shared.waker = Some(cx.waker().clone());
        Poll::Pending
      }
    }
  }
}

impl<T> Drop for FlowFuture<T> {
  fn drop(&mut self) {
    if let Some(handle) = self.handle.take() {
      handle.cancel();
    }
  }
}

struct FirstSubscriber<T> {
  shared: Arc<Mutex<FutureShared<T>>>,
  upstream: Option<SubscriptionRef>,
  done: bool,
}

impl<T> FirstSubscriber<T> {
  fn resolve(&mut self, result: Result<T>) {
    if std::mem::replace(&mut self.done, true) {
      return;
    }
    let waker = {
      let mut shared = self.shared.lock();
      shared.result = Some(result);
      shared.waker.take()
    };
    if let Some(waker) = waker {
      waker.wake();
    }
  }
}

impl<T: Send> Subscriber<T> for FirstSubscriber<T> {
  fn on_subscribe(&mut self, subscription: SubscriptionRef) {
    self.upstream = Some(subscription.clone());
    subscription.request(1);
  }

  fn on_next(&mut self, value: T) {
    if let Some(upstream) = self.upstream.take() {
      upstream.cancel();
    }
    self.resolve(Ok(value));
  }

  fn on_error(&mut self, err: FlowError) { self.resolve(Err(err)); }

  fn on_complete(&mut self) { self.resolve(Err(FlowError::NoSuchElement)); }
}

// ============================================================================
// FlowStream
// ============================================================================

struct StreamShared<T> {
  items: VecDeque<T>,
  terminal: Option<Option<FlowError>>,
  outstanding: bool,
  waker: Option<Waker>,
}

/// Stream pulling one item of a flow per poll.
pub struct FlowStream<T> {
  source: Option<Flow<T>>,
  shared: Arc<Mutex<StreamShared<T>>>,
  handle: Option<SubscriptionHandle>,
  finished: bool,
}

impl<T: Send + 'static> Stream for FlowStream<T> {
  type Item = Result<T>;

  fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
    let this = self.get_mut();
    if this.finished {
      return Poll::Ready(None);
    }
    if let Some(source) = this.source.take() {
      this.handle = Some(source.subscribe_with(StreamSubscriber { shared: this.shared.clone() }));
    }
    loop {
      let mut shared = this.shared.lock();
      if let Some(value) = shared.items.pop_front() {
        return Poll::Ready(Some(Ok(value)));
      }
      if let Some(terminal) = shared.terminal.take() {
        this.finished = true;
        this.handle = None;
        return Poll::Ready(terminal.map(Err));
      }
      shared.waker = Some(cx.waker().clone());
      if shared.outstanding {
        return Poll::Pending;
      }
      shared.outstanding = true;
      drop(shared);
      // a synchronous flow may deliver inside `request`, so look again
      if let Some(handle) = &this.handle {
        handle.request(1);
      }
    }
  }
}

impl<T> Drop for FlowStream<T> {
  fn drop(&mut self) {
    if let Some(handle) = self.handle.take() {
      handle.cancel();
    }
  }
}

struct StreamSubscriber<T> {
  shared: Arc<Mutex<StreamShared<T>>>,
}

impl<T> StreamSubscriber<T> {
  fn push(&self, update: impl FnOnce(&mut StreamShared<T>)) {
    let waker = {
      let mut shared = self.shared.lock();
      update(&mut shared);
      shared.waker.take()
    };
    if let Some(waker) = waker {
      waker.wake();
    }
  }
}

impl<T: Send> Subscriber<T> for StreamSubscriber<T> {
  fn on_subscribe(&mut self, _subscription: SubscriptionRef) {}

  fn on_next(&mut self, value: T) {
    self.push(|shared| {
      shared.outstanding = false;
      shared.items.push_back(value);
    });
  }

  fn on_error(&mut self, err: FlowError) { self.push(|shared| shared.terminal = Some(Some(err))); }

  fn on_complete(&mut self) { self.push(|shared| shared.terminal = Some(None)); }
}

// ============================================================================
// Flow methods
// ============================================================================

impl<T: Send + 'static> Flow<T> {
  /// A future resolving with the first item.
  ///
  /// ```rust
  /// use rxflow::prelude::*;
  ///
  /// let first = futures::executor::block_on(Flow::just([7, 8]).into_future());
  /// assert_eq!(first, Ok(7));
  ///
  /// let none = futures::executor::block_on(Flow::<i32>::empty().into_future());
  /// assert_eq!(none, Err(FlowError::NoSuchElement));
  /// ```
  pub fn into_future(&self) -> FlowFuture<T> {
    FlowFuture {
      source: Some(self.clone()),
      shared: Arc::new(Mutex::new(FutureShared { result: None, waker: None })),
      handle: None,
    }
  }

  /// A stream over the items, requesting one per poll.
  pub fn into_stream(&self) -> FlowStream<T> {
    FlowStream {
      source: Some(self.clone()),
      shared: Arc::new(Mutex::new(StreamShared {
        items: VecDeque::new(),
        terminal: None,
        outstanding: false,
        waker: None,
      })),
      handle: None,
      finished: false,
    }
  }

  /// Blocks until the first item arrives.
  pub fn blocking_first(&self) -> Result<T> { futures::executor::block_on(self.into_future()) }

  /// Blocks until the flow completes with exactly one item; more than one
  /// is reported as `IllegalArgument`.
  pub fn blocking_single(&self) -> Result<T> {
    let mut items = futures::executor::block_on(self.take(2).to_list().into_future())?;
    match items.len() {
      1 => items.pop().ok_or(FlowError::NoSuchElement),
      0 => Err(FlowError::NoSuchElement),
      _ => Err(FlowError::illegal_argument("flow emitted more than one item")),
    }
  }

  /// Blocks until the flow completes and returns all of its items.
  pub fn blocking_collect(&self) -> Result<Vec<T>> {
    futures::executor::block_on(self.to_list().into_future())
  }
}

#[cfg(test)]
mod tests {
  use futures::{executor::block_on, StreamExt};

  use crate::prelude::*;

  #[test]
  fn future_is_lazy_and_takes_first() {
    let subscribed = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
    let c_subscribed = subscribed.clone();
    let future = Flow::defer(move || {
      c_subscribed.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
      Flow::range(0, 1_000_000).unwrap()
    })
    .into_future();
    assert_eq!(subscribed.load(std::sync::atomic::Ordering::SeqCst), 0);
    assert_eq!(block_on(future), Ok(0));
    assert_eq!(subscribed.load(std::sync::atomic::Ordering::SeqCst), 1);
  }

  #[test]
  fn future_reports_errors() {
    let result = block_on(Flow::<i32>::error(FlowError::msg("nope")).into_future());
    assert_eq!(result, Err(FlowError::msg("nope")));
  }

  #[test]
  fn stream_pulls_one_per_poll() {
    let items: Vec<_> = block_on(Flow::just([1, 2, 3]).into_stream().collect());
    assert_eq!(items, vec![Ok(1), Ok(2), Ok(3)]);

    let items: Vec<_> = block_on(
      Flow::just([1])
        .concat_with(Flow::error(FlowError::msg("cut")))
        .into_stream()
        .collect(),
    );
    assert_eq!(items, vec![Ok(1), Err(FlowError::msg("cut"))]);
  }

  #[test]
  fn stream_can_stop_early() {
    let first_two: Vec<_> = block_on(Flow::range(0, 1_000).unwrap().into_stream().take(2).collect());
    assert_eq!(first_two, vec![Ok(0), Ok(1)]);
  }

  #[test]
  fn blocking_helpers() {
    assert_eq!(Flow::just([4, 5]).blocking_first(), Ok(4));
    assert_eq!(Flow::of(4).blocking_single(), Ok(4));
    assert!(matches!(Flow::just([4, 5]).blocking_single(), Err(FlowError::IllegalArgument(_))));
    assert_eq!(Flow::<i32>::empty().blocking_single(), Err(FlowError::NoSuchElement));
    assert_eq!(Flow::range(0, 4).unwrap().blocking_collect(), Ok(vec![0, 1, 2, 3]));
  }
}
