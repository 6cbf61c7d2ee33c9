//! Hot, multicast flows.
//!
//! A [`ConnectableFlow`] shares one subscription to its upstream among any
//! number of subscribers. Subscribing only registers interest; nothing is
//! requested from the upstream until [`ConnectableFlow::connect`] is called.
//!
//! | Constructor | Late subscribers see |
//! |-------------|----------------------|
//! | [`Flow::publish`] | items emitted after they joined, or only the terminal signal once it happened |
//! | [`Flow::replay`] | the recorded history, then live items |
//!
//! Demand is coordinated across subscribers: `publish` only hands an item
//! out once every live subscriber can take it, so the slowest subscriber
//! paces the upstream, and items arriving while nobody is subscribed stay
//! queued. `replay` requests everything and lets each subscriber walk the
//! history at its own pace.
//!
//! ```rust
//! use rxflow::prelude::*;
//!
//! let published = Flow::just([1, 2, 3]).publish();
//! let first = TestSubscriber::unbounded();
//! let second = TestSubscriber::unbounded();
//! published.subscribe_with(first.clone());
//! published.subscribe_with(second.clone());
//! assert!(first.values().is_empty());
//!
//! published.connect();
//! first.assert_completed_with(&[1, 2, 3]);
//! second.assert_completed_with(&[1, 2, 3]);
//! ```

mod publish;
mod ref_count;
mod replay;

use std::{ops::Deref, sync::Arc};

use once_cell::sync::OnceCell;
use parking_lot::Mutex;

use crate::{
  error::{FlowError, Result},
  ops::DEFAULT_PREFETCH,
  publisher::{Flow, Publisher},
  subscriber::BoxedSubscriber,
  subscription::SubscriptionRef,
};

/// Lifecycle of a connectable flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectableState {
  /// Accepting subscribers, upstream not subscribed.
  Pending,
  /// Upstream subscribed and fanning out.
  Connected,
  /// Upstream completed or failed.
  Terminated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
  Pending,
  Connected,
  Terminated,
  Disconnected,
}

/// Connection bookkeeping of one hub: its phase and the upstream
/// subscription, which is set at most once.
pub(crate) struct Link {
  phase: Mutex<Phase>,
  upstream: OnceCell<SubscriptionRef>,
}

impl Link {
  fn new() -> Self { Self { phase: Mutex::new(Phase::Pending), upstream: OnceCell::new() } }

  /// Moves to `Connected`; only the first caller gets `true`.
  pub(crate) fn begin_connect(&self) -> bool {
    let mut phase = self.phase.lock();
    if *phase != Phase::Pending {
      return false;
    }
    *phase = Phase::Connected;
    tracing::debug!("connectable flow connected");
    true
  }

  /// Records the upstream subscription; `false` when the link was
  /// disconnected meanwhile, in which case the upstream is cancelled.
  pub(crate) fn attach(&self, upstream: SubscriptionRef) -> bool {
    let phase = self.phase.lock();
    if *phase == Phase::Disconnected || self.upstream.set(upstream.clone()).is_err() {
      drop(phase);
      upstream.cancel();
      return false;
    }
    true
  }

  pub(crate) fn request(&self, n: u64) {
    if let Some(upstream) = self.upstream.get() {
      upstream.request(n);
    }
  }

  pub(crate) fn terminate(&self) {
    let mut phase = self.phase.lock();
    if *phase == Phase::Connected {
      *phase = Phase::Terminated;
    }
  }

  pub(crate) fn disconnect(&self) {
    {
      let mut phase = self.phase.lock();
      if *phase == Phase::Disconnected {
        return;
      }
      *phase = Phase::Disconnected;
    }
    tracing::debug!("connectable flow disconnected");
    if let Some(upstream) = self.upstream.get() {
      upstream.cancel();
    }
  }

  fn phase(&self) -> Phase { *self.phase.lock() }
}

/// Handle on an established connection.
#[derive(Clone)]
pub struct Connection {
  link: Arc<Link>,
}

impl Connection {
  /// Cancels the shared upstream subscription. Subscribers still attached
  /// receive nothing further; the next `connect` starts a fresh upstream
  /// subscription.
  pub fn disconnect(&self) { self.link.disconnect() }

  pub fn is_connected(&self) -> bool { self.link.phase() == Phase::Connected }
}

impl std::fmt::Debug for Connection {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Connection").field("phase", &self.link.phase()).finish()
  }
}

/// Fan-out core behind a connectable flow; one hub serves one connection.
pub(crate) trait Hub<T>: Send + Sync {
  /// Registers a subscriber.
  fn add(self: Arc<Self>, subscriber: BoxedSubscriber<T>);

  /// Subscribes the upstream unless already connected.
  fn connect(self: Arc<Self>, source: &Flow<T>);

  fn link(&self) -> &Arc<Link>;
}

type HubFactory<T> = Arc<dyn Fn() -> Arc<dyn Hub<T>> + Send + Sync>;

struct Shared<T> {
  source: Flow<T>,
  make_hub: HubFactory<T>,
  hub: Mutex<Arc<dyn Hub<T>>>,
}

impl<T> Shared<T> {
  /// The hub serving new subscribers, replaced by a fresh one after a
  /// disconnect.
  fn hub(&self) -> Arc<dyn Hub<T>> {
    let mut hub = self.hub.lock();
    if hub.link().phase() == Phase::Disconnected {
      *hub = (self.make_hub)();
    }
    hub.clone()
  }
}

struct HubPublisher<T>(Arc<Shared<T>>);

impl<T: Send + 'static> Publisher<T> for HubPublisher<T> {
  fn actual_subscribe(&self, subscriber: BoxedSubscriber<T>) { self.0.hub().add(subscriber) }
}

/// A multicast flow that starts on [`connect`](ConnectableFlow::connect).
///
/// It dereferences to a [`Flow`] whose subscriptions join the shared
/// upstream, so every operator and `subscribe*` method is available on it.
pub struct ConnectableFlow<T> {
  shared: Arc<Shared<T>>,
  flow: Flow<T>,
}

impl<T> Clone for ConnectableFlow<T> {
  fn clone(&self) -> Self { Self { shared: self.shared.clone(), flow: self.flow.clone() } }
}

impl<T> Deref for ConnectableFlow<T> {
  type Target = Flow<T>;

  fn deref(&self) -> &Flow<T> { &self.flow }
}

impl<T: Send + 'static> ConnectableFlow<T> {
  fn new(source: Flow<T>, make_hub: HubFactory<T>) -> Self {
    let shared = Arc::new(Shared { source, hub: Mutex::new(make_hub()), make_hub });
    let flow = Flow::from_publisher(HubPublisher(shared.clone()));
    Self { shared, flow }
  }

  /// Subscribes the upstream. Calling it again while connected returns a
  /// handle on the same connection.
  pub fn connect(&self) -> Connection {
    let hub = self.shared.hub();
    hub.clone().connect(&self.shared.source);
    Connection { link: hub.link().clone() }
  }

  pub fn state(&self) -> ConnectableState {
    match self.shared.hub.lock().link().phase() {
      Phase::Pending | Phase::Disconnected => ConnectableState::Pending,
      Phase::Connected => ConnectableState::Connected,
      Phase::Terminated => ConnectableState::Terminated,
    }
  }

  /// The flow view of this connectable, for passing it where a `Flow` is
  /// expected.
  pub fn as_flow(&self) -> Flow<T> { self.flow.clone() }
}

impl<T: Clone + Send + 'static> Flow<T> {
  /// Shares this flow, pacing it by the slowest subscriber.
  pub fn publish(&self) -> ConnectableFlow<T> {
    ConnectableFlow::new(self.clone(), publish::factory(DEFAULT_PREFETCH))
  }

  /// Like [`publish`](Flow::publish) with a custom number of items requested
  /// ahead from the upstream.
  pub fn publish_with_prefetch(&self, prefetch: usize) -> Result<ConnectableFlow<T>> {
    if prefetch == 0 {
      return Err(FlowError::illegal_argument("prefetch must be positive"));
    }
    Ok(ConnectableFlow::new(self.clone(), publish::factory(prefetch)))
  }

  /// Shares this flow and records every item for late subscribers.
  pub fn replay(&self) -> ConnectableFlow<T> {
    ConnectableFlow::new(self.clone(), replay::factory(None))
  }

  /// Like [`replay`](Flow::replay), keeping only the last `capacity` items.
  pub fn replay_with_capacity(&self, capacity: usize) -> Result<ConnectableFlow<T>> {
    if capacity == 0 {
      return Err(FlowError::illegal_argument("replay capacity must be positive"));
    }
    Ok(ConnectableFlow::new(self.clone(), replay::factory(Some(capacity))))
  }

  /// `publish().ref_count()`: one upstream subscription for as long as
  /// anybody is subscribed.
  pub fn share(&self) -> Flow<T> { self.publish().ref_count() }
}
