//! Serialization primitives shared by sources and operators.
//!
//! All of them follow the same rule: a signal is never delivered to a
//! subscriber while another thread (or an outer frame of the same thread) is
//! delivering to it. Re-entrant calls only record that more work exists and
//! return; the frame that owns the drain picks the work up before leaving.

use std::{
  collections::VecDeque,
  sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
};

use parking_lot::Mutex;

use crate::{
  error::FlowError,
  subscriber::{BoxedSubscriber, Signal},
  subscription::{SubscriptionRef, UNBOUNDED},
};

/// Work-in-progress counter guarding a drain loop.
#[derive(Default)]
pub(crate) struct Wip(AtomicUsize);

impl Wip {
  /// Returns `true` when the caller became the drain owner.
  pub(crate) fn enter(&self) -> bool { self.0.fetch_add(1, Ordering::AcqRel) == 0 }

  /// Runs `work` until no other caller asked for more, assuming `enter`
  /// already succeeded.
  pub(crate) fn resume(&self, mut work: impl FnMut()) {
    let mut missed = 1;
    loop {
      work();
      missed = self.0.fetch_sub(missed, Ordering::AcqRel) - missed;
      if missed == 0 {
        break;
      }
    }
  }

  pub(crate) fn drain(&self, work: impl FnMut()) {
    if self.enter() {
      self.resume(work);
    }
  }
}

/// Outstanding demand, saturating at [`UNBOUNDED`].
#[derive(Default)]
pub(crate) struct Demand(AtomicU64);

impl Demand {
  /// Adds `n`, returning the previous value.
  pub(crate) fn add(&self, n: u64) -> u64 {
    let mut current = self.0.load(Ordering::Acquire);
    loop {
      if current == UNBOUNDED {
        return UNBOUNDED;
      }
      let next = current.saturating_add(n);
      match self.0.compare_exchange_weak(current, next, Ordering::AcqRel, Ordering::Acquire) {
        Ok(previous) => return previous,
        Err(actual) => current = actual,
      }
    }
  }

  /// Subtracts `n` delivered items, returning what remains.
  pub(crate) fn produced(&self, n: u64) -> u64 {
    let mut current = self.0.load(Ordering::Acquire);
    loop {
      if current == UNBOUNDED {
        return UNBOUNDED;
      }
      debug_assert!(current >= n, "produced {n} items against a demand of {current}");
      let next = current.saturating_sub(n);
      match self.0.compare_exchange_weak(current, next, Ordering::AcqRel, Ordering::Acquire) {
        Ok(_) => return next,
        Err(actual) => current = actual,
      }
    }
  }

  pub(crate) fn get(&self) -> u64 { self.0.load(Ordering::Acquire) }
}

/// Owner slot for a downstream subscriber.
///
/// Terminal signals take the subscriber out of the slot, which makes them
/// at-most-once and breaks the reference cycle between a subscription and
/// the subscriber holding it. The downstream must be subscribed before any
/// upstream can emit, because the slot is locked while `on_subscribe` runs.
pub(crate) struct DownstreamCell<T> {
  slot: Mutex<Option<BoxedSubscriber<T>>>,
  released: AtomicBool,
}

impl<T> DownstreamCell<T> {
  pub(crate) fn new(subscriber: BoxedSubscriber<T>) -> Self {
    Self { slot: Mutex::new(Some(subscriber)), released: AtomicBool::new(false) }
  }

  pub(crate) fn on_subscribe(&self, subscription: SubscriptionRef) {
    if let Some(subscriber) = self.slot.lock().as_mut() {
      subscriber.on_subscribe(subscription);
    }
  }

  pub(crate) fn next(&self, value: T) {
    let mut slot = self.slot.lock();
    if let Some(subscriber) = slot.as_mut() {
      subscriber.on_next(value);
    }
    if self.released.load(Ordering::Acquire) {
      slot.take();
    }
  }

  /// Delivers an error unless a terminal signal already went out.
  pub(crate) fn error(&self, err: FlowError) -> bool {
    let subscriber = self.slot.lock().take();
    match subscriber {
      Some(mut subscriber) => {
        subscriber.on_error(err);
        true
      }
      None => false,
    }
  }

  pub(crate) fn complete(&self) -> bool {
    let subscriber = self.slot.lock().take();
    match subscriber {
      Some(mut subscriber) => {
        subscriber.on_complete();
        true
      }
      None => false,
    }
  }

  /// Drops the subscriber after a cancel. If a delivery is in flight the
  /// delivering frame drops it once the call returns.
  pub(crate) fn release(&self) {
    self.released.store(true, Ordering::Release);
    if let Some(mut slot) = self.slot.try_lock() {
      slot.take();
    }
  }
}

enum Event<T> {
  Subscribe(SubscriptionRef),
  Signal(Signal<T>),
}

/// Serializes signals coming from any number of threads onto one
/// subscriber, enforcing the single-terminal rule.
pub(crate) struct Serialized<T> {
  queue: Mutex<VecDeque<Event<T>>>,
  wip: Wip,
  target: Mutex<Option<BoxedSubscriber<T>>>,
  terminated: AtomicBool,
}

impl<T> Serialized<T> {
  pub(crate) fn new(target: BoxedSubscriber<T>) -> Self {
    Self {
      queue: Mutex::new(VecDeque::new()),
      wip: Wip::default(),
      target: Mutex::new(Some(target)),
      terminated: AtomicBool::new(false),
    }
  }

  pub(crate) fn on_subscribe(&self, subscription: SubscriptionRef) {
    self.push(Event::Subscribe(subscription));
  }

  /// Queues an item; returns `false` if a terminal signal was already
  /// accepted.
  pub(crate) fn next(&self, value: T) -> bool {
    if self.terminated.load(Ordering::Acquire) {
      return false;
    }
    self.push(Event::Signal(Signal::Next(value)));
    true
  }

  pub(crate) fn error(&self, err: FlowError) -> bool { self.terminate(Signal::Error(err)) }

  pub(crate) fn complete(&self) -> bool { self.terminate(Signal::Complete) }

  pub(crate) fn is_terminated(&self) -> bool { self.terminated.load(Ordering::Acquire) }

  fn terminate(&self, signal: Signal<T>) -> bool {
    if self.terminated.swap(true, Ordering::AcqRel) {
      return false;
    }
    self.push(Event::Signal(signal));
    true
  }

  fn push(&self, event: Event<T>) {
    self.queue.lock().push_back(event);
    self.wip.drain(|| self.deliver_pending());
  }

  fn deliver_pending(&self) {
    loop {
      let event = self.queue.lock().pop_front();
      let Some(event) = event else { break };
      let mut target = self.target.lock();
      match event {
        Event::Subscribe(subscription) => {
          if let Some(subscriber) = target.as_mut() {
            subscriber.on_subscribe(subscription);
          }
        }
        Event::Signal(Signal::Next(value)) => match target.as_mut() {
          Some(subscriber) => subscriber.on_next(value),
          None => tracing::trace!("item dropped after terminal signal"),
        },
        Event::Signal(terminal) => {
          let subscriber = target.take();
          drop(target);
          if let Some(mut subscriber) = subscriber {
            terminal.dispatch(&mut *subscriber);
          }
        }
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use std::sync::Arc;

  use super::*;
  use crate::test_subscriber::TestSubscriber;

  #[test]
  fn wip_runs_reentrant_work_after_current_pass() {
    let wip = Arc::new(Wip::default());
    let passes = AtomicUsize::new(0);
    let nested = wip.clone();
    wip.drain(|| {
      if passes.fetch_add(1, Ordering::SeqCst) == 0 {
        // A nested call must not run the work inline.
        nested.drain(|| panic!("nested drain ran inline"));
      }
    });
    assert_eq!(passes.load(Ordering::SeqCst), 2);
  }

  #[test]
  fn demand_saturates() {
    let demand = Demand::default();
    assert_eq!(demand.add(3), 0);
    assert_eq!(demand.produced(1), 2);
    demand.add(UNBOUNDED);
    assert_eq!(demand.get(), UNBOUNDED);
    assert_eq!(demand.produced(10), UNBOUNDED);
  }

  #[test]
  fn serialized_delivers_one_terminal() {
    let ts = TestSubscriber::<i32>::unbounded();
    let serialized = Serialized::new(Box::new(ts.clone()));
    assert!(serialized.next(1));
    assert!(serialized.complete());
    assert!(!serialized.error(FlowError::msg("late")));
    assert!(!serialized.next(2));
    assert_eq!(ts.values(), vec![1]);
    assert_eq!(ts.completions(), 1);
    assert!(ts.errors().is_empty());
  }

  #[test]
  fn downstream_cell_terminal_once() {
    let ts = TestSubscriber::<i32>::unbounded();
    let cell = DownstreamCell::new(Box::new(ts.clone()));
    cell.next(7);
    assert!(cell.error(FlowError::msg("first")));
    assert!(!cell.complete());
    cell.next(8);
    assert_eq!(ts.values(), vec![7]);
    assert_eq!(ts.errors(), vec![FlowError::msg("first")]);
    assert!(!cell.error(FlowError::msg("second")));
  }
}
