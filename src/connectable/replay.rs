//! The hub behind [`Flow::replay`](crate::Flow::replay).
//!
//! The upstream is drained with unbounded demand into a history buffer.
//! Every subscriber owns a cursor into that buffer and advances it at its
//! own pace; a bounded history drops its oldest items, and cursors pointing
//! before the retained window skip ahead.

use std::{
  collections::VecDeque,
  sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc,
  },
};

use parking_lot::Mutex;
use smallvec::SmallVec;

use super::{Hub, HubFactory, Link};
use crate::{
  drain::{Demand, DownstreamCell, Wip},
  error::FlowError,
  publisher::{Flow, Publisher},
  subscriber::{BoxedSubscriber, Subscriber},
  subscription::{Subscription, SubscriptionRef, UNBOUNDED},
};

pub(super) fn factory<T: Clone + Send + 'static>(capacity: Option<usize>) -> HubFactory<T> {
  Arc::new(move || -> Arc<dyn Hub<T>> {
    Arc::new(ReplayHub {
      link: Arc::new(Link::new()),
      capacity,
      state: Mutex::new(ReplayState {
        history: VecDeque::new(),
        offset: 0,
        terminal: None,
        cursors: SmallVec::new(),
      }),
      wip: Wip::default(),
    })
  })
}

struct Cursor<T> {
  downstream: DownstreamCell<T>,
  demand: Demand,
  /// Absolute index of the next item to deliver.
  index: AtomicU64,
  done: AtomicBool,
}

struct ReplayState<T> {
  history: VecDeque<T>,
  /// Absolute index of `history[0]`.
  offset: u64,
  terminal: Option<Option<FlowError>>,
  cursors: SmallVec<[Arc<Cursor<T>>; 4]>,
}

enum Step<T> {
  Next(T),
  Terminal(Option<FlowError>),
  Wait,
}

impl<T: Clone> ReplayState<T> {
  fn step(&self, cursor: &Cursor<T>) -> Step<T> {
    let index = cursor.index.load(Ordering::Acquire).max(self.offset);
    let end = self.offset + self.history.len() as u64;
    if index < end {
      if cursor.demand.get() == 0 {
        return Step::Wait;
      }
      let Some(value) = self.history.get((index - self.offset) as usize) else { return Step::Wait };
      cursor.index.store(index + 1, Ordering::Release);
      return Step::Next(value.clone());
    }
    match &self.terminal {
      Some(terminal) => Step::Terminal(terminal.clone()),
      None => Step::Wait,
    }
  }
}

struct ReplayHub<T> {
  link: Arc<Link>,
  capacity: Option<usize>,
  state: Mutex<ReplayState<T>>,
  wip: Wip,
}

impl<T: Clone + Send + 'static> ReplayHub<T> {
  fn drain(&self) { self.wip.drain(|| self.emit()); }

  fn emit(&self) {
    let cursors = {
      let mut state = self.state.lock();
      state.cursors.retain(|cursor| !cursor.done.load(Ordering::Acquire));
      state.cursors.clone()
    };
    for cursor in &cursors {
      loop {
        if cursor.done.load(Ordering::Acquire) {
          break;
        }
        let step = self.state.lock().step(cursor);
        match step {
          Step::Next(value) => {
            cursor.demand.produced(1);
            cursor.downstream.next(value);
          }
          Step::Terminal(terminal) => {
            cursor.done.store(true, Ordering::Release);
            match terminal {
              Some(err) => cursor.downstream.error(err),
              None => cursor.downstream.complete(),
            };
            break;
          }
          Step::Wait => break,
        }
      }
    }
  }
}

impl<T: Clone + Send + 'static> Hub<T> for ReplayHub<T> {
  fn add(self: Arc<Self>, subscriber: BoxedSubscriber<T>) {
    let cursor = Arc::new(Cursor {
      downstream: DownstreamCell::new(subscriber),
      demand: Demand::default(),
      index: AtomicU64::new(0),
      done: AtomicBool::new(false),
    });
    cursor
      .downstream
      .on_subscribe(Arc::new(CursorSubscription { hub: self.clone(), cursor: cursor.clone() }));
    self.state.lock().cursors.push(cursor);
    self.drain();
  }

  fn connect(self: Arc<Self>, source: &Flow<T>) {
    if self.link.begin_connect() {
      source.actual_subscribe(Box::new(ReplaySubscriber { hub: self }));
    }
  }

  fn link(&self) -> &Arc<Link> { &self.link }
}

struct CursorSubscription<T> {
  hub: Arc<ReplayHub<T>>,
  cursor: Arc<Cursor<T>>,
}

impl<T: Clone + Send + 'static> Subscription for CursorSubscription<T> {
  fn request(&self, n: u64) {
    if n > 0 {
      self.cursor.demand.add(n);
      self.hub.drain();
    }
  }

  fn cancel(&self) {
    if !self.cursor.done.swap(true, Ordering::AcqRel) {
      self.cursor.downstream.release();
    }
  }
}

struct ReplaySubscriber<T> {
  hub: Arc<ReplayHub<T>>,
}

impl<T: Clone + Send + 'static> ReplaySubscriber<T> {
  fn finish(&self, terminal: Option<FlowError>) {
    self.hub.state.lock().terminal = Some(terminal);
    self.hub.link.terminate();
    self.hub.drain();
  }
}

impl<T: Clone + Send + 'static> Subscriber<T> for ReplaySubscriber<T> {
  fn on_subscribe(&mut self, subscription: SubscriptionRef) {
    if self.hub.link.attach(subscription.clone()) {
      subscription.request(UNBOUNDED);
    }
  }

  fn on_next(&mut self, value: T) {
    {
      let mut state = self.hub.state.lock();
      state.history.push_back(value);
      if let Some(capacity) = self.hub.capacity {
        while state.history.len() > capacity {
          state.history.pop_front();
          state.offset += 1;
        }
      }
    }
    self.hub.drain();
  }

  fn on_error(&mut self, err: FlowError) { self.finish(Some(err)); }

  fn on_complete(&mut self) { self.finish(None); }
}

#[cfg(test)]
mod tests {
  use crate::prelude::*;

  #[test]
  fn late_subscriber_gets_history() {
    let replayed = Flow::range(0, 3).unwrap().replay();
    replayed.connect();
    assert_eq!(replayed.state(), ConnectableState::Terminated);

    let late = TestSubscriber::unbounded();
    replayed.subscribe_with(late.clone());
    late.assert_completed_with(&[0, 1, 2]);
  }

  #[test]
  fn bounded_history_keeps_the_tail() {
    let replayed = Flow::range(0, 5).unwrap().replay_with_capacity(2).unwrap();
    replayed.connect();
    let late = TestSubscriber::unbounded();
    replayed.subscribe_with(late.clone());
    late.assert_completed_with(&[3, 4]);
  }

  #[test]
  fn each_subscriber_reads_at_its_own_pace() {
    let replayed = Flow::just(['a', 'b', 'c']).replay();
    let fast = TestSubscriber::unbounded();
    let slow = TestSubscriber::new(1);
    replayed.subscribe_with(fast.clone());
    replayed.subscribe_with(slow.clone());
    replayed.connect();
    fast.assert_completed_with(&['a', 'b', 'c']);
    assert_eq!(slow.values(), vec!['a']);
    slow.request(5);
    slow.assert_completed_with(&['a', 'b', 'c']);
  }

  #[test]
  fn late_subscriber_catches_up_then_follows_live() {
    let scheduler = TestScheduler::new();
    let replayed = Flow::interval(Duration::from_millis(10), scheduler.clone()).unwrap().replay();
    replayed.connect();
    scheduler.advance_by(Duration::from_millis(30));

    let late = TestSubscriber::unbounded();
    replayed.subscribe_with(late.clone());
    assert_eq!(late.values(), vec![0, 1, 2]);
    scheduler.advance_by(Duration::from_millis(10));
    assert_eq!(late.values(), vec![0, 1, 2, 3]);
  }
}
