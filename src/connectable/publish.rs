//! The hub behind [`Flow::publish`](crate::Flow::publish).

use std::{
  collections::VecDeque,
  sync::{
    atomic::{AtomicBool, Ordering},
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
  subscription::{EmptySubscription, Subscription, SubscriptionRef},
};

pub(super) fn factory<T: Clone + Send + 'static>(prefetch: usize) -> HubFactory<T> {
  Arc::new(move || -> Arc<dyn Hub<T>> {
    Arc::new(PublishHub {
      link: Arc::new(Link::new()),
      state: Mutex::new(PublishState {
        members: SmallVec::new(),
        queue: VecDeque::new(),
        terminal: None,
        finished: None,
        consumed: 0,
      }),
      prefetch,
      wip: Wip::default(),
    })
  })
}

struct Member<T> {
  downstream: DownstreamCell<T>,
  demand: Demand,
  cancelled: AtomicBool,
}

struct PublishState<T> {
  members: SmallVec<[Arc<Member<T>>; 4]>,
  queue: VecDeque<T>,
  /// Received from the upstream, waiting for the queue to drain.
  terminal: Option<Option<FlowError>>,
  /// Already delivered; late subscribers get it right away.
  finished: Option<Option<FlowError>>,
  consumed: usize,
}

struct PublishHub<T> {
  link: Arc<Link>,
  state: Mutex<PublishState<T>>,
  prefetch: usize,
  wip: Wip,
}

fn deliver_terminal<T>(downstream: &DownstreamCell<T>, terminal: &Option<FlowError>) {
  match terminal {
    Some(err) => downstream.error(err.clone()),
    None => downstream.complete(),
  };
}

impl<T: Clone + Send + 'static> PublishHub<T> {
  fn drain(&self) { self.wip.drain(|| self.emit()); }

  fn emit(&self) {
    let limit = self.prefetch - (self.prefetch >> 2);
    loop {
      let mut state = self.state.lock();
      state.members.retain(|member| !member.cancelled.load(Ordering::Acquire));
      if !state.queue.is_empty() {
        // the slowest member decides
        let ready = state.members.iter().map(|member| member.demand.get()).min().unwrap_or(0);
        if ready == 0 {
          return;
        }
        let Some(value) = state.queue.pop_front() else { return };
        state.consumed += 1;
        let replenish = if state.consumed >= limit && state.terminal.is_none() {
          Some(std::mem::take(&mut state.consumed) as u64)
        } else {
          None
        };
        let members = state.members.clone();
        drop(state);
        for member in &members {
          member.demand.produced(1);
          member.downstream.next(value.clone());
        }
        if let Some(n) = replenish {
          self.link.request(n);
        }
        continue;
      }
      let Some(terminal) = state.terminal.take() else { return };
      state.finished = Some(terminal.clone());
      let members = std::mem::take(&mut state.members);
      drop(state);
      self.link.terminate();
      for member in &members {
        deliver_terminal(&member.downstream, &terminal);
      }
      return;
    }
  }
}

impl<T: Clone + Send + 'static> Hub<T> for PublishHub<T> {
  fn add(self: Arc<Self>, subscriber: BoxedSubscriber<T>) {
    let member = Arc::new(Member {
      downstream: DownstreamCell::new(subscriber),
      demand: Demand::default(),
      cancelled: AtomicBool::new(false),
    });
    let finished = self.state.lock().finished.clone();
    if let Some(terminal) = finished {
      member.downstream.on_subscribe(EmptySubscription::shared());
      deliver_terminal(&member.downstream, &terminal);
      return;
    }
    member
      .downstream
      .on_subscribe(Arc::new(MemberSubscription { hub: self.clone(), member: member.clone() }));
    let finished = {
      let mut state = self.state.lock();
      match state.finished.clone() {
        Some(terminal) => Some(terminal),
        None => {
          state.members.push(member.clone());
          None
        }
      }
    };
    match finished {
      Some(terminal) => deliver_terminal(&member.downstream, &terminal),
      None => self.drain(),
    }
  }

  fn connect(self: Arc<Self>, source: &Flow<T>) {
    if self.link.begin_connect() {
      source.actual_subscribe(Box::new(PublishSubscriber { hub: self }));
    }
  }

  fn link(&self) -> &Arc<Link> { &self.link }
}

struct MemberSubscription<T> {
  hub: Arc<PublishHub<T>>,
  member: Arc<Member<T>>,
}

impl<T: Clone + Send + 'static> Subscription for MemberSubscription<T> {
  fn request(&self, n: u64) {
    if n > 0 {
      self.member.demand.add(n);
      self.hub.drain();
    }
  }

  fn cancel(&self) {
    if !self.member.cancelled.swap(true, Ordering::AcqRel) {
      self.member.downstream.release();
      // the slowest member may just have left
      self.hub.drain();
    }
  }
}

struct PublishSubscriber<T> {
  hub: Arc<PublishHub<T>>,
}

impl<T: Clone + Send + 'static> Subscriber<T> for PublishSubscriber<T> {
  fn on_subscribe(&mut self, subscription: SubscriptionRef) {
    if self.hub.link.attach(subscription.clone()) {
      subscription.request(self.hub.prefetch as u64);
    }
  }

  fn on_next(&mut self, value: T) {
    self.hub.state.lock().queue.push_back(value);
    self.hub.drain();
  }

  fn on_error(&mut self, err: FlowError) {
    self.hub.state.lock().terminal = Some(Some(err));
    self.hub.drain();
  }

  fn on_complete(&mut self) {
    self.hub.state.lock().terminal = Some(None);
    self.hub.drain();
  }
}

#[cfg(test)]
mod tests {
  use crate::prelude::*;

  #[test]
  fn slowest_subscriber_paces_everyone() {
    let published = Flow::range(0, 5).unwrap().publish();
    let fast = TestSubscriber::unbounded();
    let slow = TestSubscriber::new(1);
    published.subscribe_with(fast.clone());
    published.subscribe_with(slow.clone());
    published.connect();
    assert_eq!(fast.values(), vec![0]);
    assert_eq!(slow.values(), vec![0]);

    slow.request(2);
    assert_eq!(fast.values(), vec![0, 1, 2]);

    slow.request(10);
    fast.assert_completed_with(&[0, 1, 2, 3, 4]);
    slow.assert_completed_with(&[0, 1, 2, 3, 4]);
    assert_eq!(published.state(), ConnectableState::Terminated);
  }

  #[test]
  fn cancelled_subscriber_stops_holding_back() {
    let published = Flow::range(0, 3).unwrap().publish();
    let fast = TestSubscriber::unbounded();
    let stuck = TestSubscriber::new(0);
    published.subscribe_with(fast.clone());
    let handle = published.subscribe_with(stuck.clone());
    published.connect();
    assert!(fast.values().is_empty());

    handle.cancel();
    fast.assert_completed_with(&[0, 1, 2]);
    assert!(!stuck.is_terminated());
  }

  #[test]
  fn items_wait_for_the_first_subscriber() {
    let published = Flow::just([1, 2]).publish();
    published.connect();
    let late = TestSubscriber::unbounded();
    published.subscribe_with(late.clone());
    late.assert_completed_with(&[1, 2]);

    let after_end = TestSubscriber::unbounded();
    published.subscribe_with(after_end.clone());
    after_end.assert_completed_with(&[]);
  }

  #[test]
  fn late_subscriber_misses_earlier_items() {
    let scheduler = TestScheduler::new();
    let published = Flow::interval(Duration::from_millis(10), scheduler.clone()).unwrap().publish();
    let early = TestSubscriber::unbounded();
    published.subscribe_with(early.clone());
    published.connect();
    scheduler.advance_by(Duration::from_millis(20));

    let late = TestSubscriber::unbounded();
    published.subscribe_with(late.clone());
    scheduler.advance_by(Duration::from_millis(20));
    assert_eq!(early.values(), vec![0, 1, 2, 3]);
    assert_eq!(late.values(), vec![2, 3]);
  }

  #[test]
  fn errors_reach_every_subscriber() {
    let published = Flow::<i32>::error(FlowError::msg("down")).publish();
    let a = TestSubscriber::unbounded();
    let b = TestSubscriber::unbounded();
    published.subscribe_with(a.clone());
    published.subscribe_with(b.clone());
    published.connect();
    assert_eq!(a.errors(), vec![FlowError::msg("down")]);
    assert_eq!(b.errors(), vec![FlowError::msg("down")]);
  }
}
