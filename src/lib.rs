//! # rxflow: backpressure-aware reactive streams for Rust
//!
//! Producers never outrun their consumers: every subscriber states how many
//! items it can take with `request(n)`, and each operator in a chain keeps
//! that demand accounting intact on the way up.
//!
//! ## Quick Start
//!
//! ```rust
//! use rxflow::prelude::*;
//!
//! let ts = TestSubscriber::unbounded();
//! Flow::from_iter(0..10)
//!   .filter(|v| v % 2 == 0)
//!   .map(|v| v * 2)
//!   .subscribe_with(ts.clone());
//! ts.assert_completed_with(&[0, 4, 8, 12, 16]);
//! ```
//!
//! ## Key Concepts
//!
//! | Type | Description |
//! |------|-------------|
//! | [`Flow`] | Cloneable handle to a publisher, carrying every operator |
//! | [`Publisher`] | Anything a subscriber can subscribe to |
//! | [`Subscriber`] | Receives `on_subscribe`, `on_next`, `on_error`, `on_complete` |
//! | [`Subscription`] | Demand (`request`) and cancellation (`cancel`) channel |
//! | [`Scheduler`] | Where and when timed work runs |
//! | [`ConnectableFlow`] | A hot publisher started explicitly with `connect` |
//!
//! ## Feature Flags
//!
//! - **`thread-pool-scheduler`** (default): [`ThreadPoolScheduler`] on the
//!   `futures` thread pool, timed with `futures-time`
//! - **`tokio-scheduler`**: `TokioScheduler` on a tokio runtime
//!
//! ## Logging
//!
//! The crate reports through `tracing` and never installs a subscriber;
//! plug in whichever `tracing` subscriber the application uses.
//!
//! [`Flow`]: publisher::Flow
//! [`Publisher`]: publisher::Publisher
//! [`Subscriber`]: subscriber::Subscriber
//! [`Subscription`]: subscription::Subscription
//! [`Scheduler`]: scheduler::Scheduler
//! [`ConnectableFlow`]: connectable::ConnectableFlow
//! [`ThreadPoolScheduler`]: scheduler::ThreadPoolScheduler

pub mod connectable;
mod drain;
pub mod error;
pub mod ops;
pub mod prelude;
pub mod publisher;
pub mod scheduler;
pub mod source;
pub mod subscriber;
pub mod subscription;
pub mod test_subscriber;
pub mod value;

pub use prelude::*;

#[cfg(doctest)]
mod __markdown_doctests {
  mod readme {
    #![doc = include_str!("../README.md")]
  }
}
