//! Prelude module for convenient imports
//!
//! This module re-exports commonly used types and traits for easy access.

// Connectable publishers
pub use crate::connectable::{Connection, ConnectableFlow, ConnectableState};
// Errors
pub use crate::error::FlowError;
// Operator configuration
pub use crate::ops::{
  retry::{RetryConfig, RetryPolicy},
  DEFAULT_PREFETCH,
};
// Core traits and the Flow handle
pub use crate::publisher::{Flow, Publisher};
// Scheduler core types
pub use crate::scheduler::{
  Duration, ImmediateScheduler, Scheduler, SchedulerRef, TaskHandle, TestScheduler,
};
// Default schedulers
#[cfg(feature = "thread-pool-scheduler")]
pub use crate::scheduler::ThreadPoolScheduler;
#[cfg(feature = "tokio-scheduler")]
pub use crate::scheduler::TokioScheduler;
// Subscriber side
pub use crate::subscriber::{BoxedSubscriber, FnSubscriber, Signal, Subscriber};
// Subscription
pub use crate::subscription::{
  EmptySubscription, Subscription, SubscriptionGuard, SubscriptionHandle, SubscriptionRef,
  UNBOUNDED,
};
// Testing
pub use crate::test_subscriber::TestSubscriber;
// Variant payloads
pub use crate::value::{FromValue, Value};
