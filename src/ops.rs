//! Operators.
//!
//! Every operator is a publisher wrapping its upstream. Subscribing to it
//! subscribes an internal subscriber to the upstream with fresh
//! per-subscription state, and demand and cancellation travel back up
//! unchanged unless the operator itself changes the accounting (`filter`
//! re-requests what it drops, `buffer` multiplies requests by its batch
//! size, `merge` and `zip` prefetch).
//!
//! The operator methods are inherent methods of [`Flow`](crate::Flow), split
//! across the files of this module by family.

pub mod aggregate;
pub mod buffer;
pub mod cast;
pub mod concat;
pub mod filter;
pub mod into_future;
pub mod map;
pub mod merge;
pub mod observe_on;
pub mod on_error;
pub mod retry;
pub mod skip;
pub mod subscribe_on;
pub mod take;
pub mod tap;
pub mod zip;

use crate::subscription::SubscriptionRef;

/// Items an operator requests ahead from each inner source when it has to
/// queue (`merge`, `flat_map`, `zip`, `observe_on`, `publish`).
pub const DEFAULT_PREFETCH: usize = 16;

/// Cancels and forgets the upstream of a one-to-one operator.
pub(crate) fn cancel_upstream(upstream: &mut Option<SubscriptionRef>) {
  if let Some(upstream) = upstream.take() {
    upstream.cancel();
  }
}
