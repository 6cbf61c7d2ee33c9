//! Error type carried by the terminal `on_error` signal.
//!
//! Every failure inside a pipeline travels downstream as a [`FlowError`]:
//! user functions that fail, sources that cannot keep up with demand and
//! protocol defects detected at the subscriber boundary. Configuration
//! errors are not deferred into the stream; constructors hand them back
//! synchronously as `Err(FlowError::IllegalArgument(..))`.

use std::{error::Error, sync::Arc};

/// Convenient alias for results produced by operator constructors.
pub type Result<T> = std::result::Result<T, FlowError>;

/// Root error type for all rxflow operations.
///
/// `FlowError` is cheap to clone so that connectable publishers can fan a
/// single upstream failure out to every live subscriber.
#[derive(Debug, Clone, thiserror::Error)]
pub enum FlowError {
  /// An operator or source was configured with an invalid argument.
  #[error("illegal argument: {0}")]
  IllegalArgument(String),

  /// A signal broke the subscription protocol (items beyond demand,
  /// signals after a terminal, zero-sized requests).
  #[error("protocol violation: {0}")]
  ProtocolViolation(String),

  /// A timed source fired while its consumer had no outstanding demand.
  #[error("missing demand: {0}")]
  MissingDemand(String),

  /// A single-value adapter observed an empty source.
  #[error("source completed without emitting an item")]
  NoSuchElement,

  /// `cast` met a value of a different kind.
  #[error("cannot cast {found} to {expected}")]
  Cast {
    /// The kind the operator was asked to produce.
    expected: &'static str,
    /// The kind that actually arrived.
    found: &'static str,
  },

  /// A failure raised by user code or a wrapped library.
  #[error("upstream failure: {0}")]
  Upstream(Arc<dyn Error + Send + Sync>),

  /// A plain message, mostly used by sources built with `Flow::error`.
  #[error("{0}")]
  Message(String),

  /// A scheduler could not be created.
  #[error("scheduler unavailable: {0}")]
  Scheduler(String),
}

impl FlowError {
  /// Creates a message error.
  pub fn msg(message: impl Into<String>) -> Self { Self::Message(message.into()) }

  /// Wraps an arbitrary error produced by user code.
  pub fn upstream(error: impl Error + Send + Sync + 'static) -> Self {
    Self::Upstream(Arc::new(error))
  }

  pub(crate) fn illegal_argument(message: impl Into<String>) -> Self {
    Self::IllegalArgument(message.into())
  }

  pub(crate) fn protocol(message: impl Into<String>) -> Self {
    Self::ProtocolViolation(message.into())
  }

  /// Returns `true` for errors that indicate a defect rather than a failure
  /// of the data itself.
  pub fn is_protocol_violation(&self) -> bool { matches!(self, Self::ProtocolViolation(_)) }
}

impl PartialEq for FlowError {
  fn eq(&self, other: &Self) -> bool {
    match (self, other) {
      (Self::Upstream(a), Self::Upstream(b)) => Arc::ptr_eq(a, b),
      (Self::Cast { expected: e1, found: f1 }, Self::Cast { expected: e2, found: f2 }) => {
        e1 == e2 && f1 == f2
      }
      (Self::NoSuchElement, Self::NoSuchElement) => true,
      (Self::IllegalArgument(a), Self::IllegalArgument(b))
      | (Self::ProtocolViolation(a), Self::ProtocolViolation(b))
      | (Self::MissingDemand(a), Self::MissingDemand(b))
      | (Self::Message(a), Self::Message(b))
      | (Self::Scheduler(a), Self::Scheduler(b)) => a == b,
      _ => false,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[derive(Debug, thiserror::Error)]
  #[error("disk on fire")]
  struct DiskError;

  #[test]
  fn display_messages() {
    assert_eq!(FlowError::msg("boom").to_string(), "boom");
    assert_eq!(
      FlowError::Cast { expected: "int", found: "text" }.to_string(),
      "cannot cast text to int"
    );
    assert_eq!(FlowError::upstream(DiskError).to_string(), "upstream failure: disk on fire");
  }

  #[test]
  fn clones_compare_equal() {
    let err = FlowError::upstream(DiskError);
    assert_eq!(err.clone(), err);
    assert_ne!(FlowError::upstream(DiskError), err);
    assert!(FlowError::protocol("x").is_protocol_violation());
    assert!(!FlowError::NoSuchElement.is_protocol_violation());
  }
}
