//! Source publishers: where sequences start.
//!
//! Every source is cold. Subscribing twice runs the production logic twice
//! with fresh state, so two subscribers of `Flow::range(0, 3)` each see
//! `0, 1, 2`.
//!
//! Iterator-backed sources (`just`, `of`, `from_iter`, `range`, `empty`)
//! emit synchronously on the thread that requests, one item per requested
//! unit. Timed sources (`interval`, `interval_with_delay`, `timer`) run on
//! the scheduler they were given.

mod defer;
mod iter;
mod timed;
mod trivial;

pub use iter::IterPublisher;
