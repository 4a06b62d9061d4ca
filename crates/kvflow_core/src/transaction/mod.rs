//! Batched transaction pipelines.
//!
//! A [`Transaction`] groups storage operations into ordered rounds against
//! one transaction scope:
//! - **Batching**: requests accumulate until a continuation exists to
//!   consume them, then go out together
//! - **Round atomicity**: a continuation runs only after every request of
//!   the previous round has completed
//! - **Short-circuit**: the first failure stops every later round and
//!   continuation, and reaches each error handler once

mod pipeline;
mod request;

pub use pipeline::{Phase, Transaction};
pub use request::{keyed_value, Operation, Parser, PendingRequest};
