//! # kvflow Core
//!
//! Sequencing primitives over a callback-based key/value store.
//!
//! This crate provides:
//! - [`Deferred`], a single-assignment value with chainable callbacks
//! - [`normalize`], turning native or external awaitables into a `Deferred`
//! - The [`coroutine`] driver, resuming explicit state machines at their
//!   suspension points
//! - [`Transaction`], a pipeline running storage requests in ordered rounds
//! - [`Database`], [`KvStore`] and [`ConnectionRegistry`] helpers
//!
//! Everything is single-threaded: handles are `Rc`-based and progress is
//! made only when the storage backend delivers completions.
//!
//! ## Example
//!
//! ```rust
//! use kvflow_core::{Config, Database};
//! use kvflow_storage::{MemoryBackend, Value};
//!
//! let backend = MemoryBackend::new();
//! let opening = Database::open(&backend, &Config::new("app").version(1).keyed_table("kv"));
//! backend.run_until_idle();
//! let db = opening.value().unwrap();
//!
//! let tx = db.write(&["kv"]).unwrap();
//! tx.put_keyed("kv", "visits", 5)
//!     .then(|tx, _| {
//!         tx.get_keyed("kv", "visits");
//!         Ok(())
//!     })
//!     .then(|tx, results| {
//!         let visits = results[0].as_integer().unwrap_or(0);
//!         tx.put_keyed("kv", "visits", visits + 1);
//!         Ok(())
//!     });
//! backend.run_until_idle();
//!
//! let visits = db.get_keyed("kv", "visits");
//! backend.run_until_idle();
//! assert_eq!(visits.value(), Some(Value::Integer(6)));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
pub mod coroutine;
mod database;
mod error;
mod future;
mod normalize;
mod registry;
pub mod transaction;

pub use config::Config;
pub use coroutine::{run, Coroutine, Resume, Step, Suspend};
pub use database::{Database, KvStore};
pub use error::{CoreError, CoreResult};
pub use future::{Deferred, FutureState, Resolver};
pub use normalize::{normalize, Awaitable, Completion};
pub use registry::{ConnectionRegistry, NextStep};
pub use transaction::{Phase, Transaction};

// Re-exported so callers need a single dependency for the common types.
pub use kvflow_storage::{TableSchema, TransactionMode, Value};
