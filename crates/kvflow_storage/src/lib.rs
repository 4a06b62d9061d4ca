//! # kvflow Storage
//!
//! Callback-based key/value object store contract for kvflow.
//!
//! This crate provides the lowest-level storage abstraction. Every
//! operation is issued synchronously and completes later through a
//! [`Request`], whose success or error handlers fire exactly once.
//!
//! ## Design Principles
//!
//! - Completions never fire from the issuing call
//! - A transaction scope completes once no request is outstanding
//! - Single-threaded: handles are `Rc`-shared, not `Send`
//! - Backends know nothing about pipelines or coroutines
//!
//! ## Available Backends
//!
//! - [`MemoryBackend`] - Event-loop driven store for tests and ephemeral data
//!
//! ## Example
//!
//! ```rust
//! use kvflow_storage::{
//!     upgrade_fn, MemoryBackend, StorageBackend, TableSchema, TransactionMode, Value,
//! };
//!
//! let backend = MemoryBackend::new();
//! let open = backend.open(
//!     "app",
//!     Some(1),
//!     Some(upgrade_fn(|ctx| ctx.create_table(TableSchema::keyed("kv")))),
//! );
//! backend.run_until_idle();
//! let db = open.outcome().unwrap().unwrap();
//!
//! let scope = db.transaction(&["kv"], TransactionMode::ReadOnly).unwrap();
//! let get = scope.get("kv", &Value::from("missing"));
//! backend.run_until_idle();
//! assert_eq!(get.outcome(), Some(Ok(Value::Null)));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod event_loop;
mod memory;
mod request;
mod value;

pub use backend::{
    upgrade_fn, DatabaseHandle, ScopeId, StorageBackend, TableSchema, TransactionMode,
    TransactionScope, UpgradeContext, UpgradeHandler,
};
pub use error::{StorageError, StorageResult};
pub use event_loop::{DeliveryOrder, EventLoop, Task};
pub use memory::{MemoryBackend, MemoryCatalog, MemoryConfig};
pub use request::{Completer, Request};
pub use value::{Key, Value, KEY_FIELD, VALUE_FIELD};
