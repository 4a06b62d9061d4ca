//! # kvflow Testkit
//!
//! Test utilities for kvflow.
//!
//! This crate provides:
//! - An in-memory backend wrapper that drives the event loop
//! - Property-based test generators using proptest
//! - A shared recorder for asserting callback order
//! - Tracing setup for tests
//!
//! ## Usage
//!
//! ```rust,ignore
//! use kvflow_testkit::prelude::*;
//!
//! #[test]
//! fn test_with_database() {
//!     with_test_db(&["kv"], |backend, db| {
//!         let key = db.put_keyed("kv", "a", 1);
//!         // ... settle and assert
//!     });
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod recorder;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::init_tracing;
    pub use crate::recorder::*;
}

pub use fixtures::*;
pub use generators::*;
pub use recorder::*;

/// Installs a test-friendly tracing subscriber.
///
/// Filtering follows `RUST_LOG`. Calling it more than once is harmless.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
