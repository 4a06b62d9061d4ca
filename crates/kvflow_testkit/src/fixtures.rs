//! Test fixtures and database helpers.
//!
//! Provides an in-memory backend wrapper that drives the event loop for
//! tests, plus helpers to open and seed databases.

use kvflow_core::{Config, CoreResult, Database, Deferred};
use kvflow_storage::{DeliveryOrder, MemoryBackend, MemoryConfig, Value};

/// An in-memory backend for tests.
pub struct TestBackend {
    /// The backend instance.
    pub backend: MemoryBackend,
}

impl TestBackend {
    /// Creates a backend delivering completions in issue order.
    pub fn new() -> Self {
        Self {
            backend: MemoryBackend::new(),
        }
    }

    /// Creates a backend delivering the newest completion first.
    pub fn lifo() -> Self {
        Self {
            backend: MemoryBackend::with_config(MemoryConfig::new().delivery(DeliveryOrder::Lifo)),
        }
    }

    /// Opens a database and drives the loop until it is open.
    pub fn open(&self, config: &Config) -> Database {
        let pending = Database::open(&self.backend, config);
        self.settle(&pending).expect("Failed to open test database")
    }

    /// Opens version 1 of `name` with the given `{k, v}` tables.
    pub fn open_keyed(&self, name: &str, tables: &[&str]) -> Database {
        let config = tables
            .iter()
            .fold(Config::new(name).version(1), |config, table| {
                config.keyed_table(*table)
            });
        self.open(&config)
    }

    /// Drives the loop until idle and returns the outcome of `deferred`.
    ///
    /// # Panics
    ///
    /// Panics if the value is still pending once the loop is idle.
    pub fn settle<T: Clone + 'static>(&self, deferred: &Deferred<T>) -> CoreResult<T> {
        self.backend.run_until_idle();
        deferred
            .outcome()
            .expect("Deferred still pending after the event loop drained")
    }

    /// Stores `{k, v}` records and waits for them to be written.
    pub fn seed_keyed<K, V, I>(&self, db: &Database, table: &str, entries: I)
    where
        K: Into<Value>,
        V: Into<Value>,
        I: IntoIterator<Item = (K, V)>,
    {
        let tx = db.write(&[table]).expect("Failed to begin seed transaction");
        for (key, value) in entries {
            tx.put_keyed(table, key, value);
        }
        self.settle(&tx.done()).expect("Failed to seed records");
    }
}

impl Default for TestBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl std::ops::Deref for TestBackend {
    type Target = MemoryBackend;

    fn deref(&self) -> &Self::Target {
        &self.backend
    }
}

/// Runs a test against a fresh database with the given `{k, v}` tables.
///
/// # Example
///
/// ```rust
/// use kvflow_storage::Value;
/// use kvflow_testkit::with_test_db;
///
/// with_test_db(&["kv"], |backend, db| {
///     let key = db.put_keyed("kv", "a", 1);
///     assert_eq!(backend.settle(&key).unwrap(), Value::from("a"));
/// });
/// ```
pub fn with_test_db<F>(tables: &[&str], f: F)
where
    F: FnOnce(&TestBackend, &Database),
{
    let backend = TestBackend::new();
    let db = backend.open_keyed("test", tables);
    f(&backend, &db);
}
