//! Database handle and convenience helpers.

use crate::config::Config;
use crate::error::{CoreError, CoreResult};
use crate::future::Deferred;
use crate::normalize::{normalize, Awaitable};
use crate::transaction::{PendingRequest, Transaction};
use kvflow_storage::{
    upgrade_fn, DatabaseHandle, StorageBackend, TransactionMode, UpgradeHandler, Value,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use tracing::{debug, trace};

/// An open database.
///
/// Cheap to clone; clones share the backend handle and the default
/// transaction.
///
/// The single-request helpers (`put`, `get`, `put_keyed`, `get_keyed`,
/// `clear`) run in their own transaction unless a default transaction has
/// been set with [`Database::begin_default`], in which case they are issued
/// on that scope until [`Database::end_default`]. The `*_in` variants take
/// the transaction explicitly.
#[derive(Clone)]
pub struct Database {
    handle: Rc<dyn DatabaseHandle>,
    default_tx: Rc<RefCell<Option<Transaction>>>,
}

impl Database {
    /// Opens a database, creating the declared tables on upgrade.
    pub fn open(backend: &dyn StorageBackend, config: &Config) -> Deferred<Database> {
        Self::open_with_upgrade(backend, config, None)
    }

    /// Opens a database, running `hook` after the declared tables have been
    /// created during an upgrade.
    pub fn open_with_upgrade(
        backend: &dyn StorageBackend,
        config: &Config,
        hook: Option<UpgradeHandler>,
    ) -> Deferred<Database> {
        let tables = config.tables.clone();
        let upgrade = upgrade_fn(move |ctx| {
            for schema in tables {
                if !ctx.has_table(schema.name()) {
                    ctx.create_table(schema)?;
                }
            }
            match hook {
                Some(hook) => hook(ctx),
                None => Ok(()),
            }
        });

        debug!(db = %config.name, version = ?config.version, "opening database");
        let request = backend.open(&config.name, config.version, Some(upgrade));
        normalize(Awaitable::from(request)).map(|handle| Ok(Database::from_handle(handle)))
    }

    /// Wraps an already open backend handle.
    pub fn from_handle(handle: Rc<dyn DatabaseHandle>) -> Self {
        Self {
            handle,
            default_tx: Rc::new(RefCell::new(None)),
        }
    }

    /// Returns the database name.
    #[must_use]
    pub fn name(&self) -> &str {
        self.handle.name()
    }

    /// Returns the version the database was opened at.
    #[must_use]
    pub fn version(&self) -> u32 {
        self.handle.version()
    }

    /// Names of the tables in the database.
    #[must_use]
    pub fn table_names(&self) -> Vec<String> {
        self.handle.table_names()
    }

    /// Begins a pipeline over a new transaction scope.
    ///
    /// # Errors
    ///
    /// Fails if no table is named or a table does not exist.
    pub fn transaction(&self, tables: &[&str], mode: TransactionMode) -> CoreResult<Transaction> {
        Ok(Transaction::new(self.handle.transaction(tables, mode)?))
    }

    /// Begins a read-only pipeline.
    ///
    /// # Errors
    ///
    /// See [`Database::transaction`].
    pub fn read(&self, tables: &[&str]) -> CoreResult<Transaction> {
        self.transaction(tables, TransactionMode::ReadOnly)
    }

    /// Begins a read-write pipeline.
    ///
    /// # Errors
    ///
    /// See [`Database::transaction`].
    pub fn write(&self, tables: &[&str]) -> CoreResult<Transaction> {
        self.transaction(tables, TransactionMode::ReadWrite)
    }

    /// Begins a pipeline and makes it the default transaction of the
    /// single-request helpers. Replaces any previous default.
    ///
    /// # Errors
    ///
    /// See [`Database::transaction`]. The previous default is kept on error.
    pub fn begin_default(&self, tables: &[&str], mode: TransactionMode) -> CoreResult<Transaction> {
        let tx = self.transaction(tables, mode)?;
        trace!(db = %self.name(), scope = %tx.scope_id(), "default transaction set");
        *self.default_tx.borrow_mut() = Some(tx.clone());
        Ok(tx)
    }

    /// Clears the default transaction. Returns it if one was set.
    pub fn end_default(&self) -> Option<Transaction> {
        let tx = self.default_tx.borrow_mut().take();
        if let Some(tx) = &tx {
            trace!(db = %self.name(), scope = %tx.scope_id(), "default transaction cleared");
        }
        tx
    }

    /// Returns the default transaction, if set.
    #[must_use]
    pub fn default_transaction(&self) -> Option<Transaction> {
        self.default_tx.borrow().clone()
    }

    /// Stores a record. Resolves with the record key.
    pub fn put(&self, table: &str, record: impl Into<Value>) -> Deferred<Value> {
        self.put_in(None, table, record)
    }

    /// Stores a record in `tx`, the default transaction or a transaction of
    /// its own, in that order of preference.
    pub fn put_in(
        &self,
        tx: Option<&Transaction>,
        table: &str,
        record: impl Into<Value>,
    ) -> Deferred<Value> {
        self.single(
            tx,
            table,
            TransactionMode::ReadWrite,
            PendingRequest::put(table, record.into()),
        )
    }

    /// Reads a record. Resolves with the record or `Null`.
    pub fn get(&self, table: &str, key: impl Into<Value>) -> Deferred<Value> {
        self.get_in(None, table, key)
    }

    /// Reads a record in `tx`, the default transaction or a transaction of
    /// its own.
    pub fn get_in(
        &self,
        tx: Option<&Transaction>,
        table: &str,
        key: impl Into<Value>,
    ) -> Deferred<Value> {
        self.single(
            tx,
            table,
            TransactionMode::ReadOnly,
            PendingRequest::get(table, key.into()),
        )
    }

    /// Stores a `{k, v}` record. Resolves with the key.
    pub fn put_keyed(
        &self,
        table: &str,
        key: impl Into<Value>,
        value: impl Into<Value>,
    ) -> Deferred<Value> {
        self.put_keyed_in(None, table, key, value)
    }

    /// Stores a `{k, v}` record in `tx`, the default transaction or a
    /// transaction of its own.
    pub fn put_keyed_in(
        &self,
        tx: Option<&Transaction>,
        table: &str,
        key: impl Into<Value>,
        value: impl Into<Value>,
    ) -> Deferred<Value> {
        self.single(
            tx,
            table,
            TransactionMode::ReadWrite,
            PendingRequest::put_keyed(table, key.into(), value.into()),
        )
    }

    /// Reads the `v` field of a `{k, v}` record.
    pub fn get_keyed(&self, table: &str, key: impl Into<Value>) -> Deferred<Value> {
        self.get_keyed_in(None, table, key)
    }

    /// Reads the `v` field of a `{k, v}` record in `tx`, the default
    /// transaction or a transaction of its own.
    pub fn get_keyed_in(
        &self,
        tx: Option<&Transaction>,
        table: &str,
        key: impl Into<Value>,
    ) -> Deferred<Value> {
        self.single(
            tx,
            table,
            TransactionMode::ReadOnly,
            PendingRequest::get_keyed(table, key.into()),
        )
    }

    /// Clears a table. Resolves once the clearing transaction has completed.
    pub fn clear(&self, table: &str) -> Deferred<Value> {
        self.clear_in(None, table)
    }

    /// Clears a table in `tx`, the default transaction or a transaction of
    /// its own. Resolves once that transaction has completed.
    pub fn clear_in(&self, tx: Option<&Transaction>, table: &str) -> Deferred<Value> {
        let tx = match self.resolve_tx(tx, table, TransactionMode::ReadWrite) {
            Ok(tx) => tx,
            Err(error) => return Deferred::rejected(error),
        };
        let committed = tx.committed();
        tx.issue(PendingRequest::clear(table))
            .and_then(move |_| committed.map(|()| Ok(Value::Null)))
    }

    /// Returns a typed key/value view over a `{k, v}` table.
    #[must_use]
    pub fn kv_store(&self, table: impl Into<String>) -> KvStore {
        KvStore {
            db: self.clone(),
            table: table.into(),
        }
    }

    fn single(
        &self,
        tx: Option<&Transaction>,
        table: &str,
        mode: TransactionMode,
        request: PendingRequest,
    ) -> Deferred<Value> {
        match self.resolve_tx(tx, table, mode) {
            Ok(tx) => tx.issue(request),
            Err(error) => Deferred::rejected(error),
        }
    }

    fn resolve_tx(
        &self,
        tx: Option<&Transaction>,
        table: &str,
        mode: TransactionMode,
    ) -> CoreResult<Transaction> {
        if let Some(tx) = tx {
            return Ok(tx.clone());
        }
        if let Some(tx) = self.default_transaction() {
            return Ok(tx);
        }
        self.transaction(&[table], mode)
    }
}

impl fmt::Debug for Database {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Database")
            .field("name", &self.name())
            .field("version", &self.version())
            .field("default_tx", &self.default_tx.borrow().as_ref().map(Transaction::scope_id))
            .finish()
    }
}

/// A typed key/value view over a table of `{k, v}` records.
///
/// Values go through `serde_json`, so any `Serialize`/`DeserializeOwned`
/// type without floats can be stored.
#[derive(Clone, Debug)]
pub struct KvStore {
    db: Database,
    table: String,
}

impl KvStore {
    /// Returns the table name.
    #[must_use]
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Reads the raw value under `key`, `Null` if absent.
    pub fn get_value(&self, key: impl Into<Value>) -> Deferred<Value> {
        self.db.get_keyed(&self.table, key)
    }

    /// Stores a raw value under `key`. Resolves with the key.
    pub fn set_value(&self, key: impl Into<Value>, value: impl Into<Value>) -> Deferred<Value> {
        self.db.put_keyed(&self.table, key, value)
    }

    /// Reads and decodes the value under `key`.
    pub fn get<T>(&self, key: impl Into<Value>) -> Deferred<Option<T>>
    where
        T: DeserializeOwned + Clone + 'static,
    {
        self.get_value(key).map(|value| {
            if value.is_null() {
                return Ok(None);
            }
            Ok(Some(serde_json::from_value(value.to_json())?))
        })
    }

    /// Encodes and stores `value` under `key`. Resolves with the key.
    pub fn set<T: Serialize + ?Sized>(&self, key: impl Into<Value>, value: &T) -> Deferred<Value> {
        match encode(value) {
            Ok(value) => self.set_value(key, value),
            Err(error) => Deferred::rejected(error),
        }
    }
}

fn encode<T: Serialize + ?Sized>(value: &T) -> CoreResult<Value> {
    let json = serde_json::to_value(value)?;
    Value::try_from(json).map_err(CoreError::from)
}
