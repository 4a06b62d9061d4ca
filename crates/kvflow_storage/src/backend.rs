//! Storage backend trait definitions.

use crate::error::StorageResult;
use crate::request::Request;
use crate::value::{Value, KEY_FIELD};
use std::fmt;
use std::rc::Rc;

/// Access mode of a transaction scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionMode {
    /// Reads only.
    ReadOnly,
    /// Reads and writes.
    ReadWrite,
}

impl TransactionMode {
    /// Returns true if writes are allowed.
    #[must_use]
    pub fn is_writable(self) -> bool {
        self == TransactionMode::ReadWrite
    }
}

/// Identifier of a transaction scope.
///
/// Scope IDs are monotonically increasing per backend and never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ScopeId(pub u64);

impl ScopeId {
    /// Creates a new scope ID.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw ID value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ScopeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "scope:{}", self.0)
    }
}

/// Declaration of a table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSchema {
    name: String,
    key_path: String,
}

impl TableSchema {
    /// Declares a table whose records carry their key at `key_path`.
    pub fn new(name: impl Into<String>, key_path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            key_path: key_path.into(),
        }
    }

    /// Declares a key/value table whose records are `{k, v}` pairs.
    pub fn keyed(name: impl Into<String>) -> Self {
        Self::new(name, KEY_FIELD)
    }

    /// Returns the table name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the field holding each record's key.
    #[must_use]
    pub fn key_path(&self) -> &str {
        &self.key_path
    }
}

/// Schema changes available while a database is being upgraded.
pub trait UpgradeContext {
    /// Version stored before the upgrade (0 for a new database).
    fn old_version(&self) -> u32;

    /// Version being upgraded to.
    fn new_version(&self) -> u32;

    /// Names of the existing tables.
    fn table_names(&self) -> Vec<String>;

    /// Returns true if the table exists.
    fn has_table(&self, name: &str) -> bool {
        self.table_names().iter().any(|t| t == name)
    }

    /// Creates a table.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StorageError::TableExists`] if the table exists.
    fn create_table(&mut self, schema: TableSchema) -> StorageResult<()>;

    /// Deletes a table and all of its records.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StorageError::TableNotFound`] if the table is missing.
    fn delete_table(&mut self, name: &str) -> StorageResult<()>;
}

/// Callback run when an open request raises the database version.
pub type UpgradeHandler = Box<dyn FnOnce(&mut dyn UpgradeContext) -> StorageResult<()>>;

/// Boxes a closure as an [`UpgradeHandler`].
pub fn upgrade_fn<F>(f: F) -> UpgradeHandler
where
    F: FnOnce(&mut dyn UpgradeContext) -> StorageResult<()> + 'static,
{
    Box::new(f)
}

/// An asynchronous, callback-based key/value object store.
///
/// Every operation returns a [`Request`] that completes later with exactly
/// one success or one error.
pub trait StorageBackend {
    /// Opens (creating if needed) the named database.
    ///
    /// With `version` set above the stored version, `upgrade` runs before the
    /// request succeeds. `None` opens the current version (1 for a new
    /// database). A version below the stored one fails with
    /// [`crate::StorageError::VersionMismatch`].
    fn open(
        &self,
        name: &str,
        version: Option<u32>,
        upgrade: Option<UpgradeHandler>,
    ) -> Request<Rc<dyn DatabaseHandle>>;

    /// Deletes the named database. Succeeds even if it does not exist.
    fn delete_database(&self, name: &str) -> Request<Value>;
}

/// An open database.
pub trait DatabaseHandle {
    /// Returns the database name.
    fn name(&self) -> &str;

    /// Returns the version the handle was opened at.
    fn version(&self) -> u32;

    /// Names of the tables in the database.
    fn table_names(&self) -> Vec<String>;

    /// Begins a transaction over the given tables.
    ///
    /// # Errors
    ///
    /// Fails synchronously if no table is named or a table does not exist.
    fn transaction(
        &self,
        tables: &[&str],
        mode: TransactionMode,
    ) -> StorageResult<Rc<dyn TransactionScope>>;
}

/// A transaction scope issuing requests against a fixed set of tables.
///
/// The scope stays active while requests are outstanding. Once the last one
/// has completed and no new request was issued from its callbacks, the scope
/// fires its completion signal and becomes inactive.
pub trait TransactionScope {
    /// Returns the scope ID.
    fn id(&self) -> ScopeId;

    /// Returns the access mode.
    fn mode(&self) -> TransactionMode;

    /// Returns true until the completion signal has fired.
    fn is_active(&self) -> bool;

    /// Stores a record, replacing any record with the same key.
    /// Completes with the record key.
    fn put(&self, table: &str, record: Value) -> Request<Value>;

    /// Reads the record stored under `key`. Completes with the record or
    /// [`Value::Null`] if absent.
    fn get(&self, table: &str, key: &Value) -> Request<Value>;

    /// Removes every record of the table. Completes with [`Value::Null`].
    fn clear(&self, table: &str) -> Request<Value>;

    /// Registers a handler for the "all operations complete" signal.
    /// Runs immediately if the scope already completed.
    fn on_complete(&self, handler: Box<dyn FnOnce()>);
}
