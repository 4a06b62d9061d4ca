//! Error types for storage operations.

use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
///
/// Errors are cloneable so a single failure can be handed to every
/// handler registered on a completion token.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
    /// The named database does not exist.
    #[error("database not found: {name}")]
    DatabaseNotFound {
        /// Name of the database.
        name: String,
    },

    /// The named table does not exist in the database.
    #[error("table not found: {table}")]
    TableNotFound {
        /// Name of the table.
        table: String,
    },

    /// A table with this name already exists.
    #[error("table already exists: {table}")]
    TableExists {
        /// Name of the table.
        table: String,
    },

    /// The table was not part of the transaction scope.
    #[error("table {table} is not part of this transaction")]
    NotInScope {
        /// Name of the table.
        table: String,
    },

    /// A transaction was requested without any table.
    #[error("transaction scope must name at least one table")]
    EmptyScope,

    /// A write was issued against a read-only transaction.
    #[error("transaction is read-only")]
    ReadOnly,

    /// The transaction already completed.
    #[error("transaction is no longer active")]
    TransactionInactive,

    /// The requested version is older than the stored one.
    #[error("requested version {requested} is lower than stored version {stored}")]
    VersionMismatch {
        /// The version passed to open.
        requested: u32,
        /// The version currently stored.
        stored: u32,
    },

    /// The schema upgrade handler failed.
    #[error("upgrade failed: {message}")]
    UpgradeFailed {
        /// Description of the failure.
        message: String,
    },

    /// The record does not carry a value at the table's key path.
    #[error("record has no key at path {key_path:?}")]
    MissingKey {
        /// The key path of the table.
        key_path: String,
    },

    /// The value cannot be used as a key.
    #[error("invalid key: {message}")]
    InvalidKey {
        /// Description of the problem.
        message: String,
    },

    /// The value cannot be represented in the record model.
    #[error("unsupported value: {message}")]
    UnsupportedValue {
        /// Description of the problem.
        message: String,
    },

    /// A failure injected by a test backend.
    #[error("injected failure: {message}")]
    Injected {
        /// The message supplied when the fault was armed.
        message: String,
    },
}

impl StorageError {
    /// Creates a table not found error.
    pub fn table_not_found(table: impl Into<String>) -> Self {
        Self::TableNotFound {
            table: table.into(),
        }
    }

    /// Creates a not-in-scope error.
    pub fn not_in_scope(table: impl Into<String>) -> Self {
        Self::NotInScope {
            table: table.into(),
        }
    }

    /// Creates an upgrade failed error.
    pub fn upgrade_failed(message: impl Into<String>) -> Self {
        Self::UpgradeFailed {
            message: message.into(),
        }
    }

    /// Creates an invalid key error.
    pub fn invalid_key(message: impl Into<String>) -> Self {
        Self::InvalidKey {
            message: message.into(),
        }
    }

    /// Creates an unsupported value error.
    pub fn unsupported_value(message: impl Into<String>) -> Self {
        Self::UnsupportedValue {
            message: message.into(),
        }
    }

    /// Creates an injected failure.
    pub fn injected(message: impl Into<String>) -> Self {
        Self::Injected {
            message: message.into(),
        }
    }
}
