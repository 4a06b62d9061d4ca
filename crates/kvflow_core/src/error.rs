//! Error types for kvflow core.

use kvflow_storage::StorageError;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in kvflow core operations.
///
/// Errors are cloneable: a pipeline hands the same failure to every error
/// handler, and a future hands it to every reject callback.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// A future was rejected by user code.
    #[error("rejected: {message}")]
    Rejected {
        /// Reason for rejection.
        message: String,
    },

    /// A coroutine body or continuation panicked.
    #[error("panicked: {message}")]
    Panicked {
        /// The panic payload, if it was a string.
        message: String,
    },

    /// An operation was used in a way it does not support.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of the misuse.
        message: String,
    },

    /// A typed value could not be converted to or from a record.
    #[error("codec error: {message}")]
    Codec {
        /// Description of the conversion failure.
        message: String,
    },
}

impl CoreError {
    /// Creates a rejection error.
    pub fn rejected(message: impl Into<String>) -> Self {
        Self::Rejected {
            message: message.into(),
        }
    }

    /// Creates a panic error.
    pub fn panicked(message: impl Into<String>) -> Self {
        Self::Panicked {
            message: message.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Creates a codec error.
    pub fn codec(message: impl Into<String>) -> Self {
        Self::Codec {
            message: message.into(),
        }
    }

    /// Returns the storage error, if this is one.
    #[must_use]
    pub fn as_storage(&self) -> Option<&StorageError> {
        match self {
            Self::Storage(e) => Some(e),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(e: serde_json::Error) -> Self {
        Self::codec(e.to_string())
    }
}
