//! Requests accumulated into a pipeline round.

use kvflow_storage::{Request, TransactionScope, Value, VALUE_FIELD};

/// Post-processing applied to a raw result before it reaches a continuation.
pub type Parser = fn(Value) -> Value;

/// A storage operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    /// Store a record.
    Put {
        /// Target table.
        table: String,
        /// Record to store.
        record: Value,
    },
    /// Read the record under a key.
    Get {
        /// Target table.
        table: String,
        /// Key to read.
        key: Value,
    },
    /// Remove every record of a table.
    Clear {
        /// Target table.
        table: String,
    },
}

impl Operation {
    /// Returns the target table.
    #[must_use]
    pub fn table(&self) -> &str {
        match self {
            Self::Put { table, .. } | Self::Get { table, .. } | Self::Clear { table } => table,
        }
    }

    /// Returns true for operations that modify the table.
    #[must_use]
    pub fn is_write(&self) -> bool {
        !matches!(self, Self::Get { .. })
    }

    pub(crate) fn issue(&self, scope: &dyn TransactionScope) -> Request<Value> {
        match self {
            Self::Put { table, record } => scope.put(table, record.clone()),
            Self::Get { table, key } => scope.get(table, key),
            Self::Clear { table } => scope.clear(table),
        }
    }
}

/// An operation waiting to be dispatched, with its optional parser.
#[derive(Debug, Clone)]
pub struct PendingRequest {
    operation: Operation,
    parser: Option<Parser>,
}

impl PendingRequest {
    /// A put whose result is the stored record's key.
    pub fn put(table: impl Into<String>, record: Value) -> Self {
        Self::raw(Operation::Put {
            table: table.into(),
            record,
        })
    }

    /// A get whose result is the record, or `Null` if absent.
    pub fn get(table: impl Into<String>, key: Value) -> Self {
        Self::raw(Operation::Get {
            table: table.into(),
            key,
        })
    }

    /// A put of the composite `{k, v}` record.
    pub fn put_keyed(table: impl Into<String>, key: Value, value: Value) -> Self {
        Self::put(table, Value::keyed(key, value))
    }

    /// A get whose result is the stored `v` field, or `Null` if absent.
    pub fn get_keyed(table: impl Into<String>, key: Value) -> Self {
        Self::get(table, key).with_parser(keyed_value)
    }

    /// A clear of the whole table.
    pub fn clear(table: impl Into<String>) -> Self {
        Self::raw(Operation::Clear {
            table: table.into(),
        })
    }

    fn raw(operation: Operation) -> Self {
        Self {
            operation,
            parser: None,
        }
    }

    /// Replaces the parser.
    #[must_use]
    pub fn with_parser(mut self, parser: Parser) -> Self {
        self.parser = Some(parser);
        self
    }

    /// Returns the operation.
    #[must_use]
    pub fn operation(&self) -> &Operation {
        &self.operation
    }

    pub(crate) fn parser(&self) -> Option<Parser> {
        self.parser
    }
}

/// Extracts the value field of a `{k, v}` record.
pub fn keyed_value(record: Value) -> Value {
    record.take(VALUE_FIELD).unwrap_or_default()
}

/// Applies an optional parser to a raw result.
pub(crate) fn parse(parser: Option<Parser>, raw: Value) -> Value {
    match parser {
        Some(parser) => parser(raw),
        None => raw,
    }
}
