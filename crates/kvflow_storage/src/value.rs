//! Dynamic record values and table keys.

use crate::error::{StorageError, StorageResult};
use std::collections::BTreeMap;

/// Field holding the key of a composite key/value record.
pub const KEY_FIELD: &str = "k";

/// Field holding the value of a composite key/value record.
pub const VALUE_FIELD: &str = "v";

/// A dynamic record value.
///
/// Records stored in a table are usually [`Value::Map`]s whose field at the
/// table's key path holds the record key. Floats are intentionally not
/// supported; numbers are signed 64-bit integers.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Value {
    /// Absent or null value.
    #[default]
    Null,
    /// Boolean value.
    Bool(bool),
    /// Signed integer.
    Integer(i64),
    /// Text string.
    Text(String),
    /// Byte string.
    Bytes(Vec<u8>),
    /// Ordered list of values.
    Array(Vec<Value>),
    /// Record with named fields.
    Map(BTreeMap<String, Value>),
}

impl Value {
    /// Creates a map value from field/value pairs.
    pub fn map<K, V, I>(fields: I) -> Self
    where
        K: Into<String>,
        V: Into<Value>,
        I: IntoIterator<Item = (K, V)>,
    {
        Value::Map(
            fields
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    /// Creates the composite `{k, v}` record used by key/value tables.
    pub fn keyed(key: impl Into<Value>, value: impl Into<Value>) -> Self {
        Self::map([(KEY_FIELD, key.into()), (VALUE_FIELD, value.into())])
    }

    /// Check if this value is null.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Get this value as a boolean, if it is one.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Get this value as an integer, if it is one.
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(n) => Some(*n),
            _ => None,
        }
    }

    /// Get this value as a string, if it is a text string.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Get this value as bytes, if it is a byte string.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }

    /// Get this value as an array, if it is one.
    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(a) => Some(a),
            _ => None,
        }
    }

    /// Get this value as a map, if it is one.
    pub fn as_map(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    /// Look up a field in this map value.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.as_map().and_then(|m| m.get(field))
    }

    /// Consumes a map value and returns one of its fields.
    pub fn take(self, field: &str) -> Option<Value> {
        match self {
            Value::Map(mut m) => m.remove(field),
            _ => None,
        }
    }

    /// Converts this value into a JSON value.
    ///
    /// Byte strings become arrays of numbers.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Integer(n) => serde_json::Value::from(*n),
            Value::Text(s) => serde_json::Value::String(s.clone()),
            Value::Bytes(b) => serde_json::Value::Array(
                b.iter().map(|byte| serde_json::Value::from(*byte)).collect(),
            ),
            Value::Array(items) => {
                serde_json::Value::Array(items.iter().map(Value::to_json).collect())
            }
            Value::Map(fields) => serde_json::Value::Object(
                fields
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
        }
    }
}

impl TryFrom<serde_json::Value> for Value {
    type Error = StorageError;

    fn try_from(json: serde_json::Value) -> StorageResult<Self> {
        Ok(match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Integer(i),
                None => {
                    return Err(StorageError::unsupported_value(format!(
                        "number {n} is not a 64-bit signed integer"
                    )))
                }
            },
            serde_json::Value::String(s) => Value::Text(s),
            serde_json::Value::Array(items) => Value::Array(
                items
                    .into_iter()
                    .map(Value::try_from)
                    .collect::<StorageResult<_>>()?,
            ),
            serde_json::Value::Object(fields) => Value::Map(
                fields
                    .into_iter()
                    .map(|(k, v)| Value::try_from(v).map(|v| (k, v)))
                    .collect::<StorageResult<_>>()?,
            ),
        })
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Integer(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Integer(i64::from(n))
    }
}

impl From<u32> for Value {
    fn from(n: u32) -> Self {
        Value::Integer(i64::from(n))
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<Vec<u8>> for Value {
    fn from(b: Vec<u8>) -> Self {
        Value::Bytes(b)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::Array(items)
    }
}

impl From<()> for Value {
    fn from((): ()) -> Self {
        Value::Null
    }
}

impl From<Key> for Value {
    fn from(key: Key) -> Self {
        match key {
            Key::Integer(n) => Value::Integer(n),
            Key::Text(s) => Value::Text(s),
            Key::Bytes(b) => Value::Bytes(b),
            Key::Array(items) => Value::Array(items.into_iter().map(Value::from).collect()),
        }
    }
}

/// A table key.
///
/// Keys are the subset of [`Value`]s that have a total order. Ordering is
/// integers, then text, then bytes, then arrays.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Key {
    /// Integer key.
    Integer(i64),
    /// Text key.
    Text(String),
    /// Binary key.
    Bytes(Vec<u8>),
    /// Compound key.
    Array(Vec<Key>),
}

impl TryFrom<&Value> for Key {
    type Error = StorageError;

    fn try_from(value: &Value) -> StorageResult<Self> {
        match value {
            Value::Integer(n) => Ok(Key::Integer(*n)),
            Value::Text(s) => Ok(Key::Text(s.clone())),
            Value::Bytes(b) => Ok(Key::Bytes(b.clone())),
            Value::Array(items) => Ok(Key::Array(
                items
                    .iter()
                    .map(Key::try_from)
                    .collect::<StorageResult<_>>()?,
            )),
            Value::Null => Err(StorageError::invalid_key("null is not a valid key")),
            Value::Bool(_) => Err(StorageError::invalid_key("booleans are not valid keys")),
            Value::Map(_) => Err(StorageError::invalid_key("maps are not valid keys")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keyed_record_layout() {
        let record = Value::keyed("theme", "dark");
        assert_eq!(record.get(KEY_FIELD), Some(&Value::from("theme")));
        assert_eq!(record.get(VALUE_FIELD), Some(&Value::from("dark")));
        assert_eq!(record.get("missing"), None);
    }

    #[test]
    fn take_field() {
        let record = Value::keyed(1, 42);
        assert_eq!(record.take(VALUE_FIELD), Some(Value::Integer(42)));
        assert_eq!(Value::Integer(3).take(VALUE_FIELD), None);
    }

    #[test]
    fn value_accessors() {
        assert!(Value::Null.is_null());
        assert!(!Value::Bool(true).is_null());
        assert_eq!(Value::Bool(true).as_bool(), Some(true));
        assert_eq!(Value::Integer(42).as_integer(), Some(42));
        assert_eq!(Value::Text("42".into()).as_integer(), None);
        assert_eq!(Value::from("hello").as_text(), Some("hello"));
        assert_eq!(Value::from(vec![1u8, 2]).as_bytes(), Some(&[1u8, 2][..]));
    }

    #[test]
    fn key_ordering() {
        let mut keys = vec![
            Key::Array(vec![]),
            Key::Bytes(vec![0]),
            Key::Text("a".into()),
            Key::Integer(10),
            Key::Integer(-5),
        ];
        keys.sort();
        assert_eq!(keys[0], Key::Integer(-5));
        assert_eq!(keys[1], Key::Integer(10));
        assert_eq!(keys[2], Key::Text("a".into()));
        assert_eq!(keys[3], Key::Bytes(vec![0]));
        assert_eq!(keys[4], Key::Array(vec![]));
    }

    #[test]
    fn invalid_keys() {
        assert!(Key::try_from(&Value::Null).is_err());
        assert!(Key::try_from(&Value::Bool(true)).is_err());
        assert!(Key::try_from(&Value::keyed(1, 2)).is_err());
        assert!(Key::try_from(&Value::Array(vec![Value::Null])).is_err());
    }

    #[test]
    fn json_conversion() {
        let json = serde_json::json!({"name": "ada", "age": 36, "tags": ["x"], "ok": true});
        let value = Value::try_from(json.clone()).unwrap();
        assert_eq!(value.get("age"), Some(&Value::Integer(36)));
        assert_eq!(value.to_json(), json);
    }

    #[test]
    fn json_floats_are_rejected() {
        let result = Value::try_from(serde_json::json!({"ratio": 0.5}));
        assert!(matches!(result, Err(StorageError::UnsupportedValue { .. })));
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn integer_keys_order_like_integers(a in any::<i64>(), b in any::<i64>()) {
                let ka = Key::try_from(&Value::Integer(a)).unwrap();
                let kb = Key::try_from(&Value::Integer(b)).unwrap();
                prop_assert_eq!(ka.cmp(&kb), a.cmp(&b));
            }

            #[test]
            fn text_keys_sort_after_integers(n in any::<i64>(), s in "[a-z]{0,8}") {
                prop_assert!(Key::Integer(n) < Key::Text(s));
            }
        }
    }
}
