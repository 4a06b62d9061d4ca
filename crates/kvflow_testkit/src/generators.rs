//! Property-based test generators using proptest.
//!
//! Provides strategies for generating record values, keys and completion
//! orders.

use kvflow_storage::Value;
use proptest::prelude::*;

/// Strategy for generating valid table names.
pub fn table_name_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z][a-z0-9_]{0,15}").expect("Invalid regex")
}

/// Strategy for generating values usable as keys.
pub fn key_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        any::<i64>().prop_map(Value::Integer),
        "[a-zA-Z0-9]{1,12}".prop_map(Value::Text),
        prop::collection::vec(any::<u8>(), 1..8).prop_map(Value::Bytes),
    ]
}

/// Strategy for generating scalar values.
pub fn scalar_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(Value::Integer),
        "[ -~]{0,24}".prop_map(Value::Text),
    ]
}

/// Strategy for generating nested record values.
pub fn value_strategy() -> impl Strategy<Value = Value> {
    scalar_strategy().prop_recursive(3, 32, 4, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
            prop::collection::btree_map("[a-z]{1,6}", inner, 0..4).prop_map(Value::Map),
        ]
    })
}

/// Strategy for generating `(key, value)` pairs with distinct keys.
pub fn keyed_entries_strategy(max: usize) -> impl Strategy<Value = Vec<(Value, Value)>> {
    prop::collection::btree_map("[a-z]{1,8}", value_strategy(), 1..=max.max(1)).prop_map(
        |entries| {
            entries
                .into_iter()
                .map(|(k, v)| (Value::Text(k), v))
                .collect()
        },
    )
}

/// Strategy for generating a permutation of `0..len`.
///
/// Used to drive completions in an arbitrary order.
pub fn permutation_strategy(len: usize) -> impl Strategy<Value = Vec<usize>> {
    Just((0..len).collect::<Vec<_>>()).prop_shuffle()
}

#[cfg(test)]
mod tests {
    use super::*;
    use kvflow_storage::Key;

    proptest! {
        #[test]
        fn keys_are_valid(key in key_strategy()) {
            prop_assert!(Key::try_from(&key).is_ok());
        }

        #[test]
        fn permutations_cover_every_index(order in permutation_strategy(6)) {
            let mut sorted = order.clone();
            sorted.sort_unstable();
            prop_assert_eq!(sorted, (0..6).collect::<Vec<_>>());
        }

        #[test]
        fn values_survive_json(value in value_strategy()) {
            prop_assert_eq!(Value::try_from(value.to_json()).ok(), Some(value));
        }
    }
}
