//! Property-based test generators using proptest.
//!
//! Every strategy produces values that pass validation: kinds and names
//! avoid the reserved `__x__` form, ids are positive, and parents are
//! complete and share the child's namespace.

use kinddb_core::{Key, KeyId, PathElement, Record, Value};
use proptest::prelude::*;

/// Strategy for valid kind names.
pub fn kind_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[A-Z][A-Za-z0-9]{0,15}").expect("Invalid regex")
}

/// Strategy for optional namespaces. Empty namespaces are never produced.
pub fn namespace_strategy() -> impl Strategy<Value = Option<String>> {
    prop::option::of(prop::string::string_regex("[a-z][a-z0-9-]{0,11}").expect("Invalid regex"))
}

/// Strategy for ids and names.
pub fn key_id_strategy() -> impl Strategy<Value = KeyId> {
    prop_oneof![
        (1..=i64::MAX).prop_map(KeyId::Id),
        prop::string::string_regex("[a-z][a-z0-9_.-]{0,23}")
            .expect("Invalid regex")
            .prop_map(KeyId::Name),
    ]
}

/// Strategy for complete ancestor paths of one to four elements.
pub fn path_strategy() -> impl Strategy<Value = Vec<PathElement>> {
    prop::collection::vec((kind_strategy(), key_id_strategy()), 1..=4).prop_map(|steps| {
        steps
            .into_iter()
            .map(|(kind, id)| PathElement::new(kind, id))
            .collect()
    })
}

/// Strategy for complete keys with parents and namespaces.
pub fn key_strategy() -> impl Strategy<Value = Key> {
    (path_strategy(), namespace_strategy()).prop_map(|(path, namespace)| {
        Key::from_path(&path, namespace).expect("generated paths are complete")
    })
}

/// Strategy for indexable scalar values.
pub fn indexable_value_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(Value::Integer),
        (-1.0e9f64..1.0e9).prop_map(Value::Float),
        prop::string::string_regex("[a-zA-Z0-9 ]{0,32}")
            .expect("Invalid regex")
            .prop_map(Value::Text),
        prop::collection::vec(any::<u8>(), 0..32).prop_map(Value::Bytes),
    ]
}

/// Strategy for records with one to eight indexed properties.
pub fn record_strategy() -> impl Strategy<Value = Record> {
    prop::collection::btree_map(
        prop::string::string_regex("[a-z][a-z0-9_]{0,11}").expect("Invalid regex"),
        indexable_value_strategy(),
        1..=8,
    )
    .prop_map(|properties| {
        properties
            .into_iter()
            .fold(Record::new(), |record, (name, value)| record.with_indexed(name, value))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    proptest! {
        #[test]
        fn generated_keys_validate(key in key_strategy()) {
            prop_assert!(key.validate_complete().is_ok());
        }

        #[test]
        fn generated_records_are_indexable(record in record_strategy()) {
            for (_, property) in record.iter() {
                prop_assert!(property.value.is_indexable());
            }
        }
    }
}
