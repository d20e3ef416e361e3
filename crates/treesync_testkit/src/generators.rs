//! Property-based test generators using proptest.

use proptest::prelude::*;
use serde_json::{json, Value};

/// Strategy for generating valid record identities and path segments.
pub fn identity_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-zA-Z0-9_-]{1,20}").expect("Invalid regex")
}

/// Strategy for generating scalar field values.
pub fn scalar_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(|n| json!(n)),
        prop::string::string_regex("[ -~]{0,32}")
            .expect("Invalid regex")
            .prop_map(Value::String),
    ]
}

/// Strategy for generating a sequence of remote title updates.
pub fn title_sequence_strategy() -> impl Strategy<Value = Vec<String>> {
    prop::collection::vec(
        prop::string::string_regex("[a-z ]{1,12}").expect("Invalid regex"),
        1..8,
    )
}
