//! Record serialization into remote payloads.

use crate::record::{FieldValue, Record, RelationState};
use serde_json::{Map, Value};

/// Options for [`serialize`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SerializeOptions {
    /// Embed the record identity in the payload.
    pub include_id: bool,
}

impl SerializeOptions {
    /// Options that embed the record identity.
    pub const WITH_ID: Self = Self { include_id: true };
}

/// Converts `record` into the flat payload written to its location.
///
/// Scalars are emitted as they are. A relationship is emitted as an object
/// keyed by related identity whose values are the identities themselves,
/// which is the shape reconciliation reads back. Empty relationships and
/// null scalars are omitted, and engine bookkeeping is never emitted.
pub fn serialize(record: &Record, options: SerializeOptions, identity_field: &str) -> Map<String, Value> {
    let mut payload = Map::new();
    for (field, value) in record.fields() {
        match value {
            FieldValue::Scalar(Value::Null) => {}
            FieldValue::Scalar(value) => {
                payload.insert(field.to_string(), value.clone());
            }
            FieldValue::Relation(state) => {
                if let Some(value) = relation_value(state) {
                    payload.insert(field.to_string(), value);
                }
            }
        }
    }
    if options.include_id {
        if let Some(id) = record.id() {
            payload.insert(identity_field.to_string(), Value::String(id.to_string()));
        }
    }
    payload
}

fn relation_value(state: &RelationState) -> Option<Value> {
    if state.is_empty() {
        return None;
    }
    let entries = state
        .ids()
        .into_iter()
        .map(|id| (id.to_string(), Value::String(id.to_string())))
        .collect();
    Some(Value::Object(entries))
}
