//! One-shot read results.

use crate::location::Location;
use serde_json::Value;
use std::cmp::Ordering;

/// The value found at a location by a one-shot read.
///
/// Missing data and `null` are indistinguishable: both produce a snapshot
/// whose [`value`](Snapshot::value) is `None`.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    location: Location,
    value: Option<Value>,
}

impl Snapshot {
    /// Creates a snapshot. A `null` value is stored as absent.
    pub fn new(location: Location, value: Option<Value>) -> Self {
        let value = value.filter(|v| !v.is_null());
        Self { location, value }
    }

    /// Returns the location that was read.
    pub fn location(&self) -> &Location {
        &self.location
    }

    /// Returns the key of the location that was read.
    pub fn key(&self) -> Option<&str> {
        self.location.key()
    }

    /// Returns true if anything exists at the location.
    pub fn exists(&self) -> bool {
        self.value.is_some()
    }

    /// Returns the value, if any.
    pub fn value(&self) -> Option<&Value> {
        self.value.as_ref()
    }

    /// Consumes the snapshot, returning the value.
    pub fn into_value(self) -> Option<Value> {
        self.value
    }

    /// Returns the children in store key order.
    ///
    /// Objects yield their entries; arrays yield `("0", ..)`, `("1", ..)`
    /// and so on; scalars have no children.
    pub fn children(&self) -> Vec<(String, &Value)> {
        children_of(self.value.as_ref())
    }
}

/// Lists the children of a value in store key order.
pub fn children_of(value: Option<&Value>) -> Vec<(String, &Value)> {
    let mut children: Vec<(String, &Value)> = match value {
        Some(Value::Object(map)) => map.iter().map(|(k, v)| (k.clone(), v)).collect(),
        Some(Value::Array(items)) => items
            .iter()
            .enumerate()
            .filter(|(_, v)| !v.is_null())
            .map(|(i, v)| (i.to_string(), v))
            .collect(),
        _ => Vec::new(),
    };
    children.sort_by(|(a, _), (b, _)| compare_keys(a, b));
    children
}

/// Orders child keys the way the store iterates them: keys that parse as
/// 32-bit integers come first in numeric order, then every other key in
/// lexicographic order.
pub fn compare_keys(a: &str, b: &str) -> Ordering {
    match (integer_key(a), integer_key(b)) {
        (Some(x), Some(y)) => x.cmp(&y).then_with(|| a.cmp(b)),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => a.cmp(b),
    }
}

fn integer_key(key: &str) -> Option<i32> {
    // "007" is a string key, not the integer 7.
    if key.len() > 1 && (key.starts_with('0') || key.starts_with("-0")) {
        return None;
    }
    key.parse::<i32>().ok()
}
