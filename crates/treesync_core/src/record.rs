//! Locally held records.

use crate::schema::TypeSchema;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Shared handle to a record.
///
/// Records are shared between the caller, the identity map, live
/// bindings and the relationship collections of other records.
pub type RecordHandle = Arc<RwLock<Record>>;

/// One element of a relationship collection.
///
/// The identity is kept next to the handle so membership checks never
/// lock the related record.
#[derive(Clone)]
pub struct RelatedRecord {
    /// Identity of the related record.
    pub id: String,
    /// The related record.
    pub record: RecordHandle,
}

impl RelatedRecord {
    /// Wraps `record`, reading its identity.
    ///
    /// Returns `None` if the record has no identity yet.
    pub fn from_handle(record: RecordHandle) -> Option<Self> {
        let id = record.read().id()?.to_string();
        Some(Self { id, record })
    }
}

impl fmt::Debug for RelatedRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RelatedRecord({})", self.id)
    }
}

/// Materialization state of a relationship field.
///
/// The persistence framework moves a field to `Loading` while it
/// materializes the collection and to `Loaded` once done. Elements linked
/// while loading are buffered and merged when loading finishes.
#[derive(Debug, Clone, Default)]
pub enum RelationState {
    /// Nothing linked yet.
    #[default]
    Empty,
    /// The framework is materializing the collection.
    Loading {
        /// Elements linked in the meantime.
        buffered: Vec<RelatedRecord>,
    },
    /// A materialized collection.
    Loaded(Vec<RelatedRecord>),
}

impl RelationState {
    /// Returns the linked elements (buffered ones while loading).
    pub fn items(&self) -> &[RelatedRecord] {
        match self {
            RelationState::Empty => &[],
            RelationState::Loading { buffered } => buffered,
            RelationState::Loaded(items) => items,
        }
    }

    /// Returns true if an element with identity `id` is linked.
    pub fn contains(&self, id: &str) -> bool {
        self.items().iter().any(|item| item.id == id)
    }

    /// Returns the identities of the linked elements, in link order.
    pub fn ids(&self) -> Vec<&str> {
        self.items().iter().map(|item| item.id.as_str()).collect()
    }

    /// Returns true while the framework is materializing the collection.
    pub fn is_loading(&self) -> bool {
        matches!(self, RelationState::Loading { .. })
    }

    /// Number of linked elements.
    pub fn len(&self) -> usize {
        self.items().len()
    }

    /// Returns true if nothing is linked.
    pub fn is_empty(&self) -> bool {
        self.items().is_empty()
    }

    fn push(&mut self, item: RelatedRecord) {
        match self {
            RelationState::Empty => *self = RelationState::Loaded(vec![item]),
            RelationState::Loading { buffered } => buffered.push(item),
            RelationState::Loaded(items) => items.push(item),
        }
    }
}

/// Value of one record field.
#[derive(Debug, Clone)]
pub enum FieldValue {
    /// A plain value.
    Scalar(Value),
    /// A to-many relationship.
    Relation(RelationState),
}

/// A typed, identified record with a mutable field set.
///
/// Field mutations go through methods that bump [`revision`](Record::revision)
/// whenever the field set actually changes, which makes "nothing was
/// written" observable.
pub struct Record {
    type_name: String,
    id: Option<String>,
    fields: BTreeMap<String, FieldValue>,
    revision: u64,
    persisted: bool,
    deleted: bool,
}

impl Record {
    /// Creates a record without identity. Every declared relationship
    /// starts out `Empty`.
    pub fn new(schema: &TypeSchema) -> Self {
        let fields = schema
            .has_many
            .keys()
            .map(|field| (field.clone(), FieldValue::Relation(RelationState::Empty)))
            .collect();
        Self {
            type_name: schema.name.clone(),
            id: None,
            fields,
            revision: 0,
            persisted: false,
            deleted: false,
        }
    }

    /// Creates a record with a known identity.
    pub fn with_id(schema: &TypeSchema, id: impl Into<String>) -> Self {
        let mut record = Self::new(schema);
        record.id = Some(id.into());
        record
    }

    /// Wraps the record in a shared handle.
    pub fn into_handle(self) -> RecordHandle {
        Arc::new(RwLock::new(self))
    }

    /// Returns the type name.
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// Returns the identity, if assigned.
    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    /// Assigns the identity. An identity, once set, never changes, so this
    /// returns false and does nothing if one is already present.
    pub fn assign_id(&mut self, id: impl Into<String>) -> bool {
        if self.id.is_some() {
            return false;
        }
        self.id = Some(id.into());
        true
    }

    /// Returns the mutation counter.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Returns true once the record exists remotely.
    pub fn is_persisted(&self) -> bool {
        self.persisted
    }

    /// Marks the record as existing remotely.
    pub fn mark_persisted(&mut self) {
        self.persisted = true;
    }

    /// Returns true once the record was deleted remotely.
    pub fn is_deleted(&self) -> bool {
        self.deleted
    }

    /// Marks the record as deleted. A deleted record is never written
    /// again.
    pub fn mark_deleted(&mut self) {
        self.deleted = true;
    }

    /// Returns a field.
    pub fn get(&self, field: &str) -> Option<&FieldValue> {
        self.fields.get(field)
    }

    /// Returns a scalar field.
    pub fn scalar(&self, field: &str) -> Option<&Value> {
        match self.fields.get(field) {
            Some(FieldValue::Scalar(value)) => Some(value),
            _ => None,
        }
    }

    /// Returns a relationship field.
    pub fn relation(&self, field: &str) -> Option<&RelationState> {
        match self.fields.get(field) {
            Some(FieldValue::Relation(state)) => Some(state),
            _ => None,
        }
    }

    /// Iterates over every field.
    pub fn fields(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Sets a scalar field. Setting `null` removes the field.
    pub fn set(&mut self, field: impl Into<String>, value: Value) {
        let field = field.into();
        if value.is_null() {
            self.fields.remove(&field);
        } else {
            self.fields.insert(field, FieldValue::Scalar(value));
        }
        self.revision += 1;
    }

    /// Empties a field: scalars are removed, relationships become `Empty`.
    /// Returns true if anything changed.
    pub fn clear(&mut self, field: &str) -> bool {
        let changed = match self.fields.remove(field) {
            None => false,
            Some(FieldValue::Scalar(_)) => true,
            Some(FieldValue::Relation(state)) => {
                self.fields.insert(
                    field.to_string(),
                    FieldValue::Relation(RelationState::Empty),
                );
                !matches!(state, RelationState::Empty)
            }
        };
        if changed {
            self.revision += 1;
        }
        changed
    }

    /// Appends `item` to a relationship unless an element with the same
    /// identity is already linked. Returns true if it was appended.
    ///
    /// A missing or scalar field is replaced by a relationship.
    pub fn link(&mut self, field: &str, item: RelatedRecord) -> bool {
        let entry = self
            .fields
            .entry(field.to_string())
            .or_insert(FieldValue::Relation(RelationState::Empty));
        if let FieldValue::Scalar(_) = entry {
            *entry = FieldValue::Relation(RelationState::Empty);
        }
        let FieldValue::Relation(state) = entry else {
            return false;
        };
        if state.contains(&item.id) {
            return false;
        }
        state.push(item);
        self.revision += 1;
        true
    }

    /// Marks a relationship as being materialized.
    pub fn begin_loading(&mut self, field: &str) {
        self.fields.insert(
            field.to_string(),
            FieldValue::Relation(RelationState::Loading {
                buffered: Vec::new(),
            }),
        );
    }

    /// Completes materialization with `items`, merging anything linked
    /// while loading. Duplicate identities are dropped.
    pub fn finish_loading(&mut self, field: &str, items: Vec<RelatedRecord>) {
        let buffered = match self.fields.remove(field) {
            Some(FieldValue::Relation(RelationState::Loading { buffered })) => buffered,
            _ => Vec::new(),
        };
        let mut merged = RelationState::Empty;
        for item in items.into_iter().chain(buffered) {
            if !merged.contains(&item.id) {
                merged.push(item);
            }
        }
        let merged = match merged {
            RelationState::Empty => RelationState::Loaded(Vec::new()),
            other => other,
        };
        self.fields
            .insert(field.to_string(), FieldValue::Relation(merged));
        self.revision += 1;
    }
}

impl fmt::Debug for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Record")
            .field("type_name", &self.type_name)
            .field("id", &self.id)
            .field("fields", &self.fields)
            .field("revision", &self.revision)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn post_schema() -> TypeSchema {
        TypeSchema::new("post", "posts")
            .attribute("title")
            .has_many("comments", "comment")
    }

    fn comment(id: &str) -> RelatedRecord {
        let schema = TypeSchema::new("comment", "comments");
        RelatedRecord::from_handle(Record::with_id(&schema, id).into_handle()).unwrap()
    }

    #[test]
    fn new_record_has_empty_relations() {
        let record = Record::new(&post_schema());
        assert_eq!(record.id(), None);
        assert!(matches!(
            record.relation("comments"),
            Some(RelationState::Empty)
        ));
        assert_eq!(record.revision(), 0);
    }

    #[test]
    fn identity_is_assigned_once() {
        let mut record = Record::new(&post_schema());
        assert!(record.assign_id("p1"));
        assert!(!record.assign_id("p2"));
        assert_eq!(record.id(), Some("p1"));
    }

    #[test]
    fn set_and_clear_scalar() {
        let mut record = Record::new(&post_schema());
        record.set("title", json!("Hello"));
        assert_eq!(record.scalar("title"), Some(&json!("Hello")));
        assert_eq!(record.revision(), 1);

        assert!(record.clear("title"));
        assert!(record.get("title").is_none());
        assert!(!record.clear("title"));
        assert_eq!(record.revision(), 2);
    }

    #[test]
    fn setting_null_removes() {
        let mut record = Record::new(&post_schema());
        record.set("title", json!("Hello"));
        record.set("title", Value::Null);
        assert!(record.get("title").is_none());
    }

    #[test]
    fn link_deduplicates() {
        let mut record = Record::new(&post_schema());
        assert!(record.link("comments", comment("c1")));
        assert!(!record.link("comments", comment("c1")));
        assert!(record.link("comments", comment("c2")));
        assert_eq!(record.relation("comments").unwrap().ids(), vec!["c1", "c2"]);
    }

    #[test]
    fn clear_relation_empties_it() {
        let mut record = Record::new(&post_schema());
        record.link("comments", comment("c1"));
        assert!(record.clear("comments"));
        assert!(record.relation("comments").unwrap().is_empty());
        assert!(!record.clear("comments"));
    }

    #[test]
    fn linking_while_loading_buffers() {
        let mut record = Record::new(&post_schema());
        record.begin_loading("comments");
        assert!(record.link("comments", comment("c2")));
        assert!(record.relation("comments").unwrap().is_loading());

        record.finish_loading("comments", vec![comment("c1"), comment("c2")]);
        let state = record.relation("comments").unwrap();
        assert!(!state.is_loading());
        assert_eq!(state.ids(), vec!["c1", "c2"]);
    }

    #[test]
    fn finish_loading_with_nothing_is_loaded_and_empty() {
        let mut record = Record::new(&post_schema());
        record.begin_loading("comments");
        record.finish_loading("comments", Vec::new());
        assert!(matches!(
            record.relation("comments"),
            Some(RelationState::Loaded(items)) if items.is_empty()
        ));
    }
}
