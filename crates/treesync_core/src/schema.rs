//! Record type schemas and relationship classification.
//!
//! Every record type declares the remote namespace it lives under, its
//! plain attributes, and its to-many relationships. The [`Schema`]
//! registry resolves each relationship to the related type's namespace
//! once, at construction, so classifying a field during reconciliation is
//! a single hash lookup.

use crate::error::{SyncError, SyncResult};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use treesync_store::validate_segment;

fn default_live() -> bool {
    true
}

/// Declaration of one record type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeSchema {
    /// Type name used by callers (`"comment"`).
    pub name: String,
    /// Top-level remote path segment holding every record of this type
    /// (`"comments"`).
    pub namespace: String,
    /// Plain attribute fields.
    #[serde(default)]
    pub attributes: Vec<String>,
    /// To-many relationship fields, mapped to the related type name.
    #[serde(default)]
    pub has_many: BTreeMap<String, String>,
    /// Whether loaded and created records of this type are kept live.
    #[serde(default = "default_live")]
    pub live: bool,
}

impl TypeSchema {
    /// Declares a live type stored under `namespace`.
    pub fn new(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            attributes: Vec::new(),
            has_many: BTreeMap::new(),
            live: true,
        }
    }

    /// Adds a plain attribute.
    pub fn attribute(mut self, field: impl Into<String>) -> Self {
        self.attributes.push(field.into());
        self
    }

    /// Adds a to-many relationship to `related_type`.
    pub fn has_many(mut self, field: impl Into<String>, related_type: impl Into<String>) -> Self {
        self.has_many.insert(field.into(), related_type.into());
        self
    }

    /// Sets whether records of this type are kept live.
    pub fn live(mut self, live: bool) -> Self {
        self.live = live;
        self
    }

    /// Returns true if `field` is declared as a relationship.
    pub fn is_relationship(&self, field: &str) -> bool {
        self.has_many.contains_key(field)
    }
}

/// A resolved to-many relationship.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationshipDescriptor {
    /// Field holding the relationship.
    pub field: String,
    /// Related record type name.
    pub related_type: String,
    /// Namespace the related records live under.
    pub related_namespace: String,
}

#[derive(Debug)]
struct RegisteredType {
    schema: TypeSchema,
    relationships: HashMap<String, RelationshipDescriptor>,
}

/// Registry of every record type known to the engine.
///
/// The registry is immutable once built and is shared by reference.
#[derive(Debug)]
pub struct Schema {
    types: HashMap<String, RegisteredType>,
}

impl Schema {
    /// Builds and validates a registry.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Config`] if:
    /// - Two types share a name or a namespace
    /// - A namespace is not a valid path segment
    /// - A field is declared both as attribute and relationship
    /// - A relationship targets an unregistered type
    pub fn new(types: impl IntoIterator<Item = TypeSchema>) -> SyncResult<Self> {
        let mut by_name: HashMap<String, TypeSchema> = HashMap::new();
        let mut namespaces = HashSet::new();

        for schema in types {
            validate_segment(&schema.namespace).map_err(|e| {
                SyncError::config(format!("type {:?} has an invalid namespace: {e}", schema.name))
            })?;
            if !namespaces.insert(schema.namespace.clone()) {
                return Err(SyncError::config(format!(
                    "namespace {:?} is used by more than one type",
                    schema.namespace
                )));
            }
            if let Some(field) = schema.attributes.iter().find(|a| schema.is_relationship(a)) {
                return Err(SyncError::config(format!(
                    "field {field:?} of type {:?} is both an attribute and a relationship",
                    schema.name
                )));
            }
            if by_name.contains_key(&schema.name) {
                return Err(SyncError::config(format!(
                    "type {:?} is registered twice",
                    schema.name
                )));
            }
            by_name.insert(schema.name.clone(), schema);
        }

        let mut types = HashMap::with_capacity(by_name.len());
        for (name, schema) in &by_name {
            let mut relationships = HashMap::with_capacity(schema.has_many.len());
            for (field, related_type) in &schema.has_many {
                let related = by_name.get(related_type).ok_or_else(|| {
                    SyncError::config(format!(
                        "relationship {name}.{field} targets unknown type {related_type:?}"
                    ))
                })?;
                relationships.insert(
                    field.clone(),
                    RelationshipDescriptor {
                        field: field.clone(),
                        related_type: related.name.clone(),
                        related_namespace: related.namespace.clone(),
                    },
                );
            }
            types.insert(
                name.clone(),
                RegisteredType {
                    schema: schema.clone(),
                    relationships,
                },
            );
        }

        Ok(Self { types })
    }

    /// Builds a registry from a JSON array of type declarations.
    pub fn from_json(json: &str) -> SyncResult<Self> {
        let types: Vec<TypeSchema> = serde_json::from_str(json)?;
        Self::new(types)
    }

    /// Returns the declaration of `type_name`.
    pub fn get(&self, type_name: &str) -> SyncResult<&TypeSchema> {
        self.types
            .get(type_name)
            .map(|t| &t.schema)
            .ok_or_else(|| SyncError::UnknownType(type_name.to_string()))
    }

    /// Returns the namespace of `type_name`.
    pub fn namespace(&self, type_name: &str) -> SyncResult<&str> {
        self.get(type_name).map(|t| t.namespace.as_str())
    }

    /// Classifies `field` of `type_name`.
    ///
    /// Returns the relationship descriptor if the type declares `field` as
    /// a to-many relationship, `None` otherwise (including for unknown
    /// types and fields, which are then handled as plain values).
    pub fn classify(&self, type_name: &str, field: &str) -> Option<&RelationshipDescriptor> {
        self.types.get(type_name)?.relationships.get(field)
    }

    /// Iterates over every registered type.
    pub fn types(&self) -> impl Iterator<Item = &TypeSchema> {
        self.types.values().map(|t| &t.schema)
    }

    /// Finds the type stored under `namespace`.
    pub fn by_namespace(&self, namespace: &str) -> Option<&TypeSchema> {
        self.types().find(|t| t.namespace == namespace)
    }
}
