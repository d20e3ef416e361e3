//! Inspect command implementation.

use super::Tree;
use serde::Serialize;
use treesync_store::children_of;

/// Snapshot inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Top-level namespaces, in store key order.
    pub namespaces: Vec<NamespaceStats>,
    /// Total number of top-level children across namespaces.
    pub record_count: usize,
    /// Registered types, sorted by name.
    pub types: Vec<TypeInfo>,
}

/// Statistics for one namespace.
#[derive(Debug, Serialize)]
pub struct NamespaceStats {
    /// Namespace key.
    pub namespace: String,
    /// Number of direct children.
    pub children: usize,
    /// Type stored under this namespace, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub type_name: Option<String>,
}

/// A registered type.
#[derive(Debug, Serialize)]
pub struct TypeInfo {
    /// Type name.
    pub name: String,
    /// Namespace.
    pub namespace: String,
    /// Whether records are kept live.
    pub live: bool,
    /// Relationship fields as `field -> type`.
    pub relationships: Vec<String>,
}

/// Collects statistics about the loaded tree.
pub fn collect(tree: &Tree) -> InspectResult {
    let data = tree.store.data();
    let schema = tree.repository.schema();

    let namespaces: Vec<NamespaceStats> = children_of(Some(&data))
        .into_iter()
        .map(|(namespace, value)| NamespaceStats {
            children: children_of(Some(value)).len(),
            type_name: schema.by_namespace(&namespace).map(|t| t.name.clone()),
            namespace,
        })
        .collect();

    let mut types: Vec<TypeInfo> = schema
        .types()
        .map(|t| TypeInfo {
            name: t.name.clone(),
            namespace: t.namespace.clone(),
            live: t.live,
            relationships: t
                .has_many
                .iter()
                .map(|(field, related)| format!("{field} -> {related}"))
                .collect(),
        })
        .collect();
    types.sort_by(|a, b| a.name.cmp(&b.name));

    InspectResult {
        record_count: namespaces.iter().map(|n| n.children).sum(),
        namespaces,
        types,
    }
}

/// Runs the inspect command.
pub fn run(tree: &Tree, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let result = collect(tree);

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        _ => {
            print_text_output(&result, tree.declared_schema);
        }
    }

    Ok(())
}

fn print_text_output(result: &InspectResult, declared_schema: bool) {
    println!("Namespaces: {}", result.namespaces.len());
    println!("Records:    {}", result.record_count);
    for ns in &result.namespaces {
        match &ns.type_name {
            Some(type_name) if declared_schema => {
                println!("  {:<24} {:>8} ({type_name})", ns.namespace, ns.children)
            }
            _ => println!("  {:<24} {:>8}", ns.namespace, ns.children),
        }
    }

    if declared_schema {
        println!();
        println!("Types: {}", result.types.len());
        for t in &result.types {
            let live = if t.live { "live" } else { "static" };
            println!("  {} [{}] @ {}", t.name, live, t.namespace);
            for rel in &t.relationships {
                println!("    has many {rel}");
            }
        }
    }
}
