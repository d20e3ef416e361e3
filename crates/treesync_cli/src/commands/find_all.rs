//! Find-all command implementation.

use super::{CliError, Tree};
use treesync_store::Value;

/// Lists every record of `type_name` through the gateway.
pub async fn collect(tree: &Tree, type_name: &str, limit: Option<usize>) -> Result<Vec<Value>, CliError> {
    let mut records = tree.repository.gateway().find_all(type_name).await?;
    if let Some(limit) = limit {
        records.truncate(limit);
    }
    Ok(records)
}

/// Runs the find-all command.
pub async fn run(tree: &Tree, type_name: &str, limit: Option<usize>) -> Result<(), Box<dyn std::error::Error>> {
    let records = collect(tree, type_name, limit).await?;
    println!("{}", serde_json::to_string_pretty(&records)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use treesync_core::SyncError;
    use treesync_testkit::SnapshotFile;

    #[tokio::test]
    async fn stamps_identities_in_key_order() {
        let file = SnapshotFile::new(&json!({"posts": {"b": {"x": 2}, "a": {"x": 1}}}));
        let tree = Tree::open(file.path(), None, "id").unwrap();

        let records = collect(&tree, "posts", None).await.unwrap();
        assert_eq!(records, vec![json!({"x": 1, "id": "a"}), json!({"x": 2, "id": "b"})]);

        let records = collect(&tree, "posts", Some(1)).await.unwrap();
        assert_eq!(records.len(), 1);
    }

    #[tokio::test]
    async fn custom_identity_field() {
        let file = SnapshotFile::new(&json!({"posts": {"a": {"x": 1}}}));
        let tree = Tree::open(file.path(), None, "key").unwrap();
        let records = collect(&tree, "posts", None).await.unwrap();
        assert_eq!(records, vec![json!({"x": 1, "key": "a"})]);
    }

    #[tokio::test]
    async fn unknown_type_is_reported() {
        let file = SnapshotFile::new(&json!({}));
        let tree = Tree::open(file.path(), None, "id").unwrap();
        assert!(matches!(
            collect(&tree, "posts", None).await,
            Err(CliError::Sync(SyncError::UnknownType(_)))
        ));
    }
}
