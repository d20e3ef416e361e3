//! Test fixtures.
//!
//! Provides a small blog schema (posts with comments, plus a non-live
//! tag type) and a repository backed by a [`MemoryStore`].

use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use treesync_core::{Connection, Repository, Schema, SyncConfig, TypeSchema};
use treesync_store::MemoryStore;

/// URL the fixtures connect to.
pub const TEST_URL: &str = "memory://testkit";

/// Returns the blog type declarations.
///
/// - `post` (`posts`): `title`, `body`, has many `comments`
/// - `comment` (`comments`): `body`, `author`
/// - `tag` (`tags`): `label`, not live
pub fn blog_types() -> Vec<TypeSchema> {
    vec![
        TypeSchema::new("post", "posts")
            .attribute("title")
            .attribute("body")
            .has_many("comments", "comment"),
        TypeSchema::new("comment", "comments")
            .attribute("body")
            .attribute("author"),
        TypeSchema::new("tag", "tags").attribute("label").live(false),
    ]
}

/// Returns the blog schema registry.
pub fn blog_schema() -> Arc<Schema> {
    Arc::new(Schema::new(blog_types()).expect("blog schema is valid"))
}

/// A repository over an in-memory store holding the blog schema.
pub struct TestBlog {
    /// The backing store, for seeding data and inspecting writes.
    pub store: Arc<MemoryStore>,
    /// The shared connection.
    pub connection: Arc<Connection>,
    /// The repository under test.
    pub repository: Arc<Repository>,
}

impl TestBlog {
    /// Creates an empty blog.
    pub fn new() -> Self {
        Self::with_data(Value::Null)
    }

    /// Creates a blog whose store holds `data`.
    pub fn with_data(data: Value) -> Self {
        Self::with_config(SyncConfig::new(TEST_URL), data)
    }

    /// Creates a blog with a custom configuration.
    pub fn with_config(config: SyncConfig, data: Value) -> Self {
        let store = Arc::new(MemoryStore::with_data(data).expect("fixture data is valid"));
        let connection = Arc::new(
            Connection::new(config, store.connector()).expect("fixture config is valid"),
        );
        let repository = Repository::new(Arc::clone(&connection), blog_schema());
        Self {
            store,
            connection,
            repository,
        }
    }

    /// Returns a copy of the remote value at `path`.
    pub fn remote(&self, path: &str) -> Value {
        let mut value = self.store.data();
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            value = value.get(segment).cloned().unwrap_or(Value::Null);
        }
        value
    }
}

impl Default for TestBlog {
    fn default() -> Self {
        Self::new()
    }
}

/// A JSON snapshot written to a temporary directory.
pub struct SnapshotFile {
    path: PathBuf,
    /// Kept alive to prevent cleanup.
    _temp_dir: TempDir,
}

impl SnapshotFile {
    /// Writes `data` to `snapshot.json` in a fresh temporary directory.
    pub fn new(data: &Value) -> Self {
        Self::named("snapshot.json", &data.to_string())
    }

    /// Writes raw `contents` to `name` in a fresh temporary directory.
    pub fn named(name: &str, contents: &str) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let path = temp_dir.path().join(name);
        std::fs::write(&path, contents).expect("Failed to write snapshot");
        Self {
            path,
            _temp_dir: temp_dir,
        }
    }

    /// Returns the file path.
    pub fn path(&self) -> &Path {
        &self.path
    }
}
