//! CLI command implementations.

pub mod find_all;
pub mod get;
pub mod inspect;

use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;
use treesync_core::{Connection, Repository, Schema, SyncConfig, SyncError, TypeSchema};
use treesync_store::{children_of, MemoryStore, StoreError, Value};

/// URL the CLI connects its in-memory store under.
const SNAPSHOT_URL: &str = "memory://snapshot";

/// Errors raised by CLI commands.
#[derive(Error, Debug)]
pub enum CliError {
    /// A file could not be read.
    #[error("cannot read {path}: {source}")]
    Read {
        /// File path.
        path: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// A file is not valid JSON.
    #[error("invalid JSON in {path}: {source}")]
    Json {
        /// File path.
        path: String,
        /// Underlying error.
        #[source]
        source: serde_json::Error,
    },

    /// The snapshot cannot be stored as a tree.
    #[error("invalid snapshot: {0}")]
    Store(#[from] StoreError),

    /// The engine rejected a request.
    #[error(transparent)]
    Sync(#[from] SyncError),
}

/// A snapshot loaded into an in-memory store, with its schema.
pub struct Tree {
    /// The in-memory store.
    pub store: Arc<MemoryStore>,
    /// Repository reading through the gateway.
    pub repository: Arc<Repository>,
    /// Whether the schema came from a file.
    pub declared_schema: bool,
}

impl Tree {
    /// Loads `snapshot`, and `schema` if given.
    ///
    /// Without a schema every top-level key of the snapshot is registered
    /// as a type of the same name with no relationships.
    pub fn open(snapshot: &Path, schema: Option<&Path>, identity_field: &str) -> Result<Self, CliError> {
        let data = read_json(snapshot)?;
        let store = Arc::new(MemoryStore::with_data(data)?);
        let declared_schema = schema.is_some();
        let schema = match schema {
            Some(path) => {
                let contents = read_file(path)?;
                Schema::from_json(&contents)?
            }
            None => infer_schema(&store.data())?,
        };
        debug!(
            snapshot = %snapshot.display(),
            types = schema.types().count(),
            "snapshot loaded"
        );

        let config = SyncConfig::new(SNAPSHOT_URL).with_identity_field(identity_field);
        let connection = Connection::new(config, store.connector())?;
        let repository = Repository::new(Arc::new(connection), Arc::new(schema));
        Ok(Self {
            store,
            repository,
            declared_schema,
        })
    }
}

fn infer_schema(root: &Value) -> Result<Schema, SyncError> {
    let types = children_of(Some(root))
        .into_iter()
        .map(|(namespace, _)| TypeSchema::new(namespace.clone(), namespace).live(false));
    Schema::new(types)
}

fn read_file(path: &Path) -> Result<String, CliError> {
    std::fs::read_to_string(path).map_err(|source| CliError::Read {
        path: path.display().to_string(),
        source,
    })
}

fn read_json(path: &Path) -> Result<Value, CliError> {
    let contents = read_file(path)?;
    serde_json::from_str(&contents).map_err(|source| CliError::Json {
        path: path.display().to_string(),
        source,
    })
}
