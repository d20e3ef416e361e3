//! Get command implementation.

use super::{CliError, Tree};
use treesync_store::{Location, RemoteStore, Value};

/// Reads the value at `path`.
pub async fn read(tree: &Tree, path: &str) -> Result<Option<Value>, CliError> {
    let location = Location::parse(path)?;
    let snapshot = tree.store.read_once(&location).await?;
    Ok(snapshot.into_value())
}

/// Runs the get command.
pub async fn run(tree: &Tree, path: &str) -> Result<(), Box<dyn std::error::Error>> {
    match read(tree, path).await? {
        Some(value) => println!("{}", serde_json::to_string_pretty(&value)?),
        None => println!("null"),
    }
    Ok(())
}
