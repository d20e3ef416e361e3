//! treesync CLI
//!
//! Command-line tools for inspecting a treesync data tree offline.
//!
//! The tree is loaded from a JSON snapshot file into an in-memory store
//! and read through the same gateway the engine uses.
//!
//! # Commands
//!
//! - `inspect` - Display namespaces, record counts and registered types
//! - `get` - Print the value at a path
//! - `find-all` - List every record of a type with identities stamped
//! - `version` - Show version information

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// treesync command-line tools.
#[derive(Parser)]
#[command(name = "treesync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to a JSON snapshot of the tree
    #[arg(global = true, short, long)]
    snapshot: Option<PathBuf>,

    /// Path to a JSON array of type declarations
    #[arg(global = true, long)]
    schema: Option<PathBuf>,

    /// Field name carrying record identities
    #[arg(global = true, long, default_value = treesync_core::DEFAULT_IDENTITY_FIELD)]
    identity_field: String,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Display namespaces, record counts and registered types
    Inspect {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Print the value stored at a path
    Get {
        /// `/`-separated path, e.g. `posts/p1`
        path: String,
    },

    /// List every record of a type
    FindAll {
        /// Type name (or namespace when no schema is given)
        type_name: String,

        /// Maximum number of records to print
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    match cli.command {
        Commands::Inspect { format } => {
            let snapshot = cli.snapshot.ok_or("Snapshot path required for inspect")?;
            let tree = commands::Tree::open(&snapshot, cli.schema.as_deref(), &cli.identity_field)?;
            commands::inspect::run(&tree, &format)?;
        }
        Commands::Get { path } => {
            let snapshot = cli.snapshot.ok_or("Snapshot path required for get")?;
            let tree = commands::Tree::open(&snapshot, cli.schema.as_deref(), &cli.identity_field)?;
            runtime.block_on(commands::get::run(&tree, &path))?;
        }
        Commands::FindAll { type_name, limit } => {
            let snapshot = cli.snapshot.ok_or("Snapshot path required for find-all")?;
            let tree = commands::Tree::open(&snapshot, cli.schema.as_deref(), &cli.identity_field)?;
            runtime.block_on(commands::find_all::run(&tree, &type_name, limit))?;
        }
        Commands::Version => {
            println!("treesync CLI v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
