//! SynaGraph Command-Line Interface
//!
//! A CLI tool for building, querying, and checking vector indexes stored in a
//! SynaGraph log file.
//!
//! # Commands
//!
//! - `put` - Index a vector under a key
//! - `delete` - Remove a key from the index
//! - `search` - Find the nearest keys to a query vector
//! - `stats` - Display index statistics
//! - `check` - Run symmetry, orphan and connectivity checks
//!
//! Results are printed as JSON. Set `RUST_LOG` (e.g. `RUST_LOG=debug`) to see
//! index logs on stderr.

use std::path::Path;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use serde::Serialize;
use synagraph::node::NodeKey;
use synagraph::{
    ConnectivityReport, IndexConfig, KeyRange, KvStore, LogStore, SearchOptions,
    SymmetryViolation, VectorGraphIndex,
};
use tracing_subscriber::EnvFilter;

/// SynaGraph CLI - Command-line interface for SynaGraph vector indexes
#[derive(Parser, Debug)]
#[command(name = "synagraph")]
#[command(author, version, about = "SynaGraph vector index CLI", long_about = None)]
struct Cli {
    /// Name of the index inside the database
    #[arg(long, global = true, default_value = "default")]
    index: String,

    /// Index options as a JSON object, e.g. '{"M": 8, "similarity": "euclidean"}'
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Index a vector under a key
    Put {
        /// Path to database
        db: String,
        /// Primary key
        key: String,
        /// Vector as comma-separated floats
        vector: String,
    },
    /// Remove a key from the index
    Delete {
        /// Path to database
        db: String,
        /// Primary key
        key: String,
    },
    /// Search for the nearest keys
    Search {
        /// Path to database
        db: String,
        /// Query vector as comma-separated floats
        vector: String,
        /// Number of results to return
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },
    /// Show index statistics
    Stats {
        /// Path to database
        db: String,
    },
    /// Check graph consistency
    Check {
        /// Path to database
        db: String,
    },
}

#[derive(Serialize)]
struct CheckReport {
    connectivity: ConnectivityReport,
    orphans: Vec<u64>,
    violations: Vec<SymmetryViolation>,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let result = match &cli.command {
        Commands::Put { db, key, vector } => cmd_put(&cli, db, key, vector),
        Commands::Delete { db, key } => cmd_delete(&cli, db, key),
        Commands::Search { db, vector, limit } => cmd_search(&cli, db, vector, *limit),
        Commands::Stats { db } => cmd_stats(&cli, db),
        Commands::Check { db } => cmd_check(&cli, db),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

type CliResult = Result<(), Box<dyn std::error::Error>>;

/// Open the index named on the command line, creating the database if needed.
///
/// Without `--config` the index reopens with the options it was created
/// with. An explicit `--config` that disagrees with them is rejected.
fn open_index(cli: &Cli, path: &str) -> Result<VectorGraphIndex<LogStore>, Box<dyn std::error::Error>> {
    let store = Arc::new(LogStore::open(path)?);
    let config = match &cli.config {
        Some(json) => IndexConfig::from_json(json)?,
        None => VectorGraphIndex::stored_config(Arc::clone(&store), &cli.index)?.unwrap_or_default(),
    };
    Ok(VectorGraphIndex::open(store, &cli.index, config)?)
}

/// Open an existing database only.
fn open_existing(cli: &Cli, path: &str) -> Result<VectorGraphIndex<LogStore>, Box<dyn std::error::Error>> {
    if !Path::new(path).exists() {
        return Err(format!("Database not found: {}", path).into());
    }
    open_index(cli, path)
}

/// Parse a comma-separated list of floats.
fn parse_vector(text: &str) -> Result<Vec<f32>, String> {
    let vector = text
        .split(',')
        .map(|s| s.trim().parse::<f32>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|_| "Invalid vector format. Use comma-separated floats.".to_string())?;
    if vector.iter().any(|v| !v.is_finite()) {
        return Err("Vector components must be finite".to_string());
    }
    Ok(vector)
}

fn print_json<T: Serialize>(value: &T) -> CliResult {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Index a vector
fn cmd_put(cli: &Cli, path: &str, key: &str, vector: &str) -> CliResult {
    let vector = parse_vector(vector)?;
    let index = open_index(cli, path)?;
    index.index(key, Some(&vector), None)?;
    print_json(&serde_json::json!({
        "key": key,
        "id": index.node_id(key)?,
    }))
}

/// Remove a key
fn cmd_delete(cli: &Cli, path: &str, key: &str) -> CliResult {
    let index = open_existing(cli, path)?;
    let existed = index.contains(key)?;
    index.index(key, None, None)?;
    print_json(&serde_json::json!({
        "key": key,
        "deleted": existed,
    }))
}

/// Search for nearest keys
fn cmd_search(cli: &Cli, path: &str, vector: &str, limit: usize) -> CliResult {
    let query = parse_vector(vector)?;
    let index = open_existing(cli, path)?;
    let results = index.search_with(&query, SearchOptions::default().limit(limit))?;
    print_json(&results)
}

/// Show index statistics
fn cmd_stats(cli: &Cli, path: &str) -> CliResult {
    let index = open_existing(cli, path)?;
    print_json(&index.stats()?)
}

/// Run every consistency check
fn cmd_check(cli: &Cli, path: &str) -> CliResult {
    let index = open_existing(cli, path)?;

    let range = KeyRange::prefix(&NodeKey::node_prefix(&cli.index));
    let mut violations = Vec::new();
    for raw in index.store().get_keys(&range)? {
        if let Some(NodeKey::Node(id)) = NodeKey::decode(&cli.index, &raw) {
            violations.extend(index.check_symmetry(id)?);
        }
    }

    let report = CheckReport {
        connectivity: index.validate_connectivity(0)?,
        orphans: index.find_orphans()?,
        violations,
    };
    let healthy = report.connectivity.fully_connected
        && report.orphans.is_empty()
        && report.violations.is_empty();
    print_json(&report)?;
    if !healthy {
        return Err("index check found problems".into());
    }
    Ok(())
}
