// Copyright (c) 2025 SynaDB Contributors
// Licensed under the SynaDB License. See LICENSE file for details.

//! # SynaGraph
//!
//! Approximate nearest neighbor search over any ordered key-value store.
//!
//! SynaGraph maintains a Hierarchical Navigable Small World (HNSW) graph in
//! which every node is its own key-value record. It needs no graph or vector
//! database: point reads, ordered range scans, a scoped transaction and a
//! shared counter are all it asks of the store.
//!
//! ## Features
//!
//! - **Incremental maintenance** - inserts, updates and deletes keep edges
//!   symmetric and repair orphaned nodes without rebuilding the graph
//! - **Bounded degree** - per-layer capacities with similarity-based pruning
//! - **Redundant edge filtering** - candidates reachable through an already
//!   selected neighbor are skipped during insertion
//! - **Batched writes** - each operation commits as one transaction
//! - **Diagnostics** - symmetry, connectivity and orphan checks
//!
//! ## Architecture
//!
//! | Component | Purpose |
//! |-----------|---------|
//! | [`similarity`] | Cosine and negated Euclidean scoring |
//! | [`store`] | [`KvStore`] trait, [`MemoryStore`], [`LogStore`], [`CachedStore`] |
//! | [`node`] | Node records and key encoding |
//! | [`node_store`] | Node-level view with a copy-on-write working set |
//! | [`hnsw`] | Graph algorithms and [`VectorGraphIndex`] |
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use synagraph::{IndexConfig, LogStore, Result, SearchOptions, VectorGraphIndex};
//!
//! fn main() -> Result<()> {
//!     let store = Arc::new(LogStore::open("vectors.log")?);
//!     let index = VectorGraphIndex::open(store, "embeddings", IndexConfig::default())?;
//!
//!     index.index("doc-1", Some(&[0.1, 0.9, 0.0]), None)?;
//!     index.index("doc-2", Some(&[0.8, 0.1, 0.1]), None)?;
//!
//!     for hit in index.search_with(&[0.2, 0.8, 0.0], SearchOptions::default().limit(5))? {
//!         println!("{}: {:.4}", hit.key, hit.similarity);
//!     }
//!
//!     // Remove a vector
//!     index.index("doc-1", None, None)?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod hnsw;
pub mod node;
pub mod node_store;
pub mod similarity;
pub mod store;

// Re-export commonly used types
pub use config::{IndexConfig, MAX_LEVEL};
pub use error::{Result, SynaError};
pub use similarity::Similarity;

// Re-export the index and its query types
pub use hnsw::{
    Comparator, ConnectivityReport, GraphStats, SearchOptions, SearchResult, SymmetryViolation,
    VectorGraphIndex, ViolationKind, MAX_REPAIR_ATTEMPTS,
};

// Re-export stores
pub use store::{CachedStore, KeyRange, KvStore, LogStore, LogStoreConfig, MemoryStore, SharedCounter};
