//! Hierarchical Navigable Small World (HNSW) index over a key-value store.
//!
//! HNSW provides logarithmic search time by layering proximity graphs:
//! - Layer 0 contains every node, with up to `8·M` edges each
//! - Higher layers contain exponentially fewer nodes, with up to `4·M` edges
//! - Search starts at the entry point on the top layer and greedily descends
//!
//! Unlike an in-memory HNSW, every node lives in the store as its own record
//! and the graph is maintained incrementally. Inserts, updates and deletes
//! keep edges symmetric, bound each node's degree, repair nodes that lose all
//! their edges at some layer, and put back any removed edge whose endpoints
//! would otherwise fall apart, so the graph never needs a rebuild.
//!
//! # Concurrency
//!
//! Writes through one [`VectorGraphIndex`] are serialized by an internal
//! lock. Several index instances over the same store and index name must not
//! write concurrently; callers serialize them. The one race the index settles
//! itself is two writers each seeding an empty graph: the losing batch is
//! rejected at commit and replayed against the winner's entry point.
//! Searches take no lock and read whatever the store holds, which may be a
//! graph mid-update.
//!
//! # References
//!
//! - Malkov, Y. A., & Yashunin, D. A. (2018). Efficient and robust approximate
//!   nearest neighbor search using Hierarchical Navigable Small World graphs.

mod check;
mod connections;
mod delete;
mod insert;
mod repair;
mod search;

pub use check::{ConnectivityReport, GraphStats, SymmetryViolation, ViolationKind};
pub use repair::MAX_REPAIR_ATTEMPTS;

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;
use tracing::{debug, warn};

use crate::config::IndexConfig;
use crate::error::{Result, SynaError};
use crate::node::Node;
use crate::node_store::NodeStore;
use crate::store::KvStore;

/// Comparison a query planner asks an index to evaluate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparator {
    /// Nearest neighbors by vector similarity.
    Similarity,
    /// Exact match on the indexed value.
    Equal,
    /// Ordered range over the indexed value.
    Range,
}

/// A search hit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchResult {
    /// Primary key of the matching record.
    pub key: String,
    /// Similarity to the query; larger is closer.
    pub similarity: f32,
}

/// Per-query overrides for [`VectorGraphIndex::search_with`].
#[derive(Debug, Clone, Default)]
pub struct SearchOptions {
    /// Maximum number of results. `None` returns the whole candidate list.
    pub limit: Option<usize>,
    /// Candidate list size. Defaults to half of `ef_construction`, and is
    /// raised to `limit` when smaller.
    pub ef: Option<usize>,
    /// Result de-duplication at layer 0. Defaults to the index setting.
    pub anti_clique_factor: Option<f32>,
}

impl SearchOptions {
    /// Return at most `limit` results.
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Override the candidate list size.
    pub fn ef(mut self, ef: usize) -> Self {
        self.ef = Some(ef);
        self
    }

    /// Override the anti-clique factor.
    pub fn anti_clique_factor(mut self, factor: f32) -> Self {
        self.anti_clique_factor = Some(factor);
        self
    }
}

// =============================================================================
// Graph Operation Context
// =============================================================================

/// Graph algorithms bound to one node store for one operation.
///
/// Collects nodes that lose every edge at some layer, and every edge that
/// was removed, so both can be settled before the operation commits.
pub(crate) struct Graph<'a, S: KvStore> {
    pub(crate) nodes: &'a mut NodeStore<S>,
    pub(crate) config: &'a IndexConfig,
    pub(crate) repairs: VecDeque<u64>,
    pub(crate) repair_attempts: HashMap<u64, usize>,
    /// Removed edges as `(node, former neighbor, level)`.
    pub(crate) severed: Vec<(u64, u64, u32)>,
}

impl<'a, S: KvStore> Graph<'a, S> {
    pub(crate) fn new(nodes: &'a mut NodeStore<S>, config: &'a IndexConfig) -> Self {
        Self {
            nodes,
            config,
            repairs: VecDeque::new(),
            repair_attempts: HashMap::new(),
            severed: Vec::new(),
        }
    }

    /// The entry point and its node.
    ///
    /// A pointer to a missing node is replaced by the highest-level node
    /// other than `exclude`.
    pub(crate) fn entry(&mut self, exclude: Option<u64>) -> Result<Option<(u64, Arc<Node>)>> {
        let Some(id) = self.nodes.entry_point()? else {
            return Ok(None);
        };
        if let Some(node) = self.nodes.node(id)? {
            return Ok(Some((id, node)));
        }
        warn!(id, "entry point refers to a missing node");
        let replacement = self.highest_node(exclude)?;
        self.nodes
            .set_entry_point(replacement.as_ref().map(|(id, _)| *id))?;
        Ok(replacement)
    }

    /// The node with the highest level, most recent first on ties.
    pub(crate) fn highest_node(&mut self, exclude: Option<u64>) -> Result<Option<(u64, Arc<Node>)>> {
        Ok(self
            .nodes
            .scan()?
            .into_iter()
            .filter(|(id, _)| Some(*id) != exclude)
            .max_by_key(|(_, node)| node.level))
    }

    /// A node staged by the current operation.
    pub(crate) fn require(&mut self, id: u64) -> Result<Arc<Node>> {
        self.nodes.node(id)?.ok_or_else(|| SynaError::CorruptedNode {
            id,
            reason: "node vanished during update".to_string(),
        })
    }

    /// Returns `true` if `node` has an empty layer and is not the entry point.
    pub(crate) fn is_orphan(&mut self, id: u64, node: &Node) -> Result<bool> {
        Ok(node.is_orphaned() && self.nodes.entry_point()? != Some(id))
    }
}

// =============================================================================
// Vector Graph Index
// =============================================================================

struct Writer<S: KvStore> {
    nodes: NodeStore<Arc<S>>,
    rng: StdRng,
}

/// An HNSW index stored in a [`KvStore`].
///
/// # Examples
///
/// ```rust
/// use std::sync::Arc;
/// use synagraph::{IndexConfig, MemoryStore, SearchOptions, VectorGraphIndex};
///
/// let store = Arc::new(MemoryStore::new());
/// let index = VectorGraphIndex::open(store, "docs", IndexConfig::default().seed(7)).unwrap();
///
/// index.index("a", Some(&[1.0, 0.0]), None).unwrap();
/// index.index("b", Some(&[0.0, 1.0]), None).unwrap();
///
/// let hits = index.search_with(&[0.9, 0.1], SearchOptions::default().limit(1)).unwrap();
/// assert_eq!(hits[0].key, "a");
///
/// index.index("a", None, None).unwrap();
/// assert!(!index.contains("a").unwrap());
/// ```
pub struct VectorGraphIndex<S: KvStore> {
    store: Arc<S>,
    name: String,
    config: IndexConfig,
    writer: Mutex<Writer<S>>,
}

impl<S: KvStore> VectorGraphIndex<S> {
    /// Open index `name` in `store`, creating it on first write.
    ///
    /// The first open records `config` in the store. Later opens must agree
    /// with it on the similarity function and `M`; a mismatch is rejected
    /// with [`SynaError::InvalidConfig`]. The shared id counter is raised past
    /// every id the index has ever handed out.
    pub fn open(store: Arc<S>, name: &str, config: IndexConfig) -> Result<Self> {
        config.validate()?;
        let nodes = NodeStore::new(Arc::clone(&store), name);
        match nodes.stored_config()? {
            Some(stored) => check_compatible(&stored, &config)?,
            None => nodes.store_config(&config)?,
        }
        let high_water = nodes.max_persisted_id()?.max(nodes.id_high_water()?);
        if let Some(max) = high_water {
            nodes.counter().raise_to(max);
        }
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        debug!(index = name, next_id = nodes.counter().current() + 1, "opened vector index");
        Ok(Self {
            store,
            name: name.to_string(),
            config,
            writer: Mutex::new(Writer { nodes, rng }),
        })
    }

    /// Configuration recorded for index `name` in `store`, if it was ever
    /// opened there.
    pub fn stored_config(store: Arc<S>, name: &str) -> Result<Option<IndexConfig>> {
        NodeStore::new(store, name).stored_config()
    }

    /// Index name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Index configuration.
    pub fn config(&self) -> &IndexConfig {
        &self.config
    }

    /// The backing store.
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Insert, update or delete the vector of `primary_key`.
    ///
    /// - `Some(vector)` for a new key inserts a node.
    /// - `Some(vector)` for a known key moves the node to the new vector and
    ///   rebalances its edges. Nothing happens when `existing_vector_hint`
    ///   equals `vector`, or when the stored vector already equals it and the
    ///   node is well connected.
    /// - `None` deletes the node. Deleting an unknown key does nothing.
    ///
    /// All changes of one call are written as a single batch. If the batch
    /// seeded an empty graph while another writer did the same, it is
    /// replayed once against the graph that writer committed.
    pub fn index(
        &self,
        primary_key: &str,
        vector: Option<&[f32]>,
        existing_vector_hint: Option<&[f32]>,
    ) -> Result<()> {
        let mut writer = self.writer.lock();
        let Writer { nodes, rng } = &mut *writer;

        let mut attempt = 0;
        let linked = loop {
            attempt += 1;
            nodes.begin();
            let result = self
                .apply(nodes, rng, primary_key, vector, existing_vector_hint)
                .and_then(|linked| nodes.commit().map(|_| linked));
            match result {
                Ok(linked) => break linked,
                Err(SynaError::EntryPointConflict(winner)) if attempt == 1 => {
                    debug!(index = %self.name, winner, "entry point taken, replaying");
                    nodes.rollback();
                }
                Err(e) => {
                    nodes.rollback();
                    return Err(e);
                }
            }
        };
        drop(writer);

        if cfg!(debug_assertions) {
            if let Some(id) = linked {
                self.check_symmetry(id)?;
            }
        }
        Ok(())
    }

    fn apply(
        &self,
        nodes: &mut NodeStore<Arc<S>>,
        rng: &mut StdRng,
        primary_key: &str,
        vector: Option<&[f32]>,
        hint: Option<&[f32]>,
    ) -> Result<Option<u64>> {
        let mut graph = Graph::new(nodes, &self.config);
        let linked = match vector {
            Some(vector) => graph.upsert(primary_key, vector, hint, rng)?,
            None => {
                graph.remove(primary_key)?;
                None
            }
        };
        graph.settle()?;
        Ok(linked)
    }

    /// Evaluate `comparator` against `query`.
    ///
    /// Returns `Ok(None)` for comparators this index cannot answer, so a
    /// query planner can fall back to another index.
    pub fn search(
        &self,
        comparator: Comparator,
        query: &[f32],
    ) -> Result<Option<Vec<SearchResult>>> {
        match comparator {
            Comparator::Similarity => self.search_with(query, SearchOptions::default()).map(Some),
            Comparator::Equal | Comparator::Range => Ok(None),
        }
    }

    /// Approximate nearest neighbors of `query`, best first.
    pub fn search_with(&self, query: &[f32], options: SearchOptions) -> Result<Vec<SearchResult>> {
        let mut nodes = self.read_view();
        let mut graph = Graph::new(&mut nodes, &self.config);
        let Some((entry_id, entry_node)) = graph.entry(None)? else {
            return Ok(Vec::new());
        };

        let ef = options
            .ef
            .unwrap_or_else(|| self.config.ef_search())
            .max(options.limit.unwrap_or(0));
        let anti_clique = options
            .anti_clique_factor
            .unwrap_or(self.config.anti_clique_factor);

        let top = entry_node.level;
        let mut entry = (entry_id, entry_node);
        for level in (1..=top).rev() {
            let found = graph.search_layer(query, entry.0, &entry.1, ef, level, 0.0)?;
            if let Some(best) = found.into_iter().next() {
                entry = (best.id, best.node);
            }
        }
        let found = graph.search_layer(query, entry.0, &entry.1, ef, 0, anti_clique)?;

        Ok(found
            .into_iter()
            .take(options.limit.unwrap_or(usize::MAX))
            .map(|c| SearchResult {
                key: c.node.primary_key.clone(),
                similarity: c.similarity,
            })
            .collect())
    }

    /// Returns `true` if `primary_key` is indexed.
    pub fn contains(&self, primary_key: &str) -> Result<bool> {
        Ok(self.node_id(primary_key)?.is_some())
    }

    /// Internal node id of `primary_key`.
    pub fn node_id(&self, primary_key: &str) -> Result<Option<u64>> {
        self.read_view().id_for(primary_key)
    }

    /// Stored vector of `primary_key`.
    pub fn get_vector(&self, primary_key: &str) -> Result<Option<Vec<f32>>> {
        let mut nodes = self.read_view();
        let Some(id) = nodes.id_for(primary_key)? else {
            return Ok(None);
        };
        Ok(nodes.node(id)?.map(|node| node.vector.clone()))
    }

    /// Fresh uncached view of the index for one read operation.
    pub(crate) fn read_view(&self) -> NodeStore<Arc<S>> {
        NodeStore::new(Arc::clone(&self.store), &self.name)
    }
}

/// Reject settings that would make the stored graph meaningless.
fn check_compatible(stored: &IndexConfig, requested: &IndexConfig) -> Result<()> {
    if stored.similarity != requested.similarity {
        return Err(SynaError::InvalidConfig(format!(
            "index was built with {:?} similarity, not {:?}",
            stored.similarity, requested.similarity
        )));
    }
    if stored.m != requested.m {
        return Err(SynaError::InvalidConfig(format!(
            "index was built with M = {}, not {}",
            stored.m, requested.m
        )));
    }
    Ok(())
}
