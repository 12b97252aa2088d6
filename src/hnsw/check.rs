//! Consistency checks and statistics.
//!
//! None of these raise on a damaged graph. Problems are logged and returned
//! in the report, since they degrade recall but lose no data.

use std::collections::{HashMap, HashSet, VecDeque};

use serde::Serialize;
use tracing::warn;

use super::{Graph, VectorGraphIndex};
use crate::error::Result;
use crate::store::KvStore;

/// What is wrong with an edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ViolationKind {
    /// The target has no edge back at the same layer.
    MissingReverse,
    /// The target node does not exist.
    MissingTarget,
}

/// An edge that breaks symmetry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SymmetryViolation {
    pub from: u64,
    pub to: u64,
    pub level: u32,
    pub kind: ViolationKind,
}

/// Result of a reachability walk from the entry point.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConnectivityReport {
    /// Lowest layer that was walked.
    pub min_level: u32,
    /// Nodes reached from the entry point.
    pub reachable: usize,
    /// Nodes present at `min_level` or above.
    pub total: usize,
    /// Nodes that could not be reached.
    pub unreachable: Vec<u64>,
    /// Mean number of edges per node over the walked layers.
    pub avg_out_degree: f64,
    /// `true` when every node was reached.
    pub fully_connected: bool,
}

/// Statistics about an index.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GraphStats {
    /// Total number of nodes
    pub num_nodes: usize,
    /// Total number of directed edges
    pub total_edges: usize,
    /// Highest node level
    pub max_level: u32,
    /// Number of nodes present at each level
    pub level_counts: Vec<usize>,
    /// Average edges per node
    pub avg_edges_per_node: f64,
    /// Current entry point
    pub entry_point: Option<u64>,
}

impl<S: KvStore> VectorGraphIndex<S> {
    /// Verify that every edge of `node_id` has a mirror at the same layer.
    ///
    /// Violations are logged and returned. An unknown node has none.
    pub fn check_symmetry(&self, node_id: u64) -> Result<Vec<SymmetryViolation>> {
        let mut nodes = self.read_view();
        let Some(node) = nodes.node(node_id)? else {
            return Ok(Vec::new());
        };

        let mut violations = Vec::new();
        for level in 0..=node.level {
            for edge in node.connections_at(level) {
                let kind = match nodes.node(edge.target)? {
                    None => ViolationKind::MissingTarget,
                    Some(target) if !target.is_connected(node_id, level) => {
                        ViolationKind::MissingReverse
                    }
                    Some(_) => continue,
                };
                warn!(from = node_id, to = edge.target, level, ?kind, "asymmetric edge");
                violations.push(SymmetryViolation {
                    from: node_id,
                    to: edge.target,
                    level,
                    kind,
                });
            }
        }
        Ok(violations)
    }

    /// Walk the graph from the entry point over layers `min_level` and above.
    pub fn validate_connectivity(&self, min_level: u32) -> Result<ConnectivityReport> {
        let mut view = self.read_view();
        let all = view.scan()?;
        let entry = Graph::new(&mut view, &self.config).entry(None)?;

        let nodes: HashMap<u64, _> = all
            .into_iter()
            .filter(|(_, node)| node.level >= min_level)
            .collect();
        let edges: usize = nodes
            .values()
            .map(|node| {
                (min_level..=node.level)
                    .map(|level| node.connections_at(level).len())
                    .sum::<usize>()
            })
            .sum();

        let mut visited = HashSet::new();
        let mut queue = VecDeque::new();
        if let Some((id, _)) = entry {
            if nodes.contains_key(&id) {
                visited.insert(id);
                queue.push_back(id);
            }
        }
        while let Some(id) = queue.pop_front() {
            let Some(node) = nodes.get(&id) else {
                continue;
            };
            for level in min_level..=node.level {
                for edge in node.connections_at(level) {
                    if nodes.contains_key(&edge.target) && visited.insert(edge.target) {
                        queue.push_back(edge.target);
                    }
                }
            }
        }

        let mut unreachable: Vec<u64> = nodes
            .keys()
            .filter(|id| !visited.contains(id))
            .copied()
            .collect();
        unreachable.sort_unstable();
        if !unreachable.is_empty() {
            warn!(
                index = %self.name,
                min_level,
                unreachable = unreachable.len(),
                total = nodes.len(),
                "graph has unreachable nodes"
            );
        }

        Ok(ConnectivityReport {
            min_level,
            reachable: visited.len(),
            total: nodes.len(),
            fully_connected: unreachable.is_empty(),
            unreachable,
            avg_out_degree: if nodes.is_empty() {
                0.0
            } else {
                edges as f64 / nodes.len() as f64
            },
        })
    }

    /// Nodes other than the entry point with an empty layer.
    pub fn find_orphans(&self) -> Result<Vec<u64>> {
        let mut view = self.read_view();
        let entry = view.entry_point()?;
        Ok(view
            .scan()?
            .into_iter()
            .filter(|(id, node)| Some(*id) != entry && node.is_orphaned())
            .map(|(id, _)| id)
            .collect())
    }

    /// Get statistics about the index.
    pub fn stats(&self) -> Result<GraphStats> {
        let mut view = self.read_view();
        let entry_point = view.entry_point()?;
        let nodes = view.scan()?;

        let max_level = nodes.iter().map(|(_, node)| node.level).max().unwrap_or(0);
        let mut level_counts = vec![0usize; max_level as usize + 1];
        let mut total_edges = 0usize;
        for (_, node) in &nodes {
            for (level, edges) in node.connections.iter().enumerate() {
                level_counts[level] += 1;
                total_edges += edges.len();
            }
        }

        Ok(GraphStats {
            num_nodes: nodes.len(),
            total_edges,
            max_level,
            level_counts,
            avg_edges_per_node: if nodes.is_empty() {
                0.0
            } else {
                total_edges as f64 / nodes.len() as f64
            },
            entry_point,
        })
    }

    /// Number of nodes in the index.
    pub fn total_nodes(&self) -> Result<usize> {
        Ok(self.read_view().scan()?.len())
    }

    /// Number of directed edges across all layers.
    pub fn total_connections(&self) -> Result<usize> {
        Ok(self
            .read_view()
            .scan()?
            .iter()
            .map(|(_, node)| node.edge_count())
            .sum())
    }
}
