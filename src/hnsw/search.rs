//! Bounded best-first search within one layer.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};
use std::sync::Arc;

use tracing::warn;

use super::Graph;
use crate::error::Result;
use crate::node::Node;
use crate::store::KvStore;

// =============================================================================
// Helper Types
// =============================================================================

/// A node reached during search, with its similarity to the query.
#[derive(Debug, Clone)]
pub struct Candidate {
    /// Internal node id.
    pub id: u64,
    /// Similarity to the query vector.
    pub similarity: f32,
    /// Snapshot of the node as read during the search.
    pub node: Arc<Node>,
}

/// Heap entry popping the most similar candidate first.
struct Nearest(Candidate);

impl PartialEq for Nearest {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Nearest {}

impl PartialOrd for Nearest {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Nearest {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0
            .similarity
            .partial_cmp(&other.0.similarity)
            .unwrap_or(Ordering::Equal)
            .then_with(|| other.0.id.cmp(&self.0.id))
    }
}

/// Heap entry popping the least similar result first.
struct Farthest(Candidate);

impl PartialEq for Farthest {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Farthest {}

impl PartialOrd for Farthest {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Farthest {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .0
            .similarity
            .partial_cmp(&self.0.similarity)
            .unwrap_or(Ordering::Equal)
            .then_with(|| self.0.id.cmp(&other.0.id))
    }
}

/// Order candidates best first, breaking ties by id.
pub(crate) fn sort_best_first(candidates: &mut [Candidate]) {
    candidates.sort_by(|a, b| {
        b.similarity
            .partial_cmp(&a.similarity)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.id.cmp(&b.id))
    });
}

// =============================================================================
// Search Implementation
// =============================================================================

impl<S: KvStore> Graph<'_, S> {
    /// Search one layer for the `ef` nodes most similar to `query`.
    ///
    /// Starts at `entry_id` and greedily expands the best unexpanded
    /// candidate until it is worse than the worst of `ef` collected results.
    /// Returns the results best first.
    ///
    /// With `anti_clique_factor > 0` the result set is widened by that factor
    /// and then thinned: a result in the trailing `factor` share of the list
    /// is dropped when it is directly connected at `level` to a result already
    /// kept. The output is cut back to `ef`.
    pub(crate) fn search_layer(
        &mut self,
        query: &[f32],
        entry_id: u64,
        entry_node: &Arc<Node>,
        ef: usize,
        level: u32,
        anti_clique_factor: f32,
    ) -> Result<Vec<Candidate>> {
        let ef = ef.max(1);
        let width = if anti_clique_factor > 0.0 {
            ((ef as f32) * (1.0 + anti_clique_factor)).ceil() as usize
        } else {
            ef
        };
        let similarity = self.config.similarity;

        let entry = Candidate {
            id: entry_id,
            similarity: similarity.score(query, &entry_node.vector),
            node: Arc::clone(entry_node),
        };
        let mut visited = HashSet::new();
        visited.insert(entry_id);
        let mut candidates = BinaryHeap::new();
        let mut results = BinaryHeap::new();
        candidates.push(Nearest(entry.clone()));
        results.push(Farthest(entry));

        while let Some(Nearest(current)) = candidates.pop() {
            let worst = results
                .peek()
                .map(|Farthest(c)| c.similarity)
                .unwrap_or(f32::MIN);
            if results.len() >= width && current.similarity < worst {
                break;
            }

            for connection in current.node.connections_at(level) {
                if !visited.insert(connection.target) {
                    continue;
                }
                let Some(neighbor) = self.nodes.node(connection.target)? else {
                    warn!(
                        from = current.id,
                        target = connection.target,
                        level,
                        "skipping dangling neighbor"
                    );
                    continue;
                };
                let score = similarity.score(query, &neighbor.vector);
                let worst = results
                    .peek()
                    .map(|Farthest(c)| c.similarity)
                    .unwrap_or(f32::MIN);
                if results.len() < width || score > worst {
                    let candidate = Candidate {
                        id: connection.target,
                        similarity: score,
                        node: neighbor,
                    };
                    candidates.push(Nearest(candidate.clone()));
                    results.push(Farthest(candidate));
                    if results.len() > width {
                        results.pop();
                    }
                }
            }
        }

        let mut found: Vec<Candidate> = results.into_iter().map(|Farthest(c)| c).collect();
        sort_best_first(&mut found);
        if anti_clique_factor > 0.0 {
            found = drop_cliques(found, level, anti_clique_factor);
        }
        found.truncate(ef);
        Ok(found)
    }
}

/// Thin a best-first result list of tightly interconnected tail entries.
fn drop_cliques(results: Vec<Candidate>, level: u32, factor: f32) -> Vec<Candidate> {
    let start = ((1.0 - factor) * results.len() as f32).ceil() as usize;
    let mut kept: Vec<Candidate> = Vec::with_capacity(results.len());
    for (rank, candidate) in results.into_iter().enumerate() {
        let clique = rank >= start
            && kept.iter().any(|k| {
                k.node.is_connected(candidate.id, level) || candidate.node.is_connected(k.id, level)
            });
        if !clique {
            kept.push(candidate);
        }
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::Connection;

    fn candidate(id: u64, similarity: f32, links: &[u64]) -> Candidate {
        let mut node = Node::new(format!("n{}", id), vec![similarity], 0);
        node.connections[0] = links
            .iter()
            .map(|&target| Connection {
                target,
                similarity: 0.0,
            })
            .collect();
        Candidate {
            id,
            similarity,
            node: Arc::new(node),
        }
    }

    #[test]
    fn test_heap_ordering() {
        let mut nearest = BinaryHeap::new();
        nearest.push(Nearest(candidate(1, 0.2, &[])));
        nearest.push(Nearest(candidate(2, 0.9, &[])));
        nearest.push(Nearest(candidate(3, 0.5, &[])));
        assert_eq!(nearest.pop().map(|n| n.0.id), Some(2));

        let mut farthest = BinaryHeap::new();
        farthest.push(Farthest(candidate(1, 0.2, &[])));
        farthest.push(Farthest(candidate(2, 0.9, &[])));
        farthest.push(Farthest(candidate(3, 0.5, &[])));
        assert_eq!(farthest.pop().map(|f| f.0.id), Some(1));
    }

    #[test]
    fn test_sort_best_first_breaks_ties_by_id() {
        let mut list = vec![
            candidate(5, 0.5, &[]),
            candidate(2, 0.5, &[]),
            candidate(9, 0.8, &[]),
        ];
        sort_best_first(&mut list);
        let ids: Vec<u64> = list.iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![9, 2, 5]);
    }

    #[test]
    fn test_drop_cliques_only_touches_tail() {
        // 2 and 4 are linked to 1; only 4 sits in the trailing half.
        let list = vec![
            candidate(1, 0.9, &[2, 4]),
            candidate(2, 0.8, &[1]),
            candidate(3, 0.7, &[]),
            candidate(4, 0.6, &[1]),
        ];
        let kept: Vec<u64> = drop_cliques(list, 0, 0.5).iter().map(|c| c.id).collect();
        assert_eq!(kept, vec![1, 2, 3]);
    }

    #[test]
    fn test_drop_cliques_full_factor() {
        let list = vec![
            candidate(1, 0.9, &[2]),
            candidate(2, 0.8, &[1]),
            candidate(3, 0.7, &[]),
        ];
        let kept: Vec<u64> = drop_cliques(list, 0, 1.0).iter().map(|c| c.id).collect();
        assert_eq!(kept, vec![1, 3]);
    }
}
