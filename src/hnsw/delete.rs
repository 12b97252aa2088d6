//! Deletion of nodes.

use tracing::{debug, warn};

use super::Graph;
use crate::error::Result;
use crate::node::Node;
use crate::store::KvStore;

impl<S: KvStore> Graph<'_, S> {
    /// Delete the node of `primary_key`. Returns `false` for unknown keys.
    ///
    /// Every neighbor loses its edge back to the node. Neighbors left with
    /// an empty layer are queued for repair, and the former neighbors are
    /// recorded as a chain of pairs that must stay reachable from each other.
    pub(crate) fn remove(&mut self, primary_key: &str) -> Result<bool> {
        let Some(id) = self.nodes.id_for(primary_key)? else {
            return Ok(false);
        };
        self.nodes.remove_primary_key(primary_key)?;
        let Some(node) = self.nodes.node(id)? else {
            warn!(id, primary_key, "primary key mapped to a missing node");
            return Ok(true);
        };

        if self.nodes.entry_point()? == Some(id) {
            let replacement = self.replacement_entry_point(id, &node)?;
            debug!(deleted = id, replacement = ?replacement, "replacing entry point");
            self.nodes.set_entry_point(replacement)?;
        }

        self.nodes.delete(id);
        let mut former: Vec<u64> = Vec::new();
        for level in 0..=node.level {
            for edge in node.connections_at(level) {
                self.remove_connection(edge.target, id, level)?;
                if !former.contains(&edge.target) {
                    former.push(edge.target);
                }
            }
        }
        self.severed
            .extend(former.windows(2).map(|pair| (pair[0], pair[1], 0)));
        debug!(id, level = node.level, neighbors = former.len(), "deleted node");
        Ok(true)
    }

    /// Choose a new entry point to replace `id`.
    ///
    /// Prefers the highest-level former neighbor, then the highest-level node
    /// anywhere in the graph.
    fn replacement_entry_point(&mut self, id: u64, node: &Node) -> Result<Option<u64>> {
        let mut best: Option<(u64, u32)> = None;
        for level in (0..=node.level).rev() {
            for edge in node.connections_at(level) {
                let Some(neighbor) = self.nodes.node(edge.target)? else {
                    continue;
                };
                if best.map_or(true, |(_, top)| neighbor.level > top) {
                    best = Some((edge.target, neighbor.level));
                }
            }
        }
        if let Some((replacement, _)) = best {
            return Ok(Some(replacement));
        }
        Ok(self.highest_node(Some(id))?.map(|(replacement, _)| replacement))
    }
}
