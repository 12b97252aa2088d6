//! Edge maintenance with per-layer capacity enforcement.

use std::cmp::Ordering;

use tracing::{debug, warn};

use super::Graph;
use crate::error::Result;
use crate::node::Connection;
use crate::store::KvStore;

impl<S: KvStore> Graph<'_, S> {
    /// Add an edge `from -> to` at `level`, or refresh its cached similarity.
    ///
    /// When the layer overflows its capacity the edges are sorted by
    /// similarity and only the best three quarters are kept. Every evicted
    /// neighbor loses its reciprocal edge; if that was its last edge at the
    /// layer it is queued for repair.
    pub(crate) fn add_connection(
        &mut self,
        from: u64,
        to: u64,
        level: u32,
        similarity: f32,
    ) -> Result<()> {
        self.connect(from, to, level, similarity, false)
    }

    /// Like [`Graph::add_connection`], but the new edge is never the one
    /// pruned on overflow.
    pub(crate) fn restore_connection(
        &mut self,
        from: u64,
        to: u64,
        level: u32,
        similarity: f32,
    ) -> Result<()> {
        self.connect(from, to, level, similarity, true)
    }

    fn connect(
        &mut self,
        from: u64,
        to: u64,
        level: u32,
        similarity: f32,
        keep_new: bool,
    ) -> Result<()> {
        let Some(current) = self.nodes.node(from)? else {
            warn!(from, to, level, "cannot connect missing node");
            return Ok(());
        };
        if level > current.level {
            warn!(from, to, level, node_level = current.level, "connection above node level");
            return Ok(());
        }

        let mut node = (*current).clone();
        let edges = &mut node.connections[level as usize];
        match edges.iter_mut().find(|c| c.target == to) {
            Some(existing) => existing.similarity = similarity,
            None => edges.push(Connection {
                target: to,
                similarity,
            }),
        }

        let capacity = self.config.capacity(level);
        let evicted = if edges.len() > capacity {
            edges.sort_by(|a, b| {
                b.similarity
                    .partial_cmp(&a.similarity)
                    .unwrap_or(Ordering::Equal)
            });
            let keep = capacity * 3 / 4;
            if keep_new {
                if let Some(pos) = edges.iter().position(|c| c.target == to) {
                    if pos >= keep {
                        let pinned = edges.remove(pos);
                        edges.insert(0, pinned);
                    }
                }
            }
            edges.split_off(keep)
        } else {
            Vec::new()
        };
        self.nodes.stage(from, node);

        if !evicted.is_empty() {
            debug!(node = from, level, evicted = evicted.len(), "pruned connections");
        }
        for edge in evicted {
            if self.remove_connection(edge.target, from, level)? {
                warn!(
                    node = edge.target,
                    evicted_by = from,
                    level,
                    "eviction removed last connection"
                );
            }
        }
        Ok(())
    }

    /// Remove the edge `node -> target` at `level`.
    ///
    /// The removal is recorded so the operation can verify that both ends
    /// still reach each other before it commits. Returns `true` if the node
    /// was left without edges at that layer, in which case it has been
    /// queued for repair.
    pub(crate) fn remove_connection(&mut self, node_id: u64, target: u64, level: u32) -> Result<bool> {
        let Some(current) = self.nodes.node(node_id)? else {
            warn!(node = node_id, target, level, "skipping dangling neighbor");
            return Ok(false);
        };
        if !current.is_connected(target, level) {
            return Ok(false);
        }
        let mut node = (*current).clone();
        node.disconnect(target, level);
        let emptied = node.connections_at(level).is_empty();
        self.nodes.stage(node_id, node);
        self.severed.push((node_id, target, level));
        if emptied {
            self.queue_repair(node_id);
        }
        Ok(emptied)
    }

    /// Remove the edge between `a` and `b` at `level` on both endpoints.
    pub(crate) fn disconnect_pair(&mut self, a: u64, b: u64, level: u32) -> Result<()> {
        self.remove_connection(a, b, level)?;
        self.remove_connection(b, a, level)?;
        Ok(())
    }
}
