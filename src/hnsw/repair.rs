//! Orphan repair and reachability restoration.
//!
//! Every edge an operation removes is recorded on the [`Graph`]. Before the
//! operation commits, [`Graph::settle`] re-links nodes left with an empty
//! layer and then checks each removed edge: if its endpoints no longer reach
//! each other, the edge is put back. A deleted node's former neighbors are
//! recorded as pairs too, so the region the node held together stays joined.

use std::collections::{HashSet, VecDeque};

use tracing::{debug, warn};

use super::Graph;
use crate::error::Result;
use crate::store::KvStore;

/// Times a single node may be re-linked by one operation.
pub const MAX_REPAIR_ATTEMPTS: usize = 3;

/// Nodes visited while looking for a path between two endpoints. A search
/// that gives up counts as "not joined", which only costs an extra edge.
const MAX_REJOIN_VISITS: usize = 512;

/// Repair and rejoin passes before an operation gives up.
const MAX_SETTLE_ROUNDS: usize = 32;

impl<S: KvStore> Graph<'_, S> {
    /// Queue `id` for repair unless it already used its attempts.
    pub(crate) fn queue_repair(&mut self, id: u64) {
        let attempts = self.repair_attempts.get(&id).copied().unwrap_or(0);
        if attempts < MAX_REPAIR_ATTEMPTS && !self.repairs.contains(&id) {
            self.repairs.push_back(id);
        }
    }

    /// Re-link queued nodes that still have an empty layer.
    pub(crate) fn run_repairs(&mut self) -> Result<usize> {
        let mut repaired = 0;
        while let Some(id) = self.repairs.pop_front() {
            let Some(node) = self.nodes.node(id)? else {
                continue;
            };
            if !self.is_orphan(id, &node)? {
                continue;
            }
            let attempts = self.repair_attempts.entry(id).or_insert(0);
            *attempts += 1;
            debug!(
                id,
                attempt = *attempts,
                empty_levels = ?node.empty_levels().collect::<Vec<_>>(),
                "repairing orphaned node"
            );
            self.link(id, false)?;
            repaired += 1;
        }
        Ok(repaired)
    }

    /// Returns `true` if `b` is reachable from `a` over any layer.
    pub(crate) fn joined(&mut self, a: u64, b: u64) -> Result<bool> {
        if a == b {
            return Ok(true);
        }
        let mut visited = HashSet::from([a]);
        let mut queue = VecDeque::from([a]);
        while let Some(id) = queue.pop_front() {
            let Some(node) = self.nodes.node(id)? else {
                continue;
            };
            for level in 0..=node.level {
                for edge in node.connections_at(level) {
                    if edge.target == b {
                        return Ok(true);
                    }
                    if visited.len() >= MAX_REJOIN_VISITS {
                        return Ok(false);
                    }
                    if visited.insert(edge.target) {
                        queue.push_back(edge.target);
                    }
                }
            }
        }
        Ok(false)
    }

    /// Put back removed edges whose endpoints no longer reach each other.
    ///
    /// Returns the number of edges restored.
    pub(crate) fn rejoin(&mut self) -> Result<usize> {
        let mut restored = 0;
        for (a, b, level) in std::mem::take(&mut self.severed) {
            if a == b {
                continue;
            }
            let (Some(near), Some(far)) = (self.nodes.node(a)?, self.nodes.node(b)?) else {
                continue;
            };
            if self.joined(a, b)? {
                continue;
            }
            let level = level.min(near.level).min(far.level);
            let similarity = self.config.similarity.score(&near.vector, &far.vector);
            debug!(a, b, level, "restoring edge between separated nodes");
            self.restore_connection(a, b, level, similarity)?;
            self.restore_connection(b, a, level, similarity)?;
            restored += 1;
        }
        Ok(restored)
    }

    /// Repair orphans and restore reachability until the graph is stable.
    pub(crate) fn settle(&mut self) -> Result<()> {
        for _ in 0..MAX_SETTLE_ROUNDS {
            self.run_repairs()?;
            let restored = self.rejoin()?;
            if restored == 0 && self.repairs.is_empty() && self.severed.is_empty() {
                return Ok(());
            }
        }
        warn!(
            pending_repairs = self.repairs.len(),
            pending_edges = self.severed.len(),
            "graph did not settle"
        );
        Ok(())
    }
}
