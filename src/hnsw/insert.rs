//! Insertion and update of nodes.
//!
//! A new node draws a random level, descends greedily from the entry point
//! down to its own level, and at every layer it shares with the graph picks
//! its neighbors from an `ef_construction` candidate list. Updates and
//! repairs reuse the same layer-by-layer pass on an existing node: edges that
//! survive selection are kept, the rest are removed from both endpoints and
//! left for [`Graph::settle`] to restore if that split the graph.

use rand::Rng;
use tracing::{debug, warn};

use super::search::Candidate;
use super::Graph;
use crate::config::IndexConfig;
use crate::error::Result;
use crate::node::{Connection, Node};
use crate::store::KvStore;

/// Draw a level from the exponential distribution `floor(-ln(U) * mL)`.
pub(crate) fn random_level<R: Rng + ?Sized>(rng: &mut R, config: &IndexConfig) -> u32 {
    // `gen` yields [0, 1); flip it so ln never sees zero.
    let uniform = 1.0 - rng.gen::<f64>();
    let level = (-uniform.ln() * config.ml()).floor();
    (level as u32).min(config.max_level)
}

impl<S: KvStore> Graph<'_, S> {
    /// Insert or update the node for `primary_key`.
    ///
    /// Returns the id of the node that was linked, or `None` when the call
    /// changed nothing.
    pub(crate) fn upsert<R: Rng + ?Sized>(
        &mut self,
        primary_key: &str,
        vector: &[f32],
        hint: Option<&[f32]>,
        rng: &mut R,
    ) -> Result<Option<u64>> {
        let Some(id) = self.nodes.id_for(primary_key)? else {
            let id = self.nodes.allocate_id(primary_key)?;
            self.insert_new(id, primary_key, vector, rng)?;
            return Ok(Some(id));
        };

        let Some(existing) = self.nodes.node(id)? else {
            warn!(id, primary_key, "primary key maps to a missing node, inserting it again");
            self.insert_new(id, primary_key, vector, rng)?;
            return Ok(Some(id));
        };

        if hint == Some(vector) {
            return Ok(None);
        }
        if existing.vector == vector && !self.is_orphan(id, &existing)? {
            return Ok(None);
        }

        let mut node = (*existing).clone();
        node.vector = vector.to_vec();
        self.nodes.stage(id, node);
        self.link(id, false)?;
        Ok(Some(id))
    }

    fn insert_new<R: Rng + ?Sized>(
        &mut self,
        id: u64,
        primary_key: &str,
        vector: &[f32],
        rng: &mut R,
    ) -> Result<()> {
        let level = random_level(rng, self.config);
        self.nodes.stage(id, Node::new(primary_key, vector.to_vec(), level));

        if self.nodes.entry_point()?.is_none() {
            debug!(id, level, "first node becomes entry point");
            self.nodes.claim_entry_point(id)?;
            return Ok(());
        }
        self.link(id, true)
    }

    /// Rebuild the edges of node `id` at every layer it shares with the
    /// entry point, using its staged vector.
    pub(crate) fn link(&mut self, id: u64, is_new: bool) -> Result<()> {
        let Some((entry_id, entry_node)) = self.entry(Some(id))? else {
            self.nodes.set_entry_point(Some(id))?;
            return Ok(());
        };
        let node = self.require(id)?;
        let query = node.vector.clone();
        let level = node.level;
        let top = entry_node.level;
        let ef = self.config.ef_construction;

        let mut entry = (entry_id, entry_node);
        for layer in (level + 1..=top).rev() {
            let found = self.search_layer(&query, entry.0, &entry.1, ef, layer, 0.0)?;
            if let Some(best) = found.into_iter().find(|c| c.id != id) {
                entry = (best.id, best.node);
            }
        }

        for layer in (0..=level.min(top)).rev() {
            let mut candidates = self.search_layer(&query, entry.0, &entry.1, ef, layer, 0.0)?;
            candidates.retain(|c| c.id != id);
            let selected = self.select_neighbors(&candidates, layer);
            self.relink_layer(id, layer, &selected)?;
            if let Some(best) = candidates.into_iter().next() {
                entry = (best.id, best.node);
            }
        }

        // New nodes take over on ties so the most recent insertion wins.
        let promote = if is_new { level >= top } else { level > top };
        if promote && entry_id != id {
            debug!(id, level, previous = entry_id, "new entry point");
            self.nodes.set_entry_point(Some(id))?;
        }
        Ok(())
    }

    /// Pick neighbors from a best-first candidate list.
    ///
    /// A candidate is skipped when an already selected neighbor is similar
    /// enough to it that the edge would be redundant. The bar lowers with the
    /// candidate's rank, scaled by the indirectness factor: at aggressiveness
    /// `a` the candidate `c` is skipped if some selected `s` has
    /// `sim(s, c) >= sim(q, c) + (1 - a) * |sim(q, c)|`.
    pub(crate) fn select_neighbors(&self, candidates: &[Candidate], layer: u32) -> Vec<Candidate> {
        let limit = self.config.selection_limit(layer);
        let factor = self.config.indirectness_factor;
        let similarity = self.config.similarity;
        let total = candidates.len() as f32;

        let mut selected: Vec<Candidate> = Vec::with_capacity(limit.min(candidates.len()));
        for (rank, candidate) in candidates.iter().enumerate() {
            if selected.len() >= limit {
                break;
            }
            let aggressiveness = factor * (rank + 1) as f32 / total;
            if aggressiveness > 0.0 {
                let bar = candidate.similarity + (1.0 - aggressiveness) * candidate.similarity.abs();
                let indirect = selected
                    .iter()
                    .any(|s| similarity.score(&s.node.vector, &candidate.node.vector) >= bar);
                if indirect {
                    continue;
                }
            }
            selected.push(candidate.clone());
        }
        selected
    }

    /// Replace the edges of `id` at `layer` with `selected`.
    fn relink_layer(&mut self, id: u64, layer: u32, selected: &[Candidate]) -> Result<()> {
        let mut node = (*self.require(id)?).clone();
        let prior = std::mem::replace(
            &mut node.connections[layer as usize],
            selected
                .iter()
                .map(|c| Connection {
                    target: c.id,
                    similarity: c.similarity,
                })
                .collect(),
        );
        self.nodes.stage(id, node);

        // Existing reciprocal edges are refreshed in place.
        for candidate in selected {
            self.add_connection(candidate.id, id, layer, candidate.similarity)?;
        }
        for edge in prior {
            if !selected.iter().any(|c| c.id == edge.target) {
                self.remove_connection(edge.target, id, layer)?;
            }
        }

        // Drop c<->x when the new node is closer to both than they are to
        // each other, as long as both still reach it.
        for (i, c) in selected.iter().enumerate() {
            for x in &selected[i + 1..] {
                let Some(near) = self.nodes.node(c.id)? else {
                    continue;
                };
                let Some(edge) = near
                    .connections_at(layer)
                    .iter()
                    .find(|e| e.target == x.id)
                    .copied()
                else {
                    continue;
                };
                if c.similarity <= edge.similarity || x.similarity <= edge.similarity {
                    continue;
                }
                let x_reaches = match self.nodes.node(x.id)? {
                    Some(far) => far.is_connected(id, layer),
                    None => false,
                };
                if near.is_connected(id, layer) && x_reaches {
                    self.disconnect_pair(c.id, x.id, layer)?;
                }
            }
        }
        Ok(())
    }
}
