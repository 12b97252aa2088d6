// Copyright (c) 2025 SynaDB Contributors
// Licensed under the SynaDB License. See LICENSE file for details.

//! Adapter between graph algorithms and the key-value store.
//!
//! [`NodeStore`] resolves node ids, primary keys and the entry point through
//! a [`CachedStore`], and keeps a copy-on-write working set of decoded nodes.
//! Algorithms read nodes as shared snapshots (`Arc<Node>`), clone one to edit
//! it, and stage the edited copy. Nothing reaches the underlying store until
//! [`NodeStore::commit`] writes the working set and flushes the batch.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use tracing::trace;

use crate::config::IndexConfig;
use crate::error::{Result, SynaError};
use crate::node::{decode_id, encode_id, Node, NodeKey};
use crate::store::{CachedStore, KeyRange, KvStore, SharedCounter};

#[derive(Debug, Clone)]
enum Slot {
    Present(Arc<Node>),
    Absent,
}

/// Node-level view over a key-value store for one index.
pub struct NodeStore<S: KvStore> {
    name: String,
    store: CachedStore<S>,
    counter: SharedCounter,
    nodes: HashMap<u64, Slot>,
    dirty: BTreeSet<u64>,
    entry_claim: Option<u64>,
}

impl<S: KvStore> NodeStore<S> {
    /// Create an adapter for index `name` over `store`.
    pub fn new(store: S, name: &str) -> Self {
        let counter = store.shared_counter(&counter_name(name));
        Self {
            name: name.to_string(),
            store: CachedStore::new(store),
            counter,
            nodes: HashMap::new(),
            dirty: BTreeSet::new(),
            entry_claim: None,
        }
    }

    /// Name of the index this adapter serves.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The id counter shared by every index instance with this name.
    pub fn counter(&self) -> &SharedCounter {
        &self.counter
    }

    /// Start a fresh operation: drop cached reads and any staged changes.
    pub fn begin(&mut self) {
        self.store.reset();
        self.nodes.clear();
        self.dirty.clear();
        self.entry_claim = None;
    }

    /// Discard everything staged by the current operation.
    pub fn rollback(&mut self) {
        self.begin();
    }

    /// Write staged nodes and pending key updates as one batch.
    ///
    /// If the operation claimed the entry point of an empty graph, the claim
    /// is checked against the store inside the same transaction: when another
    /// writer has meanwhile installed a live entry point the batch is not
    /// written and [`SynaError::EntryPointConflict`] is returned.
    ///
    /// Returns the number of keys written or removed.
    pub fn commit(&mut self) -> Result<usize> {
        for id in std::mem::take(&mut self.dirty) {
            let key = NodeKey::Node(id).encode(&self.name);
            match self.nodes.get(&id) {
                Some(Slot::Present(node)) => self.store.put(&key, &node.encode()?)?,
                Some(Slot::Absent) | None => self.store.remove(&key)?,
            }
        }
        let claim = self.entry_claim.take();
        let this = &*self;
        let written = this.store.inner().run_in_transaction(|| {
            if let Some(id) = claim {
                if let Some(current) = this.persisted_entry_point()? {
                    if current != id && this.persisted_node_exists(current)? {
                        return Err(SynaError::EntryPointConflict(current));
                    }
                }
            }
            this.store.flush()
        })?;
        trace!(index = %self.name, written, "committed graph batch");
        self.nodes.clear();
        Ok(written)
    }

    /// Read node `id`, or `None` if it does not exist.
    pub fn node(&mut self, id: u64) -> Result<Option<Arc<Node>>> {
        if let Some(slot) = self.nodes.get(&id) {
            return Ok(match slot {
                Slot::Present(node) => Some(Arc::clone(node)),
                Slot::Absent => None,
            });
        }
        let key = NodeKey::Node(id).encode(&self.name);
        let slot = match self.store.get(&key)? {
            Some(bytes) => Slot::Present(Arc::new(Node::decode(id, &bytes)?)),
            None => Slot::Absent,
        };
        let node = match &slot {
            Slot::Present(node) => Some(Arc::clone(node)),
            Slot::Absent => None,
        };
        self.nodes.insert(id, slot);
        Ok(node)
    }

    /// Stage a new version of node `id`.
    pub fn stage(&mut self, id: u64, node: Node) -> Arc<Node> {
        let node = Arc::new(node);
        self.nodes.insert(id, Slot::Present(Arc::clone(&node)));
        self.dirty.insert(id);
        node
    }

    /// Stage the removal of node `id`.
    pub fn delete(&mut self, id: u64) {
        self.nodes.insert(id, Slot::Absent);
        self.dirty.insert(id);
    }

    /// Every node of the index, including staged changes, ordered by id.
    pub fn scan(&mut self) -> Result<Vec<(u64, Arc<Node>)>> {
        let range = KeyRange::prefix(&NodeKey::node_prefix(&self.name));
        let mut found: HashMap<u64, Arc<Node>> = HashMap::new();
        for (key, value) in self.store.get_range(&range)? {
            if let Some(NodeKey::Node(id)) = NodeKey::decode(&self.name, &key) {
                found.insert(id, Arc::new(Node::decode(id, &value)?));
            }
        }
        for id in &self.dirty {
            match self.nodes.get(id) {
                Some(Slot::Present(node)) => {
                    found.insert(*id, Arc::clone(node));
                }
                _ => {
                    found.remove(id);
                }
            }
        }
        let mut nodes: Vec<_> = found.into_iter().collect();
        nodes.sort_by_key(|(id, _)| *id);
        Ok(nodes)
    }

    /// Largest persisted node id.
    pub fn max_persisted_id(&self) -> Result<Option<u64>> {
        let range = KeyRange::prefix(&NodeKey::node_prefix(&self.name))
            .reverse()
            .limit(1);
        let keys = self.store.inner().get_keys(&range)?;
        Ok(keys
            .first()
            .and_then(|key| match NodeKey::decode(&self.name, key) {
                Some(NodeKey::Node(id)) => Some(id),
                _ => None,
            }))
    }

    /// Current entry point.
    pub fn entry_point(&self) -> Result<Option<u64>> {
        let key = NodeKey::EntryPoint.encode(&self.name);
        self.store
            .get(&key)?
            .map(|bytes| decode_id(&bytes))
            .transpose()
    }

    /// Entry point as stored below the cache, ignoring staged changes.
    pub fn persisted_entry_point(&self) -> Result<Option<u64>> {
        let key = NodeKey::EntryPoint.encode(&self.name);
        self.store
            .inner()
            .get(&key)?
            .map(|bytes| decode_id(&bytes))
            .transpose()
    }

    /// Returns `true` if node `id` is stored below the cache.
    fn persisted_node_exists(&self, id: u64) -> Result<bool> {
        let key = NodeKey::Node(id).encode(&self.name);
        Ok(self.store.inner().get(&key)?.is_some())
    }

    /// Make `id` the entry point of a graph that was empty when this
    /// operation read it. The claim is verified by [`NodeStore::commit`].
    pub fn claim_entry_point(&mut self, id: u64) -> Result<()> {
        self.set_entry_point(Some(id))?;
        self.entry_claim = Some(id);
        Ok(())
    }

    /// Point the entry point at `id`, or clear it.
    pub fn set_entry_point(&mut self, id: Option<u64>) -> Result<()> {
        let key = NodeKey::EntryPoint.encode(&self.name);
        match id {
            Some(id) => self.store.put(&key, &encode_id(id)?),
            None => self.store.remove(&key),
        }
    }

    /// Internal id mapped to `primary_key`.
    pub fn id_for(&self, primary_key: &str) -> Result<Option<u64>> {
        let key = NodeKey::PrimaryKey(primary_key.to_string()).encode(&self.name);
        self.store
            .get(&key)?
            .map(|bytes| decode_id(&bytes))
            .transpose()
    }

    /// Allocate a fresh id for `primary_key` and stage the mapping.
    ///
    /// The id high-water mark is staged in the same batch, so an id stays
    /// used after its node is deleted and the store is reopened.
    pub fn allocate_id(&mut self, primary_key: &str) -> Result<u64> {
        let id = self.counter.increment();
        let key = NodeKey::PrimaryKey(primary_key.to_string()).encode(&self.name);
        self.store.put(&key, &encode_id(id)?)?;

        let mark = NodeKey::IdCounter.encode(&self.name);
        let stored = match self.store.get(&mark)? {
            Some(bytes) => decode_id(&bytes)?,
            None => 0,
        };
        self.store.put(&mark, &encode_id(id.max(stored))?)?;
        Ok(id)
    }

    /// Highest id ever allocated, as persisted.
    pub fn id_high_water(&self) -> Result<Option<u64>> {
        let key = NodeKey::IdCounter.encode(&self.name);
        self.store
            .inner()
            .get(&key)?
            .map(|bytes| decode_id(&bytes))
            .transpose()
    }

    /// Configuration the index was created with, if recorded.
    pub fn stored_config(&self) -> Result<Option<IndexConfig>> {
        let key = NodeKey::Config.encode(&self.name);
        match self.store.inner().get(&key)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Record `config` directly in the store.
    pub fn store_config(&self, config: &IndexConfig) -> Result<()> {
        let key = NodeKey::Config.encode(&self.name);
        self.store.inner().put(&key, &serde_json::to_vec(config)?)
    }

    /// Stage removal of the mapping for `primary_key`.
    pub fn remove_primary_key(&mut self, primary_key: &str) -> Result<()> {
        let key = NodeKey::PrimaryKey(primary_key.to_string()).encode(&self.name);
        self.store.remove(&key)
    }
}

/// Name of the shared id counter of index `name`.
pub fn counter_name(name: &str) -> String {
    format!("synagraph:{}:ids", name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn adapter() -> (Arc<MemoryStore>, NodeStore<Arc<MemoryStore>>) {
        let backing = Arc::new(MemoryStore::new());
        let nodes = NodeStore::new(Arc::clone(&backing), "test");
        (backing, nodes)
    }

    #[test]
    fn test_staged_nodes_are_invisible_until_commit() {
        let (backing, mut nodes) = adapter();
        nodes.begin();
        nodes.stage(1, Node::new("a", vec![1.0], 0));
        assert!(nodes.node(1).unwrap().is_some());
        assert!(backing.is_empty());

        nodes.commit().unwrap();
        assert_eq!(backing.len(), 1);

        let mut reader = NodeStore::new(Arc::clone(&backing), "test");
        assert_eq!(reader.node(1).unwrap().unwrap().primary_key, "a");
    }

    #[test]
    fn test_rollback_discards_staged_changes() {
        let (backing, mut nodes) = adapter();
        nodes.begin();
        nodes.stage(1, Node::new("a", vec![1.0], 0));
        nodes.set_entry_point(Some(1)).unwrap();
        nodes.rollback();
        nodes.commit().unwrap();
        assert!(backing.is_empty());
    }

    #[test]
    fn test_primary_key_mapping() {
        let (_backing, mut nodes) = adapter();
        nodes.begin();
        assert!(nodes.id_for("doc").unwrap().is_none());
        let id = nodes.allocate_id("doc").unwrap();
        assert_eq!(nodes.id_for("doc").unwrap(), Some(id));
        let next = nodes.allocate_id("other").unwrap();
        assert!(next > id);
        nodes.remove_primary_key("doc").unwrap();
        assert!(nodes.id_for("doc").unwrap().is_none());
    }

    #[test]
    fn test_scan_overlays_working_set() {
        let (_backing, mut nodes) = adapter();
        nodes.begin();
        nodes.stage(1, Node::new("a", vec![1.0], 0));
        nodes.stage(2, Node::new("b", vec![2.0], 0));
        nodes.commit().unwrap();

        nodes.begin();
        nodes.delete(1);
        nodes.stage(3, Node::new("c", vec![3.0], 1));
        let ids: Vec<u64> = nodes.scan().unwrap().into_iter().map(|(id, _)| id).collect();
        assert_eq!(ids, vec![2, 3]);
        assert_eq!(nodes.max_persisted_id().unwrap(), Some(2));
    }

    #[test]
    fn test_entry_point_roundtrip() {
        let (_backing, mut nodes) = adapter();
        nodes.begin();
        assert!(nodes.entry_point().unwrap().is_none());
        nodes.set_entry_point(Some(9)).unwrap();
        assert_eq!(nodes.entry_point().unwrap(), Some(9));
        assert!(nodes.persisted_entry_point().unwrap().is_none());
        nodes.commit().unwrap();
        assert_eq!(nodes.persisted_entry_point().unwrap(), Some(9));
    }

    #[test]
    fn test_high_water_survives_node_deletion() {
        let (backing, mut nodes) = adapter();
        nodes.begin();
        let a = nodes.allocate_id("a").unwrap();
        let b = nodes.allocate_id("b").unwrap();
        nodes.stage(a, Node::new("a", vec![1.0], 0));
        nodes.stage(b, Node::new("b", vec![2.0], 0));
        nodes.commit().unwrap();

        nodes.begin();
        nodes.delete(b);
        nodes.remove_primary_key("b").unwrap();
        nodes.commit().unwrap();

        let reader = NodeStore::new(Arc::clone(&backing), "test");
        assert_eq!(reader.max_persisted_id().unwrap(), Some(a));
        assert_eq!(reader.id_high_water().unwrap(), Some(b));
    }

    #[test]
    fn test_lost_entry_point_claim_is_rejected() {
        let (backing, mut first) = adapter();
        let mut second = NodeStore::new(Arc::clone(&backing), "test");

        first.begin();
        second.begin();
        first.stage(1, Node::new("a", vec![1.0], 0));
        first.claim_entry_point(1).unwrap();
        second.stage(2, Node::new("b", vec![2.0], 0));
        second.claim_entry_point(2).unwrap();

        first.commit().unwrap();
        assert!(matches!(
            second.commit(),
            Err(SynaError::EntryPointConflict(1))
        ));
        second.rollback();
        assert_eq!(second.persisted_entry_point().unwrap(), Some(1));
        assert!(!second.persisted_node_exists(2).unwrap());
    }

    #[test]
    fn test_config_roundtrip() {
        let (_backing, nodes) = adapter();
        assert!(nodes.stored_config().unwrap().is_none());
        let config = IndexConfig::with_m(8);
        nodes.store_config(&config).unwrap();
        assert_eq!(nodes.stored_config().unwrap(), Some(config));
    }

    #[test]
    fn test_corrupted_entry_point_is_fatal() {
        let (backing, nodes) = adapter();
        backing
            .put(&NodeKey::EntryPoint.encode("test"), b"xyz")
            .unwrap();
        assert!(matches!(
            nodes.entry_point(),
            Err(SynaError::InvalidNodeId(_))
        ));
    }
}
