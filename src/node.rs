// Copyright (c) 2025 SynaDB Contributors
// Licensed under the SynaDB License. See LICENSE file for details.

//! Graph records and their key encoding.
//!
//! Nodes reference each other only by their `u64` id. Reserved entries (the
//! entry-point pointer, the primary-key map, the id high-water mark and the
//! index configuration) live in the same keyspace as node records,
//! distinguished by a one-byte tag:
//!
//! | Key | Encoding | Value |
//! |-----|----------|-------|
//! | [`NodeKey::Node`] | `0x00` + id (big-endian) | bincode [`Node`] |
//! | [`NodeKey::EntryPoint`] | `0x01` | bincode `u64` |
//! | [`NodeKey::PrimaryKey`] | `0x02` + UTF-8 key | bincode `u64` |
//! | [`NodeKey::IdCounter`] | `0x03` | bincode `u64` |
//! | [`NodeKey::Config`] | `0x04` | JSON `IndexConfig` |
//!
//! Every key is additionally prefixed with the index name and a `0x1f`
//! separator, so several indexes can share one store.

use serde::{Deserialize, Serialize};

use crate::error::{Result, SynaError};

const TAG_NODE: u8 = 0x00;
const TAG_ENTRY_POINT: u8 = 0x01;
const TAG_PRIMARY_KEY: u8 = 0x02;
const TAG_ID_COUNTER: u8 = 0x03;
const TAG_CONFIG: u8 = 0x04;
const NAME_SEPARATOR: u8 = 0x1f;

/// A logical key inside one index.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum NodeKey {
    /// Record of the node with this internal id.
    Node(u64),
    /// Pointer to the current entry point.
    EntryPoint,
    /// Mapping from a caller-supplied primary key to an internal id.
    PrimaryKey(String),
    /// Highest id ever allocated, so ids survive deletion of their node.
    IdCounter,
    /// Configuration the index was built with.
    Config,
}

impl NodeKey {
    /// Encode this key under the namespace of index `name`.
    pub fn encode(&self, name: &str) -> Vec<u8> {
        let mut key = namespace(name);
        match self {
            NodeKey::Node(id) => {
                key.push(TAG_NODE);
                key.extend_from_slice(&id.to_be_bytes());
            }
            NodeKey::EntryPoint => key.push(TAG_ENTRY_POINT),
            NodeKey::PrimaryKey(pk) => {
                key.push(TAG_PRIMARY_KEY);
                key.extend_from_slice(pk.as_bytes());
            }
            NodeKey::IdCounter => key.push(TAG_ID_COUNTER),
            NodeKey::Config => key.push(TAG_CONFIG),
        }
        key
    }

    /// Decode a key previously produced by [`NodeKey::encode`] for `name`.
    ///
    /// Returns `None` for keys that belong to another index or are malformed.
    pub fn decode(name: &str, raw: &[u8]) -> Option<Self> {
        let prefix = namespace(name);
        let rest = raw.strip_prefix(prefix.as_slice())?;
        let (&tag, body) = rest.split_first()?;
        match tag {
            TAG_NODE => {
                let bytes: [u8; 8] = body.try_into().ok()?;
                Some(NodeKey::Node(u64::from_be_bytes(bytes)))
            }
            TAG_ENTRY_POINT if body.is_empty() => Some(NodeKey::EntryPoint),
            TAG_PRIMARY_KEY => std::str::from_utf8(body)
                .ok()
                .map(|pk| NodeKey::PrimaryKey(pk.to_string())),
            TAG_ID_COUNTER if body.is_empty() => Some(NodeKey::IdCounter),
            TAG_CONFIG if body.is_empty() => Some(NodeKey::Config),
            _ => None,
        }
    }

    /// Prefix shared by every node record of index `name`.
    pub fn node_prefix(name: &str) -> Vec<u8> {
        let mut key = namespace(name);
        key.push(TAG_NODE);
        key
    }
}

fn namespace(name: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(name.len() + 10);
    key.extend_from_slice(name.as_bytes());
    key.push(NAME_SEPARATOR);
    key
}

/// One edge from a node to a neighbor at some layer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Connection {
    /// Internal id of the neighbor.
    pub target: u64,
    /// Similarity between the two endpoints, cached when the edge was made.
    pub similarity: f32,
}

/// A vector stored in the graph.
///
/// `connections[l]` holds the node's edges at layer `l` for every layer
/// `0..=level`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Caller-supplied identifier of the indexed record.
    pub primary_key: String,
    /// The indexed vector.
    pub vector: Vec<f32>,
    /// Highest layer this node participates in.
    pub level: u32,
    /// Edges per layer.
    pub connections: Vec<Vec<Connection>>,
}

impl Node {
    /// Create a node with empty connection lists at layers `0..=level`.
    pub fn new(primary_key: impl Into<String>, vector: Vec<f32>, level: u32) -> Self {
        Self {
            primary_key: primary_key.into(),
            vector,
            level,
            connections: vec![Vec::new(); level as usize + 1],
        }
    }

    /// Edges at `level`, empty if the node does not reach that layer.
    pub fn connections_at(&self, level: u32) -> &[Connection] {
        self.connections
            .get(level as usize)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Returns `true` if the node has an edge to `target` at `level`.
    pub fn is_connected(&self, target: u64, level: u32) -> bool {
        self.connections_at(level).iter().any(|c| c.target == target)
    }

    /// Remove the edge to `target` at `level`. Returns `true` if one existed.
    pub fn disconnect(&mut self, target: u64, level: u32) -> bool {
        match self.connections.get_mut(level as usize) {
            Some(edges) => {
                let before = edges.len();
                edges.retain(|c| c.target != target);
                edges.len() != before
            }
            None => false,
        }
    }

    /// Layers at which the node has no edges.
    pub fn empty_levels(&self) -> impl Iterator<Item = u32> + '_ {
        self.connections
            .iter()
            .enumerate()
            .filter(|(_, edges)| edges.is_empty())
            .map(|(level, _)| level as u32)
    }

    /// Returns `true` if some layer the node occupies has no edges.
    pub fn is_orphaned(&self) -> bool {
        self.empty_levels().next().is_some()
    }

    /// Total number of outgoing edges across all layers.
    pub fn edge_count(&self) -> usize {
        self.connections.iter().map(Vec::len).sum()
    }

    /// Serialize for storage.
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    /// Deserialize a stored record, validating its layer layout.
    pub fn decode(id: u64, bytes: &[u8]) -> Result<Self> {
        let node: Node = bincode::deserialize(bytes).map_err(|e| SynaError::CorruptedNode {
            id,
            reason: e.to_string(),
        })?;
        if node.connections.len() != node.level as usize + 1 {
            return Err(SynaError::CorruptedNode {
                id,
                reason: format!(
                    "level {} but {} connection lists",
                    node.level,
                    node.connections.len()
                ),
            });
        }
        Ok(node)
    }
}

/// Encode a node id value (entry point or primary-key mapping).
pub fn encode_id(id: u64) -> Result<Vec<u8>> {
    Ok(bincode::serialize(&id)?)
}

/// Decode a stored node id value.
///
/// A value that is not a `u64` means the mapping is corrupted, which is fatal.
pub fn decode_id(bytes: &[u8]) -> Result<u64> {
    let raw: [u8; 8] = bytes
        .try_into()
        .map_err(|_| SynaError::InvalidNodeId(format!("{:02x?}", bytes)))?;
    Ok(bincode::deserialize(&raw)?)
}
