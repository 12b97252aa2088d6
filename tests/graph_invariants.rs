//! Property-based tests for graph invariants under arbitrary edits.
//!
//! **Property 1: Edge Symmetry**
//! **Property 2: Connectivity**
//! **Property 3: Capacity Bound**
//! **Property 4: No Orphans After Repair**
//! **Property 5: Idempotent Re-insertion**
//! **Property 13: Connectivity Under Churn**
//!
//! Every sequence of inserts, updates and deletes must leave a graph whose
//! edges are mirrored, whose nodes are all reachable from the entry point,
//! and whose layers respect their capacity.

use proptest::prelude::*;
use std::collections::HashMap;
use std::sync::Arc;
use synagraph::node_store::NodeStore;
use synagraph::{IndexConfig, MemoryStore, Similarity, VectorGraphIndex};

/// An edit applied to the index.
#[derive(Debug, Clone)]
enum Edit {
    Upsert(u8, Vec<f32>),
    Delete(u8),
}

fn arb_vector(dimensions: usize) -> impl Strategy<Value = Vec<f32>> {
    prop::collection::vec(-10.0f32..10.0, dimensions)
}

fn arb_edits() -> impl Strategy<Value = Vec<Edit>> {
    prop::collection::vec(
        prop_oneof![
            4 => (0u8..40, arb_vector(3)).prop_map(|(k, v)| Edit::Upsert(k, v)),
            1 => (0u8..40).prop_map(Edit::Delete),
        ],
        1..80,
    )
}

fn open(m: usize, seed: u64) -> VectorGraphIndex<MemoryStore> {
    let config = IndexConfig::with_m(m)
        .similarity(Similarity::Euclidean)
        .ef_construction(32)
        .seed(seed);
    VectorGraphIndex::open(Arc::new(MemoryStore::new()), "props", config).expect("open index")
}

fn apply(index: &VectorGraphIndex<MemoryStore>, edits: &[Edit]) -> HashMap<String, Vec<f32>> {
    let mut live = HashMap::new();
    for edit in edits {
        match edit {
            Edit::Upsert(k, v) => {
                let key = format!("k{}", k);
                index.index(&key, Some(v.as_slice()), None).expect("upsert should succeed");
                live.insert(key, v.clone());
            }
            Edit::Delete(k) => {
                let key = format!("k{}", k);
                index.index(&key, None, None).expect("delete should succeed");
                live.remove(&key);
            }
        }
    }
    live
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(30))]

    /// **Property 1: Edge Symmetry**
    /// **Property 3: Capacity Bound**
    ///
    /// For every edge A→B at layer l there is an edge B→A at layer l, and no
    /// layer holds more edges than its capacity.
    #[test]
    fn prop_edges_are_symmetric_and_bounded(edits in arb_edits(), seed in any::<u64>()) {
        let index = open(2, seed);
        apply(&index, &edits);

        let mut nodes = NodeStore::new(Arc::clone(index.store()), index.name());
        for (id, node) in nodes.scan().expect("scan") {
            let violations = index.check_symmetry(id).expect("check symmetry");
            prop_assert!(violations.is_empty(), "node {} has violations {:?}", id, violations);
            for level in 0..=node.level {
                prop_assert!(
                    node.connections_at(level).len() <= index.config().capacity(level),
                    "node {} exceeds capacity at level {}", id, level
                );
            }
        }
    }

    /// **Property 2: Connectivity**
    /// **Property 4: No Orphans After Repair**
    #[test]
    fn prop_graph_stays_connected(edits in arb_edits(), seed in any::<u64>()) {
        let index = open(4, seed);
        let live = apply(&index, &edits);

        prop_assert_eq!(index.total_nodes().expect("total nodes"), live.len());
        prop_assert!(index.find_orphans().expect("orphans").is_empty());

        let report = index.validate_connectivity(0).expect("connectivity");
        prop_assert!(report.fully_connected, "unreachable: {:?}", report.unreachable);
        prop_assert_eq!(report.reachable, live.len());

        for (key, vector) in &live {
            let stored = index.get_vector(key).expect("vector");
            prop_assert_eq!(stored.as_ref(), Some(vector));
        }
    }

    /// **Property 5: Idempotent Re-insertion**
    ///
    /// Re-indexing every key with its current vector changes nothing.
    #[test]
    fn prop_reinsertion_is_idempotent(edits in arb_edits(), seed in any::<u64>()) {
        let index = open(4, seed);
        let live = apply(&index, &edits);

        let before = index.stats().expect("stats");
        for (key, vector) in &live {
            index.index(key, Some(vector.as_slice()), None).expect("re-index");
        }
        let after = index.stats().expect("stats");
        prop_assert_eq!(before, after);
    }
}

/// Long edit runs over a small key space, so most edits move or delete a
/// node that already has neighbors.
fn arb_churn() -> impl Strategy<Value = Vec<Edit>> {
    prop::collection::vec(
        prop_oneof![
            3 => (0u8..150, arb_vector(3)).prop_map(|(k, v)| Edit::Upsert(k, v)),
            1 => (0u8..150).prop_map(Edit::Delete),
        ],
        400..1000,
    )
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(8))]

    /// **Property 13: Connectivity Under Churn**
    ///
    /// Hundreds of updates and deletes with tight degree limits never split
    /// the graph, and every surviving node is reachable from the entry point.
    #[test]
    fn prop_churn_keeps_graph_connected(
        edits in arb_churn(),
        seed in any::<u64>(),
        wide in any::<bool>(),
    ) {
        let index = open(if wide { 4 } else { 2 }, seed);
        let mut live = HashMap::new();
        for (step, edit) in edits.iter().enumerate() {
            match edit {
                Edit::Upsert(k, v) => {
                    let key = format!("k{}", k);
                    index.index(&key, Some(v.as_slice()), None).expect("upsert should succeed");
                    live.insert(key, v.clone());
                }
                Edit::Delete(k) => {
                    let key = format!("k{}", k);
                    index.index(&key, None, None).expect("delete should succeed");
                    live.remove(&key);
                }
            }
            if step % 50 == 49 {
                let report = index.validate_connectivity(0).expect("connectivity");
                prop_assert!(report.fully_connected, "step {}: unreachable {:?}", step, report.unreachable);
            }
        }

        prop_assert_eq!(index.total_nodes().expect("total nodes"), live.len());
        prop_assert!(index.find_orphans().expect("orphans").is_empty());
        let report = index.validate_connectivity(0).expect("connectivity");
        prop_assert!(report.fully_connected, "unreachable: {:?}", report.unreachable);
        prop_assert_eq!(report.reachable, live.len());
    }
}

#[test]
fn test_moving_every_node_keeps_graph_connected() {
    let index = open(2, 23);
    for i in 0..120 {
        let x = (i % 12) as f32;
        let y = (i / 12) as f32;
        index.index(&format!("p{}", i), Some(&[x, y]), None).unwrap();
    }
    // Mirror the grid one node at a time so each update tears out a node's
    // whole neighborhood.
    for round in 0..3 {
        for i in 0..120 {
            let x = (i % 12) as f32;
            let y = (i / 12) as f32;
            let moved: [f32; 2] = if round % 2 == 0 { [-x, -y] } else { [x, y] };
            index.index(&format!("p{}", i), Some(&moved[..]), None).unwrap();
        }
        let report = index.validate_connectivity(0).unwrap();
        assert!(report.fully_connected, "round {}: {:?}", round, report.unreachable);
    }
    assert!(index.find_orphans().unwrap().is_empty());
}

#[test]
fn test_deleted_keys_are_never_returned() {
    let index = open(4, 17);
    for i in 0..200 {
        let x = (i % 20) as f32;
        let y = (i / 20) as f32;
        index
            .index(&format!("p{}", i), Some(&[x, y]), None)
            .unwrap();
    }
    for i in (0..200).filter(|i| i % 4 == 0) {
        index.index(&format!("p{}", i), None, None).unwrap();
    }

    for i in 0..200 {
        let x = (i % 20) as f32;
        let y = (i / 20) as f32;
        let hits = index
            .search_with(&[x, y], synagraph::SearchOptions::default().limit(5))
            .unwrap();
        assert!(
            hits.iter().all(|h| h.key != format!("p{}", i) || i % 4 != 0),
            "deleted key p{} returned",
            i
        );
    }
    assert!(index.find_orphans().unwrap().is_empty());
    assert!(index.validate_connectivity(0).unwrap().fully_connected);
}
