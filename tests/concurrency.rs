//! Property-based tests for concurrent use of one index.
//!
//! **Property 12: Concurrent Writes Preserve All Vectors**
//!
//! Writers are serialized by the index, so vectors indexed from several
//! threads are all present afterwards and the graph keeps its invariants.
//! Searches running at the same time never fail.

use proptest::prelude::*;
use std::sync::{Arc, Barrier};
use std::thread;
use synagraph::{IndexConfig, MemoryStore, SearchOptions, Similarity, VectorGraphIndex};

fn arb_vectors() -> impl Strategy<Value = Vec<Vec<f32>>> {
    prop::collection::vec(prop::collection::vec(-5.0f32..5.0, 4), 8..48)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(10))]

    /// **Property 12: Concurrent Writes Preserve All Vectors**
    #[test]
    fn prop_concurrent_writes_preserve_all_vectors(vectors in arb_vectors()) {
        let config = IndexConfig::with_m(4).similarity(Similarity::Euclidean);
        let index = Arc::new(
            VectorGraphIndex::open(Arc::new(MemoryStore::new()), "shared", config)
                .expect("open index"),
        );

        let keyed: Vec<(String, Vec<f32>)> = vectors
            .into_iter()
            .enumerate()
            .map(|(i, v)| (format!("k{}", i), v))
            .collect();

        let num_threads = 4;
        let chunk_size = (keyed.len() + num_threads - 1) / num_threads;
        let mut handles = Vec::new();
        for chunk in keyed.chunks(chunk_size) {
            let index = Arc::clone(&index);
            let chunk = chunk.to_vec();
            handles.push(thread::spawn(move || {
                for (key, vector) in chunk {
                    index
                        .index(&key, Some(vector.as_slice()), None)
                        .expect("insert should succeed");
                }
            }));
        }

        // A reader racing the writers.
        let reader = {
            let index = Arc::clone(&index);
            thread::spawn(move || {
                for _ in 0..20 {
                    index
                        .search_with(&[0.0; 4], SearchOptions::default().limit(5))
                        .expect("search should succeed");
                }
            })
        };

        for handle in handles {
            handle.join().expect("writer panicked");
        }
        reader.join().expect("reader panicked");

        prop_assert_eq!(index.total_nodes().expect("total nodes"), keyed.len());
        for (key, vector) in &keyed {
            let stored = index.get_vector(key).expect("vector");
            prop_assert_eq!(stored.as_ref(), Some(vector));
        }
        prop_assert!(index.find_orphans().expect("orphans").is_empty());
        prop_assert!(index.validate_connectivity(0).expect("connectivity").fully_connected);
    }
}

#[test]
fn test_instances_share_id_counter() {
    let store = Arc::new(MemoryStore::new());
    let first = VectorGraphIndex::open(Arc::clone(&store), "ids", IndexConfig::default()).unwrap();
    let second = VectorGraphIndex::open(Arc::clone(&store), "ids", IndexConfig::default()).unwrap();

    first.index("a", Some(&[1.0, 0.0]), None).unwrap();
    second.index("b", Some(&[0.0, 1.0]), None).unwrap();

    let a = first.node_id("a").unwrap().unwrap();
    let b = second.node_id("b").unwrap().unwrap();
    assert_ne!(a, b);
    assert_eq!(first.total_nodes().unwrap(), 2);
}

#[test]
fn test_racing_first_inserts_share_one_entry_point() {
    for round in 0..50 {
        let store = Arc::new(MemoryStore::new());
        let barrier = Arc::new(Barrier::new(2));
        let handles: Vec<_> = ["a", "b"]
            .into_iter()
            .enumerate()
            .map(|(i, key)| {
                let store = Arc::clone(&store);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    let index =
                        VectorGraphIndex::open(store, "seed", IndexConfig::default().seed(round))
                            .expect("open index");
                    barrier.wait();
                    index
                        .index(key, Some(&[i as f32, 1.0]), None)
                        .expect("insert should succeed");
                })
            })
            .collect();
        for handle in handles {
            handle.join().expect("writer panicked");
        }

        let index = VectorGraphIndex::open(store, "seed", IndexConfig::default()).unwrap();
        assert_eq!(index.total_nodes().unwrap(), 2);
        let report = index.validate_connectivity(0).unwrap();
        assert!(report.fully_connected, "round {}: {:?}", round, report.unreachable);
        assert!(index.find_orphans().unwrap().is_empty());
    }
}
