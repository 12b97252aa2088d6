//! Property-based tests for search quality.
//!
//! **Property 6: Recall Against Brute Force**
//! **Property 7: Cluster Separation**
//! **Property 14: Deleting A Cluster**
//!
//! Graph search must find at least 90% of the true top-k neighbors of a
//! query, computed by scanning every vector.

use proptest::prelude::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashSet;
use std::sync::Arc;
use synagraph::{
    Comparator, IndexConfig, MemoryStore, SearchOptions, Similarity, VectorGraphIndex,
};

/// Generate `n` reproducible vectors with components in [-1, 1).
fn generate_vectors(n: usize, dimensions: usize, seed: u64) -> Vec<(String, Vec<f32>)> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..n)
        .map(|i| {
            let vector = (0..dimensions).map(|_| rng.gen_range(-1.0..1.0)).collect();
            (format!("v{}", i), vector)
        })
        .collect()
}

/// Ground truth: the `k` keys most similar to `query`.
fn brute_force_search(
    vectors: &[(String, Vec<f32>)],
    query: &[f32],
    k: usize,
    similarity: Similarity,
) -> Vec<String> {
    let mut scored: Vec<(String, f32)> = vectors
        .iter()
        .map(|(key, vec)| (key.clone(), similarity.score(query, vec)))
        .collect();

    scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

    scored.into_iter().take(k).map(|(key, _)| key).collect()
}

/// |graph results ∩ brute force results| / k
fn calculate_recall(graph_results: &[String], brute_force_results: &[String]) -> f64 {
    if brute_force_results.is_empty() {
        return 1.0;
    }

    let found: HashSet<&String> = graph_results.iter().collect();
    let expected: HashSet<&String> = brute_force_results.iter().collect();
    found.intersection(&expected).count() as f64 / brute_force_results.len() as f64
}

fn build(
    vectors: &[(String, Vec<f32>)],
    config: IndexConfig,
) -> VectorGraphIndex<MemoryStore> {
    let index = VectorGraphIndex::open(Arc::new(MemoryStore::new()), "recall", config)
        .expect("open index");
    for (key, vector) in vectors {
        index
            .index(key, Some(vector.as_slice()), None)
            .expect("insert should succeed");
    }
    index
}

fn mean_recall(
    index: &VectorGraphIndex<MemoryStore>,
    vectors: &[(String, Vec<f32>)],
    queries: &[(String, Vec<f32>)],
    k: usize,
) -> f64 {
    let similarity = index.config().similarity;
    let total: f64 = queries
        .iter()
        .map(|(_, query)| {
            let hits: Vec<String> = index
                .search_with(query, SearchOptions::default().limit(k))
                .expect("search should succeed")
                .into_iter()
                .map(|hit| hit.key)
                .collect();
            calculate_recall(&hits, &brute_force_search(vectors, query, k, similarity))
        })
        .sum();
    total / queries.len() as f64
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(4))]

    /// **Property 6: Recall Against Brute Force**
    ///
    /// For a few hundred low-dimensional points, mean recall@10 is at least
    /// 0.9 for both similarity functions.
    #[test]
    fn prop_recall_at_least_90_percent(
        n_vectors in 200usize..500,
        seed in any::<u64>(),
        euclidean in any::<bool>(),
    ) {
        let similarity = if euclidean { Similarity::Euclidean } else { Similarity::Cosine };
        let config = IndexConfig::with_m(8)
            .similarity(similarity)
            .ef_construction(64)
            .seed(seed);

        let vectors = generate_vectors(n_vectors, 6, seed);
        let index = build(&vectors, config);
        let queries = generate_vectors(30, 6, seed.wrapping_add(1));

        let recall = mean_recall(&index, &vectors, &queries, 10);
        prop_assert!(recall >= 0.9, "recall {} below 0.9", recall);
    }
}

#[test]
fn test_recall_after_deletes() {
    let vectors = generate_vectors(600, 4, 7);
    let index = build(&vectors, IndexConfig::with_m(8).seed(7));

    for (key, _) in vectors.iter().step_by(3) {
        index.index(key, None, None).unwrap();
    }
    let live: Vec<(String, Vec<f32>)> = vectors
        .iter()
        .enumerate()
        .filter(|(i, _)| i % 3 != 0)
        .map(|(_, entry)| entry.clone())
        .collect();
    assert_eq!(index.total_nodes().unwrap(), live.len());

    let queries = generate_vectors(30, 4, 8);
    let recall = mean_recall(&index, &live, &queries, 10);
    assert!(recall >= 0.9, "recall {} below 0.9", recall);
}

/// **Property 7: Cluster Separation**
///
/// Two tight clusters far apart: queries near one cluster return only
/// members of that cluster, and the graph still joins both clusters.
#[test]
fn test_two_clusters() {
    let mut rng = StdRng::seed_from_u64(99);
    let config = IndexConfig::with_m(4)
        .similarity(Similarity::Euclidean)
        .seed(99);
    let index = VectorGraphIndex::open(Arc::new(MemoryStore::new()), "clusters", config).unwrap();

    for i in 0..40 {
        let (cx, cy, prefix) = if i % 2 == 0 {
            (0.0, 0.0, "a")
        } else {
            (100.0, 100.0, "b")
        };
        let point: [f32; 2] = [cx + rng.gen_range(-1.0..1.0), cy + rng.gen_range(-1.0..1.0)];
        index
            .index(&format!("{}{}", prefix, i), Some(&point[..]), None)
            .unwrap();
    }

    let near_a = index
        .search_with(&[0.1, -0.2], SearchOptions::default().limit(10))
        .unwrap();
    assert_eq!(near_a.len(), 10);
    assert!(near_a.iter().all(|hit| hit.key.starts_with('a')));

    let near_b = index
        .search_with(&[99.5, 100.3], SearchOptions::default().limit(10))
        .unwrap();
    assert!(near_b.iter().all(|hit| hit.key.starts_with('b')));

    assert!(index.validate_connectivity(0).unwrap().fully_connected);
    assert!(index.find_orphans().unwrap().is_empty());
}

/// **Property 14: Deleting A Cluster**
///
/// Five points in two clusters. Once cluster A is deleted, queries near it
/// fall through to cluster B; once everything is deleted they find nothing.
#[test]
fn test_deleting_a_cluster() {
    let config = IndexConfig::with_m(2)
        .similarity(Similarity::Euclidean)
        .seed(5);
    let index = VectorGraphIndex::open(Arc::new(MemoryStore::new()), "five", config).unwrap();
    let a: [(&str, [f32; 2]); 3] = [("a0", [0.0, 0.0]), ("a1", [1.0, 0.0]), ("a2", [0.0, 1.5])];
    let b: [(&str, [f32; 2]); 2] = [("b0", [100.0, 100.0]), ("b1", [101.0, 100.0])];
    for (key, point) in a.iter().chain(b.iter()) {
        index.index(key, Some(&point[..]), None).unwrap();
    }

    let keys = |hits: Vec<synagraph::SearchResult>| -> Vec<String> {
        hits.into_iter().map(|hit| hit.key).collect()
    };
    let query = [0.1, 0.1];
    let near = index
        .search_with(&query, SearchOptions::default().limit(3))
        .unwrap();
    assert!(near
        .windows(2)
        .all(|pair| pair[0].similarity >= pair[1].similarity));
    assert_eq!(keys(near), vec!["a0", "a1", "a2"]);

    for (key, _) in &a {
        index.index(key, None, None).unwrap();
    }
    let fallback = keys(
        index
            .search_with(&query, SearchOptions::default().limit(3))
            .unwrap(),
    );
    assert_eq!(fallback, vec!["b0", "b1"]);
    assert!(index.validate_connectivity(0).unwrap().fully_connected);

    for (key, _) in &b {
        index.index(key, None, None).unwrap();
    }
    assert!(index
        .search_with(&query, SearchOptions::default().limit(3))
        .unwrap()
        .is_empty());
    assert_eq!(index.total_nodes().unwrap(), 0);
}

#[test]
fn test_search_comparator_returns_best_first() {
    let vectors = generate_vectors(100, 3, 5);
    let index = build(&vectors, IndexConfig::with_m(6).seed(5));

    let (key, query) = &vectors[42];
    let hits = index
        .search(Comparator::Similarity, query)
        .unwrap()
        .expect("similarity search is supported");
    assert_eq!(&hits[0].key, key);
    assert!(hits
        .windows(2)
        .all(|pair| pair[0].similarity >= pair[1].similarity));
}

#[test]
fn test_anti_clique_keeps_best_match() {
    let vectors = generate_vectors(300, 3, 11);
    let index = build(&vectors, IndexConfig::with_m(6).seed(11));

    let (key, query) = &vectors[7];
    let plain = index
        .search_with(query, SearchOptions::default().limit(10))
        .unwrap();
    let filtered = index
        .search_with(
            query,
            SearchOptions::default().limit(10).anti_clique_factor(0.5),
        )
        .unwrap();

    assert_eq!(&plain[0].key, key);
    assert_eq!(&filtered[0].key, key);
    assert!(filtered.len() <= 10);
    assert!(filtered
        .windows(2)
        .all(|pair| pair[0].similarity >= pair[1].similarity));
}
