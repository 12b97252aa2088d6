// Copyright (c) 2025 SynaDB Contributors
// Licensed under the SynaDB License. See LICENSE file for details.

//! Similarity functions for vector comparison.
//!
//! All functions follow a "larger is more similar" convention so that the
//! graph algorithms can use a single comparator regardless of the metric:
//!
//! | Metric | Range | Identical vectors |
//! |--------|-------|-------------------|
//! | Cosine | [-1, 1] | 1 |
//! | Euclidean (negated) | (-∞, 0] | 0 |
//!
//! Vectors of unequal length are compared over the shorter length.
//!
//! # Examples
//!
//! ```rust
//! use synagraph::similarity::Similarity;
//!
//! let a = vec![1.0f32, 0.0];
//! let b = vec![0.0f32, 1.0];
//!
//! assert!(Similarity::Cosine.score(&a, &b).abs() < 1e-6);
//! assert!((Similarity::Euclidean.score(&a, &b) + std::f32::consts::SQRT_2).abs() < 1e-6);
//! ```

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Similarity metric used by an index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Similarity {
    /// Cosine similarity: `(a·b)/(|a||b|)`.
    ///
    /// Invariant to vector magnitude. Zero vectors score 0 (orthogonal).
    #[default]
    Cosine,

    /// Negated Euclidean distance: `-sqrt(Σ(a_i - b_i)²)`.
    Euclidean,
}

impl Similarity {
    /// Parse a metric name. `"euclidean"` selects [`Similarity::Euclidean`];
    /// every other name falls back to cosine.
    pub fn from_name(name: &str) -> Self {
        if name.eq_ignore_ascii_case("euclidean") {
            Similarity::Euclidean
        } else {
            Similarity::Cosine
        }
    }

    /// Canonical lowercase name of the metric.
    pub fn name(&self) -> &'static str {
        match self {
            Similarity::Cosine => "cosine",
            Similarity::Euclidean => "euclidean",
        }
    }

    /// Score two vectors; higher means more similar.
    pub fn score(&self, a: &[f32], b: &[f32]) -> f32 {
        match self {
            Similarity::Cosine => cosine_similarity(a, b),
            Similarity::Euclidean => -euclidean_distance(a, b),
        }
    }
}

impl Serialize for Similarity {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.name())
    }
}

impl<'de> Deserialize<'de> for Similarity {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        Ok(Similarity::from_name(&name))
    }
}

/// Cosine similarity over the common prefix of `a` and `b`.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = (norm_a * norm_b).sqrt();
    if denom < 1e-10 {
        return 0.0;
    }
    dot / denom
}

/// Euclidean (L2) distance over the common prefix of `a` and `b`.
pub fn euclidean_distance(a: &[f32], b: &[f32]) -> f32 {
    let mut sum = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        let diff = x - y;
        sum += diff * diff;
    }
    sum.sqrt()
}
