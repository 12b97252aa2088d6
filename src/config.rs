//! Index configuration.
//!
//! [`IndexConfig`] can be built in code or parsed from a JSON options object
//! using the option names understood by the query layer:
//!
//! ```rust
//! use synagraph::{IndexConfig, Similarity};
//!
//! let config = IndexConfig::from_json(
//!     r#"{ "similarity": "euclidean", "M": 8, "efConstruction": 64 }"#,
//! ).unwrap();
//! assert_eq!(config.similarity, Similarity::Euclidean);
//! assert_eq!(config.m, 8);
//! assert_eq!(config.ef_search(), 32);
//! ```

use serde::{Deserialize, Serialize};

use crate::error::{Result, SynaError};
use crate::similarity::Similarity;

/// Upper bound on node levels.
///
/// With `M = 16` a level above 10 is expected once per ~10^12 insertions.
pub const MAX_LEVEL: u32 = 10;

/// HNSW graph configuration.
///
/// # Default Values
///
/// - `m = 16`
/// - `ef_construction = 100` (queries use half)
/// - `indirectness_factor = 0.4`
/// - `anti_clique_factor = 0.0` (query de-duplication off)
/// - `max_level = 10`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct IndexConfig {
    /// Similarity metric.
    pub similarity: Similarity,

    /// Connection basis per layer.
    ///
    /// Layer 0 holds up to `8·M` edges per node and upper layers `4·M`.
    /// Also drives the level distribution: `mL = 1/ln(M)`.
    #[serde(rename = "M")]
    pub m: usize,

    /// Candidate list size while inserting. Queries use half of it.
    pub ef_construction: usize,

    /// How aggressively candidates reachable through an already selected
    /// neighbor are skipped during insertion, in `[0, 1]`.
    pub indirectness_factor: f32,

    /// How aggressively tightly interconnected results are dropped from
    /// query results, in `[0, 1]`. Zero disables the filter.
    pub anti_clique_factor: f32,

    /// Cap on node levels.
    pub max_level: u32,

    /// Seed for level assignment. `None` seeds from the OS.
    pub seed: Option<u64>,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            similarity: Similarity::Cosine,
            m: 16,
            ef_construction: 100,
            indirectness_factor: 0.4,
            anti_clique_factor: 0.0,
            max_level: MAX_LEVEL,
            seed: None,
        }
    }
}

impl IndexConfig {
    /// Default configuration with a custom `M`.
    pub fn with_m(m: usize) -> Self {
        Self {
            m,
            ..Default::default()
        }
    }

    /// Parse and validate a JSON options object. Unknown options are ignored.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: IndexConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Set the similarity metric.
    pub fn similarity(mut self, similarity: Similarity) -> Self {
        self.similarity = similarity;
        self
    }

    /// Set `ef_construction`.
    pub fn ef_construction(mut self, ef: usize) -> Self {
        self.ef_construction = ef;
        self
    }

    /// Set the indirectness factor.
    pub fn indirectness_factor(mut self, factor: f32) -> Self {
        self.indirectness_factor = factor;
        self
    }

    /// Set the anti-clique factor used by queries.
    pub fn anti_clique_factor(mut self, factor: f32) -> Self {
        self.anti_clique_factor = factor;
        self
    }

    /// Fix the RNG seed.
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Check that every parameter is in range.
    pub fn validate(&self) -> Result<()> {
        if self.m < 2 {
            return Err(SynaError::InvalidConfig(format!(
                "M must be at least 2, got {}",
                self.m
            )));
        }
        if self.ef_construction == 0 {
            return Err(SynaError::InvalidConfig(
                "efConstruction must be positive".to_string(),
            ));
        }
        for (name, value) in [
            ("indirectnessFactor", self.indirectness_factor),
            ("antiCliqueFactor", self.anti_clique_factor),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(SynaError::InvalidConfig(format!(
                    "{} must be within [0, 1], got {}",
                    name, value
                )));
            }
        }
        Ok(())
    }

    /// Level normalization factor `1/ln(M)`.
    pub fn ml(&self) -> f64 {
        1.0 / (self.m as f64).ln()
    }

    /// Candidate list size used by queries.
    pub fn ef_search(&self) -> usize {
        (self.ef_construction / 2).max(1)
    }

    /// Maximum number of edges a node keeps at `level`.
    pub fn capacity(&self, level: u32) -> usize {
        if level == 0 {
            self.m * 8
        } else {
            self.m * 4
        }
    }

    /// Maximum number of neighbors selected for a new node at `level`.
    pub fn selection_limit(&self, level: u32) -> usize {
        if level == 0 {
            self.m * 2
        } else {
            self.m
        }
    }
}
