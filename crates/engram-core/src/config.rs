//! Engine configuration
//!
//! Every threshold and weight the retrieval core uses is configuration,
//! not a constant. Values are fixed per engine instance; per-query
//! overrides are limited to the options accepted by `query`.

use serde::{Deserialize, Serialize};

use crate::error::{EngramError, Result};

/// Default embedding dimension (all vectors in the system share it)
pub const DEFAULT_EMBEDDING_DIM: usize = 384;

/// Default hard token budget for an assembled context
pub const DEFAULT_TOKEN_BUDGET: usize = 10_000;

/// Default cosine threshold above which two results are duplicates
pub const DEFAULT_DEDUP_THRESHOLD: f32 = 0.95;

/// Default per-tier recall width
pub const DEFAULT_RECALL_WIDTH: usize = 50;

/// Default curated-core size
pub const DEFAULT_CORE_SIZE: usize = 5;

// ============================================================================
// PERSONALIZED PAGERANK
// ============================================================================

/// Personalized PageRank parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PprConfig {
    /// Restart mass toward the personalization distribution
    pub alpha: f64,
    /// Iteration cap
    pub max_iter: u32,
    /// L1 convergence tolerance between iterations
    pub tol: f64,
}

impl Default for PprConfig {
    fn default() -> Self {
        Self {
            alpha: 0.85,
            max_iter: 100,
            tol: 1e-6,
        }
    }
}

// ============================================================================
// MULTI-HOP + SYNONYMY
// ============================================================================

/// Multi-hop graph traversal parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MultiHopConfig {
    /// Maximum BFS depth
    pub max_hops: u32,
}

impl Default for MultiHopConfig {
    fn default() -> Self {
        Self { max_hops: 3 }
    }
}

/// Synonymy expansion parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SynonymyConfig {
    /// Maximum expansions per source entity (one hop)
    pub max_expand: usize,
    /// Cosine similarity floor for the batch job that creates
    /// `similar_to` edges
    pub min_similarity: f32,
    /// Whether query-time expansion is enabled
    pub enabled: bool,
}

impl Default for SynonymyConfig {
    fn default() -> Self {
        Self {
            max_expand: 5,
            min_similarity: 0.85,
            enabled: true,
        }
    }
}

// ============================================================================
// FUSION PIPELINE
// ============================================================================

/// Per-tier score floors applied in the filter stage.
///
/// Floors are per-tier because the score scales differ: vector and graph
/// scores live on a [0,1] similarity scale, the probabilistic tier uses
/// its own calibration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FilterFloors {
    /// Floor for vector cosine similarity
    pub vector: f32,
    /// Floor for graph-tier chunk scores
    pub hipporag: f32,
    /// Floor for probabilistic-tier probabilities
    pub bayes: f32,
}

impl Default for FilterFloors {
    fn default() -> Self {
        Self {
            vector: 0.3,
            hipporag: 0.3,
            bayes: 0.2,
        }
    }
}

/// Convex weights for score fusion. Must sum to ~1.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RankWeights {
    /// Weight of the vector tier
    pub vector: f32,
    /// Weight of the graph tier
    pub hipporag: f32,
    /// Weight of the probabilistic tier
    pub bayes: f32,
}

impl Default for RankWeights {
    fn default() -> Self {
        Self {
            vector: 0.4,
            hipporag: 0.4,
            bayes: 0.2,
        }
    }
}

impl RankWeights {
    /// Sum of the three weights
    pub fn total(&self) -> f32 {
        self.vector + self.hipporag + self.bayes
    }
}

/// Context assembly parameters for the five-stage pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FusionConfig {
    /// Candidates requested from each tier during recall
    pub recall_width: usize,
    /// Per-tier score floors
    pub filter_floor: FilterFloors,
    /// Cosine threshold for the dedup stage
    pub dedup_threshold: f32,
    /// Fusion weights
    pub rank_weights: RankWeights,
    /// Hard token budget for core + extended output
    pub token_budget: usize,
    /// Curated-core size cap
    pub core_size: usize,
    /// Extended-tail width in planning mode
    pub planning_extended: usize,
    /// Extended-tail width in brainstorming mode
    pub brainstorming_extended: usize,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            recall_width: DEFAULT_RECALL_WIDTH,
            filter_floor: FilterFloors::default(),
            dedup_threshold: DEFAULT_DEDUP_THRESHOLD,
            rank_weights: RankWeights::default(),
            token_budget: DEFAULT_TOKEN_BUDGET,
            core_size: DEFAULT_CORE_SIZE,
            planning_extended: 15,
            brainstorming_extended: 25,
        }
    }
}

// ============================================================================
// DEADLINES
// ============================================================================

/// Deadline budgets, in milliseconds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DeadlineConfig {
    /// Overall per-query deadline
    pub query_ms: u64,
    /// Probabilistic-tier deadline (capped by the remaining query budget)
    pub prob_ms: u64,
}

impl Default for DeadlineConfig {
    fn default() -> Self {
        Self {
            query_ms: 650,
            prob_ms: 1_000,
        }
    }
}

// ============================================================================
// LIFECYCLE POLICY
// ============================================================================

/// Thresholds for the lifecycle classifier. Fixed per process.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LifecyclePolicy {
    /// Maximum age (days) for a chunk to stay Active
    pub active_max_age_days: i64,
    /// Maximum age (days) before Demoted chunks become Archived
    pub demoted_max_age_days: i64,
    /// Minimum weekly access rate to stay Active
    pub active_min_weekly_rate: f64,
    /// Access rate below which old chunks are Archived
    pub archived_max_weekly_rate: f64,
}

impl Default for LifecyclePolicy {
    fn default() -> Self {
        Self {
            active_max_age_days: 7,
            demoted_max_age_days: 30,
            active_min_weekly_rate: 3.0,
            archived_max_weekly_rate: 1.0,
        }
    }
}

// ============================================================================
// TOP-LEVEL CONFIG
// ============================================================================

/// Full engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngramConfig {
    /// Embedding dimension D shared by every vector in the system
    pub embedding_dim: usize,
    /// Personalized PageRank parameters
    pub ppr: PprConfig,
    /// Multi-hop traversal parameters
    pub multi_hop: MultiHopConfig,
    /// Synonymy expansion parameters
    pub synonymy: SynonymyConfig,
    /// Fusion pipeline parameters
    pub fusion: FusionConfig,
    /// Deadline budgets
    pub deadlines: DeadlineConfig,
    /// Lifecycle classifier thresholds
    pub lifecycle: LifecyclePolicy,
    /// Query-embedding LRU cache capacity
    pub query_cache_size: usize,
}

impl EngramConfig {
    /// Validate invariants the rest of the engine assumes.
    pub fn validate(&self) -> Result<()> {
        if self.embedding_dim == 0 {
            return Err(EngramError::InvalidInput(
                "embedding_dim must be positive".into(),
            ));
        }
        if self.fusion.token_budget == 0 {
            return Err(EngramError::InvalidInput(
                "token_budget must be positive".into(),
            ));
        }
        if self.fusion.core_size == 0 {
            return Err(EngramError::InvalidInput(
                "core_size must be positive".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.fusion.dedup_threshold) {
            return Err(EngramError::InvalidInput(format!(
                "dedup_threshold {} outside [0,1]",
                self.fusion.dedup_threshold
            )));
        }
        let floors = &self.fusion.filter_floor;
        for (name, floor) in [
            ("filter_floor.vector", floors.vector),
            ("filter_floor.hipporag", floors.hipporag),
            ("filter_floor.bayes", floors.bayes),
        ] {
            if !(0.0..=1.0).contains(&floor) {
                return Err(EngramError::InvalidInput(format!(
                    "{name} {floor} outside [0,1]"
                )));
            }
        }
        let total = self.fusion.rank_weights.total();
        if (total - 1.0).abs() > 1e-3 {
            return Err(EngramError::InvalidInput(format!(
                "rank_weights must sum to ~1, got {total}"
            )));
        }
        if !(0.0..=1.0).contains(&self.ppr.alpha) {
            return Err(EngramError::InvalidInput(format!(
                "ppr.alpha {} outside [0,1]",
                self.ppr.alpha
            )));
        }
        if self.ppr.max_iter == 0 || self.ppr.tol <= 0.0 {
            return Err(EngramError::InvalidInput(
                "ppr iteration cap and tolerance must be positive".into(),
            ));
        }
        if self.deadlines.query_ms == 0 {
            return Err(EngramError::InvalidInput(
                "deadlines.query_ms must be positive".into(),
            ));
        }
        Ok(())
    }
}

impl Default for EngramConfig {
    fn default() -> Self {
        Self {
            embedding_dim: DEFAULT_EMBEDDING_DIM,
            ppr: PprConfig::default(),
            multi_hop: MultiHopConfig::default(),
            synonymy: SynonymyConfig::default(),
            fusion: FusionConfig::default(),
            deadlines: DeadlineConfig::default(),
            lifecycle: LifecyclePolicy::default(),
            query_cache_size: 256,
        }
    }
}
