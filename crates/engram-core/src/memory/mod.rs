//! Memory module - core types and data structures
//!
//! Shared vocabulary of the retrieval engine:
//! - Chunks (indexed vault text) and entities (normalized mentions)
//! - Tier identifiers and per-tier score records
//! - The curated query result returned to the hosting application

mod chunk;
mod entity;
mod registry;

pub use chunk::{Chunk, LifecycleTag, cosine_similarity, is_finite_vector};
pub use entity::{Entity, EntityKind, normalize_entity_id};
pub use registry::ChunkRegistry;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::router::QueryMode;
use crate::trace::QueryWarning;

// ============================================================================
// TIERS
// ============================================================================

/// The retrieval tiers that can contribute candidates
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum TierKind {
    /// Embedding-similarity recall over the vector index
    Vector,
    /// Knowledge-graph recall via Personalized PageRank
    #[serde(rename = "hipporag")]
    HippoRag,
    /// Belief-network recall
    Probabilistic,
}

impl TierKind {
    /// Convert to string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            TierKind::Vector => "vector",
            TierKind::HippoRag => "hipporag",
            TierKind::Probabilistic => "probabilistic",
        }
    }
}

impl std::fmt::Display for TierKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// PER-TIER SCORES
// ============================================================================

/// Scores a candidate earned from each tier that returned it
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TierScores {
    /// Vector cosine similarity
    pub vector: Option<f32>,
    /// Graph-tier chunk score (max-normalized PPR mass)
    pub hipporag: Option<f32>,
    /// Probabilistic-tier probability
    pub bayes: Option<f32>,
}

impl TierScores {
    /// Score from a specific tier, if present
    pub fn get(&self, tier: TierKind) -> Option<f32> {
        match tier {
            TierKind::Vector => self.vector,
            TierKind::HippoRag => self.hipporag,
            TierKind::Probabilistic => self.bayes,
        }
    }

    /// Set the score for a tier
    pub fn set(&mut self, tier: TierKind, score: f32) {
        match tier {
            TierKind::Vector => self.vector = Some(score),
            TierKind::HippoRag => self.hipporag = Some(score),
            TierKind::Probabilistic => self.bayes = Some(score),
        }
    }

    /// Tiers that contributed a score, in stable order
    pub fn origins(&self) -> Vec<TierKind> {
        let mut tiers = Vec::with_capacity(3);
        if self.vector.is_some() {
            tiers.push(TierKind::Vector);
        }
        if self.hipporag.is_some() {
            tiers.push(TierKind::HippoRag);
        }
        if self.bayes.is_some() {
            tiers.push(TierKind::Probabilistic);
        }
        tiers
    }
}

// ============================================================================
// RETRIEVAL RESULT
// ============================================================================

/// A ranked candidate emitted by the fusion pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetrievalResult {
    /// The candidate chunk
    pub chunk_id: String,
    /// Tiers that recalled the chunk
    pub origins: Vec<TierKind>,
    /// Per-tier scores
    pub scores: TierScores,
    /// Convex-weighted fused score
    pub fused_score: f32,
    /// Sum of the fusion weights of contributing tiers; cross-tier
    /// agreement raises it
    pub confidence: f32,
    /// Graph node path for multi-hop results (empty otherwise)
    pub provenance: Vec<String>,
}

// ============================================================================
// QUERY OPTIONS / RESULT
// ============================================================================

/// Per-query options accepted by `query`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct QueryOptions {
    /// Final core size cap (default 5)
    pub top_k: Option<usize>,
    /// Mode override; auto-detected when absent
    pub mode: Option<QueryMode>,
    /// Tier override; replaces the routed plan when present
    pub tiers: Option<Vec<TierKind>>,
    /// Per-query deadline override, milliseconds
    pub deadline_ms: Option<u64>,
    /// Per-query token budget override
    pub token_budget: Option<usize>,
}

/// The curated context returned for a query
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResult {
    /// Top-ranked slice, never truncated by the budget under normal
    /// operation
    pub core: Vec<Chunk>,
    /// Mode-dependent tail, truncated first when the budget binds
    pub extended: Vec<Chunk>,
    /// Trace id for explain/replay/classify
    pub trace_id: Uuid,
    /// Degraded conditions observed while answering
    pub warnings: Vec<QueryWarning>,
}

// ============================================================================
// TESTS
// ============================================================================
