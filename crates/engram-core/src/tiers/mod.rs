//! Retrieval tiers
//!
//! Each tier contributes candidates during the recall stage through
//! one stable contract. Tiers are addressed as trait objects so a
//! backend swap is a configuration change, not a code change.

mod hipporag;
mod probabilistic;
mod vector;

pub use hipporag::{HippoRagConfig, HippoRagTier};
pub use probabilistic::ProbabilisticTier;
pub use vector::VectorTier;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::contracts::ExtractedEntity;
use crate::error::Result;
use crate::graph::GraphSnapshot;
use crate::memory::TierKind;
use crate::trace::QueryWarning;

// ============================================================================
// RECALL REQUEST / RESPONSE
// ============================================================================

/// Everything a tier needs to answer one recall call. Built once per
/// query and shared across the fan-out.
#[derive(Debug, Clone)]
pub struct RecallRequest {
    /// Raw query text
    pub query: String,
    /// Query embedding, when the embedder produced one
    pub embedding: Option<Vec<f32>>,
    /// Entities extracted from the query
    pub entities: Vec<ExtractedEntity>,
    /// Whether the graph tier widens its seeds by multi-hop search
    pub multi_hop: bool,
    /// Maximum candidates per tier
    pub limit: usize,
    /// Immutable graph view for this query
    pub snapshot: GraphSnapshot,
}

/// One candidate from one tier
#[derive(Debug, Clone, PartialEq)]
pub struct TierCandidate {
    /// Candidate chunk
    pub chunk_id: String,
    /// Tier-scale score
    pub score: f32,
    /// Graph node path that produced the candidate (graph tier only)
    pub provenance: Vec<String>,
}

/// A tier's answer to one recall call
#[derive(Debug, Clone, Default)]
pub struct TierRecall {
    /// Candidates, strongest first
    pub candidates: Vec<TierCandidate>,
    /// Degraded conditions the tier observed
    pub warnings: Vec<QueryWarning>,
    /// Graph tier only: whether PageRank converged
    pub converged: Option<bool>,
}

impl TierRecall {
    /// An empty response carrying one warning
    pub fn empty_with(warning: QueryWarning) -> Self {
        Self {
            warnings: vec![warning],
            ..Default::default()
        }
    }
}

// ============================================================================
// TIER CONTRACT
// ============================================================================

/// A retrieval tier invoked during the recall stage
#[async_trait]
pub trait RetrievalTier: Send + Sync {
    /// Which tier this is
    fn kind(&self) -> TierKind;

    /// The tier's own deadline cap, when it has one. The pipeline
    /// takes the minimum of this and the fair share of the remaining
    /// query budget.
    fn default_deadline(&self) -> Option<Duration> {
        None
    }

    /// Produce up to `request.limit` candidates
    async fn recall(&self, request: Arc<RecallRequest>) -> Result<TierRecall>;
}
