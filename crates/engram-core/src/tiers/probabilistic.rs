//! Probabilistic tier - thin adapter over the external belief network
//!
//! The engine call carries a hard deadline. A timeout is not a
//! failure: the tier contributes an empty set and the trace records
//! the cut. The router never plans this tier for execution-mode
//! queries.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::contracts::{ContractError, ProbabilisticEngine};
use crate::error::{EngramError, Result};
use crate::memory::{TierKind, normalize_entity_id};
use crate::tiers::{RecallRequest, RetrievalTier, TierCandidate, TierRecall};
use crate::trace::QueryWarning;

/// Belief-network recall under a hard deadline
pub struct ProbabilisticTier {
    engine: Arc<dyn ProbabilisticEngine>,
    deadline: Duration,
}

impl ProbabilisticTier {
    /// Wrap a belief-network engine with its deadline cap
    pub fn new(engine: Arc<dyn ProbabilisticEngine>, deadline: Duration) -> Self {
        Self { engine, deadline }
    }
}

#[async_trait]
impl RetrievalTier for ProbabilisticTier {
    fn kind(&self) -> TierKind {
        TierKind::Probabilistic
    }

    fn default_deadline(&self) -> Option<Duration> {
        Some(self.deadline)
    }

    async fn recall(&self, request: Arc<RecallRequest>) -> Result<TierRecall> {
        if request.entities.is_empty() {
            return Ok(TierRecall::empty_with(QueryWarning::NoGraphEntities));
        }

        let entity_ids: Vec<String> = request
            .entities
            .iter()
            .map(|e| normalize_entity_id(&e.surface))
            .filter(|id| !id.is_empty())
            .collect();

        let scores = self
            .engine
            .infer(&entity_ids, self.deadline)
            .await
            .map_err(|err| match err {
                ContractError::Timeout => EngramError::Timeout("belief network".into()),
                other => EngramError::TierUnavailable(other.to_string()),
            })?;

        debug!(scored = scores.len(), "probabilistic tier recall");

        let mut candidates: Vec<TierCandidate> = scores
            .into_iter()
            .map(|belief| TierCandidate {
                chunk_id: belief.chunk_id,
                score: belief.probability.clamp(0.0, 1.0),
                provenance: Vec::new(),
            })
            .collect();
        candidates.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.chunk_id.cmp(&b.chunk_id))
        });
        candidates.truncate(request.limit);

        Ok(TierRecall {
            candidates,
            warnings: Vec::new(),
            converged: None,
        })
    }
}

// ============================================================================
// TESTS
// ============================================================================
