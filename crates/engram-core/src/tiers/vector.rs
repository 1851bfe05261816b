//! Vector tier - thin adapter over the external similarity index

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::contracts::{ContractError, VectorIndex};
use crate::error::{EngramError, Result};
use crate::lifecycle::vector_eligible_stages;
use crate::memory::TierKind;
use crate::tiers::{RecallRequest, RetrievalTier, TierCandidate, TierRecall};
use crate::trace::QueryWarning;

/// Similarity recall through the external vector index. The index is
/// queried with the precomputed query embedding and a lifecycle filter
/// restricting results to vector-covered stages.
pub struct VectorTier {
    index: Arc<dyn VectorIndex>,
}

impl VectorTier {
    /// Wrap a vector index
    pub fn new(index: Arc<dyn VectorIndex>) -> Self {
        Self { index }
    }
}

#[async_trait]
impl RetrievalTier for VectorTier {
    fn kind(&self) -> TierKind {
        TierKind::Vector
    }

    async fn recall(&self, request: Arc<RecallRequest>) -> Result<TierRecall> {
        let Some(embedding) = request.embedding.as_deref() else {
            return Ok(TierRecall::empty_with(QueryWarning::EmbeddingUnavailable));
        };

        let stages = vector_eligible_stages();
        let hits = self
            .index
            .similar(embedding, request.limit, &stages)
            .await
            .map_err(|err| match err {
                ContractError::Timeout => EngramError::Timeout("vector index".into()),
                other => EngramError::TierUnavailable(other.to_string()),
            })?;

        debug!(hits = hits.len(), "vector tier recall");

        let candidates = hits
            .into_iter()
            .take(request.limit)
            .map(|(chunk_id, similarity)| TierCandidate {
                chunk_id,
                score: similarity.clamp(0.0, 1.0),
                provenance: Vec::new(),
            })
            .collect();

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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contracts::ContractResult;
    use crate::graph::KnowledgeGraph;
    use crate::lifecycle::LifecycleStage;

    struct StaticIndex {
        hits: Vec<(String, f32)>,
    }

    #[async_trait]
    impl VectorIndex for StaticIndex {
        async fn similar(
            &self,
            _query: &[f32],
            k: usize,
            lifecycle_filter: &[LifecycleStage],
        ) -> ContractResult<Vec<(String, f32)>> {
            assert!(lifecycle_filter.contains(&LifecycleStage::Active));
            assert!(lifecycle_filter.contains(&LifecycleStage::Demoted));
            Ok(self.hits.iter().take(k).cloned().collect())
        }

        async fn get_embedding(&self, _chunk_id: &str) -> ContractResult<Option<Vec<f32>>> {
            Ok(None)
        }
    }

    fn request(embedding: Option<Vec<f32>>) -> Arc<RecallRequest> {
        Arc::new(RecallRequest {
            query: "q".into(),
            embedding,
            entities: Vec::new(),
            multi_hop: false,
            limit: 2,
            snapshot: KnowledgeGraph::new().snapshot(),
        })
    }

    #[tokio::test]
    async fn test_vector_recall_maps_hits() {
        let tier = VectorTier::new(Arc::new(StaticIndex {
            hits: vec![
                ("c-1".into(), 0.9),
                ("c-2".into(), 0.7),
                ("c-3".into(), 0.5),
            ],
        }));
        let recall = tier.recall(request(Some(vec![1.0, 0.0]))).await.unwrap();
        assert_eq!(recall.candidates.len(), 2);
        assert_eq!(recall.candidates[0].chunk_id, "c-1");
        assert!((recall.candidates[0].score - 0.9).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_missing_embedding_degrades() {
        let tier = VectorTier::new(Arc::new(StaticIndex { hits: vec![] }));
        let recall = tier.recall(request(None)).await.unwrap();
        assert!(recall.candidates.is_empty());
        assert_eq!(recall.warnings, vec![QueryWarning::EmbeddingUnavailable]);
    }

    struct RefusingIndex;

    #[async_trait]
    impl VectorIndex for RefusingIndex {
        async fn similar(
            &self,
            _query: &[f32],
            _k: usize,
            _lifecycle_filter: &[LifecycleStage],
        ) -> ContractResult<Vec<(String, f32)>> {
            Err(ContractError::Unavailable("index offline".into()))
        }

        async fn get_embedding(&self, _chunk_id: &str) -> ContractResult<Option<Vec<f32>>> {
            Err(ContractError::Unavailable("index offline".into()))
        }
    }

    #[tokio::test]
    async fn test_unavailable_index_surfaces_tier_unavailable() {
        let tier = VectorTier::new(Arc::new(RefusingIndex));
        let err = tier.recall(request(Some(vec![1.0]))).await.unwrap_err();
        assert!(matches!(err, EngramError::TierUnavailable(_)));
    }
}
