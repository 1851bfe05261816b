//! Graph tier - entity matching plus Personalized PageRank
//!
//! Ties query-entity extraction to the knowledge graph:
//!
//! 1. match extracted entities to graph nodes, exact id first, then
//!    fuzzy by embedding cosine
//! 2. optionally widen the seed set by synonymy edges and, in
//!    multi-hop mode, by bounded BFS
//! 3. run Personalized PageRank from the seed set
//! 4. aggregate entity mass into chunk scores through `mentions`
//!    edges, restricted to graph-covered lifecycle stages
//!
//! Chunk scores are max-normalized to [0,1] before leaving the tier so
//! the downstream filter floor and fusion weights see one scale
//! regardless of graph size.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::config::{MultiHopConfig, PprConfig, SynonymyConfig};
use crate::contracts::Embedder;
use crate::error::Result;
use crate::graph::{
    EdgeKind, GraphSnapshot, expand_synonyms, multi_hop, personalized_pagerank, rank_chunks,
};
use crate::lifecycle::indexing_strategy;
use crate::memory::{ChunkRegistry, TierKind, cosine_similarity, normalize_entity_id};
use crate::tiers::{RecallRequest, RetrievalTier, TierCandidate, TierRecall};
use crate::trace::QueryWarning;

// ============================================================================
// CONFIG
// ============================================================================

/// Graph tier parameters
#[derive(Debug, Clone)]
pub struct HippoRagConfig {
    /// Cosine floor for fuzzy entity-to-node matching
    pub fuzzy_match_threshold: f32,
    /// PageRank parameters
    pub ppr: PprConfig,
    /// Query-time synonymy expansion
    pub synonymy: SynonymyConfig,
    /// Multi-hop widening
    pub multi_hop: MultiHopConfig,
}

impl Default for HippoRagConfig {
    fn default() -> Self {
        Self {
            fuzzy_match_threshold: 0.85,
            ppr: PprConfig::default(),
            synonymy: SynonymyConfig::default(),
            multi_hop: MultiHopConfig::default(),
        }
    }
}

// ============================================================================
// TIER
// ============================================================================

/// Knowledge-graph retrieval tier
pub struct HippoRagTier {
    registry: Arc<ChunkRegistry>,
    embedder: Arc<dyn Embedder>,
    config: HippoRagConfig,
}

impl HippoRagTier {
    /// Create the tier over a chunk registry and embedding lookup
    pub fn new(
        registry: Arc<ChunkRegistry>,
        embedder: Arc<dyn Embedder>,
        config: HippoRagConfig,
    ) -> Self {
        Self {
            registry,
            embedder,
            config,
        }
    }

    /// Match query entities to graph nodes: exact normalized-id match
    /// first, then fuzzy by embedding cosine over entity display text.
    async fn match_seeds(&self, request: &RecallRequest) -> Vec<String> {
        let snapshot = &request.snapshot;
        let mut seeds = Vec::new();

        for extracted in &request.entities {
            let id = normalize_entity_id(&extracted.surface);
            if id.is_empty() {
                continue;
            }
            let exact = snapshot
                .position(&id)
                .is_some_and(|pos| snapshot.node(pos).is_entity());
            if exact {
                seeds.push(id);
                continue;
            }
            if let Some(matched) = self.fuzzy_match(snapshot, &extracted.surface).await {
                seeds.push(matched);
            }
        }

        seeds.sort();
        seeds.dedup();
        seeds
    }

    async fn fuzzy_match(&self, snapshot: &GraphSnapshot, surface: &str) -> Option<String> {
        let query_vec = self.embedder.encode(surface).await.ok()?;
        let mut best: Option<(String, f32)> = None;
        for (_, entity) in snapshot.entity_nodes() {
            let Ok(candidate_vec) = self.embedder.encode(&entity.display).await else {
                continue;
            };
            let similarity = cosine_similarity(&query_vec, &candidate_vec);
            if similarity < self.config.fuzzy_match_threshold {
                continue;
            }
            let better = best
                .as_ref()
                .is_none_or(|(_, s)| similarity > *s);
            if better {
                best = Some((entity.id.clone(), similarity));
            }
        }
        best.map(|(id, _)| id)
    }

    fn graph_eligible(&self, chunk_id: &str) -> bool {
        // Unregistered chunks fail open, matching the classifier's
        // missing-metadata policy
        match self.registry.stage(chunk_id) {
            Ok(Some(stage)) => indexing_strategy(stage).graph,
            _ => true,
        }
    }

    /// Best contributing entity per chunk, for provenance
    fn contributors(
        snapshot: &GraphSnapshot,
        scores: &[f64],
    ) -> HashMap<String, (String, f64)> {
        let mut best: HashMap<String, (String, f64)> = HashMap::new();
        for (pos, entity) in snapshot.entity_nodes() {
            let mass = scores[pos];
            if mass <= 0.0 {
                continue;
            }
            for edge in snapshot.out_edges(pos) {
                if edge.kind != EdgeKind::Mentions {
                    continue;
                }
                let chunk_id = snapshot.node(edge.target).id();
                let entry = best.entry(chunk_id.to_string());
                entry
                    .and_modify(|(holder, holder_mass)| {
                        if mass > *holder_mass {
                            *holder = entity.id.clone();
                            *holder_mass = mass;
                        }
                    })
                    .or_insert_with(|| (entity.id.clone(), mass));
            }
        }
        best
    }
}

#[async_trait]
impl RetrievalTier for HippoRagTier {
    fn kind(&self) -> TierKind {
        TierKind::HippoRag
    }

    async fn recall(&self, request: Arc<RecallRequest>) -> Result<TierRecall> {
        let snapshot = &request.snapshot;
        if request.entities.is_empty() || snapshot.entity_count() == 0 {
            return Ok(TierRecall::empty_with(QueryWarning::NoGraphEntities));
        }

        let mut seeds = self.match_seeds(&request).await;
        if seeds.is_empty() {
            return Ok(TierRecall::empty_with(QueryWarning::NoGraphEntities));
        }

        if self.config.synonymy.enabled {
            seeds = expand_synonyms(snapshot, &seeds, self.config.synonymy.max_expand);
        }

        // Multi-hop widening keeps the seed distribution uniform over
        // the union set; discovered paths become provenance
        let mut paths: HashMap<String, Vec<String>> = HashMap::new();
        if request.multi_hop {
            for discovery in multi_hop(snapshot, &seeds, self.config.multi_hop.max_hops, None) {
                if !seeds.contains(&discovery.entity_id) {
                    seeds.push(discovery.entity_id.clone());
                }
                paths.insert(discovery.entity_id, discovery.path);
            }
        }

        let ppr = personalized_pagerank(snapshot, &seeds, &self.config.ppr);
        if ppr.is_empty() {
            return Ok(TierRecall::empty_with(QueryWarning::NoGraphEntities));
        }

        let mut warnings = Vec::new();
        if !ppr.converged {
            warnings.push(QueryWarning::PprNotConverged);
        }

        let ranked = rank_chunks(snapshot, &ppr, &|chunk_id| self.graph_eligible(chunk_id));
        debug!(
            seeds = seeds.len(),
            ranked = ranked.len(),
            iterations = ppr.iterations,
            "graph tier recall"
        );

        let top = ranked.first().map(|(_, score)| *score).unwrap_or(0.0);
        let contributors = Self::contributors(snapshot, &ppr.scores);

        let candidates = ranked
            .into_iter()
            .take(request.limit)
            .map(|(chunk_id, score)| {
                let normalized = if top > 0.0 { (score / top) as f32 } else { 0.0 };
                let provenance = contributors
                    .get(&chunk_id)
                    .map(|(entity, _)| {
                        paths
                            .get(entity)
                            .cloned()
                            .unwrap_or_else(|| vec![entity.clone()])
                    })
                    .unwrap_or_default();
                TierCandidate {
                    chunk_id,
                    score: normalized,
                    provenance,
                }
            })
            .collect();

        Ok(TierRecall {
            candidates,
            warnings,
            converged: Some(ppr.converged),
        })
    }
}

// ============================================================================
// TESTS
// ============================================================================
