//! # Memory Engine
//!
//! The facade the hosting application talks to. Owns the knowledge
//! graph, the chunk registry, the router, the fusion pipeline and the
//! trace store; consumes the external collaborators through the
//! [`crate::contracts`] trait objects.
//!
//! The engine holds no process-wide state: everything lives on the
//! instance, and all methods take `&self` so an `Arc<MemoryEngine>`
//! can serve concurrent queries. Graph reads go through per-query
//! snapshots; the single writer path (indexing, consolidation,
//! synonymy) takes the write lock briefly.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::{Mutex, RwLock};
use std::time::{Duration, Instant};

use chrono::Utc;
use lru::LruCache;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::EngramConfig;
use crate::contracts::{
    Embedder, EntityExtractor, ExtractedEntity, GraphStore, GraphTables, ProbabilisticEngine,
    VectorIndex,
};
use crate::error::{EngramError, Result};
use crate::fusion::FusionPipeline;
use crate::graph::{EdgeKind, GraphSnapshot, KnowledgeGraph};
use crate::lifecycle::{self, ChunkVitals, LifecycleStage};
use crate::memory::{
    Chunk, ChunkRegistry, Entity, LifecycleTag, QueryOptions, QueryResult, TierKind,
    cosine_similarity, is_finite_vector,
};
use crate::router::QueryRouter;
use crate::tiers::{
    HippoRagConfig, HippoRagTier, ProbabilisticTier, RecallRequest, RetrievalTier, VectorTier,
};
use crate::trace::{
    FailureKind, FailureRecord, FusedScore, OutcomeLabel, QueryTrace, QueryWarning, ReplayInputs,
    TraceStore, classify_failure,
};

// ============================================================================
// COLLABORATORS
// ============================================================================

/// External collaborators the engine consumes
#[derive(Clone)]
pub struct Collaborators {
    /// Named-entity extraction
    pub extractor: Arc<dyn EntityExtractor>,
    /// Text embedding
    pub embedder: Arc<dyn Embedder>,
    /// Similarity index
    pub vector_index: Arc<dyn VectorIndex>,
    /// Belief-network engine; queries degrade without one
    pub probabilistic: Option<Arc<dyn ProbabilisticEngine>>,
    /// Persistence behind the graph; in-memory only without one
    pub store: Option<Arc<dyn GraphStore>>,
}

// ============================================================================
// INPUT / OUTPUT TYPES
// ============================================================================

/// A chunk arriving from the external ingestion pipeline
#[derive(Debug, Clone)]
pub struct ChunkInput {
    /// Stable chunk id; generated when absent
    pub id: Option<String>,
    /// Chunk text
    pub text: String,
    /// Source note path
    pub source_path: String,
    /// Position within the source note
    pub chunk_index: u32,
    /// Embedding of dimension D
    pub embedding: Vec<f32>,
    /// Retention intent
    pub tag: LifecycleTag,
    /// Entities the extraction layer found in the chunk
    pub mentions: Vec<ExtractedEntity>,
}

/// Result of indexing one chunk
#[derive(Debug, Clone)]
pub struct IndexOutcome {
    /// The chunk's id
    pub chunk_id: String,
    /// False when the chunk was already indexed (no-op)
    pub created: bool,
    /// Mention edges linked
    pub mentions_linked: usize,
}

/// Report of one lifecycle sweep
#[derive(Debug, Clone, Default)]
pub struct SweepReport {
    /// Chunks examined
    pub examined: usize,
    /// Stage transitions applied
    pub transitions: usize,
    /// Chunk count per stage after the sweep
    pub per_stage: HashMap<LifecycleStage, usize>,
}

/// Diff between an original query and its replay
#[derive(Debug, Clone)]
pub struct ReplayDiff {
    /// Core ids and fused scores match exactly
    pub identical: bool,
    /// The graph changed since the original run; the replay is still
    /// valid but not expected to match
    pub non_deterministic: bool,
    /// Original core scores
    pub original: Vec<FusedScore>,
    /// Replayed core scores
    pub replayed: Vec<FusedScore>,
}

/// Replayed result plus its diff
#[derive(Debug, Clone)]
pub struct ReplayOutcome {
    /// The re-derived result
    pub result: QueryResult,
    /// Comparison with the original run
    pub diff: ReplayDiff,
}

/// Engine health counters
#[derive(Debug, Clone, Default)]
pub struct EngineStats {
    /// Chunks per lifecycle stage
    pub chunks_per_stage: HashMap<LifecycleStage, usize>,
    /// Entity node count
    pub entities: usize,
    /// Edge count per type
    pub edges_per_kind: HashMap<EdgeKind, usize>,
    /// Stored traces
    pub traces: usize,
}

// ============================================================================
// ENGINE
// ============================================================================

/// The long-term memory engine
pub struct MemoryEngine {
    config: EngramConfig,
    graph: RwLock<KnowledgeGraph>,
    registry: Arc<ChunkRegistry>,
    router: QueryRouter,
    pipeline: FusionPipeline,
    traces: TraceStore,
    extractor: Arc<dyn EntityExtractor>,
    embedder: Arc<dyn Embedder>,
    vector_tier: Arc<dyn RetrievalTier>,
    hipporag_tier: Arc<dyn RetrievalTier>,
    probabilistic_tier: Option<Arc<dyn RetrievalTier>>,
    store: Option<Arc<dyn GraphStore>>,
    query_cache: Mutex<LruCache<String, Vec<f32>>>,
}

impl MemoryEngine {
    /// Build an engine from configuration and collaborators. Hydrates
    /// the graph and registry from the store when one is provided.
    pub fn new(config: EngramConfig, collaborators: Collaborators) -> Result<Self> {
        config.validate()?;
        if collaborators.embedder.dimension() != config.embedding_dim {
            return Err(EngramError::InvalidInput(format!(
                "embedder dimension {} != configured {}",
                collaborators.embedder.dimension(),
                config.embedding_dim
            )));
        }

        let registry = Arc::new(ChunkRegistry::new());
        let mut graph = KnowledgeGraph::new();

        if let Some(store) = &collaborators.store {
            let tables = store
                .load()
                .map_err(|e| EngramError::TierUnavailable(e.to_string()))?;
            Self::hydrate(&mut graph, &registry, tables)?;
            info!(
                nodes = graph.node_count(),
                edges = graph.edge_count(),
                "graph hydrated from store"
            );
        }

        let pipeline = FusionPipeline::new(Arc::clone(&registry), config.fusion.clone())?;
        let hipporag_tier: Arc<dyn RetrievalTier> = Arc::new(HippoRagTier::new(
            Arc::clone(&registry),
            Arc::clone(&collaborators.embedder),
            HippoRagConfig {
                fuzzy_match_threshold: 0.85,
                ppr: config.ppr.clone(),
                synonymy: config.synonymy.clone(),
                multi_hop: config.multi_hop.clone(),
            },
        ));
        let vector_tier: Arc<dyn RetrievalTier> =
            Arc::new(VectorTier::new(Arc::clone(&collaborators.vector_index)));
        let probabilistic_tier: Option<Arc<dyn RetrievalTier>> =
            collaborators.probabilistic.as_ref().map(|engine| {
                Arc::new(ProbabilisticTier::new(
                    Arc::clone(engine),
                    Duration::from_millis(config.deadlines.prob_ms),
                )) as Arc<dyn RetrievalTier>
            });

        let cache_size =
            NonZeroUsize::new(config.query_cache_size).unwrap_or(NonZeroUsize::MIN);

        Ok(Self {
            graph: RwLock::new(graph),
            registry,
            router: QueryRouter::new(),
            pipeline,
            traces: TraceStore::new(),
            extractor: collaborators.extractor,
            embedder: collaborators.embedder,
            vector_tier,
            hipporag_tier,
            probabilistic_tier,
            store: collaborators.store,
            query_cache: Mutex::new(LruCache::new(cache_size)),
            config,
        })
    }

    fn hydrate(
        graph: &mut KnowledgeGraph,
        registry: &ChunkRegistry,
        tables: GraphTables,
    ) -> Result<()> {
        for entity in tables.entities {
            graph.add_entity(entity)?;
        }
        for chunk in tables.chunks {
            graph.add_chunk_node(&chunk.id)?;
            registry.insert(chunk)?;
        }
        for edge in tables.edges {
            graph.add_edge_named(&edge.src, &edge.dst, &edge.kind, edge.weight, edge.confidence)?;
        }
        Ok(())
    }

    /// Engine configuration
    pub fn config(&self) -> &EngramConfig {
        &self.config
    }

    fn graph_read(&self) -> Result<std::sync::RwLockReadGuard<'_, KnowledgeGraph>> {
        self.graph
            .read()
            .map_err(|_| EngramError::Internal("graph lock poisoned".into()))
    }

    fn graph_write(&self) -> Result<std::sync::RwLockWriteGuard<'_, KnowledgeGraph>> {
        self.graph
            .write()
            .map_err(|_| EngramError::Internal("graph lock poisoned".into()))
    }

    // ------------------------------------------------------------------
    // Ingestion surface
    // ------------------------------------------------------------------

    /// Index a chunk produced by the external ingestion pipeline.
    ///
    /// Validates the embedding, registers the chunk (Active,
    /// unverified), creates its graph node and one `mentions` edge per
    /// extracted entity. Indexing the same chunk twice is a no-op.
    pub fn index_chunk(&self, input: ChunkInput) -> Result<IndexOutcome> {
        if input.embedding.len() != self.config.embedding_dim {
            return Err(EngramError::InvalidInput(format!(
                "embedding dimension {} != configured {}",
                input.embedding.len(),
                self.config.embedding_dim
            )));
        }
        if !is_finite_vector(&input.embedding) {
            return Err(EngramError::InvalidInput(
                "embedding contains non-finite values".into(),
            ));
        }

        let chunk_id = input
            .id
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let mut chunk = Chunk::new(
            chunk_id.clone(),
            input.text,
            input.source_path,
            input.chunk_index,
            input.embedding,
        );
        chunk.tag = input.tag;

        let mut graph = self.graph_write()?;
        graph.add_chunk_node(&chunk_id)?;
        let created = self.registry.insert(chunk)?;

        let mut mentions_linked = 0;
        for mention in &input.mentions {
            let entity = Entity::from_surface(&mention.surface, mention.kind);
            if entity.id.is_empty() {
                continue;
            }
            let entity_id = entity.id.clone();
            graph.add_entity(entity)?;
            graph.add_edge(&entity_id, &chunk_id, EdgeKind::Mentions, 1.0, 1.0)?;
            mentions_linked += 1;
        }

        debug!(%chunk_id, created, mentions_linked, "chunk indexed");
        Ok(IndexOutcome {
            chunk_id,
            created,
            mentions_linked,
        })
    }

    /// Record an external access to a chunk and re-evaluate its stage
    pub fn record_access(&self, chunk_id: &str) -> Result<bool> {
        self.touch_chunk(chunk_id, Utc::now())
    }

    /// Bump access counters and re-run the lifecycle classifier. Every
    /// access path goes through here so the stage is re-evaluated on
    /// access, not only on sweeps.
    fn touch_chunk(&self, chunk_id: &str, now: chrono::DateTime<Utc>) -> Result<bool> {
        let policy = self.config.lifecycle.clone();
        self.registry.update(chunk_id, move |chunk| {
            chunk.record_access(now);
            let target = lifecycle::classify(&ChunkVitals::of(chunk), &policy, now);
            if let Some(next) = lifecycle::advance_toward(chunk.stage, target) {
                chunk.stage = next;
            }
        })
    }

    /// Explicitly park an archived chunk as rehydratable
    pub fn mark_rehydratable(&self, chunk_id: &str) -> Result<()> {
        let mut outcome = Ok(());
        let found = self.registry.update(chunk_id, |chunk| {
            if lifecycle::can_transition(chunk.stage, LifecycleStage::Rehydratable) {
                chunk.rehydratable_mark = true;
                chunk.stage = LifecycleStage::Rehydratable;
            } else {
                outcome = Err(EngramError::InvalidInput(format!(
                    "cannot mark {} rehydratable from stage {}",
                    chunk.id, chunk.stage
                )));
            }
        })?;
        if !found {
            return Err(EngramError::NotFound(chunk_id.to_string()));
        }
        outcome
    }

    /// Bring a rehydratable chunk back to Active
    pub fn rehydrate(&self, chunk_id: &str) -> Result<()> {
        let mut outcome = Ok(());
        let now = Utc::now();
        let found = self.registry.update(chunk_id, |chunk| {
            if chunk.stage == LifecycleStage::Rehydratable {
                chunk.rehydratable_mark = false;
                chunk.stage = LifecycleStage::Active;
                chunk.last_accessed = now;
            } else {
                outcome = Err(EngramError::InvalidInput(format!(
                    "chunk {} is not rehydratable",
                    chunk.id
                )));
            }
        })?;
        if !found {
            return Err(EngramError::NotFound(chunk_id.to_string()));
        }
        outcome
    }

    /// Re-classify every chunk, applying at most one forward step per
    /// chunk per sweep
    pub fn run_lifecycle_sweep(&self) -> Result<SweepReport> {
        let now = Utc::now();
        let policy = self.config.lifecycle.clone();
        let mut report = SweepReport::default();

        for chunk_id in self.registry.ids_sorted()? {
            report.examined += 1;
            let mut stepped = false;
            self.registry.update(&chunk_id, |chunk| {
                let target = lifecycle::classify(&ChunkVitals::of(chunk), &policy, now);
                if let Some(next) = lifecycle::advance_toward(chunk.stage, target) {
                    chunk.stage = next;
                    stepped = true;
                }
            })?;
            if stepped {
                report.transitions += 1;
            }
        }

        report.per_stage = self.registry.stage_counts()?;
        info!(
            examined = report.examined,
            transitions = report.transitions,
            "lifecycle sweep complete"
        );
        Ok(report)
    }

    /// Batch job creating `similar_to` edges between entities whose
    /// display embeddings pass the similarity floor. Returns edges
    /// written. Idempotent: re-running upserts the same edges.
    pub async fn link_synonyms(&self) -> Result<usize> {
        let entities = self.graph_read()?.entities();
        if entities.len() < 2 {
            return Ok(0);
        }

        let mut embeddings = Vec::with_capacity(entities.len());
        for entity in &entities {
            match self.embedder.encode(&entity.display).await {
                Ok(vector) => embeddings.push(Some(vector)),
                Err(err) => {
                    warn!(entity = %entity.id, error = %err, "synonymy embedding failed");
                    embeddings.push(None);
                }
            }
        }

        let floor = self.config.synonymy.min_similarity;
        let fan_out = self.config.synonymy.max_expand;
        let mut written = 0;

        for (i, source) in entities.iter().enumerate() {
            let Some(source_vec) = &embeddings[i] else {
                continue;
            };
            let mut matches: Vec<(usize, f32)> = Vec::new();
            for (j, target_vec) in embeddings.iter().enumerate() {
                if i == j {
                    continue;
                }
                let Some(target_vec) = target_vec else {
                    continue;
                };
                let similarity = cosine_similarity(source_vec, target_vec);
                if similarity >= floor {
                    matches.push((j, similarity));
                }
            }
            matches.sort_by(|a, b| {
                b.1.partial_cmp(&a.1)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| entities[a.0].id.cmp(&entities[b.0].id))
            });

            let mut graph = self.graph_write()?;
            for (j, similarity) in matches.into_iter().take(fan_out) {
                graph.add_edge(
                    &source.id,
                    &entities[j].id,
                    EdgeKind::SimilarTo,
                    similarity.clamp(0.0, 1.0),
                    1.0,
                )?;
                written += 1;
            }
        }

        info!(written, "synonymy batch complete");
        Ok(written)
    }

    /// Write path for the external consolidation pipeline: insert or
    /// update a typed relation between entities. Unknown type names
    /// fail loudly with `InvalidEdgeType`.
    pub fn add_relation(
        &self,
        src: &str,
        dst: &str,
        kind: &str,
        weight: f32,
        confidence: f32,
    ) -> Result<crate::graph::EdgeUpsert> {
        Ok(self
            .graph_write()?
            .add_edge_named(src, dst, kind, weight, confidence)?)
    }

    /// Merge a duplicate entity into its canonical node
    pub fn consolidate_entities(&self, duplicate: &str, canonical: &str) -> Result<usize> {
        Ok(self.graph_write()?.consolidate_entities(duplicate, canonical)?)
    }

    /// Engine health counters
    pub fn stats(&self) -> Result<EngineStats> {
        let graph = self.graph_read()?;
        Ok(EngineStats {
            chunks_per_stage: self.registry.stage_counts()?,
            entities: graph.entity_count(),
            edges_per_kind: graph.edge_counts_by_kind(),
            traces: self.traces.len()?,
        })
    }

    /// Persist the graph and registry through the configured store
    pub fn save(&self) -> Result<()> {
        let Some(store) = &self.store else {
            return Err(EngramError::TierUnavailable("no graph store configured".into()));
        };
        let graph = self.graph_read()?;
        let mut chunks = Vec::new();
        for id in self.registry.ids_sorted()? {
            if let Some(chunk) = self.registry.get(&id)? {
                chunks.push(chunk);
            }
        }
        let mut edges = Vec::new();
        for entity in graph.entities() {
            for (dst, edge) in graph.neighbors(&entity.id, None)? {
                edges.push(crate::contracts::EdgeRecord {
                    src: entity.id.clone(),
                    dst,
                    kind: edge.kind.as_str().to_string(),
                    weight: edge.weight,
                    confidence: edge.confidence,
                });
            }
        }
        let tables = GraphTables {
            entities: graph.entities(),
            chunks,
            edges,
        };
        store
            .save(&tables)
            .map_err(|e| EngramError::TierUnavailable(e.to_string()))
    }

    // ------------------------------------------------------------------
    // Query surface
    // ------------------------------------------------------------------

    /// Answer a query with a curated, budgeted context
    pub async fn query(&self, text: &str, options: QueryOptions) -> Result<QueryResult> {
        if text.trim().is_empty() {
            return Err(EngramError::InvalidInput("empty query".into()));
        }

        let mode_overridden = options.mode.is_some();
        let mode = options.mode.unwrap_or_else(|| self.router.detect_mode(text));
        let mut plan = self.router.route(text, mode);
        if let Some(tiers) = &options.tiers {
            plan.tiers = tiers.clone();
            plan.tiers.sort();
            plan.tiers.dedup();
            plan.rule = "caller_override".to_string();
        }

        let mut trace = QueryTrace::begin(text, mode, mode_overridden, plan.clone());
        debug!(trace_id = %trace.id, %mode, rule = %plan.rule, "query received");

        if plan.prob_dropped_by_mode {
            trace.warn(QueryWarning::ProbSkippedByMode);
        }
        if plan.annotation.is_some() {
            trace.warn(QueryWarning::RoutedElsewhere);
        }

        let top_k = options.top_k.unwrap_or(self.config.fusion.core_size);
        let token_budget = options.token_budget.unwrap_or(self.config.fusion.token_budget);
        let deadline_ms = options.deadline_ms.unwrap_or(self.config.deadlines.query_ms);
        let deadline = Instant::now() + Duration::from_millis(deadline_ms);

        // Entity extraction; failures degrade the graph tiers, they
        // don't fail the query
        let entities = match self.extractor.extract(text).await {
            Ok(entities) => entities,
            Err(err) => {
                warn!(error = %err, "entity extraction failed");
                trace.warn(QueryWarning::ExtractionFailed);
                Vec::new()
            }
        };

        let embedding = if plan.includes(TierKind::Vector) {
            self.query_embedding(text, &mut trace).await?
        } else {
            None
        };

        trace.replay = ReplayInputs {
            entities: entities.clone(),
            embedding: embedding.clone(),
            top_k,
            token_budget,
            deadline_ms,
        };

        let snapshot = self.graph_read()?.snapshot();
        trace.snapshot_epoch = snapshot.epoch();

        let result = self
            .run_pipeline(
                &plan.tiers,
                snapshot,
                text,
                embedding,
                entities,
                plan.multi_hop,
                mode,
                top_k,
                token_budget,
                deadline,
                &mut trace,
            )
            .await;

        match result {
            Ok(result) => {
                trace.seal();
                self.traces.put(trace)?;
                Ok(result)
            }
            Err(err) => {
                trace.failure = Some(FailureRecord {
                    stage: match &err {
                        EngramError::PipelineError { stage, .. } => Some(*stage),
                        _ => None,
                    },
                    kind: err.kind().to_string(),
                    message: err.to_string(),
                });
                trace.seal();
                self.traces.put(trace)?;
                Err(err)
            }
        }
    }

    async fn query_embedding(
        &self,
        text: &str,
        trace: &mut QueryTrace,
    ) -> Result<Option<Vec<f32>>> {
        if let Ok(mut cache) = self.query_cache.lock() {
            if let Some(hit) = cache.get(text) {
                return Ok(Some(hit.clone()));
            }
        }
        match self.embedder.encode(text).await {
            Ok(vector) => {
                if !is_finite_vector(&vector) {
                    return Err(EngramError::InvalidInput(
                        "query embedding contains non-finite values".into(),
                    ));
                }
                if vector.len() != self.config.embedding_dim {
                    return Err(EngramError::InvalidInput(format!(
                        "query embedding dimension {} != configured {}",
                        vector.len(),
                        self.config.embedding_dim
                    )));
                }
                if let Ok(mut cache) = self.query_cache.lock() {
                    cache.put(text.to_string(), vector.clone());
                }
                Ok(Some(vector))
            }
            Err(err) => {
                warn!(error = %err, "query embedding failed");
                trace.warn(QueryWarning::EmbeddingUnavailable);
                Ok(None)
            }
        }
    }

    fn tiers_for(&self, plan_tiers: &[TierKind], trace: &mut QueryTrace) -> Vec<Arc<dyn RetrievalTier>> {
        let mut tiers: Vec<Arc<dyn RetrievalTier>> = Vec::new();
        for kind in plan_tiers {
            match kind {
                TierKind::Vector => tiers.push(Arc::clone(&self.vector_tier)),
                TierKind::HippoRag => tiers.push(Arc::clone(&self.hipporag_tier)),
                TierKind::Probabilistic => match &self.probabilistic_tier {
                    Some(tier) => tiers.push(Arc::clone(tier)),
                    None => {
                        trace.warn(QueryWarning::TierUnavailable(TierKind::Probabilistic));
                    }
                },
            }
        }
        tiers
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_pipeline(
        &self,
        plan_tiers: &[TierKind],
        snapshot: GraphSnapshot,
        query: &str,
        embedding: Option<Vec<f32>>,
        entities: Vec<ExtractedEntity>,
        multi_hop: bool,
        mode: crate::router::QueryMode,
        top_k: usize,
        token_budget: usize,
        deadline: Instant,
        trace: &mut QueryTrace,
    ) -> Result<QueryResult> {
        let tiers = self.tiers_for(plan_tiers, trace);

        let context = if tiers.is_empty() {
            crate::fusion::CuratedContext::default()
        } else {
            let request = Arc::new(RecallRequest {
                query: query.to_string(),
                embedding,
                entities,
                multi_hop,
                limit: self.config.fusion.recall_width,
                snapshot,
            });
            self.pipeline
                .run(&tiers, request, mode, top_k, token_budget, deadline, trace)
                .await?
        };

        let now = Utc::now();
        let core_ids: Vec<String> = context.core.iter().map(|r| r.chunk_id.clone()).collect();
        let extended_ids: Vec<String> =
            context.extended.iter().map(|r| r.chunk_id.clone()).collect();
        // Returning a chunk counts as an access: counters are bumped
        // and the lifecycle classifier re-evaluates the stage
        for chunk_id in &core_ids {
            self.touch_chunk(chunk_id, now)?;
        }

        Ok(QueryResult {
            core: self.registry.get_many(&core_ids)?,
            extended: self.registry.get_many(&extended_ids)?,
            trace_id: trace.id,
            warnings: trace.warnings.clone(),
        })
    }

    // ------------------------------------------------------------------
    // Trace surface
    // ------------------------------------------------------------------

    /// Fetch the stored trace for a query
    pub fn explain(&self, trace_id: Uuid) -> Result<QueryTrace> {
        self.traces.get(trace_id)
    }

    /// Re-run a stored query against the current graph and diff the
    /// outcome against the original. Replays on a changed snapshot are
    /// marked non-deterministic and still succeed.
    pub async fn replay(&self, trace_id: Uuid) -> Result<ReplayOutcome> {
        let original = self.traces.get(trace_id)?;
        let snapshot = self.graph_read()?.snapshot();
        let non_deterministic = snapshot.epoch() != original.snapshot_epoch;

        let mut trace = QueryTrace::begin(
            &original.query,
            original.mode,
            original.mode_overridden,
            original.plan.clone(),
        );
        trace.snapshot_epoch = snapshot.epoch();
        trace.replay = original.replay.clone();

        let deadline =
            Instant::now() + Duration::from_millis(original.replay.deadline_ms.max(1));
        let plan_tiers = original.plan.tiers.clone();
        let result = self
            .run_pipeline(
                &plan_tiers,
                snapshot,
                &original.query,
                original.replay.embedding.clone(),
                original.replay.entities.clone(),
                original.plan.multi_hop,
                original.mode,
                original.replay.top_k,
                original.replay.token_budget,
                deadline,
                &mut trace,
            )
            .await?;

        trace.seal();
        let replayed = trace.fused_core.clone();
        self.traces.put(trace)?;

        Ok(ReplayOutcome {
            diff: ReplayDiff {
                identical: replayed == original.fused_core,
                non_deterministic,
                original: original.fused_core,
                replayed,
            },
            result,
        })
    }

    /// Classify a failed query from its trace and an outcome label
    pub fn classify_failure(&self, trace_id: Uuid, label: OutcomeLabel) -> Result<FailureKind> {
        let trace = self.traces.get(trace_id)?;
        Ok(classify_failure(&trace, label))
    }
}

// ============================================================================
// TESTS
// ============================================================================
