//! Deterministic mock collaborators
//!
//! Every mock is scripted and deterministic:
//! - `TableEmbedder`: fixed vectors per text, hash-derived fallback
//!   that never resembles a scripted vector, optional per-text delay
//! - `TableExtractor`: substring NER over a fixed surface table
//! - `MemoryVectorIndex`: brute-force cosine over an in-memory table
//!   with lifecycle stages
//! - `ScriptedBayes`: fixed belief scores, optional latency or timeout

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use engram_core::{
    BeliefScore, Collaborators, ContractError, ContractResult, Embedder, EntityExtractor,
    EntityKind, ExtractedEntity, LifecycleStage, ProbabilisticEngine, VectorIndex,
    cosine_similarity,
};

/// Embedding dimension used across the e2e suites
pub const DIM: usize = 8;

/// Pad a short vector to [`DIM`] components
pub fn vec_of(components: &[f32]) -> Vec<f32> {
    let mut v = components.to_vec();
    v.resize(DIM, 0.0);
    v
}

// ============================================================================
// EMBEDDER
// ============================================================================

/// Scripted embedder. Unscripted text embeds to a centered hash
/// vector, which is dissimilar to every scripted vector in practice.
#[derive(Default)]
pub struct TableEmbedder {
    vectors: HashMap<String, Vec<f32>>,
    delays: HashMap<String, Duration>,
}

impl TableEmbedder {
    /// Empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Script a vector for a text
    pub fn with_entry(mut self, text: &str, components: &[f32]) -> Self {
        self.vectors.insert(text.to_string(), vec_of(components));
        self
    }

    /// Make encoding a specific text slow
    pub fn with_delay(mut self, text: &str, delay: Duration) -> Self {
        self.delays.insert(text.to_string(), delay);
        self
    }

    fn hashed(text: &str) -> Vec<f32> {
        use std::hash::{Hash, Hasher};
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        text.hash(&mut hasher);
        let bits = hasher.finish();
        (0..DIM)
            .map(|i| ((bits >> (8 * i)) & 0xFF) as f32 - 127.5)
            .collect()
    }
}

#[async_trait]
impl Embedder for TableEmbedder {
    async fn encode(&self, text: &str) -> ContractResult<Vec<f32>> {
        if let Some(delay) = self.delays.get(text) {
            tokio::time::sleep(*delay).await;
        }
        Ok(self
            .vectors
            .get(text)
            .cloned()
            .unwrap_or_else(|| Self::hashed(text)))
    }

    fn dimension(&self) -> usize {
        DIM
    }
}

// ============================================================================
// EXTRACTOR
// ============================================================================

/// NER over a fixed surface table: any configured surface contained in
/// the text (case-insensitive) is reported once
pub struct TableExtractor {
    surfaces: Vec<(String, EntityKind)>,
}

impl TableExtractor {
    /// Build from (surface, kind) pairs
    pub fn new(surfaces: &[(&str, EntityKind)]) -> Self {
        Self {
            surfaces: surfaces
                .iter()
                .map(|(surface, kind)| (surface.to_string(), *kind))
                .collect(),
        }
    }
}

#[async_trait]
impl EntityExtractor for TableExtractor {
    async fn extract(&self, text: &str) -> ContractResult<Vec<ExtractedEntity>> {
        let lowered = text.to_lowercase();
        Ok(self
            .surfaces
            .iter()
            .filter(|(surface, _)| lowered.contains(&surface.to_lowercase()))
            .map(|(surface, kind)| ExtractedEntity {
                surface: surface.clone(),
                kind: *kind,
            })
            .collect())
    }
}

// ============================================================================
// VECTOR INDEX
// ============================================================================

/// Brute-force in-memory vector index with lifecycle stages
#[derive(Default)]
pub struct MemoryVectorIndex {
    rows: Mutex<HashMap<String, (Vec<f32>, LifecycleStage)>>,
}

impl MemoryVectorIndex {
    /// Empty index
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a chunk row (stage defaults to Active)
    pub fn add(&self, chunk_id: &str, embedding: Vec<f32>) {
        self.rows
            .lock()
            .expect("index mutex")
            .insert(chunk_id.to_string(), (embedding, LifecycleStage::Active));
    }

    /// Update a row's lifecycle stage
    pub fn set_stage(&self, chunk_id: &str, stage: LifecycleStage) {
        if let Some(row) = self.rows.lock().expect("index mutex").get_mut(chunk_id) {
            row.1 = stage;
        }
    }
}

#[async_trait]
impl VectorIndex for MemoryVectorIndex {
    async fn similar(
        &self,
        query: &[f32],
        k: usize,
        lifecycle_filter: &[LifecycleStage],
    ) -> ContractResult<Vec<(String, f32)>> {
        let rows = self.rows.lock().map_err(|_| {
            ContractError::Backend("index mutex poisoned".into())
        })?;
        let mut hits: Vec<(String, f32)> = rows
            .iter()
            .filter(|(_, (_, stage))| lifecycle_filter.contains(stage))
            .map(|(id, (embedding, _))| (id.clone(), cosine_similarity(query, embedding)))
            .collect();
        hits.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        hits.truncate(k);
        Ok(hits)
    }

    async fn get_embedding(&self, chunk_id: &str) -> ContractResult<Option<Vec<f32>>> {
        let rows = self.rows.lock().map_err(|_| {
            ContractError::Backend("index mutex poisoned".into())
        })?;
        Ok(rows.get(chunk_id).map(|(embedding, _)| embedding.clone()))
    }
}

// ============================================================================
// BELIEF NETWORK
// ============================================================================

/// Scripted belief-network engine
#[derive(Default)]
pub struct ScriptedBayes {
    scores: Vec<BeliefScore>,
    delay: Option<Duration>,
    always_times_out: bool,
}

impl ScriptedBayes {
    /// Engine returning nothing
    pub fn new() -> Self {
        Self::default()
    }

    /// Script the returned scores
    pub fn with_scores(mut self, scores: Vec<(&str, f32, f32)>) -> Self {
        self.scores = scores
            .into_iter()
            .map(|(chunk_id, probability, entropy)| BeliefScore {
                chunk_id: chunk_id.to_string(),
                probability,
                entropy,
            })
            .collect();
        self
    }

    /// Delay each call
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Always report a timeout
    pub fn timing_out(mut self) -> Self {
        self.always_times_out = true;
        self
    }
}

#[async_trait]
impl ProbabilisticEngine for ScriptedBayes {
    async fn infer(
        &self,
        _query_entities: &[String],
        _deadline: Duration,
    ) -> ContractResult<Vec<BeliefScore>> {
        if self.always_times_out {
            return Err(ContractError::Timeout);
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        Ok(self.scores.clone())
    }
}

// ============================================================================
// WIRING
// ============================================================================

/// Bundle mocks into the engine's collaborator set
pub fn collaborators(
    extractor: TableExtractor,
    embedder: TableEmbedder,
    index: Arc<MemoryVectorIndex>,
    bayes: Option<ScriptedBayes>,
) -> Collaborators {
    Collaborators {
        extractor: Arc::new(extractor),
        embedder: Arc::new(embedder),
        vector_index: index,
        probabilistic: bayes.map(|b| Arc::new(b) as Arc<dyn ProbabilisticEngine>),
        store: None,
    }
}
