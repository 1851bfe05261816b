//! External collaborator contracts
//!
//! The core is library-shaped: chunking, entity extraction, embedding,
//! the vector index, the belief-network engine and persistence all live
//! outside it. This module pins the contracts the core consumes.
//! Swapping one backend for another is a constructor argument, not a
//! code change.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::lifecycle::LifecycleStage;
use crate::memory::{Chunk, Entity, EntityKind};

// ============================================================================
// ERRORS
// ============================================================================

/// Errors raised by external collaborators
#[non_exhaustive]
#[derive(Debug, Clone, thiserror::Error)]
pub enum ContractError {
    /// The collaborator refused the call or is not reachable
    #[error("collaborator unavailable: {0}")]
    Unavailable(String),
    /// The collaborator exceeded its deadline
    #[error("collaborator timed out")]
    Timeout,
    /// Backend-specific failure
    #[error("collaborator failed: {0}")]
    Backend(String),
    /// Vector of the wrong dimension crossed the boundary
    #[error("dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch {
        /// Expected dimension D
        expected: usize,
        /// Observed dimension
        got: usize,
    },
}

/// Contract result type
pub type ContractResult<T> = std::result::Result<T, ContractError>;

// ============================================================================
// ENTITY EXTRACTION
// ============================================================================

/// An entity surface form found in text
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractedEntity {
    /// Surface string as it appeared
    pub surface: String,
    /// Coarse type
    pub kind: EntityKind,
}

/// Named-entity extraction over query and chunk text
#[async_trait]
pub trait EntityExtractor: Send + Sync {
    /// Extract entity surface forms from `text`
    async fn extract(&self, text: &str) -> ContractResult<Vec<ExtractedEntity>>;
}

// ============================================================================
// EMBEDDING
// ============================================================================

/// Text embedding with L2-normalized outputs of fixed dimension D
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Encode `text` into a vector of dimension D
    async fn encode(&self, text: &str) -> ContractResult<Vec<f32>>;

    /// The dimension D this embedder produces
    fn dimension(&self) -> usize;
}

// ============================================================================
// VECTOR INDEX
// ============================================================================

/// External similarity index over chunk embeddings
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Nearest chunks by cosine similarity, restricted to the given
    /// lifecycle stages. Similarities are already normalized to [0,1].
    async fn similar(
        &self,
        query: &[f32],
        k: usize,
        lifecycle_filter: &[LifecycleStage],
    ) -> ContractResult<Vec<(String, f32)>>;

    /// Stored embedding of a chunk, if indexed
    async fn get_embedding(&self, chunk_id: &str) -> ContractResult<Option<Vec<f32>>>;
}

// ============================================================================
// PROBABILISTIC ENGINE
// ============================================================================

/// A chunk scored by the belief network
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BeliefScore {
    /// Scored chunk
    pub chunk_id: String,
    /// Posterior probability of relevance
    pub probability: f32,
    /// Entropy of the posterior, for downstream calibration
    pub entropy: f32,
}

/// External belief-network inference engine
#[async_trait]
pub trait ProbabilisticEngine: Send + Sync {
    /// Infer chunk relevance from query entities. Implementations are
    /// expected to respect `deadline` and return
    /// [`ContractError::Timeout`] when they cannot.
    async fn infer(
        &self,
        query_entities: &[String],
        deadline: std::time::Duration,
    ) -> ContractResult<Vec<BeliefScore>>;
}

// ============================================================================
// PERSISTENCE
// ============================================================================

/// Serialized edge row at the persistence boundary. The type travels
/// as a string and is parsed loudly on load.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EdgeRecord {
    /// Source node id
    pub src: String,
    /// Target node id
    pub dst: String,
    /// Edge type name
    pub kind: String,
    /// Weight in [0,1]
    pub weight: f32,
    /// Confidence in [0,1]
    pub confidence: f32,
}

/// Node and edge tables as loaded from / handed to persistence
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphTables {
    /// Entity rows
    pub entities: Vec<Entity>,
    /// Chunk rows (full metadata; the registry is hydrated from these)
    pub chunks: Vec<Chunk>,
    /// Edge rows
    pub edges: Vec<EdgeRecord>,
}

/// Persistence layer behind the knowledge graph
pub trait GraphStore: Send + Sync {
    /// Load the node and edge tables
    fn load(&self) -> ContractResult<GraphTables>;

    /// Persist the node and edge tables
    fn save(&self, tables: &GraphTables) -> ContractResult<()>;
}
