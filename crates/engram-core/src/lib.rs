//! # Engram Core
//!
//! Long-term memory engine for a local knowledge vault. Text chunks
//! are indexed across complementary stores and queries are answered by
//! assembling a small, high-signal context window:
//!
//! - **Knowledge graph**: entity/chunk graph with typed weighted
//!   edges, built from mentions and consolidation
//! - **HippoRAG retrieval**: Personalized PageRank over the entity
//!   graph, with synonymy expansion and cycle-safe multi-hop search
//!   (Gutiérrez et al., 2024, modeled on hippocampal indexing theory)
//! - **Fusion pipeline**: recall → filter → deduplicate → rank →
//!   compress, under a hard token budget and a per-query deadline
//! - **Lifecycle staging**: Active/Demoted/Archived/Rehydratable
//!   stages decide which indexes cover a chunk
//! - **Query traces**: every query is replayable and failures are
//!   classified into context / model / system bugs
//!
//! The crate is library-shaped. Chunking, NER, embedding, the vector
//! index, the belief network and persistence are consumed through the
//! [`contracts`] traits; the hosting application drives everything
//! through [`MemoryEngine`].
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use engram_core::{ChunkInput, Collaborators, EngramConfig, MemoryEngine, QueryOptions};
//!
//! let engine = MemoryEngine::new(EngramConfig::default(), collaborators)?;
//!
//! // Index a chunk produced by the external ingestion pipeline
//! engine.index_chunk(ChunkInput {
//!     id: Some("note-7#2".into()),
//!     text: "Tesla was founded in 2003".into(),
//!     ..chunk
//! })?;
//!
//! // Ask a question
//! let result = engine.query("What about Tesla?", QueryOptions::default()).await?;
//! let trace = engine.explain(result.trace_id)?;
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
// Only warn about missing docs for public items exported from the crate root
#![warn(rustdoc::missing_crate_level_docs)]

// ============================================================================
// MODULES
// ============================================================================

pub mod config;
pub mod contracts;
pub mod engine;
pub mod error;
pub mod fusion;
pub mod graph;
pub mod lifecycle;
pub mod memory;
pub mod router;
pub mod tiers;
pub mod trace;

// ============================================================================
// PUBLIC API RE-EXPORTS
// ============================================================================

// Configuration
pub use config::{
    DeadlineConfig, EngramConfig, FilterFloors, FusionConfig, LifecyclePolicy, MultiHopConfig,
    PprConfig, RankWeights, SynonymyConfig,
};

// Errors
pub use error::{EngramError, Result};

// Memory types
pub use memory::{
    Chunk, ChunkRegistry, Entity, EntityKind, LifecycleTag, QueryOptions, QueryResult,
    RetrievalResult, TierKind, TierScores, cosine_similarity, normalize_entity_id,
};

// Lifecycle
pub use lifecycle::{
    ChunkVitals, IndexCoverage, LifecycleStage, classify, indexing_strategy,
};

// Knowledge graph + query engine
pub use graph::{
    EdgeKind, EdgeUpsert, GraphEdge, GraphError, GraphSnapshot, HopDiscovery, KnowledgeGraph,
    PprScores, expand_synonyms, multi_hop, personalized_pagerank, rank_chunks,
};

// External contracts
pub use contracts::{
    BeliefScore, ContractError, ContractResult, EdgeRecord, Embedder, EntityExtractor,
    ExtractedEntity, GraphStore, GraphTables, ProbabilisticEngine, VectorIndex,
};

// Tiers
pub use tiers::{
    HippoRagConfig, HippoRagTier, ProbabilisticTier, RecallRequest, RetrievalTier, TierCandidate,
    TierRecall, VectorTier,
};

// Router
pub use router::{QueryMode, QueryRouter, RoutedElsewhere, TierPlan};

// Fusion pipeline
pub use fusion::{CuratedContext, FusionPipeline, StageName, TokenCounter};

// Traces + attribution
pub use trace::{
    ContextBugKind, FailureKind, FailureRecord, FusedScore, OutcomeLabel, QueryTrace,
    QueryWarning, ReplayInputs, StageRecord, TierRun, TraceStore, classify_failure,
};

// Engine facade
pub use engine::{
    ChunkInput, Collaborators, EngineStats, IndexOutcome, MemoryEngine, ReplayDiff,
    ReplayOutcome, SweepReport,
};

// ============================================================================
// VERSION INFO
// ============================================================================

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// ============================================================================
// PRELUDE
// ============================================================================

/// Convenient imports for common usage
pub mod prelude {
    pub use crate::{
        Chunk, ChunkInput, Collaborators, EngramConfig, EngramError, LifecycleStage,
        LifecycleTag, MemoryEngine, QueryMode, QueryOptions, QueryResult, Result, TierKind,
    };

    pub use crate::{
        Embedder, EntityExtractor, ExtractedEntity, GraphStore, ProbabilisticEngine, VectorIndex,
    };

    pub use crate::{
        EdgeKind, KnowledgeGraph, OutcomeLabel, QueryTrace, TierPlan,
    };
}
