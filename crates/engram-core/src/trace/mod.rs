//! # Query Trace
//!
//! Every query produces a structured trace: the routed plan, per-tier
//! latency and candidate counts, per-stage cardinalities, the fused
//! scores of the final core and the inputs needed to re-derive the
//! answer. Traces feed `explain`, deterministic `replay` and the
//! failure-attribution classifier.
//!
//! The store is append-only with one writer per trace id; readers may
//! follow at any time.

mod attribution;

pub use attribution::{ContextBugKind, FailureKind, OutcomeLabel, classify_failure};

use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::contracts::ExtractedEntity;
use crate::error::{EngramError, Result};
use crate::fusion::StageName;
use crate::memory::TierKind;
use crate::router::{QueryMode, TierPlan};

// ============================================================================
// WARNINGS
// ============================================================================

/// Degraded conditions surfaced to the caller without changing success
/// semantics
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryWarning {
    /// The execution-mode override removed the probabilistic tier
    ProbSkippedByMode,
    /// Every recalled candidate fell below its tier floor
    AllFiltered,
    /// The core alone exceeded the token budget and was truncated
    CoreTruncated,
    /// The query deadline expired mid-pipeline
    DeadlineExceeded,
    /// PageRank hit its iteration cap before the tolerance
    PprNotConverged,
    /// A planned tier was not configured or refused the call
    TierUnavailable(TierKind),
    /// A planned tier exceeded its per-call budget
    TierTimeout(TierKind),
    /// The graph tier found no entity to seed from
    NoGraphEntities,
    /// The query belongs to a surface outside this core
    RoutedElsewhere,
    /// Entity extraction failed; graph tier ran without seeds
    ExtractionFailed,
    /// Query embedding unavailable; vector tier skipped
    EmbeddingUnavailable,
}

impl QueryWarning {
    /// Stable machine-readable code
    pub fn code(&self) -> String {
        match self {
            QueryWarning::ProbSkippedByMode => "prob_skipped_by_mode".into(),
            QueryWarning::AllFiltered => "all_filtered".into(),
            QueryWarning::CoreTruncated => "core_truncated".into(),
            QueryWarning::DeadlineExceeded => "deadline_exceeded".into(),
            QueryWarning::PprNotConverged => "ppr_not_converged".into(),
            QueryWarning::TierUnavailable(tier) => format!("tier_unavailable:{tier}"),
            QueryWarning::TierTimeout(tier) => format!("tier_timeout:{tier}"),
            QueryWarning::NoGraphEntities => "no_graph_entities".into(),
            QueryWarning::RoutedElsewhere => "routed_elsewhere".into(),
            QueryWarning::ExtractionFailed => "extraction_failed".into(),
            QueryWarning::EmbeddingUnavailable => "embedding_unavailable".into(),
        }
    }
}

impl std::fmt::Display for QueryWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.code())
    }
}

// ============================================================================
// TRACE RECORDS
// ============================================================================

/// One tier invocation during recall
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TierRun {
    /// Which tier ran
    pub tier: TierKind,
    /// Wall-clock latency of the call, milliseconds
    pub latency_ms: u64,
    /// Candidates returned (zero for absorbed failures)
    pub candidates: usize,
    /// The call exceeded its per-call budget and was cancelled
    pub timed_out: bool,
    /// The backing collaborator refused or is not configured
    pub unavailable: bool,
    /// Graph tier only: whether PageRank converged
    #[serde(skip_serializing_if = "Option::is_none")]
    pub converged: Option<bool>,
}

/// Cardinality emitted by one pipeline stage
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageRecord {
    /// The stage
    pub stage: StageName,
    /// Candidates emitted by the stage
    pub emitted: usize,
}

/// Fused score of a core result
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FusedScore {
    /// Chunk id
    pub chunk_id: String,
    /// Fused score after rank fusion
    pub score: f32,
}

/// Inputs stored for deterministic replay
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplayInputs {
    /// Entities extracted from the query
    pub entities: Vec<ExtractedEntity>,
    /// Query embedding, when one was computed
    pub embedding: Option<Vec<f32>>,
    /// Effective core size cap
    pub top_k: usize,
    /// Effective token budget
    pub token_budget: usize,
    /// Effective query deadline, milliseconds
    pub deadline_ms: u64,
}

/// Failure captured by a trace
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureRecord {
    /// Stage where the failure surfaced, when attributable
    pub stage: Option<StageName>,
    /// Machine-readable error kind
    pub kind: String,
    /// Human-readable message
    pub message: String,
}

/// Structured record of one query's path through the engine
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryTrace {
    /// Trace id
    pub id: Uuid,
    /// When the query arrived
    pub timestamp: DateTime<Utc>,
    /// Raw query text
    pub query: String,
    /// Mode the query ran under
    pub mode: QueryMode,
    /// Whether the mode came from a caller override
    pub mode_overridden: bool,
    /// The routed plan
    pub plan: TierPlan,
    /// Per-tier invocations
    pub tier_runs: Vec<TierRun>,
    /// Cardinality after each pipeline stage, in order
    pub stages: Vec<StageRecord>,
    /// Near-duplicates removed in the dedup stage
    pub dedup_removed: usize,
    /// Fused scores of the final core, in rank order
    pub fused_core: Vec<FusedScore>,
    /// Degraded conditions observed
    pub warnings: Vec<QueryWarning>,
    /// The query deadline expired mid-pipeline
    pub deadline_exceeded: bool,
    /// The core alone exceeded the budget and was cut
    pub core_truncated: bool,
    /// Graph epoch the query ran against
    pub snapshot_epoch: u64,
    /// Inputs needed to re-derive the answer
    pub replay: ReplayInputs,
    /// Fingerprint of the final output
    pub fingerprint: String,
    /// Set when the query failed
    pub failure: Option<FailureRecord>,
}

impl QueryTrace {
    /// Start a trace for an incoming query
    pub fn begin(query: &str, mode: QueryMode, mode_overridden: bool, plan: TierPlan) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            query: query.to_string(),
            mode,
            mode_overridden,
            plan,
            tier_runs: Vec::new(),
            stages: Vec::new(),
            dedup_removed: 0,
            fused_core: Vec::new(),
            warnings: Vec::new(),
            deadline_exceeded: false,
            core_truncated: false,
            snapshot_epoch: 0,
            replay: ReplayInputs::default(),
            fingerprint: String::new(),
            failure: None,
        }
    }

    /// Add a warning once
    pub fn warn(&mut self, warning: QueryWarning) {
        if !self.warnings.contains(&warning) {
            self.warnings.push(warning);
        }
    }

    /// Record a stage's output cardinality
    pub fn record_stage(&mut self, stage: StageName, emitted: usize) {
        self.stages.push(StageRecord { stage, emitted });
    }

    /// Cardinality a stage emitted, if it ran
    pub fn stage_emitted(&self, stage: StageName) -> Option<usize> {
        self.stages
            .iter()
            .find(|record| record.stage == stage)
            .map(|record| record.emitted)
    }

    /// The run record for a tier, if it ran
    pub fn tier_run(&self, tier: TierKind) -> Option<&TierRun> {
        self.tier_runs.iter().find(|run| run.tier == tier)
    }

    /// Fingerprint the final core for replay comparison
    pub fn seal(&mut self) {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        for fused in &self.fused_core {
            fused.chunk_id.hash(&mut hasher);
            fused.score.to_bits().hash(&mut hasher);
        }
        self.fingerprint = format!("{:016x}", hasher.finish());
    }
}

// ============================================================================
// TRACE STORE
// ============================================================================

/// Append-only in-memory trace store
#[derive(Debug, Default)]
pub struct TraceStore {
    traces: RwLock<HashMap<Uuid, QueryTrace>>,
}

impl TraceStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Persist a trace. The same id may be rewritten by its single
    /// writer (partial trace first, sealed trace after); traces are
    /// never removed.
    pub fn put(&self, trace: QueryTrace) -> Result<()> {
        let mut traces = self
            .traces
            .write()
            .map_err(|_| EngramError::Internal("trace store lock poisoned".into()))?;
        traces.insert(trace.id, trace);
        Ok(())
    }

    /// Fetch a trace by id
    pub fn get(&self, id: Uuid) -> Result<QueryTrace> {
        let traces = self
            .traces
            .read()
            .map_err(|_| EngramError::Internal("trace store lock poisoned".into()))?;
        traces
            .get(&id)
            .cloned()
            .ok_or_else(|| EngramError::NotFound(id.to_string()))
    }

    /// Number of stored traces
    pub fn len(&self) -> Result<usize> {
        let traces = self
            .traces
            .read()
            .map_err(|_| EngramError::Internal("trace store lock poisoned".into()))?;
        Ok(traces.len())
    }

    /// Whether the store is empty
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

// ============================================================================
// TESTS
// ============================================================================
