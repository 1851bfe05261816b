//! Error taxonomy surfaced to callers
//!
//! Five caller-visible kinds plus graph validation errors:
//! - `InvalidInput` fails fast at the entry point
//! - `TierUnavailable` and `Timeout` are absorbed during recall as empty partials
//! - `PipelineError` aborts the query and names the offending stage
//! - `NotFound` covers unknown trace ids on explain/replay/classify

use crate::fusion::StageName;
use crate::graph::GraphError;

/// Top-level error type for the memory engine
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum EngramError {
    /// Bad caller input: empty query, non-finite embedding, invalid config
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    /// An external store refused the call or is not configured
    #[error("Tier unavailable: {0}")]
    TierUnavailable(String),
    /// A tier or query deadline expired
    #[error("Timeout: {0}")]
    Timeout(String),
    /// Unexpected failure inside a pipeline stage
    #[error("Pipeline error in stage {stage}: {message}")]
    PipelineError {
        /// The stage that failed
        stage: StageName,
        /// What went wrong
        message: String,
    },
    /// Unknown trace id
    #[error("Trace not found: {0}")]
    NotFound(String),
    /// Knowledge-graph validation error
    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),
    /// Broken internal invariant (poisoned lock, corrupt state)
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Engine result type
pub type Result<T> = std::result::Result<T, EngramError>;

impl EngramError {
    /// Stable machine-readable kind name, used in traces
    pub fn kind(&self) -> &'static str {
        match self {
            EngramError::InvalidInput(_) => "invalid_input",
            EngramError::TierUnavailable(_) => "tier_unavailable",
            EngramError::Timeout(_) => "timeout",
            EngramError::PipelineError { .. } => "pipeline_error",
            EngramError::NotFound(_) => "not_found",
            EngramError::Graph(_) => "graph",
            EngramError::Internal(_) => "internal",
        }
    }
}
