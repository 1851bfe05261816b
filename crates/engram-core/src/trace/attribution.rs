//! Failure attribution
//!
//! A failed query is classified from its stored trace and a downstream
//! outcome label into one of three kinds: context bug (the engine
//! assembled the wrong context), model bug (correct context, wrong
//! downstream answer) or system error (something broke or timed out).
//! The classifier is deterministic and never re-runs a tier.

use serde::{Deserialize, Serialize};

use crate::fusion::StageName;
use crate::memory::TierKind;
use crate::router::QueryRouter;
use crate::trace::{QueryTrace, QueryWarning};

// ============================================================================
// LABELS AND KINDS
// ============================================================================

/// Downstream judgment of a failed query, supplied by user feedback or
/// a graded-answer probe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeLabel {
    /// An answer was produced but judged wrong
    WrongAnswer,
    /// No usable answer was produced
    MissingAnswer,
}

/// Context-bug subkinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextBugKind {
    /// The plan queried the wrong store for the query shape
    WrongStore,
    /// The query ran under a mode its phrasing contradicts
    WrongMode,
    /// Graph-eligible content existed but lifecycle filtering hid it
    WrongLifecycle,
    /// Candidates were recalled but filtering/ranking discarded the
    /// answer
    WrongRanking,
}

/// Failure classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The assembled context was wrong (expected ~70% of failures)
    ContextBug(ContextBugKind),
    /// Context fine, downstream answer wrong (expected ~20%)
    ModelBug,
    /// Exception or timeout in a stage or tier (expected ~10%)
    SystemError,
}

impl FailureKind {
    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            FailureKind::ContextBug(ContextBugKind::WrongStore) => "context_bug:wrong_store",
            FailureKind::ContextBug(ContextBugKind::WrongMode) => "context_bug:wrong_mode",
            FailureKind::ContextBug(ContextBugKind::WrongLifecycle) => {
                "context_bug:wrong_lifecycle"
            }
            FailureKind::ContextBug(ContextBugKind::WrongRanking) => "context_bug:wrong_ranking",
            FailureKind::ModelBug => "model_bug",
            FailureKind::SystemError => "system_error",
        }
    }
}

// ============================================================================
// CLASSIFIER
// ============================================================================

/// Classify a failed query from its trace and outcome label.
///
/// Rule order matters and is part of the contract:
/// 1. any recorded exception, tier timeout or deadline cut → system
///    error
/// 2. plan inconsistent with what the query's patterns demand → wrong
///    store
/// 3. detected mode inconsistent with the mode the query ran under
///    (without an explicit override) → wrong mode
/// 4. graph tier planned and seeded but returned nothing → wrong
///    lifecycle
/// 5. recall produced candidates but the final core is empty → wrong
///    ranking
/// 6. otherwise → model bug
pub fn classify_failure(trace: &QueryTrace, _label: OutcomeLabel) -> FailureKind {
    // 1. System errors take precedence
    if trace.failure.is_some()
        || trace.deadline_exceeded
        || trace.tier_runs.iter().any(|run| run.timed_out)
    {
        return FailureKind::SystemError;
    }

    let router = QueryRouter::new();

    // 2. Wrong store: re-derive the plan the patterns demand and
    // compare against what actually ran
    let expected = router.route(&trace.query, trace.mode);
    if expected.annotation != trace.plan.annotation || expected.tiers != trace.plan.tiers {
        return FailureKind::ContextBug(ContextBugKind::WrongStore);
    }

    // 3. Wrong mode: phrasing disagrees with the mode used, and no
    // caller override explains it
    if !trace.mode_overridden && router.detect_mode(&trace.query) != trace.mode {
        return FailureKind::ContextBug(ContextBugKind::WrongMode);
    }

    // 4. Wrong lifecycle: the graph tier had seeds but nothing
    // eligible to rank
    if trace.plan.includes(TierKind::HippoRag)
        && !trace.replay.entities.is_empty()
        && trace
            .tier_run(TierKind::HippoRag)
            .is_some_and(|run| run.candidates == 0 && !run.unavailable)
    {
        return FailureKind::ContextBug(ContextBugKind::WrongLifecycle);
    }

    // 5. Wrong ranking: recall found material the pipeline then lost
    let recalled = trace.stage_emitted(StageName::Recall).unwrap_or(0);
    let emitted = trace.stage_emitted(StageName::Compress).unwrap_or(0);
    if trace.warnings.contains(&QueryWarning::AllFiltered) || (recalled > 0 && emitted == 0) {
        return FailureKind::ContextBug(ContextBugKind::WrongRanking);
    }

    // 6. Plan and counts look right; the downstream answer was wrong
    FailureKind::ModelBug
}

// ============================================================================
// TESTS
// ============================================================================
