//! # Lifecycle Classifier
//!
//! Chunks don't simply exist or not exist - they move along a staged
//! accessibility continuum that controls which indexes cover them:
//!
//! - **Active**: fresh and regularly accessed; covered by every index
//! - **Demoted**: aging or rarely accessed; vector recall only
//! - **Archived**: old and cold; metadata only, no recall tiers
//! - **Rehydratable**: explicitly parked by a curator; no indexes until
//!   rehydrated
//!
//! Transitions are monotone along Active → Demoted → Archived →
//! Rehydratable. A chunk can only move one step forward at a time, and
//! the only way back is an explicit rehydration from Rehydratable to
//! Active.
//!
//! Classification is a pure function of age and access counters so the
//! periodic sweep and the on-access path agree by construction. On
//! missing timestamps the classifier fails open to Active: availability
//! beats tidiness when bookkeeping is incomplete.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::LifecyclePolicy;

// ============================================================================
// LIFECYCLE STAGE
// ============================================================================

/// The lifecycle stage of a chunk.
///
/// # Index coverage
///
/// | Stage        | Vector | Graph | Relational |
/// |--------------|--------|-------|------------|
/// | Active       | yes    | yes   | yes        |
/// | Demoted      | yes    | no    | no         |
/// | Archived     | no     | no    | no         |
/// | Rehydratable | no     | no    | no         |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleStage {
    /// Fresh and regularly accessed; fully indexed
    #[default]
    Active,
    /// Aging or rarely accessed; similarity recall only
    Demoted,
    /// Old and cold; metadata only
    Archived,
    /// Explicitly parked; excluded from every index until rehydrated
    Rehydratable,
}

impl LifecycleStage {
    /// Position along the monotone stage order
    #[inline]
    pub fn rank(&self) -> u8 {
        match self {
            LifecycleStage::Active => 0,
            LifecycleStage::Demoted => 1,
            LifecycleStage::Archived => 2,
            LifecycleStage::Rehydratable => 3,
        }
    }

    /// Convert to string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleStage::Active => "active",
            LifecycleStage::Demoted => "demoted",
            LifecycleStage::Archived => "archived",
            LifecycleStage::Rehydratable => "rehydratable",
        }
    }

    /// Parse from string name
    pub fn parse_name(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "demoted" => LifecycleStage::Demoted,
            "archived" => LifecycleStage::Archived,
            "rehydratable" => LifecycleStage::Rehydratable,
            _ => LifecycleStage::Active,
        }
    }
}

impl std::fmt::Display for LifecycleStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// INDEX COVERAGE
// ============================================================================

/// Which indexes apply to a chunk at a given stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexCoverage {
    /// Covered by the vector index
    pub vector: bool,
    /// Covered by the knowledge graph
    pub graph: bool,
    /// Covered by the relational/structured store
    pub relational: bool,
}

/// Indexing strategy for a lifecycle stage
pub fn indexing_strategy(stage: LifecycleStage) -> IndexCoverage {
    match stage {
        LifecycleStage::Active => IndexCoverage {
            vector: true,
            graph: true,
            relational: true,
        },
        LifecycleStage::Demoted => IndexCoverage {
            vector: true,
            graph: false,
            relational: false,
        },
        LifecycleStage::Archived | LifecycleStage::Rehydratable => IndexCoverage {
            vector: false,
            graph: false,
            relational: false,
        },
    }
}

/// Stages whose chunks are eligible for vector recall
pub fn vector_eligible_stages() -> Vec<LifecycleStage> {
    vec![LifecycleStage::Active, LifecycleStage::Demoted]
}

// ============================================================================
// CLASSIFIER INPUT
// ============================================================================

/// The observable facts the classifier decides from
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkVitals {
    /// When the chunk was indexed; `None` fails open to Active
    pub created_at: Option<DateTime<Utc>>,
    /// When the chunk was last returned
    pub last_accessed: Option<DateTime<Utc>>,
    /// Total accesses recorded
    pub access_count: u32,
    /// Explicit curator mark
    pub rehydratable_mark: bool,
}

impl ChunkVitals {
    /// Vitals of a registered chunk
    pub fn of(chunk: &crate::memory::Chunk) -> Self {
        Self {
            created_at: Some(chunk.created_at),
            last_accessed: Some(chunk.last_accessed),
            access_count: chunk.access_count,
            rehydratable_mark: chunk.rehydratable_mark,
        }
    }

    /// Accesses per week over the chunk's lifetime, with the age
    /// clamped to at least one day so young chunks aren't judged on a
    /// near-zero window.
    fn weekly_rate(&self, now: DateTime<Utc>) -> Option<f64> {
        let created = self.created_at?;
        let age_days = (now - created).num_days().max(1) as f64;
        Some(self.access_count as f64 * 7.0 / age_days)
    }
}

// ============================================================================
// CLASSIFIER
// ============================================================================

/// Pure stage classification from age and access counters.
///
/// Missing timestamps fail open to Active.
pub fn classify(vitals: &ChunkVitals, policy: &LifecyclePolicy, now: DateTime<Utc>) -> LifecycleStage {
    if vitals.rehydratable_mark {
        return LifecycleStage::Rehydratable;
    }

    let (Some(created), Some(rate)) = (vitals.created_at, vitals.weekly_rate(now)) else {
        return LifecycleStage::Active;
    };

    let age_days = (now - created).num_days();

    if age_days > policy.demoted_max_age_days && rate < policy.archived_max_weekly_rate {
        return LifecycleStage::Archived;
    }
    if age_days < policy.active_max_age_days && rate >= policy.active_min_weekly_rate {
        return LifecycleStage::Active;
    }
    LifecycleStage::Demoted
}

/// Whether a direct transition is legal.
///
/// Forward movement is one step at a time; the only backward move is
/// Rehydratable → Active.
pub fn can_transition(from: LifecycleStage, to: LifecycleStage) -> bool {
    if from == to {
        return true;
    }
    if from == LifecycleStage::Rehydratable && to == LifecycleStage::Active {
        return true;
    }
    to.rank() == from.rank() + 1
}

/// One legal step from `current` toward `target`, or `None` when the
/// chunk should stay put. Sweeps never move a chunk backwards and never
/// park it Rehydratable on their own.
pub fn advance_toward(
    current: LifecycleStage,
    target: LifecycleStage,
) -> Option<LifecycleStage> {
    if target == LifecycleStage::Rehydratable || target.rank() <= current.rank() {
        return None;
    }
    let next = match current {
        LifecycleStage::Active => LifecycleStage::Demoted,
        LifecycleStage::Demoted => LifecycleStage::Archived,
        LifecycleStage::Archived | LifecycleStage::Rehydratable => return None,
    };
    Some(next)
}

// ============================================================================
// TESTS
// ============================================================================
