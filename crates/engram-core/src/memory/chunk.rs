//! Chunk - the indexed unit of vault text
//!
//! A chunk is immutable once indexed: its text, source position and
//! embedding never change. Only access bookkeeping and the lifecycle
//! stage evolve afterwards.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::lifecycle::LifecycleStage;

// ============================================================================
// LIFECYCLE TAG
// ============================================================================

/// Caller-supplied retention intent for a chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleTag {
    /// Keep indefinitely
    Permanent,
    /// Ordinary note content
    #[default]
    Temporary,
    /// Scratch content, first in line for archival
    Ephemeral,
}

impl LifecycleTag {
    /// Convert to string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleTag::Permanent => "permanent",
            LifecycleTag::Temporary => "temporary",
            LifecycleTag::Ephemeral => "ephemeral",
        }
    }

    /// Parse from string name
    pub fn parse_name(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "permanent" => LifecycleTag::Permanent,
            "ephemeral" => LifecycleTag::Ephemeral,
            _ => LifecycleTag::Temporary,
        }
    }
}

impl std::fmt::Display for LifecycleTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// CHUNK
// ============================================================================

/// An indexed chunk of vault text
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chunk {
    /// Stable identifier, unique across the chunk/entity namespace
    pub id: String,
    /// Chunk text
    pub text: String,
    /// Path of the source note
    pub source_path: String,
    /// Position of this chunk within the source note
    pub chunk_index: u32,
    /// Embedding vector of dimension D
    pub embedding: Vec<f32>,
    /// When the chunk was indexed
    pub created_at: DateTime<Utc>,
    /// When the chunk was last returned by a query
    pub last_accessed: DateTime<Utc>,
    /// How many times the chunk has been returned
    pub access_count: u32,
    /// Current lifecycle stage
    pub stage: LifecycleStage,
    /// Whether a curator has verified the chunk
    pub verified: bool,
    /// Retention intent
    pub tag: LifecycleTag,
    /// Explicit curator mark making the chunk rehydratable
    #[serde(default)]
    pub rehydratable_mark: bool,
}

impl Chunk {
    /// Create a freshly indexed chunk. Arrives Active and unverified.
    pub fn new(
        id: impl Into<String>,
        text: impl Into<String>,
        source_path: impl Into<String>,
        chunk_index: u32,
        embedding: Vec<f32>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            text: text.into(),
            source_path: source_path.into(),
            chunk_index,
            embedding,
            created_at: now,
            last_accessed: now,
            access_count: 0,
            stage: LifecycleStage::Active,
            verified: false,
            tag: LifecycleTag::Temporary,
            rehydratable_mark: false,
        }
    }

    /// Age in whole days at `now`
    pub fn age_days(&self, now: DateTime<Utc>) -> i64 {
        (now - self.created_at).num_days()
    }

    /// Record that the chunk was returned by a query
    pub fn record_access(&mut self, now: DateTime<Utc>) {
        self.last_accessed = now;
        self.access_count = self.access_count.saturating_add(1);
    }
}

// ============================================================================
// VECTOR HELPERS
// ============================================================================

/// Cosine similarity between two vectors. Returns 0.0 on dimension
/// mismatch or zero-norm inputs.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let mut dot = 0.0_f32;
    let mut norm_a = 0.0_f32;
    let mut norm_b = 0.0_f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denominator = (norm_a * norm_b).sqrt();
    if denominator > 0.0 { dot / denominator } else { 0.0 }
}

/// True when every component is a finite number
pub fn is_finite_vector(v: &[f32]) -> bool {
    v.iter().all(|x| x.is_finite())
}

// ============================================================================
// TESTS
// ============================================================================
