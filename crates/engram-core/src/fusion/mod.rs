//! # Fusion Pipeline
//!
//! Five stages turn tier recall into a curated context:
//!
//! 1. **Recall** - invoke every planned tier concurrently under a fair
//!    share of the remaining query deadline; late or unavailable tiers
//!    are absorbed as empty partials
//! 2. **Filter** - drop candidates below their tier's score floor
//! 3. **Deduplicate** - collapse near-identical chunks by embedding
//!    cosine, keeping the higher-scored one
//! 4. **Rank** - convex-weighted score fusion with deterministic
//!    tie-breaks
//! 5. **Compress** - mode-aware slicing under the hard token budget;
//!    the core is never truncated unless it alone exceeds the budget
//!
//! Stages 2-5 are CPU-bound and run on the invoking task. Every stage
//! records its output cardinality in the trace. Expiring mid-pipeline
//! returns the best-so-far result with `deadline_exceeded` flagged;
//! ranking and compression always run so the output stays well-formed.

mod budget;

pub use budget::TokenCounter;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;
use tracing::{debug, error};

use crate::config::FusionConfig;
use crate::error::{EngramError, Result};
use crate::memory::{ChunkRegistry, RetrievalResult, TierKind, TierScores, cosine_similarity};
use crate::router::QueryMode;
use crate::tiers::{RecallRequest, RetrievalTier, TierCandidate};
use crate::trace::{FusedScore, QueryTrace, QueryWarning, TierRun};

// ============================================================================
// STAGE NAMES
// ============================================================================

/// The five pipeline stages, in order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageName {
    /// Parallel tier invocation
    Recall,
    /// Per-tier score floors
    Filter,
    /// Embedding near-duplicate removal
    Deduplicate,
    /// Weighted score fusion
    Rank,
    /// Mode-aware slicing under the token budget
    Compress,
}

impl StageName {
    /// Convert to string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            StageName::Recall => "recall",
            StageName::Filter => "filter",
            StageName::Deduplicate => "deduplicate",
            StageName::Rank => "rank",
            StageName::Compress => "compress",
        }
    }
}

impl std::fmt::Display for StageName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// OUTPUT
// ============================================================================

/// The pipeline's curated output
#[derive(Debug, Clone, Default)]
pub struct CuratedContext {
    /// Top slice, protected from budget truncation
    pub core: Vec<RetrievalResult>,
    /// Mode-dependent tail, truncated first
    pub extended: Vec<RetrievalResult>,
}

/// A candidate accumulated across tiers before ranking
#[derive(Debug, Clone)]
struct MergedCandidate {
    chunk_id: String,
    scores: TierScores,
    provenance: Vec<String>,
    fused: f32,
}

// ============================================================================
// PIPELINE
// ============================================================================

/// The five-stage context assembly pipeline
#[derive(Debug)]
pub struct FusionPipeline {
    registry: Arc<ChunkRegistry>,
    counter: TokenCounter,
    config: FusionConfig,
}

impl FusionPipeline {
    /// Build the pipeline. Loads the token encoding once.
    pub fn new(registry: Arc<ChunkRegistry>, config: FusionConfig) -> Result<Self> {
        Ok(Self {
            registry,
            counter: TokenCounter::new()?,
            config,
        })
    }

    /// Pipeline configuration
    pub fn config(&self) -> &FusionConfig {
        &self.config
    }

    /// Run all five stages for one query.
    ///
    /// `top_k` and `token_budget` are the per-query effective values;
    /// `deadline` is the absolute query deadline.
    #[allow(clippy::too_many_arguments)]
    pub async fn run(
        &self,
        tiers: &[Arc<dyn RetrievalTier>],
        request: Arc<RecallRequest>,
        mode: QueryMode,
        top_k: usize,
        token_budget: usize,
        deadline: Instant,
        trace: &mut QueryTrace,
    ) -> Result<CuratedContext> {
        // Stage 1: recall
        let by_tier = self.recall(tiers, request, deadline, trace).await;
        let recalled: usize = by_tier.values().map(Vec::len).sum();
        trace.record_stage(StageName::Recall, recalled);

        // Stage 2: filter
        let expired = self.check_deadline(deadline, trace);
        let merged = self.filter_and_merge(by_tier, !expired);
        if recalled > 0 && merged.is_empty() {
            trace.warn(QueryWarning::AllFiltered);
        }
        trace.record_stage(StageName::Filter, merged.len());

        // Stage 3: deduplicate
        let expired = self.check_deadline(deadline, trace);
        let deduped = if expired {
            merged
        } else {
            self.deduplicate(merged, trace)?
        };
        trace.record_stage(StageName::Deduplicate, deduped.len());

        // Stage 4: rank
        self.check_deadline(deadline, trace);
        let ranked = Self::rank(deduped);
        trace.record_stage(StageName::Rank, ranked.len());

        // Stage 5: compress
        self.check_deadline(deadline, trace);
        let context = self.compress(ranked, mode, top_k, token_budget, trace)?;
        trace.record_stage(
            StageName::Compress,
            context.core.len() + context.extended.len(),
        );
        trace.fused_core = context
            .core
            .iter()
            .map(|result| FusedScore {
                chunk_id: result.chunk_id.clone(),
                score: result.fused_score,
            })
            .collect();

        Ok(context)
    }

    fn check_deadline(&self, deadline: Instant, trace: &mut QueryTrace) -> bool {
        if Instant::now() >= deadline {
            trace.deadline_exceeded = true;
            trace.warn(QueryWarning::DeadlineExceeded);
            true
        } else {
            false
        }
    }

    // ------------------------------------------------------------------
    // Stage 1: recall
    // ------------------------------------------------------------------

    /// Fan out to every planned tier with a join barrier. Each call
    /// gets (remaining deadline / active tiers), capped by the tier's
    /// own deadline. Timeouts and unavailable backends contribute an
    /// empty set; the trace records the partial.
    async fn recall(
        &self,
        tiers: &[Arc<dyn RetrievalTier>],
        request: Arc<RecallRequest>,
        deadline: Instant,
        trace: &mut QueryTrace,
    ) -> HashMap<TierKind, Vec<TierCandidate>> {
        let mut by_tier: HashMap<TierKind, Vec<TierCandidate>> = HashMap::new();
        if tiers.is_empty() {
            return by_tier;
        }

        let remaining = deadline.saturating_duration_since(Instant::now());
        let share = remaining / tiers.len() as u32;

        let mut join_set = JoinSet::new();
        for tier in tiers {
            let tier = Arc::clone(tier);
            let request = Arc::clone(&request);
            let budget = match tier.default_deadline() {
                Some(cap) => share.min(cap),
                None => share,
            };
            join_set.spawn(async move {
                let kind = tier.kind();
                let started = Instant::now();
                let outcome = tokio::time::timeout(budget, tier.recall(request)).await;
                (kind, started.elapsed(), outcome)
            });
        }

        let mut runs: Vec<TierRun> = Vec::with_capacity(tiers.len());
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((kind, elapsed, outcome)) => {
                    let mut run = TierRun {
                        tier: kind,
                        latency_ms: elapsed.as_millis() as u64,
                        candidates: 0,
                        timed_out: false,
                        unavailable: false,
                        converged: None,
                    };
                    match outcome {
                        Ok(Ok(recall)) => {
                            run.candidates = recall.candidates.len();
                            run.converged = recall.converged;
                            for warning in recall.warnings {
                                trace.warn(warning);
                            }
                            by_tier.insert(kind, recall.candidates);
                        }
                        Ok(Err(EngramError::Timeout(_))) => {
                            run.timed_out = true;
                            trace.warn(QueryWarning::TierTimeout(kind));
                        }
                        Ok(Err(EngramError::TierUnavailable(reason))) => {
                            run.unavailable = true;
                            debug!(tier = %kind, %reason, "tier unavailable");
                            trace.warn(QueryWarning::TierUnavailable(kind));
                        }
                        Ok(Err(other)) => {
                            run.unavailable = true;
                            error!(tier = %kind, error = %other, "tier recall failed");
                            trace.warn(QueryWarning::TierUnavailable(kind));
                        }
                        Err(_elapsed) => {
                            run.timed_out = true;
                            trace.warn(QueryWarning::TierTimeout(kind));
                        }
                    }
                    runs.push(run);
                }
                Err(join_error) => {
                    error!(error = %join_error, "tier task failed to join");
                }
            }
        }

        // Join order is completion order; keep the trace deterministic
        runs.sort_by_key(|run| run.tier);
        trace.tier_runs.extend(runs);
        by_tier
    }

    // ------------------------------------------------------------------
    // Stage 2: filter + merge
    // ------------------------------------------------------------------

    fn floor_for(&self, tier: TierKind) -> f32 {
        match tier {
            TierKind::Vector => self.config.filter_floor.vector,
            TierKind::HippoRag => self.config.filter_floor.hipporag,
            TierKind::Probabilistic => self.config.filter_floor.bayes,
        }
    }

    /// Apply per-tier floors, then merge per-chunk scores across
    /// tiers. Merging iterates tiers in fixed order so provenance and
    /// scores are deterministic.
    fn filter_and_merge(
        &self,
        mut by_tier: HashMap<TierKind, Vec<TierCandidate>>,
        apply_floors: bool,
    ) -> Vec<MergedCandidate> {
        let mut merged: HashMap<String, MergedCandidate> = HashMap::new();
        for tier in [TierKind::Vector, TierKind::HippoRag, TierKind::Probabilistic] {
            let Some(candidates) = by_tier.remove(&tier) else {
                continue;
            };
            let floor = self.floor_for(tier);
            for candidate in candidates {
                if apply_floors && candidate.score < floor {
                    continue;
                }
                let entry = merged
                    .entry(candidate.chunk_id.clone())
                    .or_insert_with(|| MergedCandidate {
                        chunk_id: candidate.chunk_id.clone(),
                        scores: TierScores::default(),
                        provenance: Vec::new(),
                        fused: 0.0,
                    });
                entry.scores.set(tier, candidate.score);
                if entry.provenance.is_empty() && !candidate.provenance.is_empty() {
                    entry.provenance = candidate.provenance;
                }
            }
        }

        let weights = &self.config.rank_weights;
        let mut candidates: Vec<MergedCandidate> = merged
            .into_values()
            .map(|mut candidate| {
                candidate.fused = weights.vector * candidate.scores.vector.unwrap_or(0.0)
                    + weights.hipporag * candidate.scores.hipporag.unwrap_or(0.0)
                    + weights.bayes * candidate.scores.bayes.unwrap_or(0.0);
                candidate
            })
            .collect();
        candidates.sort_by(|a, b| {
            b.fused
                .partial_cmp(&a.fused)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.chunk_id.cmp(&b.chunk_id))
        });
        candidates
    }

    // ------------------------------------------------------------------
    // Stage 3: deduplicate
    // ------------------------------------------------------------------

    /// Drop the lower-scored member of any pair whose embeddings are
    /// near-identical. Quadratic pairwise pass over the survivors; the
    /// working set is bounded by the per-tier recall caps (at most
    /// ~150 candidates with defaults).
    fn deduplicate(
        &self,
        candidates: Vec<MergedCandidate>,
        trace: &mut QueryTrace,
    ) -> Result<Vec<MergedCandidate>> {
        let threshold = self.config.dedup_threshold;
        let mut kept: Vec<(MergedCandidate, Option<Vec<f32>>)> = Vec::new();
        let mut removed = 0;

        // Candidates arrive sorted by fused score, so earlier entries
        // always win ties against later ones
        'next_candidate: for candidate in candidates {
            let embedding = self
                .registry
                .embedding(&candidate.chunk_id)
                .map_err(|e| EngramError::PipelineError {
                    stage: StageName::Deduplicate,
                    message: e.to_string(),
                })?;
            if let Some(ref vector) = embedding {
                for (_, kept_embedding) in &kept {
                    if let Some(kept_vector) = kept_embedding {
                        if cosine_similarity(vector, kept_vector) >= threshold {
                            removed += 1;
                            continue 'next_candidate;
                        }
                    }
                }
            }
            kept.push((candidate, embedding));
        }

        trace.dedup_removed = removed;
        Ok(kept.into_iter().map(|(candidate, _)| candidate).collect())
    }

    // ------------------------------------------------------------------
    // Stage 4: rank
    // ------------------------------------------------------------------

    /// Final ordering: fused score descending, chunk id ascending.
    /// Fused scores are a convex combination, so raising any single
    /// tier score can never lower a candidate's rank.
    fn rank(mut candidates: Vec<MergedCandidate>) -> Vec<RetrievalResult> {
        candidates.sort_by(|a, b| {
            b.fused
                .partial_cmp(&a.fused)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.chunk_id.cmp(&b.chunk_id))
        });
        candidates
            .into_iter()
            .map(|candidate| RetrievalResult {
                origins: candidate.scores.origins(),
                confidence: candidate.scores.origins().len() as f32 / 3.0,
                chunk_id: candidate.chunk_id,
                scores: candidate.scores,
                fused_score: candidate.fused,
                provenance: candidate.provenance,
            })
            .collect()
    }

    // ------------------------------------------------------------------
    // Stage 5: compress
    // ------------------------------------------------------------------

    fn extended_width(&self, mode: QueryMode) -> usize {
        match mode {
            QueryMode::Execution => 0,
            QueryMode::Planning => self.config.planning_extended,
            QueryMode::Brainstorming => self.config.brainstorming_extended,
        }
    }

    /// Mode-aware slicing under the hard token budget. The extended
    /// tail is truncated from the end first; the core is cut only in
    /// the exceptional state where it alone exceeds the budget.
    fn compress(
        &self,
        ranked: Vec<RetrievalResult>,
        mode: QueryMode,
        top_k: usize,
        token_budget: usize,
        trace: &mut QueryTrace,
    ) -> Result<CuratedContext> {
        let mut ranked = ranked;
        let extended_width = self.extended_width(mode);
        let tail: Vec<RetrievalResult> = ranked.split_off(ranked.len().min(top_k));
        let mut core = ranked;
        let mut extended: Vec<RetrievalResult> = tail.into_iter().take(extended_width).collect();

        let token_cost = |result: &RetrievalResult| -> Result<usize> {
            let text = self
                .registry
                .get(&result.chunk_id)
                .map_err(|e| EngramError::PipelineError {
                    stage: StageName::Compress,
                    message: e.to_string(),
                })?
                .map(|chunk| chunk.text)
                .unwrap_or_default();
            Ok(self.counter.count(&text))
        };

        let mut core_tokens = 0;
        for result in &core {
            core_tokens += token_cost(result)?;
        }
        let mut extended_tokens = 0;
        for result in &extended {
            extended_tokens += token_cost(result)?;
        }

        while core_tokens + extended_tokens > token_budget {
            let Some(dropped) = extended.pop() else {
                break;
            };
            extended_tokens -= token_cost(&dropped)?;
        }

        while core_tokens > token_budget {
            let Some(dropped) = core.pop() else {
                break;
            };
            core_tokens -= token_cost(&dropped)?;
            trace.core_truncated = true;
            trace.warn(QueryWarning::CoreTruncated);
        }

        debug!(
            core = core.len(),
            extended = extended.len(),
            tokens = core_tokens + extended_tokens,
            "context compressed"
        );

        Ok(CuratedContext { core, extended })
    }
}

// ============================================================================
// TESTS
// ============================================================================
