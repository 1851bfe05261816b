//! # Graph Query Engine
//!
//! The algorithmic heart of graph retrieval:
//!
//! - **Personalized PageRank** biased toward a query seed set, with
//!   dangling mass returned to the personalization vector so the walk
//!   stays query-focused on sparse graphs
//! - **Multi-hop search**: breadth-first traversal with cycle-safe
//!   visitation and shortest-path provenance
//! - **Chunk ranking**: entity-space PageRank mass aggregated into
//!   chunk-space scores through `mentions` edges
//! - **Synonymy expansion**: one-hop `similar_to` widening of the seed
//!   set ("USA" also activates "United States")
//!
//! Everything here operates on an immutable [`GraphSnapshot`] and is
//! deterministic: node positions are assigned in id order and adjacency
//! lists are pre-sorted, so identical inputs produce identical outputs.

use std::collections::{HashMap, HashSet, VecDeque};

use tracing::{debug, warn};

use crate::config::PprConfig;
use crate::graph::{EdgeKind, GraphSnapshot};

// ============================================================================
// PERSONALIZED PAGERANK
// ============================================================================

/// Result of a PageRank run over a snapshot
#[derive(Debug, Clone)]
pub struct PprScores {
    /// Score per snapshot position; empty when no seed matched
    pub scores: Vec<f64>,
    /// Whether the iteration reached the tolerance before the cap
    pub converged: bool,
    /// Iterations performed
    pub iterations: u32,
}

impl PprScores {
    /// An empty result for a seedless run
    pub fn empty() -> Self {
        Self {
            scores: Vec::new(),
            converged: true,
            iterations: 0,
        }
    }

    /// Whether the run produced any mass
    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }

    /// Score of a node id, if present
    pub fn score_of(&self, snapshot: &GraphSnapshot, id: &str) -> Option<f64> {
        snapshot.position(id).and_then(|pos| self.scores.get(pos)).copied()
    }
}

/// Personalized PageRank over the snapshot.
///
/// The recurrence is `x' = α·p + (1-α)·(Wᵀx + d·p)` where `p` is
/// uniform over the matched seed nodes, `W` the row-normalized
/// effective-weight adjacency over entity-entity edges and `d` the
/// mass sitting on dangling nodes this iteration. α is the restart
/// mass: at α=1 the output is exactly the personalization
/// distribution.
///
/// The walk never follows `mentions` edges: chunks are not part of the
/// transition matrix and only receive mass through [`rank_chunks`]. An
/// entity with no entity-entity edges is dangling and its mass returns
/// to the seed set.
///
/// Iteration stops when the L1 change drops below `config.tol` or the
/// cap is reached; hitting the cap is not an error, the last iterate is
/// returned with `converged = false`.
///
/// Seeds absent from the graph are ignored; if none remain the result
/// is empty and callers degrade gracefully.
pub fn personalized_pagerank(
    snapshot: &GraphSnapshot,
    seeds: &[String],
    config: &PprConfig,
) -> PprScores {
    let n = snapshot.len();
    let mut seed_positions: Vec<usize> = seeds
        .iter()
        .filter_map(|id| snapshot.position(id))
        .collect();
    seed_positions.sort_unstable();
    seed_positions.dedup();

    if seed_positions.is_empty() {
        warn!(
            seed_count = seeds.len(),
            "personalized pagerank: no seed node present in graph"
        );
        return PprScores::empty();
    }

    let alpha = config.alpha;
    let restart = 1.0 / seed_positions.len() as f64;

    // Out-strength per node over entity-entity edges, fixed for the
    // whole run; mentions edges are not part of the walk
    let out_strength: Vec<f64> = (0..n)
        .map(|pos| {
            snapshot
                .out_edges(pos)
                .iter()
                .filter(|e| e.kind != EdgeKind::Mentions)
                .map(|e| e.weight as f64)
                .sum()
        })
        .collect();

    let mut current = vec![0.0_f64; n];
    for &pos in &seed_positions {
        current[pos] = restart;
    }

    let mut converged = false;
    let mut iterations = 0;

    for _ in 0..config.max_iter {
        iterations += 1;
        let mut next = vec![0.0_f64; n];
        let mut dangling = 0.0_f64;

        for pos in 0..n {
            let mass = current[pos];
            if mass == 0.0 {
                continue;
            }
            let strength = out_strength[pos];
            if strength <= 0.0 {
                dangling += mass;
                continue;
            }
            for edge in snapshot.out_edges(pos) {
                if edge.kind == EdgeKind::Mentions {
                    continue;
                }
                next[edge.target] += (1.0 - alpha) * mass * (edge.weight as f64 / strength);
            }
        }

        // Restart mass plus dangling mass both return to the seeds
        let returned = alpha + (1.0 - alpha) * dangling;
        for &pos in &seed_positions {
            next[pos] += returned * restart;
        }

        let delta: f64 = next
            .iter()
            .zip(current.iter())
            .map(|(a, b)| (a - b).abs())
            .sum();
        current = next;

        if delta < config.tol {
            converged = true;
            break;
        }
    }

    if !converged {
        debug!(iterations, "personalized pagerank hit iteration cap");
    }

    PprScores {
        scores: current,
        converged,
        iterations,
    }
}

// ============================================================================
// MULTI-HOP SEARCH
// ============================================================================

/// An entity discovered by multi-hop traversal
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HopDiscovery {
    /// Discovered entity id
    pub entity_id: String,
    /// Hop distance from the nearest start node
    pub hops: u32,
    /// One shortest path from a start node, first discovered in BFS
    /// order; starts with the origin and ends with this entity
    pub path: Vec<String>,
}

/// Breadth-first multi-hop search over entity-entity edges.
///
/// Chunks are never traversed; they are only reachable through
/// `mentions` edges and are exposed by [`rank_chunks`]. A visited set
/// guarantees termination on cyclic graphs in O(V+E); when several
/// shortest paths exist the first one discovered wins.
pub fn multi_hop(
    snapshot: &GraphSnapshot,
    starts: &[String],
    max_hops: u32,
    kind_filter: Option<&[EdgeKind]>,
) -> Vec<HopDiscovery> {
    let mut start_positions: Vec<usize> = starts
        .iter()
        .filter_map(|id| snapshot.position(id))
        .filter(|&pos| snapshot.node(pos).is_entity())
        .collect();
    start_positions.sort_unstable();
    start_positions.dedup();

    let mut visited: HashSet<usize> = HashSet::new();
    let mut parent: HashMap<usize, usize> = HashMap::new();
    let mut queue: VecDeque<(usize, u32)> = VecDeque::new();
    let mut discovered = Vec::new();

    for &pos in &start_positions {
        visited.insert(pos);
        queue.push_back((pos, 0));
        discovered.push(HopDiscovery {
            entity_id: snapshot.node(pos).id().to_string(),
            hops: 0,
            path: vec![snapshot.node(pos).id().to_string()],
        });
    }

    while let Some((pos, hops)) = queue.pop_front() {
        if hops >= max_hops {
            continue;
        }
        for edge in snapshot.out_edges(pos) {
            if !snapshot.node(edge.target).is_entity() {
                continue;
            }
            if let Some(kinds) = kind_filter {
                if !kinds.contains(&edge.kind) {
                    continue;
                }
            }
            if !visited.insert(edge.target) {
                continue;
            }
            parent.insert(edge.target, pos);
            queue.push_back((edge.target, hops + 1));
            discovered.push(HopDiscovery {
                entity_id: snapshot.node(edge.target).id().to_string(),
                hops: hops + 1,
                path: reconstruct_path(snapshot, &parent, edge.target),
            });
        }
    }

    discovered
}

fn reconstruct_path(
    snapshot: &GraphSnapshot,
    parent: &HashMap<usize, usize>,
    end: usize,
) -> Vec<String> {
    let mut path = vec![snapshot.node(end).id().to_string()];
    let mut cursor = end;
    while let Some(&prev) = parent.get(&cursor) {
        path.push(snapshot.node(prev).id().to_string());
        cursor = prev;
    }
    path.reverse();
    path
}

// ============================================================================
// CHUNK RANKING
// ============================================================================

/// Aggregate entity-space PageRank mass into chunk scores.
///
/// A chunk scores the **sum** of PPR mass over entities that mention
/// it, not the average: chunks mentioned by several activated entities
/// accrue more signal, which is the point of the graph tier. Results
/// are sorted descending, ties broken by chunk id.
pub fn rank_chunks(
    snapshot: &GraphSnapshot,
    ppr: &PprScores,
    eligible: &dyn Fn(&str) -> bool,
) -> Vec<(String, f64)> {
    if ppr.is_empty() {
        return Vec::new();
    }

    let mut scores: HashMap<usize, f64> = HashMap::new();
    for (pos, _) in snapshot.entity_nodes() {
        let mass = ppr.scores[pos];
        if mass <= 0.0 {
            continue;
        }
        for edge in snapshot.out_edges(pos) {
            if edge.kind != EdgeKind::Mentions {
                continue;
            }
            let chunk_id = snapshot.node(edge.target).id();
            if !eligible(chunk_id) {
                continue;
            }
            *scores.entry(edge.target).or_insert(0.0) += mass;
        }
    }

    let mut ranked: Vec<(String, f64)> = scores
        .into_iter()
        .map(|(pos, score)| (snapshot.node(pos).id().to_string(), score))
        .collect();
    ranked.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.0.cmp(&b.0))
    });
    ranked
}

// ============================================================================
// SYNONYMY EXPANSION
// ============================================================================

/// Widen a seed set by one hop of `similar_to` edges.
///
/// Each source contributes at most `max_expand` synonyms, strongest
/// edges first. The returned set contains the original seeds followed
/// by expansions in discovery order, deduplicated.
pub fn expand_synonyms(
    snapshot: &GraphSnapshot,
    seeds: &[String],
    max_expand: usize,
) -> Vec<String> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut expanded = Vec::new();

    for seed in seeds {
        if seen.insert(seed.clone()) {
            expanded.push(seed.clone());
        }
    }

    for seed in seeds {
        let Some(pos) = snapshot.position(seed) else {
            continue;
        };
        let mut synonyms: Vec<(&str, f32)> = snapshot
            .out_edges(pos)
            .iter()
            .filter(|e| e.kind == EdgeKind::SimilarTo)
            .map(|e| (snapshot.node(e.target).id(), e.weight))
            .collect();
        synonyms.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(b.0))
        });
        for (id, _) in synonyms.into_iter().take(max_expand) {
            if seen.insert(id.to_string()) {
                expanded.push(id.to_string());
            }
        }
    }

    expanded
}

// ============================================================================
// TESTS
// ============================================================================
