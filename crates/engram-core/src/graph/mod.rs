//! # Knowledge Graph
//!
//! Directed graph of entity and chunk nodes with typed, weighted edges.
//! Entities connect to each other through `related_to`, `similar_to`
//! and `references` edges; chunks only ever receive `mentions` edges
//! from entities, which is the bridge that translates entity-space
//! PageRank mass into chunk-space ranking.
//!
//! The graph owns its nodes exclusively. Node payloads are fixed tagged
//! records per kind, not free-form attribute maps. Readers work on
//! immutable epoch-stamped snapshots; the single writer (ingestion /
//! consolidation) never blocks readers for longer than a snapshot
//! handoff.
//!
//! Edge types are a closed set: inserting an unknown type is a loud
//! `InvalidEdgeType` error, never a silent drop.

mod query;

pub use query::{
    HopDiscovery, PprScores, expand_synonyms, multi_hop, personalized_pagerank, rank_chunks,
};

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use petgraph::Direction;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use serde::{Deserialize, Serialize};

use crate::memory::Entity;

// ============================================================================
// ERRORS
// ============================================================================

/// Knowledge-graph validation errors
#[non_exhaustive]
#[derive(Debug, Clone, thiserror::Error, PartialEq)]
pub enum GraphError {
    /// Edge type outside the closed set
    #[error("invalid edge type: {0:?}")]
    InvalidEdgeType(String),
    /// Edge endpoint does not exist; the graph never holds dangling
    /// edges
    #[error("node not found: {0}")]
    NodeNotFound(String),
    /// Chunk and entity ids share one namespace
    #[error("id already used by a node of a different kind: {0}")]
    IdCollision(String),
    /// Edge endpoints incompatible with the edge type
    #[error("edge type {kind} cannot connect {src} -> {dst}")]
    InvalidEndpoints {
        /// Source node id
        src: String,
        /// Target node id
        dst: String,
        /// Offending edge type
        kind: EdgeKind,
    },
    /// Weight or confidence outside [0,1] or non-finite
    #[error("invalid edge weight: {0}")]
    InvalidWeight(String),
}

/// Graph result type
pub type Result<T> = std::result::Result<T, GraphError>;

// ============================================================================
// EDGE TYPES
// ============================================================================

/// The closed set of edge types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeKind {
    /// Entity → chunk: the entity is mentioned by the chunk
    Mentions,
    /// Entity → entity: topical co-occurrence
    RelatedTo,
    /// Entity → entity: embedding-similarity synonymy
    SimilarTo,
    /// Entity → entity: explicit pointer
    References,
}

impl EdgeKind {
    /// Convert to string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            EdgeKind::Mentions => "mentions",
            EdgeKind::RelatedTo => "related_to",
            EdgeKind::SimilarTo => "similar_to",
            EdgeKind::References => "references",
        }
    }
}

impl FromStr for EdgeKind {
    type Err = GraphError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "mentions" => Ok(EdgeKind::Mentions),
            "related_to" => Ok(EdgeKind::RelatedTo),
            "similar_to" => Ok(EdgeKind::SimilarTo),
            "references" => Ok(EdgeKind::References),
            other => Err(GraphError::InvalidEdgeType(other.to_string())),
        }
    }
}

impl std::fmt::Display for EdgeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A typed weighted edge
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphEdge {
    /// Edge type
    pub kind: EdgeKind,
    /// Strength of the relation, in [0,1]
    pub weight: f32,
    /// Confidence in the relation, in [0,1]
    pub confidence: f32,
}

impl GraphEdge {
    /// Effective weight used by traversal and ranking
    #[inline]
    pub fn effective_weight(&self) -> f32 {
        self.weight * self.confidence
    }
}

// ============================================================================
// NODES
// ============================================================================

/// Node payload, tagged per kind
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "kind")]
pub enum GraphNode {
    /// An entity node
    Entity(Entity),
    /// A chunk node; full chunk metadata lives in the registry
    Chunk {
        /// Chunk id
        id: String,
    },
}

impl GraphNode {
    /// The node id
    pub fn id(&self) -> &str {
        match self {
            GraphNode::Entity(entity) => &entity.id,
            GraphNode::Chunk { id } => id,
        }
    }

    /// Whether this is an entity node
    pub fn is_entity(&self) -> bool {
        matches!(self, GraphNode::Entity(_))
    }
}

/// Outcome of an idempotent edge insert
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeUpsert {
    /// A new edge was created
    Inserted,
    /// An existing (src, dst, type) edge had weight/confidence updated
    Updated,
}

// ============================================================================
// KNOWLEDGE GRAPH
// ============================================================================

/// The mutable knowledge graph. One writer, many snapshot readers.
#[derive(Debug, Default)]
pub struct KnowledgeGraph {
    graph: DiGraph<GraphNode, GraphEdge>,
    nodes: HashMap<String, NodeIndex>,
    epoch: u64,
}

impl KnowledgeGraph {
    /// Create an empty graph
    pub fn new() -> Self {
        Self::default()
    }

    /// Mutation epoch; bumped on every write, recorded by snapshots
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Total node count
    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Total edge count
    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Entity node count
    pub fn entity_count(&self) -> usize {
        self.graph.node_weights().filter(|n| n.is_entity()).count()
    }

    /// Whether a node id is present
    pub fn contains(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    /// Look up an entity payload
    pub fn entity(&self, id: &str) -> Option<&Entity> {
        match self.nodes.get(id).map(|idx| &self.graph[*idx]) {
            Some(GraphNode::Entity(entity)) => Some(entity),
            _ => None,
        }
    }

    /// All entities, sorted by id
    pub fn entities(&self) -> Vec<Entity> {
        let mut entities: Vec<Entity> = self
            .graph
            .node_weights()
            .filter_map(|n| match n {
                GraphNode::Entity(entity) => Some(entity.clone()),
                GraphNode::Chunk { .. } => None,
            })
            .collect();
        entities.sort_by(|a, b| a.id.cmp(&b.id));
        entities
    }

    /// Edge count per type
    pub fn edge_counts_by_kind(&self) -> HashMap<EdgeKind, usize> {
        let mut counts = HashMap::new();
        for edge in self.graph.edge_weights() {
            *counts.entry(edge.kind).or_insert(0) += 1;
        }
        counts
    }

    // ------------------------------------------------------------------
    // Mutation
    // ------------------------------------------------------------------

    /// Add an entity node. Returns `false` when the entity already
    /// exists (its frequency is bumped instead). Fails on id collision
    /// with a chunk node.
    pub fn add_entity(&mut self, entity: Entity) -> Result<bool> {
        match self.nodes.get(&entity.id) {
            Some(idx) => match &mut self.graph[*idx] {
                GraphNode::Entity(existing) => {
                    existing.frequency = existing.frequency.saturating_add(1);
                    self.epoch += 1;
                    Ok(false)
                }
                GraphNode::Chunk { .. } => Err(GraphError::IdCollision(entity.id)),
            },
            None => {
                let id = entity.id.clone();
                let idx = self.graph.add_node(GraphNode::Entity(entity));
                self.nodes.insert(id, idx);
                self.epoch += 1;
                Ok(true)
            }
        }
    }

    /// Add a chunk node. Returns `false` when already present. Fails on
    /// id collision with an entity node.
    pub fn add_chunk_node(&mut self, id: &str) -> Result<bool> {
        match self.nodes.get(id) {
            Some(idx) => match &self.graph[*idx] {
                GraphNode::Chunk { .. } => Ok(false),
                GraphNode::Entity(_) => Err(GraphError::IdCollision(id.to_string())),
            },
            None => {
                let idx = self.graph.add_node(GraphNode::Chunk { id: id.to_string() });
                self.nodes.insert(id.to_string(), idx);
                self.epoch += 1;
                Ok(true)
            }
        }
    }

    /// Insert or update a typed edge. Idempotent on (src, dst, type):
    /// re-adding updates weight and confidence.
    pub fn add_edge(
        &mut self,
        src: &str,
        dst: &str,
        kind: EdgeKind,
        weight: f32,
        confidence: f32,
    ) -> Result<EdgeUpsert> {
        for (name, value) in [("weight", weight), ("confidence", confidence)] {
            if !value.is_finite() || !(0.0..=1.0).contains(&value) {
                return Err(GraphError::InvalidWeight(format!("{name}={value}")));
            }
        }

        let src_idx = *self
            .nodes
            .get(src)
            .ok_or_else(|| GraphError::NodeNotFound(src.to_string()))?;
        let dst_idx = *self
            .nodes
            .get(dst)
            .ok_or_else(|| GraphError::NodeNotFound(dst.to_string()))?;

        let endpoints_ok = match kind {
            EdgeKind::Mentions => {
                self.graph[src_idx].is_entity() && !self.graph[dst_idx].is_entity()
            }
            EdgeKind::RelatedTo | EdgeKind::SimilarTo | EdgeKind::References => {
                self.graph[src_idx].is_entity() && self.graph[dst_idx].is_entity()
            }
        };
        if !endpoints_ok {
            return Err(GraphError::InvalidEndpoints {
                src: src.to_string(),
                dst: dst.to_string(),
                kind,
            });
        }

        // One edge per ordered pair per type
        let existing = self
            .graph
            .edges_connecting(src_idx, dst_idx)
            .find(|e| e.weight().kind == kind)
            .map(|e| e.id());

        self.epoch += 1;
        match existing {
            Some(edge_idx) => {
                let edge = &mut self.graph[edge_idx];
                edge.weight = weight;
                edge.confidence = confidence;
                Ok(EdgeUpsert::Updated)
            }
            None => {
                self.graph.add_edge(
                    src_idx,
                    dst_idx,
                    GraphEdge {
                        kind,
                        weight,
                        confidence,
                    },
                );
                Ok(EdgeUpsert::Inserted)
            }
        }
    }

    /// Insert an edge given its type name. Unknown names fail loudly
    /// with `InvalidEdgeType` and leave the graph untouched.
    pub fn add_edge_named(
        &mut self,
        src: &str,
        dst: &str,
        kind: &str,
        weight: f32,
        confidence: f32,
    ) -> Result<EdgeUpsert> {
        let kind = EdgeKind::from_str(kind)?;
        self.add_edge(src, dst, kind, weight, confidence)
    }

    /// Remove a node and all incident edges in one step. Returns
    /// `false` for unknown ids.
    pub fn remove_node(&mut self, id: &str) -> Result<bool> {
        let Some(idx) = self.nodes.remove(id) else {
            return Ok(false);
        };
        self.graph.remove_node(idx);
        // petgraph swaps the last node into the vacated index
        if let Some(moved) = self.graph.node_weight(idx) {
            self.nodes.insert(moved.id().to_string(), idx);
        }
        self.epoch += 1;
        Ok(true)
    }

    /// Merge a duplicate entity into its canonical node: every incident
    /// edge of `duplicate` is redirected onto `canonical` (keeping the
    /// higher effective weight on conflict), then `duplicate` is
    /// removed. A second call with the same arguments is a no-op.
    pub fn consolidate_entities(&mut self, duplicate: &str, canonical: &str) -> Result<usize> {
        if duplicate == canonical {
            return Ok(0);
        }
        let Some(&dup_idx) = self.nodes.get(duplicate) else {
            // Already consolidated
            return Ok(0);
        };
        let canon_idx = *self
            .nodes
            .get(canonical)
            .ok_or_else(|| GraphError::NodeNotFound(canonical.to_string()))?;
        if !self.graph[dup_idx].is_entity() || !self.graph[canon_idx].is_entity() {
            return Err(GraphError::IdCollision(duplicate.to_string()));
        }

        // Fold the duplicate's mention frequency into the canonical node
        let dup_frequency = match &self.graph[dup_idx] {
            GraphNode::Entity(dup) => dup.frequency,
            GraphNode::Chunk { .. } => 0,
        };
        if let GraphNode::Entity(canon) = &mut self.graph[canon_idx] {
            canon.frequency = canon.frequency.saturating_add(dup_frequency);
        }

        let outgoing: Vec<(String, GraphEdge)> = self
            .graph
            .edges_directed(dup_idx, Direction::Outgoing)
            .map(|e| (self.graph[e.target()].id().to_string(), *e.weight()))
            .collect();
        let incoming: Vec<(String, GraphEdge)> = self
            .graph
            .edges_directed(dup_idx, Direction::Incoming)
            .map(|e| (self.graph[e.source()].id().to_string(), *e.weight()))
            .collect();

        let canonical = canonical.to_string();
        let mut redirected = 0;
        for (dst, edge) in outgoing {
            if dst == canonical {
                continue;
            }
            redirected += self.redirect_edge(&canonical, &dst, edge, true)?;
        }
        for (src, edge) in incoming {
            if src == canonical {
                continue;
            }
            redirected += self.redirect_edge(&canonical, &src, edge, false)?;
        }

        self.remove_node(duplicate)?;
        Ok(redirected)
    }

    fn redirect_edge(
        &mut self,
        canonical: &str,
        other: &str,
        edge: GraphEdge,
        outgoing: bool,
    ) -> Result<usize> {
        let (src, dst) = if outgoing {
            (canonical, other)
        } else {
            (other, canonical)
        };
        // Keep the stronger assertion when both nodes carried the edge
        if let Some(existing) = self.edge_between(src, dst, edge.kind) {
            if existing.effective_weight() >= edge.effective_weight() {
                return Ok(0);
            }
        }
        self.add_edge(src, dst, edge.kind, edge.weight, edge.confidence)?;
        Ok(1)
    }

    fn edge_between(&self, src: &str, dst: &str, kind: EdgeKind) -> Option<GraphEdge> {
        let src_idx = *self.nodes.get(src)?;
        let dst_idx = *self.nodes.get(dst)?;
        self.graph
            .edges_connecting(src_idx, dst_idx)
            .find(|e| e.weight().kind == kind)
            .map(|e| *e.weight())
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    /// Outgoing neighbors of a node, optionally restricted to one edge
    /// type. Sorted by (neighbor id, edge type) for stable iteration.
    pub fn neighbors(
        &self,
        id: &str,
        filter: Option<EdgeKind>,
    ) -> Result<Vec<(String, GraphEdge)>> {
        let idx = *self
            .nodes
            .get(id)
            .ok_or_else(|| GraphError::NodeNotFound(id.to_string()))?;
        let mut neighbors: Vec<(String, GraphEdge)> = self
            .graph
            .edges_directed(idx, Direction::Outgoing)
            .filter(|e| filter.is_none_or(|kind| e.weight().kind == kind))
            .map(|e| (self.graph[e.target()].id().to_string(), *e.weight()))
            .collect();
        neighbors.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.kind.cmp(&b.1.kind)));
        Ok(neighbors)
    }

    /// Build a read-only snapshot for traversal and PageRank. Node
    /// positions are assigned in id order so iteration is deterministic.
    pub fn snapshot(&self) -> GraphSnapshot {
        let mut ids: Vec<&str> = self.nodes.keys().map(String::as_str).collect();
        ids.sort_unstable();

        let mut index = HashMap::with_capacity(ids.len());
        let mut nodes = Vec::with_capacity(ids.len());
        for (pos, id) in ids.iter().enumerate() {
            index.insert((*id).to_string(), pos);
            let node = &self.graph[self.nodes[*id]];
            nodes.push(match node {
                GraphNode::Entity(entity) => SnapshotNode::Entity(entity.clone()),
                GraphNode::Chunk { id } => SnapshotNode::Chunk { id: id.clone() },
            });
        }

        let mut out = vec![Vec::new(); ids.len()];
        for (pos, id) in ids.iter().enumerate() {
            let idx = self.nodes[*id];
            let mut edges: Vec<SnapshotEdge> = self
                .graph
                .edges_directed(idx, Direction::Outgoing)
                .map(|e| SnapshotEdge {
                    target: index[self.graph[e.target()].id()],
                    kind: e.weight().kind,
                    weight: e.weight().effective_weight(),
                })
                .collect();
            edges.sort_by(|a, b| a.target.cmp(&b.target).then(a.kind.cmp(&b.kind)));
            out[pos] = edges;
        }

        GraphSnapshot {
            inner: Arc::new(SnapshotInner {
                epoch: self.epoch,
                nodes,
                index,
                out,
            }),
        }
    }
}

// ============================================================================
// SNAPSHOT
// ============================================================================

/// A snapshot node payload
#[derive(Debug, Clone)]
pub enum SnapshotNode {
    /// Entity node with its payload at snapshot time
    Entity(Entity),
    /// Chunk node
    Chunk {
        /// Chunk id
        id: String,
    },
}

impl SnapshotNode {
    /// The node id
    pub fn id(&self) -> &str {
        match self {
            SnapshotNode::Entity(entity) => &entity.id,
            SnapshotNode::Chunk { id } => id,
        }
    }

    /// Whether this is an entity node
    pub fn is_entity(&self) -> bool {
        matches!(self, SnapshotNode::Entity(_))
    }
}

/// An edge in a snapshot, carrying the effective weight
#[derive(Debug, Clone, Copy)]
pub struct SnapshotEdge {
    /// Target node position
    pub target: usize,
    /// Edge type
    pub kind: EdgeKind,
    /// Effective weight (weight × confidence)
    pub weight: f32,
}

#[derive(Debug)]
struct SnapshotInner {
    epoch: u64,
    nodes: Vec<SnapshotNode>,
    index: HashMap<String, usize>,
    out: Vec<Vec<SnapshotEdge>>,
}

/// Immutable, cheaply cloneable view of the graph at one epoch
#[derive(Debug, Clone)]
pub struct GraphSnapshot {
    inner: Arc<SnapshotInner>,
}

impl GraphSnapshot {
    /// Epoch the snapshot was taken at
    pub fn epoch(&self) -> u64 {
        self.inner.epoch
    }

    /// Node count
    pub fn len(&self) -> usize {
        self.inner.nodes.len()
    }

    /// Whether the snapshot holds no nodes
    pub fn is_empty(&self) -> bool {
        self.inner.nodes.is_empty()
    }

    /// Number of entity nodes
    pub fn entity_count(&self) -> usize {
        self.inner.nodes.iter().filter(|n| n.is_entity()).count()
    }

    /// Position of a node id
    pub fn position(&self, id: &str) -> Option<usize> {
        self.inner.index.get(id).copied()
    }

    /// Node payload at a position
    pub fn node(&self, pos: usize) -> &SnapshotNode {
        &self.inner.nodes[pos]
    }

    /// Outgoing edges at a position, sorted by (target, kind)
    pub fn out_edges(&self, pos: usize) -> &[SnapshotEdge] {
        &self.inner.out[pos]
    }

    /// Iterate entity nodes as (position, entity)
    pub fn entity_nodes(&self) -> impl Iterator<Item = (usize, &Entity)> {
        self.inner
            .nodes
            .iter()
            .enumerate()
            .filter_map(|(pos, node)| match node {
                SnapshotNode::Entity(entity) => Some((pos, entity)),
                SnapshotNode::Chunk { .. } => None,
            })
    }
}

// ============================================================================
// TESTS
// ============================================================================
