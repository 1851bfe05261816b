//! End-to-end retrieval scenarios
//!
//! Each test drives the engine through its public surface only, with
//! deterministic mock collaborators standing in for NER, embedding,
//! the vector index and the belief network.

use std::sync::Arc;
use std::time::Duration;

use engram_core::{
    ChunkInput, EngramConfig, EngramError, EntityKind, GraphError, KnowledgeGraph, LifecycleTag,
    MemoryEngine, QueryMode, QueryOptions, QueryWarning, TierKind, multi_hop,
};
use engram_e2e_tests::mocks::{
    DIM, MemoryVectorIndex, ScriptedBayes, TableEmbedder, TableExtractor, collaborators, vec_of,
};

fn config() -> EngramConfig {
    let mut config = EngramConfig::default();
    config.embedding_dim = DIM;
    config.deadlines.query_ms = 5_000;
    config
}

fn index_chunk(
    engine: &MemoryEngine,
    index: &MemoryVectorIndex,
    id: &str,
    text: &str,
    embedding: Vec<f32>,
    mentions: &[(&str, EntityKind)],
) {
    engine
        .index_chunk(ChunkInput {
            id: Some(id.to_string()),
            text: text.to_string(),
            source_path: format!("notes/{id}.md"),
            chunk_index: 0,
            embedding: embedding.clone(),
            tag: LifecycleTag::Temporary,
            mentions: mentions
                .iter()
                .map(|(surface, kind)| engram_core::ExtractedEntity {
                    surface: surface.to_string(),
                    kind: *kind,
                })
                .collect(),
        })
        .expect("chunk indexes");
    index.add(id, embedding);
}

// ----------------------------------------------------------------------------
// Scenario 1: single-hop with agreement between tiers
// ----------------------------------------------------------------------------

#[tokio::test]
async fn single_hop_with_agreement() {
    let query = "What did Elon Musk do at Tesla?";
    let index = Arc::new(MemoryVectorIndex::new());
    let embedder = TableEmbedder::new().with_entry(query, &[1.0]);
    let extractor = TableExtractor::new(&[
        ("Tesla", EntityKind::Org),
        ("Elon Musk", EntityKind::Person),
    ]);
    let engine = MemoryEngine::new(
        config(),
        collaborators(extractor, embedder, Arc::clone(&index), None),
    )
    .unwrap();

    index_chunk(
        &engine,
        &index,
        "c-1",
        "Elon Musk co-founded Tesla and led it as CEO.",
        vec_of(&[1.0]),
        &[("Tesla", EntityKind::Org), ("Elon Musk", EntityKind::Person)],
    );

    let result = engine.query(query, QueryOptions::default()).await.unwrap();
    assert_eq!(result.core.len(), 1);
    assert_eq!(result.core[0].id, "c-1");
    assert!(result.extended.is_empty(), "execution mode has no extended tail");

    let trace = engine.explain(result.trace_id).unwrap();
    assert_eq!(trace.mode, QueryMode::Execution);
    assert_eq!(trace.plan.tiers, vec![TierKind::Vector, TierKind::HippoRag]);
    assert!(
        trace.fused_core[0].score >= 0.5,
        "tier agreement pushes the fused score up, got {}",
        trace.fused_core[0].score
    );
}

// ----------------------------------------------------------------------------
// Scenario 2: multi-hop, graph-only advantage
// ----------------------------------------------------------------------------

#[tokio::test]
async fn multi_hop_graph_only_advantage() {
    let query = "What company did the Tesla founder start before Tesla?";
    let index = Arc::new(MemoryVectorIndex::new());
    // The query embeds next to c-1; c-2 has no lexical/vector overlap
    let embedder = TableEmbedder::new().with_entry(query, &[1.0]);
    let extractor = TableExtractor::new(&[
        ("Tesla", EntityKind::Org),
        ("Elon Musk", EntityKind::Person),
        ("PayPal", EntityKind::Org),
    ]);
    let engine = MemoryEngine::new(
        config(),
        collaborators(extractor, embedder, Arc::clone(&index), None),
    )
    .unwrap();

    index_chunk(
        &engine,
        &index,
        "c-1",
        "Elon Musk co-founded Tesla in 2003.",
        vec_of(&[1.0]),
        &[("Tesla", EntityKind::Org), ("Elon Musk", EntityKind::Person)],
    );
    index_chunk(
        &engine,
        &index,
        "c-2",
        "PayPal grew out of X.com, an online bank.",
        vec_of(&[0.0, 1.0]),
        &[("PayPal", EntityKind::Org)],
    );
    // Entity chain written by the external consolidation pipeline
    engine.add_relation("tesla", "elon_musk", "related_to", 1.0, 1.0).unwrap();
    engine.add_relation("elon_musk", "paypal", "related_to", 1.0, 1.0).unwrap();

    let planning = QueryOptions {
        mode: Some(QueryMode::Planning),
        ..Default::default()
    };
    let result = engine.query(query, planning.clone()).await.unwrap();
    let core_ids: Vec<&str> = result.core.iter().map(|c| c.id.as_str()).collect();
    assert!(
        core_ids.contains(&"c-2"),
        "BFS + PageRank reach c-2 through the entity chain, got {core_ids:?}"
    );

    let trace = engine.explain(result.trace_id).unwrap();
    assert!(trace.plan.multi_hop, "planning mode widens by multi-hop");

    // Vector tier alone misses c-2 entirely
    let vector_only = QueryOptions {
        mode: Some(QueryMode::Planning),
        tiers: Some(vec![TierKind::Vector]),
        ..Default::default()
    };
    let result = engine.query(query, vector_only).await.unwrap();
    assert!(
        result.core.iter().all(|c| c.id != "c-2"),
        "no lexical overlap means vector recall cannot see c-2"
    );
}

// ----------------------------------------------------------------------------
// Scenario 3: execution fast-path drops the probabilistic tier
// ----------------------------------------------------------------------------

#[tokio::test]
async fn execution_fast_path_skips_probabilistic() {
    let index = Arc::new(MemoryVectorIndex::new());
    let embedder = TableEmbedder::new();
    let extractor = TableExtractor::new(&[("rain", EntityKind::Concept)]);
    let bayes = ScriptedBayes::new().with_scores(vec![("c-1", 0.9, 0.2)]);
    let engine = MemoryEngine::new(
        config(),
        collaborators(extractor, embedder, Arc::clone(&index), Some(bayes)),
    )
    .unwrap();

    let result = engine
        .query(
            "P(rain|cloud)?",
            QueryOptions {
                mode: Some(QueryMode::Execution),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert!(result.warnings.contains(&QueryWarning::ProbSkippedByMode));
    let trace = engine.explain(result.trace_id).unwrap();
    assert!(
        !trace.plan.tiers.contains(&TierKind::Probabilistic),
        "execution mode drops the probabilistic tier despite the pattern"
    );
    assert!(trace.tier_run(TierKind::Probabilistic).is_none());
}

// ----------------------------------------------------------------------------
// Scenario 4: near-duplicate chunks collapse in the dedup stage
// ----------------------------------------------------------------------------

#[tokio::test]
async fn dedup_drops_lower_scored_near_duplicate() {
    let query = "deployment checklist";
    let index = Arc::new(MemoryVectorIndex::new());
    let embedder = TableEmbedder::new().with_entry(query, &[1.0]);
    let extractor = TableExtractor::new(&[]);
    let engine = MemoryEngine::new(
        config(),
        collaborators(extractor, embedder, Arc::clone(&index), None),
    )
    .unwrap();

    // c-3 and c-3b embed at cosine ~0.97, both well above the floor
    index_chunk(&engine, &index, "c-3", "Deployment checklist v1", vec_of(&[1.0]), &[]);
    index_chunk(
        &engine,
        &index,
        "c-3b",
        "Deployment checklist v1 (copy)",
        vec_of(&[0.97, 0.243_086_4]),
        &[],
    );

    let result = engine.query(query, QueryOptions::default()).await.unwrap();
    let core_ids: Vec<&str> = result.core.iter().map(|c| c.id.as_str()).collect();
    assert_eq!(core_ids, vec!["c-3"], "only the higher-scored twin survives");

    let trace = engine.explain(result.trace_id).unwrap();
    assert_eq!(trace.dedup_removed, 1);
}

// ----------------------------------------------------------------------------
// Scenario 5: deadline cut cancels the slow graph tier, vector survives
// ----------------------------------------------------------------------------

#[tokio::test]
async fn deadline_cut_returns_partial_results() {
    let query = "What did Tesla Motors Inc announce?";
    let index = Arc::new(MemoryVectorIndex::new());
    // Fuzzy entity matching inside the graph tier hits the slow
    // embedding below and blows through the tier budget
    let embedder = TableEmbedder::new()
        .with_entry(query, &[1.0])
        .with_delay("Tesla Motors Inc", Duration::from_millis(500));
    let extractor = TableExtractor::new(&[("Tesla Motors Inc", EntityKind::Org)]);
    let engine = MemoryEngine::new(
        config(),
        collaborators(extractor, embedder, Arc::clone(&index), None),
    )
    .unwrap();

    index_chunk(
        &engine,
        &index,
        "c-1",
        "Tesla announced a new battery pack.",
        vec_of(&[1.0]),
        &[("Tesla", EntityKind::Org)],
    );

    let result = engine
        .query(
            query,
            QueryOptions {
                deadline_ms: Some(50),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert!(!result.core.is_empty(), "vector tier still answers");
    assert_eq!(result.core[0].id, "c-1");
    assert!(result.warnings.contains(&QueryWarning::TierTimeout(TierKind::HippoRag)));

    let trace = engine.explain(result.trace_id).unwrap();
    let graph_run = trace.tier_run(TierKind::HippoRag).unwrap();
    assert!(graph_run.timed_out);
    assert_eq!(graph_run.candidates, 0);
    let vector_run = trace.tier_run(TierKind::Vector).unwrap();
    assert!(!vector_run.timed_out);
    assert!(vector_run.candidates > 0);
}

// ----------------------------------------------------------------------------
// Scenario 6: cyclic graph terminates with each entity seen once
// ----------------------------------------------------------------------------

#[test]
fn cyclic_graph_multi_hop_terminates() {
    let mut graph = KnowledgeGraph::new();
    for id in ["a", "b", "c"] {
        graph
            .add_entity(engram_core::Entity {
                id: id.to_string(),
                display: id.to_string(),
                kind: EntityKind::Concept,
                frequency: 0,
            })
            .unwrap();
    }
    graph.add_edge("a", "b", engram_core::EdgeKind::RelatedTo, 1.0, 1.0).unwrap();
    graph.add_edge("b", "c", engram_core::EdgeKind::RelatedTo, 1.0, 1.0).unwrap();
    graph.add_edge("c", "a", engram_core::EdgeKind::RelatedTo, 1.0, 1.0).unwrap();

    let discovered = multi_hop(&graph.snapshot(), &["a".to_string()], 10, None);
    let mut ids: Vec<&str> = discovered.iter().map(|d| d.entity_id.as_str()).collect();
    ids.sort_unstable();
    assert_eq!(ids, vec!["a", "b", "c"]);
    assert_eq!(discovered.len(), 3, "each entity exactly once");
}

// ----------------------------------------------------------------------------
// Scenario 7: misspelled edge type fails loudly, graph unchanged
// ----------------------------------------------------------------------------

#[tokio::test]
async fn invalid_edge_type_is_loud_and_harmless() {
    let index = Arc::new(MemoryVectorIndex::new());
    let engine = MemoryEngine::new(
        config(),
        collaborators(
            TableExtractor::new(&[]),
            TableEmbedder::new(),
            Arc::clone(&index),
            None,
        ),
    )
    .unwrap();

    index_chunk(
        &engine,
        &index,
        "c-1",
        "note",
        vec_of(&[1.0]),
        &[("Alpha", EntityKind::Concept), ("Beta", EntityKind::Concept)],
    );
    let edges_before = engine.stats().unwrap().edges_per_kind;

    // Misspelling of related_to
    let err = engine
        .add_relation("alpha", "beta", "relates_to", 0.8, 1.0)
        .unwrap_err();
    assert!(
        matches!(
            &err,
            EngramError::Graph(GraphError::InvalidEdgeType(name)) if name == "relates_to"
        ),
        "got {err:?}"
    );
    assert_eq!(engine.stats().unwrap().edges_per_kind, edges_before);

    // The correctly spelled type works
    engine.add_relation("alpha", "beta", "related_to", 0.8, 1.0).unwrap();
    assert_eq!(
        engine
            .stats()
            .unwrap()
            .edges_per_kind
            .get(&engram_core::EdgeKind::RelatedTo),
        Some(&1)
    );
}
