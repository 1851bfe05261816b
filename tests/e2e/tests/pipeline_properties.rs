//! Quantified pipeline invariants
//!
//! Properties that must hold for all inputs: token budget, core size,
//! determinism, dedup distance, degraded-path well-formedness and the
//! idempotence guarantees.

use std::sync::Arc;

use engram_core::{
    ChunkInput, EngramConfig, EngramError, EntityKind, LifecycleTag, MemoryEngine, OutcomeLabel,
    QueryMode, QueryOptions, QueryWarning, TierKind, TokenCounter, cosine_similarity,
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

/// Seven chunks sharing a 0.6 component toward the query axis with
/// pairwise-dissimilar remainders: all recall at 0.6, none dedup
fn corpus_engine(query: &str) -> (MemoryEngine, Arc<MemoryVectorIndex>) {
    let index = Arc::new(MemoryVectorIndex::new());
    let embedder = TableEmbedder::new().with_entry(query, &[1.0]);
    let engine = MemoryEngine::new(
        config(),
        collaborators(
            TableExtractor::new(&[]),
            embedder,
            Arc::clone(&index),
            None,
        ),
    )
    .unwrap();

    for i in 0..7usize {
        let mut embedding = vec![0.0_f32; DIM];
        embedding[0] = 0.6;
        embedding[1 + i % 7] = 0.8;
        index_chunk(
            &engine,
            &index,
            &format!("c-{i}"),
            &format!("Note {i} keeps a moderately long body of prose about topic {i} so token counts are realistic."),
            embedding,
            &[],
        );
    }
    (engine, index)
}

// ----------------------------------------------------------------------------
// Budget + core size
// ----------------------------------------------------------------------------

#[tokio::test]
async fn token_budget_holds_for_every_exit() {
    let query = "topic overview";
    let (engine, _index) = corpus_engine(query);
    let counter = TokenCounter::new().unwrap();

    for budget in [40_usize, 120, 100_000] {
        let result = engine
            .query(
                query,
                QueryOptions {
                    mode: Some(QueryMode::Planning),
                    token_budget: Some(budget),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let total: usize = result
            .core
            .iter()
            .chain(result.extended.iter())
            .map(|chunk| counter.count(&chunk.text))
            .sum();
        assert!(
            total <= budget,
            "budget {budget} violated with {total} tokens"
        );

        if budget == 40 {
            // Tight budgets cut the core itself, flagged loudly
            assert!(result.warnings.contains(&QueryWarning::CoreTruncated));
        }
        if budget == 100_000 {
            assert_eq!(result.core.len(), 5);
            assert_eq!(result.extended.len(), 2, "planning keeps the tail");
        }
    }
}

#[tokio::test]
async fn core_size_respects_top_k() {
    let query = "topic overview";
    let (engine, _index) = corpus_engine(query);
    let result = engine
        .query(
            query,
            QueryOptions {
                top_k: Some(3),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert!(result.core.len() <= 3);
}

// ----------------------------------------------------------------------------
// Determinism
// ----------------------------------------------------------------------------

#[tokio::test]
async fn identical_queries_produce_identical_cores() {
    let query = "topic overview";
    let (engine, _index) = corpus_engine(query);

    let first = engine.query(query, QueryOptions::default()).await.unwrap();
    let second = engine.query(query, QueryOptions::default()).await.unwrap();

    let ids = |result: &engram_core::QueryResult| {
        result.core.iter().map(|c| c.id.clone()).collect::<Vec<_>>()
    };
    assert_eq!(ids(&first), ids(&second));

    let first_trace = engine.explain(first.trace_id).unwrap();
    let second_trace = engine.explain(second.trace_id).unwrap();
    assert_eq!(first_trace.fused_core, second_trace.fused_core);
    assert_eq!(first_trace.fingerprint, second_trace.fingerprint);
}

// ----------------------------------------------------------------------------
// Dedup distance
// ----------------------------------------------------------------------------

#[tokio::test]
async fn returned_context_is_pairwise_dissimilar() {
    let query = "topic overview";
    let (engine, _index) = corpus_engine(query);
    let result = engine
        .query(
            query,
            QueryOptions {
                mode: Some(QueryMode::Brainstorming),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let all: Vec<&engram_core::Chunk> =
        result.core.iter().chain(result.extended.iter()).collect();
    for (i, a) in all.iter().enumerate() {
        for b in all.iter().skip(i + 1) {
            let similarity = cosine_similarity(&a.embedding, &b.embedding);
            assert!(
                similarity < 0.95,
                "{} and {} are near-duplicates ({similarity})",
                a.id,
                b.id
            );
        }
    }
}

// ----------------------------------------------------------------------------
// Boundary behavior
// ----------------------------------------------------------------------------

#[tokio::test]
async fn empty_query_fails_fast() {
    let (engine, _index) = corpus_engine("whatever");
    assert!(matches!(
        engine.query("", QueryOptions::default()).await,
        Err(EngramError::InvalidInput(_))
    ));
    assert!(matches!(
        engine.query("   \n", QueryOptions::default()).await,
        Err(EngramError::InvalidInput(_))
    ));
}

#[tokio::test]
async fn no_matching_entities_degrades_to_vector_only() {
    let query = "topic overview";
    let (engine, _index) = corpus_engine(query);
    let result = engine.query(query, QueryOptions::default()).await.unwrap();

    assert!(!result.core.is_empty(), "vector path still answers");
    let trace = engine.explain(result.trace_id).unwrap();
    let graph_run = trace.tier_run(TierKind::HippoRag).unwrap();
    assert_eq!(graph_run.candidates, 0);
    assert!(trace.warnings.contains(&QueryWarning::NoGraphEntities));
}

#[tokio::test]
async fn all_candidates_below_floor_yields_empty_core() {
    let query = "orthogonal question";
    let index = Arc::new(MemoryVectorIndex::new());
    // Query axis is orthogonal to every indexed chunk
    let embedder = TableEmbedder::new().with_entry(query, &[0.0, 0.0, 0.0, 1.0]);
    let engine = MemoryEngine::new(
        config(),
        collaborators(TableExtractor::new(&[]), embedder, Arc::clone(&index), None),
    )
    .unwrap();
    index_chunk(&engine, &index, "c-1", "note one", vec_of(&[1.0]), &[]);
    index_chunk(&engine, &index, "c-2", "note two", vec_of(&[0.0, 1.0]), &[]);

    let result = engine.query(query, QueryOptions::default()).await.unwrap();
    assert!(result.core.is_empty());
    assert!(result.warnings.contains(&QueryWarning::AllFiltered));
}

#[tokio::test]
async fn probabilistic_timeout_is_absorbed() {
    let query = "likelihood of churn";
    let index = Arc::new(MemoryVectorIndex::new());
    let embedder = TableEmbedder::new().with_entry(query, &[1.0]);
    let extractor = TableExtractor::new(&[("churn", EntityKind::Concept)]);
    let bayes = ScriptedBayes::new().timing_out();
    let engine = MemoryEngine::new(
        config(),
        collaborators(extractor, embedder, Arc::clone(&index), Some(bayes)),
    )
    .unwrap();
    index_chunk(
        &engine,
        &index,
        "c-1",
        "Churn analysis notes",
        vec_of(&[1.0]),
        &[("churn", EntityKind::Concept)],
    );

    let result = engine
        .query(
            query,
            QueryOptions {
                mode: Some(QueryMode::Planning),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert!(!result.core.is_empty(), "other tiers still answer");
    assert!(
        result
            .warnings
            .contains(&QueryWarning::TierTimeout(TierKind::Probabilistic))
    );
}

// ----------------------------------------------------------------------------
// Idempotence
// ----------------------------------------------------------------------------

#[tokio::test]
async fn replay_matches_on_unchanged_store() {
    let query = "topic overview";
    let (engine, index) = corpus_engine(query);
    let result = engine.query(query, QueryOptions::default()).await.unwrap();

    let replay = engine.replay(result.trace_id).await.unwrap();
    assert!(replay.diff.identical, "replay reproduces the original core");
    assert!(!replay.diff.non_deterministic);

    // Changing the graph marks replays, which still succeed
    index_chunk(&engine, &index, "c-new", "fresh note", vec_of(&[0.3, 0.3]), &[]);
    let replay = engine.replay(result.trace_id).await.unwrap();
    assert!(replay.diff.non_deterministic);
}

#[test]
fn reindexing_a_chunk_is_idempotent() {
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

    for _ in 0..2 {
        index_chunk(
            &engine,
            &index,
            "c-1",
            "note",
            vec_of(&[1.0]),
            &[("Alpha", EntityKind::Concept)],
        );
    }

    let stats = engine.stats().unwrap();
    assert_eq!(stats.chunks_per_stage.values().sum::<usize>(), 1);
    assert_eq!(stats.entities, 1);
    assert_eq!(
        stats.edges_per_kind.get(&engram_core::EdgeKind::Mentions),
        Some(&1)
    );
}

#[test]
fn entity_consolidation_is_idempotent() {
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
        "USA note",
        vec_of(&[1.0]),
        &[("USA", EntityKind::Place)],
    );
    index_chunk(
        &engine,
        &index,
        "c-2",
        "United States note",
        vec_of(&[0.0, 1.0]),
        &[("United States", EntityKind::Place)],
    );
    assert_eq!(engine.stats().unwrap().entities, 2);

    let redirected = engine.consolidate_entities("united_states", "usa").unwrap();
    assert_eq!(redirected, 1, "the duplicate's mention moves to the canonical node");
    assert_eq!(engine.stats().unwrap().entities, 1);

    // Second consolidation is a no-op
    assert_eq!(engine.consolidate_entities("united_states", "usa").unwrap(), 0);
    assert_eq!(engine.stats().unwrap().entities, 1);
}

// ----------------------------------------------------------------------------
// Failure attribution over real traces
// ----------------------------------------------------------------------------

#[tokio::test]
async fn attribution_reads_stored_traces() {
    let query = "topic overview";
    let (engine, _index) = corpus_engine(query);
    let result = engine.query(query, QueryOptions::default()).await.unwrap();

    // A healthy trace with a wrong downstream answer is a model bug
    let kind = engine
        .classify_failure(result.trace_id, OutcomeLabel::WrongAnswer)
        .unwrap();
    assert_eq!(kind.code(), "model_bug");
}
