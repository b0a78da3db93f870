//! End-to-end pipeline scenarios against the in-memory graph adapter

use async_trait::async_trait;
use graphscribe_adapter_memory::{MemoryGraph, MemoryGraphConfig};
use graphscribe_core::check_create::CheckCreateConfig;
use graphscribe_core::errors::{LlmError, WorkerError};
use graphscribe_core::pipeline::{ExtractionPipeline, PipelineConfig};
use graphscribe_core::traits::{LlmClient, LlmResponse};
use graphscribe_core::types::{CollectionId, Entity};
use serde_json::{json, Map, Value};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

const CHUNK_COLLECTION: &str = "col_chunks";
const TARGET_COLLECTION: &str = "col_main";

const CHUNK_TEXT: &str = "Call me Ishmael. Some years ago - never mind how long precisely - \
                          Captain Ahab commanded the Pequod and hunted the White Whale.";

/// LlmClient double replaying one canned payload.
struct ScriptedLlm {
    content: String,
    calls: AtomicU32,
}

impl ScriptedLlm {
    fn returning(value: Value) -> Arc<Self> {
        Arc::new(Self {
            content: value.to_string(),
            calls: AtomicU32::new(0),
        })
    }

    fn call_count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LlmClient for ScriptedLlm {
    async fn call(
        &self,
        _system_prompt: &str,
        _user_prompt: &str,
    ) -> Result<LlmResponse, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(LlmResponse {
            content: self.content.clone(),
            prompt_tokens: 100,
            completion_tokens: 50,
            total_tokens: 150,
            cost_usd: 0.0005,
        })
    }
}

fn fast_config() -> PipelineConfig {
    PipelineConfig {
        check_create: CheckCreateConfig {
            settle_ms: 1,
            recheck_ms: 1,
            jitter_ms: 1,
            ..CheckCreateConfig::default()
        },
        ..PipelineConfig::default()
    }
}

async fn seed_chunk(graph: &MemoryGraph, label: &str, text: &str) -> String {
    let mut properties = Map::new();
    properties.insert("label".into(), json!(label));
    properties.insert("text".into(), json!(text));
    graph
        .seed_entity("chunk", Some(CHUNK_COLLECTION), properties)
        .await
}

/// Fire-and-forget update batches need a beat to land.
async fn settle_updates() {
    tokio::time::sleep(Duration::from_millis(100)).await;
}

fn edge<'a>(
    entity: &'a Entity,
    predicate: &str,
) -> Option<&'a graphscribe_core::types::Relationship> {
    entity.relationships.iter().find(|r| r.predicate == predicate)
}

#[tokio::test]
async fn single_new_entity_with_full_provenance() {
    let graph = Arc::new(MemoryGraph::new());
    let chunk_id = seed_chunk(&graph, "chunk-0001", CHUNK_TEXT).await;
    let llm = ScriptedLlm::returning(json!([
        {"op": "create", "label": "Captain Ahab", "entity_type": "person",
         "description": "captain of the Pequod",
         "properties": {"role": "captain", "ship": "Pequod"}}
    ]));

    let pipeline = ExtractionPipeline::with_config(graph.clone(), llm.clone(), fast_config());
    let outcome = pipeline
        .run(&chunk_id, &CollectionId::new(TARGET_COLLECTION))
        .await
        .unwrap();
    settle_updates().await;

    assert_eq!(outcome.new_entity_ids.len(), 1);
    assert_eq!(outcome.stats.entities_created, 1);
    assert_eq!(llm.call_count(), 1);

    // The entity exists under its normalized label, with the create payload.
    let ahabs = graph
        .entities_labelled(TARGET_COLLECTION, "captain ahab", "person")
        .await;
    assert_eq!(ahabs.len(), 1);
    let ahab = &ahabs[0];
    assert_eq!(ahab.id, outcome.new_entity_ids[0]);
    assert_eq!(ahab.properties["role"], "captain");
    assert_eq!(ahab.properties["description"], "captain of the Pequod");

    // Provenance: entity -> chunk, chunk -> entity, collection -> chunk.
    let provenance = edge(ahab, "extracted_from").expect("extracted_from edge");
    assert_eq!(provenance.peer, chunk_id);
    assert_eq!(provenance.properties["source"]["id"], chunk_id.as_str());

    let chunk = graph.entity(&chunk_id).await.unwrap();
    let backlink = edge(&chunk, "extracted_entity").expect("extracted_entity edge");
    assert_eq!(backlink.peer, ahab.id);

    let collection = graph.entity(TARGET_COLLECTION).await.unwrap();
    let contains = edge(&collection, "contains").expect("contains edge");
    assert_eq!(contains.peer, chunk_id);
    assert_eq!(contains.properties["relationship_type"], "processed_chunk");
}

#[tokio::test]
async fn concurrent_jobs_converge_on_one_entity() {
    // The index hides fresh unsynced writes for a while, exactly the window
    // the race-resolution protocol exists for.
    let graph = Arc::new(MemoryGraph::with_config(MemoryGraphConfig {
        index_lag: Duration::from_millis(150),
        ..Default::default()
    }));
    let chunk_a = seed_chunk(&graph, "chunk-a", CHUNK_TEXT).await;
    let chunk_b = seed_chunk(&graph, "chunk-b", CHUNK_TEXT).await;

    let payload = json!([
        {"op": "create", "label": "Queequeg", "entity_type": "person",
         "description": "harpooneer", "properties": {"role": "harpooneer", "home": "Rokovoko"}}
    ]);
    let config = PipelineConfig {
        check_create: CheckCreateConfig {
            settle_ms: 60,
            recheck_ms: 80,
            jitter_ms: 20,
            ..CheckCreateConfig::default()
        },
        ..PipelineConfig::default()
    };

    let job_a = {
        let pipeline = ExtractionPipeline::with_config(
            graph.clone(),
            ScriptedLlm::returning(payload.clone()),
            config.clone(),
        );
        let collection = CollectionId::new(TARGET_COLLECTION);
        async move { pipeline.run(&chunk_a, &collection).await }
    };
    let job_b = {
        let pipeline = ExtractionPipeline::with_config(
            graph.clone(),
            ScriptedLlm::returning(payload),
            config,
        );
        let collection = CollectionId::new(TARGET_COLLECTION);
        async move { pipeline.run(&chunk_b, &collection).await }
    };

    let (outcome_a, outcome_b) = tokio::join!(job_a, job_b);
    let outcome_a = outcome_a.unwrap();
    let outcome_b = outcome_b.unwrap();
    settle_updates().await;

    // Exactly one survivor in the collection.
    let survivors = graph
        .entities_labelled(TARGET_COLLECTION, "queequeg", "person")
        .await;
    assert_eq!(survivors.len(), 1, "duplicate Queequeg survived the race");

    // At most one job hands the id off as new, and no handed-off id points
    // at a deleted duplicate.
    let all_new: Vec<&String> = outcome_a
        .new_entity_ids
        .iter()
        .chain(outcome_b.new_entity_ids.iter())
        .collect();
    assert!(all_new.len() <= 1, "both jobs claimed the entity as new");
    for id in all_new {
        assert!(
            graph.entity(id).await.is_some(),
            "handed-off id {id} was deleted"
        );
    }
}

#[tokio::test]
async fn orphan_target_gets_referenced_by_back_edge() {
    let graph = Arc::new(MemoryGraph::new());
    let chunk_id = seed_chunk(&graph, "chunk-0001", CHUNK_TEXT).await;
    let llm = ScriptedLlm::returning(json!([
        {"op": "create", "label": "Ahab", "entity_type": "person", "description": "the captain"},
        {"op": "create", "label": "Moby Dick", "entity_type": "animal", "description": "the whale"},
        {"op": "add_relationship", "subject": "Ahab", "predicate": "hunts",
         "target": "Moby Dick", "description": "the chase"}
    ]));

    let pipeline = ExtractionPipeline::with_config(graph.clone(), llm, fast_config());
    let outcome = pipeline
        .run(&chunk_id, &CollectionId::new(TARGET_COLLECTION))
        .await
        .unwrap();
    settle_updates().await;

    assert_eq!(outcome.new_entity_ids.len(), 2);

    let ahabs = graph.entities_labelled(TARGET_COLLECTION, "ahab", "person").await;
    let whales = graph
        .entities_labelled(TARGET_COLLECTION, "moby dick", "animal")
        .await;
    let (ahab, whale) = (&ahabs[0], &whales[0]);

    let hunts = edge(ahab, "hunts").expect("hunts edge");
    assert_eq!(hunts.peer, whale.id);

    // The whale is only ever a target: it gets the back-edge, with the
    // originating predicate as context.
    let back = edge(whale, "referenced_by").expect("referenced_by edge");
    assert_eq!(back.peer, ahab.id);
    assert_eq!(back.properties["context"], "hunts");

    // Both ends carry chunk provenance.
    assert!(edge(ahab, "extracted_from").is_some());
    assert!(edge(whale, "extracted_from").is_some());
}

#[tokio::test]
async fn quote_markers_resolve_to_source_text() {
    let graph = Arc::new(MemoryGraph::new());
    let chunk_id = seed_chunk(&graph, "chunk-0001", CHUNK_TEXT).await;
    let llm = ScriptedLlm::returning(json!([
        {"op": "create", "label": "Ishmael", "entity_type": "person", "description": "narrator"},
        {"op": "create", "label": "Pequod", "entity_type": "ship", "description": "the whaler"},
        {"op": "add_relationship", "subject": "Ishmael", "predicate": "sails_on",
         "target": "Pequod", "description": "the voyage",
         "quote_start": "Call me", "quote_end": "years ago"}
    ]));

    let pipeline = ExtractionPipeline::with_config(graph.clone(), llm, fast_config());
    pipeline
        .run(&chunk_id, &CollectionId::new(TARGET_COLLECTION))
        .await
        .unwrap();
    settle_updates().await;

    let ishmaels = graph
        .entities_labelled(TARGET_COLLECTION, "ishmael", "person")
        .await;
    let sails = edge(&ishmaels[0], "sails_on").expect("sails_on edge");
    assert_eq!(
        sails.properties["source_text"],
        "Call me Ishmael. Some years ago"
    );
}

#[tokio::test]
async fn referenced_only_labels_are_created_implicitly() {
    let graph = Arc::new(MemoryGraph::new());
    let chunk_id = seed_chunk(&graph, "chunk-0001", CHUNK_TEXT).await;
    // The model forgot the create for the White Whale.
    let llm = ScriptedLlm::returning(json!([
        {"op": "create", "label": "Ahab", "entity_type": "person", "description": "the captain"},
        {"op": "add_relationship", "subject": "Ahab", "predicate": "hunts",
         "target": "the White Whale", "description": "the chase"}
    ]));

    let pipeline = ExtractionPipeline::with_config(graph.clone(), llm, fast_config());
    let outcome = pipeline
        .run(&chunk_id, &CollectionId::new(TARGET_COLLECTION))
        .await
        .unwrap();
    settle_updates().await;

    // Target exists as a generic entity and the relationship attached.
    assert_eq!(outcome.new_entity_ids.len(), 2);
    let whales = graph
        .entities_labelled(TARGET_COLLECTION, "the white whale", "entity")
        .await;
    assert_eq!(whales.len(), 1);
    let ahabs = graph.entities_labelled(TARGET_COLLECTION, "ahab", "person").await;
    assert_eq!(edge(&ahabs[0], "hunts").unwrap().peer, whales[0].id);
}

#[tokio::test]
async fn oversize_text_fails_before_any_model_call() {
    let graph = Arc::new(MemoryGraph::new());
    let big_text = "x".repeat(600 * 1024);
    let chunk_id = seed_chunk(&graph, "chunk-big", &big_text).await;
    let llm = ScriptedLlm::returning(json!([]));

    let pipeline = ExtractionPipeline::with_config(graph.clone(), llm.clone(), fast_config());
    let err = pipeline
        .run(&chunk_id, &CollectionId::new(TARGET_COLLECTION))
        .await
        .unwrap_err();

    assert!(matches!(err, WorkerError::InvalidInput(_)));
    assert_eq!(llm.call_count(), 0);
    assert_eq!(
        graph.counts().creates.load(Ordering::SeqCst),
        0,
        "no entities may be created for a rejected job"
    );
}

#[tokio::test]
async fn short_text_boundary_is_exact() {
    let graph = Arc::new(MemoryGraph::new());
    let llm = ScriptedLlm::returning(json!([]));

    let rejected = seed_chunk(&graph, "chunk-49", &"x".repeat(49)).await;
    let accepted = seed_chunk(&graph, "chunk-50", &"x".repeat(50)).await;

    let pipeline = ExtractionPipeline::with_config(graph.clone(), llm.clone(), fast_config());
    let collection = CollectionId::new(TARGET_COLLECTION);

    let err = pipeline.run(&rejected, &collection).await.unwrap_err();
    assert!(matches!(err, WorkerError::InvalidInput(_)));
    assert_eq!(llm.call_count(), 0);

    // 50 chars passes the gate; an empty extraction is not an error.
    let outcome = pipeline.run(&accepted, &collection).await.unwrap();
    assert!(outcome.new_entity_ids.is_empty());
    assert_eq!(llm.call_count(), 1);
}

#[tokio::test]
async fn missing_target_entity_is_invalid_input() {
    let graph = Arc::new(MemoryGraph::new());
    let llm = ScriptedLlm::returning(json!([]));
    let pipeline = ExtractionPipeline::with_config(graph, llm, fast_config());

    let err = pipeline
        .run("ent_missing", &CollectionId::new(TARGET_COLLECTION))
        .await
        .unwrap_err();
    assert!(matches!(err, WorkerError::InvalidInput(_)));
}

#[tokio::test]
async fn text_falls_back_to_the_content_endpoint() {
    let graph = Arc::new(MemoryGraph::new());
    let mut properties = Map::new();
    properties.insert("label".into(), json!("chunk-remote"));
    let chunk_id = graph
        .seed_entity("chunk", Some(CHUNK_COLLECTION), properties)
        .await;
    graph.seed_content(&chunk_id, CHUNK_TEXT).await;

    let llm = ScriptedLlm::returning(json!([
        {"op": "create", "label": "Ishmael", "entity_type": "person", "description": "narrator"}
    ]));
    let pipeline = ExtractionPipeline::with_config(graph.clone(), llm, fast_config());
    let outcome = pipeline
        .run(&chunk_id, &CollectionId::new(TARGET_COLLECTION))
        .await
        .unwrap();

    assert_eq!(outcome.new_entity_ids.len(), 1);
}

#[tokio::test]
async fn preexisting_entity_is_reused_not_handed_off() {
    let graph = Arc::new(MemoryGraph::new());
    let chunk_id = seed_chunk(&graph, "chunk-0001", CHUNK_TEXT).await;
    let mut properties = Map::new();
    properties.insert("label".into(), json!("captain ahab"));
    graph
        .seed_entity("person", Some(TARGET_COLLECTION), properties)
        .await;

    let llm = ScriptedLlm::returning(json!([
        {"op": "create", "label": "Captain Ahab", "entity_type": "person",
         "description": "the captain"}
    ]));
    let pipeline = ExtractionPipeline::with_config(graph.clone(), llm, fast_config());
    let outcome = pipeline
        .run(&chunk_id, &CollectionId::new(TARGET_COLLECTION))
        .await
        .unwrap();

    assert!(outcome.new_entity_ids.is_empty());
    assert_eq!(outcome.stats.entities_reused, 1);
    assert_eq!(graph.counts().creates.load(Ordering::SeqCst), 0);
    // One lookup is all it takes on the fast path.
    assert_eq!(graph.counts().lookups.load(Ordering::SeqCst), 1);
    // Still exactly one Ahab.
    assert_eq!(
        graph
            .entities_labelled(TARGET_COLLECTION, "captain ahab", "person")
            .await
            .len(),
        1
    );
}

#[tokio::test]
async fn update_batches_never_exceed_the_cap() {
    let graph = Arc::new(MemoryGraph::new());
    let chunk_id = seed_chunk(&graph, "chunk-huge", CHUNK_TEXT).await;

    // 1050 creates -> 1050 entity updates + chunk backlinks + collection
    // audit = 1052 updates, which must split into two requests.
    let creates: Vec<Value> = (0..1050)
        .map(|i| {
            json!({"op": "create", "label": format!("crewman {i}"),
                   "entity_type": "person", "description": "a sailor"})
        })
        .collect();
    let llm = ScriptedLlm::returning(Value::Array(creates));

    let pipeline = ExtractionPipeline::with_config(graph.clone(), llm, fast_config());
    let outcome = pipeline
        .run(&chunk_id, &CollectionId::new(TARGET_COLLECTION))
        .await
        .unwrap();
    settle_updates().await;

    assert_eq!(outcome.new_entity_ids.len(), 1050);
    assert_eq!(outcome.stats.updates_built, 1052);
    assert_eq!(outcome.stats.update_batches, 2);
    assert!(
        graph.counts().max_update_batch.load(Ordering::SeqCst) <= 1000,
        "an additive-update batch exceeded the 1000-entry cap"
    );
    assert_eq!(graph.counts().update_batches.load(Ordering::SeqCst), 2);
}
