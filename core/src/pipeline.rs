//! The extraction pipeline: one job from chunk fetch to handoff
//!
//! Sequential inside a job (fetch → LLM → parse), fanned out for
//! check-create, fire-and-forget for the update batches. Across jobs there
//! is no coordination beyond the check-create protocol itself.

use crate::check_create::{CheckCreateConfig, CheckCreateEngine};
use crate::errors::{GraphError, WorkerError};
use crate::normalize::normalize_label;
use crate::ops::{parse_operations, referenced_labels, CreateOp, ParsedOperations};
use crate::prompt;
use crate::traits::{GraphApi, LlmClient};
use crate::types::{CollectionId, Entity, EntityContext, EntitySpec, SourceRef};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Pipeline limits and knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Chunks shorter than this carry no extractable signal.
    pub min_text_chars: usize,
    /// Soft ceiling: longer texts are processed but flagged.
    pub warn_text_bytes: usize,
    /// Hard ceiling on the text payload.
    pub max_text_bytes: usize,
    /// Additive-update entries per request.
    pub update_batch_size: usize,
    pub check_create: CheckCreateConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            min_text_chars: 50,
            warn_text_bytes: 100 * 1024,
            max_text_bytes: 500 * 1024,
            update_batch_size: 1000,
            check_create: CheckCreateConfig::default(),
        }
    }
}

/// Counters surfaced in the job's per-step log lines.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobStats {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
    pub cost_usd: f64,
    pub creates: usize,
    pub relationships: usize,
    pub property_sets: usize,
    pub entities_created: usize,
    pub entities_reused: usize,
    pub updates_built: usize,
    pub update_batches: usize,
    pub races_detected: u64,
}

/// What a finished job hands back to the host: the ids this invocation
/// created (and only those), plus accounting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobOutcome {
    pub new_entity_ids: Vec<String>,
    pub stats: JobStats,
}

/// Orchestrates one extraction job against a graph service and an LLM.
pub struct ExtractionPipeline {
    graph: Arc<dyn GraphApi>,
    llm: Arc<dyn LlmClient>,
    config: PipelineConfig,
}

impl ExtractionPipeline {
    pub fn new(graph: Arc<dyn GraphApi>, llm: Arc<dyn LlmClient>) -> Self {
        Self::with_config(graph, llm, PipelineConfig::default())
    }

    pub fn with_config(
        graph: Arc<dyn GraphApi>,
        llm: Arc<dyn LlmClient>,
        config: PipelineConfig,
    ) -> Self {
        Self { graph, llm, config }
    }

    /// Run one job: extract from `target_entity`, materialize into
    /// `target_collection`, return the newly created entity ids.
    pub async fn run(
        &self,
        target_entity: &str,
        target_collection: &CollectionId,
    ) -> Result<JobOutcome, WorkerError> {
        if target_entity.is_empty() {
            return Err(WorkerError::InvalidInput(
                "job has no target entity".to_string(),
            ));
        }

        // Step 1: fetch the chunk with relationship previews expanded.
        let chunk = self
            .graph
            .get_entity(target_entity, true)
            .await
            .map_err(|e| match e {
                GraphError::NotFound(_) => WorkerError::InvalidInput(format!(
                    "target entity {target_entity} does not exist"
                )),
                other => WorkerError::Graph(other),
            })?;

        // Step 2: resolve and gate the text payload.
        let text = self.resolve_text(&chunk).await?;
        let char_count = text.chars().count();
        if char_count < self.config.min_text_chars {
            return Err(WorkerError::InvalidInput(format!(
                "chunk text too short: {char_count} chars (minimum {})",
                self.config.min_text_chars
            )));
        }
        if text.len() > self.config.max_text_bytes {
            return Err(WorkerError::InvalidInput(format!(
                "chunk text too large: {} bytes (maximum {})",
                text.len(),
                self.config.max_text_bytes
            )));
        }
        if text.len() > self.config.warn_text_bytes {
            warn!(bytes = text.len(), "chunk text is unusually large");
        }

        // Step 3: compose prompts and call the model.
        let ctx = EntityContext::from_entity(&chunk);
        let source = SourceRef {
            id: chunk.id.clone(),
            entity_type: chunk.entity_type.clone(),
            label: ctx.label.clone(),
        };
        let user = prompt::user_prompt(&ctx, &text);
        let response = self.llm.call(prompt::SYSTEM_PROMPT, &user).await?;

        let mut stats = JobStats {
            prompt_tokens: response.prompt_tokens,
            completion_tokens: response.completion_tokens,
            total_tokens: response.total_tokens,
            cost_usd: response.cost_usd,
            ..JobStats::default()
        };
        info!(
            prompt_tokens = stats.prompt_tokens,
            completion_tokens = stats.completion_tokens,
            cost_usd = stats.cost_usd,
            "model call complete"
        );

        // Step 4: parse, then declare creates for labels the model only
        // referenced so relationship targets always exist.
        let mut parsed = parse_operations(&response.content)?;
        self.append_implicit_creates(&mut parsed);
        stats.creates = parsed.creates.len();
        stats.relationships = parsed.relationships.len();
        stats.property_sets = parsed.properties.len();
        info!(
            creates = stats.creates,
            relationships = stats.relationships,
            properties = stats.property_sets,
            "operations parsed"
        );

        if parsed.creates.is_empty() {
            info!("model extracted nothing from this chunk");
            return Ok(JobOutcome {
                new_entity_ids: Vec::new(),
                stats,
            });
        }

        // Step 5: race-resolved dedup of every entity.
        let engine =
            CheckCreateEngine::with_config(self.graph.clone(), self.config.check_create.clone());
        let specs = parsed
            .creates
            .iter()
            .map(|c| EntitySpec::new(c.label.clone(), c.entity_type.clone()))
            .collect();
        let results = engine.batch(target_collection, specs).await?;
        stats.entities_created = results.iter().filter(|r| r.is_new).count();
        stats.entities_reused = results.len() - stats.entities_created;
        stats.races_detected = engine.races_detected();
        info!(
            created = stats.entities_created,
            reused = stats.entities_reused,
            races = stats.races_detected,
            "entities resolved"
        );

        // Step 6: build the additive updates and fire them without awaiting;
        // the endpoint upserts by (entity, predicate, peer), so a lost batch
        // delays data but never corrupts it.
        let updates =
            crate::updates::build_updates(&parsed, &results, &source, &text, target_collection);
        stats.updates_built = updates.len();
        for (index, batch) in updates.chunks(self.config.update_batch_size).enumerate() {
            stats.update_batches += 1;
            let graph = self.graph.clone();
            let batch = batch.to_vec();
            tokio::spawn(async move {
                match graph.additive_update(&batch).await {
                    Ok(accepted) => {
                        debug!(batch = index, accepted, "additive-update batch accepted");
                    }
                    Err(e) => {
                        warn!(batch = index, error = %e, "additive-update batch failed");
                    }
                }
            });
        }

        // Step 7: hand off only what this job created.
        let new_entity_ids: Vec<String> = results
            .iter()
            .filter(|r| r.is_new)
            .map(|r| r.entity_id.clone())
            .collect();
        info!(
            new_entities = new_entity_ids.len(),
            batches = stats.update_batches,
            "extraction complete"
        );

        Ok(JobOutcome {
            new_entity_ids,
            stats,
        })
    }

    /// Prefer inline `text`, then `content`, then the content endpoint.
    async fn resolve_text(&self, chunk: &Entity) -> Result<String, WorkerError> {
        if let Some(Value::String(text)) = chunk.properties.get("text") {
            return Ok(text.clone());
        }
        if let Some(Value::String(content)) = chunk.properties.get("content") {
            return Ok(content.clone());
        }
        debug!(id = %chunk.id, "no inline text, fetching content");
        self.graph
            .fetch_content(&chunk.id, "content")
            .await
            .map_err(|e| match e {
                GraphError::NotFound(_) => WorkerError::InvalidInput(format!(
                    "entity {} carries no text payload",
                    chunk.id
                )),
                other => WorkerError::Graph(other),
            })
    }

    /// Relationship targets the model forgot to declare still need to exist:
    /// append a generic create per referenced-but-undeclared label.
    fn append_implicit_creates(&self, parsed: &mut ParsedOperations) {
        let mut declared: std::collections::HashSet<String> = parsed
            .creates
            .iter()
            .map(|c| normalize_label(&c.label))
            .collect();

        let mut missing: Vec<String> = Vec::new();
        for label in referenced_labels(parsed) {
            let normalized = normalize_label(&label);
            if normalized.is_empty() || declared.contains(&normalized) {
                continue;
            }
            declared.insert(normalized.clone());
            missing.push(normalized);
        }
        missing.sort();

        for label in missing {
            debug!(label = %label, "declaring create for referenced-only label");
            parsed.creates.push(CreateOp {
                label,
                entity_type: "entity".to_string(),
                description: String::new(),
                properties: Default::default(),
            });
        }
    }
}
