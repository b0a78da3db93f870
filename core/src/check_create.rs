//! Idempotent entity creation with race resolution
//!
//! Many jobs extract overlapping entities from different chunks of the same
//! document, and the graph's lookup index lags writes by hundreds of
//! milliseconds, so naive lookup-then-create duplicates entities. The engine
//! runs check → create(sync_index) → settle → re-check → resolve per entity:
//! all racers sort the survivors by `(created_at, id)` and independently
//! agree on the same winner, losers delete their own create and report the
//! winner's id with `is_new = false`.
//!
//! Removing any of the three knobs (sync_index on create, the jittered
//! settle delay, the deterministic tie-break) reintroduces duplicates; they
//! are a single contract.

use crate::errors::GraphError;
use crate::normalize::normalize_label;
use crate::traits::GraphApi;
use crate::types::{CheckCreateResult, CollectionId, CreateEntity, EntitySpec, LookupHit};
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::Map;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, warn};

/// Tunables of the race-resolution protocol. The defaults are the contract;
/// tests shrink the delays to keep suites fast.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckCreateConfig {
    /// Pause after our create before re-checking, letting peer writers in
    /// the race window finish their own create+index.
    pub settle_ms: u64,
    /// Pause before each extra re-check when the index so far shows only us.
    pub recheck_ms: u64,
    /// Jitter added to both pauses, desynchronizing worker cohorts.
    pub jitter_ms: u64,
    /// Extra re-checks when the only visible entity is our own.
    pub recheck_attempts: u32,
    /// Row cap for the post-create lookup.
    pub lookup_limit: u32,
    /// In-flight ceiling for batched check-creates.
    pub max_concurrent: usize,
}

impl Default for CheckCreateConfig {
    fn default() -> Self {
        Self {
            settle_ms: 100,
            recheck_ms: 150,
            jitter_ms: 100,
            recheck_attempts: 2,
            lookup_limit: 10,
            max_concurrent: 20,
        }
    }
}

/// Per-entity idempotent upsert against one collection.
#[derive(Clone)]
pub struct CheckCreateEngine {
    graph: Arc<dyn GraphApi>,
    config: CheckCreateConfig,
    races: Arc<AtomicU64>,
}

impl CheckCreateEngine {
    pub fn new(graph: Arc<dyn GraphApi>) -> Self {
        Self::with_config(graph, CheckCreateConfig::default())
    }

    pub fn with_config(graph: Arc<dyn GraphApi>, config: CheckCreateConfig) -> Self {
        Self {
            graph,
            config,
            races: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Creation races detected (and resolved) so far.
    pub fn races_detected(&self) -> u64 {
        self.races.load(Ordering::Relaxed)
    }

    /// Ensure one entity with `(normalize(label), entity_type)` exists in
    /// `collection`, returning its id and whether this call created it.
    ///
    /// Create failures are fatal; lookup failures degrade to "not found"
    /// (a downstream resolver may then see duplicates); the loser-path
    /// delete is best-effort.
    pub async fn check_create(
        &self,
        collection: &CollectionId,
        label: &str,
        entity_type: &str,
    ) -> Result<CheckCreateResult, GraphError> {
        let normalized = normalize_label(label);

        // Fast path: someone already created it and the index has caught up.
        if let Some(hit) = self.lookup_first(collection, &normalized, entity_type).await {
            debug!(label = %normalized, id = %hit.id, "entity already exists");
            return Ok(CheckCreateResult {
                entity_id: hit.id,
                is_new: false,
                label: normalized,
                entity_type: entity_type.to_string(),
            });
        }

        let mut properties = Map::new();
        properties.insert("label".to_string(), normalized.clone().into());
        let created = self
            .graph
            .create_entity(CreateEntity {
                entity_type: entity_type.to_string(),
                collection: collection.as_str().to_string(),
                properties,
                sync_index: Some(true),
            })
            .await?;

        // Let racing peers finish their own create+index before we look.
        self.sleep_with_jitter(self.config.settle_ms).await;

        let mut hits = self
            .lookup_all(collection, &normalized, entity_type)
            .await;

        // A lagging index can hide concurrent peers behind our own (synced)
        // row; as long as we only see ourselves, look again.
        let mut rechecks = 0;
        while rechecks < self.config.recheck_attempts
            && hits.len() == 1
            && hits[0].id == created.id
        {
            self.sleep_with_jitter(self.config.recheck_ms).await;
            hits = self
                .lookup_all(collection, &normalized, entity_type)
                .await;
            rechecks += 1;
        }

        if hits.len() <= 1 {
            return Ok(CheckCreateResult {
                entity_id: created.id,
                is_new: true,
                label: normalized,
                entity_type: entity_type.to_string(),
            });
        }

        // Concurrent creators: every racer sorts the same way and agrees on
        // the same winner without coordination.
        hits.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        let winner = &hits[0];

        if winner.id == created.id {
            debug!(label = %normalized, peers = hits.len() - 1, "won creation race");
            return Ok(CheckCreateResult {
                entity_id: created.id,
                is_new: true,
                label: normalized,
                entity_type: entity_type.to_string(),
            });
        }

        self.races.fetch_add(1, Ordering::Relaxed);
        warn!(
            label = %normalized,
            ours = %created.id,
            winner = %winner.id,
            "lost creation race, deleting our duplicate"
        );
        if let Err(e) = self.graph.delete_entity(&created.id).await {
            // Eventual consistency resolves the leftover; never fatal.
            warn!(id = %created.id, error = %e, "failed to delete losing duplicate");
        }

        Ok(CheckCreateResult {
            entity_id: winner.id.clone(),
            is_new: false,
            label: normalized,
            entity_type: entity_type.to_string(),
        })
    }

    /// Run check-create for a batch of specs, deduplicated by
    /// `(entity_type, normalized label)`, under the concurrency ceiling.
    /// Result order is unspecified; callers key by label.
    pub async fn batch(
        &self,
        collection: &CollectionId,
        specs: Vec<EntitySpec>,
    ) -> Result<Vec<CheckCreateResult>, GraphError> {
        let mut seen = HashSet::new();
        let deduped: Vec<EntitySpec> = specs
            .into_iter()
            .filter(|spec| {
                seen.insert((spec.entity_type.clone(), normalize_label(&spec.label)))
            })
            .collect();

        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent));
        let mut tasks = JoinSet::new();
        for spec in deduped {
            let engine = self.clone();
            let semaphore = Arc::clone(&semaphore);
            let collection = collection.clone();
            tasks.spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|_| GraphError::Internal("semaphore closed".to_string()))?;
                engine
                    .check_create(&collection, &spec.label, &spec.entity_type)
                    .await
            });
        }

        let mut results = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            let result = joined
                .map_err(|e| GraphError::Internal(format!("check-create task failed: {e}")))??;
            results.push(result);
        }
        Ok(results)
    }

    async fn lookup_first(
        &self,
        collection: &CollectionId,
        label: &str,
        entity_type: &str,
    ) -> Option<LookupHit> {
        match self.graph.lookup(collection, label, entity_type, 1).await {
            Ok(mut hits) => hits.drain(..).next(),
            Err(e) => {
                warn!(label, error = %e, "lookup failed, assuming entity is absent");
                None
            }
        }
    }

    async fn lookup_all(
        &self,
        collection: &CollectionId,
        label: &str,
        entity_type: &str,
    ) -> Vec<LookupHit> {
        match self
            .graph
            .lookup(collection, label, entity_type, self.config.lookup_limit)
            .await
        {
            Ok(hits) => hits,
            Err(e) => {
                warn!(label, error = %e, "post-create lookup failed, keeping our entity");
                Vec::new()
            }
        }
    }

    async fn sleep_with_jitter(&self, base_ms: u64) {
        let jitter = if self.config.jitter_ms == 0 {
            0
        } else {
            rand::rng().random_range(0..self.config.jitter_ms)
        };
        tokio::time::sleep(Duration::from_millis(base_ms + jitter)).await;
    }
}
