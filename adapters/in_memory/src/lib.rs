//! In-memory implementation of GraphApi for testing and development
//!
//! Faithful enough to exercise the full pipeline: case-insensitive
//! exact-match lookup scoped to a collection, additive updates that upsert
//! relationships by `(entity, predicate, peer)` and deep-merge property
//! bags, and a configurable indexing delay that reproduces the eventually
//! consistent lookup of the real service. Creates with `sync_index` are
//! visible immediately; everything else surfaces only after the lag.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use graphscribe_core::errors::GraphError;
use graphscribe_core::traits::GraphApi;
use graphscribe_core::types::{
    AdditiveUpdate, CollectionId, CreateEntity, Entity, LookupHit, NewEntity, Relationship,
    RelationshipAdd,
};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

/// Configuration for the in-memory graph
#[derive(Debug, Clone)]
pub struct MemoryGraphConfig {
    /// How long a non-synced create stays invisible to lookups.
    pub index_lag: Duration,
    /// Whether to log every operation.
    pub verbose: bool,
}

impl Default for MemoryGraphConfig {
    fn default() -> Self {
        Self {
            index_lag: Duration::ZERO,
            verbose: false,
        }
    }
}

#[derive(Debug, Clone)]
struct StoredEntity {
    id: String,
    entity_type: String,
    collection: Option<String>,
    properties: Map<String, Value>,
    relationships: Vec<RelationshipAdd>,
    created_at: DateTime<Utc>,
    /// When this entity becomes observable through lookup.
    visible_at: Instant,
}

#[derive(Default)]
struct MemoryStore {
    entities: HashMap<String, StoredEntity>,
    /// Index: collection -> entity ids, in creation order.
    by_collection: HashMap<String, Vec<String>>,
    /// Out-of-band text payloads, keyed by entity id.
    content: HashMap<String, String>,
}

/// Call counters, for tests that assert on API traffic.
#[derive(Debug, Default)]
pub struct CallCounts {
    pub lookups: AtomicU64,
    pub creates: AtomicU64,
    pub deletes: AtomicU64,
    pub update_batches: AtomicU64,
    /// Largest additive-update batch observed.
    pub max_update_batch: AtomicUsize,
}

/// In-memory GraphApi implementation
pub struct MemoryGraph {
    store: Arc<RwLock<MemoryStore>>,
    config: MemoryGraphConfig,
    counts: CallCounts,
}

impl MemoryGraph {
    pub fn new() -> Self {
        Self::with_config(MemoryGraphConfig::default())
    }

    pub fn with_config(config: MemoryGraphConfig) -> Self {
        Self {
            store: Arc::new(RwLock::new(MemoryStore::default())),
            config,
            counts: CallCounts::default(),
        }
    }

    pub fn counts(&self) -> &CallCounts {
        &self.counts
    }

    /// Seed an entity directly, bypassing lag and counters. Returns its id.
    pub async fn seed_entity(
        &self,
        entity_type: &str,
        collection: Option<&str>,
        properties: Map<String, Value>,
    ) -> String {
        let id = format!("ent_{}", Uuid::new_v4().simple());
        let mut store = self.store.write().await;
        if let Some(collection) = collection {
            store
                .by_collection
                .entry(collection.to_string())
                .or_default()
                .push(id.clone());
        }
        store.entities.insert(
            id.clone(),
            StoredEntity {
                id: id.clone(),
                entity_type: entity_type.to_string(),
                collection: collection.map(str::to_string),
                properties,
                relationships: Vec::new(),
                created_at: Utc::now(),
                visible_at: Instant::now(),
            },
        );
        id
    }

    /// Attach an out-of-band text payload to an entity.
    pub async fn seed_content(&self, id: &str, text: &str) {
        self.store
            .write()
            .await
            .content
            .insert(id.to_string(), text.to_string());
    }

    /// Snapshot of one entity, for assertions.
    pub async fn entity(&self, id: &str) -> Option<Entity> {
        let store = self.store.read().await;
        store.entities.get(id).map(to_entity)
    }

    /// All entities in a collection whose stored label matches (exactly,
    /// case-insensitively), regardless of index visibility.
    pub async fn entities_labelled(
        &self,
        collection: &str,
        label: &str,
        entity_type: &str,
    ) -> Vec<Entity> {
        let store = self.store.read().await;
        let Some(ids) = store.by_collection.get(collection) else {
            return Vec::new();
        };
        ids.iter()
            .filter_map(|id| store.entities.get(id))
            .filter(|e| {
                e.entity_type == entity_type
                    && e.properties
                        .get("label")
                        .and_then(Value::as_str)
                        .is_some_and(|l| l.eq_ignore_ascii_case(label))
            })
            .map(to_entity)
            .collect()
    }

    /// Total number of entities in the store.
    pub async fn entity_count(&self) -> usize {
        self.store.read().await.entities.len()
    }
}

impl Default for MemoryGraph {
    fn default() -> Self {
        Self::new()
    }
}

fn to_entity(stored: &StoredEntity) -> Entity {
    Entity {
        id: stored.id.clone(),
        entity_type: stored.entity_type.clone(),
        properties: stored.properties.clone(),
        relationships: stored
            .relationships
            .iter()
            .map(|r| Relationship {
                predicate: r.predicate.clone(),
                peer: r.peer.clone(),
                direction: r.direction,
                peer_label: r.peer_label.clone(),
                peer_preview: None,
                properties: r.properties.clone(),
            })
            .collect(),
        created_at: Some(stored.created_at),
    }
}

/// Deep-merge `incoming` into `existing`: objects recurse, everything else
/// overwrites. Nothing is ever removed.
fn merge_value(existing: &mut Value, incoming: &Value) {
    match (existing, incoming) {
        (Value::Object(base), Value::Object(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(key) {
                    Some(slot) => merge_value(slot, value),
                    None => {
                        base.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (slot, value) => *slot = value.clone(),
    }
}

#[async_trait]
impl GraphApi for MemoryGraph {
    async fn get_entity(&self, id: &str, expand_previews: bool) -> Result<Entity, GraphError> {
        let store = self.store.read().await;
        let stored = store
            .entities
            .get(id)
            .ok_or_else(|| GraphError::NotFound(id.to_string()))?;
        let mut entity = to_entity(stored);
        if expand_previews {
            for rel in &mut entity.relationships {
                if let Some(peer) = store.entities.get(&rel.peer) {
                    rel.peer_preview = Some(json!({
                        "type": peer.entity_type,
                        "label": peer.properties.get("label").cloned().unwrap_or(Value::Null),
                    }));
                }
            }
        }
        Ok(entity)
    }

    async fn lookup(
        &self,
        collection: &CollectionId,
        label: &str,
        entity_type: &str,
        limit: u32,
    ) -> Result<Vec<LookupHit>, GraphError> {
        self.counts.lookups.fetch_add(1, Ordering::SeqCst);
        let now = Instant::now();
        let store = self.store.read().await;
        let Some(ids) = store.by_collection.get(collection.as_str()) else {
            return Ok(Vec::new());
        };
        let hits: Vec<LookupHit> = ids
            .iter()
            .filter_map(|id| store.entities.get(id))
            .filter(|e| {
                e.visible_at <= now
                    && e.entity_type == entity_type
                    && e.properties
                        .get("label")
                        .and_then(Value::as_str)
                        .is_some_and(|l| l.eq_ignore_ascii_case(label))
            })
            .take(limit as usize)
            .map(|e| LookupHit {
                id: e.id.clone(),
                created_at: e.created_at,
            })
            .collect();
        if self.config.verbose {
            debug!(label, hits = hits.len(), "lookup");
        }
        Ok(hits)
    }

    async fn create_entity(&self, create: CreateEntity) -> Result<NewEntity, GraphError> {
        self.counts.creates.fetch_add(1, Ordering::SeqCst);
        let id = format!("ent_{}", Uuid::new_v4().simple());
        let created_at = Utc::now();
        let visible_at = if create.sync_index.unwrap_or(false) {
            Instant::now()
        } else {
            Instant::now() + self.config.index_lag
        };

        let mut store = self.store.write().await;
        store
            .by_collection
            .entry(create.collection.clone())
            .or_default()
            .push(id.clone());
        store.entities.insert(
            id.clone(),
            StoredEntity {
                id: id.clone(),
                entity_type: create.entity_type,
                collection: Some(create.collection),
                properties: create.properties,
                relationships: Vec::new(),
                created_at,
                visible_at,
            },
        );
        if self.config.verbose {
            debug!(id = %id, "created entity");
        }
        Ok(NewEntity { id, created_at })
    }

    async fn delete_entity(&self, id: &str) -> Result<(), GraphError> {
        self.counts.deletes.fetch_add(1, Ordering::SeqCst);
        let mut store = self.store.write().await;
        let stored = store
            .entities
            .remove(id)
            .ok_or_else(|| GraphError::NotFound(id.to_string()))?;
        if let Some(collection) = &stored.collection {
            if let Some(ids) = store.by_collection.get_mut(collection) {
                ids.retain(|existing| existing != id);
            }
        }
        Ok(())
    }

    async fn additive_update(&self, updates: &[AdditiveUpdate]) -> Result<u64, GraphError> {
        self.counts.update_batches.fetch_add(1, Ordering::SeqCst);
        self.counts
            .max_update_batch
            .fetch_max(updates.len(), Ordering::SeqCst);
        if updates.len() > 1000 {
            return Err(GraphError::Api {
                status: 413,
                body: format!("batch of {} exceeds the 1000-entry cap", updates.len()),
            });
        }

        let mut store = self.store.write().await;
        let mut accepted = 0u64;
        for update in updates {
            // Unknown targets get a stub so edges always attach; the real
            // service upserts the same way.
            let stored = store
                .entities
                .entry(update.entity_id.clone())
                .or_insert_with(|| StoredEntity {
                    id: update.entity_id.clone(),
                    entity_type: "unknown".to_string(),
                    collection: None,
                    properties: Map::new(),
                    relationships: Vec::new(),
                    created_at: Utc::now(),
                    visible_at: Instant::now(),
                });

            for (key, value) in &update.properties {
                match stored.properties.get_mut(key) {
                    Some(slot) => merge_value(slot, value),
                    None => {
                        stored.properties.insert(key.clone(), value.clone());
                    }
                }
            }

            for add in &update.relationships_add {
                match stored
                    .relationships
                    .iter_mut()
                    .find(|r| r.predicate == add.predicate && r.peer == add.peer)
                {
                    Some(existing) => {
                        let mut bag = Value::Object(existing.properties.clone());
                        merge_value(&mut bag, &Value::Object(add.properties.clone()));
                        if let Value::Object(merged) = bag {
                            existing.properties = merged;
                        }
                    }
                    None => stored.relationships.push(add.clone()),
                }
            }
            accepted += 1;
        }
        Ok(accepted)
    }

    async fn fetch_content(&self, id: &str, _key: &str) -> Result<String, GraphError> {
        let store = self.store.read().await;
        store
            .content
            .get(id)
            .cloned()
            .ok_or_else(|| GraphError::NotFound(format!("no content for {id}")))
    }
}
