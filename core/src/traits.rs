//! Core traits defining the external collaborators of the worker

use crate::errors::{GraphError, LlmError};
use crate::types::{AdditiveUpdate, CollectionId, CreateEntity, Entity, LookupHit, NewEntity};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Client surface of the external graph service.
///
/// The worker only consumes this API; it never implements the service
/// itself. Entities are owned by the service and referenced by opaque ids.
#[async_trait]
pub trait GraphApi: Send + Sync {
    /// Fetch an entity by id, optionally expanding relationship previews.
    async fn get_entity(&self, id: &str, expand_previews: bool) -> Result<Entity, GraphError>;

    /// Exact-match lookup of entities by `(label, type)` within a collection.
    ///
    /// Label matching is case-insensitive on the service side. The result may
    /// lag recent writes; callers must not assume read-your-writes unless the
    /// write was made with `sync_index`.
    async fn lookup(
        &self,
        collection: &CollectionId,
        label: &str,
        entity_type: &str,
        limit: u32,
    ) -> Result<Vec<LookupHit>, GraphError>;

    /// Create a new entity.
    async fn create_entity(&self, create: CreateEntity) -> Result<NewEntity, GraphError>;

    /// Best-effort delete of an entity.
    async fn delete_entity(&self, id: &str) -> Result<(), GraphError>;

    /// Post one batch of additive updates (at most 1000 entries).
    ///
    /// 202-style semantics: the service merges property bags and upserts
    /// relationships by `(entity, predicate, peer)`. Returns the accepted
    /// count.
    async fn additive_update(&self, updates: &[AdditiveUpdate]) -> Result<u64, GraphError>;

    /// Fetch an entity's out-of-band text payload.
    async fn fetch_content(&self, id: &str, key: &str) -> Result<String, GraphError>;
}

/// One request/response round-trip against the LLM provider.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Send one prompt pair and return the parsed text plus usage accounting.
    ///
    /// Implementations own retry and timeout policy; a returned error is
    /// final for the job.
    async fn call(&self, system_prompt: &str, user_prompt: &str)
        -> Result<LlmResponse, LlmError>;
}

/// Model output plus usage accounting for one call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmResponse {
    /// Concatenated text of the response (non-thought parts only).
    pub content: String,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
    /// Estimated cost in USD, informational only.
    pub cost_usd: f64,
}
