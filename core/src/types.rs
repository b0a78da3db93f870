//! Core data types for GraphScribe

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Identifier of a collection in the graph service.
///
/// Label/type uniqueness is scoped to a collection, so every lookup and
/// create carries one of these.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CollectionId(pub String);

impl CollectionId {
    /// Create a new CollectionId
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the inner string value
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CollectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Direction of a relationship as seen from its subject entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    #[default]
    Outgoing,
    Incoming,
}

/// An entity as returned by the graph service.
///
/// Ids are opaque strings issued by the service; this worker never invents
/// them. `created_at` is observable and monotonic per entity, which is what
/// the creation-race tie-break relies on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    pub id: String,
    #[serde(rename = "type")]
    pub entity_type: String,
    #[serde(default)]
    pub properties: Map<String, Value>,
    #[serde(default)]
    pub relationships: Vec<Relationship>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

impl Entity {
    /// Read a string property, if present and actually a string.
    pub fn string_property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).and_then(Value::as_str)
    }
}

/// A directed edge attached to an entity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Relationship {
    pub predicate: String,
    /// Id of the entity on the other end.
    pub peer: String,
    #[serde(default)]
    pub direction: Direction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub peer_label: Option<String>,
    /// Expanded preview of the peer, when the fetch asked for one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub peer_preview: Option<Value>,
    #[serde(default)]
    pub properties: Map<String, Value>,
}

/// A relationship to append through the additive-update endpoint.
///
/// The service upserts these by `(entity, predicate, peer)`, so re-sending
/// a batch is safe.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelationshipAdd {
    pub predicate: String,
    pub peer: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub peer_label: Option<String>,
    #[serde(default)]
    pub direction: Direction,
    #[serde(default)]
    pub properties: Map<String, Value>,
}

/// Wire shape for the graph service's batch additive-update ingress.
///
/// Strictly additive: properties deep-merge, relationships upsert, nothing
/// is ever removed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdditiveUpdate {
    pub entity_id: String,
    #[serde(default)]
    pub properties: Map<String, Value>,
    #[serde(default)]
    pub relationships_add: Vec<RelationshipAdd>,
}

impl AdditiveUpdate {
    pub fn new(entity_id: impl Into<String>) -> Self {
        Self {
            entity_id: entity_id.into(),
            properties: Map::new(),
            relationships_add: Vec::new(),
        }
    }
}

/// Reference to the source chunk, embedded in every provenance block.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceRef {
    pub id: String,
    #[serde(rename = "type")]
    pub entity_type: String,
    pub label: String,
}

/// Outcome of one idempotent check-create round.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckCreateResult {
    pub entity_id: String,
    /// True only for the surviving creator; losers of a creation race demote
    /// this to false before returning.
    pub is_new: bool,
    /// Normalized label the entity was registered under.
    pub label: String,
    pub entity_type: String,
}

/// One hit from the exact-match lookup endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LookupHit {
    pub id: String,
    pub created_at: DateTime<Utc>,
}

/// Request body for entity creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateEntity {
    #[serde(rename = "type")]
    pub entity_type: String,
    pub collection: String,
    #[serde(default)]
    pub properties: Map<String, Value>,
    /// Ask the service to index the new record before responding, so it is
    /// observable via lookup by the time the call returns.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sync_index: Option<bool>,
}

/// Response body for entity creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewEntity {
    pub id: String,
    pub created_at: DateTime<Utc>,
}

/// A `(label, type)` pair queued for check-create.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntitySpec {
    pub label: String,
    pub entity_type: String,
}

impl EntitySpec {
    pub fn new(label: impl Into<String>, entity_type: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            entity_type: entity_type.into(),
        }
    }
}

/// Digest of the chunk entity handed to prompt composition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityContext {
    pub id: String,
    pub entity_type: String,
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Remaining properties, minus the text payload itself.
    #[serde(default)]
    pub properties: Map<String, Value>,
    #[serde(default)]
    pub relationships: Vec<Relationship>,
}

impl EntityContext {
    /// Build a prompt context from a fetched entity.
    ///
    /// The text payload (`text`/`content`) is excluded here; it is passed to
    /// the prompt separately and can be large.
    pub fn from_entity(entity: &Entity) -> Self {
        let label = entity
            .string_property("label")
            .unwrap_or(&entity.id)
            .to_string();
        let description = entity.string_property("description").map(str::to_string);

        let mut properties = Map::new();
        for (key, value) in &entity.properties {
            match key.as_str() {
                "text" | "content" | "label" | "description" => {}
                _ => {
                    properties.insert(key.clone(), value.clone());
                }
            }
        }

        Self {
            id: entity.id.clone(),
            entity_type: entity.entity_type.clone(),
            label,
            description,
            properties,
            relationships: entity.relationships.clone(),
        }
    }
}
