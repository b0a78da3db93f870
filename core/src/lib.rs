//! # GraphScribe Core
//!
//! Core types, traits and the extraction pipeline for the GraphScribe
//! knowledge-graph worker. Adapters implement [`traits::GraphApi`] against a
//! concrete graph service; connectors implement [`traits::LlmClient`]
//! against a concrete model provider; the pipeline ties them together for
//! one job at a time.

pub mod check_create;
pub mod errors;
pub mod normalize;
pub mod ops;
pub mod pipeline;
pub mod prompt;
pub mod quotes;
pub mod traits;
pub mod types;
pub mod updates;

// Re-export commonly used types and traits
pub use check_create::{CheckCreateConfig, CheckCreateEngine};
pub use errors::{GraphError, LlmError, ParseError, WorkerError};
pub use pipeline::{ExtractionPipeline, JobOutcome, JobStats, PipelineConfig};
pub use traits::{GraphApi, LlmClient, LlmResponse};
pub use types::{
    AdditiveUpdate, CheckCreateResult, CollectionId, CreateEntity, Direction, Entity,
    EntityContext, EntitySpec, LookupHit, NewEntity, Relationship, RelationshipAdd, SourceRef,
};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::check_create::*;
    pub use crate::errors::*;
    pub use crate::normalize::normalize_label;
    pub use crate::ops::*;
    pub use crate::pipeline::*;
    pub use crate::quotes::extract_quote;
    pub use crate::traits::*;
    pub use crate::types::*;
    pub use async_trait::async_trait;
    pub use chrono::{DateTime, Utc};
}
