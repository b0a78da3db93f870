//! HTTP client for the graph service consumed by GraphScribe workers

use async_trait::async_trait;
use graphscribe_core::errors::GraphError;
use graphscribe_core::traits::GraphApi;
use graphscribe_core::types::{
    AdditiveUpdate, CollectionId, CreateEntity, Entity, LookupHit, NewEntity,
};
use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::debug;

mod config;

pub use config::HttpGraphConfig;

/// GraphApi implementation over the service's REST endpoints.
pub struct HttpGraph {
    client: Client,
    config: HttpGraphConfig,
}

#[derive(Debug, Deserialize)]
struct LookupResponse {
    #[serde(default)]
    entities: Vec<LookupHit>,
}

#[derive(Debug, Serialize)]
struct UpdatesRequest<'a> {
    updates: &'a [AdditiveUpdate],
}

#[derive(Debug, Deserialize)]
struct UpdatesResponse {
    accepted: u64,
}

impl HttpGraph {
    /// Create a new client against the given service.
    pub fn new(config: HttpGraphConfig) -> Result<Self, GraphError> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_millis(config.timeout_ms))
            .default_headers(config.auth_headers())
            .build()
            .map_err(|e| GraphError::Internal(format!("failed to create HTTP client: {e}")))?;
        Ok(Self { client, config })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    /// Map a non-success response to a GraphError, draining the body.
    async fn error_for(response: Response) -> GraphError {
        let status = response.status();
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "unreadable body".to_string());
        if status == StatusCode::NOT_FOUND {
            GraphError::NotFound(body)
        } else {
            GraphError::Api {
                status: status.as_u16(),
                body,
            }
        }
    }

    async fn decode<T: for<'de> Deserialize<'de>>(response: Response) -> Result<T, GraphError> {
        if !response.status().is_success() {
            return Err(Self::error_for(response).await);
        }
        response
            .json::<T>()
            .await
            .map_err(|e| GraphError::Decode(e.to_string()))
    }
}

#[async_trait]
impl GraphApi for HttpGraph {
    async fn get_entity(&self, id: &str, expand_previews: bool) -> Result<Entity, GraphError> {
        let url = self.url(&format!("/entities/{id}"));
        debug!(%url, "GET entity");
        let mut request = self.client.get(&url);
        if expand_previews {
            request = request.query(&[("expand", "relationships:preview")]);
        }
        let response = request
            .send()
            .await
            .map_err(|e| GraphError::Network(e.to_string()))?;
        Self::decode(response).await
    }

    async fn lookup(
        &self,
        collection: &CollectionId,
        label: &str,
        entity_type: &str,
        limit: u32,
    ) -> Result<Vec<LookupHit>, GraphError> {
        let url = self.url(&format!("/collections/{collection}/entities/lookup"));
        debug!(%url, label, entity_type, "lookup");
        let response = self
            .client
            .get(&url)
            .query(&[
                ("label", label),
                ("type", entity_type),
                ("limit", &limit.to_string()),
            ])
            .send()
            .await
            .map_err(|e| GraphError::Network(e.to_string()))?;
        let decoded: LookupResponse = Self::decode(response).await?;
        Ok(decoded.entities)
    }

    async fn create_entity(&self, create: CreateEntity) -> Result<NewEntity, GraphError> {
        let url = self.url("/entities");
        debug!(%url, entity_type = %create.entity_type, "POST entity");
        let response = self
            .client
            .post(&url)
            .json(&create)
            .send()
            .await
            .map_err(|e| GraphError::Network(e.to_string()))?;
        Self::decode(response).await
    }

    async fn delete_entity(&self, id: &str) -> Result<(), GraphError> {
        let url = self.url(&format!("/entities/{id}"));
        debug!(%url, "DELETE entity");
        let response = self
            .client
            .delete(&url)
            .send()
            .await
            .map_err(|e| GraphError::Network(e.to_string()))?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(Self::error_for(response).await)
        }
    }

    async fn additive_update(&self, updates: &[AdditiveUpdate]) -> Result<u64, GraphError> {
        let url = self.url("/updates/additive");
        debug!(%url, count = updates.len(), "POST additive updates");
        let response = self
            .client
            .post(&url)
            .json(&UpdatesRequest { updates })
            .send()
            .await
            .map_err(|e| GraphError::Network(e.to_string()))?;
        let decoded: UpdatesResponse = Self::decode(response).await?;
        Ok(decoded.accepted)
    }

    async fn fetch_content(&self, id: &str, key: &str) -> Result<String, GraphError> {
        let url = self.url(&format!("/entities/{id}/content"));
        debug!(%url, key, "GET content");
        let response = self
            .client
            .get(&url)
            .query(&[("key", key)])
            .send()
            .await
            .map_err(|e| GraphError::Network(e.to_string()))?;
        if !response.status().is_success() {
            return Err(Self::error_for(response).await);
        }
        response
            .text()
            .await
            .map_err(|e| GraphError::Decode(e.to_string()))
    }
}
