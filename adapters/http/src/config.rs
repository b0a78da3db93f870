//! Configuration for the HTTP graph client

use serde::{Deserialize, Serialize};

/// Connection settings for the graph service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpGraphConfig {
    /// Service base URL (the job request's `api_base`).
    pub base_url: String,
    /// Per-request timeout in milliseconds.
    pub timeout_ms: u64,
    /// Bearer token, if the deployment requires one.
    pub auth_token: Option<String>,
}

impl HttpGraphConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            timeout_ms: 30_000,
            auth_token: None,
        }
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    /// Default headers derived from this configuration.
    pub fn auth_headers(&self) -> reqwest::header::HeaderMap {
        let mut headers = reqwest::header::HeaderMap::new();
        if let Some(token) = &self.auth_token {
            if let Ok(value) = format!("Bearer {token}").parse() {
                headers.insert(reqwest::header::AUTHORIZATION, value);
            }
        }
        headers
    }
}
