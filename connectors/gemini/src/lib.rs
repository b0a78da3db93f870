//! Gemini connector for GraphScribe extraction calls
//!
//! One `call` is one logical request: per-attempt timeout, up to three
//! retries with exponential backoff on transient failures, token usage and
//! cost accounting on success.

use async_trait::async_trait;
use graphscribe_core::errors::LlmError;
use graphscribe_core::traits::{LlmClient, LlmResponse};
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, warn};

mod config;
mod models;

pub use config::GeminiConfig;
use models::*;

const MILLION: f64 = 1_000_000.0;

/// Gemini implementation of LlmClient
pub struct GeminiClient {
    client: Client,
    config: GeminiConfig,
}

impl GeminiClient {
    /// Create a new Gemini client
    pub fn new(config: GeminiConfig) -> Result<Self, LlmError> {
        if config.api_key.is_empty() {
            return Err(LlmError::ConfigError("Gemini API key is empty".to_string()));
        }
        // Timeouts are enforced per attempt around the whole future, not by
        // the transport.
        let client = Client::builder()
            .build()
            .map_err(|e| LlmError::ConfigError(format!("failed to create HTTP client: {e}")))?;
        Ok(Self { client, config })
    }

    /// Backoff before retry `attempt` (0-based): `min(base · 2^attempt, cap)`.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let base = self.config.backoff_base_ms;
        let delay = base.saturating_mul(1u64 << attempt.min(32));
        Duration::from_millis(delay.min(self.config.backoff_cap_ms))
    }

    fn request_url(&self) -> String {
        format!(
            "{}/models/{}:generateContent?key={}",
            self.config.api_base.trim_end_matches('/'),
            self.config.model,
            self.config.api_key
        )
    }

    async fn attempt(&self, system_prompt: &str, user_prompt: &str) -> Result<LlmResponse, LlmError> {
        let request = GenerateContentRequest {
            system_instruction: Some(Content::new_system(system_prompt)),
            contents: vec![Content::new_user(user_prompt)],
            generation_config: Some(GenerationConfig {
                temperature: self.config.temperature,
                max_output_tokens: self.config.max_output_tokens,
                response_mime_type: Some("application/json".to_string()),
            }),
        };

        let response = self
            .client
            .post(self.request_url())
            .json(&request)
            .send()
            .await
            .map_err(|e| LlmError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "unreadable body".to_string());
            return Err(LlmError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let decoded: GenerateContentResponse = response
            .json()
            .await
            .map_err(|e| LlmError::ResponseParse(e.to_string()))?;

        // Text of the first candidate, thought parts excluded.
        let content: String = decoded
            .candidates
            .first()
            .and_then(|c| c.content.as_ref())
            .map(|content| {
                content
                    .parts
                    .iter()
                    .filter(|p| !p.thought.unwrap_or(false))
                    .filter_map(|p| p.text.as_deref())
                    .collect()
            })
            .unwrap_or_default();

        if content.is_empty() {
            return Err(LlmError::ResponseParse(
                "no text in first candidate".to_string(),
            ));
        }

        let usage = decoded.usage_metadata.unwrap_or_default();
        let cost_usd = f64::from(usage.prompt_token_count) / MILLION
            * self.config.input_cost_per_mtok
            + f64::from(usage.candidates_token_count) / MILLION * self.config.output_cost_per_mtok;

        Ok(LlmResponse {
            content,
            prompt_tokens: usage.prompt_token_count,
            completion_tokens: usage.candidates_token_count,
            total_tokens: usage.total_token_count,
            cost_usd,
        })
    }
}

#[async_trait]
impl LlmClient for GeminiClient {
    async fn call(
        &self,
        system_prompt: &str,
        user_prompt: &str,
    ) -> Result<LlmResponse, LlmError> {
        let per_attempt = Duration::from_millis(self.config.timeout_ms);
        let mut attempt = 0u32;
        loop {
            let outcome =
                tokio::time::timeout(per_attempt, self.attempt(system_prompt, user_prompt)).await;
            let error = match outcome {
                Ok(Ok(response)) => {
                    debug!(
                        attempt,
                        prompt_tokens = response.prompt_tokens,
                        completion_tokens = response.completion_tokens,
                        "model call succeeded"
                    );
                    return Ok(response);
                }
                Ok(Err(e)) => e,
                Err(_) => LlmError::Timeout,
            };

            if attempt >= self.config.max_retries || !error.is_transient() {
                return Err(error);
            }
            let delay = self.backoff_delay(attempt);
            warn!(
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "transient model failure, backing off"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}
