//! Configuration for the Gemini connector

use serde::{Deserialize, Serialize};

/// Gemini API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeminiConfig {
    /// Gemini API key
    pub api_key: String,
    /// Model to use (e.g., "gemini-2.0-flash")
    pub model: String,
    /// API base URL
    pub api_base: String,
    /// Temperature for generation (0.0 to 1.0)
    pub temperature: Option<f32>,
    /// Output-token cap; generous, extraction lists can be long
    pub max_output_tokens: Option<u32>,
    /// Per-attempt timeout in milliseconds; the in-flight call is aborted
    pub timeout_ms: u64,
    /// Retries on transient failures (429, 5xx, network, timeout)
    pub max_retries: u32,
    /// Backoff base delay in milliseconds
    pub backoff_base_ms: u64,
    /// Backoff delay ceiling in milliseconds
    pub backoff_cap_ms: u64,
    /// Input price per million tokens, USD (informational)
    pub input_cost_per_mtok: f64,
    /// Output price per million tokens, USD (informational)
    pub output_cost_per_mtok: f64,
}

impl GeminiConfig {
    /// Create a new Gemini config with the given API key
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: "gemini-2.0-flash".to_string(),
            api_base: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            temperature: Some(0.2),
            max_output_tokens: Some(32_768),
            timeout_ms: 120_000,
            max_retries: 3,
            backoff_base_ms: 15_000,
            backoff_cap_ms: 120_000,
            input_cost_per_mtok: 0.10,
            output_cost_per_mtok: 0.40,
        }
    }

    /// Set the model to use
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Set the API base URL
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    /// Set temperature
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature.clamp(0.0, 1.0));
        self
    }

    /// Set the output-token cap
    pub fn with_max_output_tokens(mut self, max_output_tokens: u32) -> Self {
        self.max_output_tokens = Some(max_output_tokens);
        self
    }

    /// Set the per-attempt timeout
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    /// Set maximum retries
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Set backoff base and cap
    pub fn with_backoff_ms(mut self, base_ms: u64, cap_ms: u64) -> Self {
        self.backoff_base_ms = base_ms;
        self.backoff_cap_ms = cap_ms;
        self
    }

    /// Set per-million-token prices
    pub fn with_costs_per_mtok(mut self, input: f64, output: f64) -> Self {
        self.input_cost_per_mtok = input;
        self.output_cost_per_mtok = output;
        self
    }
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self::new("") // Empty API key - must be set by the deployment
    }
}
