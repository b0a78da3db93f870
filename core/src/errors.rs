//! Error types for GraphScribe core operations

use thiserror::Error;

/// Top-level error for one extraction job.
#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("LLM call failed: {0}")]
    Llm(#[from] LlmError),

    #[error("{0}")]
    Parse(#[from] ParseError),

    #[error("graph operation failed: {0}")]
    Graph(#[from] GraphError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl WorkerError {
    /// Stable machine code surfaced in the host's error log entry.
    pub fn code(&self) -> &'static str {
        match self {
            WorkerError::InvalidInput(_) => "invalid_input",
            WorkerError::Llm(_) => "llm_error",
            WorkerError::Parse(_) => "parse_error",
            WorkerError::Graph(_) => "graph_error",
            WorkerError::Internal(_) => "internal_error",
        }
    }
}

/// Errors from the graph service client.
#[derive(Error, Debug)]
pub enum GraphError {
    #[error("network error: {0}")]
    Network(String),

    #[error("graph API error {status}: {body}")]
    Api { status: u16, body: String },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("failed to decode graph response: {0}")]
    Decode(String),

    #[error("internal graph client error: {0}")]
    Internal(String),
}

/// Errors from the LLM provider client.
#[derive(Error, Debug)]
pub enum LlmError {
    #[error("configuration error: {0}")]
    ConfigError(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("LLM API error {status}: {body}")]
    Api { status: u16, body: String },

    #[error("timed out waiting for the model")]
    Timeout,

    #[error("failed to parse model response: {0}")]
    ResponseParse(String),
}

impl LlmError {
    /// Whether a retry can reasonably be expected to succeed.
    ///
    /// Rate limits, server-side failures, network errors and timeouts are
    /// transient; any other API status is not.
    pub fn is_transient(&self) -> bool {
        match self {
            LlmError::Network(_) | LlmError::Timeout => true,
            LlmError::Api { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

/// Errors from parsing the model's operation list.
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("model output is not valid JSON: {message}; response head: {snippet}")]
    Json { message: String, snippet: String },

    #[error("model output has unexpected shape: {0}")]
    Shape(String),
}

/// Result type alias for job-level operations
pub type WorkerResult<T> = Result<T, WorkerError>;

/// Result type alias for graph operations
pub type GraphResult<T> = Result<T, GraphError>;

/// Result type alias for LLM operations
pub type LlmResult<T> = Result<T, LlmError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(LlmError::Timeout.is_transient());
        assert!(LlmError::Network("reset".into()).is_transient());
        assert!(LlmError::Api {
            status: 429,
            body: String::new()
        }
        .is_transient());
        assert!(LlmError::Api {
            status: 503,
            body: String::new()
        }
        .is_transient());
        assert!(!LlmError::Api {
            status: 400,
            body: String::new()
        }
        .is_transient());
        assert!(!LlmError::ResponseParse("empty".into()).is_transient());
    }

    #[test]
    fn error_codes_are_stable() {
        assert_eq!(WorkerError::InvalidInput("x".into()).code(), "invalid_input");
        assert_eq!(WorkerError::Llm(LlmError::Timeout).code(), "llm_error");
        assert_eq!(
            WorkerError::Graph(GraphError::Network("x".into())).code(),
            "graph_error"
        );
    }
}
