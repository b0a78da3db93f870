//! Host-facing job contract
//!
//! The worker host delivers one [`JobRequest`] per invocation and consumes
//! one [`JobReport`]. The report's `new_entity_ids` drive downstream
//! workflow steps, so it must only ever contain ids this job created.

use graphscribe_core::errors::WorkerError;
use graphscribe_core::pipeline::{JobOutcome, JobStats};
use serde::{Deserialize, Serialize};

/// A job as delivered by the worker host.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRequest {
    /// Host-assigned job id; generated when absent.
    #[serde(default)]
    pub job_id: Option<String>,
    /// Collection the job bookkeeping lives in.
    #[serde(default)]
    pub job_collection: Option<String>,
    /// Id of the chunk entity to process.
    #[serde(default)]
    pub target_entity: Option<String>,
    /// Collection extracted entities are placed in.
    #[serde(default)]
    pub target_collection: Option<String>,
    /// Graph service base URL.
    #[serde(default)]
    pub api_base: Option<String>,
    /// Environment selector passed through by the host.
    #[serde(default)]
    pub network: Option<String>,
    /// Opaque host workflow context, passed through untouched.
    #[serde(default)]
    pub rhiza: Option<serde_json::Value>,
}

/// Machine-readable error block in the host log entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobErrorBody {
    pub code: String,
    pub message: String,
}

/// What the worker reports back to the host.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum JobReport {
    Done {
        job_id: String,
        new_entity_ids: Vec<String>,
        stats: JobStats,
    },
    Error {
        job_id: String,
        error: JobErrorBody,
    },
}

impl JobReport {
    pub fn done(job_id: impl Into<String>, outcome: JobOutcome) -> Self {
        JobReport::Done {
            job_id: job_id.into(),
            new_entity_ids: outcome.new_entity_ids,
            stats: outcome.stats,
        }
    }

    pub fn error(job_id: impl Into<String>, error: &WorkerError) -> Self {
        JobReport::Error {
            job_id: job_id.into(),
            error: JobErrorBody {
                code: error.code().to_string(),
                message: error.to_string(),
            },
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, JobReport::Error { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_tolerates_minimal_payloads() {
        let request: JobRequest = serde_json::from_str(
            r#"{"target_entity": "ent_1", "target_collection": "col", "api_base": "http://g"}"#,
        )
        .unwrap();
        assert_eq!(request.target_entity.as_deref(), Some("ent_1"));
        assert!(request.job_id.is_none());
        assert!(request.rhiza.is_none());
    }

    #[test]
    fn error_report_carries_code_and_message() {
        let report = JobReport::error(
            "job_1",
            &WorkerError::InvalidInput("chunk text too short".into()),
        );
        let value = serde_json::to_value(&report).unwrap();
        assert_eq!(value["status"], "error");
        assert_eq!(value["error"]["code"], "invalid_input");
        assert!(value["error"]["message"]
            .as_str()
            .unwrap()
            .contains("too short"));
    }

    #[test]
    fn done_report_lists_new_ids() {
        let report = JobReport::done(
            "job_1",
            JobOutcome {
                new_entity_ids: vec!["ent_a".into()],
                stats: JobStats::default(),
            },
        );
        let value = serde_json::to_value(&report).unwrap();
        assert_eq!(value["status"], "done");
        assert_eq!(value["new_entity_ids"][0], "ent_a");
    }
}
