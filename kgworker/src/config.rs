//! Configuration management for the worker

use figment::providers::{Env, Format, Yaml};
use figment::Figment;
use graphscribe_core::errors::WorkerError;
use graphscribe_core::pipeline::PipelineConfig;
use graphscribe_connector_gemini::GeminiConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Worker configuration: model settings plus pipeline knobs. The graph
/// service URL is NOT configured here; it arrives with each job request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub gemini: GeminiConfig,
    pub pipeline: PipelineConfig,
    /// Per-request timeout against the graph service, milliseconds.
    pub graph_timeout_ms: Option<u64>,
    /// Bearer token for the graph service, if the deployment requires one.
    pub graph_auth_token: Option<String>,
}

impl WorkerConfig {
    /// Load configuration from file and environment.
    ///
    /// Looks for `kgworker.yaml`/`.kgworker.yaml` in the working directory,
    /// then merges an explicit config file, then `KGWORKER_*` environment
    /// variables (`__` separates nesting, e.g. `KGWORKER_GEMINI__API_KEY`).
    pub fn load(config_path: &Option<PathBuf>) -> Result<Self, WorkerError> {
        let mut figment = Figment::new();

        for path in ["kgworker.yaml", "kgworker.yml", ".kgworker.yaml", ".kgworker.yml"] {
            if Path::new(path).exists() {
                figment = figment.merge(Yaml::file(path));
                break;
            }
        }

        if let Some(path) = config_path {
            if path.exists() {
                figment = figment.merge(Yaml::file(path));
            } else {
                return Err(WorkerError::InvalidInput(format!(
                    "configuration file not found: {}",
                    path.display()
                )));
            }
        }

        figment = figment.merge(Env::prefixed("KGWORKER_").split("__"));

        figment
            .extract()
            .map_err(|e| WorkerError::InvalidInput(format!("failed to parse configuration: {e}")))
    }
}
