//! GraphScribe extraction worker
//!
//! One invocation processes one job: the host hands a job-request JSON on
//! stdin (or via `--job`), the worker runs the extraction pipeline and
//! prints a job report JSON on stdout. Exit code 1 signals a failed job.

use clap::Parser;
use graphscribe_adapter_http::{HttpGraph, HttpGraphConfig};
use graphscribe_connector_gemini::GeminiClient;
use graphscribe_core::errors::WorkerError;
use graphscribe_core::pipeline::ExtractionPipeline;
use graphscribe_core::types::CollectionId;
use std::io::Read;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use tracing::{error, info, Level};
use uuid::Uuid;

mod config;
mod job;

use config::WorkerConfig;
use job::{JobReport, JobRequest};

#[derive(Parser)]
#[command(name = "kgworker", about = "Knowledge-graph extraction worker")]
struct Cli {
    /// Path to the job-request JSON; reads stdin when omitted
    #[arg(long)]
    job: Option<PathBuf>,

    /// Path to a configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Increase log verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() {
    let args = Cli::parse();

    let log_level = match args.verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };
    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let config = match WorkerConfig::load(&args.config) {
        Ok(config) => config,
        Err(e) => {
            error!("failed to load configuration: {}", e);
            process::exit(1);
        }
    };

    let request = match read_request(&args.job) {
        Ok(request) => request,
        Err(e) => {
            error!("failed to read job request: {}", e);
            process::exit(1);
        }
    };

    let job_id = request
        .job_id
        .clone()
        .unwrap_or_else(|| format!("job_{}", Uuid::new_v4().simple()));
    info!(job_id = %job_id, "starting extraction job");

    let report = match run_job(&request, &config).await {
        Ok(outcome) => JobReport::done(job_id.as_str(), outcome),
        Err(e) => {
            error!(job_id = %job_id, "job failed: {}", e);
            JobReport::error(job_id.as_str(), &e)
        }
    };

    match serde_json::to_string(&report) {
        Ok(line) => println!("{line}"),
        Err(e) => {
            error!("failed to serialize job report: {}", e);
            process::exit(1);
        }
    }
    if report.is_error() {
        process::exit(1);
    }
}

fn read_request(path: &Option<PathBuf>) -> Result<JobRequest, WorkerError> {
    let raw = match path {
        Some(path) => std::fs::read_to_string(path)
            .map_err(|e| WorkerError::InvalidInput(format!("cannot read {}: {e}", path.display())))?,
        None => {
            let mut buffer = String::new();
            std::io::stdin()
                .read_to_string(&mut buffer)
                .map_err(|e| WorkerError::InvalidInput(format!("cannot read stdin: {e}")))?;
            buffer
        }
    };
    serde_json::from_str(&raw)
        .map_err(|e| WorkerError::InvalidInput(format!("malformed job request: {e}")))
}

async fn run_job(
    request: &JobRequest,
    config: &WorkerConfig,
) -> Result<graphscribe_core::pipeline::JobOutcome, WorkerError> {
    let target_entity = request
        .target_entity
        .as_deref()
        .ok_or_else(|| WorkerError::InvalidInput("job has no target entity".to_string()))?;
    let target_collection = request
        .target_collection
        .as_deref()
        .ok_or_else(|| WorkerError::InvalidInput("job has no target collection".to_string()))?;
    let api_base = request
        .api_base
        .as_deref()
        .ok_or_else(|| WorkerError::InvalidInput("job has no graph api_base".to_string()))?;

    let mut graph_config = HttpGraphConfig::new(api_base);
    if let Some(timeout_ms) = config.graph_timeout_ms {
        graph_config = graph_config.with_timeout_ms(timeout_ms);
    }
    if let Some(token) = &config.graph_auth_token {
        graph_config = graph_config.with_auth_token(token.clone());
    }
    let graph = Arc::new(HttpGraph::new(graph_config)?);
    let llm = Arc::new(GeminiClient::new(config.gemini.clone())?);

    let pipeline = ExtractionPipeline::with_config(graph, llm, config.pipeline.clone());
    pipeline
        .run(target_entity, &CollectionId::new(target_collection))
        .await
}
