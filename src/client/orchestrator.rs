//! # Orchestrator
//!
//! Composes the pipeline stages into one call:
//!
//! ```text
//! JobRequest -> ArtifactSource -> Artifact -> JobHandle -> Ready -> Artifact
//!               (resolve)          (submit)    (poll)      (fetch)
//! ```
//!
//! The orchestrator owns the invocation deadline (`total_timeout` from the
//! effective configuration). Every network call and the poll loop are capped
//! by it, so a run can never outlive its budget because individual timeouts
//! happen to be shorter.
//!
//! [`Orchestrator::run`] never returns an error: every failure becomes an
//! [`OrchestrationResult::Failure`] carrying the job handle when one exists,
//! so a stuck remote job can be inspected by hand.

use base64::{engine::general_purpose, Engine as _};
use log::{error, info};
use std::sync::Arc;
use tokio::time::Instant;
use uuid::Uuid;

use crate::client::fetch::ResultFetcher;
use crate::client::metrics::RunMetrics;
use crate::client::poll::{JobStatus, StatusPoller};
use crate::client::source::ArtifactSource;
use crate::client::submit::{JobHandle, JobSubmitter};
use crate::client::transport::Transport;
use crate::client::Artifact;
use crate::common::config::{Overrides, RelayConfig};
use crate::common::error::{ErrorKind, RelayError, Stage};
use crate::common::messages::{JobRequest, JobResponse, ResponseMode};

/// Terminal output of one orchestrated call.
#[derive(Debug, Clone, PartialEq)]
pub enum OrchestrationResult {
    Success {
        artifact: Artifact,
        job_handle: JobHandle,
    },
    Failure {
        kind: ErrorKind,
        message: String,
        job_handle: Option<JobHandle>,
    },
}

impl OrchestrationResult {
    fn failure(err: &RelayError, job_handle: Option<JobHandle>) -> Self {
        OrchestrationResult::Failure {
            kind: err.kind(),
            message: err.to_string(),
            job_handle,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, OrchestrationResult::Success { .. })
    }

    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            OrchestrationResult::Success { .. } => None,
            OrchestrationResult::Failure { kind, .. } => Some(*kind),
        }
    }

    pub fn job_handle(&self) -> Option<&JobHandle> {
        match self {
            OrchestrationResult::Success { job_handle, .. } => Some(job_handle),
            OrchestrationResult::Failure { job_handle, .. } => job_handle.as_ref(),
        }
    }

    /// Encode for the hosting boundary.
    pub fn to_response(&self, config: &RelayConfig) -> JobResponse {
        match self {
            OrchestrationResult::Success {
                artifact,
                job_handle,
            } => {
                let (output_base64, output_url) = match config.response_mode {
                    ResponseMode::Base64 => (Some(general_purpose::STANDARD.encode(artifact)), None),
                    ResponseMode::Url => (None, Some(config.download_url(job_handle.as_str()))),
                };
                JobResponse::Completed {
                    job_handle: Some(job_handle.to_string()),
                    output_base64,
                    output_url,
                }
            }
            OrchestrationResult::Failure {
                kind,
                message,
                job_handle,
            } => JobResponse::Failed {
                error_kind: *kind,
                error: message.clone(),
                job_handle: job_handle.as_ref().map(|h| h.to_string()),
            },
        }
    }
}

/// Entry point shared by every invocation of the process.
///
/// Holds only the read-only configuration; each run builds its own
/// [`Transport`] and deadline.
#[derive(Debug, Clone)]
pub struct Orchestrator {
    config: Arc<RelayConfig>,
}

impl Orchestrator {
    pub fn new(config: Arc<RelayConfig>) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    pub async fn run(&self, request: JobRequest) -> OrchestrationResult {
        self.run_with_metrics(request).await.0
    }

    pub async fn run_with_metrics(&self, request: JobRequest) -> (OrchestrationResult, RunMetrics) {
        match ArtifactSource::from_parts(request.url.as_deref(), request.data.as_deref()) {
            Ok(source) => self.run_source(source, &request.overrides).await,
            Err(err) => {
                let run_id = Uuid::new_v4();
                error!("[run {}] ❌ Rejected request: {}", run_id, err);
                let result = OrchestrationResult::failure(&err, None);
                let mut metrics = RunMetrics::new(run_id);
                metrics.finish(&result, std::time::Duration::ZERO);
                (result, metrics)
            }
        }
    }

    /// Run the pipeline for an already selected source.
    pub async fn run_source(
        &self,
        source: ArtifactSource,
        overrides: &Overrides,
    ) -> (OrchestrationResult, RunMetrics) {
        let run_id = Uuid::new_v4();
        let started = Instant::now();
        let mut metrics = RunMetrics::new(run_id);
        let mut handle: Option<JobHandle> = None;

        let effective = self.config.with_overrides(overrides).and_then(|config| {
            match started.checked_add(config.total_timeout()) {
                Some(deadline) => Ok((config, deadline)),
                None => Err(RelayError::Config(format!(
                    "total_timeout {}s is out of range",
                    config.total_timeout
                ))),
            }
        });

        let result = match effective {
            Ok((config, deadline)) => {
                let transport = Transport::for_invocation(&config, deadline);
                info!(
                    "[run {}] 🚀 Starting job from {} (budget {:?})",
                    run_id,
                    source.describe(),
                    config.total_timeout()
                );

                let outcome = execute(
                    &config,
                    &transport,
                    source,
                    deadline,
                    &mut handle,
                    &mut metrics,
                )
                .await;

                metrics.transport_attempts = transport.attempts();
                metrics.transport_retries = transport.retries();

                match outcome {
                    Ok((artifact, job_handle)) => OrchestrationResult::Success {
                        artifact,
                        job_handle,
                    },
                    Err(err) => OrchestrationResult::failure(&err, handle.clone()),
                }
            }
            Err(err) => OrchestrationResult::failure(&err, None),
        };

        let elapsed = started.elapsed();
        metrics.finish(&result, elapsed);
        match &result {
            OrchestrationResult::Success { artifact, job_handle } => info!(
                "[run {}] ✅ Job {} completed in {:?} ({} bytes)",
                run_id,
                job_handle,
                elapsed,
                artifact.len()
            ),
            OrchestrationResult::Failure {
                kind,
                message,
                job_handle,
            } => error!(
                "[run {}] ❌ {} after {:?} (job {}): {}",
                run_id,
                kind,
                elapsed,
                job_handle.as_ref().map(JobHandle::as_str).unwrap_or("-"),
                message
            ),
        }

        (result, metrics)
    }
}

async fn execute(
    config: &RelayConfig,
    transport: &Transport,
    source: ArtifactSource,
    deadline: Instant,
    handle: &mut Option<JobHandle>,
    metrics: &mut RunMetrics,
) -> Result<(Artifact, JobHandle), RelayError> {
    let stage_start = Instant::now();
    let artifact = source.resolve(transport, config).await?;
    metrics.record_stage(Stage::Source, stage_start.elapsed());
    metrics.input_bytes = Some(artifact.len());

    let stage_start = Instant::now();
    let job_handle = JobSubmitter::new(transport, config).submit(artifact).await?;
    metrics.record_stage(Stage::Submit, stage_start.elapsed());
    *handle = Some(job_handle.clone());

    let stage_start = Instant::now();
    let mut poller = StatusPoller::new(transport, config);
    let polled = poller.poll_until_terminal(&job_handle, deadline).await;
    metrics.status_queries = poller.queries();
    metrics.record_stage(Stage::Status, stage_start.elapsed());
    match polled? {
        JobStatus::Ready => {}
        JobStatus::Failed { message } => return Err(RelayError::JobFailed(message)),
        other => {
            return Err(RelayError::JobFailed(format!(
                "poller stopped on non-terminal status {other}"
            )))
        }
    }

    let stage_start = Instant::now();
    let result = ResultFetcher::new(transport, config).fetch(&job_handle).await?;
    metrics.record_stage(Stage::Download, stage_start.elapsed());

    Ok((result, job_handle))
}
