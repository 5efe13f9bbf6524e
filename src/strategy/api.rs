// src/strategy/api.rs
// Queue -> poll history -> fetch artifact, over the engine's HTTP API

use async_trait::async_trait;
use backoff::future::retry;
use chrono::{DateTime, Utc};
use std::time::{Duration, Instant};
use uuid::Uuid;

use super::ExecutionStrategy;
use crate::config::GatewayConfig;
use crate::engine::client::{ArtifactKind, ArtifactReference, EngineClient, HistoryEntry};
use crate::engine::fixed_interval;
use crate::error::OrchestratorError;
use crate::graph::{ComputationGraph, Workflow};

/// Upper bound for a single queue/history/view request
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Accepted job. Lives only for the duration of one `submit_and_wait` call.
#[derive(Debug, Clone)]
pub struct JobHandle {
    pub job_id: String,
    pub submitted_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct ApiStrategy {
    client: EngineClient,
    poll_interval: Duration,
    client_id: String,
}

impl ApiStrategy {
    pub fn new(client: EngineClient, poll_interval: Duration) -> Self {
        Self {
            client,
            poll_interval,
            client_id: Uuid::new_v4().to_string(),
        }
    }

    pub fn from_config(config: &GatewayConfig) -> Self {
        Self::new(EngineClient::new(config.engine_base_url()), config.poll_interval)
    }

    pub async fn submit_and_wait(
        &self,
        workflow: &Workflow,
        timeout: Duration,
    ) -> Result<Vec<u8>, OrchestratorError> {
        let started = Instant::now();

        let graph = workflow.as_api_native().ok_or_else(|| {
            OrchestratorError::GraphRejected(
                "editor-format graphs cannot be queued over the API".to_string(),
            )
        })?;

        let handle = self.submit(graph, timeout).await?;

        let remaining = timeout.saturating_sub(started.elapsed());
        let entry = self.wait_for_outputs(&handle, remaining, timeout).await?;

        let reference = select_artifact(graph, &entry)?;
        tracing::info!(
            "📦 Job {} produced {} (subfolder '{}', {:?}) after {:.1}s",
            handle.job_id,
            reference.filename,
            reference.subfolder,
            reference.kind,
            (Utc::now() - handle.submitted_at).num_milliseconds() as f64 / 1000.0
        );

        let remaining = timeout.saturating_sub(started.elapsed());
        if remaining.is_zero() {
            return Err(OrchestratorError::ExecutionTimeout(timeout));
        }
        self.client.view(&reference, REQUEST_TIMEOUT.min(remaining)).await
    }

    async fn submit(
        &self,
        graph: &ComputationGraph,
        timeout: Duration,
    ) -> Result<JobHandle, OrchestratorError> {
        let queued = self
            .client
            .queue(graph, &self.client_id, REQUEST_TIMEOUT.min(timeout))
            .await?;

        let job_id = queued
            .prompt_id
            .filter(|id| !id.is_empty())
            .ok_or_else(|| {
                OrchestratorError::MalformedResponse("queue response has no job id".to_string())
            })?;

        tracing::info!("🎬 Queued job {} (queue position {:?})", job_id, queued.number);

        Ok(JobHandle {
            job_id,
            submitted_at: Utc::now(),
        })
    }

    /// Poll history until the job lists outputs. `remaining` is a hard bound; when it
    /// elapses the poll loop is dropped and the handle abandoned.
    async fn wait_for_outputs(
        &self,
        handle: &JobHandle,
        remaining: Duration,
        timeout: Duration,
    ) -> Result<HistoryEntry, OrchestratorError> {
        let poll = || async {
            match self.client.history(&handle.job_id, REQUEST_TIMEOUT).await {
                Ok(Some(entry)) if entry.has_outputs() => Ok(entry),
                Ok(Some(entry)) if entry.failed() => Err(backoff::Error::permanent(
                    OrchestratorError::NoArtifactProduced(format!(
                        "engine reported an execution error for job {}: {}",
                        handle.job_id,
                        entry.failure_detail()
                    )),
                )),
                Ok(_) => Err(backoff::Error::transient(OrchestratorError::ExecutionTimeout(
                    timeout,
                ))),
                Err(e @ OrchestratorError::MalformedResponse(_)) => Err(backoff::Error::permanent(e)),
                Err(e) => {
                    tracing::warn!("History poll for job {} failed (will retry): {}", handle.job_id, e);
                    Err(backoff::Error::transient(e))
                }
            }
        };

        match tokio::time::timeout(remaining, retry(fixed_interval(self.poll_interval), poll)).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(
                    "⏱️ Job {} produced no outputs within {:?}; abandoning",
                    handle.job_id,
                    timeout
                );
                Err(OrchestratorError::ExecutionTimeout(timeout))
            }
        }
    }
}

#[async_trait]
impl ExecutionStrategy for ApiStrategy {
    fn name(&self) -> &'static str {
        "api"
    }

    async fn execute(&self, workflow: &Workflow, timeout: Duration) -> Result<Vec<u8>, OrchestratorError> {
        self.submit_and_wait(workflow, timeout).await
    }
}

/// First file reference of an artifact-sink node in graph order; failing that, any
/// node's reference of kind `output`.
pub fn select_artifact(
    graph: &ComputationGraph,
    entry: &HistoryEntry,
) -> Result<ArtifactReference, OrchestratorError> {
    let from_sinks = graph.sink_nodes().into_iter().find_map(|(id, _)| {
        entry
            .outputs
            .get(id)
            .and_then(|output| output.artifact_references().into_iter().next())
    });

    if let Some(reference) = from_sinks {
        return Ok(reference);
    }

    entry
        .outputs
        .values()
        .flat_map(|output| output.artifact_references())
        .find(|reference| reference.kind == ArtifactKind::Output)
        .ok_or_else(|| {
            let nodes: Vec<&str> = entry.outputs.keys().map(String::as_str).collect();
            OrchestratorError::NoArtifactProduced(format!(
                "no image or video in outputs of nodes [{}]",
                nodes.join(", ")
            ))
        })
}
