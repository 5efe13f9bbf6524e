// src/engine/client.rs
// HTTP client for the engine's control API. Paths and payload shapes are fixed by the engine.

use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use crate::error::OrchestratorError;
use crate::graph::ComputationGraph;

pub const STATUS_PATH: &str = "/system_stats";
pub const QUEUE_PATH: &str = "/prompt";
pub const HISTORY_PATH: &str = "/history";
pub const VIEW_PATH: &str = "/view";

/// Output keys that list savable files
const ARTIFACT_OUTPUT_KEYS: &[&str] = &["images", "gifs", "videos"];

#[derive(Serialize, Debug)]
struct QueueRequest<'a> {
    prompt: &'a ComputationGraph,
    client_id: &'a str,
}

#[derive(Deserialize, Debug)]
pub struct QueueResponse {
    #[serde(alias = "job_id")]
    pub prompt_id: Option<String>,
    #[serde(default)]
    pub number: Option<i64>,
    #[serde(default)]
    pub node_errors: Value,
}

impl QueueResponse {
    pub fn has_node_errors(&self) -> bool {
        match &self.node_errors {
            Value::Null => false,
            Value::Object(errors) => !errors.is_empty(),
            Value::Array(errors) => !errors.is_empty(),
            _ => true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactKind {
    #[default]
    Output,
    Temp,
    Input,
}

impl ArtifactKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactKind::Output => "output",
            ArtifactKind::Temp => "temp",
            ArtifactKind::Input => "input",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactReference {
    pub filename: String,
    #[serde(default)]
    pub subfolder: String,
    #[serde(rename = "type", default)]
    pub kind: ArtifactKind,
}

/// One node's entry in a job's outputs. Only file lists are interpreted.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(transparent)]
pub struct NodeOutput(pub Map<String, Value>);

impl NodeOutput {
    pub fn artifact_references(&self) -> Vec<ArtifactReference> {
        ARTIFACT_OUTPUT_KEYS
            .iter()
            .filter_map(|key| self.0.get(*key).and_then(Value::as_array))
            .flatten()
            .filter_map(|item| serde_json::from_value(item.clone()).ok())
            .collect()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct HistoryStatus {
    #[serde(default)]
    pub status_str: Option<String>,
    #[serde(default)]
    pub completed: bool,
    #[serde(default)]
    pub messages: Value,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct HistoryEntry {
    #[serde(default)]
    pub outputs: BTreeMap<String, NodeOutput>,
    #[serde(default)]
    pub status: Option<HistoryStatus>,
}

impl HistoryEntry {
    pub fn has_outputs(&self) -> bool {
        !self.outputs.is_empty()
    }

    /// Engine finished the job with an error and wrote nothing
    pub fn failed(&self) -> bool {
        !self.has_outputs()
            && self
                .status
                .as_ref()
                .map(|s| s.completed && s.status_str.as_deref() == Some("error"))
                .unwrap_or(false)
    }

    pub fn failure_detail(&self) -> String {
        self.status
            .as_ref()
            .map(|s| s.messages.to_string())
            .unwrap_or_else(|| "no status reported".to_string())
    }
}

#[derive(Debug, Clone)]
pub struct EngineClient {
    client: Client,
    base_url: String,
}

impl EngineClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// GET the status endpoint and report the HTTP status
    pub async fn status(&self, timeout: Duration) -> Result<StatusCode, reqwest::Error> {
        let response = self
            .client
            .get(format!("{}{}", self.base_url, STATUS_PATH))
            .timeout(timeout)
            .send()
            .await?;
        Ok(response.status())
    }

    /// Queue a graph for execution
    pub async fn queue(
        &self,
        graph: &ComputationGraph,
        client_id: &str,
        timeout: Duration,
    ) -> Result<QueueResponse, OrchestratorError> {
        let response = self
            .client
            .post(format!("{}{}", self.base_url, QUEUE_PATH))
            .timeout(timeout)
            .json(&QueueRequest {
                prompt: graph,
                client_id,
            })
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            tracing::error!("Engine rejected graph ({}): {}", status, body);
            return Err(OrchestratorError::GraphRejected(format!("HTTP {}: {}", status, body)));
        }

        let queued: QueueResponse = serde_json::from_str(&body).map_err(|e| {
            OrchestratorError::MalformedResponse(format!("queue response: {}. Body: {}", e, body))
        })?;

        if queued.has_node_errors() {
            return Err(OrchestratorError::GraphRejected(format!(
                "node errors: {}",
                queued.node_errors
            )));
        }

        Ok(queued)
    }

    /// Fetch the history entry for a job. `None` while the engine has not recorded it.
    pub async fn history(
        &self,
        job_id: &str,
        timeout: Duration,
    ) -> Result<Option<HistoryEntry>, OrchestratorError> {
        let response = self
            .client
            .get(format!("{}{}/{}", self.base_url, HISTORY_PATH, job_id))
            .timeout(timeout)
            .send()
            .await?
            .error_for_status()?;

        let body = response.text().await?;
        let mut history: HashMap<String, HistoryEntry> = serde_json::from_str(&body).map_err(|e| {
            OrchestratorError::MalformedResponse(format!("history response: {}. Body: {}", e, body))
        })?;

        Ok(history.remove(job_id))
    }

    /// Download an artifact's bytes
    pub async fn view(
        &self,
        reference: &ArtifactReference,
        timeout: Duration,
    ) -> Result<Vec<u8>, OrchestratorError> {
        let response = self
            .client
            .get(format!("{}{}", self.base_url, VIEW_PATH))
            .query(&[
                ("filename", reference.filename.as_str()),
                ("subfolder", reference.subfolder.as_str()),
                ("type", reference.kind.as_str()),
            ])
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| {
                OrchestratorError::ArtifactFetchFailed(format!("{}: {}", reference.filename, e))
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(OrchestratorError::ArtifactFetchFailed(format!(
                "{} returned HTTP {}: {}",
                reference.filename, status, body
            )));
        }

        let bytes = response.bytes().await.map_err(|e| {
            OrchestratorError::ArtifactFetchFailed(format!("{}: {}", reference.filename, e))
        })?;

        if bytes.is_empty() {
            return Err(OrchestratorError::ArtifactFetchFailed(format!(
                "{} has an empty body",
                reference.filename
            )));
        }

        Ok(bytes.to_vec())
    }
}
