// src/error.rs
//! Failure taxonomy for workflow execution

use std::time::Duration;
use thiserror::Error;

use crate::graph::GraphError;

#[derive(Error, Debug)]
pub enum OrchestratorError {
    /// The engine failed its pre-flight probe. Fatal for this container.
    #[error("Engine unhealthy: {0}")]
    EngineUnhealthy(String),

    #[error("Graph rejected by engine: {0}")]
    GraphRejected(String),

    #[error("Malformed engine response: {0}")]
    MalformedResponse(String),

    #[error("Execution timed out after {0:?}")]
    ExecutionTimeout(Duration),

    #[error("No artifact produced: {0}")]
    NoArtifactProduced(String),

    #[error("Artifact fetch failed: {0}")]
    ArtifactFetchFailed(String),

    #[error("Engine request failed: {0}")]
    EngineRequest(#[from] reqwest::Error),

    #[error("CLI execution failed (exit code {exit_code:?}): {stderr}")]
    CliExecutionFailed {
        exit_code: Option<i32>,
        stdout: String,
        stderr: String,
    },

    #[error("Invalid graph: {0}")]
    InvalidGraph(#[from] GraphError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl OrchestratorError {
    /// Stable label used in logs and status responses
    pub fn kind(&self) -> &'static str {
        match self {
            OrchestratorError::EngineUnhealthy(_) => "EngineUnhealthy",
            OrchestratorError::GraphRejected(_) => "GraphRejected",
            OrchestratorError::MalformedResponse(_) => "MalformedResponse",
            OrchestratorError::ExecutionTimeout(_) => "ExecutionTimeout",
            OrchestratorError::NoArtifactProduced(_) => "NoArtifactProduced",
            OrchestratorError::ArtifactFetchFailed(_) => "ArtifactFetchFailed",
            OrchestratorError::EngineRequest(_) => "EngineRequest",
            OrchestratorError::CliExecutionFailed { .. } => "CliExecutionFailed",
            OrchestratorError::InvalidGraph(_) => "InvalidGraph",
            OrchestratorError::Io(_) => "Io",
        }
    }

    /// Failures that would repeat identically on any strategy
    pub fn is_deterministic(&self) -> bool {
        matches!(
            self,
            OrchestratorError::GraphRejected(_)
                | OrchestratorError::NoArtifactProduced(_)
                | OrchestratorError::InvalidGraph(_)
        )
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, OrchestratorError::EngineUnhealthy(_))
    }
}
