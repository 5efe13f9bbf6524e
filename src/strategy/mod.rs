// src/strategy/mod.rs
//! Ways of getting a workflow executed by the engine.
//!
//! The HTTP queue API is the primary path; the engine's command-line runner is the
//! safety net. Both sit behind `ExecutionStrategy` so the orchestrator only sees
//! "run this workflow, give me bytes".

pub mod api;
pub mod cli;

pub use api::{ApiStrategy, JobHandle};
pub use cli::CliStrategy;

use async_trait::async_trait;
use std::time::Duration;

use crate::error::OrchestratorError;
use crate::graph::Workflow;

#[async_trait]
pub trait ExecutionStrategy: Send + Sync {
    /// Short label for logs
    fn name(&self) -> &'static str;

    /// Run the workflow to completion and return the artifact bytes
    async fn execute(&self, workflow: &Workflow, timeout: Duration) -> Result<Vec<u8>, OrchestratorError>;
}
