// src/orchestrator.rs
//! Public entry point: run a workflow on the engine and hand back the artifact.
//!
//! Every call pre-flight-probes the engine, tries the primary strategy (HTTP API) and,
//! when that fails, the fallback strategy (CLI) with the same workflow and timeout.
//! Only the fallback's failure is returned when both fail.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::{FallbackPolicy, GatewayConfig};
use crate::engine::{EngineLifecycle, HealthProber};
use crate::error::OrchestratorError;
use crate::graph::{GraphEncoding, Workflow};
use crate::strategy::{ApiStrategy, CliStrategy, ExecutionStrategy};

/// Where a single `execute` call is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionPhase {
    Idle,
    Submitting(&'static str),
    FallingBack,
    Succeeded,
    Failed,
}

impl fmt::Display for ExecutionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionPhase::Idle => write!(f, "idle"),
            ExecutionPhase::Submitting(strategy) => write!(f, "submitting({})", strategy),
            ExecutionPhase::FallingBack => write!(f, "falling-back"),
            ExecutionPhase::Succeeded => write!(f, "succeeded"),
            ExecutionPhase::Failed => write!(f, "failed"),
        }
    }
}

pub struct Orchestrator {
    lifecycle: Arc<EngineLifecycle>,
    prober: HealthProber,
    primary: Box<dyn ExecutionStrategy>,
    fallback: Option<Box<dyn ExecutionStrategy>>,
    preflight_timeout: Duration,
    default_timeout: Duration,
    fallback_policy: FallbackPolicy,
}

impl Orchestrator {
    pub fn builder(config: GatewayConfig, lifecycle: Arc<EngineLifecycle>) -> OrchestratorBuilder {
        OrchestratorBuilder::new(config, lifecycle)
    }

    pub fn lifecycle(&self) -> &Arc<EngineLifecycle> {
        &self.lifecycle
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    /// Run `workflow` and return the artifact bytes
    pub async fn execute(
        &self,
        workflow: &Workflow,
        timeout: Duration,
    ) -> Result<Vec<u8>, OrchestratorError> {
        let started = Instant::now();
        let mut phase = ExecutionPhase::Idle;

        if self.lifecycle.is_unhealthy() {
            return Err(OrchestratorError::EngineUnhealthy(
                "engine failed an earlier pre-flight probe".to_string(),
            ));
        }
        self.prober
            .preflight(&self.lifecycle, self.preflight_timeout)
            .await?;

        self.advance(&mut phase, ExecutionPhase::Submitting(self.primary.name()));
        let primary_error = match self.primary.execute(workflow, timeout).await {
            Ok(bytes) => {
                self.advance(&mut phase, ExecutionPhase::Succeeded);
                tracing::info!(
                    "✅ Workflow executed via {} in {:.1}s ({} bytes)",
                    self.primary.name(),
                    started.elapsed().as_secs_f64(),
                    bytes.len()
                );
                return Ok(bytes);
            }
            Err(e) => e,
        };

        tracing::warn!(
            kind = primary_error.kind(),
            strategy = self.primary.name(),
            "Primary execution failed: {}",
            primary_error
        );

        let Some(fallback) = self.fallback.as_ref() else {
            self.advance(&mut phase, ExecutionPhase::Failed);
            return Err(primary_error);
        };

        if !self.should_fall_back(workflow, &primary_error) {
            tracing::info!(
                "Skipping {} fallback: {} would fail the same way",
                fallback.name(),
                primary_error.kind()
            );
            self.advance(&mut phase, ExecutionPhase::Failed);
            return Err(primary_error);
        }

        self.advance(&mut phase, ExecutionPhase::FallingBack);
        self.advance(&mut phase, ExecutionPhase::Submitting(fallback.name()));

        match fallback.execute(workflow, timeout).await {
            Ok(bytes) => {
                self.advance(&mut phase, ExecutionPhase::Succeeded);
                tracing::info!(
                    "✅ Workflow executed via {} fallback in {:.1}s ({} bytes)",
                    fallback.name(),
                    started.elapsed().as_secs_f64(),
                    bytes.len()
                );
                Ok(bytes)
            }
            Err(e) => {
                self.advance(&mut phase, ExecutionPhase::Failed);
                tracing::error!(
                    kind = e.kind(),
                    strategy = fallback.name(),
                    "❌ Fallback execution failed: {}",
                    e
                );
                Err(e)
            }
        }
    }

    fn should_fall_back(&self, workflow: &Workflow, error: &OrchestratorError) -> bool {
        match self.fallback_policy {
            FallbackPolicy::Always => true,
            // Editor-format graphs only run through the CLI, whatever the API said
            FallbackPolicy::TransientOnly => {
                workflow.encoding() == GraphEncoding::EditorFormat || !error.is_deterministic()
            }
        }
    }

    fn advance(&self, phase: &mut ExecutionPhase, next: ExecutionPhase) {
        tracing::debug!("Execution phase: {} -> {}", phase, next);
        *phase = next;
    }
}

pub struct OrchestratorBuilder {
    config: GatewayConfig,
    lifecycle: Arc<EngineLifecycle>,
    primary: Option<Box<dyn ExecutionStrategy>>,
    fallback: Option<Option<Box<dyn ExecutionStrategy>>>,
}

impl OrchestratorBuilder {
    pub fn new(config: GatewayConfig, lifecycle: Arc<EngineLifecycle>) -> Self {
        Self {
            config,
            lifecycle,
            primary: None,
            fallback: None,
        }
    }

    /// Replace the HTTP API strategy
    pub fn primary(mut self, strategy: impl ExecutionStrategy + 'static) -> Self {
        self.primary = Some(Box::new(strategy));
        self
    }

    /// Replace the CLI strategy
    pub fn fallback(mut self, strategy: impl ExecutionStrategy + 'static) -> Self {
        self.fallback = Some(Some(Box::new(strategy)));
        self
    }

    pub fn without_fallback(mut self) -> Self {
        self.fallback = Some(None);
        self
    }

    pub fn build(self) -> Orchestrator {
        let config = self.config;
        let primary: Box<dyn ExecutionStrategy> = match self.primary {
            Some(strategy) => strategy,
            None => Box::new(ApiStrategy::from_config(&config)),
        };
        let fallback: Option<Box<dyn ExecutionStrategy>> = match self.fallback {
            Some(strategy) => strategy,
            None => Some(Box::new(CliStrategy::from_config(&config))),
        };

        Orchestrator {
            lifecycle: self.lifecycle,
            prober: HealthProber::from_config(&config),
            primary,
            fallback,
            preflight_timeout: config.preflight_probe_timeout,
            default_timeout: config.job_timeout,
            fallback_policy: config.fallback_policy,
        }
    }
}
