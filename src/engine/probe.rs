// src/engine/probe.rs
// Health probing against the engine's status endpoint

use backoff::future::retry;
use reqwest::StatusCode;
use std::time::Duration;

use super::client::{EngineClient, STATUS_PATH};
use super::{fixed_interval, EngineLifecycle};
use crate::config::GatewayConfig;
use crate::error::OrchestratorError;

/// Upper bound for a single status request
const STATUS_REQUEST_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone)]
pub struct HealthProber {
    client: EngineClient,
    interval: Duration,
}

impl HealthProber {
    pub fn new(client: EngineClient, interval: Duration) -> Self {
        Self { client, interval }
    }

    pub fn from_config(config: &GatewayConfig) -> Self {
        Self::new(EngineClient::new(config.engine_base_url()), config.probe_interval)
    }

    /// Poll the status endpoint until it answers 200 or `timeout` elapses
    pub async fn probe(&self, timeout: Duration) -> bool {
        let attempt = || async {
            match self.client.status(STATUS_REQUEST_TIMEOUT.min(timeout)).await {
                Ok(StatusCode::OK) => Ok(()),
                Ok(status) => {
                    tracing::debug!("Engine status endpoint returned {}", status);
                    Err(backoff::Error::transient(status.to_string()))
                }
                Err(e) => {
                    tracing::debug!("Engine status request failed: {}", e);
                    Err(backoff::Error::transient(e.to_string()))
                }
            }
        };

        matches!(
            tokio::time::timeout(timeout, retry(fixed_interval(self.interval), attempt)).await,
            Ok(Ok(()))
        )
    }

    /// Blocking probe right after launch. A miss is logged; the engine may still be loading.
    pub async fn startup_probe(&self, lifecycle: &EngineLifecycle, timeout: Duration) -> bool {
        tracing::info!(
            "⏳ Waiting up to {:?} for engine at {}{}",
            timeout,
            self.client.base_url(),
            STATUS_PATH
        );

        if self.probe(timeout).await {
            lifecycle.mark_healthy();
            tracing::info!("✅ Engine is ready");
            true
        } else {
            tracing::warn!(
                "⚠️ Engine did not answer within {:?}; continuing, pre-flight probes will check again",
                timeout
            );
            false
        }
    }

    /// Short probe before a submission. A miss marks the engine unhealthy for good.
    pub async fn preflight(
        &self,
        lifecycle: &EngineLifecycle,
        timeout: Duration,
    ) -> Result<(), OrchestratorError> {
        if self.probe(timeout).await {
            lifecycle.mark_healthy();
            return Ok(());
        }

        lifecycle.mark_unhealthy();
        tracing::error!(
            "❌ Pre-flight probe failed: no 200 from {}{} within {:?}",
            self.client.base_url(),
            STATUS_PATH,
            timeout
        );
        Err(OrchestratorError::EngineUnhealthy(format!(
            "no 200 from {} within {:?}",
            STATUS_PATH, timeout
        )))
    }
}
