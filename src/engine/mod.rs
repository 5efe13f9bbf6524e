// src/engine/mod.rs
//! Backing engine: process supervision, health probing and its HTTP surface.
//!
//! `EngineLifecycle` is the single owner of the engine state. It is created once per
//! process and shared as `Arc<EngineLifecycle>`; the state only ever moves forward.

pub mod client;
pub mod probe;
pub mod supervisor;

pub use client::{ArtifactKind, ArtifactReference, EngineClient, HistoryEntry};
pub use probe::HealthProber;
pub use supervisor::ProcessSupervisor;

use backoff::ExponentialBackoff;
use serde::Serialize;
use std::time::Duration;
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineState {
    /// Launch command not issued yet
    Unlaunched,
    /// Launch issued; the engine may still be loading models
    Launching,
    Healthy,
    /// Failed a pre-flight probe. Terminal.
    Unhealthy,
}

pub struct EngineLifecycle {
    state: watch::Sender<EngineState>,
}

impl EngineLifecycle {
    pub fn new() -> Self {
        let (state, _) = watch::channel(EngineState::Unlaunched);
        Self { state }
    }

    pub fn state(&self) -> EngineState {
        *self.state.borrow()
    }

    pub fn is_unhealthy(&self) -> bool {
        self.state() == EngineState::Unhealthy
    }

    pub fn subscribe(&self) -> watch::Receiver<EngineState> {
        self.state.subscribe()
    }

    /// Claim the one launch allowed per lifecycle. Returns false if already claimed.
    pub fn begin_launch(&self) -> bool {
        self.transition(|state| match state {
            EngineState::Unlaunched => Some(EngineState::Launching),
            _ => None,
        })
    }

    /// Record a successful probe
    pub fn mark_healthy(&self) -> bool {
        self.transition(|state| match state {
            EngineState::Launching => Some(EngineState::Healthy),
            _ => None,
        })
    }

    /// Record a failed pre-flight probe
    pub fn mark_unhealthy(&self) -> bool {
        self.transition(|state| match state {
            EngineState::Unhealthy => None,
            _ => Some(EngineState::Unhealthy),
        })
    }

    /// Resolves once the engine has been marked unhealthy
    pub async fn wait_until_unhealthy(&self) {
        let mut receiver = self.subscribe();
        let _ = receiver
            .wait_for(|state| *state == EngineState::Unhealthy)
            .await;
    }

    fn transition<F>(&self, next: F) -> bool
    where
        F: FnOnce(EngineState) -> Option<EngineState>,
    {
        let mut change = None;
        self.state.send_if_modified(|state| match next(*state) {
            Some(target) if target != *state => {
                change = Some((*state, target));
                *state = target;
                true
            }
            _ => false,
        });

        match change {
            Some((from, to)) => {
                tracing::info!("🔁 Engine state: {:?} -> {:?}", from, to);
                true
            }
            None => false,
        }
    }
}

impl Default for EngineLifecycle {
    fn default() -> Self {
        Self::new()
    }
}

/// Fixed-interval pacing for probe and poll loops. Deadlines are enforced by the caller.
pub(crate) fn fixed_interval(interval: Duration) -> ExponentialBackoff {
    ExponentialBackoff {
        current_interval: interval,
        initial_interval: interval,
        max_interval: interval,
        multiplier: 1.0,
        randomization_factor: 0.0,
        max_elapsed_time: None,
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_launch_claimed_once() {
        let lifecycle = EngineLifecycle::new();
        assert_eq!(lifecycle.state(), EngineState::Unlaunched);
        assert!(lifecycle.begin_launch());
        assert!(!lifecycle.begin_launch());
        assert_eq!(lifecycle.state(), EngineState::Launching);
    }

    #[test]
    fn test_healthy_requires_launch() {
        let lifecycle = EngineLifecycle::new();
        assert!(!lifecycle.mark_healthy());
        assert_eq!(lifecycle.state(), EngineState::Unlaunched);

        lifecycle.begin_launch();
        assert!(lifecycle.mark_healthy());
        assert_eq!(lifecycle.state(), EngineState::Healthy);
    }

    #[test]
    fn test_unhealthy_is_terminal() {
        let lifecycle = EngineLifecycle::new();
        lifecycle.begin_launch();
        lifecycle.mark_healthy();
        assert!(lifecycle.mark_unhealthy());
        assert!(!lifecycle.mark_unhealthy());
        assert!(!lifecycle.mark_healthy());
        assert!(!lifecycle.begin_launch());
        assert!(lifecycle.is_unhealthy());
    }

    #[tokio::test]
    async fn test_wait_until_unhealthy_wakes() {
        let lifecycle = std::sync::Arc::new(EngineLifecycle::new());
        lifecycle.begin_launch();

        let waiter = {
            let lifecycle = lifecycle.clone();
            tokio::spawn(async move { lifecycle.wait_until_unhealthy().await })
        };

        lifecycle.mark_unhealthy();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should wake")
            .unwrap();
    }
}
