// lib.rs - Main library file that exports all modules
pub mod config;
pub mod engine;
pub mod error;
pub mod graph;
pub mod handlers;
pub mod middleware;
pub mod orchestrator;
pub mod strategy;

// Re-export commonly used types for convenience
pub use config::{FallbackPolicy, GatewayConfig};
pub use engine::{EngineLifecycle, EngineState, HealthProber, ProcessSupervisor};
pub use error::OrchestratorError;
pub use graph::{ComputationGraph, GraphEncoding, GraphNode, Workflow};
pub use orchestrator::Orchestrator;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

// AppState holds the orchestrator, the engine supervisor, the bounded job pool and the drain signal
pub struct AppState {
    pub config: GatewayConfig,
    pub orchestrator: Orchestrator,
    pub supervisor: ProcessSupervisor,
    pub job_slots: Arc<Semaphore>,
    pub in_flight: AtomicUsize,
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(
        config: GatewayConfig,
        orchestrator: Orchestrator,
        supervisor: ProcessSupervisor,
        shutdown: CancellationToken,
    ) -> Self {
        let job_slots = Arc::new(Semaphore::new(config.max_concurrent_jobs));
        Self {
            config,
            orchestrator,
            supervisor,
            job_slots,
            in_flight: AtomicUsize::new(0),
            shutdown,
        }
    }

    /// No new work is accepted once the engine is unhealthy or shutdown has begun
    pub fn is_draining(&self) -> bool {
        self.orchestrator.lifecycle().is_unhealthy() || self.shutdown.is_cancelled()
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }
}
