// src/engine/supervisor.rs
// Starts the engine as a detached background process, once per container

use std::process::Stdio;
use std::sync::Arc;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;

use super::EngineLifecycle;
use crate::config::{substitute_port, GatewayConfig};

pub struct ProcessSupervisor {
    command: Vec<String>,
    lifecycle: Arc<EngineLifecycle>,
    child: Mutex<Option<Child>>,
}

impl ProcessSupervisor {
    /// `command` may contain `{port}` placeholders, filled in at launch
    pub fn new(command: Vec<String>, lifecycle: Arc<EngineLifecycle>) -> Self {
        Self {
            command,
            lifecycle,
            child: Mutex::new(None),
        }
    }

    pub fn from_config(config: &GatewayConfig, lifecycle: Arc<EngineLifecycle>) -> Self {
        Self::new(config.launch_command.clone(), lifecycle)
    }

    /// Start the engine bound to `port` without waiting for readiness.
    /// Spawn failures are logged, not returned: the prober reports the engine unhealthy.
    pub async fn launch(&self, port: u16) {
        if !self.lifecycle.begin_launch() {
            tracing::warn!(
                "Engine launch requested again (state {:?}); ignoring",
                self.lifecycle.state()
            );
            return;
        }

        let command = substitute_port(&self.command, port);
        let Some((program, args)) = command.split_first() else {
            tracing::error!("❌ No engine launch command configured");
            return;
        };

        tracing::info!("🚀 Launching engine on port {}: {}", port, command.join(" "));

        let spawned = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .spawn();

        match spawned {
            Ok(child) => {
                tracing::info!("Engine launcher started (pid {:?})", child.id());
                *self.child.lock().await = Some(child);
            }
            Err(e) => {
                tracing::error!(
                    "❌ Failed to launch engine with '{}': {}. Health probes will report it unhealthy.",
                    program,
                    e
                );
            }
        }
    }

    pub async fn pid(&self) -> Option<u32> {
        self.child.lock().await.as_ref().and_then(Child::id)
    }

    /// Whether the launched process is still alive. `None` if nothing was spawned.
    /// Launchers that fork the server into the background exit once it is up.
    pub async fn is_running(&self) -> Option<bool> {
        let mut guard = self.child.lock().await;
        let child = guard.as_mut()?;
        match child.try_wait() {
            Ok(None) => Some(true),
            Ok(Some(status)) => {
                tracing::debug!("Engine launcher exited with {}", status);
                Some(false)
            }
            Err(e) => {
                tracing::warn!("Failed to poll engine launcher: {}", e);
                Some(false)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EngineState;
    use std::time::Duration;

    #[tokio::test]
    async fn test_launch_runs_command_once() {
        let lifecycle = Arc::new(EngineLifecycle::new());
        let supervisor = ProcessSupervisor::new(
            vec!["sh".into(), "-c".into(), "exit 0".into()],
            lifecycle.clone(),
        );

        supervisor.launch(8188).await;
        assert_eq!(lifecycle.state(), EngineState::Launching);

        // Second launch is ignored and does not replace the child
        supervisor.launch(8188).await;
        assert_eq!(lifecycle.state(), EngineState::Launching);

        let mut exited = false;
        for _ in 0..100 {
            if supervisor.is_running().await == Some(false) {
                exited = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(exited, "launcher should have exited");
    }

    #[tokio::test]
    async fn test_missing_executable_is_logged_not_fatal() {
        let lifecycle = Arc::new(EngineLifecycle::new());
        let supervisor = ProcessSupervisor::new(
            vec!["/nonexistent/engine-binary".into(), "--port".into(), "{port}".into()],
            lifecycle.clone(),
        );

        supervisor.launch(8000).await;
        assert_eq!(lifecycle.state(), EngineState::Launching);
        assert_eq!(supervisor.is_running().await, None);
        assert_eq!(supervisor.pid().await, None);
    }
}
