// src/config.rs
//! Gateway configuration, read from the environment (optionally a `.env` file).
//!
//! The engine port, timeouts and command lines are the only things that differ between
//! deployments, so one `GatewayConfig` replaces per-deployment copies of the orchestrator.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid value for {name}: '{value}' ({reason})")]
    InvalidValue {
        name: &'static str,
        value: String,
        reason: String,
    },
    #[error("{0} must not be empty")]
    Empty(&'static str),
}

/// Whether an API failure falls back to the CLI
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackPolicy {
    /// Any API-strategy failure is retried through the CLI
    Always,
    /// Skip the CLI when the API failure would repeat identically
    TransientOnly,
}

impl FromStr for FallbackPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "always" => Ok(FallbackPolicy::Always),
            "transient-only" | "transient_only" | "transient" => Ok(FallbackPolicy::TransientOnly),
            other => Err(format!("expected 'always' or 'transient-only', got '{}'", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub engine_host: String,
    pub engine_port: u16,
    /// Launch command line; `{port}` is replaced with `engine_port`
    pub launch_command: Vec<String>,
    /// CLI entry point (program plus leading arguments)
    pub cli_command: Vec<String>,
    pub output_dir: PathBuf,
    pub startup_probe_timeout: Duration,
    pub preflight_probe_timeout: Duration,
    pub probe_interval: Duration,
    pub poll_interval: Duration,
    pub job_timeout: Duration,
    /// Largest per-request timeout a caller may ask for
    pub max_job_timeout: Duration,
    pub max_concurrent_jobs: usize,
    pub fallback_policy: FallbackPolicy,
    pub server_addr: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            engine_host: "127.0.0.1".to_string(),
            engine_port: 8188,
            launch_command: split_command(
                "comfy launch --background -- --listen 0.0.0.0 --port {port}",
            ),
            cli_command: vec!["comfy".to_string()],
            output_dir: PathBuf::from("/root/comfy/ComfyUI/output"),
            startup_probe_timeout: Duration::from_secs(60),
            preflight_probe_timeout: Duration::from_secs(5),
            probe_interval: Duration::from_secs(1),
            poll_interval: Duration::from_secs(1),
            job_timeout: Duration::from_secs(1200),
            max_job_timeout: Duration::from_secs(7200),
            max_concurrent_jobs: 5,
            fallback_policy: FallbackPolicy::Always,
            server_addr: "0.0.0.0:3000".to_string(),
        }
    }
}

impl GatewayConfig {
    /// Build from environment variables, falling back to defaults for unset ones
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Same as `from_env` with an arbitrary variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(host) = lookup("ENGINE_HOST") {
            config.engine_host = host;
        }
        if let Some(port) = lookup("ENGINE_PORT") {
            config.engine_port = parse_value("ENGINE_PORT", &port)?;
        }
        if let Some(command) = lookup("ENGINE_LAUNCH_COMMAND") {
            config.launch_command = non_empty_command("ENGINE_LAUNCH_COMMAND", &command)?;
        }
        if let Some(command) = lookup("ENGINE_CLI_COMMAND") {
            config.cli_command = non_empty_command("ENGINE_CLI_COMMAND", &command)?;
        }
        if let Some(dir) = lookup("ENGINE_OUTPUT_DIR") {
            config.output_dir = PathBuf::from(dir);
        }
        if let Some(secs) = lookup("STARTUP_PROBE_TIMEOUT_SECS") {
            config.startup_probe_timeout =
                Duration::from_secs(parse_value("STARTUP_PROBE_TIMEOUT_SECS", &secs)?);
        }
        if let Some(secs) = lookup("PREFLIGHT_PROBE_TIMEOUT_SECS") {
            config.preflight_probe_timeout =
                Duration::from_secs(parse_value("PREFLIGHT_PROBE_TIMEOUT_SECS", &secs)?);
        }
        if let Some(ms) = lookup("PROBE_INTERVAL_MS") {
            config.probe_interval = Duration::from_millis(parse_value("PROBE_INTERVAL_MS", &ms)?);
        }
        if let Some(ms) = lookup("POLL_INTERVAL_MS") {
            config.poll_interval = Duration::from_millis(parse_value("POLL_INTERVAL_MS", &ms)?);
        }
        if let Some(secs) = lookup("JOB_TIMEOUT_SECS") {
            config.job_timeout = Duration::from_secs(parse_value("JOB_TIMEOUT_SECS", &secs)?);
        }
        if let Some(secs) = lookup("MAX_JOB_TIMEOUT_SECS") {
            config.max_job_timeout =
                Duration::from_secs(parse_value("MAX_JOB_TIMEOUT_SECS", &secs)?);
        }
        if config.job_timeout > config.max_job_timeout {
            return Err(ConfigError::InvalidValue {
                name: "JOB_TIMEOUT_SECS",
                value: config.job_timeout.as_secs().to_string(),
                reason: format!(
                    "exceeds MAX_JOB_TIMEOUT_SECS ({})",
                    config.max_job_timeout.as_secs()
                ),
            });
        }
        if let Some(max) = lookup("MAX_CONCURRENT_JOBS") {
            let max: usize = parse_value("MAX_CONCURRENT_JOBS", &max)?;
            if max == 0 {
                return Err(ConfigError::InvalidValue {
                    name: "MAX_CONCURRENT_JOBS",
                    value: max.to_string(),
                    reason: "must be at least 1".to_string(),
                });
            }
            config.max_concurrent_jobs = max;
        }
        if let Some(policy) = lookup("FALLBACK_POLICY") {
            config.fallback_policy = policy.parse::<FallbackPolicy>().map_err(|reason| ConfigError::InvalidValue {
                name: "FALLBACK_POLICY",
                value: policy.clone(),
                reason,
            })?;
        }
        if let Some(addr) = lookup("SERVER_ADDR") {
            config.server_addr = addr;
        }

        Ok(config)
    }

    pub fn engine_base_url(&self) -> String {
        format!("http://{}:{}", self.engine_host, self.engine_port)
    }

    pub fn with_engine_port(mut self, port: u16) -> Self {
        self.engine_port = port;
        self
    }

    pub fn with_launch_command<I, S>(mut self, command: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.launch_command = command.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_cli_command<I, S>(mut self, command: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.cli_command = command.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = dir.into();
        self
    }

    pub fn with_startup_probe_timeout(mut self, timeout: Duration) -> Self {
        self.startup_probe_timeout = timeout;
        self
    }

    pub fn with_preflight_probe_timeout(mut self, timeout: Duration) -> Self {
        self.preflight_probe_timeout = timeout;
        self
    }

    pub fn with_probe_interval(mut self, interval: Duration) -> Self {
        self.probe_interval = interval;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_job_timeout(mut self, timeout: Duration) -> Self {
        self.job_timeout = timeout;
        self
    }

    pub fn with_max_job_timeout(mut self, timeout: Duration) -> Self {
        self.max_job_timeout = timeout;
        self
    }

    pub fn with_max_concurrent_jobs(mut self, max: usize) -> Self {
        self.max_concurrent_jobs = max.max(1);
        self
    }

    pub fn with_fallback_policy(mut self, policy: FallbackPolicy) -> Self {
        self.fallback_policy = policy;
        self
    }
}

/// Replace every `{port}` placeholder in a command line
pub fn substitute_port(command: &[String], port: u16) -> Vec<String> {
    let port = port.to_string();
    command.iter().map(|arg| arg.replace("{port}", &port)).collect()
}

fn split_command(command: &str) -> Vec<String> {
    command.split_whitespace().map(str::to_string).collect()
}

fn non_empty_command(name: &'static str, command: &str) -> Result<Vec<String>, ConfigError> {
    let parts = split_command(command);
    if parts.is_empty() {
        return Err(ConfigError::Empty(name));
    }
    Ok(parts)
}

fn parse_value<T>(name: &'static str, value: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
        name,
        value: value.to_string(),
        reason: e.to_string(),
    })
}
