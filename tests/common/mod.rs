// Simulated engine and helpers shared by the integration tests
#![allow(dead_code)]

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::Path as FsPath;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use render_gateway::config::GatewayConfig;
use render_gateway::engine::EngineLifecycle;
use render_gateway::graph::Workflow;

#[derive(Clone, Debug)]
pub enum QueueBehavior {
    Accept(String),
    HttpError(u16),
    NodeErrors,
    NoJobId,
}

#[derive(Clone, Debug)]
pub enum HistoryBehavior {
    /// Empty history for `n` polls, then outputs
    OutputsAfter(usize),
    /// Empty history for `n` polls, then a completed entry with an error status
    ErrorAfter(usize),
    /// HTTP 500 for the first `n` polls, then outputs
    ServerErrorFor(usize),
    Never,
}

#[derive(Clone, Debug)]
pub struct SimConfig {
    pub status_code: u16,
    pub queue: QueueBehavior,
    pub history: HistoryBehavior,
    pub output_filename: String,
    pub artifact: Vec<u8>,
    pub view_status: u16,
    pub view_delay: Duration,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            status_code: 200,
            queue: QueueBehavior::Accept("abc".to_string()),
            history: HistoryBehavior::OutputsAfter(2),
            output_filename: "cat_0001.png".to_string(),
            artifact: b"\x89PNG\r\n\x1a\ncat-pixels".to_vec(),
            view_status: 200,
            view_delay: Duration::ZERO,
        }
    }
}

#[derive(Default)]
pub struct SimCounters {
    pub status_calls: AtomicUsize,
    pub queue_calls: AtomicUsize,
    pub history_calls: AtomicUsize,
    pub view_calls: AtomicUsize,
    pub last_view_query: Mutex<Option<HashMap<String, String>>>,
    pub last_prompt: Mutex<Option<Value>>,
}

pub struct Sim {
    pub config: SimConfig,
    pub counters: SimCounters,
}

pub struct SimEngine {
    pub addr: SocketAddr,
    pub sim: Arc<Sim>,
}

impl SimEngine {
    pub async fn spawn(config: SimConfig) -> Self {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let sim = Arc::new(Sim {
            config,
            counters: SimCounters::default(),
        });

        let app = Router::new()
            .route("/system_stats", get(system_stats))
            .route("/prompt", post(queue_prompt))
            .route("/history/:job_id", get(history))
            .route("/view", get(view))
            .with_state(sim.clone());

        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { addr, sim }
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub fn status_calls(&self) -> usize {
        self.sim.counters.status_calls.load(Ordering::SeqCst)
    }

    pub fn queue_calls(&self) -> usize {
        self.sim.counters.queue_calls.load(Ordering::SeqCst)
    }

    pub fn history_calls(&self) -> usize {
        self.sim.counters.history_calls.load(Ordering::SeqCst)
    }

    pub fn view_calls(&self) -> usize {
        self.sim.counters.view_calls.load(Ordering::SeqCst)
    }

    pub fn last_view_query(&self) -> Option<HashMap<String, String>> {
        self.sim.counters.last_view_query.lock().unwrap().clone()
    }

    pub fn last_prompt(&self) -> Option<Value> {
        self.sim.counters.last_prompt.lock().unwrap().clone()
    }
}

async fn system_stats(State(sim): State<Arc<Sim>>) -> Response {
    sim.counters.status_calls.fetch_add(1, Ordering::SeqCst);
    let status = StatusCode::from_u16(sim.config.status_code).unwrap();
    (status, Json(json!({"system": {"os": "posix"}}))).into_response()
}

async fn queue_prompt(State(sim): State<Arc<Sim>>, Json(body): Json<Value>) -> Response {
    sim.counters.queue_calls.fetch_add(1, Ordering::SeqCst);
    *sim.counters.last_prompt.lock().unwrap() = body.get("prompt").cloned();

    match &sim.config.queue {
        QueueBehavior::Accept(job_id) => {
            Json(json!({"prompt_id": job_id, "number": 1, "node_errors": {}})).into_response()
        }
        QueueBehavior::HttpError(code) => {
            (StatusCode::from_u16(*code).unwrap(), "internal engine failure").into_response()
        }
        QueueBehavior::NodeErrors => Json(json!({
            "prompt_id": "abc",
            "number": 1,
            "node_errors": {"2": {"errors": [{"type": "value_not_valid", "message": "bad sampler"}]}}
        }))
        .into_response(),
        QueueBehavior::NoJobId => Json(json!({"number": 1, "node_errors": {}})).into_response(),
    }
}

async fn history(State(sim): State<Arc<Sim>>, Path(job_id): Path<String>) -> Response {
    let previous_polls = sim.counters.history_calls.fetch_add(1, Ordering::SeqCst);

    let outputs = json!({
        "outputs": {
            "3": {"images": [{"filename": sim.config.output_filename, "subfolder": "", "type": "output"}]}
        },
        "status": {"status_str": "success", "completed": true, "messages": []}
    });

    let entry = match &sim.config.history {
        HistoryBehavior::ServerErrorFor(n) if previous_polls < *n => {
            return (StatusCode::INTERNAL_SERVER_ERROR, "history unavailable").into_response();
        }
        HistoryBehavior::ServerErrorFor(_) => outputs,
        HistoryBehavior::OutputsAfter(n) if previous_polls >= *n => outputs,
        HistoryBehavior::ErrorAfter(n) if previous_polls >= *n => json!({
            "outputs": {},
            "status": {"status_str": "error", "completed": true, "messages": [["execution_error", {"node_id": "2"}]]}
        }),
        _ => return Json(json!({})).into_response(),
    };

    let mut body = serde_json::Map::new();
    body.insert(job_id, entry);
    Json(Value::Object(body)).into_response()
}

async fn view(State(sim): State<Arc<Sim>>, Query(query): Query<HashMap<String, String>>) -> Response {
    sim.counters.view_calls.fetch_add(1, Ordering::SeqCst);
    *sim.counters.last_view_query.lock().unwrap() = Some(query);
    tokio::time::sleep(sim.config.view_delay).await;

    let status = StatusCode::from_u16(sim.config.view_status).unwrap();
    if !status.is_success() {
        return (status, "file not found").into_response();
    }
    (status, sim.config.artifact.clone()).into_response()
}

/// Fake CLI runner: `sh -c <script> comfy`, so appended arguments become `$1..`
pub fn fake_cli(script: &str) -> Vec<String> {
    vec!["sh".into(), "-c".into(), script.into(), "comfy".into()]
}

pub fn test_config(engine_port: u16, output_dir: &FsPath) -> GatewayConfig {
    GatewayConfig::default()
        .with_engine_port(engine_port)
        .with_output_dir(output_dir)
        .with_preflight_probe_timeout(Duration::from_millis(300))
        .with_probe_interval(Duration::from_millis(20))
        .with_poll_interval(Duration::from_millis(20))
        .with_job_timeout(Duration::from_secs(10))
        .with_cli_command(fake_cli("echo 'fallback not expected' >&2; exit 9"))
}

pub fn launched_lifecycle() -> Arc<EngineLifecycle> {
    let lifecycle = Arc::new(EngineLifecycle::new());
    lifecycle.begin_launch();
    lifecycle
}

pub fn cat_workflow() -> Workflow {
    Workflow::from_value(json!({
        "1": {"class_type": "CLIPTextEncode", "inputs": {"text": "cat"}},
        "2": {"class_type": "KSampler", "inputs": {"positive": ["1", 0], "seed": 42}},
        "3": {"class_type": "SaveImage", "inputs": {"images": ["2", 0], "filename_prefix": "cat"}}
    }))
    .unwrap()
}
