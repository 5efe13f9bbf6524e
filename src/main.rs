use axum::{Extension, Router};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use render_gateway::config::GatewayConfig;
use render_gateway::engine::{EngineLifecycle, HealthProber, ProcessSupervisor};
use render_gateway::orchestrator::Orchestrator;
use render_gateway::{handlers, middleware, AppState};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    init_logging().expect("Failed to initialize logging");

    let config = match GatewayConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("❌ Invalid configuration: {}", e);
            std::process::exit(2);
        }
    };

    tracing::info!(
        "Configuration - engine: {}, output dir: {}, max concurrent jobs: {}, job timeout: {:?}, fallback: {:?}",
        config.engine_base_url(),
        config.output_dir.display(),
        config.max_concurrent_jobs,
        config.job_timeout,
        config.fallback_policy
    );

    if let Err(e) = std::fs::create_dir_all(&config.output_dir) {
        tracing::warn!("Failed to create output directory {}: {}", config.output_dir.display(), e);
    }

    // One engine per container: launch it, then give it a chance to come up before taking traffic
    let lifecycle = Arc::new(EngineLifecycle::new());
    let supervisor = ProcessSupervisor::from_config(&config, lifecycle.clone());
    supervisor.launch(config.engine_port).await;

    HealthProber::from_config(&config)
        .startup_probe(&lifecycle, config.startup_probe_timeout)
        .await;

    let orchestrator = Orchestrator::builder(config.clone(), lifecycle.clone()).build();
    let shutdown = CancellationToken::new();

    // A failed pre-flight probe drains the container so the platform can replace it
    {
        let lifecycle = lifecycle.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = lifecycle.wait_until_unhealthy() => {
                    tracing::error!("🛑 Engine unhealthy: no longer accepting work, draining");
                    shutdown.cancel();
                }
                _ = shutdown.cancelled() => {}
            }
        });
    }

    let shared_state = Arc::new(AppState::new(
        config.clone(),
        orchestrator,
        supervisor,
        shutdown.clone(),
    ));

    let app = Router::new()
        .merge(handlers::gateway_routes())
        .layer(axum::middleware::from_fn(middleware::logging::request_logging_middleware))
        .layer(Extension(shared_state.clone()));

    let listener = match tokio::net::TcpListener::bind(&config.server_addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!("❌ Failed to bind {}: {}", config.server_addr, e);
            std::process::exit(1);
        }
    };
    if let Ok(addr) = listener.local_addr() {
        tracing::info!("listening on {}", addr);
    }

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown))
        .await;

    if let Err(e) = served {
        tracing::error!("Server error: {}", e);
        std::process::exit(1);
    }

    if lifecycle.is_unhealthy() {
        tracing::error!("Exiting after drain; engine never recovered");
        std::process::exit(1);
    }
    tracing::info!("👋 Shut down cleanly");
}

async fn shutdown_signal(token: CancellationToken) {
    tokio::select! {
        _ = token.cancelled() => {}
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                tracing::warn!("Failed to listen for ctrl-c: {}", e);
                // Keep serving until drained
                token.cancelled().await;
            } else {
                tracing::info!("Received ctrl-c, shutting down");
                token.cancel();
            }
        }
    }
}

fn init_logging() -> Result<(), Box<dyn std::error::Error>> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info,render_gateway=info,reqwest=warn,hyper=warn"))?;

    let fmt_layer = match std::env::var("LOG_FORMAT").as_deref() {
        Ok("json") => fmt::layer().json().with_current_span(true).with_target(true).boxed(),
        _ => fmt::layer().with_target(true).boxed(),
    };

    tracing_subscriber::registry().with(env_filter).with(fmt_layer).init();

    tracing::info!("🎨 Render gateway {} starting", env!("CARGO_PKG_VERSION"));
    Ok(())
}
