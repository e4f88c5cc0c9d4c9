#![forbid(unsafe_code)]

//! **team-service** – Deployment Service for the team runtime orchestrator.
//!
//! Boots the in-memory store, event bus, session manager, LLM gateway,
//! workflow executor, messaging bus and anomaly coordinator, wires them
//! into a [`DeploymentService`], and serves the `/teams/*` HTTP surface
//! (spec.md §6) alongside the dispatch worker pool and periodic stall
//! sweep (spec.md §5).

mod capabilities;
mod config;
mod dispatch;
mod error;
mod http;
mod service;
mod state;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use team_anomaly::AnomalyCoordinator;
use team_auth::hs256::JwtHs256Validator;
use team_bus::InMemoryBus;
use team_llm::{Config as LlmConfig, LlmGateway};
use team_messaging::MessagingBus;
use team_session::SessionManager;
use team_store::InMemoryStore;
use team_workflow::WorkflowExecutor;
use tokio::signal;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Cli;
use crate::service::DeploymentService;
use crate::state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    let cli = Cli::parse();
    init_logging(&cli.log_level);

    info!("starting team-service v{}", env!("CARGO_PKG_VERSION"));

    let jwt_secret = cli
        .jwt_secret
        .clone()
        .unwrap_or_else(|| "team-service-secret-change-in-production".to_string());
    let token_validator: Arc<dyn team_auth::TokenValidator> = Arc::new(JwtHs256Validator::new(jwt_secret));

    let store: Arc<dyn team_store::DeploymentStore> = Arc::new(InMemoryStore::new());
    let bus: Arc<dyn team_bus::EventBus> = Arc::new(InMemoryBus::new(1024));

    let llm_config = LlmConfig::from_env().context("no LLM provider configured in the environment")?;
    let llm = Arc::new(LlmGateway::new(llm_config).await.context("initializing LLM gateway")?);

    let session_config = config::session_manager_config(&cli.scratch_base);
    let sessions = Arc::new(SessionManager::new(bus.clone(), llm.clone(), session_config));

    let workflow = Arc::new(WorkflowExecutor::new(store.clone(), bus.clone(), llm.clone()));
    let messaging = Arc::new(MessagingBus::new(store.clone(), sessions.clone(), bus.clone()));
    let anomaly = Arc::new(AnomalyCoordinator::new(
        store.clone(),
        sessions.clone(),
        bus.clone(),
        messaging.clone(),
        workflow.clone(),
        llm.clone(),
    ));

    let scratch_base = PathBuf::from(&cli.scratch_base);
    let deployment_service = Arc::new(DeploymentService::new(
        store.clone(),
        sessions.clone(),
        workflow.clone(),
        messaging.clone(),
        scratch_base,
        config::default_agent_workdir(),
    ));

    let anomaly_handle = tokio::spawn(anomaly.clone().run());
    let dispatch_handles = dispatch::spawn(bus.clone(), store.clone(), sessions.clone(), messaging.clone(), cli.dispatch_workers);

    let app_state = AppState {
        store,
        bus,
        sessions,
        llm,
        workflow,
        messaging,
        anomaly,
        token_validator,
        service: deployment_service,
    };

    let app = http::router(app_state).layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", cli.port))
        .await
        .with_context(|| format!("failed to bind to port {}", cli.port))?;
    info!("HTTP server listening on port {}", cli.port);

    let server = axum::serve(listener, app);
    tokio::select! {
        result = server => {
            if let Err(e) = result {
                tracing::error!("HTTP server error: {e}");
            }
        }
        _ = shutdown_signal() => {
            info!("received shutdown signal");
        }
    }

    anomaly_handle.abort();
    for handle in dispatch_handles {
        handle.abort();
    }

    info!("team-service stopped");
    Ok(())
}

fn init_logging(log_level: &str) {
    let log_filter = format!(
        "team_service={log_level},team_workflow={log_level},team_session={log_level},team_anomaly={log_level},team_messaging={log_level}"
    );
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(log_filter))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
