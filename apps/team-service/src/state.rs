//! Shared handles every HTTP handler and background task is built from.

use std::sync::Arc;

use team_anomaly::AnomalyCoordinator;
use team_auth::TokenValidator;
use team_bus::EventBus;
use team_llm::LlmGateway;
use team_messaging::MessagingBus;
use team_session::SessionManager;
use team_store::DeploymentStore;
use team_workflow::WorkflowExecutor;

use crate::service::DeploymentService;

/// Axum application state, cloned (cheaply, via `Arc`) into every handler.
#[derive(Clone)]
pub struct AppState {
    /// Deployment Store.
    pub store: Arc<dyn DeploymentStore>,
    /// Team event bus.
    pub bus: Arc<dyn EventBus>,
    /// Agent session manager (PTY process supervision).
    pub sessions: Arc<SessionManager>,
    /// LLM gateway shared by workflow coordination and step/stall classification.
    pub llm: Arc<LlmGateway>,
    /// Workflow executor.
    pub workflow: Arc<WorkflowExecutor>,
    /// Inter-agent messaging bus.
    pub messaging: Arc<MessagingBus>,
    /// Anomaly coordinator driving the PTY event subscribe loop.
    pub anomaly: Arc<AnomalyCoordinator>,
    /// Capability token validator every request is authenticated against.
    pub token_validator: Arc<dyn TokenValidator>,
    /// Deployment Service public API (§4.8).
    pub service: Arc<DeploymentService>,
}
