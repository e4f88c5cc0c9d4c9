//! The HTTP surface (spec.md §6): one axum router wiring every
//! `/teams/*` endpoint to the [`DeploymentService`] / store / messaging
//! collaborators in [`AppState`].

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use team_store::DeploymentFilter;
use team_types::{
    Agent, AgentId, Deployment, DeploymentId, OrgPattern, SpaceId, Template, TemplateId,
    TemplateKind, UserId, WorkspaceId,
};

use crate::capabilities::validate_capability_format;
use crate::error::{ServiceError, ServiceResult};
use crate::service::MemoryPolicy;
use crate::state::AppState;

/// Build the full `/teams/*` router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/teams/templates/list", post(templates_list))
        .route("/teams/templates/get", post(templates_get))
        .route("/teams/templates/create", post(templates_create))
        .route("/teams/templates/update", post(templates_update))
        .route("/teams/templates/duplicate", post(templates_duplicate))
        .route("/teams/templates/delete", post(templates_delete))
        .route("/teams/deploy", post(deploy))
        .route("/teams/deploy-pattern", post(deploy_pattern))
        .route("/teams/deployments/list", post(deployments_list))
        .route("/teams/deployments/redeploy", post(deployments_redeploy))
        .route("/teams/deployments/rename", post(deployments_rename))
        .route("/teams/deployments/assign-task", post(deployments_assign_task))
        .route("/teams/deployments/status", post(deployments_status))
        .route("/teams/deployments/trigger", post(deployments_trigger))
        .route("/teams/deployments/workflow/start", post(deployments_trigger))
        .route("/teams/deployments/pause", post(deployments_pause))
        .route("/teams/deployments/resume", post(deployments_resume))
        .route("/teams/deployments/reset", post(deployments_reset))
        .route("/teams/deployments/teardown", post(deployments_teardown))
        .route("/teams/classify-stall", post(classify_stall))
        .with_state(state)
}

/// Claims extracted from a validated bearer token, scoped to the workspace
/// named in `vault`.
struct AuthContext {
    workspace_id: WorkspaceId,
    user_id: UserId,
}

async fn authenticate(state: &AppState, headers: &HeaderMap) -> ServiceResult<AuthContext> {
    let raw = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or_else(|| ServiceError::Unauthorized("missing bearer token".into()))?;

    let claims = state
        .token_validator
        .validate(raw)
        .await
        .map_err(|e| ServiceError::Unauthorized(e.to_string()))?;
    claims.validate().map_err(|e| ServiceError::Unauthorized(e.to_string()))?;
    if claims.is_expired() {
        return Err(ServiceError::Unauthorized("token expired".into()));
    }

    let workspace_id = claims
        .vault
        .parse::<uuid::Uuid>()
        .map(WorkspaceId)
        .map_err(|_| ServiceError::Unauthorized("vault claim is not a workspace id".into()))?;
    let user_id = claims
        .sub
        .parse::<uuid::Uuid>()
        .map(UserId)
        .map_err(|_| ServiceError::Unauthorized("sub claim is not a user id".into()))?;

    Ok(AuthContext { workspace_id, user_id })
}

// ---- templates -------------------------------------------------------

#[derive(Debug, Deserialize)]
struct TemplatesListRequest {}

async fn templates_list(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(_req): Json<TemplatesListRequest>,
) -> ServiceResult<Json<Vec<Template>>> {
    let auth = authenticate(&state, &headers).await?;
    let templates = state.store.list_templates(auth.workspace_id).await?;
    Ok(Json(templates.into_iter().filter(|t| !t.deleted).collect()))
}

#[derive(Debug, Deserialize)]
struct TemplateIdRequest {
    template_id: TemplateId,
}

async fn templates_get(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<TemplateIdRequest>,
) -> ServiceResult<Json<Template>> {
    let auth = authenticate(&state, &headers).await?;
    let template = state.store.find_template(req.template_id).await?;
    ensure_template_visible(&template, auth.workspace_id)?;
    Ok(Json(template))
}

#[derive(Debug, Deserialize)]
struct TemplateCreateRequest {
    name: String,
    pattern: OrgPattern,
}

async fn templates_create(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<TemplateCreateRequest>,
) -> ServiceResult<Json<Template>> {
    let auth = authenticate(&state, &headers).await?;
    validate_pattern_capabilities(&req.pattern)?;
    let template = Template::new(req.name, TemplateKind::Custom, Some(auth.workspace_id), req.pattern)
        .map_err(ServiceError::BadRequest)?;
    state.store.upsert_template(template.clone()).await?;
    Ok(Json(template))
}

#[derive(Debug, Deserialize)]
struct TemplateUpdateRequest {
    template_id: TemplateId,
    name: Option<String>,
    pattern: Option<OrgPattern>,
}

async fn templates_update(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<TemplateUpdateRequest>,
) -> ServiceResult<Json<Template>> {
    let auth = authenticate(&state, &headers).await?;
    let mut template = state.store.find_template(req.template_id).await?;
    ensure_template_visible(&template, auth.workspace_id)?;
    if !template.is_mutable() {
        return Err(ServiceError::Forbidden("system templates cannot be updated".into()));
    }
    if let Some(pattern) = req.pattern {
        validate_pattern_capabilities(&pattern)?;
        pattern.validate().map_err(|e| ServiceError::BadRequest(e.to_string()))?;
        template.pattern = pattern;
    }
    if let Some(name) = req.name {
        template.name = name;
    }
    state.store.upsert_template(template.clone()).await?;
    Ok(Json(template))
}

async fn templates_duplicate(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<TemplateIdRequest>,
) -> ServiceResult<Json<Template>> {
    let auth = authenticate(&state, &headers).await?;
    let source = state.store.find_template(req.template_id).await?;
    ensure_template_visible(&source, auth.workspace_id)?;
    let copy = Template::new(
        format!("{} (copy)", source.name),
        TemplateKind::Custom,
        Some(auth.workspace_id),
        source.pattern,
    )
    .map_err(ServiceError::BadRequest)?;
    state.store.upsert_template(copy.clone()).await?;
    Ok(Json(copy))
}

async fn templates_delete(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<TemplateIdRequest>,
) -> ServiceResult<StatusCode> {
    let auth = authenticate(&state, &headers).await?;
    let template = state.store.find_template(req.template_id).await?;
    ensure_template_visible(&template, auth.workspace_id)?;
    if !template.is_mutable() {
        return Err(ServiceError::Forbidden("system templates cannot be deleted".into()));
    }
    state.store.delete_template(req.template_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

fn ensure_template_visible(template: &Template, workspace_id: WorkspaceId) -> ServiceResult<()> {
    match template.workspace_id {
        Some(owner) if owner != workspace_id => {
            Err(ServiceError::NotFound(format!("template {} not found", template.id)))
        }
        _ => Ok(()),
    }
}

fn validate_pattern_capabilities(pattern: &OrgPattern) -> ServiceResult<()> {
    for role in &pattern.roles {
        for cap in &role.capabilities {
            validate_capability_format(cap).map_err(ServiceError::BadRequest)?;
        }
    }
    Ok(())
}


// ---- deploy ------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct DeployRequest {
    space_id: SpaceId,
    template_id: TemplateId,
    #[serde(default)]
    project_id: Option<String>,
    #[serde(default)]
    config: Value,
}

#[derive(Debug, Serialize)]
struct DeployResponse {
    deployment: Deployment,
    agents: Vec<Agent>,
}

async fn deploy(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<DeployRequest>,
) -> ServiceResult<Json<DeployResponse>> {
    let auth = authenticate(&state, &headers).await?;
    let (deployment, agents) = state
        .service
        .deploy_from_template_id(auth.workspace_id, req.space_id, req.template_id, auth.user_id, req.project_id, req.config)
        .await?;
    Ok(Json(DeployResponse { deployment, agents }))
}

#[derive(Debug, Deserialize)]
struct DeployPatternRequest {
    space_id: SpaceId,
    pattern: OrgPattern,
    #[serde(default)]
    project_id: Option<String>,
    #[serde(default)]
    template_name: Option<String>,
    #[serde(default)]
    config: Value,
}

async fn deploy_pattern(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<DeployPatternRequest>,
) -> ServiceResult<Json<DeployResponse>> {
    let auth = authenticate(&state, &headers).await?;
    validate_pattern_capabilities(&req.pattern)?;
    let (deployment, agents) = state
        .service
        .deploy_from_org_pattern(
            auth.workspace_id,
            req.space_id,
            req.pattern,
            auth.user_id,
            req.project_id,
            req.template_name,
            req.config,
        )
        .await?;
    Ok(Json(DeployResponse { deployment, agents }))
}

// ---- deployments ---------------------------------------------------------

#[derive(Debug, Deserialize)]
struct DeploymentsListRequest {
    #[serde(default)]
    space_id: Option<SpaceId>,
    #[serde(default)]
    template_name: Option<String>,
}

async fn deployments_list(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<DeploymentsListRequest>,
) -> ServiceResult<Json<Vec<Deployment>>> {
    let auth = authenticate(&state, &headers).await?;
    let filter = DeploymentFilter { space_id: req.space_id, template_name: req.template_name };
    let deployments = state.store.list_deployments(auth.workspace_id, filter).await?;
    Ok(Json(deployments))
}

#[derive(Debug, Deserialize)]
struct DeploymentIdRequest {
    deployment_id: DeploymentId,
}

async fn deployments_status(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<DeploymentIdRequest>,
) -> ServiceResult<Json<Deployment>> {
    let auth = authenticate(&state, &headers).await?;
    let deployment = state.store.find_deployment(auth.workspace_id, req.deployment_id).await?;
    Ok(Json(deployment))
}

#[derive(Debug, Deserialize)]
struct RedeployRequest {
    deployment_id: DeploymentId,
    #[serde(default)]
    memory_policy: MemoryPolicy,
}

async fn deployments_redeploy(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<RedeployRequest>,
) -> ServiceResult<Json<DeployResponse>> {
    let auth = authenticate(&state, &headers).await?;
    let (deployment, agents) = state
        .service
        .redeploy_deployment(auth.workspace_id, req.deployment_id, auth.user_id, req.memory_policy)
        .await?;
    Ok(Json(DeployResponse { deployment, agents }))
}

#[derive(Debug, Deserialize)]
struct RenameRequest {
    deployment_id: DeploymentId,
    name: String,
}

async fn deployments_rename(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<RenameRequest>,
) -> ServiceResult<Json<Deployment>> {
    let auth = authenticate(&state, &headers).await?;
    let deployment = state.service.rename_deployment(auth.workspace_id, req.deployment_id, req.name).await?;
    Ok(Json(deployment))
}

#[derive(Debug, Deserialize)]
struct AssignTaskRequest {
    deployment_id: DeploymentId,
    #[serde(default)]
    task_id: Option<String>,
    #[serde(default)]
    experiment_id: Option<String>,
}

async fn deployments_assign_task(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<AssignTaskRequest>,
) -> ServiceResult<Json<Deployment>> {
    let auth = authenticate(&state, &headers).await?;
    let deployment = state
        .service
        .assign_target_task(auth.workspace_id, req.deployment_id, req.task_id, req.experiment_id)
        .await?;
    Ok(Json(deployment))
}

async fn deployments_trigger(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<DeploymentIdRequest>,
) -> ServiceResult<StatusCode> {
    let auth = authenticate(&state, &headers).await?;
    state.service.trigger_team_run(auth.workspace_id, req.deployment_id).await?;
    Ok(StatusCode::ACCEPTED)
}

async fn deployments_pause(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<DeploymentIdRequest>,
) -> ServiceResult<Json<Deployment>> {
    let auth = authenticate(&state, &headers).await?;
    let deployment = state.service.pause_deployment(auth.workspace_id, req.deployment_id).await?;
    Ok(Json(deployment))
}

async fn deployments_resume(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<DeploymentIdRequest>,
) -> ServiceResult<Json<Deployment>> {
    let auth = authenticate(&state, &headers).await?;
    let deployment = state.service.resume_deployment(auth.workspace_id, req.deployment_id).await?;
    Ok(Json(deployment))
}

async fn deployments_reset(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<DeploymentIdRequest>,
) -> ServiceResult<StatusCode> {
    let auth = authenticate(&state, &headers).await?;
    state.service.reset_team(auth.workspace_id, req.deployment_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn deployments_teardown(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<DeploymentIdRequest>,
) -> ServiceResult<StatusCode> {
    let auth = authenticate(&state, &headers).await?;
    state.service.teardown_team(auth.workspace_id, req.deployment_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ---- classify-stall -------------------------------------------------------

#[derive(Debug, Deserialize)]
struct ClassifyStallRequest {
    deployment_id: DeploymentId,
    agent_id: AgentId,
    #[serde(default)]
    context: Option<String>,
}

#[derive(Debug, Serialize)]
struct ClassifyStallResponse {
    classification: String,
}

async fn classify_stall(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<ClassifyStallRequest>,
) -> ServiceResult<Json<ClassifyStallResponse>> {
    let auth = authenticate(&state, &headers).await?;
    let deployment = state.store.find_deployment(auth.workspace_id, req.deployment_id).await?;
    let agent = state.store.find_agent(req.agent_id).await?;
    if agent.deployment_id != deployment.id {
        return Err(ServiceError::NotFound(format!("agent {} not found", req.agent_id)));
    }
    let session_id = agent
        .runtime_session_id
        .ok_or_else(|| ServiceError::BadRequest("agent has no live session".into()))?;
    let ctx = req.context.unwrap_or_else(|| format!("manual classification for role {}", agent.role));
    let classification = state.sessions.force_classify_session(&session_id, &ctx).await?;
    Ok(Json(ClassifyStallResponse { classification }))
}
