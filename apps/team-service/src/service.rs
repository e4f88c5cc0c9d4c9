//! Deployment Service: the public API surface (spec.md §4.8) every HTTP
//! handler is a thin wrapper over.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use team_messaging::{build_kickoff_prompt, MessagingBus, Sender};
use team_session::{scratch::ensure_scratch_dir, SessionManager};
use team_store::DeploymentStore;
use team_types::{
    Agent, AgentId, AgentStatus, Deployment, DeploymentId, DeploymentStatus, OrgPattern, Role,
    SpaceId, UserId, WorkflowState, WorkspaceId,
};
use team_workflow::{compile, Trigger, WorkflowExecutor};
use uuid::Uuid;

use crate::capabilities::{ensure_persistence_capability, validate_capability_format};
use crate::error::{ServiceError, ServiceResult};

/// How a redeployment's pseudo-user identities relate to the source
/// deployment's (spec.md §4.8 `redeployDeployment`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryPolicy {
    /// Fresh pseudo-users, no continuity with the source deployment.
    #[default]
    None,
    /// Reuse pseudo-user identities keyed by `role#instanceNumber`.
    CarryAll,
}

/// The Deployment Service: every operation is scoped to the caller's
/// workspace and routes through the store/session/workflow/messaging
/// collaborators rather than touching any of them directly from HTTP code.
pub struct DeploymentService {
    store: Arc<dyn DeploymentStore>,
    sessions: Arc<SessionManager>,
    workflow: Arc<WorkflowExecutor>,
    messaging: Arc<MessagingBus>,
    scratch_base: PathBuf,
    default_workdir: Option<String>,
}

impl DeploymentService {
    /// Construct a service bound to its collaborators.
    pub fn new(
        store: Arc<dyn DeploymentStore>,
        sessions: Arc<SessionManager>,
        workflow: Arc<WorkflowExecutor>,
        messaging: Arc<MessagingBus>,
        scratch_base: PathBuf,
        default_workdir: Option<String>,
    ) -> Self {
        Self { store, sessions, workflow, messaging, scratch_base, default_workdir }
    }

    /// `deployFromOrgPattern(ws, space, pattern, user, opts) -> {deployment, agents}`.
    #[allow(clippy::too_many_arguments)]
    pub async fn deploy_from_org_pattern(
        &self,
        workspace_id: WorkspaceId,
        space_id: SpaceId,
        pattern: OrgPattern,
        deployed_by: UserId,
        project_id: Option<String>,
        template_name: Option<String>,
        config: serde_json::Value,
    ) -> ServiceResult<(Deployment, Vec<Agent>)> {
        for role in &pattern.roles {
            for cap in &role.capabilities {
                validate_capability_format(cap).map_err(ServiceError::BadRequest)?;
            }
        }
        let execution_plan = compile(&pattern)?;

        let deployment_id = DeploymentId::new();
        let agents = self.materialize_agents(deployment_id, workspace_id, &pattern, deployment_id.0);

        let deployment = Deployment {
            id: deployment_id,
            workspace_id,
            space_id,
            project_id,
            template_name,
            config,
            org_pattern: pattern,
            execution_plan,
            status: DeploymentStatus::Active,
            workflow_state: WorkflowState::idle(),
            messages: vec![],
            run_logs: vec![],
            created_at: Utc::now(),
            torn_down_at: None,
            deployed_by,
        };

        self.store.create_deployment(deployment.clone()).await?;
        for agent in &agents {
            self.store.upsert_agent(agent.clone()).await?;
        }

        Ok((deployment, agents))
    }

    /// `deployFromTemplateId`: resolves a stored template, then delegates to
    /// [`Self::deploy_from_org_pattern`].
    pub async fn deploy_from_template_id(
        &self,
        workspace_id: WorkspaceId,
        space_id: SpaceId,
        template_id: team_types::TemplateId,
        deployed_by: UserId,
        project_id: Option<String>,
        config: serde_json::Value,
    ) -> ServiceResult<(Deployment, Vec<Agent>)> {
        let template = self.store.find_template(template_id).await?;
        if let Some(owner) = template.workspace_id {
            if owner != workspace_id {
                return Err(ServiceError::NotFound(format!("template {template_id} not found")));
            }
        }
        self.deploy_from_org_pattern(
            workspace_id,
            space_id,
            template.pattern,
            deployed_by,
            project_id,
            Some(template.name),
            config,
        )
        .await
    }

    /// `redeployDeployment(ws, sourceId, user, {memoryPolicy})`.
    pub async fn redeploy_deployment(
        &self,
        workspace_id: WorkspaceId,
        source_id: DeploymentId,
        user: UserId,
        memory_policy: MemoryPolicy,
    ) -> ServiceResult<(Deployment, Vec<Agent>)> {
        let source = self.store.find_deployment(workspace_id, source_id).await?;
        let execution_plan = compile(&source.org_pattern)?;

        let deployment_id = DeploymentId::new();
        let identity_namespace = match memory_policy {
            MemoryPolicy::CarryAll => source_id.0,
            MemoryPolicy::None => deployment_id.0,
        };
        let agents = self.materialize_agents(deployment_id, workspace_id, &source.org_pattern, identity_namespace);

        let deployment = Deployment {
            id: deployment_id,
            workspace_id,
            space_id: source.space_id,
            project_id: source.project_id.clone(),
            template_name: source.template_name.clone(),
            config: source.config.clone(),
            org_pattern: source.org_pattern.clone(),
            execution_plan,
            status: DeploymentStatus::Active,
            workflow_state: WorkflowState::idle(),
            messages: vec![],
            run_logs: vec![],
            created_at: Utc::now(),
            torn_down_at: None,
            deployed_by: user,
        };

        self.store.create_deployment(deployment.clone()).await?;
        for agent in &agents {
            self.store.upsert_agent(agent.clone()).await?;
        }

        Ok((deployment, agents))
    }

    /// `triggerTeamRun(ws, deploymentId)`: requires a target task/experiment
    /// already assigned, resets the team, sends the kickoff message to the
    /// lead agent, and flips the workflow to `running`.
    pub async fn trigger_team_run(&self, workspace_id: WorkspaceId, deployment_id: DeploymentId) -> ServiceResult<()> {
        let deployment = self.store.find_deployment(workspace_id, deployment_id).await?;
        let has_target = deployment.config.get("targetTaskId").and_then(|v| v.as_str()).is_some()
            || deployment.config.get("targetExperimentId").and_then(|v| v.as_str()).is_some();
        if !has_target {
            return Err(ServiceError::BadRequest(
                "deployment has no target task or experiment assigned".into(),
            ));
        }

        self.reset_team(workspace_id, deployment_id).await?;

        let lead_role = deployment
            .execution_plan
            .lead_role()
            .ok_or_else(|| ServiceError::BadRequest("pattern has no lead/coordinator role".into()))?;
        let agents = self.store.list_agents(deployment_id).await?;
        let lead_agent = agents
            .iter()
            .filter(|a| a.role == lead_role.id)
            .min_by_key(|a| a.instance_number)
            .ok_or_else(|| ServiceError::BadRequest("no lead agent instantiated for this deployment".into()))?;

        let roster = self.messaging.team_roster(deployment_id, workspace_id, lead_agent.id).await?;
        let target_description = deployment
            .config
            .get("targetTaskId")
            .or_else(|| deployment.config.get("targetExperimentId"))
            .and_then(|v| v.as_str())
            .unwrap_or("the assigned target")
            .to_string();
        let prompt = build_kickoff_prompt(&target_description, &roster);

        self.messaging
            .send_message(workspace_id, deployment_id, Sender::System, &lead_agent.id.to_string(), &prompt)
            .await?;

        self.workflow.advance(workspace_id, deployment_id, Trigger::start()).await?;

        self.store
            .merge_config(deployment_id, serde_json::json!({ "lastTriggeredAt": Utc::now() }))
            .await?;

        Ok(())
    }

    /// `pauseDeployment(ws, id)`.
    pub async fn pause_deployment(&self, workspace_id: WorkspaceId, deployment_id: DeploymentId) -> ServiceResult<Deployment> {
        self.set_status(workspace_id, deployment_id, DeploymentStatus::Paused).await
    }

    /// `resumeDeployment(ws, id)`.
    pub async fn resume_deployment(&self, workspace_id: WorkspaceId, deployment_id: DeploymentId) -> ServiceResult<Deployment> {
        self.set_status(workspace_id, deployment_id, DeploymentStatus::Active).await
    }

    async fn set_status(
        &self,
        workspace_id: WorkspaceId,
        deployment_id: DeploymentId,
        status: DeploymentStatus,
    ) -> ServiceResult<Deployment> {
        let mut deployment = self.store.find_deployment(workspace_id, deployment_id).await?;
        if deployment.is_torn_down() {
            return Err(ServiceError::BadRequest("deployment is torn down".into()));
        }
        deployment.status = status;
        self.store.update_deployment(workspace_id, deployment.clone()).await?;
        Ok(deployment)
    }

    /// `resetTeam(ws, id)`: best-effort session stop, agents back to idle,
    /// scratch cleaned, deployment reactivated, workflow state cleared.
    pub async fn reset_team(&self, workspace_id: WorkspaceId, deployment_id: DeploymentId) -> ServiceResult<()> {
        let mut deployment = self.store.find_deployment(workspace_id, deployment_id).await?;
        let agents = self.store.list_agents(deployment_id).await?;

        for mut agent in agents {
            if let Some(session_id) = agent.runtime_session_id.clone() {
                if let Err(e) = self.sessions.stop(&session_id).await {
                    tracing::warn!(session_id, error = %e, "best-effort session stop failed during reset");
                }
            }
            agent.reset_for_idle();
            self.store.upsert_agent(agent.clone()).await?;
            if let Err(e) = std::fs::remove_dir_all(
                self.scratch_base.join(deployment_id.to_string()).join(agent.id.to_string()),
            ) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!(agent_id = %agent.id, error = %e, "best-effort scratch cleanup failed during reset");
                }
            }
        }

        if deployment.status == DeploymentStatus::Paused {
            deployment.status = DeploymentStatus::Active;
            self.store.update_deployment(workspace_id, deployment.clone()).await?;
        }

        if matches!(
            deployment.workflow_state.current_phase,
            team_types::WorkflowPhase::Running | team_types::WorkflowPhase::Failed
        ) {
            let expected_version = deployment.workflow_state.version;
            self.store
                .update_workflow_state(deployment_id, expected_version, WorkflowState::idle())
                .await?;
        }

        Ok(())
    }

    /// `teardownTeam(ws, id)`: terminal — stops every session, marks the
    /// deployment and workflow torn down, and cleans scratch. Idempotent.
    pub async fn teardown_team(&self, workspace_id: WorkspaceId, deployment_id: DeploymentId) -> ServiceResult<()> {
        let mut deployment = self.store.find_deployment(workspace_id, deployment_id).await?;
        if deployment.is_torn_down() {
            return Ok(());
        }

        let agents = self.store.list_agents(deployment_id).await?;
        for mut agent in agents {
            if let Some(session_id) = agent.runtime_session_id.clone() {
                if let Err(e) = self.sessions.stop(&session_id).await {
                    tracing::warn!(session_id, error = %e, "best-effort session stop failed during teardown");
                }
            }
            agent.reset_for_idle();
            agent.status = AgentStatus::Idle;
            self.store.upsert_agent(agent.clone()).await?;
            if let Err(e) = std::fs::remove_dir_all(
                self.scratch_base.join(deployment_id.to_string()).join(agent.id.to_string()),
            ) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!(agent_id = %agent.id, error = %e, "best-effort scratch cleanup failed during teardown");
                }
            }
        }

        deployment.status = DeploymentStatus::TornDown;
        deployment.torn_down_at = Some(Utc::now());
        let expected_version = deployment.workflow_state.version;
        let mut ws = deployment.workflow_state.clone();
        ws.current_phase = team_types::WorkflowPhase::TornDown;
        ws.completed_at = Some(Utc::now());
        self.store.update_workflow_state(deployment_id, expected_version, ws.clone()).await?;
        deployment.workflow_state = ws;
        self.store.update_deployment(workspace_id, deployment).await?;

        Ok(())
    }

    /// `renameDeployment(ws, id, name)` — stored as `config.teamName` since
    /// `Deployment` carries no dedicated display-name field.
    pub async fn rename_deployment(&self, workspace_id: WorkspaceId, deployment_id: DeploymentId, name: String) -> ServiceResult<Deployment> {
        self.store.find_deployment(workspace_id, deployment_id).await?;
        self.store
            .merge_config(deployment_id, serde_json::json!({ "teamName": name }))
            .await?;
        self.store.find_deployment(workspace_id, deployment_id).await
    }

    /// `assignTargetTask(ws, id, {taskId?, experimentId?})`: exactly one of
    /// the two must be provided.
    pub async fn assign_target_task(
        &self,
        workspace_id: WorkspaceId,
        deployment_id: DeploymentId,
        task_id: Option<String>,
        experiment_id: Option<String>,
    ) -> ServiceResult<Deployment> {
        if task_id.is_some() == experiment_id.is_some() {
            return Err(ServiceError::BadRequest(
                "exactly one of taskId or experimentId must be set".into(),
            ));
        }
        self.store.find_deployment(workspace_id, deployment_id).await?;
        let patch = serde_json::json!({
            "targetTaskId": task_id,
            "targetExperimentId": experiment_id,
        });
        self.store.merge_config(deployment_id, patch).await?;
        self.store.find_deployment(workspace_id, deployment_id).await
    }

    fn materialize_agents(
        &self,
        deployment_id: DeploymentId,
        workspace_id: WorkspaceId,
        pattern: &OrgPattern,
        identity_namespace: Uuid,
    ) -> Vec<Agent> {
        let mut agents: Vec<Agent> = Vec::new();
        for role in &pattern.roles {
            for instance in 1..=role.min_instances {
                let agent_id = AgentId::new();
                let user_id = pseudo_user_id(identity_namespace, &role.id, instance);
                let mut capabilities: HashSet<String> = role.capabilities.clone();
                ensure_persistence_capability(&mut capabilities);
                let workdir = self.resolve_workdir(role, &deployment_id, &agent_id);

                agents.push(Agent {
                    id: agent_id,
                    deployment_id,
                    workspace_id,
                    user_id,
                    role: role.id.clone(),
                    instance_number: instance,
                    agent_type: role.agent_type.clone(),
                    workdir,
                    system_prompt: String::new(),
                    capabilities,
                    reports_to_agent_id: None,
                    status: AgentStatus::Idle,
                    current_step_id: None,
                    runtime_session_id: None,
                    terminal_session_id: None,
                    last_run_at: None,
                    last_run_summary: None,
                    total_actions: 0,
                    total_errors: 0,
                });
            }
        }

        // Second pass: wire reportsToAgentId from the role graph, picking the
        // parent role's lowest-instance-number agent deterministically.
        let by_role_lowest: std::collections::HashMap<&str, AgentId> = pattern
            .roles
            .iter()
            .filter_map(|r| {
                agents
                    .iter()
                    .filter(|a| a.role == r.id)
                    .min_by_key(|a| a.instance_number)
                    .map(|a| (r.id.as_str(), a.id))
            })
            .collect();
        let reports_to: std::collections::HashMap<&str, &str> = pattern
            .roles
            .iter()
            .filter_map(|r| r.reports_to.as_deref().map(|p| (r.id.as_str(), p)))
            .collect();
        for agent in &mut agents {
            if let Some(parent_role) = reports_to.get(agent.role.as_str()) {
                agent.reports_to_agent_id = by_role_lowest.get(parent_role).copied();
            }
        }

        agents
    }

    fn resolve_workdir(&self, role: &Role, deployment_id: &DeploymentId, agent_id: &AgentId) -> String {
        if let Some(dir) = &role.workdir {
            return dir.clone();
        }
        if let Some(dir) = &self.default_workdir {
            return dir.clone();
        }
        match ensure_scratch_dir(&self.scratch_base, &deployment_id.to_string(), &agent_id.to_string()) {
            Ok(dir) => dir.to_string_lossy().to_string(),
            Err(e) => {
                tracing::warn!(%deployment_id, %agent_id, error = %e, "failed to pre-create scratch dir, deferring to spawn time");
                self.scratch_base.join(deployment_id.to_string()).join(agent_id.to_string()).to_string_lossy().to_string()
            }
        }
    }
}

/// Deterministic pseudo-user identity for `(role, instanceNumber)` within
/// `namespace` — the source deployment's id under `carry_all`, a fresh
/// deployment's own id under `none` (spec.md §4.8).
fn pseudo_user_id(namespace: Uuid, role: &str, instance: u32) -> UserId {
    UserId(Uuid::new_v5(&namespace, format!("{role}#{instance}").as_bytes()))
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet as Set;

    use team_bus::InMemoryBus;
    use team_llm::{Config as LlmConfig, LlmGateway};
    use team_store::InMemoryStore;
    use team_types::EscalationConfig;

    use super::*;

    async fn test_llm() -> Arc<LlmGateway> {
        std::env::set_var("ANTHROPIC_API_KEY", "sk-ant-test-key-not-real");
        let config = LlmConfig::from_env().expect("config from env");
        Arc::new(LlmGateway::new(config).await.expect("construct gateway (no network call)"))
    }

    async fn harness(scratch_base: PathBuf, default_workdir: Option<String>) -> (Arc<DeploymentService>, Arc<dyn DeploymentStore>) {
        let store: Arc<dyn DeploymentStore> = Arc::new(InMemoryStore::new());
        let bus: Arc<dyn team_bus::EventBus> = Arc::new(InMemoryBus::new(64));
        let llm = test_llm().await;
        let sessions = Arc::new(SessionManager::new(bus.clone(), llm.clone(), team_session::SessionManagerConfig::default()));
        let workflow = Arc::new(WorkflowExecutor::new(store.clone(), bus.clone(), llm.clone()));
        let messaging = Arc::new(MessagingBus::new(store.clone(), sessions.clone(), bus));
        let service = Arc::new(DeploymentService::new(store.clone(), sessions, workflow, messaging, scratch_base, default_workdir));
        (service, store)
    }

    fn two_role_pattern(worker_workdir: Option<String>) -> OrgPattern {
        OrgPattern {
            name: "pairing".into(),
            version: "1.0.0".into(),
            roles: vec![
                Role {
                    id: "lead".into(),
                    name: "Lead".into(),
                    description: String::new(),
                    capabilities: ["task.create".to_string()].into_iter().collect(),
                    reports_to: None,
                    min_instances: 1,
                    max_instances: 1,
                    singleton: true,
                    agent_type: "claude".into(),
                    workdir: None,
                },
                Role {
                    id: "worker".into(),
                    name: "Worker".into(),
                    description: String::new(),
                    capabilities: Set::new(),
                    reports_to: Some("lead".into()),
                    min_instances: 2,
                    max_instances: 2,
                    singleton: false,
                    agent_type: "codex".into(),
                    workdir: worker_workdir,
                },
            ],
            routing: vec![],
            escalation: EscalationConfig::default(),
            workflow: vec![],
        }
    }

    #[tokio::test]
    async fn deploy_from_org_pattern_materializes_and_wires_agents() {
        let base = tempfile::tempdir().unwrap();
        let (service, store) = harness(base.path().to_path_buf(), Some("/default/workdir".into())).await;
        let pattern = two_role_pattern(Some("/custom/workdir".into()));
        let workspace_id = WorkspaceId::new();
        let space_id = SpaceId::new();
        let user = UserId::new();

        let (deployment, agents) = service
            .deploy_from_org_pattern(workspace_id, space_id, pattern, user, None, None, serde_json::json!({}))
            .await
            .expect("deploy succeeds");

        assert_eq!(agents.len(), 3);
        let lead = agents.iter().find(|a| a.role == "lead").expect("lead agent present");
        let workers: Vec<_> = agents.iter().filter(|a| a.role == "worker").collect();
        assert_eq!(workers.len(), 2);

        // Capability augmentation: lead already has a write capability, so it
        // is left untouched; the worker role has none, so it gets the
        // persistence fallback bundle.
        assert_eq!(lead.capabilities, ["task.create".to_string()].into_iter().collect::<Set<String>>());
        for worker in &workers {
            assert!(worker.capabilities.contains("task.create"));
            assert!(worker.capabilities.contains("page.create"));
            assert!(worker.capabilities.contains("experiment.update"));
        }

        // reportsToAgentId wiring: both workers report to the lead.
        for worker in &workers {
            assert_eq!(worker.reports_to_agent_id, Some(lead.id));
        }
        assert_eq!(lead.reports_to_agent_id, None);

        // workdir resolution: the worker role carries an explicit workdir,
        // the lead role does not and falls back to the configured default.
        for worker in &workers {
            assert_eq!(worker.workdir, "/custom/workdir");
        }
        assert_eq!(lead.workdir, "/default/workdir");

        let stored = store.find_deployment(workspace_id, deployment.id).await.expect("stored deployment");
        assert_eq!(stored.id, deployment.id);
        assert_eq!(store.list_agents(deployment.id).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn workdir_falls_back_to_scratch_dir_when_no_default_configured() {
        let base = tempfile::tempdir().unwrap();
        let (service, _store) = harness(base.path().to_path_buf(), None).await;
        let pattern = two_role_pattern(None);

        let (_deployment, agents) = service
            .deploy_from_org_pattern(WorkspaceId::new(), SpaceId::new(), pattern, UserId::new(), None, None, serde_json::json!({}))
            .await
            .expect("deploy succeeds");

        let lead = agents.iter().find(|a| a.role == "lead").unwrap();
        assert!(PathBuf::from(&lead.workdir).starts_with(base.path()));
        assert!(std::path::Path::new(&lead.workdir).is_dir());
    }

    #[test]
    fn pseudo_user_id_is_deterministic_per_role_and_instance() {
        let namespace = Uuid::new_v4();
        let a = pseudo_user_id(namespace, "worker", 1);
        let b = pseudo_user_id(namespace, "worker", 1);
        let c = pseudo_user_id(namespace, "worker", 2);
        let d = pseudo_user_id(namespace, "lead", 1);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, d);
    }

    #[tokio::test]
    async fn deploy_from_template_id_hides_templates_owned_by_another_workspace() {
        let base = tempfile::tempdir().unwrap();
        let (service, store) = harness(base.path().to_path_buf(), Some("/default".into())).await;
        let owner_workspace = WorkspaceId::new();
        let template = team_types::Template::new("pairing".into(), team_types::TemplateKind::Custom, Some(owner_workspace), two_role_pattern(None))
            .expect("valid template");
        store.upsert_template(template.clone()).await.unwrap();

        let err = service
            .deploy_from_template_id(WorkspaceId::new(), SpaceId::new(), template.id, UserId::new(), None, serde_json::json!({}))
            .await
            .expect_err("template belongs to a different workspace");
        assert!(matches!(err, ServiceError::NotFound(_)));
    }

    #[tokio::test]
    async fn rename_and_assign_target_task_only_touch_config() {
        let base = tempfile::tempdir().unwrap();
        let (service, _store) = harness(base.path().to_path_buf(), Some("/default".into())).await;
        let workspace_id = WorkspaceId::new();
        let (deployment, _agents) = service
            .deploy_from_org_pattern(workspace_id, SpaceId::new(), two_role_pattern(None), UserId::new(), None, None, serde_json::json!({}))
            .await
            .unwrap();

        let renamed = service.rename_deployment(workspace_id, deployment.id, "New Name".into()).await.unwrap();
        assert_eq!(renamed.config.get("teamName").and_then(|v| v.as_str()), Some("New Name"));

        let err = service
            .assign_target_task(workspace_id, deployment.id, None, None)
            .await
            .expect_err("neither taskId nor experimentId set");
        assert!(matches!(err, ServiceError::BadRequest(_)));

        let err = service
            .assign_target_task(workspace_id, deployment.id, Some("task-1".into()), Some("exp-1".into()))
            .await
            .expect_err("both taskId and experimentId set");
        assert!(matches!(err, ServiceError::BadRequest(_)));

        let assigned = service
            .assign_target_task(workspace_id, deployment.id, Some("task-1".into()), None)
            .await
            .expect("exactly one target set");
        assert_eq!(assigned.config.get("targetTaskId").and_then(|v| v.as_str()), Some("task-1"));
        assert_eq!(assigned.config.get("targetExperimentId"), Some(&serde_json::Value::Null));
    }

    #[tokio::test]
    async fn teardown_is_idempotent_and_clears_agents() {
        let base = tempfile::tempdir().unwrap();
        let (service, store) = harness(base.path().to_path_buf(), Some("/default".into())).await;
        let workspace_id = WorkspaceId::new();
        let (deployment, agents) = service
            .deploy_from_org_pattern(workspace_id, SpaceId::new(), two_role_pattern(None), UserId::new(), None, None, serde_json::json!({}))
            .await
            .unwrap();
        assert!(agents.iter().all(|a| a.runtime_session_id.is_none()));

        service.teardown_team(workspace_id, deployment.id).await.expect("first teardown");
        let after_first = store.find_deployment(workspace_id, deployment.id).await.unwrap();
        assert_eq!(after_first.status, DeploymentStatus::TornDown);
        assert!(after_first.torn_down_at.is_some());

        // Idempotent: a second call against an already-torn-down deployment
        // is a no-op success, not an error.
        service.teardown_team(workspace_id, deployment.id).await.expect("second teardown is a no-op");
    }

    #[tokio::test]
    async fn reset_team_reactivates_a_paused_deployment() {
        let base = tempfile::tempdir().unwrap();
        let (service, store) = harness(base.path().to_path_buf(), Some("/default".into())).await;
        let workspace_id = WorkspaceId::new();
        let (deployment, _agents) = service
            .deploy_from_org_pattern(workspace_id, SpaceId::new(), two_role_pattern(None), UserId::new(), None, None, serde_json::json!({}))
            .await
            .unwrap();
        service.pause_deployment(workspace_id, deployment.id).await.unwrap();

        service.reset_team(workspace_id, deployment.id).await.expect("reset succeeds with no live sessions");

        let reset = store.find_deployment(workspace_id, deployment.id).await.unwrap();
        assert_eq!(reset.status, DeploymentStatus::Active);
        for agent in store.list_agents(deployment.id).await.unwrap() {
            assert_eq!(agent.status, AgentStatus::Idle);
            assert!(agent.runtime_session_id.is_none());
            assert!(agent.current_step_id.is_none());
        }
    }
}
