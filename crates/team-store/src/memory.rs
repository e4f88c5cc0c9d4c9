use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use team_types::{
    Agent, AgentId, AgentStatus, Deployment, DeploymentId, RunLog, SpaceId, TeamMessage, Template,
    TemplateId, TemplateKind, WorkflowState, WorkspaceId, MAX_MESSAGES, MAX_RUN_LOGS,
};

use crate::{DeploymentFilter, DeploymentStore, StoreError, StoreResult};

/// An in-process, non-persistent [`DeploymentStore`]. Every map is an
/// `Arc<DashMap<..>>` so the store cheaply clones and shares across tasks,
/// mirroring the registries `toka-orchestration` keeps for spawned agents.
#[derive(Debug, Default, Clone)]
pub struct InMemoryStore {
    deployments: Arc<DashMap<DeploymentId, Deployment>>,
    agents: Arc<DashMap<AgentId, Agent>>,
    templates: Arc<DashMap<TemplateId, Template>>,
}

impl InMemoryStore {
    /// Construct an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn deployment_scoped(
        &self,
        workspace_id: WorkspaceId,
        id: DeploymentId,
    ) -> StoreResult<Deployment> {
        self.deployments
            .get(&id)
            .filter(|d| d.workspace_id == workspace_id)
            .map(|d| d.clone())
            .ok_or(StoreError::DeploymentNotFound(id))
    }
}

#[async_trait]
impl DeploymentStore for InMemoryStore {
    async fn create_deployment(&self, deployment: Deployment) -> StoreResult<()> {
        self.deployments.insert(deployment.id, deployment);
        Ok(())
    }

    async fn find_deployment(
        &self,
        workspace_id: WorkspaceId,
        id: DeploymentId,
    ) -> StoreResult<Deployment> {
        self.deployment_scoped(workspace_id, id)
    }

    async fn list_deployments(
        &self,
        workspace_id: WorkspaceId,
        filter: DeploymentFilter,
    ) -> StoreResult<Vec<Deployment>> {
        let matches = |d: &Deployment| {
            d.workspace_id == workspace_id
                && filter.space_id.map_or(true, |s| d.space_id == s)
                && filter
                    .template_name
                    .as_ref()
                    .map_or(true, |t| d.template_name.as_deref() == Some(t.as_str()))
        };
        Ok(self
            .deployments
            .iter()
            .filter(|e| matches(e.value()))
            .map(|e| e.value().clone())
            .collect())
    }

    async fn update_deployment(
        &self,
        workspace_id: WorkspaceId,
        deployment: Deployment,
    ) -> StoreResult<()> {
        let id = deployment.id;
        let mut entry = self
            .deployments
            .get_mut(&id)
            .filter(|d| d.workspace_id == workspace_id)
            .ok_or(StoreError::DeploymentNotFound(id))?;
        *entry = deployment;
        Ok(())
    }

    async fn upsert_agent(&self, agent: Agent) -> StoreResult<()> {
        self.agents.insert(agent.id, agent);
        Ok(())
    }

    async fn find_agent(&self, id: AgentId) -> StoreResult<Agent> {
        self.agents
            .get(&id)
            .map(|a| a.clone())
            .ok_or(StoreError::AgentNotFound(id))
    }

    async fn list_agents(&self, deployment_id: DeploymentId) -> StoreResult<Vec<Agent>> {
        Ok(self
            .agents
            .iter()
            .filter(|e| e.value().deployment_id == deployment_id)
            .map(|e| e.value().clone())
            .collect())
    }

    async fn list_running_agents(&self) -> StoreResult<Vec<Agent>> {
        Ok(self
            .agents
            .iter()
            .filter(|e| e.value().status == AgentStatus::Running && e.value().current_step_id.is_some())
            .map(|e| e.value().clone())
            .collect())
    }

    async fn claim_idle_agent(
        &self,
        deployment_id: DeploymentId,
        role: &str,
    ) -> StoreResult<Option<Agent>> {
        for mut entry in self.agents.iter_mut() {
            let agent = entry.value_mut();
            if agent.deployment_id == deployment_id
                && agent.role == role
                && agent.status == AgentStatus::Idle
            {
                agent.status = AgentStatus::Running;
                return Ok(Some(agent.clone()));
            }
        }
        Ok(None)
    }

    async fn get_workflow_state(&self, deployment_id: DeploymentId) -> StoreResult<WorkflowState> {
        self.deployments
            .get(&deployment_id)
            .map(|d| d.workflow_state.clone())
            .ok_or(StoreError::DeploymentNotFound(deployment_id))
    }

    async fn update_workflow_state(
        &self,
        deployment_id: DeploymentId,
        expected_version: u64,
        mut new_state: WorkflowState,
    ) -> StoreResult<()> {
        let mut deployment = self
            .deployments
            .get_mut(&deployment_id)
            .ok_or(StoreError::DeploymentNotFound(deployment_id))?;
        let current = deployment.workflow_state.version;
        if current != expected_version {
            tracing::debug!(
                %deployment_id,
                expected_version,
                current,
                "optimistic lock conflict on workflow state update"
            );
            return Err(StoreError::OptimisticLockFailed(
                deployment_id,
                expected_version,
                current,
            ));
        }
        new_state.version = current + 1;
        deployment.workflow_state = new_state;
        Ok(())
    }

    async fn append_run_log(&self, deployment_id: DeploymentId, entry: RunLog) -> StoreResult<()> {
        let mut deployment = self
            .deployments
            .get_mut(&deployment_id)
            .ok_or(StoreError::DeploymentNotFound(deployment_id))?;
        deployment.run_logs.push(entry);
        let len = deployment.run_logs.len();
        if len > MAX_RUN_LOGS {
            deployment.run_logs.drain(0..len - MAX_RUN_LOGS);
        }
        Ok(())
    }

    async fn append_message(
        &self,
        deployment_id: DeploymentId,
        message: TeamMessage,
    ) -> StoreResult<()> {
        let mut deployment = self
            .deployments
            .get_mut(&deployment_id)
            .ok_or(StoreError::DeploymentNotFound(deployment_id))?;
        deployment.messages.push(message);
        let len = deployment.messages.len();
        if len > MAX_MESSAGES {
            deployment.messages.drain(0..len - MAX_MESSAGES);
        }
        Ok(())
    }

    async fn get_messages(&self, deployment_id: DeploymentId) -> StoreResult<Vec<TeamMessage>> {
        self.deployments
            .get(&deployment_id)
            .map(|d| d.messages.clone())
            .ok_or(StoreError::DeploymentNotFound(deployment_id))
    }

    async fn set_messages(
        &self,
        deployment_id: DeploymentId,
        messages: Vec<TeamMessage>,
    ) -> StoreResult<()> {
        let mut deployment = self
            .deployments
            .get_mut(&deployment_id)
            .ok_or(StoreError::DeploymentNotFound(deployment_id))?;
        deployment.messages = messages;
        Ok(())
    }

    async fn merge_config(
        &self,
        deployment_id: DeploymentId,
        patch: serde_json::Value,
    ) -> StoreResult<serde_json::Value> {
        let mut deployment = self
            .deployments
            .get_mut(&deployment_id)
            .ok_or(StoreError::DeploymentNotFound(deployment_id))?;
        merge_json(&mut deployment.config, patch)?;
        Ok(deployment.config.clone())
    }

    async fn upsert_template(&self, template: Template) -> StoreResult<()> {
        self.templates.insert(template.id, template);
        Ok(())
    }

    async fn find_template(&self, id: TemplateId) -> StoreResult<Template> {
        self.templates
            .get(&id)
            .map(|t| t.clone())
            .ok_or(StoreError::TemplateNotFound(id))
    }

    async fn list_templates(&self, workspace_id: WorkspaceId) -> StoreResult<Vec<Template>> {
        Ok(self
            .templates
            .iter()
            .filter(|e| {
                e.value().kind == TemplateKind::System || e.value().workspace_id == Some(workspace_id)
            })
            .map(|e| e.value().clone())
            .collect())
    }

    async fn delete_template(&self, id: TemplateId) -> StoreResult<()> {
        let template = self
            .templates
            .get(&id)
            .map(|t| t.clone())
            .ok_or(StoreError::TemplateNotFound(id))?;
        if !template.is_mutable() {
            return Err(StoreError::ImmutableTemplate(id));
        }
        self.templates.remove(&id);
        Ok(())
    }
}

/// Recursive JSON-object merge: `patch` keys overwrite `target` keys;
/// nested objects merge recursively, everything else (including arrays)
/// is replaced wholesale.
fn merge_json(target: &mut serde_json::Value, patch: serde_json::Value) -> StoreResult<()> {
    match (target, patch) {
        (serde_json::Value::Object(target_map), serde_json::Value::Object(patch_map)) => {
            for (key, value) in patch_map {
                match target_map.get_mut(&key) {
                    Some(existing) if existing.is_object() && value.is_object() => {
                        merge_json(existing, value)?;
                    }
                    _ => {
                        target_map.insert(key, value);
                    }
                }
            }
            Ok(())
        }
        (target, serde_json::Value::Object(patch_map)) => {
            *target = serde_json::Value::Object(patch_map);
            Ok(())
        }
        _ => Err(StoreError::InvalidConfig(
            "config patch must be a JSON object".into(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use team_types::{
        DeploymentId, DeploymentStatus, EscalationConfig, ExecutionPlan, OrgPattern, SpaceId,
        UserId, WorkspaceId,
    };

    fn sample_deployment() -> Deployment {
        let workspace_id = WorkspaceId::new();
        Deployment {
            id: DeploymentId::new(),
            workspace_id,
            space_id: SpaceId::new(),
            project_id: None,
            template_name: None,
            config: serde_json::json!({"teamName": "alpha"}),
            org_pattern: OrgPattern {
                name: "test-pattern".into(),
                version: "1.0.0".into(),
                roles: vec![],
                routing: vec![],
                escalation: EscalationConfig::default(),
                workflow: vec![],
            },
            execution_plan: ExecutionPlan {
                pattern_name: "test-pattern".into(),
                version: "1.0.0".into(),
                roles: vec![],
                routing: vec![],
                escalation: EscalationConfig::default(),
                steps: vec![],
            },
            status: DeploymentStatus::Active,
            workflow_state: WorkflowState::idle(),
            messages: vec![],
            run_logs: vec![],
            created_at: chrono::Utc::now(),
            torn_down_at: None,
            deployed_by: UserId::new(),
        }
    }

    #[tokio::test]
    async fn workspace_scoping_hides_foreign_deployments() {
        let store = InMemoryStore::new();
        let deployment = sample_deployment();
        let id = deployment.id;
        let workspace_id = deployment.workspace_id;
        store.create_deployment(deployment).await.unwrap();

        assert!(store.find_deployment(workspace_id, id).await.is_ok());
        assert!(matches!(
            store.find_deployment(WorkspaceId::new(), id).await,
            Err(StoreError::DeploymentNotFound(_))
        ));
    }

    #[tokio::test]
    async fn optimistic_lock_rejects_stale_version() {
        let store = InMemoryStore::new();
        let deployment = sample_deployment();
        let id = deployment.id;
        store.create_deployment(deployment).await.unwrap();

        let mut state = WorkflowState::idle();
        state.coordinator_invocations = 1;
        store.update_workflow_state(id, 0, state.clone()).await.unwrap();

        let err = store.update_workflow_state(id, 0, state).await.unwrap_err();
        assert!(matches!(err, StoreError::OptimisticLockFailed(_, 0, 1)));
    }

    #[tokio::test]
    async fn run_log_append_is_bounded() {
        let store = InMemoryStore::new();
        let deployment = sample_deployment();
        let id = deployment.id;
        let workspace_id = deployment.workspace_id;
        let team_agent_id = team_types::AgentId::new();
        store.create_deployment(deployment).await.unwrap();

        for i in 0..(MAX_RUN_LOGS + 10) {
            store
                .append_run_log(
                    id,
                    RunLog {
                        id: uuid::Uuid::new_v4(),
                        timestamp: chrono::Utc::now(),
                        deployment_id: id,
                        team_agent_id,
                        role: "engineer".into(),
                        step_id: None,
                        summary: format!("entry {i}"),
                        actions_executed: 0,
                        errors_encountered: 0,
                        actions: vec![],
                    },
                )
                .await
                .unwrap();
        }

        let deployment = store.find_deployment(workspace_id, id).await.unwrap();
        assert_eq!(deployment.run_logs.len(), MAX_RUN_LOGS);
        assert_eq!(deployment.run_logs[0].summary, "entry 10");
    }

    #[tokio::test]
    async fn config_merge_is_recursive() {
        let store = InMemoryStore::new();
        let deployment = sample_deployment();
        let id = deployment.id;
        store.create_deployment(deployment).await.unwrap();

        store
            .merge_config(id, serde_json::json!({"targetTask": "fix bug"}))
            .await
            .unwrap();
        let merged = store
            .merge_config(id, serde_json::json!({"teamName": "beta"}))
            .await
            .unwrap();

        assert_eq!(merged["teamName"], "beta");
        assert_eq!(merged["targetTask"], "fix bug");
    }
}
