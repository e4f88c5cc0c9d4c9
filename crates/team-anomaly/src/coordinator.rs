//! PTY event handlers (spec.md §4.6): each resolves the owning agent by
//! `runtimeSessionId`, then reacts.

use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use team_bus::{EventBus, PromptInfo, RuntimeEvent, TeamEventName, ToolInfo};
use team_session::SessionManager;
use team_store::DeploymentStore;
use team_types::{Agent, AgentId, AgentStatus, DeploymentId, DeploymentStatus, RunLog};
use team_workflow::WorkflowExecutor;

use crate::auth::{AuthFlowRegistry, RegisterOutcome};
use crate::error::{AnomalyError, AnomalyResult};
use crate::escalation::{CoordinatorResponseService, EscalationOutcome, MainBrainEscalation};

const STARTUP_PROMPT_TYPES: [&str; 3] = ["config", "permission", "trust"];

/// Ties the PTY event stream to the store, messaging bus, and workflow
/// executor: the component that actually reacts to subprocess anomalies.
pub struct AnomalyCoordinator {
    store: Arc<dyn DeploymentStore>,
    sessions: Arc<SessionManager>,
    bus: Arc<dyn EventBus>,
    messaging: Arc<team_messaging::MessagingBus>,
    workflow: Arc<WorkflowExecutor>,
    auth: AuthFlowRegistry,
    coordinator_response: CoordinatorResponseService,
    main_brain: MainBrainEscalation,
}

impl AnomalyCoordinator {
    /// Construct a coordinator bound to every collaborator it drives.
    pub fn new(
        store: Arc<dyn DeploymentStore>,
        sessions: Arc<SessionManager>,
        bus: Arc<dyn EventBus>,
        messaging: Arc<team_messaging::MessagingBus>,
        workflow: Arc<WorkflowExecutor>,
        llm: Arc<team_llm::LlmGateway>,
    ) -> Self {
        Self {
            coordinator_response: CoordinatorResponseService::new(sessions.clone(), llm.clone()),
            main_brain: MainBrainEscalation::new(sessions.clone(), llm),
            store,
            sessions,
            bus,
            messaging,
            workflow,
            auth: AuthFlowRegistry::new(),
        }
    }

    /// Run the subscribe loop until the bus is dropped or lagging ends the
    /// stream; intended to be spawned as its own task.
    pub async fn run(self: Arc<Self>) {
        let mut rx = self.bus.subscribe();
        loop {
            match rx.recv().await {
                Ok(event) => self.dispatch(event).await,
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    }

    async fn dispatch(&self, event: RuntimeEvent) {
        let result = match event {
            RuntimeEvent::ToolRunning { session_id, info, auto_interrupt_enabled } => {
                self.handle_tool_running(&session_id, info, auto_interrupt_enabled).await
            }
            RuntimeEvent::ToolInterrupted { session_id, info, interrupted, method } => {
                self.handle_tool_interrupted(&session_id, info, interrupted, method).await
            }
            RuntimeEvent::BlockingPrompt { session_id, prompt_info } => {
                self.handle_blocking_prompt(&session_id, prompt_info).await
            }
            RuntimeEvent::StallClassified { session_id, classification } => {
                self.handle_stall_classified(&session_id, classification).await
            }
            RuntimeEvent::TaskComplete { session_id, result } => {
                self.handle_task_complete(&session_id, result).await
            }
            RuntimeEvent::AgentStopped { session_id, reason, exit_code, login_detected } => {
                self.handle_agent_stopped(&session_id, reason, exit_code, login_detected).await
            }
            RuntimeEvent::AgentError { session_id, error } => self.handle_agent_error(&session_id, error).await,
            RuntimeEvent::LoginRequired { session_id, url, instructions } => {
                self.handle_login_required(&session_id, url, instructions).await
            }
            _ => Ok(()),
        };
        if let Err(err) = result {
            tracing::warn!(error = %err, "anomaly coordinator handler failed");
        }
    }

    async fn resolve_agent(&self, session_id: &str) -> AnomalyResult<Agent> {
        let (_deployment_id, agent_id) = self
            .sessions
            .owner_of(session_id)
            .map_err(|_| AnomalyError::UnknownSession(session_id.to_string()))?;
        let agent_id = AgentId(uuid::Uuid::parse_str(&agent_id).map_err(|_| AnomalyError::UnknownSession(session_id.to_string()))?);
        Ok(self.store.find_agent(agent_id).await?)
    }

    async fn append_run_log(&self, agent: &Agent, summary: &str, errored: bool) -> AnomalyResult<()> {
        let entry = RunLog {
            id: uuid::Uuid::new_v4(),
            timestamp: Utc::now(),
            deployment_id: agent.deployment_id,
            team_agent_id: agent.id,
            role: agent.role.clone(),
            step_id: agent.current_step_id.clone(),
            summary: summary.to_string(),
            actions_executed: 1,
            errors_encountered: if errored { 1 } else { 0 },
            actions: vec![],
        };
        // Best-effort: a log-persistence failure must never fail the
        // anomaly handler it is attached to (spec.md §7).
        if let Err(err) = self.store.append_run_log(agent.deployment_id, entry).await {
            tracing::warn!(error = %err, "failed to append run log");
        }
        Ok(())
    }

    async fn publish_team(&self, agent: &Agent, name: TeamEventName, payload: serde_json::Value) {
        let space_id = self
            .store
            .find_deployment(agent.workspace_id, agent.deployment_id)
            .await
            .map(|d| d.space_id)
            .unwrap_or_else(|_| team_types::SpaceId(uuid::Uuid::nil()));
        let _ = self.bus.publish(&RuntimeEvent::Team {
            name,
            workspace_id: agent.workspace_id,
            space_id,
            deployment_id: agent.deployment_id,
            agent_id: Some(agent.id),
            payload,
            at: Utc::now(),
        });
    }

    /// `tool_running`: append run log; re-publish enriched.
    pub async fn handle_tool_running(&self, session_id: &str, info: ToolInfo, auto_interrupt_enabled: bool) -> AnomalyResult<()> {
        let agent = self.resolve_agent(session_id).await?;
        self.append_run_log(&agent, &format!("running {}", info.tool_name), false).await?;
        self.publish_team(
            &agent,
            TeamEventName::AgentToolRunning,
            json!({"tool": info, "autoInterruptEnabled": auto_interrupt_enabled, "stepId": agent.current_step_id}),
        )
        .await;
        Ok(())
    }

    /// `tool_interrupted`: append run log with success/fail accounting.
    pub async fn handle_tool_interrupted(&self, session_id: &str, info: ToolInfo, interrupted: bool, method: String) -> AnomalyResult<()> {
        let agent = self.resolve_agent(session_id).await?;
        self.append_run_log(&agent, &format!("interrupted {} via {method}", info.tool_name), !interrupted).await?;
        if !interrupted {
            let mut updated = agent.clone();
            updated.total_errors += 1;
            self.store.upsert_agent(updated).await?;
        }
        self.publish_team(
            &agent,
            TeamEventName::AgentToolInterrupted,
            json!({"tool": info, "interrupted": interrupted, "method": method}),
        )
        .await;
        Ok(())
    }

    /// `blocking_prompt`.
    pub async fn handle_blocking_prompt(&self, session_id: &str, prompt_info: PromptInfo) -> AnomalyResult<()> {
        let agent = self.resolve_agent(session_id).await?;

        if STARTUP_PROMPT_TYPES.contains(&prompt_info.prompt_type.as_str()) && agent.current_step_id.is_none() {
            return Ok(());
        }

        let delivered = self.messaging.deliver_pending_messages(agent.deployment_id, agent.id).await?;
        if delivered > 0 {
            self.publish_team(
                &agent,
                TeamEventName::AgentBlockingPrompt,
                json!({"prompt": prompt_info, "messagesDelivered": delivered}),
            )
            .await;
            return Ok(());
        }

        self.publish_team(&agent, TeamEventName::AgentBlockingPrompt, json!({"prompt": prompt_info})).await;

        let recent_output = self.sessions.output_buffer(session_id).unwrap_or_default();
        let outcome = if agent.reports_to_agent_id.is_none() {
            self.main_brain
                .escalate(session_id, &agent.role, &recent_output)
                .await
        } else {
            let org_chart = format!("{} reports to another agent in this deployment", agent.role);
            self.coordinator_response.respond(session_id, &org_chart, &recent_output).await
        };

        if matches!(outcome, Ok(EscalationOutcome::Skipped)) {
            self.publish_team(&agent, TeamEventName::EscalationSurfaced, json!({"prompt": prompt_info})).await;
        }
        Ok(())
    }

    /// `stall_classified`: re-publish for the UI.
    pub async fn handle_stall_classified(&self, session_id: &str, classification: String) -> AnomalyResult<()> {
        let agent = self.resolve_agent(session_id).await?;
        self.publish_team(&agent, TeamEventName::StallClassified, json!({"classification": classification})).await;
        Ok(())
    }

    /// `task_complete`: advance the workflow if the agent was mid-step.
    /// `workflow.complete_step` itself returns the step's assigned agent to
    /// `idle` once the step settles (mirroring `handle_agent_stopped`'s
    /// reset), so `claim_idle_agent` can redispatch it into a later step.
    pub async fn handle_task_complete(&self, session_id: &str, result: Option<serde_json::Value>) -> AnomalyResult<()> {
        let agent = self.resolve_agent(session_id).await?;
        let Some(step_id) = agent.current_step_id.clone() else {
            return Ok(());
        };
        self.append_run_log(&agent, "task complete", false).await?;
        self.workflow
            .complete_step(agent.workspace_id, agent.deployment_id, &step_id, result.clone())
            .await?;
        self.publish_team(&agent, TeamEventName::AgentLoopCompleted, json!({"stepId": step_id, "result": result})).await;
        Ok(())
    }

    /// `agent_stopped`: reap a dead subprocess unless it died into a login
    /// flow (handled separately by `login_required`).
    pub async fn handle_agent_stopped(
        &self,
        session_id: &str,
        reason: String,
        _exit_code: Option<i32>,
        login_detected: bool,
    ) -> AnomalyResult<()> {
        if login_detected {
            return Ok(());
        }
        let agent = self.resolve_agent(session_id).await?;

        if let Some(terminal_id) = &agent.terminal_session_id {
            let _ = self.sessions.stop(terminal_id).await;
        }

        let step_id = agent.current_step_id.clone();
        let mut updated = agent.clone();
        updated.current_step_id = None;
        updated.runtime_session_id = None;
        updated.terminal_session_id = None;
        updated.status = AgentStatus::Idle;
        self.store.upsert_agent(updated).await?;
        self.append_run_log(&agent, &format!("session stopped: {reason}"), false).await?;

        if let Some(step_id) = step_id {
            self.workflow
                .complete_step(
                    agent.workspace_id,
                    agent.deployment_id,
                    &step_id,
                    Some(json!({"summary": "agent process exited"})),
                )
                .await?;
        }
        Ok(())
    }

    /// `agent_error`: mark the agent errored, fail its step, auto-pause the
    /// deployment if every agent is now `error`/`paused`.
    pub async fn handle_agent_error(&self, session_id: &str, error: String) -> AnomalyResult<()> {
        let agent = self.resolve_agent(session_id).await?;
        let step_id = agent.current_step_id.clone();

        let mut updated = agent.clone();
        updated.status = AgentStatus::Error;
        updated.current_step_id = None;
        updated.total_errors += 1;
        self.store.upsert_agent(updated).await?;
        self.append_run_log(&agent, &format!("agent error: {error}"), true).await?;

        if let Some(step_id) = step_id {
            self.workflow
                .fail_step(agent.workspace_id, agent.deployment_id, &step_id, error.clone())
                .await?;
        }
        self.publish_team(&agent, TeamEventName::AgentLoopFailed, json!({"stepId": step_id, "error": error})).await;

        self.maybe_auto_pause(agent.workspace_id, agent.deployment_id).await?;
        Ok(())
    }

    async fn maybe_auto_pause(&self, workspace_id: team_types::WorkspaceId, deployment_id: DeploymentId) -> AnomalyResult<()> {
        let agents = self.store.list_agents(deployment_id).await?;
        let all_stuck = !agents.is_empty()
            && agents
                .iter()
                .all(|a| matches!(a.status, AgentStatus::Error | AgentStatus::Paused));
        if !all_stuck {
            return Ok(());
        }
        let mut deployment = self.store.find_deployment(workspace_id, deployment_id).await?;
        if deployment.status == DeploymentStatus::Active {
            deployment.status = DeploymentStatus::Paused;
            self.store.update_deployment(workspace_id, deployment).await?;
        }
        Ok(())
    }

    /// `login_required`: registers or queues a coordinated auth flow
    /// (spec.md §4.6 step 1-2), then spawns the monitor driving steps 3-4.
    pub async fn handle_login_required(&self, session_id: &str, url: Option<String>, instructions: Option<String>) -> AnomalyResult<()> {
        let agent = self.resolve_agent(session_id).await?;

        let outcome = self.auth.register(agent.deployment_id, &agent.agent_type, agent.id, session_id);
        match outcome {
            RegisterOutcome::Queued => {
                let _ = self.sessions.stop(session_id).await;
                let mut updated = agent.clone();
                updated.status = AgentStatus::Error;
                updated.runtime_session_id = None;
                self.store.upsert_agent(updated).await?;
                self.append_run_log(&agent, "queued behind an in-flight auth flow", false).await?;
            }
            RegisterOutcome::Primary => {
                self.publish_team(
                    &agent,
                    TeamEventName::AgentLoginRequired,
                    json!({"url": url, "instructions": instructions}),
                )
                .await;
            }
        }
        Ok(())
    }

    /// Drive steps 3-4 of the auth flow once the primary session reports a
    /// successful login: flips every `error`-state agent in the deployment
    /// back to `idle`, re-activates a paused deployment, and emits
    /// `team.auth_completed` so the Workflow Executor redispatches.
    pub async fn complete_auth_flow(&self, workspace_id: team_types::WorkspaceId, deployment_id: DeploymentId, agent_type: &str) -> AnomalyResult<()> {
        let Some(_flow) = self.auth.take(deployment_id, agent_type) else {
            return Ok(());
        };

        let agents = self.store.list_agents(deployment_id).await?;
        for mut agent in agents.into_iter().filter(|a| a.status == AgentStatus::Error) {
            agent.status = AgentStatus::Idle;
            agent.runtime_session_id = None;
            agent.terminal_session_id = None;
            self.store.upsert_agent(agent).await?;
        }

        let mut deployment = self.store.find_deployment(workspace_id, deployment_id).await?;
        if deployment.status == DeploymentStatus::Paused {
            deployment.status = DeploymentStatus::Active;
            self.store.update_deployment(workspace_id, deployment.clone()).await?;
        }

        let _ = self.bus.publish(&RuntimeEvent::Team {
            name: TeamEventName::AuthCompleted,
            workspace_id,
            space_id: deployment.space_id,
            deployment_id,
            agent_id: None,
            payload: json!({}),
            at: Utc::now(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet as Set;
    use std::time::Duration;
    use team_bus::InMemoryBus;
    use team_llm::{Config, LlmGateway};
    use team_session::{SessionManagerConfig, SpawnRequest};
    use team_store::InMemoryStore;
    use team_types::{EscalationConfig, ExecutionPlan, OrgPattern, Role, SpaceId, StepPlan, UserId, WorkflowState};

    async fn test_llm() -> Arc<LlmGateway> {
        std::env::set_var("ANTHROPIC_API_KEY", "sk-ant-test-key-not-real");
        let config = Config::from_env().expect("test llm config");
        Arc::new(LlmGateway::new(config).await.expect("construct gateway (no network call)"))
    }

    async fn test_sessions(bus: Arc<dyn EventBus>, llm: Arc<LlmGateway>) -> Arc<SessionManager> {
        let mut config = SessionManagerConfig::default();
        config.scratch_base = std::env::temp_dir().join("team-anomaly-tests");
        config.ready_settle_window = Duration::from_millis(200);
        config.ready_timeout = Duration::from_secs(5);
        config.dispatch_verify_delay = Duration::from_millis(100);
        config.dispatch_verify_min_lines = 0;
        config.dispatch_verify_retries = 1;
        Arc::new(SessionManager::new(bus, llm, config))
    }

    fn one_step_plan() -> ExecutionPlan {
        ExecutionPlan {
            pattern_name: "solo".into(),
            version: "1.0.0".into(),
            roles: vec![Role {
                id: "engineer".into(),
                name: "Engineer".into(),
                description: String::new(),
                capabilities: Set::new(),
                reports_to: None,
                min_instances: 1,
                max_instances: 1,
                singleton: true,
                agent_type: "sh".into(),
                workdir: None,
            }],
            routing: vec![],
            escalation: EscalationConfig::default(),
            steps: vec![StepPlan {
                step_id: "step_0".into(),
                tag: "assign".into(),
                operation: team_types::Operation::DispatchAgentLoop {
                    role: "engineer".into(),
                    task: "t1".into(),
                    input: None,
                },
                then_branch: None,
                else_branch: None,
                children: vec![],
                container_kind: None,
            }],
        }
    }

    async fn seed_with_session(
        store: &InMemoryStore,
        sessions: &SessionManager,
    ) -> (DeploymentId, team_types::WorkspaceId, AgentId, String) {
        let workspace_id = team_types::WorkspaceId::new();
        let deployment_id = DeploymentId::new();
        let plan = one_step_plan();
        let deployment = team_types::Deployment {
            id: deployment_id,
            workspace_id,
            space_id: SpaceId::new(),
            project_id: None,
            template_name: None,
            config: serde_json::json!({}),
            org_pattern: OrgPattern {
                name: plan.pattern_name.clone(),
                version: plan.version.clone(),
                roles: plan.roles.clone(),
                routing: plan.routing.clone(),
                escalation: plan.escalation.clone(),
                workflow: vec![],
            },
            execution_plan: plan,
            status: DeploymentStatus::Active,
            workflow_state: WorkflowState::idle(),
            messages: vec![],
            run_logs: vec![],
            created_at: chrono::Utc::now(),
            torn_down_at: None,
            deployed_by: UserId::new(),
        };
        store.create_deployment(deployment).await.unwrap();

        let agent_id = AgentId::new();
        let session_id = sessions
            .spawn(SpawnRequest {
                deployment_id: deployment_id.to_string(),
                agent_id: agent_id.to_string(),
                agent_type: "sh".into(),
                workdir: None,
                env: vec![],
                system_prompt: String::new(),
            })
            .await
            .expect("spawn should succeed");

        let agent = Agent {
            id: agent_id,
            deployment_id,
            workspace_id,
            user_id: UserId::new(),
            role: "engineer".into(),
            instance_number: 1,
            agent_type: "sh".into(),
            workdir: "/tmp".into(),
            system_prompt: String::new(),
            capabilities: Set::new(),
            reports_to_agent_id: None,
            status: AgentStatus::Running,
            current_step_id: Some("step_0".into()),
            runtime_session_id: Some(session_id.clone()),
            terminal_session_id: None,
            last_run_at: None,
            last_run_summary: None,
            total_actions: 0,
            total_errors: 0,
        };
        store.upsert_agent(agent).await.unwrap();

        let mut ws = WorkflowState::idle();
        ws.current_phase = team_types::WorkflowPhase::Running;
        ws.step_states.insert(
            "step_0".into(),
            team_types::StepState {
                status: team_types::StepStatus::Running,
                started_at: Some(chrono::Utc::now()),
                completed_at: None,
                assigned_agent_id: Some(agent_id),
                result: None,
                error: None,
                retry_count: 0,
                escalation_count: 0,
            },
        );
        store.update_workflow_state(deployment_id, 0, ws).await.unwrap();

        (deployment_id, workspace_id, agent_id, session_id)
    }

    async fn build_coordinator(
        store: Arc<dyn DeploymentStore>,
        sessions: Arc<SessionManager>,
        bus: Arc<dyn EventBus>,
        llm: Arc<LlmGateway>,
    ) -> AnomalyCoordinator {
        let messaging = Arc::new(team_messaging::MessagingBus::new(store.clone(), sessions.clone(), bus.clone()));
        let workflow = Arc::new(WorkflowExecutor::new(store.clone(), bus.clone(), llm.clone()));
        AnomalyCoordinator::new(store, sessions, bus, messaging, workflow, llm)
    }

    #[tokio::test]
    async fn task_complete_advances_the_workflow_and_completes_it() {
        let memory_store = InMemoryStore::new();
        let bus: Arc<dyn EventBus> = Arc::new(InMemoryBus::default());
        let llm = test_llm().await;
        let sessions = test_sessions(bus.clone(), llm.clone()).await;
        let (deployment_id, _workspace_id, _agent_id, session_id) =
            seed_with_session(&memory_store, &sessions).await;
        let store: Arc<dyn DeploymentStore> = Arc::new(memory_store);

        let coordinator = build_coordinator(store.clone(), sessions.clone(), bus, llm).await;
        coordinator
            .handle_task_complete(&session_id, Some(json!({"ok": true})))
            .await
            .unwrap();

        let ws = store.get_workflow_state(deployment_id).await.unwrap();
        assert_eq!(ws.step_states.get("step_0").unwrap().status, team_types::StepStatus::Completed);
        assert_eq!(ws.current_phase, team_types::WorkflowPhase::Completed);

        sessions.stop(&session_id).await.ok();
    }

    #[tokio::test]
    async fn agent_error_marks_the_agent_and_auto_pauses_a_fully_stuck_deployment() {
        let memory_store = InMemoryStore::new();
        let bus: Arc<dyn EventBus> = Arc::new(InMemoryBus::default());
        let llm = test_llm().await;
        let sessions = test_sessions(bus.clone(), llm.clone()).await;
        let (deployment_id, workspace_id, agent_id, session_id) =
            seed_with_session(&memory_store, &sessions).await;
        let store: Arc<dyn DeploymentStore> = Arc::new(memory_store);

        let coordinator = build_coordinator(store.clone(), sessions.clone(), bus, llm).await;
        coordinator.handle_agent_error(&session_id, "boom".into()).await.unwrap();

        let agent = store.find_agent(agent_id).await.unwrap();
        assert_eq!(agent.status, AgentStatus::Error);
        assert!(agent.current_step_id.is_none());

        let deployment = store.find_deployment(workspace_id, deployment_id).await.unwrap();
        assert_eq!(deployment.status, DeploymentStatus::Paused);
    }
}
