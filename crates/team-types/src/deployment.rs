//! A deployment binds an org pattern to a space (spec.md §3 `Deployment`).

use serde::{Deserialize, Serialize};

use crate::{
    ids::{DeploymentId, SpaceId, UserId, WorkspaceId},
    pattern::OrgPattern,
    plan::ExecutionPlan,
    workflow::WorkflowState,
    TeamMessage,
    RunLog,
};

/// Lifecycle status of a deployment. Once `TornDown` the status is terminal
/// (spec.md §3 invariant).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentStatus {
    /// Live and schedulable.
    Active,
    /// Paused, either explicitly or via auto-pause (§4.6 `agent_error`).
    Paused,
    /// Terminal: subprocesses released, scratch removed.
    TornDown,
}

/// `{id, workspaceId, spaceId, projectId?, templateName, config, orgPattern,
/// executionPlan, status, workflowState, messages, runLogs, createdAt,
/// tornDownAt?, deployedBy}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Deployment {
    /// Unique id.
    pub id: DeploymentId,
    /// Owning workspace; scopes all authorization checks.
    pub workspace_id: WorkspaceId,
    /// Owning space within the workspace.
    pub space_id: SpaceId,
    /// Optional project scoping, if the space further divides into projects.
    pub project_id: Option<String>,
    /// Name of the template this deployment was created from, if any.
    pub template_name: Option<String>,
    /// Free-form JSON config: team name, target task/experiment, overrides.
    pub config: serde_json::Value,
    /// The org pattern bound to this deployment.
    pub org_pattern: OrgPattern,
    /// The compiled plan derived from `org_pattern`.
    pub execution_plan: ExecutionPlan,
    /// Current status.
    pub status: DeploymentStatus,
    /// Workflow state machine.
    pub workflow_state: WorkflowState,
    /// Inter-agent messages, bounded to the last 500.
    pub messages: Vec<TeamMessage>,
    /// Run logs, bounded to the last 200.
    pub run_logs: Vec<RunLog>,
    /// Creation timestamp.
    pub created_at: chrono::DateTime<chrono::Utc>,
    /// Teardown timestamp, set once `status` becomes `TornDown`.
    pub torn_down_at: Option<chrono::DateTime<chrono::Utc>>,
    /// User that triggered the deployment.
    pub deployed_by: UserId,
}

impl Deployment {
    /// True once the deployment has reached its terminal state.
    pub fn is_torn_down(&self) -> bool {
        self.status == DeploymentStatus::TornDown
    }
}
