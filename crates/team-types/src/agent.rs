//! One materialized instance of a role within a deployment (spec.md §3 `Agent`).

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::ids::{AgentId, DeploymentId, UserId, WorkspaceId};

/// Runtime status of an agent instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    /// Not currently executing a step; eligible for dispatch.
    Idle,
    /// Executing a step (`currentStepId` is set).
    Running,
    /// Paused, e.g. as part of a paused deployment.
    Paused,
    /// Fatal subprocess error (`agent_error`); cleared by auth-flow recovery
    /// or `resetTeam`.
    Error,
}

/// `{id, deploymentId, workspaceId, userId, role, instanceNumber, agentType,
/// workdir, systemPrompt, capabilities, reportsToAgentId?, status,
/// currentStepId?, runtimeSessionId?, terminalSessionId?, lastRunAt?,
/// lastRunSummary?, totalActions, totalErrors}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Agent {
    /// Unique id.
    pub id: AgentId,
    /// Owning deployment.
    pub deployment_id: DeploymentId,
    /// Owning workspace.
    pub workspace_id: WorkspaceId,
    /// Pseudo-user identity this agent authenticates as.
    pub user_id: UserId,
    /// Source role id within the org pattern.
    pub role: String,
    /// 1-based instance number; `(deploymentId, role, instanceNumber)` is unique.
    pub instance_number: u32,
    /// CLI agent type (`claude-code`, `codex`, …).
    pub agent_type: String,
    /// Working directory (scratch directory by default).
    pub workdir: String,
    /// System prompt injected at spawn.
    pub system_prompt: String,
    /// Granted capabilities, including any persistence-ensured augmentation (§4.8).
    pub capabilities: HashSet<String>,
    /// The agent this one reports to, if any.
    pub reports_to_agent_id: Option<AgentId>,
    /// Current status.
    pub status: AgentStatus,
    /// Step currently being executed, if any.
    pub current_step_id: Option<String>,
    /// Opaque handle to the live PTY session, non-null iff a subprocess is live.
    pub runtime_session_id: Option<String>,
    /// Opaque handle to the UI-facing terminal session, if attached.
    pub terminal_session_id: Option<String>,
    /// Timestamp of the last run.
    pub last_run_at: Option<chrono::DateTime<chrono::Utc>>,
    /// Summary of the last run.
    pub last_run_summary: Option<String>,
    /// Cumulative action count across all runs.
    pub total_actions: u64,
    /// Cumulative error count across all runs.
    pub total_errors: u64,
}

impl Agent {
    /// Whether this agent has a live subprocess attached.
    pub fn has_live_session(&self) -> bool {
        self.runtime_session_id.is_some()
    }

    /// Reset this agent to a fresh `Idle` state (used by `resetTeam`/teardown, §4.8).
    pub fn reset_for_idle(&mut self) {
        self.status = AgentStatus::Idle;
        self.current_step_id = None;
        self.runtime_session_id = None;
        self.terminal_session_id = None;
    }
}
