//! Append-only, bounded audit trail (spec.md §3 `RunLog`).

use serde::{Deserialize, Serialize};

use crate::ids::{AgentId, DeploymentId};

/// A single recorded action within a run (`{method, status, error?}`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionRecord {
    /// Method/tool name invoked.
    pub method: String,
    /// Outcome status (`"ok"`, `"error"`, …) — free text, mirrors what the
    /// agent's own tool-call reporting emits.
    pub status: String,
    /// Error detail, if `status` indicates failure.
    pub error: Option<String>,
}

/// `{id, timestamp, deploymentId, teamAgentId, role, stepId?, summary,
/// actionsExecuted, errorsEncountered, actions}`. Append-only; the store
/// caps retention at [`crate::MAX_RUN_LOGS`] entries per deployment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunLog {
    /// Unique id.
    pub id: uuid::Uuid,
    /// When this run log entry was recorded.
    pub timestamp: chrono::DateTime<chrono::Utc>,
    /// Owning deployment.
    pub deployment_id: DeploymentId,
    /// Agent this entry is about.
    pub team_agent_id: AgentId,
    /// Role of that agent at the time.
    pub role: String,
    /// Step being executed, if any.
    pub step_id: Option<String>,
    /// Human-readable summary.
    pub summary: String,
    /// Count of actions executed during this run.
    pub actions_executed: u32,
    /// Count of errors encountered during this run.
    pub errors_encountered: u32,
    /// Individual action records.
    pub actions: Vec<ActionRecord>,
}
