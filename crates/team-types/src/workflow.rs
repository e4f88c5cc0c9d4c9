//! Workflow state machine data (spec.md §3 `WorkflowState`/`StepState`,
//! §4.4's `advance`/`dispatchIfReady` algorithm operates on these types).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::ids::AgentId;

/// Overall workflow phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowPhase {
    /// Created but not yet triggered.
    Idle,
    /// Actively advancing.
    Running,
    /// Paused (mirrors deployment pause).
    Paused,
    /// All top-level steps completed.
    Completed,
    /// A step exhausted its retry/escalation budget.
    Failed,
    /// The owning deployment was torn down.
    TornDown,
}

/// Per-step status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    /// Not yet dispatched.
    Pending,
    /// Dispatched, agent assigned.
    Running,
    /// Blocked on an external event (`await_event`).
    Waiting,
    /// Finished successfully.
    Completed,
    /// Finished unsuccessfully (after exhausting retries/escalation).
    Failed,
    /// Never dispatched (e.g. an empty-children container).
    Skipped,
}

/// `{status, startedAt?, completedAt?, assignedAgentId?, result?, error?,
/// retryCount, escalationCount}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepState {
    /// Current status.
    pub status: StepStatus,
    /// When the step started running.
    pub started_at: Option<chrono::DateTime<chrono::Utc>>,
    /// When the step completed (successfully or not).
    pub completed_at: Option<chrono::DateTime<chrono::Utc>>,
    /// Agent currently (or most recently) assigned to this step.
    pub assigned_agent_id: Option<AgentId>,
    /// Result payload, set on completion.
    pub result: Option<serde_json::Value>,
    /// Error message, set on failure.
    pub error: Option<String>,
    /// Number of times `failStep` has reset this step to `pending`.
    pub retry_count: u32,
    /// Number of times this step has been escalated.
    pub escalation_count: u32,
}

impl StepState {
    /// A fresh, not-yet-dispatched step state.
    pub fn pending() -> Self {
        Self {
            status: StepStatus::Pending,
            started_at: None,
            completed_at: None,
            assigned_agent_id: None,
            result: None,
            error: None,
            retry_count: 0,
            escalation_count: 0,
        }
    }
}

/// `{currentPhase, stepStates, runLogs, startedAt?, completedAt?,
/// lastAdvancedAt?, coordinatorInvocations}`.
///
/// `runLogs` is owned by [`crate::RunLog`]/the Deployment Store at the
/// deployment level (spec.md §3 lists it on both `Deployment` and
/// `WorkflowState`; this type keeps the fields the executor itself reads
/// and writes on every `advance`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowState {
    /// Overall phase.
    pub current_phase: WorkflowPhase,
    /// Per-step state, keyed by `stepId`.
    pub step_states: HashMap<String, StepState>,
    /// When the workflow was first triggered.
    pub started_at: Option<chrono::DateTime<chrono::Utc>>,
    /// When the workflow reached a terminal phase.
    pub completed_at: Option<chrono::DateTime<chrono::Utc>>,
    /// When `advance` last ran.
    pub last_advanced_at: Option<chrono::DateTime<chrono::Utc>>,
    /// Number of times `advance` has run; used for observability, not control flow.
    pub coordinator_invocations: u64,
    /// Optimistic-concurrency version (§4.2); bumped on every successful
    /// store write, checked by `updateWorkflowState`.
    pub version: u64,
}

impl WorkflowState {
    /// A fresh workflow state in the `Idle` phase with no step states.
    pub fn idle() -> Self {
        Self {
            current_phase: WorkflowPhase::Idle,
            step_states: HashMap::new(),
            started_at: None,
            completed_at: None,
            last_advanced_at: None,
            coordinator_invocations: 0,
            version: 0,
        }
    }
}
