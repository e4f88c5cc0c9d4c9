#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **team-bus** – Core event bus abstraction for the team runtime
//! orchestrator.
//!
//! In-process, synchronous-by-default publish/subscribe with named,
//! strongly-typed events. No delivery guarantees across restarts, no
//! persistence — subscribers that fall behind a [`InMemoryBus`]'s ring
//! buffer miss events, the same tradeoff `toka-bus-core` makes for kernel
//! events. Three families of events flow through here: PTY session
//! lifecycle (Session Manager → Anomaly Coordinator), workflow transitions
//! (Workflow Executor → UI), and the `team:*` re-publications the push
//! layer subscribes to.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use team_types::{AgentId, DeploymentId, SpaceId, WorkspaceId};
use tokio::sync::broadcast;

/// Info describing a tool invocation the agent's CLI is currently running.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolInfo {
    /// Tool/command name as reported by the CLI's own output.
    pub tool_name: String,
    /// Short human-readable description, if the CLI surfaces one.
    pub description: Option<String>,
}

/// A blocking interactive prompt detected in a session's output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptInfo {
    /// Prompt kind (`confirm`, `select`, `text`, …), classifier-assigned.
    pub prompt_type: String,
    /// The literal prompt text.
    pub prompt: String,
    /// Selectable options, if this is a menu-style prompt.
    pub options: Option<Vec<String>>,
    /// A suggested auto-response, if the classifier has one.
    pub suggested_response: Option<String>,
}

/// Typed event enumeration flowing through the bus. Each variant is a
/// compile-time-exhaustive-match extension point (spec.md §9): adding a
/// new kind is a new variant, not a stringly-typed payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[non_exhaustive]
pub enum RuntimeEvent {
    /// A session's CLI started running a tool/command.
    ToolRunning {
        /// The session this event concerns.
        session_id: String,
        /// What is running.
        info: ToolInfo,
        /// Whether auto-interrupt is armed for this tool.
        auto_interrupt_enabled: bool,
    },
    /// A running tool was interrupted (by auto-interrupt or operator action).
    ToolInterrupted {
        /// The session this event concerns.
        session_id: String,
        /// What was running.
        info: ToolInfo,
        /// Whether the interrupt actually took effect.
        interrupted: bool,
        /// How the interrupt was delivered (`enter`, `ctrl_c`, …).
        method: String,
    },
    /// The CLI is blocked on an external login/auth flow.
    LoginRequired {
        /// The session this event concerns.
        session_id: String,
        /// Login URL extracted from output, if found.
        url: Option<String>,
        /// Freeform instructions extracted from output, if found.
        instructions: Option<String>,
    },
    /// A blocking interactive prompt was detected.
    BlockingPrompt {
        /// The session this event concerns.
        session_id: String,
        /// The detected prompt.
        prompt_info: PromptInfo,
    },
    /// A stall classification completed (scheduled or forced).
    StallClassified {
        /// The session this event concerns.
        session_id: String,
        /// Classifier verdict label.
        classification: String,
    },
    /// The session's current task appears complete.
    TaskComplete {
        /// The session this event concerns.
        session_id: String,
        /// Result payload, if the CLI reported a structured result.
        result: Option<serde_json::Value>,
    },
    /// The session's subprocess exited.
    AgentStopped {
        /// The session this event concerns.
        session_id: String,
        /// Human-readable reason.
        reason: String,
        /// Process exit code, if known.
        exit_code: Option<i32>,
        /// Whether the stop coincided with a login-required detection.
        login_detected: bool,
    },
    /// The session's subprocess failed fatally.
    AgentError {
        /// The session this event concerns.
        session_id: String,
        /// Error detail.
        error: String,
    },
    /// A step was escalated (`failStep`'s escalation branch).
    StepEscalated {
        /// Owning deployment.
        deployment_id: DeploymentId,
        /// Escalated step id.
        step_id: String,
        /// Current escalation depth after this event.
        escalation_count: u32,
    },
    /// `advance` persisted a new workflow state.
    WorkflowUpdated {
        /// Owning deployment.
        deployment_id: DeploymentId,
    },
    /// The workflow reached `completed`.
    WorkflowCompleted {
        /// Owning deployment.
        deployment_id: DeploymentId,
    },
    /// The workflow reached `failed`.
    WorkflowFailed {
        /// Owning deployment.
        deployment_id: DeploymentId,
    },
    /// UI re-publication: an agent loop dispatch started/completed/failed.
    /// Carries the enrichment spec.md §6 requires for every `team:*` event.
    Team {
        /// The concrete `team:*` event name (`team:agent_loop_started`, …).
        name: TeamEventName,
        /// Owning workspace.
        workspace_id: WorkspaceId,
        /// Owning space.
        space_id: SpaceId,
        /// Owning deployment.
        deployment_id: DeploymentId,
        /// Agent this event concerns, if any.
        agent_id: Option<AgentId>,
        /// Event-specific payload.
        payload: serde_json::Value,
        /// When this event was re-published.
        at: DateTime<Utc>,
    },
}

/// The closed set of `team:*` names the UI/push layer subscribes to
/// (spec.md §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TeamEventName {
    /// `team:agent_loop_started`
    AgentLoopStarted,
    /// `team:agent_loop_completed`
    AgentLoopCompleted,
    /// `team:agent_loop_failed`
    AgentLoopFailed,
    /// `team:message_sent`
    MessageSent,
    /// `team:agent_tool_running`
    AgentToolRunning,
    /// `team:agent_tool_interrupted`
    AgentToolInterrupted,
    /// `team:agent_login_required`
    AgentLoginRequired,
    /// `team:agent_blocking_prompt`
    AgentBlockingPrompt,
    /// `team:stall_classified`
    StallClassified,
    /// `team:escalation_surfaced`
    EscalationSurfaced,
    /// `team:auth_completed`
    AuthCompleted,
    /// `team:workflow_updated`
    WorkflowUpdated,
    /// `team:workflow_completed`
    WorkflowCompleted,
    /// `team:workflow_failed`
    WorkflowFailed,
}

/// Core event bus abstraction for publishing and subscribing to runtime
/// events. Implementations must be thread-safe and support multiple
/// subscribers; publish should never block on a slow subscriber.
pub trait EventBus: Send + Sync {
    /// Publish an event to all subscribers.
    fn publish(&self, event: &RuntimeEvent) -> Result<(), BusError>;

    /// Subscribe to the live event stream. A subscriber that falls behind
    /// the ring buffer observes [`broadcast::error::RecvError::Lagged`] on
    /// its next `recv` and must resynchronize itself.
    fn subscribe(&self) -> broadcast::Receiver<RuntimeEvent>;
}

/// Simple in-memory, broadcast-only event bus using Tokio channels.
#[derive(Debug, Clone)]
pub struct InMemoryBus {
    tx: Arc<broadcast::Sender<RuntimeEvent>>,
}

impl Default for InMemoryBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl InMemoryBus {
    /// Create a new in-memory bus with the specified ring buffer capacity.
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self { tx: Arc::new(tx) }
    }

    /// Current number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl EventBus for InMemoryBus {
    fn publish(&self, event: &RuntimeEvent) -> Result<(), BusError> {
        // A publish with zero subscribers is not an error: most deployments
        // have no live push-layer listener attached.
        let _ = self.tx.send(event.clone());
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<RuntimeEvent> {
        self.tx.subscribe()
    }
}

/// Errors that can occur during bus operations.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    /// Event could not be published.
    #[error("failed to publish event: {0}")]
    PublishFailed(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn basic_publish_subscribe_roundtrip() {
        let bus = InMemoryBus::new(16);
        let mut rx = bus.subscribe();

        let event = RuntimeEvent::AgentStopped {
            session_id: "sess-1".into(),
            reason: "exited".into(),
            exit_code: Some(0),
            login_detected: false,
        };
        bus.publish(&event).unwrap();

        assert_eq!(rx.recv().await.unwrap(), event);
    }

    #[tokio::test]
    async fn multiple_subscribers_each_get_a_copy() {
        let bus = InMemoryBus::new(16);
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);

        let event = RuntimeEvent::WorkflowCompleted {
            deployment_id: DeploymentId::new(),
        };
        bus.publish(&event).unwrap();

        assert_eq!(rx1.recv().await.unwrap(), event);
        assert_eq!(rx2.recv().await.unwrap(), event);
    }

    #[tokio::test]
    async fn lagging_subscriber_observes_lagged_error() {
        let bus = InMemoryBus::new(2);
        let mut rx = bus.subscribe();

        for i in 0..5 {
            bus.publish(&RuntimeEvent::StallClassified {
                session_id: "sess-1".into(),
                classification: format!("round-{i}"),
            })
            .unwrap();
        }

        match rx.recv().await {
            Err(broadcast::error::RecvError::Lagged(_)) => {}
            other => panic!("expected Lagged, got {other:?}"),
        }
    }
}
