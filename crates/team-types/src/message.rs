//! Inter-agent message envelope (spec.md §3 `TeamMessage`).

use serde::{Deserialize, Serialize};

use crate::{
    ids::{AgentId, DeploymentId},
    validate_bounded_text, ValidationError, MAX_MESSAGE_LEN, MAX_NAME_LEN,
};

/// The special sender/recipient id meaning "the system itself", not a live agent.
pub const SYSTEM_SENDER: &str = "system";

/// `{id, deploymentId, fromAgentId, fromRole, toAgentId, toRole, message,
/// delivered, readByRecipient, createdAt, deliveredAt?}`.
///
/// `fromAgentId`/`toAgentId` are `None` exactly when the corresponding side
/// is [`SYSTEM_SENDER`] (spec.md §3 invariant).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeamMessage {
    /// Unique id.
    pub id: uuid::Uuid,
    /// Owning deployment.
    pub deployment_id: DeploymentId,
    /// Sending agent, or `None` for `"system"`.
    pub from_agent_id: Option<AgentId>,
    /// Sending role name (or `"system"`).
    pub from_role: String,
    /// Receiving agent.
    pub to_agent_id: AgentId,
    /// Receiving role name.
    pub to_role: String,
    /// Message body.
    pub message: String,
    /// Whether this message has been delivered to the recipient's session.
    pub delivered: bool,
    /// Whether the recipient has read this message (set on delivery or `readMessages`).
    pub read_by_recipient: bool,
    /// Creation timestamp.
    pub created_at: chrono::DateTime<chrono::Utc>,
    /// Delivery timestamp, set once `delivered` becomes true.
    pub delivered_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl TeamMessage {
    /// Validate the message body length (spec-level security bound; routing
    /// legality is checked separately by `team-messaging::validate_routing`).
    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_bounded_text(&self.message, "message.message", MAX_MESSAGE_LEN)?;
        validate_bounded_text(&self.to_role, "message.toRole", MAX_NAME_LEN)?;
        Ok(())
    }

    /// The text block format used when delivering pending messages (§4.5):
    /// `[Message from {fromRole}]: {message}`.
    pub fn formatted(&self) -> String {
        format!("[Message from {}]: {}", self.from_role, self.message)
    }
}
