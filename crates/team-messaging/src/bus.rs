//! The Messaging Bus itself: `sendMessage`, `readMessages`,
//! `deliverPendingMessages`, and the kickoff-prompt helper (spec.md §4.5).

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use team_bus::EventBus;
use team_store::DeploymentStore;
use team_types::message::SYSTEM_SENDER;
use team_types::{Agent, AgentId, AgentStatus, DeploymentId, TeamMessage, WorkspaceId};

use crate::error::{MessagingError, MessagingResult};
use crate::roster::{team_roster, RosterEntry};
use crate::routing::{resolve_target, validate_routing};

/// Either the literal `"system"` sender or a live agent.
#[derive(Debug, Clone, Copy)]
pub enum Sender {
    /// The orchestrator itself, not a live agent. Bypasses routing checks.
    System,
    /// A specific agent instance.
    Agent(AgentId),
}

/// `sendMessage`'s return value.
#[derive(Debug, Clone, Serialize)]
pub struct SendMessageResult {
    /// The persisted message's id.
    pub message_id: uuid::Uuid,
    /// Whether the message was delivered into a live session immediately.
    pub delivered: bool,
    /// Whether delivering it required spawning the recipient's session.
    pub agent_spawned: bool,
    /// The resolved recipient.
    pub to_agent_id: AgentId,
    /// The resolved recipient's role.
    pub to_role: String,
}

/// The Messaging Bus: resolves targets, enforces routing, persists
/// messages, and drives spawn-on-first-message delivery through the Agent
/// Session Manager.
pub struct MessagingBus {
    store: Arc<dyn DeploymentStore>,
    sessions: Arc<team_session::SessionManager>,
    bus: Arc<dyn EventBus>,
}

impl MessagingBus {
    /// Construct a bus bound to the shared store, session manager, and
    /// event bus.
    pub fn new(
        store: Arc<dyn DeploymentStore>,
        sessions: Arc<team_session::SessionManager>,
        bus: Arc<dyn EventBus>,
    ) -> Self {
        Self { store, sessions, bus }
    }

    /// `sendMessage(from, to, text) -> {messageId, delivered, agentSpawned, toAgentId, toRole}`.
    pub async fn send_message(
        &self,
        workspace_id: WorkspaceId,
        deployment_id: DeploymentId,
        from: Sender,
        to: &str,
        text: &str,
    ) -> MessagingResult<SendMessageResult> {
        let deployment = self.store.find_deployment(workspace_id, deployment_id).await?;
        let agents = self.store.list_agents(deployment_id).await?;

        let from_agent = match from {
            Sender::System => None,
            Sender::Agent(id) => Some(
                agents
                    .iter()
                    .find(|a| a.id == id)
                    .cloned()
                    .ok_or(MessagingError::SenderNotFound(id))?,
            ),
        };

        let to_agent = resolve_target(&agents, to)?.clone();

        if !validate_routing(from_agent.as_ref(), &to_agent, &deployment.org_pattern.routing) {
            return Err(MessagingError::RoutingRejected {
                from: from_agent.as_ref().map(|a| a.role.clone()).unwrap_or_else(|| SYSTEM_SENDER.to_string()),
                to: to_agent.role.clone(),
            });
        }

        let message = TeamMessage {
            id: uuid::Uuid::new_v4(),
            deployment_id,
            from_agent_id: from_agent.as_ref().map(|a| a.id),
            from_role: from_agent.as_ref().map(|a| a.role.clone()).unwrap_or_else(|| SYSTEM_SENDER.to_string()),
            to_agent_id: to_agent.id,
            to_role: to_agent.role.clone(),
            message: text.to_string(),
            delivered: false,
            read_by_recipient: false,
            created_at: Utc::now(),
            delivered_at: None,
        };
        message.validate().map_err(MessagingError::Validation)?;

        self.store.append_message(deployment_id, message.clone()).await?;

        let mut agent_spawned = false;
        if to_agent.status == AgentStatus::Idle && to_agent.runtime_session_id.is_none() {
            self.spawn_recipient(&deployment_id, &to_agent).await?;
            agent_spawned = true;
        }

        // Only auto-deliver here when the recipient's session is brand new.
        // A recipient that already has a live session may be mid-task, not
        // at a blocking prompt — pushing text into its PTY now would
        // interleave with whatever it's doing. For that case the message
        // just sits queued until `handle_blocking_prompt` next fires for it
        // or the recipient calls `readMessages` itself.
        let delivered = if agent_spawned {
            self.deliver_pending_messages(deployment_id, to_agent.id).await? > 0
        } else {
            false
        };

        Ok(SendMessageResult {
            message_id: message.id,
            delivered,
            agent_spawned,
            to_agent_id: to_agent.id,
            to_role: to_agent.role,
        })
    }

    async fn spawn_recipient(&self, deployment_id: &DeploymentId, agent: &Agent) -> MessagingResult<()> {
        let session_id = self
            .sessions
            .spawn(team_session::SpawnRequest {
                deployment_id: deployment_id.to_string(),
                agent_id: agent.id.to_string(),
                agent_type: agent.agent_type.clone(),
                workdir: Some(std::path::PathBuf::from(&agent.workdir)),
                env: vec![],
                system_prompt: agent.system_prompt.clone(),
            })
            .await?;

        let mut updated = agent.clone();
        updated.runtime_session_id = Some(session_id);
        updated.status = AgentStatus::Running;
        self.store.upsert_agent(updated).await?;
        Ok(())
    }

    /// `deliverPendingMessages(agentId) -> count`: pushes every undelivered
    /// message addressed to `agent_id` into its live session as a single
    /// formatted text block, then marks them delivered and read. A no-op if
    /// the agent has no live session. The only callers are `send_message`
    /// (when it just spawned the recipient's session) and the Anomaly
    /// Coordinator's `handle_blocking_prompt` hook — an already-busy agent's
    /// pending messages wait for one of those, or an explicit
    /// `read_messages` call, rather than being pushed mid-task.
    pub async fn deliver_pending_messages(
        &self,
        deployment_id: DeploymentId,
        agent_id: AgentId,
    ) -> MessagingResult<usize> {
        let agent = self.store.find_agent(agent_id).await?;
        let Some(session_id) = agent.runtime_session_id.clone() else {
            return Ok(0);
        };

        let mut messages = self.store.get_messages(deployment_id).await?;
        let pending: Vec<usize> = messages
            .iter()
            .enumerate()
            .filter(|(_, m)| m.to_agent_id == agent_id && !m.delivered)
            .map(|(i, _)| i)
            .collect();
        if pending.is_empty() {
            return Ok(0);
        }

        let block = pending
            .iter()
            .map(|&i| messages[i].formatted())
            .collect::<Vec<_>>()
            .join("\n\n");
        self.sessions.send(&session_id, &block).await?;

        let now = Utc::now();
        for &i in &pending {
            messages[i].delivered = true;
            messages[i].read_by_recipient = true;
            messages[i].delivered_at = Some(now);
        }
        self.store.set_messages(deployment_id, messages).await?;

        Ok(pending.len())
    }

    /// `readMessages(agentId, {unreadOnly})`: returns matching messages and
    /// marks every one of them `readByRecipient = true`.
    pub async fn read_messages(
        &self,
        deployment_id: DeploymentId,
        agent_id: AgentId,
        unread_only: bool,
    ) -> MessagingResult<Vec<TeamMessage>> {
        let mut messages = self.store.get_messages(deployment_id).await?;
        let mut result = Vec::new();
        for msg in messages.iter_mut().filter(|m| m.to_agent_id == agent_id) {
            if unread_only && msg.read_by_recipient {
                continue;
            }
            msg.read_by_recipient = true;
            result.push(msg.clone());
        }
        self.store.set_messages(deployment_id, messages).await?;
        Ok(result)
    }

    /// `getTeamRoster(agentId)`.
    pub async fn team_roster(&self, deployment_id: DeploymentId, workspace_id: WorkspaceId, agent_id: AgentId) -> MessagingResult<Vec<RosterEntry>> {
        let deployment = self.store.find_deployment(workspace_id, deployment_id).await?;
        let agents = self.store.list_agents(deployment_id).await?;
        let viewer = agents
            .iter()
            .find(|a| a.id == agent_id)
            .cloned()
            .ok_or(MessagingError::SenderNotFound(agent_id))?;
        Ok(team_roster(&agents, &viewer, &deployment.org_pattern.routing))
    }

    /// Shared reference to the event bus, so callers (the Deployment
    /// Service, the Anomaly Coordinator) can publish `team.message_sent`
    /// once a send completes.
    pub fn events(&self) -> &Arc<dyn EventBus> {
        &self.bus
    }
}

/// Build the coordinator's kickoff prompt: target, team roster, and
/// instructions, used by `triggerTeamRun`.
pub fn build_kickoff_prompt(target_description: &str, roster: &[RosterEntry]) -> String {
    let mut roster_lines = String::new();
    for entry in roster {
        roster_lines.push_str(&format!(
            "- {} (#{}) — {:?}\n",
            entry.role, entry.instance_number, entry.status
        ));
    }

    format!(
        "Target: {target_description}\n\nTeam roster:\n{roster_lines}\nInstructions: coordinate the team above to complete the target. \
Use sendMessage to assign work and readMessages to collect results."
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kickoff_prompt_lists_every_roster_row() {
        let roster = vec![RosterEntry {
            agent_id: AgentId::new(),
            role: "engineer".into(),
            instance_number: 1,
            status: AgentStatus::Idle,
            can_message: true,
            reports_to_agent_id: None,
        }];
        let prompt = build_kickoff_prompt("Ship v2", &roster);
        assert!(prompt.contains("Ship v2"));
        assert!(prompt.contains("engineer"));
    }
}
