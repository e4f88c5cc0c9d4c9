//! `getTeamRoster` (spec.md §4.5).

use serde::Serialize;
use team_types::{Agent, AgentId, AgentStatus, RoutingRule};

use crate::routing::validate_routing;

/// One row of `getTeamRoster(agentId)`.
#[derive(Debug, Clone, Serialize)]
pub struct RosterEntry {
    /// The listed agent's id.
    pub agent_id: AgentId,
    /// Its role.
    pub role: String,
    /// Its instance number within the role.
    pub instance_number: u32,
    /// Its current status.
    pub status: AgentStatus,
    /// Whether the viewing agent is permitted to message this one
    /// (`validateRouting(viewer, this)`).
    pub can_message: bool,
    /// The agent this row reports to, if any.
    pub reports_to_agent_id: Option<AgentId>,
}

/// Build the full-team roster as seen by `viewer`.
pub fn team_roster(agents: &[Agent], viewer: &Agent, routing: &[RoutingRule]) -> Vec<RosterEntry> {
    agents
        .iter()
        .map(|a| RosterEntry {
            agent_id: a.id,
            role: a.role.clone(),
            instance_number: a.instance_number,
            status: a.status,
            can_message: a.id != viewer.id && validate_routing(Some(viewer), a, routing),
            reports_to_agent_id: a.reports_to_agent_id,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use team_types::{DeploymentId, UserId, WorkspaceId};

    fn agent(role: &str, instance: u32, reports_to: Option<AgentId>) -> Agent {
        Agent {
            id: AgentId::new(),
            deployment_id: DeploymentId::new(),
            workspace_id: WorkspaceId::new(),
            user_id: UserId::new(),
            role: role.to_string(),
            instance_number: instance,
            agent_type: "claude-code".to_string(),
            workdir: "/tmp".to_string(),
            system_prompt: String::new(),
            capabilities: HashSet::new(),
            reports_to_agent_id: reports_to,
            status: AgentStatus::Idle,
            current_step_id: None,
            runtime_session_id: None,
            terminal_session_id: None,
            last_run_at: None,
            last_run_summary: None,
            total_actions: 0,
            total_errors: 0,
        }
    }

    #[test]
    fn self_row_cannot_message_self() {
        let lead = agent("lead", 1, None);
        let roster = team_roster(&[lead.clone()], &lead, &[]);
        assert_eq!(roster.len(), 1);
        assert!(!roster[0].can_message);
    }

    #[test]
    fn roster_marks_reachable_peers() {
        let lead = agent("lead", 1, None);
        let worker = agent("worker", 1, Some(lead.id));
        let roster = team_roster(&[lead.clone(), worker.clone()], &lead, &[]);
        let worker_row = roster.iter().find(|r| r.agent_id == worker.id).unwrap();
        assert!(worker_row.can_message);
    }
}
