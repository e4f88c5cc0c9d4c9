//! Target resolution and routing legality (spec.md §4.5).

use team_types::{Agent, RoutingRule};

use crate::error::{MessagingError, MessagingResult};

/// Resolve `to` against the deployment's live agents: either a literal
/// [`team_types::AgentId`] (as its `Uuid` text form) or a role name, in
/// which case the agent with the lowest `instanceNumber` in that role is
/// picked deterministically.
pub fn resolve_target<'a>(agents: &'a [Agent], to: &str) -> MessagingResult<&'a Agent> {
    if let Ok(uuid) = uuid::Uuid::parse_str(to) {
        let id = team_types::AgentId(uuid);
        return agents
            .iter()
            .find(|a| a.id == id)
            .ok_or_else(|| MessagingError::TargetNotFound(to.to_string()));
    }

    agents
        .iter()
        .filter(|a| a.role == to)
        .min_by_key(|a| a.instance_number)
        .ok_or_else(|| MessagingError::TargetNotFound(to.to_string()))
}

/// `validateRouting(from, to)`: `from == None` (the `"system"` sender)
/// always passes. Otherwise permitted iff `from` reports to `to`, `to`
/// reports to `from`, or an explicit [`RoutingRule`] maps `from.role` to
/// `to.role`.
pub fn validate_routing(from: Option<&Agent>, to: &Agent, routing: &[RoutingRule]) -> bool {
    let from = match from {
        None => return true,
        Some(a) => a,
    };

    if from.reports_to_agent_id == Some(to.id) {
        return true;
    }
    if to.reports_to_agent_id == Some(from.id) {
        return true;
    }
    routing
        .iter()
        .any(|rule| rule.from_role == from.role && rule.to_role == to.role)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use team_types::{AgentId, AgentStatus, DeploymentId, UserId, WorkspaceId};

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
    fn resolves_lowest_instance_number_for_a_role() {
        let a1 = agent("engineer", 2, None);
        let a2 = agent("engineer", 1, None);
        let agents = vec![a1.clone(), a2.clone()];
        let resolved = resolve_target(&agents, "engineer").unwrap();
        assert_eq!(resolved.id, a2.id);
    }

    #[test]
    fn resolves_by_literal_agent_id() {
        let a1 = agent("engineer", 1, None);
        let agents = vec![a1.clone()];
        let resolved = resolve_target(&agents, &a1.id.to_string()).unwrap();
        assert_eq!(resolved.id, a1.id);
    }

    #[test]
    fn unknown_target_fails() {
        let agents = vec![agent("engineer", 1, None)];
        assert!(matches!(
            resolve_target(&agents, "ghost"),
            Err(MessagingError::TargetNotFound(_))
        ));
    }

    #[test]
    fn system_sender_bypasses_routing() {
        let to = agent("engineer", 1, None);
        assert!(validate_routing(None, &to, &[]));
    }

    #[test]
    fn up_and_down_hierarchy_are_permitted() {
        let lead = agent("lead", 1, None);
        let mut worker = agent("worker", 1, Some(lead.id));
        assert!(validate_routing(Some(&worker), &lead, &[]));
        assert!(validate_routing(Some(&lead), &worker, &[]));

        worker.reports_to_agent_id = None;
        assert!(!validate_routing(Some(&worker), &lead, &[]));
    }

    #[test]
    fn explicit_routing_rule_permits_peer_messaging() {
        let a = agent("reviewer", 1, None);
        let b = agent("engineer", 1, None);
        let rules = vec![RoutingRule { from_role: "reviewer".into(), to_role: "engineer".into() }];
        assert!(validate_routing(Some(&a), &b, &rules));
        assert!(!validate_routing(Some(&b), &a, &rules));
    }
}
