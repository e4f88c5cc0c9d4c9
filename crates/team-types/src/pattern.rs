//! Organizational pattern: roles, routing rules, escalation policy, and the
//! declarative workflow tree (spec.md §3 `OrgPattern`/`Role`/`WorkflowStep`).

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::{validate_bounded_text, ValidationError, MAX_CAPABILITY_LEN, MAX_NAME_LEN};

/// A role within an org pattern: `{id, name, description, capabilities,
/// reportsTo?, minInstances, maxInstances, singleton, agentType, workdir?}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Role {
    /// Stable identifier, unique within the pattern.
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// Free-text description shown to operators.
    pub description: String,
    /// Capabilities granted to every agent instantiated from this role.
    pub capabilities: HashSet<String>,
    /// The role this one reports to, if any. The lead/coordinator role has none.
    pub reports_to: Option<String>,
    /// Minimum number of instances materialized at deploy time (≥ 1).
    pub min_instances: u32,
    /// Maximum number of instances (≥ `min_instances`).
    pub max_instances: u32,
    /// Whether at most one instance may ever exist.
    pub singleton: bool,
    /// Agent CLI type (`claude`, `codex`, `gemini`, `aider`, …; see §6).
    pub agent_type: String,
    /// Working directory override; defaults to the scratch directory.
    pub workdir: Option<String>,
}

/// CLI agent types recognized by §6's capability-validation rule, including
/// their aliases/normalized forms.
pub const KNOWN_AGENT_TYPES: &[&str] = &[
    "claude", "claude-code", "claude_code", "claudecode",
    "codex", "gpt-codex", "openai-codex",
    "gemini", "gemini-cli", "gemini_cli",
    "aider",
];

impl Role {
    /// Validate this role in isolation (without cross-role graph checks).
    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_bounded_text(&self.id, "role.id", MAX_NAME_LEN)?;
        validate_bounded_text(&self.name, "role.name", MAX_NAME_LEN)?;
        if self.min_instances < 1 {
            return Err("role.minInstances must be >= 1".into());
        }
        if self.max_instances < self.min_instances {
            return Err(format!(
                "role.maxInstances ({}) must be >= minInstances ({})",
                self.max_instances, self.min_instances
            ));
        }
        if self.singleton && self.max_instances > 1 {
            return Err("singleton role cannot have maxInstances > 1".into());
        }
        for cap in &self.capabilities {
            validate_bounded_text(cap, "role.capabilities[]", MAX_CAPABILITY_LEN)?;
        }
        let normalized = self.agent_type.to_lowercase().replace('_', "-");
        if !KNOWN_AGENT_TYPES
            .iter()
            .any(|t| t.replace('_', "-") == normalized)
        {
            return Err(format!("unknown agentType: {}", self.agent_type));
        }
        Ok(())
    }
}

/// A directed message-routing permission from one role to another, used by
/// the Messaging Bus's `validateRouting` (§4.5) when neither endpoint is a
/// direct report relationship.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RoutingRule {
    /// Sending role id.
    pub from_role: String,
    /// Receiving role id.
    pub to_role: String,
}

/// Escalation policy consulted by the Workflow Executor's `failStep` (§4.4).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EscalationConfig {
    /// Maximum number of times a step may be escalated before failing outright.
    pub max_depth: u32,
}

impl Default for EscalationConfig {
    fn default() -> Self {
        Self { max_depth: 3 }
    }
}

/// Declarative workflow step — a tagged sum type so adding a kind is a
/// compile-time exhaustive-match extension (spec.md §9 design note).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WorkflowStep {
    /// Assign a task to any idle agent of `role`.
    Assign {
        /// Target role id.
        role: String,
        /// Task instruction text.
        task: String,
        /// Optional per-step timeout in seconds.
        timeout: Option<u64>,
    },
    /// Select an agent of `role` matching `criteria` (LLM-assisted in practice).
    Select {
        /// Target role id.
        role: String,
        /// Selection criteria text.
        criteria: String,
    },
    /// Ask `reviewer` to review `subject`.
    Review {
        /// Reviewing role id.
        reviewer: String,
        /// Subject of the review (free text or step reference).
        subject: String,
    },
    /// Ask `approver` to approve `subject`.
    Approve {
        /// Approving role id.
        approver: String,
        /// Subject of the approval.
        subject: String,
    },
    /// Aggregate the results of prior steps using `method`.
    Aggregate {
        /// Aggregation method/prompt hint.
        method: String,
        /// Explicit source step ids; if empty, resolved at compile time to
        /// all preceding siblings of the same container (§4.1).
        sources: Option<Vec<String>>,
    },
    /// Evaluate `check` and branch into `then`/`else`.
    Condition {
        /// Condition text evaluated by the LLM (or defaulted offline, §9).
        check: String,
        /// Branch taken when the condition holds.
        then: Box<WorkflowStep>,
        /// Branch taken when the condition does not hold.
        r#else: Option<Box<WorkflowStep>>,
    },
    /// Wait for an event matching `condition`, bounded by `timeout`.
    Wait {
        /// Event-name pattern (exact, `*`, or substring match, §4.4).
        condition: Option<String>,
        /// Optional timeout in seconds.
        timeout: Option<u64>,
    },
    /// Run all child steps concurrently; completes when all children do.
    Parallel {
        /// Child steps.
        steps: Vec<WorkflowStep>,
    },
    /// Run child steps one at a time, in order.
    Sequential {
        /// Child steps.
        steps: Vec<WorkflowStep>,
    },
}

impl WorkflowStep {
    /// Every role id directly referenced by this step or its descendants.
    pub fn referenced_roles(&self) -> Vec<&str> {
        match self {
            WorkflowStep::Assign { role, .. } | WorkflowStep::Select { role, .. } => vec![role.as_str()],
            WorkflowStep::Review { reviewer, .. } => vec![reviewer.as_str()],
            WorkflowStep::Approve { approver, .. } => vec![approver.as_str()],
            WorkflowStep::Aggregate { .. } => vec![],
            WorkflowStep::Condition { then, r#else, .. } => {
                let mut v = then.referenced_roles();
                if let Some(e) = r#else {
                    v.extend(e.referenced_roles());
                }
                v
            }
            WorkflowStep::Wait { .. } => vec![],
            WorkflowStep::Parallel { steps } | WorkflowStep::Sequential { steps } => {
                steps.iter().flat_map(|s| s.referenced_roles()).collect()
            }
        }
    }

    /// Children of a container step, or empty for leaves.
    pub fn children(&self) -> &[WorkflowStep] {
        match self {
            WorkflowStep::Parallel { steps } | WorkflowStep::Sequential { steps } => steps,
            _ => &[],
        }
    }

    /// Whether this step is a container (`parallel`/`sequential`).
    pub fn is_container(&self) -> bool {
        matches!(self, WorkflowStep::Parallel { .. } | WorkflowStep::Sequential { .. })
    }
}

/// `{name, version, structure:{roles, routing, escalation}, workflow:{steps}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrgPattern {
    /// Pattern name.
    pub name: String,
    /// Pattern version string.
    pub version: String,
    /// Role table, insertion order preserved (an `IndexMap` would also work;
    /// a `Vec` keeps the "copied verbatim, preserving insertion order"
    /// contract from §4.1 explicit without relying on map iteration order).
    pub roles: Vec<Role>,
    /// Routing rules.
    pub routing: Vec<RoutingRule>,
    /// Escalation policy.
    pub escalation: EscalationConfig,
    /// Top-level workflow steps, run sequentially (§4.4).
    pub workflow: Vec<WorkflowStep>,
}

/// Errors produced by [`OrgPattern::validate`], consumed by the Plan
/// Compiler's `compile` (§4.1) to produce `InvalidPattern`.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PatternValidationError {
    /// A role's `reportsTo` names a role that does not exist.
    #[error("role {role} reportsTo unknown role {target}")]
    UnknownReportsTo {
        /// Offending role id.
        role: String,
        /// Unknown target id.
        target: String,
    },
    /// A workflow step references a role that does not exist.
    #[error("workflow step references unknown role {0}")]
    UnknownStepRole(String),
    /// The reporting graph contains a cycle.
    #[error("reporting graph is cyclic, detected at role {0}")]
    CyclicReportsTo(String),
    /// `minInstances > maxInstances` for some role.
    #[error("role {0} has minInstances > maxInstances")]
    InvalidInstanceBounds(String),
    /// A container step has zero children but is referenced downstream.
    #[error("container step has zero children but is referenced by an aggregate step")]
    EmptyReferencedContainer,
    /// A role-level validation error (name length, unknown agent type, …).
    #[error("{0}")]
    Role(String),
}

impl OrgPattern {
    /// Validate role bounds, role references, and reporting-graph acyclicity.
    ///
    /// Cycle detection walks the `reportsTo` edges with the same
    /// visiting/visited DFS idiom used for dependency-graph validation
    /// elsewhere in this workspace's ancestry.
    pub fn validate(&self) -> Result<(), PatternValidationError> {
        let mut by_id = HashMap::new();
        for role in &self.roles {
            role.validate().map_err(PatternValidationError::Role)?;
            by_id.insert(role.id.as_str(), role);
            if role.max_instances < role.min_instances {
                return Err(PatternValidationError::InvalidInstanceBounds(role.id.clone()));
            }
        }

        for role in &self.roles {
            if let Some(target) = &role.reports_to {
                if !by_id.contains_key(target.as_str()) {
                    return Err(PatternValidationError::UnknownReportsTo {
                        role: role.id.clone(),
                        target: target.clone(),
                    });
                }
            }
        }

        for step in &self.workflow {
            for role in step.referenced_roles() {
                if !by_id.contains_key(role) {
                    return Err(PatternValidationError::UnknownStepRole(role.to_string()));
                }
            }
        }

        let mut visiting = HashSet::new();
        let mut visited = HashSet::new();
        for role in &self.roles {
            if !visited.contains(role.id.as_str()) {
                visit(role.id.as_str(), &by_id, &mut visiting, &mut visited)?;
            }
        }

        Ok(())
    }
}

fn visit<'a>(
    role_id: &'a str,
    by_id: &HashMap<&'a str, &'a Role>,
    visiting: &mut HashSet<&'a str>,
    visited: &mut HashSet<&'a str>,
) -> Result<(), PatternValidationError> {
    if visited.contains(role_id) {
        return Ok(());
    }
    if !visiting.insert(role_id) {
        return Err(PatternValidationError::CyclicReportsTo(role_id.to_string()));
    }
    if let Some(role) = by_id.get(role_id) {
        if let Some(parent) = &role.reports_to {
            visit(parent.as_str(), by_id, visiting, visited)?;
        }
    }
    visiting.remove(role_id);
    visited.insert(role_id);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet as Set;

    fn role(id: &str, reports_to: Option<&str>) -> Role {
        Role {
            id: id.into(),
            name: id.into(),
            description: String::new(),
            capabilities: Set::new(),
            reports_to: reports_to.map(|s| s.to_string()),
            min_instances: 1,
            max_instances: 1,
            singleton: true,
            agent_type: "claude-code".into(),
            workdir: None,
        }
    }

    fn pattern(roles: Vec<Role>) -> OrgPattern {
        OrgPattern {
            name: "t".into(),
            version: "1".into(),
            roles,
            routing: vec![],
            escalation: EscalationConfig::default(),
            workflow: vec![],
        }
    }

    #[test]
    fn acyclic_graph_validates() {
        let p = pattern(vec![role("lead", None), role("worker", Some("lead"))]);
        assert!(p.validate().is_ok());
    }

    #[test]
    fn cyclic_graph_is_rejected() {
        let p = pattern(vec![role("a", Some("b")), role("b", Some("a"))]);
        assert!(matches!(
            p.validate(),
            Err(PatternValidationError::CyclicReportsTo(_))
        ));
    }

    #[test]
    fn unknown_reports_to_is_rejected() {
        let p = pattern(vec![role("a", Some("ghost"))]);
        assert!(matches!(
            p.validate(),
            Err(PatternValidationError::UnknownReportsTo { .. })
        ));
    }

    #[test]
    fn min_greater_than_max_is_rejected() {
        let mut r = role("a", None);
        r.singleton = false;
        r.min_instances = 3;
        r.max_instances = 1;
        let p = pattern(vec![r]);
        assert!(matches!(
            p.validate(),
            Err(PatternValidationError::InvalidInstanceBounds(_))
        ));
    }
}
