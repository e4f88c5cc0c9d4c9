//! Compiled execution plan (spec.md §3/§4.1): the flat, addressable form of
//! an [`crate::OrgPattern`]'s workflow tree produced by `team-workflow::plan::compile`.

use serde::{Deserialize, Serialize};

use crate::pattern::{EscalationConfig, Role, RoutingRule};

/// One compiled operation. Each [`StepPlan`] carries exactly one variant;
/// the variant set mirrors [`crate::WorkflowStep`] one-to-one (§3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Operation {
    /// Dispatch a `team_agent_loop` job to an idle agent of `role`.
    DispatchAgentLoop {
        /// Target role id.
        role: String,
        /// Task instruction text.
        task: String,
        /// Optional structured input carried alongside the task.
        input: Option<serde_json::Value>,
    },
    /// Dispatch to the lead agent (the role with no `reportsTo`).
    InvokeCoordinator {
        /// Why the coordinator is being invoked.
        reason: String,
        /// Additional context passed to the coordinator's prompt.
        context: Option<serde_json::Value>,
    },
    /// Wait for an event whose name matches `pattern`.
    AwaitEvent {
        /// Event-name pattern (exact, `*`, or substring either way).
        pattern: String,
        /// Optional timeout in seconds.
        timeout: Option<u64>,
    },
    /// Aggregate the results of `source_step_ids` using `method`.
    AggregateResults {
        /// Aggregation method/prompt hint.
        method: String,
        /// Step ids whose results feed the aggregation.
        source_step_ids: Vec<String>,
    },
    /// Ask the LLM to evaluate `check` and pick a branch.
    EvaluateCondition {
        /// Condition text.
        check: String,
    },
    /// Container step with no operation of its own (`parallel`/`sequential`).
    Noop,
}

/// A single compiled step: a stable id, a tag matching the source step kind,
/// and one [`Operation`]. Containers additionally carry `children` and
/// `container_kind` so the executor can apply parallel/sequential semantics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepPlan {
    /// Stable id: `step_{index}` at the root, `{parentId}_{childIndex}` nested.
    pub step_id: String,
    /// Tag matching the source `WorkflowStep` kind (`assign`, `parallel`, …).
    pub tag: String,
    /// The compiled operation.
    pub operation: Operation,
    /// Branch taken when `operation` is `EvaluateCondition` and it resolves true.
    pub then_branch: Option<Box<StepPlan>>,
    /// Branch taken when it resolves false.
    pub else_branch: Option<Box<StepPlan>>,
    /// Child step ids, for `parallel`/`sequential` containers, in order.
    pub children: Vec<StepPlan>,
    /// Whether a `parallel` container's children all complete together, or
    /// a `sequential` container's children complete one at a time.
    pub container_kind: Option<ContainerKind>,
}

/// Distinguishes the two container semantics the executor must apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContainerKind {
    /// All children dispatch together; completes when all are completed.
    Parallel,
    /// Children dispatch one at a time, in order.
    Sequential,
}

impl StepPlan {
    /// All step ids in this subtree, including `self` and nested branches.
    pub fn all_ids(&self) -> Vec<String> {
        let mut out = vec![self.step_id.clone()];
        for child in &self.children {
            out.extend(child.all_ids());
        }
        if let Some(t) = &self.then_branch {
            out.extend(t.all_ids());
        }
        if let Some(e) = &self.else_branch {
            out.extend(e.all_ids());
        }
        out
    }

    /// Find a step by id anywhere in this subtree.
    pub fn find<'a>(&'a self, step_id: &str) -> Option<&'a StepPlan> {
        if self.step_id == step_id {
            return Some(self);
        }
        for child in &self.children {
            if let Some(found) = child.find(step_id) {
                return Some(found);
            }
        }
        self.then_branch.as_deref().and_then(|t| t.find(step_id)).or_else(|| {
            self.else_branch.as_deref().and_then(|e| e.find(step_id))
        })
    }
}

/// The compiled form of an [`crate::OrgPattern`] (§3/§4.1).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionPlan {
    /// Source pattern name.
    pub pattern_name: String,
    /// Source pattern version.
    pub version: String,
    /// Role table, copied verbatim from the source pattern, insertion order preserved.
    pub roles: Vec<Role>,
    /// Routing rules, copied verbatim.
    pub routing: Vec<RoutingRule>,
    /// Escalation policy, copied verbatim.
    pub escalation: EscalationConfig,
    /// Top-level compiled steps, run sequentially by the executor.
    pub steps: Vec<StepPlan>,
}

impl ExecutionPlan {
    /// Find a step anywhere in the plan by id.
    pub fn find_step(&self, step_id: &str) -> Option<&StepPlan> {
        self.steps.iter().find_map(|s| s.find(step_id))
    }

    /// The lead/coordinator role: the one with no `reportsTo`.
    pub fn lead_role(&self) -> Option<&Role> {
        self.roles.iter().find(|r| r.reports_to.is_none())
    }
}
