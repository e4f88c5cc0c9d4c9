//! Plan Compiler (spec.md §4.1): turns a validated [`OrgPattern`] into a
//! flat, addressable [`ExecutionPlan`].
//!
//! Step ids are assigned with the same visiting/visited DFS idiom
//! [`OrgPattern::validate`] uses for reporting-graph cycle detection: walk
//! the tree once, assigning `step_{index}` at the root and
//! `{parentId}_{childIndex}` at every nested level.

use std::collections::HashSet;

use team_types::pattern::PatternValidationError;
use team_types::plan::ContainerKind;
use team_types::{ExecutionPlan, Operation, OrgPattern, StepPlan, WorkflowStep};

/// Compile `pattern` into an [`ExecutionPlan`].
///
/// Runs [`OrgPattern::validate`] first, then performs the one check it does
/// not cover: an `aggregate` step whose (explicit or auto-resolved) sources
/// include a container step with zero children.
pub fn compile(pattern: &OrgPattern) -> Result<ExecutionPlan, PatternValidationError> {
    pattern.validate()?;

    let mut empty_containers = HashSet::new();
    let mut aggregate_refs = Vec::new();

    let steps = compile_siblings(&pattern.workflow, None, &mut empty_containers, &mut aggregate_refs);

    for referenced in &aggregate_refs {
        if empty_containers.contains(referenced) {
            return Err(PatternValidationError::EmptyReferencedContainer);
        }
    }

    Ok(ExecutionPlan {
        pattern_name: pattern.name.clone(),
        version: pattern.version.clone(),
        roles: pattern.roles.clone(),
        routing: pattern.routing.clone(),
        escalation: pattern.escalation.clone(),
        steps,
    })
}

/// Compile a list of sibling steps under `parent_id` (`None` for the root
/// workflow list), resolving empty-source `aggregate` steps to the ids of
/// their preceding siblings as they go.
fn compile_siblings(
    steps: &[WorkflowStep],
    parent_id: Option<&str>,
    empty_containers: &mut HashSet<String>,
    aggregate_refs: &mut Vec<String>,
) -> Vec<StepPlan> {
    let mut compiled: Vec<StepPlan> = Vec::with_capacity(steps.len());
    for (index, step) in steps.iter().enumerate() {
        let step_id = match parent_id {
            Some(parent) => format!("{parent}_{index}"),
            None => format!("step_{index}"),
        };
        let preceding: Vec<String> = compiled.iter().map(|s| s.step_id.clone()).collect();
        let plan = compile_step(step, step_id, &preceding, empty_containers, aggregate_refs);
        compiled.push(plan);
    }
    compiled
}

fn compile_step(
    step: &WorkflowStep,
    step_id: String,
    preceding_siblings: &[String],
    empty_containers: &mut HashSet<String>,
    aggregate_refs: &mut Vec<String>,
) -> StepPlan {
    let leaf = |tag: &str, operation: Operation| StepPlan {
        step_id: step_id.clone(),
        tag: tag.to_string(),
        operation,
        then_branch: None,
        else_branch: None,
        children: vec![],
        container_kind: None,
    };

    match step {
        WorkflowStep::Assign { role, task, timeout } => leaf(
            "assign",
            Operation::DispatchAgentLoop {
                role: role.clone(),
                task: task.clone(),
                input: timeout.map(|secs| serde_json::json!({ "timeoutSecs": secs })),
            },
        ),
        // `select`/`review`/`approve` all resolve to one role's agent loop;
        // they differ only in the task text handed to that agent, not in
        // how the executor dispatches them.
        WorkflowStep::Select { role, criteria } => leaf(
            "select",
            Operation::DispatchAgentLoop {
                role: role.clone(),
                task: format!("Select an approach: {criteria}"),
                input: Some(serde_json::json!({ "criteria": criteria })),
            },
        ),
        WorkflowStep::Review { reviewer, subject } => leaf(
            "review",
            Operation::DispatchAgentLoop {
                role: reviewer.clone(),
                task: format!("Review: {subject}"),
                input: Some(serde_json::json!({ "subject": subject })),
            },
        ),
        WorkflowStep::Approve { approver, subject } => leaf(
            "approve",
            Operation::DispatchAgentLoop {
                role: approver.clone(),
                task: format!("Approve: {subject}"),
                input: Some(serde_json::json!({ "subject": subject })),
            },
        ),
        WorkflowStep::Aggregate { method, sources } => {
            let source_step_ids = match sources {
                Some(explicit) if !explicit.is_empty() => explicit.clone(),
                _ => preceding_siblings.to_vec(),
            };
            aggregate_refs.extend(source_step_ids.iter().cloned());
            leaf(
                "aggregate",
                Operation::AggregateResults {
                    method: method.clone(),
                    source_step_ids,
                },
            )
        }
        WorkflowStep::Condition { check, then, r#else } => {
            let then_branch = Some(Box::new(compile_step(
                then,
                format!("{step_id}_then"),
                &[],
                empty_containers,
                aggregate_refs,
            )));
            let else_branch = r#else.as_ref().map(|e| {
                Box::new(compile_step(
                    e,
                    format!("{step_id}_else"),
                    &[],
                    empty_containers,
                    aggregate_refs,
                ))
            });
            StepPlan {
                step_id: step_id.clone(),
                tag: "condition".to_string(),
                operation: Operation::EvaluateCondition { check: check.clone() },
                then_branch,
                else_branch,
                children: vec![],
                container_kind: None,
            }
        }
        WorkflowStep::Wait { condition, timeout } => leaf(
            "wait",
            Operation::AwaitEvent {
                pattern: condition.clone().unwrap_or_else(|| "*".to_string()),
                timeout: *timeout,
            },
        ),
        WorkflowStep::Parallel { steps } => {
            if steps.is_empty() {
                empty_containers.insert(step_id.clone());
            }
            let children = compile_siblings(steps, Some(&step_id), empty_containers, aggregate_refs);
            StepPlan {
                step_id: step_id.clone(),
                tag: "parallel".to_string(),
                operation: Operation::Noop,
                then_branch: None,
                else_branch: None,
                children,
                container_kind: Some(ContainerKind::Parallel),
            }
        }
        WorkflowStep::Sequential { steps } => {
            if steps.is_empty() {
                empty_containers.insert(step_id.clone());
            }
            let children = compile_siblings(steps, Some(&step_id), empty_containers, aggregate_refs);
            StepPlan {
                step_id: step_id.clone(),
                tag: "sequential".to_string(),
                operation: Operation::Noop,
                then_branch: None,
                else_branch: None,
                children,
                container_kind: Some(ContainerKind::Sequential),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet as Set;
    use team_types::{EscalationConfig, Role};

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

    fn base_pattern(workflow: Vec<WorkflowStep>) -> OrgPattern {
        OrgPattern {
            name: "review-loop".into(),
            version: "1.0.0".into(),
            roles: vec![role("lead", None), role("engineer", Some("lead"))],
            routing: vec![],
            escalation: EscalationConfig::default(),
            workflow,
        }
    }

    #[test]
    fn assigns_deterministic_step_ids() {
        let pattern = base_pattern(vec![
            WorkflowStep::Assign { role: "engineer".into(), task: "t1".into(), timeout: None },
            WorkflowStep::Sequential {
                steps: vec![
                    WorkflowStep::Assign { role: "engineer".into(), task: "t2".into(), timeout: None },
                    WorkflowStep::Assign { role: "engineer".into(), task: "t3".into(), timeout: None },
                ],
            },
        ]);

        let plan_a = compile(&pattern).unwrap();
        let plan_b = compile(&pattern).unwrap();
        assert_eq!(plan_a, plan_b);

        assert_eq!(plan_a.steps[0].step_id, "step_0");
        assert_eq!(plan_a.steps[1].step_id, "step_1");
        assert_eq!(plan_a.steps[1].children[0].step_id, "step_1_0");
        assert_eq!(plan_a.steps[1].children[1].step_id, "step_1_1");
    }

    #[test]
    fn select_review_approve_map_to_dispatch_agent_loop() {
        let pattern = base_pattern(vec![
            WorkflowStep::Select { role: "engineer".into(), criteria: "fastest".into() },
            WorkflowStep::Review { reviewer: "lead".into(), subject: "step_0".into() },
            WorkflowStep::Approve { approver: "lead".into(), subject: "step_1".into() },
        ]);
        let plan = compile(&pattern).unwrap();
        for step in &plan.steps {
            assert!(matches!(step.operation, Operation::DispatchAgentLoop { .. }));
        }
    }

    #[test]
    fn aggregate_with_no_sources_resolves_to_preceding_siblings() {
        let pattern = base_pattern(vec![
            WorkflowStep::Assign { role: "engineer".into(), task: "t1".into(), timeout: None },
            WorkflowStep::Assign { role: "engineer".into(), task: "t2".into(), timeout: None },
            WorkflowStep::Aggregate { method: "summarize".into(), sources: None },
        ]);
        let plan = compile(&pattern).unwrap();
        match &plan.steps[2].operation {
            Operation::AggregateResults { source_step_ids, .. } => {
                assert_eq!(source_step_ids, &vec!["step_0".to_string(), "step_1".to_string()]);
            }
            other => panic!("expected AggregateResults, got {other:?}"),
        }
    }

    #[test]
    fn condition_branches_compile_with_suffixed_ids() {
        let pattern = base_pattern(vec![WorkflowStep::Condition {
            check: "tests pass".into(),
            then: Box::new(WorkflowStep::Assign { role: "engineer".into(), task: "ship".into(), timeout: None }),
            r#else: Some(Box::new(WorkflowStep::Assign { role: "engineer".into(), task: "fix".into(), timeout: None })),
        }]);
        let plan = compile(&pattern).unwrap();
        let then_branch = plan.steps[0].then_branch.as_ref().unwrap();
        let else_branch = plan.steps[0].else_branch.as_ref().unwrap();
        assert_eq!(then_branch.step_id, "step_0_then");
        assert_eq!(else_branch.step_id, "step_0_else");
    }

    #[test]
    fn empty_container_referenced_by_aggregate_is_rejected() {
        let pattern = base_pattern(vec![
            WorkflowStep::Sequential { steps: vec![] },
            WorkflowStep::Aggregate { method: "summarize".into(), sources: Some(vec!["step_0".into()]) },
        ]);
        assert!(matches!(
            compile(&pattern),
            Err(PatternValidationError::EmptyReferencedContainer)
        ));
    }

    #[test]
    fn unknown_step_role_fails_through_pattern_validation() {
        let pattern = base_pattern(vec![WorkflowStep::Assign {
            role: "ghost".into(),
            task: "t".into(),
            timeout: None,
        }]);
        assert!(matches!(
            compile(&pattern),
            Err(PatternValidationError::UnknownStepRole(_))
        ));
    }

    #[test]
    fn role_table_is_copied_verbatim_in_order() {
        let pattern = base_pattern(vec![]);
        let plan = compile(&pattern).unwrap();
        assert_eq!(plan.roles.iter().map(|r| r.id.clone()).collect::<Vec<_>>(), vec!["lead", "engineer"]);
    }
}
