#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **team-types** – Shared data model for the team runtime orchestrator.
//!
//! The crate is dependency-light and sits at the bottom of the crate graph
//! so every other crate can depend on it without causing cycles. It makes no
//! assumptions about I/O, storage, or subprocess handling — those live in
//! `team-store` and `team-session` respectively.

use serde::{Deserialize, Serialize};

//─────────────────────────────
//  Security constants
//─────────────────────────────

/// Maximum length for a task/step description or instruction string.
pub const MAX_TASK_TEXT_LEN: usize = 8192;
/// Maximum length for a role, agent, or template name.
pub const MAX_NAME_LEN: usize = 256;
/// Maximum length for a single inter-agent message.
pub const MAX_MESSAGE_LEN: usize = 65_536;
/// Maximum length for a capability string (`resource.operation`, `resource.*`, `*`).
pub const MAX_CAPABILITY_LEN: usize = 256;
/// Maximum number of run logs retained per deployment.
pub const MAX_RUN_LOGS: usize = 200;
/// Maximum number of messages retained per deployment.
pub const MAX_MESSAGES: usize = 500;

pub mod ids;
pub mod pattern;
pub mod plan;
pub mod template;
pub mod deployment;
pub mod agent;
pub mod workflow;
pub mod message;
pub mod runlog;

pub use ids::{AgentId, DeploymentId, SpaceId, TemplateId, UserId, WorkspaceId};
pub use pattern::{EscalationConfig, OrgPattern, Role, RoutingRule, WorkflowStep};
pub use plan::{ExecutionPlan, Operation, StepPlan};
pub use template::{Template, TemplateKind};
pub use deployment::{Deployment, DeploymentStatus};
pub use agent::{Agent, AgentStatus};
pub use workflow::{StepState, StepStatus, WorkflowPhase, WorkflowState};
pub use message::TeamMessage;
pub use runlog::{ActionRecord, RunLog};

/// A validation error shared by every validated constructor in this crate.
///
/// Mirrors the teacher's `new() -> Result<Self, String>` convention: the
/// error is a plain string because validation failures are surfaced to
/// callers as-is (HTTP 400 bodies, CLI diagnostics) rather than matched on.
pub type ValidationError = String;

/// Check that `s` is non-empty (after trimming) and no longer than `max`.
pub(crate) fn validate_bounded_text(s: &str, field: &str, max: usize) -> Result<(), ValidationError> {
    if s.trim().is_empty() {
        return Err(format!("{field} cannot be empty"));
    }
    if s.len() > max {
        return Err(format!("{field} too long: {} > {max}", s.len()));
    }
    Ok(())
}

/// Check that `s` matches `[A-Za-z0-9-]+`, used for any identifier that is
/// interpolated into a filesystem path (scratch directories, §4.3/§6).
pub fn validate_path_safe_id(s: &str, field: &str) -> Result<(), ValidationError> {
    if s.is_empty() || !s.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
        return Err(format!("{field} must match [A-Za-z0-9-]+, got {s:?}"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounded_text_rejects_empty_and_overlong() {
        assert!(validate_bounded_text("", "x", 10).is_err());
        assert!(validate_bounded_text("   ", "x", 10).is_err());
        assert!(validate_bounded_text(&"a".repeat(11), "x", 10).is_err());
        assert!(validate_bounded_text("ok", "x", 10).is_ok());
    }

    #[test]
    fn path_safe_id_rejects_traversal() {
        assert!(validate_path_safe_id("../etc", "agentId").is_err());
        assert!(validate_path_safe_id("agent/1", "agentId").is_err());
        assert!(validate_path_safe_id("agent-1", "agentId").is_ok());
    }
}
