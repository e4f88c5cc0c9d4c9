use team_types::{AgentId, DeploymentId, TemplateId};
use thiserror::Error;

/// Errors returned by a [`crate::DeploymentStore`] implementation.
#[derive(Debug, Error)]
pub enum StoreError {
    /// No deployment with this id (or not visible to the requesting workspace).
    #[error("deployment {0} not found")]
    DeploymentNotFound(DeploymentId),

    /// No agent with this id.
    #[error("agent {0} not found")]
    AgentNotFound(AgentId),

    /// No template with this id.
    #[error("template {0} not found")]
    TemplateNotFound(TemplateId),

    /// A system template was targeted by an operation that only applies to
    /// custom templates (e.g. delete).
    #[error("system template {0} cannot be modified")]
    ImmutableTemplate(TemplateId),

    /// [`crate::DeploymentStore::update_workflow_state`] was called with a
    /// stale `expected_version`; the caller should re-read and retry.
    #[error("optimistic lock failed for deployment {0}: expected version {1}, found {2}")]
    OptimisticLockFailed(DeploymentId, u64, u64),

    /// A JSON merge/patch operation produced invalid data.
    #[error("invalid config patch: {0}")]
    InvalidConfig(String),

    /// Field-level validation failed on the value being stored.
    #[error("validation failed: {0}")]
    Validation(String),
}
