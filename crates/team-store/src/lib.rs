#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! The Deployment Store: a repository for deployments, templates, agents,
//! workflow state, messages and run logs.
//!
//! [`DeploymentStore`] is the trait boundary every higher-level crate talks
//! to; [`InMemoryStore`] is the one implementation shipped here, backed by
//! [`dashmap::DashMap`] the way `toka-orchestration` keeps its spawned-agent
//! registry. A durable backend (sqlx/sqlite, as elsewhere in the wider
//! workspace) can be added later behind the same trait.

mod error;
mod memory;

pub use error::StoreError;
pub use memory::InMemoryStore;

use async_trait::async_trait;
use team_types::{
    Agent, AgentId, Deployment, DeploymentId, RunLog, SpaceId, TeamMessage, Template, TemplateId,
    WorkflowState, WorkspaceId,
};

/// Result alias used throughout this crate.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Optional filters accepted by [`DeploymentStore::list_deployments`].
#[derive(Debug, Clone, Default)]
pub struct DeploymentFilter {
    /// Restrict to a specific space.
    pub space_id: Option<SpaceId>,
    /// Restrict to deployments created from this template name.
    pub template_name: Option<String>,
}

/// Repository of all persisted orchestrator state.
///
/// Every method is scoped by `workspace_id` where applicable; looking up a
/// row that exists but belongs to a different workspace must behave exactly
/// like the row not existing ([`StoreError::NotFound`]), never leak it.
#[async_trait]
pub trait DeploymentStore: Send + Sync {
    /// Persist a brand-new deployment.
    async fn create_deployment(&self, deployment: Deployment) -> StoreResult<()>;

    /// Fetch a deployment, scoped to `workspace_id`.
    async fn find_deployment(
        &self,
        workspace_id: WorkspaceId,
        id: DeploymentId,
    ) -> StoreResult<Deployment>;

    /// List deployments visible to `workspace_id`, optionally filtered.
    async fn list_deployments(
        &self,
        workspace_id: WorkspaceId,
        filter: DeploymentFilter,
    ) -> StoreResult<Vec<Deployment>>;

    /// Overwrite an existing deployment's record wholesale (status, config,
    /// messages, run logs — everything but `workflowState`, which goes
    /// through [`Self::update_workflow_state`] for optimistic concurrency).
    async fn update_deployment(
        &self,
        workspace_id: WorkspaceId,
        deployment: Deployment,
    ) -> StoreResult<()>;

    /// Insert or replace an agent record.
    async fn upsert_agent(&self, agent: Agent) -> StoreResult<()>;

    /// Fetch a single agent by id.
    async fn find_agent(&self, id: AgentId) -> StoreResult<Agent>;

    /// List every agent belonging to a deployment.
    async fn list_agents(&self, deployment_id: DeploymentId) -> StoreResult<Vec<Agent>>;

    /// Every agent currently `Running` with a `current_step_id` set, across
    /// every deployment — the working set for the periodic stall sweep.
    async fn list_running_agents(&self) -> StoreResult<Vec<Agent>>;

    /// Atomically claim an idle agent in `role` for a deployment: succeeds
    /// only if an idle, unassigned agent in that role still exists at the
    /// moment of the update (`update-where-unassigned`).
    async fn claim_idle_agent(
        &self,
        deployment_id: DeploymentId,
        role: &str,
    ) -> StoreResult<Option<Agent>>;

    /// Current workflow state for a deployment.
    async fn get_workflow_state(&self, deployment_id: DeploymentId) -> StoreResult<WorkflowState>;

    /// Optimistic-concurrency update: succeeds only if the stored
    /// `version` still equals `expected_version`, then bumps it by one.
    async fn update_workflow_state(
        &self,
        deployment_id: DeploymentId,
        expected_version: u64,
        new_state: WorkflowState,
    ) -> StoreResult<()>;

    /// Append a run log entry, trimming to [`team_types::MAX_RUN_LOGS`]
    /// most-recent entries.
    async fn append_run_log(&self, deployment_id: DeploymentId, entry: RunLog) -> StoreResult<()>;

    /// Append a message, trimming to [`team_types::MAX_MESSAGES`]
    /// most-recent entries.
    async fn append_message(
        &self,
        deployment_id: DeploymentId,
        message: TeamMessage,
    ) -> StoreResult<()>;

    /// Read all messages currently stored for a deployment.
    async fn get_messages(&self, deployment_id: DeploymentId) -> StoreResult<Vec<TeamMessage>>;

    /// Replace the full message list (used by `readMessages` marking entries
    /// delivered/read).
    async fn set_messages(
        &self,
        deployment_id: DeploymentId,
        messages: Vec<TeamMessage>,
    ) -> StoreResult<()>;

    /// Partially merge `patch` into the deployment's `config` JSON object.
    async fn merge_config(
        &self,
        deployment_id: DeploymentId,
        patch: serde_json::Value,
    ) -> StoreResult<serde_json::Value>;

    /// Persist a new or updated template.
    async fn upsert_template(&self, template: Template) -> StoreResult<()>;

    /// Fetch a template by id.
    async fn find_template(&self, id: TemplateId) -> StoreResult<Template>;

    /// List templates visible in a workspace (system templates plus any
    /// custom templates owned by it).
    async fn list_templates(&self, workspace_id: WorkspaceId) -> StoreResult<Vec<Template>>;

    /// Delete a custom template; system templates cannot be deleted.
    async fn delete_template(&self, id: TemplateId) -> StoreResult<()>;
}
