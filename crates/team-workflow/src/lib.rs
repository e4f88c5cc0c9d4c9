#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **team-workflow** – Plan Compiler and Workflow Executor for the team
//! runtime orchestrator (spec.md §4.1/§4.4).
//!
//! [`plan::compile`] turns a validated [`team_types::OrgPattern`] into a
//! flat, addressable [`team_types::ExecutionPlan`]. [`executor::WorkflowExecutor`]
//! then drives that plan forward one [`executor::Trigger`] at a time,
//! reading and writing state through [`team_store::DeploymentStore`] and
//! publishing transitions on [`team_bus::EventBus`].

pub mod executor;
pub mod plan;

pub use executor::{ExecutorError, ExecutorResult, Trigger, WorkflowExecutor};
pub use plan::compile;
