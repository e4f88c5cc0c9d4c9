#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **team-anomaly** – Anomaly Coordinator for the team runtime
//! orchestrator (spec.md §4.6).
//!
//! Subscribes to the PTY lifecycle events [`team_session::SessionManager`]
//! publishes on [`team_bus::EventBus`] and reacts: delivering pending
//! messages into a blocked session, advancing or failing workflow steps,
//! auto-pausing a deployment whose every agent is stuck, and coordinating
//! the shared authentication flow so only one agent per `(deploymentId,
//! agentType)` drives login at a time.

pub mod auth;
pub mod coordinator;
pub mod error;
pub mod escalation;

pub use auth::{AuthFlow, AuthFlowRegistry, RegisterOutcome};
pub use coordinator::AnomalyCoordinator;
pub use error::{AnomalyError, AnomalyResult};
pub use escalation::{CoordinatorResponseService, EscalationOutcome, InFlightGuard, MainBrainEscalation};
