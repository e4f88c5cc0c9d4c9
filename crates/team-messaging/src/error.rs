//! Error type for Messaging Bus operations.

use team_types::ids::AgentId;

/// Errors raised resolving or delivering a [`team_types::TeamMessage`].
#[derive(Debug, thiserror::Error)]
pub enum MessagingError {
    /// `to` did not resolve to an agent id or a known role in the deployment.
    #[error("message target {0:?} not found in deployment")]
    TargetNotFound(String),

    /// `from` did not name a live agent of the deployment.
    #[error("sending agent {0} not found in deployment")]
    SenderNotFound(AgentId),

    /// `validateRouting(from, to)` failed.
    #[error("routing from {from} to {to} is not permitted by the org pattern")]
    RoutingRejected {
        /// Sender role or `"system"`.
        from: String,
        /// Receiver role.
        to: String,
    },

    /// Underlying store failure.
    #[error(transparent)]
    Store(#[from] team_store::StoreError),

    /// Underlying session manager failure.
    #[error(transparent)]
    Session(#[from] team_session::SessionError),

    /// The message body failed validation (length bounds).
    #[error("{0}")]
    Validation(team_types::ValidationError),
}

/// Result alias used throughout this crate.
pub type MessagingResult<T> = std::result::Result<T, MessagingError>;
