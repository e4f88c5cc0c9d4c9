//! Error type for Anomaly Coordinator operations.

/// Errors raised handling a PTY lifecycle event or driving the auth flow.
#[derive(Debug, thiserror::Error)]
pub enum AnomalyError {
    /// The session id carried by the event has no known owning agent
    /// (already stopped and reaped between event publish and handling).
    #[error("no owning agent for session {0}")]
    UnknownSession(String),

    /// Underlying store failure.
    #[error(transparent)]
    Store(#[from] team_store::StoreError),

    /// Underlying session manager failure.
    #[error(transparent)]
    Session(#[from] team_session::SessionError),

    /// Underlying messaging bus failure.
    #[error(transparent)]
    Messaging(#[from] team_messaging::MessagingError),

    /// Underlying workflow executor failure.
    #[error(transparent)]
    Executor(#[from] team_workflow::ExecutorError),
}

/// Result alias used throughout this crate.
pub type AnomalyResult<T> = std::result::Result<T, AnomalyError>;
