//! Error type for Agent Session Manager operations.

/// Errors raised by [`crate::SessionManager`] operations.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// No live session with this id.
    #[error("session {0} not found")]
    NotFound(String),

    /// A scratch-directory id failed the path-safety check.
    #[error("invalid path-safe id: {0}")]
    InvalidId(String),

    /// The resolved scratch path escaped the configured base directory.
    #[error("scratch path for deployment {0} agent {1} escapes base directory")]
    PathEscape(String, String),

    /// Failed to open or configure the PTY.
    #[error("failed to open pty: {0}")]
    PtyOpen(String),

    /// Failed to spawn the subprocess inside the PTY.
    #[error("failed to spawn agent subprocess: {0}")]
    Spawn(String),

    /// Writing to the session's stdin failed.
    #[error("failed to write to session {0}: {1}")]
    Write(String, String),

    /// Waiting for the session to reach quiescence timed out.
    #[error("session {0} did not become ready within {1:?}")]
    ReadyTimeout(String, std::time::Duration),

    /// Filesystem error ensuring/removing a scratch directory.
    #[error("scratch directory io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for Agent Session Manager operations.
pub type SessionResult<T> = std::result::Result<T, SessionError>;
