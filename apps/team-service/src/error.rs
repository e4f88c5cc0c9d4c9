//! Maps every collaborator's error type onto the HTTP status taxonomy
//! (spec.md §7): validation → 400, not-found/workspace-mismatch → 404,
//! forbidden → 403, optimistic-lock exhausted → 409, everything else → 500.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

/// Errors surfaced by an HTTP handler.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    /// Malformed request body or invalid field value.
    #[error("{0}")]
    BadRequest(String),

    /// Resource does not exist, or exists in a workspace other than the
    /// caller's — the two are made indistinguishable on purpose.
    #[error("{0}")]
    NotFound(String),

    /// Caller is authenticated but not permitted to perform this action.
    #[error("{0}")]
    Forbidden(String),

    /// A store write lost the optimistic-concurrency race after exhausting
    /// its internal retries.
    #[error("{0}")]
    Conflict(String),

    /// Capability token missing, malformed, or expired.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Deployment Store failure.
    #[error(transparent)]
    Store(#[from] team_store::StoreError),

    /// Workflow Executor failure.
    #[error(transparent)]
    Executor(#[from] team_workflow::ExecutorError),

    /// Messaging Bus failure.
    #[error(transparent)]
    Messaging(#[from] team_messaging::MessagingError),

    /// Agent Session Manager failure.
    #[error(transparent)]
    Session(#[from] team_session::SessionError),

    /// Org pattern failed structural validation.
    #[error(transparent)]
    Pattern(#[from] team_types::pattern::PatternValidationError),

    /// Catch-all for unexpected internal failures.
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl ServiceError {
    fn status(&self) -> StatusCode {
        use team_messaging::MessagingError;
        use team_store::StoreError;
        match self {
            ServiceError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ServiceError::NotFound(_) => StatusCode::NOT_FOUND,
            ServiceError::Forbidden(_) => StatusCode::FORBIDDEN,
            ServiceError::Conflict(_) => StatusCode::CONFLICT,
            ServiceError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ServiceError::Store(StoreError::DeploymentNotFound(_))
            | ServiceError::Store(StoreError::AgentNotFound(_))
            | ServiceError::Store(StoreError::TemplateNotFound(_)) => StatusCode::NOT_FOUND,
            ServiceError::Store(StoreError::ImmutableTemplate(_)) => StatusCode::FORBIDDEN,
            ServiceError::Store(StoreError::OptimisticLockFailed(..)) => StatusCode::CONFLICT,
            ServiceError::Store(StoreError::InvalidConfig(_))
            | ServiceError::Store(StoreError::Validation(_)) => StatusCode::BAD_REQUEST,
            ServiceError::Executor(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ServiceError::Messaging(MessagingError::TargetNotFound(_))
            | ServiceError::Messaging(MessagingError::SenderNotFound(_)) => StatusCode::NOT_FOUND,
            ServiceError::Messaging(MessagingError::RoutingRejected { .. }) => StatusCode::FORBIDDEN,
            ServiceError::Messaging(MessagingError::Validation(_)) => StatusCode::BAD_REQUEST,
            ServiceError::Messaging(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ServiceError::Session(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ServiceError::Pattern(_) => StatusCode::BAD_REQUEST,
            ServiceError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status();
        match status {
            StatusCode::BAD_REQUEST | StatusCode::FORBIDDEN => tracing::warn!(error = %self, "rejected request"),
            StatusCode::INTERNAL_SERVER_ERROR => tracing::error!(error = %self, "internal failure"),
            _ => tracing::info!(error = %self, "request failed"),
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

/// Result alias used by every HTTP handler.
pub type ServiceResult<T> = Result<T, ServiceError>;
