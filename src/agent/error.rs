//! Error types for the agent backend and run orchestration.

use std::time::Duration;

use thiserror::Error;

use crate::agent::ids::{ConversationId, RunId};

/// Errors raised while talking to the agent backend or driving a run.
#[derive(Debug, Error)]
pub enum AgentError {
    /// A required endpoint or identifier is missing.
    #[error("agent backend is not configured: {0}")]
    Unconfigured(String),

    /// The backend could not be reached or refused the credentials.
    #[error("agent backend unavailable: {0}")]
    BackendUnavailable(String),

    /// HTTP request failed.
    #[error("HTTP request failed: {0}")]
    HttpRequest(#[from] reqwest::Error),

    /// The backend answered with a non-success status.
    #[error("agent backend returned status {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body, truncated.
        body: String,
    },

    /// URL construction error.
    #[error("invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// JSON encoding or decoding error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The backend answered with something this crate cannot interpret.
    #[error("unexpected backend response: {0}")]
    InvalidResponse(String),

    /// The run exceeded its wall-clock deadline and was cancelled.
    #[error("run {run_id} timed out after {elapsed:?}")]
    RunTimedOut {
        /// Run that was cancelled.
        run_id: RunId,
        /// Time spent before giving up.
        elapsed: Duration,
    },

    /// The run reached a terminal status other than completed.
    #[error("run failed: {0}")]
    RunFailed(String),

    /// One round of pending-action handling failed.
    #[error("pending action handling failed: {0}")]
    TransientAction(String),

    /// The conversation id is the "not usable" sentinel.
    #[error("conversation {0} is not usable")]
    UnusableConversation(ConversationId),
}

impl AgentError {
    /// Check if retrying the same call could succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::HttpRequest(err) => err.is_timeout() || err.is_connect() || err.is_request(),
            Self::Status { status, .. } => *status == 429 || *status >= 500,
            Self::BackendUnavailable(_) | Self::TransientAction(_) => true,
            _ => false,
        }
    }

    /// Whether the error means the backend could not be reached at all.
    #[must_use]
    pub const fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::BackendUnavailable(_)
                | Self::HttpRequest(_)
                | Self::Status { .. }
                | Self::InvalidUrl(_)
                | Self::Json(_)
                | Self::InvalidResponse(_)
        )
    }

    /// Collapse transport-level detail into `BackendUnavailable`.
    ///
    /// Public coordinator operations return this form so callers never see a
    /// raw `reqwest` or `serde_json` error.
    #[must_use]
    pub fn into_public(self) -> Self {
        if self.is_transport() && !matches!(self, Self::BackendUnavailable(_)) {
            Self::BackendUnavailable(self.to_string())
        } else {
            self
        }
    }

    /// Message suitable for showing to an end user.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::Unconfigured(_) => "The assistant is not configured yet. Set ATELIER_ENDPOINT and \
                 ATELIER_WORKER_ID to enable it."
                .to_string(),
            Self::UnusableConversation(_) => {
                "This conversation is not available because the assistant is not configured."
                    .to_string()
            }
            Self::RunTimedOut { .. } => {
                "The assistant took too long to respond. Please try again.".to_string()
            }
            Self::RunFailed(reason) => {
                format!("The assistant could not complete your request: {reason}")
            }
            Self::TransientAction(_) => {
                "The assistant had trouble running a tool. Please try again.".to_string()
            }
            Self::BackendUnavailable(_)
            | Self::HttpRequest(_)
            | Self::Status { .. }
            | Self::InvalidUrl(_)
            | Self::Json(_)
            | Self::InvalidResponse(_) => {
                "The assistant service is unreachable right now. Please try again shortly."
                    .to_string()
            }
        }
    }
}

/// Convenience result alias for agent operations.
pub type AgentResult<T> = Result<T, AgentError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_errors_are_retryable() {
        let err = AgentError::Status {
            status: 503,
            body: "busy".to_string(),
        };
        assert!(err.is_retryable());

        let err = AgentError::Status {
            status: 404,
            body: "missing".to_string(),
        };
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_transport_errors_become_backend_unavailable() {
        let err = AgentError::InvalidResponse("no id".to_string()).into_public();
        assert!(matches!(err, AgentError::BackendUnavailable(_)));

        let err = AgentError::RunFailed("quota".to_string()).into_public();
        assert!(matches!(err, AgentError::RunFailed(_)));
    }

    #[test]
    fn test_timeout_message_asks_to_retry() {
        let err = AgentError::RunTimedOut {
            run_id: RunId::new("run_1"),
            elapsed: Duration::from_secs(120),
        };
        assert!(err.user_message().contains("try again"));
    }
}
