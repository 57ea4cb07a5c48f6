use std::time::Duration;

use thiserror::Error;

/// Client-level error type.
/// Every fallible operation in the library returns `Result<T, ClientError>`;
/// the dashboard flattens it into a single user-visible string.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Validation error: {0}")]
    Validation(String),

    /// HTTP 404. During polling this means "job not visible yet".
    #[error("Not found: {url}")]
    NotFound { url: String },

    #[error("Request failed (status {status}): {message}")]
    Request { status: u16, message: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Evaluation timed out after {}s", .elapsed.as_secs())]
    Timeout { elapsed: Duration },

    #[error("No active session")]
    SessionMissing,

    #[error("Session store error: {0}")]
    Store(String),
}

impl ClientError {
    /// Soft-retry signal: the resource may appear on a later attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ClientError::NotFound { .. })
    }

    /// Stable machine-readable code, mirrored in log lines.
    pub fn code(&self) -> &'static str {
        match self {
            ClientError::Validation(_) => "VALIDATION_ERROR",
            ClientError::NotFound { .. } => "NOT_FOUND",
            ClientError::Request { .. } => "REQUEST_ERROR",
            ClientError::Http(_) => "HTTP_ERROR",
            ClientError::Parse(_) => "PARSE_ERROR",
            ClientError::Timeout { .. } => "TIMEOUT",
            ClientError::SessionMissing => "SESSION_MISSING",
            ClientError::Store(_) => "STORE_ERROR",
        }
    }

    /// The message shown to the user for this failure.
    pub fn user_message(&self) -> String {
        match self {
            ClientError::Validation(msg) => msg.clone(),
            ClientError::NotFound { .. } => "Resource not found".to_string(),
            ClientError::Request { message, .. } => message.clone(),
            ClientError::Http(e) => {
                tracing::error!("HTTP transport error: {e}");
                "Could not reach the evaluation service".to_string()
            }
            ClientError::Parse(e) => {
                tracing::error!("Malformed response body: {e}");
                "The evaluation service returned an unexpected response".to_string()
            }
            ClientError::Timeout { .. } => {
                "Evaluation timed out. Please try again later.".to_string()
            }
            ClientError::SessionMissing => "Please log in to continue".to_string(),
            ClientError::Store(msg) => {
                tracing::error!("Session store error: {msg}");
                "Could not access saved session".to_string()
            }
        }
    }
}

pub type ClientResult<T> = Result<T, ClientError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_not_found_is_retryable() {
        let nf = ClientError::NotFound {
            url: "http://x/result/1".to_string(),
        };
        assert!(nf.is_retryable());
        assert!(!ClientError::Request {
            status: 500,
            message: "boom".to_string()
        }
        .is_retryable());
        assert!(!ClientError::Timeout {
            elapsed: Duration::from_secs(91)
        }
        .is_retryable());
    }

    #[test]
    fn test_request_user_message_is_server_message() {
        let err = ClientError::Request {
            status: 422,
            message: "cv_file_id is invalid".to_string(),
        };
        assert_eq!(err.user_message(), "cv_file_id is invalid");
        assert_eq!(err.code(), "REQUEST_ERROR");
    }

    #[test]
    fn test_timeout_message_is_distinct() {
        let err = ClientError::Timeout {
            elapsed: Duration::from_secs(92),
        };
        assert!(err.user_message().contains("timed out"));
        assert_eq!(err.to_string(), "Evaluation timed out after 92s");
    }
}
