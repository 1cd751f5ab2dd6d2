//! GitHub API error types.

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::http::HttpError;

use super::types::ApiErrorBody;

/// Errors surfaced by [`GitHubClient`](super::GitHubClient).
///
/// Not-modified responses and budget waits are never errors.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("HTTP transport error: {0}")]
    Transport(#[from] HttpError),

    #[error("Server error {status}: {message}")]
    Server { status: u16, message: String },

    #[error("Rate limit exceeded{}", reset_suffix(.reset))]
    RateLimited { reset: Option<DateTime<Utc>> },

    #[error("Unauthorized: {message}")]
    Unauthorized { message: String },

    #[error("Forbidden: {message}")]
    Forbidden { message: String },

    #[error("Not found or gone ({status})")]
    Gone { status: u16 },

    #[error("Request rejected with {status}: {message}")]
    Rejected { status: u16, message: String },

    #[error("Too many redirects, last location {location}")]
    TooManyRedirects { location: String },

    #[error("Failed to decode response body: {0}")]
    Decode(String),
}

fn reset_suffix(reset: &Option<DateTime<Utc>>) -> String {
    reset.map(|r| format!(". Resets at {r}")).unwrap_or_default()
}

impl ClientError {
    /// Build the error for a non-success status that is not retried.
    #[must_use]
    pub fn from_status(status: u16, body: Option<ApiErrorBody>) -> Self {
        let message = body
            .map(|b| b.message)
            .unwrap_or_else(|| format!("HTTP {status}"));
        match status {
            401 => Self::Unauthorized { message },
            403 => Self::Forbidden { message },
            404 | 410 => Self::Gone { status },
            500..=599 => Self::Server { status, message },
            _ => Self::Rejected { status, message },
        }
    }

    /// Worth retrying at the transport level with backoff.
    #[inline]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Server { .. })
    }

    /// May succeed if the whole operation is attempted again later.
    #[inline]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Transport(_) | Self::Server { .. } | Self::RateLimited { .. }
        )
    }

    #[inline]
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }
}

/// Extract a short error message suitable for display.
///
/// Takes the first line of an error message.
#[inline]
pub fn short_error_message(e: &impl std::error::Error) -> String {
    let full = e.to_string();
    full.lines().next().unwrap_or(&full).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_status_classification() {
        assert!(matches!(
            ClientError::from_status(401, None),
            ClientError::Unauthorized { .. }
        ));
        assert!(matches!(
            ClientError::from_status(403, None),
            ClientError::Forbidden { .. }
        ));
        assert!(matches!(
            ClientError::from_status(404, None),
            ClientError::Gone { status: 404 }
        ));
        assert!(matches!(
            ClientError::from_status(410, None),
            ClientError::Gone { status: 410 }
        ));
        assert!(matches!(
            ClientError::from_status(502, None),
            ClientError::Server { status: 502, .. }
        ));
        match ClientError::from_status(
            422,
            Some(ApiErrorBody {
                message: "Validation Failed".to_string(),
                documentation_url: None,
            }),
        ) {
            ClientError::Rejected { status, message } => {
                assert_eq!(status, 422);
                assert_eq!(message, "Validation Failed");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_transient_and_retryable() {
        let transport = ClientError::Transport(HttpError::Transport("reset".into()));
        assert!(transport.is_retryable());
        assert!(transport.is_transient());

        let limited = ClientError::RateLimited { reset: None };
        assert!(!limited.is_retryable());
        assert!(limited.is_transient());
        assert!(limited.is_rate_limited());

        let gone = ClientError::Gone { status: 404 };
        assert!(!gone.is_retryable());
        assert!(!gone.is_transient());
    }

    #[test]
    fn test_short_error_message_takes_first_line() {
        let err = ClientError::Decode("line one\nline two".to_string());
        assert_eq!(
            short_error_message(&err),
            "Failed to decode response body: line one"
        );
    }
}
