//! Error types for the Graph client

use subscription_broker::RemoteError;
use thiserror::Error;

/// Errors that can occur while talking to Microsoft Graph
#[derive(Debug, Error)]
pub enum GraphError {
    /// The request never produced a response
    #[error("Network/HTTP error: {0}")]
    Network(String),

    /// The identity platform refused to issue a token
    #[error("Token request failed: {0}")]
    Token(String),

    /// Graph answered with a non-success status
    #[error("Graph API error {status}: {message}")]
    Status {
        status: u16,
        message: String,
        retry_after: Option<u64>,
    },

    /// The response body could not be decoded
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Invalid client configuration
    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<reqwest::Error> for GraphError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            GraphError::InvalidResponse(e.to_string())
        } else {
            GraphError::Network(e.to_string())
        }
    }
}

impl From<GraphError> for RemoteError {
    fn from(e: GraphError) -> Self {
        match e {
            GraphError::Network(message) | GraphError::Config(message) => {
                RemoteError::Network(message)
            }
            GraphError::Token(message) => RemoteError::Unauthorized(message),
            GraphError::Status {
                status: 401 | 403,
                message,
                ..
            } => RemoteError::Unauthorized(message),
            GraphError::Status {
                status: 429,
                retry_after,
                ..
            } => RemoteError::Throttled {
                retry_after_secs: retry_after,
            },
            GraphError::Status { status, message, .. } => RemoteError::Api { status, message },
            GraphError::InvalidResponse(message) => RemoteError::InvalidResponse(message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(status: u16, retry_after: Option<u64>) -> GraphError {
        GraphError::Status {
            status,
            message: "boom".to_string(),
            retry_after,
        }
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            RemoteError::from(status(401, None)),
            RemoteError::Unauthorized("boom".to_string())
        );
        assert_eq!(
            RemoteError::from(status(403, None)),
            RemoteError::Unauthorized("boom".to_string())
        );
        assert_eq!(
            RemoteError::from(status(429, Some(12))),
            RemoteError::Throttled {
                retry_after_secs: Some(12)
            }
        );
        assert_eq!(
            RemoteError::from(status(404, None)),
            RemoteError::Api {
                status: 404,
                message: "boom".to_string()
            }
        );
    }

    #[test]
    fn test_token_and_decode_mapping() {
        assert!(matches!(
            RemoteError::from(GraphError::Token("invalid_client".to_string())),
            RemoteError::Unauthorized(_)
        ));
        assert!(matches!(
            RemoteError::from(GraphError::InvalidResponse("eof".to_string())),
            RemoteError::InvalidResponse(_)
        ));
    }

    #[test]
    fn test_display() {
        assert_eq!(status(500, None).to_string(), "Graph API error 500: boom");
    }
}
