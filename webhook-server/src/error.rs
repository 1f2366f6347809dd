//! Error types for the webhook server

use std::net::SocketAddr;

/// Errors from starting or stopping the HTTP server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// The listening socket could not be bound
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: warp::Error,
    },

    /// The server task panicked or was aborted
    #[error("Server task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Convenience type alias for Results using ServerError.
pub type Result<T> = std::result::Result<T, ServerError>;
