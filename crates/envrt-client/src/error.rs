//! Client error types

use envrt_core::SchemaError;
use std::time::Duration;
use thiserror::Error;

/// Result type for client operations
pub type Result<T> = std::result::Result<T, ClientError>;

/// Errors surfaced by envrt clients
#[derive(Debug, Error)]
pub enum ClientError {
    /// Connection, I/O or network failure
    #[error("Transport error: {0}")]
    Transport(String),

    /// Server answered with an error status or error frame
    #[error("Server error {status} ({code}): {message}")]
    Server {
        /// HTTP status, `0` for WebSocket error frames
        status: u16,
        code: String,
        message: String,
    },

    /// JSON-RPC error response
    #[error("JSON-RPC error [{code}]: {message}")]
    Rpc { code: i32, message: String },

    /// Response did not have the expected shape
    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error(transparent)]
    Schema(#[from] SchemaError),

    /// Call exceeded its deadline; the late result is discarded
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    /// Client was closed
    #[error("Client is closed")]
    Closed,

    /// Provider failed to start or stop a server
    #[error("Provider error: {0}")]
    Provider(String),
}

impl ClientError {
    /// Worth retrying: network failures, timeouts, overload and 5xx
    pub fn is_transient(&self) -> bool {
        match self {
            ClientError::Transport(_) | ClientError::Timeout(_) => true,
            ClientError::Server { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }

    /// Server rejected a new session because it is full
    pub fn is_capacity(&self) -> bool {
        matches!(self, ClientError::Server { code, .. } if code == "session_capacity")
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        ClientError::Transport(err.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for ClientError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        ClientError::Transport(err.to_string())
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(err: serde_json::Error) -> Self {
        ClientError::Protocol(err.to_string())
    }
}
