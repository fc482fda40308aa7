//! Error types for RPC client operations

use serde_json::Value;
use std::time::Duration;
use thiserror::Error;
use tokio_util::codec::LinesCodecError;
use turul_rpc_connection::ConnectionError;
use turul_rpc_json_rpc::RpcErrorObject;
use turul_rpc_json_rpc::error_codes::{
    AUTHENTICATION_FAILED, CAPABILITY_NOT_NEGOTIATED, SHUTTING_DOWN, TOO_MANY_CONNECTIONS,
};

/// Result type for RPC client operations
pub type ClientResult<T> = Result<T, ClientError>;

#[derive(Error, Debug)]
pub enum ClientError {
    /// Could not reach the server, or the socket failed
    #[error("Connection error: {0}")]
    Connection(#[from] std::io::Error),

    #[error("Connect timed out after {0:?}")]
    ConnectTimeout(Duration),

    /// The connection was closed by this client
    #[error("Connection closed")]
    ConnectionClosed,

    /// The connection dropped while the operation was outstanding
    #[error("Connection lost")]
    ConnectionLost,

    #[error("Not connected")]
    NotConnected,

    #[error("Request timed out after {0:?}")]
    RequestTimeout(Duration),

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Capability not negotiated: {0}")]
    CapabilityNotNegotiated(String),

    /// The server answered with an error object
    #[error("Server error (code {code}): {message}")]
    Rpc {
        code: i64,
        message: String,
        data: Option<Value>,
    },

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl ClientError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol(message.into())
    }

    /// Check if the operation may succeed when tried again
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Connection(_)
            | Self::ConnectTimeout(_)
            | Self::ConnectionLost
            | Self::NotConnected
            | Self::RequestTimeout(_) => true,
            Self::Rpc { code, .. } => matches!(*code, SHUTTING_DOWN | TOO_MANY_CONNECTIONS),
            _ => false,
        }
    }

    pub fn is_authentication_failure(&self) -> bool {
        matches!(self, Self::AuthenticationFailed(_))
    }

    /// JSON-RPC error code, if the failure carries one
    pub fn error_code(&self) -> Option<i64> {
        match self {
            Self::Rpc { code, .. } => Some(*code),
            Self::AuthenticationFailed(_) => Some(AUTHENTICATION_FAILED),
            Self::CapabilityNotNegotiated(_) => Some(CAPABILITY_NOT_NEGOTIATED),
            _ => None,
        }
    }
}

impl From<RpcErrorObject> for ClientError {
    fn from(error: RpcErrorObject) -> Self {
        Self::Rpc {
            code: error.code,
            message: error.message,
            data: error.data,
        }
    }
}

impl From<ConnectionError> for ClientError {
    fn from(error: ConnectionError) -> Self {
        match error {
            ConnectionError::Closed => Self::ConnectionClosed,
            ConnectionError::RequestTimeout { timeout, .. } => Self::RequestTimeout(timeout),
            ConnectionError::Io(e) => Self::Connection(e),
            ConnectionError::Framing(LinesCodecError::Io(e)) => Self::Connection(e),
            other => Self::Protocol(other.to_string()),
        }
    }
}
