use std::net::SocketAddr;

use thiserror::Error;
use turul_rpc_connection::ConnectionError;

use crate::auth::AuthError;

/// Result type for server operations
pub type ServerResult<T> = Result<T, ServerError>;

/// Server-level errors
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Authentication error: {0}")]
    Auth(#[from] AuthError),

    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Server is already running on {0}")]
    AlreadyRunning(SocketAddr),

    #[error("Server is not running")]
    NotRunning,
}
