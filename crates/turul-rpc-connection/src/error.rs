use std::time::Duration;

use thiserror::Error;
use tokio_util::codec::LinesCodecError;
use turul_rpc_json_rpc::{CodecError, RequestId};

use crate::state::ConnectionState;

/// Result type for connection operations
pub type ConnectionResult<T> = Result<T, ConnectionError>;

/// Errors raised by a [`Connection`](crate::Connection)
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// The connection closed while the operation was outstanding
    #[error("Connection closed")]
    Closed,

    #[error("Request timeout: {id} after {timeout:?}")]
    RequestTimeout { id: RequestId, timeout: Duration },

    #[error("Request id {0} is already pending")]
    DuplicateRequestId(RequestId),

    #[error("Invalid state transition from {from} to {to}")]
    InvalidTransition {
        from: ConnectionState,
        to: ConnectionState,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Framing error: {0}")]
    Framing(#[from] LinesCodecError),
}

impl ConnectionError {
    /// True when the failure came from the transport rather than the peer's answer
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Closed | Self::Io(_) | Self::Framing(_))
    }
}
