//! # Turul RPC wire layer
//!
//! Transport-agnostic pieces of the Turul RPC runtime:
//!
//! - JSON-RPC 2.0 message types with string correlation ids
//! - Newline-delimited frame codec (single messages and batches)
//! - Capability tokens, negotiation and handshake payloads
//! - A [`Router`] with middleware for unary, streaming and notification handlers
//!
//! Nothing here touches a socket; see `turul-rpc-connection` for that.

pub mod capability;
pub mod codec;
pub mod error;
pub mod handler;
pub mod handshake;
pub mod message;
pub mod middleware;
pub mod router;
pub mod types;

// Re-export main types
pub use capability::{Capability, CapabilitySet};
pub use error::{CodecError, HandlerError, RpcErrorCode, RpcErrorObject};
pub use handler::{
    Dispatched, ItemStream, NotificationHandler, ResponseStream, RpcHandler, SessionContext,
    StreamHandler, handler_fn, notification_fn, stream_fn,
};
pub use handshake::{HANDSHAKE_METHOD, HandshakeReply, HandshakeRequest, PING_METHOD};
pub use message::{Frame, Message, Notification, Request, Response, ResponsePayload};
pub use middleware::{Endpoint, Middleware, MiddlewareStack, Next};
pub use router::Router;
pub use types::{JsonRpcVersion, RequestId};

/// JSON-RPC error codes used on the wire
pub mod error_codes {
    pub const PARSE_ERROR: i64 = -32700;
    pub const INVALID_REQUEST: i64 = -32600;
    pub const METHOD_NOT_FOUND: i64 = -32601;
    pub const INVALID_PARAMS: i64 = -32602;
    pub const INTERNAL_ERROR: i64 = -32603;

    /// Handshake credentials rejected
    pub const AUTHENTICATION_FAILED: i64 = -32001;
    /// Request arrived before the handshake completed
    pub const NOT_AUTHENTICATED: i64 = -32002;
    pub const CAPABILITY_NOT_NEGOTIATED: i64 = -32003;
    pub const SHUTTING_DOWN: i64 = -32004;
    pub const TOO_MANY_CONNECTIONS: i64 = -32005;
}
