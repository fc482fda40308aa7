//! Commonly used types for building servers
//!
//! ```rust
//! use turul_rpc_server::prelude::*;
//! ```

pub use crate::{AuthConfig, AuthManager, RpcServer, RpcServerBuilder, ServerConfig, ServerError};
pub use turul_rpc_json_rpc::{
    Capability, CapabilitySet, Dispatched, HandlerError, Middleware, Next, Notification,
    NotificationHandler, Request, RequestId, Response, Router, RpcErrorCode, RpcErrorObject,
    RpcHandler, SessionContext, StreamHandler, handler_fn, notification_fn, stream_fn,
};
