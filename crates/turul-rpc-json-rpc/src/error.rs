use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use thiserror::Error;

use crate::error_codes;

/// JSON-RPC error codes, including the application codes used by the runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RpcErrorCode {
    ParseError,
    InvalidRequest,
    MethodNotFound,
    InvalidParams,
    InternalError,
    AuthenticationFailed,
    NotAuthenticated,
    CapabilityNotNegotiated,
    ShuttingDown,
    TooManyConnections,
    ServerError(i64), // -32099 to -32000
}

impl RpcErrorCode {
    pub fn code(&self) -> i64 {
        match self {
            RpcErrorCode::ParseError => error_codes::PARSE_ERROR,
            RpcErrorCode::InvalidRequest => error_codes::INVALID_REQUEST,
            RpcErrorCode::MethodNotFound => error_codes::METHOD_NOT_FOUND,
            RpcErrorCode::InvalidParams => error_codes::INVALID_PARAMS,
            RpcErrorCode::InternalError => error_codes::INTERNAL_ERROR,
            RpcErrorCode::AuthenticationFailed => error_codes::AUTHENTICATION_FAILED,
            RpcErrorCode::NotAuthenticated => error_codes::NOT_AUTHENTICATED,
            RpcErrorCode::CapabilityNotNegotiated => error_codes::CAPABILITY_NOT_NEGOTIATED,
            RpcErrorCode::ShuttingDown => error_codes::SHUTTING_DOWN,
            RpcErrorCode::TooManyConnections => error_codes::TOO_MANY_CONNECTIONS,
            RpcErrorCode::ServerError(code) => *code,
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            RpcErrorCode::ParseError => "Parse error",
            RpcErrorCode::InvalidRequest => "Invalid Request",
            RpcErrorCode::MethodNotFound => "Method not found",
            RpcErrorCode::InvalidParams => "Invalid params",
            RpcErrorCode::InternalError => "Internal error",
            RpcErrorCode::AuthenticationFailed => "Authentication failed",
            RpcErrorCode::NotAuthenticated => "Not authenticated",
            RpcErrorCode::CapabilityNotNegotiated => "Capability not negotiated",
            RpcErrorCode::ShuttingDown => "Server shutting down",
            RpcErrorCode::TooManyConnections => "Too many connections",
            RpcErrorCode::ServerError(_) => "Server error",
        }
    }
}

impl fmt::Display for RpcErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code(), self.message())
    }
}

/// JSON-RPC error object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcErrorObject {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RpcErrorObject {
    pub fn new(code: RpcErrorCode, message: Option<String>, data: Option<Value>) -> Self {
        Self {
            code: code.code(),
            message: message.unwrap_or_else(|| code.message().to_string()),
            data,
        }
    }

    pub fn parse_error() -> Self {
        Self::new(RpcErrorCode::ParseError, None, None)
    }

    pub fn invalid_request(detail: Option<String>) -> Self {
        Self::new(RpcErrorCode::InvalidRequest, None, detail.map(Value::String))
    }

    pub fn method_not_found(method: &str) -> Self {
        Self::new(
            RpcErrorCode::MethodNotFound,
            Some(format!("Method '{}' not found", method)),
            None,
        )
    }

    pub fn invalid_params(message: &str) -> Self {
        Self::new(RpcErrorCode::InvalidParams, Some(message.to_string()), None)
    }

    /// Internal error; the detail only travels in `data` when supplied
    pub fn internal_error(detail: Option<String>) -> Self {
        Self::new(RpcErrorCode::InternalError, None, detail.map(Value::String))
    }

    pub fn authentication_failed() -> Self {
        Self::new(RpcErrorCode::AuthenticationFailed, None, None)
    }

    pub fn not_authenticated() -> Self {
        Self::new(RpcErrorCode::NotAuthenticated, None, None)
    }

    pub fn capability_not_negotiated(capability: &str) -> Self {
        Self::new(
            RpcErrorCode::CapabilityNotNegotiated,
            Some(format!("Capability '{}' not negotiated", capability)),
            None,
        )
    }

    pub fn shutting_down() -> Self {
        Self::new(RpcErrorCode::ShuttingDown, None, None)
    }

    pub fn too_many_connections() -> Self {
        Self::new(RpcErrorCode::TooManyConnections, None, None)
    }

    /// Application error in the reserved -32099..=-32000 range
    pub fn server_error(code: i64, message: &str, data: Option<Value>) -> Self {
        debug_assert!(
            (-32099..=-32000).contains(&code),
            "Server error code must be in range -32099 to -32000"
        );
        Self::new(RpcErrorCode::ServerError(code), Some(message.to_string()), data)
    }
}

impl fmt::Display for RpcErrorObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "JSON-RPC Error {}: {}", self.code, self.message)
    }
}

impl std::error::Error for RpcErrorObject {}

/// Framing and decoding failures. Neither closes the connection.
#[derive(Debug, Error)]
pub enum CodecError {
    /// The frame is not valid JSON
    #[error("JSON parse error: {0}")]
    Parse(#[from] serde_json::Error),

    /// The frame is JSON but not a JSON-RPC message
    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    #[error("Frame exceeds maximum length of {max} bytes")]
    FrameTooLong { max: usize },
}

impl CodecError {
    /// Error object sent back to the peer for this failure
    pub fn to_error_object(&self) -> RpcErrorObject {
        match self {
            CodecError::Parse(_) | CodecError::FrameTooLong { .. } => RpcErrorObject::parse_error(),
            CodecError::InvalidMessage(detail) => RpcErrorObject::invalid_request(Some(detail.clone())),
        }
    }
}

/// Errors returned by method handlers
#[derive(Debug, Error)]
pub enum HandlerError {
    /// Explicit application error, forwarded to the caller unchanged
    #[error("{0}")]
    Rpc(RpcErrorObject),

    #[error("Invalid params: {0}")]
    InvalidParams(String),

    /// Anything else; reported to the caller as a bare internal error
    #[error("{0}")]
    Internal(String),
}

impl HandlerError {
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::InvalidParams(message.into())
    }

    /// Convert to the wire error object, exposing internal details only when asked
    pub fn to_error_object(&self, expose_internal: bool) -> RpcErrorObject {
        match self {
            HandlerError::Rpc(object) => object.clone(),
            HandlerError::InvalidParams(message) => RpcErrorObject::invalid_params(message),
            HandlerError::Internal(detail) => {
                RpcErrorObject::internal_error(expose_internal.then(|| detail.clone()))
            }
        }
    }
}

impl From<RpcErrorObject> for HandlerError {
    fn from(object: RpcErrorObject) -> Self {
        Self::Rpc(object)
    }
}

impl From<serde_json::Error> for HandlerError {
    fn from(error: serde_json::Error) -> Self {
        Self::InvalidParams(error.to_string())
    }
}
