//! Handler traits and the function adapters used to register closures

use std::collections::HashMap;
use std::fmt;
use std::future::Future;

use async_trait::async_trait;
use futures::stream::{BoxStream, Stream, StreamExt, TryStreamExt};
use serde_json::Value;

use crate::capability::CapabilitySet;
use crate::error::{HandlerError, RpcErrorObject};
use crate::message::{Notification, Request, Response};
use crate::types::RequestId;

/// Session information handed to every handler and middleware
#[derive(Debug, Clone, Default)]
pub struct SessionContext {
    /// Session identifier issued at handshake
    pub session_id: String,
    /// Client the session was issued to
    pub client_id: String,
    /// Capabilities negotiated for this session
    pub capabilities: CapabilitySet,
    /// Request-scoped metadata; middleware may add entries for later stages
    pub metadata: HashMap<String, Value>,
}

impl SessionContext {
    pub fn new(
        session_id: impl Into<String>,
        client_id: impl Into<String>,
        capabilities: CapabilitySet,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            client_id: client_id.into(),
            capabilities,
            metadata: HashMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

/// Items produced by a streaming handler after error conversion
pub type ResponseStream = BoxStream<'static, Result<Value, RpcErrorObject>>;

/// Items produced by a streaming handler
pub type ItemStream = BoxStream<'static, Result<Value, HandlerError>>;

/// Result of routing one request
pub enum Dispatched {
    /// A single response
    Response(Response),
    /// A lazily produced sequence of items for a streaming request
    Stream { id: RequestId, items: ResponseStream },
}

impl Dispatched {
    /// Short-circuit with an error response
    pub fn error(id: RequestId, error: RpcErrorObject) -> Self {
        Dispatched::Response(Response::error(Some(id), error))
    }

    pub fn id(&self) -> Option<&RequestId> {
        match self {
            Dispatched::Response(response) => response.id.as_ref(),
            Dispatched::Stream { id, .. } => Some(id),
        }
    }

    /// Collapse into one response; stream items become a JSON array
    pub async fn into_response(self) -> Response {
        match self {
            Dispatched::Response(response) => response,
            Dispatched::Stream { id, items } => match items.try_collect::<Vec<Value>>().await {
                Ok(values) => Response::success(id, Value::Array(values)),
                Err(error) => Response::error(Some(id), error),
            },
        }
    }
}

impl fmt::Debug for Dispatched {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dispatched::Response(response) => f.debug_tuple("Response").field(response).finish(),
            Dispatched::Stream { id, .. } => f.debug_struct("Stream").field("id", id).finish_non_exhaustive(),
        }
    }
}

/// Handler for a unary method
#[async_trait]
pub trait RpcHandler: Send + Sync {
    async fn handle(&self, request: Request, context: SessionContext) -> Result<Value, HandlerError>;
}

/// Handler for a streaming method. Each call returns a fresh, finite sequence.
pub trait StreamHandler: Send + Sync {
    fn handle(&self, request: Request, context: SessionContext) -> ItemStream;
}

/// Handler for notifications
#[async_trait]
pub trait NotificationHandler: Send + Sync {
    async fn handle(&self, notification: Notification, context: SessionContext);
}

/// Adapter returned by [`handler_fn`]
pub struct FnHandler<F> {
    f: F,
}

/// Build a unary handler from an async closure
pub fn handler_fn<F, Fut>(f: F) -> FnHandler<F>
where
    F: Fn(Request, SessionContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, HandlerError>> + Send + 'static,
{
    FnHandler { f }
}

#[async_trait]
impl<F, Fut> RpcHandler for FnHandler<F>
where
    F: Fn(Request, SessionContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, HandlerError>> + Send + 'static,
{
    async fn handle(&self, request: Request, context: SessionContext) -> Result<Value, HandlerError> {
        (self.f)(request, context).await
    }
}

/// Adapter returned by [`stream_fn`]
pub struct FnStreamHandler<F> {
    f: F,
}

/// Build a streaming handler from a closure returning a stream
pub fn stream_fn<F, S>(f: F) -> FnStreamHandler<F>
where
    F: Fn(Request, SessionContext) -> S + Send + Sync + 'static,
    S: Stream<Item = Result<Value, HandlerError>> + Send + 'static,
{
    FnStreamHandler { f }
}

impl<F, S> StreamHandler for FnStreamHandler<F>
where
    F: Fn(Request, SessionContext) -> S + Send + Sync + 'static,
    S: Stream<Item = Result<Value, HandlerError>> + Send + 'static,
{
    fn handle(&self, request: Request, context: SessionContext) -> ItemStream {
        (self.f)(request, context).boxed()
    }
}

/// Adapter returned by [`notification_fn`]
pub struct FnNotificationHandler<F> {
    f: F,
}

/// Build a notification handler from an async closure
pub fn notification_fn<F, Fut>(f: F) -> FnNotificationHandler<F>
where
    F: Fn(Notification, SessionContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    FnNotificationHandler { f }
}

#[async_trait]
impl<F, Fut> NotificationHandler for FnNotificationHandler<F>
where
    F: Fn(Notification, SessionContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    async fn handle(&self, notification: Notification, context: SessionContext) {
        (self.f)(notification, context).await
    }
}
