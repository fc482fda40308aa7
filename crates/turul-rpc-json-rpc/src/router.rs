use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures::{FutureExt, StreamExt};
use serde_json::Value;
use tracing::{debug, error, warn};

use crate::error::RpcErrorObject;
use crate::handler::{Dispatched, NotificationHandler, RpcHandler, SessionContext, StreamHandler};
use crate::message::{Notification, Request, Response};
use crate::middleware::{Endpoint, Middleware, MiddlewareStack};

enum Route {
    Unary(Arc<dyn RpcHandler>),
    Stream(Arc<dyn StreamHandler>),
}

/// Method table plus middleware chain
///
/// Registration happens before the router is shared; once wrapped in an
/// `Arc` it is read-only and safe to dispatch from many connections.
#[derive(Default)]
pub struct Router {
    routes: HashMap<String, Route>,
    notifications: HashMap<String, Arc<dyn NotificationHandler>>,
    middleware: MiddlewareStack,
    expose_internal_errors: bool,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a unary handler, replacing any previous route for the method
    pub fn register<H>(&mut self, method: impl Into<String>, handler: H) -> &mut Self
    where
        H: RpcHandler + 'static,
    {
        self.routes.insert(method.into(), Route::Unary(Arc::new(handler)));
        self
    }

    /// Register a streaming handler
    pub fn register_stream<H>(&mut self, method: impl Into<String>, handler: H) -> &mut Self
    where
        H: StreamHandler + 'static,
    {
        self.routes.insert(method.into(), Route::Stream(Arc::new(handler)));
        self
    }

    /// Register a notification sink
    pub fn register_notification<H>(&mut self, method: impl Into<String>, handler: H) -> &mut Self
    where
        H: NotificationHandler + 'static,
    {
        self.notifications.insert(method.into(), Arc::new(handler));
        self
    }

    /// Append middleware; earlier registrations wrap later ones
    pub fn use_middleware<M>(&mut self, middleware: M) -> &mut Self
    where
        M: Middleware + 'static,
    {
        self.middleware.push(Arc::new(middleware));
        self
    }

    pub fn use_middleware_arc(&mut self, middleware: Arc<dyn Middleware>) -> &mut Self {
        self.middleware.push(middleware);
        self
    }

    /// Put handler error details into `error.data` of internal errors
    pub fn expose_internal_errors(&mut self, expose: bool) -> &mut Self {
        self.expose_internal_errors = expose;
        self
    }

    pub fn has_method(&self, method: &str) -> bool {
        self.routes.contains_key(method)
    }

    pub fn is_stream_method(&self, method: &str) -> bool {
        matches!(self.routes.get(method), Some(Route::Stream(_)))
    }

    /// Registered method names, sorted
    pub fn methods(&self) -> Vec<String> {
        let mut methods: Vec<String> = self.routes.keys().cloned().collect();
        methods.sort();
        methods
    }

    pub fn method_count(&self) -> usize {
        self.routes.len()
    }

    /// Route a request through the middleware chain to its handler
    pub async fn dispatch(&self, request: Request, context: SessionContext) -> Dispatched {
        self.middleware.run(request, context, self).await
    }

    /// Deliver a notification; unknown methods are ignored
    pub async fn notify(&self, notification: Notification, context: SessionContext) {
        match self.notifications.get(&notification.method) {
            Some(handler) => {
                let method = notification.method.clone();
                if AssertUnwindSafe(handler.handle(notification, context))
                    .catch_unwind()
                    .await
                    .is_err()
                {
                    error!(method = %method, "Notification handler panicked");
                }
            }
            None => debug!(method = %notification.method, "Ignoring notification for unknown method"),
        }
    }
}

#[async_trait]
impl Endpoint for Router {
    async fn call(&self, request: Request, context: SessionContext) -> Dispatched {
        let Some(route) = self.routes.get(&request.method) else {
            debug!(method = %request.method, "Method not found");
            return Dispatched::error(request.id.clone(), RpcErrorObject::method_not_found(&request.method));
        };

        let id = request.id.clone();
        let method = request.method.clone();
        let expose = self.expose_internal_errors;

        match route {
            Route::Unary(handler) => {
                match AssertUnwindSafe(handler.handle(request, context)).catch_unwind().await {
                    Ok(Ok(result)) => Dispatched::Response(Response::success(id, result)),
                    Ok(Err(handler_error)) => {
                        warn!(method = %method, error = %handler_error, "Handler returned an error");
                        Dispatched::error(id, handler_error.to_error_object(expose))
                    }
                    Err(_) => {
                        error!(method = %method, "Handler panicked");
                        Dispatched::error(id, RpcErrorObject::internal_error(None))
                    }
                }
            }
            Route::Stream(handler) => {
                let streaming = request.stream;
                let items = match std::panic::catch_unwind(AssertUnwindSafe(|| {
                    handler.handle(request, context)
                })) {
                    Ok(items) => items,
                    Err(_) => {
                        error!(method = %method, "Stream handler panicked");
                        return Dispatched::error(id, RpcErrorObject::internal_error(None));
                    }
                };
                let items = items
                    .map(move |item| item.map_err(|e| e.to_error_object(expose)))
                    .boxed();
                if streaming {
                    return Dispatched::Stream { id, items };
                }
                let collected = Dispatched::Stream { id: id.clone(), items }.into_response();
                match AssertUnwindSafe(collected).catch_unwind().await {
                    Ok(response) => Dispatched::Response(response),
                    Err(_) => {
                        error!(method = %method, "Stream handler panicked while collecting");
                        Dispatched::error(id, RpcErrorObject::internal_error(None))
                    }
                }
            }
        }
    }
}

/// Built-in `rpc.ping` handler
pub async fn ping(_request: Request, _context: SessionContext) -> Result<Value, crate::HandlerError> {
    Ok(Value::String("pong".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HandlerError;
    use crate::handler::{handler_fn, notification_fn, stream_fn};
    use crate::middleware::Next;
    use futures::stream;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn echo_router() -> Router {
        let mut router = Router::new();
        router
            .register(
                "echo",
                handler_fn(|request: Request, _ctx| async move {
                    Ok(request.params.unwrap_or(Value::Null))
                }),
            )
            .register(
                "fail",
                handler_fn(|_request: Request, _ctx| async move {
                    Err(HandlerError::internal("connection string postgres://secret"))
                }),
            )
            .register(
                "panic",
                handler_fn(|_request: Request, _ctx| async move {
                    if true {
                        panic!("boom");
                    }
                    Ok(Value::Null)
                }),
            )
            .register_stream(
                "count",
                stream_fn(|request: Request, _ctx| {
                    let n = request.param("n").and_then(Value::as_u64).unwrap_or(0);
                    async_stream::stream! {
                        for i in 0..n {
                            tokio::time::sleep(Duration::from_millis(1)).await;
                            yield Ok::<Value, HandlerError>(json!(i));
                        }
                    }
                }),
            );
        router
    }

    async fn call(router: &Router, request: Request) -> Response {
        router.dispatch(request, SessionContext::default()).await.into_response().await
    }

    #[tokio::test]
    async fn test_dispatch_success() {
        let router = echo_router();
        let response = call(&router, Request::new("1", "echo", Some(json!({"x": 1})))).await;
        assert_eq!(response.id, Some("1".into()));
        assert_eq!(response.into_result().unwrap(), json!({"x": 1}));
    }

    #[tokio::test]
    async fn test_dispatch_method_not_found() {
        let router = echo_router();
        let response = call(&router, Request::new("1", "unknown", None)).await;
        assert_eq!(response.id, Some("1".into()));
        assert_eq!(response.into_result().unwrap_err().code, -32601);
    }

    #[tokio::test]
    async fn test_handler_errors_are_masked() {
        let router = echo_router();
        let error = call(&router, Request::new("1", "fail", None))
            .await
            .into_result()
            .unwrap_err();
        assert_eq!(error.code, -32603);
        assert_eq!(error.message, "Internal error");
        assert!(error.data.is_none());
    }

    #[tokio::test]
    async fn test_handler_errors_can_be_exposed() {
        let mut router = echo_router();
        router.expose_internal_errors(true);
        let error = call(&router, Request::new("1", "fail", None))
            .await
            .into_result()
            .unwrap_err();
        assert_eq!(error.data, Some(json!("connection string postgres://secret")));
    }

    #[tokio::test]
    async fn test_panicking_handler_becomes_internal_error() {
        let router = echo_router();
        let error = call(&router, Request::new("1", "panic", None))
            .await
            .into_result()
            .unwrap_err();
        assert_eq!(error.code, -32603);
        assert!(!error.message.contains("boom"));
    }

    #[tokio::test]
    async fn test_streaming_request_yields_a_lazy_stream() {
        let router = echo_router();
        let dispatched = router
            .dispatch(
                Request::streaming("s", "count", Some(json!({"n": 5}))),
                SessionContext::default(),
            )
            .await;
        let Dispatched::Stream { id, items } = dispatched else {
            panic!("expected a stream");
        };
        assert_eq!(id, "s".into());
        let values: Vec<Value> = items.map(|item| item.unwrap()).collect().await;
        assert_eq!(values, vec![json!(0), json!(1), json!(2), json!(3), json!(4)]);
    }

    #[tokio::test]
    async fn test_stream_method_called_without_stream_flag_is_collected() {
        let router = echo_router();
        let response = call(&router, Request::new("c", "count", Some(json!({"n": 3})))).await;
        assert_eq!(response.into_result().unwrap(), json!([0, 1, 2]));
    }

    #[tokio::test]
    async fn test_each_stream_call_is_fresh() {
        let router = echo_router();
        for _ in 0..2 {
            let response = call(&router, Request::new("c", "count", Some(json!({"n": 2})))).await;
            assert_eq!(response.into_result().unwrap(), json!([0, 1]));
        }
    }

    #[tokio::test]
    async fn test_stream_item_errors_are_converted() {
        let mut router = Router::new();
        router.register_stream(
            "broken",
            stream_fn(|_request: Request, _ctx| {
                stream::iter(vec![Ok(json!(1)), Err(HandlerError::internal("disk on fire"))])
            }),
        );
        let error = call(&router, Request::new("b", "broken", None))
            .await
            .into_result()
            .unwrap_err();
        assert_eq!(error.code, -32603);
        assert!(error.data.is_none());
    }

    #[tokio::test]
    async fn test_stream_panic_while_collecting_becomes_internal_error() {
        let mut router = Router::new();
        router.register_stream(
            "boom",
            stream_fn(|_request: Request, _ctx| {
                async_stream::stream! {
                    yield Ok::<Value, HandlerError>(json!(1));
                    if true {
                        panic!("mid-stream");
                    }
                }
            }),
        );
        let response = call(&router, Request::new("b", "boom", None)).await;
        assert_eq!(response.id, Some("b".into()));
        assert_eq!(response.into_result().unwrap_err().code, -32603);
    }

    struct Tagging {
        log: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl Middleware for Tagging {
        async fn handle(&self, request: Request, context: SessionContext, next: Next<'_>) -> Dispatched {
            self.log.lock().push(format!("pre:{}", request.method));
            let context = context.with_metadata("tagged", json!(true));
            let dispatched = next.run(request, context).await;
            let response = dispatched.into_response().await;
            self.log.lock().push(format!("post:error={}", response.is_error()));
            Dispatched::Response(response)
        }
    }

    #[tokio::test]
    async fn test_middleware_sees_request_and_response() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut router = Router::new();
        router
            .use_middleware(Tagging { log: log.clone() })
            .register(
                "tagged",
                handler_fn(|_request: Request, ctx: SessionContext| async move {
                    Ok(ctx.metadata.get("tagged").cloned().unwrap_or(Value::Null))
                }),
            );

        let response = call(&router, Request::new("1", "tagged", None)).await;
        assert_eq!(response.into_result().unwrap(), json!(true));

        let missing = call(&router, Request::new("2", "missing", None)).await;
        assert!(missing.is_error());

        assert_eq!(
            *log.lock(),
            vec!["pre:tagged", "post:error=false", "pre:missing", "post:error=true"]
        );
    }

    #[tokio::test]
    async fn test_notifications_reach_their_handler() {
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();
        let mut router = Router::new();
        router.register_notification(
            "tick",
            notification_fn(move |_notification, _ctx| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                }
            }),
        );

        router.notify(Notification::new("tick", None), SessionContext::default()).await;
        router.notify(Notification::new("unknown", None), SessionContext::default()).await;
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_method_listing() {
        let router = echo_router();
        assert_eq!(router.methods(), vec!["count", "echo", "fail", "panic"]);
        assert!(router.is_stream_method("count"));
        assert!(!router.is_stream_method("echo"));
        assert_eq!(router.method_count(), 4);
    }
}
