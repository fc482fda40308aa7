//! Request middleware
//!
//! Middleware wrap the route endpoint in registration order. Each one receives
//! the request together with a [`Next`] cursor and decides whether to call
//! further down the chain, so a single implementation can do pre-processing,
//! post-processing, or short-circuit the request entirely.
//!
//! ```text
//! first.pre -> second.pre -> endpoint -> second.post -> first.post
//! ```

use std::sync::Arc;

use async_trait::async_trait;

use crate::handler::{Dispatched, SessionContext};
use crate::message::Request;

/// Terminal stage of a middleware chain
#[async_trait]
pub trait Endpoint: Send + Sync {
    async fn call(&self, request: Request, context: SessionContext) -> Dispatched;
}

/// Request interceptor
///
/// # Examples
///
/// ```rust,no_run
/// use async_trait::async_trait;
/// use turul_rpc_json_rpc::{Dispatched, Middleware, Next, Request, RpcErrorObject, SessionContext};
///
/// struct DenyAdmin;
///
/// #[async_trait]
/// impl Middleware for DenyAdmin {
///     async fn handle(&self, request: Request, context: SessionContext, next: Next<'_>) -> Dispatched {
///         if request.method.starts_with("admin.") {
///             return Dispatched::error(request.id, RpcErrorObject::server_error(-32010, "Forbidden", None));
///         }
///         next.run(request, context).await
///     }
/// }
/// ```
#[async_trait]
pub trait Middleware: Send + Sync {
    async fn handle(&self, request: Request, context: SessionContext, next: Next<'_>) -> Dispatched;
}

/// Cursor over the remaining middleware and the endpoint
pub struct Next<'a> {
    middleware: &'a [Arc<dyn Middleware>],
    endpoint: &'a dyn Endpoint,
}

impl<'a> Next<'a> {
    /// Invoke the rest of the chain
    pub async fn run(self, request: Request, context: SessionContext) -> Dispatched {
        match self.middleware.split_first() {
            Some((current, rest)) => {
                let next = Next {
                    middleware: rest,
                    endpoint: self.endpoint,
                };
                current.handle(request, context, next).await
            }
            None => self.endpoint.call(request, context).await,
        }
    }
}

/// Ordered collection of middleware
#[derive(Default, Clone)]
pub struct MiddlewareStack {
    middleware: Vec<Arc<dyn Middleware>>,
}

impl MiddlewareStack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add middleware to the end of the stack; the first added runs outermost
    pub fn push(&mut self, middleware: Arc<dyn Middleware>) {
        self.middleware.push(middleware);
    }

    pub fn len(&self) -> usize {
        self.middleware.len()
    }

    pub fn is_empty(&self) -> bool {
        self.middleware.is_empty()
    }

    /// Run the request through every middleware and finally the endpoint
    pub async fn run(
        &self,
        request: Request,
        context: SessionContext,
        endpoint: &dyn Endpoint,
    ) -> Dispatched {
        Next {
            middleware: &self.middleware,
            endpoint,
        }
        .run(request, context)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RpcErrorObject;
    use crate::message::Response;
    use parking_lot::Mutex;
    use serde_json::json;

    struct RecordingMiddleware {
        id: &'static str,
        log: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl Middleware for RecordingMiddleware {
        async fn handle(&self, request: Request, context: SessionContext, next: Next<'_>) -> Dispatched {
            self.log.lock().push(format!("before_{}", self.id));
            let result = next.run(request, context).await;
            self.log.lock().push(format!("after_{}", self.id));
            result
        }
    }

    struct Rejecting;

    #[async_trait]
    impl Middleware for Rejecting {
        async fn handle(&self, request: Request, _context: SessionContext, _next: Next<'_>) -> Dispatched {
            Dispatched::error(request.id, RpcErrorObject::server_error(-32010, "Forbidden", None))
        }
    }

    struct RecordingEndpoint {
        log: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl Endpoint for RecordingEndpoint {
        async fn call(&self, request: Request, _context: SessionContext) -> Dispatched {
            self.log.lock().push("endpoint".to_string());
            Dispatched::Response(Response::success(request.id, json!({"ok": true})))
        }
    }

    #[tokio::test]
    async fn test_middleware_execution_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut stack = MiddlewareStack::new();
        stack.push(Arc::new(RecordingMiddleware { id: "first", log: log.clone() }));
        stack.push(Arc::new(RecordingMiddleware { id: "second", log: log.clone() }));

        let endpoint = RecordingEndpoint { log: log.clone() };
        let result = stack
            .run(Request::new("1", "test", None), SessionContext::default(), &endpoint)
            .await;
        assert!(matches!(result, Dispatched::Response(ref r) if !r.is_error()));

        assert_eq!(
            *log.lock(),
            vec!["before_first", "before_second", "endpoint", "after_second", "after_first"]
        );
    }

    #[tokio::test]
    async fn test_short_circuit_skips_the_rest_of_the_chain() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut stack = MiddlewareStack::new();
        stack.push(Arc::new(RecordingMiddleware { id: "first", log: log.clone() }));
        stack.push(Arc::new(Rejecting));
        stack.push(Arc::new(RecordingMiddleware { id: "third", log: log.clone() }));

        let endpoint = RecordingEndpoint { log: log.clone() };
        let result = stack
            .run(Request::new("1", "test", None), SessionContext::default(), &endpoint)
            .await
            .into_response()
            .await;
        assert_eq!(result.into_result().unwrap_err().code, -32010);
        assert_eq!(*log.lock(), vec!["before_first", "after_first"]);
    }

    #[tokio::test]
    async fn test_empty_stack() {
        let stack = MiddlewareStack::new();
        assert!(stack.is_empty());
        assert_eq!(stack.len(), 0);

        let log = Arc::new(Mutex::new(Vec::new()));
        let endpoint = RecordingEndpoint { log: log.clone() };
        stack
            .run(Request::new("1", "test", None), SessionContext::default(), &endpoint)
            .await;
        assert_eq!(*log.lock(), vec!["endpoint"]);
    }
}
