//! RPC Server Builder
//!
//! This module provides a builder pattern for creating RPC servers.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use turul_rpc_json_rpc::router::ping;
use turul_rpc_json_rpc::{
    Capability, CapabilitySet, HANDSHAKE_METHOD, Middleware, NotificationHandler, PING_METHOD,
    Router, RpcHandler, StreamHandler, handler_fn,
};

use crate::auth::AuthManager;
use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::server::RpcServer;

/// Builder for RPC servers
pub struct RpcServerBuilder {
    config: ServerConfig,
    router: Router,
    method_names: HashSet<String>,
    auth: Option<Arc<AuthManager>>,
    clients: Vec<(String, String)>,
    validation_errors: Vec<String>,
}

impl RpcServerBuilder {
    pub fn new() -> Self {
        Self {
            config: ServerConfig::default(),
            router: Router::new(),
            method_names: HashSet::new(),
            auth: None,
            clients: Vec::new(),
            validation_errors: Vec::new(),
        }
    }

    /// Replace the whole configuration
    pub fn config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn bind_address(mut self, addr: SocketAddr) -> Self {
        self.config.bind_address = addr;
        self
    }

    /// Advertise an additional capability
    pub fn capability(mut self, capability: Capability) -> Self {
        self.config.advertised_capabilities.insert(capability);
        self
    }

    /// Replace the advertised capability set
    pub fn capabilities(mut self, capabilities: impl IntoIterator<Item = Capability>) -> Self {
        self.config.advertised_capabilities = capabilities.into_iter().collect::<CapabilitySet>();
        self
    }

    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.config.handshake_timeout = timeout;
        self
    }

    pub fn shutdown_grace(mut self, grace: Duration) -> Self {
        self.config.shutdown_grace = grace;
        self
    }

    pub fn max_connections(mut self, max: usize) -> Self {
        self.config.max_connections = Some(max);
        self
    }

    pub fn max_frame_length(mut self, bytes: usize) -> Self {
        self.config.max_frame_length = bytes;
        self
    }

    /// Disable the built-in `rpc.ping` method
    pub fn without_ping(mut self) -> Self {
        self.config.enable_ping = false;
        self
    }

    pub fn expose_internal_errors(mut self, expose: bool) -> Self {
        self.config.expose_internal_errors = expose;
        self
    }

    /// Add middleware; the first one added runs outermost
    pub fn middleware(mut self, middleware: Arc<dyn Middleware>) -> Self {
        self.router.use_middleware_arc(middleware);
        self
    }

    /// Register a unary method
    pub fn method<H: RpcHandler + 'static>(mut self, name: impl Into<String>, handler: H) -> Self {
        let name = name.into();
        if self.claim(&name) {
            self.router.register(name, handler);
        }
        self
    }

    /// Register a streaming method
    pub fn stream_method<H: StreamHandler + 'static>(
        mut self,
        name: impl Into<String>,
        handler: H,
    ) -> Self {
        let name = name.into();
        if self.claim(&name) {
            self.router.register_stream(name, handler);
        }
        self
    }

    /// Register a notification handler
    pub fn notification<H: NotificationHandler + 'static>(
        mut self,
        name: impl Into<String>,
        handler: H,
    ) -> Self {
        self.router.register_notification(name, handler);
        self
    }

    /// Use a shared credential registry
    pub fn auth_manager(mut self, auth: Arc<AuthManager>) -> Self {
        self.auth = Some(auth);
        self
    }

    /// Register a client with the server's credential registry at build time
    pub fn client(mut self, client_id: impl Into<String>, secret: impl Into<String>) -> Self {
        self.clients.push((client_id.into(), secret.into()));
        self
    }

    fn claim(&mut self, name: &str) -> bool {
        if name.is_empty() {
            self.validation_errors.push("Method name must not be empty".to_string());
            return false;
        }
        if name == HANDSHAKE_METHOD || name == PING_METHOD {
            self.validation_errors
                .push(format!("Method name '{}' is reserved", name));
            return false;
        }
        if !self.method_names.insert(name.to_string()) {
            self.validation_errors
                .push(format!("Method '{}' is registered more than once", name));
            return false;
        }
        true
    }

    /// Build the server
    pub fn build(self) -> ServerResult<RpcServer> {
        let Self {
            config,
            mut router,
            auth,
            clients,
            mut validation_errors,
            ..
        } = self;

        if config.max_frame_length == 0 {
            validation_errors.push("max_frame_length must be greater than zero".to_string());
        }
        if config.max_connections == Some(0) {
            validation_errors.push("max_connections must be greater than zero".to_string());
        }
        if !validation_errors.is_empty() {
            return Err(ServerError::Config(validation_errors.join("; ")));
        }

        let auth = auth.unwrap_or_else(|| Arc::new(AuthManager::new(config.auth.clone())));
        for (client_id, secret) in &clients {
            auth.register_client(client_id, secret)?;
        }

        if config.enable_ping {
            router.register(PING_METHOD, handler_fn(ping));
        }
        router.expose_internal_errors(config.expose_internal_errors);

        Ok(RpcServer::new(config, router, auth))
    }
}

impl Default for RpcServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;
    use turul_rpc_json_rpc::{Request, SessionContext};

    fn echo() -> impl RpcHandler + 'static {
        handler_fn(|request: Request, _ctx: SessionContext| async move {
            Ok(request.params.unwrap_or(Value::Null))
        })
    }

    #[test]
    fn test_builder_registers_methods_and_ping() {
        let server = RpcServer::builder()
            .method("echo", echo())
            .client("alice", "s3cret")
            .build()
            .unwrap();

        assert_eq!(server.methods(), vec!["echo".to_string(), "rpc.ping".to_string()]);
        assert!(server.auth_manager().validate("alice", "s3cret"));
    }

    #[test]
    fn test_ping_can_be_disabled() {
        let server = RpcServer::builder().method("echo", echo()).without_ping().build().unwrap();
        assert_eq!(server.methods(), vec!["echo".to_string()]);
    }

    #[test]
    fn test_duplicate_and_reserved_names_fail_the_build() {
        let result = RpcServer::builder()
            .method("echo", echo())
            .method("echo", echo())
            .method("rpc.handshake", echo())
            .build();

        let Err(ServerError::Config(message)) = result else {
            panic!("expected a configuration error");
        };
        assert!(message.contains("more than once"));
        assert!(message.contains("reserved"));
    }

    #[test]
    fn test_capability_setters() {
        let server = RpcServer::builder()
            .capabilities([Capability::Streaming])
            .capability(Capability::Compression)
            .build()
            .unwrap();
        assert_eq!(
            server.config().advertised_capabilities,
            CapabilitySet::from([Capability::Streaming, Capability::Compression])
        );
    }

    #[test]
    fn test_shared_auth_manager() {
        let auth = Arc::new(AuthManager::default());
        auth.register_client("bob", "pw").unwrap();
        let server = RpcServer::builder().auth_manager(Arc::clone(&auth)).build().unwrap();
        assert!(Arc::ptr_eq(server.auth_manager(), &auth));
    }

    #[test]
    fn test_invalid_limits() {
        let result = RpcServer::builder().max_connections(0).build();
        assert!(matches!(result, Err(ServerError::Config(_))));
    }
}
