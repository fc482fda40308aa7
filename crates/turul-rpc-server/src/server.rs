//! RPC server: accepts sockets, runs the handshake, then hands each
//! authenticated connection to its receive loop.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde_json::Value;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};
use turul_rpc_connection::{
    Connection, ConnectionConfig, ConnectionError, ConnectionState, FrameReader, Session,
    read_frame,
};
use turul_rpc_json_rpc::{
    Frame, HANDSHAKE_METHOD, HandshakeReply, HandshakeRequest, Message, Request, Response,
    Router, RpcErrorObject,
};
use uuid::Uuid;

use crate::auth::AuthManager;
use crate::builder::RpcServerBuilder;
use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};

/// Snapshot of server activity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ServerStats {
    /// Open sockets, including ones still handshaking
    pub connections: usize,
    /// Connections with an authenticated session
    pub sessions: usize,
    /// Registered methods
    pub methods: usize,
}

struct Running {
    address: SocketAddr,
    shutdown: CancellationToken,
    tasks: TaskTracker,
}

struct ServerInner {
    config: ServerConfig,
    router: Arc<Router>,
    auth: Arc<AuthManager>,
    connections: RwLock<HashMap<Uuid, Arc<Connection>>>,
    lifecycle: tokio::sync::Mutex<Option<Running>>,
    last_address: Mutex<Option<SocketAddr>>,
    running: AtomicBool,
}

/// JSON-RPC server over TCP
#[derive(Clone)]
pub struct RpcServer {
    inner: Arc<ServerInner>,
}

impl RpcServer {
    /// Create a new server builder
    pub fn builder() -> RpcServerBuilder {
        RpcServerBuilder::new()
    }

    pub(crate) fn new(config: ServerConfig, router: Router, auth: Arc<AuthManager>) -> Self {
        Self {
            inner: Arc::new(ServerInner {
                config,
                router: Arc::new(router),
                auth,
                connections: RwLock::new(HashMap::new()),
                lifecycle: tokio::sync::Mutex::new(None),
                last_address: Mutex::new(None),
                running: AtomicBool::new(false),
            }),
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.inner.config
    }

    pub fn auth_manager(&self) -> &Arc<AuthManager> {
        &self.inner.auth
    }

    /// Registered method names, sorted
    pub fn methods(&self) -> Vec<String> {
        self.inner.router.methods()
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Address of the running listener
    pub fn local_addr(&self) -> Option<SocketAddr> {
        if self.is_running() {
            *self.inner.last_address.lock()
        } else {
            None
        }
    }

    /// Bind and start accepting connections; returns the bound address.
    ///
    /// When the configured port is 0 and the server ran before, the
    /// previously obtained address is reused so clients can reconnect.
    pub async fn start(&self) -> ServerResult<SocketAddr> {
        let mut lifecycle = self.inner.lifecycle.lock().await;
        if let Some(running) = lifecycle.as_ref() {
            return Err(ServerError::AlreadyRunning(running.address));
        }

        let mut bind_address = self.inner.config.bind_address;
        if bind_address.port() == 0 {
            if let Some(previous) = *self.inner.last_address.lock() {
                bind_address = previous;
            }
        }

        let listener = TcpListener::bind(bind_address).await?;
        let address = listener.local_addr()?;
        *self.inner.last_address.lock() = Some(address);

        let shutdown = CancellationToken::new();
        let tasks = TaskTracker::new();
        tasks.spawn(accept_loop(
            Arc::clone(&self.inner),
            listener,
            shutdown.clone(),
            tasks.clone(),
        ));

        info!(
            address = %address,
            methods = self.inner.router.method_count(),
            capabilities = %self.inner.config.advertised_capabilities,
            "RPC server listening"
        );
        self.inner.running.store(true, Ordering::SeqCst);
        *lifecycle = Some(Running {
            address,
            shutdown,
            tasks,
        });
        Ok(address)
    }

    /// Graceful stop: stop accepting, stop reading new frames, let in-flight
    /// requests finish within the grace period, then close whatever is left.
    pub async fn stop(&self) -> ServerResult<()> {
        let mut lifecycle = self.inner.lifecycle.lock().await;
        let running = lifecycle.take().ok_or(ServerError::NotRunning)?;

        info!(address = %running.address, "Stopping RPC server");
        running.shutdown.cancel();
        running.tasks.close();

        let grace = self.inner.config.shutdown_grace;
        if tokio::time::timeout(grace, running.tasks.wait()).await.is_err() {
            let remaining: Vec<Arc<Connection>> =
                self.inner.connections.read().values().cloned().collect();
            warn!(
                connections = remaining.len(),
                grace_ms = grace.as_millis() as u64,
                "Grace period elapsed, closing remaining connections"
            );
            for connection in remaining {
                connection.close().await;
            }
            running.tasks.wait().await;
        }

        self.inner.running.store(false, Ordering::SeqCst);
        info!(address = %running.address, "RPC server stopped");
        Ok(())
    }

    /// Start, serve until Ctrl-C, then stop gracefully
    pub async fn run(&self) -> ServerResult<()> {
        self.start().await?;
        tokio::signal::ctrl_c().await?;
        info!("Shutdown signal received");
        self.stop().await
    }

    pub fn stats(&self) -> ServerStats {
        let connections = self.inner.connections.read();
        ServerStats {
            connections: connections.len(),
            sessions: connections
                .values()
                .filter(|c| c.state() == ConnectionState::Authenticated)
                .count(),
            methods: self.inner.router.method_count(),
        }
    }

    /// Send a notification to every authenticated connection.
    /// Returns how many connections it was written to.
    pub async fn broadcast(&self, method: &str, params: Option<Value>) -> usize {
        let targets: Vec<Arc<Connection>> = self
            .inner
            .connections
            .read()
            .values()
            .filter(|c| c.state().accepts_requests())
            .cloned()
            .collect();

        let mut reached = 0;
        for connection in targets {
            match connection.notify(method, params.clone()).await {
                Ok(()) => reached += 1,
                Err(e) => {
                    debug!(connection_id = %connection.id(), error = %e, "Broadcast skipped connection")
                }
            }
        }
        debug!(method = %method, reached, "Broadcast sent");
        reached
    }
}

async fn accept_loop(
    inner: Arc<ServerInner>,
    listener: TcpListener,
    shutdown: CancellationToken,
    tasks: TaskTracker,
) {
    loop {
        let (stream, peer) = tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!(error = %e, "Failed to accept connection");
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    continue;
                }
            },
        };

        if let Err(e) = stream.set_nodelay(true) {
            debug!(peer = %peer, error = %e, "Failed to set TCP_NODELAY");
        }
        let inner = Arc::clone(&inner);
        let shutdown = shutdown.clone();
        tasks.spawn(async move { inner.serve_socket(stream, peer, shutdown).await });
    }
    debug!("Accept loop stopped");
}

impl ServerInner {
    /// Register a connection unless the limit is reached
    fn admit(&self, connection: &Arc<Connection>) -> bool {
        let mut connections = self.connections.write();
        if let Some(max) = self.config.max_connections {
            if connections.len() >= max {
                return false;
            }
        }
        connections.insert(connection.id(), Arc::clone(connection));
        true
    }

    async fn serve_socket(
        self: Arc<Self>,
        stream: TcpStream,
        peer: SocketAddr,
        shutdown: CancellationToken,
    ) {
        let (connection, mut reader) = Connection::open(
            stream,
            ConnectionConfig {
                id_prefix: "srv".to_string(),
                max_frame_length: self.config.max_frame_length,
            },
        );
        let connection_id = connection.id();

        if !self.admit(&connection) {
            warn!(peer = %peer, "Connection limit reached, refusing connection");
            let refusal = Response::error(None, RpcErrorObject::too_many_connections());
            if let Err(e) = connection.send(refusal).await {
                debug!(peer = %peer, error = %e, "Failed to send refusal");
            }
            connection.close().await;
            return;
        }
        debug!(peer = %peer, connection_id = %connection_id, "Connection accepted");

        let session_id = match connection.transition(ConnectionState::Handshaking) {
            Ok(()) => {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        reply(&connection, Response::error(None, RpcErrorObject::shutting_down())).await;
                        None
                    }
                    outcome = tokio::time::timeout(
                        self.config.handshake_timeout,
                        self.handshake(&connection, &mut reader),
                    ) => outcome.unwrap_or_else(|_| {
                        warn!(peer = %peer, "Handshake timed out");
                        None
                    }),
                }
            }
            Err(e) => {
                debug!(peer = %peer, error = %e, "Connection closed before handshake");
                None
            }
        };

        match session_id {
            Some(session_id) => {
                let reason = Arc::clone(&connection)
                    .run(reader, Arc::clone(&self.router), shutdown)
                    .await;
                info!(peer = %peer, session_id = %session_id, reason = ?reason, "Connection finished");
            }
            None => connection.close().await,
        }
        self.connections.write().remove(&connection_id);
    }

    /// Read frames until a valid handshake arrives. Returns the session id,
    /// or None when the connection must be closed.
    async fn handshake(&self, connection: &Connection, reader: &mut FrameReader) -> Option<String> {
        loop {
            let frame = match read_frame(reader).await {
                None => {
                    debug!(connection_id = %connection.id(), "Peer closed during handshake");
                    return None;
                }
                Some(Ok(frame)) => frame,
                Some(Err(ConnectionError::Codec(e))) => {
                    warn!(connection_id = %connection.id(), error = %e, "Malformed frame during handshake");
                    reply(connection, Response::error(None, e.to_error_object())).await;
                    continue;
                }
                Some(Err(e)) => {
                    debug!(connection_id = %connection.id(), error = %e, "Handshake read failed");
                    return None;
                }
            };

            let request = match frame {
                Frame::Single(Message::Request(request)) if request.method == HANDSHAKE_METHOD => {
                    request
                }
                Frame::Single(Message::Request(request)) => {
                    debug!(method = %request.method, "Request before handshake");
                    connection
                        .refuse(vec![request.id], false, RpcErrorObject::not_authenticated())
                        .await;
                    continue;
                }
                Frame::Batch(messages) => {
                    let ids = messages
                        .into_iter()
                        .filter_map(|message| match message {
                            Message::Request(r) => Some(r.id),
                            _ => None,
                        })
                        .collect();
                    connection
                        .refuse(ids, true, RpcErrorObject::not_authenticated())
                        .await;
                    continue;
                }
                Frame::Single(other) => {
                    debug!(method = ?other.method(), "Ignoring message before handshake");
                    continue;
                }
            };

            return self.complete_handshake(connection, request).await;
        }
    }

    async fn complete_handshake(&self, connection: &Connection, request: Request) -> Option<String> {
        let params: HandshakeRequest = match request.parse_params() {
            Ok(params) => params,
            Err(e) => {
                reply(
                    connection,
                    Response::error(Some(request.id), e.to_error_object(false)),
                )
                .await;
                return None;
            }
        };

        let session_id = match self.auth.authenticate(&params) {
            Ok(session_id) => session_id,
            Err(e) => {
                warn!(client_id = %params.client_id, error = %e, "Handshake rejected");
                reply(
                    connection,
                    Response::error(Some(request.id), RpcErrorObject::authentication_failed()),
                )
                .await;
                return None;
            }
        };

        let negotiated = params
            .requested_capabilities
            .negotiate(&self.config.advertised_capabilities);
        let handshake_reply = HandshakeReply {
            session_id: session_id.clone(),
            negotiated_capabilities: negotiated.clone(),
        };
        let result = match serde_json::to_value(&handshake_reply) {
            Ok(result) => result,
            Err(e) => {
                warn!(error = %e, "Failed to encode handshake reply");
                reply(
                    connection,
                    Response::error(Some(request.id), RpcErrorObject::internal_error(None)),
                )
                .await;
                return None;
            }
        };

        let session = Session::new(session_id.clone(), params.client_id.clone(), negotiated);
        if let Err(e) = connection.authenticate(session) {
            debug!(error = %e, "Connection closed during handshake");
            return None;
        }
        if let Err(e) = connection.send(Response::success(request.id, result)).await {
            debug!(error = %e, "Failed to send handshake reply");
            return None;
        }

        info!(
            client_id = %params.client_id,
            session_id = %session_id,
            capabilities = %handshake_reply.negotiated_capabilities,
            "Client authenticated"
        );
        Some(session_id)
    }
}

async fn reply(connection: &Connection, frame: impl Into<Frame>) {
    if let Err(e) = connection.send(frame).await {
        debug!(connection_id = %connection.id(), error = %e, "Failed to send handshake error");
    }
}
