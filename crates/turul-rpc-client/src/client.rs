//! Main RPC client implementation

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use parking_lot::RwLock;
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::{Mutex, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use turul_rpc_connection::{
    CloseReason, Connection, ConnectionConfig, ConnectionError, ConnectionState, FrameReader,
    Session, read_frame,
};
use turul_rpc_json_rpc::error_codes::AUTHENTICATION_FAILED;
use turul_rpc_json_rpc::{
    Capability, CapabilitySet, Frame, HANDSHAKE_METHOD, HandshakeReply, HandshakeRequest,
    Message, NotificationHandler, PING_METHOD, Request, Response, Router, RpcHandler,
    StreamHandler,
};

use crate::config::{ClientConfig, Credentials, ReconnectPolicy, TimeoutConfig};
use crate::error::{ClientError, ClientResult};
use crate::state::{ClientEvent, ClientState};
use crate::streaming::ChunkStream;

/// A connection dropping under an operation is reported as `ConnectionLost`
/// unless this client closed it.
pub(crate) fn connection_error(error: ConnectionError, closing: &CancellationToken) -> ClientError {
    match error {
        ConnectionError::Closed if !closing.is_cancelled() => ClientError::ConnectionLost,
        other => other.into(),
    }
}

#[derive(Clone)]
struct Active {
    connection: Arc<Connection>,
    session_id: String,
    capabilities: CapabilitySet,
}

struct ClientInner {
    config: ClientConfig,
    /// Serves requests and notifications initiated by the server
    router: Arc<Router>,
    active: RwLock<Option<Active>>,
    state: watch::Sender<ClientState>,
    connecting: Mutex<()>,
    closing: CancellationToken,
}

/// JSON-RPC client with handshake, streaming, batching and reconnection
pub struct RpcClient {
    inner: Arc<ClientInner>,
}

impl RpcClient {
    pub fn new(config: ClientConfig) -> Self {
        Self::with_router(config, Router::new())
    }

    pub fn builder() -> RpcClientBuilder {
        RpcClientBuilder::new()
    }

    fn with_router(config: ClientConfig, router: Router) -> Self {
        let (state, _) = watch::channel(ClientState::Idle);
        Self {
            inner: Arc::new(ClientInner {
                config,
                router: Arc::new(router),
                active: RwLock::new(None),
                state,
                connecting: Mutex::new(()),
                closing: CancellationToken::new(),
            }),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// Connect and complete the handshake.
    ///
    /// Rejected credentials close the client for good; transport failures
    /// leave it idle so the call can be retried.
    pub async fn connect(&self) -> ClientResult<()> {
        let _connecting = self.inner.connecting.lock().await;
        match self.inner.state() {
            ClientState::Idle => {}
            ClientState::Connected => return Ok(()),
            ClientState::Closed => return Err(ClientError::ConnectionClosed),
            ClientState::Connecting | ClientState::Reconnecting => {
                return Err(ClientError::NotConnected);
            }
        }

        info!(
            address = %self.inner.config.address(),
            client_id = %self.inner.config.credentials.client_id,
            "Connecting to RPC server"
        );
        self.inner.apply(ClientEvent::ConnectRequested, false);

        match self.inner.establish().await {
            Ok((active, reader)) => {
                let session_id = active.session_id.clone();
                let capabilities = active.capabilities.clone();
                if !self.inner.activate(active, reader, false) {
                    return Err(ClientError::ConnectionClosed);
                }
                info!(session_id = %session_id, capabilities = %capabilities, "Connected to RPC server");
                Ok(())
            }
            Err(e) if e.is_authentication_failure() => {
                warn!(error = %e, "Server rejected the client credentials");
                self.inner.apply(ClientEvent::AuthenticationRejected, false);
                Err(e)
            }
            Err(e) => {
                warn!(error = %e, "Failed to connect to RPC server");
                self.inner.apply(ClientEvent::TransportFailed, false);
                Err(e)
            }
        }
    }

    /// Call a method with the configured request timeout
    pub async fn request(&self, method: &str, params: Option<Value>) -> ClientResult<Value> {
        self.request_with_timeout(method, params, self.inner.config.timeouts.request)
            .await
    }

    pub async fn request_with_timeout(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
    ) -> ClientResult<Value> {
        let active = self.inner.current()?;
        let response = active
            .connection
            .correlate(method, params, timeout)
            .await
            .map_err(|e| self.inner.map_error(e))?;
        Ok(response.into_result()?)
    }

    /// Call a streaming method, invoking `on_chunk` for every item in order.
    /// Returns the number of items received.
    pub async fn stream<F>(
        &self,
        method: &str,
        params: Option<Value>,
        mut on_chunk: F,
    ) -> ClientResult<usize>
    where
        F: FnMut(Value) + Send,
    {
        let mut chunks = self.open_stream(method, params).await?;
        let mut count = 0;
        while let Some(item) = chunks.next().await {
            on_chunk(item?);
            count += 1;
        }
        Ok(count)
    }

    /// Call a streaming method and consume the items as a `Stream`
    pub async fn open_stream(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> ClientResult<ChunkStream> {
        let active = self.inner.current()?;
        if !active.capabilities.contains(&Capability::Streaming) {
            return Err(ClientError::CapabilityNotNegotiated(
                Capability::Streaming.to_string(),
            ));
        }
        let pending = active
            .connection
            .open_stream(method, params)
            .await
            .map_err(|e| self.inner.map_error(e))?;
        Ok(ChunkStream::new(
            pending,
            active.connection,
            self.inner.config.timeouts.stream,
            self.inner.closing.clone(),
        ))
    }

    /// Send several calls in one frame. Results are in submission order.
    pub async fn batch<S>(&self, calls: Vec<(S, Option<Value>)>) -> ClientResult<Vec<ClientResult<Value>>>
    where
        S: Into<String> + Send,
    {
        let active = self.inner.current()?;
        if !active.capabilities.contains(&Capability::BatchRequests) {
            return Err(ClientError::CapabilityNotNegotiated(
                Capability::BatchRequests.to_string(),
            ));
        }
        let calls: Vec<(String, Option<Value>)> = calls
            .into_iter()
            .map(|(method, params)| (method.into(), params))
            .collect();
        if calls.is_empty() {
            return Ok(Vec::new());
        }

        let responses = active
            .connection
            .correlate_batch(calls, self.inner.config.timeouts.request)
            .await
            .map_err(|e| self.inner.map_error(e))?;

        Ok(responses
            .into_iter()
            .map(|outcome| {
                outcome
                    .map_err(|e| self.inner.map_error(e))
                    .and_then(|response| response.into_result().map_err(ClientError::from))
            })
            .collect())
    }

    /// Fire-and-forget notification
    pub async fn notify(&self, method: &str, params: Option<Value>) -> ClientResult<()> {
        let active = self.inner.current()?;
        active
            .connection
            .notify(method, params)
            .await
            .map_err(|e| self.inner.map_error(e))
    }

    /// Round trip to the built-in ping method
    pub async fn ping(&self) -> ClientResult<()> {
        match self.request(PING_METHOD, None).await? {
            Value::String(reply) if reply == "pong" => Ok(()),
            other => Err(ClientError::protocol(format!("Unexpected ping reply: {}", other))),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.inner.state().is_connected() && self.inner.active.read().is_some()
    }

    /// Session id of the current connection
    pub fn session_id(&self) -> Option<String> {
        self.inner.active.read().as_ref().map(|a| a.session_id.clone())
    }

    /// Capabilities agreed with the server for the current connection
    pub fn negotiated_capabilities(&self) -> Option<CapabilitySet> {
        self.inner
            .active
            .read()
            .as_ref()
            .map(|a| a.capabilities.clone())
    }

    pub fn state(&self) -> ClientState {
        self.inner.state()
    }

    /// Watch state changes
    pub fn subscribe_state(&self) -> watch::Receiver<ClientState> {
        self.inner.state.subscribe()
    }

    /// Wait until the client reaches `target`; false on timeout
    pub async fn wait_for_state(&self, target: ClientState, timeout: Duration) -> bool {
        let mut states = self.inner.state.subscribe();
        matches!(
            tokio::time::timeout(timeout, states.wait_for(|state| *state == target)).await,
            Ok(Ok(_))
        )
    }

    /// Close the connection and stop reconnecting. A closed client stays closed.
    pub async fn close(&self) {
        self.inner.closing.cancel();
        let active = self.inner.active.write().take();
        self.inner.apply(ClientEvent::CloseRequested, false);
        if let Some(active) = active {
            active.connection.close().await;
            info!(session_id = %active.session_id, "Client closed");
        }
    }
}

impl Drop for RpcClient {
    fn drop(&mut self) {
        self.inner.closing.cancel();
        let active = self.inner.active.write().take();
        self.inner.apply(ClientEvent::CloseRequested, false);
        if let Some(active) = active {
            // Drop cannot await; finish closing in the background.
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                handle.spawn(async move { active.connection.close().await });
            }
        }
    }
}

impl ClientInner {
    fn state(&self) -> ClientState {
        *self.state.borrow()
    }

    /// Feed an event to the state machine; false when it did not apply
    fn apply(&self, event: ClientEvent, auto_reconnect: bool) -> bool {
        let mut change = None;
        self.state.send_if_modified(|state| match state.transition(event, auto_reconnect) {
            Some(next) => {
                change = Some((*state, next));
                *state = next;
                true
            }
            None => false,
        });
        match change {
            Some((from, to)) => {
                debug!(from = %from, to = %to, event = ?event, "Client state change");
                true
            }
            None => {
                debug!(state = %self.state(), event = ?event, "Ignoring client event");
                false
            }
        }
    }

    fn current(&self) -> ClientResult<Active> {
        if self.closing.is_cancelled() {
            return Err(ClientError::ConnectionClosed);
        }
        self.active.read().clone().ok_or(ClientError::NotConnected)
    }

    fn map_error(&self, error: ConnectionError) -> ClientError {
        connection_error(error, &self.closing)
    }

    /// Open a socket and run the handshake
    async fn establish(&self) -> ClientResult<(Active, FrameReader)> {
        let address = self.config.address();
        let connect_timeout = self.config.timeouts.connect;
        let stream = tokio::time::timeout(connect_timeout, TcpStream::connect(&address))
            .await
            .map_err(|_| ClientError::ConnectTimeout(connect_timeout))??;
        if let Err(e) = stream.set_nodelay(true) {
            debug!(error = %e, "Failed to set TCP_NODELAY");
        }

        let (connection, mut reader) = Connection::open(
            stream,
            ConnectionConfig {
                id_prefix: "req".to_string(),
                max_frame_length: self.config.max_frame_length,
            },
        );
        match self.handshake(&connection, &mut reader).await {
            Ok((session_id, capabilities)) => Ok((
                Active {
                    connection,
                    session_id,
                    capabilities,
                },
                reader,
            )),
            Err(e) => {
                connection.close().await;
                Err(e)
            }
        }
    }

    async fn handshake(
        &self,
        connection: &Connection,
        reader: &mut FrameReader,
    ) -> ClientResult<(String, CapabilitySet)> {
        connection.transition(ConnectionState::Handshaking)?;

        let Credentials { client_id, secret } = &self.config.credentials;
        let params = HandshakeRequest::new(
            client_id.clone(),
            secret.clone(),
            self.config.capabilities.clone(),
        );
        connection
            .send(Request::new(
                "handshake",
                HANDSHAKE_METHOD,
                Some(serde_json::to_value(&params)?),
            ))
            .await?;

        let timeout = self.config.timeouts.handshake;
        let response = tokio::time::timeout(timeout, read_handshake_response(reader))
            .await
            .map_err(|_| ClientError::RequestTimeout(timeout))??;

        let result = match response.into_result() {
            Ok(result) => result,
            Err(e) if e.code == AUTHENTICATION_FAILED => {
                return Err(ClientError::AuthenticationFailed(e.message));
            }
            Err(e) => return Err(e.into()),
        };
        let reply: HandshakeReply = serde_json::from_value(result)?;

        connection.authenticate(Session::new(
            reply.session_id.clone(),
            client_id.clone(),
            reply.negotiated_capabilities.clone(),
        ))?;
        Ok((reply.session_id, reply.negotiated_capabilities))
    }

    /// Publish a freshly handshaken connection and start its receive loop.
    /// Returns false if the client was closed in the meantime.
    fn activate(self: &Arc<Self>, active: Active, reader: FrameReader, auto_reconnect: bool) -> bool {
        let connection = Arc::clone(&active.connection);
        {
            let mut slot = self.active.write();
            if self.closing.is_cancelled() {
                drop(slot);
                tokio::spawn(async move { connection.close().await });
                return false;
            }
            *slot = Some(active);
        }
        self.apply(ClientEvent::HandshakeSucceeded, auto_reconnect);
        self.spawn_receive_loop(connection, reader);
        true
    }

    fn spawn_receive_loop(self: &Arc<Self>, connection: Arc<Connection>, reader: FrameReader) {
        let inner = Arc::clone(self);
        tokio::spawn(async move {
            let reason = Arc::clone(&connection)
                .run(reader, Arc::clone(&inner.router), inner.closing.clone())
                .await;
            inner.on_disconnect(connection, reason).await;
        });
    }

    async fn on_disconnect(self: Arc<Self>, connection: Arc<Connection>, reason: CloseReason) {
        let was_current = {
            let mut slot = self.active.write();
            match slot.as_ref() {
                Some(active) if Arc::ptr_eq(&active.connection, &connection) => {
                    *slot = None;
                    true
                }
                _ => false,
            }
        };
        if !was_current || self.closing.is_cancelled() {
            debug!(reason = ?reason, "Receive loop finished");
            return;
        }

        let reconnect = self.config.reconnect.enabled;
        warn!(reason = ?reason, reconnect, "Connection to RPC server lost");
        self.apply(ClientEvent::ConnectionDropped, reconnect);
        if reconnect {
            self.reconnect().await;
        }
    }

    async fn reconnect(self: &Arc<Self>) {
        let policy: &ReconnectPolicy = &self.config.reconnect;
        let mut attempts = 0u32;
        loop {
            if !policy.should_retry(attempts) {
                error!(attempts, "Giving up on reconnection");
                self.apply(ClientEvent::RetriesExhausted, true);
                return;
            }
            attempts += 1;

            let delay = policy.delay_for_attempt(attempts);
            debug!(attempt = attempts, delay_ms = delay.as_millis() as u64, "Scheduling reconnect");
            tokio::select! {
                _ = self.closing.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }
            if !self.apply(ClientEvent::RetryTimerFired, true) {
                return;
            }

            let outcome = tokio::select! {
                _ = self.closing.cancelled() => return,
                outcome = self.establish() => outcome,
            };
            match outcome {
                Ok((active, reader)) => {
                    let session_id = active.session_id.clone();
                    if self.activate(active, reader, true) {
                        info!(session_id = %session_id, attempt = attempts, "Reconnected to RPC server");
                    }
                    return;
                }
                Err(e) if e.is_authentication_failure() => {
                    error!(error = %e, "Credentials rejected while reconnecting");
                    self.apply(ClientEvent::AuthenticationRejected, true);
                    return;
                }
                Err(e) => {
                    warn!(attempt = attempts, error = %e, "Reconnect attempt failed");
                    self.apply(ClientEvent::TransportFailed, true);
                }
            }
        }
    }
}

async fn read_handshake_response(reader: &mut FrameReader) -> ClientResult<Response> {
    loop {
        match read_frame(reader).await {
            None => {
                return Err(ClientError::Connection(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "server closed the connection during the handshake",
                )));
            }
            Some(Err(e)) => return Err(e.into()),
            Some(Ok(Frame::Single(Message::Response(response)))) => return Ok(response),
            Some(Ok(_)) => debug!("Ignoring frame received before the handshake reply"),
        }
    }
}

/// Builder for RPC clients
pub struct RpcClientBuilder {
    config: ClientConfig,
    router: Router,
}

impl RpcClientBuilder {
    pub fn new() -> Self {
        Self {
            config: ClientConfig::default(),
            router: Router::new(),
        }
    }

    /// Replace the whole configuration
    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.config.host = host.into();
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    pub fn credentials(mut self, client_id: impl Into<String>, secret: impl Into<String>) -> Self {
        self.config.credentials = Credentials::new(client_id, secret);
        self
    }

    /// Request an additional capability
    pub fn capability(mut self, capability: Capability) -> Self {
        self.config.capabilities.insert(capability);
        self
    }

    /// Replace the requested capability set
    pub fn capabilities(mut self, capabilities: impl IntoIterator<Item = Capability>) -> Self {
        self.config.capabilities = capabilities.into_iter().collect();
        self
    }

    pub fn reconnect(mut self, policy: ReconnectPolicy) -> Self {
        self.config.reconnect = policy;
        self
    }

    pub fn timeouts(mut self, timeouts: TimeoutConfig) -> Self {
        self.config.timeouts = timeouts;
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.timeouts.request = timeout;
        self
    }

    /// Serve a method the server may call on this client
    pub fn method<H: RpcHandler + 'static>(mut self, name: impl Into<String>, handler: H) -> Self {
        self.router.register(name, handler);
        self
    }

    pub fn stream_method<H: StreamHandler + 'static>(
        mut self,
        name: impl Into<String>,
        handler: H,
    ) -> Self {
        self.router.register_stream(name, handler);
        self
    }

    /// Handle notifications pushed by the server
    pub fn notification<H: NotificationHandler + 'static>(
        mut self,
        name: impl Into<String>,
        handler: H,
    ) -> Self {
        self.router.register_notification(name, handler);
        self
    }

    pub fn build(self) -> ClientResult<RpcClient> {
        if self.config.host.trim().is_empty() {
            return Err(ClientError::config("host must not be empty"));
        }
        if self.config.port == 0 {
            return Err(ClientError::config("port must not be 0"));
        }
        if self.config.credentials.client_id.trim().is_empty() {
            return Err(ClientError::config("client id must not be empty"));
        }
        Ok(RpcClient::with_router(self.config, self.router))
    }
}

impl Default for RpcClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}
