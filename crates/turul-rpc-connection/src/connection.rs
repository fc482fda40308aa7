//! A persistent, bidirectional JSON-RPC connection.
//!
//! Both peers use the same type: each side can issue requests (tracked in the
//! correlation table) and serve requests (through a [`Router`]). Frames are
//! newline-delimited JSON; all writes go through one writer lock, so frames
//! from concurrent tasks never interleave.

use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures::future::join_all;
use futures::{FutureExt, SinkExt, StreamExt};
use parking_lot::RwLock;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec, LinesCodecError};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, instrument, warn};
use turul_rpc_json_rpc::{
    Capability, CodecError, Dispatched, Frame, Message, Notification, Request, RequestId,
    Response, ResponseStream, Router, RpcErrorObject, SessionContext, codec,
};
use uuid::Uuid;

use crate::correlation::{CorrelationTable, Delivery};
use crate::error::{ConnectionError, ConnectionResult};
use crate::session::Session;
use crate::state::ConnectionState;

pub type BoxedReader = Pin<Box<dyn AsyncRead + Send>>;
pub type BoxedWriter = Pin<Box<dyn AsyncWrite + Send>>;

/// Read half of a connection, consumed by [`Connection::run`]
pub type FrameReader = FramedRead<BoxedReader, LinesCodec>;

type FrameWriter = FramedWrite<BoxedWriter, LinesCodec>;

/// Per-connection settings
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Prefix of the request ids this side allocates
    pub id_prefix: String,
    /// Longest accepted frame in bytes
    pub max_frame_length: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            id_prefix: "req".to_string(),
            max_frame_length: 1024 * 1024, // 1MB
        }
    }
}

/// Why the receive loop stopped
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// The peer closed its end of the stream
    PeerClosed,
    /// The owner requested a graceful shutdown
    Shutdown,
    /// [`Connection::close`] was called
    Local,
    /// Read failure or an unrecoverable framing error
    Transport(String),
}

/// Chunks of a streaming request, in arrival order
pub struct PendingStream {
    id: RequestId,
    receiver: mpsc::UnboundedReceiver<Delivery>,
}

impl PendingStream {
    pub fn id(&self) -> &RequestId {
        &self.id
    }

    /// Next chunk, terminator or error. `None` after the final delivery.
    pub async fn recv(&mut self) -> Option<Delivery> {
        self.receiver.recv().await
    }
}

pub struct Connection {
    id: Uuid,
    config: ConnectionConfig,
    writer: Mutex<FrameWriter>,
    pending: CorrelationTable,
    state: RwLock<ConnectionState>,
    session: RwLock<Option<Session>>,
    request_counter: AtomicU64,
    closed: CancellationToken,
    tasks: TaskTracker,
}

impl Connection {
    /// Wrap a byte stream. The connection starts in `Connecting`.
    pub fn open<S>(stream: S, config: ConnectionConfig) -> (Arc<Self>, FrameReader)
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read_half, write_half) = tokio::io::split(stream);
        let reader: BoxedReader = Box::pin(read_half);
        let writer: BoxedWriter = Box::pin(write_half);

        let reader = FramedRead::new(
            reader,
            LinesCodec::new_with_max_length(config.max_frame_length),
        );
        let connection = Arc::new(Self {
            id: Uuid::now_v7(),
            config,
            writer: Mutex::new(FramedWrite::new(writer, LinesCodec::new())),
            pending: CorrelationTable::new(),
            state: RwLock::new(ConnectionState::Connecting),
            session: RwLock::new(None),
            request_counter: AtomicU64::new(0),
            closed: CancellationToken::new(),
            tasks: TaskTracker::new(),
        });
        debug!(connection_id = %connection.id, "Connection opened");
        (connection, reader)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    pub fn session(&self) -> Option<Session> {
        self.session.read().clone()
    }

    pub fn session_id(&self) -> Option<String> {
        self.session.read().as_ref().map(|s| s.session_id.clone())
    }

    pub fn supports(&self, capability: &Capability) -> bool {
        self.session
            .read()
            .as_ref()
            .is_some_and(|s| s.supports(capability))
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Resolves once the connection has closed
    pub async fn closed(&self) {
        self.closed.cancelled().await
    }

    /// Number of requests still waiting for a response
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn transition(&self, next: ConnectionState) -> ConnectionResult<()> {
        let mut state = self.state.write();
        if !state.can_transition_to(next) {
            return Err(ConnectionError::InvalidTransition {
                from: *state,
                to: next,
            });
        }
        debug!(connection_id = %self.id, from = %*state, to = %next, "Connection state change");
        *state = next;
        Ok(())
    }

    /// Bind a session and move to `Authenticated`
    pub fn authenticate(&self, session: Session) -> ConnectionResult<()> {
        let session_id = session.session_id.clone();
        *self.session.write() = Some(session);
        if let Err(e) = self.transition(ConnectionState::Authenticated) {
            *self.session.write() = None;
            return Err(e);
        }
        info!(connection_id = %self.id, session_id = %session_id, "Connection authenticated");
        Ok(())
    }

    fn session_context(&self) -> SessionContext {
        self.session
            .read()
            .as_ref()
            .map(Session::context)
            .unwrap_or_default()
    }

    fn next_request_id(&self) -> RequestId {
        let n = self.request_counter.fetch_add(1, Ordering::SeqCst) + 1;
        RequestId::new(format!("{}_{}", self.config.id_prefix, n))
    }

    /// Write one frame
    pub async fn send(&self, frame: impl Into<Frame>) -> ConnectionResult<()> {
        if self.is_closed() {
            return Err(ConnectionError::Closed);
        }
        let line = codec::encode(&frame.into())?;
        let mut writer = self.writer.lock().await;
        writer.send(line).await?;
        Ok(())
    }

    /// Answer each request id with `error`. A batch gets one batch frame back.
    pub async fn refuse(&self, ids: Vec<RequestId>, batch: bool, error: RpcErrorObject) {
        debug!(connection_id = %self.id, requests = ids.len(), code = error.code, "Refusing requests");
        let mut refusals: Vec<Message> = ids
            .into_iter()
            .map(|id| Response::error(Some(id), error.clone()).into())
            .collect();
        let frame = match (batch, refusals.pop()) {
            (_, None) => return,
            (false, Some(single)) if refusals.is_empty() => Frame::Single(single),
            (_, Some(last)) => {
                refusals.push(last);
                Frame::Batch(refusals)
            }
        };
        if let Err(e) = self.send(frame).await {
            debug!(connection_id = %self.id, error = %e, "Failed to send refusal");
        }
    }

    /// Fire-and-forget notification
    pub async fn notify(&self, method: &str, params: Option<Value>) -> ConnectionResult<()> {
        self.send(Notification::new(method, params)).await
    }

    /// Send a request and wait for its response
    #[instrument(skip(self, params), fields(connection_id = %self.id))]
    pub async fn correlate(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
    ) -> ConnectionResult<Response> {
        let id = self.next_request_id();
        let rx = self.pending.register(id.clone(), method, Some(timeout))?;
        if let Err(e) = self.send(Request::new(id.clone(), method, params)).await {
            self.pending.remove(&id);
            return Err(e);
        }
        self.await_response(id, rx, timeout).await
    }

    /// Send several requests as one batch frame.
    /// Results come back in submission order whatever order the peer answers in.
    #[instrument(skip(self, calls), fields(connection_id = %self.id, size = calls.len()))]
    pub async fn correlate_batch(
        &self,
        calls: Vec<(String, Option<Value>)>,
        timeout: Duration,
    ) -> ConnectionResult<Vec<ConnectionResult<Response>>> {
        let mut ids = Vec::with_capacity(calls.len());
        let mut receivers = Vec::with_capacity(calls.len());
        let mut messages = Vec::with_capacity(calls.len());

        for (method, params) in calls {
            let id = self.next_request_id();
            match self.pending.register(id.clone(), &method, Some(timeout)) {
                Ok(rx) => receivers.push(rx),
                Err(e) => {
                    for id in &ids {
                        self.pending.remove(id);
                    }
                    return Err(e);
                }
            }
            messages.push(Message::from(Request::new(id.clone(), method, params)));
            ids.push(id);
        }

        if let Err(e) = self.send(Frame::Batch(messages)).await {
            for id in &ids {
                self.pending.remove(id);
            }
            return Err(e);
        }

        let waits = ids
            .into_iter()
            .zip(receivers)
            .map(|(id, rx)| self.await_response(id, rx, timeout));
        Ok(join_all(waits).await)
    }

    /// Send a streaming request; chunks are read from the returned handle
    #[instrument(skip(self, params), fields(connection_id = %self.id))]
    pub async fn open_stream(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> ConnectionResult<PendingStream> {
        let id = self.next_request_id();
        let receiver = self.pending.register_stream(id.clone(), method, None)?;
        if let Err(e) = self.send(Request::streaming(id.clone(), method, params)).await {
            self.pending.remove(&id);
            return Err(e);
        }
        Ok(PendingStream { id, receiver })
    }

    /// Stop waiting for a request. Returns false if it already completed.
    pub fn cancel(&self, id: &RequestId) -> bool {
        self.pending.remove(id)
    }

    async fn await_response(
        &self,
        id: RequestId,
        mut rx: oneshot::Receiver<Delivery>,
        timeout: Duration,
    ) -> ConnectionResult<Response> {
        match tokio::time::timeout(timeout, &mut rx).await {
            Ok(Ok(delivery)) => delivery,
            Ok(Err(_)) => Err(ConnectionError::Closed),
            Err(_) => {
                if self.pending.remove(&id) {
                    warn!(connection_id = %self.id, request_id = %id, ?timeout, "Request timed out");
                    Err(ConnectionError::RequestTimeout { id, timeout })
                } else {
                    // Completed between the timer firing and the removal.
                    rx.await.unwrap_or(Err(ConnectionError::Closed))
                }
            }
        }
    }

    /// Close the connection and fail everything still pending
    pub async fn close(&self) {
        self.finish().await;
    }

    fn begin_close(&self) {
        let mut state = self.state.write();
        if state.can_transition_to(ConnectionState::Closing) {
            *state = ConnectionState::Closing;
        }
    }

    async fn finish(&self) {
        self.begin_close();
        let first = {
            let mut state = self.state.write();
            let first = *state != ConnectionState::Closed;
            *state = ConnectionState::Closed;
            first
        };
        self.closed.cancel();
        let failed = self.pending.fail_all();

        if first {
            let mut writer = self.writer.lock().await;
            if let Err(e) = writer.get_mut().shutdown().await {
                debug!(connection_id = %self.id, error = %e, "Error shutting down writer");
            }
            info!(connection_id = %self.id, failed_requests = failed, "Connection closed");
        }
    }

    /// Receive loop. Runs until the peer disconnects, the connection is
    /// closed locally, or `shutdown` fires. On shutdown, requests already
    /// being served are allowed to finish unless the connection is closed.
    pub async fn run(
        self: Arc<Self>,
        mut reader: FrameReader,
        router: Arc<Router>,
        shutdown: CancellationToken,
    ) -> CloseReason {
        let reason = loop {
            let next = tokio::select! {
                _ = shutdown.cancelled() => break CloseReason::Shutdown,
                _ = self.closed.cancelled() => break CloseReason::Local,
                next = reader.next() => next,
            };

            match next {
                None => break CloseReason::PeerClosed,
                Some(Ok(line)) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    match codec::decode(&line) {
                        Ok(frame) => self.handle_frame(frame, &router).await,
                        Err(e) => self.reject_frame(e).await,
                    }
                }
                Some(Err(LinesCodecError::MaxLineLengthExceeded)) => {
                    self.reject_frame(CodecError::FrameTooLong {
                        max: self.config.max_frame_length,
                    })
                    .await;
                    break CloseReason::Transport("frame too long".to_string());
                }
                Some(Err(LinesCodecError::Io(e))) => break CloseReason::Transport(e.to_string()),
            }
        };

        debug!(connection_id = %self.id, ?reason, "Receive loop stopped");

        if reason == CloseReason::Shutdown {
            self.begin_close();
            self.tasks.close();
            tokio::select! {
                _ = self.tasks.wait() => {}
                _ = self.closed.cancelled() => {}
            }
        }
        self.finish().await;
        reason
    }

    async fn reject_frame(&self, error: CodecError) {
        warn!(connection_id = %self.id, error = %error, "Rejecting malformed frame");
        let response = Response::error(None, error.to_error_object());
        if let Err(e) = self.send(response).await {
            debug!(connection_id = %self.id, error = %e, "Failed to report malformed frame");
        }
    }

    async fn handle_frame(self: &Arc<Self>, frame: Frame, router: &Arc<Router>) {
        match frame {
            Frame::Single(message) => self.handle_message(message, router).await,
            Frame::Batch(messages) => self.handle_batch(messages, router).await,
        }
    }

    /// Reason to refuse a request before routing it
    fn admission_error(&self, request: &Request) -> Option<RpcErrorObject> {
        if !self.state().accepts_requests() {
            return Some(RpcErrorObject::not_authenticated());
        }
        if request.stream && !self.supports(&Capability::Streaming) {
            return Some(RpcErrorObject::capability_not_negotiated(
                Capability::Streaming.as_str(),
            ));
        }
        None
    }

    async fn handle_message(self: &Arc<Self>, message: Message, router: &Arc<Router>) {
        match message {
            Message::Response(response) => {
                self.pending.resolve(response);
            }
            Message::Request(request) => {
                if let Some(rejection) = self.admission_error(&request) {
                    debug!(connection_id = %self.id, method = %request.method, "Request refused");
                    self.refuse(vec![request.id], false, rejection).await;
                    return;
                }
                let connection = Arc::clone(self);
                let router = Arc::clone(router);
                self.tasks
                    .spawn(async move { connection.serve_request(request, router).await });
            }
            Message::Notification(notification) => {
                if !self.state().accepts_requests() {
                    debug!(connection_id = %self.id, method = %notification.method, "Dropping notification before authentication");
                    return;
                }
                let context = self.session_context();
                let router = Arc::clone(router);
                let closed = self.closed.clone();
                self.tasks.spawn(async move {
                    tokio::select! {
                        _ = closed.cancelled() => {}
                        _ = router.notify(notification, context) => {}
                    }
                });
            }
        }
    }

    async fn handle_batch(self: &Arc<Self>, messages: Vec<Message>, router: &Arc<Router>) {
        let mut requests = Vec::new();
        for message in messages {
            match message {
                Message::Request(request) => requests.push(request),
                other => self.handle_message(other, router).await,
            }
        }
        if requests.is_empty() {
            return;
        }

        if !self.state().accepts_requests() {
            let ids = requests.into_iter().map(|r| r.id).collect();
            self.refuse(ids, true, RpcErrorObject::not_authenticated()).await;
            return;
        }
        if !self.supports(&Capability::BatchRequests) {
            let refusal = Response::error(
                None,
                RpcErrorObject::capability_not_negotiated(Capability::BatchRequests.as_str()),
            );
            if let Err(e) = self.send(refusal).await {
                debug!(connection_id = %self.id, error = %e, "Failed to send batch refusal");
            }
            return;
        }

        let connection = Arc::clone(self);
        let router = Arc::clone(router);
        self.tasks
            .spawn(async move { connection.serve_batch(requests, router).await });
    }

    async fn serve_request(self: Arc<Self>, request: Request, router: Arc<Router>) {
        let id = request.id.clone();
        let method = request.method.clone();
        let context = self.session_context();

        let work = async {
            match router.dispatch(request, context).await {
                Dispatched::Response(response) => self.send(response).await,
                Dispatched::Stream { id, items } => self.emit_stream(id, items).await,
            }
        };

        tokio::select! {
            _ = self.closed.cancelled() => {
                debug!(connection_id = %self.id, request_id = %id, "Abandoning request: connection closed");
            }
            outcome = AssertUnwindSafe(work).catch_unwind() => match outcome {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    debug!(connection_id = %self.id, request_id = %id, error = %e, "Failed to deliver response");
                }
                Err(_) => {
                    error!(connection_id = %self.id, method = %method, "Request handler panicked");
                    let reply = Response::error(Some(id.clone()), RpcErrorObject::internal_error(None));
                    if let Err(e) = self.send(reply).await {
                        debug!(connection_id = %self.id, request_id = %id, error = %e, "Failed to report handler panic");
                    }
                }
            },
        }
    }

    /// Pull items from a handler stream and write them as chunks, then the terminator
    async fn emit_stream(&self, id: RequestId, mut items: ResponseStream) -> ConnectionResult<()> {
        let mut count = 0usize;
        while let Some(item) = items.next().await {
            match item {
                Ok(value) => {
                    self.send(Response::chunk(id.clone(), value)).await?;
                    count += 1;
                }
                Err(error) => {
                    debug!(connection_id = %self.id, request_id = %id, code = error.code, "Stream ended with error");
                    return self.send(Response::error(Some(id), error)).await;
                }
            }
        }
        debug!(connection_id = %self.id, request_id = %id, chunks = count, "Stream completed");
        self.send(Response::end_of_stream(id)).await
    }

    async fn serve_batch(self: Arc<Self>, requests: Vec<Request>, router: Arc<Router>) {
        let context = self.session_context();
        let connection_id = self.id;
        let work = join_all(requests.into_iter().map(|request| {
            let router = &router;
            let context = context.clone();
            async move {
                let id = request.id.clone();
                let method = request.method.clone();
                let call = async move { router.dispatch(request, context).await.into_response().await };
                match AssertUnwindSafe(call).catch_unwind().await {
                    Ok(response) => response,
                    Err(_) => {
                        error!(connection_id = %connection_id, method = %method, "Batch entry panicked");
                        Response::error(Some(id), RpcErrorObject::internal_error(None))
                    }
                }
            }
        }));

        tokio::select! {
            _ = self.closed.cancelled() => {}
            responses = work => {
                let reply = Frame::Batch(responses.into_iter().map(Message::from).collect());
                if let Err(e) = self.send(reply).await {
                    debug!(connection_id = %self.id, error = %e, "Failed to deliver batch response");
                }
            }
        }
    }
}

/// Read the next frame outside the receive loop (used for the handshake).
/// Returns `None` at end of stream.
pub async fn read_frame(reader: &mut FrameReader) -> Option<ConnectionResult<Frame>> {
    loop {
        match reader.next().await? {
            Ok(line) if line.trim().is_empty() => continue,
            Ok(line) => return Some(codec::decode(&line).map_err(ConnectionError::from)),
            Err(e) => return Some(Err(e.into())),
        }
    }
}
