//! Correlation of outstanding requests with their responses.
//!
//! Every entry is removed exactly once: by the response that completes it, by
//! the caller's timeout through [`CorrelationTable::remove`], or by
//! [`CorrelationTable::fail_all`] when the connection closes. All three go
//! through the same mutex, so whichever comes first wins and the others
//! observe a missing entry.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};
use turul_rpc_json_rpc::{RequestId, Response};

use crate::error::ConnectionError;

/// Outcome delivered to a waiting caller
pub type Delivery = Result<Response, ConnectionError>;

enum ResultChannel {
    Unary(oneshot::Sender<Delivery>),
    Stream(mpsc::UnboundedSender<Delivery>),
}

struct PendingRequest {
    method: String,
    created_at: Instant,
    timeout: Option<Duration>,
    channel: ResultChannel,
}

/// Table of requests awaiting a response
#[derive(Default)]
pub struct CorrelationTable {
    pending: Mutex<HashMap<RequestId, PendingRequest>>,
}

impl CorrelationTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a request expecting a single response
    pub fn register(
        &self,
        id: RequestId,
        method: &str,
        timeout: Option<Duration>,
    ) -> Result<oneshot::Receiver<Delivery>, ConnectionError> {
        let (tx, rx) = oneshot::channel();
        self.insert(id, method, timeout, ResultChannel::Unary(tx))?;
        Ok(rx)
    }

    /// Register a request expecting a sequence of chunks
    pub fn register_stream(
        &self,
        id: RequestId,
        method: &str,
        timeout: Option<Duration>,
    ) -> Result<mpsc::UnboundedReceiver<Delivery>, ConnectionError> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.insert(id, method, timeout, ResultChannel::Stream(tx))?;
        Ok(rx)
    }

    fn insert(
        &self,
        id: RequestId,
        method: &str,
        timeout: Option<Duration>,
        channel: ResultChannel,
    ) -> Result<(), ConnectionError> {
        let mut pending = self.pending.lock();
        if pending.contains_key(&id) {
            return Err(ConnectionError::DuplicateRequestId(id));
        }
        pending.insert(
            id,
            PendingRequest {
                method: method.to_string(),
                created_at: Instant::now(),
                timeout,
                channel,
            },
        );
        Ok(())
    }

    /// Route a response to its waiting caller. Returns false when nobody is waiting.
    pub fn resolve(&self, response: Response) -> bool {
        let Some(id) = response.id.clone() else {
            warn!("Received response without an id: {:?}", response);
            return false;
        };

        let mut pending = self.pending.lock();
        let is_stream = pending
            .get(&id)
            .map(|entry| matches!(entry.channel, ResultChannel::Stream(_)));
        let is_stream = match is_stream {
            Some(is_stream) => is_stream,
            None => {
                drop(pending);
                warn!(request_id = %id, "Received response for unknown request");
                return false;
            }
        };

        // Stream items keep the entry; anything else completes it.
        if is_stream && response.is_chunk() {
            if let Some(PendingRequest {
                channel: ResultChannel::Stream(tx),
                ..
            }) = pending.get(&id)
            {
                // Sent under the lock so chunks keep their arrival order.
                let _ = tx.send(Ok(response));
            }
            return true;
        }

        let Some(entry) = pending.remove(&id) else {
            return false;
        };
        drop(pending);

        debug!(
            request_id = %id,
            method = %entry.method,
            elapsed_ms = entry.created_at.elapsed().as_millis() as u64,
            timeout_ms = entry.timeout.map(|t| t.as_millis() as u64),
            "Request completed"
        );
        match entry.channel {
            ResultChannel::Unary(tx) => {
                let _ = tx.send(Ok(response));
            }
            ResultChannel::Stream(tx) => {
                let _ = tx.send(Ok(response));
            }
        }
        true
    }

    /// Authoritative removal, used by timeouts and cancellation.
    /// Returns true when the entry was still pending.
    pub fn remove(&self, id: &RequestId) -> bool {
        self.pending.lock().remove(id).is_some()
    }

    /// Fail every outstanding request, returning how many were failed
    pub fn fail_all(&self) -> usize {
        let drained: Vec<(RequestId, PendingRequest)> = self.pending.lock().drain().collect();
        let count = drained.len();
        for (id, entry) in drained {
            debug!(request_id = %id, method = %entry.method, "Failing pending request: connection closed");
            match entry.channel {
                ResultChannel::Unary(tx) => {
                    let _ = tx.send(Err(ConnectionError::Closed));
                }
                ResultChannel::Stream(tx) => {
                    let _ = tx.send(Err(ConnectionError::Closed));
                }
            }
        }
        count
    }

    pub fn contains(&self, id: &RequestId) -> bool {
        self.pending.lock().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }
}
