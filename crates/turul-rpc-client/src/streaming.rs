//! Streaming support for the RPC client

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use futures::stream::{BoxStream, Stream, StreamExt};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use turul_rpc_connection::{Connection, ConnectionError, PendingStream};
use turul_rpc_json_rpc::RequestId;

use crate::client::connection_error;
use crate::error::{ClientError, ClientResult};

/// Items of a streamed reply, in the order the server produced them.
///
/// Ends after the server's terminator. Fails with
/// [`ClientError::RequestTimeout`] when no chunk arrives within the
/// configured stream timeout. Dropping the stream early stops tracking it.
pub struct ChunkStream {
    id: RequestId,
    connection: Arc<Connection>,
    items: BoxStream<'static, ClientResult<Value>>,
}

impl ChunkStream {
    pub(crate) fn new(
        mut pending: PendingStream,
        connection: Arc<Connection>,
        idle_timeout: Duration,
        closing: CancellationToken,
    ) -> Self {
        let id = pending.id().clone();
        let stream_connection = Arc::clone(&connection);
        let stream_id = id.clone();

        let items = async_stream::stream! {
            loop {
                let delivery = match tokio::time::timeout(idle_timeout, pending.recv()).await {
                    Ok(delivery) => delivery,
                    Err(_) => {
                        stream_connection.cancel(&stream_id);
                        yield Err(ClientError::RequestTimeout(idle_timeout));
                        break;
                    }
                };
                match delivery {
                    None => {
                        yield Err(connection_error(ConnectionError::Closed, &closing));
                        break;
                    }
                    Some(Err(e)) => {
                        yield Err(connection_error(e, &closing));
                        break;
                    }
                    Some(Ok(response)) => {
                        if response.is_end_of_stream() {
                            debug!(request_id = %stream_id, "Stream completed");
                            break;
                        }
                        // A plain reply (no `done` flag) is the only item.
                        let last = response.done.is_none();
                        match response.into_result() {
                            Ok(item) => yield Ok(item),
                            Err(e) => {
                                yield Err(ClientError::from(e));
                                break;
                            }
                        }
                        if last {
                            break;
                        }
                    }
                }
            }
        }
        .boxed();

        Self {
            id,
            connection,
            items,
        }
    }

    pub fn id(&self) -> &RequestId {
        &self.id
    }
}

impl Stream for ChunkStream {
    type Item = ClientResult<Value>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.items.poll_next_unpin(cx)
    }
}

impl Drop for ChunkStream {
    fn drop(&mut self) {
        // No-op once the terminator has removed the entry.
        self.connection.cancel(&self.id);
    }
}
