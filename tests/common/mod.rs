//! Shared fixtures for the end-to-end tests

#![allow(dead_code)]

use std::net::SocketAddr;
use std::time::Duration;

use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tracing_subscriber::EnvFilter;
use turul_rpc_client::{RpcClient, RpcClientBuilder};
use turul_rpc_server::prelude::*;

pub const CLIENT_ID: &str = "test-client";
pub const SECRET: &str = "test-secret";

/// Log to the test writer; `RUST_LOG` overrides the default level
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

/// Server on an ephemeral port with the methods most tests call
pub fn server_builder() -> RpcServerBuilder {
    RpcServer::builder()
        .bind_address("127.0.0.1:0".parse().unwrap())
        .client(CLIENT_ID, SECRET)
        .method(
            "echo",
            handler_fn(|request: Request, _ctx: SessionContext| async move {
                Ok(request.params.unwrap_or(Value::Null))
            }),
        )
        .method(
            "add",
            handler_fn(|request: Request, _ctx: SessionContext| async move {
                let (a, b): (i64, i64) = request.parse_params()?;
                Ok(json!(a + b))
            }),
        )
        .method(
            "sleep",
            handler_fn(|request: Request, _ctx: SessionContext| async move {
                let ms = request.param("ms").and_then(Value::as_u64).unwrap_or(0);
                tokio::time::sleep(Duration::from_millis(ms)).await;
                Ok(json!({"slept": ms}))
            }),
        )
        .method(
            "whoami",
            handler_fn(|_request: Request, ctx: SessionContext| async move {
                Ok(json!({"sessionId": ctx.session_id, "clientId": ctx.client_id}))
            }),
        )
        .stream_method(
            "count",
            stream_fn(|request: Request, _ctx: SessionContext| {
                let n = request.param("n").and_then(Value::as_u64).unwrap_or(0);
                async_stream::stream! {
                    for i in 0..n {
                        yield Ok::<Value, HandlerError>(json!(i));
                    }
                }
            }),
        )
}

pub async fn start(builder: RpcServerBuilder) -> (RpcServer, SocketAddr) {
    let server = builder.build().expect("valid server configuration");
    let addr = server.start().await.expect("server starts");
    (server, addr)
}

pub fn client_builder(addr: SocketAddr) -> RpcClientBuilder {
    RpcClient::builder()
        .host(addr.ip().to_string())
        .port(addr.port())
        .credentials(CLIENT_ID, SECRET)
        .request_timeout(Duration::from_secs(5))
}

pub async fn connected_client(addr: SocketAddr) -> RpcClient {
    let client = client_builder(addr).build().expect("valid client configuration");
    client.connect().await.expect("client connects");
    client
}

/// Line-level access to a server, for frames the client never sends
pub struct RawConnection {
    lines: Lines<BufReader<OwnedReadHalf>>,
    writer: OwnedWriteHalf,
}

impl RawConnection {
    pub async fn open(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.expect("connect");
        let (read_half, writer) = stream.into_split();
        Self {
            lines: BufReader::new(read_half).lines(),
            writer,
        }
    }

    pub async fn send_line(&mut self, line: &str) {
        self.writer.write_all(line.as_bytes()).await.unwrap();
        self.writer.write_all(b"\n").await.unwrap();
    }

    pub async fn send(&mut self, value: Value) {
        self.send_line(&value.to_string()).await;
    }

    /// Next frame, or None once the server has closed the socket
    pub async fn recv(&mut self) -> Option<Value> {
        let line = tokio::time::timeout(Duration::from_secs(5), self.lines.next_line())
            .await
            .expect("frame within 5s")
            .ok()??;
        Some(serde_json::from_str(&line).expect("server frames are JSON"))
    }

    pub async fn handshake(&mut self) -> Value {
        self.send(json!({
            "jsonrpc": "2.0",
            "id": "hs",
            "method": "rpc.handshake",
            "params": {
                "clientId": CLIENT_ID,
                "secret": SECRET,
                "requestedCapabilities": ["STREAMING", "BATCH_REQUESTS"]
            }
        }))
        .await;
        self.recv().await.expect("handshake reply")
    }
}
