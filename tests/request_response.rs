//! End-to-end request/response behaviour over a real TCP connection

mod common;

use std::time::{Duration, Instant};

use futures::future::join_all;
use serde_json::json;
use turul_rpc_client::ClientError;

use common::{RawConnection, connected_client, init_tracing, server_builder, start};

#[tokio::test]
async fn test_echo_round_trip() {
    init_tracing();
    let (server, addr) = start(server_builder()).await;
    let client = connected_client(addr).await;

    let value = client
        .request("echo", Some(json!({"message": "hello"})))
        .await
        .unwrap();
    assert_eq!(value, json!({"message": "hello"}));

    let sum = client.request("add", Some(json!([20, 22]))).await.unwrap();
    assert_eq!(sum, json!(42));

    client.close().await;
    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_unknown_method_keeps_connection_usable() {
    init_tracing();
    let (server, addr) = start(server_builder()).await;
    let client = connected_client(addr).await;

    let err = client.request("does.not.exist", None).await.unwrap_err();
    assert_eq!(err.error_code(), Some(-32601));
    assert!(client.is_connected());
    assert_eq!(client.request("echo", Some(json!(1))).await.unwrap(), json!(1));

    client.close().await;
    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_invalid_params_reported_to_caller() {
    init_tracing();
    let (server, addr) = start(server_builder()).await;
    let client = connected_client(addr).await;

    let err = client
        .request("add", Some(json!(["one", "two"])))
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), Some(-32602));

    client.close().await;
    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_ping() {
    init_tracing();
    let (server, addr) = start(server_builder()).await;
    let client = connected_client(addr).await;

    client.ping().await.unwrap();

    client.close().await;
    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_malformed_frame_gets_single_parse_error() {
    init_tracing();
    let (server, addr) = start(server_builder()).await;
    let mut raw = RawConnection::open(addr).await;
    let reply = raw.handshake().await;
    assert!(reply["result"]["sessionId"].is_string());

    raw.send_line("{\"jsonrpc\": \"2.0\", \"id\": ").await;
    let error = raw.recv().await.unwrap();
    assert_eq!(error["error"]["code"], json!(-32700));
    assert_eq!(error["id"], json!(null));

    raw.send(json!({"jsonrpc": "2.0", "id": "after", "method": "echo", "params": [7]}))
        .await;
    let next = raw.recv().await.unwrap();
    assert_eq!(next["id"], json!("after"));
    assert_eq!(next["result"], json!([7]));

    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_numeric_ids_are_invalid_requests() {
    init_tracing();
    let (server, addr) = start(server_builder()).await;
    let mut raw = RawConnection::open(addr).await;
    raw.handshake().await;

    raw.send(json!({"jsonrpc": "2.0", "id": 5, "method": "echo"})).await;
    let error = raw.recv().await.unwrap();
    assert_eq!(error["error"]["code"], json!(-32600));

    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_concurrent_requests_are_correlated() {
    init_tracing();
    let (server, addr) = start(server_builder()).await;
    let client = connected_client(addr).await;

    let calls = (0..10).map(|i| {
        let client = &client;
        async move {
            // Later calls sleep less so responses come back out of order.
            let value = client
                .request("sleep", Some(json!({"ms": (10 - i) * 10})))
                .await?;
            let echoed = client.request("echo", Some(json!({"n": i}))).await?;
            Ok::<_, ClientError>((i, value, echoed))
        }
    });

    for outcome in join_all(calls).await {
        let (i, slept, echoed) = outcome.unwrap();
        assert_eq!(slept, json!({"slept": (10 - i) * 10}));
        assert_eq!(echoed, json!({"n": i}));
    }

    client.close().await;
    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_request_timeout_does_not_wait_for_slow_handler() {
    init_tracing();
    let (server, addr) = start(server_builder()).await;
    let client = connected_client(addr).await;

    let started = Instant::now();
    let err = client
        .request_with_timeout(
            "sleep",
            Some(json!({"ms": 1000})),
            Duration::from_millis(100),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::RequestTimeout(d) if d == Duration::from_millis(100)));
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(100));
    assert!(elapsed < Duration::from_millis(300), "took {:?}", elapsed);

    // The late response is dropped and the connection carries on.
    tokio::time::sleep(Duration::from_millis(1100)).await;
    assert!(client.is_connected());
    assert_eq!(
        client.request("echo", Some(json!("still here"))).await.unwrap(),
        json!("still here")
    );

    client.close().await;
    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_notifications_get_no_reply() {
    init_tracing();
    let (server, addr) = start(server_builder()).await;
    let mut raw = RawConnection::open(addr).await;
    raw.handshake().await;

    raw.send(json!({"jsonrpc": "2.0", "method": "echo", "params": [1]}))
        .await;
    raw.send(json!({"jsonrpc": "2.0", "id": "marker", "method": "echo", "params": [2]}))
        .await;
    let next = raw.recv().await.unwrap();
    assert_eq!(next["id"], json!("marker"));

    server.stop().await.unwrap();
}
