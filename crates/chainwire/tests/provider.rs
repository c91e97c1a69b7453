//! End-to-end provider tests against local HTTP, WebSocket, and IPC peers.

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;

use chainwire::{
    CallOptions, Endpoint, HealthStatus, Provider, ProviderBuilder, ProviderConfig, RpcError,
    TransportKind, WsConfig,
};

/// Spawn a WebSocket peer that hands every decoded request to `handler`
/// and writes back whatever frames it returns.
async fn ws_peer<F>(mut handler: F) -> String
where
    F: FnMut(Value) -> Vec<Value> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (tcp, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
        while let Some(Ok(msg)) = ws.next().await {
            let Message::Text(text) = msg else { continue };
            let req: Value = serde_json::from_str(text.as_str()).unwrap();
            for reply in handler(req) {
                if ws.send(Message::Text(reply.to_string().into())).await.is_err() {
                    return;
                }
            }
        }
    });
    format!("ws://{addr}")
}

#[tokio::test]
async fn http_call_returns_result() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/")
        .match_body(mockito::Matcher::PartialJsonString(
            r#"{"jsonrpc":"2.0","method":"eth_blockNumber","params":[]}"#.into(),
        ))
        .with_status(200)
        .with_body(r#"{"jsonrpc":"2.0","id":1,"result":"0x1b4"}"#)
        .create_async()
        .await;

    let provider = Provider::connect(&server.url()).await.unwrap();
    assert_eq!(provider.kind(), TransportKind::Http);
    let result = provider.make_request("eth_blockNumber", vec![]).await.unwrap();
    assert_eq!(result, json!("0x1b4"));
    assert_eq!(provider.pending_requests(), 0);
    mock.assert_async().await;
}

#[tokio::test]
async fn http_rpc_error_is_surfaced_verbatim() {
    let mut server = mockito::Server::new_async().await;
    let _mock = server
        .mock("POST", "/")
        .with_status(200)
        .with_body(r#"{"jsonrpc":"2.0","id":1,"error":{"code":-32601,"message":"method not found"}}"#)
        .create_async()
        .await;

    let provider = Provider::connect(&server.url()).await.unwrap();
    let err = provider.make_request("eth_foo", vec![]).await.unwrap_err();
    match err {
        RpcError::Rpc(e) => {
            assert_eq!(e.code, -32601);
            assert_eq!(e.message, "method not found");
        }
        other => panic!("expected rpc error, got {other:?}"),
    }
}

#[tokio::test]
async fn typed_request_deserializes_result() {
    let mut server = mockito::Server::new_async().await;
    let _mock = server
        .mock("POST", "/")
        .match_body(mockito::Matcher::PartialJsonString(
            r#"{"method":"eth_getBalance","params":["0xabc","latest"]}"#.into(),
        ))
        .with_status(200)
        .with_body(r#"{"jsonrpc":"2.0","id":1,"result":"0x0"}"#)
        .create_async()
        .await;

    let provider = Provider::connect(&server.url()).await.unwrap();
    let balance: String = provider
        .request("eth_getBalance", ("0xabc", "latest"))
        .await
        .unwrap();
    assert_eq!(balance, "0x0");
}

#[tokio::test]
async fn unsupported_scheme_is_rejected_before_connecting() {
    let err = Provider::connect("ftp://node.example").await.unwrap_err();
    assert!(matches!(err, RpcError::InvalidEndpoint { .. }));
}

#[tokio::test]
async fn ws_concurrent_calls_correlate_out_of_order() {
    const CALLS: usize = 100;
    let mut held = Vec::new();
    let url = ws_peer(move |req| {
        held.push(json!({"jsonrpc": "2.0", "id": req["id"], "result": req["params"][0]}));
        if held.len() == CALLS {
            held.drain(..).rev().collect()
        } else {
            Vec::new()
        }
    })
    .await;

    let provider = Arc::new(Provider::connect(&url).await.unwrap());
    let calls = (0..CALLS).map(|i| {
        let provider = provider.clone();
        async move {
            let tag = format!("0x{i:x}");
            let result = provider
                .make_request("eth_getBalance", vec![json!(tag.clone())])
                .await
                .unwrap();
            assert_eq!(result, json!(tag));
        }
    });
    futures::future::join_all(calls).await;
    assert_eq!(provider.pending_requests(), 0);
}

#[tokio::test]
async fn ws_timeout_evicts_pending_entry() {
    let url = ws_peer(|_| Vec::new()).await;
    let provider = Provider::connect(&url).await.unwrap();

    let opts = CallOptions::new().timeout(Duration::from_millis(10)).retries(0);
    let err = provider
        .make_request_with("eth_blockNumber", vec![], &opts)
        .await
        .unwrap_err();
    assert!(matches!(err, RpcError::Timeout { .. }));
    assert_eq!(provider.pending_requests(), 0);
}

#[tokio::test]
async fn ws_close_fails_every_pending_call() {
    let url = ws_peer(|_| Vec::new()).await;
    let provider = Arc::new(Provider::connect(&url).await.unwrap());

    let handles: Vec<_> = (0..3)
        .map(|_| {
            let provider = provider.clone();
            tokio::spawn(async move { provider.make_request("eth_blockNumber", vec![]).await })
        })
        .collect();

    while provider.pending_requests() < 3 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    provider.close().await;
    provider.close().await;

    for handle in handles {
        assert!(matches!(handle.await.unwrap(), Err(RpcError::Closed)));
    }
    assert!(matches!(
        provider.make_request("eth_blockNumber", vec![]).await,
        Err(RpcError::Closed)
    ));
}

#[tokio::test]
async fn ws_subscription_receives_notifications() {
    let url = ws_peer(|req| match req["method"].as_str() {
        Some("eth_subscribe") => vec![json!({"jsonrpc": "2.0", "id": req["id"], "result": "0xfeed"})],
        Some("eth_unsubscribe") => vec![json!({"jsonrpc": "2.0", "id": req["id"], "result": true})],
        _ => vec![
            json!({
                "jsonrpc": "2.0",
                "method": "eth_subscription",
                "params": {"subscription": "0xfeed", "result": {"number": "0x10"}}
            }),
            json!({"jsonrpc": "2.0", "id": req["id"], "result": "0x10"}),
        ],
    })
    .await;
    let provider = Provider::connect(&url).await.unwrap();

    let (id, mut rx) = provider
        .subscribe("eth_subscribe", vec![json!("newHeads")])
        .await
        .unwrap();
    assert_eq!(id.0, "0xfeed");

    // The peer pushes a notification ahead of this reply.
    provider.make_request("eth_blockNumber", vec![]).await.unwrap();
    let head = tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(head["number"], "0x10");

    assert!(provider.unsubscribe("eth_unsubscribe", &id).await.unwrap());
}

#[tokio::test]
async fn ws_subscription_with_fallback_stays_on_primary() {
    let primary = ws_peer(|req| vec![json!({"jsonrpc": "2.0", "id": req["id"], "result": "0xfeed"})]).await;
    let backup = ws_peer(|req| vec![json!({"jsonrpc": "2.0", "id": req["id"], "result": "0xbad"})]).await;

    let provider = Provider::builder(primary).fallback(backup).build().await.unwrap();
    for _ in 0..3 {
        let (id, _rx) = provider
            .subscribe("eth_subscribe", vec![json!("newHeads")])
            .await
            .unwrap();
        assert_eq!(id.as_str(), "0xfeed");
    }
}

#[tokio::test]
async fn ws_call_during_reconnect_fails_fast_and_is_not_replayed() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (seen_tx, mut seen_rx) = tokio::sync::mpsc::unbounded_channel::<String>();

    tokio::spawn(async move {
        let (tcp, _) = listener.accept().await.unwrap();
        drop(tokio_tungstenite::accept_async(tcp).await.unwrap());

        let (tcp, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
        while let Some(Ok(Message::Text(text))) = ws.next().await {
            let req: Value = serde_json::from_str(text.as_str()).unwrap();
            seen_tx.send(req["method"].as_str().unwrap().to_string()).unwrap();
            let reply = json!({"jsonrpc": "2.0", "id": req["id"], "result": "0x1"});
            ws.send(Message::Text(reply.to_string().into())).await.unwrap();
        }
    });

    let config = ProviderConfig {
        ws: WsConfig {
            reconnect_initial: Duration::from_millis(400),
            reconnect_max: Duration::from_millis(400),
        },
        ..Default::default()
    };
    let provider = Provider::builder(format!("ws://{addr}"))
        .config(config)
        .build()
        .await
        .unwrap();

    tokio::time::timeout(Duration::from_secs(2), async {
        while provider.health() != HealthStatus::Degraded {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    let opts = CallOptions::new().timeout(Duration::from_millis(50));
    let err = provider
        .make_request_with("eth_sendRawTransaction", vec![json!("0xf86c")], &opts)
        .await
        .unwrap_err();
    assert!(
        matches!(err, RpcError::Transport { kind: TransportKind::WebSocket, .. }),
        "got {err:?}"
    );

    tokio::time::timeout(Duration::from_secs(2), async {
        while provider.health() != HealthStatus::Healthy {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    assert_eq!(provider.make_request("eth_blockNumber", vec![]).await.unwrap(), json!("0x1"));
    assert_eq!(seen_rx.recv().await.unwrap(), "eth_blockNumber");
    assert!(seen_rx.try_recv().is_err());
}

#[tokio::test]
async fn builder_accepts_parsed_endpoint() {
    let mut server = mockito::Server::new_async().await;
    let _mock = server
        .mock("POST", "/")
        .with_status(200)
        .with_body(r#"{"jsonrpc":"2.0","id":1,"result":"0x5"}"#)
        .create_async()
        .await;

    let endpoint = Endpoint::parse(&server.url()).unwrap();
    let provider = ProviderBuilder::from_endpoint(endpoint.clone())
        .build()
        .await
        .unwrap();
    assert_eq!(provider.endpoint(), &endpoint);
    assert_eq!(provider.make_request("eth_chainId", vec![]).await.unwrap(), json!("0x5"));
}

#[tokio::test]
async fn http_subscribe_is_rejected() {
    let server = mockito::Server::new_async().await;
    let provider = Provider::connect(&server.url()).await.unwrap();
    let err = provider
        .subscribe("eth_subscribe", vec![json!("newHeads")])
        .await
        .unwrap_err();
    assert!(err.is_transport());
}

#[tokio::test]
async fn failover_reaches_fallback_endpoint() {
    let dead = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let dead_url = format!("http://{}", dead.local_addr().unwrap());
    drop(dead);

    let mut server = mockito::Server::new_async().await;
    let _mock = server
        .mock("POST", "/")
        .with_status(200)
        .with_body(r#"{"jsonrpc":"2.0","id":1,"result":"0x1"}"#)
        .create_async()
        .await;

    let provider = Provider::builder(dead_url)
        .fallback(server.url())
        .max_retries(0)
        .build()
        .await
        .unwrap();
    let result = provider.make_request("eth_chainId", vec![]).await.unwrap();
    assert_eq!(result, json!("0x1"));
}

#[cfg(unix)]
#[tokio::test]
async fn ipc_responses_split_and_correlated_out_of_order() {
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::net::UnixListener;

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("geth.ipc");
    let listener = UnixListener::bind(&path).unwrap();

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let (read, mut write) = stream.into_split();
        let mut lines = BufReader::new(read).lines();
        let mut replies = Vec::new();
        while replies.len() < 3 {
            let Ok(Some(line)) = lines.next_line().await else { return };
            let req: Value = serde_json::from_str(&line).unwrap();
            replies.push(json!({"jsonrpc": "2.0", "id": req["id"], "result": req["method"]}));
        }
        // All three replies in one write, reversed, no separators.
        let blob: String = replies.iter().rev().map(Value::to_string).collect();
        write.write_all(blob.as_bytes()).await.unwrap();
        let _ = lines.next_line().await;
    });

    let provider = Arc::new(Provider::connect(path.to_str().unwrap()).await.unwrap());
    assert_eq!(provider.kind(), TransportKind::Ipc);

    let methods = ["eth_chainId", "net_version", "eth_gasPrice"];
    let calls = methods.iter().map(|&method| {
        let provider = provider.clone();
        async move { (method, provider.make_request(method, vec![]).await.unwrap()) }
    });
    for (method, result) in futures::future::join_all(calls).await {
        assert_eq!(result, json!(method));
    }
    assert_eq!(provider.pending_requests(), 0);
}
