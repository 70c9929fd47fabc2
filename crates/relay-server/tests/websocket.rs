//! End-to-end tests against a running server.

use futures_util::{SinkExt, StreamExt};
use relay_server::{serve, AppState, Config};
use relay_store::{MemoryStore, MessageStore};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{oneshot, watch};
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct TestServer {
    addr: SocketAddr,
    state: Arc<AppState>,
    store: Arc<MemoryStore>,
    shutdown: Option<oneshot::Sender<()>>,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    async fn start(configure: impl FnOnce(&mut Config)) -> Self {
        let mut config = Config::default();
        config.host = "127.0.0.1".to_string();
        config.port = 0;
        config.store.database_url = None;
        config.metrics.enabled = false;
        configure(&mut config);

        let store = Arc::new(MemoryStore::new());
        let state = Arc::new(AppState::new(
            config,
            Arc::clone(&store) as Arc<dyn MessageStore>,
        ));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = oneshot::channel::<()>();

        let handle = tokio::spawn({
            let state = Arc::clone(&state);
            async move {
                serve(listener, state, async {
                    let _ = rx.await;
                })
                .await
                .unwrap();
            }
        });

        Self {
            addr,
            state,
            store,
            shutdown: Some(tx),
            handle,
        }
    }

    async fn connect(&self) -> Client {
        let url = format!("ws://{}/ws", self.addr);
        let (ws, _) = connect_async(url).await.unwrap();
        ws
    }

    async fn get(&self, path: &str) -> String {
        let mut stream = TcpStream::connect(self.addr).await.unwrap();
        let request = format!("GET {path} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n");
        stream.write_all(request.as_bytes()).await.unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        response
    }

    async fn stop(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        tokio::time::timeout(Duration::from_secs(5), self.handle)
            .await
            .unwrap()
            .unwrap();
    }
}

async fn send_json(ws: &mut Client, value: Value) {
    ws.send(Message::Text(value.to_string())).await.unwrap();
}

/// Next text frame as JSON, skipping control frames.
async fn recv_json(ws: &mut Client) -> Value {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(2), ws.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("stream ended")
            .unwrap();
        if let Message::Text(text) = msg {
            return serde_json::from_str(&text).unwrap();
        }
    }
}

/// Assert no text frame arrives within a short window.
async fn assert_silent(ws: &mut Client) {
    let deadline = tokio::time::sleep(Duration::from_millis(200));
    tokio::pin!(deadline);
    loop {
        tokio::select! {
            _ = &mut deadline => return,
            msg = ws.next() => match msg {
                Some(Ok(Message::Text(text))) => panic!("unexpected frame: {text}"),
                Some(Ok(_)) => continue,
                _ => return,
            },
        }
    }
}

async fn subscribe(ws: &mut Client, channel: &str) {
    send_json(ws, json!({"type": "subscribe", "channelName": channel})).await;
    assert_eq!(
        recv_json(ws).await,
        json!({"type": "subscribed", "channelName": channel})
    );
}

#[tokio::test]
async fn test_publish_reaches_other_members_only() {
    let server = TestServer::start(|_| {}).await;
    let mut a = server.connect().await;
    let mut b = server.connect().await;

    subscribe(&mut a, "room1").await;
    subscribe(&mut b, "room1").await;

    send_json(
        &mut a,
        json!({"type": "message", "channelName": "room1", "message": "hi", "senderId": "u1"}),
    )
    .await;

    let frame = recv_json(&mut b).await;
    assert_eq!(frame["type"], "message");
    assert_eq!(frame["channelName"], "room1");
    assert_eq!(frame["data"]["message"], "hi");
    assert_eq!(frame["data"]["senderId"], "u1");
    assert_eq!(frame["data"]["channelName"], "room1");
    assert!(frame["data"]["id"].is_string());
    assert!(frame["data"]["createdAt"].is_string());

    assert_silent(&mut a).await;
    assert_eq!(server.store.messages_in("room1").len(), 1);

    server.stop().await;
}

#[tokio::test]
async fn test_switching_channels_stops_old_deliveries() {
    let server = TestServer::start(|_| {}).await;
    let mut a = server.connect().await;
    let mut b = server.connect().await;

    subscribe(&mut a, "room1").await;
    subscribe(&mut b, "room1").await;
    subscribe(&mut b, "room2").await;

    send_json(
        &mut a,
        json!({"type": "message", "channelName": "room1", "message": "anyone?", "senderId": "u1"}),
    )
    .await;
    assert_silent(&mut b).await;

    server.stop().await;
}

#[tokio::test]
async fn test_errors_go_to_originator_and_connection_survives() {
    let server = TestServer::start(|_| {}).await;
    let mut a = server.connect().await;

    a.send(Message::Text("{oops".to_string())).await.unwrap();
    let frame = recv_json(&mut a).await;
    assert_eq!(frame["type"], "error");
    assert_eq!(frame["message"], "Malformed JSON");
    assert_eq!(frame["raw"], "{oops");

    send_json(&mut a, json!({"type": "typing"})).await;
    assert_eq!(
        recv_json(&mut a).await,
        json!({"type": "error", "message": "Unknown message type"})
    );

    send_json(&mut a, json!({"type": "message", "channelName": "", "senderId": "u1"})).await;
    assert_eq!(
        recv_json(&mut a).await,
        json!({"type": "error", "message": "Invalid channelName"})
    );
    assert_eq!(server.store.message_count(), 0);

    subscribe(&mut a, "room1").await;

    server.stop().await;
}

#[tokio::test]
async fn test_http_surface() {
    let server = TestServer::start(|_| {}).await;
    let mut a = server.connect().await;
    subscribe(&mut a, "room1").await;

    let banner = server.get("/").await;
    assert!(banner.starts_with("HTTP/1.1 200"));
    assert!(banner.contains("Welcome to the relay API"));

    let health = server.get("/health").await;
    assert!(health.starts_with("HTTP/1.1 200"));
    assert!(health.contains(r#""status":"ok""#));
    assert!(health.contains(r#""connections":1"#));
    assert!(health.contains(r#""channels":1"#));

    server.stop().await;
}

#[tokio::test]
async fn test_upgrade_refused_at_connection_limit() {
    let server = TestServer::start(|config| config.limits.max_connections = 1).await;
    let mut a = server.connect().await;
    subscribe(&mut a, "room1").await;

    let url = format!("ws://{}/ws", server.addr);
    match connect_async(url).await {
        Err(tungstenite::Error::Http(response)) => assert_eq!(response.status(), 503),
        other => panic!("Expected 503, got {:?}", other.map(|_| ())),
    }

    server.stop().await;
}

#[tokio::test]
async fn test_disconnect_purges_membership() {
    let server = TestServer::start(|_| {}).await;
    let mut a = server.connect().await;
    subscribe(&mut a, "room1").await;
    assert!(server.state.relay.directory().channel_exists("room1"));

    a.close(None).await.unwrap();

    let directory = Arc::clone(server.state.relay.directory());
    tokio::time::timeout(Duration::from_secs(2), async move {
        while directory.channel_exists("room1") {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
    assert!(server.state.relay.registry().is_empty());

    server.stop().await;
}

#[tokio::test]
async fn test_silent_peer_evicted_responsive_peer_kept() {
    let server = TestServer::start(|_| {}).await;
    let mut chatty = server.connect().await;
    let mut silent = server.connect().await;
    subscribe(&mut chatty, "room1").await;
    subscribe(&mut silent, "room1").await;

    let (stop_tx, stop_rx) = watch::channel(false);
    let monitor = server
        .state
        .relay
        .liveness_monitor(Duration::from_millis(50))
        .spawn(stop_rx, |_| {});

    // Polling the stream answers pings; `silent` is never polled.
    let reader = tokio::spawn(async move {
        let deadline = tokio::time::sleep(Duration::from_millis(400));
        tokio::pin!(deadline);
        loop {
            tokio::select! {
                _ = &mut deadline => break,
                _ = chatty.next() => {}
            }
        }
        chatty
    });
    let _chatty = reader.await.unwrap();

    assert_eq!(server.state.relay.registry().len(), 1);
    assert_eq!(server.state.relay.directory().subscriber_count("room1"), 1);

    stop_tx.send(true).unwrap();
    monitor.await.unwrap();
    drop(silent);
    server.stop().await;
}

#[tokio::test]
async fn test_shutdown_closes_connections() {
    let server = TestServer::start(|_| {}).await;
    let mut a = server.connect().await;
    subscribe(&mut a, "room1").await;

    let state = Arc::clone(&server.state);
    server.stop().await;

    let closed = tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            match a.next().await {
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => return,
                Some(Ok(_)) => continue,
            }
        }
    })
    .await;
    assert!(closed.is_ok());
    assert!(state.relay.registry().is_empty());
}

#[tokio::test]
async fn test_unknown_route_returns_json_404() {
    let server = TestServer::start(|_| {}).await;

    let response = server.get("/nope").await;
    assert!(response.starts_with("HTTP/1.1 404"));
    assert!(response.contains(r#""status":false"#));
    assert!(response.contains(r#""path":"/nope""#));

    server.stop().await;
}

#[tokio::test]
async fn test_concurrent_upgrades_never_exceed_limit() {
    let server = TestServer::start(|config| config.limits.max_connections = 2).await;
    let url = format!("ws://{}/ws", server.addr);

    let attempts: Vec<_> = (0..8)
        .map(|_| {
            let url = url.clone();
            tokio::spawn(async move { connect_async(url).await })
        })
        .collect();

    let mut accepted = Vec::new();
    let mut refused = 0;
    for attempt in attempts {
        match attempt.await.unwrap() {
            Ok((ws, _)) => accepted.push(ws),
            Err(tungstenite::Error::Http(response)) => {
                assert_eq!(response.status(), 503);
                refused += 1;
            }
            Err(e) => panic!("Unexpected handshake error: {e}"),
        }
    }

    assert_eq!(accepted.len(), 2);
    assert_eq!(refused, 6);

    drop(accepted);
    server.stop().await;
}

#[tokio::test]
async fn test_connection_slot_released_on_disconnect() {
    let server = TestServer::start(|config| config.limits.max_connections = 1).await;
    let mut a = server.connect().await;
    subscribe(&mut a, "room1").await;
    a.close(None).await.unwrap();

    let url = format!("ws://{}/ws", server.addr);
    let mut b = tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            if let Ok((ws, _)) = connect_async(url.clone()).await {
                return ws;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
    subscribe(&mut b, "room1").await;

    server.stop().await;
}

#[tokio::test]
async fn test_upgrades_refused_once_shutdown_begins() {
    let server = TestServer::start(|_| {}).await;
    let mut a = server.connect().await;
    subscribe(&mut a, "room1").await;

    server.state.begin_shutdown();
    assert!(server.state.relay.registry().is_empty());

    let url = format!("ws://{}/ws", server.addr);
    match connect_async(url).await {
        Err(tungstenite::Error::Http(response)) => assert_eq!(response.status(), 503),
        other => panic!("Expected 503, got {:?}", other.map(|_| ())),
    }
    assert!(server.state.relay.registry().is_empty());

    server.stop().await;
}
