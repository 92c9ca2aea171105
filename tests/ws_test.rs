//! Integration tests for the notification WebSocket: auth, keepalive, delivery and cleanup.

use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use verses_backend::auth::JwtVerifier;
use verses_backend::notify::{notify, FriendEvent};
use verses_backend::ws_registry::Hub;
use verses_backend::{build_router, AppState};

const SECRET: &[u8] = b"integration-secret";

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct TestServer {
    addr: SocketAddr,
    hub: Hub,
    tokens: Arc<JwtVerifier>,
}

impl TestServer {
    fn token(&self, user_id: u64) -> String {
        self.tokens.issue(user_id, Duration::from_secs(3600)).unwrap()
    }

    async fn connect(&self, user_id: u64) -> Client {
        let url = format!("ws://{}/ws?token={}", self.addr, self.token(user_id));
        let (ws, _) = tokio_tungstenite::connect_async(&url)
            .await
            .expect("Failed to connect to WebSocket");
        ws
    }
}

/// Start the router on a random port with a running hub.
async fn start_test_server() -> TestServer {
    let (hub, dispatcher) = Hub::new(256).unwrap();
    tokio::spawn(dispatcher.run());

    let tokens = Arc::new(JwtVerifier::new(SECRET));
    let state = AppState {
        hub: hub.clone(),
        verifier: tokens.clone(),
        mailbox_capacity: 64,
    };

    let app = build_router(state);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    TestServer { addr, hub, tokens }
}

async fn wait_until(mut cond: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

async fn next_json(ws: &mut Client) -> Value {
    let msg = tokio::time::timeout(Duration::from_secs(2), ws.next())
        .await
        .expect("Expected a message within timeout")
        .expect("stream ended")
        .expect("ws error");
    serde_json::from_str(msg.to_text().unwrap()).unwrap()
}

async fn expect_silence(ws: &mut Client) {
    let result = tokio::time::timeout(Duration::from_millis(300), ws.next()).await;
    assert!(result.is_err(), "Expected no further messages, got {:?}", result);
}

/// A pong proves the session's read loop is running, so its registration has been queued
/// ahead of anything sent afterwards.
async fn round_trip_ping(ws: &mut Client) {
    ws.send(Message::text(r#"{"type":"ping"}"#)).await.unwrap();
    assert_eq!(next_json(ws).await, json!({ "type": "pong" }));
}

async fn expect_close_code(url: String, code: u16) {
    let (mut ws, _) = tokio_tungstenite::connect_async(&url)
        .await
        .expect("WebSocket should upgrade even when auth fails");
    let msg = tokio::time::timeout(Duration::from_secs(2), ws.next())
        .await
        .expect("Expected close message within timeout");
    match msg {
        Some(Ok(Message::Close(Some(frame)))) => assert_eq!(frame.code, CloseCode::from(code)),
        other => panic!("Expected close frame {}, got {:?}", code, other),
    }
}

#[tokio::test]
async fn test_ping_gets_exactly_one_pong() {
    let server = start_test_server().await;
    let mut ws = server.connect(1).await;
    wait_until(|| server.hub.is_connected(1)).await;

    ws.send(Message::text(r#"{"type":"ping"}"#)).await.unwrap();
    assert_eq!(next_json(&mut ws).await, json!({ "type": "pong" }));
    expect_silence(&mut ws).await;

    assert_eq!(server.hub.connection_count(), 1);
    assert_eq!(server.hub.metrics().delivered.get(), 0);
}

#[tokio::test]
async fn test_other_inbound_messages_are_ignored() {
    let server = start_test_server().await;
    let mut ws = server.connect(2).await;
    wait_until(|| server.hub.is_connected(2)).await;

    ws.send(Message::text(r#"{"type":"hello"}"#)).await.unwrap();
    ws.send(Message::text("not json")).await.unwrap();
    expect_silence(&mut ws).await;
    assert!(server.hub.is_connected(2));
}

#[tokio::test]
async fn test_notification_is_delivered_over_socket() {
    let server = start_test_server().await;
    let mut ws = server.connect(3).await;
    wait_until(|| server.hub.is_connected(3)).await;

    notify(&server.hub, 3, &FriendEvent::RequestReceived { pending: 4 });
    assert_eq!(
        next_json(&mut ws).await,
        json!({ "type": "friend_request_received", "payload": { "count": 4 } })
    );
}

#[tokio::test]
async fn test_sequential_sends_are_written_in_order() {
    let server = start_test_server().await;
    let mut ws = server.connect(4).await;
    wait_until(|| server.hub.is_connected(4)).await;

    server.hub.send_to_user(4, "x", 1);
    server.hub.send_to_user(4, "x", 2);
    assert_eq!(next_json(&mut ws).await["payload"], 1);
    assert_eq!(next_json(&mut ws).await["payload"], 2);
}

#[tokio::test]
async fn test_users_only_see_their_own_events() {
    let server = start_test_server().await;
    let mut alice = server.connect(10).await;
    let mut bob = server.connect(11).await;
    wait_until(|| server.hub.connection_count() == 2).await;

    server.hub.send_to_user(10, "x", "for alice");
    server.hub.send_to_user(11, "x", "for bob");
    assert_eq!(next_json(&mut alice).await["payload"], "for alice");
    assert_eq!(next_json(&mut bob).await["payload"], "for bob");
    expect_silence(&mut alice).await;
}

#[tokio::test]
async fn test_disconnect_unregisters() {
    let server = start_test_server().await;
    let mut ws = server.connect(5).await;
    wait_until(|| server.hub.is_connected(5)).await;

    ws.close(None).await.unwrap();
    wait_until(|| !server.hub.is_connected(5)).await;
    assert_eq!(server.hub.metrics().connections.get(), 0);
}

#[tokio::test]
async fn test_reconnect_replaces_previous_session() {
    let server = start_test_server().await;
    let mut first = server.connect(6).await;
    wait_until(|| server.hub.is_connected(6)).await;
    let mut second = server.connect(6).await;

    round_trip_ping(&mut second).await;

    server.hub.send_to_user(6, "x", "newest");
    assert_eq!(next_json(&mut second).await["payload"], "newest");
    assert!(server.hub.is_connected(6));
    assert_eq!(server.hub.connection_count(), 1);

    // The replaced session is orphaned, not closed: no events, but still answers pings.
    expect_silence(&mut first).await;
    first.send(Message::text(r#"{"type":"ping"}"#)).await.unwrap();
    assert_eq!(next_json(&mut first).await, json!({ "type": "pong" }));

    // When the old tab goes away, the newer session is unaffected.
    first.close(None).await.unwrap();
    drop(first);
    server.hub.send_to_user(6, "x", "after close");
    assert_eq!(next_json(&mut second).await["payload"], "after close");
    assert!(server.hub.is_connected(6));
}

#[tokio::test]
async fn test_two_tabs_do_not_kick_each_other() {
    let server = start_test_server().await;
    let mut tab_a = server.connect(8).await;
    wait_until(|| server.hub.is_connected(8)).await;
    let mut tab_b = server.connect(8).await;
    round_trip_ping(&mut tab_b).await;

    expect_silence(&mut tab_a).await;
    expect_silence(&mut tab_b).await;
    assert_eq!(server.hub.connection_count(), 1);
}

#[tokio::test]
async fn test_invalid_token_is_closed_without_registration() {
    let server = start_test_server().await;
    expect_close_code(format!("ws://{}/ws?token=invalid_jwt_token", server.addr), 4002).await;
    expect_close_code(format!("ws://{}/ws", server.addr), 4002).await;
    assert_eq!(server.hub.connection_count(), 0);
}

#[tokio::test]
async fn test_expired_token_is_closed_with_expiry_code() {
    let server = start_test_server().await;
    let claims = json!({ "iss": "7", "exp": chrono::Utc::now().timestamp() - 3600 });
    let token = jsonwebtoken::encode(
        &jsonwebtoken::Header::default(),
        &claims,
        &jsonwebtoken::EncodingKey::from_secret(SECRET),
    )
    .unwrap();
    expect_close_code(format!("ws://{}/ws?token={}", server.addr, token), 4001).await;
    assert!(!server.hub.is_connected(7));
}
