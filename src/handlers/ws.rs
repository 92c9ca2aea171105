//! WebSocket handler: token auth via query, hub registration, mailbox relay, ping/pong keepalive.

use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::Response;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, trace, warn};

use crate::auth::AuthError;
use crate::connection::{ConnectionHandle, HandleId, Mailbox, UserId};
use crate::ws_registry::Hub;
use crate::AppState;

#[derive(Deserialize)]
pub struct WsQuery {
    token: Option<String>,
}

#[derive(Deserialize)]
struct WsMessage {
    #[serde(rename = "type")]
    type_: String,
}

const PONG_JSON: &str = r#"{"type":"pong"}"#;

type SharedSink = Arc<Mutex<SplitSink<WebSocket, Message>>>;

/// GET /ws?token=JWT. Verifies the token before anything is registered; on failure the
/// socket is upgraded only to deliver a close frame.
pub async fn ws_handler(
    State(state): State<AppState>,
    Query(q): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    let verified = match q.token.as_deref() {
        None | Some("") => Err(AuthError::MissingToken),
        Some(token) => state.verifier.verify(token),
    };

    match verified {
        Ok(user_id) => {
            let hub = state.hub.clone();
            let capacity = state.mailbox_capacity;
            ws.on_upgrade(move |socket| handle_socket(socket, user_id, hub, capacity))
        }
        Err(err) => {
            let code = err.close_code();
            let reason = err.close_reason();
            warn!(close_code = code, "ws auth failed: {}", err);
            ws.on_upgrade(move |mut socket| async move {
                let frame = CloseFrame {
                    code,
                    reason: reason.into(),
                };
                let _ = socket.send(Message::Close(Some(frame))).await;
            })
        }
    }
}

/// Unregisters on drop, so every exit from the session (including a panic) cleans up.
struct Registration {
    hub: Hub,
    id: HandleId,
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.hub.unregister(self.id);
    }
}

async fn handle_socket(socket: WebSocket, user_id: UserId, hub: Hub, capacity: usize) {
    let (handle, mailbox) = ConnectionHandle::new(user_id, capacity);
    let id = handle.id();
    hub.register(handle);
    let _registration = Registration { hub, id };

    let (sink, mut stream) = socket.split();
    let sink: SharedSink = Arc::new(Mutex::new(sink));
    let mut writer = tokio::spawn(write_loop(sink.clone(), mailbox, id));
    info!(user_id, conn_id = id.conn_id, "ws session started");

    loop {
        tokio::select! {
            _ = &mut writer => {
                debug!(user_id, conn_id = id.conn_id, "ws writer finished");
                break;
            }
            msg = stream.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        if is_ping(text.as_str()) {
                            trace!("ws ping received uid={} conn_id={}", user_id, id.conn_id);
                            if sink.lock().await.send(Message::Text(PONG_JSON.into())).await.is_err() {
                                break;
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    writer.abort();
    info!(user_id, conn_id = id.conn_id, "ws session closed");
}

/// Drains the mailbox onto the socket. Ends when the hub drops the handle (unregister
/// or eviction) or a write fails. A replaced handle is kept alive, so this loop idles.
async fn write_loop(sink: SharedSink, mut mailbox: Mailbox, id: HandleId) {
    while let Some(text) = mailbox.recv().await {
        if let Err(e) = sink.lock().await.send(Message::Text(text.into())).await {
            debug!(user_id = id.user_id, conn_id = id.conn_id, "ws write failed: {}", e);
            return;
        }
    }
    let _ = sink.lock().await.send(Message::Close(None)).await;
}

fn is_ping(text: &str) -> bool {
    serde_json::from_str::<WsMessage>(text)
        .map(|m| m.type_ == "ping")
        .unwrap_or(false)
}
