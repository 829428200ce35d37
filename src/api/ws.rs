//! WebSocket endpoints (SPEC_FULL.md §6): `/ws` subscribes to an existing
//! session's event stream; `/ws/chat` additionally accepts chat messages
//! over the same socket.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;

use crate::events::ChatEvent;
use crate::manager::{InboundMessage, Manager};
use crate::types::{SessionId, UserId};

use super::middleware::validate_token;

#[derive(Debug, Deserialize)]
pub struct WsParams {
    token: Option<String>,
    session_id: Option<SessionId>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClientMessage {
    SubscribeSession { session_id: SessionId },
    Chat { content: ChatContent },
    Ping,
    Cancel,
}

#[derive(Debug, Deserialize)]
struct ChatContent {
    message: String,
    #[serde(default = "default_true")]
    use_rag: bool,
    #[serde(default = "default_true")]
    use_react: bool,
    #[serde(default = "default_true")]
    use_memory: bool,
}

fn default_true() -> bool {
    true
}

fn check_token(manager: &Manager, token: Option<&str>) -> Result<(), StatusCode> {
    let token = token.ok_or(StatusCode::UNAUTHORIZED)?;
    if validate_token(&manager.config.auth, token) {
        Ok(())
    } else {
        Err(StatusCode::UNAUTHORIZED)
    }
}

/// `GET /ws` — a read-only subscription to a session's event stream.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(manager): State<Arc<Manager>>,
    Query(params): Query<WsParams>,
) -> Result<impl IntoResponse, StatusCode> {
    check_token(&manager, params.token.as_deref())?;
    let session_id = params.session_id.ok_or(StatusCode::BAD_REQUEST)?;
    Ok(ws.on_upgrade(move |socket| forward_session_events(socket, manager, session_id)))
}

async fn forward_session_events(socket: WebSocket, manager: Arc<Manager>, session_id: SessionId) {
    let (mut writer, _reader) = socket.split();
    let mut rx = manager.events.subscribe(session_id);
    while let Some(event) = rx.recv().await {
        if let Ok(json) = serde_json::to_string(&event) {
            if writer.send(Message::Text(json)).await.is_err() {
                break;
            }
        }
    }
    manager.events.unsubscribe(session_id, &rx);
}

/// `GET /ws/chat` — subscribe, send chat turns, and receive every
/// `ChatEvent` for the active session over one socket.
pub async fn ws_chat_handler(
    ws: WebSocketUpgrade,
    State(manager): State<Arc<Manager>>,
    Query(params): Query<WsParams>,
) -> Result<impl IntoResponse, StatusCode> {
    check_token(&manager, params.token.as_deref())?;
    Ok(ws.on_upgrade(move |socket| handle_chat_socket(socket, manager, params.session_id)))
}

async fn handle_chat_socket(socket: WebSocket, manager: Arc<Manager>, mut session_id: Option<SessionId>) {
    let (mut writer, mut reader) = socket.split();
    let (out_tx, mut out_rx) = mpsc::channel::<ChatEvent>(64);

    let forward_handle = tokio::spawn(async move {
        while let Some(event) = out_rx.recv().await {
            if let Ok(json) = serde_json::to_string(&event) {
                if writer.send(Message::Text(json)).await.is_err() {
                    break;
                }
            }
        }
    });

    let mut bridge: Option<tokio::task::JoinHandle<()>> = None;
    if let Some(sid) = session_id {
        bridge = Some(spawn_bridge(manager.clone(), sid, out_tx.clone()));
    }

    while let Some(msg) = reader.next().await {
        let Ok(msg) = msg else { break };
        let Message::Text(text) = msg else {
            if matches!(msg, Message::Close(_)) {
                break;
            }
            continue;
        };

        match serde_json::from_str::<ClientMessage>(&text) {
            Ok(ClientMessage::SubscribeSession { session_id: sid }) => {
                if let Some(handle) = bridge.take() {
                    handle.abort();
                }
                session_id = Some(sid);
                bridge = Some(spawn_bridge(manager.clone(), sid, out_tx.clone()));
            }
            Ok(ClientMessage::Chat { content }) => {
                if session_id.is_none() {
                    let session = manager
                        .store
                        .create_session(UserId::from("ws-client"), None)
                        .await;
                    session_id = Some(session.session_id);
                    bridge = Some(spawn_bridge(manager.clone(), session.session_id, out_tx.clone()));
                }
                let manager = manager.clone();
                let inbound = InboundMessage {
                    message: content.message,
                    session_id,
                    user_id: UserId::from("ws-client"),
                    options: crate::manager::MessageOptions {
                        use_rag: content.use_rag,
                        use_react: content.use_react,
                        use_memory: content.use_memory,
                    },
                };
                tokio::spawn(async move {
                    let _ = manager.handle_message(inbound).await;
                });
            }
            Ok(ClientMessage::Ping) => {
                if let Some(sid) = session_id {
                    let _ = out_tx
                        .send(ChatEvent::Pong {
                            session_id: sid,
                            ts: chrono::Utc::now(),
                        })
                        .await;
                }
            }
            Ok(ClientMessage::Cancel) => manager.interrupt(None),
            Err(_) => {}
        }
    }

    if let Some(handle) = bridge {
        handle.abort();
    }
    drop(out_tx);
    let _ = forward_handle.await;
}

fn spawn_bridge(
    manager: Arc<Manager>,
    session_id: SessionId,
    out_tx: mpsc::Sender<ChatEvent>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut rx = manager.events.subscribe(session_id);
        while let Some(event) = rx.recv().await {
            if out_tx.send(event).await.is_err() {
                break;
            }
        }
        manager.events.unsubscribe(session_id, &rx);
    })
}
