//! WebSocket sessions for the realtime refresh signal.
//!
//! A client joins one or more owner rooms with
//! `{"type":"join_room","walletAddress":"0x..."}` and receives
//! `{"event":"tasks_updated"}` whenever a task of that owner changes.

use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use serde::Deserialize;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinSet;

use chaintask_core::domain::{Address, SessionId};
use chaintask_core::impls::{RoomHub, RoomSignal};
use chaintask_core::ports::IdGenerator;

use crate::http::AppState;

pub const TASKS_UPDATED: &str = r#"{"event":"tasks_updated"}"#;

const SESSION_QUEUE: usize = 32;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ClientMessage {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    wallet_address: Option<String>,
}

/// Room named by a `join_room` message, if `text` is one.
fn join_request(text: &str) -> Option<Address> {
    let message: ClientMessage = serde_json::from_str(text).ok()?;
    if message.kind != "join_room" {
        return None;
    }
    Address::parse(message.wallet_address.as_deref()?).ok()
}

pub async fn upgrade(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    let id = state.ids.generate_session_id();
    ws.on_upgrade(move |socket| session(socket, id, state.hub))
}

async fn session(mut socket: WebSocket, id: SessionId, hub: Arc<RoomHub>) {
    tracing::debug!(session = %id, "websocket session opened");
    let (tx, mut signals) = mpsc::channel::<()>(SESSION_QUEUE);
    let mut rooms = HashSet::new();
    let mut forwarders = JoinSet::new();

    loop {
        tokio::select! {
            incoming = socket.recv() => {
                let Some(Ok(message)) = incoming else {
                    break;
                };
                match message {
                    Message::Text(text) => match join_request(&text) {
                        Some(room) => {
                            if rooms.insert(room.clone()) {
                                tracing::debug!(session = %id, %room, "client joined room");
                                forwarders.spawn(forward(hub.subscribe(&room), tx.clone()));
                            }
                        }
                        None => tracing::debug!(session = %id, message = %text, "ignored client message"),
                    },
                    Message::Close(_) => break,
                    _ => {}
                }
            }
            Some(()) = signals.recv() => {
                if socket.send(Message::Text(TASKS_UPDATED.to_string())).await.is_err() {
                    break;
                }
            }
        }
    }

    forwarders.abort_all();
    while forwarders.join_next().await.is_some() {}
    hub.prune();
    tracing::debug!(session = %id, rooms = rooms.len(), "websocket session closed");
}

/// Pumps one room into the session queue until either side goes away.
///
/// A lagged receiver yields a single refresh: the client refetches the whole
/// list anyway, so the skipped signals carry nothing extra.
async fn forward(mut room: broadcast::Receiver<RoomSignal>, tx: mpsc::Sender<()>) {
    loop {
        match room.recv().await {
            Ok(RoomSignal::TasksChanged) => {}
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::debug!(skipped, "room receiver lagged, collapsing into one refresh");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
        if tx.send(()).await.is_err() {
            break;
        }
    }
}
