//! WebSocket push channel for session events
//!
//! Every [`ArEvent`] is sent as a text frame shaped like a method call:
//! `{"method": "onNodeTap", "arguments": {"name": "..."}}`.

use arlink_core::ArEvent;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use crate::state::AppState;

pub async fn websocket_handler(
    upgrade: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> Response {
    upgrade.on_upgrade(move |socket| push_events(socket, state))
}

/// What to do with a frame the client sent
enum Inbound {
    Reply(Message),
    Ignore,
    Hangup,
}

fn inbound(frame: Option<Result<Message, axum::Error>>) -> Inbound {
    match frame {
        Some(Ok(Message::Ping(data))) => Inbound::Reply(Message::Pong(data)),
        Some(Ok(Message::Text(text))) if text.as_str() == "ping" => {
            Inbound::Reply(Message::Text("pong".into()))
        }
        Some(Ok(Message::Close(_))) | None => Inbound::Hangup,
        Some(Err(e)) => {
            warn!(error = %e, "WebSocket receive failed");
            Inbound::Hangup
        }
        Some(Ok(_)) => Inbound::Ignore,
    }
}

async fn push_events(socket: WebSocket, state: Arc<AppState>) {
    let (mut tx, mut rx) = socket.split();
    let mut events = state.subscribe();
    info!("Event subscriber connected");

    loop {
        let outgoing = tokio::select! {
            event = events.recv() => match event {
                Ok(event) => encode(&event).map(|json| Message::Text(json.into())),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Event subscriber lagging, events dropped");
                    None
                }
                Err(RecvError::Closed) => {
                    debug!("Session event channel closed");
                    break;
                }
            },
            frame = rx.next() => match inbound(frame) {
                Inbound::Reply(reply) => Some(reply),
                Inbound::Ignore => None,
                Inbound::Hangup => break,
            },
        };

        if let Some(message) = outgoing {
            if tx.send(message).await.is_err() {
                break;
            }
        }
    }

    info!("Event subscriber disconnected");
}

fn encode(event: &ArEvent) -> Option<String> {
    serde_json::to_string(event)
        .inspect_err(|e| warn!(error = %e, "Failed to encode event"))
        .ok()
}
