//! WebSocket handler for realtime download updates
//!
//! Every connected client receives a `downloadUpdate` envelope whenever a
//! download reaches a terminal state. Clients may send `{"type":"ping"}` to
//! keep the connection alive.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
    routing::any,
    Router,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, error, info, warn};
use unidl_core::RealtimeMessage;

use crate::state::AppState;

/// Message received from clients
#[derive(Debug, Deserialize)]
struct WsRequest {
    #[serde(rename = "type")]
    request_type: String,
}

pub fn routes() -> Router<AppState> {
    Router::new().route("/ws", any(ws_handler))
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    debug!("WebSocket connection request");
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

fn encode(msg: &RealtimeMessage) -> Option<Message> {
    match serde_json::to_string(msg) {
        Ok(json) => Some(Message::Text(json.into())),
        Err(e) => {
            error!(error = %e, "Failed to encode realtime message");
            None
        }
    }
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let mut rx = state.orchestrator.observe();

    info!("WebSocket client connected");

    loop {
        tokio::select! {
            update = rx.recv() => {
                match update {
                    Ok(msg) => {
                        let Some(frame) = encode(&msg) else { continue };
                        if ws_sender.send(frame).await.is_err() {
                            break;
                        }
                    }
                    Err(RecvError::Lagged(count)) => {
                        warn!(skipped = count, "WebSocket client lagged behind");
                    }
                    Err(RecvError::Closed) => {
                        warn!("Realtime channel closed");
                        break;
                    }
                }
            }

            msg = ws_receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<WsRequest>(&text) {
                            Ok(req) if req.request_type == "ping" => {
                                let Some(frame) = encode(&RealtimeMessage::Pong) else { continue };
                                if ws_sender.send(frame).await.is_err() {
                                    break;
                                }
                            }
                            Ok(req) => debug!("Unknown WebSocket request type: {}", req.request_type),
                            Err(e) => debug!(error = %e, "Ignoring malformed WebSocket message"),
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if ws_sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        error!("WebSocket error: {}", e);
                        break;
                    }
                    _ => {}
                }
            }
        }
    }

    info!("WebSocket client disconnected");
}
