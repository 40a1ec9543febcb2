//! WebSocket session transport.

use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use serde_json::Value;

use meshbridge_app::session::Session;

use crate::state::AppState;

/// `GET /ws`: upgrade to a persistent session.
pub async fn upgrade(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| serve(socket, state))
}

async fn send(socket: &mut WebSocket, message: &Value) -> bool {
    socket
        .send(Message::Text(message.to_string().into()))
        .await
        .is_ok()
}

async fn serve(mut socket: WebSocket, state: AppState) {
    let (mut session, snapshot) = Session::open(state.api, &state.feed);
    let id = session.id();
    tracing::info!(session = %id, "websocket client connected");
    if !send(&mut socket, &snapshot).await {
        return;
    }

    loop {
        tokio::select! {
            inbound = socket.recv() => {
                let text = match inbound {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Close(_)) | Err(_)) | None => break,
                    Some(Ok(_)) => continue,
                };
                let response = session.handle(text.as_str()).await;
                if !send(&mut socket, &response).await {
                    break;
                }
            }
            change = session.next_change() => {
                let Some(change) = change else { break };
                if !send(&mut socket, &change).await {
                    break;
                }
            }
        }
    }
    tracing::info!(session = %id, "websocket client disconnected");
}
