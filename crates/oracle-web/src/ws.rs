//! WebSocket endpoint for streaming chat.
//!
//! Clients connect to `/chat` and exchange the JSON frames described in
//! [`crate::protocol`].  This module only adapts the axum socket to the
//! transport-neutral driver in [`crate::session`].

use std::sync::Arc;
use std::sync::atomic::Ordering;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt};

use crate::protocol::ServerFrame;
use crate::session::{Inbound, drive_session};
use crate::state::AppState;

/// Axum handler that upgrades the HTTP connection to a WebSocket.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

/// Decrements the live-session gauge however the session ends.
struct SessionGuard(Arc<AppState>);

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.0.active_sessions.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Process a single WebSocket connection.
async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    state.active_sessions.fetch_add(1, Ordering::Relaxed);
    let _guard = SessionGuard(Arc::clone(&state));

    let (sink, stream) = socket.split();

    let inbound = stream.map(|msg| match msg {
        Ok(Message::Text(text)) => Inbound::Text(text.as_str().to_owned()),
        Ok(Message::Binary(_)) => Inbound::Binary,
        Ok(Message::Close(_)) => Inbound::Close,
        Ok(Message::Ping(_) | Message::Pong(_)) => Inbound::Ignored,
        Err(e) => {
            tracing::debug!(error = %e, "websocket read failed");
            Inbound::Close
        }
    });

    let outbound = Box::pin(sink.with(|frame: ServerFrame| async move {
        let json = frame.to_json().map_err(axum::Error::new)?;
        Ok::<_, axum::Error>(Message::Text(json.into()))
    }));

    drive_session(
        inbound,
        outbound,
        Arc::clone(&state.orchestrator),
        state.config.session_options(),
    )
    .await;
}
