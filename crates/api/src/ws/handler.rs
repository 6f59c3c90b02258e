use std::time::Duration;

use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::{IntoResponse, Response};
use futures::{SinkExt, Stream, StreamExt};
use serde::Deserialize;
use serde_json::json;
use unplugd_core::error::CoreError;
use unplugd_core::storage_keys::validate_owner_id;
use unplugd_db::models::connection::Connection;

use crate::error::{AppError, AppResult};
use crate::state::AppState;
use crate::ws::manager::WsManager;

/// Upper bound on flushing queued frames after the receive loop ends.
const SEND_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectParams {
    pub owner_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Inbound {
    action: Option<String>,
}

/// GET /ws?ownerId=...
///
/// Rejects the handshake with 401 when the owner is missing or not a single
/// key segment, before looking at the upgrade headers; otherwise upgrades
/// and registers the connection.
pub async fn ws_handler(
    Query(params): Query<ConnectParams>,
    State(state): State<AppState>,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> AppResult<Response> {
    let owner_id = params
        .owner_id
        .map(|o| o.trim().to_string())
        .filter(|o| !o.is_empty())
        .ok_or_else(|| AppError::Core(CoreError::Unauthorized("Missing ownerId".into())))?;
    validate_owner_id(&owner_id)
        .map_err(|e| AppError::Core(CoreError::Unauthorized(e.to_string())))?;

    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => return Ok(rejection.into_response()),
    };
    Ok(ws.on_upgrade(move |socket| handle_socket(socket, state, owner_id)))
}

/// Reply to one inbound text frame.
pub fn handle_text(text: &str) -> String {
    let action = serde_json::from_str::<Inbound>(text)
        .ok()
        .and_then(|inbound| inbound.action);

    match action.as_deref() {
        Some("ping") => json!({ "action": "pong" }).to_string(),
        _ => json!({ "action": "unknown", "message": "Unrecognized action" }).to_string(),
    }
}

/// Why a session's receive loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// The client closed, or the stream ended or errored.
    Closed,
    /// The connection outlived its registry row.
    Expired,
}

/// Read frames from `stream` until the client goes away or `lifetime`
/// elapses, answering text frames through `ws_manager`.
pub async fn receive_until_expiry<S, E>(
    stream: &mut S,
    ws_manager: &WsManager,
    conn_id: &str,
    lifetime: Duration,
) -> SessionEnd
where
    S: Stream<Item = Result<Message, E>> + Unpin,
    E: std::fmt::Display,
{
    let expiry = tokio::time::sleep(lifetime);
    tokio::pin!(expiry);

    loop {
        let result = tokio::select! {
            _ = &mut expiry => return SessionEnd::Expired,
            next = stream.next() => match next {
                Some(result) => result,
                None => return SessionEnd::Closed,
            },
        };
        match result {
            Ok(Message::Close(_)) => return SessionEnd::Closed,
            Ok(Message::Text(text)) => {
                let reply = handle_text(text.as_str());
                ws_manager.send(conn_id, Message::Text(reply.into())).await;
            }
            Ok(Message::Pong(_)) => {
                tracing::trace!(conn_id = %conn_id, "Pong received");
            }
            Ok(_) => {}
            Err(e) => {
                tracing::debug!(conn_id = %conn_id, error = %e, "WebSocket receive error");
                return SessionEnd::Closed;
            }
        }
    }
}

/// Manage a single WebSocket connection after upgrade.
///
/// The connection row is written before the first frame is read and
/// deleted on disconnect; a failed registry write closes the socket. The
/// socket is closed once the row expires, so no client stays connected
/// without a live registry row.
async fn handle_socket(socket: WebSocket, state: AppState, owner_id: String) {
    let conn_id = uuid::Uuid::new_v4().to_string();
    let ws_manager = state.ws_manager.clone();

    let ttl = state.config.connection_ttl();
    let lifetime = ttl.to_std().unwrap_or_default();
    let row = Connection::open(conn_id.clone(), owner_id.clone(), ttl);
    if let Err(e) = state.connections.put(row).await {
        tracing::error!(conn_id = %conn_id, owner_id = %owner_id, error = %e, "Failed to register connection");
        return;
    }
    tracing::info!(conn_id = %conn_id, owner_id = %owner_id, "WebSocket connected");

    let mut rx = ws_manager.add(conn_id.clone(), owner_id.clone()).await;
    let (mut sink, mut stream) = socket.split();

    let sender_conn_id = conn_id.clone();
    let mut send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if sink.send(msg).await.is_err() {
                tracing::debug!(conn_id = %sender_conn_id, "WebSocket sink closed");
                break;
            }
        }
    });

    let end = receive_until_expiry(&mut stream, &ws_manager, &conn_id, lifetime).await;
    if end == SessionEnd::Expired {
        tracing::info!(conn_id = %conn_id, owner_id = %owner_id, "WebSocket connection expired");
        let frame = CloseFrame {
            code: close_code::AWAY,
            reason: "connection expired".into(),
        };
        ws_manager.send(&conn_id, Message::Close(Some(frame))).await;
    }

    // Dropping the sender lets the send task drain queued frames and stop.
    ws_manager.remove(&conn_id).await;
    if let Err(e) = state.connections.delete(&conn_id).await {
        tracing::warn!(conn_id = %conn_id, error = %e, "Failed to delete connection row");
    }
    if tokio::time::timeout(SEND_DRAIN_TIMEOUT, &mut send_task).await.is_err() {
        send_task.abort();
    }
    tracing::info!(conn_id = %conn_id, owner_id = %owner_id, "WebSocket disconnected");
}
