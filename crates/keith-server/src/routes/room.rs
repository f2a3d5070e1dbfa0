use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use futures_util::{SinkExt, StreamExt};
use keith_core::{ChannelError, ParticipantConnection};
use keith_schema::Language;
use serde::Deserialize;

use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct JoinParams {
    pub identity: String,
    #[serde(default)]
    pub language: Option<String>,
}

pub fn router() -> Router<AppState> {
    Router::new().route("/ws", get(ws_upgrade))
}

async fn ws_upgrade(
    State(state): State<AppState>,
    Query(params): Query<JoinParams>,
    ws: WebSocketUpgrade,
) -> Response {
    let identity = params.identity.trim().to_string();
    if identity.is_empty() {
        return StatusCode::BAD_REQUEST.into_response();
    }
    let hint = params.language.as_deref().and_then(Language::from_tag);

    // Join before upgrading so a duplicate identity is refused with a status.
    let conn = match state.room.join(identity, hint) {
        Ok(conn) => conn,
        Err(ChannelError::IdentityTaken(identity)) => {
            tracing::debug!(identity = %identity, "websocket join refused");
            return StatusCode::CONFLICT.into_response();
        }
        Err(e) => {
            tracing::warn!(error = %e, "websocket join failed");
            return StatusCode::SERVICE_UNAVAILABLE.into_response();
        }
    };

    ws.on_upgrade(move |socket| handle_socket(socket, conn))
}

async fn handle_socket(socket: WebSocket, mut conn: ParticipantConnection) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let identity = conn.participant().identity.clone();
    tracing::info!(identity = %identity, "websocket participant connected");

    loop {
        tokio::select! {
            outbound = conn.recv_text() => {
                let Some(text) = outbound else { break };
                if ws_tx.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }
            inbound = ws_rx.next() => {
                let message = match inbound {
                    Some(Ok(message)) => message,
                    Some(Err(err)) => {
                        tracing::warn!(identity = %identity, "websocket receive error: {err}");
                        break;
                    }
                    None => break,
                };
                let sent = match message {
                    Message::Text(text) => conn.send_text(text.as_str()),
                    Message::Binary(data) => conn.send_bytes(data.to_vec(), None),
                    Message::Close(_) => break,
                    Message::Ping(_) | Message::Pong(_) => Ok(()),
                };
                if let Err(e) = sent {
                    tracing::warn!(identity = %identity, error = %e, "failed to forward turn");
                    break;
                }
            }
        }
    }

    conn.leave();
    tracing::info!(identity = %identity, "websocket participant disconnected");
}
