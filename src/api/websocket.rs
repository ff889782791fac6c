use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use futures_util::{sink::SinkExt, stream::StreamExt};
use tracing::{debug, error, info, warn};

use crate::api::{auth::identity_from_headers, state::AppState};
use crate::domain::{Identity, SessionId};
use crate::session::{ClientMessage, MoveOutcome, ServerMessage};

/// WebSocket handler -- requires the forwarded identity headers.
pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    headers: HeaderMap,
    State(state): State<AppState>,
) -> std::result::Result<impl IntoResponse, StatusCode> {
    match identity_from_headers(&headers) {
        Ok(identity) => Ok(ws.on_upgrade(move |socket| handle_socket(socket, state, identity))),
        Err((status, reason)) => {
            warn!("WebSocket connection rejected: {}", reason);
            Err(status)
        }
    }
}

async fn handle_socket(socket: WebSocket, state: AppState, identity: Identity) {
    let (mut sender, mut receiver) = socket.split();
    let (session_id, mut rx) = state.sessions.connect(identity.clone()).await;

    // Forward everything addressed to this session
    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let json = match serde_json::to_string(&msg) {
                Ok(json) => json,
                Err(e) => {
                    error!("Failed to serialize WebSocket message: {}", e);
                    continue;
                }
            };

            if sender.send(Message::Text(json)).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(msg)) = receiver.next().await {
        match msg {
            Message::Text(text) => match serde_json::from_str::<ClientMessage>(&text) {
                Ok(client_msg) => dispatch(&state, session_id, &identity, client_msg).await,
                Err(e) => {
                    debug!(session = %session_id, "Unparseable client message: {}", e);
                    state
                        .sessions
                        .send_to(
                            session_id,
                            ServerMessage::Error {
                                message: format!("invalid message: {}", e),
                            },
                        )
                        .await;
                }
            },
            Message::Close(_) => break,
            // Axum answers pings itself
            _ => {}
        }
    }

    state.sessions.disconnect(session_id).await;
    send_task.abort();

    info!(session = %session_id, "WebSocket connection closed");
}

async fn dispatch(state: &AppState, session_id: SessionId, identity: &Identity, msg: ClientMessage) {
    let result = match msg {
        ClientMessage::Join { board_id } => state.sessions.join(session_id, &board_id).await,
        ClientMessage::Leave { board_id } => state.sessions.leave(session_id, &board_id).await,
        ClientMessage::Drag(signal) => state.sessions.relay_drag_signal(session_id, signal).await,
        ClientMessage::Move {
            request_id,
            request,
        } => {
            // Moves can wait on the store; keep reading drag signals meanwhile.
            let state = state.clone();
            let identity = identity.clone();
            tokio::spawn(async move {
                let outcome = match state.coordinator.submit_move(request, &identity).await {
                    Ok(result) => MoveOutcome::Committed(result.event),
                    Err(err) => MoveOutcome::Failed(err),
                };
                state
                    .sessions
                    .send_to(session_id, ServerMessage::MoveResult { request_id, outcome })
                    .await;
            });
            Ok(())
        }
    };

    if let Err(e) = result {
        state
            .sessions
            .send_to(
                session_id,
                ServerMessage::Error {
                    message: e.to_string(),
                },
            )
            .await;
    }
}
