//! Messages exchanged with a connected client over the WebSocket

use serde::{Deserialize, Serialize};

use crate::domain::{BoardEvent, BoardId, CommittedMove, DragSignal, MoveRequest, SessionId, UserId};
use crate::error::MoveError;

/// Inbound from a client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ClientMessage {
    Join {
        board_id: BoardId,
    },
    Leave {
        board_id: BoardId,
    },
    Drag(DragSignal),
    Move {
        /// Echoed back on the result so the client can match replies
        #[serde(default)]
        request_id: Option<String>,
        request: MoveRequest,
    },
}

/// Outbound to a client
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ServerMessage {
    Welcome {
        session_id: SessionId,
        user_id: UserId,
    },
    Event(BoardEvent),
    MoveResult {
        #[serde(skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
        outcome: MoveOutcome,
    },
    Error {
        message: String,
    },
}

/// Private reply to the mover; everyone else learns from the event
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum MoveOutcome {
    Committed(CommittedMove),
    Failed(MoveError),
}
