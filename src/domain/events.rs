use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{BoardId, ColumnId, SessionId, Swimlane, TaskId, UserId};
use super::key::OrderKey;
use super::position::TaskPosition;

/// A move that reached the store. Broadcast to every subscriber of the board.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommittedMove {
    /// Per-board commit sequence assigned by the store
    pub seq: i64,
    pub task_id: TaskId,
    pub board_id: BoardId,
    /// `None` when the task just entered the board
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from_column: Option<ColumnId>,
    pub column_id: ColumnId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub swimlane: Option<Swimlane>,
    pub key: OrderKey,
    pub version: i64,
    pub moved_by: UserId,
    pub mover_name: String,
    pub committed_at: DateTime<Utc>,
}

/// New key and version of one row after a rebalance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RebalancedRow {
    pub task_id: TaskId,
    pub key: OrderKey,
    pub version: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnRebalanced {
    pub seq: i64,
    pub board_id: BoardId,
    pub column_id: ColumnId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub swimlane: Option<Swimlane>,
    pub generation: i64,
    pub rows: Vec<RebalancedRow>,
}

impl ColumnRebalanced {
    pub fn version_of(&self, task: &TaskId) -> Option<i64> {
        self.rows
            .iter()
            .find(|r| &r.task_id == task)
            .map(|r| r.version)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PresenceChange {
    Joined,
    Left,
}

/// Someone started or stopped watching a board.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceChanged {
    pub board_id: BoardId,
    pub session_id: SessionId,
    pub user_id: UserId,
    pub display_name: String,
    pub change: PresenceChange,
    /// Distinct users still watching after the change
    pub present_users: Vec<UserId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DragPhase {
    Start,
    Update,
    End,
}

/// Ephemeral drag state relayed between observers. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DragSignal {
    pub task_id: TaskId,
    pub board_id: BoardId,
    pub phase: DragPhase,
    /// Filled in from the sending session's identity
    #[serde(default)]
    pub user_id: Option<UserId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_column: Option<ColumnId>,
    /// Set on `end` signals the server generated for a vanished dragger
    #[serde(default)]
    pub implicit: bool,
}

impl DragSignal {
    pub fn new(task_id: impl Into<TaskId>, board_id: impl Into<BoardId>, phase: DragPhase) -> Self {
        Self {
            task_id: task_id.into(),
            board_id: board_id.into(),
            phase,
            user_id: None,
            target_column: None,
            implicit: false,
        }
    }

    pub fn toward(mut self, column: impl Into<ColumnId>) -> Self {
        self.target_column = Some(column.into());
        self
    }
}

/// Everything that flows out to board subscribers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BoardEvent {
    CommittedMove(CommittedMove),
    ColumnRebalanced(ColumnRebalanced),
    PresenceChanged(PresenceChanged),
    DragSignalRelayed(DragSignal),
}

impl BoardEvent {
    pub fn board_id(&self) -> &BoardId {
        match self {
            Self::CommittedMove(e) => &e.board_id,
            Self::ColumnRebalanced(e) => &e.board_id,
            Self::PresenceChanged(e) => &e.board_id,
            Self::DragSignalRelayed(e) => &e.board_id,
        }
    }

    /// Store commit sequence, for events that come from a commit
    pub fn seq(&self) -> Option<i64> {
        match self {
            Self::CommittedMove(e) => Some(e.seq),
            Self::ColumnRebalanced(e) => Some(e.seq),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CommittedMove(_) => "committed-move",
            Self::ColumnRebalanced(_) => "column-rebalanced",
            Self::PresenceChanged(_) => "presence-changed",
            Self::DragSignalRelayed(_) => "drag-signal-relayed",
        }
    }
}

impl CommittedMove {
    pub fn from_position(
        seq: i64,
        from_column: Option<ColumnId>,
        position: &TaskPosition,
        mover_name: &str,
    ) -> Self {
        Self {
            seq,
            task_id: position.task_id.clone(),
            board_id: position.board_id.clone(),
            from_column,
            column_id: position.column_id.clone(),
            swimlane: position.swimlane.clone(),
            key: position.key.clone(),
            version: position.version,
            moved_by: position.modified_by.clone(),
            mover_name: mover_name.to_string(),
            committed_at: position.modified_at,
        }
    }
}
