use serde::{Deserialize, Serialize};

use crate::domain::{BoardId, ColumnId, Placement, Swimlane, TaskId, TaskPosition, UserId};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub sessions: usize,
    pub uptime_secs: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DragLockView {
    pub task_id: TaskId,
    pub user_id: UserId,
}

/// Everything a client needs to (re)build its view of a board
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoardPositionsResponse {
    pub board_id: BoardId,
    pub positions: Vec<TaskPosition>,
    pub present_users: Vec<UserId>,
    pub drag_locks: Vec<DragLockView>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PlaceTaskBody {
    pub task_id: TaskId,
    #[serde(default)]
    pub swimlane: Option<Swimlane>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MoveBody {
    pub task_id: TaskId,
    pub column_id: ColumnId,
    #[serde(default)]
    pub swimlane: Option<Swimlane>,
    #[serde(default)]
    pub placement: Placement,
    pub expected_version: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RebalanceQuery {
    pub swimlane: Option<Swimlane>,
}
