use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{BoardId, ColumnId, Swimlane, TaskId, UserId};
use super::key::OrderKey;

/// Where a task sits on one board. Exactly one exists per (task, board).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskPosition {
    pub task_id: TaskId,
    pub board_id: BoardId,
    pub column_id: ColumnId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub swimlane: Option<Swimlane>,
    pub key: OrderKey,
    /// Optimistic concurrency stamp; starts at 1, +1 per mutation
    pub version: i64,
    pub modified_by: UserId,
    pub modified_at: DateTime<Utc>,
}

impl TaskPosition {
    /// True when both positions share a column and swimlane
    pub fn same_cell(&self, column: &ColumnId, swimlane: Option<&Swimlane>) -> bool {
        &self.column_id == column && self.swimlane.as_ref() == swimlane
    }
}

/// Ordered contents of one (column, swimlane) cell as read from the store.
#[derive(Debug, Clone, Default)]
pub struct CellSnapshot {
    /// Column generation at read time; bumped by every rebalance
    pub generation: i64,
    /// Positions sorted by key
    pub positions: Vec<TaskPosition>,
}

impl CellSnapshot {
    pub fn without(mut self, task: &TaskId) -> Self {
        self.positions.retain(|p| &p.task_id != task);
        self
    }

    pub fn index_of(&self, task: &TaskId) -> Option<usize> {
        self.positions.iter().position(|p| &p.task_id == task)
    }
}
