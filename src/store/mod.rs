//! Position Store
//!
//! The single source of truth for card ordering. Every mutation is a
//! compare-and-swap on the row's version stamp; the store is the only place
//! where concurrent movers are serialized.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{
    Board, BoardId, CellSnapshot, ColumnId, ColumnRebalanced, OrderKey, Swimlane, TaskId,
    TaskPosition, UserId,
};
use crate::error::Result;

/// Conditional write of one position.
#[derive(Debug, Clone)]
pub struct PositionWrite {
    pub task_id: TaskId,
    pub board_id: BoardId,
    pub column_id: ColumnId,
    pub swimlane: Option<Swimlane>,
    pub key: OrderKey,
    /// Version read at the start of the attempt; 0 means the row must not exist
    pub expected_version: i64,
    /// Destination column generation the key was computed against
    pub expected_generation: i64,
    /// Re-count the destination column inside the write and refuse at this limit
    pub capacity_limit: Option<u32>,
    pub modified_by: UserId,
    pub modified_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOutcome {
    Committed {
        position: TaskPosition,
        previous_column: Option<ColumnId>,
        /// Per-board commit sequence number
        seq: i64,
    },
    /// The row changed (or appeared/vanished) since it was read
    VersionMismatch { current: Option<i64> },
    /// The destination column was rebalanced since the key was computed
    GenerationChanged { current: i64 },
    /// Another card already holds this key in the destination cell
    KeyCollision,
    CapacityExceeded { current: u32, limit: u32 },
}

#[derive(Debug, Clone)]
pub struct RebalanceRow {
    pub task_id: TaskId,
    pub expected_version: i64,
    pub key: OrderKey,
}

/// Rewrite of every key in one cell.
#[derive(Debug, Clone)]
pub struct RebalanceWrite {
    pub board_id: BoardId,
    pub column_id: ColumnId,
    pub swimlane: Option<Swimlane>,
    pub expected_generation: i64,
    /// Must name exactly the rows currently in the cell, in the new order
    pub rows: Vec<RebalanceRow>,
    pub modified_by: UserId,
    pub modified_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RebalanceOutcome {
    Committed(ColumnRebalanced),
    /// Membership, a version or the generation moved underneath the plan
    Stale,
}

/// Persistent mapping of task -> board -> column -> key.
#[async_trait]
pub trait PositionStore: Send + Sync {
    /// Point read by (task, board)
    async fn load(&self, task_id: &TaskId, board_id: &BoardId) -> Result<Option<TaskPosition>>;

    /// All rows of one (column, swimlane) cell sorted by key
    async fn cell(
        &self,
        board_id: &BoardId,
        column_id: &ColumnId,
        swimlane: Option<&Swimlane>,
    ) -> Result<CellSnapshot>;

    /// Rows in a column across all swimlanes
    async fn count_in_column(&self, board_id: &BoardId, column_id: &ColumnId) -> Result<u32>;

    /// Every row of a board, grouped by column and swimlane, sorted by key
    async fn board_positions(&self, board_id: &BoardId) -> Result<Vec<TaskPosition>>;

    async fn write_position(&self, write: PositionWrite) -> Result<WriteOutcome>;

    async fn rebalance(&self, write: RebalanceWrite) -> Result<RebalanceOutcome>;

    /// Highest commit sequence number handed out on a board, 0 if none
    async fn last_commit_seq(&self, board_id: &BoardId) -> Result<i64>;

    /// Cascade when a task is deleted; returns rows removed
    async fn remove_task(&self, task_id: &TaskId) -> Result<u64>;

    /// Cascade when a board is deleted; returns rows removed
    async fn remove_board(&self, board_id: &BoardId) -> Result<u64>;
}

/// Read-only board and column metadata owned by board administration.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BoardDirectory: Send + Sync {
    async fn board(&self, board_id: &BoardId) -> Result<Option<Board>>;
}
