//! WIP Limit Enforcer
//!
//! Refuses entry into a column that is already at capacity. Limits apply on
//! entry only: a reorder inside the column is never re-checked, and a column
//! that is over its limit (because the limit was lowered) is left alone.

use std::sync::Arc;
use tracing::{debug, warn};

use crate::domain::{BoardId, Column, ColumnId};
use crate::error::{CardflowError, Result};
use crate::store::{BoardDirectory, PositionStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapacityCheck {
    Allowed,
    Rejected { current: u32, limit: u32 },
}

impl CapacityCheck {
    pub fn is_allowed(&self) -> bool {
        matches!(self, CapacityCheck::Allowed)
    }
}

pub struct WipLimitEnforcer {
    store: Arc<dyn PositionStore>,
    boards: Arc<dyn BoardDirectory>,
}

impl WipLimitEnforcer {
    pub fn new(store: Arc<dyn PositionStore>, boards: Arc<dyn BoardDirectory>) -> Self {
        Self { store, boards }
    }

    /// Check a move into `column_id`, loading the column from the directory.
    pub async fn check_capacity(
        &self,
        board_id: &BoardId,
        column_id: &ColumnId,
        moving_from_same_column: bool,
    ) -> Result<CapacityCheck> {
        let board = self
            .boards
            .board(board_id)
            .await?
            .ok_or_else(|| CardflowError::NotFound(format!("board {}", board_id)))?;
        let column = board
            .column(column_id)
            .ok_or_else(|| CardflowError::NotFound(format!("column {}", column_id)))?;
        self.check_column(column, moving_from_same_column).await
    }

    /// Check a move into an already-loaded column.
    pub async fn check_column(
        &self,
        column: &Column,
        moving_from_same_column: bool,
    ) -> Result<CapacityCheck> {
        let Some(limit) = Self::guard(column, moving_from_same_column) else {
            return Ok(CapacityCheck::Allowed);
        };

        let current = self
            .store
            .count_in_column(&column.board_id, &column.id)
            .await?;
        if current >= limit {
            warn!(column = %column.id, current, limit, "column at WIP limit");
            return Ok(CapacityCheck::Rejected { current, limit });
        }

        debug!(column = %column.id, current, limit, "capacity available");
        Ok(CapacityCheck::Allowed)
    }

    /// Limit the store must re-check inside the commit, if any.
    pub fn guard(column: &Column, moving_from_same_column: bool) -> Option<u32> {
        if moving_from_same_column {
            None
        } else {
            column.wip_limit
        }
    }
}
