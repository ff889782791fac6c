//! In-memory store
//!
//! Same compare-and-swap semantics as the PostgreSQL adapter, with a single
//! write lock standing in for row and column locks. Used by tests and when
//! no database URL is configured.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;
use tracing::debug;

use crate::domain::{
    Board, BoardId, CellSnapshot, ColumnId, ColumnRebalanced, RebalancedRow, Swimlane, TaskId,
    TaskPosition,
};
use crate::error::Result;
use crate::store::{
    BoardDirectory, PositionStore, PositionWrite, RebalanceOutcome, RebalanceWrite, WriteOutcome,
};

#[derive(Default)]
struct MemoryState {
    boards: HashMap<BoardId, Board>,
    positions: HashMap<(TaskId, BoardId), TaskPosition>,
    generations: HashMap<(BoardId, ColumnId), i64>,
    commit_seq: HashMap<BoardId, i64>,
}

impl MemoryState {
    fn generation(&self, board_id: &BoardId, column_id: &ColumnId) -> i64 {
        self.generations
            .get(&(board_id.clone(), column_id.clone()))
            .copied()
            .unwrap_or(0)
    }

    fn cell(
        &self,
        board_id: &BoardId,
        column_id: &ColumnId,
        swimlane: Option<&Swimlane>,
    ) -> Vec<&TaskPosition> {
        let mut rows: Vec<&TaskPosition> = self
            .positions
            .values()
            .filter(|p| &p.board_id == board_id && p.same_cell(column_id, swimlane))
            .collect();
        rows.sort_by(|a, b| a.key.cmp(&b.key));
        rows
    }

    fn next_seq(&mut self, board_id: &BoardId) -> i64 {
        let seq = self.commit_seq.entry(board_id.clone()).or_insert(0);
        *seq += 1;
        *seq
    }
}

#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register board metadata, as board administration would
    pub async fn put_board(&self, board: Board) {
        let mut state = self.state.write().await;
        state.boards.insert(board.id.clone(), board);
    }

    pub async fn with_board(self, board: Board) -> Self {
        self.put_board(board).await;
        self
    }
}

#[async_trait]
impl BoardDirectory for MemoryStore {
    async fn board(&self, board_id: &BoardId) -> Result<Option<Board>> {
        Ok(self.state.read().await.boards.get(board_id).cloned())
    }
}

#[async_trait]
impl PositionStore for MemoryStore {
    async fn load(&self, task_id: &TaskId, board_id: &BoardId) -> Result<Option<TaskPosition>> {
        let state = self.state.read().await;
        Ok(state
            .positions
            .get(&(task_id.clone(), board_id.clone()))
            .cloned())
    }

    async fn cell(
        &self,
        board_id: &BoardId,
        column_id: &ColumnId,
        swimlane: Option<&Swimlane>,
    ) -> Result<CellSnapshot> {
        let state = self.state.read().await;
        Ok(CellSnapshot {
            generation: state.generation(board_id, column_id),
            positions: state
                .cell(board_id, column_id, swimlane)
                .into_iter()
                .cloned()
                .collect(),
        })
    }

    async fn count_in_column(&self, board_id: &BoardId, column_id: &ColumnId) -> Result<u32> {
        let state = self.state.read().await;
        let count = state
            .positions
            .values()
            .filter(|p| &p.board_id == board_id && &p.column_id == column_id)
            .count();
        Ok(count as u32)
    }

    async fn board_positions(&self, board_id: &BoardId) -> Result<Vec<TaskPosition>> {
        let state = self.state.read().await;
        let mut rows: Vec<TaskPosition> = state
            .positions
            .values()
            .filter(|p| &p.board_id == board_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| {
            (&a.column_id, &a.swimlane, &a.key).cmp(&(&b.column_id, &b.swimlane, &b.key))
        });
        Ok(rows)
    }

    async fn write_position(&self, write: PositionWrite) -> Result<WriteOutcome> {
        let mut state = self.state.write().await;
        let row_key = (write.task_id.clone(), write.board_id.clone());

        let current = state.positions.get(&row_key);
        let current_version = current.map(|p| p.version);
        let version_ok = match current_version {
            None => write.expected_version == 0,
            Some(v) => v == write.expected_version,
        };
        if !version_ok {
            return Ok(WriteOutcome::VersionMismatch {
                current: current_version,
            });
        }
        let previous_column = current.map(|p| p.column_id.clone());

        let generation = state.generation(&write.board_id, &write.column_id);
        if generation != write.expected_generation {
            return Ok(WriteOutcome::GenerationChanged {
                current: generation,
            });
        }

        if let Some(limit) = write.capacity_limit {
            let occupied = state
                .positions
                .values()
                .filter(|p| {
                    p.board_id == write.board_id
                        && p.column_id == write.column_id
                        && p.task_id != write.task_id
                })
                .count() as u32;
            if occupied >= limit {
                return Ok(WriteOutcome::CapacityExceeded {
                    current: occupied,
                    limit,
                });
            }
        }

        let collision = state
            .cell(&write.board_id, &write.column_id, write.swimlane.as_ref())
            .iter()
            .any(|p| p.key == write.key && p.task_id != write.task_id);
        if collision {
            return Ok(WriteOutcome::KeyCollision);
        }

        let position = TaskPosition {
            task_id: write.task_id,
            board_id: write.board_id,
            column_id: write.column_id,
            swimlane: write.swimlane,
            key: write.key,
            version: write.expected_version + 1,
            modified_by: write.modified_by,
            modified_at: write.modified_at,
        };
        let seq = state.next_seq(&position.board_id);
        state.positions.insert(row_key, position.clone());

        debug!(
            task = %position.task_id,
            column = %position.column_id,
            version = position.version,
            seq,
            "position committed"
        );

        Ok(WriteOutcome::Committed {
            position,
            previous_column,
            seq,
        })
    }

    async fn rebalance(&self, write: RebalanceWrite) -> Result<RebalanceOutcome> {
        let mut state = self.state.write().await;

        let generation = state.generation(&write.board_id, &write.column_id);
        if generation != write.expected_generation {
            return Ok(RebalanceOutcome::Stale);
        }

        let current: HashMap<&TaskId, i64> = state
            .cell(&write.board_id, &write.column_id, write.swimlane.as_ref())
            .into_iter()
            .map(|p| (&p.task_id, p.version))
            .collect();
        let planned: HashSet<&TaskId> = write.rows.iter().map(|r| &r.task_id).collect();
        let unchanged = current.len() == write.rows.len()
            && planned.len() == write.rows.len()
            && write
                .rows
                .iter()
                .all(|r| current.get(&r.task_id) == Some(&r.expected_version));
        if !unchanged {
            return Ok(RebalanceOutcome::Stale);
        }

        let mut rows = Vec::with_capacity(write.rows.len());
        for planned_row in &write.rows {
            let row_key = (planned_row.task_id.clone(), write.board_id.clone());
            if let Some(position) = state.positions.get_mut(&row_key) {
                position.key = planned_row.key.clone();
                position.version += 1;
                position.modified_by = write.modified_by.clone();
                position.modified_at = write.modified_at;
                rows.push(RebalancedRow {
                    task_id: position.task_id.clone(),
                    key: position.key.clone(),
                    version: position.version,
                });
            }
        }

        let generation = generation + 1;
        state
            .generations
            .insert((write.board_id.clone(), write.column_id.clone()), generation);
        let seq = state.next_seq(&write.board_id);

        Ok(RebalanceOutcome::Committed(ColumnRebalanced {
            seq,
            board_id: write.board_id,
            column_id: write.column_id,
            swimlane: write.swimlane,
            generation,
            rows,
        }))
    }

    async fn last_commit_seq(&self, board_id: &BoardId) -> Result<i64> {
        let state = self.state.read().await;
        Ok(state.commit_seq.get(board_id).copied().unwrap_or(0))
    }

    async fn remove_task(&self, task_id: &TaskId) -> Result<u64> {
        let mut state = self.state.write().await;
        let before = state.positions.len();
        state.positions.retain(|(task, _), _| task != task_id);
        Ok((before - state.positions.len()) as u64)
    }

    async fn remove_board(&self, board_id: &BoardId) -> Result<u64> {
        let mut state = self.state.write().await;
        let before = state.positions.len();
        state.positions.retain(|(_, board), _| board != board_id);
        state.generations.retain(|(board, _), _| board != board_id);
        state.commit_seq.remove(board_id);
        state.boards.remove(board_id);
        Ok((before - state.positions.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Column, OrderKey, UserId};
    use crate::store::RebalanceRow;
    use chrono::Utc;

    fn board() -> Board {
        Board::new(
            "b1",
            "Sprint",
            vec![
                Column::new("todo", "b1", "To Do", 0),
                Column::new("doing", "b1", "In Progress", 1).with_wip_limit(1),
            ],
        )
    }

    fn write(task: &str, column: &str, key: &str, expected_version: i64) -> PositionWrite {
        PositionWrite {
            task_id: task.into(),
            board_id: "b1".into(),
            column_id: column.into(),
            swimlane: None,
            key: OrderKey::parse(key).unwrap(),
            expected_version,
            expected_generation: 0,
            capacity_limit: None,
            modified_by: UserId::from("u1"),
            modified_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn insert_then_compare_and_swap() {
        let store = MemoryStore::new().with_board(board()).await;

        let WriteOutcome::Committed { position, seq, previous_column } =
            store.write_position(write("t1", "todo", "V", 0)).await.unwrap()
        else {
            panic!("insert should commit");
        };
        assert_eq!(position.version, 1);
        assert_eq!(seq, 1);
        assert!(previous_column.is_none());

        // Inserting twice is a version mismatch, not an overwrite.
        assert_eq!(
            store.write_position(write("t1", "todo", "k", 0)).await.unwrap(),
            WriteOutcome::VersionMismatch { current: Some(1) }
        );

        let outcome = store.write_position(write("t1", "todo", "k", 1)).await.unwrap();
        assert!(matches!(outcome, WriteOutcome::Committed { ref position, seq: 2, .. } if position.version == 2));

        // Stale version loses.
        assert_eq!(
            store.write_position(write("t1", "todo", "s", 1)).await.unwrap(),
            WriteOutcome::VersionMismatch { current: Some(2) }
        );
    }

    #[tokio::test]
    async fn duplicate_keys_in_a_cell_are_refused() {
        let store = MemoryStore::new();
        store.write_position(write("t1", "todo", "V", 0)).await.unwrap();
        assert_eq!(
            store.write_position(write("t2", "todo", "V", 0)).await.unwrap(),
            WriteOutcome::KeyCollision
        );

        // Same key in another swimlane is fine.
        let mut other_lane = write("t2", "todo", "V", 0);
        other_lane.swimlane = Some("alice".into());
        assert!(matches!(
            store.write_position(other_lane).await.unwrap(),
            WriteOutcome::Committed { .. }
        ));
    }

    #[tokio::test]
    async fn capacity_is_rechecked_inside_the_write() {
        let store = MemoryStore::new();
        store.write_position(write("t1", "doing", "V", 0)).await.unwrap();

        let mut second = write("t2", "doing", "k", 0);
        second.capacity_limit = Some(1);
        assert_eq!(
            store.write_position(second).await.unwrap(),
            WriteOutcome::CapacityExceeded { current: 1, limit: 1 }
        );
        assert_eq!(
            store
                .count_in_column(&"b1".into(), &"doing".into())
                .await
                .unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn rebalance_bumps_versions_and_generation() {
        let store = MemoryStore::new();
        store.write_position(write("t1", "todo", "V", 0)).await.unwrap();
        store.write_position(write("t2", "todo", "VV", 0)).await.unwrap();

        let cell = store.cell(&"b1".into(), &"todo".into(), None).await.unwrap();
        assert_eq!(cell.generation, 0);
        let order: Vec<_> = cell.positions.iter().map(|p| p.task_id.as_str()).collect();
        assert_eq!(order, vec!["t1", "t2"]);

        let plan = RebalanceWrite {
            board_id: "b1".into(),
            column_id: "todo".into(),
            swimlane: None,
            expected_generation: 0,
            rows: vec![
                RebalanceRow {
                    task_id: "t1".into(),
                    expected_version: 1,
                    key: OrderKey::parse("K").unwrap(),
                },
                RebalanceRow {
                    task_id: "t2".into(),
                    expected_version: 1,
                    key: OrderKey::parse("f").unwrap(),
                },
            ],
            modified_by: UserId::from("system"),
            modified_at: Utc::now(),
        };

        let RebalanceOutcome::Committed(event) = store.rebalance(plan.clone()).await.unwrap()
        else {
            panic!("rebalance should commit");
        };
        assert_eq!(event.generation, 1);
        assert_eq!(event.version_of(&"t2".into()), Some(2));

        // Replaying the same plan is stale now.
        assert_eq!(store.rebalance(plan).await.unwrap(), RebalanceOutcome::Stale);

        // A key computed against generation 0 no longer commits.
        assert_eq!(
            store.write_position(write("t3", "todo", "z", 0)).await.unwrap(),
            WriteOutcome::GenerationChanged { current: 1 }
        );
    }

    #[tokio::test]
    async fn rebalance_refuses_when_membership_changed() {
        let store = MemoryStore::new();
        store.write_position(write("t1", "todo", "V", 0)).await.unwrap();
        store.write_position(write("t2", "todo", "k", 0)).await.unwrap();

        let plan = RebalanceWrite {
            board_id: "b1".into(),
            column_id: "todo".into(),
            swimlane: None,
            expected_generation: 0,
            rows: vec![RebalanceRow {
                task_id: "t1".into(),
                expected_version: 1,
                key: OrderKey::parse("V").unwrap(),
            }],
            modified_by: UserId::from("system"),
            modified_at: Utc::now(),
        };
        assert_eq!(store.rebalance(plan).await.unwrap(), RebalanceOutcome::Stale);
    }

    #[tokio::test]
    async fn cascades() {
        let store = MemoryStore::new().with_board(board()).await;
        store.write_position(write("t1", "todo", "V", 0)).await.unwrap();
        store.write_position(write("t2", "todo", "k", 0)).await.unwrap();

        assert_eq!(store.remove_task(&"t1".into()).await.unwrap(), 1);
        assert!(store.load(&"t1".into(), &"b1".into()).await.unwrap().is_none());

        assert_eq!(store.remove_board(&"b1".into()).await.unwrap(), 1);
        assert!(store.board_positions(&"b1".into()).await.unwrap().is_empty());
        assert!(store.board(&"b1".into()).await.unwrap().is_none());
    }
}
