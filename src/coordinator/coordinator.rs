//! Move Transaction Coordinator
//!
//! Drives one move through validate, capacity check, key computation and
//! conditional commit. Lost races on neighbor keys or column generations are
//! retried transparently up to a bound, then reported as contention; a stale
//! version from the client is never papered over.

use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use super::publisher::EventPublisher;
use super::retry::RetryPolicy;
use super::state::{MovePhase, MoveStateMachine};
use crate::config::EngineConfig;
use crate::domain::{
    Board, BoardEvent, BoardId, Column, ColumnId, ColumnRebalanced, CommittedMove, Identity,
    MoveRequest, PlaceRequest, Placement, Swimlane, TaskId, TaskPosition,
};
use crate::engine::{KeyDecision, PlacementError, PositionEngine};
use crate::error::{MoveError, Result};
use crate::store::{
    BoardDirectory, PositionStore, PositionWrite, RebalanceOutcome, RebalanceRow, RebalanceWrite,
    WriteOutcome,
};
use crate::wip::{CapacityCheck, WipLimitEnforcer};

/// A move that reached the store.
#[derive(Debug, Clone)]
pub struct CommitResult {
    pub position: TaskPosition,
    pub event: CommittedMove,
    /// Attempts it took, starting at 1
    pub attempts: u32,
}

/// Where a task should end up.
struct Target {
    task_id: TaskId,
    board_id: BoardId,
    column: Column,
    swimlane: Option<Swimlane>,
    placement: Placement,
}

/// What the caller believes about the task's current row.
#[derive(Debug, Clone, Copy)]
enum Expectation {
    /// Row exists at this version
    Version(i64),
    /// Task is not on the board yet
    Absent,
}

pub struct MoveCoordinator {
    store: Arc<dyn PositionStore>,
    boards: Arc<dyn BoardDirectory>,
    engine: PositionEngine,
    wip: WipLimitEnforcer,
    publisher: Arc<EventPublisher>,
    retry: RetryPolicy,
    max_conflict_retries: u32,
}

impl MoveCoordinator {
    pub fn new(
        store: Arc<dyn PositionStore>,
        boards: Arc<dyn BoardDirectory>,
        publisher: Arc<EventPublisher>,
        config: &EngineConfig,
    ) -> Self {
        Self {
            wip: WipLimitEnforcer::new(store.clone(), boards.clone()),
            store,
            boards,
            engine: PositionEngine::from_config(config),
            publisher,
            retry: RetryPolicy::from_config(config),
            max_conflict_retries: config.max_conflict_retries,
        }
    }

    pub fn publisher(&self) -> &Arc<EventPublisher> {
        &self.publisher
    }

    /// Move a task that is already on the board.
    #[instrument(skip(self, request, identity), fields(task = %request.task_id, board = %request.board_id, user = %identity.user_id))]
    pub async fn submit_move(
        &self,
        request: MoveRequest,
        identity: &Identity,
    ) -> std::result::Result<CommitResult, MoveError> {
        request.validate().map_err(MoveError::validation)?;

        let board = self.board(&request.board_id).await?;
        let column = board.column(&request.column_id).cloned().ok_or_else(|| {
            MoveError::validation(format!(
                "column {} is not on board {}",
                request.column_id, request.board_id
            ))
        })?;

        let target = Target {
            task_id: request.task_id,
            board_id: request.board_id,
            column,
            swimlane: request.swimlane,
            placement: request.placement,
        };
        self.commit(target, Expectation::Version(request.expected_version), identity)
            .await
    }

    /// Put a task on a board for the first time, at the end of the board's
    /// first column.
    #[instrument(skip(self, request, identity), fields(task = %request.task_id, board = %request.board_id))]
    pub async fn place_task(
        &self,
        request: PlaceRequest,
        identity: &Identity,
    ) -> std::result::Result<CommitResult, MoveError> {
        if request.task_id.is_blank() {
            return Err(MoveError::validation("task_id is required"));
        }
        if request.swimlane.as_ref().is_some_and(|s| s.is_blank()) {
            return Err(MoveError::validation("swimlane must not be blank"));
        }

        let board = self.board(&request.board_id).await?;
        let column = board.default_column().cloned().ok_or_else(|| {
            MoveError::validation(format!("board {} has no columns", request.board_id))
        })?;

        let target = Target {
            task_id: request.task_id,
            board_id: request.board_id,
            column,
            swimlane: request.swimlane,
            placement: Placement::End,
        };
        self.commit(target, Expectation::Absent, identity).await
    }

    /// Respace every key in one cell.
    #[instrument(skip(self, identity))]
    pub async fn rebalance_column(
        &self,
        board_id: &BoardId,
        column_id: &ColumnId,
        swimlane: Option<&Swimlane>,
        identity: &Identity,
    ) -> std::result::Result<ColumnRebalanced, MoveError> {
        let board = self.board(board_id).await?;
        if board.column(column_id).is_none() {
            return Err(MoveError::validation(format!(
                "column {} is not on board {}",
                column_id, board_id
            )));
        }
        self.rebalance_cell(board_id, column_id, swimlane, identity)
            .await
    }

    /// Snapshot of a board for clients (re)building their view
    pub async fn board_positions(&self, board_id: &BoardId) -> Result<Vec<TaskPosition>> {
        self.retry
            .run("board_positions", || self.store.board_positions(board_id))
            .await
    }

    /// Drop a deleted task from every board.
    pub async fn remove_task(&self, task_id: &TaskId) -> Result<u64> {
        let removed = self
            .retry
            .run("remove_task", || self.store.remove_task(task_id))
            .await?;
        info!(task = %task_id, removed, "task positions removed");
        Ok(removed)
    }

    /// Drop every position on a deleted board.
    pub async fn remove_board(&self, board_id: &BoardId) -> Result<u64> {
        let removed = self
            .retry
            .run("remove_board", || self.store.remove_board(board_id))
            .await?;
        self.publisher.forget(board_id);
        info!(board = %board_id, removed, "board positions removed");
        Ok(removed)
    }

    async fn board(&self, board_id: &BoardId) -> std::result::Result<Board, MoveError> {
        self.retry
            .run("board", || self.boards.board(board_id))
            .await?
            .ok_or_else(|| MoveError::validation(format!("unknown board {}", board_id)))
    }

    /// Seed the publisher's cursor for a board from the store before this
    /// process writes to it.
    async fn track_sequence(&self, board_id: &BoardId) -> std::result::Result<(), MoveError> {
        if !self.publisher.is_tracking(board_id) {
            let last = self
                .retry
                .run("last_commit_seq", || self.store.last_commit_seq(board_id))
                .await?;
            self.publisher.seed(board_id, last + 1);
        }
        Ok(())
    }

    async fn commit(
        &self,
        target: Target,
        expectation: Expectation,
        identity: &Identity,
    ) -> std::result::Result<CommitResult, MoveError> {
        self.track_sequence(&target.board_id).await?;
        let mut machine = MoveStateMachine::new(&target.task_id);
        let mut expectation = expectation;
        let mut rebalanced = false;

        loop {
            let current = self
                .retry
                .run("load", || self.store.load(&target.task_id, &target.board_id))
                .await?;

            let (expected_version, previous_column) = match (expectation, current) {
                (Expectation::Version(v), Some(row)) if row.version == v => (v, Some(row.column_id)),
                (Expectation::Version(v), Some(row)) => {
                    machine.advance(MovePhase::Conflict);
                    debug!(expected = v, current = row.version, "stale version");
                    return Err(MoveError::Conflict {
                        task_id: target.task_id,
                        expected: v,
                        current: row.version,
                    });
                }
                (Expectation::Version(_), None) => {
                    machine.advance(MovePhase::Rejected);
                    return Err(MoveError::validation(format!(
                        "task {} is not on board {}",
                        target.task_id, target.board_id
                    )));
                }
                (Expectation::Absent, None) => (0, None),
                (Expectation::Absent, Some(row)) => {
                    machine.advance(MovePhase::Conflict);
                    return Err(MoveError::Conflict {
                        task_id: target.task_id,
                        expected: 0,
                        current: row.version,
                    });
                }
            };
            let same_column = previous_column.as_ref() == Some(&target.column.id);

            machine.advance(MovePhase::CapacityChecking);
            let check = self
                .retry
                .run("capacity", || self.wip.check_column(&target.column, same_column))
                .await?;
            if let CapacityCheck::Rejected { current, limit } = check {
                machine.advance(MovePhase::Rejected);
                return Err(MoveError::Capacity {
                    column_id: target.column.id,
                    current,
                    limit,
                });
            }

            machine.advance(MovePhase::Computing);
            let cell = self
                .retry
                .run("cell", || {
                    self.store.cell(
                        &target.board_id,
                        &target.column.id,
                        target.swimlane.as_ref(),
                    )
                })
                .await?
                .without(&target.task_id);

            let key = match self.engine.key_for(&cell, &target.placement) {
                Ok(KeyDecision::Key(key)) => key,
                Ok(KeyDecision::RebalanceNeeded) if !rebalanced => {
                    let event = self
                        .rebalance_cell(
                            &target.board_id,
                            &target.column.id,
                            target.swimlane.as_ref(),
                            identity,
                        )
                        .await?;
                    // The rebalance bumped our own row when it shares the
                    // cell; that bump is ours to absorb, nothing else is.
                    if let (Expectation::Version(v), Some(bumped)) =
                        (expectation, event.version_of(&target.task_id))
                    {
                        if bumped == v + 1 {
                            expectation = Expectation::Version(bumped);
                        }
                    }
                    rebalanced = true;
                    machine.advance(MovePhase::Validating);
                    continue;
                }
                Ok(KeyDecision::RebalanceNeeded) => {
                    machine.advance(MovePhase::Conflict);
                    warn!(column = %target.column.id, "still out of key space after rebalance");
                    return Err(MoveError::Contended {
                        column_id: target.column.id,
                    });
                }
                Err(PlacementError::StaleReference(task_id)) => {
                    machine.advance(MovePhase::Conflict);
                    debug!(reference = %task_id, "reference sibling left the cell");
                    return Err(MoveError::StaleReference { task_id });
                }
            };

            machine.advance(MovePhase::Committing);
            let write = PositionWrite {
                task_id: target.task_id.clone(),
                board_id: target.board_id.clone(),
                column_id: target.column.id.clone(),
                swimlane: target.swimlane.clone(),
                key,
                expected_version,
                expected_generation: cell.generation,
                capacity_limit: WipLimitEnforcer::guard(&target.column, same_column),
                modified_by: identity.user_id.clone(),
                modified_at: Utc::now(),
            };

            let outcome = self
                .retry
                .run("write_position", || self.store.write_position(write.clone()))
                .await?;

            match outcome {
                WriteOutcome::Committed {
                    position,
                    previous_column,
                    seq,
                } => {
                    machine.advance(MovePhase::Committed);
                    let event = CommittedMove::from_position(
                        seq,
                        previous_column,
                        &position,
                        &identity.display_name,
                    );
                    self.publisher
                        .publish(BoardEvent::CommittedMove(event.clone()));
                    info!(
                        column = %position.column_id,
                        key = %position.key,
                        version = position.version,
                        seq,
                        attempts = machine.attempt(),
                        "move committed"
                    );
                    return Ok(CommitResult {
                        position,
                        event,
                        attempts: machine.attempt(),
                    });
                }
                WriteOutcome::CapacityExceeded { current, limit } => {
                    machine.advance(MovePhase::Rejected);
                    return Err(MoveError::Capacity {
                        column_id: target.column.id,
                        current,
                        limit,
                    });
                }
                WriteOutcome::VersionMismatch { current } => {
                    // Someone moved the task between our read and our write.
                    machine.advance(MovePhase::Conflict);
                    debug!(expected = expected_version, ?current, "version moved under commit");
                    return Err(MoveError::Conflict {
                        task_id: target.task_id,
                        expected: expected_version,
                        current: current.unwrap_or(0),
                    });
                }
                outcome => {
                    debug!(?outcome, attempt = machine.attempt(), "lost commit race");
                    machine.retry();
                    if machine.attempt() > self.max_conflict_retries + 1 {
                        machine.advance(MovePhase::Conflict);
                        warn!(attempts = machine.attempt() - 1, "move retries exhausted");
                        return Err(MoveError::Contended {
                            column_id: target.column.id,
                        });
                    }
                }
            }
        }
    }

    async fn rebalance_cell(
        &self,
        board_id: &BoardId,
        column_id: &ColumnId,
        swimlane: Option<&Swimlane>,
        identity: &Identity,
    ) -> std::result::Result<ColumnRebalanced, MoveError> {
        self.track_sequence(board_id).await?;
        for attempt in 1..=self.max_conflict_retries + 1 {
            let cell = self
                .retry
                .run("cell", || self.store.cell(board_id, column_id, swimlane))
                .await?;

            let rows = self
                .engine
                .plan_rebalance(&cell)
                .into_iter()
                .map(|(position, key)| RebalanceRow {
                    task_id: position.task_id,
                    expected_version: position.version,
                    key,
                })
                .collect();
            let write = RebalanceWrite {
                board_id: board_id.clone(),
                column_id: column_id.clone(),
                swimlane: swimlane.cloned(),
                expected_generation: cell.generation,
                rows,
                modified_by: identity.user_id.clone(),
                modified_at: Utc::now(),
            };

            match self
                .retry
                .run("rebalance", || self.store.rebalance(write.clone()))
                .await?
            {
                RebalanceOutcome::Committed(event) => {
                    info!(
                        board = %board_id,
                        column = %column_id,
                        rows = event.rows.len(),
                        generation = event.generation,
                        "cell rebalanced"
                    );
                    self.publisher
                        .publish(BoardEvent::ColumnRebalanced(event.clone()));
                    return Ok(event);
                }
                RebalanceOutcome::Stale => {
                    debug!(attempt, column = %column_id, "rebalance plan went stale");
                }
            }
        }

        warn!(board = %board_id, column = %column_id, "rebalance kept going stale");
        Err(MoveError::Contended {
            column_id: column_id.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::MemoryStore;
    use crate::domain::{CellSnapshot, OrderKey};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;
    use tokio::sync::broadcast;

    /// Loses its next `losses` writes with `lost`, as if a neighbor had
    /// committed first; otherwise behaves like the wrapped store.
    struct RacingStore {
        inner: Arc<MemoryStore>,
        lost: WriteOutcome,
        losses: AtomicU32,
        writes: AtomicU32,
    }

    impl RacingStore {
        fn new(inner: Arc<MemoryStore>, lost: WriteOutcome, losses: u32) -> Self {
            Self {
                inner,
                lost,
                losses: AtomicU32::new(losses),
                writes: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl PositionStore for RacingStore {
        async fn load(&self, task_id: &TaskId, board_id: &BoardId) -> Result<Option<TaskPosition>> {
            self.inner.load(task_id, board_id).await
        }

        async fn cell(
            &self,
            board_id: &BoardId,
            column_id: &ColumnId,
            swimlane: Option<&Swimlane>,
        ) -> Result<CellSnapshot> {
            self.inner.cell(board_id, column_id, swimlane).await
        }

        async fn count_in_column(&self, board_id: &BoardId, column_id: &ColumnId) -> Result<u32> {
            self.inner.count_in_column(board_id, column_id).await
        }

        async fn board_positions(&self, board_id: &BoardId) -> Result<Vec<TaskPosition>> {
            self.inner.board_positions(board_id).await
        }

        async fn write_position(&self, write: PositionWrite) -> Result<WriteOutcome> {
            self.writes.fetch_add(1, Ordering::SeqCst);
            let lose = self
                .losses
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if lose {
                return Ok(self.lost.clone());
            }
            self.inner.write_position(write).await
        }

        async fn rebalance(&self, write: RebalanceWrite) -> Result<RebalanceOutcome> {
            self.inner.rebalance(write).await
        }

        async fn last_commit_seq(&self, board_id: &BoardId) -> Result<i64> {
            self.inner.last_commit_seq(board_id).await
        }

        async fn remove_task(&self, task_id: &TaskId) -> Result<u64> {
            self.inner.remove_task(task_id).await
        }

        async fn remove_board(&self, board_id: &BoardId) -> Result<u64> {
            self.inner.remove_board(board_id).await
        }
    }

    /// A store with t1 and t2 placed (commit seq 2), and a freshly started
    /// coordinator over it that loses `losses` writes.
    async fn racing_setup(
        lost: WriteOutcome,
        losses: u32,
    ) -> (MoveCoordinator, Arc<RacingStore>, broadcast::Receiver<BoardEvent>) {
        let inner = Arc::new(MemoryStore::new().with_board(board()).await);
        let seeder = MoveCoordinator::new(
            inner.clone(),
            inner.clone(),
            Arc::new(EventPublisher::new(Duration::from_secs(2))),
            &EngineConfig::default(),
        );
        place(&seeder, "t1").await;
        place(&seeder, "t2").await;

        let store = Arc::new(RacingStore::new(inner.clone(), lost, losses));
        let publisher = Arc::new(EventPublisher::new(Duration::from_secs(2)));
        let rx = publisher.subscribe();
        let coordinator =
            MoveCoordinator::new(store.clone(), inner, publisher, &EngineConfig::default());
        (coordinator, store, rx)
    }

    fn board() -> Board {
        Board::new(
            "b1",
            "Sprint",
            vec![
                Column::new("todo", "b1", "To Do", 0),
                Column::new("doing", "b1", "In Progress", 1).with_wip_limit(2),
                Column::new("done", "b1", "Done", 2),
            ],
        )
    }

    async fn setup(config: EngineConfig) -> (MoveCoordinator, broadcast::Receiver<BoardEvent>) {
        let store = Arc::new(MemoryStore::new().with_board(board()).await);
        let publisher = Arc::new(EventPublisher::new(Duration::from_secs(2)));
        let rx = publisher.subscribe();
        let coordinator = MoveCoordinator::new(store.clone(), store, publisher, &config);
        (coordinator, rx)
    }

    fn ann() -> Identity {
        Identity::new("u1", "Ann")
    }

    async fn place(coordinator: &MoveCoordinator, task: &str) -> CommitResult {
        coordinator
            .place_task(
                PlaceRequest {
                    task_id: task.into(),
                    board_id: "b1".into(),
                    swimlane: None,
                },
                &ann(),
            )
            .await
            .unwrap()
    }

    fn keys(positions: &[TaskPosition], column: &str) -> Vec<String> {
        positions
            .iter()
            .filter(|p| p.column_id.as_str() == column)
            .map(|p| p.task_id.to_string())
            .collect()
    }

    #[tokio::test]
    async fn placed_tasks_append_to_the_first_column() {
        let (coordinator, mut rx) = setup(EngineConfig::default()).await;
        let first = place(&coordinator, "t1").await;
        let second = place(&coordinator, "t2").await;

        assert_eq!(first.position.column_id.as_str(), "todo");
        assert_eq!(first.position.version, 1);
        assert!(first.position.key < second.position.key);
        assert_eq!(first.event.from_column, None);

        assert!(matches!(rx.try_recv().unwrap(), BoardEvent::CommittedMove(e) if e.seq == 1));
        assert!(matches!(rx.try_recv().unwrap(), BoardEvent::CommittedMove(e) if e.seq == 2));
    }

    #[tokio::test]
    async fn placing_twice_is_a_conflict() {
        let (coordinator, _rx) = setup(EngineConfig::default()).await;
        place(&coordinator, "t1").await;
        let err = coordinator
            .place_task(
                PlaceRequest {
                    task_id: "t1".into(),
                    board_id: "b1".into(),
                    swimlane: None,
                },
                &ann(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, MoveError::Conflict { expected: 0, current: 1, .. }));
    }

    #[tokio::test]
    async fn move_between_siblings_lands_between_them() {
        let (coordinator, _rx) = setup(EngineConfig::default()).await;
        place(&coordinator, "a").await;
        place(&coordinator, "b").await;
        place(&coordinator, "c").await;

        let result = coordinator
            .submit_move(
                MoveRequest::new("c", "b1", "todo", 1).placed(Placement::between("a", "b")),
                &ann(),
            )
            .await
            .unwrap();
        assert_eq!(result.position.version, 2);
        assert_eq!(result.event.from_column.as_ref().map(|c| c.as_str()), Some("todo"));

        let positions = coordinator.board_positions(&"b1".into()).await.unwrap();
        assert_eq!(keys(&positions, "todo"), vec!["a", "c", "b"]);
    }

    #[tokio::test]
    async fn stale_version_is_a_conflict() {
        let (coordinator, _rx) = setup(EngineConfig::default()).await;
        place(&coordinator, "t1").await;
        coordinator
            .submit_move(MoveRequest::new("t1", "b1", "done", 1), &ann())
            .await
            .unwrap();

        let err = coordinator
            .submit_move(MoveRequest::new("t1", "b1", "todo", 1), &ann())
            .await
            .unwrap_err();
        assert_eq!(
            err,
            MoveError::Conflict {
                task_id: "t1".into(),
                expected: 1,
                current: 2
            }
        );
    }

    #[tokio::test]
    async fn missing_reference_is_stale() {
        let (coordinator, _rx) = setup(EngineConfig::default()).await;
        place(&coordinator, "t1").await;
        place(&coordinator, "t2").await;

        let err = coordinator
            .submit_move(
                MoveRequest::new("t1", "b1", "done", 1).placed(Placement::after("t2")),
                &ann(),
            )
            .await
            .unwrap_err();
        assert_eq!(err, MoveError::StaleReference { task_id: "t2".into() });
    }

    #[tokio::test]
    async fn full_column_rejects_and_leaves_the_task_alone() {
        let (coordinator, _rx) = setup(EngineConfig::default()).await;
        for task in ["t1", "t2", "t3"] {
            place(&coordinator, task).await;
        }
        for task in ["t1", "t2"] {
            coordinator
                .submit_move(MoveRequest::new(task, "b1", "doing", 1), &ann())
                .await
                .unwrap();
        }

        let err = coordinator
            .submit_move(MoveRequest::new("t3", "b1", "doing", 1), &ann())
            .await
            .unwrap_err();
        assert_eq!(
            err,
            MoveError::Capacity {
                column_id: "doing".into(),
                current: 2,
                limit: 2
            }
        );

        let positions = coordinator.board_positions(&"b1".into()).await.unwrap();
        assert_eq!(keys(&positions, "todo"), vec!["t3"]);

        // Reordering inside the full column is still allowed.
        coordinator
            .submit_move(
                MoveRequest::new("t2", "b1", "doing", 2).placed(Placement::Index { index: 0 }),
                &ann(),
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn unknown_task_or_column_is_invalid() {
        let (coordinator, _rx) = setup(EngineConfig::default()).await;
        let err = coordinator
            .submit_move(MoveRequest::new("ghost", "b1", "todo", 1), &ann())
            .await
            .unwrap_err();
        assert_eq!(err.code(), "validation");

        place(&coordinator, "t1").await;
        let err = coordinator
            .submit_move(MoveRequest::new("t1", "b1", "nope", 1), &ann())
            .await
            .unwrap_err();
        assert_eq!(err.code(), "validation");
    }

    #[tokio::test]
    async fn exhausted_key_space_rebalances_and_still_commits() {
        let config = EngineConfig {
            max_key_len: 4,
            ..EngineConfig::default()
        };
        let (coordinator, mut rx) = setup(config).await;
        place(&coordinator, "anchor").await;
        place(&coordinator, "mover").await;

        // Keep wedging tasks in front of the anchor until keys run out.
        let mut rebalanced = None;
        for i in 0..40 {
            let task = format!("t{}", i);
            place(&coordinator, &task).await;
            let result = coordinator
                .submit_move(
                    MoveRequest::new(task.as_str(), "b1", "todo", 1).placed(Placement::before("anchor")),
                    &ann(),
                )
                .await
                .unwrap();
            assert!(result.position.key.len() <= 4);

            while let Ok(event) = rx.try_recv() {
                if let BoardEvent::ColumnRebalanced(e) = event {
                    rebalanced = Some(e);
                }
            }
            if rebalanced.is_some() {
                break;
            }
        }

        let event = rebalanced.expect("a rebalance happened");
        assert_eq!(event.generation, 1);

        // Order survived the rewrite: the anchor is still ahead of the mover.
        let positions = coordinator.board_positions(&"b1".into()).await.unwrap();
        let order = keys(&positions, "todo");
        let anchor = order.iter().position(|t| t == "anchor").unwrap();
        let mover = order.iter().position(|t| t == "mover").unwrap();
        assert!(anchor < mover);
        let mut sorted: Vec<OrderKey> = positions.iter().map(|p| p.key.clone()).collect();
        sorted.dedup();
        assert_eq!(sorted.len(), positions.len());
    }

    #[tokio::test]
    async fn explicit_rebalance_spaces_the_cell() {
        let (coordinator, mut rx) = setup(EngineConfig::default()).await;
        for task in ["a", "b", "c"] {
            place(&coordinator, task).await;
        }
        while rx.try_recv().is_ok() {}

        let event = coordinator
            .rebalance_column(&"b1".into(), &"todo".into(), None, &ann())
            .await
            .unwrap();
        assert_eq!(event.rows.len(), 3);
        assert_eq!(event.version_of(&"a".into()), Some(2));
        assert!(matches!(rx.try_recv().unwrap(), BoardEvent::ColumnRebalanced(_)));

        // Clients holding the old version must refetch.
        let err = coordinator
            .submit_move(MoveRequest::new("a", "b1", "done", 1), &ann())
            .await
            .unwrap_err();
        assert!(matches!(err, MoveError::Conflict { current: 2, .. }));
    }

    #[tokio::test]
    async fn removal_cascades() {
        let (coordinator, _rx) = setup(EngineConfig::default()).await;
        place(&coordinator, "t1").await;
        place(&coordinator, "t2").await;

        assert_eq!(coordinator.remove_task(&"t1".into()).await.unwrap(), 1);
        assert_eq!(coordinator.remove_board(&"b1".into()).await.unwrap(), 1);
        assert!(coordinator
            .board_positions(&"b1".into())
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn lost_key_races_are_retried_until_the_write_lands() {
        let (coordinator, store, mut rx) = racing_setup(WriteOutcome::KeyCollision, 2).await;

        let result = coordinator
            .submit_move(MoveRequest::new("t1", "b1", "done", 1), &ann())
            .await
            .unwrap();
        assert_eq!(result.attempts, 3);
        assert_eq!(result.position.version, 2);
        assert_eq!(store.writes.load(Ordering::SeqCst), 3);

        // One broadcast, numbered after what the store already handed out.
        assert!(matches!(rx.try_recv().unwrap(), BoardEvent::CommittedMove(e) if e.seq == 3));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn endless_generation_races_give_up_as_contended() {
        let (coordinator, store, mut rx) =
            racing_setup(WriteOutcome::GenerationChanged { current: 1 }, u32::MAX).await;

        let err = coordinator
            .submit_move(MoveRequest::new("t1", "b1", "done", 1), &ann())
            .await
            .unwrap_err();
        assert_eq!(
            err,
            MoveError::Contended {
                column_id: "done".into()
            }
        );
        let max_attempts = EngineConfig::default().max_conflict_retries + 1;
        assert_eq!(store.writes.load(Ordering::SeqCst), max_attempts);

        let row = store.load(&"t1".into(), &"b1".into()).await.unwrap().unwrap();
        assert_eq!(row.version, 1);
        assert_eq!(row.column_id.as_str(), "todo");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn version_moved_under_the_write_is_a_plain_conflict() {
        let (coordinator, store, _rx) =
            racing_setup(WriteOutcome::VersionMismatch { current: Some(4) }, 1).await;

        let err = coordinator
            .submit_move(MoveRequest::new("t1", "b1", "done", 1), &ann())
            .await
            .unwrap_err();
        assert_eq!(
            err,
            MoveError::Conflict {
                task_id: "t1".into(),
                expected: 1,
                current: 4
            }
        );
        assert_eq!(store.writes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn restarted_publisher_picks_up_the_store_sequence() {
        let (coordinator, _store, mut rx) = racing_setup(WriteOutcome::KeyCollision, 0).await;
        tokio_test::assert_ok!(coordinator.track_sequence(&"b1".into()).await);

        // Commit 4 finishes first; it must wait for commit 3.
        coordinator
            .publisher()
            .publish(BoardEvent::CommittedMove(CommittedMove {
                seq: 4,
                task_id: "t9".into(),
                board_id: "b1".into(),
                from_column: None,
                column_id: "todo".into(),
                swimlane: None,
                key: OrderKey::parse("z").unwrap(),
                version: 1,
                moved_by: "u2".into(),
                mover_name: "Bob".into(),
                committed_at: Utc::now(),
            }));
        assert_eq!(coordinator.publisher().pending(), 1);

        coordinator
            .submit_move(MoveRequest::new("t2", "b1", "done", 1), &ann())
            .await
            .unwrap();
        let released: Vec<i64> = std::iter::from_fn(|| rx.try_recv().ok())
            .filter_map(|e| e.seq())
            .collect();
        assert_eq!(released, vec![3, 4]);
    }

    #[tokio::test]
    async fn removing_a_board_drops_its_sequence() {
        let (coordinator, _rx) = setup(EngineConfig::default()).await;
        place(&coordinator, "t1").await;
        assert!(coordinator.publisher().is_tracking(&"b1".into()));

        coordinator.remove_board(&"b1".into()).await.unwrap();
        assert!(!coordinator.publisher().is_tracking(&"b1".into()));
    }
}
