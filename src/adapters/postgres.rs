use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Postgres, Row, Transaction};
use std::collections::HashMap;
use tracing::{debug, info, instrument, warn};

use crate::domain::{
    Board, BoardId, CellSnapshot, Column, ColumnId, ColumnRebalanced, OrderKey, RebalancedRow,
    SavedFilter, Swimlane, TaskId, TaskPosition, UserId,
};
use crate::error::{CardflowError, Result};
use crate::store::{
    BoardDirectory, PositionStore, PositionWrite, RebalanceOutcome, RebalanceWrite, WriteOutcome,
};

const UNIQUE_VIOLATION: &str = "23505";

/// PostgreSQL storage adapter
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Create a new PostgreSQL store
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;

        info!("Connected to PostgreSQL");
        Ok(Self { pool })
    }

    /// Create a PostgreSQL store from an existing connection pool
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run migrations
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        info!("Database migrations completed");
        Ok(())
    }

    /// Get the connection pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Lock the column's state row and return its generation
    async fn lock_column(
        tx: &mut Transaction<'_, Postgres>,
        board_id: &BoardId,
        column_id: &ColumnId,
        exclusive: bool,
    ) -> Result<i64> {
        sqlx::query(
            r#"
            INSERT INTO column_state (board_id, column_id)
            VALUES ($1, $2)
            ON CONFLICT (board_id, column_id) DO NOTHING
            "#,
        )
        .bind(board_id.as_str())
        .bind(column_id.as_str())
        .execute(&mut **tx)
        .await?;

        let sql = if exclusive {
            "SELECT generation FROM column_state WHERE board_id = $1 AND column_id = $2 FOR UPDATE"
        } else {
            "SELECT generation FROM column_state WHERE board_id = $1 AND column_id = $2 FOR SHARE"
        };
        let generation: i64 = sqlx::query_scalar(sql)
            .bind(board_id.as_str())
            .bind(column_id.as_str())
            .fetch_one(&mut **tx)
            .await?;
        Ok(generation)
    }

    /// Next per-board commit number. The row lock is held until commit, so
    /// sequence order is commit order.
    async fn next_seq(tx: &mut Transaction<'_, Postgres>, board_id: &BoardId) -> Result<i64> {
        let seq: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO board_commit_seq (board_id, seq)
            VALUES ($1, 1)
            ON CONFLICT (board_id) DO UPDATE SET seq = board_commit_seq.seq + 1
            RETURNING seq
            "#,
        )
        .bind(board_id.as_str())
        .fetch_one(&mut **tx)
        .await?;
        Ok(seq)
    }

    async fn current_version(
        tx: &mut Transaction<'_, Postgres>,
        task_id: &TaskId,
        board_id: &BoardId,
    ) -> Result<Option<i64>> {
        let version = sqlx::query_scalar(
            "SELECT version FROM task_positions WHERE task_id = $1 AND board_id = $2",
        )
        .bind(task_id.as_str())
        .bind(board_id.as_str())
        .fetch_optional(&mut **tx)
        .await?;
        Ok(version)
    }
}

fn lane_to_db(swimlane: Option<&Swimlane>) -> &str {
    swimlane.map(|s| s.as_str()).unwrap_or("")
}

fn lane_from_db(raw: String) -> Option<Swimlane> {
    if raw.is_empty() {
        None
    } else {
        Some(Swimlane::from(raw))
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => db.code().as_deref() == Some(UNIQUE_VIOLATION),
        _ => false,
    }
}

fn position_from_row(row: &PgRow) -> Result<TaskPosition> {
    let raw_key: String = row.get("order_key");
    let key = OrderKey::parse(&raw_key).map_err(|e| CardflowError::Internal(e.to_string()))?;
    Ok(TaskPosition {
        task_id: TaskId::from(row.get::<String, _>("task_id")),
        board_id: BoardId::from(row.get::<String, _>("board_id")),
        column_id: ColumnId::from(row.get::<String, _>("column_id")),
        swimlane: lane_from_db(row.get("swimlane")),
        key,
        version: row.get("version"),
        modified_by: UserId::from(row.get::<String, _>("modified_by")),
        modified_at: row.get::<DateTime<Utc>, _>("modified_at"),
    })
}

#[async_trait]
impl BoardDirectory for PostgresStore {
    #[instrument(skip(self))]
    async fn board(&self, board_id: &BoardId) -> Result<Option<Board>> {
        let Some(row) = sqlx::query("SELECT id, name FROM boards WHERE id = $1")
            .bind(board_id.as_str())
            .fetch_optional(&self.pool)
            .await?
        else {
            return Ok(None);
        };

        let columns = sqlx::query(
            r#"
            SELECT id, board_id, name, wip_limit, ordinal
            FROM board_columns
            WHERE board_id = $1
            ORDER BY ordinal ASC
            "#,
        )
        .bind(board_id.as_str())
        .fetch_all(&self.pool)
        .await?
        .iter()
        .map(|r| Column {
            id: ColumnId::from(r.get::<String, _>("id")),
            board_id: BoardId::from(r.get::<String, _>("board_id")),
            name: r.get("name"),
            wip_limit: r
                .get::<Option<i32>, _>("wip_limit")
                .map(|limit| limit.max(0) as u32),
            ordinal: r.get("ordinal"),
        })
        .collect();

        let filters = sqlx::query(
            "SELECT name, definition FROM saved_filters WHERE board_id = $1 ORDER BY name",
        )
        .bind(board_id.as_str())
        .fetch_all(&self.pool)
        .await?
        .iter()
        .map(|r| SavedFilter {
            name: r.get("name"),
            definition: r.get("definition"),
        })
        .collect();

        let mut board = Board::new(
            BoardId::from(row.get::<String, _>("id")),
            row.get::<String, _>("name"),
            columns,
        );
        board.filters = filters;
        Ok(Some(board))
    }
}

#[async_trait]
impl PositionStore for PostgresStore {
    #[instrument(skip(self))]
    async fn load(&self, task_id: &TaskId, board_id: &BoardId) -> Result<Option<TaskPosition>> {
        let row = sqlx::query(
            r#"
            SELECT task_id, board_id, column_id, swimlane, order_key, version,
                   modified_by, modified_at
            FROM task_positions
            WHERE task_id = $1 AND board_id = $2
            "#,
        )
        .bind(task_id.as_str())
        .bind(board_id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(position_from_row).transpose()
    }

    #[instrument(skip(self))]
    async fn cell(
        &self,
        board_id: &BoardId,
        column_id: &ColumnId,
        swimlane: Option<&Swimlane>,
    ) -> Result<CellSnapshot> {
        // One statement, one snapshot: the generation and rows agree.
        let rows = sqlx::query(
            r#"
            SELECT p.task_id, p.board_id, p.column_id, p.swimlane, p.order_key, p.version,
                   p.modified_by, p.modified_at,
                   COALESCE(cs.generation, 0) AS generation
            FROM (SELECT 1) AS one
            LEFT JOIN column_state cs
                   ON cs.board_id = $1 AND cs.column_id = $2
            LEFT JOIN task_positions p
                   ON p.board_id = $1 AND p.column_id = $2 AND p.swimlane = $3
            ORDER BY p.order_key ASC
            "#,
        )
        .bind(board_id.as_str())
        .bind(column_id.as_str())
        .bind(lane_to_db(swimlane))
        .fetch_all(&self.pool)
        .await?;

        let generation = rows
            .first()
            .map(|r| r.get::<i64, _>("generation"))
            .unwrap_or(0);
        let positions = rows
            .iter()
            .filter(|r| r.get::<Option<String>, _>("task_id").is_some())
            .map(position_from_row)
            .collect::<Result<Vec<_>>>()?;

        Ok(CellSnapshot {
            generation,
            positions,
        })
    }

    async fn count_in_column(&self, board_id: &BoardId, column_id: &ColumnId) -> Result<u32> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*)::BIGINT FROM task_positions WHERE board_id = $1 AND column_id = $2",
        )
        .bind(board_id.as_str())
        .bind(column_id.as_str())
        .fetch_one(&self.pool)
        .await?;
        Ok(count.max(0) as u32)
    }

    #[instrument(skip(self))]
    async fn board_positions(&self, board_id: &BoardId) -> Result<Vec<TaskPosition>> {
        let rows = sqlx::query(
            r#"
            SELECT task_id, board_id, column_id, swimlane, order_key, version,
                   modified_by, modified_at
            FROM task_positions
            WHERE board_id = $1
            ORDER BY column_id, swimlane, order_key
            "#,
        )
        .bind(board_id.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(position_from_row).collect()
    }

    #[instrument(skip(self, write), fields(task = %write.task_id, column = %write.column_id))]
    async fn write_position(&self, write: PositionWrite) -> Result<WriteOutcome> {
        let mut tx = self.pool.begin().await?;

        let previous_column: Option<String> = sqlx::query_scalar(
            "SELECT column_id FROM task_positions WHERE task_id = $1 AND board_id = $2",
        )
        .bind(write.task_id.as_str())
        .bind(write.board_id.as_str())
        .fetch_optional(&mut *tx)
        .await?;
        let entering = previous_column.as_deref() != Some(write.column_id.as_str());

        // Entering a column excludes other entrants so the capacity count holds.
        let generation =
            Self::lock_column(&mut tx, &write.board_id, &write.column_id, entering).await?;
        if generation != write.expected_generation {
            return Ok(WriteOutcome::GenerationChanged {
                current: generation,
            });
        }

        if let Some(limit) = write.capacity_limit {
            let occupied: i64 = sqlx::query_scalar(
                r#"
                SELECT COUNT(*)::BIGINT FROM task_positions
                WHERE board_id = $1 AND column_id = $2 AND task_id <> $3
                "#,
            )
            .bind(write.board_id.as_str())
            .bind(write.column_id.as_str())
            .bind(write.task_id.as_str())
            .fetch_one(&mut *tx)
            .await?;
            let occupied = occupied.max(0) as u32;
            if occupied >= limit {
                return Ok(WriteOutcome::CapacityExceeded {
                    current: occupied,
                    limit,
                });
            }
        }

        let taken: Option<i32> = sqlx::query_scalar(
            r#"
            SELECT 1 FROM task_positions
            WHERE board_id = $1 AND column_id = $2 AND swimlane = $3
              AND order_key = $4 AND task_id <> $5
            "#,
        )
        .bind(write.board_id.as_str())
        .bind(write.column_id.as_str())
        .bind(lane_to_db(write.swimlane.as_ref()))
        .bind(write.key.as_str())
        .bind(write.task_id.as_str())
        .fetch_optional(&mut *tx)
        .await?;
        if taken.is_some() {
            return Ok(WriteOutcome::KeyCollision);
        }

        let written = if write.expected_version == 0 {
            sqlx::query(
                r#"
                INSERT INTO task_positions (
                    task_id, board_id, column_id, swimlane, order_key, version,
                    modified_by, modified_at
                )
                VALUES ($1, $2, $3, $4, $5, 1, $6, $7)
                ON CONFLICT (task_id, board_id) DO NOTHING
                RETURNING task_id, board_id, column_id, swimlane, order_key, version,
                          modified_by, modified_at
                "#,
            )
            .bind(write.task_id.as_str())
            .bind(write.board_id.as_str())
            .bind(write.column_id.as_str())
            .bind(lane_to_db(write.swimlane.as_ref()))
            .bind(write.key.as_str())
            .bind(write.modified_by.as_str())
            .bind(write.modified_at)
            .fetch_optional(&mut *tx)
            .await?
        } else {
            sqlx::query(
                r#"
                UPDATE task_positions SET
                    column_id = $3,
                    swimlane = $4,
                    order_key = $5,
                    version = version + 1,
                    modified_by = $6,
                    modified_at = $7
                WHERE task_id = $1 AND board_id = $2 AND version = $8
                RETURNING task_id, board_id, column_id, swimlane, order_key, version,
                          modified_by, modified_at
                "#,
            )
            .bind(write.task_id.as_str())
            .bind(write.board_id.as_str())
            .bind(write.column_id.as_str())
            .bind(lane_to_db(write.swimlane.as_ref()))
            .bind(write.key.as_str())
            .bind(write.modified_by.as_str())
            .bind(write.modified_at)
            .bind(write.expected_version)
            .fetch_optional(&mut *tx)
            .await?
        };

        let Some(row) = written else {
            let current = Self::current_version(&mut tx, &write.task_id, &write.board_id).await?;
            debug!(expected = write.expected_version, ?current, "compare-and-swap lost");
            return Ok(WriteOutcome::VersionMismatch { current });
        };
        let position = position_from_row(&row)?;
        let seq = Self::next_seq(&mut tx, &write.board_id).await?;

        match tx.commit().await {
            Ok(()) => {}
            Err(err) if is_unique_violation(&err) => {
                warn!(key = %write.key, "order key taken at commit");
                return Ok(WriteOutcome::KeyCollision);
            }
            Err(err) => return Err(err.into()),
        }

        Ok(WriteOutcome::Committed {
            position,
            previous_column: previous_column.map(ColumnId::from),
            seq,
        })
    }

    #[instrument(skip(self, write), fields(board = %write.board_id, column = %write.column_id, rows = write.rows.len()))]
    async fn rebalance(&self, write: RebalanceWrite) -> Result<RebalanceOutcome> {
        let mut tx = self.pool.begin().await?;

        let generation = Self::lock_column(&mut tx, &write.board_id, &write.column_id, true).await?;
        if generation != write.expected_generation {
            return Ok(RebalanceOutcome::Stale);
        }

        let current: HashMap<String, i64> = sqlx::query(
            r#"
            SELECT task_id, version FROM task_positions
            WHERE board_id = $1 AND column_id = $2 AND swimlane = $3
            "#,
        )
        .bind(write.board_id.as_str())
        .bind(write.column_id.as_str())
        .bind(lane_to_db(write.swimlane.as_ref()))
        .fetch_all(&mut *tx)
        .await?
        .iter()
        .map(|r| (r.get::<String, _>("task_id"), r.get::<i64, _>("version")))
        .collect();

        let unchanged = current.len() == write.rows.len()
            && write
                .rows
                .iter()
                .all(|r| current.get(r.task_id.as_str()) == Some(&r.expected_version));
        if !unchanged {
            return Ok(RebalanceOutcome::Stale);
        }

        let mut rows = Vec::with_capacity(write.rows.len());
        for planned in &write.rows {
            let version: Option<i64> = sqlx::query_scalar(
                r#"
                UPDATE task_positions SET
                    order_key = $3,
                    version = version + 1,
                    modified_by = $4,
                    modified_at = $5
                WHERE task_id = $1 AND board_id = $2 AND version = $6
                RETURNING version
                "#,
            )
            .bind(planned.task_id.as_str())
            .bind(write.board_id.as_str())
            .bind(planned.key.as_str())
            .bind(write.modified_by.as_str())
            .bind(write.modified_at)
            .bind(planned.expected_version)
            .fetch_optional(&mut *tx)
            .await?;

            let Some(version) = version else {
                return Ok(RebalanceOutcome::Stale);
            };
            rows.push(RebalancedRow {
                task_id: planned.task_id.clone(),
                key: planned.key.clone(),
                version,
            });
        }

        let generation: i64 = sqlx::query_scalar(
            r#"
            UPDATE column_state SET generation = generation + 1
            WHERE board_id = $1 AND column_id = $2
            RETURNING generation
            "#,
        )
        .bind(write.board_id.as_str())
        .bind(write.column_id.as_str())
        .fetch_one(&mut *tx)
        .await?;
        let seq = Self::next_seq(&mut tx, &write.board_id).await?;

        match tx.commit().await {
            Ok(()) => {}
            Err(err) if is_unique_violation(&err) => return Ok(RebalanceOutcome::Stale),
            Err(err) => return Err(err.into()),
        }

        info!(generation, seq, "column rebalanced");
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
        let seq: Option<i64> =
            sqlx::query_scalar("SELECT seq FROM board_commit_seq WHERE board_id = $1")
                .bind(board_id.as_str())
                .fetch_optional(&self.pool)
                .await?;
        Ok(seq.unwrap_or(0))
    }

    async fn remove_task(&self, task_id: &TaskId) -> Result<u64> {
        let result = sqlx::query("DELETE FROM task_positions WHERE task_id = $1")
            .bind(task_id.as_str())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn remove_board(&self, board_id: &BoardId) -> Result<u64> {
        let mut tx = self.pool.begin().await?;
        let removed = sqlx::query("DELETE FROM task_positions WHERE board_id = $1")
            .bind(board_id.as_str())
            .execute(&mut *tx)
            .await?
            .rows_affected();
        // Remaining child rows follow through ON DELETE CASCADE.
        sqlx::query("DELETE FROM boards WHERE id = $1")
            .bind(board_id.as_str())
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(removed)
    }
}
