use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use std::future::Future;
use tracing::error;

use crate::api::{auth::identity_from_headers, state::AppState, types::*};
use crate::domain::{
    BoardId, ColumnId, ColumnRebalanced, CommittedMove, MoveRequest, PlaceRequest,
};
use crate::error::MoveError;

type MoveRejection = (StatusCode, Json<MoveError>);

pub fn move_error_status(err: &MoveError) -> StatusCode {
    match err {
        MoveError::Validation { .. } => StatusCode::BAD_REQUEST,
        MoveError::Conflict { .. }
        | MoveError::StaleReference { .. }
        | MoveError::Contended { .. } => StatusCode::CONFLICT,
        MoveError::Capacity { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        MoveError::Storage { .. } => StatusCode::SERVICE_UNAVAILABLE,
    }
}

fn reject(err: MoveError) -> MoveRejection {
    (move_error_status(&err), Json(err))
}

/// Run a store-mutating call on its own task so it finishes even if the
/// client hangs up and this handler is dropped mid-commit.
async fn run_detached<T, F>(operation: F) -> std::result::Result<T, MoveError>
where
    F: Future<Output = std::result::Result<T, MoveError>> + Send + 'static,
    T: Send + 'static,
{
    tokio::spawn(operation).await.map_err(|e| {
        error!("Detached commit task failed: {}", e);
        MoveError::Storage {
            message: "commit task failed".to_string(),
        }
    })?
}

fn unauthorized((status, message): (StatusCode, String)) -> MoveRejection {
    (status, Json(MoveError::validation(message)))
}

/// GET /api/boards/:board_id/positions
pub async fn get_board_positions(
    State(state): State<AppState>,
    Path(board_id): Path<BoardId>,
) -> std::result::Result<Json<BoardPositionsResponse>, (StatusCode, String)> {
    let positions = state
        .coordinator
        .board_positions(&board_id)
        .await
        .map_err(|e| {
            error!(board = %board_id, "Failed to load board positions: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        })?;

    let drag_locks = state
        .sessions
        .drag_locks(&board_id)
        .await
        .into_iter()
        .map(|(task_id, user_id)| DragLockView { task_id, user_id })
        .collect();

    Ok(Json(BoardPositionsResponse {
        present_users: state.sessions.present_users(&board_id).await,
        board_id,
        positions,
        drag_locks,
    }))
}

/// POST /api/boards/:board_id/tasks
pub async fn place_task(
    State(state): State<AppState>,
    Path(board_id): Path<BoardId>,
    headers: HeaderMap,
    Json(body): Json<PlaceTaskBody>,
) -> std::result::Result<(StatusCode, Json<CommittedMove>), MoveRejection> {
    let identity = identity_from_headers(&headers).map_err(unauthorized)?;
    let request = PlaceRequest {
        task_id: body.task_id,
        board_id,
        swimlane: body.swimlane,
    };

    let coordinator = state.coordinator.clone();
    let result = run_detached(async move { coordinator.place_task(request, &identity).await })
        .await
        .map_err(reject)?;
    Ok((StatusCode::CREATED, Json(result.event)))
}

/// POST /api/boards/:board_id/moves
pub async fn submit_move(
    State(state): State<AppState>,
    Path(board_id): Path<BoardId>,
    headers: HeaderMap,
    Json(body): Json<MoveBody>,
) -> std::result::Result<Json<CommittedMove>, MoveRejection> {
    let identity = identity_from_headers(&headers).map_err(unauthorized)?;
    let request = MoveRequest {
        task_id: body.task_id,
        board_id,
        column_id: body.column_id,
        swimlane: body.swimlane,
        placement: body.placement,
        expected_version: body.expected_version,
    };

    let coordinator = state.coordinator.clone();
    let result = run_detached(async move { coordinator.submit_move(request, &identity).await })
        .await
        .map_err(reject)?;
    Ok(Json(result.event))
}

/// POST /api/boards/:board_id/columns/:column_id/rebalance
pub async fn rebalance_column(
    State(state): State<AppState>,
    Path((board_id, column_id)): Path<(BoardId, ColumnId)>,
    Query(query): Query<RebalanceQuery>,
    headers: HeaderMap,
) -> std::result::Result<Json<ColumnRebalanced>, MoveRejection> {
    let identity = identity_from_headers(&headers).map_err(unauthorized)?;
    let coordinator = state.coordinator.clone();
    let event = run_detached(async move {
        coordinator
            .rebalance_column(&board_id, &column_id, query.swimlane.as_ref(), &identity)
            .await
    })
    .await
    .map_err(reject)?;
    Ok(Json(event))
}
