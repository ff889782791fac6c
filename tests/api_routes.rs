use axum::{
    body::{to_bytes, Body},
    http::{Method, Request, StatusCode},
    Router,
};
use async_trait::async_trait;
use cardflow::{
    adapters::MemoryStore,
    api::create_router,
    domain::{BoardId, CellSnapshot, ColumnId, Swimlane, TaskId, TaskPosition},
    error::Result,
    runtime::{Backends, Services},
    store::{PositionWrite, RebalanceOutcome, RebalanceWrite, WriteOutcome},
    AppConfig, Board, BoardEvent, Column, PositionStore,
};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tower::ServiceExt;

const ANN: &[(&str, &str)] = &[("x-user-id", "ann"), ("x-user-name", "Ann")];

fn sprint_board() -> Board {
    Board::new(
        "b1",
        "Sprint",
        vec![
            Column::new("todo", "b1", "To Do", 0),
            Column::new("doing", "b1", "In Progress", 1).with_wip_limit(1),
            Column::new("done", "b1", "Done", 2),
        ],
    )
}

async fn app() -> Router {
    let store = Arc::new(MemoryStore::new().with_board(sprint_board()).await);
    let services = Services::new(Backends::memory(store), &AppConfig::default());
    create_router(services.app_state())
}

/// Memory store whose writes take a while to land, like a slow commit.
struct SlowStore {
    inner: Arc<MemoryStore>,
    write_delay: Duration,
}

#[async_trait]
impl PositionStore for SlowStore {
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
        tokio::time::sleep(self.write_delay).await;
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

async fn send_json(
    app: &Router,
    method: Method,
    uri: &str,
    headers: &[(&str, &str)],
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut request_builder = Request::builder().method(method).uri(uri);
    for (key, value) in headers {
        request_builder = request_builder.header(*key, *value);
    }

    let request = if let Some(payload) = body {
        request_builder
            .header("content-type", "application/json")
            .body(Body::from(payload.to_string()))
            .expect("failed to build json request")
    } else {
        request_builder
            .body(Body::empty())
            .expect("failed to build empty request")
    };

    let response = app
        .clone()
        .oneshot(request)
        .await
        .expect("router request failed");
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("failed to read response body");
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);

    (status, body)
}

async fn place(app: &Router, task: &str) -> Value {
    let (status, body) = send_json(
        app,
        Method::POST,
        "/api/boards/b1/tasks",
        ANN,
        Some(json!({ "task_id": task })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "unexpected response: {body}");
    body
}

#[tokio::test]
async fn health_reports_ok() {
    let app = app().await;
    let (status, body) = send_json(&app, Method::GET, "/health", &[], None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["sessions"], 0);
}

#[tokio::test]
async fn mutations_require_an_identity() {
    let app = app().await;
    let (status, _) = send_json(
        &app,
        Method::POST,
        "/api/boards/b1/tasks",
        &[],
        Some(json!({ "task_id": "t1" })),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn place_move_and_read_back() {
    let app = app().await;
    let placed = place(&app, "t1").await;
    assert_eq!(placed["column_id"], "todo");
    assert_eq!(placed["version"], 1);
    assert_eq!(placed["mover_name"], "Ann");

    let (status, moved) = send_json(
        &app,
        Method::POST,
        "/api/boards/b1/moves",
        ANN,
        Some(json!({ "task_id": "t1", "column_id": "done", "expected_version": 1 })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "unexpected response: {moved}");
    assert_eq!(moved["from_column"], "todo");
    assert_eq!(moved["version"], 2);

    let (status, board) =
        send_json(&app, Method::GET, "/api/boards/b1/positions", &[], None).await;
    assert_eq!(status, StatusCode::OK);
    let positions = board["positions"].as_array().unwrap();
    assert_eq!(positions.len(), 1);
    assert_eq!(positions[0]["column_id"], "done");
    assert_eq!(positions[0]["version"], 2);
}

#[tokio::test]
async fn stale_version_is_409() {
    let app = app().await;
    place(&app, "t1").await;

    let request = json!({ "task_id": "t1", "column_id": "done", "expected_version": 1 });
    let (status, _) = send_json(&app, Method::POST, "/api/boards/b1/moves", ANN, Some(request.clone())).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send_json(&app, Method::POST, "/api/boards/b1/moves", ANN, Some(request)).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "conflict");
    assert_eq!(body["current"], 2);
}

#[tokio::test]
async fn full_column_is_422() {
    let app = app().await;
    place(&app, "t1").await;
    place(&app, "t2").await;

    let (status, _) = send_json(
        &app,
        Method::POST,
        "/api/boards/b1/moves",
        ANN,
        Some(json!({ "task_id": "t1", "column_id": "doing", "expected_version": 1 })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send_json(
        &app,
        Method::POST,
        "/api/boards/b1/moves",
        ANN,
        Some(json!({ "task_id": "t2", "column_id": "doing", "expected_version": 1 })),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"], "capacity");
    assert_eq!(body["limit"], 1);
}

#[tokio::test]
async fn invalid_placement_is_400() {
    let app = app().await;
    place(&app, "t1").await;

    let (status, body) = send_json(
        &app,
        Method::POST,
        "/api/boards/b1/moves",
        ANN,
        Some(json!({
            "task_id": "t1",
            "column_id": "done",
            "placement": { "mode": "between", "after": "t1" },
            "expected_version": 1
        })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "validation");
}

#[tokio::test]
async fn rebalance_endpoint_respaces_a_column() {
    let app = app().await;
    for task in ["a", "b", "c"] {
        place(&app, task).await;
    }

    let (status, body) = send_json(
        &app,
        Method::POST,
        "/api/boards/b1/columns/todo/rebalance",
        ANN,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK, "unexpected response: {body}");
    assert_eq!(body["rows"].as_array().unwrap().len(), 3);
    assert_eq!(body["generation"], 1);

    let (status, _) = send_json(
        &app,
        Method::POST,
        "/api/boards/b1/columns/nope/rebalance",
        ANN,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn move_commits_and_broadcasts_after_the_client_hangs_up() {
    let inner = Arc::new(MemoryStore::new().with_board(sprint_board()).await);
    let slow = Arc::new(SlowStore {
        inner: inner.clone(),
        write_delay: Duration::from_millis(200),
    });
    let services = Services::new(
        Backends {
            store: slow,
            boards: inner.clone(),
        },
        &AppConfig::default(),
    );
    let app = create_router(services.app_state());
    place(&app, "t1").await;
    let mut events = services.publisher.subscribe();

    let call = tokio::spawn({
        let app = app.clone();
        async move {
            send_json(
                &app,
                Method::POST,
                "/api/boards/b1/moves",
                ANN,
                Some(json!({ "task_id": "t1", "column_id": "done", "expected_version": 1 })),
            )
            .await
        }
    });

    // Hang up while the write is still in flight.
    tokio::time::sleep(Duration::from_millis(50)).await;
    call.abort();
    assert!(call.await.unwrap_err().is_cancelled());

    let event = timeout(Duration::from_secs(2), events.recv())
        .await
        .expect("the commit finished without the client")
        .unwrap();
    assert!(
        matches!(event, BoardEvent::CommittedMove(ref e) if e.task_id.as_str() == "t1" && e.version == 2),
        "unexpected event: {:?}",
        event
    );

    let row = inner
        .load(&"t1".into(), &"b1".into())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.column_id.as_str(), "done");
}
