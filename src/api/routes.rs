use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};

use crate::api::{handlers, state::AppState, websocket::websocket_handler};

pub fn create_router(state: AppState) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handlers::health_handler))
        // Board position endpoints
        .route(
            "/api/boards/:board_id/positions",
            get(handlers::get_board_positions),
        )
        .route("/api/boards/:board_id/tasks", post(handlers::place_task))
        .route("/api/boards/:board_id/moves", post(handlers::submit_move))
        .route(
            "/api/boards/:board_id/columns/:column_id/rebalance",
            post(handlers::rebalance_column),
        )
        // WebSocket endpoint
        .route("/ws", get(websocket_handler))
        // Add state and CORS
        .with_state(state)
        .layer(cors)
}
