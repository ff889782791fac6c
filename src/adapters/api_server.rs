use std::future::Future;
use tokio::net::TcpListener;
use tracing::info;

use crate::api::{create_router, AppState};
use crate::error::{CardflowError, Result};

/// Serve the HTTP/WebSocket API until `shutdown` resolves.
pub async fn start_api_server<F>(state: AppState, bind_addr: &str, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind(bind_addr).await?;
    serve_api(listener, state, shutdown).await
}

/// Serve on an already bound listener.
pub async fn serve_api<F>(listener: TcpListener, state: AppState, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let app = create_router(state);
    info!("API server listening on http://{}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| CardflowError::Internal(format!("API server error: {}", e)))?;

    Ok(())
}
