use axum::{Router, routing::get};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use crate::handlers::{forward_handler, health_handler, metrics_handler};
use crate::state::AppState;

// Every method and path goes to the forwarding pipeline
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .fallback(forward_handler)
        .with_state(state)
}

// Health and metrics live on their own listener so they never shadow upstream paths
pub fn admin_router() -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
}

/// Serve until `shutdown` fires, then let in-flight requests finish.
pub async fn serve(
    listener: TcpListener,
    state: Arc<AppState>,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await
}

pub async fn serve_admin(listener: TcpListener, shutdown: CancellationToken) -> std::io::Result<()> {
    axum::serve(listener, admin_router())
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await
}
