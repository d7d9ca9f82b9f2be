//! Router assembly and serving

use crate::routes;
use crate::state::AppState;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

/// Bytes allowed on top of `max_upload_size` for multipart framing
pub const MULTIPART_OVERHEAD: u64 = 64 * 1024;

/// Build the router for `state`
pub fn router(state: AppState) -> Router {
    let body_limit = usize::try_from(state.config.max_upload_size.saturating_add(MULTIPART_OVERHEAD))
        .unwrap_or(usize::MAX);
    let upload_path = state.config.upload_path();

    Router::new()
        .route("/", get(routes::root))
        .route("/health", get(routes::health))
        .route(&upload_path, post(routes::upload))
        .route("/api/v1/clusters/reports", get(routes::cluster_reports))
        .route("/api/v1/content", get(routes::content))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve until Ctrl-C
pub async fn serve(listener: TcpListener, state: AppState) -> std::io::Result<()> {
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown requested");
}
