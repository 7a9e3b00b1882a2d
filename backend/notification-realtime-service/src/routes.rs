use axum::{routing::get, Router};
use tower_http::trace::TraceLayer;

use crate::metrics;
use crate::state::AppState;
use crate::websocket::{reject_unknown_path, ws_handler};

pub fn build_router(state: AppState) -> Router {
    let ws_path = state.config.server.ws_path.clone();

    Router::new()
        .route(&ws_path, get(ws_handler))
        .route("/health", get(health_check))
        .route("/metrics", get(metrics::serve_metrics))
        .fallback(reject_unknown_path)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_check() -> &'static str {
    "OK"
}
