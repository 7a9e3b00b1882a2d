use axum::{
    extract::{Query, State, WebSocketUpgrade},
    http::Uri,
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::auth::token_prefix;
use crate::error::AppError;
use crate::metrics;
use crate::state::AppState;
use crate::websocket::connection::ConnectionHandler;

#[derive(Debug, Deserialize)]
pub struct WsParams {
    pub token: Option<String>,
}

/// Upgrade endpoint. The token is checked before the handshake completes,
/// so an unauthenticated client never gets a socket.
pub async fn ws_handler(
    State(state): State<AppState>,
    Query(params): Query<WsParams>,
    ws: Option<WebSocketUpgrade>,
) -> Response {
    if state.is_shutting_down() {
        return AppError::ShuttingDown.into_response();
    }

    let user_id = match state.verifier.verify(params.token.as_deref()) {
        Ok(user_id) => user_id,
        Err(e) => {
            warn!(
                token = %token_prefix(params.token.as_deref()),
                reason = %e,
                "WebSocket upgrade rejected"
            );
            metrics::observe_upgrade("unauthorized");
            return AppError::Unauthorized(e).into_response();
        }
    };

    let Some(ws) = ws else {
        metrics::observe_upgrade("bad_request");
        return AppError::BadRequest("expected a websocket upgrade".into()).into_response();
    };

    metrics::observe_upgrade("accepted");
    info!(user_id = %user_id, "WebSocket upgrade accepted");

    let (handler, channels) = ConnectionHandler::new(user_id, &state);
    ws.on_upgrade(move |socket| handler.run(socket, channels))
}

pub async fn reject_unknown_path(uri: Uri) -> AppError {
    debug!(path = %uri.path(), "Rejecting request for unknown path");
    AppError::NotFound
}
