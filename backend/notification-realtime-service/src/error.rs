use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, AppError>;

/// Why a WebSocket auth token was refused
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("token missing")]
    Missing,

    #[error("token malformed")]
    Malformed,

    #[error("token expired")]
    Expired,

    #[error("token signature invalid")]
    InvalidSignature,

    #[error("token issued by an unexpected issuer")]
    InvalidIssuer,

    #[error("token is not a websocket token")]
    WrongPurpose,

    #[error("token subject is empty")]
    InvalidSubject,
}

/// A single inbound frame could not be understood. Never fatal to the connection.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed frame: {0}")]
    MalformedFrame(#[from] serde_json::Error),

    #[error("binary frames are not supported")]
    UnsupportedBinary,
}

/// The transport under a connection failed; the connection is torn down.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("websocket write failed: {0}")]
    Write(String),

    #[error("websocket read failed: {0}")]
    Read(String),

    #[error("peer missed {0} consecutive heartbeat pings")]
    LivenessTimeout(u32),
}

/// Failures on the pub/sub side. Per-message errors drop only that message.
#[derive(Debug, Error)]
pub enum BusError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("invalid event: {0}")]
    InvalidEvent(#[from] event_schema::EventError),

    #[error("subscription stream ended")]
    SubscriptionClosed,
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("user {user_id} already has {limit} open connections")]
    TooManyConnections { user_id: String, limit: usize },
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("server start failure: {0}")]
    StartServer(String),

    #[error("unauthorized: {0}")]
    Unauthorized(#[from] AuthError),

    #[error("not found")]
    NotFound,

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("bus error: {0}")]
    Bus(#[from] BusError),

    #[error("server is shutting down")]
    ShuttingDown,

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::Config(err.to_string())
    }
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::NotFound => StatusCode::NOT_FOUND,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Bus(_) | AppError::ShuttingDown => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Config(_) | AppError::StartServer(_) | AppError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        // Unknown paths get a bare status, nothing that describes the service
        if matches!(self, AppError::NotFound) {
            return status.into_response();
        }

        let (code, message) = match &self {
            AppError::Unauthorized(_) => ("UNAUTHORIZED", "Authentication required".to_string()),
            AppError::BadRequest(msg) => ("BAD_REQUEST", msg.clone()),
            AppError::ShuttingDown => ("SHUTTING_DOWN", self.to_string()),
            AppError::Bus(e) => {
                tracing::error!(error = %e, "Bus error");
                ("BUS_UNAVAILABLE", "Notification bus unavailable".to_string())
            }
            _ => {
                tracing::error!(error = %self, "Internal error");
                ("INTERNAL_ERROR", "Internal server error".to_string())
            }
        };

        let body = Json(json!({
            "error": {
                "code": code,
                "message": message,
            }
        }));

        (status, body).into_response()
    }
}
