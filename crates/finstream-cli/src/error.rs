//! Application error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] finstream_ws::WsError),

    #[error("Auth error: {0}")]
    Auth(#[from] finstream_auth::AuthClientError),

    #[error("Telemetry error: {0}")]
    Telemetry(#[from] finstream_telemetry::TelemetryError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type AppResult<T> = Result<T, AppError>;
