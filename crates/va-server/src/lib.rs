//! Voice session orchestrator server.
//!
//! Hosts the WebSocket transport and HTTP surface around the `va-core`/
//! `va-pipeline` engine: a long-lived [`Orchestrator`] owning a map of
//! [`Session`]s, one per client connection.

pub mod auth;
pub mod event_log;
pub mod http;
pub mod orchestrator;
pub mod rate_limit;
pub mod recorder;
pub mod session;
pub mod transport;
pub mod websocket;

pub use event_log::FileEventLog;
pub use http::{build_cors_layer, create_router};
pub use orchestrator::Orchestrator;
pub use rate_limit::{RateLimitError, RateLimiter};
pub use recorder::FileRecorder;
pub use session::Session;

use thiserror::Error;

/// Errors surfaced at the HTTP/WebSocket boundary.
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("session error: {0}")]
    Session(String),

    #[error("websocket error: {0}")]
    WebSocket(String),

    #[error("authentication error: {0}")]
    Auth(String),

    #[error("rate limit exceeded")]
    RateLimit,

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<va_core::CoreError> for ServerError {
    fn from(err: va_core::CoreError) -> Self {
        ServerError::Internal(err.to_string())
    }
}

impl From<ServerError> for axum::http::StatusCode {
    fn from(err: ServerError) -> Self {
        match err {
            ServerError::Session(_) => axum::http::StatusCode::NOT_FOUND,
            ServerError::WebSocket(_) => axum::http::StatusCode::BAD_REQUEST,
            ServerError::Auth(_) => axum::http::StatusCode::UNAUTHORIZED,
            ServerError::RateLimit => axum::http::StatusCode::TOO_MANY_REQUESTS,
            ServerError::InvalidRequest(_) => axum::http::StatusCode::BAD_REQUEST,
            ServerError::Internal(_) => axum::http::StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}
