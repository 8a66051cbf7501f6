//! Error types for tally-qs
//!
//! [`Error`] covers startup failures; [`QueryError`] is
//! what request handlers return and maps onto HTTP status codes.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use tracing::error;

use crate::source::SourceError;

/// Startup error type for tally-qs
#[derive(Error, Debug)]
pub enum Error {
    /// Config file missing, unreadable or malformed
    #[error(transparent)]
    Common(#[from] tally_common::Error),
}

/// Convenience Result type using tally-qs Error
pub type Result<T> = std::result::Result<T, Error>;

/// Query endpoint errors
#[derive(Debug)]
pub enum QueryError {
    /// Caller is not permitted to view statistics
    Unauthorized,
    /// Unknown kind, unparseable filter, bad ids
    BadRequest(String),
    /// Upstream history source failed; detail stays in the log
    Upstream(SourceError),
}

impl From<SourceError> for QueryError {
    fn from(e: SourceError) -> Self {
        QueryError::Upstream(e)
    }
}

impl IntoResponse for QueryError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            // Fixed denial, no payload
            QueryError::Unauthorized => {
                return (StatusCode::UNAUTHORIZED, "Unauthorized").into_response();
            }
            QueryError::BadRequest(msg) => (StatusCode::BAD_REQUEST, format!("Bad request: {}", msg)),
            QueryError::Upstream(e) => {
                error!("History source failure: {}", e);
                (
                    StatusCode::BAD_GATEWAY,
                    "Listening history is currently unavailable".to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": message,
        }));

        (status, body).into_response()
    }
}
