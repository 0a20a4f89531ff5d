//! Unified error handling for the server.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::fmt;

/// Status codes a remote sink uses for transient failures.
const RETRYABLE_STATUS: &[u16] = &[408, 425, 429, 500, 502, 503, 504];

/// Message fragments that identify transient failures without a status.
const TRANSIENT_SIGNATURES: &[&str] = &[
    "rate limit",
    "quota exceeded",
    "timed out",
    "timeout",
    "temporarily unavailable",
    "connection reset",
    "service unavailable",
    "backend error",
];

/// Broad class of a sink failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SinkErrorKind {
    RateLimited,
    Unavailable,
    Timeout,
    NotFound,
    PermissionDenied,
    InvalidData,
    Io,
    Other,
}

impl fmt::Display for SinkErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SinkErrorKind::RateLimited => "rate limited",
            SinkErrorKind::Unavailable => "unavailable",
            SinkErrorKind::Timeout => "timeout",
            SinkErrorKind::NotFound => "not found",
            SinkErrorKind::PermissionDenied => "permission denied",
            SinkErrorKind::InvalidData => "invalid data",
            SinkErrorKind::Io => "io error",
            SinkErrorKind::Other => "error",
        };
        f.write_str(name)
    }
}

/// A failed call against a sink.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("sink {kind}{}: {message}", status_suffix(.status))]
pub struct SinkError {
    pub kind: SinkErrorKind,
    pub status: Option<u16>,
    pub message: String,
}

impl SinkError {
    pub fn new(kind: SinkErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            status: None,
            message: message.into(),
        }
    }

    /// Build from a remote status code, deriving the kind from it.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let kind = match status {
            429 => SinkErrorKind::RateLimited,
            408 | 504 => SinkErrorKind::Timeout,
            500..=599 => SinkErrorKind::Unavailable,
            404 => SinkErrorKind::NotFound,
            401 | 403 => SinkErrorKind::PermissionDenied,
            400 | 422 => SinkErrorKind::InvalidData,
            _ => SinkErrorKind::Other,
        };
        Self {
            kind,
            status: Some(status),
            message: message.into(),
        }
    }

    /// Whether retrying the same call may succeed.
    pub fn is_retryable(&self) -> bool {
        if let Some(status) = self.status {
            if RETRYABLE_STATUS.contains(&status) {
                return true;
            }
        }
        if matches!(
            self.kind,
            SinkErrorKind::RateLimited | SinkErrorKind::Unavailable | SinkErrorKind::Timeout
        ) {
            return true;
        }
        let message = self.message.to_lowercase();
        TRANSIENT_SIGNATURES.iter().any(|sig| message.contains(sig))
    }
}

fn status_suffix(status: &Option<u16>) -> String {
    status.map(|s| format!(" ({s})")).unwrap_or_default()
}

impl From<std::io::Error> for SinkError {
    fn from(err: std::io::Error) -> Self {
        let kind = match err.kind() {
            std::io::ErrorKind::NotFound => SinkErrorKind::NotFound,
            std::io::ErrorKind::PermissionDenied => SinkErrorKind::PermissionDenied,
            std::io::ErrorKind::TimedOut => SinkErrorKind::Timeout,
            _ => SinkErrorKind::Io,
        };
        SinkError::new(kind, err.to_string())
    }
}

/// The source could not produce a table at all.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExtractionError {
    #[error("no export file found for prefix '{0}'")]
    NotFound(String),

    #[error("export has no header row: {0}")]
    NoHeader(String),

    #[error("failed to read export: {0}")]
    Io(String),

    #[error("failed to parse export: {0}")]
    Parse(String),
}

/// A notification could not be delivered.
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("notification request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("notification rejected with status {status}: {body}")]
    Rejected { status: u16, body: String },
}

/// Application error type.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Error response body.
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message, details) = match &self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone(), None),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone(), None),
            AppError::Unauthorized => (StatusCode::UNAUTHORIZED, "Unauthorized".to_string(), None),
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                    Some(msg.clone()),
                )
            }
        };

        let body = Json(ErrorResponse {
            error: error_message,
            details,
        });

        (status, body).into_response()
    }
}

/// Result type alias for handlers.
pub type Result<T> = std::result::Result<T, AppError>;
