//! Error types

use std::path::PathBuf;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

/// Failures of the CSS optimization core.
///
/// The per-request rewriter swallows all of these and serves the original
/// tag; the generator and diagnostics hand them to the caller.
#[derive(Debug, thiserror::Error)]
pub enum OptimizerError {
    #[error("Critical CSS directory is not writable: {}", .path.display())]
    DirectoryNotWritable { path: PathBuf },

    #[error("Could not fetch URL: {url} ({reason})")]
    FetchFailed { url: String, reason: String },

    #[error("Empty response from URL: {url}")]
    EmptyResponse { url: String },

    #[error("No CSS content found")]
    NoCssContent,

    #[error("Could not write CSS to file: {}", .path.display())]
    WriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid cache key: {0}")]
    InvalidCacheKey(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl OptimizerError {
    /// Machine-readable code reported to the admin UI.
    pub fn code(&self) -> &'static str {
        match self {
            OptimizerError::DirectoryNotWritable { .. } => "directory_not_writable",
            OptimizerError::FetchFailed { .. } => "fetch_failed",
            OptimizerError::EmptyResponse { .. } => "empty_response",
            OptimizerError::NoCssContent => "no_css_content",
            OptimizerError::WriteFailed { .. } => "write_failed",
            OptimizerError::InvalidCacheKey(_) => "invalid_cache_key",
            OptimizerError::Io(_) => "io",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            OptimizerError::FetchFailed { .. }
            | OptimizerError::EmptyResponse { .. }
            | OptimizerError::NoCssContent => StatusCode::UNPROCESSABLE_ENTITY,
            OptimizerError::InvalidCacheKey(_) => StatusCode::BAD_REQUEST,
            OptimizerError::DirectoryNotWritable { .. }
            | OptimizerError::WriteFailed { .. }
            | OptimizerError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Debug)]
pub enum AppError {
    BadRequest(String),
    Internal(String),
    Optimization(OptimizerError),
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AppError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            AppError::Internal(msg) => write!(f, "Internal error: {}", msg),
            AppError::Optimization(err) => write!(f, "Optimization error: {}", err),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg),
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "internal", msg),
            AppError::Optimization(err) => (err.status(), err.code(), err.to_string()),
        };

        let body = Json(json!({
            "error": true,
            "code": code,
            "message": message,
        }));

        (status, body).into_response()
    }
}

impl From<OptimizerError> for AppError {
    fn from(err: OptimizerError) -> Self {
        AppError::Optimization(err)
    }
}

impl From<tokio::task::JoinError> for AppError {
    fn from(err: tokio::task::JoinError) -> Self {
        AppError::Internal(err.to_string())
    }
}
