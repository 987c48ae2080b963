use axum::{http::StatusCode, response::{IntoResponse, Response}, Json};
use serde_json::json;
use std::fmt;

// Errors that map onto an HTTP error status.
#[derive(Debug)]
pub enum AppError {
    Internal(anyhow::Error),
    Misconfigured,
    Unauthorized(String),
    BadRequest(String),
    NotFound(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            AppError::Internal(e) => {
                // Log the full error for debugging
                tracing::error!("Internal server error: {:?}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "An internal server error occurred".to_string(),
                )
            }
            AppError::Misconfigured => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Server authentication misconfigured".to_string(),
            ),
            AppError::Unauthorized(e) => (StatusCode::UNAUTHORIZED, e),
            AppError::BadRequest(e) => (StatusCode::BAD_REQUEST, e),
            AppError::NotFound(e) => (StatusCode::NOT_FOUND, e),
        };

        let body = Json(json!({ "status": "error", "error": error_message }));
        (status, body).into_response()
    }
}

// Lets `?` turn any error into `AppError::Internal`.
impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self::Internal(err.into())
    }
}

/// Failure of the extraction/merge pipeline.
///
/// These never become HTTP errors: the endpoint reports them as a `200` with
/// `status: "error"`, using the `Display` text as the message.
#[derive(Debug)]
pub enum PipelineError {
    /// The tool binary could not be started at all.
    Spawn {
        tool: String,
        source: std::io::Error,
    },
    /// The tool exited non-zero; carries its diagnostic output.
    ToolFailed(String),
    /// The tool reported success but left no payload behind.
    MissingOutput,
    Io(std::io::Error),
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineError::Spawn { tool, source } => {
                write!(f, "Failed to start {}: {}", tool, source)
            }
            PipelineError::ToolFailed(message) => f.write_str(message),
            PipelineError::MissingOutput => f.write_str("Download file missing"),
            PipelineError::Io(e) => write!(f, "I/O error: {}", e),
        }
    }
}

impl std::error::Error for PipelineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PipelineError::Spawn { source, .. } => Some(source),
            PipelineError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for PipelineError {
    fn from(err: std::io::Error) -> Self {
        PipelineError::Io(err)
    }
}
