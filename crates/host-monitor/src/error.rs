use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum AppError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("malformed result: {0}")]
    MalformedResult(String),

    #[error("failed to open store: {path}: {message}")]
    StoreOpenFailed { path: PathBuf, message: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("cancellation failed: {0}")]
    Cancellation(String),

    #[error("io error: {0}")]
    Io(String),

    #[error("json error: {0}")]
    Json(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<rusqlite::Error> for AppError {
    fn from(e: rusqlite::Error) -> Self {
        AppError::Transport(e.to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(e: std::io::Error) -> Self {
        AppError::Io(e.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(e: serde_json::Error) -> Self {
        AppError::Json(e.to_string())
    }
}

impl AppError {
    pub fn malformed(msg: impl Into<String>) -> Self {
        AppError::MalformedResult(msg.into())
    }

    pub fn code(&self) -> &'static str {
        match self {
            AppError::InvalidRequest(_) => "INVALID_REQUEST",
            AppError::MalformedResult(_) => "MALFORMED_RESULT",
            AppError::StoreOpenFailed { .. } => "STORE_OPEN_FAILED",
            AppError::Transport(_) => "TRANSPORT_ERROR",
            AppError::Cancellation(_) => "CANCELLATION_FAILED",
            AppError::Io(_) => "IO_ERROR",
            AppError::Json(_) => "JSON_ERROR",
            AppError::Internal(_) => "INTERNAL",
        }
    }
}

pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sqlite_errors_surface_as_transport() {
        let err: AppError = rusqlite::Error::InvalidQuery.into();
        assert_eq!(err.code(), "TRANSPORT_ERROR");
    }

    #[test]
    fn malformed_message_is_displayed() {
        let err = AppError::malformed("row has 3 fields, schema declares 2");
        assert_eq!(
            err.to_string(),
            "malformed result: row has 3 fields, schema declares 2"
        );
        assert_eq!(err.code(), "MALFORMED_RESULT");
    }
}
