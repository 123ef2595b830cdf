use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("INVALID_SCHEDULE: {0}")]
    InvalidSchedule(String),
    #[error("REFRESH_IN_PROGRESS: {0}")]
    RefreshInProgress(String),
    #[error("QUERY_EXECUTION: {0}")]
    QueryExecution(String),
    #[error("TIMEOUT: {0}")]
    Timeout(String),
    #[error("VALIDATION: {0}")]
    Validation(String),
    #[error("CONFLICT: {0}")]
    Conflict(String),
    #[error("IO_FAILURE: {0}")]
    Io(String),
    #[error("NOT_FOUND: {0}")]
    NotFound(String),
    #[error("INTERNAL: {0}")]
    Internal(String),
}

impl AppError {
    /// Errors that end a refresh attempt as FAILED rather than rejecting it up front.
    pub fn is_execution_failure(&self) -> bool {
        matches!(self, Self::QueryExecution(_) | Self::Timeout(_))
    }
}

impl From<std::io::Error> for AppError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value.to_string())
    }
}

impl From<rusqlite::Error> for AppError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Internal(value.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(value: serde_json::Error) -> Self {
        Self::Internal(value.to_string())
    }
}

impl From<anyhow::Error> for AppError {
    fn from(value: anyhow::Error) -> Self {
        Self::Internal(value.to_string())
    }
}

pub type AppResult<T> = Result<T, AppError>;
