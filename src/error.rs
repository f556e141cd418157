use std::time::Duration;

use thiserror::Error;

use crate::model::session::SessionStatus;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(String),

    #[error("invalid session definition '{name}': {reason}")]
    InvalidSessionDefinition { name: String, reason: String },

    #[error("duplicate {entity} for key {key}")]
    Duplicate { entity: &'static str, key: String },

    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("storage call timed out after {0:?}")]
    StorageTimeout(Duration),

    #[error("invariant violation: session {session_id} cannot move from {from} to {to}")]
    InvariantViolation {
        session_id: i64,
        from: SessionStatus,
        to: SessionStatus,
    },

    #[error("corrupt record: {0}")]
    Corrupt(String),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type AppResult<T> = Result<T, AppError>;

impl AppError {
    /// Failures that clear up on their own; the scheduler retries them on the
    /// next tick.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Storage(_) | Self::StorageTimeout(_) | Self::Io(_))
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self, Self::Duplicate { .. })
    }
}
