//! Error types for flagctx.

use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// The operation needs an existing flag record and none was found.
    #[error("flag {key:?} not started on entity {entity}")]
    NotStarted { key: String, entity: String },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("store call timed out after {0:?}")]
    Timeout(Duration),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// True for failures caused by acting on a stage that was never queued or started.
    pub fn is_not_started(&self) -> bool {
        matches!(self, Error::NotStarted { .. })
    }
}

pub type Result<T> = std::result::Result<T, Error>;
