//! Error types for the thread store

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("thread already exists for message_id {0}")]
    Conflict(String),

    #[error("thread {0} not found")]
    NotFound(i64),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, StoreError>;
