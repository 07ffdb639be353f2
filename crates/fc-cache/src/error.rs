//! Error types for the cache layer

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("redis connection error: {0}")]
    Connection(String),

    #[error("redis operation error: {0}")]
    Redis(#[from] redis::RedisError),
}

pub type Result<T> = std::result::Result<T, CacheError>;
