//! Error types for the Pipeline and Supervisor.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("store error: {0}")]
    Store(#[from] fc_store::StoreError),

    #[error("cache error: {0}")]
    Cache(#[from] fc_cache::CacheError),

    #[error("dispatch error: {0}")]
    Dispatch(#[from] fc_dispatch::DispatchError),
}

pub type Result<T> = std::result::Result<T, PipelineError>;
