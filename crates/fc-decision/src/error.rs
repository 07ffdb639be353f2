//! Error types for the Analyzer boundary

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AnalyzerError {
    #[error("analyzer request failed: {0}")]
    Request(String),

    #[error("analyzer returned unparseable output: {0}")]
    Unparseable(String),

    #[error("analyzer timed out")]
    Timeout,
}

pub type Result<T> = std::result::Result<T, AnalyzerError>;
