//! The Analyzer boundary: whatever classifies a reply body into an
//! `Intent` plus contact signals. The real implementation talks to an LLM;
//! this crate only needs the trait so the router and pipeline can be
//! tested against a fake.

use crate::Result;
use async_trait::async_trait;
use fc_common::Analysis;

#[async_trait]
pub trait Analyzer: Send + Sync {
    async fn analyze(&self, body: &str) -> Result<Analysis>;
}
