//! The one boundary specific to this crate: the Debouncer. `ScheduleWriter`
//! and `MailboxLookup` are reused from `fc-dispatch` as-is — the Pipeline
//! needs the same two boundaries the Dispatcher does, for the same reason.

use crate::error::Result;
use async_trait::async_trait;

#[async_trait]
pub trait DebounceCheck: Send + Sync {
    async fn should_process(&self, thread_id: &str, body: &str) -> Result<bool>;
}

#[async_trait]
impl DebounceCheck for fc_cache::Debouncer {
    async fn should_process(&self, thread_id: &str, body: &str) -> Result<bool> {
        Ok(fc_cache::Debouncer::should_process(self, thread_id, body).await?)
    }
}
