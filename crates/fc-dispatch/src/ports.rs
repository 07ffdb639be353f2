//! Narrow boundaries the Dispatcher depends on, so it can be exercised
//! against fakes in tests instead of a live Redis/IMAP connection. The
//! concrete `fc-cache`/`fc-mailbox` types implement these directly.

use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fc_common::Stage;
use std::sync::Arc;

/// Send-once guard, backed by `fc_cache::DedupGuard` in production.
#[async_trait]
pub trait DedupCheck: Send + Sync {
    async fn try_claim(&self, message_id: &str, stage: Stage) -> Result<bool>;
}

#[async_trait]
impl DedupCheck for fc_cache::DedupGuard {
    async fn try_claim(&self, message_id: &str, stage: Stage) -> Result<bool> {
        Ok(fc_cache::DedupGuard::try_claim(self, message_id, stage).await?)
    }
}

/// The next-due-followup index, backed by `fc_cache::ScheduleIndex`.
#[async_trait]
pub trait ScheduleWriter: Send + Sync {
    async fn add(&self, thread_id: i64, stage: Stage, at: DateTime<Utc>) -> Result<()>;
    async fn remove(&self, thread_id: i64) -> Result<()>;
}

#[async_trait]
impl ScheduleWriter for fc_cache::ScheduleIndex {
    async fn add(&self, thread_id: i64, stage: Stage, at: DateTime<Utc>) -> Result<()> {
        Ok(fc_cache::ScheduleIndex::add(self, thread_id, stage, at).await?)
    }

    async fn remove(&self, thread_id: i64) -> Result<()> {
        Ok(fc_cache::ScheduleIndex::remove(self, thread_id).await?)
    }
}

/// Resolves the mailbox transport for a thread's `account_email`. A
/// separate boundary (rather than depending on `ImapSmtpClientPool`
/// directly) so the Dispatcher can be tested against a fake pool.
pub trait MailboxLookup: Send + Sync {
    fn client_for(&self, account_email: &str) -> Result<Arc<dyn fc_mailbox::MailboxClient>>;
}
