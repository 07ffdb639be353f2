//! Durable thread state.
//!
//! `ThreadStore` is the one source of truth for a thread's status, stage,
//! and send-failure count. Every other component — Dispatcher, Pipeline,
//! the ScheduleIndex sync — reads and writes through this trait rather than
//! touching SQL directly, the same separation `fc-outbox`'s
//! `OutboxRepository` draws between the queue-processing logic and its
//! Postgres/Mongo backends.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fc_common::{NewThread, ReplyInput, Stage, Thread, ThreadDelta};

mod error;
#[cfg(feature = "postgres")]
pub mod postgres;
#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use error::{Result, StoreError};

/// Record attached to a successful or failed follow-up send, written in the
/// same transaction as the thread row update.
#[derive(Debug, Clone)]
pub struct FollowupSendRecord {
    pub stage: Stage,
    pub template: String,
    pub success: bool,
    pub error: Option<String>,
}

#[async_trait]
pub trait ThreadStore: Send + Sync {
    /// Look up the thread by the provider message id of its first reply.
    async fn get_by_message_id(&self, message_id: &str) -> Result<Option<Thread>>;

    /// Look up the thread by conversation anchor (the parsed `thread_id`
    /// every reply in the same conversation carries), used by the Pipeline
    /// to find a prior thread for a newly-arrived reply — which always has
    /// its own fresh `message_id` and so can never be found by that key.
    async fn get_by_thread_id(&self, thread_id: &str) -> Result<Option<Thread>>;

    async fn get_by_id(&self, id: i64) -> Result<Option<Thread>>;

    /// Create a brand-new thread row. Returns `StoreError::Conflict` if a
    /// thread already exists for `message_id` — the caller (Pipeline step 1)
    /// treats that as "already being processed" and moves on rather than
    /// erroring.
    async fn insert_thread(&self, new_thread: NewThread) -> Result<Thread>;

    /// Append one Reply row — the durable record of an inbound message
    /// accepted into the pipeline, carrying its Analyzer verdict. Called
    /// once per reply, whether or not it was the one that created the
    /// thread.
    async fn append_reply(&self, reply: ReplyInput) -> Result<()>;

    /// Apply a partial state update (status / stage / stop reason) as
    /// decided by the DecisionRouter.
    async fn update_thread(&self, id: i64, delta: ThreadDelta) -> Result<Thread>;

    /// Increment `failed_sends`; the caller is responsible for transitioning
    /// to ERROR once the count reaches the max.
    async fn increment_failed_sends(&self, id: i64) -> Result<Thread>;

    /// Atomically: append a `FollowupSend` row, bump `followups_sent` (on
    /// success), set `last_followup_sent_at`, and set `next_followup_at` to
    /// whatever the caller computed for the stage that follows. A single
    /// transaction so a crash between the send record and the schedule
    /// update can never leave the two inconsistent.
    async fn record_followup_sent(
        &self,
        thread_id: i64,
        record: FollowupSendRecord,
        next_followup_at: Option<DateTime<Utc>>,
    ) -> Result<Thread>;

    async fn schedule_next_followup(&self, id: i64, at: DateTime<Utc>) -> Result<()>;

    async fn clear_next_followup(&self, id: i64) -> Result<()>;

    /// Append-only audit trail of status/stage changes, written alongside
    /// `update_thread` by the caller.
    async fn append_stage_transition(&self, transition: StageTransitionInput) -> Result<()>;

    /// Every thread with a non-null `next_followup_at`, for the periodic
    /// ScheduleIndex rebuild (spec's 15-minute sync pass).
    async fn get_threads_for_schedule_sync(&self) -> Result<Vec<Thread>>;

    /// Threads whose `next_followup_at` is at or before `as_of` — the
    /// fallback path the Dispatcher uses when the ScheduleIndex itself is
    /// unavailable.
    async fn get_threads_due_for_followup(&self, as_of: DateTime<Utc>) -> Result<Vec<Thread>>;

    async fn init_schema(&self) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct StageTransitionInput {
    pub thread_id: i64,
    pub from_stage: Stage,
    pub to_stage: Stage,
    pub from_status: fc_common::ThreadStatus,
    pub to_status: fc_common::ThreadStatus,
    pub reason: String,
    pub triggering_reply_message_id: Option<String>,
}
