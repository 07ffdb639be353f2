//! PostgreSQL implementation of `ThreadStore`.

use crate::{FollowupSendRecord, Result, StageTransitionInput, StoreError, ThreadStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fc_common::{Intent, NewThread, ReplyInput, Stage, Thread, ThreadDelta, ThreadStatus};
use sqlx::{PgPool, Row};
use tracing::{debug, info};

pub struct PostgresThreadStore {
    pool: PgPool,
}

impl PostgresThreadStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn parse_row(row: &sqlx::postgres::PgRow) -> Result<Thread> {
        let status_str: String = row.get("status");
        let status = parse_status(&status_str);

        let stop_reason_str: Option<String> = row.try_get("stop_reason").ok().flatten();
        let stop_reason = stop_reason_str.as_deref().and_then(parse_stop_reason);

        Ok(Thread {
            id: row.get("id"),
            message_id: row.get("message_id"),
            thread_id: row.get("thread_id"),
            account_email: row.get("account_email"),
            creator_email: row.get("creator_email"),
            subject: row.get("subject"),
            status,
            current_stage: row.get::<i32, _>("current_stage") as Stage,
            followups_sent: row.get("followups_sent"),
            failed_sends: row.get("failed_sends"),
            stop_reason,
            next_followup_at: row.try_get("next_followup_at").ok(),
            last_followup_sent_at: row.try_get("last_followup_sent_at").ok(),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        })
    }
}

fn status_str(status: ThreadStatus) -> &'static str {
    match status {
        ThreadStatus::Processing => "PROCESSING",
        ThreadStatus::FollowupActive => "FOLLOWUP_ACTIVE",
        ThreadStatus::Delegated => "DELEGATED",
        ThreadStatus::Completed => "COMPLETED",
        ThreadStatus::Error => "ERROR",
    }
}

fn parse_status(s: &str) -> ThreadStatus {
    match s {
        "FOLLOWUP_ACTIVE" => ThreadStatus::FollowupActive,
        "DELEGATED" => ThreadStatus::Delegated,
        "COMPLETED" => ThreadStatus::Completed,
        "ERROR" => ThreadStatus::Error,
        _ => ThreadStatus::Processing,
    }
}

fn stop_reason_str(reason: fc_common::StopReason) -> &'static str {
    use fc_common::StopReason::*;
    match reason {
        NotInterested => "NOT_INTERESTED",
        ContinueOverEmail => "CONTINUE_OVER_EMAIL",
        ContactProvided => "CONTACT_PROVIDED",
        CreatorReplied => "CREATOR_REPLIED",
        ClarificationNeeded => "CLARIFICATION_NEEDED",
        UnknownIntent => "UNKNOWN_INTENT",
        MaxSendFailures => "MAX_SEND_FAILURES",
    }
}

fn intent_str(intent: Intent) -> &'static str {
    match intent {
        Intent::Interested => "INTERESTED",
        Intent::NotInterested => "NOT_INTERESTED",
        Intent::Clarification => "CLARIFICATION",
        Intent::ContactProvided => "CONTACT_PROVIDED",
        Intent::ContinueOverEmail => "CONTINUE_OVER_EMAIL",
        Intent::Unclear => "UNCLEAR",
    }
}

fn parse_stop_reason(s: &str) -> Option<fc_common::StopReason> {
    use fc_common::StopReason::*;
    Some(match s {
        "NOT_INTERESTED" => NotInterested,
        "CONTINUE_OVER_EMAIL" => ContinueOverEmail,
        "CONTACT_PROVIDED" => ContactProvided,
        "CREATOR_REPLIED" => CreatorReplied,
        "CLARIFICATION_NEEDED" => ClarificationNeeded,
        "UNKNOWN_INTENT" => UnknownIntent,
        "MAX_SEND_FAILURES" => MaxSendFailures,
        _ => return None,
    })
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
    matches!(e, sqlx::Error::Database(db) if db.is_unique_violation())
}

#[async_trait]
impl ThreadStore for PostgresThreadStore {
    async fn get_by_message_id(&self, message_id: &str) -> Result<Option<Thread>> {
        let row = sqlx::query(
            "SELECT id, message_id, thread_id, account_email, creator_email, subject, status, \
             current_stage, followups_sent, failed_sends, stop_reason, next_followup_at, \
             last_followup_sent_at, created_at, updated_at \
             FROM threads WHERE message_id = $1",
        )
        .bind(message_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::parse_row).transpose()
    }

    async fn get_by_thread_id(&self, thread_id: &str) -> Result<Option<Thread>> {
        let row = sqlx::query(
            "SELECT id, message_id, thread_id, account_email, creator_email, subject, status, \
             current_stage, followups_sent, failed_sends, stop_reason, next_followup_at, \
             last_followup_sent_at, created_at, updated_at \
             FROM threads WHERE thread_id = $1 ORDER BY created_at ASC LIMIT 1",
        )
        .bind(thread_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::parse_row).transpose()
    }

    async fn get_by_id(&self, id: i64) -> Result<Option<Thread>> {
        let row = sqlx::query(
            "SELECT id, message_id, thread_id, account_email, creator_email, subject, status, \
             current_stage, followups_sent, failed_sends, stop_reason, next_followup_at, \
             last_followup_sent_at, created_at, updated_at \
             FROM threads WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::parse_row).transpose()
    }

    async fn insert_thread(&self, new_thread: NewThread) -> Result<Thread> {
        let now = Utc::now();
        let result = sqlx::query(
            "INSERT INTO threads \
             (message_id, thread_id, account_email, creator_email, subject, status, \
              current_stage, followups_sent, failed_sends, stop_reason, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, 0, 0, $8, $9, $9) \
             RETURNING id, message_id, thread_id, account_email, creator_email, subject, status, \
             current_stage, followups_sent, failed_sends, stop_reason, next_followup_at, \
             last_followup_sent_at, created_at, updated_at",
        )
        .bind(&new_thread.message_id)
        .bind(&new_thread.thread_id)
        .bind(&new_thread.account_email)
        .bind(&new_thread.creator_email)
        .bind(&new_thread.subject)
        .bind(status_str(new_thread.status))
        .bind(new_thread.current_stage as i32)
        .bind(new_thread.stop_reason.map(stop_reason_str))
        .bind(now)
        .fetch_one(&self.pool)
        .await;

        match result {
            Ok(row) => {
                debug!(message_id = %new_thread.message_id, "inserted thread");
                Self::parse_row(&row)
            }
            Err(e) if is_unique_violation(&e) => Err(StoreError::Conflict(new_thread.message_id)),
            Err(e) => Err(e.into()),
        }
    }

    async fn append_reply(&self, reply: ReplyInput) -> Result<()> {
        let phone_numbers = serde_json::to_string(&reply.analysis.phone_numbers)?;

        sqlx::query(
            "INSERT INTO replies \
             (thread_id, message_id, received_at, reply_to_stage, subject, body, \
              intent, has_phone, has_address, phone_numbers, address_text) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
        )
        .bind(reply.thread_id)
        .bind(&reply.message_id)
        .bind(reply.received_at)
        .bind(reply.reply_to_stage.map(|s| s as i32))
        .bind(&reply.subject)
        .bind(&reply.body)
        .bind(intent_str(reply.analysis.intent))
        .bind(reply.analysis.has_phone)
        .bind(reply.analysis.has_address)
        .bind(phone_numbers)
        .bind(&reply.analysis.address_text)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn update_thread(&self, id: i64, delta: ThreadDelta) -> Result<Thread> {
        let current = self.get_by_id(id).await?.ok_or(StoreError::NotFound(id))?;

        let status = delta.status.unwrap_or(current.status);
        let current_stage = delta.current_stage.unwrap_or(current.current_stage);
        let stop_reason = delta.stop_reason.or(current.stop_reason);

        let row = sqlx::query(
            "UPDATE threads SET status = $1, current_stage = $2, stop_reason = $3, updated_at = $4 \
             WHERE id = $5 \
             RETURNING id, message_id, thread_id, account_email, creator_email, subject, status, \
             current_stage, followups_sent, failed_sends, stop_reason, next_followup_at, \
             last_followup_sent_at, created_at, updated_at",
        )
        .bind(status_str(status))
        .bind(current_stage as i32)
        .bind(stop_reason.map(stop_reason_str))
        .bind(Utc::now())
        .bind(id)
        .fetch_one(&self.pool)
        .await?;

        Self::parse_row(&row)
    }

    async fn increment_failed_sends(&self, id: i64) -> Result<Thread> {
        let row = sqlx::query(
            "UPDATE threads SET failed_sends = failed_sends + 1, updated_at = $1 WHERE id = $2 \
             RETURNING id, message_id, thread_id, account_email, creator_email, subject, status, \
             current_stage, followups_sent, failed_sends, stop_reason, next_followup_at, \
             last_followup_sent_at, created_at, updated_at",
        )
        .bind(Utc::now())
        .bind(id)
        .fetch_one(&self.pool)
        .await?;

        Self::parse_row(&row)
    }

    async fn record_followup_sent(
        &self,
        thread_id: i64,
        record: FollowupSendRecord,
        next_followup_at: Option<DateTime<Utc>>,
    ) -> Result<Thread> {
        let mut tx = self.pool.begin().await?;
        let now = Utc::now();

        sqlx::query(
            "INSERT INTO followup_sends (thread_id, stage, sent_at, template, success, error) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(thread_id)
        .bind(record.stage as i32)
        .bind(now)
        .bind(&record.template)
        .bind(record.success)
        .bind(&record.error)
        .execute(&mut *tx)
        .await?;

        let row = if record.success {
            sqlx::query(
                "UPDATE threads SET followups_sent = followups_sent + 1, \
                 last_followup_sent_at = $1, next_followup_at = $2, current_stage = $3, \
                 updated_at = $1 WHERE id = $4 \
                 RETURNING id, message_id, thread_id, account_email, creator_email, subject, \
                 status, current_stage, followups_sent, failed_sends, stop_reason, \
                 next_followup_at, last_followup_sent_at, created_at, updated_at",
            )
            .bind(now)
            .bind(next_followup_at)
            .bind(record.stage as i32)
            .bind(thread_id)
            .fetch_one(&mut *tx)
            .await?
        } else {
            sqlx::query(
                "UPDATE threads SET failed_sends = failed_sends + 1, updated_at = $1 WHERE id = $2 \
                 RETURNING id, message_id, thread_id, account_email, creator_email, subject, \
                 status, current_stage, followups_sent, failed_sends, stop_reason, \
                 next_followup_at, last_followup_sent_at, created_at, updated_at",
            )
            .bind(now)
            .bind(thread_id)
            .fetch_one(&mut *tx)
            .await?
        };

        tx.commit().await?;

        info!(thread_id, stage = record.stage, success = record.success, "recorded follow-up send");
        Self::parse_row(&row)
    }

    async fn schedule_next_followup(&self, id: i64, at: DateTime<Utc>) -> Result<()> {
        sqlx::query("UPDATE threads SET next_followup_at = $1, updated_at = $2 WHERE id = $3")
            .bind(at)
            .bind(Utc::now())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn clear_next_followup(&self, id: i64) -> Result<()> {
        sqlx::query("UPDATE threads SET next_followup_at = NULL, updated_at = $1 WHERE id = $2")
            .bind(Utc::now())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn append_stage_transition(&self, transition: StageTransitionInput) -> Result<()> {
        sqlx::query(
            "INSERT INTO stage_transitions \
             (thread_id, from_stage, to_stage, from_status, to_status, reason, \
              triggering_reply_message_id, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(transition.thread_id)
        .bind(transition.from_stage as i32)
        .bind(transition.to_stage as i32)
        .bind(status_str(transition.from_status))
        .bind(status_str(transition.to_status))
        .bind(&transition.reason)
        .bind(&transition.triggering_reply_message_id)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_threads_for_schedule_sync(&self) -> Result<Vec<Thread>> {
        let rows = sqlx::query(
            "SELECT id, message_id, thread_id, account_email, creator_email, subject, status, \
             current_stage, followups_sent, failed_sends, stop_reason, next_followup_at, \
             last_followup_sent_at, created_at, updated_at \
             FROM threads \
             WHERE status = 'FOLLOWUP_ACTIVE' AND next_followup_at IS NOT NULL \
             AND stop_reason IS NULL \
             ORDER BY next_followup_at ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::parse_row).collect()
    }

    async fn get_threads_due_for_followup(&self, as_of: DateTime<Utc>) -> Result<Vec<Thread>> {
        let rows = sqlx::query(
            "SELECT id, message_id, thread_id, account_email, creator_email, subject, status, \
             current_stage, followups_sent, failed_sends, stop_reason, next_followup_at, \
             last_followup_sent_at, created_at, updated_at \
             FROM threads \
             WHERE status = 'FOLLOWUP_ACTIVE' AND next_followup_at IS NOT NULL \
             AND next_followup_at <= $1 AND stop_reason IS NULL AND failed_sends < 3 \
             ORDER BY next_followup_at ASC",
        )
        .bind(as_of)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::parse_row).collect()
    }

    async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS threads (
                id BIGSERIAL PRIMARY KEY,
                message_id TEXT NOT NULL UNIQUE,
                thread_id TEXT NOT NULL,
                account_email TEXT NOT NULL,
                creator_email TEXT NOT NULL,
                subject TEXT NOT NULL,
                status TEXT NOT NULL,
                current_stage INTEGER NOT NULL DEFAULT 0,
                followups_sent INTEGER NOT NULL DEFAULT 0,
                failed_sends INTEGER NOT NULL DEFAULT 0,
                stop_reason TEXT,
                next_followup_at TIMESTAMPTZ,
                last_followup_sent_at TIMESTAMPTZ,
                created_at TIMESTAMPTZ NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_threads_next_followup_at ON threads(next_followup_at);
            CREATE INDEX IF NOT EXISTS idx_threads_thread_id ON threads(thread_id);
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS replies (
                id BIGSERIAL PRIMARY KEY,
                thread_id BIGINT NOT NULL REFERENCES threads(id),
                message_id TEXT NOT NULL UNIQUE,
                received_at TIMESTAMPTZ NOT NULL,
                reply_to_stage INTEGER,
                subject TEXT NOT NULL,
                body TEXT NOT NULL,
                intent TEXT NOT NULL,
                has_phone BOOLEAN NOT NULL,
                has_address BOOLEAN NOT NULL,
                phone_numbers TEXT NOT NULL,
                address_text TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_replies_thread_id ON replies(thread_id);
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS followup_sends (
                id BIGSERIAL PRIMARY KEY,
                thread_id BIGINT NOT NULL REFERENCES threads(id),
                stage INTEGER NOT NULL,
                sent_at TIMESTAMPTZ NOT NULL,
                template TEXT NOT NULL,
                success BOOLEAN NOT NULL,
                error TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_followup_sends_thread_id ON followup_sends(thread_id);
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS stage_transitions (
                id BIGSERIAL PRIMARY KEY,
                thread_id BIGINT NOT NULL REFERENCES threads(id),
                from_stage INTEGER NOT NULL,
                to_stage INTEGER NOT NULL,
                from_status TEXT NOT NULL,
                to_status TEXT NOT NULL,
                reason TEXT NOT NULL,
                triggering_reply_message_id TEXT,
                created_at TIMESTAMPTZ NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_stage_transitions_thread_id ON stage_transitions(thread_id);
            "#,
        )
        .execute(&self.pool)
        .await?;

        info!("initialized PostgreSQL thread store schema");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_string() {
        for status in [
            ThreadStatus::Processing,
            ThreadStatus::FollowupActive,
            ThreadStatus::Delegated,
            ThreadStatus::Completed,
            ThreadStatus::Error,
        ] {
            assert_eq!(parse_status(status_str(status)), status);
        }
    }

    #[test]
    fn unknown_stop_reason_string_yields_none() {
        assert!(parse_stop_reason("SOMETHING_NEW").is_none());
    }
}
