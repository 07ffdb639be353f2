//! SQLite implementation of `ThreadStore`, used for local development and
//! integration tests where spinning up Postgres is unwarranted overhead.

use crate::{FollowupSendRecord, Result, StageTransitionInput, StoreError, ThreadStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fc_common::{Intent, NewThread, ReplyInput, Stage, Thread, ThreadDelta, ThreadStatus};
use sqlx::{Row, SqlitePool};
use tracing::{debug, info};

pub struct SqliteThreadStore {
    pool: SqlitePool,
}

impl SqliteThreadStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    fn parse_row(row: &sqlx::sqlite::SqliteRow) -> Result<Thread> {
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
            current_stage: row.get::<i64, _>("current_stage") as Stage,
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

/// The pre-insert existence check in `insert_thread` is a fast path only;
/// under concurrent inserts for the same `message_id` the real guard is this
/// constraint violation, which we translate into the same `Conflict` the
/// caller already handles (the Pipeline's insert-race fallback, §4.7 step 5).
fn is_unique_violation(e: &sqlx::Error) -> bool {
    matches!(e, sqlx::Error::Database(db) if db.is_unique_violation())
}

const SELECT_COLUMNS: &str = "id, message_id, thread_id, account_email, creator_email, subject, \
     status, current_stage, followups_sent, failed_sends, stop_reason, next_followup_at, \
     last_followup_sent_at, created_at, updated_at";

#[async_trait]
impl ThreadStore for SqliteThreadStore {
    async fn get_by_message_id(&self, message_id: &str) -> Result<Option<Thread>> {
        let query = format!("SELECT {SELECT_COLUMNS} FROM threads WHERE message_id = ?");
        let row = sqlx::query(&query)
            .bind(message_id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(Self::parse_row).transpose()
    }

    async fn get_by_thread_id(&self, thread_id: &str) -> Result<Option<Thread>> {
        let query = format!(
            "SELECT {SELECT_COLUMNS} FROM threads WHERE thread_id = ? ORDER BY created_at ASC LIMIT 1"
        );
        let row = sqlx::query(&query)
            .bind(thread_id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(Self::parse_row).transpose()
    }

    async fn get_by_id(&self, id: i64) -> Result<Option<Thread>> {
        let query = format!("SELECT {SELECT_COLUMNS} FROM threads WHERE id = ?");
        let row = sqlx::query(&query).bind(id).fetch_optional(&self.pool).await?;

        row.as_ref().map(Self::parse_row).transpose()
    }

    async fn insert_thread(&self, new_thread: NewThread) -> Result<Thread> {
        let now = Utc::now();
        let result = sqlx::query(
            "INSERT INTO threads \
             (message_id, thread_id, account_email, creator_email, subject, status, \
              current_stage, followups_sent, failed_sends, stop_reason, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, 0, 0, ?, ?, ?)",
        )
        .bind(&new_thread.message_id)
        .bind(&new_thread.thread_id)
        .bind(&new_thread.account_email)
        .bind(&new_thread.creator_email)
        .bind(&new_thread.subject)
        .bind(status_str(new_thread.status))
        .bind(new_thread.current_stage as i64)
        .bind(new_thread.stop_reason.map(stop_reason_str))
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => {
                debug!(message_id = %new_thread.message_id, "inserted thread");
                self.get_by_message_id(&new_thread.message_id)
                    .await?
                    .ok_or_else(|| StoreError::Conflict(new_thread.message_id))
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
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(reply.thread_id)
        .bind(&reply.message_id)
        .bind(reply.received_at)
        .bind(reply.reply_to_stage.map(|s| s as i64))
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

        sqlx::query(
            "UPDATE threads SET status = ?, current_stage = ?, stop_reason = ?, updated_at = ? \
             WHERE id = ?",
        )
        .bind(status_str(status))
        .bind(current_stage as i64)
        .bind(stop_reason.map(stop_reason_str))
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await?;

        self.get_by_id(id).await?.ok_or(StoreError::NotFound(id))
    }

    async fn increment_failed_sends(&self, id: i64) -> Result<Thread> {
        sqlx::query("UPDATE threads SET failed_sends = failed_sends + 1, updated_at = ? WHERE id = ?")
            .bind(Utc::now())
            .bind(id)
            .execute(&self.pool)
            .await?;

        self.get_by_id(id).await?.ok_or(StoreError::NotFound(id))
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
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(thread_id)
        .bind(record.stage as i64)
        .bind(now)
        .bind(&record.template)
        .bind(record.success)
        .bind(&record.error)
        .execute(&mut *tx)
        .await?;

        if record.success {
            sqlx::query(
                "UPDATE threads SET followups_sent = followups_sent + 1, \
                 last_followup_sent_at = ?, next_followup_at = ?, current_stage = ?, \
                 updated_at = ? WHERE id = ?",
            )
            .bind(now)
            .bind(next_followup_at)
            .bind(record.stage as i64)
            .bind(now)
            .bind(thread_id)
            .execute(&mut *tx)
            .await?;
        } else {
            sqlx::query("UPDATE threads SET failed_sends = failed_sends + 1, updated_at = ? WHERE id = ?")
                .bind(now)
                .bind(thread_id)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;

        info!(thread_id, stage = record.stage, success = record.success, "recorded follow-up send");
        self.get_by_id(thread_id).await?.ok_or(StoreError::NotFound(thread_id))
    }

    async fn schedule_next_followup(&self, id: i64, at: DateTime<Utc>) -> Result<()> {
        sqlx::query("UPDATE threads SET next_followup_at = ?, updated_at = ? WHERE id = ?")
            .bind(at)
            .bind(Utc::now())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn clear_next_followup(&self, id: i64) -> Result<()> {
        sqlx::query("UPDATE threads SET next_followup_at = NULL, updated_at = ? WHERE id = ?")
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
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(transition.thread_id)
        .bind(transition.from_stage as i64)
        .bind(transition.to_stage as i64)
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
        let query = format!(
            "SELECT {SELECT_COLUMNS} FROM threads \
             WHERE status = 'FOLLOWUP_ACTIVE' AND next_followup_at IS NOT NULL \
             AND stop_reason IS NULL \
             ORDER BY next_followup_at ASC"
        );
        let rows = sqlx::query(&query).fetch_all(&self.pool).await?;
        rows.iter().map(Self::parse_row).collect()
    }

    async fn get_threads_due_for_followup(&self, as_of: DateTime<Utc>) -> Result<Vec<Thread>> {
        let query = format!(
            "SELECT {SELECT_COLUMNS} FROM threads \
             WHERE status = 'FOLLOWUP_ACTIVE' AND next_followup_at IS NOT NULL \
             AND next_followup_at <= ? AND stop_reason IS NULL AND failed_sends < 3 \
             ORDER BY next_followup_at ASC"
        );
        let rows = sqlx::query(&query).bind(as_of).fetch_all(&self.pool).await?;
        rows.iter().map(Self::parse_row).collect()
    }

    async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS threads (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
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
                next_followup_at TEXT,
                last_followup_sent_at TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_threads_next_followup_at ON threads(next_followup_at)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_threads_thread_id ON threads(thread_id)")
            .execute(&self.pool)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS replies (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                thread_id INTEGER NOT NULL REFERENCES threads(id),
                message_id TEXT NOT NULL UNIQUE,
                received_at TEXT NOT NULL,
                reply_to_stage INTEGER,
                subject TEXT NOT NULL,
                body TEXT NOT NULL,
                intent TEXT NOT NULL,
                has_phone INTEGER NOT NULL,
                has_address INTEGER NOT NULL,
                phone_numbers TEXT NOT NULL,
                address_text TEXT
            );
            "#,
        )
        .execute(&self.pool)
        .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_replies_thread_id ON replies(thread_id)")
            .execute(&self.pool)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS followup_sends (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                thread_id INTEGER NOT NULL REFERENCES threads(id),
                stage INTEGER NOT NULL,
                sent_at TEXT NOT NULL,
                template TEXT NOT NULL,
                success INTEGER NOT NULL,
                error TEXT
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS stage_transitions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                thread_id INTEGER NOT NULL REFERENCES threads(id),
                from_stage INTEGER NOT NULL,
                to_stage INTEGER NOT NULL,
                from_status TEXT NOT NULL,
                to_status TEXT NOT NULL,
                reason TEXT NOT NULL,
                triggering_reply_message_id TEXT,
                created_at TEXT NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        info!("initialized SQLite thread store schema");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fc_common::NewThread;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn setup() -> SqliteThreadStore {
        let pool = SqlitePoolOptions::new()
            .connect("sqlite::memory:")
            .await
            .expect("in-memory sqlite pool");
        let store = SqliteThreadStore::new(pool);
        store.init_schema().await.expect("init schema");
        store
    }

    #[tokio::test]
    async fn insert_then_get_round_trips() {
        let store = setup().await;
        let created = store
            .insert_thread(NewThread {
                message_id: "m1".into(),
                thread_id: "t1".into(),
                account_email: "acct@example.com".into(),
                creator_email: "creator@example.com".into(),
                subject: "Re: outreach".into(),
                status: ThreadStatus::Processing,
                current_stage: 0,
                stop_reason: None,
            })
            .await
            .expect("insert");

        let fetched = store
            .get_by_message_id("m1")
            .await
            .expect("query")
            .expect("present");
        assert_eq!(fetched.id, created.id);
        assert_eq!(fetched.status, ThreadStatus::Processing);
    }

    #[tokio::test]
    async fn get_by_thread_id_finds_the_thread_that_created_it() {
        let store = setup().await;
        let created = store
            .insert_thread(NewThread {
                message_id: "first-reply@example.com".into(),
                thread_id: "conversation-anchor@example.com".into(),
                account_email: "acct@example.com".into(),
                creator_email: "creator@example.com".into(),
                subject: "Re: outreach".into(),
                status: ThreadStatus::FollowupActive,
                current_stage: 1,
                stop_reason: None,
            })
            .await
            .expect("insert");

        let found = store
            .get_by_thread_id("conversation-anchor@example.com")
            .await
            .expect("query")
            .expect("present");
        assert_eq!(found.id, created.id);

        assert!(store.get_by_thread_id("no-such-conversation").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn duplicate_message_id_conflicts() {
        let store = setup().await;
        let new_thread = |status| NewThread {
            message_id: "dup".into(),
            thread_id: "t1".into(),
            account_email: "acct@example.com".into(),
            creator_email: "creator@example.com".into(),
            subject: "Re: outreach".into(),
            status,
            current_stage: 0,
            stop_reason: None,
        };

        store.insert_thread(new_thread(ThreadStatus::Processing)).await.unwrap();
        let err = store
            .insert_thread(new_thread(ThreadStatus::Processing))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn concurrent_insert_of_the_same_message_id_conflicts_via_db_constraint() {
        let store = setup().await;
        let new_thread = NewThread {
            message_id: "racey".into(),
            thread_id: "t1".into(),
            account_email: "acct@example.com".into(),
            creator_email: "creator@example.com".into(),
            subject: "Re: outreach".into(),
            status: ThreadStatus::Processing,
            current_stage: 0,
            stop_reason: None,
        };

        let (first, second) = tokio::join!(
            store.insert_thread(new_thread.clone()),
            store.insert_thread(new_thread.clone())
        );

        let results = [first, second];
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(results
            .iter()
            .any(|r| matches!(r, Err(StoreError::Conflict(id)) if id == "racey")));
    }

    #[tokio::test]
    async fn record_followup_sent_advances_stage_and_schedule() {
        let store = setup().await;
        let thread = store
            .insert_thread(NewThread {
                message_id: "m2".into(),
                thread_id: "t2".into(),
                account_email: "acct@example.com".into(),
                creator_email: "creator@example.com".into(),
                subject: "Re: outreach".into(),
                status: ThreadStatus::FollowupActive,
                current_stage: 1,
                stop_reason: None,
            })
            .await
            .unwrap();

        let next_at = Utc::now() + chrono::Duration::hours(24);
        let updated = store
            .record_followup_sent(
                thread.id,
                FollowupSendRecord {
                    stage: 1,
                    template: fc_common::STAGE_1_TEMPLATE.to_string(),
                    success: true,
                    error: None,
                },
                Some(next_at),
            )
            .await
            .unwrap();

        assert_eq!(updated.followups_sent, 1);
        assert_eq!(updated.current_stage, 1);
        assert!(updated.next_followup_at.is_some());
        assert!(updated.last_followup_sent_at.is_some());
    }

    #[tokio::test]
    async fn append_reply_persists_the_analysis_verdict() {
        let store = setup().await;
        let thread = store
            .insert_thread(NewThread {
                message_id: "m4".into(),
                thread_id: "t4".into(),
                account_email: "acct@example.com".into(),
                creator_email: "creator@example.com".into(),
                subject: "Re: outreach".into(),
                status: ThreadStatus::Processing,
                current_stage: 0,
                stop_reason: None,
            })
            .await
            .unwrap();

        store
            .append_reply(fc_common::ReplyInput {
                thread_id: thread.id,
                message_id: "m4".into(),
                received_at: Utc::now(),
                reply_to_stage: None,
                subject: "Re: outreach".into(),
                body: "I'm interested, tell me more.".into(),
                analysis: fc_common::Analysis {
                    intent: fc_common::Intent::Interested,
                    has_phone: false,
                    has_address: false,
                    phone_numbers: vec![],
                    address_text: None,
                },
            })
            .await
            .expect("append reply");

        let row: (i64, String) = sqlx::query_as("SELECT thread_id, intent FROM replies WHERE message_id = 'm4'")
            .fetch_one(store.pool())
            .await
            .unwrap();
        assert_eq!(row.0, thread.id);
        assert_eq!(row.1, "INTERESTED");
    }

    #[tokio::test]
    async fn failed_send_increments_failed_sends_not_followups_sent() {
        let store = setup().await;
        let thread = store
            .insert_thread(NewThread {
                message_id: "m3".into(),
                thread_id: "t3".into(),
                account_email: "acct@example.com".into(),
                creator_email: "creator@example.com".into(),
                subject: "Re: outreach".into(),
                status: ThreadStatus::FollowupActive,
                current_stage: 1,
                stop_reason: None,
            })
            .await
            .unwrap();

        let updated = store
            .record_followup_sent(
                thread.id,
                FollowupSendRecord {
                    stage: 1,
                    template: fc_common::STAGE_1_TEMPLATE.to_string(),
                    success: false,
                    error: Some("smtp timeout".into()),
                },
                None,
            )
            .await
            .unwrap();

        assert_eq!(updated.followups_sent, 0);
        assert_eq!(updated.failed_sends, 1);
    }
}
