//! A Redis sorted set mirroring every thread's `next_followup_at`, so the
//! dispatch tick can ask "what's due" without scanning the whole store.
//!
//! The index is a cache, not the source of truth — `ThreadStore` is. Every
//! `schedule_sync_interval_seconds` the Supervisor rebuilds it from the
//! store under a distributed lock (see `fc_standby::LeaderElection`) so a
//! crashed dispatch tick or a missed point update can never leave a thread
//! permanently stuck: worst case it's late by one sync interval.

use crate::Result;
use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tracing::info;

const SCHEDULE_KEY: &str = "followups:scheduled";
const SCHEDULE_TMP_KEY: &str = "followups:scheduled:tmp";

pub struct ScheduleIndex {
    conn: ConnectionManager,
}

/// One thread's scheduled follow-up, as stored in the index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DueFollowup {
    pub thread_id: i64,
    pub stage: u8,
}

impl ScheduleIndex {
    pub async fn connect(redis_url: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self { conn })
    }

    /// Schedule (or reschedule) a single thread's next follow-up. Used for
    /// point updates outside the periodic sync — e.g. right after a
    /// Dispatcher send advances the thread to the next stage.
    pub async fn add(&self, thread_id: i64, stage: u8, at: DateTime<Utc>) -> Result<()> {
        let mut conn = self.conn.clone();
        let score = at.timestamp() as f64;
        let _: () = conn.zadd(SCHEDULE_KEY, member(thread_id, stage), score).await?;
        Ok(())
    }

    /// Remove every entry for a thread (all three stages), used when a
    /// thread leaves FOLLOWUP_ACTIVE.
    pub async fn remove(&self, thread_id: i64) -> Result<()> {
        let mut conn = self.conn.clone();
        let members: Vec<String> = (1..=3u8).map(|stage| member(thread_id, stage)).collect();
        let _: () = conn.zrem(SCHEDULE_KEY, members).await?;
        Ok(())
    }

    /// Atomically pop every entry due at or before `as_of`: a single Lua
    /// script does the `ZRANGEBYSCORE` read and the `ZREM` of exactly the
    /// members read as one server-side operation, so two dispatch ticks
    /// racing on the same key can never both claim the same entry.
    pub async fn pop_due(&self, as_of: DateTime<Utc>) -> Result<Vec<DueFollowup>> {
        let mut conn = self.conn.clone();

        // Reads every member scored at or below ARGV[1], removes exactly
        // those members, and returns them — read and remove in one round
        // trip so no other client can observe the set in between.
        let script = r#"
            local due = redis.call("ZRANGEBYSCORE", KEYS[1], 0, ARGV[1])
            if #due > 0 then
                redis.call("ZREM", KEYS[1], unpack(due))
            end
            return due
        "#;

        let raw: Vec<String> = redis::Script::new(script)
            .key(SCHEDULE_KEY)
            .arg(as_of.timestamp())
            .invoke_async(&mut conn)
            .await?;

        Ok(raw.iter().filter_map(|m| parse_member(m)).collect())
    }

    /// Rebuild the index from scratch using the set of (thread, stage, at)
    /// tuples the store considers due to be scheduled, then atomically swap
    /// it in under `SCHEDULE_TMP_KEY` so readers never see a half-built set.
    ///
    /// An empty source set just deletes the live key outright — `RENAME`
    /// requires its source key to exist, and an empty `entries` never
    /// creates `SCHEDULE_TMP_KEY` in the first place.
    pub async fn sync(&self, entries: &[(i64, u8, DateTime<Utc>)]) -> Result<()> {
        let mut conn = self.conn.clone();

        if entries.is_empty() {
            let _: () = conn.del(SCHEDULE_KEY).await?;
            info!("follow-up schedule index emptied: no threads due for sync");
            return Ok(());
        }

        let _: () = conn.del(SCHEDULE_TMP_KEY).await?;

        for (thread_id, stage, at) in entries {
            let _: () = conn
                .zadd(SCHEDULE_TMP_KEY, member(*thread_id, *stage), at.timestamp() as f64)
                .await?;
        }

        let _: () = redis::cmd("RENAME")
            .arg(SCHEDULE_TMP_KEY)
            .arg(SCHEDULE_KEY)
            .query_async(&mut conn)
            .await?;

        info!(count = entries.len(), "resynced follow-up schedule index");
        Ok(())
    }

    pub async fn len(&self) -> Result<u64> {
        let mut conn = self.conn.clone();
        let count: u64 = conn.zcard(SCHEDULE_KEY).await?;
        Ok(count)
    }
}

fn member(thread_id: i64, stage: u8) -> String {
    format!("{thread_id}:{stage}")
}

fn parse_member(raw: &str) -> Option<DueFollowup> {
    let (thread_id, stage) = raw.rsplit_once(':')?;
    Some(DueFollowup {
        thread_id: thread_id.parse().ok()?,
        stage: stage.parse().ok()?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn member_round_trips() {
        let raw = member(42, 2);
        assert_eq!(raw, "42:2");
        let parsed = parse_member(&raw).unwrap();
        assert_eq!(parsed.thread_id, 42);
        assert_eq!(parsed.stage, 2);
    }

    #[test]
    fn malformed_member_is_skipped_not_panicked_on() {
        assert!(parse_member("garbage").is_none());
        assert!(parse_member("abc:xyz").is_none());
    }
}
