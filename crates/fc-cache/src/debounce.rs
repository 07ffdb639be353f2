//! Debounce gate: collapses bursts of near-simultaneous replies on the same
//! thread into a single pipeline pass, and filters out replies too short or
//! too formulaic to carry any decision-relevant content.

use crate::Result;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::collections::HashSet;
use std::sync::OnceLock;
use tracing::debug;

const DEBOUNCE_TTL_SECONDS: u64 = 5;
const MIN_CONTENT_LENGTH: usize = 10;

fn trivial_patterns() -> &'static HashSet<&'static str> {
    static PATTERNS: OnceLock<HashSet<&'static str>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            "hi", "hello", "hey", "thanks", "thank you", "ok", "okay", "yes", "no", "yep", "nope",
            "?", "thx", "ty",
        ]
        .into_iter()
        .collect()
    })
}

pub struct Debouncer {
    conn: ConnectionManager,
}

impl Debouncer {
    pub async fn connect(redis_url: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self { conn })
    }

    /// A body is trivial if, after trimming and lowercasing, it's shorter
    /// than `MIN_CONTENT_LENGTH` or matches one of the stock acknowledgement
    /// phrases exactly. No Redis round-trip needed for this check.
    pub fn is_trivial(body: &str) -> bool {
        let normalized = body.trim().to_lowercase();
        if normalized.len() < MIN_CONTENT_LENGTH {
            return true;
        }
        trivial_patterns().contains(normalized.as_str())
    }

    /// Returns `true` if this thread should be processed now: the body
    /// isn't trivial, and we won the race to set the debounce key (anyone
    /// else hitting the same thread within the TTL window gets `false`).
    pub async fn should_process(&self, thread_id: &str, body: &str) -> Result<bool> {
        if Self::is_trivial(body) {
            debug!(thread_id, "skipping debounce: trivial body");
            return Ok(false);
        }

        let key = debounce_key(thread_id);
        let mut conn = self.conn.clone();
        // SET key value NX EX ttl: claim and TTL in one round trip, so a
        // crash between the two can never leave the key without an expiry.
        let result: Option<String> = redis::cmd("SET")
            .arg(&key)
            .arg("1")
            .arg("NX")
            .arg("EX")
            .arg(DEBOUNCE_TTL_SECONDS)
            .query_async(&mut conn)
            .await?;
        Ok(result.is_some())
    }

    /// Explicit marker, independent of `should_process`, used by callers
    /// that want to debounce a thread without having decided yet whether
    /// the body passed the triviality filter.
    pub async fn mark_processed(&self, thread_id: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn
            .set_ex(debounce_key(thread_id), "1", DEBOUNCE_TTL_SECONDS)
            .await?;
        Ok(())
    }

    pub async fn clear_debounce(&self, thread_id: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.del(debounce_key(thread_id)).await?;
        Ok(())
    }
}

fn debounce_key(thread_id: &str) -> String {
    format!("debounce:{thread_id}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_bodies_are_trivial() {
        assert!(Debouncer::is_trivial("ok"));
        assert!(Debouncer::is_trivial("   "));
        assert!(Debouncer::is_trivial("thx"));
    }

    #[test]
    fn stock_acknowledgements_are_trivial_regardless_of_case() {
        assert!(Debouncer::is_trivial("Thanks"));
        assert!(Debouncer::is_trivial("  THANK YOU  "));
        assert!(Debouncer::is_trivial("Okay"));
    }

    #[test]
    fn substantive_replies_are_not_trivial() {
        assert!(!Debouncer::is_trivial(
            "Sure, my number is 555-0100, call anytime after 5pm"
        ));
    }
}
