//! Send-once guard for the Dispatcher: one key per `(message_id, stage)`,
//! installed before the mailbox send is attempted and left to expire on its
//! own TTL rather than cleaned up on failure — a failed send retries on the
//! next scheduled tick, it doesn't get a fresh dedup window.

use crate::Result;
use redis::aio::ConnectionManager;

const DEDUP_TTL_SECONDS: u64 = 60 * 60;

pub struct DedupGuard {
    conn: ConnectionManager,
}

impl DedupGuard {
    pub async fn connect(redis_url: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self { conn })
    }

    /// Installs `followup:<message_id>:<stage>` with a 1 h TTL. Returns
    /// `true` if this call won the race and installed the key (the send
    /// should proceed); `false` if the key was already present.
    pub async fn try_claim(&self, message_id: &str, stage: u8) -> Result<bool> {
        let mut conn = self.conn.clone();
        let key = dedup_key(message_id, stage);
        // SET key value NX EX ttl: claim and TTL in one round trip, so a
        // crash between the two can never leave the key without an expiry.
        let result: Option<String> = redis::cmd("SET")
            .arg(&key)
            .arg("1")
            .arg("NX")
            .arg("EX")
            .arg(DEDUP_TTL_SECONDS)
            .query_async(&mut conn)
            .await?;
        Ok(result.is_some())
    }
}

fn dedup_key(message_id: &str, stage: u8) -> String {
    format!("followup:{message_id}:{stage}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dedup_key_shape() {
        assert_eq!(dedup_key("m1", 2), "followup:m1:2");
    }
}
