//! Periodic fan-out across every configured mailbox: fetch unseen messages,
//! keep only the ones that thread to outreach, and hand back one
//! [`PollOutcome`] per account so a single mailbox's auth failure never
//! blocks the others in the same tick.

use crate::{FetchedMessage, MailboxClient};
use fc_common::InboundReply;
use std::sync::Arc;
use tracing::warn;

/// Query window: unseen messages received in roughly the last 7 days.
const SINCE_DAYS: u32 = 7;

/// What one account's poll produced this tick.
#[derive(Debug, Default)]
pub struct PollOutcome {
    pub account_email: String,
    /// Total unseen messages fetched, including ones filtered out as not a
    /// reply to outreach.
    pub fetched: usize,
    pub replies: Vec<InboundReply>,
    /// Set when `fetch_unseen` itself failed for this account — an
    /// authentication failure aborts further retries for that mailbox in
    /// that tick (human intervention), but every other account still polls.
    pub error: Option<String>,
}

/// Fans an unseen-mail check out across every `(account_email, client)` pair
/// it's given. Generic over `MailboxClient` so tests can swap in a fake.
pub struct Poller {
    clients: Vec<(String, Arc<dyn MailboxClient>)>,
}

impl Poller {
    pub fn new(clients: Vec<(String, Arc<dyn MailboxClient>)>) -> Self {
        Self { clients }
    }

    /// Poll every configured mailbox concurrently and return one outcome per
    /// account, in the order the clients were given.
    pub async fn poll_all(&self) -> Vec<PollOutcome> {
        let polls = self
            .clients
            .iter()
            .map(|(email, client)| poll_one(email.clone(), Arc::clone(client)));

        futures::future::join_all(polls).await
    }
}

async fn poll_one(account_email: String, client: Arc<dyn MailboxClient>) -> PollOutcome {
    match client.fetch_unseen(SINCE_DAYS).await {
        Ok(messages) => {
            let fetched = messages.len();
            let replies = messages
                .into_iter()
                .filter(|m| m.parsed.is_reply_to_outreach())
                .map(to_inbound_reply)
                .collect();

            PollOutcome {
                account_email,
                fetched,
                replies,
                error: None,
            }
        }
        Err(e) => {
            warn!(account = %account_email, error = %e, "mailbox poll failed");
            PollOutcome {
                account_email,
                fetched: 0,
                replies: Vec::new(),
                error: Some(e.to_string()),
            }
        }
    }
}

fn to_inbound_reply(msg: FetchedMessage) -> InboundReply {
    InboundReply {
        message_id: msg.parsed.message_id,
        thread_id: msg.parsed.thread_id,
        account_email: msg.account_email,
        creator_email: msg.parsed.from_email,
        subject: msg.parsed.subject,
        body: msg.parsed.body,
        received_at: msg.parsed.received_at,
        imap_uid: msg.imap_uid,
        reply_to_stage: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::ParsedMessage;
    use crate::{contact::ContactSignal, error::MailboxError};
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeClient {
        messages: Vec<FetchedMessage>,
        fail: bool,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl MailboxClient for FakeClient {
        async fn fetch_unseen(&self, _since_days: u32) -> Result<Vec<FetchedMessage>, MailboxError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(MailboxError::Authentication("bad creds".into()));
            }
            Ok(self.messages.clone())
        }

        async fn mark_read(&self, _imap_uid: u32) -> Result<(), MailboxError> {
            Ok(())
        }

        async fn mark_unread(&self, _imap_uid: u32) -> Result<(), MailboxError> {
            Ok(())
        }

        async fn send_reply(
            &self,
            _to_email: &str,
            _subject: &str,
            _body: &str,
            _in_reply_to_message_id: &str,
        ) -> Result<(), MailboxError> {
            Ok(())
        }
    }

    fn sample_message(thread_id: &str, message_id: &str, subject: &str) -> FetchedMessage {
        FetchedMessage {
            account_email: "acct@example.com".into(),
            imap_uid: 7,
            parsed: ParsedMessage {
                message_id: message_id.into(),
                thread_id: thread_id.into(),
                subject: subject.into(),
                from_email: "creator@example.com".into(),
                to_email: "acct@example.com".into(),
                body: "I'm interested".into(),
                contact: ContactSignal::default(),
                received_at: Utc::now(),
            },
        }
    }

    #[tokio::test]
    async fn non_reply_messages_are_filtered_out() {
        let messages = vec![
            sample_message("m1", "m1", "Hello there"),
            sample_message("m0", "m1", "Re: outreach"),
        ];
        let client: Arc<dyn MailboxClient> = Arc::new(FakeClient {
            messages,
            fail: false,
            calls: AtomicUsize::new(0),
        });
        let poller = Poller::new(vec![("acct@example.com".into(), client)]);

        let outcomes = poller.poll_all().await;
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].fetched, 2);
        assert_eq!(outcomes[0].replies.len(), 1);
        assert_eq!(outcomes[0].replies[0].thread_id, "m0");
    }

    #[tokio::test]
    async fn one_account_failing_does_not_block_another() {
        let ok_client: Arc<dyn MailboxClient> = Arc::new(FakeClient {
            messages: vec![sample_message("m0", "m1", "Re: outreach")],
            fail: false,
            calls: AtomicUsize::new(0),
        });
        let bad_client: Arc<dyn MailboxClient> = Arc::new(FakeClient {
            messages: vec![],
            fail: true,
            calls: AtomicUsize::new(0),
        });
        let poller = Poller::new(vec![
            ("good@example.com".into(), ok_client),
            ("bad@example.com".into(), bad_client),
        ]);

        let outcomes = poller.poll_all().await;
        let good = outcomes.iter().find(|o| o.account_email == "good@example.com").unwrap();
        let bad = outcomes.iter().find(|o| o.account_email == "bad@example.com").unwrap();

        assert!(good.error.is_none());
        assert_eq!(good.replies.len(), 1);
        assert!(bad.error.is_some());
        assert!(bad.replies.is_empty());
    }
}
