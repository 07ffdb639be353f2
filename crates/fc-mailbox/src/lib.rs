//! Mailbox transport: the one place the engine talks IMAP/SMTP. Everything
//! upstream (Poller, Dispatcher, Pipeline) only sees the `MailboxClient`
//! trait, so they can be exercised against a fake in tests.

mod contact;
mod error;
mod imap_client;
pub mod parser;
mod poller;

pub use contact::{detect as detect_contact, ContactSignal};
pub use error::{MailboxError, Result};
pub use imap_client::{ImapSmtpClient, ImapSmtpClientPool};
pub use parser::{parse_message, ParsedMessage};
pub use poller::{PollOutcome, Poller};

use async_trait::async_trait;

/// An inbound message fetched from a mailbox, still carrying its IMAP
/// identity so it can be flagged later.
#[derive(Debug, Clone)]
pub struct FetchedMessage {
    pub account_email: String,
    pub imap_uid: u32,
    pub parsed: ParsedMessage,
}

/// The boundary this crate exists to implement. `MailboxClient` is scoped
/// to a single account; the Poller fans out across one client per
/// configured mailbox.
#[async_trait]
pub trait MailboxClient: Send + Sync {
    /// Unseen messages received in roughly the last `since_days` days.
    async fn fetch_unseen(&self, since_days: u32) -> Result<Vec<FetchedMessage>>;

    async fn mark_read(&self, imap_uid: u32) -> Result<()>;

    async fn mark_unread(&self, imap_uid: u32) -> Result<()>;

    /// Send a templated reply threaded against `in_reply_to_message_id`.
    async fn send_reply(
        &self,
        to_email: &str,
        subject: &str,
        body: &str,
        in_reply_to_message_id: &str,
    ) -> Result<()>;
}
