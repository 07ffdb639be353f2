//! Error types for mailbox transport

use thiserror::Error;

#[derive(Error, Debug)]
pub enum MailboxError {
    #[error("IMAP authentication failed for {0}")]
    Authentication(String),

    #[error("IMAP connection failed: {0}")]
    Connection(String),

    #[error("SMTP send failed: {0}")]
    Send(String),

    #[error("message parse failed: {0}")]
    Parse(String),

    #[error("account not configured: {0}")]
    UnknownAccount(String),
}

pub type Result<T> = std::result::Result<T, MailboxError>;
