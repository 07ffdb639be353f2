//! Error types for the Dispatcher

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("store error: {0}")]
    Store(#[from] fc_store::StoreError),

    #[error("cache error: {0}")]
    Cache(#[from] fc_cache::CacheError),

    #[error("mailbox error: {0}")]
    Mailbox(#[from] fc_mailbox::MailboxError),

    #[error("no mailbox configured for account {0}")]
    UnknownAccount(String),
}

pub type Result<T> = std::result::Result<T, DispatchError>;
