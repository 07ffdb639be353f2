//! The Dispatcher: idempotent executor for one scheduled follow-up. Owns
//! the send-once guard, template selection, and next-stage scheduling; the
//! Pipeline and the Supervisor's dispatch tick are its only two callers.

mod dispatcher;
mod error;
mod ports;

pub use dispatcher::{Dispatcher, DispatchOutcome};
pub use error::{DispatchError, Result};
pub use ports::{DedupCheck, MailboxLookup, ScheduleWriter};

use std::sync::Arc;

/// `MailboxLookup` for the production IMAP/SMTP pool.
impl MailboxLookup for fc_mailbox::ImapSmtpClientPool {
    fn client_for(&self, account_email: &str) -> Result<Arc<dyn fc_mailbox::MailboxClient>> {
        let client = self.get(account_email)?;
        Ok(client)
    }
}
