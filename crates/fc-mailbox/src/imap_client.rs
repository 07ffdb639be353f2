//! IMAP + SMTP transport for a single mailbox account.
//!
//! The `imap` crate is blocking, so every call into a session runs inside
//! `spawn_blocking`; the SMTP side uses `lettre`'s async tokio transport
//! directly.

use crate::error::{MailboxError, Result};
use crate::parser;
use crate::{FetchedMessage, MailboxClient};
use async_trait::async_trait;
use fc_config::{AccountConfig, TransportConfig};
use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message as SmtpMessage, Tokio1Executor};
use native_tls::TlsConnector;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

const MAX_CONNECT_ATTEMPTS: u32 = 5;

type ImapSession = imap::Session<native_tls::TlsStream<std::net::TcpStream>>;

/// IMAP/SMTP transport bound to one configured account, dialing whatever
/// server `TransportConfig` names (every account in the fleet shares one
/// IMAP/SMTP host, per the Gmail-fleet deployment model).
pub struct ImapSmtpClient {
    account: AccountConfig,
    transport: TransportConfig,
    session: Mutex<Option<ImapSession>>,
}

impl ImapSmtpClient {
    pub fn new(account: AccountConfig, transport: TransportConfig) -> Self {
        Self {
            account,
            transport,
            session: Mutex::new(None),
        }
    }

    async fn ensure_session(&self) -> Result<()> {
        let mut guard = self.session.lock().await;

        if let Some(session) = guard.as_mut() {
            if tokio::task::block_in_place(|| session.noop()).is_ok() {
                return Ok(());
            }
            warn!(account = %self.account.email, "IMAP connection dead, reconnecting");
            *guard = None;
        }

        let account = self.account.clone();
        let transport = self.transport.clone();
        let new_session = tokio::task::spawn_blocking(move || {
            connect_with_backoff(&account, &transport, MAX_CONNECT_ATTEMPTS)
        })
        .await
        .map_err(|e| MailboxError::Connection(e.to_string()))??;

        *guard = Some(new_session);
        Ok(())
    }
}

fn connect_with_backoff(
    account: &AccountConfig,
    transport: &TransportConfig,
    max_attempts: u32,
) -> Result<ImapSession> {
    for attempt in 0..max_attempts {
        info!(
            account = %account.email,
            attempt = attempt + 1,
            max_attempts,
            "connecting to IMAP"
        );

        match connect_once(account, transport) {
            Ok(session) => {
                info!(account = %account.email, "IMAP connected");
                return Ok(session);
            }
            Err(MailboxError::Authentication(msg)) => {
                warn!(account = %account.email, "IMAP authentication failed, not retrying");
                return Err(MailboxError::Authentication(msg));
            }
            Err(e) => {
                if attempt + 1 == max_attempts {
                    return Err(MailboxError::Connection(format!(
                        "IMAP connect failed after {max_attempts} attempts: {e}"
                    )));
                }
                let wait = std::time::Duration::from_secs(1 << attempt);
                warn!(account = %account.email, error = %e, "IMAP connect failed, retrying in {:?}", wait);
                std::thread::sleep(wait);
            }
        }
    }
    Err(MailboxError::Connection("unreachable retry loop".into()))
}

fn connect_once(account: &AccountConfig, transport: &TransportConfig) -> Result<ImapSession> {
    let tls = TlsConnector::builder()
        .build()
        .map_err(|e| MailboxError::Connection(e.to_string()))?;

    let client = imap::connect(
        (transport.imap_server.as_str(), transport.imap_port),
        transport.imap_server.as_str(),
        &tls,
    )
    .map_err(|e| MailboxError::Connection(e.to_string()))?;

    client
        .login(&account.email, &account.password)
        .map_err(|(e, _)| MailboxError::Authentication(e.to_string()))
}

fn since_clause(since_days: u32) -> String {
    let since = chrono::Utc::now() - chrono::Duration::days(since_days as i64);
    format!("SINCE {}", since.format("%d-%b-%Y"))
}

#[async_trait]
impl MailboxClient for ImapSmtpClient {
    async fn fetch_unseen(&self, since_days: u32) -> Result<Vec<FetchedMessage>> {
        self.ensure_session().await?;
        let mut guard = self.session.lock().await;
        let session = guard
            .as_mut()
            .ok_or_else(|| MailboxError::Connection("no IMAP session".into()))?;

        tokio::task::block_in_place(|| {
            session
                .select("INBOX")
                .map_err(|e| MailboxError::Connection(e.to_string()))?;

            let query = format!("UNSEEN {}", since_clause(since_days));
            let uids = session
                .search(&query)
                .map_err(|e| MailboxError::Connection(e.to_string()))?;

            let mut messages = Vec::new();
            for uid in uids {
                let fetched = match session.fetch(uid.to_string(), "RFC822") {
                    Ok(f) => f,
                    Err(e) => {
                        warn!(uid, error = %e, "failed to fetch message");
                        continue;
                    }
                };
                let Some(raw) = fetched.iter().find_map(|m| m.body()) else {
                    warn!(uid, "message had no body");
                    continue;
                };

                match parser::parse_message(raw) {
                    Ok(parsed) => messages.push(FetchedMessage {
                        account_email: self.account.email.clone(),
                        imap_uid: uid,
                        parsed,
                    }),
                    Err(e) => {
                        // Dead-letter gap: the body could not be extracted. We drop
                        // the message rather than guess at an alternate parse, but
                        // count it so operators can spot a parsing regression.
                        metrics::counter!("poller.unparseable_total").increment(1);
                        warn!(uid, error = %e, "failed to parse message");
                    }
                }
            }
            Ok(messages)
        })
    }

    async fn mark_read(&self, imap_uid: u32) -> Result<()> {
        self.ensure_session().await?;
        let mut guard = self.session.lock().await;
        let session = guard
            .as_mut()
            .ok_or_else(|| MailboxError::Connection("no IMAP session".into()))?;
        tokio::task::block_in_place(|| {
            session
                .store(imap_uid.to_string(), "+FLAGS (\\Seen)")
                .map_err(|e| MailboxError::Connection(e.to_string()))
                .map(|_| ())
        })
    }

    async fn mark_unread(&self, imap_uid: u32) -> Result<()> {
        self.ensure_session().await?;
        let mut guard = self.session.lock().await;
        let session = guard
            .as_mut()
            .ok_or_else(|| MailboxError::Connection("no IMAP session".into()))?;
        tokio::task::block_in_place(|| {
            session
                .store(imap_uid.to_string(), "-FLAGS (\\Seen)")
                .map_err(|e| MailboxError::Connection(e.to_string()))
                .map(|_| ())
        })
    }

    async fn send_reply(
        &self,
        to_email: &str,
        subject: &str,
        body: &str,
        in_reply_to_message_id: &str,
    ) -> Result<()> {
        let message_id_header = format!("<{in_reply_to_message_id}>");

        let email = SmtpMessage::builder()
            .from(
                self.account
                    .email
                    .parse()
                    .map_err(|e| MailboxError::Send(format!("invalid from address: {e}")))?,
            )
            .to(to_email
                .parse()
                .map_err(|e| MailboxError::Send(format!("invalid to address: {e}")))?)
            .subject(subject)
            .header(ContentType::TEXT_PLAIN)
            .in_reply_to(message_id_header.clone())
            .references(message_id_header)
            .body(body.to_string())
            .map_err(|e| MailboxError::Send(e.to_string()))?;

        let creds = Credentials::new(self.account.email.clone(), self.account.password.clone());

        let transport =
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&self.transport.smtp_server)
                .map_err(|e| MailboxError::Send(e.to_string()))?
                .port(self.transport.smtp_port)
                .credentials(creds)
                .build();

        transport
            .send(email)
            .await
            .map_err(|e| MailboxError::Send(e.to_string()))?;

        Ok(())
    }
}

/// One `ImapSmtpClient` per configured account, keyed by email.
pub struct ImapSmtpClientPool {
    clients: HashMap<String, Arc<ImapSmtpClient>>,
}

impl ImapSmtpClientPool {
    pub fn new(accounts: Vec<AccountConfig>, transport: TransportConfig) -> Self {
        let clients = accounts
            .into_iter()
            .map(|account| {
                let email = account.email.clone();
                (email, Arc::new(ImapSmtpClient::new(account, transport.clone())))
            })
            .collect();
        Self { clients }
    }

    pub fn get(&self, account_email: &str) -> Result<Arc<ImapSmtpClient>> {
        self.clients
            .get(account_email)
            .cloned()
            .ok_or_else(|| MailboxError::UnknownAccount(account_email.to_string()))
    }

    pub fn accounts(&self) -> impl Iterator<Item = &str> {
        self.clients.keys().map(|s| s.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn since_clause_formats_imap_date() {
        let clause = since_clause(7);
        assert!(clause.starts_with("SINCE "));
    }
}
