//! Idempotent executor for one `(thread_id, stage)` follow-up task.

use crate::error::Result;
use crate::ports::{DedupCheck, MailboxLookup, ScheduleWriter};
use chrono::Utc;
use fc_common::{next_stage_delay, template_for_stage, Stage, StopReason, ThreadDelta, ThreadStatus, MAX_FAILED_SENDS};
use fc_mailbox::MailboxClient;
use fc_store::{FollowupSendRecord, StageTransitionInput, ThreadStore};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

const SEND_ATTEMPTS: usize = 3;
const SEND_BACKOFF: [Duration; 2] = [Duration::from_secs(1), Duration::from_secs(2)];

/// What happened to one dispatch attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The follow-up was sent and the next stage (if any) scheduled.
    Sent,
    /// The eligibility guard rejected the task before any send was
    /// attempted — already dispatched, thread no longer active, etc.
    Skipped,
    /// The mailbox send failed after retries; `failed_sends` was
    /// incremented (and the thread moved to ERROR if this was the third).
    Failed,
}

pub struct Dispatcher<S: ThreadStore> {
    store: Arc<S>,
    dedup: Arc<dyn DedupCheck>,
    schedule: Arc<dyn ScheduleWriter>,
    mailboxes: Arc<dyn MailboxLookup>,
}

impl<S: ThreadStore> Dispatcher<S> {
    pub fn new(
        store: Arc<S>,
        dedup: Arc<dyn DedupCheck>,
        schedule: Arc<dyn ScheduleWriter>,
        mailboxes: Arc<dyn MailboxLookup>,
    ) -> Self {
        Self {
            store,
            dedup,
            schedule,
            mailboxes,
        }
    }

    /// Runs the eligibility guard, sends the templated follow-up, and
    /// records the outcome. Every step short-circuits in the order the
    /// guard is specified so a thread that no longer qualifies never
    /// reaches the mailbox.
    pub async fn dispatch(&self, thread_id: i64, stage: Stage) -> Result<DispatchOutcome> {
        let Some(thread) = self.store.get_by_id(thread_id).await? else {
            return Ok(DispatchOutcome::Skipped);
        };

        if thread.status != ThreadStatus::FollowupActive
            || thread.stop_reason.is_some()
            || thread.failed_sends >= MAX_FAILED_SENDS
            || thread.followups_sent >= stage as i32
        {
            return Ok(DispatchOutcome::Skipped);
        }

        if !self.dedup.try_claim(&thread.message_id, stage).await? {
            return Ok(DispatchOutcome::Skipped);
        }

        let client = self.mailboxes.client_for(&thread.account_email)?;

        let subject = reply_subject(&thread.subject);
        let template = template_for_stage(stage);

        match send_with_retries(client.as_ref(), &thread.creator_email, &subject, template, &thread.message_id).await {
            Ok(()) => {
                let next_followup_at = next_stage_delay(stage).map(|(_, delay)| Utc::now() + delay);
                self.store
                    .record_followup_sent(
                        thread.id,
                        FollowupSendRecord {
                            stage,
                            template: template.to_string(),
                            success: true,
                            error: None,
                        },
                        next_followup_at,
                    )
                    .await?;

                match next_stage_delay(stage) {
                    Some((next_stage, delay)) => {
                        self.schedule.add(thread.id, next_stage, Utc::now() + delay).await?;
                    }
                    None => {
                        self.schedule.remove(thread.id).await?;
                    }
                }

                metrics::counter!("followup.dispatched_total").increment(1);
                info!(thread_id = thread.id, stage, "follow-up sent");
                Ok(DispatchOutcome::Sent)
            }
            Err(e) => {
                warn!(thread_id = thread.id, stage, error = %e, "follow-up send failed");
                metrics::counter!("followup.send_failures_total").increment(1);

                let updated = self
                    .store
                    .record_followup_sent(
                        thread.id,
                        FollowupSendRecord {
                            stage,
                            template: template.to_string(),
                            success: false,
                            error: Some(e.to_string()),
                        },
                        None,
                    )
                    .await?;

                if updated.failed_sends >= MAX_FAILED_SENDS {
                    self.store
                        .update_thread(
                            thread.id,
                            ThreadDelta {
                                status: Some(ThreadStatus::Error),
                                stop_reason: Some(StopReason::MaxSendFailures),
                                current_stage: None,
                            },
                        )
                        .await?;
                    self.store.clear_next_followup(thread.id).await?;
                    self.schedule.remove(thread.id).await?;
                    self.store
                        .append_stage_transition(StageTransitionInput {
                            thread_id: thread.id,
                            from_stage: thread.current_stage,
                            to_stage: thread.current_stage,
                            from_status: thread.status,
                            to_status: ThreadStatus::Error,
                            reason: "MAX_SEND_FAILURES".to_string(),
                            triggering_reply_message_id: None,
                        })
                        .await?;
                }

                Ok(DispatchOutcome::Failed)
            }
        }
    }
}

/// `Re: <subject>`, without doubling an existing `Re:` prefix.
fn reply_subject(original: &str) -> String {
    if original.trim_start().to_lowercase().starts_with("re:") {
        original.to_string()
    } else {
        format!("Re: {original}")
    }
}

/// At most 3 attempts (1 initial + 2 retries), 1 s/2 s backoff.
/// Authentication errors short-circuit — no further retries.
async fn send_with_retries(
    client: &dyn MailboxClient,
    to_email: &str,
    subject: &str,
    body: &str,
    in_reply_to_message_id: &str,
) -> std::result::Result<(), fc_mailbox::MailboxError> {
    let mut last_err = fc_mailbox::MailboxError::Send("unreachable retry loop".into());

    for attempt in 0..SEND_ATTEMPTS {
        if attempt > 0 {
            tokio::time::sleep(SEND_BACKOFF[attempt - 1]).await;
        }

        match client.send_reply(to_email, subject, body, in_reply_to_message_id).await {
            Ok(()) => return Ok(()),
            Err(e @ fc_mailbox::MailboxError::Authentication(_)) => return Err(e),
            Err(e) => {
                warn!(attempt = attempt + 1, error = %e, "mailbox send attempt failed");
                last_err = e;
            }
        }
    }

    Err(last_err)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subject_gets_re_prefix_once() {
        assert_eq!(reply_subject("outreach"), "Re: outreach");
        assert_eq!(reply_subject("Re: outreach"), "Re: outreach");
        assert_eq!(reply_subject("RE: outreach"), "RE: outreach");
    }
}
