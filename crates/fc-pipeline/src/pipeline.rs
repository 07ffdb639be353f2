//! Bounded-concurrency reply processor: the seven-step flow that turns one
//! `InboundReply` into a state transition and, where the decision calls for
//! it, a Dispatcher invocation.

use crate::error::Result;
use crate::ports::DebounceCheck;
use fc_common::{
    Action, InboundReply, NewThread, ReplyInput, Thread, ThreadStatus, TrainingDataSink,
};
use fc_decision::Analyzer;
use fc_dispatch::{Dispatcher, MailboxLookup, ScheduleWriter};
use fc_store::{StageTransitionInput, StoreError, ThreadStore};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{info, warn};

#[derive(Clone)]
pub struct Pipeline<S: ThreadStore> {
    store: Arc<S>,
    debounce: Arc<dyn DebounceCheck>,
    analyzer: Arc<dyn Analyzer>,
    dispatcher: Arc<Dispatcher<S>>,
    schedule: Arc<dyn ScheduleWriter>,
    mailboxes: Arc<dyn MailboxLookup>,
    training_sink: Arc<dyn TrainingDataSink>,
    semaphore: Arc<Semaphore>,
}

impl<S: ThreadStore + 'static> Pipeline<S> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<S>,
        debounce: Arc<dyn DebounceCheck>,
        analyzer: Arc<dyn Analyzer>,
        dispatcher: Arc<Dispatcher<S>>,
        schedule: Arc<dyn ScheduleWriter>,
        mailboxes: Arc<dyn MailboxLookup>,
        training_sink: Arc<dyn TrainingDataSink>,
        max_concurrent: usize,
    ) -> Self {
        Self {
            store,
            debounce,
            analyzer,
            dispatcher,
            schedule,
            mailboxes,
            training_sink,
            semaphore: Arc::new(Semaphore::new(max_concurrent)),
        }
    }

    /// Runs every reply through [`Pipeline::process_reply`], bounded to at
    /// most `max_concurrent` in flight. One reply's error is logged and does
    /// not stop the others.
    pub async fn process_batch(&self, replies: Vec<InboundReply>) {
        let mut handles = Vec::with_capacity(replies.len());

        for reply in replies {
            let permit = match self.semaphore.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => break,
            };
            metrics::gauge!("pipeline.inflight").increment(1.0);
            let pipeline = self.clone();
            handles.push(tokio::spawn(async move {
                let _permit = permit;
                let message_id = reply.message_id.clone();
                if let Err(e) = pipeline.process_reply(reply).await {
                    warn!(message_id, error = %e, "pipeline failed to process reply");
                }
                metrics::gauge!("pipeline.inflight").decrement(1.0);
            }));
        }

        for handle in handles {
            let _ = handle.await;
        }
    }

    /// The spec's 7-step per-reply flow.
    pub async fn process_reply(&self, reply: InboundReply) -> Result<()> {
        if !self.debounce.should_process(&reply.thread_id, &reply.body).await? {
            return Ok(());
        }

        // `existing` is looked up by the reply's `thread_id` — the
        // conversation anchor — never by its own (always-fresh) `message_id`.
        let existing = self.store.get_by_thread_id(&reply.thread_id).await?;

        if let Some(thread) = existing.as_ref().filter(|t| t.status.is_terminal()) {
            self.ensure_visibility(&reply, thread.status).await;
            return Ok(());
        }

        let analysis = match self.analyzer.analyze(&reply.body).await {
            Ok(a) => a,
            Err(e) => {
                warn!(message_id = %reply.message_id, error = %e, "analyzer call failed, treating as UNCLEAR");
                fc_common::Analysis::unclear()
            }
        };

        self.training_sink.record(&reply, &analysis);

        let decision = fc_decision::decide(&analysis, existing.as_ref());

        let thread = match existing {
            Some(t) => t,
            None => match self.store.insert_thread(new_thread_for(&reply, &decision.delta)).await {
                Ok(t) => t,
                Err(StoreError::Conflict(_)) => {
                    // Another worker's pipeline pass won the race; fall back
                    // to whatever it inserted.
                    match self.store.get_by_message_id(&reply.message_id).await? {
                        Some(t) => t,
                        None => return Ok(()),
                    }
                }
                Err(e) => return Err(e.into()),
            },
        };

        self.store
            .append_reply(ReplyInput {
                thread_id: thread.id,
                message_id: reply.message_id.clone(),
                received_at: reply.received_at,
                reply_to_stage: reply.reply_to_stage,
                subject: reply.subject.clone(),
                body: reply.body.clone(),
                analysis,
            })
            .await?;

        let from_status = thread.status;
        let from_stage = thread.current_stage;

        let updated = self.store.update_thread(thread.id, decision.delta).await?;

        if from_status != updated.status || from_stage != updated.current_stage {
            self.store
                .append_stage_transition(StageTransitionInput {
                    thread_id: thread.id,
                    from_stage,
                    to_stage: updated.current_stage,
                    from_status,
                    to_status: updated.status,
                    reason: decision.reason.to_string(),
                    triggering_reply_message_id: Some(reply.message_id.clone()),
                })
                .await?;
        }

        info!(thread_id = thread.id, action = ?decision.action, reason = decision.reason, "decision applied");

        self.execute_action(&reply, &updated, decision.action).await
    }

    async fn execute_action(&self, reply: &InboundReply, thread: &Thread, action: Action) -> Result<()> {
        match action {
            Action::SendStage1Followup => {
                self.mark_read(reply).await;
                self.dispatcher.dispatch(thread.id, 1).await?;
            }
            Action::DelegateToHuman => {
                self.mark_unread(reply).await;
                self.cancel_scheduled_followups(thread.id).await?;
            }
            Action::MarkComplete => {
                self.mark_read(reply).await;
                self.cancel_scheduled_followups(thread.id).await?;
            }
            Action::Skip => {}
        }
        Ok(())
    }

    async fn ensure_visibility(&self, reply: &InboundReply, status: ThreadStatus) {
        if status == ThreadStatus::Delegated {
            self.mark_unread(reply).await;
        } else {
            self.mark_read(reply).await;
        }
    }

    async fn cancel_scheduled_followups(&self, thread_id: i64) -> Result<()> {
        self.schedule.remove(thread_id).await?;
        self.store.clear_next_followup(thread_id).await?;
        Ok(())
    }

    /// Visibility signals are best-effort: a mailbox hiccup here should not
    /// fail a pipeline pass that already recorded the thread's state.
    async fn mark_read(&self, reply: &InboundReply) {
        if let Err(e) = self.flag(reply, true).await {
            warn!(message_id = %reply.message_id, error = %e, "failed to mark message read");
        }
    }

    async fn mark_unread(&self, reply: &InboundReply) {
        if let Err(e) = self.flag(reply, false).await {
            warn!(message_id = %reply.message_id, error = %e, "failed to mark message unread");
        }
    }

    async fn flag(&self, reply: &InboundReply, read: bool) -> fc_dispatch::Result<()> {
        let client = self.mailboxes.client_for(&reply.account_email)?;
        if read {
            client.mark_read(reply.imap_uid).await?;
        } else {
            client.mark_unread(reply.imap_uid).await?;
        }
        Ok(())
    }
}

fn new_thread_for(reply: &InboundReply, delta: &fc_common::ThreadDelta) -> NewThread {
    NewThread {
        message_id: reply.message_id.clone(),
        thread_id: reply.thread_id.clone(),
        account_email: reply.account_email.clone(),
        creator_email: reply.creator_email.clone(),
        subject: reply.subject.clone(),
        status: delta.status.unwrap_or(ThreadStatus::Processing),
        current_stage: delta.current_stage.unwrap_or(0),
        stop_reason: delta.stop_reason,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use fc_common::ThreadDelta;

    fn reply() -> InboundReply {
        InboundReply {
            message_id: "m2@example.com".into(),
            thread_id: "m1@example.com".into(),
            account_email: "acct@example.com".into(),
            creator_email: "creator@example.com".into(),
            subject: "Re: outreach".into(),
            body: "Sure, interested".into(),
            received_at: Utc::now(),
            imap_uid: 42,
            reply_to_stage: None,
        }
    }

    #[test]
    fn new_thread_draws_fields_from_the_reply_and_decision_delta() {
        let r = reply();
        let delta = ThreadDelta {
            status: Some(ThreadStatus::FollowupActive),
            current_stage: Some(1),
            stop_reason: None,
        };
        let nt = new_thread_for(&r, &delta);
        assert_eq!(nt.message_id, "m2@example.com");
        assert_eq!(nt.thread_id, "m1@example.com");
        assert_eq!(nt.status, ThreadStatus::FollowupActive);
        assert_eq!(nt.current_stage, 1);
    }

    #[test]
    fn new_thread_defaults_to_processing_with_no_stage_delta() {
        let r = reply();
        let nt = new_thread_for(&r, &ThreadDelta::default());
        assert_eq!(nt.status, ThreadStatus::Processing);
        assert_eq!(nt.current_stage, 0);
    }
}
