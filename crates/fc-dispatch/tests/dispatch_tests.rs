//! Dispatcher behavior against a real (in-memory) `SqliteThreadStore` and
//! fakes for the Redis/IMAP boundaries, so these run without any external
//! service.

use async_trait::async_trait;
use fc_common::{NewThread, Stage, StopReason, ThreadStatus};
use fc_dispatch::{DedupCheck, DispatchOutcome, Dispatcher, MailboxLookup, Result, ScheduleWriter};
use fc_mailbox::MailboxClient;
use fc_store::sqlite::SqliteThreadStore;
use fc_store::ThreadStore;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

struct AlwaysClaim;

#[async_trait]
impl DedupCheck for AlwaysClaim {
    async fn try_claim(&self, _message_id: &str, _stage: Stage) -> Result<bool> {
        Ok(true)
    }
}

struct NeverClaim;

#[async_trait]
impl DedupCheck for NeverClaim {
    async fn try_claim(&self, _message_id: &str, _stage: Stage) -> Result<bool> {
        Ok(false)
    }
}

#[derive(Default)]
struct RecordingSchedule {
    added: Mutex<Vec<(i64, Stage)>>,
    removed: Mutex<Vec<i64>>,
}

#[async_trait]
impl ScheduleWriter for RecordingSchedule {
    async fn add(&self, thread_id: i64, stage: Stage, _at: chrono::DateTime<chrono::Utc>) -> Result<()> {
        self.added.lock().unwrap().push((thread_id, stage));
        Ok(())
    }

    async fn remove(&self, thread_id: i64) -> Result<()> {
        self.removed.lock().unwrap().push(thread_id);
        Ok(())
    }
}

struct FakeMailbox {
    fail: AtomicBool,
    sends: AtomicU32,
}

#[async_trait]
impl MailboxClient for FakeMailbox {
    async fn fetch_unseen(&self, _since_days: u32) -> fc_mailbox::Result<Vec<fc_mailbox::FetchedMessage>> {
        unimplemented!("not exercised by dispatch tests")
    }

    async fn mark_read(&self, _imap_uid: u32) -> fc_mailbox::Result<()> {
        Ok(())
    }

    async fn mark_unread(&self, _imap_uid: u32) -> fc_mailbox::Result<()> {
        Ok(())
    }

    async fn send_reply(
        &self,
        _to_email: &str,
        _subject: &str,
        _body: &str,
        _in_reply_to_message_id: &str,
    ) -> fc_mailbox::Result<()> {
        self.sends.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            Err(fc_mailbox::MailboxError::Send("smtp outage".into()))
        } else {
            Ok(())
        }
    }
}

struct SingleAccountLookup {
    client: Arc<FakeMailbox>,
}

impl MailboxLookup for SingleAccountLookup {
    fn client_for(&self, _account_email: &str) -> Result<Arc<dyn MailboxClient>> {
        Ok(self.client.clone())
    }
}

async fn in_memory_store() -> Arc<SqliteThreadStore> {
    let pool = sqlx::SqlitePool::connect("sqlite::memory:").await.unwrap();
    let store = SqliteThreadStore::new(pool);
    store.init_schema().await.unwrap();
    Arc::new(store)
}

async fn followup_active_thread(store: &SqliteThreadStore, stage: Stage, followups_sent: i32) -> fc_common::Thread {
    let thread = store
        .insert_thread(NewThread {
            message_id: "m1@example.com".into(),
            thread_id: "m1@example.com".into(),
            account_email: "acct@example.com".into(),
            creator_email: "creator@example.com".into(),
            subject: "outreach".into(),
            status: ThreadStatus::FollowupActive,
            current_stage: stage,
            stop_reason: None,
        })
        .await
        .unwrap();

    if followups_sent > 0 {
        store
            .record_followup_sent(
                thread.id,
                fc_store::FollowupSendRecord {
                    stage,
                    template: "seed".into(),
                    success: true,
                    error: None,
                },
                None,
            )
            .await
            .unwrap();
    }

    store.get_by_id(thread.id).await.unwrap().unwrap()
}

#[tokio::test]
async fn successful_dispatch_advances_stage_and_schedules_next() {
    let store = in_memory_store().await;
    let thread = followup_active_thread(&store, 1, 0).await;

    let mailbox = Arc::new(FakeMailbox {
        fail: AtomicBool::new(false),
        sends: AtomicU32::new(0),
    });
    let schedule = Arc::new(RecordingSchedule::default());
    let dispatcher = Dispatcher::new(
        store.clone(),
        Arc::new(AlwaysClaim),
        schedule.clone(),
        Arc::new(SingleAccountLookup { client: mailbox.clone() }),
    );

    let outcome = dispatcher.dispatch(thread.id, 1).await.unwrap();
    assert_eq!(outcome, DispatchOutcome::Sent);
    assert_eq!(mailbox.sends.load(Ordering::SeqCst), 1);

    let updated = store.get_by_id(thread.id).await.unwrap().unwrap();
    assert_eq!(updated.current_stage, 1);
    assert_eq!(updated.followups_sent, 1);
    assert_eq!(schedule.added.lock().unwrap().as_slice(), &[(thread.id, 2)]);
}

#[tokio::test]
async fn stage_three_success_clears_schedule_instead_of_adding() {
    let store = in_memory_store().await;
    let thread = followup_active_thread(&store, 3, 2).await;

    let mailbox = Arc::new(FakeMailbox {
        fail: AtomicBool::new(false),
        sends: AtomicU32::new(0),
    });
    let schedule = Arc::new(RecordingSchedule::default());
    let dispatcher = Dispatcher::new(
        store.clone(),
        Arc::new(AlwaysClaim),
        schedule.clone(),
        Arc::new(SingleAccountLookup { client: mailbox }),
    );

    let outcome = dispatcher.dispatch(thread.id, 3).await.unwrap();
    assert_eq!(outcome, DispatchOutcome::Sent);
    assert!(schedule.added.lock().unwrap().is_empty());
    assert_eq!(schedule.removed.lock().unwrap().as_slice(), &[thread.id]);
}

#[tokio::test]
async fn dedup_key_already_claimed_skips_before_sending() {
    let store = in_memory_store().await;
    let thread = followup_active_thread(&store, 1, 0).await;

    let mailbox = Arc::new(FakeMailbox {
        fail: AtomicBool::new(false),
        sends: AtomicU32::new(0),
    });
    let dispatcher = Dispatcher::new(
        store.clone(),
        Arc::new(NeverClaim),
        Arc::new(RecordingSchedule::default()),
        Arc::new(SingleAccountLookup { client: mailbox.clone() }),
    );

    let outcome = dispatcher.dispatch(thread.id, 1).await.unwrap();
    assert_eq!(outcome, DispatchOutcome::Skipped);
    assert_eq!(mailbox.sends.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn already_sent_stage_is_skipped() {
    let store = in_memory_store().await;
    // followups_sent already 1, stage 1 requested again (e.g. a stale ScheduleIndex entry).
    let thread = followup_active_thread(&store, 1, 1).await;

    let mailbox = Arc::new(FakeMailbox {
        fail: AtomicBool::new(false),
        sends: AtomicU32::new(0),
    });
    let dispatcher = Dispatcher::new(
        store.clone(),
        Arc::new(AlwaysClaim),
        Arc::new(RecordingSchedule::default()),
        Arc::new(SingleAccountLookup { client: mailbox.clone() }),
    );

    let outcome = dispatcher.dispatch(thread.id, 1).await.unwrap();
    assert_eq!(outcome, DispatchOutcome::Skipped);
    assert_eq!(mailbox.sends.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn third_consecutive_failure_moves_thread_to_error() {
    let store = in_memory_store().await;
    let thread = followup_active_thread(&store, 2, 1).await;

    let mailbox = Arc::new(FakeMailbox {
        fail: AtomicBool::new(true),
        sends: AtomicU32::new(0),
    });
    let schedule = Arc::new(RecordingSchedule::default());
    let dispatcher = Dispatcher::new(
        store.clone(),
        Arc::new(AlwaysClaim),
        schedule.clone(),
        Arc::new(SingleAccountLookup { client: mailbox.clone() }),
    );

    // Two prior failures already on the thread; this dispatch is the third.
    store.increment_failed_sends(thread.id).await.unwrap();
    store.increment_failed_sends(thread.id).await.unwrap();

    let outcome = dispatcher.dispatch(thread.id, 2).await.unwrap();
    assert_eq!(outcome, DispatchOutcome::Failed);

    let updated = store.get_by_id(thread.id).await.unwrap().unwrap();
    assert_eq!(updated.failed_sends, 3);
    assert_eq!(updated.status, ThreadStatus::Error);
    assert_eq!(updated.stop_reason, Some(StopReason::MaxSendFailures));
    assert_eq!(schedule.removed.lock().unwrap().as_slice(), &[thread.id]);
    // 1 attempt per dispatch call — auth/backoff retries only kick in on transport errors within a single attempt chain.
    assert_eq!(mailbox.sends.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn authentication_failure_does_not_retry() {
    let store = in_memory_store().await;
    let thread = followup_active_thread(&store, 1, 0).await;

    struct AuthFailMailbox {
        sends: AtomicU32,
    }

    #[async_trait]
    impl MailboxClient for AuthFailMailbox {
        async fn fetch_unseen(&self, _since_days: u32) -> fc_mailbox::Result<Vec<fc_mailbox::FetchedMessage>> {
            unimplemented!()
        }
        async fn mark_read(&self, _imap_uid: u32) -> fc_mailbox::Result<()> {
            Ok(())
        }
        async fn mark_unread(&self, _imap_uid: u32) -> fc_mailbox::Result<()> {
            Ok(())
        }
        async fn send_reply(
            &self,
            _to_email: &str,
            _subject: &str,
            _body: &str,
            _in_reply_to_message_id: &str,
        ) -> fc_mailbox::Result<()> {
            self.sends.fetch_add(1, Ordering::SeqCst);
            Err(fc_mailbox::MailboxError::Authentication("bad creds".into()))
        }
    }

    let mailbox = Arc::new(AuthFailMailbox { sends: AtomicU32::new(0) });
    let dispatcher = Dispatcher::new(
        store.clone(),
        Arc::new(AlwaysClaim),
        Arc::new(RecordingSchedule::default()),
        Arc::new(SingleAccountLookup { client: mailbox.clone() }),
    );

    let outcome = dispatcher.dispatch(thread.id, 1).await.unwrap();
    assert_eq!(outcome, DispatchOutcome::Failed);
    assert_eq!(mailbox.sends.load(Ordering::SeqCst), 1);
}
