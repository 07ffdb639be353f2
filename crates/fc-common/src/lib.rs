//! Shared domain types for the outreach follow-up engine.
//!
//! These types are the vocabulary every other crate in the workspace talks
//! in: the durable [`Thread`] record and its append-only children, the
//! [`Analysis`] contract the Analyzer returns, and the small enums that
//! drive the decision state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub mod logging;

// ============================================================================
// Thread status / stage model
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ThreadStatus {
    Processing,
    FollowupActive,
    Delegated,
    Completed,
    Error,
}

impl ThreadStatus {
    /// Terminal statuses never transition again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ThreadStatus::Completed | ThreadStatus::Delegated | ThreadStatus::Error)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StopReason {
    NotInterested,
    ContinueOverEmail,
    ContactProvided,
    CreatorReplied,
    ClarificationNeeded,
    UnknownIntent,
    MaxSendFailures,
}

/// One of the three follow-up stages. 0 means "no stage scheduled yet".
pub type Stage = u8;

pub const MAX_STAGE: Stage = 3;
pub const MAX_FAILED_SENDS: i32 = 3;

/// The durable per-thread record, keyed by `message_id` — the provider's
/// stable id for the first observed reply in the thread.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Thread {
    pub id: i64,
    pub message_id: String,
    pub thread_id: String,
    pub account_email: String,
    pub creator_email: String,
    pub subject: String,
    pub status: ThreadStatus,
    pub current_stage: Stage,
    pub followups_sent: i32,
    pub failed_sends: i32,
    pub stop_reason: Option<StopReason>,
    pub next_followup_at: Option<DateTime<Utc>>,
    pub last_followup_sent_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Thread {
    /// FOLLOWUP_ACTIVE iff no stop reason, fewer than the max failed sends,
    /// and at least stage 1 has been scheduled.
    pub fn is_followup_eligible(&self) -> bool {
        self.status == ThreadStatus::FollowupActive
            && self.stop_reason.is_none()
            && self.failed_sends < MAX_FAILED_SENDS
            && self.current_stage >= 1
    }
}

/// Fields used to create a brand-new Thread row.
#[derive(Debug, Clone)]
pub struct NewThread {
    pub message_id: String,
    pub thread_id: String,
    pub account_email: String,
    pub creator_email: String,
    pub subject: String,
    pub status: ThreadStatus,
    pub current_stage: Stage,
    pub stop_reason: Option<StopReason>,
}

/// Partial update applied to a Thread by the decision router's state delta.
#[derive(Debug, Clone, Default)]
pub struct ThreadDelta {
    pub status: Option<ThreadStatus>,
    pub current_stage: Option<Stage>,
    pub stop_reason: Option<StopReason>,
}

// ============================================================================
// Reply / analysis
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Intent {
    Interested,
    NotInterested,
    Clarification,
    ContactProvided,
    ContinueOverEmail,
    Unclear,
}

/// The Analyzer's verdict on a single reply body. Anything the Analyzer
/// returns outside the `Intent` enum collapses to `Unclear` before it ever
/// reaches this struct.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Analysis {
    pub intent: Intent,
    pub has_phone: bool,
    pub has_address: bool,
    pub phone_numbers: Vec<String>,
    pub address_text: Option<String>,
}

impl Analysis {
    pub fn unclear() -> Self {
        Self {
            intent: Intent::Unclear,
            has_phone: false,
            has_address: false,
            phone_numbers: Vec::new(),
            address_text: None,
        }
    }
}

/// An inbound message accepted into the pipeline.
#[derive(Debug, Clone)]
pub struct InboundReply {
    pub message_id: String,
    pub thread_id: String,
    pub account_email: String,
    pub creator_email: String,
    pub subject: String,
    pub body: String,
    pub received_at: DateTime<Utc>,
    /// IMAP UID of the fetched message, so the pipeline can flag it
    /// read/unread after the decision is made.
    pub imap_uid: u32,
    /// Set when this message threads to a follow-up stage we sent (1/2/3);
    /// None when this is the first observed reply in the thread.
    pub reply_to_stage: Option<Stage>,
}

// ============================================================================
// Append-only children
// ============================================================================

/// Fields needed to append one Reply row, child of the Thread the reply
/// belongs to.
#[derive(Debug, Clone)]
pub struct ReplyInput {
    pub thread_id: i64,
    pub message_id: String,
    pub received_at: DateTime<Utc>,
    /// Null for the first reply that created the thread; 1/2/3 when this
    /// reply arrived while that stage's follow-up was outstanding.
    pub reply_to_stage: Option<Stage>,
    pub subject: String,
    pub body: String,
    pub analysis: Analysis,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FollowupSend {
    pub id: i64,
    pub thread_id: i64,
    pub stage: Stage,
    pub sent_at: DateTime<Utc>,
    pub template: String,
    pub success: bool,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageTransition {
    pub id: i64,
    pub thread_id: i64,
    pub from_stage: Stage,
    pub to_stage: Stage,
    pub from_status: ThreadStatus,
    pub to_status: ThreadStatus,
    pub reason: String,
    pub triggering_reply_message_id: Option<String>,
}

// ============================================================================
// Decision router output
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    SendStage1Followup,
    DelegateToHuman,
    MarkComplete,
    Skip,
}

#[derive(Debug, Clone)]
pub struct Decision {
    pub action: Action,
    pub reason: &'static str,
    pub delta: ThreadDelta,
}

// ============================================================================
// Follow-up copy — static, not generated
// ============================================================================

pub const STAGE_1_TEMPLATE: &str =
    "Could you share your WhatsApp contact and address with me? I will ask my team to connect with you immediately.";
pub const STAGE_2_TEMPLATE: &str =
    "Just checking in — can you please share your WhatsApp contact so we can connect quickly?";
pub const STAGE_3_TEMPLATE: &str =
    "Wanted to follow up again — we'd love to take this forward but just need your WhatsApp number to coordinate better.";

pub fn template_for_stage(stage: Stage) -> &'static str {
    match stage {
        1 => STAGE_1_TEMPLATE,
        2 => STAGE_2_TEMPLATE,
        3 => STAGE_3_TEMPLATE,
        _ => STAGE_3_TEMPLATE,
    }
}

/// Delay before the *next* stage fires, keyed by the stage that was just sent.
pub fn next_stage_delay(sent_stage: Stage) -> Option<(Stage, chrono::Duration)> {
    match sent_stage {
        1 => Some((2, chrono::Duration::hours(24))),
        2 => Some((3, chrono::Duration::hours(48))),
        _ => None,
    }
}

// ============================================================================
// Training-data capture boundary (write-only, external)
// ============================================================================

/// Write-only capture of (reply, analysis) pairs for offline training data.
/// The real implementation is an external collaborator; the engine only
/// needs somewhere to call into. A no-op sink is the default so the
/// pipeline never depends on one being wired up.
pub trait TrainingDataSink: Send + Sync {
    fn record(&self, reply: &InboundReply, analysis: &Analysis);
}

pub struct NullTrainingDataSink;

impl TrainingDataSink for NullTrainingDataSink {
    fn record(&self, _reply: &InboundReply, _analysis: &Analysis) {}
}

// ============================================================================
// Error taxonomy
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("store error: {0}")]
    Store(String),

    #[error("cache error: {0}")]
    Cache(String),

    #[error("mailbox error: {0}")]
    Mailbox(String),

    #[error("analyzer unavailable: {0}")]
    AnalyzerUnavailable(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("shutdown in progress")]
    ShutdownInProgress,
}

pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_statuses() {
        assert!(ThreadStatus::Completed.is_terminal());
        assert!(ThreadStatus::Delegated.is_terminal());
        assert!(ThreadStatus::Error.is_terminal());
        assert!(!ThreadStatus::FollowupActive.is_terminal());
        assert!(!ThreadStatus::Processing.is_terminal());
    }

    #[test]
    fn followup_eligibility_requires_active_stage_and_no_stop_reason() {
        let mut t = sample_thread();
        assert!(t.is_followup_eligible());

        t.stop_reason = Some(StopReason::NotInterested);
        assert!(!t.is_followup_eligible());
        t.stop_reason = None;

        t.failed_sends = MAX_FAILED_SENDS;
        assert!(!t.is_followup_eligible());
        t.failed_sends = 0;

        t.current_stage = 0;
        assert!(!t.is_followup_eligible());
    }

    #[test]
    fn next_stage_delay_schedule() {
        assert_eq!(next_stage_delay(1), Some((2, chrono::Duration::hours(24))));
        assert_eq!(next_stage_delay(2), Some((3, chrono::Duration::hours(48))));
        assert_eq!(next_stage_delay(3), None);
    }

    fn sample_thread() -> Thread {
        let now = Utc::now();
        Thread {
            id: 1,
            message_id: "m1".into(),
            thread_id: "t1".into(),
            account_email: "acct@example.com".into(),
            creator_email: "creator@example.com".into(),
            subject: "Re: outreach".into(),
            status: ThreadStatus::FollowupActive,
            current_stage: 1,
            followups_sent: 1,
            failed_sends: 0,
            stop_reason: None,
            next_followup_at: Some(now),
            last_followup_sent_at: Some(now),
            created_at: now,
            updated_at: now,
        }
    }
}
