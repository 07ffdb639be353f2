//! The decision table: given a reply's analysis and whatever thread state
//! already exists for its conversation, decide what happens next. Pure,
//! deterministic, no I/O — the caller is responsible for persisting the
//! state delta and executing the side effects the action implies.

use fc_common::{Action, Analysis, Decision, Intent, Thread, ThreadDelta, ThreadStatus};

/// `existing` should be the Thread already on file for this reply's
/// conversation (looked up by `thread_id`, not by the reply's own
/// `message_id` — a reply always carries a fresh message id, so matching on
/// it would never find a prior Thread; the router's "existing thread"
/// branch only makes sense against the conversation anchor).
pub fn decide(analysis: &Analysis, existing: Option<&Thread>) -> Decision {
    let has_contact = analysis.has_phone || analysis.has_address;

    if existing.is_some() {
        if analysis.intent == Intent::ContinueOverEmail {
            // R0
            return Decision {
                action: Action::MarkComplete,
                reason: "R0: existing thread, creator wants to continue over email",
                delta: ThreadDelta {
                    status: Some(ThreadStatus::Completed),
                    current_stage: None,
                    stop_reason: Some(fc_common::StopReason::ContinueOverEmail),
                },
            };
        }
        // R1
        return Decision {
            action: Action::DelegateToHuman,
            reason: "R1: existing thread, creator replied again",
            delta: ThreadDelta {
                status: Some(ThreadStatus::Delegated),
                current_stage: None,
                stop_reason: Some(fc_common::StopReason::CreatorReplied),
            },
        };
    }

    match analysis.intent {
        Intent::NotInterested => Decision {
            // R2
            action: Action::MarkComplete,
            reason: "R2: not interested",
            delta: ThreadDelta {
                status: Some(ThreadStatus::Completed),
                current_stage: None,
                stop_reason: Some(fc_common::StopReason::NotInterested),
            },
        },
        Intent::ContinueOverEmail => Decision {
            // R3
            action: Action::MarkComplete,
            reason: "R3: wants to continue over email",
            delta: ThreadDelta {
                status: Some(ThreadStatus::Completed),
                current_stage: None,
                stop_reason: Some(fc_common::StopReason::ContinueOverEmail),
            },
        },
        Intent::ContactProvided => contact_provided_decision(),
        _ if has_contact => contact_provided_decision(),
        Intent::Interested => Decision {
            // R5
            action: Action::SendStage1Followup,
            reason: "R5: interested, no contact info yet",
            delta: ThreadDelta {
                status: Some(ThreadStatus::FollowupActive),
                current_stage: Some(1),
                stop_reason: None,
            },
        },
        Intent::Clarification => Decision {
            // R6
            action: Action::DelegateToHuman,
            reason: "R6: clarification requested",
            delta: ThreadDelta {
                status: Some(ThreadStatus::Delegated),
                current_stage: None,
                stop_reason: Some(fc_common::StopReason::ClarificationNeeded),
            },
        },
        Intent::Unclear => Decision {
            // R7
            action: Action::DelegateToHuman,
            reason: "R7: intent could not be classified",
            delta: ThreadDelta {
                status: Some(ThreadStatus::Delegated),
                current_stage: None,
                stop_reason: Some(fc_common::StopReason::UnknownIntent),
            },
        },
    }
}

fn contact_provided_decision() -> Decision {
    // R4
    Decision {
        action: Action::DelegateToHuman,
        reason: "R4: contact info present",
        delta: ThreadDelta {
            status: Some(ThreadStatus::Delegated),
            current_stage: None,
            stop_reason: Some(fc_common::StopReason::ContactProvided),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use fc_common::StopReason;

    fn thread_with(status: ThreadStatus) -> Thread {
        let now = Utc::now();
        Thread {
            id: 1,
            message_id: "m1".into(),
            thread_id: "t1".into(),
            account_email: "acct@example.com".into(),
            creator_email: "creator@example.com".into(),
            subject: "Re: outreach".into(),
            status,
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

    fn analysis(intent: Intent) -> Analysis {
        Analysis {
            intent,
            has_phone: false,
            has_address: false,
            phone_numbers: Vec::new(),
            address_text: None,
        }
    }

    #[test]
    fn r0_existing_thread_continue_over_email_marks_complete() {
        let thread = thread_with(ThreadStatus::FollowupActive);
        let decision = decide(&analysis(Intent::ContinueOverEmail), Some(&thread));
        assert_eq!(decision.action, Action::MarkComplete);
        assert_eq!(decision.delta.stop_reason, Some(StopReason::ContinueOverEmail));
        assert_eq!(decision.delta.status, Some(ThreadStatus::Completed));
    }

    #[test]
    fn r1_existing_thread_other_intent_delegates_with_creator_replied() {
        let thread = thread_with(ThreadStatus::FollowupActive);
        let decision = decide(&analysis(Intent::Clarification), Some(&thread));
        assert_eq!(decision.action, Action::DelegateToHuman);
        assert_eq!(decision.delta.stop_reason, Some(StopReason::CreatorReplied));
    }

    #[test]
    fn r2_not_interested_marks_complete() {
        let decision = decide(&analysis(Intent::NotInterested), None);
        assert_eq!(decision.action, Action::MarkComplete);
        assert_eq!(decision.delta.stop_reason, Some(StopReason::NotInterested));
    }

    #[test]
    fn r3_continue_over_email_without_existing_thread_marks_complete() {
        let decision = decide(&analysis(Intent::ContinueOverEmail), None);
        assert_eq!(decision.action, Action::MarkComplete);
        assert_eq!(decision.delta.stop_reason, Some(StopReason::ContinueOverEmail));
    }

    #[test]
    fn r4_contact_provided_intent_delegates() {
        let decision = decide(&analysis(Intent::ContactProvided), None);
        assert_eq!(decision.action, Action::DelegateToHuman);
        assert_eq!(decision.delta.stop_reason, Some(StopReason::ContactProvided));
    }

    #[test]
    fn r4_interested_with_phone_signal_still_delegates() {
        let mut a = analysis(Intent::Interested);
        a.has_phone = true;
        let decision = decide(&a, None);
        assert_eq!(decision.action, Action::DelegateToHuman);
        assert_eq!(decision.delta.stop_reason, Some(StopReason::ContactProvided));
    }

    #[test]
    fn r4_interested_with_address_signal_still_delegates() {
        let mut a = analysis(Intent::Interested);
        a.has_address = true;
        let decision = decide(&a, None);
        assert_eq!(decision.action, Action::DelegateToHuman);
    }

    #[test]
    fn r5_interested_without_contact_sends_stage_1() {
        let decision = decide(&analysis(Intent::Interested), None);
        assert_eq!(decision.action, Action::SendStage1Followup);
        assert_eq!(decision.delta.status, Some(ThreadStatus::FollowupActive));
        assert_eq!(decision.delta.current_stage, Some(1));
        assert_eq!(decision.delta.stop_reason, None);
    }

    #[test]
    fn r6_clarification_delegates() {
        let decision = decide(&analysis(Intent::Clarification), None);
        assert_eq!(decision.action, Action::DelegateToHuman);
        assert_eq!(decision.delta.stop_reason, Some(StopReason::ClarificationNeeded));
    }

    #[test]
    fn r7_unclear_delegates_as_fallback() {
        let decision = decide(&analysis(Intent::Unclear), None);
        assert_eq!(decision.action, Action::DelegateToHuman);
        assert_eq!(decision.delta.stop_reason, Some(StopReason::UnknownIntent));
    }
}
