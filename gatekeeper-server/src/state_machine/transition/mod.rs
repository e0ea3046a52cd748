//! Pure state transition function.
//!
//! `transition` takes the current record and an event and returns the next
//! record plus the effects to execute. It performs no I/O; the caller decides
//! whether the record changed and persists it before running the effects.
//! Version and `updated_at` bookkeeping is left to the caller as well.

mod approved;
mod in_survey;
mod pending_review;
mod terminal;

use chrono::{DateTime, Utc};

use super::effect::{Effect, LogLevel};
use super::event::Event;
use super::state::{RequestRecord, RequestState};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionResult {
    pub record: RequestRecord,
    pub effects: Vec<Effect>,
}

impl TransitionResult {
    pub fn new(record: RequestRecord, effects: Vec<Effect>) -> Self {
        Self { record, effects }
    }

    pub fn no_change(record: RequestRecord) -> Self {
        Self {
            record,
            effects: vec![],
        }
    }
}

/// Pure state transition function.
pub fn transition(record: RequestRecord, event: Event, now: DateTime<Utc>) -> TransitionResult {
    match record.state {
        RequestState::InSurvey => in_survey::handle(record, event),
        RequestState::PendingReview => pending_review::handle(record, event, now),
        RequestState::Approved => approved::handle(record, event, now),
        RequestState::Rejected | RequestState::Closed => terminal::handle(record, event, now),
    }
}

/// Leave the record alone and note that the event did not apply.
fn ignored(record: RequestRecord, event: &Event) -> TransitionResult {
    let message = format!(
        "Ignoring {} for request {} in state {}",
        event.log_summary(),
        record.id,
        record.state
    );
    TransitionResult::new(
        record,
        vec![Effect::Log {
            level: LogLevel::Debug,
            message,
        }],
    )
}

fn log(level: LogLevel, message: String) -> Effect {
    Effect::Log { level, message }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state_machine::effect::{AdminNotice, UserNotice};
    use crate::state_machine::state::tests::{fixed_now, pending_record, questions};
    use crate::state_machine::state::{
        AdminIdentity, AdminRef, Decision, InviteHandle, RequesterId, RequesterProfile,
    };
    use proptest::prelude::*;

    fn fresh() -> RequestRecord {
        RequestRecord::new(
            RequesterId(1),
            RequesterProfile::default(),
            questions(),
            fixed_now(),
        )
    }

    fn admin() -> AdminIdentity {
        AdminIdentity {
            id: 7,
            name: Some("alice".to_string()),
        }
    }

    fn invite() -> InviteHandle {
        InviteHandle {
            link: "https://t.me/+one-time".to_string(),
            expires_at: None,
        }
    }

    fn answer(text: &str) -> Event {
        Event::AnswerSubmitted {
            text: text.to_string(),
        }
    }

    fn decide(decision: Decision, reason: Option<&str>) -> Event {
        Event::DecisionReceived {
            decision,
            decided_by: admin(),
            reason: reason.map(str::to_string),
        }
    }

    fn run(record: RequestRecord, event: Event) -> TransitionResult {
        transition(record, event, fixed_now())
    }

    fn approved() -> RequestRecord {
        run(pending_record(), decide(Decision::Approve, None)).record
    }

    #[test]
    fn test_survey_started_welcomes_and_asks_first_question() {
        let record = fresh();
        let result = run(record.clone(), Event::SurveyStarted);
        assert_eq!(result.record, record);
        assert_eq!(
            result.effects,
            vec![
                Effect::Reply {
                    notice: UserNotice::Welcome,
                },
                Effect::Reply {
                    notice: UserNotice::Question {
                        index: 0,
                        total: 3,
                        text: "What's your name?".to_string(),
                    }
                },
            ]
        );
    }

    #[test]
    fn test_answer_is_appended_and_next_question_asked() {
        let result = run(fresh(), answer("  Ada  "));
        assert_eq!(result.record.answers.len(), 1);
        assert_eq!(result.record.answers[0].text, "Ada");
        assert_eq!(result.record.state, RequestState::InSurvey);
        assert!(matches!(
            result.effects.as_slice(),
            [Effect::Reply {
                notice: UserNotice::Question { index: 1, .. }
            }]
        ));
    }

    #[test]
    fn test_final_answer_posts_summary() {
        let mut record = fresh();
        for text in ["a", "b"] {
            record = run(record, answer(text)).record;
        }
        let result = run(record, answer("c"));
        assert!(result.record.survey_complete());
        assert_eq!(result.record.state, RequestState::InSurvey);
        assert!(matches!(
            result.effects.as_slice(),
            [Effect::PostSummary {
                notify_requester: true,
                ..
            }]
        ));
    }

    #[test]
    fn test_answer_after_completion_is_ignored() {
        let mut record = fresh();
        for text in ["a", "b", "c"] {
            record = run(record, answer(text)).record;
        }
        let result = run(record.clone(), answer("extra"));
        assert_eq!(result.record, record);
    }

    #[test]
    fn test_summary_posted_moves_to_pending_review() {
        let mut record = fresh();
        for text in ["a", "b", "c"] {
            record = run(record, answer(text)).record;
        }
        let result = run(
            record,
            Event::SummaryPosted {
                admin_ref: AdminRef(55),
            },
        );
        assert_eq!(result.record.state, RequestState::PendingReview);
        assert_eq!(result.record.admin_ref, Some(AdminRef(55)));
        assert!(result.effects.contains(&Effect::Reply {
            notice: UserNotice::Submitted
        }));
    }

    #[test]
    fn test_summary_post_failure_keeps_survey_state() {
        let mut record = fresh();
        for text in ["a", "b", "c"] {
            record = run(record, answer(text)).record;
        }
        let result = run(
            record.clone(),
            Event::SummaryPostFailed {
                reason: "timeout".to_string(),
                notify_requester: false,
            },
        );
        assert_eq!(result.record, record);
        assert!(!result
            .effects
            .iter()
            .any(|e| matches!(e, Effect::Reply { .. })));
    }

    #[test]
    fn test_approve_records_decision_and_clears_actions() {
        let result = run(pending_record(), decide(Decision::Approve, Some("ignored")));
        assert_eq!(result.record.state, RequestState::Approved);
        let decision = result.record.decision.clone().unwrap();
        assert_eq!(decision.decided_by, admin());
        assert_eq!(decision.decided_at, fixed_now());
        assert_eq!(decision.reason, None);
        assert!(result.effects.contains(&Effect::ClearAdminActions {
            admin_ref: AdminRef(100)
        }));
        assert!(!result
            .effects
            .iter()
            .any(|e| matches!(e, Effect::NotifyRejection { .. })));
    }

    #[test]
    fn test_reject_notifies_requester_with_reason() {
        let result = run(pending_record(), decide(Decision::Reject, Some("spam")));
        assert_eq!(result.record.state, RequestState::Rejected);
        assert!(result.effects.contains(&Effect::NotifyRejection {
            reason: Some("spam".to_string())
        }));
        assert!(result.effects.iter().any(|e| matches!(
            e,
            Effect::NotifyAdmins {
                notice: AdminNotice::Decided {
                    outcome: Decision::Reject,
                    ..
                }
            }
        )));
    }

    #[test]
    fn test_rejection_notice_closes_request() {
        let rejected = run(pending_record(), decide(Decision::Reject, None)).record;
        let result = run(rejected, Event::RejectionNoticeFinished { delivered: false });
        assert_eq!(result.record.state, RequestState::Closed);
        assert_eq!(result.record.closed_at, Some(fixed_now()));
    }

    #[test]
    fn test_second_decision_is_ignored() {
        let approved = approved();
        let result = run(approved.clone(), decide(Decision::Reject, None));
        assert_eq!(result.record, approved);
    }

    #[test]
    fn test_issue_without_handle_creates_invite() {
        let result = run(
            approved(),
            Event::IssueRequested {
                report_failure: true,
            },
        );
        assert_eq!(
            result.effects,
            vec![Effect::CreateInvite {
                report_failure: true
            }]
        );
    }

    #[test]
    fn test_issue_with_handle_only_delivers() {
        let with_invite = run(approved(), Event::InviteCreated { invite: invite() }).record;
        let result = run(
            with_invite,
            Event::IssueRequested {
                report_failure: false,
            },
        );
        assert_eq!(result.effects, vec![Effect::DeliverInvite { invite: invite() }]);
    }

    #[test]
    fn test_expired_invite_is_revoked_and_replaced() {
        let dead = InviteHandle {
            link: "https://t.me/+dead".to_string(),
            expires_at: Some(fixed_now() - chrono::Duration::hours(1)),
        };
        let holding_dead = run(approved(), Event::InviteCreated { invite: dead.clone() }).record;

        let result = run(
            holding_dead.clone(),
            Event::IssueRequested {
                report_failure: true,
            },
        );
        assert_eq!(result.record, holding_dead);
        assert!(!result
            .effects
            .iter()
            .any(|e| matches!(e, Effect::DeliverInvite { .. })));
        assert!(result.effects.contains(&Effect::RevokeInvite { invite: dead }));
        assert!(result.effects.contains(&Effect::CreateInvite {
            report_failure: true
        }));

        let replaced = run(holding_dead.clone(), Event::InviteCreated { invite: invite() });
        assert_eq!(replaced.record.invite, Some(invite()));
        assert_eq!(replaced.record.state, RequestState::Approved);
        assert_eq!(holding_dead.validate_successor(&replaced.record), Ok(()));
        assert_eq!(
            replaced.effects,
            vec![Effect::DeliverInvite { invite: invite() }]
        );
    }

    #[test]
    fn test_live_invite_is_never_replaced() {
        let with_invite = run(approved(), Event::InviteCreated { invite: invite() }).record;
        let other = InviteHandle {
            link: "https://t.me/+other".to_string(),
            expires_at: None,
        };
        let result = run(with_invite.clone(), Event::InviteCreated { invite: other });
        assert_eq!(result.record.invite, with_invite.invite);
    }

    #[test]
    fn test_delivery_closes_request() {
        let with_invite = run(approved(), Event::InviteCreated { invite: invite() }).record;
        let result = run(with_invite, Event::InviteDelivered);
        assert_eq!(result.record.state, RequestState::Closed);
    }

    #[test]
    fn test_delivery_failure_keeps_approved() {
        let with_invite = run(approved(), Event::InviteCreated { invite: invite() }).record;
        let result = run(
            with_invite.clone(),
            Event::InviteDeliveryFailed {
                reason: "blocked".to_string(),
            },
        );
        assert_eq!(result.record, with_invite);
    }

    #[test]
    fn test_creation_failure_reports_only_when_asked() {
        let base = approved();
        let failed = |report_failure| {
            run(
                base.clone(),
                Event::InviteCreationFailed {
                    reason: "not enough rights".to_string(),
                    report_failure,
                },
            )
        };
        let reported = failed(true);
        assert!(reported
            .effects
            .iter()
            .any(|e| matches!(e, Effect::NotifyAdmins { .. })));
        assert_eq!(reported.record, base);

        let quiet = failed(false);
        assert!(!quiet
            .effects
            .iter()
            .any(|e| matches!(e, Effect::NotifyAdmins { .. })));
    }

    #[test]
    fn test_closed_ignores_everything() {
        let with_invite = run(approved(), Event::InviteCreated { invite: invite() }).record;
        let closed = run(with_invite, Event::InviteDelivered).record;
        let result = run(
            closed.clone(),
            Event::IssueRequested {
                report_failure: true,
            },
        );
        assert_eq!(result.record, closed);
        assert!(result
            .effects
            .iter()
            .all(|e| matches!(e, Effect::Log { .. })));
    }

    fn arb_event() -> impl Strategy<Value = Event> {
        prop_oneof![
            Just(Event::SurveyStarted),
            "[a-z ]{0,6}".prop_map(|text| Event::AnswerSubmitted { text }),
            any::<bool>().prop_map(|notify_requester| Event::SubmitForReview { notify_requester }),
            (1i64..4).prop_map(|r| Event::SummaryPosted {
                admin_ref: AdminRef(r)
            }),
            Just(Event::SummaryPostFailed {
                reason: "x".to_string(),
                notify_requester: true
            }),
            prop::bool::ANY.prop_map(|approve| Event::DecisionReceived {
                decision: if approve {
                    Decision::Approve
                } else {
                    Decision::Reject
                },
                decided_by: AdminIdentity { id: 1, name: None },
                reason: None,
            }),
            Just(Event::RejectionResumed),
            any::<bool>().prop_map(|delivered| Event::RejectionNoticeFinished { delivered }),
            Just(Event::IssueRequested {
                report_failure: true
            }),
            Just(Event::InviteCreated { invite: invite() }),
            Just(Event::InviteCreationFailed {
                reason: "x".to_string(),
                report_failure: false
            }),
            Just(Event::InviteDelivered),
            Just(Event::InviteDeliveryFailed {
                reason: "x".to_string()
            }),
        ]
    }

    proptest! {
        /// Property: every record the transition function produces is a legal
        /// successor of the one it started from.
        #[test]
        fn transitions_only_produce_legal_successors(events in prop::collection::vec(arb_event(), 0..40)) {
            let mut current = fresh();
            for event in events {
                let TransitionResult { record, .. } = run(current.clone(), event);
                if record != current {
                    prop_assert_eq!(current.validate_successor(&record), Ok(()));
                    current = record;
                }
            }
        }

        /// Property: answers never exceed the question count.
        #[test]
        fn answers_bounded_by_questions(texts in prop::collection::vec("[a-z]{1,4}", 0..10)) {
            let mut current = fresh();
            for text in texts {
                current = run(current, Event::AnswerSubmitted { text }).record;
            }
            prop_assert!(current.answers.len() <= current.questions.len());
        }
    }
}
