//! InSurvey state transitions.
//!
//! Answers are appended one at a time. Once the last one is in, the summary
//! is posted; the record only leaves `InSurvey` when the post succeeded and
//! an admin reference exists.

use super::{ignored, log, TransitionResult};
use crate::state_machine::effect::{Effect, LogLevel, ReviewSummary, UserNotice};
use crate::state_machine::event::Event;
use crate::state_machine::state::{RequestRecord, RequestState, SurveyAnswer};

pub fn handle(record: RequestRecord, event: Event) -> TransitionResult {
    match event {
        Event::SurveyStarted => {
            let mut effects = vec![Effect::Reply {
                notice: UserNotice::Welcome,
            }];
            effects.push(match ask_next(&record) {
                Some(question) => question,
                None => post_summary(&record, true),
            });
            TransitionResult::new(record, effects)
        }

        Event::AnswerSubmitted { ref text } => {
            let text = text.trim();
            if text.is_empty() || record.next_question_index().is_none() {
                return ignored(record, &event);
            }

            let mut next = record;
            next.answers.push(SurveyAnswer {
                question_index: next.answers.len(),
                text: text.to_string(),
            });
            let effects = match ask_next(&next) {
                Some(question) => vec![question],
                None => vec![post_summary(&next, true)],
            };
            TransitionResult::new(next, effects)
        }

        Event::SubmitForReview { notify_requester } if record.survey_complete() => {
            let effects = vec![post_summary(&record, notify_requester)];
            TransitionResult::new(record, effects)
        }

        Event::SummaryPosted { admin_ref } if record.survey_complete() => {
            let message = format!(
                "Request {} from {} submitted for review as admin message {}",
                record.id, record.requester, admin_ref
            );
            let mut next = record;
            next.state = RequestState::PendingReview;
            next.admin_ref = Some(admin_ref);
            TransitionResult::new(
                next,
                vec![
                    Effect::Reply {
                        notice: UserNotice::Submitted,
                    },
                    log(LogLevel::Info, message),
                ],
            )
        }

        Event::SummaryPostFailed {
            reason,
            notify_requester,
        } => {
            let mut effects = vec![log(
                LogLevel::Warn,
                format!(
                    "Posting summary for request {} failed, will retry: {}",
                    record.id, reason
                ),
            )];
            if notify_requester {
                effects.push(Effect::Reply {
                    notice: UserNotice::TryAgainLater,
                });
            }
            TransitionResult::new(record, effects)
        }

        other => ignored(record, &other),
    }
}

fn ask_next(record: &RequestRecord) -> Option<Effect> {
    let index = record.next_question_index()?;
    Some(Effect::Reply {
        notice: UserNotice::Question {
            index,
            total: record.questions.len(),
            text: record.questions[index].clone(),
        },
    })
}

fn post_summary(record: &RequestRecord, notify_requester: bool) -> Effect {
    Effect::PostSummary {
        summary: ReviewSummary::from_record(record),
        notify_requester,
    }
}
