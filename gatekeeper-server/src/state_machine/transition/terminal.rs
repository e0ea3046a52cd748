//! Rejected and Closed state transitions.
//!
//! A rejected request closes once the notice has been attempted. Closed is
//! terminal.

use chrono::{DateTime, Utc};

use super::{ignored, log, TransitionResult};
use crate::state_machine::effect::{Effect, LogLevel};
use crate::state_machine::event::Event;
use crate::state_machine::state::{RequestRecord, RequestState};

pub fn handle(record: RequestRecord, event: Event, now: DateTime<Utc>) -> TransitionResult {
    match (record.state, event) {
        (RequestState::Rejected, Event::RejectionResumed) => {
            let reason = record.decision.as_ref().and_then(|d| d.reason.clone());
            TransitionResult::new(record, vec![Effect::NotifyRejection { reason }])
        }

        (RequestState::Rejected, Event::RejectionNoticeFinished { delivered }) => {
            let effect = if delivered {
                log(
                    LogLevel::Info,
                    format!("Request {} rejected and closed", record.id),
                )
            } else {
                log(
                    LogLevel::Warn,
                    format!(
                        "Rejection notice for request {} could not be delivered; closing anyway",
                        record.id
                    ),
                )
            };
            let mut next = record;
            next.state = RequestState::Closed;
            next.closed_at = Some(now);
            TransitionResult::new(next, vec![effect])
        }

        (_, other) => ignored(record, &other),
    }
}
