//! PendingReview state transitions.

use chrono::{DateTime, Utc};

use super::{ignored, log, TransitionResult};
use crate::state_machine::effect::{AdminNotice, Effect, LogLevel};
use crate::state_machine::event::Event;
use crate::state_machine::state::{Decision, DecisionRecord, RequestRecord};

pub fn handle(record: RequestRecord, event: Event, now: DateTime<Utc>) -> TransitionResult {
    match event {
        Event::DecisionReceived {
            decision,
            decided_by,
            reason,
        } => {
            // Approvals carry no reason.
            let reason = match decision {
                Decision::Approve => None,
                Decision::Reject => reason.filter(|r| !r.trim().is_empty()),
            };

            let mut effects = Vec::new();
            if let Some(admin_ref) = record.admin_ref {
                effects.push(Effect::ClearAdminActions { admin_ref });
            }
            effects.push(Effect::NotifyAdmins {
                notice: AdminNotice::Decided {
                    requester_label: record.label(),
                    outcome: decision,
                    decided_by: decided_by.clone(),
                    reason: reason.clone(),
                },
            });
            if decision == Decision::Reject {
                effects.push(Effect::NotifyRejection {
                    reason: reason.clone(),
                });
            }
            effects.push(log(
                LogLevel::Info,
                format!(
                    "Request {} from {}: {} by admin {}",
                    record.id, record.requester, decision, decided_by.id
                ),
            ));

            let mut next = record;
            next.state = decision.target_state();
            next.decision = Some(DecisionRecord {
                outcome: decision,
                decided_by,
                decided_at: now,
                reason,
            });
            TransitionResult::new(next, effects)
        }

        other => ignored(record, &other),
    }
}
