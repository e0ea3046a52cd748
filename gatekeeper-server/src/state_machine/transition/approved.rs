//! Approved state transitions.
//!
//! An approved request holds at most one live invite. A stored handle is
//! re-delivered on every further issue attempt until it expires; an expired
//! one is revoked and replaced.

use chrono::{DateTime, Utc};

use super::{ignored, log, TransitionResult};
use crate::state_machine::effect::{AdminNotice, Effect, LogLevel};
use crate::state_machine::event::Event;
use crate::state_machine::state::{RequestRecord, RequestState};

pub fn handle(record: RequestRecord, event: Event, now: DateTime<Utc>) -> TransitionResult {
    match event {
        Event::IssueRequested { report_failure } => {
            let effects = match &record.invite {
                Some(invite) if invite.is_expired(now) => vec![
                    log(
                        LogLevel::Info,
                        format!(
                            "Invite for request {} expired undelivered; replacing it",
                            record.id
                        ),
                    ),
                    Effect::RevokeInvite {
                        invite: invite.clone(),
                    },
                    Effect::CreateInvite { report_failure },
                ],
                Some(invite) => vec![Effect::DeliverInvite {
                    invite: invite.clone(),
                }],
                None => vec![Effect::CreateInvite { report_failure }],
            };
            TransitionResult::new(record, effects)
        }

        Event::InviteCreated { invite }
            if record.invite.as_ref().map_or(true, |i| i.is_expired(now)) =>
        {
            let mut next = record;
            next.invite = Some(invite.clone());
            TransitionResult::new(next, vec![Effect::DeliverInvite { invite }])
        }

        Event::InviteCreationFailed {
            reason,
            report_failure,
        } => {
            let mut effects = vec![log(
                LogLevel::Warn,
                format!(
                    "Creating invite for request {} failed: {}",
                    record.id, reason
                ),
            )];
            if report_failure {
                effects.push(Effect::NotifyAdmins {
                    notice: AdminNotice::InviteFailed {
                        requester_label: record.label(),
                        reason,
                    },
                });
            }
            TransitionResult::new(record, effects)
        }

        Event::InviteDelivered if record.invite.is_some() => {
            let message = format!(
                "Invite delivered to {}; request {} closed",
                record.requester, record.id
            );
            let mut next = record;
            next.state = RequestState::Closed;
            next.closed_at = Some(now);
            TransitionResult::new(next, vec![log(LogLevel::Info, message)])
        }

        Event::InviteDeliveryFailed { reason } => {
            let message = format!(
                "Delivering invite for request {} failed, will retry: {}",
                record.id, reason
            );
            TransitionResult::new(record, vec![log(LogLevel::Warn, message)])
        }

        other => ignored(record, &other),
    }
}
