//! Effect interpreter.
//!
//! The boundary between the pure state machine and the platform. Effects are
//! executed in order against the channel traits, each outbound call wrapped
//! in the retry policy, and their outcomes turned back into events.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use super::effect::{render_rejection, Effect, LogLevel};
use super::event::Event;
use super::state::RequestRecord;
use crate::channel::{AdminAction, GroupMembership, Messenger};
use crate::delivery::{with_retry, RetryPolicy};

/// Everything the interpreter needs to execute effects.
pub struct InterpreterContext {
    pub messenger: Arc<dyn Messenger>,
    pub membership: Arc<dyn GroupMembership>,
    pub retry: RetryPolicy,
    /// Lifetime of newly created invites.
    pub invite_ttl: Duration,
}

/// Execute `effects` for `record` and collect the result events.
///
/// A failing effect never stops the ones after it. Best-effort effects only
/// log their failures.
pub async fn execute_effects(
    ctx: &InterpreterContext,
    record: &RequestRecord,
    effects: Vec<Effect>,
) -> Vec<Event> {
    let mut result_events = Vec::new();
    for effect in effects {
        if let Some(event) = execute_effect(ctx, record, effect).await {
            result_events.push(event);
        }
    }
    result_events
}

async fn execute_effect(
    ctx: &InterpreterContext,
    record: &RequestRecord,
    effect: Effect,
) -> Option<Event> {
    let requester = record.requester;
    match effect {
        Effect::Reply { notice } => {
            let text = notice.render();
            let _ = with_retry(&ctx.retry, "send notice to requester", || {
                ctx.messenger.send_to_user(requester, &text)
            })
            .await;
            None
        }

        Effect::NotifyRejection { reason } => {
            let text = render_rejection(reason.as_deref());
            let delivered = with_retry(&ctx.retry, "send rejection notice", || {
                ctx.messenger.send_to_user(requester, &text)
            })
            .await
            .is_ok();
            Some(Event::RejectionNoticeFinished { delivered })
        }

        Effect::PostSummary {
            summary,
            notify_requester,
        } => {
            let text = summary.render();
            let posted = with_retry(&ctx.retry, "post review summary", || {
                ctx.messenger
                    .send_to_admin_channel(&text, &AdminAction::ALL)
            })
            .await;
            Some(match posted {
                Ok(admin_ref) => Event::SummaryPosted { admin_ref },
                Err(e) => Event::SummaryPostFailed {
                    reason: e.to_string(),
                    notify_requester,
                },
            })
        }

        Effect::ClearAdminActions { admin_ref } => {
            let _ = with_retry(&ctx.retry, "clear admin actions", || {
                ctx.messenger.clear_admin_actions(admin_ref)
            })
            .await;
            None
        }

        Effect::NotifyAdmins { notice } => {
            let text = notice.render();
            let _ = with_retry(&ctx.retry, "notify admins", || {
                ctx.messenger.notify_admins(&text)
            })
            .await;
            None
        }

        Effect::CreateInvite { report_failure } => {
            let created = with_retry(&ctx.retry, "create invite", || {
                ctx.membership.create_invite(requester, ctx.invite_ttl)
            })
            .await;
            Some(match created {
                Ok(invite) => Event::InviteCreated { invite },
                Err(e) => Event::InviteCreationFailed {
                    reason: e.to_string(),
                    report_failure,
                },
            })
        }

        Effect::DeliverInvite { invite } => {
            let delivered = with_retry(&ctx.retry, "deliver invite", || {
                ctx.messenger.send_invite_to_user(requester, &invite)
            })
            .await;
            Some(match delivered {
                Ok(()) => Event::InviteDelivered,
                Err(e) => Event::InviteDeliveryFailed {
                    reason: e.to_string(),
                },
            })
        }

        Effect::RevokeInvite { invite } => {
            if let Err(e) = with_retry(&ctx.retry, "revoke invite", || {
                ctx.membership.revoke_invite(&invite)
            })
            .await
            {
                debug!("Could not revoke invite for {}: {}", requester, e);
            }
            None
        }

        Effect::Log { level, message } => {
            match level {
                LogLevel::Debug => debug!("{}", message),
                LogLevel::Info => info!("{}", message),
                LogLevel::Warn => warn!("{}", message),
                LogLevel::Error => error!("{}", message),
            }
            None
        }
    }
}

