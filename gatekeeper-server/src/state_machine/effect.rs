//! Effects (side effects as data).
//!
//! Effects describe what should happen as a result of a transition. The
//! interpreter executes them against the channel traits; some of them report
//! back with a result event.

use serde::{Deserialize, Serialize};

use super::state::{AdminIdentity, AdminRef, Decision, InviteHandle, RequestRecord};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Effect {
    // =========================================================================
    // Requester Effects
    // =========================================================================
    /// Send a notice to the requester. Best-effort.
    Reply { notice: UserNotice },

    /// Tell the requester they were rejected.
    /// Produces `RejectionNoticeFinished` whether or not delivery succeeded.
    NotifyRejection { reason: Option<String> },

    // =========================================================================
    // Admin Effects
    // =========================================================================
    /// Post the answer summary with approve/reject actions.
    /// Produces `SummaryPosted` or `SummaryPostFailed`.
    PostSummary {
        summary: ReviewSummary,
        notify_requester: bool,
    },

    /// Remove the approve/reject actions from a decided summary. Best-effort.
    ClearAdminActions { admin_ref: AdminRef },

    /// Post an informational line to the admin channel. Best-effort.
    NotifyAdmins { notice: AdminNotice },

    // =========================================================================
    // Invitation Effects
    // =========================================================================
    /// Produces `InviteCreated` or `InviteCreationFailed`.
    CreateInvite { report_failure: bool },

    /// Produces `InviteDelivered` or `InviteDeliveryFailed`.
    DeliverInvite { invite: InviteHandle },

    /// Invalidate an expired invite before it is replaced. Best-effort.
    RevokeInvite { invite: InviteHandle },

    // =========================================================================
    // Logging Effects
    // =========================================================================
    Log { level: LogLevel, message: String },
}

/// Messages sent to the requester.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum UserNotice {
    /// First message of a new request.
    Welcome,
    Question {
        index: usize,
        total: usize,
        text: String,
    },
    /// Answers were forwarded to the admins.
    Submitted,
    /// Something failed on our side; the request is kept.
    TryAgainLater,
}

impl UserNotice {
    pub fn render(&self) -> String {
        match self {
            UserNotice::Welcome => "Welcome! To keep the group intentional we ask a few quick \
                 questions before letting you in. It won't take long."
                .to_string(),
            UserNotice::Question { index, total, text } => {
                format!("Question {}/{}: {}", index + 1, total, text)
            }
            UserNotice::Submitted => "Thank you! Your answers have been sent to the admins. \
                 You will hear back once they have reviewed your request."
                .to_string(),
            UserNotice::TryAgainLater => "Thanks! We could not forward your answers just now. \
                 They are saved and will be sent shortly."
                .to_string(),
        }
    }
}

/// Render the rejection message, including the admin's reason when given.
pub fn render_rejection(reason: Option<&str>) -> String {
    match reason {
        Some(reason) => format!(
            "We're sorry, your request to join was not approved.\nReason: {}",
            reason
        ),
        None => "We're sorry, your request to join was not approved.".to_string(),
    }
}

/// Render the message that carries an invite link.
pub fn render_invite(invite: &InviteHandle) -> String {
    match invite.expires_at {
        Some(expires_at) => format!(
            "Your request was approved! Join using this one-time link: {}\n\
             The link expires at {}.",
            invite.link,
            expires_at.format("%Y-%m-%d %H:%M UTC")
        ),
        None => format!(
            "Your request was approved! Join using this one-time link: {}",
            invite.link
        ),
    }
}

/// Answer summary posted to the admin channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewSummary {
    pub requester_label: String,
    pub requester_id: i64,
    pub items: Vec<(String, String)>,
}

impl ReviewSummary {
    pub fn from_record(record: &RequestRecord) -> Self {
        Self {
            requester_label: record.label(),
            requester_id: record.requester.0,
            items: record
                .answered()
                .map(|(q, a)| (q.to_string(), a.to_string()))
                .collect(),
        }
    }

    pub fn render(&self) -> String {
        let mut text = format!(
            "New join request from {} (id {})\n",
            self.requester_label, self.requester_id
        );
        for (question, answer) in &self.items {
            text.push_str(&format!("\n{}\n{}\n", question, answer));
        }
        text.push_str("\nApprove or reject with the buttons, or reply /approve or /reject <reason>.");
        text
    }
}

/// Messages posted to the admin channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AdminNotice {
    Decided {
        requester_label: String,
        outcome: Decision,
        decided_by: AdminIdentity,
        reason: Option<String>,
    },
    InviteFailed {
        requester_label: String,
        reason: String,
    },
}

impl AdminNotice {
    pub fn render(&self) -> String {
        match self {
            AdminNotice::Decided {
                requester_label,
                outcome: Decision::Approve,
                decided_by,
                ..
            } => format!(
                "Request from {} approved by {}.",
                requester_label,
                decided_by.label()
            ),
            AdminNotice::Decided {
                requester_label,
                outcome: Decision::Reject,
                decided_by,
                reason,
            } => match reason {
                Some(reason) => format!(
                    "Request from {} rejected by {}: {}",
                    requester_label,
                    decided_by.label(),
                    reason
                ),
                None => format!(
                    "Request from {} rejected by {}.",
                    requester_label,
                    decided_by.label()
                ),
            },
            AdminNotice::InviteFailed {
                requester_label,
                reason,
            } => format!(
                "Could not create an invite for {}: {}. \
                 Check that the bot can invite users to the group; it will retry.",
                requester_label, reason
            ),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}
