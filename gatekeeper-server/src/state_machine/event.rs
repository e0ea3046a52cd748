//! Events that trigger state transitions.
//!
//! Events are things that happened: a requester's message, an admin's
//! decision, or the result of executing an effect. They are inputs to the
//! pure transition function.

use super::state::{AdminIdentity, AdminRef, Decision, InviteHandle};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    // =========================================================================
    // Requester Events
    // =========================================================================
    /// The record was just stored; greet the requester and ask the first question.
    SurveyStarted,

    /// A validated, non-empty answer to the current question.
    AnswerSubmitted { text: String },

    // =========================================================================
    // Review Events
    // =========================================================================
    /// Post the summary of a complete survey (again, if an earlier post failed).
    /// `notify_requester` asks for a notice to the requester if posting fails.
    SubmitForReview { notify_requester: bool },

    SummaryPosted { admin_ref: AdminRef },

    SummaryPostFailed {
        reason: String,
        notify_requester: bool,
    },

    DecisionReceived {
        decision: Decision,
        decided_by: AdminIdentity,
        reason: Option<String>,
    },

    /// Re-send the rejection notice for a record stuck in `Rejected`.
    RejectionResumed,

    /// The rejection notice was sent or its retries were exhausted.
    RejectionNoticeFinished { delivered: bool },

    // =========================================================================
    // Invitation Events
    // =========================================================================
    /// `report_failure` asks for an admin notice if the invite cannot be created.
    IssueRequested { report_failure: bool },

    InviteCreated { invite: InviteHandle },

    InviteCreationFailed {
        reason: String,
        report_failure: bool,
    },

    InviteDelivered,

    InviteDeliveryFailed { reason: String },
}

impl Event {
    /// Short description for logs. Never includes answer text.
    pub fn log_summary(&self) -> String {
        match self {
            Event::SurveyStarted => "SurveyStarted".to_string(),
            Event::AnswerSubmitted { text } => {
                format!("AnswerSubmitted({} chars)", text.chars().count())
            }
            Event::SubmitForReview { .. } => "SubmitForReview".to_string(),
            Event::SummaryPosted { admin_ref } => format!("SummaryPosted({})", admin_ref),
            Event::SummaryPostFailed { .. } => "SummaryPostFailed".to_string(),
            Event::DecisionReceived {
                decision,
                decided_by,
                ..
            } => format!("DecisionReceived({} by {})", decision, decided_by.id),
            Event::RejectionResumed => "RejectionResumed".to_string(),
            Event::RejectionNoticeFinished { delivered } => {
                format!("RejectionNoticeFinished(delivered={})", delivered)
            }
            Event::IssueRequested { .. } => "IssueRequested".to_string(),
            Event::InviteCreated { .. } => "InviteCreated".to_string(),
            Event::InviteCreationFailed { .. } => "InviteCreationFailed".to_string(),
            Event::InviteDelivered => "InviteDelivered".to_string(),
            Event::InviteDeliveryFailed { .. } => "InviteDeliveryFailed".to_string(),
        }
    }
}
