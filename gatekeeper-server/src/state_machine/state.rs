//! State types for the join-request lifecycle.
//!
//! A request moves `InSurvey -> PendingReview -> {Approved, Rejected} -> Closed`.
//! The record carries everything needed to resume after a restart; the
//! `validate_*` functions are the single definition of what a legal write is,
//! and every repository backend runs them before accepting a record.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Platform user id of the person asking to join.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequesterId(pub i64);

impl fmt::Display for RequesterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for RequesterId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

/// Handle of the summary message posted to the admin channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AdminRef(pub i64);

impl fmt::Display for AdminRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for AdminRef {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

/// Unique id of one request. A requester may accumulate several closed
/// requests over time, so the requester id alone does not identify a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(pub Uuid);

impl RequestId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for RequestId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Single-use invitation to the target group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InviteHandle {
    pub link: String,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

impl InviteHandle {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// Display details captured from the platform when the request starts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequesterProfile {
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
}

impl RequesterProfile {
    /// Human-readable label, falling back to the numeric id.
    pub fn label(&self, requester: RequesterId) -> String {
        if let Some(username) = &self.username {
            format!("@{}", username)
        } else if let Some(name) = &self.display_name {
            name.clone()
        } else {
            requester.to_string()
        }
    }
}

/// The admin who decided a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdminIdentity {
    pub id: i64,
    #[serde(default)]
    pub name: Option<String>,
}

impl AdminIdentity {
    pub fn label(&self) -> String {
        match &self.name {
            Some(name) => name.clone(),
            None => self.id.to_string(),
        }
    }
}

/// Lifecycle state of a request. Variants are declared in lifecycle order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestState {
    InSurvey,
    PendingReview,
    Approved,
    Rejected,
    Closed,
}

impl RequestState {
    pub const ALL: [RequestState; 5] = [
        RequestState::InSurvey,
        RequestState::PendingReview,
        RequestState::Approved,
        RequestState::Rejected,
        RequestState::Closed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InSurvey => "in_survey",
            Self::PendingReview => "pending_review",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Closed => "closed",
        }
    }

    pub fn is_active(&self) -> bool {
        !matches!(self, Self::Closed)
    }

    /// Whether `next` is exactly one forward step from `self`.
    pub fn can_advance_to(&self, next: RequestState) -> bool {
        matches!(
            (self, next),
            (Self::InSurvey, Self::PendingReview)
                | (Self::PendingReview, Self::Approved)
                | (Self::PendingReview, Self::Rejected)
                | (Self::Approved, Self::Closed)
                | (Self::Rejected, Self::Closed)
        )
    }
}

impl fmt::Display for RequestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for RequestState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|state| state.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown request state '{}'", s))
    }
}

/// Admin verdict on a pending request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Approve,
    Reject,
}

impl Decision {
    /// The state a pending request moves to under this decision.
    pub fn target_state(&self) -> RequestState {
        match self {
            Self::Approve => RequestState::Approved,
            Self::Reject => RequestState::Rejected,
        }
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Approve => write!(f, "approve"),
            Self::Reject => write!(f, "reject"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub outcome: Decision,
    pub decided_by: AdminIdentity,
    pub decided_at: DateTime<Utc>,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SurveyAnswer {
    pub question_index: usize,
    pub text: String,
}

/// One join request and everything that happened to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestRecord {
    pub id: RequestId,
    pub requester: RequesterId,
    #[serde(default)]
    pub profile: RequesterProfile,
    pub state: RequestState,
    /// Questions as configured when the request began.
    pub questions: Vec<String>,
    #[serde(default)]
    pub answers: Vec<SurveyAnswer>,
    #[serde(default)]
    pub admin_ref: Option<AdminRef>,
    #[serde(default)]
    pub decision: Option<DecisionRecord>,
    #[serde(default)]
    pub invite: Option<InviteHandle>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub closed_at: Option<DateTime<Utc>>,
    /// Write counter; each stored write must be exactly one ahead.
    pub version: u64,
}

impl RequestRecord {
    pub fn new(
        requester: RequesterId,
        profile: RequesterProfile,
        questions: Vec<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: RequestId::new(),
            requester,
            profile,
            state: RequestState::InSurvey,
            questions,
            answers: Vec::new(),
            admin_ref: None,
            decision: None,
            invite: None,
            created_at: now,
            updated_at: now,
            closed_at: None,
            version: 1,
        }
    }

    pub fn label(&self) -> String {
        self.profile.label(self.requester)
    }

    pub fn survey_complete(&self) -> bool {
        self.answers.len() == self.questions.len()
            && self.answers.iter().all(|a| !a.text.trim().is_empty())
    }

    /// Index of the next unanswered question, `None` once all are answered.
    pub fn next_question_index(&self) -> Option<usize> {
        let index = self.answers.len();
        (index < self.questions.len()).then_some(index)
    }

    /// Question/answer pairs in question order.
    pub fn answered(&self) -> impl Iterator<Item = (&str, &str)> {
        self.answers.iter().filter_map(|answer| {
            self.questions
                .get(answer.question_index)
                .map(|q| (q.as_str(), answer.text.as_str()))
        })
    }

    /// Check a freshly created record before its first write.
    pub fn validate_new(&self) -> Result<(), InvariantViolation> {
        let violation = |reason| InvariantViolation {
            from: None,
            to: self.state,
            reason,
        };
        if self.state != RequestState::InSurvey {
            return Err(violation("new requests start in the survey"));
        }
        if self.version != 1 {
            return Err(violation("new requests start at version 1"));
        }
        if self.questions.is_empty() {
            return Err(violation("survey has no questions"));
        }
        if self.admin_ref.is_some()
            || self.decision.is_some()
            || self.invite.is_some()
            || self.closed_at.is_some()
        {
            return Err(violation("new requests carry no review data"));
        }
        validate_answers(self).map_err(violation)
    }

    /// Check that `next` is a legal successor of `self`.
    pub fn validate_successor(&self, next: &RequestRecord) -> Result<(), InvariantViolation> {
        let violation = |reason| InvariantViolation {
            from: Some(self.state),
            to: next.state,
            reason,
        };

        if next.id != self.id
            || next.requester != self.requester
            || next.questions != self.questions
            || next.created_at != self.created_at
        {
            return Err(violation("immutable field changed"));
        }

        if next.state != self.state && !self.state.can_advance_to(next.state) {
            return Err(violation("not a single forward step"));
        }

        validate_answers(next).map_err(violation)?;
        if self.state == RequestState::InSurvey {
            if !next.answers.starts_with(&self.answers) {
                return Err(violation("answers are append-only"));
            }
        } else if next.answers != self.answers {
            return Err(violation("answers are frozen after the survey"));
        }
        if next.state != RequestState::InSurvey && !next.survey_complete() {
            return Err(violation("review requires a complete survey"));
        }

        match (self.admin_ref, next.admin_ref) {
            (Some(prev), Some(new)) if prev != new => {
                return Err(violation("admin reference changed"));
            }
            (Some(_), None) => return Err(violation("admin reference removed")),
            (None, Some(_))
                if !(self.state == RequestState::InSurvey
                    && next.state == RequestState::PendingReview) =>
            {
                return Err(violation("admin reference set outside submission"));
            }
            (None, None) if next.state != RequestState::InSurvey => {
                return Err(violation("admin reference missing"));
            }
            _ => {}
        }

        match (&self.decision, &next.decision) {
            (Some(prev), Some(new)) if prev != new => {
                return Err(violation("decision changed"));
            }
            (Some(_), None) => return Err(violation("decision removed")),
            (None, Some(decision)) => {
                if self.state != RequestState::PendingReview {
                    return Err(violation("decision recorded outside review"));
                }
                if decision.outcome.target_state() != next.state {
                    return Err(violation("decision does not match state"));
                }
            }
            (None, None)
                if !matches!(
                    next.state,
                    RequestState::InSurvey | RequestState::PendingReview
                ) =>
            {
                return Err(violation("decision missing"));
            }
            _ => {}
        }

        match (&self.invite, &next.invite) {
            (Some(prev), Some(new))
                if prev != new
                    && !(self.state == RequestState::Approved
                        && next.state == RequestState::Approved
                        && prev.is_expired(next.updated_at)) =>
            {
                return Err(violation("invite handle changed"));
            }
            (Some(_), None) => return Err(violation("invite handle removed")),
            (None, Some(_))
                if !(self.state == RequestState::Approved
                    && next.state == RequestState::Approved) =>
            {
                return Err(violation("invite issued outside approval"));
            }
            (None, None)
                if self.state == RequestState::Approved
                    && next.state == RequestState::Closed =>
            {
                return Err(violation("approval closed without an invite"));
            }
            _ => {}
        }

        match (self.closed_at, next.closed_at) {
            (Some(prev), Some(new)) if prev != new => {
                return Err(violation("close time changed"));
            }
            (_, None) if next.state == RequestState::Closed => {
                return Err(violation("closed request without close time"));
            }
            (_, Some(_)) if next.state != RequestState::Closed => {
                return Err(violation("close time on an open request"));
            }
            _ => {}
        }

        Ok(())
    }
}

fn validate_answers(record: &RequestRecord) -> Result<(), &'static str> {
    if record.answers.len() > record.questions.len() {
        return Err("more answers than questions");
    }
    for (position, answer) in record.answers.iter().enumerate() {
        if answer.question_index != position {
            return Err("answers out of question order");
        }
        if answer.text.trim().is_empty() {
            return Err("empty answer");
        }
    }
    Ok(())
}

/// A write that would break a lifecycle invariant.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("illegal transition {} -> {to}: {reason}", from.map(|s| s.as_str()).unwrap_or("(new)"))]
pub struct InvariantViolation {
    pub from: Option<RequestState>,
    pub to: RequestState,
    pub reason: &'static str,
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use proptest::prelude::*;

    pub(crate) fn questions() -> Vec<String> {
        vec![
            "What's your name?".to_string(),
            "Why do you want to join?".to_string(),
            "How did you hear about us?".to_string(),
        ]
    }

    pub(crate) fn fixed_now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-03-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn admin() -> AdminIdentity {
        AdminIdentity {
            id: 7,
            name: Some("alice".to_string()),
        }
    }

    fn with_answers(mut record: RequestRecord, count: usize) -> RequestRecord {
        for i in 0..count {
            record.answers.push(SurveyAnswer {
                question_index: i,
                text: format!("answer {}", i),
            });
        }
        record
    }

    pub(crate) fn pending_record() -> RequestRecord {
        let mut record = with_answers(
            RequestRecord::new(RequesterId(1), RequesterProfile::default(), questions(), fixed_now()),
            3,
        );
        record.state = RequestState::PendingReview;
        record.admin_ref = Some(AdminRef(100));
        record
    }

    fn decided(mut record: RequestRecord, outcome: Decision) -> RequestRecord {
        record.state = outcome.target_state();
        record.decision = Some(DecisionRecord {
            outcome,
            decided_by: admin(),
            decided_at: fixed_now(),
            reason: None,
        });
        record
    }

    #[test]
    fn test_only_expired_invite_may_be_replaced() {
        let mut prev = decided(pending_record(), Decision::Approve);
        prev.invite = Some(InviteHandle {
            link: "https://t.me/+first".to_string(),
            expires_at: Some(fixed_now() + chrono::Duration::hours(1)),
        });
        let mut next = prev.clone();
        next.invite = Some(InviteHandle {
            link: "https://t.me/+second".to_string(),
            expires_at: None,
        });
        assert!(prev.validate_successor(&next).is_err());

        next.updated_at = fixed_now() + chrono::Duration::hours(2);
        assert_eq!(prev.validate_successor(&next), Ok(()));
    }

    #[test]
    fn test_new_record_is_valid() {
        let record =
            RequestRecord::new(RequesterId(1), RequesterProfile::default(), questions(), fixed_now());
        assert_eq!(record.validate_new(), Ok(()));
        assert_eq!(record.next_question_index(), Some(0));
    }

    #[test]
    fn test_new_record_without_questions_is_rejected() {
        let record =
            RequestRecord::new(RequesterId(1), RequesterProfile::default(), vec![], fixed_now());
        assert!(record.validate_new().is_err());
    }

    #[test]
    fn test_appending_answer_is_legal() {
        let prev =
            RequestRecord::new(RequesterId(1), RequesterProfile::default(), questions(), fixed_now());
        let next = with_answers(prev.clone(), 1);
        assert_eq!(prev.validate_successor(&next), Ok(()));
    }

    #[test]
    fn test_rewriting_answer_is_illegal() {
        let prev = with_answers(
            RequestRecord::new(RequesterId(1), RequesterProfile::default(), questions(), fixed_now()),
            1,
        );
        let mut next = prev.clone();
        next.answers[0].text = "changed".to_string();
        assert!(prev.validate_successor(&next).is_err());
    }

    #[test]
    fn test_empty_answer_is_illegal() {
        let prev =
            RequestRecord::new(RequesterId(1), RequesterProfile::default(), questions(), fixed_now());
        let mut next = prev.clone();
        next.answers.push(SurveyAnswer {
            question_index: 0,
            text: "   ".to_string(),
        });
        assert!(prev.validate_successor(&next).is_err());
    }

    #[test]
    fn test_pending_requires_complete_survey_and_reference() {
        let prev = with_answers(
            RequestRecord::new(RequesterId(1), RequesterProfile::default(), questions(), fixed_now()),
            2,
        );
        let mut next = prev.clone();
        next.state = RequestState::PendingReview;
        next.admin_ref = Some(AdminRef(5));
        assert!(prev.validate_successor(&next).is_err());

        let prev = with_answers(prev, 0);
        let complete = with_answers(
            RequestRecord {
                answers: vec![],
                ..prev.clone()
            },
            3,
        );
        let mut next = complete.clone();
        next.state = RequestState::PendingReview;
        assert!(complete.validate_successor(&next).is_err(), "missing reference");
        next.admin_ref = Some(AdminRef(5));
        assert_eq!(complete.validate_successor(&next), Ok(()));
    }

    #[test]
    fn test_decision_cannot_change_once_recorded() {
        let approved = decided(pending_record(), Decision::Approve);
        let mut next = approved.clone();
        if let Some(decision) = next.decision.as_mut() {
            decision.decided_by = AdminIdentity { id: 8, name: None };
        }
        assert!(approved.validate_successor(&next).is_err());
    }

    #[test]
    fn test_decision_must_match_state() {
        let prev = pending_record();
        let mut next = decided(prev.clone(), Decision::Approve);
        next.state = RequestState::Rejected;
        assert!(prev.validate_successor(&next).is_err());
    }

    #[test]
    fn test_approved_close_requires_invite() {
        let approved = decided(pending_record(), Decision::Approve);
        let mut closed = approved.clone();
        closed.state = RequestState::Closed;
        closed.closed_at = Some(fixed_now());
        assert!(approved.validate_successor(&closed).is_err());

        let mut with_invite = approved.clone();
        with_invite.invite = Some(InviteHandle {
            link: "https://t.me/+abc".to_string(),
            expires_at: None,
        });
        assert_eq!(approved.validate_successor(&with_invite), Ok(()));

        let mut closed = with_invite.clone();
        closed.state = RequestState::Closed;
        closed.closed_at = Some(fixed_now());
        assert_eq!(with_invite.validate_successor(&closed), Ok(()));
    }

    #[test]
    fn test_rejected_closes_without_invite() {
        let rejected = decided(pending_record(), Decision::Reject);
        let mut closed = rejected.clone();
        closed.state = RequestState::Closed;
        closed.closed_at = Some(fixed_now());
        assert_eq!(rejected.validate_successor(&closed), Ok(()));

        closed.invite = Some(InviteHandle {
            link: "https://t.me/+abc".to_string(),
            expires_at: None,
        });
        assert!(rejected.validate_successor(&closed).is_err());
    }

    #[test]
    fn test_state_parse_roundtrip_names() {
        for state in RequestState::ALL {
            assert_eq!(state.as_str().parse::<RequestState>(), Ok(state));
        }
        assert!("archived".parse::<RequestState>().is_err());
    }

    #[test]
    fn test_profile_label_fallbacks() {
        let id = RequesterId(42);
        assert_eq!(RequesterProfile::default().label(id), "42");
        let named = RequesterProfile {
            username: None,
            display_name: Some("Bob".to_string()),
        };
        assert_eq!(named.label(id), "Bob");
        let user = RequesterProfile {
            username: Some("bob".to_string()),
            display_name: Some("Bob".to_string()),
        };
        assert_eq!(user.label(id), "@bob");
    }

    fn arb_state() -> impl Strategy<Value = RequestState> {
        prop::sample::select(RequestState::ALL.to_vec())
    }

    fn rank(state: RequestState) -> u8 {
        match state {
            RequestState::InSurvey => 0,
            RequestState::PendingReview => 1,
            RequestState::Approved | RequestState::Rejected => 2,
            RequestState::Closed => 3,
        }
    }

    proptest! {
        /// Property: a permitted step always moves exactly one rank forward.
        #[test]
        fn can_advance_is_single_forward_step(from in arb_state(), to in arb_state()) {
            if from.can_advance_to(to) {
                prop_assert_eq!(rank(to), rank(from) + 1);
            }
            prop_assert!(!to.can_advance_to(from) || !from.can_advance_to(to));
        }

        /// Property: a record never validates as the successor of a later-stage record.
        #[test]
        fn backwards_state_change_is_rejected(target in arb_state()) {
            let closed = {
                let mut record = decided(pending_record(), Decision::Reject);
                record.state = RequestState::Closed;
                record.closed_at = Some(fixed_now());
                record
            };
            let mut next = closed.clone();
            next.state = target;
            if target != RequestState::Closed {
                prop_assert!(closed.validate_successor(&next).is_err());
            }
        }
    }
}
