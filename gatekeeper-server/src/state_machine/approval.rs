//! Approval coordinator.
//!
//! Moves complete surveys into review and applies admin decisions. Decisions
//! are correlated by the admin message reference and serialized on it; the
//! reference lock is always taken before the identity lock.

use std::sync::Arc;

use tracing::{info, warn};

use super::error::LifecycleError;
use super::event::Event;
use super::interpreter::InterpreterContext;
use super::invitation::{InvitationIssuer, IssueOutcome};
use super::state::{
    AdminIdentity, AdminRef, Decision, RequestRecord, RequestState, RequesterId,
};
use super::store::RequestStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecisionOutcome {
    Approved(IssueOutcome),
    Rejected,
}

pub struct ApprovalCoordinator {
    store: Arc<RequestStore>,
    ctx: Arc<InterpreterContext>,
    issuer: Arc<InvitationIssuer>,
}

impl ApprovalCoordinator {
    pub fn new(
        store: Arc<RequestStore>,
        ctx: Arc<InterpreterContext>,
        issuer: Arc<InvitationIssuer>,
    ) -> Self {
        Self { store, ctx, issuer }
    }

    /// Post the summary of a complete survey that is still waiting for review.
    ///
    /// Returns the record afterwards; it stays `InSurvey` if posting failed.
    pub async fn submit_for_review(
        &self,
        requester: RequesterId,
        notify_requester: bool,
    ) -> Result<RequestRecord, LifecycleError> {
        let _guard = self.store.lock_identity(requester).await;

        let record = match self.store.repository().get_active(requester).await? {
            Some(record) if record.state == RequestState::InSurvey && record.survey_complete() => {
                record
            }
            _ => return Err(LifecycleError::NoActiveSurvey(requester)),
        };

        self.store
            .drive(record, Event::SubmitForReview { notify_requester }, &self.ctx)
            .await
    }

    /// Apply an admin decision to the request reviewed in `reference`.
    ///
    /// A reference that matches no `PendingReview` record (unknown, or already
    /// decided) yields `UnknownReference` and changes nothing.
    pub async fn decide(
        &self,
        reference: AdminRef,
        decision: Decision,
        decided_by: AdminIdentity,
        reason: Option<String>,
    ) -> Result<DecisionOutcome, LifecycleError> {
        let _reference_guard = self.store.lock_reference(reference).await;

        let requester = match self
            .store
            .repository()
            .find_by_admin_reference(reference)
            .await?
        {
            Some(record) if record.state == RequestState::PendingReview => record.requester,
            Some(record) => {
                info!(
                    "Ignoring {} for admin message {}: request {} is already {}",
                    decision, reference, record.id, record.state
                );
                return Err(LifecycleError::UnknownReference(reference));
            }
            None => {
                info!(
                    "Ignoring {} for admin message {}: no such request",
                    decision, reference
                );
                return Err(LifecycleError::UnknownReference(reference));
            }
        };

        {
            let _identity_guard = self.store.lock_identity(requester).await;

            // Re-read under the identity lock.
            let record = match self.store.repository().get_active(requester).await? {
                Some(record)
                    if record.state == RequestState::PendingReview
                        && record.admin_ref == Some(reference) =>
                {
                    record
                }
                _ => {
                    warn!(
                        "Request for admin message {} changed before the decision applied",
                        reference
                    );
                    return Err(LifecycleError::UnknownReference(reference));
                }
            };

            self.store
                .drive(
                    record,
                    Event::DecisionReceived {
                        decision,
                        decided_by,
                        reason,
                    },
                    &self.ctx,
                )
                .await?;
        }

        match decision {
            Decision::Approve => {
                let issued = self.issuer.issue(requester, true).await?;
                Ok(DecisionOutcome::Approved(issued))
            }
            Decision::Reject => Ok(DecisionOutcome::Rejected),
        }
    }

    /// Send the notice of a rejection that was persisted but never finished,
    /// then close the request.
    pub async fn finish_rejection(
        &self,
        requester: RequesterId,
    ) -> Result<Option<RequestRecord>, LifecycleError> {
        let _guard = self.store.lock_identity(requester).await;

        match self.store.repository().get_active(requester).await? {
            Some(record) if record.state == RequestState::Rejected => self
                .store
                .drive(record, Event::RejectionResumed, &self.ctx)
                .await
                .map(Some),
            _ => Ok(None),
        }
    }
}
