//! Invitation issuer.

use std::sync::Arc;

use tracing::debug;

use super::error::LifecycleError;
use super::event::Event;
use super::interpreter::InterpreterContext;
use super::state::{RequestState, RequesterId};
use super::store::RequestStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IssueOutcome {
    /// The invite reached the requester and the request is closed.
    Delivered,
    /// Still approved: the invite could not be created or delivered yet.
    DeliveryPending,
    /// The requester has no approved request (never approved, or already closed).
    NotApproved,
}

pub struct InvitationIssuer {
    store: Arc<RequestStore>,
    ctx: Arc<InterpreterContext>,
}

impl InvitationIssuer {
    pub fn new(store: Arc<RequestStore>, ctx: Arc<InterpreterContext>) -> Self {
        Self { store, ctx }
    }

    /// Acquire an invite unless a live one is stored, then deliver it.
    ///
    /// `report_failure` posts an admin notice when the invite cannot be created.
    pub async fn issue(
        &self,
        requester: RequesterId,
        report_failure: bool,
    ) -> Result<IssueOutcome, LifecycleError> {
        let _guard = self.store.lock_identity(requester).await;

        let record = match self.store.repository().get_active(requester).await? {
            Some(record) if record.state == RequestState::Approved => record,
            _ => {
                debug!("No approved request for {}; nothing to issue", requester);
                return Ok(IssueOutcome::NotApproved);
            }
        };

        let record = self
            .store
            .drive(record, Event::IssueRequested { report_failure }, &self.ctx)
            .await?;

        Ok(match record.state {
            RequestState::Closed => IssueOutcome::Delivered,
            _ => IssueOutcome::DeliveryPending,
        })
    }
}
