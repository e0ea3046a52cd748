//! Errors surfaced by the lifecycle operations.

use super::repository::RepositoryError;
use super::state::{AdminRef, InvariantViolation, RequesterId};
use crate::channel::ChannelError;

#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    #[error("requester {0} already has an active request")]
    DuplicateActiveRequest(RequesterId),

    #[error("requester {0} has no survey in progress")]
    NoActiveSurvey(RequesterId),

    #[error("answer is empty")]
    InvalidAnswer,

    #[error(transparent)]
    IllegalTransition(InvariantViolation),

    #[error("no pending request for admin reference {0}")]
    UnknownReference(AdminRef),

    #[error("delivery failed: {0}")]
    DeliveryFailure(#[from] ChannelError),

    #[error("persistence failed: {0}")]
    PersistenceFailure(RepositoryError),
}

impl LifecycleError {
    /// Errors that callers log and otherwise swallow.
    pub fn is_ignorable(&self) -> bool {
        matches!(
            self,
            Self::DuplicateActiveRequest(_) | Self::UnknownReference(_)
        )
    }
}

impl From<RepositoryError> for LifecycleError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::DuplicateActive { requester } => {
                Self::DuplicateActiveRequest(requester)
            }
            RepositoryError::IllegalTransition(violation) => Self::IllegalTransition(violation),
            other => Self::PersistenceFailure(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state_machine::state::RequestState;

    #[test]
    fn test_repository_errors_map_to_lifecycle_taxonomy() {
        let dup: LifecycleError = RepositoryError::DuplicateActive {
            requester: RequesterId(3),
        }
        .into();
        assert!(matches!(dup, LifecycleError::DuplicateActiveRequest(RequesterId(3))));

        let illegal: LifecycleError = RepositoryError::IllegalTransition(InvariantViolation {
            from: Some(RequestState::Closed),
            to: RequestState::InSurvey,
            reason: "not a single forward step",
        })
        .into();
        assert!(matches!(illegal, LifecycleError::IllegalTransition(_)));

        let storage: LifecycleError = RepositoryError::storage("put", "disk full").into();
        assert!(matches!(storage, LifecycleError::PersistenceFailure(_)));
    }
}
