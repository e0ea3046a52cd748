//! Repository abstraction for request persistence.
//!
//! `RequestRepository` is the durable home of every request record plus the
//! inbound update claims used for de-duplication. Both backends run the same
//! `check_put` validation so that the lifecycle invariants hold regardless of
//! where records live.

mod memory;
mod sqlite;

pub use memory::InMemoryRepository;
pub use sqlite::SqliteRepository;

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use super::state::{
    AdminRef, InvariantViolation, RequestId, RequestRecord, RequestState, RequesterId,
};

/// In-progress update claims older than this may be taken over.
pub const STALE_CLAIM_TTL_SECONDS: i64 = 30 * 60;

#[derive(Debug, Clone, thiserror::Error)]
pub enum RepositoryError {
    #[error("requester {requester} already has an active request")]
    DuplicateActive { requester: RequesterId },

    #[error(transparent)]
    IllegalTransition(#[from] InvariantViolation),

    #[error("stale write for request {id}: expected version {expected}, got {found}")]
    VersionConflict {
        id: RequestId,
        expected: u64,
        found: u64,
    },

    #[error("storage error during {operation}: {message}")]
    Storage {
        operation: &'static str,
        message: String,
    },

    #[error("corrupt {what}: {message}")]
    Corruption { what: String, message: String },
}

impl RepositoryError {
    pub fn storage(operation: &'static str, message: impl Into<String>) -> Self {
        Self::Storage {
            operation,
            message: message.into(),
        }
    }

    pub fn corruption(what: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Corruption {
            what: what.into(),
            message: message.into(),
        }
    }
}

/// Result of trying to claim an inbound update for processing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateClaim {
    /// This caller owns the update and must complete or release it.
    Claimed,
    /// Another handler is processing it right now.
    InProgress,
    /// Already processed.
    Completed,
}

/// One entry of the audit trail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransitionLogEntry {
    pub request_id: RequestId,
    pub requester: RequesterId,
    /// `None` for the creation of the record.
    pub from_state: Option<RequestState>,
    pub to_state: RequestState,
    pub recorded_at: DateTime<Utc>,
}

impl TransitionLogEntry {
    /// The audit entry a write of `next` over `prev` produces, if any.
    pub fn for_write(prev: Option<&RequestRecord>, next: &RequestRecord) -> Option<Self> {
        let from_state = prev.map(|p| p.state);
        if from_state == Some(next.state) {
            return None;
        }
        Some(Self {
            request_id: next.id,
            requester: next.requester,
            from_state,
            to_state: next.state,
            recorded_at: next.updated_at,
        })
    }
}

/// Validate a write before it is applied.
///
/// `existing` is the stored record with the same id, `active` the requester's
/// current non-closed record, and `reference_owner` the id of the record that
/// already holds `next.admin_ref`, if any.
pub(crate) fn check_put(
    existing: Option<&RequestRecord>,
    active: Option<&RequestRecord>,
    reference_owner: Option<RequestId>,
    next: &RequestRecord,
) -> Result<(), RepositoryError> {
    match existing {
        None => {
            next.validate_new()?;
            if let Some(active) = active {
                if active.id != next.id {
                    return Err(RepositoryError::DuplicateActive {
                        requester: next.requester,
                    });
                }
            }
        }
        Some(prev) => {
            let expected = prev.version + 1;
            if next.version != expected {
                return Err(RepositoryError::VersionConflict {
                    id: next.id,
                    expected,
                    found: next.version,
                });
            }
            prev.validate_successor(next)?;
        }
    }

    if let Some(owner) = reference_owner {
        if owner != next.id {
            return Err(RepositoryError::IllegalTransition(InvariantViolation {
                from: existing.map(|p| p.state),
                to: next.state,
                reason: "admin reference already belongs to another request",
            }));
        }
    }

    Ok(())
}

/// Storage for request records and update claims.
#[async_trait]
pub trait RequestRepository: Send + Sync {
    /// The requester's non-closed record, if any.
    async fn get_active(
        &self,
        requester: RequesterId,
    ) -> Result<Option<RequestRecord>, RepositoryError>;

    async fn get(&self, id: RequestId) -> Result<Option<RequestRecord>, RepositoryError>;

    /// Insert or update a record atomically, rejecting illegal writes.
    async fn put(&self, record: &RequestRecord) -> Result<(), RepositoryError>;

    async fn find_by_admin_reference(
        &self,
        reference: AdminRef,
    ) -> Result<Option<RequestRecord>, RepositoryError>;

    async fn list_by_state(
        &self,
        state: RequestState,
    ) -> Result<Vec<RequestRecord>, RepositoryError>;

    /// Every record of one requester, oldest first.
    async fn history(&self, requester: RequesterId)
        -> Result<Vec<RequestRecord>, RepositoryError>;

    /// Every record, oldest first.
    async fn list_all(&self) -> Result<Vec<RequestRecord>, RepositoryError>;

    /// Audit trail of one record, oldest first.
    async fn transitions(&self, id: RequestId)
        -> Result<Vec<TransitionLogEntry>, RepositoryError>;

    /// Record counts per lifecycle state. Every state is present.
    async fn state_counts(&self) -> Result<BTreeMap<RequestState, u64>, RepositoryError> {
        let mut counts = empty_counts();
        for record in self.list_all().await? {
            *counts.entry(record.state).or_insert(0) += 1;
        }
        Ok(counts)
    }

    // =========================================================================
    // Update de-duplication
    // =========================================================================

    async fn try_claim_update(&self, update_id: i64) -> Result<UpdateClaim, RepositoryError>;

    async fn complete_update_claim(&self, update_id: i64) -> Result<(), RepositoryError>;

    /// Drop a claim so the update can be processed again.
    async fn release_update_claim(&self, update_id: i64) -> Result<(), RepositoryError>;

    /// Remove completed claims older than `ttl_seconds`. Returns the number removed.
    async fn cleanup_expired_updates(&self, ttl_seconds: i64) -> Result<usize, RepositoryError>;
}

pub(crate) fn empty_counts() -> BTreeMap<RequestState, u64> {
    RequestState::ALL.into_iter().map(|s| (s, 0)).collect()
}
