//! In-memory implementation of `RequestRepository`.
//!
//! Holds everything in maps behind a single `RwLock`; all state is lost on
//! restart. Used by tests and by the integration scenarios.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use super::{
    check_put, RepositoryError, RequestRepository, TransitionLogEntry, UpdateClaim,
    STALE_CLAIM_TTL_SECONDS,
};
use crate::state_machine::state::{AdminRef, RequestId, RequestRecord, RequestState, RequesterId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ClaimState {
    InProgress,
    Completed,
}

#[derive(Default)]
struct Tables {
    /// Records in insertion order.
    records: Vec<RequestRecord>,
    index: HashMap<RequestId, usize>,
    transitions: Vec<TransitionLogEntry>,
    /// Update id -> (claim state, recorded at in unix seconds).
    claims: HashMap<i64, (ClaimState, i64)>,
}

impl Tables {
    fn by_id(&self, id: RequestId) -> Option<&RequestRecord> {
        self.index.get(&id).map(|&i| &self.records[i])
    }

    fn active_for(&self, requester: RequesterId) -> Option<&RequestRecord> {
        self.records
            .iter()
            .find(|r| r.requester == requester && r.state.is_active())
    }

    fn reference_owner(&self, reference: AdminRef) -> Option<RequestId> {
        self.records
            .iter()
            .find(|r| r.admin_ref == Some(reference))
            .map(|r| r.id)
    }
}

#[derive(Default)]
pub struct InMemoryRepository {
    tables: RwLock<Tables>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RequestRepository for InMemoryRepository {
    async fn get_active(
        &self,
        requester: RequesterId,
    ) -> Result<Option<RequestRecord>, RepositoryError> {
        Ok(self.tables.read().await.active_for(requester).cloned())
    }

    async fn get(&self, id: RequestId) -> Result<Option<RequestRecord>, RepositoryError> {
        Ok(self.tables.read().await.by_id(id).cloned())
    }

    async fn put(&self, record: &RequestRecord) -> Result<(), RepositoryError> {
        let mut tables = self.tables.write().await;

        let existing = tables.by_id(record.id).cloned();
        let active = tables.active_for(record.requester).cloned();
        let owner = record.admin_ref.and_then(|r| tables.reference_owner(r));
        check_put(existing.as_ref(), active.as_ref(), owner, record)?;

        if let Some(entry) = TransitionLogEntry::for_write(existing.as_ref(), record) {
            tables.transitions.push(entry);
        }
        match tables.index.get(&record.id).copied() {
            Some(i) => tables.records[i] = record.clone(),
            None => {
                let i = tables.records.len();
                tables.records.push(record.clone());
                tables.index.insert(record.id, i);
            }
        }
        Ok(())
    }

    async fn find_by_admin_reference(
        &self,
        reference: AdminRef,
    ) -> Result<Option<RequestRecord>, RepositoryError> {
        let tables = self.tables.read().await;
        Ok(tables
            .records
            .iter()
            .find(|r| r.admin_ref == Some(reference))
            .cloned())
    }

    async fn list_by_state(
        &self,
        state: RequestState,
    ) -> Result<Vec<RequestRecord>, RepositoryError> {
        let tables = self.tables.read().await;
        Ok(tables
            .records
            .iter()
            .filter(|r| r.state == state)
            .cloned()
            .collect())
    }

    async fn history(
        &self,
        requester: RequesterId,
    ) -> Result<Vec<RequestRecord>, RepositoryError> {
        let tables = self.tables.read().await;
        Ok(tables
            .records
            .iter()
            .filter(|r| r.requester == requester)
            .cloned()
            .collect())
    }

    async fn list_all(&self) -> Result<Vec<RequestRecord>, RepositoryError> {
        Ok(self.tables.read().await.records.clone())
    }

    async fn transitions(
        &self,
        id: RequestId,
    ) -> Result<Vec<TransitionLogEntry>, RepositoryError> {
        let tables = self.tables.read().await;
        Ok(tables
            .transitions
            .iter()
            .filter(|t| t.request_id == id)
            .cloned()
            .collect())
    }

    async fn try_claim_update(&self, update_id: i64) -> Result<UpdateClaim, RepositoryError> {
        let now = Utc::now().timestamp();
        let mut tables = self.tables.write().await;
        match tables.claims.get(&update_id).copied() {
            None => {
                tables
                    .claims
                    .insert(update_id, (ClaimState::InProgress, now));
                Ok(UpdateClaim::Claimed)
            }
            Some((ClaimState::InProgress, recorded_at))
                if recorded_at <= now - STALE_CLAIM_TTL_SECONDS =>
            {
                tables
                    .claims
                    .insert(update_id, (ClaimState::InProgress, now));
                Ok(UpdateClaim::Claimed)
            }
            Some((ClaimState::InProgress, _)) => Ok(UpdateClaim::InProgress),
            Some((ClaimState::Completed, _)) => Ok(UpdateClaim::Completed),
        }
    }

    async fn complete_update_claim(&self, update_id: i64) -> Result<(), RepositoryError> {
        let now = Utc::now().timestamp();
        let mut tables = self.tables.write().await;
        if let Some(claim) = tables.claims.get_mut(&update_id) {
            *claim = (ClaimState::Completed, now);
        }
        Ok(())
    }

    async fn release_update_claim(&self, update_id: i64) -> Result<(), RepositoryError> {
        self.tables.write().await.claims.remove(&update_id);
        Ok(())
    }

    async fn cleanup_expired_updates(&self, ttl_seconds: i64) -> Result<usize, RepositoryError> {
        let cutoff = Utc::now().timestamp() - ttl_seconds;
        let mut tables = self.tables.write().await;
        let before = tables.claims.len();
        tables
            .claims
            .retain(|_, (state, at)| !(*state == ClaimState::Completed && *at <= cutoff));
        Ok(before - tables.claims.len())
    }
}
