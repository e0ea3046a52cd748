//! Durable request store with per-key locking.
//!
//! Wraps a `RequestRepository` with the keyed locks that serialize mutations
//! and with the drive loop that runs the state machine: transition, write,
//! then effects. A record change is always durable before anything leaves
//! the process.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, info};

use super::error::LifecycleError;
use super::event::Event;
use super::interpreter::{execute_effects, InterpreterContext};
use super::repository::RequestRepository;
use super::state::{AdminRef, RequestRecord, RequesterId};
use super::transition::{transition, TransitionResult};
use crate::locks::KeyedLocks;

pub struct RequestStore {
    repo: Arc<dyn RequestRepository>,
    /// Serializes every mutation of one requester's records.
    identity_locks: KeyedLocks<RequesterId>,
    /// Serializes decisions on one admin message. Taken before the identity lock.
    reference_locks: KeyedLocks<AdminRef>,
}

impl RequestStore {
    pub fn new(repo: Arc<dyn RequestRepository>) -> Self {
        Self {
            repo,
            identity_locks: KeyedLocks::new(),
            reference_locks: KeyedLocks::new(),
        }
    }

    pub fn repository(&self) -> &Arc<dyn RequestRepository> {
        &self.repo
    }

    pub async fn lock_identity(&self, requester: RequesterId) -> OwnedMutexGuard<()> {
        self.identity_locks.lock(&requester).await
    }

    pub async fn lock_reference(&self, reference: AdminRef) -> OwnedMutexGuard<()> {
        self.reference_locks.lock(&reference).await
    }

    /// Drop idle lock entries. Returns how many were removed.
    pub async fn prune_locks(&self) -> usize {
        self.identity_locks.prune().await + self.reference_locks.prune().await
    }

    /// Persist a brand-new record. The caller holds the identity lock.
    pub async fn create(&self, record: &RequestRecord) -> Result<(), LifecycleError> {
        self.repo.put(record).await?;
        info!(
            "Created request {} for requester {}",
            record.id, record.requester
        );
        Ok(())
    }

    /// Feed `event` to the record's state machine until no result events remain.
    ///
    /// Each changed record is written (version bumped) before its effects run;
    /// a failed write aborts with nothing sent. The caller holds the identity
    /// lock. Returns the final record.
    pub async fn drive(
        &self,
        record: RequestRecord,
        event: Event,
        ctx: &InterpreterContext,
    ) -> Result<RequestRecord, LifecycleError> {
        let mut current = record;
        let mut events_to_process = vec![event];

        while let Some(event) = events_to_process.pop() {
            debug!(
                "Processing {} for request {} in state {}",
                event.log_summary(),
                current.id,
                current.state
            );

            let now = Utc::now();
            let TransitionResult { record, effects } = transition(current.clone(), event, now);

            let record = if record != current {
                let mut next = record;
                next.version = current.version + 1;
                next.updated_at = now;
                self.repo.put(&next).await?;
                if next.state != current.state {
                    info!(
                        "Request {} moved {} -> {}",
                        next.id, current.state, next.state
                    );
                }
                next
            } else {
                record
            };
            current = record;

            if !effects.is_empty() {
                let result_events = execute_effects(ctx, &current, effects).await;
                // Reverse so they pop in the order they were produced.
                for result_event in result_events.into_iter().rev() {
                    events_to_process.push(result_event);
                }
            }
        }

        Ok(current)
    }
}
