//! At-most-once processing of inbound updates.
//!
//! Shared by the webhook and the long-polling loop. An update is claimed by
//! its `update_id`, dispatched, and the claim completed; a dispatch that
//! failed releases the claim so a redelivery can try again.

use tracing::{error, warn};

use crate::gatekeeper::Gatekeeper;
use crate::state_machine::UpdateClaim;
use crate::updates::Update;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateDisposition {
    Processed,
    /// Seen and finished before.
    AlreadyCompleted,
    /// Another worker holds the claim.
    InProgress,
    /// Dispatch or claim bookkeeping failed; the update should be redelivered.
    Failed,
}

pub async fn process_update(gatekeeper: &Gatekeeper, update: &Update) -> UpdateDisposition {
    let repo = gatekeeper.repository();

    match repo.try_claim_update(update.update_id).await {
        Ok(UpdateClaim::Claimed) => {}
        Ok(UpdateClaim::InProgress) => return UpdateDisposition::InProgress,
        Ok(UpdateClaim::Completed) => return UpdateDisposition::AlreadyCompleted,
        Err(e) => {
            error!("Could not claim update {}: {}", update.update_id, e);
            return UpdateDisposition::Failed;
        }
    }

    match gatekeeper.handle_update(update).await {
        Ok(()) => {
            if let Err(e) = repo.complete_update_claim(update.update_id).await {
                // Processing happened; a redelivery is re-claimed once the claim goes stale.
                warn!(
                    "Could not mark update {} completed: {}",
                    update.update_id, e
                );
            }
            UpdateDisposition::Processed
        }
        Err(e) => {
            error!("Processing update {} failed: {}", update.update_id, e);
            if let Err(release_err) = repo.release_update_claim(update.update_id).await {
                error!(
                    "Could not release claim on update {}: {}",
                    update.update_id, release_err
                );
            }
            UpdateDisposition::Failed
        }
    }
}
