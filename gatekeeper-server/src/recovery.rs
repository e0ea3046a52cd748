//! Startup reconciliation and the periodic maintenance sweep.
//!
//! Requests can be left mid-flight by a crash or by an outbound failure: a
//! complete survey whose summary was never posted, an approval whose invite
//! was never created or delivered, a rejection whose notice never went out.
//! The sweep drives each of them one step further.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::interval;
use tracing::{error, info};

use crate::gatekeeper::Gatekeeper;
use crate::state_machine::{IssueOutcome, LifecycleError, RequestState};
use crate::AppState;

/// Completed update claims are kept this long for de-duplication.
pub const UPDATE_CLAIM_RETENTION_SECONDS: i64 = 24 * 60 * 60;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    /// Complete surveys whose summary is now posted.
    pub submitted: usize,
    /// Approved requests whose invite is now delivered.
    pub invited: usize,
    /// Rejections now closed.
    pub closed: usize,
    /// Requests that are still stuck after this sweep.
    pub still_pending: usize,
}

/// Drive every stuck request one step further.
///
/// `report_failures` lets invite creation failures notify the admins; the
/// periodic sweep leaves it off so admins are not told every interval.
pub async fn sweep(
    gatekeeper: &Gatekeeper,
    report_failures: bool,
) -> Result<SweepReport, LifecycleError> {
    let repo = gatekeeper.repository();
    let mut report = SweepReport::default();

    for record in repo.list_by_state(RequestState::InSurvey).await? {
        if !record.survey_complete() {
            continue;
        }
        match gatekeeper
            .approval()
            .submit_for_review(record.requester, false)
            .await
        {
            Ok(after) if after.state == RequestState::PendingReview => report.submitted += 1,
            Ok(_) => report.still_pending += 1,
            // Changed under us; the next sweep sees the new state.
            Err(LifecycleError::NoActiveSurvey(_)) => {}
            Err(e) => return Err(e),
        }
    }

    for record in repo.list_by_state(RequestState::Approved).await? {
        match gatekeeper
            .issuer()
            .issue(record.requester, report_failures)
            .await?
        {
            IssueOutcome::Delivered => report.invited += 1,
            IssueOutcome::DeliveryPending => report.still_pending += 1,
            IssueOutcome::NotApproved => {}
        }
    }

    for record in repo.list_by_state(RequestState::Rejected).await? {
        match gatekeeper.approval().finish_rejection(record.requester).await? {
            Some(after) if after.state == RequestState::Closed => report.closed += 1,
            Some(_) => report.still_pending += 1,
            None => {}
        }
    }

    Ok(report)
}

/// Run before serving: finish whatever the previous process left behind.
pub async fn reconcile_on_startup(gatekeeper: &Gatekeeper) {
    info!("Starting crash recovery reconciliation...");
    match sweep(gatekeeper, true).await {
        Ok(report) => info!(
            "Reconciliation complete: {} submitted, {} invited, {} closed, {} still pending",
            report.submitted, report.invited, report.closed, report.still_pending
        ),
        Err(e) => error!("Reconciliation aborted: {}", e),
    }
}

/// Periodic sweep, update-claim cleanup and lock pruning.
pub async fn maintenance_loop(state: Arc<AppState>, period: Duration) {
    let mut ticker = interval(period);
    // The first tick fires immediately; startup already reconciled.
    ticker.tick().await;

    loop {
        ticker.tick().await;
        run_maintenance(&state.gatekeeper).await;
    }
}

pub async fn run_maintenance(gatekeeper: &Gatekeeper) {
    match sweep(gatekeeper, false).await {
        Ok(report) if report != SweepReport::default() => info!(
            "Maintenance: {} submitted, {} invited, {} closed, {} still pending",
            report.submitted, report.invited, report.closed, report.still_pending
        ),
        Ok(_) => {}
        Err(e) => error!("Maintenance sweep failed: {}", e),
    }

    match gatekeeper
        .repository()
        .cleanup_expired_updates(UPDATE_CLAIM_RETENTION_SECONDS)
        .await
    {
        Ok(0) => {}
        Ok(removed) => info!("Removed {} expired update claims", removed),
        Err(e) => error!("Update claim cleanup failed: {}", e),
    }

    gatekeeper.store().prune_locks().await;
}
