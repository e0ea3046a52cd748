//! Inbound update de-duplication for the SQLite repository.
//!
//! - the first handler claims an update id and processes it
//! - concurrent handlers see `InProgress` and back off
//! - after completion every handler sees `Completed`
//!
//! In-progress claims older than `STALE_CLAIM_TTL_SECONDS` are considered
//! abandoned by a crashed handler and may be reclaimed.

use chrono::Utc;
use rusqlite::{params, Connection};

use super::super::{RepositoryError, UpdateClaim, STALE_CLAIM_TTL_SECONDS};
use super::SqliteRepository;

const IN_PROGRESS: i64 = 0;
const COMPLETED: i64 = 1;

pub(super) fn try_claim_update_sync(
    conn: &Connection,
    update_id: i64,
    now_secs: i64,
    stale_cutoff: i64,
) -> Result<UpdateClaim, String> {
    // INSERT OR IGNORE makes the claim atomic: a losing racer changes nothing.
    conn.execute(
        "INSERT OR IGNORE INTO seen_updates (update_id, recorded_at, claim_state) VALUES (?1, ?2, ?3)",
        params![update_id, now_secs, IN_PROGRESS],
    )
    .map_err(|e| e.to_string())?;

    if conn.changes() > 0 {
        return Ok(UpdateClaim::Claimed);
    }

    let (claim_state, recorded_at): (i64, i64) = conn
        .query_row(
            "SELECT claim_state, recorded_at FROM seen_updates WHERE update_id = ?1",
            params![update_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .map_err(|e| e.to_string())?;

    if claim_state != IN_PROGRESS {
        return Ok(UpdateClaim::Completed);
    }
    if recorded_at > stale_cutoff {
        return Ok(UpdateClaim::InProgress);
    }

    // Conditional update so only one of several racing reclaimers wins.
    conn.execute(
        "UPDATE seen_updates SET recorded_at = ?1 \
         WHERE update_id = ?2 AND claim_state = ?3 AND recorded_at <= ?4",
        params![now_secs, update_id, IN_PROGRESS, stale_cutoff],
    )
    .map_err(|e| e.to_string())?;

    if conn.changes() > 0 {
        Ok(UpdateClaim::Claimed)
    } else {
        Ok(UpdateClaim::InProgress)
    }
}

pub(super) fn complete_update_claim_sync(
    conn: &Connection,
    update_id: i64,
    now_secs: i64,
) -> Result<(), String> {
    conn.execute(
        "UPDATE seen_updates SET claim_state = ?1, recorded_at = ?2 WHERE update_id = ?3",
        params![COMPLETED, now_secs, update_id],
    )
    .map_err(|e| e.to_string())?;
    Ok(())
}

pub(super) fn release_update_claim_sync(conn: &Connection, update_id: i64) -> Result<(), String> {
    conn.execute(
        "DELETE FROM seen_updates WHERE update_id = ?1",
        params![update_id],
    )
    .map_err(|e| e.to_string())?;
    Ok(())
}

pub(super) fn cleanup_expired_updates_sync(conn: &Connection, cutoff: i64) -> Result<usize, String> {
    // In-progress claims are left alone; their handler releases them or they
    // go stale and get reclaimed.
    conn.execute(
        "DELETE FROM seen_updates WHERE recorded_at <= ?1 AND claim_state = ?2",
        params![cutoff, COMPLETED],
    )
    .map_err(|e| e.to_string())
}

// =============================================================================
// Async wrappers
// =============================================================================

impl SqliteRepository {
    pub(super) async fn try_claim_update_impl(
        &self,
        update_id: i64,
    ) -> Result<UpdateClaim, RepositoryError> {
        let now_secs = Utc::now().timestamp();
        let stale_cutoff = now_secs - STALE_CLAIM_TTL_SECONDS;
        self.with_conn("try_claim_update", move |conn| {
            try_claim_update_sync(conn, update_id, now_secs, stale_cutoff)
                .map_err(|e| RepositoryError::storage("try_claim_update", e))
        })
        .await
    }

    pub(super) async fn complete_update_claim_impl(
        &self,
        update_id: i64,
    ) -> Result<(), RepositoryError> {
        let now_secs = Utc::now().timestamp();
        self.with_conn("complete_update_claim", move |conn| {
            complete_update_claim_sync(conn, update_id, now_secs)
                .map_err(|e| RepositoryError::storage("complete_update_claim", e))
        })
        .await
    }

    pub(super) async fn release_update_claim_impl(
        &self,
        update_id: i64,
    ) -> Result<(), RepositoryError> {
        self.with_conn("release_update_claim", move |conn| {
            release_update_claim_sync(conn, update_id)
                .map_err(|e| RepositoryError::storage("release_update_claim", e))
        })
        .await
    }

    pub(super) async fn cleanup_expired_updates_impl(
        &self,
        ttl_seconds: i64,
    ) -> Result<usize, RepositoryError> {
        let cutoff = Utc::now().timestamp() - ttl_seconds;
        self.with_conn("cleanup_expired_updates", move |conn| {
            cleanup_expired_updates_sync(conn, cutoff)
                .map_err(|e| RepositoryError::storage("cleanup_expired_updates", e))
        })
        .await
    }
}
