//! Long-polling ingestion via `getUpdates`.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::ingest::{process_update, UpdateDisposition};
use crate::telegram::TelegramClient;
use crate::AppState;

/// Pause after a failed `getUpdates` call or a failed update.
const POLL_ERROR_BACKOFF: Duration = Duration::from_secs(5);

/// Offset to request after processing `update_id`, if it may be acknowledged.
///
/// Telegram drops every update below the requested offset, so the offset only
/// moves past updates that are finished (or being finished elsewhere).
pub fn next_offset(update_id: i64, disposition: UpdateDisposition) -> Option<i64> {
    match disposition {
        UpdateDisposition::Processed
        | UpdateDisposition::AlreadyCompleted
        | UpdateDisposition::InProgress => Some(update_id + 1),
        UpdateDisposition::Failed => None,
    }
}

/// Poll forever, dispatching updates in order.
pub async fn polling_loop(state: Arc<AppState>, client: Arc<TelegramClient>) {
    if let Err(e) = client.delete_webhook().await {
        warn!("Could not remove webhook before polling: {}", e);
    }
    info!("Polling for updates");

    let mut offset: Option<i64> = None;
    loop {
        let updates = match client.get_updates(offset).await {
            Ok(updates) => updates,
            Err(e) => {
                warn!("getUpdates failed: {}", e);
                tokio::time::sleep(POLL_ERROR_BACKOFF).await;
                continue;
            }
        };

        for update in updates {
            let disposition = process_update(&state.gatekeeper, &update).await;
            match next_offset(update.update_id, disposition) {
                Some(next) => offset = Some(next),
                None => {
                    // Fetch again from the failed update.
                    tokio::time::sleep(POLL_ERROR_BACKOFF).await;
                    break;
                }
            }
        }
    }
}
