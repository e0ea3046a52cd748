//! Telegram webhook endpoint.
//!
//! Telegram signs nothing; it echoes the secret registered with `setWebhook`
//! in `X-Telegram-Bot-Api-Secret-Token`. Each update is claimed by
//! `update_id` before dispatch so redeliveries are processed at most once.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    routing::post,
    Json, Router,
};
use hmac::{Hmac, Mac};
use serde::Serialize;
use sha2::Sha256;
use tracing::{debug, error, info, warn};

use crate::ingest::{process_update, UpdateDisposition};
use crate::updates::Update;
use crate::AppState;

pub const SECRET_HEADER: &str = "x-telegram-bot-api-secret-token";

#[derive(Serialize)]
pub struct WebhookResponse {
    pub message: String,
}

type HmacSha256 = Hmac<Sha256>;

const SECRET_MAC_KEY: &[u8] = b"telegram-webhook-secret";

/// Compare the presented secret with the expected one in constant time.
///
/// Both values are run through HMAC first so the comparison does not leak
/// the secret's length either.
pub fn verify_secret_token(expected: &str, presented: &str) -> bool {
    let Ok(mut expected_mac) = HmacSha256::new_from_slice(SECRET_MAC_KEY) else {
        return false;
    };
    expected_mac.update(expected.as_bytes());
    let expected_tag = expected_mac.finalize().into_bytes();

    let Ok(mut presented_mac) = HmacSha256::new_from_slice(SECRET_MAC_KEY) else {
        return false;
    };
    presented_mac.update(presented.as_bytes());
    presented_mac.verify_slice(&expected_tag).is_ok()
}

pub async fn telegram_webhook_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookResponse>, StatusCode> {
    let Some(expected) = state.webhook_secret.as_deref() else {
        error!("Webhook called but no secret is configured");
        return Err(StatusCode::FORBIDDEN);
    };
    let presented = headers
        .get(SECRET_HEADER)
        .and_then(|h| h.to_str().ok())
        .ok_or(StatusCode::UNAUTHORIZED)?;
    if !verify_secret_token(expected, presented) {
        warn!("Invalid webhook secret token");
        return Err(StatusCode::UNAUTHORIZED);
    }

    let update: Update = serde_json::from_slice(&body).map_err(|e| {
        warn!("Malformed update payload: {}", e);
        StatusCode::BAD_REQUEST
    })?;
    debug!("Received update {}", update.update_id);

    match process_update(&state.gatekeeper, &update).await {
        UpdateDisposition::Processed => Ok(Json(WebhookResponse {
            message: "processed".to_string(),
        })),
        UpdateDisposition::AlreadyCompleted => {
            info!("Update {} already processed", update.update_id);
            Ok(Json(WebhookResponse {
                message: "duplicate".to_string(),
            }))
        }
        UpdateDisposition::InProgress => Err(StatusCode::CONFLICT),
        UpdateDisposition::Failed => Err(StatusCode::INTERNAL_SERVER_ERROR),
    }
}

pub fn webhook_router() -> Router<Arc<AppState>> {
    Router::new().route("/telegram/webhook", post(telegram_webhook_handler))
}
