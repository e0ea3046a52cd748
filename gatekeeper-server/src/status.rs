//! Health and status endpoints.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use tracing::{error, warn};

use crate::state_machine::{RequestRecord, RequestState};
use crate::webhook::verify_secret_token;
use crate::AppState;

/// A pending request as shown on the status endpoint. Answers are omitted.
#[derive(Debug, Serialize)]
pub struct PendingEntry {
    pub request_id: String,
    pub requester: i64,
    pub label: String,
    pub admin_ref: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub waiting_since: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct StatusData {
    pub version: String,
    pub counts: BTreeMap<String, u64>,
    pub pending: Vec<PendingEntry>,
}

impl StatusData {
    pub fn new(counts: BTreeMap<RequestState, u64>, pending: &[RequestRecord]) -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            counts: counts
                .into_iter()
                .map(|(state, count)| (state.as_str().to_string(), count))
                .collect(),
            pending: pending
                .iter()
                .map(|record| PendingEntry {
                    request_id: record.id.to_string(),
                    requester: record.requester.0,
                    label: record.label(),
                    admin_ref: record.admin_ref.map(|r| r.0),
                    created_at: record.created_at,
                    waiting_since: record.updated_at,
                })
                .collect(),
        }
    }
}

/// Check `Authorization: Bearer <token>` against the configured token.
///
/// No configured token means the endpoint is disabled.
pub fn authorize(expected: Option<&str>, headers: &HeaderMap) -> Result<(), StatusCode> {
    let Some(expected) = expected else {
        return Err(StatusCode::FORBIDDEN);
    };
    let presented = headers
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .ok_or(StatusCode::UNAUTHORIZED)?;
    if verify_secret_token(expected, presented) {
        Ok(())
    } else {
        warn!("Rejected /status request with a wrong token");
        Err(StatusCode::UNAUTHORIZED)
    }
}

async fn health_check() -> Json<serde_json::Value> {
    Json(json!({
        "status": "healthy",
        "service": "gatekeeper"
    }))
}

async fn status_handler(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    if let Err(status) = authorize(state.status_auth_token.as_deref(), &headers) {
        return status.into_response();
    }

    let repo = state.gatekeeper.repository();
    let data = async {
        let counts = repo.state_counts().await?;
        let pending = repo.list_by_state(RequestState::PendingReview).await?;
        Ok::<_, crate::state_machine::RepositoryError>(StatusData::new(counts, &pending))
    }
    .await;

    match data {
        Ok(data) => Json(data).into_response(),
        Err(e) => {
            error!("Could not load status: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

pub fn status_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/health", get(health_check))
        .route("/status", get(status_handler))
}
