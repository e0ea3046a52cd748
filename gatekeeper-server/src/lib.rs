pub mod channel;
pub mod command;
pub mod config;
pub mod delivery;
pub mod gatekeeper;
pub mod ingest;
pub mod locks;
pub mod logging;
pub mod polling;
pub mod recovery;
pub mod state_machine;
pub mod status;
pub mod telegram;
pub mod updates;
pub mod webhook;

use std::sync::Arc;

use axum::Router;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

pub use gatekeeper::{Gatekeeper, GatekeeperSettings};

pub struct AppState {
    pub gatekeeper: Arc<Gatekeeper>,
    /// Expected `X-Telegram-Bot-Api-Secret-Token`; the webhook refuses every call when unset.
    pub webhook_secret: Option<String>,
    pub status_auth_token: Option<String>,
}

/// HTTP surface: health, status and the Telegram webhook.
pub fn app_router(state: Arc<AppState>) -> Router {
    Router::new()
        .merge(status::status_router())
        .merge(webhook::webhook_router())
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(state)
}
