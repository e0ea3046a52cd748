use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};

use gatekeeper_server::config::{Config, IngestMode};
use gatekeeper_server::logging::init_tracing;
use gatekeeper_server::polling::polling_loop;
use gatekeeper_server::recovery::{maintenance_loop, reconcile_on_startup};
use gatekeeper_server::state_machine::SqliteRepository;
use gatekeeper_server::telegram::TelegramClient;
use gatekeeper_server::{app_router, AppState, Gatekeeper, GatekeeperSettings};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env().context("Failed to load configuration")?;
    init_tracing();

    info!("Starting gatekeeper");

    let db_path = config.db_path();
    info!("Using state database: {}", db_path.display());
    let repo = SqliteRepository::new(&db_path).context("Failed to initialize SQLite database")?;

    let telegram = Arc::new(TelegramClient::new(
        &config.telegram_api_base,
        &config.bot_token,
        config.admin_chat_id,
        config.target_chat_id,
    ));

    let bot_username = match telegram.get_me().await {
        Ok(me) => me.username,
        Err(e) => {
            warn!("getMe failed, addressed commands will be ignored: {}", e);
            None
        }
    };

    info!("Survey has {} questions", config.questions.len());
    let gatekeeper = Arc::new(Gatekeeper::new(
        Arc::new(repo),
        telegram.clone(),
        telegram.clone(),
        GatekeeperSettings {
            admin_chat_id: config.admin_chat_id,
            bot_username,
            questions: config.questions.clone(),
            retry: config.retry,
            invite_ttl: config.invite_ttl,
        },
    ));

    let app_state = Arc::new(AppState {
        gatekeeper: gatekeeper.clone(),
        webhook_secret: config.webhook_secret.clone(),
        status_auth_token: config.status_auth_token.clone(),
    });

    // Finish whatever a previous process left half-done before taking new updates.
    reconcile_on_startup(&gatekeeper).await;

    match config.ingest_mode {
        IngestMode::Webhook => {
            if let (Some(public_url), Some(secret)) = (&config.public_url, &config.webhook_secret) {
                telegram
                    .set_webhook(&format!("{}/telegram/webhook", public_url), secret)
                    .await
                    .context("Failed to register webhook")?;
            }
        }
        IngestMode::Polling => {
            let polling_state = app_state.clone();
            let client = telegram.clone();
            tokio::spawn(async move {
                polling_loop(polling_state, client).await;
            });
        }
    }

    let maintenance_state = app_state.clone();
    let period = config.maintenance_interval;
    tokio::spawn(async move {
        maintenance_loop(maintenance_state, period).await;
    });

    let app = app_router(app_state);

    let listener = TcpListener::bind(format!("0.0.0.0:{}", config.port)).await?;
    info!("Server listening on port {}", config.port);

    axum::serve(listener, app).await?;

    Ok(())
}
