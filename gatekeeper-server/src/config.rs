use anyhow::{bail, Context, Result};
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::delivery::RetryPolicy;
use crate::telegram::DEFAULT_API_BASE;

/// Asked when no question file is configured.
pub const DEFAULT_QUESTIONS: [&str; 5] = [
    "What's your name?",
    "What's your age?",
    "Why do you want to join this group?",
    "How did you hear about us?",
    "What do you hope to contribute to the community?",
];

/// How Telegram updates reach the bot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestMode {
    Webhook,
    Polling,
}

impl std::str::FromStr for IngestMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "webhook" => Ok(Self::Webhook),
            "polling" => Ok(Self::Polling),
            other => bail!("INGEST_MODE must be 'webhook' or 'polling', got '{}'", other),
        }
    }
}

#[derive(Clone)]
pub struct Config {
    pub bot_token: String,
    pub admin_chat_id: i64,
    pub target_chat_id: i64,
    pub questions: Vec<String>,
    pub ingest_mode: IngestMode,
    /// Required in webhook mode; echoed by Telegram in every webhook call.
    pub webhook_secret: Option<String>,
    /// When set, the webhook is registered at `{public_url}/telegram/webhook` on startup.
    pub public_url: Option<String>,
    pub port: u16,
    /// Directory for persistent state (SQLite database).
    pub state_dir: PathBuf,
    /// If not set, /status endpoint is disabled (returns 403 Forbidden).
    pub status_auth_token: Option<String>,
    pub invite_ttl: Duration,
    pub retry: RetryPolicy,
    pub maintenance_interval: Duration,
    pub telegram_api_base: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        // A missing .env file is fine.
        let _ = dotenvy::dotenv();

        let bot_token = env::var("BOT_TOKEN").context("BOT_TOKEN environment variable is required")?;

        let admin_chat_id = env::var("ADMIN_CHAT_ID")
            .context("ADMIN_CHAT_ID environment variable is required")?
            .trim()
            .parse::<i64>()
            .context("ADMIN_CHAT_ID must be a valid integer")?;

        let target_chat_id = env::var("TARGET_CHAT_ID")
            .context("TARGET_CHAT_ID environment variable is required")?
            .trim()
            .parse::<i64>()
            .context("TARGET_CHAT_ID must be a valid integer")?;

        let questions = match non_empty_var("SURVEY_QUESTIONS_PATH") {
            Some(path) => load_questions(Path::new(&path))?,
            None => DEFAULT_QUESTIONS.iter().map(|q| q.to_string()).collect(),
        };

        let ingest_mode = non_empty_var("INGEST_MODE")
            .map(|v| v.parse::<IngestMode>())
            .transpose()?
            .unwrap_or(IngestMode::Webhook);

        let webhook_secret = non_empty_var("WEBHOOK_SECRET");
        if ingest_mode == IngestMode::Webhook && webhook_secret.is_none() {
            bail!("WEBHOOK_SECRET environment variable is required in webhook mode");
        }

        let public_url = non_empty_var("PUBLIC_URL").map(|u| u.trim_end_matches('/').to_string());

        let port = parse_or("PORT", 3000u16).context("PORT must be a valid number")?;

        let state_dir = env::var("STATE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("."));

        let status_auth_token = parse_status_auth_token(env::var("STATUS_AUTH_TOKEN").ok());

        let invite_ttl = Duration::from_secs(
            parse_or("INVITE_TTL_SECS", 86_400u64).context("INVITE_TTL_SECS must be a number")?,
        );

        let max_attempts = parse_or("DELIVERY_MAX_ATTEMPTS", 4u32)
            .context("DELIVERY_MAX_ATTEMPTS must be a number")?;
        let base_delay_ms = parse_or("DELIVERY_BASE_DELAY_MS", 500u64)
            .context("DELIVERY_BASE_DELAY_MS must be a number")?;
        let retry = RetryPolicy::new(max_attempts, Duration::from_millis(base_delay_ms));

        let maintenance_secs = parse_or("MAINTENANCE_INTERVAL_SECS", 60u64)
            .context("MAINTENANCE_INTERVAL_SECS must be a number")?;
        if maintenance_secs == 0 {
            bail!("MAINTENANCE_INTERVAL_SECS must be positive");
        }

        let telegram_api_base =
            non_empty_var("TELEGRAM_API_BASE").unwrap_or_else(|| DEFAULT_API_BASE.to_string());

        Ok(Config {
            bot_token,
            admin_chat_id,
            target_chat_id,
            questions,
            ingest_mode,
            webhook_secret,
            public_url,
            port,
            state_dir,
            status_auth_token,
            invite_ttl,
            retry,
            maintenance_interval: Duration::from_secs(maintenance_secs),
            telegram_api_base,
        })
    }

    pub fn db_path(&self) -> PathBuf {
        self.state_dir.join("gatekeeper-state.db")
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|s| !s.trim().is_empty())
}

fn parse_or<T>(name: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match non_empty_var(name) {
        Some(value) => Ok(value.trim().parse::<T>()?),
        None => Ok(default),
    }
}

/// Parse STATUS_AUTH_TOKEN from an optional string value.
///
/// Returns None if the value is missing, empty, or contains only whitespace.
pub fn parse_status_auth_token(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.trim().is_empty())
}

/// Parse a question list: a JSON array of non-empty strings.
pub fn parse_questions(json: &str) -> Result<Vec<String>> {
    let questions: Vec<String> =
        serde_json::from_str(json).context("question file must be a JSON array of strings")?;
    if questions.is_empty() {
        bail!("question list is empty");
    }
    if let Some(index) = questions.iter().position(|q| q.trim().is_empty()) {
        bail!("question {} is empty", index + 1);
    }
    Ok(questions.into_iter().map(|q| q.trim().to_string()).collect())
}

pub fn load_questions(path: &Path) -> Result<Vec<String>> {
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("reading question file {}", path.display()))?;
    parse_questions(&json).with_context(|| format!("invalid question file {}", path.display()))
}
