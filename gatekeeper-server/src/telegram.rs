//! Telegram Bot API client.
//!
//! Implements `Messenger` and `GroupMembership` on top of the HTTPS Bot API.
//! Every response is decoded from the `{ok, result, description, error_code,
//! parameters}` envelope; rate limits, server errors and network trouble are
//! reported as transient, everything else as permanent.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::channel::{AdminAction, ChannelError, GroupMembership, Messenger};
use crate::state_machine::effect::render_invite;
use crate::state_machine::state::{AdminRef, InviteHandle, RequesterId};
use crate::updates::{Message, Update, User};

pub const DEFAULT_API_BASE: &str = "https://api.telegram.org";

/// Seconds a `getUpdates` call may block waiting for updates.
pub const LONG_POLL_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    ok: bool,
    result: Option<T>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    error_code: Option<u16>,
    #[serde(default)]
    parameters: Option<ResponseParameters>,
}

#[derive(Debug, Deserialize)]
struct ResponseParameters {
    #[serde(default)]
    retry_after: Option<u64>,
}

#[derive(Debug, Serialize)]
struct InlineKeyboardButton<'a> {
    text: &'a str,
    callback_data: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatInviteLink {
    invite_link: String,
    #[serde(default)]
    expire_date: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct ChatMember {
    status: String,
}

#[derive(Clone)]
pub struct TelegramClient {
    client: Client,
    /// `{api_base}/bot{token}`
    endpoint: String,
    admin_chat_id: i64,
    target_chat_id: i64,
}

impl TelegramClient {
    pub fn new(api_base: &str, token: &str, admin_chat_id: i64, target_chat_id: i64) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(LONG_POLL_TIMEOUT_SECS + 30))
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            client,
            endpoint: format!("{}/bot{}", api_base.trim_end_matches('/'), token),
            admin_chat_id,
            target_chat_id,
        }
    }

    pub fn admin_chat_id(&self) -> i64 {
        self.admin_chat_id
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, body: Value) -> Result<T, ChannelError> {
        let url = format!("{}/{}", self.endpoint, method);
        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            // The URL carries the bot token; keep it out of errors and logs.
            .map_err(|e| {
                ChannelError::transient(format!("{} request failed: {}", method, e.without_url()))
            })?;

        let status = response.status().as_u16();
        let text = response
            .text()
            .await
            .map_err(|e| {
                ChannelError::transient(format!("{} body unreadable: {}", method, e.without_url()))
            })?;

        debug!("Telegram {} answered HTTP {}", method, status);
        decode_envelope(method, status, &text)
    }

    pub async fn get_me(&self) -> Result<User, ChannelError> {
        self.call("getMe", json!({})).await
    }

    pub async fn send_message(
        &self,
        chat_id: i64,
        text: &str,
        reply_markup: Option<Value>,
    ) -> Result<Message, ChannelError> {
        let mut body = json!({
            "chat_id": chat_id,
            "text": text,
            "disable_web_page_preview": true,
        });
        if let Some(markup) = reply_markup {
            body["reply_markup"] = markup;
        }
        self.call("sendMessage", body).await
    }

    /// Long-poll for updates after `offset`.
    pub async fn get_updates(&self, offset: Option<i64>) -> Result<Vec<Update>, ChannelError> {
        let mut body = json!({
            "timeout": LONG_POLL_TIMEOUT_SECS,
            "allowed_updates": ["message", "callback_query"],
        });
        if let Some(offset) = offset {
            body["offset"] = json!(offset);
        }
        self.call("getUpdates", body).await
    }

    pub async fn set_webhook(&self, url: &str, secret: &str) -> Result<(), ChannelError> {
        let _: bool = self
            .call(
                "setWebhook",
                json!({
                    "url": url,
                    "secret_token": secret,
                    "allowed_updates": ["message", "callback_query"],
                }),
            )
            .await?;
        info!("Registered webhook at {}", url);
        Ok(())
    }

    /// Polling and webhooks are mutually exclusive on Telegram's side.
    pub async fn delete_webhook(&self) -> Result<(), ChannelError> {
        let _: bool = self.call("deleteWebhook", json!({})).await?;
        Ok(())
    }

    pub async fn answer_callback_query(&self, id: &str, text: &str) -> Result<(), ChannelError> {
        let _: bool = self
            .call(
                "answerCallbackQuery",
                json!({ "callback_query_id": id, "text": text }),
            )
            .await?;
        Ok(())
    }
}

/// Inline keyboard with one row holding `actions`.
pub fn inline_keyboard(actions: &[AdminAction]) -> Value {
    let row: Vec<InlineKeyboardButton<'_>> = actions
        .iter()
        .map(|action| InlineKeyboardButton {
            text: action.label(),
            callback_data: action.callback_data(),
        })
        .collect();
    json!({ "inline_keyboard": [row] })
}

/// Decode a Bot API response body.
fn decode_envelope<T: DeserializeOwned>(
    method: &str,
    http_status: u16,
    body: &str,
) -> Result<T, ChannelError> {
    let envelope: Envelope<T> = match serde_json::from_str(body) {
        Ok(envelope) => envelope,
        Err(e) if http_status >= 500 || http_status == 429 => {
            return Err(ChannelError::transient(format!(
                "{} returned HTTP {}: {}",
                method, http_status, e
            )))
        }
        Err(e) => {
            return Err(ChannelError::permanent(format!(
                "{} returned an unreadable body (HTTP {}): {}",
                method, http_status, e
            )))
        }
    };

    if envelope.ok {
        return envelope.result.ok_or_else(|| {
            ChannelError::permanent(format!("{} returned ok without a result", method))
        });
    }

    let code = envelope.error_code.unwrap_or(http_status);
    let message = format!(
        "{} failed ({}): {}",
        method,
        code,
        envelope.description.unwrap_or_default()
    );
    let retry_after = envelope
        .parameters
        .and_then(|p| p.retry_after)
        .map(Duration::from_secs);

    if code == 429 || code >= 500 {
        Err(ChannelError::Transient {
            message,
            retry_after,
        })
    } else {
        Err(ChannelError::permanent(message))
    }
}

fn is_member_status(status: &str) -> bool {
    !matches!(status, "left" | "kicked")
}

#[async_trait]
impl Messenger for TelegramClient {
    async fn send_to_user(&self, user: RequesterId, text: &str) -> Result<(), ChannelError> {
        self.send_message(user.0, text, None).await.map(|_| ())
    }

    async fn send_to_admin_channel(
        &self,
        text: &str,
        actions: &[AdminAction],
    ) -> Result<AdminRef, ChannelError> {
        let markup = (!actions.is_empty()).then(|| inline_keyboard(actions));
        let message = self.send_message(self.admin_chat_id, text, markup).await?;
        Ok(AdminRef(message.message_id))
    }

    async fn send_invite_to_user(
        &self,
        user: RequesterId,
        invite: &InviteHandle,
    ) -> Result<(), ChannelError> {
        self.send_message(user.0, &render_invite(invite), None)
            .await
            .map(|_| ())
    }

    async fn clear_admin_actions(&self, reference: AdminRef) -> Result<(), ChannelError> {
        let result: Result<Value, ChannelError> = self
            .call(
                "editMessageReplyMarkup",
                json!({
                    "chat_id": self.admin_chat_id,
                    "message_id": reference.0,
                    "reply_markup": { "inline_keyboard": [] },
                }),
            )
            .await;
        match result {
            Ok(_) => Ok(()),
            // Already cleared.
            Err(ChannelError::Permanent { message }) if message.contains("message is not modified") => {
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn notify_admins(&self, text: &str) -> Result<(), ChannelError> {
        self.send_message(self.admin_chat_id, text, None)
            .await
            .map(|_| ())
    }

    async fn acknowledge_action(&self, action_id: &str, text: &str) -> Result<(), ChannelError> {
        self.answer_callback_query(action_id, text).await
    }
}

#[async_trait]
impl GroupMembership for TelegramClient {
    async fn create_invite(
        &self,
        for_user: RequesterId,
        ttl: Duration,
    ) -> Result<InviteHandle, ChannelError> {
        let expire_date = Utc::now().timestamp() + ttl.as_secs() as i64;
        let link: ChatInviteLink = self
            .call(
                "createChatInviteLink",
                json!({
                    "chat_id": self.target_chat_id,
                    "name": format!("request {}", for_user),
                    "expire_date": expire_date,
                    "member_limit": 1,
                }),
            )
            .await?;
        Ok(InviteHandle {
            link: link.invite_link,
            expires_at: link
                .expire_date
                .and_then(|ts| DateTime::<Utc>::from_timestamp(ts, 0)),
        })
    }

    async fn revoke_invite(&self, invite: &InviteHandle) -> Result<(), ChannelError> {
        let _: ChatInviteLink = self
            .call(
                "revokeChatInviteLink",
                json!({ "chat_id": self.target_chat_id, "invite_link": invite.link }),
            )
            .await?;
        Ok(())
    }

    async fn is_member(&self, user: RequesterId) -> Result<bool, ChannelError> {
        let member: ChatMember = self
            .call(
                "getChatMember",
                json!({ "chat_id": self.target_chat_id, "user_id": user.0 }),
            )
            .await?;
        Ok(is_member_status(&member.status))
    }
}
