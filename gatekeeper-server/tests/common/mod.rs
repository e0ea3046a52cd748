//! In-process fakes for the outbound channels.
#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use gatekeeper_server::channel::{AdminAction, ChannelError, GroupMembership, Messenger};
use gatekeeper_server::delivery::RetryPolicy;
use gatekeeper_server::state_machine::{
    AdminRef, InviteHandle, RequestRepository, RequesterId,
};
use gatekeeper_server::updates::{CallbackQuery, Chat, Message, Update, User};
use gatekeeper_server::{Gatekeeper, GatekeeperSettings};

pub const ADMIN_CHAT: i64 = -100;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sent {
    ToUser { user: i64, text: String },
    Summary { reference: i64, text: String, actions: usize },
    Invite { user: i64, link: String },
    Cleared { reference: i64 },
    AdminNote { text: String },
    Ack { id: String, text: String },
}

#[derive(Default)]
pub struct FakeMessenger {
    pub sent: Mutex<Vec<Sent>>,
    next_reference: AtomicI64,
    pub fail_admin_posts: AtomicBool,
    pub fail_user_sends: AtomicBool,
}

impl FakeMessenger {
    pub fn sent(&self) -> Vec<Sent> {
        self.sent.lock().unwrap().clone()
    }

    pub fn to_user(&self, user: i64) -> Vec<String> {
        self.sent()
            .into_iter()
            .filter_map(|s| match s {
                Sent::ToUser { user: u, text } if u == user => Some(text),
                _ => None,
            })
            .collect()
    }

    pub fn summaries(&self) -> Vec<(i64, String)> {
        self.sent()
            .into_iter()
            .filter_map(|s| match s {
                Sent::Summary {
                    reference, text, ..
                } => Some((reference, text)),
                _ => None,
            })
            .collect()
    }

    pub fn invites(&self) -> Vec<(i64, String)> {
        self.sent()
            .into_iter()
            .filter_map(|s| match s {
                Sent::Invite { user, link } => Some((user, link)),
                _ => None,
            })
            .collect()
    }

    pub fn admin_notes(&self) -> Vec<String> {
        self.sent()
            .into_iter()
            .filter_map(|s| match s {
                Sent::AdminNote { text } => Some(text),
                _ => None,
            })
            .collect()
    }

    fn push(&self, sent: Sent) {
        self.sent.lock().unwrap().push(sent);
    }
}

#[async_trait]
impl Messenger for FakeMessenger {
    async fn send_to_user(&self, user: RequesterId, text: &str) -> Result<(), ChannelError> {
        if self.fail_user_sends.load(Ordering::SeqCst) {
            return Err(ChannelError::transient("user send failed"));
        }
        self.push(Sent::ToUser {
            user: user.0,
            text: text.to_string(),
        });
        Ok(())
    }

    async fn send_to_admin_channel(
        &self,
        text: &str,
        actions: &[AdminAction],
    ) -> Result<AdminRef, ChannelError> {
        if self.fail_admin_posts.load(Ordering::SeqCst) {
            return Err(ChannelError::transient("admin chat unavailable"));
        }
        let reference = 1000 + self.next_reference.fetch_add(1, Ordering::SeqCst);
        self.push(Sent::Summary {
            reference,
            text: text.to_string(),
            actions: actions.len(),
        });
        Ok(AdminRef(reference))
    }

    async fn send_invite_to_user(
        &self,
        user: RequesterId,
        invite: &InviteHandle,
    ) -> Result<(), ChannelError> {
        if self.fail_user_sends.load(Ordering::SeqCst) {
            return Err(ChannelError::permanent("bot was blocked by the user"));
        }
        self.push(Sent::Invite {
            user: user.0,
            link: invite.link.clone(),
        });
        Ok(())
    }

    async fn clear_admin_actions(&self, reference: AdminRef) -> Result<(), ChannelError> {
        self.push(Sent::Cleared {
            reference: reference.0,
        });
        Ok(())
    }

    async fn notify_admins(&self, text: &str) -> Result<(), ChannelError> {
        self.push(Sent::AdminNote {
            text: text.to_string(),
        });
        Ok(())
    }

    async fn acknowledge_action(&self, action_id: &str, text: &str) -> Result<(), ChannelError> {
        self.push(Sent::Ack {
            id: action_id.to_string(),
            text: text.to_string(),
        });
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeMembership {
    pub created: AtomicUsize,
    pub members: Mutex<HashSet<i64>>,
    pub revoked: Mutex<Vec<String>>,
    pub fail_invites: AtomicBool,
}

impl FakeMembership {
    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl GroupMembership for FakeMembership {
    async fn create_invite(
        &self,
        for_user: RequesterId,
        ttl: Duration,
    ) -> Result<InviteHandle, ChannelError> {
        if self.fail_invites.load(Ordering::SeqCst) {
            return Err(ChannelError::permanent("not enough rights to manage invite links"));
        }
        let n = self.created.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(InviteHandle {
            link: format!("https://t.me/+invite-{}-{}", for_user, n),
            expires_at: Some(Utc::now() + chrono::Duration::seconds(ttl.as_secs() as i64)),
        })
    }

    async fn revoke_invite(&self, invite: &InviteHandle) -> Result<(), ChannelError> {
        self.revoked.lock().unwrap().push(invite.link.clone());
        Ok(())
    }

    async fn is_member(&self, user: RequesterId) -> Result<bool, ChannelError> {
        Ok(self.members.lock().unwrap().contains(&user.0))
    }
}

pub struct Harness {
    pub gatekeeper: Gatekeeper,
    pub messenger: Arc<FakeMessenger>,
    pub membership: Arc<FakeMembership>,
}

pub fn questions() -> Vec<String> {
    vec![
        "What's your name?".to_string(),
        "Why do you want to join?".to_string(),
        "How did you hear about us?".to_string(),
    ]
}

pub fn settings() -> GatekeeperSettings {
    GatekeeperSettings {
        admin_chat_id: ADMIN_CHAT,
        bot_username: Some("gatebot".to_string()),
        questions: questions(),
        retry: RetryPolicy::once(),
        invite_ttl: Duration::from_secs(86_400),
    }
}

pub fn harness(repo: Arc<dyn RequestRepository>) -> Harness {
    harness_with(repo, settings())
}

pub fn harness_with(repo: Arc<dyn RequestRepository>, settings: GatekeeperSettings) -> Harness {
    let messenger = Arc::new(FakeMessenger::default());
    let membership = Arc::new(FakeMembership::default());
    Harness {
        gatekeeper: Gatekeeper::new(repo, messenger.clone(), membership.clone(), settings),
        messenger,
        membership,
    }
}

// =============================================================================
// Update builders
// =============================================================================

pub fn user(id: i64, username: &str) -> User {
    User {
        id,
        is_bot: false,
        first_name: username.to_uppercase(),
        last_name: None,
        username: Some(username.to_string()),
    }
}

pub fn private_text(update_id: i64, from: i64, text: &str) -> Update {
    Update {
        update_id,
        message: Some(Message {
            message_id: update_id,
            chat: Chat {
                id: from,
                kind: "private".to_string(),
            },
            from: Some(user(from, &format!("user{}", from))),
            text: Some(text.to_string()),
            reply_to_message: None,
        }),
        callback_query: None,
    }
}

pub fn private_photo(update_id: i64, from: i64) -> Update {
    let mut update = private_text(update_id, from, "");
    if let Some(message) = update.message.as_mut() {
        message.text = None;
    }
    update
}

fn admin_chat_message(message_id: i64) -> Message {
    Message {
        message_id,
        chat: Chat {
            id: ADMIN_CHAT,
            kind: "supergroup".to_string(),
        },
        from: None,
        text: None,
        reply_to_message: None,
    }
}

pub fn admin_reply(update_id: i64, admin: i64, reply_to: i64, text: &str) -> Update {
    let mut message = admin_chat_message(update_id);
    message.from = Some(user(admin, "alice"));
    message.text = Some(text.to_string());
    message.reply_to_message = Some(Box::new(admin_chat_message(reply_to)));
    Update {
        update_id,
        message: Some(message),
        callback_query: None,
    }
}

pub fn admin_command(update_id: i64, admin: i64, text: &str) -> Update {
    let mut update = admin_reply(update_id, admin, 0, text);
    if let Some(message) = update.message.as_mut() {
        message.reply_to_message = None;
    }
    update
}

pub fn button(update_id: i64, admin: i64, chat: i64, message_id: i64, data: &str) -> Update {
    let mut message = admin_chat_message(message_id);
    message.chat.id = chat;
    Update {
        update_id,
        message: None,
        callback_query: Some(CallbackQuery {
            id: format!("cbq-{}", update_id),
            from: user(admin, "alice"),
            message: Some(message),
            data: Some(data.to_string()),
        }),
    }
}
