//! Outbound capabilities the lifecycle depends on.
//!
//! The core never talks to a chat platform directly. It sees a `Messenger`
//! for sending text and a `GroupMembership` for invites and membership
//! checks; `telegram` implements both, tests use in-process fakes.

use std::time::Duration;

use async_trait::async_trait;

use crate::state_machine::state::{AdminRef, InviteHandle, RequesterId};

/// Failure talking to the platform.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChannelError {
    /// Worth retrying: rate limits, server errors, network trouble.
    #[error("transient channel error: {message}")]
    Transient {
        message: String,
        retry_after: Option<Duration>,
    },

    /// Retrying will not help: bad request, blocked by the user, missing rights.
    #[error("permanent channel error: {message}")]
    Permanent { message: String },
}

impl ChannelError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient {
            message: message.into(),
            retry_after: None,
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self::Permanent {
            message: message.into(),
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Transient { retry_after, .. } => *retry_after,
            Self::Permanent { .. } => None,
        }
    }
}

/// Buttons attached to a summary in the admin channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdminAction {
    Approve,
    Reject,
}

impl AdminAction {
    pub const ALL: [AdminAction; 2] = [AdminAction::Approve, AdminAction::Reject];

    pub fn label(&self) -> &'static str {
        match self {
            Self::Approve => "Approve",
            Self::Reject => "Reject",
        }
    }

    /// Opaque payload echoed back when the button is pressed.
    pub fn callback_data(&self) -> &'static str {
        match self {
            Self::Approve => "approve",
            Self::Reject => "reject",
        }
    }

    pub fn from_callback_data(data: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|a| a.callback_data() == data)
    }
}

#[async_trait]
pub trait Messenger: Send + Sync {
    async fn send_to_user(&self, user: RequesterId, text: &str) -> Result<(), ChannelError>;

    /// Post to the admin channel with the given actions; returns the message reference.
    async fn send_to_admin_channel(
        &self,
        text: &str,
        actions: &[AdminAction],
    ) -> Result<AdminRef, ChannelError>;

    async fn send_invite_to_user(
        &self,
        user: RequesterId,
        invite: &InviteHandle,
    ) -> Result<(), ChannelError>;

    /// Remove the actions from an earlier admin post.
    async fn clear_admin_actions(&self, reference: AdminRef) -> Result<(), ChannelError>;

    /// Post plain text to the admin channel.
    async fn notify_admins(&self, text: &str) -> Result<(), ChannelError>;

    /// Acknowledge a button press so the client stops its spinner.
    async fn acknowledge_action(&self, _action_id: &str, _text: &str) -> Result<(), ChannelError> {
        Ok(())
    }
}

#[async_trait]
pub trait GroupMembership: Send + Sync {
    /// Create a single-use invite to the target group valid for `ttl`.
    async fn create_invite(
        &self,
        for_user: RequesterId,
        ttl: Duration,
    ) -> Result<InviteHandle, ChannelError>;

    /// Invalidate an invite so it can no longer be used.
    async fn revoke_invite(&self, invite: &InviteHandle) -> Result<(), ChannelError>;

    async fn is_member(&self, user: RequesterId) -> Result<bool, ChannelError>;
}
