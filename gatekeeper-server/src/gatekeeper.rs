//! Update dispatcher.
//!
//! Turns Telegram updates into lifecycle operations. Private chats drive the
//! survey; the admin chat carries decisions and operator commands; every
//! other chat is ignored.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::channel::{AdminAction, GroupMembership, Messenger};
use crate::command::{admin_help, parse_command, requester_help, BotCommand, ParseResult};
use crate::delivery::{with_retry, RetryPolicy};
use crate::state_machine::effect::UserNotice;
use crate::state_machine::{
    AdminIdentity, AdminRef, ApprovalCoordinator, Decision, DecisionOutcome, InterpreterContext,
    InvitationIssuer, LifecycleError, NextQuestion, RequestRecord, RequestRepository,
    RequestState, RequestStore, RequesterId, RequesterProfile, SurveyEngine,
};
use crate::updates::{CallbackQuery, Message, Update, User};

const ALREADY_MEMBER: &str = "You are already a member of the group.";
const PENDING: &str = "Your request is pending approval. Please wait for admin review.";
const SEND_START: &str = "Send /start to request access to the group.";
const TEXT_ONLY: &str =
    "Please send your answer as text only. Images, audio, or other media are not accepted.";
const EMPTY_ANSWER: &str = "Please send a non-empty answer.";
const IN_PROGRESS: &str = "Your survey is already in progress.";
const REPLY_TO_SUMMARY: &str = "Reply to a request summary with /approve or /reject <reason>.";
const NOT_PENDING: &str = "That message is not a pending request.";

/// Static settings for the dispatcher.
#[derive(Debug, Clone)]
pub struct GatekeeperSettings {
    pub admin_chat_id: i64,
    /// Used to accept `/command@botname` in the admin chat.
    pub bot_username: Option<String>,
    pub questions: Vec<String>,
    pub retry: RetryPolicy,
    pub invite_ttl: Duration,
}

pub struct Gatekeeper {
    store: Arc<RequestStore>,
    ctx: Arc<InterpreterContext>,
    survey: SurveyEngine,
    approval: ApprovalCoordinator,
    issuer: Arc<InvitationIssuer>,
    admin_chat_id: i64,
    bot_username: Option<String>,
}

impl Gatekeeper {
    pub fn new(
        repo: Arc<dyn RequestRepository>,
        messenger: Arc<dyn Messenger>,
        membership: Arc<dyn GroupMembership>,
        settings: GatekeeperSettings,
    ) -> Self {
        let store = Arc::new(RequestStore::new(repo));
        let ctx = Arc::new(InterpreterContext {
            messenger,
            membership,
            retry: settings.retry,
            invite_ttl: settings.invite_ttl,
        });
        let issuer = Arc::new(InvitationIssuer::new(store.clone(), ctx.clone()));
        Self {
            survey: SurveyEngine::new(store.clone(), ctx.clone(), settings.questions),
            approval: ApprovalCoordinator::new(store.clone(), ctx.clone(), issuer.clone()),
            issuer,
            store,
            ctx,
            admin_chat_id: settings.admin_chat_id,
            bot_username: settings.bot_username,
        }
    }

    pub fn store(&self) -> &Arc<RequestStore> {
        &self.store
    }

    pub fn repository(&self) -> &Arc<dyn RequestRepository> {
        self.store.repository()
    }

    pub fn survey(&self) -> &SurveyEngine {
        &self.survey
    }

    pub fn approval(&self) -> &ApprovalCoordinator {
        &self.approval
    }

    pub fn issuer(&self) -> &InvitationIssuer {
        &self.issuer
    }

    /// Handle one inbound update.
    ///
    /// Only errors the update should be redelivered for are returned; expected
    /// outcomes such as an already-decided reference are handled here.
    pub async fn handle_update(&self, update: &Update) -> Result<(), LifecycleError> {
        if let Some(query) = &update.callback_query {
            return self.handle_callback(query).await;
        }
        let Some(message) = &update.message else {
            debug!("Update {} carries nothing we handle", update.update_id);
            return Ok(());
        };
        if message.chat.is_private() {
            self.handle_private(message).await
        } else if message.chat.id == self.admin_chat_id {
            self.handle_admin_message(message).await
        } else {
            debug!("Ignoring message from chat {}", message.chat.id);
            Ok(())
        }
    }

    // =========================================================================
    // Requester side
    // =========================================================================

    async fn handle_private(&self, message: &Message) -> Result<(), LifecycleError> {
        let Some(from) = message.from.as_ref().filter(|u| !u.is_bot) else {
            return Ok(());
        };
        let requester = RequesterId(from.id);

        match message.text.as_deref() {
            Some(text) => self.on_user_message(requester, profile_of(from), text).await,
            None => self.reprompt_non_text(requester).await,
        }
    }

    /// A text message from a requester in a private chat.
    pub async fn on_user_message(
        &self,
        requester: RequesterId,
        profile: RequesterProfile,
        text: &str,
    ) -> Result<(), LifecycleError> {
        match parse_command(text, self.bot_username.as_deref()) {
            ParseResult::Command(BotCommand::Start) => self.start(requester, profile).await,
            ParseResult::Command(BotCommand::Help) => {
                self.reply(requester, requester_help()).await;
                Ok(())
            }
            ParseResult::Command(other) => {
                debug!("Ignoring admin command {} in private chat", other);
                self.reply(requester, requester_help()).await;
                Ok(())
            }
            ParseResult::NotACommand | ParseResult::UnrecognizedCommand { .. } => {
                self.answer(requester, text).await
            }
        }
    }

    /// An admin decision on the summary `reference`.
    ///
    /// A reference with no pending request is logged and yields `None`.
    pub async fn on_admin_decision(
        &self,
        reference: AdminRef,
        decision: Decision,
        decided_by: AdminIdentity,
        reason: Option<String>,
    ) -> Result<Option<DecisionOutcome>, LifecycleError> {
        match self
            .approval
            .decide(reference, decision, decided_by, reason)
            .await
        {
            Ok(outcome) => Ok(Some(outcome)),
            Err(LifecycleError::UnknownReference(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn start(
        &self,
        requester: RequesterId,
        profile: RequesterProfile,
    ) -> Result<(), LifecycleError> {
        match with_retry(&self.ctx.retry, "check membership", || {
            self.ctx.membership.is_member(requester)
        })
        .await
        {
            Ok(true) => {
                info!("Requester {} is already a member", requester);
                self.reply(requester, ALREADY_MEMBER).await;
                return Ok(());
            }
            Ok(false) => {}
            Err(e) => warn!("Membership check for {} failed, continuing: {}", requester, e),
        }

        if let Some(record) = self.repository().get_active(requester).await? {
            return self.remind(record).await;
        }

        match self.survey.begin(requester, profile).await {
            Ok(_) => Ok(()),
            Err(LifecycleError::DuplicateActiveRequest(_)) => {
                debug!("Concurrent /start from {}", requester);
                match self.repository().get_active(requester).await? {
                    Some(record) => self.remind(record).await,
                    None => Ok(()),
                }
            }
            Err(e) => Err(e),
        }
    }

    async fn answer(&self, requester: RequesterId, text: &str) -> Result<(), LifecycleError> {
        match self.survey.submit_answer(requester, text).await {
            Ok(_) => Ok(()),
            Err(LifecycleError::InvalidAnswer) => {
                self.reprompt(requester, EMPTY_ANSWER).await;
                Ok(())
            }
            Err(LifecycleError::NoActiveSurvey(_)) => {
                match self.repository().get_active(requester).await? {
                    Some(record) => self.remind(record).await,
                    None => {
                        self.reply(requester, SEND_START).await;
                        Ok(())
                    }
                }
            }
            Err(e) => Err(e),
        }
    }

    /// Tell the requester where their active request stands, retrying any
    /// step that is still outstanding.
    async fn remind(&self, record: RequestRecord) -> Result<(), LifecycleError> {
        let requester = record.requester;
        match record.state {
            RequestState::InSurvey if record.survey_complete() => {
                self.approval.submit_for_review(requester, true).await?;
            }
            RequestState::InSurvey => self.reprompt(requester, IN_PROGRESS).await,
            RequestState::PendingReview => self.reply(requester, PENDING).await,
            RequestState::Approved => {
                self.issuer.issue(requester, false).await?;
            }
            RequestState::Rejected => {
                self.approval.finish_rejection(requester).await?;
            }
            RequestState::Closed => {}
        }
        Ok(())
    }

    async fn reprompt_non_text(&self, requester: RequesterId) -> Result<(), LifecycleError> {
        match self.survey.next_question(requester).await {
            Ok(NextQuestion::Question { .. }) => {
                self.reprompt(requester, TEXT_ONLY).await;
                Ok(())
            }
            Ok(NextQuestion::Complete) | Err(LifecycleError::NoActiveSurvey(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Send `preface` followed by the current question.
    async fn reprompt(&self, requester: RequesterId, preface: &str) {
        let question = match self.repository().get_active(requester).await {
            Ok(Some(record)) => record.next_question_index().map(|index| UserNotice::Question {
                index,
                total: record.questions.len(),
                text: record.questions[index].clone(),
            }),
            Ok(None) => None,
            Err(e) => {
                warn!("Could not load request of {} for reprompt: {}", requester, e);
                None
            }
        };
        let text = match question {
            Some(notice) => format!("{}\n\n{}", preface, notice.render()),
            None => preface.to_string(),
        };
        self.reply(requester, &text).await;
    }

    async fn reply(&self, requester: RequesterId, text: &str) {
        let _ = with_retry(&self.ctx.retry, "reply to requester", || {
            self.ctx.messenger.send_to_user(requester, text)
        })
        .await;
    }

    // =========================================================================
    // Admin side
    // =========================================================================

    async fn handle_callback(&self, query: &CallbackQuery) -> Result<(), LifecycleError> {
        let Some(message) = query
            .message
            .as_ref()
            .filter(|m| m.chat.id == self.admin_chat_id)
        else {
            warn!(
                "Ignoring button press from {} outside the admin chat",
                query.from.id
            );
            self.acknowledge(&query.id, "Not allowed here.").await;
            return Ok(());
        };

        let Some(action) = query.data.as_deref().and_then(AdminAction::from_callback_data) else {
            self.acknowledge(&query.id, "Unknown action.").await;
            return Ok(());
        };
        let decision = match action {
            AdminAction::Approve => Decision::Approve,
            AdminAction::Reject => Decision::Reject,
        };

        let result = self
            .on_admin_decision(
                AdminRef(message.message_id),
                decision,
                admin_of(&query.from),
                None,
            )
            .await;
        match result {
            Ok(Some(outcome)) => {
                self.acknowledge(&query.id, acknowledgement(outcome)).await;
                Ok(())
            }
            Ok(None) => {
                self.acknowledge(&query.id, "This request was already handled.")
                    .await;
                Ok(())
            }
            Err(e) => {
                self.acknowledge(&query.id, "Something went wrong, please try again.")
                    .await;
                Err(e)
            }
        }
    }

    async fn handle_admin_message(&self, message: &Message) -> Result<(), LifecycleError> {
        let (Some(text), Some(from)) = (message.text.as_deref(), message.from.as_ref()) else {
            return Ok(());
        };

        let command = match parse_command(text, self.bot_username.as_deref()) {
            ParseResult::Command(command) => command,
            ParseResult::NotACommand => return Ok(()),
            ParseResult::UnrecognizedCommand { attempted } => {
                debug!("Ignoring unrecognized admin command /{}", attempted);
                return Ok(());
            }
        };

        match command {
            BotCommand::Approve | BotCommand::Reject { .. } => {
                let Some(summary) = message.reply_to_message.as_deref() else {
                    self.notify_admins(REPLY_TO_SUMMARY).await;
                    return Ok(());
                };
                let (decision, reason) = match command {
                    BotCommand::Reject { reason } => (Decision::Reject, reason),
                    _ => (Decision::Approve, None),
                };
                let outcome = self
                    .on_admin_decision(AdminRef(summary.message_id), decision, admin_of(from), reason)
                    .await?;
                if outcome.is_none() {
                    self.notify_admins(NOT_PENDING).await;
                }
                Ok(())
            }
            BotCommand::Stats => {
                let counts = self.repository().state_counts().await?;
                let lines: Vec<String> = counts
                    .iter()
                    .map(|(state, count)| format!("{}: {}", state, count))
                    .collect();
                self.notify_admins(&format!("Requests by state\n{}", lines.join("\n")))
                    .await;
                Ok(())
            }
            BotCommand::Pending => {
                let pending = self
                    .repository()
                    .list_by_state(RequestState::PendingReview)
                    .await?;
                self.notify_admins(&render_pending(&pending)).await;
                Ok(())
            }
            BotCommand::Help => {
                self.notify_admins(admin_help()).await;
                Ok(())
            }
            BotCommand::Start => Ok(()),
        }
    }

    async fn notify_admins(&self, text: &str) {
        let _ = with_retry(&self.ctx.retry, "post to admin chat", || {
            self.ctx.messenger.notify_admins(text)
        })
        .await;
    }

    async fn acknowledge(&self, action_id: &str, text: &str) {
        if let Err(e) = self.ctx.messenger.acknowledge_action(action_id, text).await {
            debug!("Could not acknowledge button press {}: {}", action_id, e);
        }
    }
}

fn profile_of(user: &User) -> RequesterProfile {
    RequesterProfile {
        username: user.username.clone(),
        display_name: Some(user.display_name()),
    }
}

fn admin_of(user: &User) -> AdminIdentity {
    AdminIdentity {
        id: user.id,
        name: Some(match &user.username {
            Some(username) => format!("@{}", username),
            None => user.display_name(),
        }),
    }
}

fn acknowledgement(outcome: DecisionOutcome) -> &'static str {
    match outcome {
        DecisionOutcome::Approved(_) => "Approved.",
        DecisionOutcome::Rejected => "Rejected.",
    }
}

fn render_pending(pending: &[RequestRecord]) -> String {
    if pending.is_empty() {
        return "No requests are waiting for a decision.".to_string();
    }
    let mut text = format!("{} request(s) waiting for a decision:", pending.len());
    for record in pending {
        text.push_str(&format!(
            "\n- {} (id {}), waiting since {}",
            record.label(),
            record.requester,
            record.updated_at.format("%Y-%m-%d %H:%M UTC")
        ));
    }
    text
}
