//! Telegram update handling, from raw updates to outbound messages.

mod common;

use std::sync::Arc;

use common::{
    admin_command, admin_reply, button, harness, private_photo, private_text, Harness, Sent,
    ADMIN_CHAT,
};
use gatekeeper_server::ingest::{process_update, UpdateDisposition};
use gatekeeper_server::state_machine::{
    Decision, InMemoryRepository, RequestRepository, RequestState, RequesterId,
};

const ANN: i64 = 11;

fn memory() -> Harness {
    harness(Arc::new(InMemoryRepository::new()))
}

async fn handle(h: &Harness, update: gatekeeper_server::updates::Update) {
    h.gatekeeper.handle_update(&update).await.unwrap();
}

/// Drive ANN through /start and three answers; returns the summary reference.
async fn submit_ann(h: &Harness) -> i64 {
    handle(h, private_text(1, ANN, "/start")).await;
    handle(h, private_text(2, ANN, "Ann")).await;
    handle(h, private_text(3, ANN, "Curious")).await;
    handle(h, private_text(4, ANN, "A friend")).await;
    h.messenger.summaries()[0].0
}

#[tokio::test]
async fn test_start_welcomes_and_asks_first_question() {
    let h = memory();
    handle(&h, private_text(1, ANN, "/start")).await;

    let to_user = h.messenger.to_user(ANN);
    assert_eq!(to_user.len(), 2);
    assert!(to_user[0].starts_with("Welcome!"));
    assert_eq!(to_user[1], "Question 1/3: What's your name?");

    let record = h
        .gatekeeper
        .repository()
        .get_active(RequesterId(ANN))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.profile.username.as_deref(), Some("user11"));
}

#[tokio::test]
async fn test_start_twice_reminds_instead_of_restarting() {
    let h = memory();
    handle(&h, private_text(1, ANN, "/start")).await;
    handle(&h, private_text(2, ANN, "Ann")).await;
    handle(&h, private_text(3, ANN, "/start")).await;

    let last = h.messenger.to_user(ANN).pop().unwrap();
    assert!(last.starts_with("Your survey is already in progress."));
    assert!(last.ends_with("Question 2/3: Why do you want to join?"));
    assert_eq!(
        h.gatekeeper
            .repository()
            .history(RequesterId(ANN))
            .await
            .unwrap()
            .len(),
        1
    );
}

#[tokio::test]
async fn test_existing_member_is_not_surveyed() {
    let h = memory();
    h.membership.members.lock().unwrap().insert(ANN);
    handle(&h, private_text(1, ANN, "/start")).await;

    assert_eq!(
        h.messenger.to_user(ANN),
        vec!["You are already a member of the group.".to_string()]
    );
    assert!(h
        .gatekeeper
        .repository()
        .list_all()
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_blank_and_non_text_answers_are_reprompted() {
    let h = memory();
    handle(&h, private_text(1, ANN, "/start")).await;
    handle(&h, private_text(2, ANN, "   ")).await;
    handle(&h, private_photo(3, ANN)).await;

    let to_user = h.messenger.to_user(ANN);
    assert!(to_user[2].starts_with("Please send a non-empty answer."));
    assert!(to_user[2].ends_with("Question 1/3: What's your name?"));
    assert!(to_user[3].starts_with("Please send your answer as text only."));

    let record = h
        .gatekeeper
        .repository()
        .get_active(RequesterId(ANN))
        .await
        .unwrap()
        .unwrap();
    assert!(record.answers.is_empty());
}

#[tokio::test]
async fn test_text_without_request_points_to_start() {
    let h = memory();
    handle(&h, private_text(1, ANN, "hello?")).await;
    assert_eq!(
        h.messenger.to_user(ANN),
        vec!["Send /start to request access to the group.".to_string()]
    );
}

#[tokio::test]
async fn test_messages_while_pending_get_status() {
    let h = memory();
    submit_ann(&h).await;
    handle(&h, private_text(5, ANN, "any news?")).await;

    let last = h.messenger.to_user(ANN).pop().unwrap();
    assert_eq!(
        last,
        "Your request is pending approval. Please wait for admin review."
    );
}

#[tokio::test]
async fn test_approve_button_issues_invite_and_acknowledges() {
    let h = memory();
    let reference = submit_ann(&h).await;
    handle(&h, button(10, 7, ADMIN_CHAT, reference, "approve")).await;

    assert_eq!(h.messenger.invites().len(), 1);
    let sent = h.messenger.sent();
    assert!(sent.contains(&Sent::Cleared { reference }));
    assert!(sent.contains(&Sent::Ack {
        id: "cbq-10".to_string(),
        text: "Approved.".to_string()
    }));

    // A second press is acknowledged but does nothing.
    handle(&h, button(11, 8, ADMIN_CHAT, reference, "reject")).await;
    assert!(h.messenger.sent().contains(&Sent::Ack {
        id: "cbq-11".to_string(),
        text: "This request was already handled.".to_string()
    }));
    assert_eq!(h.messenger.invites().len(), 1);
    let history = h
        .gatekeeper
        .repository()
        .history(RequesterId(ANN))
        .await
        .unwrap();
    assert_eq!(history[0].decision.as_ref().unwrap().outcome, Decision::Approve);
}

#[tokio::test]
async fn test_buttons_outside_admin_chat_are_ignored() {
    let h = memory();
    let reference = submit_ann(&h).await;
    handle(&h, button(10, 7, -999, reference, "approve")).await;

    let record = h
        .gatekeeper
        .repository()
        .get_active(RequesterId(ANN))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.state, RequestState::PendingReview);
    assert!(h.messenger.invites().is_empty());
}

#[tokio::test]
async fn test_reject_reply_forwards_reason() {
    let h = memory();
    let reference = submit_ann(&h).await;
    handle(&h, admin_reply(10, 7, reference, "/reject@gatebot Incomplete answers")).await;

    let last = h.messenger.to_user(ANN).pop().unwrap();
    assert!(last.ends_with("Reason: Incomplete answers"));
    let history = h
        .gatekeeper
        .repository()
        .history(RequesterId(ANN))
        .await
        .unwrap();
    assert_eq!(history[0].state, RequestState::Closed);
    assert_eq!(
        history[0].decision.as_ref().unwrap().reason.as_deref(),
        Some("Incomplete answers")
    );
    assert_eq!(
        history[0].decision.as_ref().unwrap().decided_by.label(),
        "@alice"
    );
}

#[tokio::test]
async fn test_decision_without_reply_asks_for_one() {
    let h = memory();
    submit_ann(&h).await;
    handle(&h, admin_command(10, 7, "/approve")).await;

    assert!(h
        .messenger
        .admin_notes()
        .contains(&"Reply to a request summary with /approve or /reject <reason>.".to_string()));
    assert!(h.messenger.invites().is_empty());
}

#[tokio::test]
async fn test_stats_and_pending_commands() {
    let h = memory();
    submit_ann(&h).await;
    handle(&h, admin_command(10, 7, "/stats")).await;
    handle(&h, admin_command(11, 7, "/pending")).await;

    let notes = h.messenger.admin_notes();
    assert!(notes[0].contains("pending_review: 1"));
    assert!(notes[0].contains("closed: 0"));
    assert!(notes[1].starts_with("1 request(s) waiting"));
    assert!(notes[1].contains("@user11"));
}

#[tokio::test]
async fn test_duplicate_updates_are_processed_once() {
    let h = memory();
    let update = private_text(1, ANN, "/start");

    assert_eq!(
        process_update(&h.gatekeeper, &update).await,
        UpdateDisposition::Processed
    );
    assert_eq!(
        process_update(&h.gatekeeper, &update).await,
        UpdateDisposition::AlreadyCompleted
    );
    assert_eq!(h.messenger.to_user(ANN).len(), 2);
}

#[tokio::test]
async fn test_failed_update_is_released_for_redelivery() {
    let h = memory();
    let update = private_text(1, ANN, "/start");
    h.gatekeeper
        .repository()
        .try_claim_update(update.update_id)
        .await
        .unwrap();

    // Someone else holds the claim.
    assert_eq!(
        process_update(&h.gatekeeper, &update).await,
        UpdateDisposition::InProgress
    );

    h.gatekeeper
        .repository()
        .release_update_claim(update.update_id)
        .await
        .unwrap();
    assert_eq!(
        process_update(&h.gatekeeper, &update).await,
        UpdateDisposition::Processed
    );
}
