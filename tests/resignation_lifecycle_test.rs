//! Resignation lifecycle through the dispatcher
//!
//! Covers the whole path a real request takes: setup button, form modal,
//! photo evidence, approval post, approval or decline by an approver.

use std::time::Duration;

use kadrovik::config::{DEFAULT_RESIGNATION_APPROVE_ROLE, DEFAULT_RESIGNATION_SUBMIT_ROLE};
use kadrovik::interaction::Member;
use kadrovik::platform::mocks::PlatformCall;
use kadrovik::platform::{ContentEdit, InteractionResponse, MessageId, PostedMessage, RoleId, UserId};

mod fixtures;
use fixtures::*;

fn submitter() -> Member {
    member(7, "Иван", &[DEFAULT_RESIGNATION_SUBMIT_ROLE])
}

fn approver() -> Member {
    member(8, "Генерал", &[DEFAULT_RESIGNATION_APPROVE_ROLE])
}

const FORM: [(&str, &str); 3] = [
    ("resign_passport", "123456"),
    ("resign_department", "Военная полиция"),
    ("resign_reason", "Переезд"),
];

async fn submit_with_photos(harness: &Harness) -> PostedMessage {
    harness.submit("resign_form_modal", &FORM, RESIGN, &submitter()).await;
    assert_eq!(harness.post_attachments(500, RESIGN, UserId(7), 2), 1);
    settle().await;
    harness.last_post(RESIGN).expect("approval request posted")
}

#[tokio::test(start_paused = true)]
async fn test_one_request_per_collected_evidence() {
    let harness = Harness::new();
    harness.submit("resign_form_modal", &FORM, RESIGN, &submitter()).await;

    assert_eq!(harness.post_attachments(500, RESIGN, UserId(7), 2), 1);
    assert_eq!(harness.post_attachments(501, RESIGN, UserId(7), 2), 1);
    settle().await;

    assert_eq!(harness.platform.sent_to(RESIGN).len(), 1);
    let downloads = harness
        .platform
        .calls()
        .iter()
        .filter(|call| matches!(call, PlatformCall::FetchAttachment { .. }))
        .count();
    assert_eq!(downloads, 2);
    assert!(harness.platform.deleted().contains(&MessageId(500)));
    assert!(!harness.platform.deleted().contains(&MessageId(501)));

    // The session is closed, later photos reach nobody
    assert_eq!(harness.post_attachments(502, RESIGN, UserId(7), 2), 0);
    settle().await;
    assert_eq!(harness.platform.sent_to(RESIGN).len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_form_photos_and_approval() {
    let harness = Harness::new();

    harness.press("resign_open_form", RESIGN, &submitter(), None).await;
    match harness.platform.responses().last() {
        Some(InteractionResponse::Modal(modal)) => assert_eq!(modal.custom_id, "resign_form_modal"),
        other => panic!("expected the form modal, got {other:?}"),
    }

    let request = submit_with_photos(&harness).await;
    assert!(harness.platform.ephemeral_texts()[0].contains("ровно 2 фотографии"));
    assert!(harness.platform.ephemeral_texts()[0].contains("60 секунд"));
    assert_eq!(request.first_embed_title(), Some("Заявление на увольнение"));
    assert!(harness.platform.deleted().contains(&MessageId(500)));

    let (_, outgoing) = harness.platform.sent_to(RESIGN).pop().unwrap();
    assert_eq!(outgoing.files.len(), 2);

    harness.press("resign_approve", RESIGN, &approver(), Some(&request)).await;

    assert!(harness.platform.role_calls().contains(&PlatformCall::SetRoles {
        guild: GUILD,
        user: UserId(7),
        roles: vec![],
    }));
    let audit = harness.last_post(UNINVITE_AUDIT).expect("uninvite audit posted");
    let embed = &audit.embeds[0];
    assert_eq!(embed.title.as_deref(), Some("📁 Кадровый аудит | Увольнение"));
    assert_eq!(
        embed.field_value("**Действие**"),
        Some("• Увольнение из организации без занесения в черный список")
    );
    assert_eq!(embed.field_value("**Номер паспорта (StaticID)**"), Some("• 123456"));

    let update = harness.platform.updates().pop().unwrap();
    assert_eq!(update.content, ContentEdit::Keep);
    assert_eq!(update.components[0].0[0].custom_id, "resign_done_approve");
    assert_eq!(update.components[0].0[1].label, "Проверил'а: Генерал");

    // The record is gone once approved
    harness.press("resign_approve", RESIGN, &approver(), Some(&request)).await;
    assert_eq!(harness.last_text().as_deref(), Some("Данные запроса не найдены."));
}

#[tokio::test(start_paused = true)]
async fn test_denied_approver_leaves_request_untouched() {
    let harness = Harness::new();
    let request = submit_with_photos(&harness).await;
    harness.platform.clear_calls();

    let outsider = member(9, "Рядовой", &[RoleId(3)]);
    harness.press("resign_approve", RESIGN, &outsider, Some(&request)).await;

    assert_eq!(
        harness.last_text().as_deref(),
        Some("Одобрять рапорт на увольнение может только роль «Старший состав».")
    );
    assert!(harness.platform.updates().is_empty());
    assert!(harness.platform.edits_of(request.id).is_empty());
    assert!(harness.platform.role_calls().is_empty());
    assert!(harness.platform.sent_to(UNINVITE_AUDIT).is_empty());

    // The real approver can still act on it
    harness.press("resign_approve", RESIGN, &approver(), Some(&request)).await;
    assert_eq!(harness.platform.sent_to(UNINVITE_AUDIT).len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_photos_after_timeout_are_ignored() {
    let harness = Harness::new();
    harness.submit("resign_form_modal", &FORM, RESIGN, &submitter()).await;

    tokio::time::sleep(Duration::from_secs(61)).await;

    assert_eq!(harness.post_attachments(501, RESIGN, UserId(7), 2), 0);
    settle().await;
    assert!(harness.platform.sent_to(RESIGN).is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_wrong_photo_count_is_answered_then_cleaned_up() {
    let harness = Harness::new();
    harness.submit("resign_form_modal", &FORM, RESIGN, &submitter()).await;

    harness.post_attachments(502, RESIGN, UserId(7), 1);
    settle().await;
    let notice = harness
        .platform
        .calls()
        .into_iter()
        .find_map(|call| match call {
            PlatformCall::Reply { message, content, id, .. } if message == MessageId(502) => Some((content, id)),
            _ => None,
        })
        .expect("wrong count notice");
    assert!(notice.0.contains("ровно 2 фотографии"));

    tokio::time::sleep(Duration::from_secs(6)).await;
    let deleted = harness.platform.deleted();
    assert!(deleted.contains(&MessageId(502)));
    assert!(deleted.contains(&notice.1));

    // The session is still open for a correct message
    harness.post_attachments(503, RESIGN, UserId(7), 2);
    settle().await;
    assert_eq!(harness.platform.sent_to(RESIGN).len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_other_members_photos_do_not_count() {
    let harness = Harness::new();
    harness.submit("resign_form_modal", &FORM, RESIGN, &submitter()).await;

    harness.post_attachments(504, RESIGN, UserId(99), 2);
    harness.post_attachments(505, PROMOTION, UserId(7), 2);
    settle().await;
    assert!(harness.platform.sent_to(RESIGN).is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_resubmission_replaces_the_first_form() {
    let harness = Harness::new();
    harness.submit("resign_form_modal", &FORM, RESIGN, &submitter()).await;
    let second = [
        ("resign_passport", "654321"),
        ("resign_department", "Штаб"),
        ("resign_reason", "Другое"),
    ];
    harness.submit("resign_form_modal", &second, RESIGN, &submitter()).await;
    settle().await;

    harness.post_attachments(506, RESIGN, UserId(7), 2);
    settle().await;

    let sent = harness.platform.sent_to(RESIGN);
    assert_eq!(sent.len(), 1);
    assert_eq!(
        sent[0].1.embeds[0].field_value("**Номер паспорта (StaticID)**"),
        Some("• 654321")
    );
}

#[tokio::test(start_paused = true)]
async fn test_decline_with_reason() {
    let harness = Harness::new();
    let request = submit_with_photos(&harness).await;

    harness.press("resign_decline", RESIGN, &approver(), Some(&request)).await;
    let modal_id = match harness.platform.responses().last() {
        Some(InteractionResponse::Modal(modal)) => modal.custom_id.clone(),
        other => panic!("expected the reason modal, got {other:?}"),
    };
    assert_eq!(modal_id, format!("resign_decline_modal_{}", request.id));

    harness
        .submit(&modal_id, &[("resign_decline_reason", "Не хватает данных")], RESIGN, &approver())
        .await;

    let edit = harness.platform.edits_of(request.id).pop().expect("request edited");
    assert_eq!(edit.content, ContentEdit::Clear);
    assert_eq!(edit.components[0].0[0].custom_id, "resign_done_decline");
    assert_eq!(edit.components[0].0[1].label, "Причина: Не хватает данных");
    assert_eq!(harness.last_text().as_deref(), Some("Заявление отклонено."));
    assert!(harness.platform.role_calls().is_empty());
}

#[tokio::test]
async fn test_invalid_form_lists_every_problem() {
    let harness = Harness::new();
    harness
        .submit(
            "resign_form_modal",
            &[("resign_passport", "abc"), ("resign_department", ""), ("resign_reason", "")],
            RESIGN,
            &submitter(),
        )
        .await;

    let reply = harness.last_text().unwrap();
    assert!(reply.starts_with("❌ **Ошибки в форме:**"));
    assert_eq!(reply.matches("• ").count(), 3);
    assert_eq!(harness.dispatcher.bus().listeners(), 0);
}
