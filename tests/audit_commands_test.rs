//! Audit slash commands routed through the dispatcher

use kadrovik::audit::commands::{AUDIT_CHANNEL_MISSING, AUDIT_NOT_CONFIGURED, BAD_PASSPORT};
use kadrovik::dispatch::COMMANDS_DENIED;
use kadrovik::interaction::{CommandInvocation, Member, OptionValue, ResolvedUser, User};
use kadrovik::platform::mocks::PlatformCall;
use kadrovik::platform::{ChannelId, RoleId, UserId};
use kadrovik::Interaction;

mod fixtures;
use fixtures::*;

const COMMAND_CHANNEL: ChannelId = ChannelId(5);

fn employee() -> OptionValue {
    OptionValue::User(ResolvedUser {
        user: User {
            id: UserId(2),
            username: "recruit".to_string(),
        },
        member: Some(Member::new(UserId(2), [RoleId(90)]).with_display_name("Новобранец")),
    })
}

fn base(name: &str, passport: &str) -> CommandInvocation {
    CommandInvocation::new(name)
        .option("кого", employee())
        .option("номер_паспорта", OptionValue::String(passport.to_string()))
}

async fn run(harness: &Harness, command: CommandInvocation, author: Member) {
    let interaction = Interaction::command(harness.next_id(), command, COMMAND_CHANNEL, user_of(&author))
        .in_guild(GUILD)
        .with_member(author);
    harness.dispatcher.handle_interaction(interaction).await;
}

fn officer() -> Member {
    member(1, "Командир", &[RoleId(500)])
}

#[tokio::test]
async fn test_invite_grants_roles_and_posts_audit() {
    let harness = Harness::new();
    run(&harness, base("invite", "123"), officer()).await;

    assert_eq!(
        harness.platform.role_calls(),
        vec![PlatformCall::AddRoles {
            guild: GUILD,
            user: UserId(2),
            roles: vec![INVITE_ROLE],
        }]
    );
    let audit = harness.last_post(INVITE_AUDIT).expect("invite audit posted");
    assert_eq!(
        audit.content.as_deref(),
        Some("<@1> заполнил'а кадровый аудит на <@2>")
    );
    let embed = &audit.embeds[0];
    assert_eq!(embed.field_value("**Действие**"), Some("• Принятие в организацию на 1-й ранг"));
    assert_eq!(embed.field_value("**Причина**"), Some("• Набор/Собес"));
    assert_eq!(
        harness.last_text().as_deref(),
        Some("Кадровый аудит отправлен в <#71>.")
    );
}

#[tokio::test]
async fn test_uninvite_with_blacklist_clears_roles() {
    let harness = Harness::new();
    let command = base("uninvite", "123")
        .option("черный_список", OptionValue::String("да".to_string()))
        .option("причина", OptionValue::String("Нарушение устава".to_string()));
    run(&harness, command, officer()).await;

    assert_eq!(
        harness.platform.role_calls(),
        vec![PlatformCall::SetRoles {
            guild: GUILD,
            user: UserId(2),
            roles: vec![],
        }]
    );
    let audit = harness.last_post(UNINVITE_AUDIT).unwrap();
    assert_eq!(
        audit.embeds[0].field_value("**Действие**"),
        Some("• Увольнение из организации с занесением в черный список")
    );
}

#[tokio::test]
async fn test_transfer_moves_department_role() {
    let harness = Harness::new();
    let command = base("transfer", "123")
        .option("из_отдела", OptionValue::Role(RoleId(61)))
        .option("в_отдел", OptionValue::Role(RoleId(62)))
        .option("причина", OptionValue::String("Запрос".to_string()));
    run(&harness, command, officer()).await;

    assert_eq!(
        harness.platform.role_calls(),
        vec![
            PlatformCall::RemoveRoles {
                guild: GUILD,
                user: UserId(2),
                roles: vec![RoleId(61)],
            },
            PlatformCall::AddRoles {
                guild: GUILD,
                user: UserId(2),
                roles: vec![RoleId(62)],
            },
        ]
    );
    let audit = harness.last_post(TRANSFER_AUDIT).unwrap();
    assert_eq!(
        audit.embeds[0].field_value("**Действие**"),
        Some("• Перевод из <@&61> в <@&62>")
    );
}

#[tokio::test]
async fn test_bad_passport_stops_before_any_change() {
    let harness = Harness::new();
    let command = base("uprank", "12-34")
        .option("ранг", OptionValue::Integer(3))
        .option("причина", OptionValue::String("Отчёт".to_string()));
    run(&harness, command, officer()).await;

    assert_eq!(harness.last_text().as_deref(), Some(BAD_PASSPORT));
    assert!(harness.platform.sent_to(UPRANK_AUDIT).is_empty());
}

#[tokio::test]
async fn test_unconfigured_and_missing_audit_channels() {
    let harness = Harness::new();
    let downrank = base("downrank", "123")
        .option("ранг", OptionValue::Integer(2))
        .option("причина", OptionValue::String("Неактив".to_string()));
    run(&harness, downrank, officer()).await;
    assert_eq!(harness.last_text().as_deref(), Some(AUDIT_NOT_CONFIGURED));

    harness.platform.set_channel_missing(UPRANK_AUDIT);
    let uprank = base("uprank", "123")
        .option("ранг", OptionValue::Integer(2))
        .option("причина", OptionValue::String("Отчёт".to_string()));
    run(&harness, uprank, officer()).await;
    assert_eq!(harness.last_text().as_deref(), Some(AUDIT_CHANNEL_MISSING));
}

#[tokio::test]
async fn test_command_roles_gate_every_command() {
    let mut config = config();
    config.roles.commands = vec![RoleId(500)];
    let harness = Harness::with_config(config);

    run(&harness, base("invite", "123"), member(3, "Гость", &[RoleId(1)])).await;
    assert_eq!(harness.last_text().as_deref(), Some(COMMANDS_DENIED));
    assert!(harness.platform.role_calls().is_empty());

    run(&harness, base("invite", "123"), officer()).await;
    assert_eq!(harness.platform.sent_to(INVITE_AUDIT).len(), 1);
}
