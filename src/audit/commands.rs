// Audit slash commands: invite, uninvite, uprank, downrank, transfer

use std::sync::Arc;
use tracing::{error, info, warn};

use super::{
    downrank_action, transfer_action, uninvite_action, uprank_action, AuditDelivery, AuditDesk,
    AuditKind, AuditRecord, DEFAULT_INVITE_REASON, INVITE_ACTION,
};
use crate::interaction::{CommandInvocation, Interaction, ResolvedUser};
use crate::platform::{ChatPlatform, GuildId, PlatformError, RoleId, UserId};
use crate::validation::is_valid_passport;
use crate::workflows::WorkflowError;

const OPT_USER: &str = "кого";
const OPT_PASSPORT: &str = "номер_паспорта";
const OPT_BLACKLIST: &str = "черный_список";
const OPT_REASON: &str = "причина";
const OPT_RANK: &str = "ранг";
const OPT_FROM: &str = "из_отдела";
const OPT_TO: &str = "в_отдел";

const PASSPORT_DESCRIPTION: &str = "Номер паспорта (StaticID), только цифры";
const MIN_RANK: i64 = 1;
const MAX_RANK: i64 = 99;

pub const USER_UNAVAILABLE: &str = "Не удалось получить данные пользователя.";
pub const BAD_PASSPORT: &str = "Номер паспорта (StaticID) должен содержать только цифры.";
pub const AUDIT_NOT_CONFIGURED: &str = "Канал для аудита не настроен.";
pub const AUDIT_CHANNEL_MISSING: &str = "Не удалось найти канал аудита.";

const INVITE_ROLES_FAILED: &str = "Не удалось выдать роли. Проверьте, что у бота есть право «Управление ролями» и его роль выше выбранных.";
const UNINVITE_ROLES_FAILED: &str = "Не удалось снять роли. Проверьте, что у бота есть право «Управление ролями» и его роль выше ролей участника.";
const TRANSFER_ROLES_FAILED: &str = "Не удалось изменить роли. Проверьте, что у бота есть право «Управление ролями» и его роль выше выбранных.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandOptionKind {
    User,
    String,
    Integer { min: i64, max: i64 },
    Role,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOptionSpec {
    pub name: &'static str,
    pub description: &'static str,
    pub kind: CommandOptionKind,
    pub required: bool,
    /// `(label, value)` pairs for string options with fixed answers
    pub choices: Vec<(&'static str, &'static str)>,
}

impl CommandOptionSpec {
    fn required(name: &'static str, description: &'static str, kind: CommandOptionKind) -> Self {
        Self {
            name,
            description,
            kind,
            required: true,
            choices: Vec::new(),
        }
    }

    fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    fn choices(mut self, choices: &[(&'static str, &'static str)]) -> Self {
        self.choices = choices.to_vec();
        self
    }
}

/// Slash command definition registered with the platform
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub name: &'static str,
    pub description: &'static str,
    pub options: Vec<CommandOptionSpec>,
}

fn user_option(description: &'static str) -> CommandOptionSpec {
    CommandOptionSpec::required(OPT_USER, description, CommandOptionKind::User)
}

fn passport_option() -> CommandOptionSpec {
    CommandOptionSpec::required(OPT_PASSPORT, PASSPORT_DESCRIPTION, CommandOptionKind::String)
}

fn reason_option(description: &'static str) -> CommandOptionSpec {
    CommandOptionSpec::required(OPT_REASON, description, CommandOptionKind::String)
}

fn rank_option(description: &'static str) -> CommandOptionSpec {
    CommandOptionSpec::required(
        OPT_RANK,
        description,
        CommandOptionKind::Integer {
            min: MIN_RANK,
            max: MAX_RANK,
        },
    )
}

/// Every audit command, in registration order
pub fn command_specs() -> Vec<CommandSpec> {
    vec![
        CommandSpec {
            name: "invite",
            description: "Кадровый аудит: принятие в организацию",
            options: vec![
                user_option("Кого принять (упоминание пользователя)"),
                passport_option(),
                reason_option("Причина (если не указана — Набор/Собес)").optional(),
            ],
        },
        CommandSpec {
            name: "uninvite",
            description: "Кадровый аудит: увольнение из организации",
            options: vec![
                user_option("Кого уволить (упоминание пользователя)"),
                passport_option(),
                CommandOptionSpec::required(
                    OPT_BLACKLIST,
                    "Занесение в черный список?",
                    CommandOptionKind::String,
                )
                .choices(&[("Да", "да"), ("Нет", "нет")]),
                reason_option("Причина увольнения"),
            ],
        },
        CommandSpec {
            name: "uprank",
            description: "Кадровый аудит: повышение по рангу",
            options: vec![
                user_option("Кого повысили (упоминание пользователя)"),
                passport_option(),
                rank_option("На какой ранг повышен (цифра)"),
                reason_option("Причина повышения"),
            ],
        },
        CommandSpec {
            name: "downrank",
            description: "Кадровый аудит: понижение по рангу",
            options: vec![
                user_option("Кого понизили (упоминание пользователя)"),
                passport_option(),
                rank_option("На какой ранг понижен (цифра)"),
                reason_option("Причина понижения"),
            ],
        },
        CommandSpec {
            name: "transfer",
            description: "Кадровый аудит: перевод в отдел",
            options: vec![
                user_option("Кого перевели (упоминание пользователя)"),
                passport_option(),
                CommandOptionSpec::required(OPT_FROM, "Из какого отдела (роль)", CommandOptionKind::Role),
                CommandOptionSpec::required(OPT_TO, "В какой отдел (роль)", CommandOptionKind::Role),
                reason_option("Причина перевода"),
            ],
        },
    ]
}

/// Role change a command applies before its audit is posted
#[derive(Debug, Clone, PartialEq, Eq)]
enum RoleChange {
    None,
    Grant(Vec<RoleId>),
    ClearAll,
    Move { from: RoleId, to: RoleId },
}

/// Runs the audit commands
#[derive(Clone)]
pub struct AuditCommands {
    platform: Arc<dyn ChatPlatform>,
    desk: AuditDesk,
    invite_roles: Vec<RoleId>,
}

impl AuditCommands {
    pub fn new(platform: Arc<dyn ChatPlatform>, desk: AuditDesk, invite_roles: Vec<RoleId>) -> Self {
        Self {
            platform,
            desk,
            invite_roles,
        }
    }

    pub fn knows(name: &str) -> bool {
        matches!(name, "invite" | "uninvite" | "uprank" | "downrank" | "transfer")
    }

    pub async fn handle(
        &self,
        interaction: &Interaction,
        command: &CommandInvocation,
    ) -> Result<(), WorkflowError> {
        let platform = self.platform.as_ref();

        let Some(employee) = command.user(OPT_USER) else {
            let text = if command.name == "invite" {
                format!("{USER_UNAVAILABLE} Убедитесь, что выбранный пользователь доступен.")
            } else {
                USER_UNAVAILABLE.to_string()
            };
            interaction.reply_ephemeral(platform, text).await?;
            return Ok(());
        };

        let passport = command.string(OPT_PASSPORT).unwrap_or_default().trim().to_string();
        if !is_valid_passport(&passport) {
            interaction.reply_ephemeral(platform, BAD_PASSPORT).await?;
            return Ok(());
        }

        let reason = || command.string(OPT_REASON).unwrap_or_default().trim().to_string();
        let rank = || -> Result<i64, WorkflowError> {
            command
                .integer(OPT_RANK)
                .filter(|r| (MIN_RANK..=MAX_RANK).contains(r))
                .ok_or(WorkflowError::MissingField(OPT_RANK))
        };

        let (kind, action, reason, change, failure) = match command.name.as_str() {
            "invite" => {
                let given = reason();
                let reason = if given.is_empty() {
                    DEFAULT_INVITE_REASON.to_string()
                } else {
                    given
                };
                (
                    AuditKind::Invite,
                    INVITE_ACTION.to_string(),
                    reason,
                    RoleChange::Grant(self.invite_roles.clone()),
                    INVITE_ROLES_FAILED,
                )
            }
            "uninvite" => {
                let blacklist = command.string(OPT_BLACKLIST) == Some("да");
                (
                    AuditKind::Uninvite,
                    uninvite_action(blacklist).to_string(),
                    reason(),
                    RoleChange::ClearAll,
                    UNINVITE_ROLES_FAILED,
                )
            }
            "uprank" => (AuditKind::Uprank, uprank_action(rank()?), reason(), RoleChange::None, ""),
            "downrank" => (AuditKind::Downrank, downrank_action(rank()?), reason(), RoleChange::None, ""),
            "transfer" => {
                let from = command.role(OPT_FROM).ok_or(WorkflowError::MissingField(OPT_FROM))?;
                let to = command.role(OPT_TO).ok_or(WorkflowError::MissingField(OPT_TO))?;
                (
                    AuditKind::Transfer,
                    transfer_action(from, to),
                    reason(),
                    RoleChange::Move { from, to },
                    TRANSFER_ROLES_FAILED,
                )
            }
            other => {
                warn!(command = other, "Unknown audit command");
                return Ok(());
            }
        };

        if let Err(e) = self.apply(interaction.guild_id, employee, change).await {
            error!(
                command = %command.name,
                user_id = %employee.user.id,
                error = %e,
                "Failed to update roles for audit command"
            );
            interaction.reply_ephemeral(platform, failure).await?;
            return Ok(());
        }

        let record = AuditRecord {
            kind,
            author: interaction.person(),
            employee: employee.person(),
            passport,
            action,
            reason,
        };
        let reply = match self.desk.submit(&record).await? {
            AuditDelivery::Posted(channel) => format!("Кадровый аудит отправлен в {}.", channel.mention()),
            AuditDelivery::NotConfigured => AUDIT_NOT_CONFIGURED.to_string(),
            AuditDelivery::ChannelUnavailable => AUDIT_CHANNEL_MISSING.to_string(),
        };
        interaction.reply_ephemeral(platform, reply).await?;

        info!(
            command = %command.name,
            author = %interaction.user.id,
            user_id = %employee.user.id,
            "Audit command handled"
        );
        Ok(())
    }

    /// Roles only change for members the platform could resolve
    async fn apply(
        &self,
        guild: Option<GuildId>,
        employee: &ResolvedUser,
        change: RoleChange,
    ) -> Result<(), PlatformError> {
        if employee.member.is_none() || change == RoleChange::None {
            return Ok(());
        }
        let Some(guild) = guild else {
            warn!(user_id = %employee.user.id, "Audit command outside a guild, roles left as they are");
            return Ok(());
        };
        let user: UserId = employee.user.id;
        match change {
            RoleChange::None => Ok(()),
            RoleChange::Grant(roles) if roles.is_empty() => Ok(()),
            RoleChange::Grant(roles) => self.platform.add_member_roles(guild, user, roles).await,
            RoleChange::ClearAll => self.platform.set_member_roles(guild, user, Vec::new()).await,
            RoleChange::Move { from, to } => {
                self.platform.remove_member_roles(guild, user, vec![from]).await?;
                self.platform.add_member_roles(guild, user, vec![to]).await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ChannelsConfig;
    use crate::interaction::{Member, OptionValue, User};
    use crate::platform::mocks::{PlatformCall, RecordingPlatform};
    use crate::platform::{ChannelId, InteractionResponse, MockChatPlatform};

    const GUILD: GuildId = GuildId(1);

    fn channels() -> ChannelsConfig {
        ChannelsConfig {
            invite: Some(ChannelId(71)),
            uninvite: Some(ChannelId(72)),
            uprank: Some(ChannelId(73)),
            transfer: Some(ChannelId(75)),
            ..Default::default()
        }
    }

    fn commands(platform: Arc<RecordingPlatform>, invite_roles: Vec<RoleId>) -> AuditCommands {
        let desk = AuditDesk::new(platform.clone(), channels());
        AuditCommands::new(platform, desk, invite_roles)
    }

    fn employee(resolved: bool) -> OptionValue {
        OptionValue::User(ResolvedUser {
            user: User {
                id: UserId(2),
                username: "recruit".to_string(),
            },
            member: resolved.then(|| Member::new(UserId(2), []).with_display_name("Новобранец")),
        })
    }

    fn invoke(command: CommandInvocation) -> Interaction {
        Interaction::command(
            1,
            command,
            ChannelId(5),
            User {
                id: UserId(1),
                username: "boss".to_string(),
            },
        )
        .in_guild(GUILD)
        .with_member(Member::new(UserId(1), []).with_display_name("Командир"))
    }

    #[test]
    fn specs_cover_every_command() {
        let specs = command_specs();
        let names: Vec<_> = specs.iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["invite", "uninvite", "uprank", "downrank", "transfer"]);
        assert!(names.iter().all(|n| AuditCommands::knows(n)));

        let invite_reason = &specs[0].options[2];
        assert_eq!(invite_reason.name, OPT_REASON);
        assert!(!invite_reason.required);
        assert_eq!(specs[1].options[2].choices, vec![("Да", "да"), ("Нет", "нет")]);
        assert_eq!(
            specs[2].options[2].kind,
            CommandOptionKind::Integer { min: 1, max: 99 }
        );
    }

    #[tokio::test]
    async fn invite_grants_roles_and_defaults_reason() {
        let platform = Arc::new(RecordingPlatform::new());
        let commands = commands(platform.clone(), vec![RoleId(40), RoleId(41)]);
        let command = CommandInvocation::new("invite")
            .option(OPT_USER, employee(true))
            .option(OPT_PASSPORT, OptionValue::String(" 123 ".to_string()));

        commands.handle(&invoke(command.clone()), &command).await.unwrap();

        assert_eq!(
            platform.role_calls(),
            vec![PlatformCall::AddRoles {
                guild: GUILD,
                user: UserId(2),
                roles: vec![RoleId(40), RoleId(41)],
            }]
        );
        let audit = &platform.sent_to(ChannelId(71))[0].1;
        assert_eq!(audit.content.as_deref(), Some("<@1> заполнил'а кадровый аудит на <@2>"));
        let embed = &audit.embeds[0];
        assert_eq!(embed.title.as_deref(), Some("📁 Кадровый аудит | Принятие"));
        assert_eq!(embed.field_value("**Сотрудник**"), Some("• <@2> | Новобранец"));
        assert_eq!(embed.field_value("**Номер паспорта (StaticID)**"), Some("• 123"));
        assert_eq!(embed.field_value("**Причина**"), Some("• Набор/Собес"));
        assert_eq!(
            platform.ephemeral_texts(),
            vec!["Кадровый аудит отправлен в <#71>.".to_string()]
        );
    }

    #[tokio::test]
    async fn uninvite_with_blacklist_clears_roles() {
        let platform = Arc::new(RecordingPlatform::new());
        let commands = commands(platform.clone(), vec![]);
        let command = CommandInvocation::new("uninvite")
            .option(OPT_USER, employee(true))
            .option(OPT_PASSPORT, OptionValue::String("9".to_string()))
            .option(OPT_BLACKLIST, OptionValue::String("да".to_string()))
            .option(OPT_REASON, OptionValue::String("прогулы".to_string()));

        commands.handle(&invoke(command.clone()), &command).await.unwrap();

        assert!(matches!(
            platform.role_calls().as_slice(),
            [PlatformCall::SetRoles { roles, .. }] if roles.is_empty()
        ));
        let embed = &platform.sent_to(ChannelId(72))[0].1.embeds[0];
        assert_eq!(
            embed.field_value("**Действие**"),
            Some("• Увольнение из организации с занесением в черный список")
        );
    }

    #[tokio::test]
    async fn role_failure_aborts_before_audit() {
        let platform = Arc::new(RecordingPlatform::new());
        platform.set_fail_role_changes(true);
        let commands = commands(platform.clone(), vec![]);
        let command = CommandInvocation::new("transfer")
            .option(OPT_USER, employee(true))
            .option(OPT_PASSPORT, OptionValue::String("9".to_string()))
            .option(OPT_FROM, OptionValue::Role(RoleId(50)))
            .option(OPT_TO, OptionValue::Role(RoleId(51)))
            .option(OPT_REASON, OptionValue::String("ротация".to_string()));

        commands.handle(&invoke(command.clone()), &command).await.unwrap();

        assert!(platform.sent_to(ChannelId(75)).is_empty());
        assert_eq!(platform.ephemeral_texts(), vec![TRANSFER_ROLES_FAILED.to_string()]);
    }

    #[tokio::test]
    async fn unresolved_member_skips_roles_but_still_audits() {
        let platform = Arc::new(RecordingPlatform::new());
        let commands = commands(platform.clone(), vec![]);
        let command = CommandInvocation::new("transfer")
            .option(OPT_USER, employee(false))
            .option(OPT_PASSPORT, OptionValue::String("9".to_string()))
            .option(OPT_FROM, OptionValue::Role(RoleId(50)))
            .option(OPT_TO, OptionValue::Role(RoleId(51)))
            .option(OPT_REASON, OptionValue::String("ротация".to_string()));

        commands.handle(&invoke(command.clone()), &command).await.unwrap();

        assert!(platform.role_calls().is_empty());
        let embed = &platform.sent_to(ChannelId(75))[0].1.embeds[0];
        assert_eq!(embed.field_value("**Сотрудник**"), Some("• <@2> | recruit"));
        assert_eq!(embed.field_value("**Действие**"), Some("• Перевод из <@&50> в <@&51>"));
    }

    #[tokio::test]
    async fn downrank_without_channel_reports_it() {
        let platform = Arc::new(RecordingPlatform::new());
        let commands = commands(platform.clone(), vec![]);
        let command = CommandInvocation::new("downrank")
            .option(OPT_USER, employee(true))
            .option(OPT_PASSPORT, OptionValue::String("9".to_string()))
            .option(OPT_RANK, OptionValue::Integer(4))
            .option(OPT_REASON, OptionValue::String("нарушение".to_string()));

        commands.handle(&invoke(command.clone()), &command).await.unwrap();
        assert_eq!(platform.ephemeral_texts(), vec![AUDIT_NOT_CONFIGURED.to_string()]);
    }

    #[tokio::test]
    async fn bad_passport_touches_nothing_else() {
        let mut mock = MockChatPlatform::new();
        mock.expect_respond()
            .withf(|_, response| {
                matches!(response, InteractionResponse::Message { content, ephemeral: true } if content == BAD_PASSPORT)
            })
            .times(1)
            .returning(|_, _| Ok(()));
        let platform: Arc<dyn ChatPlatform> = Arc::new(mock);
        let desk = AuditDesk::new(Arc::clone(&platform), channels());
        let commands = AuditCommands::new(platform, desk, vec![RoleId(40)]);

        let command = CommandInvocation::new("invite")
            .option(OPT_USER, employee(true))
            .option(OPT_PASSPORT, OptionValue::String("12-34".to_string()));
        commands.handle(&invoke(command.clone()), &command).await.unwrap();
    }
}
