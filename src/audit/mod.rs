//! Personnel audit records ("кадровый аудит")
//!
//! Every finalized personnel action ends up as one embed in a dedicated
//! audit channel. The slash commands in [`commands`] post them directly;
//! the request workflows post them on approval.

use std::sync::Arc;
use tracing::{info, warn};

use crate::config::ChannelsConfig;
use crate::interaction::Person;
use crate::platform::{
    ChannelId, ChatPlatform, Embed, EmbedField, OutgoingMessage, PlatformError, RoleId,
    EMBED_COLOR,
};
use crate::validation::rank_word;

pub mod commands;

pub use commands::{command_specs, AuditCommands, CommandOptionKind, CommandOptionSpec, CommandSpec};

pub const INVITE_ACTION: &str = "Принятие в организацию на 1-й ранг";
pub const DEFAULT_INVITE_REASON: &str = "Набор/Собес";

/// Kind of personnel action, which also selects the audit channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuditKind {
    Invite,
    Uninvite,
    Uprank,
    Downrank,
    Transfer,
}

impl AuditKind {
    pub fn title(self) -> &'static str {
        match self {
            AuditKind::Invite => "Принятие",
            AuditKind::Uninvite => "Увольнение",
            AuditKind::Uprank => "Повышение",
            AuditKind::Downrank => "Понижение",
            AuditKind::Transfer => "Перевод в отдел",
        }
    }

    pub fn channel(self, channels: &ChannelsConfig) -> Option<ChannelId> {
        match self {
            AuditKind::Invite => channels.invite,
            AuditKind::Uninvite => channels.uninvite,
            AuditKind::Uprank => channels.uprank,
            AuditKind::Downrank => channels.downrank,
            AuditKind::Transfer => channels.transfer,
        }
    }
}

pub fn uninvite_action(blacklist: bool) -> &'static str {
    if blacklist {
        "Увольнение из организации с занесением в черный список"
    } else {
        "Увольнение из организации без занесения в черный список"
    }
}

pub fn uprank_action(rank: impl std::fmt::Display) -> String {
    format!("Повышение на {} ранг", rank_word(rank))
}

pub fn downrank_action(rank: impl std::fmt::Display) -> String {
    format!("Понижение на {} ранг", rank_word(rank))
}

pub fn transfer_action(from: RoleId, to: RoleId) -> String {
    format!("Перевод из {} в {}", from.mention(), to.mention())
}

/// One finalized personnel action
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditRecord {
    pub kind: AuditKind,
    /// Who filled in the audit
    pub author: Person,
    pub employee: Person,
    pub passport: String,
    pub action: String,
    pub reason: String,
}

impl AuditRecord {
    pub fn render(&self) -> OutgoingMessage {
        let embed = Embed::new(format!("📁 Кадровый аудит | {}", self.kind.title()))
            .color(EMBED_COLOR)
            .field(EmbedField::bullet("**Заполнил'а**", self.author.labelled()))
            .field(EmbedField::bullet("**Сотрудник**", self.employee.labelled()))
            .field(EmbedField::bullet("**Номер паспорта (StaticID)**", &self.passport))
            .field(EmbedField::bullet("**Действие**", &self.action))
            .field(EmbedField::bullet("**Причина**", &self.reason))
            .timestamp_now();

        OutgoingMessage {
            content: Some(format!(
                "{} заполнил'а кадровый аудит на {}",
                self.author.mention(),
                self.employee.mention()
            )),
            embeds: vec![embed],
            ..Default::default()
        }
    }
}

/// Where an audit record ended up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditDelivery {
    Posted(ChannelId),
    NotConfigured,
    /// Configured, but the channel does not exist or is not visible
    ChannelUnavailable,
}

/// Posts audit records to the configured audit channels
#[derive(Clone)]
pub struct AuditDesk {
    platform: Arc<dyn ChatPlatform>,
    channels: ChannelsConfig,
}

impl std::fmt::Debug for AuditDesk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditDesk")
            .field("channels", &self.channels)
            .finish()
    }
}

impl AuditDesk {
    pub fn new(platform: Arc<dyn ChatPlatform>, channels: ChannelsConfig) -> Self {
        Self { platform, channels }
    }

    pub fn channel(&self, kind: AuditKind) -> Option<ChannelId> {
        kind.channel(&self.channels)
    }

    pub async fn submit(&self, record: &AuditRecord) -> Result<AuditDelivery, PlatformError> {
        let Some(channel) = self.channel(record.kind) else {
            warn!(kind = ?record.kind, "Audit channel is not configured");
            return Ok(AuditDelivery::NotConfigured);
        };

        match self.platform.send_message(channel, record.render()).await {
            Ok(posted) => {
                info!(
                    kind = ?record.kind,
                    channel_id = %channel,
                    message_id = %posted.id,
                    employee = %record.employee.id,
                    "Audit record posted"
                );
                Ok(AuditDelivery::Posted(channel))
            }
            Err(e) if e.is_not_found() => {
                warn!(kind = ?record.kind, channel_id = %channel, "Audit channel not found");
                Ok(AuditDelivery::ChannelUnavailable)
            }
            Err(e) => Err(e),
        }
    }
}
