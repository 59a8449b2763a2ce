use anyhow::Result;
use config::{Config, Environment, File};
use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::evidence::EvidenceSettings;
use crate::platform::{ChannelId, GuildId, RoleId};

pub const DEFAULT_RESIGN_CHANNEL: ChannelId = ChannelId(1466510929708580985);
pub const DEFAULT_PROMOTION_CHANNEL: ChannelId = ChannelId(1429187754696249435);
pub const DEFAULT_UPRANK_REQUEST_CHANNEL: ChannelId = ChannelId(1467093837175586868);

pub const DEFAULT_RESIGNATION_SUBMIT_ROLE: RoleId = RoleId(1466567326118711296);
pub const DEFAULT_RESIGNATION_APPROVE_ROLE: RoleId = RoleId(1466564183741956219);
pub const DEFAULT_PROMOTION_SUBMIT_ROLE: RoleId = RoleId(1382738255249936554);
pub const DEFAULT_PROMOTION_APPROVE_ROLE: RoleId = RoleId(1382738163729956947);
pub const DEFAULT_UPRANK_REQUEST_APPROVE_ROLE: RoleId = RoleId(1467094710194667634);

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("bot token is not set; provide BOT_TOKEN, DISCORD_TOKEN or discord.token")]
    MissingToken,

    #[error("invalid identifier for {key}: {value:?}")]
    InvalidIdentifier { key: &'static str, value: String },
}

/// Main configuration structure for the bot
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct KadrovikConfig {
    pub discord: DiscordConfig,
    pub channels: ChannelsConfig,
    pub roles: RolesConfig,
    pub evidence: EvidenceConfig,
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct DiscordConfig {
    /// Bot token (BOT_TOKEN / DISCORD_TOKEN take precedence)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    /// Application id used for slash command registration
    #[serde(deserialize_with = "optional_id", skip_serializing_if = "Option::is_none")]
    pub application_id: Option<u64>,
    /// When set, slash commands are registered for this guild only
    #[serde(deserialize_with = "optional_id", skip_serializing_if = "Option::is_none")]
    pub guild_id: Option<GuildId>,
}

/// Workflow channels and audit channels
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct ChannelsConfig {
    #[serde(deserialize_with = "optional_id", skip_serializing_if = "Option::is_none")]
    pub resign: Option<ChannelId>,
    #[serde(deserialize_with = "optional_id", skip_serializing_if = "Option::is_none")]
    pub promotion: Option<ChannelId>,
    #[serde(
        alias = "uprankRequest",
        alias = "uprankrequest",
        deserialize_with = "optional_id",
        skip_serializing_if = "Option::is_none"
    )]
    pub uprank_request: Option<ChannelId>,
    #[serde(deserialize_with = "optional_id", skip_serializing_if = "Option::is_none")]
    pub uprank: Option<ChannelId>,
    #[serde(deserialize_with = "optional_id", skip_serializing_if = "Option::is_none")]
    pub uninvite: Option<ChannelId>,
    #[serde(deserialize_with = "optional_id", skip_serializing_if = "Option::is_none")]
    pub invite: Option<ChannelId>,
    #[serde(deserialize_with = "optional_id", skip_serializing_if = "Option::is_none")]
    pub transfer: Option<ChannelId>,
    #[serde(deserialize_with = "optional_id", skip_serializing_if = "Option::is_none")]
    pub downrank: Option<ChannelId>,
}

impl ChannelsConfig {
    pub fn resign(&self) -> ChannelId {
        self.resign.unwrap_or(DEFAULT_RESIGN_CHANNEL)
    }

    pub fn promotion(&self) -> ChannelId {
        self.promotion.unwrap_or(DEFAULT_PROMOTION_CHANNEL)
    }

    pub fn uprank_request(&self) -> ChannelId {
        self.uprank_request.unwrap_or(DEFAULT_UPRANK_REQUEST_CHANNEL)
    }
}

/// Role sets gating the workflows and commands
///
/// An empty list counts as not configured, so the built-in default applies.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct RolesConfig {
    /// Who may run the audit commands; empty means everyone
    pub commands: Vec<RoleId>,
    #[serde(alias = "resignPromotionSubmit", alias = "resignpromotionsubmit")]
    pub resign_promotion_submit: Vec<RoleId>,
    #[serde(alias = "resignPromotionApprove", alias = "resignpromotionapprove")]
    pub resign_promotion_approve: Vec<RoleId>,
    #[serde(alias = "uprankRequestSubmit", alias = "uprankrequestsubmit")]
    pub uprank_request_submit: Vec<RoleId>,
    #[serde(alias = "uprankRequestApprove", alias = "uprankrequestapprove")]
    pub uprank_request_approve: Vec<RoleId>,
    /// Granted by the `invite` command
    #[serde(alias = "inviteRoles", alias = "inviteroles")]
    pub invite_roles: Vec<RoleId>,
}

fn configured_or(roles: &[RoleId], fallback: RoleId) -> Vec<RoleId> {
    if roles.is_empty() {
        vec![fallback]
    } else {
        roles.to_vec()
    }
}

impl RolesConfig {
    pub fn resignation_submit(&self) -> Vec<RoleId> {
        configured_or(&self.resign_promotion_submit, DEFAULT_RESIGNATION_SUBMIT_ROLE)
    }

    pub fn resignation_approve(&self) -> Vec<RoleId> {
        configured_or(&self.resign_promotion_approve, DEFAULT_RESIGNATION_APPROVE_ROLE)
    }

    pub fn promotion_submit(&self) -> Vec<RoleId> {
        configured_or(&self.resign_promotion_submit, DEFAULT_PROMOTION_SUBMIT_ROLE)
    }

    pub fn promotion_approve(&self) -> Vec<RoleId> {
        configured_or(&self.resign_promotion_approve, DEFAULT_PROMOTION_APPROVE_ROLE)
    }

    /// Falls back to the resignation/promotion submitters before the default
    pub fn uprank_request_submit(&self) -> Vec<RoleId> {
        if !self.uprank_request_submit.is_empty() {
            return self.uprank_request_submit.clone();
        }
        configured_or(&self.resign_promotion_submit, DEFAULT_RESIGNATION_SUBMIT_ROLE)
    }

    pub fn uprank_request_approve(&self) -> Vec<RoleId> {
        configured_or(&self.uprank_request_approve, DEFAULT_UPRANK_REQUEST_APPROVE_ROLE)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EvidenceConfig {
    /// Window for posting evidence after a form submission
    pub timeout_seconds: u64,
    /// Lifetime of the wrong-attachment-count notice
    pub notice_ttl_seconds: u64,
}

impl Default for EvidenceConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: 60,
            notice_ttl_seconds: 5,
        }
    }
}

impl EvidenceConfig {
    pub fn settings(&self) -> EvidenceSettings {
        EvidenceSettings {
            timeout: Duration::from_secs(self.timeout_seconds),
            notice_ttl: Duration::from_secs(self.notice_ttl_seconds),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Default filter directive when RUST_LOG is not set
    pub log_level: String,
    /// JSON structured output instead of the human-readable formatter
    pub json_logs: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: true,
        }
    }
}

impl KadrovikConfig {
    /// Load configuration with precedence:
    /// 1. Default values
    /// 2. kadrovik.toml
    /// 3. config.json, or config.example.json when it is absent
    /// 4. Environment variables (prefixed with KADROVIK__)
    pub fn load() -> Result<Self> {
        Self::load_from(Path::new("."))
    }

    /// Same as [`KadrovikConfig::load`] with files looked up in `dir`
    pub fn load_from(dir: &Path) -> Result<Self> {
        let mut builder = Config::builder();

        let toml_path = dir.join("kadrovik.toml");
        if toml_path.exists() {
            builder = builder.add_source(File::from(toml_path));
        }

        let legacy_path = dir.join("config.json");
        let example_path = dir.join("config.example.json");
        if legacy_path.exists() {
            builder = builder.add_source(File::from(legacy_path));
        } else if example_path.exists() {
            builder = builder.add_source(File::from(example_path));
        }

        builder = builder.add_source(
            Environment::with_prefix("KADROVIK")
                .separator("__")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("roles.commands")
                .with_list_parse_key("roles.resign_promotion_submit")
                .with_list_parse_key("roles.resign_promotion_approve")
                .with_list_parse_key("roles.uprank_request_submit")
                .with_list_parse_key("roles.uprank_request_approve")
                .with_list_parse_key("roles.invite_roles"),
        );

        let raw = builder.build()?;
        let mut config: KadrovikConfig = raw.clone().try_deserialize()?;
        config.apply_legacy_keys(&raw)?;

        let file_token = config.discord.token.take();
        config.discord.token = resolve_token(
            std::env::var("BOT_TOKEN").ok(),
            std::env::var("DISCORD_TOKEN").ok(),
            file_token,
        );

        Ok(config)
    }

    /// Legacy config.json keeps `token`, `clientId` and `guildId` at the top level
    fn apply_legacy_keys(&mut self, raw: &Config) -> Result<(), ConfigError> {
        if self.discord.token.is_none() {
            self.discord.token = legacy_string(raw, "token");
        }
        if self.discord.application_id.is_none() {
            if let Some(value) = legacy_string(raw, "clientId") {
                self.discord.application_id = Some(parse_legacy_id("clientId", &value)?);
            }
        }
        if self.discord.guild_id.is_none() {
            if let Some(value) = legacy_string(raw, "guildId") {
                self.discord.guild_id = Some(GuildId(parse_legacy_id("guildId", &value)?));
            }
        }
        Ok(())
    }

    /// Checks that must pass before connecting to Discord
    pub fn validate_for_run(&self) -> Result<(), ConfigError> {
        match self.discord.token.as_deref() {
            Some(token) if !token.trim().is_empty() => Ok(()),
            _ => Err(ConfigError::MissingToken),
        }
    }

    pub fn evidence_settings(&self) -> EvidenceSettings {
        self.evidence.settings()
    }

    /// Copy safe to print or write out, with the token masked
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if copy.discord.token.is_some() {
            copy.discord.token = Some("***".to_string());
        }
        copy
    }

    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Save configuration to file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let toml_content = self.to_toml()?;
        std::fs::write(path, toml_content)?;
        Ok(())
    }

    /// Load .env file if it exists
    pub fn load_env_file() -> Result<()> {
        if Path::new(".env").exists() {
            dotenvy::dotenv()?;
            tracing::info!("Loaded environment variables from .env file");
        }
        Ok(())
    }
}

/// First non-empty of `BOT_TOKEN`, `DISCORD_TOKEN` and the file value
pub fn resolve_token(
    bot_token: Option<String>,
    discord_token: Option<String>,
    file_token: Option<String>,
) -> Option<String> {
    [bot_token, discord_token, file_token]
        .into_iter()
        .flatten()
        .find(|token| !token.trim().is_empty())
}

fn legacy_string(raw: &Config, key: &str) -> Option<String> {
    raw.get_string(key)
        .or_else(|_| raw.get_string(&key.to_lowercase()))
        .ok()
        .filter(|value| !value.trim().is_empty())
}

fn parse_legacy_id(key: &'static str, value: &str) -> Result<u64, ConfigError> {
    value
        .trim()
        .parse::<u64>()
        .map_err(|_| ConfigError::InvalidIdentifier {
            key,
            value: value.to_string(),
        })
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawId {
    Number(u64),
    Text(String),
}

/// Accepts an id as integer or string; an empty string means "not set"
fn optional_id<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: From<u64>,
{
    match Option::<RawId>::deserialize(deserializer)? {
        None => Ok(None),
        Some(RawId::Number(id)) => Ok(Some(T::from(id))),
        Some(RawId::Text(text)) if text.trim().is_empty() => Ok(None),
        Some(RawId::Text(text)) => text
            .trim()
            .parse::<u64>()
            .map(|id| Some(T::from(id)))
            .map_err(|_| de::Error::custom(format!("invalid snowflake id {text:?}"))),
    }
}
