//! Chat platform capability interface
//!
//! The workflows never talk to Discord directly. Everything they need from
//! the platform (posting, editing and deleting messages, answering
//! interactions, mutating member roles, downloading attachments) goes through
//! [`ChatPlatform`], which keeps the request lifecycle testable with
//! [`mocks::RecordingPlatform`] or the generated `MockChatPlatform`.
//!
//! # Examples
//!
//! ```rust,no_run
//! use kadrovik::platform::{ChatPlatform, OutgoingMessage, ChannelId};
//! use std::sync::Arc;
//!
//! async fn announce(platform: Arc<dyn ChatPlatform>) -> anyhow::Result<()> {
//!     let posted = platform
//!         .send_message(ChannelId(1466510929708580985), OutgoingMessage::text("hello"))
//!         .await?;
//!     println!("posted {}", posted.url);
//!     Ok(())
//! }
//! ```

use async_trait::async_trait;
use thiserror::Error;

#[cfg(test)]
use mockall::automock;

pub mod ids;
pub mod mocks;
pub mod types;

#[cfg(feature = "discord")]
pub mod discord;

pub use ids::{ChannelId, GuildId, MessageId, RoleId, UserId};
pub use types::*;

#[derive(Debug, Error)]
pub enum PlatformError {
    #[error("{what} not found")]
    NotFound { what: String },

    #[error("interaction has already been acknowledged")]
    AlreadyAcknowledged,

    #[error("missing permissions: {0}")]
    Forbidden(String),

    #[error("platform request failed: {0}")]
    Http(String),

    #[error("platform unavailable: {0}")]
    Unavailable(String),
}

impl PlatformError {
    pub fn not_found(what: impl Into<String>) -> Self {
        PlatformError::NotFound { what: what.into() }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, PlatformError::NotFound { .. })
    }
}

/// Everything the request workflows need from the chat platform
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ChatPlatform: Send + Sync {
    /// Post a new message; the returned message carries its assigned id and URL
    async fn send_message(
        &self,
        channel: ChannelId,
        message: OutgoingMessage,
    ) -> Result<PostedMessage, PlatformError>;

    /// Edit a posted message in place
    async fn edit_message(
        &self,
        channel: ChannelId,
        message: MessageId,
        edit: MessageEdit,
    ) -> Result<(), PlatformError>;

    /// Fetch a message; `Ok(None)` when it no longer exists
    async fn fetch_message(
        &self,
        channel: ChannelId,
        message: MessageId,
    ) -> Result<Option<PostedMessage>, PlatformError>;

    /// Most recent messages of a channel, newest first
    async fn recent_messages(
        &self,
        channel: ChannelId,
        limit: u8,
    ) -> Result<Vec<PostedMessage>, PlatformError>;

    async fn delete_message(&self, channel: ChannelId, message: MessageId)
        -> Result<(), PlatformError>;

    /// Reply to a message with a plain text notice
    async fn reply_to_message(
        &self,
        channel: ChannelId,
        message: MessageId,
        content: String,
    ) -> Result<PostedMessage, PlatformError>;

    /// First response to an interaction
    async fn respond(
        &self,
        interaction: &InteractionHandle,
        response: InteractionResponse,
    ) -> Result<(), PlatformError>;

    /// Ephemeral follow-up for an interaction that was already answered
    async fn follow_up(
        &self,
        interaction: &InteractionHandle,
        content: String,
    ) -> Result<(), PlatformError>;

    async fn set_member_roles(
        &self,
        guild: GuildId,
        user: UserId,
        roles: Vec<RoleId>,
    ) -> Result<(), PlatformError>;

    async fn add_member_roles(
        &self,
        guild: GuildId,
        user: UserId,
        roles: Vec<RoleId>,
    ) -> Result<(), PlatformError>;

    async fn remove_member_roles(
        &self,
        guild: GuildId,
        user: UserId,
        roles: Vec<RoleId>,
    ) -> Result<(), PlatformError>;

    /// Download the binary content of an attachment
    async fn fetch_attachment(&self, attachment: &Attachment) -> Result<Vec<u8>, PlatformError>;

    /// The bot's own user id, once the gateway session is ready
    fn bot_user_id(&self) -> Option<UserId>;
}
