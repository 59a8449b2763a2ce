// Setup posts: the pinned "open form" message of each workflow channel

use tracing::info;

use crate::platform::{
    ActionRow, Button, ButtonStyle, ChannelId, ChatPlatform, ContentEdit, Embed, MessageEdit,
    MessageId, OutgoingMessage, PlatformError, SETUP_EMBED_COLOR,
};

/// How many recent messages are searched for an existing setup post
pub const SETUP_SCAN_LIMIT: u8 = 20;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetupMessage {
    pub title: &'static str,
    pub description: &'static str,
    pub button_id: String,
    pub button_label: &'static str,
}

impl SetupMessage {
    pub fn embed(&self) -> Embed {
        Embed::new(self.title)
            .description(self.description)
            .color(SETUP_EMBED_COLOR)
    }

    pub fn components(&self) -> Vec<ActionRow> {
        vec![ActionRow(vec![Button::new(
            self.button_id.clone(),
            self.button_label,
            ButtonStyle::Secondary,
        )])]
    }

    pub fn render(&self) -> OutgoingMessage {
        OutgoingMessage {
            embeds: vec![self.embed()],
            components: self.components(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetupOutcome {
    Created(MessageId),
    Updated(MessageId),
}

/// Edit the bot's existing setup post in place, or send a fresh one
pub async fn ensure_setup_message(
    platform: &dyn ChatPlatform,
    channel: ChannelId,
    setup: &SetupMessage,
) -> Result<SetupOutcome, PlatformError> {
    let bot = platform.bot_user_id();
    let recent = platform.recent_messages(channel, SETUP_SCAN_LIMIT).await?;
    // Approval requests can share the setup title but always carry fields
    let existing = recent.into_iter().find(|message| {
        Some(message.author_id) == bot
            && message.first_embed_title() == Some(setup.title)
            && message.embeds.first().is_some_and(|e| e.fields.is_empty())
    });

    match existing {
        Some(message) => {
            let edit = MessageEdit {
                content: ContentEdit::Clear,
                embeds: Some(vec![setup.embed()]),
                components: setup.components(),
            };
            platform.edit_message(channel, message.id, edit).await?;
            info!(channel_id = %channel, message_id = %message.id, title = setup.title, "Setup message updated");
            Ok(SetupOutcome::Updated(message.id))
        }
        None => {
            let posted = platform.send_message(channel, setup.render()).await?;
            info!(channel_id = %channel, message_id = %posted.id, title = setup.title, "Setup message sent");
            Ok(SetupOutcome::Created(posted.id))
        }
    }
}
