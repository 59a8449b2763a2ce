//! Discord implementation of [`ChatPlatform`] on top of serenity's HTTP client
//!
//! Also converts gateway payloads into the SDK-free shapes the workflows use.

use async_trait::async_trait;
use serenity::all::{
    ButtonStyle as SerenityButtonStyle, CommandDataOptionValue, CreateActionRow, CreateAttachment,
    CreateButton, CreateEmbed, CreateInputText, CreateInteractionResponse,
    CreateInteractionResponseFollowup, CreateInteractionResponseMessage, CreateMessage,
    CreateModal, EditMember, EditMessage, GetMessages, InputTextStyle, InteractionId,
    Timestamp,
};
use serenity::builder::Builder;
use serenity::http::{Http, HttpError};
use serenity::model::application::{
    ActionRowComponent, CommandInteraction, ComponentInteraction, ModalInteraction,
};
use serenity::model::channel::Message;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tracing::debug;

use super::{
    ActionRow, Attachment, ButtonStyle, ChannelId, ChatPlatform, ContentEdit, Embed, EmbedField,
    GuildId, IncomingMessage, InteractionHandle, InteractionResponse, MessageEdit, MessageId,
    ModalSpec, OutgoingMessage, PlatformError, PostedMessage, RoleId, TextInputStyle, UserId,
};
use crate::interaction::{
    CommandInvocation, Interaction, Member, OptionValue, ResolvedUser, User,
};

const ATTACHMENT_TIMEOUT: Duration = Duration::from_secs(30);
/// Discord error code for "Interaction has already been acknowledged"
const ALREADY_ACKNOWLEDGED: isize = 40060;

pub struct DiscordPlatform {
    http: Arc<Http>,
    downloads: reqwest::Client,
    bot_user: OnceLock<UserId>,
}

impl DiscordPlatform {
    pub fn new(http: Arc<Http>) -> Result<Self, PlatformError> {
        let downloads = reqwest::Client::builder()
            .timeout(ATTACHMENT_TIMEOUT)
            .build()
            .map_err(|e| PlatformError::Unavailable(e.to_string()))?;
        Ok(Self {
            http,
            downloads,
            bot_user: OnceLock::new(),
        })
    }

    pub fn http(&self) -> &Arc<Http> {
        &self.http
    }

    /// Remember the bot's own id once the gateway session is ready
    pub fn set_bot_user(&self, id: UserId) {
        if self.bot_user.set(id).is_err() {
            debug!(user_id = %id, "Bot user id already known");
        }
    }
}

fn map_error(what: &str, error: serenity::Error) -> PlatformError {
    if let serenity::Error::Http(http_error) = &error {
        if let HttpError::UnsuccessfulRequest(response) = http_error {
            if response.error.code == ALREADY_ACKNOWLEDGED {
                return PlatformError::AlreadyAcknowledged;
            }
        }
        match http_error.status_code().map(|s| s.as_u16()) {
            Some(404) => return PlatformError::not_found(what),
            Some(403) => return PlatformError::Forbidden(error.to_string()),
            _ => {}
        }
    }
    PlatformError::Http(error.to_string())
}

fn button_style(style: ButtonStyle) -> SerenityButtonStyle {
    match style {
        ButtonStyle::Primary => SerenityButtonStyle::Primary,
        ButtonStyle::Secondary => SerenityButtonStyle::Secondary,
        ButtonStyle::Success => SerenityButtonStyle::Success,
        ButtonStyle::Danger => SerenityButtonStyle::Danger,
    }
}

fn action_rows(rows: &[ActionRow]) -> Vec<CreateActionRow> {
    rows.iter()
        .map(|row| {
            CreateActionRow::Buttons(
                row.0
                    .iter()
                    .map(|b| {
                        CreateButton::new(b.custom_id.clone())
                            .label(b.label.clone())
                            .style(button_style(b.style))
                            .disabled(b.disabled)
                    })
                    .collect(),
            )
        })
        .collect()
}

fn create_embed(embed: &Embed) -> CreateEmbed {
    let mut builder = CreateEmbed::new();
    if let Some(title) = &embed.title {
        builder = builder.title(title.clone());
    }
    if let Some(description) = &embed.description {
        builder = builder.description(description.clone());
    }
    if let Some(color) = embed.color {
        builder = builder.colour(color);
    }
    for field in &embed.fields {
        builder = builder.field(field.name.clone(), field.value.clone(), field.inline);
    }
    if let Some(ts) = embed.timestamp.and_then(|t| Timestamp::from_unix_timestamp(t.timestamp()).ok()) {
        builder = builder.timestamp(ts);
    }
    builder
}

fn create_embeds(embeds: &[Embed]) -> Vec<CreateEmbed> {
    embeds.iter().map(create_embed).collect()
}

fn modal(spec: &ModalSpec) -> CreateModal {
    let rows = spec
        .inputs
        .iter()
        .map(|input| {
            let style = match input.style {
                TextInputStyle::Short => InputTextStyle::Short,
                TextInputStyle::Paragraph => InputTextStyle::Paragraph,
            };
            CreateActionRow::InputText(
                CreateInputText::new(style, input.label.clone(), input.custom_id.clone())
                    .required(input.required)
                    .max_length(input.max_length),
            )
        })
        .collect();
    CreateModal::new(spec.custom_id.clone(), spec.title.clone()).components(rows)
}

fn update_message(edit: &MessageEdit) -> CreateInteractionResponseMessage {
    let mut builder = CreateInteractionResponseMessage::new().components(action_rows(&edit.components));
    if edit.content == ContentEdit::Clear {
        builder = builder.content("");
    }
    if let Some(embeds) = &edit.embeds {
        builder = builder.embeds(create_embeds(embeds));
    }
    builder
}

fn convert_embed(embed: &serenity::model::channel::Embed) -> Embed {
    Embed {
        title: embed.title.clone(),
        description: embed.description.clone(),
        color: embed.colour.map(|c| c.0),
        fields: embed
            .fields
            .iter()
            .map(|f| EmbedField {
                name: f.name.clone(),
                value: f.value.clone(),
                inline: f.inline,
            })
            .collect(),
        timestamp: embed
            .timestamp
            .and_then(|t| chrono::DateTime::from_timestamp(t.unix_timestamp(), 0)),
    }
}

/// Posted-message view of a serenity message
pub fn posted_message(message: &Message) -> PostedMessage {
    PostedMessage {
        id: MessageId(message.id.get()),
        channel_id: ChannelId(message.channel_id.get()),
        author_id: UserId(message.author.id.get()),
        url: message.link(),
        content: Some(message.content.clone()).filter(|c| !c.is_empty()),
        embeds: message.embeds.iter().map(convert_embed).collect(),
    }
}

/// Gateway message as seen by the evidence sessions
pub fn incoming_message(message: &Message) -> IncomingMessage {
    IncomingMessage {
        id: MessageId(message.id.get()),
        channel_id: ChannelId(message.channel_id.get()),
        author_id: UserId(message.author.id.get()),
        attachments: message
            .attachments
            .iter()
            .map(|a| Attachment {
                url: a.url.clone(),
                filename: a.filename.clone(),
            })
            .collect(),
    }
}

fn user(user: &serenity::model::user::User) -> User {
    User {
        id: UserId(user.id.get()),
        username: user.name.clone(),
    }
}

fn member(member: &serenity::model::guild::Member) -> Member {
    Member::new(
        UserId(member.user.id.get()),
        member.roles.iter().map(|r| RoleId(r.get())),
    )
    .with_display_name(member.display_name().to_string())
}

fn handle(id: InteractionId, token: &str) -> InteractionHandle {
    InteractionHandle {
        id: id.get(),
        token: token.to_string(),
    }
}

fn finish(
    base: Interaction,
    guild_id: Option<serenity::model::id::GuildId>,
    source: Option<&serenity::model::guild::Member>,
    message: Option<&Message>,
) -> Interaction {
    let mut interaction = base;
    if let Some(guild_id) = guild_id {
        interaction = interaction.in_guild(GuildId(guild_id.get()));
    }
    if let Some(source) = source {
        interaction = interaction.with_member(member(source));
    }
    if let Some(message) = message {
        interaction = interaction.on_message(posted_message(message));
    }
    interaction
}

pub fn component_interaction(component: &ComponentInteraction) -> Interaction {
    let base = Interaction::button(
        component.id.get(),
        component.data.custom_id.clone(),
        ChannelId(component.channel_id.get()),
        user(&component.user),
    )
    .with_handle(handle(component.id, &component.token));
    finish(
        base,
        component.guild_id,
        component.member.as_ref(),
        Some(component.message.as_ref()),
    )
}

pub fn modal_interaction(modal: &ModalInteraction) -> Interaction {
    let fields: HashMap<String, String> = modal
        .data
        .components
        .iter()
        .flat_map(|row| row.components.iter())
        .filter_map(|component| match component {
            ActionRowComponent::InputText(input) => Some((
                input.custom_id.clone(),
                input.value.clone().unwrap_or_default(),
            )),
            _ => None,
        })
        .collect();
    let base = Interaction::modal_submit(
        modal.id.get(),
        modal.data.custom_id.clone(),
        fields,
        ChannelId(modal.channel_id.get()),
        user(&modal.user),
    )
    .with_handle(handle(modal.id, &modal.token));
    finish(
        base,
        modal.guild_id,
        modal.member.as_ref(),
        modal.message.as_deref(),
    )
}

pub fn command_interaction(command: &CommandInteraction) -> Interaction {
    let mut invocation = CommandInvocation::new(command.data.name.clone());
    for option in &command.data.options {
        let value = match &option.value {
            CommandDataOptionValue::String(s) => OptionValue::String(s.clone()),
            CommandDataOptionValue::Integer(i) => OptionValue::Integer(*i),
            CommandDataOptionValue::Role(id) => OptionValue::Role(RoleId(id.get())),
            CommandDataOptionValue::User(id) => {
                let resolved_user = command.data.resolved.users.get(id);
                let resolved_member = command.data.resolved.members.get(id);
                let Some(found) = resolved_user else {
                    continue;
                };
                let member = resolved_member.map(|partial| {
                    let name = partial
                        .nick
                        .clone()
                        .or_else(|| found.global_name.clone())
                        .unwrap_or_else(|| found.name.clone());
                    Member::new(UserId(id.get()), partial.roles.iter().map(|r| RoleId(r.get())))
                        .with_display_name(name)
                });
                OptionValue::User(ResolvedUser {
                    user: user(found),
                    member,
                })
            }
            _ => continue,
        };
        invocation = invocation.option(option.name.clone(), value);
    }
    let base = Interaction::command(
        command.id.get(),
        invocation,
        ChannelId(command.channel_id.get()),
        user(&command.user),
    )
    .with_handle(handle(command.id, &command.token));
    finish(base, command.guild_id, command.member.as_deref(), None)
}

fn serenity_channel(id: ChannelId) -> serenity::model::id::ChannelId {
    serenity::model::id::ChannelId::new(id.get())
}

fn serenity_message(id: MessageId) -> serenity::model::id::MessageId {
    serenity::model::id::MessageId::new(id.get())
}

fn serenity_guild(id: GuildId) -> serenity::model::id::GuildId {
    serenity::model::id::GuildId::new(id.get())
}

fn serenity_user(id: UserId) -> serenity::model::id::UserId {
    serenity::model::id::UserId::new(id.get())
}

fn serenity_role(id: RoleId) -> serenity::model::id::RoleId {
    serenity::model::id::RoleId::new(id.get())
}

#[async_trait]
impl ChatPlatform for DiscordPlatform {
    async fn send_message(
        &self,
        channel: ChannelId,
        message: OutgoingMessage,
    ) -> Result<PostedMessage, PlatformError> {
        let mut builder = CreateMessage::new()
            .embeds(create_embeds(&message.embeds))
            .components(action_rows(&message.components));
        if let Some(content) = message.content {
            builder = builder.content(content);
        }
        let files: Vec<CreateAttachment> = message
            .files
            .into_iter()
            .map(|f| CreateAttachment::bytes(f.bytes, f.name))
            .collect();
        if !files.is_empty() {
            builder = builder.add_files(files);
        }
        let posted = serenity_channel(channel)
            .send_message(&*self.http, builder)
            .await
            .map_err(|e| map_error("channel", e))?;
        Ok(posted_message(&posted))
    }

    async fn edit_message(
        &self,
        channel: ChannelId,
        message: MessageId,
        edit: MessageEdit,
    ) -> Result<(), PlatformError> {
        let mut builder = EditMessage::new().components(action_rows(&edit.components));
        if edit.content == ContentEdit::Clear {
            builder = builder.content("");
        }
        if let Some(embeds) = &edit.embeds {
            builder = builder.embeds(create_embeds(embeds));
        }
        serenity_channel(channel)
            .edit_message(&*self.http, serenity_message(message), builder)
            .await
            .map_err(|e| map_error("message", e))?;
        Ok(())
    }

    async fn fetch_message(
        &self,
        channel: ChannelId,
        message: MessageId,
    ) -> Result<Option<PostedMessage>, PlatformError> {
        match serenity_channel(channel)
            .message(&*self.http, serenity_message(message))
            .await
        {
            Ok(found) => Ok(Some(posted_message(&found))),
            Err(e) => match map_error("message", e) {
                PlatformError::NotFound { .. } => Ok(None),
                other => Err(other),
            },
        }
    }

    async fn recent_messages(
        &self,
        channel: ChannelId,
        limit: u8,
    ) -> Result<Vec<PostedMessage>, PlatformError> {
        let messages = serenity_channel(channel)
            .messages(&*self.http, GetMessages::new().limit(limit))
            .await
            .map_err(|e| map_error("channel", e))?;
        Ok(messages.iter().map(posted_message).collect())
    }

    async fn delete_message(
        &self,
        channel: ChannelId,
        message: MessageId,
    ) -> Result<(), PlatformError> {
        serenity_channel(channel)
            .delete_message(&*self.http, serenity_message(message))
            .await
            .map_err(|e| map_error("message", e))
    }

    async fn reply_to_message(
        &self,
        channel: ChannelId,
        message: MessageId,
        content: String,
    ) -> Result<PostedMessage, PlatformError> {
        let builder = CreateMessage::new()
            .content(content)
            .reference_message((serenity_channel(channel), serenity_message(message)));
        let posted = serenity_channel(channel)
            .send_message(&*self.http, builder)
            .await
            .map_err(|e| map_error("message", e))?;
        Ok(posted_message(&posted))
    }

    async fn respond(
        &self,
        interaction: &InteractionHandle,
        response: InteractionResponse,
    ) -> Result<(), PlatformError> {
        let builder = match &response {
            InteractionResponse::Message { content, ephemeral } => {
                CreateInteractionResponse::Message(
                    CreateInteractionResponseMessage::new()
                        .content(content.clone())
                        .ephemeral(*ephemeral),
                )
            }
            InteractionResponse::Modal(spec) => CreateInteractionResponse::Modal(modal(spec)),
            InteractionResponse::UpdateMessage(edit) => {
                CreateInteractionResponse::UpdateMessage(update_message(edit))
            }
        };
        builder
            .execute(
                &*self.http,
                (InteractionId::new(interaction.id), interaction.token.as_str()),
            )
            .await
            .map_err(|e| map_error("interaction", e))
    }

    async fn follow_up(
        &self,
        interaction: &InteractionHandle,
        content: String,
    ) -> Result<(), PlatformError> {
        CreateInteractionResponseFollowup::new()
            .content(content)
            .ephemeral(true)
            .execute(&*self.http, (None, interaction.token.as_str()))
            .await
            .map_err(|e| map_error("interaction", e))?;
        Ok(())
    }

    async fn set_member_roles(
        &self,
        guild: GuildId,
        user: UserId,
        roles: Vec<RoleId>,
    ) -> Result<(), PlatformError> {
        let builder = EditMember::new().roles(roles.into_iter().map(serenity_role));
        serenity_guild(guild)
            .edit_member(&*self.http, serenity_user(user), builder)
            .await
            .map_err(|e| map_error("member", e))?;
        Ok(())
    }

    async fn add_member_roles(
        &self,
        guild: GuildId,
        user: UserId,
        roles: Vec<RoleId>,
    ) -> Result<(), PlatformError> {
        for role in roles {
            self.http
                .add_member_role(serenity_guild(guild), serenity_user(user), serenity_role(role), None)
                .await
                .map_err(|e| map_error("member", e))?;
        }
        Ok(())
    }

    async fn remove_member_roles(
        &self,
        guild: GuildId,
        user: UserId,
        roles: Vec<RoleId>,
    ) -> Result<(), PlatformError> {
        for role in roles {
            self.http
                .remove_member_role(serenity_guild(guild), serenity_user(user), serenity_role(role), None)
                .await
                .map_err(|e| map_error("member", e))?;
        }
        Ok(())
    }

    async fn fetch_attachment(&self, attachment: &Attachment) -> Result<Vec<u8>, PlatformError> {
        let response = self
            .downloads
            .get(&attachment.url)
            .send()
            .await
            .map_err(|e| PlatformError::Http(e.to_string()))?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(PlatformError::not_found(format!("attachment {}", attachment.filename)));
        }
        let response = response
            .error_for_status()
            .map_err(|e| PlatformError::Http(e.to_string()))?;
        let bytes = response
            .bytes()
            .await
            .map_err(|e| PlatformError::Http(e.to_string()))?;
        Ok(bytes.to_vec())
    }

    fn bot_user_id(&self) -> Option<UserId> {
        self.bot_user.get().copied()
    }
}
