// Payload shapes exchanged with the chat platform

use super::ids::{ChannelId, MessageId, UserId};

/// Embed colour of request and audit posts
pub const EMBED_COLOR: u32 = 0x2b2d31;
/// Embed colour of setup posts and resignation requests
pub const SETUP_EMBED_COLOR: u32 = 0x3498db;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmbedField {
    pub name: String,
    pub value: String,
    pub inline: bool,
}

impl EmbedField {
    /// A non-inline field whose value is rendered as a single bullet line
    pub fn bullet(name: impl Into<String>, value: impl std::fmt::Display) -> Self {
        Self {
            name: name.into(),
            value: format!("• {value}"),
            inline: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Embed {
    pub title: Option<String>,
    pub description: Option<String>,
    pub color: Option<u32>,
    pub fields: Vec<EmbedField>,
    pub timestamp: Option<chrono::DateTime<chrono::Utc>>,
}

impl Embed {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: Some(title.into()),
            ..Default::default()
        }
    }

    pub fn color(mut self, color: u32) -> Self {
        self.color = Some(color);
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn field(mut self, field: EmbedField) -> Self {
        self.fields.push(field);
        self
    }

    pub fn timestamp_now(mut self) -> Self {
        self.timestamp = Some(chrono::Utc::now());
        self
    }

    pub fn field_value(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|f| f.name == name)
            .map(|f| f.value.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ButtonStyle {
    Primary,
    Secondary,
    Success,
    Danger,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Button {
    pub custom_id: String,
    pub label: String,
    pub style: ButtonStyle,
    pub disabled: bool,
}

impl Button {
    pub fn new(custom_id: impl Into<String>, label: impl Into<String>, style: ButtonStyle) -> Self {
        Self {
            custom_id: custom_id.into(),
            label: label.into(),
            style,
            disabled: false,
        }
    }

    pub fn disabled(mut self) -> Self {
        self.disabled = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionRow(pub Vec<Button>);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextInputStyle {
    Short,
    Paragraph,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextInput {
    pub custom_id: String,
    pub label: String,
    pub style: TextInputStyle,
    pub required: bool,
    pub max_length: u16,
}

impl TextInput {
    pub fn required(
        custom_id: impl Into<String>,
        label: impl Into<String>,
        style: TextInputStyle,
        max_length: u16,
    ) -> Self {
        Self {
            custom_id: custom_id.into(),
            label: label.into(),
            style,
            required: true,
            max_length,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModalSpec {
    pub custom_id: String,
    pub title: String,
    pub inputs: Vec<TextInput>,
}

/// Binary attachment uploaded alongside a message
#[derive(Clone, PartialEq, Eq)]
pub struct NamedFile {
    pub name: String,
    pub bytes: Vec<u8>,
}

impl std::fmt::Debug for NamedFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NamedFile")
            .field("name", &self.name)
            .field("bytes", &self.bytes.len())
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct OutgoingMessage {
    pub content: Option<String>,
    pub embeds: Vec<Embed>,
    pub files: Vec<NamedFile>,
    pub components: Vec<ActionRow>,
}

impl OutgoingMessage {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentEdit {
    Keep,
    Clear,
}

/// In-place edit of a posted message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageEdit {
    pub content: ContentEdit,
    /// `None` leaves the posted embeds as they are
    pub embeds: Option<Vec<Embed>>,
    pub components: Vec<ActionRow>,
}

impl MessageEdit {
    /// Swap the components, keeping the embeds
    pub fn components(content: ContentEdit, components: Vec<ActionRow>) -> Self {
        Self {
            content,
            embeds: None,
            components,
        }
    }
}

/// A message the bot has posted or fetched
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostedMessage {
    pub id: MessageId,
    pub channel_id: ChannelId,
    pub author_id: UserId,
    pub url: String,
    pub content: Option<String>,
    pub embeds: Vec<Embed>,
}

impl PostedMessage {
    pub fn first_embed_title(&self) -> Option<&str> {
        self.embeds.first().and_then(|e| e.title.as_deref())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub url: String,
    pub filename: String,
}

/// A message observed on the gateway, used for evidence collection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingMessage {
    pub id: MessageId,
    pub channel_id: ChannelId,
    pub author_id: UserId,
    pub attachments: Vec<Attachment>,
}

/// Opaque handle the platform needs to answer an interaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InteractionHandle {
    pub id: u64,
    pub token: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InteractionResponse {
    Message { content: String, ephemeral: bool },
    Modal(ModalSpec),
    UpdateMessage(MessageEdit),
}

impl InteractionResponse {
    pub fn ephemeral(content: impl Into<String>) -> Self {
        Self::Message {
            content: content.into(),
            ephemeral: true,
        }
    }
}
