// Recording platform for tests - no network, every call is captured

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use super::*;

/// Every call the recording platform has seen, in order
#[derive(Debug, Clone, PartialEq)]
pub enum PlatformCall {
    Send { channel: ChannelId, message: OutgoingMessage, id: MessageId },
    Edit { channel: ChannelId, message: MessageId, edit: MessageEdit },
    Fetch { channel: ChannelId, message: MessageId },
    Recent { channel: ChannelId },
    Delete { channel: ChannelId, message: MessageId },
    Reply { channel: ChannelId, message: MessageId, content: String, id: MessageId },
    Respond { interaction: u64, response: InteractionResponse },
    FollowUp { interaction: u64, content: String },
    SetRoles { guild: GuildId, user: UserId, roles: Vec<RoleId> },
    AddRoles { guild: GuildId, user: UserId, roles: Vec<RoleId> },
    RemoveRoles { guild: GuildId, user: UserId, roles: Vec<RoleId> },
    FetchAttachment { url: String },
}

/// In-memory [`ChatPlatform`] that stores posted messages and records calls
#[derive(Debug)]
pub struct RecordingPlatform {
    calls: Mutex<Vec<PlatformCall>>,
    messages: Mutex<HashMap<MessageId, PostedMessage>>,
    attachments: Mutex<HashMap<String, Vec<u8>>>,
    missing_channels: Mutex<HashSet<ChannelId>>,
    acknowledged: Mutex<HashSet<u64>>,
    fail_role_changes: Mutex<bool>,
    fail_sends: Mutex<bool>,
    next_id: AtomicU64,
    bot_id: UserId,
}

impl Default for RecordingPlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingPlatform {
    pub const BOT_ID: UserId = UserId(900_000_000_000_000_001);

    pub fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            messages: Mutex::new(HashMap::new()),
            attachments: Mutex::new(HashMap::new()),
            missing_channels: Mutex::new(HashSet::new()),
            acknowledged: Mutex::new(HashSet::new()),
            fail_role_changes: Mutex::new(false),
            fail_sends: Mutex::new(false),
            next_id: AtomicU64::new(5_000),
            bot_id: Self::BOT_ID,
        }
    }

    /// Serve `bytes` when an attachment with this URL is downloaded
    pub fn set_attachment(&self, url: &str, bytes: Vec<u8>) {
        lock(&self.attachments).insert(url.to_string(), bytes);
    }

    /// Sends to this channel fail with `NotFound`
    pub fn set_channel_missing(&self, channel: ChannelId) {
        lock(&self.missing_channels).insert(channel);
    }

    pub fn set_fail_role_changes(&self, fail: bool) {
        *lock(&self.fail_role_changes) = fail;
    }

    /// Every `send_message` fails with an HTTP error
    pub fn set_fail_sends(&self, fail: bool) {
        *lock(&self.fail_sends) = fail;
    }

    /// Seed a message as if it had been posted earlier
    pub fn insert_message(&self, message: PostedMessage) {
        lock(&self.messages).insert(message.id, message);
    }

    pub fn message(&self, id: MessageId) -> Option<PostedMessage> {
        lock(&self.messages).get(&id).cloned()
    }

    pub fn calls(&self) -> Vec<PlatformCall> {
        lock(&self.calls).clone()
    }

    pub fn clear_calls(&self) {
        lock(&self.calls).clear();
    }

    /// Messages sent to `channel`, with the ids they were assigned
    pub fn sent_to(&self, channel: ChannelId) -> Vec<(MessageId, OutgoingMessage)> {
        lock(&self.calls)
            .iter()
            .filter_map(|call| match call {
                PlatformCall::Send { channel: c, message, id } if *c == channel => {
                    Some((*id, message.clone()))
                }
                _ => None,
            })
            .collect()
    }

    /// In-place updates made while answering component interactions
    pub fn updates(&self) -> Vec<MessageEdit> {
        lock(&self.calls)
            .iter()
            .filter_map(|call| match call {
                PlatformCall::Respond {
                    response: InteractionResponse::UpdateMessage(edit),
                    ..
                } => Some(edit.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn responses(&self) -> Vec<InteractionResponse> {
        lock(&self.calls)
            .iter()
            .filter_map(|call| match call {
                PlatformCall::Respond { response, .. } => Some(response.clone()),
                _ => None,
            })
            .collect()
    }

    /// Text of every ephemeral reply and follow-up, in order
    pub fn ephemeral_texts(&self) -> Vec<String> {
        lock(&self.calls)
            .iter()
            .filter_map(|call| match call {
                PlatformCall::Respond {
                    response: InteractionResponse::Message { content, .. },
                    ..
                } => Some(content.clone()),
                PlatformCall::FollowUp { content, .. } => Some(content.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn edits_of(&self, message: MessageId) -> Vec<MessageEdit> {
        lock(&self.calls)
            .iter()
            .filter_map(|call| match call {
                PlatformCall::Edit { message: m, edit, .. } if *m == message => Some(edit.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn deleted(&self) -> Vec<MessageId> {
        lock(&self.calls)
            .iter()
            .filter_map(|call| match call {
                PlatformCall::Delete { message, .. } => Some(*message),
                _ => None,
            })
            .collect()
    }

    pub fn role_calls(&self) -> Vec<PlatformCall> {
        lock(&self.calls)
            .iter()
            .filter(|call| {
                matches!(
                    call,
                    PlatformCall::SetRoles { .. }
                        | PlatformCall::AddRoles { .. }
                        | PlatformCall::RemoveRoles { .. }
                )
            })
            .cloned()
            .collect()
    }

    fn record(&self, call: PlatformCall) {
        lock(&self.calls).push(call);
    }

    fn allocate_id(&self) -> MessageId {
        MessageId(self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    fn check_channel(&self, channel: ChannelId) -> Result<(), PlatformError> {
        if lock(&self.missing_channels).contains(&channel) {
            return Err(PlatformError::not_found(format!("channel {channel}")));
        }
        Ok(())
    }

    fn check_roles(&self) -> Result<(), PlatformError> {
        if *lock(&self.fail_role_changes) {
            return Err(PlatformError::Forbidden("Manage Roles".to_string()));
        }
        Ok(())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl ChatPlatform for RecordingPlatform {
    async fn send_message(
        &self,
        channel: ChannelId,
        message: OutgoingMessage,
    ) -> Result<PostedMessage, PlatformError> {
        self.check_channel(channel)?;
        if *lock(&self.fail_sends) {
            return Err(PlatformError::Http("500 Internal Server Error".to_string()));
        }
        let id = self.allocate_id();
        let posted = PostedMessage {
            id,
            channel_id: channel,
            author_id: self.bot_id,
            url: format!("https://discord.com/channels/1/{channel}/{id}"),
            content: message.content.clone(),
            embeds: message.embeds.clone(),
        };
        lock(&self.messages).insert(id, posted.clone());
        self.record(PlatformCall::Send { channel, message, id });
        Ok(posted)
    }

    async fn edit_message(
        &self,
        channel: ChannelId,
        message: MessageId,
        edit: MessageEdit,
    ) -> Result<(), PlatformError> {
        self.record(PlatformCall::Edit {
            channel,
            message,
            edit: edit.clone(),
        });
        let mut messages = lock(&self.messages);
        let stored = messages
            .get_mut(&message)
            .ok_or_else(|| PlatformError::not_found(format!("message {message}")))?;
        if edit.content == ContentEdit::Clear {
            stored.content = None;
        }
        if let Some(embeds) = edit.embeds {
            stored.embeds = embeds;
        }
        Ok(())
    }

    async fn fetch_message(
        &self,
        channel: ChannelId,
        message: MessageId,
    ) -> Result<Option<PostedMessage>, PlatformError> {
        self.record(PlatformCall::Fetch { channel, message });
        Ok(lock(&self.messages)
            .get(&message)
            .filter(|m| m.channel_id == channel)
            .cloned())
    }

    async fn recent_messages(
        &self,
        channel: ChannelId,
        limit: u8,
    ) -> Result<Vec<PostedMessage>, PlatformError> {
        self.check_channel(channel)?;
        self.record(PlatformCall::Recent { channel });
        let mut found: Vec<PostedMessage> = lock(&self.messages)
            .values()
            .filter(|m| m.channel_id == channel)
            .cloned()
            .collect();
        found.sort_by(|a, b| b.id.cmp(&a.id));
        found.truncate(limit as usize);
        Ok(found)
    }

    async fn delete_message(
        &self,
        channel: ChannelId,
        message: MessageId,
    ) -> Result<(), PlatformError> {
        self.record(PlatformCall::Delete { channel, message });
        lock(&self.messages).remove(&message);
        Ok(())
    }

    async fn reply_to_message(
        &self,
        channel: ChannelId,
        message: MessageId,
        content: String,
    ) -> Result<PostedMessage, PlatformError> {
        let id = self.allocate_id();
        let posted = PostedMessage {
            id,
            channel_id: channel,
            author_id: self.bot_id,
            url: format!("https://discord.com/channels/1/{channel}/{id}"),
            content: Some(content.clone()),
            embeds: Vec::new(),
        };
        lock(&self.messages).insert(id, posted.clone());
        self.record(PlatformCall::Reply {
            channel,
            message,
            content,
            id,
        });
        Ok(posted)
    }

    async fn respond(
        &self,
        interaction: &InteractionHandle,
        response: InteractionResponse,
    ) -> Result<(), PlatformError> {
        if !lock(&self.acknowledged).insert(interaction.id) {
            return Err(PlatformError::AlreadyAcknowledged);
        }
        self.record(PlatformCall::Respond {
            interaction: interaction.id,
            response,
        });
        Ok(())
    }

    async fn follow_up(
        &self,
        interaction: &InteractionHandle,
        content: String,
    ) -> Result<(), PlatformError> {
        self.record(PlatformCall::FollowUp {
            interaction: interaction.id,
            content,
        });
        Ok(())
    }

    async fn set_member_roles(
        &self,
        guild: GuildId,
        user: UserId,
        roles: Vec<RoleId>,
    ) -> Result<(), PlatformError> {
        self.check_roles()?;
        self.record(PlatformCall::SetRoles { guild, user, roles });
        Ok(())
    }

    async fn add_member_roles(
        &self,
        guild: GuildId,
        user: UserId,
        roles: Vec<RoleId>,
    ) -> Result<(), PlatformError> {
        self.check_roles()?;
        self.record(PlatformCall::AddRoles { guild, user, roles });
        Ok(())
    }

    async fn remove_member_roles(
        &self,
        guild: GuildId,
        user: UserId,
        roles: Vec<RoleId>,
    ) -> Result<(), PlatformError> {
        self.check_roles()?;
        self.record(PlatformCall::RemoveRoles { guild, user, roles });
        Ok(())
    }

    async fn fetch_attachment(&self, attachment: &Attachment) -> Result<Vec<u8>, PlatformError> {
        self.record(PlatformCall::FetchAttachment {
            url: attachment.url.clone(),
        });
        lock(&self.attachments)
            .get(&attachment.url)
            .cloned()
            .ok_or_else(|| PlatformError::Http(format!("download of {} failed", attachment.url)))
    }

    fn bot_user_id(&self) -> Option<UserId> {
        Some(self.bot_id)
    }
}
