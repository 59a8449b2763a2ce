//! Shared setup for the end-to-end workflow tests
//!
//! Everything runs against the in-memory `RecordingPlatform`; no network.

#![allow(dead_code)]

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use kadrovik::config::{ChannelsConfig, KadrovikConfig, RolesConfig};
use kadrovik::interaction::{Member, User};
use kadrovik::platform::mocks::RecordingPlatform;
use kadrovik::platform::{
    Attachment, ChannelId, GuildId, IncomingMessage, MessageId, PostedMessage, RoleId, UserId,
};
use kadrovik::{Dispatcher, Interaction};

pub const GUILD: GuildId = GuildId(1);

pub const RESIGN: ChannelId = ChannelId(10);
pub const PROMOTION: ChannelId = ChannelId(11);
pub const UPRANK_REQUEST: ChannelId = ChannelId(12);

pub const INVITE_AUDIT: ChannelId = ChannelId(71);
pub const UNINVITE_AUDIT: ChannelId = ChannelId(72);
pub const UPRANK_AUDIT: ChannelId = ChannelId(73);
pub const TRANSFER_AUDIT: ChannelId = ChannelId(75);

pub const INVITE_ROLE: RoleId = RoleId(40);

pub fn config() -> KadrovikConfig {
    KadrovikConfig {
        channels: ChannelsConfig {
            resign: Some(RESIGN),
            promotion: Some(PROMOTION),
            uprank_request: Some(UPRANK_REQUEST),
            invite: Some(INVITE_AUDIT),
            uninvite: Some(UNINVITE_AUDIT),
            uprank: Some(UPRANK_AUDIT),
            transfer: Some(TRANSFER_AUDIT),
            ..Default::default()
        },
        roles: RolesConfig {
            invite_roles: vec![INVITE_ROLE],
            ..Default::default()
        },
        ..Default::default()
    }
}

/// A dispatcher wired to a fresh recording platform
pub struct Harness {
    pub platform: Arc<RecordingPlatform>,
    pub dispatcher: Dispatcher,
    next_interaction: AtomicU64,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(config())
    }

    pub fn with_config(config: KadrovikConfig) -> Self {
        let platform = Arc::new(RecordingPlatform::new());
        let dispatcher = Dispatcher::new(platform.clone(), Arc::new(config));
        Self {
            platform,
            dispatcher,
            next_interaction: AtomicU64::new(1),
        }
    }

    /// Every interaction needs its own id, the platform refuses a second answer
    pub fn next_id(&self) -> u64 {
        self.next_interaction.fetch_add(1, Ordering::SeqCst)
    }

    pub async fn press(&self, custom_id: &str, channel: ChannelId, member: &Member, on: Option<&PostedMessage>) {
        let mut interaction = Interaction::button(self.next_id(), custom_id, channel, user_of(member))
            .in_guild(GUILD)
            .with_member(member.clone());
        if let Some(message) = on {
            interaction = interaction.on_message(message.clone());
        }
        self.dispatcher.handle_interaction(interaction).await;
    }

    pub async fn submit(&self, custom_id: &str, fields: &[(&str, &str)], channel: ChannelId, member: &Member) {
        let interaction = Interaction::modal_submit(
            self.next_id(),
            custom_id,
            fields.iter().copied(),
            channel,
            user_of(member),
        )
        .in_guild(GUILD)
        .with_member(member.clone());
        self.dispatcher.handle_interaction(interaction).await;
    }

    /// Post a message carrying `count` downloadable attachments
    pub fn post_attachments(&self, id: u64, channel: ChannelId, author: UserId, count: usize) -> usize {
        let attachments: Vec<Attachment> = (0..count)
            .map(|i| Attachment {
                url: format!("https://cdn.test/{id}/{i}.png"),
                filename: format!("{i}.png"),
            })
            .collect();
        for attachment in &attachments {
            self.platform.set_attachment(&attachment.url, vec![0x89, 0x50, 0x4e, 0x47]);
        }
        self.dispatcher.handle_message(IncomingMessage {
            id: MessageId(id),
            channel_id: channel,
            author_id: author,
            attachments,
        })
    }

    pub fn last_text(&self) -> Option<String> {
        self.platform.ephemeral_texts().last().cloned()
    }

    /// The message most recently posted to `channel`
    pub fn last_post(&self, channel: ChannelId) -> Option<PostedMessage> {
        let sent = self.platform.sent_to(channel);
        sent.last().and_then(|(id, _)| self.platform.message(*id))
    }
}

pub fn user_of(member: &Member) -> User {
    User {
        id: member.user_id,
        username: format!("user{}", member.user_id),
    }
}

pub fn member(id: u64, name: &str, roles: &[RoleId]) -> Member {
    Member::new(UserId(id), roles.iter().copied()).with_display_name(name)
}

/// Let spawned evidence tasks run
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(10)).await;
}
