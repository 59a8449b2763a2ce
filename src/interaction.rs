// Inbound interactions and their routing
//
// Buttons and modals carry fixed custom identifiers of the form
// `<prefix>_<action>`; later handlers depend on these strings round-tripping
// exactly, so the router is driven by a single lookup table.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};

use crate::platform::{
    ChannelId, ChatPlatform, GuildId, InteractionHandle, InteractionResponse, MessageId,
    PlatformError, PostedMessage, RoleId, UserId,
};

/// A user as shown in embeds: mention plus display name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Person {
    pub id: UserId,
    pub display_name: String,
}

impl Person {
    pub fn new(id: UserId, display_name: impl Into<String>) -> Self {
        Self {
            id,
            display_name: display_name.into(),
        }
    }

    pub fn mention(&self) -> String {
        self.id.mention()
    }

    /// `<@id> | name`, the "filled by" / "employee" field value
    pub fn labelled(&self) -> String {
        format!("{} | {}", self.id.mention(), self.display_name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: UserId,
    pub username: String,
}

/// Guild membership of a user, when the platform resolved it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Member {
    pub user_id: UserId,
    pub display_name: Option<String>,
    pub role_ids: HashSet<RoleId>,
}

impl Member {
    pub fn new(user_id: UserId, role_ids: impl IntoIterator<Item = RoleId>) -> Self {
        Self {
            user_id,
            display_name: None,
            role_ids: role_ids.into_iter().collect(),
        }
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    pub fn has_any_role(&self, allowed: &HashSet<RoleId>) -> bool {
        !self.role_ids.is_disjoint(allowed)
    }
}

/// A user picked in a command option
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedUser {
    pub user: User,
    pub member: Option<Member>,
}

impl ResolvedUser {
    pub fn person(&self) -> Person {
        let name = self
            .member
            .as_ref()
            .and_then(|m| m.display_name.clone())
            .unwrap_or_else(|| self.user.username.clone());
        Person::new(self.user.id, name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OptionValue {
    String(String),
    Integer(i64),
    User(ResolvedUser),
    Role(RoleId),
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CommandInvocation {
    pub name: String,
    pub options: HashMap<String, OptionValue>,
}

impl CommandInvocation {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            options: HashMap::new(),
        }
    }

    pub fn option(mut self, name: impl Into<String>, value: OptionValue) -> Self {
        self.options.insert(name.into(), value);
        self
    }

    pub fn string(&self, name: &str) -> Option<&str> {
        match self.options.get(name) {
            Some(OptionValue::String(value)) => Some(value.as_str()),
            _ => None,
        }
    }

    pub fn integer(&self, name: &str) -> Option<i64> {
        match self.options.get(name) {
            Some(OptionValue::Integer(value)) => Some(*value),
            _ => None,
        }
    }

    pub fn user(&self, name: &str) -> Option<&ResolvedUser> {
        match self.options.get(name) {
            Some(OptionValue::User(user)) => Some(user),
            _ => None,
        }
    }

    pub fn role(&self, name: &str) -> Option<RoleId> {
        match self.options.get(name) {
            Some(OptionValue::Role(role)) => Some(*role),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InteractionKind {
    Button {
        custom_id: String,
    },
    ModalSubmit {
        custom_id: String,
        fields: HashMap<String, String>,
    },
    Command(CommandInvocation),
}

/// One inbound interaction, normalized away from the platform SDK
#[derive(Debug)]
pub struct Interaction {
    pub handle: InteractionHandle,
    pub kind: InteractionKind,
    pub guild_id: Option<GuildId>,
    pub channel_id: ChannelId,
    pub user: User,
    pub member: Option<Member>,
    /// The message a component was attached to
    pub message: Option<PostedMessage>,
    acknowledged: AtomicBool,
}

impl Interaction {
    pub fn new(id: u64, kind: InteractionKind, channel_id: ChannelId, user: User) -> Self {
        Self {
            handle: InteractionHandle {
                id,
                token: format!("token-{id}"),
            },
            kind,
            guild_id: None,
            channel_id,
            user,
            member: None,
            message: None,
            acknowledged: AtomicBool::new(false),
        }
    }

    pub fn button(id: u64, custom_id: impl Into<String>, channel_id: ChannelId, user: User) -> Self {
        Self::new(
            id,
            InteractionKind::Button {
                custom_id: custom_id.into(),
            },
            channel_id,
            user,
        )
    }

    pub fn modal_submit<I, K, V>(
        id: u64,
        custom_id: impl Into<String>,
        fields: I,
        channel_id: ChannelId,
        user: User,
    ) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self::new(
            id,
            InteractionKind::ModalSubmit {
                custom_id: custom_id.into(),
                fields: fields
                    .into_iter()
                    .map(|(k, v)| (k.into(), v.into()))
                    .collect(),
            },
            channel_id,
            user,
        )
    }

    pub fn command(id: u64, invocation: CommandInvocation, channel_id: ChannelId, user: User) -> Self {
        Self::new(id, InteractionKind::Command(invocation), channel_id, user)
    }

    pub fn with_handle(mut self, handle: InteractionHandle) -> Self {
        self.handle = handle;
        self
    }

    pub fn in_guild(mut self, guild_id: GuildId) -> Self {
        self.guild_id = Some(guild_id);
        self
    }

    pub fn with_member(mut self, member: Member) -> Self {
        self.member = Some(member);
        self
    }

    pub fn on_message(mut self, message: PostedMessage) -> Self {
        self.message = Some(message);
        self
    }

    pub fn custom_id(&self) -> Option<&str> {
        match &self.kind {
            InteractionKind::Button { custom_id } => Some(custom_id),
            InteractionKind::ModalSubmit { custom_id, .. } => Some(custom_id),
            InteractionKind::Command(_) => None,
        }
    }

    /// Submitted modal value, surrounding whitespace trimmed
    pub fn field(&self, id: &str) -> Option<&str> {
        match &self.kind {
            InteractionKind::ModalSubmit { fields, .. } => fields.get(id).map(|v| v.trim()),
            _ => None,
        }
    }

    pub fn display_name(&self) -> String {
        self.member
            .as_ref()
            .and_then(|m| m.display_name.clone())
            .unwrap_or_else(|| self.user.username.clone())
    }

    pub fn person(&self) -> Person {
        Person::new(self.user.id, self.display_name())
    }

    pub fn is_acknowledged(&self) -> bool {
        self.acknowledged.load(Ordering::SeqCst)
    }

    pub async fn respond(
        &self,
        platform: &dyn ChatPlatform,
        response: InteractionResponse,
    ) -> Result<(), PlatformError> {
        platform.respond(&self.handle, response).await?;
        self.acknowledged.store(true, Ordering::SeqCst);
        Ok(())
    }

    pub async fn reply_ephemeral(
        &self,
        platform: &dyn ChatPlatform,
        content: impl Into<String>,
    ) -> Result<(), PlatformError> {
        self.respond(platform, InteractionResponse::ephemeral(content))
            .await
    }

    /// Ephemeral reply, or a follow-up once the interaction was answered
    pub async fn reply_or_follow_up(
        &self,
        platform: &dyn ChatPlatform,
        content: impl Into<String>,
    ) -> Result<(), PlatformError> {
        if self.is_acknowledged() {
            platform.follow_up(&self.handle, content.into()).await
        } else {
            self.reply_ephemeral(platform, content).await
        }
    }
}

/// The three request lifecycles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkflowKind {
    Resignation,
    Promotion,
    UprankRequest,
}

impl WorkflowKind {
    pub const ALL: [WorkflowKind; 3] = [
        WorkflowKind::Resignation,
        WorkflowKind::Promotion,
        WorkflowKind::UprankRequest,
    ];

    /// Custom identifier prefix of every component the workflow renders
    pub fn prefix(self) -> &'static str {
        match self {
            WorkflowKind::Resignation => "resign",
            WorkflowKind::Promotion => "promotion",
            WorkflowKind::UprankRequest => "uprank_req",
        }
    }

    pub fn custom_id(self, suffix: &str) -> String {
        format!("{}_{}", self.prefix(), suffix)
    }

    pub fn decline_modal_id(self, message_id: MessageId) -> String {
        format!("{}_decline_modal_{}", self.prefix(), message_id)
    }
}

impl std::fmt::Display for WorkflowKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.prefix())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkflowAction {
    OpenForm,
    SubmitForm,
    Approve,
    /// Approval that also records a blacklist entry
    ApproveFlagged,
    SendAudit,
    Decline,
    DeclineSubmit { message_id: MessageId },
}

impl WorkflowAction {
    pub fn name(self) -> &'static str {
        match self {
            WorkflowAction::OpenForm => "open_form",
            WorkflowAction::SubmitForm => "submit_form",
            WorkflowAction::Approve => "approve",
            WorkflowAction::ApproveFlagged => "approve_flagged",
            WorkflowAction::SendAudit => "send_audit",
            WorkflowAction::Decline => "decline",
            WorkflowAction::DeclineSubmit { .. } => "decline_submit",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    Workflow(WorkflowKind, WorkflowAction),
    Command(String),
    Ignored,
}

const BUTTON_ROUTES: &[(WorkflowKind, &str, WorkflowAction)] = &[
    (WorkflowKind::Resignation, "open_form", WorkflowAction::OpenForm),
    (WorkflowKind::Resignation, "approve", WorkflowAction::Approve),
    (WorkflowKind::Resignation, "approve_blacklist", WorkflowAction::ApproveFlagged),
    (WorkflowKind::Resignation, "decline", WorkflowAction::Decline),
    (WorkflowKind::Promotion, "open_form", WorkflowAction::OpenForm),
    (WorkflowKind::Promotion, "approve", WorkflowAction::Approve),
    (WorkflowKind::Promotion, "decline", WorkflowAction::Decline),
    (WorkflowKind::UprankRequest, "open_form", WorkflowAction::OpenForm),
    (WorkflowKind::UprankRequest, "approve", WorkflowAction::Approve),
    (WorkflowKind::UprankRequest, "send_audit", WorkflowAction::SendAudit),
    (WorkflowKind::UprankRequest, "decline", WorkflowAction::Decline),
];

const FORM_MODAL: &str = "form_modal";
const DECLINE_MODAL: &str = "decline_modal_";

impl Route {
    pub fn classify(kind: &InteractionKind) -> Route {
        match kind {
            InteractionKind::Button { custom_id } => classify_button(custom_id),
            InteractionKind::ModalSubmit { custom_id, .. } => classify_modal(custom_id),
            InteractionKind::Command(invocation) => Route::Command(invocation.name.clone()),
        }
    }
}

fn split_prefix(custom_id: &str) -> Option<(WorkflowKind, &str)> {
    WorkflowKind::ALL.into_iter().find_map(|kind| {
        custom_id
            .strip_prefix(kind.prefix())
            .and_then(|rest| rest.strip_prefix('_'))
            .map(|rest| (kind, rest))
    })
}

fn classify_button(custom_id: &str) -> Route {
    let Some((kind, suffix)) = split_prefix(custom_id) else {
        return Route::Ignored;
    };
    BUTTON_ROUTES
        .iter()
        .find(|(k, s, _)| *k == kind && *s == suffix)
        .map(|(k, _, action)| Route::Workflow(*k, *action))
        .unwrap_or(Route::Ignored)
}

fn classify_modal(custom_id: &str) -> Route {
    let Some((kind, suffix)) = split_prefix(custom_id) else {
        return Route::Ignored;
    };
    if suffix == FORM_MODAL {
        return Route::Workflow(kind, WorkflowAction::SubmitForm);
    }
    match suffix
        .strip_prefix(DECLINE_MODAL)
        .and_then(|id| id.parse::<MessageId>().ok())
    {
        Some(message_id) => Route::Workflow(kind, WorkflowAction::DeclineSubmit { message_id }),
        None => Route::Ignored,
    }
}
