// Pieces shared by the three request workflows: dependencies, status rows,
// the decline flow and the evidence hand-off.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::WorkflowError;
use crate::audit::AuditDesk;
use crate::config::KadrovikConfig;
use crate::dispatch::GENERIC_FAILURE;
use crate::evidence::{Evidence, EvidenceOutcome, EvidenceSettings, MessageBus, PendingEvidence};
use crate::interaction::{Interaction, WorkflowKind};
use crate::platform::{
    ActionRow, Button, ButtonStyle, ChannelId, ChatPlatform, ContentEdit, InteractionHandle,
    InteractionResponse,
    MessageEdit, MessageId, ModalSpec, PlatformError, PostedMessage, TextInput, TextInputStyle,
    UserId,
};
use crate::registry::PendingRegistry;
use crate::validation::button_label;

pub const DATA_NOT_FOUND: &str = "Данные запроса не найдены.";
pub const MESSAGE_NOT_FOUND: &str = "Сообщение не найдено.";
pub const PASSPORT_DIGITS_ONLY: &str = "Номер паспорта (StaticID) должен содержать только цифры.";

/// Submissions outlive the evidence window by this much before the
/// registry drops them on its own
const SUBMISSION_TTL_MARGIN: Duration = Duration::from_secs(5);

/// Handles every workflow is built from
#[derive(Clone)]
pub struct WorkflowDeps {
    pub platform: Arc<dyn ChatPlatform>,
    pub config: Arc<KadrovikConfig>,
    pub audit: AuditDesk,
    pub bus: MessageBus,
    pub evidence: EvidenceSettings,
}

impl WorkflowDeps {
    pub fn new(platform: Arc<dyn ChatPlatform>, config: Arc<KadrovikConfig>, bus: MessageBus) -> Self {
        let audit = AuditDesk::new(Arc::clone(&platform), config.channels.clone());
        let evidence = config.evidence_settings();
        Self {
            platform,
            config,
            audit,
            bus,
            evidence,
        }
    }

    pub fn submission_registry<V>(&self, name: &'static str) -> PendingRegistry<UserId, V>
    where
        V: Clone + Send + Sync + 'static,
    {
        PendingRegistry::expiring(name, self.evidence.timeout + SUBMISSION_TTL_MARGIN)
    }
}

/// Approve / [flagged approve] / Decline buttons of a pending request
pub fn decision_row(kind: WorkflowKind, flagged: Option<Button>) -> ActionRow {
    let mut buttons = vec![Button::new(kind.custom_id("approve"), "Одобрить", ButtonStyle::Success)];
    buttons.extend(flagged);
    buttons.push(Button::new(kind.custom_id("decline"), "Отклонить", ButtonStyle::Danger));
    ActionRow(buttons)
}

pub fn checker_button(custom_id: String, approver: &str) -> Button {
    Button::new(
        custom_id,
        button_label(&format!("Проверил'а: {approver}")),
        ButtonStyle::Secondary,
    )
    .disabled()
}

pub fn approved_row(kind: WorkflowKind, approver: &str) -> ActionRow {
    ActionRow(vec![
        Button::new(kind.custom_id("done_approve"), "Одобрено", ButtonStyle::Success).disabled(),
        checker_button(kind.custom_id("checker"), approver),
    ])
}

pub fn declined_row(kind: WorkflowKind, reason: &str, approver: &str) -> ActionRow {
    ActionRow(vec![
        Button::new(kind.custom_id("done_decline"), "Отклонено", ButtonStyle::Danger).disabled(),
        Button::new(
            kind.custom_id("reason"),
            button_label(&format!("Причина: {reason}")),
            ButtonStyle::Secondary,
        )
        .disabled(),
        checker_button(kind.custom_id("checker_d"), approver),
    ])
}

pub fn decline_modal(kind: WorkflowKind, message_id: MessageId) -> ModalSpec {
    ModalSpec {
        custom_id: kind.decline_modal_id(message_id),
        title: "Причина отказа".to_string(),
        inputs: vec![TextInput::required(
            kind.custom_id("decline_reason"),
            "Причина отказа",
            TextInputStyle::Paragraph,
            500,
        )],
    }
}

/// Ephemeral denial; a failed reply is only logged
pub async fn deny(platform: &dyn ChatPlatform, interaction: &Interaction, text: &str) {
    debug!(user_id = %interaction.user.id, "Role gate denied interaction");
    if let Err(e) = interaction.reply_ephemeral(platform, text).await {
        warn!(user_id = %interaction.user.id, error = %e, "Failed to send denial");
    }
}

pub fn source_message(interaction: &Interaction) -> Result<&PostedMessage, WorkflowError> {
    interaction
        .message
        .as_ref()
        .ok_or(WorkflowError::MissingContext("message"))
}

pub fn required_field<'a>(
    interaction: &'a Interaction,
    kind: WorkflowKind,
    suffix: &'static str,
) -> Result<&'a str, WorkflowError> {
    interaction
        .field(&kind.custom_id(suffix))
        .ok_or(WorkflowError::MissingField(suffix))
}

/// Record of the approval message the interaction was pressed on.
/// Answers "data not found" itself when there is none.
pub async fn pending_approval<V>(
    platform: &dyn ChatPlatform,
    approvals: &PendingRegistry<MessageId, V>,
    interaction: &Interaction,
) -> Result<Option<(PostedMessage, V)>, WorkflowError>
where
    V: Clone + Send + Sync + 'static,
{
    let message = source_message(interaction)?;
    match approvals.get(&message.id).await {
        Some(record) => Ok(Some((message.clone(), record))),
        None => {
            info!(
                registry = approvals.name(),
                message_id = %message.id,
                "No pending approval for message"
            );
            interaction.reply_ephemeral(platform, DATA_NOT_FOUND).await?;
            Ok(None)
        }
    }
}

pub async fn open_decline_modal(
    platform: &dyn ChatPlatform,
    kind: WorkflowKind,
    interaction: &Interaction,
) -> Result<(), WorkflowError> {
    let message = source_message(interaction)?;
    interaction
        .respond(platform, InteractionResponse::Modal(decline_modal(kind, message.id)))
        .await?;
    Ok(())
}

/// Reason modal submitted: mark the request declined and drop its record
pub async fn complete_decline<V>(
    platform: &dyn ChatPlatform,
    approvals: &PendingRegistry<MessageId, V>,
    kind: WorkflowKind,
    message_id: MessageId,
    interaction: &Interaction,
    content: ContentEdit,
    confirmation: &str,
) -> Result<(), WorkflowError>
where
    V: Clone + Send + Sync + 'static,
{
    let reason = required_field(interaction, kind, "decline_reason")?.to_string();

    let Some(message) = fetch_or_none(platform, interaction.channel_id, message_id).await? else {
        interaction.reply_ephemeral(platform, MESSAGE_NOT_FOUND).await?;
        return Ok(());
    };

    approvals.delete(&message.id).await;

    let approver = interaction.display_name();
    let edit = MessageEdit::components(content, vec![declined_row(kind, &reason, &approver)]);
    platform.edit_message(message.channel_id, message.id, edit).await?;
    interaction.reply_ephemeral(platform, confirmation).await?;

    info!(
        workflow = %kind,
        message_id = %message.id,
        approver = %interaction.user.id,
        "Request declined"
    );
    Ok(())
}

/// A message that was deleted in the meantime is `None`, not an error
pub async fn fetch_or_none(
    platform: &dyn ChatPlatform,
    channel: ChannelId,
    message: MessageId,
) -> Result<Option<PostedMessage>, PlatformError> {
    match platform.fetch_message(channel, message).await {
        Ok(found) => Ok(found),
        Err(e) if e.is_not_found() => {
            debug!(channel_id = %channel, message_id = %message, "Message is gone");
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

/// Drive the evidence session in the background and hand collected evidence
/// to `on_collected`
pub fn spawn_evidence<V, F, Fut>(
    workflow: WorkflowKind,
    pending: PendingEvidence,
    submissions: PendingRegistry<UserId, V>,
    on_collected: F,
) where
    V: Clone + Send + Sync + 'static,
    F: FnOnce(V, Evidence) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        let user_id = pending.user_id();
        match pending.collect(&submissions).await {
            EvidenceOutcome::Collected { record, evidence } => on_collected(record, evidence).await,
            outcome => {
                debug!(
                    workflow = %workflow,
                    user_id = %user_id,
                    outcome = outcome.label(),
                    "Evidence session ended without a request"
                );
            }
        }
    });
}

/// Tell the submitter their collected evidence never became a request
pub async fn report_post_failure(platform: &dyn ChatPlatform, handle: &InteractionHandle) {
    if let Err(e) = platform.follow_up(handle, GENERIC_FAILURE.to_string()).await {
        warn!(interaction_id = handle.id, error = %e, "Failed to report request post failure");
    }
}

/// Best-effort removal of the submitter's evidence message
pub async fn delete_quietly(platform: &dyn ChatPlatform, channel: ChannelId, message: MessageId) {
    if let Err(e) = platform.delete_message(channel, message).await {
        debug!(channel_id = %channel, message_id = %message, error = %e, "Could not delete message");
    }
}
