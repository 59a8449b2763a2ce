// Resignation requests: form, two photos, approval clears the member's roles
// and files an uninvite audit.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{error, info, warn};

use super::common::{
    approved_row, checker_button, complete_decline, decision_row, delete_quietly, deny,
    open_decline_modal, pending_approval, report_post_failure, spawn_evidence, WorkflowDeps,
};
use super::{RequestWorkflow, SetupMessage, WorkflowError};
use crate::access::RoleGate;
use crate::audit::{uninvite_action, AuditDelivery, AuditKind, AuditRecord};
use crate::evidence::{Evidence, EvidenceCollector, EvidenceRequest};
use crate::interaction::{Interaction, Person, WorkflowAction, WorkflowKind};
use crate::platform::{
    ActionRow, Button, ButtonStyle, ChannelId, ContentEdit, Embed, EmbedField, GuildId,
    InteractionHandle, InteractionResponse, MessageEdit, MessageId, ModalSpec, OutgoingMessage, RoleId, TextInput,
    TextInputStyle, UserId, SETUP_EMBED_COLOR,
};
use crate::registry::PendingRegistry;
use crate::validation::is_valid_passport;

const KIND: WorkflowKind = WorkflowKind::Resignation;
const TITLE: &str = "Заявление на увольнение";
const REQUIRED_PHOTOS: usize = 2;

const SUBMIT_DENIED: &str = "Подавать рапорт на увольнение может только роль SANG.";
const APPROVE_DENIED: &str = "Одобрять рапорт на увольнение может только роль «Старший состав».";
const DECLINE_DENIED: &str = "Отклонять рапорт на увольнение может только роль «Старший состав».";
const WRONG_COUNT: &str =
    "Нужно прикрепить **ровно 2 фотографии**. Отправьте одно сообщение с двумя вложениями.";

/// Validated resignation form, waiting for its photos
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResignationForm {
    pub passport: String,
    pub department: String,
    pub reason: String,
    pub submitted_at: DateTime<Utc>,
}

impl ResignationForm {
    /// Check every field and list all problems at once
    pub fn parse(passport: &str, department: &str, reason: &str) -> Result<Self, Vec<&'static str>> {
        let (passport, department, reason) = (passport.trim(), department.trim(), reason.trim());
        let mut errors = Vec::new();
        if passport.is_empty() {
            errors.push("• **Номер паспорта (StaticID):** поле обязательно.");
        } else if !is_valid_passport(passport) {
            errors.push("• **Номер паспорта (StaticID):** допускаются только цифры.");
        }
        if department.is_empty() {
            errors.push("• **Отдел:** поле обязательно.");
        }
        if reason.is_empty() {
            errors.push("• **Причина увольнения:** поле обязательно.");
        }

        if !errors.is_empty() {
            return Err(errors);
        }
        Ok(Self {
            passport: passport.to_string(),
            department: department.to_string(),
            reason: reason.to_string(),
            submitted_at: Utc::now(),
        })
    }
}

pub fn form_errors_reply(errors: &[&str]) -> String {
    format!(
        "❌ **Ошибки в форме:**\n\n{}\n\nИсправьте поля и отправьте форму снова.",
        errors.join("\n")
    )
}

/// A posted resignation waiting for an approver
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResignationApproval {
    pub form: ResignationForm,
    pub submitter: Person,
    pub guild_id: Option<GuildId>,
}

pub struct ResignationWorkflow {
    deps: WorkflowDeps,
    channel: ChannelId,
    submit_gate: RoleGate,
    approve_gate: RoleGate,
    approver_mention: Option<RoleId>,
    collector: EvidenceCollector,
    submissions: PendingRegistry<UserId, ResignationForm>,
    approvals: PendingRegistry<MessageId, ResignationApproval>,
}

impl ResignationWorkflow {
    pub fn new(deps: WorkflowDeps) -> Self {
        let roles = &deps.config.roles;
        let approvers = roles.resignation_approve();
        let collector = EvidenceCollector::new(
            KIND.prefix(),
            Arc::clone(&deps.platform),
            deps.bus.clone(),
            deps.evidence,
        );
        Self {
            channel: deps.config.channels.resign(),
            submit_gate: RoleGate::new(roles.resignation_submit()),
            approver_mention: approvers.first().copied(),
            approve_gate: RoleGate::new(approvers),
            collector,
            submissions: deps.submission_registry("resign_submissions"),
            approvals: PendingRegistry::persistent("resign_approvals"),
            deps,
        }
    }

    pub fn approvals(&self) -> &PendingRegistry<MessageId, ResignationApproval> {
        &self.approvals
    }

    pub fn submissions(&self) -> &PendingRegistry<UserId, ResignationForm> {
        &self.submissions
    }

    fn form_modal() -> ModalSpec {
        ModalSpec {
            custom_id: KIND.custom_id("form_modal"),
            title: "Рапорт на увольнение".to_string(),
            inputs: vec![
                TextInput::required(
                    KIND.custom_id("passport"),
                    "Номер паспорта (StaticID), только цифры",
                    TextInputStyle::Short,
                    20,
                ),
                TextInput::required(KIND.custom_id("department"), "Отдел", TextInputStyle::Short, 100),
                TextInput::required(
                    KIND.custom_id("reason"),
                    "Причина увольнения",
                    TextInputStyle::Paragraph,
                    1000,
                ),
            ],
        }
    }

    async fn open_form(&self, interaction: &Interaction) -> Result<(), WorkflowError> {
        let platform = self.deps.platform.as_ref();
        if !self.submit_gate.permits(interaction.member.as_ref()) {
            deny(platform, interaction, SUBMIT_DENIED).await;
            return Ok(());
        }
        interaction
            .respond(platform, InteractionResponse::Modal(Self::form_modal()))
            .await?;
        Ok(())
    }

    async fn submit_form(&self, interaction: &Interaction) -> Result<(), WorkflowError> {
        let platform = self.deps.platform.as_ref();
        let field = |suffix: &str| interaction.field(&KIND.custom_id(suffix)).unwrap_or_default();

        let form = match ResignationForm::parse(field("passport"), field("department"), field("reason")) {
            Ok(form) => form,
            Err(errors) => {
                interaction
                    .reply_ephemeral(platform, form_errors_reply(&errors))
                    .await?;
                return Ok(());
            }
        };

        let user_id = interaction.user.id;
        self.submissions.put(user_id, form).await;
        let pending = self.collector.open(EvidenceRequest {
            channel_id: interaction.channel_id,
            user_id,
            required: REQUIRED_PHOTOS,
            file_stem: "photo",
            wrong_count_notice: WRONG_COUNT.to_string(),
        });

        let instructed = interaction
            .reply_ephemeral(
                platform,
                format!(
                    "Отправьте **ровно 2 фотографии** в этот канал одним сообщением в течение {} секунд.",
                    self.deps.evidence.timeout.as_secs()
                ),
            )
            .await;
        if let Err(e) = instructed {
            self.submissions.delete(&user_id).await;
            return Err(e.into());
        }
        info!(workflow = %KIND, user_id = %user_id, "Resignation form accepted, awaiting photos");

        let poster = ApprovalPoster {
            deps: self.deps.clone(),
            approvals: self.approvals.clone(),
            approver_mention: self.approver_mention,
            submitter: interaction.person(),
            guild_id: interaction.guild_id,
            handle: interaction.handle.clone(),
        };
        spawn_evidence(KIND, pending, self.submissions.clone(), move |form, evidence| async move {
            poster.post(form, evidence).await;
        });
        Ok(())
    }

    async fn approve(&self, interaction: &Interaction, blacklist: bool) -> Result<(), WorkflowError> {
        let platform = self.deps.platform.as_ref();
        if !self.approve_gate.permits(interaction.member.as_ref()) {
            deny(platform, interaction, APPROVE_DENIED).await;
            return Ok(());
        }
        let Some((message, record)) = pending_approval(platform, &self.approvals, interaction).await? else {
            return Ok(());
        };

        let submitter = record.submitter.id;
        match record.guild_id {
            Some(guild) => {
                if let Err(e) = platform.set_member_roles(guild, submitter, Vec::new()).await {
                    error!(
                        workflow = %KIND,
                        user_id = %submitter,
                        error = %e,
                        "Failed to clear roles of resigning member"
                    );
                }
            }
            None => warn!(workflow = %KIND, user_id = %submitter, "Resignation has no guild, roles left as they are"),
        }

        let audit = AuditRecord {
            kind: AuditKind::Uninvite,
            author: interaction.person(),
            employee: record.submitter.clone(),
            passport: record.form.passport.clone(),
            action: uninvite_action(blacklist).to_string(),
            reason: message.url.clone(),
        };
        match self.deps.audit.submit(&audit).await {
            Ok(AuditDelivery::Posted(_)) => {}
            Ok(delivery) => warn!(workflow = %KIND, ?delivery, "Uninvite audit was not posted"),
            Err(e) => error!(workflow = %KIND, error = %e, "Failed to post uninvite audit"),
        }

        self.approvals.delete(&message.id).await;

        let approver = interaction.display_name();
        let row = if blacklist {
            ActionRow(vec![
                Button::new(KIND.custom_id("done_blacklist"), "Одобрено с ЧС", ButtonStyle::Primary)
                    .disabled(),
                checker_button(KIND.custom_id("checker_bl"), &approver),
            ])
        } else {
            approved_row(KIND, &approver)
        };
        interaction
            .respond(
                platform,
                InteractionResponse::UpdateMessage(MessageEdit::components(ContentEdit::Keep, vec![row])),
            )
            .await?;

        info!(
            workflow = %KIND,
            message_id = %message.id,
            user_id = %submitter,
            approver = %interaction.user.id,
            blacklist,
            "Resignation approved"
        );
        Ok(())
    }

    async fn decline(&self, interaction: &Interaction, submitted: Option<MessageId>) -> Result<(), WorkflowError> {
        let platform = self.deps.platform.as_ref();
        if !self.approve_gate.permits(interaction.member.as_ref()) {
            deny(platform, interaction, DECLINE_DENIED).await;
            return Ok(());
        }
        match submitted {
            None => open_decline_modal(platform, KIND, interaction).await,
            Some(message_id) => {
                complete_decline(
                    platform,
                    &self.approvals,
                    KIND,
                    message_id,
                    interaction,
                    ContentEdit::Clear,
                    "Заявление отклонено.",
                )
                .await
            }
        }
    }
}

/// Turns collected photos into the approval request post
struct ApprovalPoster {
    deps: WorkflowDeps,
    approvals: PendingRegistry<MessageId, ResignationApproval>,
    approver_mention: Option<RoleId>,
    submitter: Person,
    guild_id: Option<GuildId>,
    /// The form submission, answered again if posting fails
    handle: InteractionHandle,
}

impl ApprovalPoster {
    fn embed(&self, form: &ResignationForm) -> Embed {
        Embed::new(TITLE)
            .color(SETUP_EMBED_COLOR)
            .field(EmbedField::bullet("**Заполнил'а**", self.submitter.labelled()))
            .field(EmbedField::bullet("**Номер паспорта (StaticID)**", &form.passport))
            .field(EmbedField::bullet("**Отдел**", &form.department))
            .field(EmbedField::bullet("**Причина увольнения**", &form.reason))
            .timestamp_now()
    }

    async fn post(self, form: ResignationForm, evidence: Evidence) {
        let platform = self.deps.platform.as_ref();
        let flagged = Button::new(
            KIND.custom_id("approve_blacklist"),
            "Одобрить с занесением в ЧС",
            ButtonStyle::Primary,
        );
        let message = OutgoingMessage {
            content: self.approver_mention.map(RoleId::mention),
            embeds: vec![self.embed(&form)],
            files: evidence.files,
            components: vec![decision_row(KIND, Some(flagged))],
        };

        let posted = match platform.send_message(evidence.channel_id, message).await {
            Ok(posted) => posted,
            Err(e) => {
                error!(
                    workflow = %KIND,
                    user_id = %self.submitter.id,
                    error = %e,
                    "Failed to post resignation request"
                );
                report_post_failure(platform, &self.handle).await;
                return;
            }
        };

        self.approvals
            .put(
                posted.id,
                ResignationApproval {
                    form,
                    submitter: self.submitter.clone(),
                    guild_id: self.guild_id,
                },
            )
            .await;
        info!(
            workflow = %KIND,
            user_id = %self.submitter.id,
            message_id = %posted.id,
            "Resignation request posted"
        );

        delete_quietly(platform, evidence.channel_id, evidence.source_message).await;
    }
}

#[async_trait]
impl RequestWorkflow for ResignationWorkflow {
    fn kind(&self) -> WorkflowKind {
        KIND
    }

    fn channel_id(&self) -> ChannelId {
        self.channel
    }

    fn setup_message(&self) -> SetupMessage {
        SetupMessage {
            title: TITLE,
            description: "Чтобы подать заявление на увольнение, вам нужно нажать кнопку ниже и заполнить анкету!",
            button_id: KIND.custom_id("open_form"),
            button_label: "Подать заявление на увольнение",
        }
    }

    async fn handle(&self, action: WorkflowAction, interaction: &Interaction) -> Result<(), WorkflowError> {
        match action {
            WorkflowAction::OpenForm => self.open_form(interaction).await,
            WorkflowAction::SubmitForm => self.submit_form(interaction).await,
            WorkflowAction::Approve => self.approve(interaction, false).await,
            WorkflowAction::ApproveFlagged => self.approve(interaction, true).await,
            WorkflowAction::Decline => self.decline(interaction, None).await,
            WorkflowAction::DeclineSubmit { message_id } => self.decline(interaction, Some(message_id)).await,
            WorkflowAction::SendAudit => Ok(()),
        }
    }
}
