// Uprank requests backed by three in-game screenshots.
//
// Approval and the audit are two separate steps: approving only reveals the
// "send audit" button, and the record stays pending until the audit is out.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{error, info, warn};

use super::common::{
    approved_row, complete_decline, decision_row, delete_quietly, deny, open_decline_modal,
    pending_approval, report_post_failure, spawn_evidence, WorkflowDeps, PASSPORT_DIGITS_ONLY,
};
use super::{RequestWorkflow, SetupMessage, WorkflowError};
use crate::access::RoleGate;
use crate::audit::{uprank_action, AuditDelivery, AuditKind, AuditRecord};
use crate::evidence::{Evidence, EvidenceCollector, EvidenceRequest};
use crate::interaction::{Interaction, Person, WorkflowAction, WorkflowKind};
use crate::platform::{
    ActionRow, Button, ButtonStyle, ChannelId, ContentEdit, Embed, EmbedField, InteractionHandle,
    InteractionResponse, MessageEdit, MessageId, ModalSpec, OutgoingMessage, TextInput,
    TextInputStyle, UserId, EMBED_COLOR,
};
use crate::registry::PendingRegistry;
use crate::validation::is_valid_passport;

const KIND: WorkflowKind = WorkflowKind::UprankRequest;
const REQUIRED_PROOFS: usize = 3;

const SUBMIT_DENIED: &str = "Подавать запрос на повышение может только участник с соответствующей ролью.";
const APPROVE_DENIED: &str = "Одобрять запрос может только роль «Генерал-лейтенант».";
const AUDIT_DENIED: &str = "Отправлять кадровый аудит может только роль «Генерал-лейтенант».";
const DECLINE_DENIED: &str = "Отклонять запрос может только роль «Генерал-лейтенант».";
const WRONG_COUNT: &str =
    "Нужно прикрепить **ровно 3 скриншота**. Отправьте одно сообщение с тремя вложениями.";
const AUDIT_NOT_CONFIGURED: &str = "Канал для кадрового аудита (uprank) не настроен.";
const AUDIT_UNAVAILABLE: &str = "Не удалось найти канал аудита.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UprankRequestForm {
    pub passport: String,
    pub current_rank: String,
    pub new_rank: String,
    pub submitted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UprankRequestApproval {
    pub form: UprankRequestForm,
    pub submitter: Person,
}

fn send_audit_row() -> ActionRow {
    ActionRow(vec![Button::new(
        KIND.custom_id("send_audit"),
        "Отправить кадровый аудит",
        ButtonStyle::Primary,
    )])
}

fn audit_sent_row() -> ActionRow {
    ActionRow(vec![Button::new(
        KIND.custom_id("audit_sent"),
        "Кадровый аудит отправлен",
        ButtonStyle::Secondary,
    )
    .disabled()])
}

pub struct UprankRequestWorkflow {
    deps: WorkflowDeps,
    channel: ChannelId,
    submit_gate: RoleGate,
    approve_gate: RoleGate,
    collector: EvidenceCollector,
    submissions: PendingRegistry<UserId, UprankRequestForm>,
    approvals: PendingRegistry<MessageId, UprankRequestApproval>,
}

impl UprankRequestWorkflow {
    pub fn new(deps: WorkflowDeps) -> Self {
        let roles = &deps.config.roles;
        let collector = EvidenceCollector::new(
            KIND.prefix(),
            Arc::clone(&deps.platform),
            deps.bus.clone(),
            deps.evidence,
        );
        Self {
            channel: deps.config.channels.uprank_request(),
            submit_gate: RoleGate::new(roles.uprank_request_submit()),
            approve_gate: RoleGate::new(roles.uprank_request_approve()),
            collector,
            submissions: deps.submission_registry("uprank_req_submissions"),
            approvals: PendingRegistry::persistent("uprank_req_approvals"),
            deps,
        }
    }

    pub fn submissions(&self) -> &PendingRegistry<UserId, UprankRequestForm> {
        &self.submissions
    }

    pub fn approvals(&self) -> &PendingRegistry<MessageId, UprankRequestApproval> {
        &self.approvals
    }

    fn form_modal() -> ModalSpec {
        ModalSpec {
            custom_id: KIND.custom_id("form_modal"),
            title: "Запрос на повышение".to_string(),
            inputs: vec![
                TextInput::required(
                    KIND.custom_id("passport"),
                    "Номер паспорта (StaticID), только цифры",
                    TextInputStyle::Short,
                    20,
                ),
                TextInput::required(
                    KIND.custom_id("current_rank"),
                    "Текущий ранг (цифра)",
                    TextInputStyle::Short,
                    5,
                ),
                TextInput::required(
                    KIND.custom_id("new_rank"),
                    "На какой ранг повыситься (цифра)",
                    TextInputStyle::Short,
                    5,
                ),
            ],
        }
    }

    fn gate(&self, interaction: &Interaction) -> bool {
        self.approve_gate.permits(interaction.member.as_ref())
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
        let field = |suffix: &str| {
            interaction
                .field(&KIND.custom_id(suffix))
                .unwrap_or_default()
                .to_string()
        };

        let passport = field("passport");
        if !is_valid_passport(&passport) {
            interaction.reply_ephemeral(platform, PASSPORT_DIGITS_ONLY).await?;
            return Ok(());
        }
        let form = UprankRequestForm {
            passport,
            current_rank: field("current_rank"),
            new_rank: field("new_rank"),
            submitted_at: Utc::now(),
        };

        let user_id = interaction.user.id;
        self.submissions.put(user_id, form).await;
        let pending = self.collector.open(EvidenceRequest {
            channel_id: interaction.channel_id,
            user_id,
            required: REQUIRED_PROOFS,
            file_stem: "proof",
            wrong_count_notice: WRONG_COUNT.to_string(),
        });

        let instructed = interaction
            .reply_ephemeral(
                platform,
                format!(
                    "Отправьте **ровно 3 скриншота из игры** в этот канал одним сообщением в течение {} секунд.",
                    self.deps.evidence.timeout.as_secs()
                ),
            )
            .await;
        if let Err(e) = instructed {
            self.submissions.delete(&user_id).await;
            return Err(e.into());
        }
        info!(workflow = %KIND, user_id = %user_id, "Uprank request accepted, awaiting screenshots");

        let deps = self.deps.clone();
        let approvals = self.approvals.clone();
        let submitter = interaction.person();
        let handle = interaction.handle.clone();
        spawn_evidence(KIND, pending, self.submissions.clone(), move |form, evidence| async move {
            post_request(deps, approvals, submitter, handle, form, evidence).await;
        });
        Ok(())
    }

    async fn approve(&self, interaction: &Interaction) -> Result<(), WorkflowError> {
        let platform = self.deps.platform.as_ref();
        if !self.gate(interaction) {
            deny(platform, interaction, APPROVE_DENIED).await;
            return Ok(());
        }
        let Some((message, _)) = pending_approval(platform, &self.approvals, interaction).await? else {
            return Ok(());
        };

        let rows = vec![approved_row(KIND, &interaction.display_name()), send_audit_row()];
        interaction
            .respond(
                platform,
                InteractionResponse::UpdateMessage(MessageEdit::components(ContentEdit::Keep, rows)),
            )
            .await?;
        info!(
            workflow = %KIND,
            message_id = %message.id,
            approver = %interaction.user.id,
            "Uprank request approved, audit pending"
        );
        Ok(())
    }

    async fn send_audit(&self, interaction: &Interaction) -> Result<(), WorkflowError> {
        let platform = self.deps.platform.as_ref();
        if !self.gate(interaction) {
            deny(platform, interaction, AUDIT_DENIED).await;
            return Ok(());
        }
        let Some((message, record)) = pending_approval(platform, &self.approvals, interaction).await? else {
            return Ok(());
        };

        let audit = AuditRecord {
            kind: AuditKind::Uprank,
            author: interaction.person(),
            employee: record.submitter.clone(),
            passport: record.form.passport.clone(),
            action: uprank_action(&record.form.new_rank),
            reason: format!("Запрос на повышение одобрен: {}", message.url),
        };
        let notice = match self.deps.audit.submit(&audit).await? {
            AuditDelivery::Posted(_) => None,
            AuditDelivery::NotConfigured => Some(AUDIT_NOT_CONFIGURED),
            AuditDelivery::ChannelUnavailable => Some(AUDIT_UNAVAILABLE),
        };
        if let Some(notice) = notice {
            warn!(workflow = %KIND, message_id = %message.id, notice, "Uprank audit not sent, request kept");
            interaction.reply_ephemeral(platform, notice).await?;
            return Ok(());
        }

        self.approvals.delete(&message.id).await;

        let rows = vec![approved_row(KIND, &interaction.display_name()), audit_sent_row()];
        interaction
            .respond(
                platform,
                InteractionResponse::UpdateMessage(MessageEdit::components(ContentEdit::Keep, rows)),
            )
            .await?;
        info!(
            workflow = %KIND,
            message_id = %message.id,
            user_id = %record.submitter.id,
            "Uprank audit sent"
        );
        Ok(())
    }

    async fn decline(&self, interaction: &Interaction, submitted: Option<MessageId>) -> Result<(), WorkflowError> {
        let platform = self.deps.platform.as_ref();
        if !self.gate(interaction) {
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
                    ContentEdit::Keep,
                    "Запрос отклонён.",
                )
                .await
            }
        }
    }
}

async fn post_request(
    deps: WorkflowDeps,
    approvals: PendingRegistry<MessageId, UprankRequestApproval>,
    submitter: Person,
    handle: InteractionHandle,
    form: UprankRequestForm,
    evidence: Evidence,
) {
    let platform = deps.platform.as_ref();
    let embed = Embed::new("📁 Запрос на повышение")
        .color(EMBED_COLOR)
        .field(EmbedField::bullet("**Заполнил'а**", submitter.labelled()))
        .field(EmbedField::bullet("**Номер паспорта (StaticID)**", &form.passport))
        .field(EmbedField::bullet("**Текущий ранг**", &form.current_rank))
        .field(EmbedField::bullet("**Новый ранг**", &form.new_rank))
        .field(EmbedField::bullet("**Доказательства**", "3 скриншота из игры (вложения ниже)"))
        .timestamp_now();
    let message = OutgoingMessage {
        content: None,
        embeds: vec![embed],
        files: evidence.files,
        components: vec![decision_row(KIND, None)],
    };

    let posted = match platform.send_message(evidence.channel_id, message).await {
        Ok(posted) => posted,
        Err(e) => {
            error!(workflow = %KIND, user_id = %submitter.id, error = %e, "Failed to post uprank request");
            report_post_failure(platform, &handle).await;
            return;
        }
    };
    info!(workflow = %KIND, user_id = %submitter.id, message_id = %posted.id, "Uprank request posted");
    approvals.put(posted.id, UprankRequestApproval { form, submitter }).await;

    delete_quietly(platform, evidence.channel_id, evidence.source_message).await;
}

#[async_trait]
impl RequestWorkflow for UprankRequestWorkflow {
    fn kind(&self) -> WorkflowKind {
        KIND
    }

    fn channel_id(&self) -> ChannelId {
        self.channel
    }

    fn setup_message(&self) -> SetupMessage {
        SetupMessage {
            title: "Запрос на повышение (со скриншотами)",
            description: "Чтобы подать запрос на повышение с доказательствами работы, вам нужно нажать кнопку ниже, заполнить анкету и отправить 3 скриншота из игры!",
            button_id: KIND.custom_id("open_form"),
            button_label: "Подать запрос на повышение",
        }
    }

    async fn handle(&self, action: WorkflowAction, interaction: &Interaction) -> Result<(), WorkflowError> {
        match action {
            WorkflowAction::OpenForm => self.open_form(interaction).await,
            WorkflowAction::SubmitForm => self.submit_form(interaction).await,
            WorkflowAction::Approve => self.approve(interaction).await,
            WorkflowAction::SendAudit => self.send_audit(interaction).await,
            WorkflowAction::Decline => self.decline(interaction, None).await,
            WorkflowAction::DeclineSubmit { message_id } => self.decline(interaction, Some(message_id)).await,
            WorkflowAction::ApproveFlagged => Ok(()),
        }
    }
}
