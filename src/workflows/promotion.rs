// Promotion requests backed by a link to an approved report. There is no
// evidence stage: the request is posted as soon as the form is valid.

use async_trait::async_trait;
use tracing::{error, info, warn};

use super::common::{
    approved_row, complete_decline, decision_row, deny, open_decline_modal, pending_approval,
    WorkflowDeps, PASSPORT_DIGITS_ONLY,
};
use super::{RequestWorkflow, SetupMessage, WorkflowError};
use crate::access::RoleGate;
use crate::audit::{uprank_action, AuditDelivery, AuditKind, AuditRecord};
use crate::interaction::{Interaction, Person, WorkflowAction, WorkflowKind};
use crate::platform::{
    ChannelId, ContentEdit, Embed, EmbedField, InteractionResponse, MessageEdit, MessageId,
    ModalSpec, OutgoingMessage, RoleId, TextInput, TextInputStyle, EMBED_COLOR,
};
use crate::registry::PendingRegistry;
use crate::validation::is_valid_passport;

const KIND: WorkflowKind = WorkflowKind::Promotion;

const SUBMIT_DENIED: &str = "Подавать запрос на повышение может только роль SANG.";
const APPROVE_DENIED: &str = "Одобрять запрос на повышение может только роль «Старший состав».";
const DECLINE_DENIED: &str = "Отклонять запрос на повышение может только роль «Старший состав».";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromotionApproval {
    pub submitter: Person,
    pub passport: String,
    pub current_rank: String,
    pub new_rank: String,
    pub report_link: String,
}

impl PromotionApproval {
    fn embed(&self) -> Embed {
        Embed::new("📁 Запрос на повышение")
            .color(EMBED_COLOR)
            .field(EmbedField::bullet("**Заполнил'а**", self.submitter.labelled()))
            .field(EmbedField::bullet("**Номер паспорта (StaticID)**", &self.passport))
            .field(EmbedField::bullet("**Текущий ранг**", &self.current_rank))
            .field(EmbedField::bullet("**Новый ранг**", &self.new_rank))
            .field(EmbedField::bullet(
                "**Ссылка на одобренный отчет на повышение**",
                &self.report_link,
            ))
            .timestamp_now()
    }
}

pub struct PromotionWorkflow {
    deps: WorkflowDeps,
    channel: ChannelId,
    submit_gate: RoleGate,
    approve_gate: RoleGate,
    approver_mention: Option<RoleId>,
    approvals: PendingRegistry<MessageId, PromotionApproval>,
}

impl PromotionWorkflow {
    pub fn new(deps: WorkflowDeps) -> Self {
        let roles = &deps.config.roles;
        let approvers = roles.promotion_approve();
        Self {
            channel: deps.config.channels.promotion(),
            submit_gate: RoleGate::new(roles.promotion_submit()),
            approver_mention: approvers.first().copied(),
            approve_gate: RoleGate::new(approvers),
            approvals: PendingRegistry::persistent("promotion_approvals"),
            deps,
        }
    }

    pub fn approvals(&self) -> &PendingRegistry<MessageId, PromotionApproval> {
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
                TextInput::required(KIND.custom_id("new_rank"), "Новый ранг (цифра)", TextInputStyle::Short, 5),
                TextInput::required(
                    KIND.custom_id("link"),
                    "Ссылка на одобренный отчет на повышение",
                    TextInputStyle::Paragraph,
                    500,
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

        let request = PromotionApproval {
            submitter: interaction.person(),
            passport,
            current_rank: field("current_rank"),
            new_rank: field("new_rank"),
            report_link: field("link"),
        };
        interaction
            .reply_ephemeral(platform, "Запрос на повышение отправлен.")
            .await?;

        let message = OutgoingMessage {
            content: self.approver_mention.map(RoleId::mention),
            embeds: vec![request.embed()],
            components: vec![decision_row(KIND, None)],
            ..Default::default()
        };
        let posted = match platform.send_message(self.channel, message).await {
            Ok(posted) => posted,
            Err(e) if e.is_not_found() => {
                warn!(workflow = %KIND, channel_id = %self.channel, "Promotion channel not found");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        info!(
            workflow = %KIND,
            user_id = %interaction.user.id,
            message_id = %posted.id,
            "Promotion request posted"
        );
        self.approvals.put(posted.id, request).await;
        Ok(())
    }

    async fn approve(&self, interaction: &Interaction) -> Result<(), WorkflowError> {
        let platform = self.deps.platform.as_ref();
        if !self.approve_gate.permits(interaction.member.as_ref()) {
            deny(platform, interaction, APPROVE_DENIED).await;
            return Ok(());
        }
        let Some((message, record)) = pending_approval(platform, &self.approvals, interaction).await? else {
            return Ok(());
        };

        let audit = AuditRecord {
            kind: AuditKind::Uprank,
            author: interaction.person(),
            employee: record.submitter.clone(),
            passport: record.passport.clone(),
            action: uprank_action(&record.new_rank),
            reason: format!("Запрос на повышение одобрен {}", message.url),
        };
        match self.deps.audit.submit(&audit).await {
            Ok(AuditDelivery::Posted(_)) => {}
            Ok(delivery) => warn!(workflow = %KIND, ?delivery, "Uprank audit was not posted"),
            Err(e) => error!(workflow = %KIND, error = %e, "Failed to post uprank audit"),
        }

        self.approvals.delete(&message.id).await;

        let row = approved_row(KIND, &interaction.display_name());
        interaction
            .respond(
                platform,
                InteractionResponse::UpdateMessage(MessageEdit::components(ContentEdit::Clear, vec![row])),
            )
            .await?;
        info!(
            workflow = %KIND,
            message_id = %message.id,
            approver = %interaction.user.id,
            "Promotion approved"
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
                    "Запрос отклонён.",
                )
                .await
            }
        }
    }
}

#[async_trait]
impl RequestWorkflow for PromotionWorkflow {
    fn kind(&self) -> WorkflowKind {
        KIND
    }

    fn channel_id(&self) -> ChannelId {
        self.channel
    }

    fn setup_message(&self) -> SetupMessage {
        SetupMessage {
            title: "Запрос на повышение",
            description: "Чтобы подать запрос на повышение, вам нужно нажать кнопку ниже и заполнить анкету!",
            button_id: KIND.custom_id("open_form"),
            button_label: "Подать запрос на повышение",
        }
    }

    async fn handle(&self, action: WorkflowAction, interaction: &Interaction) -> Result<(), WorkflowError> {
        match action {
            WorkflowAction::OpenForm => self.open_form(interaction).await,
            WorkflowAction::SubmitForm => self.submit_form(interaction).await,
            WorkflowAction::Approve => self.approve(interaction).await,
            WorkflowAction::Decline => self.decline(interaction, None).await,
            WorkflowAction::DeclineSubmit { message_id } => self.decline(interaction, Some(message_id)).await,
            WorkflowAction::ApproveFlagged | WorkflowAction::SendAudit => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ChannelsConfig, KadrovikConfig, DEFAULT_PROMOTION_APPROVE_ROLE, DEFAULT_PROMOTION_SUBMIT_ROLE};
    use crate::evidence::MessageBus;
    use crate::interaction::{Member, User};
    use crate::platform::mocks::RecordingPlatform;
    use crate::platform::UserId;
    use crate::workflows::common::DATA_NOT_FOUND;
    use std::sync::Arc;

    const CHANNEL: ChannelId = ChannelId(200);
    const UPRANK: ChannelId = ChannelId(301);

    fn workflow(platform: Arc<RecordingPlatform>) -> PromotionWorkflow {
        let config = KadrovikConfig {
            channels: ChannelsConfig {
                promotion: Some(CHANNEL),
                uprank: Some(UPRANK),
                ..Default::default()
            },
            ..Default::default()
        };
        PromotionWorkflow::new(WorkflowDeps::new(platform, Arc::new(config), MessageBus::default()))
    }

    fn submit(passport: &str) -> Interaction {
        Interaction::modal_submit(
            1,
            "promotion_form_modal",
            [
                ("promotion_passport", passport),
                ("promotion_current_rank", "2"),
                ("promotion_new_rank", "3"),
                ("promotion_link", "https://forum.test/report/1"),
            ],
            ChannelId(999),
            User {
                id: UserId(7),
                username: "ivan".to_string(),
            },
        )
        .with_member(Member::new(UserId(7), [DEFAULT_PROMOTION_SUBMIT_ROLE]).with_display_name("Иван"))
    }

    fn approver_press(id: u64, custom_id: &str, message: crate::platform::PostedMessage) -> Interaction {
        Interaction::button(
            id,
            custom_id,
            CHANNEL,
            User {
                id: UserId(8),
                username: "gen".to_string(),
            },
        )
        .with_member(Member::new(UserId(8), [DEFAULT_PROMOTION_APPROVE_ROLE]).with_display_name("Генерал"))
        .on_message(message)
    }

    #[tokio::test]
    async fn bad_passport_reports_first_error_only() {
        let platform = Arc::new(RecordingPlatform::new());
        let workflow = workflow(platform.clone());
        workflow.handle(WorkflowAction::SubmitForm, &submit("abc")).await.unwrap();

        assert_eq!(platform.ephemeral_texts(), vec![PASSPORT_DIGITS_ONLY.to_string()]);
        assert!(platform.sent_to(CHANNEL).is_empty());
    }

    #[tokio::test]
    async fn valid_form_posts_straight_to_promotion_channel() {
        let platform = Arc::new(RecordingPlatform::new());
        let workflow = workflow(platform.clone());
        workflow.handle(WorkflowAction::SubmitForm, &submit("777")).await.unwrap();

        assert_eq!(platform.ephemeral_texts(), vec!["Запрос на повышение отправлен.".to_string()]);
        let sent = platform.sent_to(CHANNEL);
        assert_eq!(sent.len(), 1);
        let (id, message) = &sent[0];
        assert_eq!(message.content, Some(DEFAULT_PROMOTION_APPROVE_ROLE.mention()));
        assert_eq!(message.embeds[0].field_value("**Новый ранг**"), Some("• 3"));
        assert!(message.files.is_empty());
        assert!(workflow.approvals().contains(id));
    }

    #[tokio::test]
    async fn approval_files_uprank_audit_and_clears_content() {
        let platform = Arc::new(RecordingPlatform::new());
        let workflow = workflow(platform.clone());
        workflow.handle(WorkflowAction::SubmitForm, &submit("777")).await.unwrap();
        let posted = platform.message(platform.sent_to(CHANNEL)[0].0).unwrap();

        workflow
            .handle(WorkflowAction::Approve, &approver_press(2, "promotion_approve", posted.clone()))
            .await
            .unwrap();

        let audit = &platform.sent_to(UPRANK)[0].1;
        assert_eq!(audit.embeds[0].field_value("**Действие**"), Some("• Повышение на 3-й ранг"));
        assert_eq!(
            audit.embeds[0].field_value("**Причина**"),
            Some(format!("• Запрос на повышение одобрен {}", posted.url).as_str())
        );
        let update = &platform.updates()[0];
        assert_eq!(update.content, ContentEdit::Clear);
        assert_eq!(update.components[0].0[0].custom_id, "promotion_done_approve");

        workflow
            .handle(WorkflowAction::Approve, &approver_press(3, "promotion_approve", posted))
            .await
            .unwrap();
        assert_eq!(platform.ephemeral_texts().last().map(String::as_str), Some(DATA_NOT_FOUND));
        assert_eq!(platform.sent_to(UPRANK).len(), 1);
    }

    #[tokio::test]
    async fn decline_button_opens_reason_modal() {
        let platform = Arc::new(RecordingPlatform::new());
        let workflow = workflow(platform.clone());
        workflow.handle(WorkflowAction::SubmitForm, &submit("777")).await.unwrap();
        let posted = platform.message(platform.sent_to(CHANNEL)[0].0).unwrap();

        workflow
            .handle(WorkflowAction::Decline, &approver_press(2, "promotion_decline", posted.clone()))
            .await
            .unwrap();
        match platform.responses().last() {
            Some(InteractionResponse::Modal(modal)) => {
                assert_eq!(modal.custom_id, format!("promotion_decline_modal_{}", posted.id));
                assert_eq!(modal.inputs[0].custom_id, "promotion_decline_reason");
                assert_eq!(modal.inputs[0].max_length, 500);
            }
            other => panic!("expected decline modal, got {other:?}"),
        }
    }
}
