//! Top-level routing of gateway events
//!
//! The [`Dispatcher`] classifies every interaction into a workflow action or
//! an audit command, runs the handler inside a correlation span and turns any
//! error into a generic reply. Nothing a handler does can take the process
//! down. Plain guild messages are published on the evidence bus.

use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, warn, Instrument};

use crate::access::RoleGate;
use crate::audit::{AuditCommands, AuditDesk};
use crate::config::KadrovikConfig;
use crate::evidence::MessageBus;
use crate::interaction::{Interaction, InteractionKind, Route, WorkflowKind};
use crate::platform::{ChatPlatform, IncomingMessage};
use crate::telemetry::{create_interaction_span, generate_correlation_id};
use crate::workflows::{
    ensure_setup_message, PromotionWorkflow, RequestWorkflow, ResignationWorkflow, SetupOutcome,
    UprankRequestWorkflow, WorkflowDeps, WorkflowError,
};

pub const GENERIC_FAILURE: &str = "Произошла ошибка.";
pub const COMMANDS_DENIED: &str = "У вас нет прав на использование кадровых команд. Требуется роль «Старший состав» или «MA | Военно-учебная академия».";

pub struct Dispatcher {
    platform: Arc<dyn ChatPlatform>,
    workflows: HashMap<WorkflowKind, Arc<dyn RequestWorkflow>>,
    commands: AuditCommands,
    command_gate: RoleGate,
    bus: MessageBus,
}

impl Dispatcher {
    /// Wire the three workflows and the audit commands onto one platform
    pub fn new(platform: Arc<dyn ChatPlatform>, config: Arc<KadrovikConfig>) -> Self {
        let bus = MessageBus::default();
        let deps = WorkflowDeps::new(Arc::clone(&platform), Arc::clone(&config), bus.clone());
        let workflows: Vec<Arc<dyn RequestWorkflow>> = vec![
            Arc::new(ResignationWorkflow::new(deps.clone())),
            Arc::new(PromotionWorkflow::new(deps.clone())),
            Arc::new(UprankRequestWorkflow::new(deps)),
        ];
        let desk = AuditDesk::new(Arc::clone(&platform), config.channels.clone());
        let commands = AuditCommands::new(
            Arc::clone(&platform),
            desk,
            config.roles.invite_roles.clone(),
        );
        Self {
            command_gate: RoleGate::optional(config.roles.commands.iter().copied()),
            workflows: workflows.into_iter().map(|w| (w.kind(), w)).collect(),
            platform,
            commands,
            bus,
        }
    }

    pub fn bus(&self) -> &MessageBus {
        &self.bus
    }

    pub fn workflow(&self, kind: WorkflowKind) -> Option<&Arc<dyn RequestWorkflow>> {
        self.workflows.get(&kind)
    }

    /// Feed a gateway message to the open evidence sessions
    pub fn handle_message(&self, message: IncomingMessage) -> usize {
        let delivered = self.bus.publish(message);
        if delivered > 0 {
            debug!(sessions = delivered, "Message delivered to evidence sessions");
        }
        delivered
    }

    pub async fn handle_interaction(&self, interaction: Interaction) {
        let route = Route::classify(&interaction.kind);
        let (kind, action) = match &route {
            Route::Workflow(kind, action) => (kind.prefix(), action.name()),
            Route::Command(name) => ("command", name.as_str()),
            Route::Ignored => {
                debug!(custom_id = ?interaction.custom_id(), "Ignoring interaction");
                return;
            }
        };
        let correlation_id = generate_correlation_id();
        let span = create_interaction_span(kind, action, interaction.user.id.get(), &correlation_id);

        async {
            if let Err(e) = self.route(&route, &interaction).await {
                error!(error = %e, "Interaction handler failed");
                if let Err(e) = interaction
                    .reply_or_follow_up(self.platform.as_ref(), GENERIC_FAILURE)
                    .await
                {
                    warn!(error = %e, "Failed to report handler failure");
                }
            }
        }
        .instrument(span)
        .await;
    }

    async fn route(&self, route: &Route, interaction: &Interaction) -> Result<(), WorkflowError> {
        match route {
            Route::Workflow(kind, action) => match self.workflows.get(kind) {
                Some(workflow) => workflow.handle(*action, interaction).await,
                None => {
                    warn!(workflow = %kind, "No workflow registered");
                    Ok(())
                }
            },
            Route::Command(name) => {
                let InteractionKind::Command(invocation) = &interaction.kind else {
                    return Ok(());
                };
                if !AuditCommands::knows(name) {
                    debug!(command = %name, "Unknown command");
                    return Ok(());
                }
                if !self.command_gate.permits(interaction.member.as_ref()) {
                    interaction
                        .reply_ephemeral(self.platform.as_ref(), COMMANDS_DENIED)
                        .await?;
                    return Ok(());
                }
                self.commands.handle(interaction, invocation).await
            }
            Route::Ignored => Ok(()),
        }
    }

    /// Create or refresh the setup post of every workflow; failures are logged
    pub async fn ensure_setup_messages(&self) -> Vec<(WorkflowKind, SetupOutcome)> {
        let mut outcomes = Vec::new();
        for kind in WorkflowKind::ALL {
            let Some(workflow) = self.workflows.get(&kind) else {
                continue;
            };
            let channel = workflow.channel_id();
            match ensure_setup_message(self.platform.as_ref(), channel, &workflow.setup_message()).await {
                Ok(outcome) => outcomes.push((kind, outcome)),
                Err(e) => error!(
                    workflow = %kind,
                    channel_id = %channel,
                    error = %e,
                    "Failed to maintain setup message"
                ),
            }
        }
        outcomes
    }
}
