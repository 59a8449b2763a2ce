// Request workflows
// Each workflow owns its registries and evidence sessions; nothing is shared
// between them except the platform handle and the message bus.

use async_trait::async_trait;
use thiserror::Error;

use crate::interaction::{Interaction, WorkflowAction, WorkflowKind};
use crate::platform::{ChannelId, PlatformError};

pub mod common;
pub mod promotion;
pub mod resignation;
pub mod setup;
pub mod uprank_request;

pub use common::WorkflowDeps;
pub use promotion::PromotionWorkflow;
pub use resignation::ResignationWorkflow;
pub use setup::{ensure_setup_message, SetupMessage, SetupOutcome};
pub use uprank_request::UprankRequestWorkflow;

#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error(transparent)]
    Platform(#[from] PlatformError),

    #[error("form field {0} is missing")]
    MissingField(&'static str),

    #[error("interaction has no {0}")]
    MissingContext(&'static str),
}

/// One request lifecycle: open form, submit, approve or decline
#[async_trait]
pub trait RequestWorkflow: Send + Sync {
    fn kind(&self) -> WorkflowKind;

    /// Channel holding the setup post and the approval requests
    fn channel_id(&self) -> ChannelId;

    fn setup_message(&self) -> SetupMessage;

    async fn handle(
        &self,
        action: WorkflowAction,
        interaction: &Interaction,
    ) -> Result<(), WorkflowError>;
}
