// Kadrovik - personnel request workflows for a Discord guild
// This exposes the core components for testing and integration

pub mod access;
pub mod audit;
pub mod config;
pub mod dispatch;
pub mod evidence;
#[cfg(feature = "discord")]
pub mod gateway;
pub mod interaction;
pub mod platform;
pub mod registry;
pub mod shutdown;
pub mod telemetry;
pub mod validation;
pub mod workflows;

// Re-export key types for easy access
pub use audit::{command_specs, AuditCommands, AuditDesk, AuditKind, AuditRecord};
pub use config::KadrovikConfig;
pub use dispatch::Dispatcher;
pub use interaction::{Interaction, Route, WorkflowAction, WorkflowKind};
pub use platform::{ChatPlatform, PlatformError};
pub use registry::PendingRegistry;
pub use shutdown::ShutdownCoordinator;
pub use telemetry::{create_interaction_span, generate_correlation_id, init_telemetry};
pub use workflows::{
    PromotionWorkflow, RequestWorkflow, ResignationWorkflow, UprankRequestWorkflow, WorkflowError,
};
