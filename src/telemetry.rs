use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use uuid::Uuid;

use crate::config::ObservabilityConfig;

/// Initialize structured logging
///
/// `RUST_LOG` wins over `observability.log_level` when both are set.
pub fn init_telemetry(config: &ObservabilityConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))?;

    if config.json_logs {
        tracing_subscriber::registry()
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(true),
            )
            .with(filter)
            .try_init()?;
    } else {
        tracing_subscriber::registry()
            .with(tracing_subscriber::fmt::layer())
            .with(filter)
            .try_init()?;
    }

    tracing::info!(json = config.json_logs, "Kadrovik telemetry initialized");
    Ok(())
}

/// Generate a correlation ID for linking everything one interaction causes
pub fn generate_correlation_id() -> String {
    Uuid::new_v4().to_string()
}

/// Span the dispatcher runs an interaction handler inside
pub fn create_interaction_span(
    kind: &str,
    action: &str,
    user_id: u64,
    correlation_id: &str,
) -> tracing::Span {
    tracing::info_span!(
        "interaction",
        kind = kind,
        action = action,
        user.id = user_id,
        correlation.id = correlation_id,
    )
}
