use anyhow::Result;
use std::future::Future;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{info, warn};

/// How long the gateway gets to close after a shutdown signal
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Graceful shutdown coordinator for the bot process
#[derive(Debug, Clone, Copy)]
pub struct ShutdownCoordinator {
    grace: Duration,
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new(SHUTDOWN_GRACE)
    }
}

impl ShutdownCoordinator {
    pub fn new(grace: Duration) -> Self {
        Self { grace }
    }

    /// Resolve on SIGINT, or SIGTERM on unix
    pub async fn wait_for_signal(&self) -> Result<()> {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            let mut terminate = signal(SignalKind::terminate())?;
            tokio::select! {
                result = tokio::signal::ctrl_c() => result?,
                _ = terminate.recv() => {}
            }
        }
        #[cfg(not(unix))]
        tokio::signal::ctrl_c().await?;

        info!("Shutdown signal received");
        Ok(())
    }

    /// Run `cleanup` but give up once the grace period is over.
    ///
    /// Pending requests live in memory only and are dropped with the process.
    pub async fn shutdown<F>(&self, cleanup: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        info!(grace_secs = self.grace.as_secs(), "Shutting down");
        if timeout(self.grace, cleanup).await.is_err() {
            warn!("Shutdown grace period elapsed, exiting anyway");
        }
        info!("Shutdown complete");
        Ok(())
    }
}
