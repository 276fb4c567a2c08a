use async_trait::async_trait;
use std::time::Duration;
use tracing::info;

/// A trait for sources that can trigger a graceful shutdown of the scanner.
#[async_trait]
pub trait Shutdown: Send {
    /// This future resolves when a shutdown signal is received.
    async fn wait_for_signal(&mut self);
}

pub struct CtrlCShutdown;

impl CtrlCShutdown {
    pub fn new() -> Self {
        Self
    }
}

impl Default for CtrlCShutdown {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Shutdown for CtrlCShutdown {
    async fn wait_for_signal(&mut self) {
        // We use the result only to know the signal fired; a registration
        // error must not keep the scanner from stopping.
        let _ = tokio::signal::ctrl_c().await;
        info!("Ctrl-C received, initiating graceful shutdown");
    }
}

pub struct TimeBasedShutdown {
    duration: Duration,
}

impl TimeBasedShutdown {
    /// Creates a new handler that will trigger a shutdown after the given duration.
    pub fn new(duration: Duration) -> Self {
        Self { duration }
    }
}

#[async_trait]
impl Shutdown for TimeBasedShutdown {
    async fn wait_for_signal(&mut self) {
        tokio::time::sleep(self.duration).await;
        info!(
            duration_secs = self.duration.as_secs(),
            "time-based shutdown triggered"
        );
    }
}
