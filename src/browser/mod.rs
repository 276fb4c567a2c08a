// The `browser` module provides the automated-browser seam the orchestrator
// drives to open links and click on-page elements.

pub mod cdp;

pub use cdp::CdpActionDriver;

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

/// The `BrowserError` enum discriminates browser failures so callers can
/// apply the right policy per category.
#[derive(Error, Debug)]
pub enum BrowserError {
    /// The browser process could not be started.
    #[error("failed to launch browser: {0}")]
    Launch(String),
    /// Navigation failed outright.
    #[error("navigation to '{url}' failed: {reason}")]
    Navigation { url: String, reason: String },
    /// Navigation did not complete within the configured bound.
    #[error("navigation to '{url}' timed out after {timeout_secs}s")]
    NavigationTimeout { url: String, timeout_secs: u64 },
    /// No element containing the requested text became clickable in time.
    #[error("no clickable element containing '{text}' appeared within {timeout_secs}s")]
    ElementNotFound { text: String, timeout_secs: u64 },
    /// The browser session itself failed.
    #[error("browser session error: {0}")]
    Session(String),
}

/// The `ActionDriver` trait defines the browser contract the orchestrator
/// consumes. Implementations keep one session alive for the orchestrator's
/// whole run so cookies and auth state persist across messages.
#[async_trait]
pub trait ActionDriver: Send {
    /// Navigates the session to `url`, blocking until the navigation
    /// completes or the driver's bounded timeout elapses.
    async fn open(&mut self, url: &str) -> Result<(), BrowserError>;

    /// Polls the rendered page for a clickable element whose visible text
    /// contains `element_text`, scrolls it into view and clicks it. On a
    /// stale element during the click, re-looks it up exactly once before
    /// giving up.
    async fn find_and_click(
        &mut self,
        element_text: &str,
        timeout: Duration,
    ) -> Result<(), BrowserError>;

    /// Releases the browser session.
    async fn close(&mut self) -> Result<(), BrowserError>;
}
