// The `cdp` module implements the action driver over the Chrome DevTools
// Protocol.

use super::{ActionDriver, BrowserError};
use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::element::Element;
use chromiumoxide::page::Page;
use futures::StreamExt;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_retry::Retry;
use tokio_retry::strategy::FixedInterval;
use tracing::{debug, info};

/// Elements considered click candidates, in document order.
const CANDIDATE_SELECTOR: &str =
    "button, a, [role=\"button\"], input[type=\"button\"], input[type=\"submit\"]";

/// How often the page is re-polled while waiting for the element.
const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Action driver backed by a CDP browser session.
///
/// One page is created at launch and reused for every navigation, so cookies
/// and authentication state persist for the driver's whole lifetime.
pub struct CdpActionDriver {
    browser: Browser,
    handler_task: JoinHandle<()>,
    page: Page,
    nav_timeout: Duration,
}

impl CdpActionDriver {
    /// Launches the browser and opens the shared page. A failure here means
    /// the process cannot proceed.
    pub async fn launch(headless: bool, nav_timeout: Duration) -> Result<Self, BrowserError> {
        let mut builder = BrowserConfig::builder();
        if !headless {
            builder = builder.with_head();
        }
        let config = builder.build().map_err(BrowserError::Launch)?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| BrowserError::Launch(e.to_string()))?;

        // The CDP message stream must be drained for the connection to make
        // progress; the task ends when the browser goes away.
        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    break;
                }
            }
        });

        let page = browser
            .new_page("about:blank")
            .await
            .map_err(|e| BrowserError::Launch(e.to_string()))?;

        info!(headless, "browser session launched");
        Ok(Self {
            browser,
            handler_task,
            page,
            nav_timeout,
        })
    }
}

#[async_trait]
impl ActionDriver for CdpActionDriver {
    async fn open(&mut self, url: &str) -> Result<(), BrowserError> {
        debug!(%url, "navigating");
        let navigation = async {
            self.page
                .goto(url)
                .await
                .map_err(|e| BrowserError::Navigation {
                    url: url.to_string(),
                    reason: e.to_string(),
                })?;
            self.page
                .wait_for_navigation()
                .await
                .map_err(|e| BrowserError::Navigation {
                    url: url.to_string(),
                    reason: e.to_string(),
                })?;
            Ok(())
        };

        tokio::time::timeout(self.nav_timeout, navigation)
            .await
            .map_err(|_| BrowserError::NavigationTimeout {
                url: url.to_string(),
                timeout_secs: self.nav_timeout.as_secs(),
            })?
    }

    async fn find_and_click(
        &mut self,
        element_text: &str,
        timeout: Duration,
    ) -> Result<(), BrowserError> {
        let strategy = FixedInterval::new(POLL_INTERVAL).take(attempts_for(timeout, POLL_INTERVAL));
        let page = &self.page;

        Retry::spawn(strategy, || try_click(page, element_text))
            .await
            .map_err(|_| BrowserError::ElementNotFound {
                text: element_text.to_string(),
                timeout_secs: timeout.as_secs(),
            })?;

        info!(text = %element_text, "element clicked");
        Ok(())
    }

    async fn close(&mut self) -> Result<(), BrowserError> {
        let result = self
            .browser
            .close()
            .await
            .map(|_| ())
            .map_err(|e| BrowserError::Session(e.to_string()));
        let _ = self.browser.wait().await;
        self.handler_task.abort();
        info!("browser session closed");
        result
    }
}

/// One attempt: look the element up and click it. A click that fails because
/// the node went stale between lookup and click gets exactly one
/// re-lookup-and-retry.
async fn try_click(page: &Page, text: &str) -> Result<(), ()> {
    let Some(element) = find_candidate(page, text).await else {
        return Err(());
    };
    match click_element(&element).await {
        Ok(()) => Ok(()),
        Err(e) => {
            debug!(error = %e, "click failed, re-resolving element once");
            let Some(element) = find_candidate(page, text).await else {
                return Err(());
            };
            click_element(&element).await.map_err(|_| ())
        }
    }
}

/// Returns the first click candidate whose visible text contains `text`.
/// Lookup errors (page still loading, nodes detaching) count as not-found for
/// this attempt.
async fn find_candidate(page: &Page, text: &str) -> Option<Element> {
    let elements = match page.find_elements(CANDIDATE_SELECTOR).await {
        Ok(elements) => elements,
        Err(e) => {
            debug!(error = %e, "element lookup failed");
            return None;
        }
    };
    for element in elements {
        match element.inner_text().await {
            Ok(Some(inner)) if inner.contains(text) => return Some(element),
            Ok(_) => {}
            Err(e) => debug!(error = %e, "could not read element text"),
        }
    }
    None
}

async fn click_element(element: &Element) -> Result<(), chromiumoxide::error::CdpError> {
    // scroll_into_view and click both fail for invisible or detached nodes,
    // which keeps non-clickable matches out.
    element.scroll_into_view().await?;
    element.click().await?;
    Ok(())
}

fn attempts_for(timeout: Duration, interval: Duration) -> usize {
    (timeout.as_millis() / interval.as_millis().max(1)).max(1) as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attempt_count_covers_the_timeout() {
        assert_eq!(
            attempts_for(Duration::from_secs(10), Duration::from_millis(500)),
            20
        );
        assert_eq!(
            attempts_for(Duration::from_millis(100), Duration::from_millis(500)),
            1
        );
    }

    #[test]
    fn candidate_selector_targets_clickables() {
        assert!(CANDIDATE_SELECTOR.contains("button"));
        assert!(CANDIDATE_SELECTOR.contains("[role=\"button\"]"));
    }
}
