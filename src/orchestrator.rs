// The `orchestrator` module owns the poll/act/sleep control loop that ties
// the mailbox watcher, link extractor, tracker and action driver together.

use crate::browser::{ActionDriver, BrowserError};
use crate::config::Config;
use crate::extract;
use crate::mail::{MailError, MailWatcher, Message};
use crate::shutdown::Shutdown;
use crate::tracker::Tracker;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// The `OrchestratorError` enum defines the failures that abort a run.
#[derive(Error, Debug)]
pub enum OrchestratorError {
    /// The builder was finalized without a required collaborator.
    #[error("orchestrator is missing its {0}")]
    Missing(&'static str),
    /// The mailbox was unavailable on the very first scan.
    #[error("mailbox unavailable at startup: {0}")]
    Mail(#[from] MailError),
}

/// Where the control loop currently is. `Stopped` is reached from `Idle` or
/// `Sleeping` when the stop signal is observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Scanning,
    Acting,
    Sleeping,
    Stopped,
}

/// Outcome of one scan cycle, for observability only.
#[derive(Debug, Default)]
pub struct ScanResult {
    /// Messages that matched the subject and were not yet processed.
    pub matched: usize,
    /// Messages fully acted on this cycle.
    pub acted: usize,
    /// Per-message failure descriptions; these messages stay unmarked and
    /// are retried on the next cycle.
    pub errors: Vec<String>,
}

/// Why acting on a single message failed. Never aborts the cycle.
#[derive(Error, Debug)]
enum ActFailure {
    #[error("no links found in message body")]
    NoLinks,
    #[error("no link matched filter '{0}'")]
    NoLinkMatchedFilter(String),
    #[error(transparent)]
    Browser(#[from] BrowserError),
}

/// A builder for [`Orchestrator`].
pub struct OrchestratorBuilder {
    config: Config,
    watcher: Option<Box<dyn MailWatcher>>,
    driver: Option<Box<dyn ActionDriver>>,
    tracker: Option<Tracker>,
    shutdown_handler: Option<Box<dyn Shutdown>>,
}

impl OrchestratorBuilder {
    /// Creates a new `OrchestratorBuilder` around an immutable configuration.
    pub fn new(config: Config) -> Self {
        Self {
            config,
            watcher: None,
            driver: None,
            tracker: None,
            shutdown_handler: None,
        }
    }

    pub fn with_watcher(mut self, watcher: Box<dyn MailWatcher>) -> Self {
        self.watcher = Some(watcher);
        self
    }

    pub fn with_driver(mut self, driver: Box<dyn ActionDriver>) -> Self {
        self.driver = Some(driver);
        self
    }

    pub fn with_tracker(mut self, tracker: Tracker) -> Self {
        self.tracker = Some(tracker);
        self
    }

    pub fn with_shutdown_handler(mut self, handler: impl Shutdown + 'static) -> Self {
        self.shutdown_handler = Some(Box::new(handler));
        self
    }

    /// Builds an `Orchestrator`.
    pub fn build(self) -> Result<Orchestrator, OrchestratorError> {
        Ok(Orchestrator {
            watcher: self
                .watcher
                .ok_or(OrchestratorError::Missing("mail watcher"))?,
            driver: self
                .driver
                .ok_or(OrchestratorError::Missing("action driver"))?,
            tracker: self.tracker.ok_or(OrchestratorError::Missing("tracker"))?,
            shutdown_handler: self.shutdown_handler,
            config: self.config,
            phase: Phase::Idle,
        })
    }
}

/// The control loop: scan the mailbox, act on each new match, sleep, repeat,
/// until the stop signal is observed.
///
/// The orchestrator owns the mailbox connection and the browser session for
/// its entire run and releases both on every exit path. Failure isolation is
/// per message: one message's failure never aborts the cycle or the process.
pub struct Orchestrator {
    config: Config,
    watcher: Box<dyn MailWatcher>,
    driver: Box<dyn ActionDriver>,
    tracker: Tracker,
    shutdown_handler: Option<Box<dyn Shutdown>>,
    phase: Phase,
}

impl Orchestrator {
    /// Runs the loop until the shutdown handler fires. Returns an error only
    /// when the mailbox is unavailable on the very first scan; every later
    /// failure is retried or isolated.
    pub async fn run(mut self) -> Result<(), OrchestratorError> {
        let token = CancellationToken::new();
        let signal_task = self.shutdown_handler.take().map(|mut handler| {
            let token = token.clone();
            tokio::spawn(async move {
                handler.wait_for_signal().await;
                token.cancel();
            })
        });

        info!(
            subject = %self.config.subject,
            interval_secs = self.config.poll_interval.as_secs(),
            processed_total = self.tracker.count(),
            "scanner started"
        );

        let mut first_cycle = true;
        while !token.is_cancelled() {
            self.phase = Phase::Scanning;
            match self.scan_once().await {
                Ok(result) => {
                    info!(
                        matched = result.matched,
                        acted = result.acted,
                        failed = result.errors.len(),
                        processed_total = self.tracker.count(),
                        "cycle complete"
                    );
                }
                Err(e) if first_cycle => {
                    // The first contact with the mailbox failing means the
                    // process cannot do useful work at all.
                    error!(error = %e, "mailbox unavailable on first scan");
                    self.phase = Phase::Stopped;
                    self.cleanup().await;
                    if let Some(task) = signal_task {
                        task.abort();
                    }
                    return Err(e.into());
                }
                Err(e) => {
                    warn!(error = %e, "scan failed, connection will be re-established next cycle");
                }
            }
            first_cycle = false;

            self.phase = Phase::Sleeping;
            tokio::select! {
                _ = tokio::time::sleep(self.config.poll_interval) => {
                    self.phase = Phase::Idle;
                }
                _ = token.cancelled() => break,
            }
        }

        self.phase = Phase::Stopped;
        self.cleanup().await;
        if let Some(task) = signal_task {
            task.abort();
        }
        info!("scanner stopped");
        Ok(())
    }

    /// One full mailbox pass. Only the search itself can fail; everything
    /// per-message is recorded in the result and skipped past.
    async fn scan_once(&mut self) -> Result<ScanResult, MailError> {
        let messages = self.watcher.search(&self.config.subject).await?;
        debug!(candidates = messages.len(), "mailbox search returned");

        let needle = self.config.subject.to_lowercase();
        let mut result = ScanResult::default();

        for message in messages {
            if self.tracker.is_processed(&message.id) {
                debug!(id = %message.id, "already processed, skipping");
                continue;
            }
            // Server SUBJECT semantics differ between providers; re-verify
            // before acting.
            if !message.subject.to_lowercase().contains(&needle) {
                debug!(id = %message.id, subject = %message.subject, "subject does not match, skipping");
                continue;
            }

            result.matched += 1;
            self.phase = Phase::Acting;
            info!(id = %message.id, subject = %message.subject, "processing message");

            match self.act_on(&message).await {
                Ok(()) => {
                    if let Err(e) = self.tracker.mark_processed(&message.id).await {
                        warn!(
                            id = %message.id,
                            error = %e,
                            "ledger write failed; in-memory state still guards this run"
                        );
                    }
                    if let Err(e) = self.watcher.mark_read(&message.id).await {
                        warn!(id = %message.id, error = %e, "failed to mark message read");
                    }
                    result.acted += 1;
                }
                Err(reason) => {
                    warn!(id = %message.id, %reason, "processing failed, message left for retry");
                    result.errors.push(format!("{}: {reason}", message.id));
                }
            }
        }

        Ok(result)
    }

    /// Opens the message's first actionable link and clicks the configured
    /// element, if any.
    async fn act_on(&mut self, message: &Message) -> Result<(), ActFailure> {
        let url = self.first_actionable_url(&message.body)?;
        info!(id = %message.id, %url, "opening link");
        self.driver.open(&url).await?;

        if let Some(text) = &self.config.element_text {
            debug!(%text, "looking for clickable element");
            self.driver
                .find_and_click(text, self.config.click_timeout)
                .await?;
        }
        Ok(())
    }

    /// Picks the URL to act on: the first extracted one, or, when an anchor
    /// text filter is configured, the first link whose visible text contains
    /// it case-insensitively.
    fn first_actionable_url(&self, body: &str) -> Result<String, ActFailure> {
        match &self.config.link_filter_text {
            None => extract::extract(body)
                .into_iter()
                .next()
                .ok_or(ActFailure::NoLinks),
            Some(filter) => {
                let links = extract::extract_labeled(body);
                if links.is_empty() {
                    return Err(ActFailure::NoLinks);
                }
                let filter_lower = filter.to_lowercase();
                links
                    .into_iter()
                    .find(|(_, label)| label.to_lowercase().contains(&filter_lower))
                    .map(|(url, _)| url)
                    .ok_or_else(|| ActFailure::NoLinkMatchedFilter(filter.clone()))
            }
        }
    }

    async fn cleanup(&mut self) {
        debug!(phase = ?self.phase, "releasing scanner resources");
        if let Err(e) = self.driver.close().await {
            warn!(error = %e, "browser close failed");
        }
        if let Err(e) = self.watcher.close().await {
            warn!(error = %e, "mailbox close failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shutdown::TimeBasedShutdown;
    use async_trait::async_trait;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use tempfile::tempdir;
    use tokio::time::Instant;

    #[derive(Default, Clone)]
    struct WatcherLog {
        search_times: Arc<Mutex<Vec<Instant>>>,
        marked_read: Arc<Mutex<Vec<String>>>,
    }

    struct MockWatcher {
        messages: Vec<Message>,
        log: WatcherLog,
        fail_search: bool,
    }

    impl MockWatcher {
        fn new(messages: Vec<Message>) -> (Self, WatcherLog) {
            let log = WatcherLog::default();
            (
                Self {
                    messages,
                    log: log.clone(),
                    fail_search: false,
                },
                log,
            )
        }
    }

    #[async_trait]
    impl MailWatcher for MockWatcher {
        async fn search(&mut self, _subject: &str) -> Result<Vec<Message>, MailError> {
            self.log.search_times.lock().unwrap().push(Instant::now());
            if self.fail_search {
                return Err(MailError::Connection("refused".into()));
            }
            Ok(self.messages.clone())
        }

        async fn mark_read(&mut self, id: &str) -> Result<(), MailError> {
            self.log.marked_read.lock().unwrap().push(id.to_string());
            Ok(())
        }

        async fn close(&mut self) -> Result<(), MailError> {
            Ok(())
        }
    }

    #[derive(Default, Clone)]
    struct DriverLog {
        opened: Arc<Mutex<Vec<String>>>,
        clicked: Arc<Mutex<Vec<String>>>,
    }

    struct MockDriver {
        log: DriverLog,
        fail_open_on: Option<String>,
    }

    impl MockDriver {
        fn new() -> (Self, DriverLog) {
            let log = DriverLog::default();
            (
                Self {
                    log: log.clone(),
                    fail_open_on: None,
                },
                log,
            )
        }
    }

    #[async_trait]
    impl ActionDriver for MockDriver {
        async fn open(&mut self, url: &str) -> Result<(), BrowserError> {
            if self.fail_open_on.as_deref() == Some(url) {
                return Err(BrowserError::Navigation {
                    url: url.to_string(),
                    reason: "mock failure".into(),
                });
            }
            self.log.opened.lock().unwrap().push(url.to_string());
            Ok(())
        }

        async fn find_and_click(
            &mut self,
            element_text: &str,
            _timeout: Duration,
        ) -> Result<(), BrowserError> {
            self.log
                .clicked
                .lock()
                .unwrap()
                .push(element_text.to_string());
            Ok(())
        }

        async fn close(&mut self) -> Result<(), BrowserError> {
            Ok(())
        }
    }

    fn test_config() -> Config {
        Config::builder("me@example.com", "secret", "Invoice")
            .with_element_text("Accept")
            .with_poll_interval(Duration::from_millis(50))
            .build()
    }

    fn invoice_message(id: &str) -> Message {
        Message {
            id: id.to_string(),
            subject: "Invoice #1".to_string(),
            body: "Please review: https://example.com/task/1".to_string(),
        }
    }

    async fn orchestrator_with(
        config: Config,
        watcher: MockWatcher,
        driver: MockDriver,
        tracker: Tracker,
    ) -> Orchestrator {
        OrchestratorBuilder::new(config)
            .with_watcher(Box::new(watcher))
            .with_driver(Box::new(driver))
            .with_tracker(tracker)
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn one_cycle_processes_a_matching_message() {
        let dir = tempdir().unwrap();
        let tracker = Tracker::load(dir.path().join("ledger.json")).await.unwrap();
        let (watcher, watcher_log) = MockWatcher::new(vec![invoice_message("11")]);
        let (driver, driver_log) = MockDriver::new();

        let mut orchestrator = orchestrator_with(test_config(), watcher, driver, tracker).await;
        let result = orchestrator.scan_once().await.unwrap();

        assert_eq!(result.matched, 1);
        assert_eq!(result.acted, 1);
        assert!(result.errors.is_empty());
        assert_eq!(
            *driver_log.opened.lock().unwrap(),
            vec!["https://example.com/task/1"]
        );
        assert_eq!(*driver_log.clicked.lock().unwrap(), vec!["Accept"]);
        assert_eq!(*watcher_log.marked_read.lock().unwrap(), vec!["11"]);
        assert!(orchestrator.tracker.is_processed("11"));
    }

    #[tokio::test]
    async fn processed_messages_never_reach_the_driver() {
        let dir = tempdir().unwrap();
        let mut tracker = Tracker::load(dir.path().join("ledger.json")).await.unwrap();
        tracker.mark_processed("11").await.unwrap();

        let (watcher, watcher_log) = MockWatcher::new(vec![invoice_message("11")]);
        let (driver, driver_log) = MockDriver::new();

        let mut orchestrator = orchestrator_with(test_config(), watcher, driver, tracker).await;
        let result = orchestrator.scan_once().await.unwrap();

        assert_eq!(result.matched, 0);
        assert!(driver_log.opened.lock().unwrap().is_empty());
        assert!(watcher_log.marked_read.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn subjects_are_reverified_client_side() {
        let dir = tempdir().unwrap();
        let tracker = Tracker::load(dir.path().join("ledger.json")).await.unwrap();
        let message = Message {
            id: "5".to_string(),
            subject: "Completely unrelated".to_string(),
            body: "https://example.com/whatever".to_string(),
        };
        let (watcher, _) = MockWatcher::new(vec![message]);
        let (driver, driver_log) = MockDriver::new();

        let mut orchestrator = orchestrator_with(test_config(), watcher, driver, tracker).await;
        let result = orchestrator.scan_once().await.unwrap();

        assert_eq!(result.matched, 0);
        assert!(driver_log.opened.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn one_failure_does_not_abort_the_cycle() {
        let dir = tempdir().unwrap();
        let tracker = Tracker::load(dir.path().join("ledger.json")).await.unwrap();

        let broken = Message {
            id: "1".to_string(),
            subject: "Invoice broken".to_string(),
            body: "https://example.com/broken".to_string(),
        };
        let fine = Message {
            id: "2".to_string(),
            subject: "Invoice fine".to_string(),
            body: "https://example.com/fine".to_string(),
        };
        let (watcher, watcher_log) = MockWatcher::new(vec![broken, fine]);
        let (mut driver, driver_log) = MockDriver::new();
        driver.fail_open_on = Some("https://example.com/broken".to_string());

        let mut orchestrator = orchestrator_with(test_config(), watcher, driver, tracker).await;
        let result = orchestrator.scan_once().await.unwrap();

        assert_eq!(result.matched, 2);
        assert_eq!(result.acted, 1);
        assert_eq!(result.errors.len(), 1);
        assert_eq!(
            *driver_log.opened.lock().unwrap(),
            vec!["https://example.com/fine"]
        );
        // The failed message stays unmarked so the next cycle retries it.
        assert!(!orchestrator.tracker.is_processed("1"));
        assert!(orchestrator.tracker.is_processed("2"));
        assert_eq!(*watcher_log.marked_read.lock().unwrap(), vec!["2"]);
    }

    #[tokio::test]
    async fn bodies_without_links_are_per_item_failures() {
        let dir = tempdir().unwrap();
        let tracker = Tracker::load(dir.path().join("ledger.json")).await.unwrap();
        let message = Message {
            id: "9".to_string(),
            subject: "Invoice without links".to_string(),
            body: "nothing useful here".to_string(),
        };
        let (watcher, _) = MockWatcher::new(vec![message]);
        let (driver, driver_log) = MockDriver::new();

        let mut orchestrator = orchestrator_with(test_config(), watcher, driver, tracker).await;
        let result = orchestrator.scan_once().await.unwrap();

        assert_eq!(result.matched, 1);
        assert_eq!(result.acted, 0);
        assert_eq!(result.errors.len(), 1);
        assert!(driver_log.opened.lock().unwrap().is_empty());
        assert!(!orchestrator.tracker.is_processed("9"));
    }

    #[tokio::test]
    async fn link_filter_selects_by_anchor_text() {
        let dir = tempdir().unwrap();
        let tracker = Tracker::load(dir.path().join("ledger.json")).await.unwrap();
        let message = Message {
            id: "3".to_string(),
            subject: "Invoice with links".to_string(),
            body: r#"<a href="https://example.com/decline">Decline</a>
                     <a href="https://example.com/accept">Go to task</a>"#
                .to_string(),
        };
        let (watcher, _) = MockWatcher::new(vec![message]);
        let (driver, driver_log) = MockDriver::new();

        let config = Config::builder("me@example.com", "secret", "Invoice")
            .with_link_filter_text("go to task")
            .build();
        let mut orchestrator = orchestrator_with(config, watcher, driver, tracker).await;
        let result = orchestrator.scan_once().await.unwrap();

        assert_eq!(result.acted, 1);
        assert_eq!(
            *driver_log.opened.lock().unwrap(),
            vec!["https://example.com/accept"]
        );
        // No element text configured: open-only mode.
        assert!(driver_log.clicked.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn run_paces_cycles_by_the_poll_interval() {
        let dir = tempdir().unwrap();
        let tracker = Tracker::load(dir.path().join("ledger.json")).await.unwrap();
        let (watcher, watcher_log) = MockWatcher::new(Vec::new());
        let (driver, _) = MockDriver::new();

        let orchestrator = OrchestratorBuilder::new(test_config())
            .with_watcher(Box::new(watcher))
            .with_driver(Box::new(driver))
            .with_tracker(tracker)
            .with_shutdown_handler(TimeBasedShutdown::new(Duration::from_millis(180)))
            .build()
            .unwrap();

        orchestrator.run().await.unwrap();

        let times = watcher_log.search_times.lock().unwrap();
        assert!(times.len() >= 2, "expected at least two cycles");
        for pair in times.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::from_millis(50));
        }
    }

    #[tokio::test]
    async fn first_scan_failure_is_fatal() {
        let dir = tempdir().unwrap();
        let tracker = Tracker::load(dir.path().join("ledger.json")).await.unwrap();
        let (mut watcher, _) = MockWatcher::new(Vec::new());
        watcher.fail_search = true;
        let (driver, _) = MockDriver::new();

        let orchestrator = OrchestratorBuilder::new(test_config())
            .with_watcher(Box::new(watcher))
            .with_driver(Box::new(driver))
            .with_tracker(tracker)
            .build()
            .unwrap();

        let err = orchestrator.run().await.err().expect("run should fail");
        assert!(matches!(err, OrchestratorError::Mail(_)));
    }

    #[tokio::test]
    async fn builder_requires_all_collaborators() {
        let err = OrchestratorBuilder::new(test_config()).build().err();
        assert!(matches!(err, Some(OrchestratorError::Missing(_))));
    }
}
