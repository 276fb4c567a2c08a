//! # mailclick: mailbox-driven link automation.
//!
//! Polls a mailbox for unread messages whose subject matches a configured
//! substring, opens the actionable link from each match in an automated
//! browser session, clicks a configured on-page element, and durably tracks
//! processed messages so each is acted on at most once across restarts.

/// The `browser` module provides the automated-browser seam and its CDP implementation.
pub mod browser;
/// The `config` module builds the immutable scanner configuration.
pub mod config;
/// The `extract` module pulls actionable URLs out of message bodies.
pub mod extract;
/// The `mail` module provides the mailbox seam and its IMAP implementation.
pub mod mail;
/// The `orchestrator` module owns the poll/act/sleep control loop.
pub mod orchestrator;
/// The `shutdown` module provides a trait for gracefully stopping the scanner.
pub mod shutdown;
/// The `tracker` module keeps the durable ledger of processed message ids.
pub mod tracker;

pub use browser::{ActionDriver, BrowserError, CdpActionDriver};
pub use config::{Config, ConfigBuilder, ConfigError};
pub use mail::{ImapMailWatcher, MailConfig, MailError, MailWatcher, Message};
pub use orchestrator::{Orchestrator, OrchestratorBuilder, OrchestratorError, ScanResult};
pub use shutdown::{CtrlCShutdown, Shutdown, TimeBasedShutdown};
pub use tracker::{Tracker, TrackerError};
