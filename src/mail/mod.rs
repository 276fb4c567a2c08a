// The `mail` module provides the mailbox seam the orchestrator polls.

pub mod imap_watcher;

pub use imap_watcher::{ImapMailWatcher, MailConfig};

use async_trait::async_trait;
use thiserror::Error;

/// Snapshot of one mailbox message, fetched per poll and never cached across
/// cycles.
#[derive(Debug, Clone)]
pub struct Message {
    /// Stable mailbox-assigned identifier (the IMAP UID, as a string).
    pub id: String,
    pub subject: String,
    pub body: String,
}

/// The `MailError` enum discriminates mailbox failures so callers can apply
/// the right policy per category.
#[derive(Error, Debug)]
pub enum MailError {
    /// Could not reach or negotiate with the server.
    #[error("mailbox connection failed: {0}")]
    Connection(String),
    /// The server rejected the credentials.
    #[error("mailbox authentication failed: {0}")]
    Auth(String),
    /// A command failed on an established session.
    #[error("mailbox protocol error: {0}")]
    Protocol(String),
    /// The blocking mailbox task could not be joined.
    #[error("mailbox task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// The `MailWatcher` trait defines the mailbox contract the orchestrator
/// consumes.
#[async_trait]
pub trait MailWatcher: Send {
    /// Returns the unread messages whose subject contains `subject_substring`,
    /// case-insensitively. Result order is whatever the mailbox returns and is
    /// not guaranteed stable across polls.
    async fn search(&mut self, subject_substring: &str) -> Result<Vec<Message>, MailError>;

    /// Marks one message as read. Called only after the message has been
    /// fully and successfully acted on.
    async fn mark_read(&mut self, id: &str) -> Result<(), MailError>;

    /// Releases the mailbox connection.
    async fn close(&mut self) -> Result<(), MailError>;
}
