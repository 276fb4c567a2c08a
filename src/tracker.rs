// The `tracker` module keeps the durable ledger of processed message ids.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use thiserror::Error;
use tokio::fs;
use tracing::debug;

/// The `TrackerError` enum defines the possible errors of the ledger.
#[derive(Error, Debug)]
pub enum TrackerError {
    /// An I/O error on the ledger file.
    #[error("ledger I/O error for '{path}': {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    /// The ledger file exists but cannot be decoded.
    #[error("ledger '{path}' is malformed: {reason}")]
    Malformed { path: PathBuf, reason: String },
    /// The in-memory ledger could not be encoded.
    #[error("failed to encode ledger: {0}")]
    Encode(serde_json::Error),
}

/// On-disk shape: a single JSON object mapping message id to the time it was
/// processed.
#[derive(Debug, Default, Serialize, Deserialize)]
struct Ledger {
    processed: BTreeMap<String, DateTime<Utc>>,
}

/// Durable dedup oracle for processed message ids.
///
/// The tracker is the sole writer of the ledger file. The full ledger is held
/// in memory and rewritten to disk after every newly marked id. The rewrite is
/// not transactional: a crash mid-write may corrupt the file, losing at most
/// the in-flight entry's durability. A single process, single writer is
/// assumed.
pub struct Tracker {
    path: PathBuf,
    ledger: Ledger,
}

impl Tracker {
    /// Loads the ledger from `path`. A missing file yields an empty ledger; a
    /// file that exists but does not decode is an error, so a corrupted ledger
    /// never silently causes wholesale reprocessing.
    pub async fn load(path: impl Into<PathBuf>) -> Result<Self, TrackerError> {
        let path = path.into();
        let ledger = match fs::read_to_string(&path).await {
            Ok(raw) => serde_json::from_str(&raw).map_err(|e| TrackerError::Malformed {
                path: path.clone(),
                reason: e.to_string(),
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "no ledger file, starting empty");
                Ledger::default()
            }
            Err(source) => return Err(TrackerError::Io { path, source }),
        };
        Ok(Self { path, ledger })
    }

    /// True if `id` has already been processed.
    pub fn is_processed(&self, id: &str) -> bool {
        self.ledger.processed.contains_key(id)
    }

    /// Total number of distinct processed ids.
    pub fn count(&self) -> usize {
        self.ledger.processed.len()
    }

    /// Marks `id` as processed and persists the ledger. Idempotent: marking an
    /// already-processed id neither duplicates the record, grows the count,
    /// nor touches the file.
    pub async fn mark_processed(&mut self, id: &str) -> Result<(), TrackerError> {
        if self.ledger.processed.contains_key(id) {
            return Ok(());
        }
        self.ledger.processed.insert(id.to_string(), Utc::now());
        self.persist().await
    }

    async fn persist(&self) -> Result<(), TrackerError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .await
                    .map_err(|source| TrackerError::Io {
                        path: parent.to_path_buf(),
                        source,
                    })?;
            }
        }
        let raw = serde_json::to_string_pretty(&self.ledger).map_err(TrackerError::Encode)?;
        fs::write(&self.path, raw)
            .await
            .map_err(|source| TrackerError::Io {
                path: self.path.clone(),
                source,
            })
    }
}
