//! Durable queue for scrobbles that could not be submitted.
//!
//! Failed submissions land here and are retried before the next scrobble.
//! The queue is capped; when full, the oldest entries are dropped. It is
//! persisted as a JSON file which is deleted once the queue drains, and a
//! missing or unreadable file just means an empty queue.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use tracing::{debug, warn};

/// Most entries kept on disk, and the most submitted per batch.
pub const MAX_PENDING: usize = 50;

/// One scrobble waiting to be (re)submitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingScrobble {
    pub artist: String,
    pub track: String,
    pub album: String,
    /// Unix seconds at which the track started playing.
    pub timestamp: i64,
    /// Track length in seconds, 0 when unknown.
    pub duration: i64,
}

/// In-memory view of the persisted retry queue.
#[derive(Debug)]
pub struct PendingQueue {
    path: PathBuf,
    items: Vec<PendingScrobble>,
}

impl PendingQueue {
    /// Load the queue from `path`, treating a missing or corrupt file as
    /// empty.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let items = match fs::read(&path) {
            Ok(bytes) => match serde_json::from_slice(&bytes) {
                Ok(items) => items,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Discarding unreadable scrobble queue");
                    Vec::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to read scrobble queue");
                Vec::new()
            }
        };
        if !items.is_empty() {
            debug!(count = items.len(), "Loaded pending scrobbles");
        }
        Self { path, items }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Append a scrobble, dropping the oldest entries beyond the cap.
    pub fn push(&mut self, item: PendingScrobble) {
        self.items.push(item);
        if self.items.len() > MAX_PENDING {
            let excess = self.items.len() - MAX_PENDING;
            self.items.drain(..excess);
        }
        self.persist();
    }

    /// Copy of the oldest entries, up to one batch worth.
    pub fn batch(&self) -> Vec<PendingScrobble> {
        self.items.iter().take(MAX_PENDING).cloned().collect()
    }

    /// Drop the `submitted` oldest entries and put `retry` back at the
    /// front, preserving their order.
    pub fn confirm(&mut self, submitted: usize, retry: Vec<PendingScrobble>) {
        let submitted = submitted.min(self.items.len());
        self.items.splice(..submitted, retry);
        self.persist();
    }

    fn persist(&self) {
        if self.items.is_empty() {
            if let Err(e) = fs::remove_file(&self.path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!(path = %self.path.display(), error = %e, "Failed to remove empty scrobble queue");
                }
            }
            return;
        }

        let bytes = match serde_json::to_vec(&self.items) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(error = %e, "Failed to serialize scrobble queue");
                return;
            }
        };
        let temp_path = self.path.with_extension("json.tmp");
        if let Err(e) = fs::write(&temp_path, bytes) {
            warn!(path = %temp_path.display(), error = %e, "Failed to write scrobble queue");
            return;
        }
        if let Err(e) = fs::rename(&temp_path, &self.path) {
            warn!(path = %self.path.display(), error = %e, "Failed to replace scrobble queue");
        }
    }
}
