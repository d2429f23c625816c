//! Commentary history persistence.

use anyhow::Result;
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use uuid::Uuid;

pub mod store;

pub use store::SqliteHistoryStore;

/// One generated commentary, as persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct CommentaryRecord {
    pub id: Uuid,
    pub track_name: String,
    pub artist: String,
    pub album: String,
    pub genre: String,
    pub commentary: String,
    pub timestamp: DateTime<Utc>,
    pub catalog_url: Option<String>,
    /// The player's stable track identifier.
    pub persistent_id: String,
    pub favorited: bool,
    pub scrobbled: bool,
    pub thumbnail: Option<Vec<u8>>,
}

/// Storage for generated commentary, append-only with capacity eviction of
/// the oldest non-favorited entries.
#[cfg_attr(feature = "mock", mockall::automock)]
pub trait HistoryStore: Send + Sync {
    fn save(&self, record: &CommentaryRecord) -> Result<()>;

    /// All records, newest first.
    fn get_all(&self) -> Result<Vec<CommentaryRecord>>;

    fn get_record(&self, id: &Uuid) -> Result<Option<CommentaryRecord>>;

    /// Substring match over track name, artist, album and commentary.
    fn search(&self, query: &str) -> Result<Vec<CommentaryRecord>>;

    fn favorites(&self) -> Result<Vec<CommentaryRecord>>;

    /// Flip the favorite flag, returning the new state; `None` for an
    /// unknown id.
    fn toggle_favorite(&self, id: &Uuid) -> Result<Option<bool>>;

    fn delete(&self, id: &Uuid) -> Result<()>;

    fn mark_scrobbled(&self, id: &Uuid) -> Result<()>;

    fn update_thumbnail(&self, id: &Uuid, data: &[u8]) -> Result<()>;

    /// Align favorite flags with the given set of normalized
    /// `"artist\ttrack"` keys. Returns the number of rows changed.
    fn sync_loved_tracks(&self, loved_keys: &HashSet<String>) -> Result<usize>;
}
