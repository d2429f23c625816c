//! SQLite-backed history store.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use super::{CommentaryRecord, HistoryStore};
use crate::scrobble::loved_track_key;

const RECORD_COLUMNS: &str = "id, track_name, artist, album, genre, commentary, timestamp, \
     catalog_url, persistent_id, favorited, scrobbled, thumbnail";

pub struct SqliteHistoryStore {
    conn: Mutex<Connection>,
    capacity: usize,
}

impl SqliteHistoryStore {
    pub fn new<P: AsRef<Path>>(db_path: P, capacity: usize) -> Result<Self> {
        let path = db_path.as_ref();
        let is_new_db = !path.exists();
        let conn = Connection::open(path).context("Failed to open history database")?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS history (
                id TEXT PRIMARY KEY,
                track_name TEXT NOT NULL,
                artist TEXT NOT NULL,
                album TEXT NOT NULL,
                genre TEXT NOT NULL,
                commentary TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                catalog_url TEXT,
                persistent_id TEXT NOT NULL,
                favorited INTEGER NOT NULL DEFAULT 0,
                scrobbled INTEGER NOT NULL DEFAULT 0,
                thumbnail BLOB
            )",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_history_timestamp ON history(timestamp)",
            [],
        )?;

        if is_new_db {
            info!(path = %path.display(), "Created new history database");
        }

        Ok(Self {
            conn: Mutex::new(conn),
            capacity,
        })
    }

    fn format_datetime(dt: &DateTime<Utc>) -> String {
        dt.to_rfc3339()
    }

    fn row_to_record(row: &rusqlite::Row) -> rusqlite::Result<CommentaryRecord> {
        let id_str: String = row.get("id")?;
        let timestamp_str: String = row.get("timestamp")?;

        Ok(CommentaryRecord {
            id: Uuid::parse_str(&id_str).unwrap_or_else(|_| Uuid::nil()),
            track_name: row.get("track_name")?,
            artist: row.get("artist")?,
            album: row.get("album")?,
            genre: row.get("genre")?,
            commentary: row.get("commentary")?,
            timestamp: DateTime::parse_from_rfc3339(&timestamp_str)
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now()),
            catalog_url: row.get("catalog_url")?,
            persistent_id: row.get("persistent_id")?,
            favorited: row.get("favorited")?,
            scrobbled: row.get("scrobbled")?,
            thumbnail: row.get("thumbnail")?,
        })
    }
}

impl HistoryStore for SqliteHistoryStore {
    fn save(&self, record: &CommentaryRecord) -> Result<()> {
        let conn = self.conn.lock().unwrap();

        conn.execute(
            "INSERT INTO history (id, track_name, artist, album, genre, commentary, timestamp,
                 catalog_url, persistent_id, favorited, scrobbled, thumbnail)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                record.id.to_string(),
                record.track_name,
                record.artist,
                record.album,
                record.genre,
                record.commentary,
                Self::format_datetime(&record.timestamp),
                record.catalog_url,
                record.persistent_id,
                record.favorited,
                record.scrobbled,
                record.thumbnail,
            ],
        )?;

        // Capacity eviction: the oldest non-favorited rows make room.
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM history", [], |row| row.get(0))?;
        let excess = count - self.capacity as i64;
        if excess > 0 {
            let evicted = conn.execute(
                "DELETE FROM history WHERE id IN (
                     SELECT id FROM history WHERE favorited = 0
                     ORDER BY timestamp ASC LIMIT ?1
                 )",
                params![excess],
            )?;
            debug!(evicted, "Evicted history records over capacity");
        }

        Ok(())
    }

    fn get_all(&self) -> Result<Vec<CommentaryRecord>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {RECORD_COLUMNS} FROM history ORDER BY timestamp DESC"
        ))?;
        let records = stmt
            .query_map([], Self::row_to_record)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records)
    }

    fn get_record(&self, id: &Uuid) -> Result<Option<CommentaryRecord>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {RECORD_COLUMNS} FROM history WHERE id = ?1"
        ))?;
        let record = stmt
            .query_row(params![id.to_string()], Self::row_to_record)
            .optional()?;
        Ok(record)
    }

    fn search(&self, query: &str) -> Result<Vec<CommentaryRecord>> {
        let conn = self.conn.lock().unwrap();
        let pattern = format!("%{query}%");
        let mut stmt = conn.prepare(&format!(
            "SELECT {RECORD_COLUMNS} FROM history
             WHERE track_name LIKE ?1 OR artist LIKE ?1 OR album LIKE ?1 OR commentary LIKE ?1
             ORDER BY timestamp DESC"
        ))?;
        let records = stmt
            .query_map(params![pattern], Self::row_to_record)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records)
    }

    fn favorites(&self) -> Result<Vec<CommentaryRecord>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {RECORD_COLUMNS} FROM history WHERE favorited = 1 ORDER BY timestamp DESC"
        ))?;
        let records = stmt
            .query_map([], Self::row_to_record)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records)
    }

    fn toggle_favorite(&self, id: &Uuid) -> Result<Option<bool>> {
        let conn = self.conn.lock().unwrap();
        let current: Option<bool> = conn
            .query_row(
                "SELECT favorited FROM history WHERE id = ?1",
                params![id.to_string()],
                |row| row.get(0),
            )
            .optional()?;

        let Some(current) = current else {
            return Ok(None);
        };
        let new_state = !current;
        conn.execute(
            "UPDATE history SET favorited = ?1 WHERE id = ?2",
            params![new_state, id.to_string()],
        )?;
        Ok(Some(new_state))
    }

    fn delete(&self, id: &Uuid) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM history WHERE id = ?1", params![id.to_string()])?;
        Ok(())
    }

    fn mark_scrobbled(&self, id: &Uuid) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE history SET scrobbled = 1 WHERE id = ?1",
            params![id.to_string()],
        )?;
        Ok(())
    }

    fn update_thumbnail(&self, id: &Uuid, data: &[u8]) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE history SET thumbnail = ?1 WHERE id = ?2",
            params![data, id.to_string()],
        )?;
        Ok(())
    }

    fn sync_loved_tracks(&self, loved_keys: &HashSet<String>) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT id, artist, track_name, favorited FROM history")?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, bool>(3)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        drop(stmt);

        let mut changed = 0;
        for (id, artist, track_name, favorited) in rows {
            let desired = loved_keys.contains(&loved_track_key(&artist, &track_name));
            if desired != favorited {
                conn.execute(
                    "UPDATE history SET favorited = ?1 WHERE id = ?2",
                    params![desired, id],
                )?;
                changed += 1;
            }
        }
        Ok(changed)
    }
}
