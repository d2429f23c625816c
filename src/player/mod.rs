//! Player event types and the stdin event source.
//!
//! The OS-level player watcher is external to this crate; anything able to
//! emit one JSON object per line can drive the daemon. Each line describes a
//! Playing/Paused/Stopped transition for a track.

use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Playback state reported by the player.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlayerState {
    Playing,
    Paused,
    Stopped,
}

/// One player transition event.
#[derive(Debug, Clone, Deserialize)]
pub struct TrackEvent {
    pub track_id: String,
    pub name: String,
    pub artist: String,
    #[serde(default)]
    pub album: String,
    #[serde(default)]
    pub genre: String,
    #[serde(default)]
    pub duration_seconds: f64,
    pub player_state: PlayerState,
    /// Unix seconds at which the player observed the transition. Events
    /// without it are stamped on receipt.
    #[serde(default)]
    pub observed_at: Option<i64>,
}

/// Spawn a task reading line-delimited JSON events from stdin.
///
/// Malformed lines are logged and skipped. The channel closes when stdin
/// reaches EOF or the receiver is dropped.
pub fn spawn_stdin_source(buffer: usize) -> mpsc::Receiver<TrackEvent> {
    let (tx, rx) = mpsc::channel(buffer);
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }
                    match serde_json::from_str::<TrackEvent>(line) {
                        Ok(event) => {
                            debug!(
                                track = %event.name,
                                artist = %event.artist,
                                state = ?event.player_state,
                                "Player event"
                            );
                            if tx.send(event).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => warn!(error = %e, "Ignoring malformed player event"),
                    }
                }
                Ok(None) => {
                    debug!("Player event stream closed");
                    break;
                }
                Err(e) => {
                    warn!(error = %e, "Failed to read player event");
                    break;
                }
            }
        }
    });
    rx
}
