//! End-to-end tests for the scrobbling side of the playback pipeline.
//!
//! Drives the pipeline through its public API with a recording scrobble
//! service and a paused tokio clock, so play-time rules can be asserted
//! deterministically.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use tokio::sync::{mpsc, Notify};

use linernotes::commentary::{
    CommentaryEngine, CommentaryOrchestrator, EngineError, TrackPrompt,
};
use linernotes::history::SqliteHistoryStore;
use linernotes::metadata::{MetadataProvider, MetadataResult};
use linernotes::pipeline::{PipelineSettings, PlaybackPipeline};
use linernotes::player::{PlayerState, TrackEvent};
use linernotes::scrobble::{ScrobbleCandidate, ScrobbleService};

// =============================================================================
// Test collaborators
// =============================================================================

#[derive(Default)]
struct RecordingScrobbler {
    scrobbles: Mutex<Vec<ScrobbleCandidate>>,
    now_playing: Mutex<Vec<String>>,
    scrobbled: Notify,
}

impl RecordingScrobbler {
    async fn wait_for_scrobbles(&self, count: usize) {
        loop {
            if self.scrobbles.lock().unwrap().len() >= count {
                return;
            }
            self.scrobbled.notified().await;
        }
    }
}

#[async_trait]
impl ScrobbleService for RecordingScrobbler {
    fn is_authenticated(&self) -> bool {
        true
    }

    async fn scrobble(&self, candidate: &ScrobbleCandidate) {
        self.scrobbles.lock().unwrap().push(candidate.clone());
        self.scrobbled.notify_waiters();
    }

    async fn update_now_playing(
        &self,
        _artist: &str,
        track: &str,
        _album: &str,
        _duration_seconds: f64,
    ) {
        self.now_playing.lock().unwrap().push(track.to_string());
    }

    async fn love(&self, _artist: &str, _track: &str) {}

    async fn unlove(&self, _artist: &str, _track: &str) {}

    async fn loved_track_keys(&self) -> HashSet<String> {
        HashSet::new()
    }
}

struct StubEngine;

#[async_trait]
impl CommentaryEngine for StubEngine {
    async fn prewarm(&self) {}

    async fn generate(&self, _prompt: &TrackPrompt) -> Result<String, EngineError> {
        Ok("A fine tune.".to_string())
    }

    async fn cancel_current(&self) {}
}

struct EmptyMetadata;

#[async_trait]
impl MetadataProvider for EmptyMetadata {
    async fn fetch(&self, _: &str, _: &str, _: &str, _: &str) -> MetadataResult {
        MetadataResult::default()
    }
}

struct Harness {
    scrobbler: Arc<RecordingScrobbler>,
    tx: mpsc::Sender<TrackEvent>,
    _data_dir: TempDir,
}

fn spawn_pipeline() -> Harness {
    let data_dir = TempDir::new().unwrap();
    let scrobbler = Arc::new(RecordingScrobbler::default());
    let metadata = Arc::new(EmptyMetadata);
    let history = Arc::new(SqliteHistoryStore::new(&data_dir.path().join("history.db"), 10).unwrap());
    let orchestrator = Arc::new(CommentaryOrchestrator::new(
        Arc::new(StubEngine),
        metadata.clone(),
        history.clone(),
    ));
    let settings = PipelineSettings {
        commentary_enabled: false,
        scrobbling_enabled: true,
        paused_by_user: false,
        skip_threshold: Duration::ZERO,
    };
    let pipeline =
        PlaybackPipeline::new(scrobbler.clone(), orchestrator, metadata, history, settings)
            .unwrap();

    let (tx, rx) = mpsc::channel(16);
    tokio::spawn(pipeline.run(rx));

    Harness {
        scrobbler,
        tx,
        _data_dir: data_dir,
    }
}

fn event(track_id: &str, duration: f64, state: PlayerState) -> TrackEvent {
    TrackEvent {
        track_id: track_id.to_string(),
        name: format!("Song {track_id}"),
        artist: "The Band".to_string(),
        album: "The Album".to_string(),
        genre: "Rock".to_string(),
        duration_seconds: duration,
        player_state: state,
        observed_at: None,
    }
}

/// Let the pipeline task drain the channel without advancing the clock.
async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}

// =============================================================================
// Scrobble timing
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_track_scrobbles_after_half_its_duration() {
    let harness = spawn_pipeline();

    harness
        .tx
        .send(event("a", 240.0, PlayerState::Playing))
        .await
        .unwrap();
    settle().await;

    tokio::time::advance(Duration::from_secs(120)).await;
    harness.scrobbler.wait_for_scrobbles(1).await;

    let scrobbles = harness.scrobbler.scrobbles.lock().unwrap();
    assert_eq!(scrobbles.len(), 1);
    assert_eq!(scrobbles[0].track, "Song a");
    assert_eq!(scrobbles[0].artist, "The Band");
    assert_eq!(scrobbles[0].duration_seconds, 240.0);
}

#[tokio::test(start_paused = true)]
async fn test_long_track_scrobbles_at_four_minutes() {
    let harness = spawn_pipeline();

    harness
        .tx
        .send(event("epic", 1200.0, PlayerState::Playing))
        .await
        .unwrap();
    settle().await;

    tokio::time::advance(Duration::from_secs(240)).await;
    harness.scrobbler.wait_for_scrobbles(1).await;

    assert_eq!(harness.scrobbler.scrobbles.lock().unwrap().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_short_track_never_scrobbles() {
    let harness = spawn_pipeline();

    harness
        .tx
        .send(event("jingle", 25.0, PlayerState::Playing))
        .await
        .unwrap();
    settle().await;

    tokio::time::advance(Duration::from_secs(3600)).await;
    settle().await;

    assert!(harness.scrobbler.scrobbles.lock().unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_pause_defers_the_scrobble_point() {
    let harness = spawn_pipeline();

    harness
        .tx
        .send(event("a", 240.0, PlayerState::Playing))
        .await
        .unwrap();
    settle().await;

    tokio::time::advance(Duration::from_secs(60)).await;
    harness
        .tx
        .send(event("a", 240.0, PlayerState::Paused))
        .await
        .unwrap();
    settle().await;

    // A long pause accumulates no play time.
    tokio::time::advance(Duration::from_secs(600)).await;
    settle().await;
    assert!(harness.scrobbler.scrobbles.lock().unwrap().is_empty());

    harness
        .tx
        .send(event("a", 240.0, PlayerState::Playing))
        .await
        .unwrap();
    settle().await;

    tokio::time::advance(Duration::from_secs(60)).await;
    harness.scrobbler.wait_for_scrobbles(1).await;
    assert_eq!(harness.scrobbler.scrobbles.lock().unwrap().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_replaced_track_never_scrobbles() {
    let harness = spawn_pipeline();

    harness
        .tx
        .send(event("a", 240.0, PlayerState::Playing))
        .await
        .unwrap();
    settle().await;

    // "a" is replaced well before its scrobble point.
    tokio::time::advance(Duration::from_secs(10)).await;
    harness
        .tx
        .send(event("b", 240.0, PlayerState::Playing))
        .await
        .unwrap();
    settle().await;

    tokio::time::advance(Duration::from_secs(120)).await;
    harness.scrobbler.wait_for_scrobbles(1).await;

    let scrobbles = harness.scrobbler.scrobbles.lock().unwrap();
    assert_eq!(scrobbles.len(), 1);
    assert_eq!(scrobbles[0].track, "Song b");
}

#[tokio::test(start_paused = true)]
async fn test_stop_and_replay_scrobbles_again() {
    let harness = spawn_pipeline();

    harness
        .tx
        .send(event("a", 100.0, PlayerState::Playing))
        .await
        .unwrap();
    settle().await;
    tokio::time::advance(Duration::from_secs(50)).await;
    harness.scrobbler.wait_for_scrobbles(1).await;

    harness
        .tx
        .send(event("a", 100.0, PlayerState::Stopped))
        .await
        .unwrap();
    settle().await;

    // Playing the same track after a stop is a fresh listen.
    harness
        .tx
        .send(event("a", 100.0, PlayerState::Playing))
        .await
        .unwrap();
    settle().await;
    tokio::time::advance(Duration::from_secs(50)).await;
    harness.scrobbler.wait_for_scrobbles(2).await;

    assert_eq!(harness.scrobbler.scrobbles.lock().unwrap().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_stop_at_scrobble_point_still_submits() {
    let harness = spawn_pipeline();

    harness
        .tx
        .send(event("a", 100.0, PlayerState::Playing))
        .await
        .unwrap();
    settle().await;

    // Stop lands exactly on the scrobble point; the submission must not be
    // lost even though the deadline never fired.
    tokio::time::advance(Duration::from_secs(50)).await;
    harness
        .tx
        .send(event("a", 100.0, PlayerState::Stopped))
        .await
        .unwrap();
    harness.scrobbler.wait_for_scrobbles(1).await;

    assert_eq!(harness.scrobbler.scrobbles.lock().unwrap()[0].track, "Song a");
}

// =============================================================================
// Now-playing updates
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_now_playing_sent_once_per_track() {
    let harness = spawn_pipeline();

    harness
        .tx
        .send(event("a", 240.0, PlayerState::Playing))
        .await
        .unwrap();
    settle().await;
    // A resume event for the same track is not a new now-playing.
    harness
        .tx
        .send(event("a", 240.0, PlayerState::Playing))
        .await
        .unwrap();
    settle().await;
    harness
        .tx
        .send(event("b", 240.0, PlayerState::Playing))
        .await
        .unwrap();
    settle().await;

    let now_playing = harness.scrobbler.now_playing.lock().unwrap();
    assert_eq!(*now_playing, vec!["Song a".to_string(), "Song b".to_string()]);
}
