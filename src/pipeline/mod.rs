//! The daemon's event loop: player events in, scrobbles and commentary out.
//!
//! The scrobble side reacts to every event and runs off a deadline timer
//! armed at the track's scrobble point. The commentary side runs events
//! through the gatekeeper and spawns generation tasks; single-flight is the
//! orchestrator's job, the pipeline never aborts tasks.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{TimeZone, Utc};
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::commentary::{CommentaryError, CommentaryOrchestrator, CommentaryRequest};
use crate::gatekeeper::{Decision, GatekeeperConfig, TrackGatekeeper};
use crate::history::HistoryStore;
use crate::metadata::MetadataProvider;
use crate::player::{PlayerState, TrackEvent};
use crate::scrobble::{PlayingTrack, ScrobbleService, ScrobbleTracker};

/// How often loved tracks are pulled into the history store.
const LOVED_SYNC_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

/// Timeout for artwork downloads.
const ARTWORK_TIMEOUT: Duration = Duration::from_secs(15);

/// Behavior switches resolved from configuration.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub commentary_enabled: bool,
    pub scrobbling_enabled: bool,
    pub paused_by_user: bool,
    pub skip_threshold: Duration,
}

/// Owns the per-track state machines and fans events out to the scrobbler
/// and the commentary orchestrator.
pub struct PlaybackPipeline {
    gatekeeper: TrackGatekeeper,
    tracker: ScrobbleTracker,
    scrobbler: Arc<dyn ScrobbleService>,
    orchestrator: Arc<CommentaryOrchestrator>,
    metadata: Arc<dyn MetadataProvider>,
    history: Arc<dyn HistoryStore>,
    http: reqwest::Client,
    settings: PipelineSettings,
    current_track_id: Option<String>,
    deadline: Option<Instant>,
    /// History record id of the most recently generated commentary, keyed by
    /// track id so a late result for a previous track is never marked.
    latest_record: Arc<Mutex<Option<(String, Uuid)>>>,
}

impl PlaybackPipeline {
    pub fn new(
        scrobbler: Arc<dyn ScrobbleService>,
        orchestrator: Arc<CommentaryOrchestrator>,
        metadata: Arc<dyn MetadataProvider>,
        history: Arc<dyn HistoryStore>,
        settings: PipelineSettings,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(ARTWORK_TIMEOUT)
            .build()
            .context("failed to build artwork HTTP client")?;
        Ok(Self {
            gatekeeper: TrackGatekeeper::new(),
            tracker: ScrobbleTracker::new(),
            scrobbler,
            orchestrator,
            metadata,
            history,
            http,
            settings,
            current_track_id: None,
            deadline: None,
            latest_record: Arc::new(Mutex::new(None)),
        })
    }

    /// Drive the pipeline until the event channel closes.
    pub async fn run(mut self, mut events: mpsc::Receiver<TrackEvent>) {
        let mut loved_sync = tokio::time::interval(LOVED_SYNC_INTERVAL);
        loved_sync.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let deadline = self.deadline;
            tokio::select! {
                maybe_event = events.recv() => {
                    match maybe_event {
                        Some(event) => self.handle_event(event).await,
                        None => break,
                    }
                }
                _ = async move {
                    match deadline {
                        Some(at) => tokio::time::sleep_until(at).await,
                        None => std::future::pending::<()>().await,
                    }
                } => {
                    self.submit_due_scrobble().await;
                }
                _ = loved_sync.tick() => {
                    self.sync_loved_tracks().await;
                }
            }
        }
        debug!("Event channel closed, pipeline stopping");
    }

    async fn handle_event(&mut self, event: TrackEvent) {
        if self.settings.scrobbling_enabled {
            self.handle_scrobble_side(&event).await;
        }
        if self.settings.commentary_enabled {
            self.handle_commentary_side(&event);
        }
    }

    async fn handle_scrobble_side(&mut self, event: &TrackEvent) {
        match event.player_state {
            PlayerState::Playing => {
                if self.current_track_id.as_deref() == Some(event.track_id.as_str()) {
                    self.tracker.resume();
                } else {
                    let started_at = event
                        .observed_at
                        .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
                        .unwrap_or_else(Utc::now);
                    self.tracker.track_started(PlayingTrack::new(
                        &event.artist,
                        &event.name,
                        &event.album,
                        event.duration_seconds,
                        started_at,
                    ));
                    self.current_track_id = Some(event.track_id.clone());

                    let scrobbler = self.scrobbler.clone();
                    let (artist, name, album) =
                        (event.artist.clone(), event.name.clone(), event.album.clone());
                    let duration = event.duration_seconds;
                    tokio::spawn(async move {
                        scrobbler
                            .update_now_playing(&artist, &name, &album, duration)
                            .await;
                    });
                }
                self.arm_deadline();
            }
            PlayerState::Paused => {
                self.tracker.pause();
                self.deadline = None;
            }
            PlayerState::Stopped => {
                if self.tracker.time_until_scrobble_point() == Some(Duration::ZERO) {
                    self.submit_due_scrobble().await;
                }
                self.tracker.reset();
                self.current_track_id = None;
                self.deadline = None;
            }
        }
    }

    fn arm_deadline(&mut self) {
        self.deadline = self
            .tracker
            .time_until_scrobble_point()
            .map(|remaining| Instant::now() + remaining);
    }

    async fn submit_due_scrobble(&mut self) {
        self.deadline = None;
        if self.tracker.is_scrobbled() {
            return;
        }
        let Some(candidate) = self.tracker.candidate() else {
            return;
        };

        info!(
            track = %candidate.track,
            artist = %candidate.artist,
            "Track reached scrobble point"
        );
        self.scrobbler.scrobble(&candidate).await;
        self.tracker.mark_scrobbled();

        let record_id = {
            let latest = self.latest_record.lock().unwrap();
            latest
                .as_ref()
                .filter(|(track_id, _)| self.current_track_id.as_deref() == Some(track_id.as_str()))
                .map(|(_, id)| *id)
        };
        if let Some(id) = record_id {
            if let Err(e) = self.history.mark_scrobbled(&id) {
                warn!(error = %e, "Failed to mark history record as scrobbled");
            }
        }
    }

    fn handle_commentary_side(&mut self, event: &TrackEvent) {
        let config = GatekeeperConfig {
            paused_by_user: self.settings.paused_by_user,
            skip_threshold: self.settings.skip_threshold,
        };
        match self
            .gatekeeper
            .evaluate(&event.track_id, event.player_state, &config)
        {
            Decision::Accept => self.spawn_commentary(event),
            Decision::Reject(reason) => {
                debug!(track = %event.name, reason = %reason, "Commentary suppressed");
            }
        }
    }

    fn spawn_commentary(&self, event: &TrackEvent) {
        info!(track = %event.name, artist = %event.artist, "Generating commentary");
        let request = CommentaryRequest {
            persistent_id: event.track_id.clone(),
            name: event.name.clone(),
            artist: event.artist.clone(),
            album: event.album.clone(),
            genre: event.genre.clone(),
        };
        let orchestrator = self.orchestrator.clone();
        let metadata = self.metadata.clone();
        let history = self.history.clone();
        let http = self.http.clone();
        let latest_record = self.latest_record.clone();
        let track_id = event.track_id.clone();
        let (name, artist) = (event.name.clone(), event.artist.clone());

        tokio::spawn(async move {
            let (outcome, thumbnail) = tokio::join!(
                orchestrator.process(request),
                fetch_thumbnail(&http, metadata.as_ref(), &name, &artist),
            );
            match outcome {
                Ok(result) => {
                    info!(
                        track = %result.track_name,
                        chars = result.commentary.len(),
                        "Commentary ready"
                    );
                    *latest_record.lock().unwrap() = Some((track_id, result.id));
                    if let Some(bytes) = thumbnail {
                        if let Err(e) = history.update_thumbnail(&result.id, &bytes) {
                            warn!(error = %e, "Failed to store thumbnail");
                        }
                    }
                }
                Err(CommentaryError::Cancelled) => {}
                Err(e) => warn!(track = %name, error = %e, "Commentary generation failed"),
            }
        });
    }

    async fn sync_loved_tracks(&self) {
        if !self.settings.scrobbling_enabled || !self.scrobbler.is_authenticated() {
            debug!("Skipping loved tracks sync");
            return;
        }
        let keys = self.scrobbler.loved_track_keys().await;
        match self.history.sync_loved_tracks(&keys) {
            Ok(changed) if changed > 0 => info!(changed, "Synced loved tracks into history"),
            Ok(_) => debug!("Loved tracks already in sync"),
            Err(e) => warn!(error = %e, "Failed to sync loved tracks"),
        }
    }
}

/// Best-effort artwork lookup and download for the history thumbnail.
async fn fetch_thumbnail(
    http: &reqwest::Client,
    metadata: &dyn MetadataProvider,
    name: &str,
    artist: &str,
) -> Option<Vec<u8>> {
    let result = metadata.fetch(name, artist, "", "").await;
    let url = result.artwork_url?;
    let response = match http.get(&url).send().await.and_then(|r| r.error_for_status()) {
        Ok(response) => response,
        Err(e) => {
            warn!(url = %url, error = %e, "Artwork download failed");
            return None;
        }
    };
    match response.bytes().await {
        Ok(bytes) => Some(bytes.to_vec()),
        Err(e) => {
            warn!(url = %url, error = %e, "Artwork download failed");
            None
        }
    }
}
